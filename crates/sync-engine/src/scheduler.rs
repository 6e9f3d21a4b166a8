//! 同步调度器
//!
//! 生命周期：STOPPED -> STARTING -> RUNNING -> STOPPING -> STOPPED。
//! 唤醒来源为固定间隔定时器与有界信号队列（满时丢弃最旧信号），
//! 待处理信号合并为一个周期。每个网关在独立任务中同步，
//! 任务数受工作池上限约束；单个网关的错误或 panic 只体现在它自己的结果里。
//! 待导出文件先写入出站存储，启动时恢复，停止时在时限内尽量发送完。

use crate::channel::panic_message;
use crate::export::{OutboundMessage, OutboundQueue};
use crate::gateway::Gateway;
use crate::import::ImporterSet;
use crate::link::LinkValidator;
use crate::metrics;
use crate::registry::FacilityRegistry;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use edi_common::config::SchedulerSettings;
use edi_common::models::{GatewayKey, SyncOutcome, SyncStatus};
use edi_common::outbox::ExportOutbox;
use edi_common::state::StatusStore;
use edi_common::status::{CycleReport, CycleTrigger, SchedulerState};
use edi_common::{EdiError, EdiResult};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, Notify, Semaphore, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// 有界唤醒信号队列；满时丢弃最旧的信号
struct SignalQueue {
    capacity: usize,
    pending: StdMutex<VecDeque<DateTime<Utc>>>,
    notify: Notify,
}

impl SignalQueue {
    fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            pending: StdMutex::new(VecDeque::new()),
            notify: Notify::new(),
        }
    }

    fn pending(&self) -> MutexGuard<'_, VecDeque<DateTime<Utc>>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 返回是否丢弃了旧信号
    fn push(&self) -> bool {
        let dropped = {
            let mut pending = self.pending();
            let dropped = if pending.len() >= self.capacity {
                pending.pop_front().is_some()
            } else {
                false
            };
            pending.push_back(Utc::now());
            dropped
        };
        if dropped {
            metrics::inc_signal_dropped();
            debug!("signal queue full, dropped oldest signal");
        }
        self.notify.notify_one();
        dropped
    }

    async fn wait(&self) {
        loop {
            let queued = !self.pending().is_empty();
            if queued {
                return;
            }
            self.notify.notified().await;
        }
    }

    fn drain(&self) -> usize {
        let mut pending = self.pending();
        let count = pending.len();
        pending.clear();
        count
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.pending().len()
    }
}

struct Inner {
    registry: FacilityRegistry,
    validator: Arc<LinkValidator>,
    importers: ImporterSet,
    settings: SchedulerSettings,
    status: StatusStore,
    state: watch::Sender<SchedulerState>,
    reports: watch::Sender<Option<CycleReport>>,
    signals: SignalQueue,
    outbound: OutboundQueue,
    outbox: Arc<dyn ExportOutbox>,
    sequence: AtomicU64,
    cancel: StdMutex<CancellationToken>,
}

struct Runtime {
    handle: JoinHandle<()>,
    cancel: CancellationToken,
}

pub struct SyncScheduler {
    inner: Arc<Inner>,
    runtime: Mutex<Option<Runtime>>,
}

fn trigger_label(trigger: CycleTrigger) -> &'static str {
    match trigger {
        CycleTrigger::Timer => "timer",
        CycleTrigger::Signal => "signal",
    }
}

/// 一次出站发送的结果
#[derive(Debug, Default)]
struct Flush {
    exported: u32,
    transport_error: Option<String>,
}

impl SyncScheduler {
    pub fn new(
        registry: FacilityRegistry,
        validator: Arc<LinkValidator>,
        importers: ImporterSet,
        settings: SchedulerSettings,
        status: StatusStore,
        outbox: Arc<dyn ExportOutbox>,
    ) -> Self {
        let (state, _) = watch::channel(SchedulerState::Stopped);
        let (reports, _) = watch::channel(None);
        let inner = Inner {
            registry,
            validator,
            importers,
            signals: SignalQueue::new(settings.signal_capacity),
            outbound: OutboundQueue::new(settings.outbound_capacity),
            outbox,
            settings,
            status,
            state,
            reports,
            sequence: AtomicU64::new(0),
            cancel: StdMutex::new(CancellationToken::new()),
        };
        Self {
            inner: Arc::new(inner),
            runtime: Mutex::new(None),
        }
    }

    pub fn state(&self) -> SchedulerState {
        *self.inner.state.borrow()
    }

    pub fn registry(&self) -> &FacilityRegistry {
        &self.inner.registry
    }

    pub fn pending_exports(&self, key: &GatewayKey) -> usize {
        self.inner.outbound.len(key)
    }

    /// 启动后台循环；只能从 STOPPED 启动，超过启动时限视为失败
    pub async fn start(&self) -> EdiResult<()> {
        let mut runtime = self.runtime.lock().await;
        let current = self.state();
        if current != SchedulerState::Stopped || runtime.is_some() {
            return Err(EdiError::lifecycle(format!(
                "cannot start scheduler in state {:?}",
                current
            )));
        }

        self.inner.set_state(SchedulerState::Starting).await;
        match self.inner.restore_outbound().await {
            Ok(0) => {}
            Ok(restored) => info!(restored, "pending exports restored"),
            Err(err) => warn!(error = %err, "failed to restore pending exports, retrying on next start"),
        }
        let cancel = CancellationToken::new();
        *self
            .inner
            .cancel
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = cancel.clone();

        let mut state_rx = self.inner.state.subscribe();
        let handle = tokio::spawn(Inner::run(self.inner.clone(), cancel.clone()));
        let timeout = self.inner.settings.start_timeout;
        let ready = tokio::time::timeout(
            timeout,
            state_rx.wait_for(|state| *state == SchedulerState::Running),
        )
        .await
        .map(|waited| waited.is_ok())
        .unwrap_or(false);

        if !ready {
            cancel.cancel();
            handle.abort();
            self.inner.finish_stop().await;
            return Err(EdiError::lifecycle(format!(
                "scheduler did not start within {:?}",
                timeout
            )));
        }

        *runtime = Some(Runtime { handle, cancel });
        info!(
            interval_secs = self.inner.settings.interval.as_secs(),
            max_workers = self.inner.settings.max_workers,
            "sync scheduler started"
        );
        Ok(())
    }

    /// 请求协作式停止并最多等待 `timeout`；后台循环退出后用剩余时间发送待导出文件。
    /// 超时后中止后台任务并返回错误，正在处理的文件保留 `.processing` 后缀，
    /// 未发送的导出留在出站存储中，下次启动时恢复
    pub async fn stop(&self, timeout: Duration) -> EdiResult<()> {
        let mut runtime = self.runtime.lock().await;
        let Some(Runtime { mut handle, cancel }) = runtime.take() else {
            return Ok(());
        };

        self.inner.set_state(SchedulerState::Stopping).await;
        cancel.cancel();
        let deadline = tokio::time::Instant::now() + timeout;

        match tokio::time::timeout_at(deadline, &mut handle).await {
            Ok(Ok(())) => {
                let drain_token = CancellationToken::new();
                let drain = self.inner.drain_outbound(&drain_token);
                match tokio::time::timeout_at(deadline, drain).await {
                    Ok(0) => {}
                    Ok(exported) => info!(exported, "pending exports sent before stop"),
                    Err(_) => warn!("stop deadline reached, pending exports kept for next start"),
                }
                self.inner.finish_stop().await;
                info!("sync scheduler stopped");
                Ok(())
            }
            Ok(Err(err)) => {
                self.inner.finish_stop().await;
                Err(EdiError::lifecycle(format!("scheduler task failed: {}", err)))
            }
            Err(_) => {
                handle.abort();
                self.inner.finish_stop().await;
                warn!(timeout_ms = timeout.as_millis() as u64, "sync scheduler stop timed out");
                Err(EdiError::lifecycle(format!(
                    "scheduler did not stop within {:?}",
                    timeout
                )))
            }
        }
    }

    /// 请求立即执行一个额外周期
    pub fn trigger_now(&self) -> EdiResult<()> {
        let state = self.state();
        if state != SchedulerState::Running {
            return Err(EdiError::lifecycle(format!(
                "cannot trigger sync while scheduler is {:?}",
                state
            )));
        }
        self.inner.signals.push();
        Ok(())
    }

    /// 触发并等待一个在请求之后开始的周期完成
    pub async fn trigger_and_wait(&self, timeout: Duration) -> EdiResult<CycleReport> {
        let after = self.inner.sequence.load(Ordering::SeqCst);
        let mut reports = self.inner.reports.subscribe();
        self.trigger_now()?;

        let waited = tokio::time::timeout(
            timeout,
            reports.wait_for(|report| report.as_ref().is_some_and(|r| r.sequence > after)),
        )
        .await;
        match waited {
            Ok(Ok(report)) => (*report)
                .clone()
                .ok_or_else(|| EdiError::lifecycle("cycle report missing")),
            Ok(Err(_)) => Err(EdiError::lifecycle("scheduler report channel closed")),
            Err(_) => Err(EdiError::lifecycle(format!(
                "no sync cycle finished within {:?}",
                timeout
            ))),
        }
    }

    /// 把出站文件放入网关的待发送队列；调度器运行时立即触发一个周期
    pub async fn queue_export(
        &self,
        key: GatewayKey,
        prefix: impl Into<String>,
        content: Bytes,
    ) -> EdiResult<()> {
        let gateway = self
            .inner
            .registry
            .get(&key)
            .await
            .ok_or_else(|| EdiError::not_found(format!("gateway {}", key)))?;
        if !gateway.config().await.has_export_path() {
            return Err(EdiError::validation(format!(
                "gateway {} has no export path",
                key
            )));
        }
        let message = OutboundMessage::new(prefix, content);
        self.inner.outbox.insert(&message.to_pending(key)).await?;
        if let Some(evicted) = self.inner.outbound.push(key, message) {
            self.inner.forget(evicted.id).await;
        }
        if self.state() == SchedulerState::Running {
            self.inner.signals.push();
        }
        Ok(())
    }

    /// 直接执行一个周期（与后台循环共享同一取消令牌；停止后换用新令牌）
    pub async fn run_cycle(&self, trigger: CycleTrigger) -> CycleReport {
        let cancel = self
            .inner
            .cancel
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        self.inner.run_cycle(trigger, &cancel).await
    }

    /// 重新发布网关状态（配置变更后调用）
    pub async fn refresh_status(&self) {
        self.inner.publish(None).await;
    }
}

impl Inner {
    async fn set_state(&self, state: SchedulerState) {
        self.state.send_replace(state);
        self.publish(None).await;
    }

    /// 换上未取消的令牌，使停止后的直接周期照常执行
    async fn finish_stop(&self) {
        *self.cancel.lock().unwrap_or_else(PoisonError::into_inner) = CancellationToken::new();
        self.set_state(SchedulerState::Stopped).await;
    }

    /// 把出站存储中尚未入队的记录放回内存队列
    async fn restore_outbound(&self) -> EdiResult<usize> {
        let mut restored = 0;
        for pending in self.outbox.load_pending().await? {
            let key = pending.gateway;
            if self.outbound.contains(&key, pending.id) {
                continue;
            }
            if let Some(evicted) = self.outbound.push(key, OutboundMessage::from(pending)) {
                self.forget(evicted.id).await;
            }
            restored += 1;
        }
        Ok(restored)
    }

    /// 从出站存储删除；失败时该文件会在下次启动后重发
    async fn forget(&self, id: Uuid) {
        if let Err(err) = self.outbox.remove(id).await {
            warn!(export_id = %id, error = %err, "failed to remove pending export");
        }
    }

    async fn run(self: Arc<Self>, cancel: CancellationToken) {
        self.set_state(SchedulerState::Running).await;

        let period = self.settings.interval.max(Duration::from_millis(1));
        let first = tokio::time::Instant::now() + self.settings.initial_delay;
        let mut ticker = tokio::time::interval_at(first, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let trigger = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => CycleTrigger::Timer,
                _ = self.signals.wait() => CycleTrigger::Signal,
            };
            let coalesced = self.signals.drain();
            if coalesced > 1 {
                debug!(signals = coalesced, "coalesced pending signals into one cycle");
            }
            self.run_cycle(trigger, &cancel).await;
        }
    }

    async fn run_cycle(self: &Arc<Self>, trigger: CycleTrigger, cancel: &CancellationToken) -> CycleReport {
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        let started_at = Utc::now();
        let started = Instant::now();

        let workers = Arc::new(Semaphore::new(self.settings.max_workers.max(1)));
        let mut units = JoinSet::new();
        let mut identities = HashMap::new();
        let mut outcomes = Vec::new();

        for (facility, gateways) in self.registry.facilities().await {
            for gateway in gateways {
                let key = gateway.key();
                let permit = if cancel.is_cancelled() {
                    None
                } else {
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => None,
                        permit = workers.clone().acquire_owned() => permit.ok(),
                    }
                };
                let Some(permit) = permit else {
                    outcomes.push(SyncOutcome::new(
                        key,
                        facility.domain_id.clone(),
                        SyncStatus::Cancelled,
                    ));
                    continue;
                };

                let inner = Arc::clone(self);
                let cancel = cancel.clone();
                let handle = units.spawn(async move {
                    let _permit = permit;
                    inner.sync_gateway(gateway, cancel).await
                });
                identities.insert(handle.id(), (key, facility.clone()));
            }
        }

        while let Some(joined) = units.join_next_with_id().await {
            match joined {
                Ok((_, outcome)) => outcomes.push(outcome),
                Err(err) => {
                    let Some((key, facility)) = identities.get(&err.id()).cloned() else {
                        continue;
                    };
                    let reason = if err.is_panic() {
                        panic_message(err.into_panic().as_ref())
                    } else {
                        "sync task aborted".to_string()
                    };
                    error!(
                        facility = %facility,
                        gateway = %key.kind,
                        reason = %reason,
                        "gateway sync panicked"
                    );
                    metrics::inc_gateway_failure("panic");
                    outcomes.push(SyncOutcome::new(
                        key,
                        facility.domain_id,
                        SyncStatus::Panicked(reason),
                    ));
                }
            }
        }
        outcomes.sort_by_key(|outcome| outcome.gateway);

        let report = CycleReport {
            sequence,
            trigger,
            started_at,
            finished_at: Utc::now(),
            outcomes,
        };
        metrics::observe_cycle(trigger_label(trigger), started.elapsed().as_secs_f64());
        if let Some(summary) = report.error_status() {
            warn!(sequence, summary = %summary, "sync cycle finished with broken gateways");
        } else {
            debug!(
                sequence,
                archived = report.archived(),
                failed = report.failed(),
                "sync cycle finished"
            );
        }

        self.publish(Some(&report)).await;
        self.reports.send_replace(Some(report.clone()));
        report
    }

    /// 单个网关的一次工作单元：必要时重新探测、入站同步、发送待导出文件
    async fn sync_gateway(&self, gateway: Arc<Gateway>, cancel: CancellationToken) -> SyncOutcome {
        if gateway.is_active().await && !gateway.link_state().await.is_linked() {
            self.validator.revalidate_if_due(&gateway).await;
        }
        let mut outcome = gateway.sync(&self.importers, &cancel).await;
        if matches!(outcome.status, SyncStatus::Completed | SyncStatus::Unlinked) {
            let flush = self.flush_outbound(&gateway, &cancel).await;
            outcome.exported += flush.exported;
            if let Some(reason) = flush.transport_error {
                if outcome.status == SyncStatus::Completed {
                    outcome.status = SyncStatus::TransportFailed(reason);
                }
            }
        }
        outcome
    }

    /// 停止前逐个网关发送剩余导出
    async fn drain_outbound(&self, cancel: &CancellationToken) -> u32 {
        let mut exported = 0;
        for key in self.outbound.keys() {
            let Some(gateway) = self.registry.get(&key).await else {
                continue;
            };
            exported += self.flush_outbound(&gateway, cancel).await.exported;
        }
        exported
    }

    async fn flush_outbound(&self, gateway: &Gateway, cancel: &CancellationToken) -> Flush {
        let key = gateway.key();
        let mut flush = Flush::default();
        while !cancel.is_cancelled() {
            let Some(message) = self.outbound.pop(&key) else {
                break;
            };
            match gateway.export(&message.prefix, message.content.clone()).await {
                Ok(receipt) => {
                    self.forget(message.id).await;
                    flush.exported += 1;
                    info!(
                        facility = %gateway.facility(),
                        gateway = %key.kind,
                        path = %receipt.path,
                        size = receipt.size,
                        "export uploaded"
                    );
                }
                Err(err) if err.is_transport() => {
                    warn!(
                        facility = %gateway.facility(),
                        gateway = %key.kind,
                        error = %err,
                        "export upload failed, keeping it queued"
                    );
                    if let Some(dropped) = self.outbound.requeue(key, message) {
                        self.forget(dropped.id).await;
                    }
                    flush.transport_error = Some(err.to_string());
                    break;
                }
                Err(err) => {
                    error!(
                        facility = %gateway.facility(),
                        gateway = %key.kind,
                        error = %err,
                        "export rejected, dropping it"
                    );
                    self.forget(message.id).await;
                }
            }
        }
        flush
    }

    async fn publish(&self, report: Option<&CycleReport>) {
        let mut gateways = Vec::new();
        for gateway in self.registry.gateways().await {
            let pending = self.outbound.len(&gateway.key());
            gateways.push(gateway.status(pending).await);
        }
        let mut status = self.status.current().await;
        status.scheduler = *self.state.borrow();
        status.gateways = gateways;
        if let Some(report) = report {
            status.error_status = report.error_status();
            status.last_cycle = Some(report.clone());
        }
        status.updated_at = Some(Utc::now());
        self.status.apply(status).await;
    }
}
