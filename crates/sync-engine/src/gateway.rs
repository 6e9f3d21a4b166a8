//! 网关：文件投递通道 + 链路状态 + 凭据
//!
//! 链路状态只存在于内存中。UNLINKED 的网关同步时不触碰任何文件；
//! 同步中出现传输错误会把网关转为 UNLINKED 并中止本轮剩余工作。

use crate::channel::{ActiveClaims, FileDropChannel};
use crate::import::{ImportRouting, ImporterSet};
use crate::metrics;
use crate::remote::{RemoteDirectory, TimedDirectory, Transport};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use edi_common::credentials::CredentialCipher;
use edi_common::models::{
    ExportReceipt, FacilityRef, GatewayConfig, GatewayKey, GatewayKind, LinkState, SyncOutcome,
    SyncStatus,
};
use edi_common::status::GatewayStatus;
use edi_common::{EdiError, EdiResult};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
struct LinkInfo {
    state: LinkState,
    last_success: Option<DateTime<Utc>>,
    last_probe: Option<DateTime<Utc>>,
    last_error: Option<String>,
}

pub struct Gateway {
    key: GatewayKey,
    facility: FacilityRef,
    routing: ImportRouting,
    config: RwLock<GatewayConfig>,
    link: RwLock<LinkInfo>,
    transport: Arc<dyn Transport>,
    cipher: Arc<dyn CredentialCipher>,
    claims: ActiveClaims,
    sync_lock: Mutex<()>,
}

impl Gateway {
    pub fn new(
        facility: FacilityRef,
        kind: GatewayKind,
        config: GatewayConfig,
        transport: Arc<dyn Transport>,
        cipher: Arc<dyn CredentialCipher>,
    ) -> Self {
        metrics::set_gateway_linked(&facility.domain_id, kind.as_str(), false);
        Self {
            key: GatewayKey::new(facility.id, kind),
            facility,
            routing: ImportRouting::for_kind(kind),
            config: RwLock::new(config),
            link: RwLock::new(LinkInfo {
                state: LinkState::Unlinked,
                last_success: None,
                last_probe: None,
                last_error: None,
            }),
            transport,
            cipher,
            claims: ActiveClaims::new(),
            sync_lock: Mutex::new(()),
        }
    }

    pub fn key(&self) -> GatewayKey {
        self.key
    }

    pub fn kind(&self) -> GatewayKind {
        self.key.kind
    }

    pub fn facility(&self) -> &FacilityRef {
        &self.facility
    }

    pub async fn config(&self) -> GatewayConfig {
        self.config.read().await.clone()
    }

    pub async fn set_config(&self, config: GatewayConfig) {
        *self.config.write().await = config;
    }

    pub async fn is_active(&self) -> bool {
        self.config.read().await.active
    }

    pub async fn link_state(&self) -> LinkState {
        self.link.read().await.state
    }

    pub async fn last_probe(&self) -> Option<DateTime<Utc>> {
        self.link.read().await.last_probe
    }

    pub async fn status(&self, pending_exports: usize) -> GatewayStatus {
        let config = self.config.read().await;
        let link = self.link.read().await;
        GatewayStatus {
            key: self.key,
            facility: self.facility.domain_id.clone(),
            url: config.url(),
            active: config.active,
            link_state: link.state,
            last_success: link.last_success,
            last_probe: link.last_probe,
            last_error: link.last_error.clone(),
            pending_exports,
        }
    }

    pub(crate) async fn mark_linked(&self) {
        let mut link = self.link.write().await;
        if link.state != LinkState::Linked {
            info!(facility = %self.facility, gateway = %self.key.kind, "gateway linked");
        }
        link.state = LinkState::Linked;
        link.last_probe = Some(Utc::now());
        link.last_error = None;
        metrics::set_gateway_linked(&self.facility.domain_id, self.key.kind.as_str(), true);
    }

    pub(crate) async fn mark_unlinked(&self, reason: &str, probed: bool) {
        let mut link = self.link.write().await;
        if link.state != LinkState::Unlinked {
            warn!(
                facility = %self.facility,
                gateway = %self.key.kind,
                reason = %reason,
                "gateway unlinked"
            );
        }
        link.state = LinkState::Unlinked;
        if probed {
            link.last_probe = Some(Utc::now());
        }
        link.last_error = Some(reason.to_string());
        metrics::set_gateway_linked(&self.facility.domain_id, self.key.kind.as_str(), false);
    }

    async fn connect(&self, config: &GatewayConfig) -> EdiResult<Arc<dyn RemoteDirectory>> {
        let password = match &config.password_enc {
            Some(encrypted) => Some(self.cipher.decrypt(encrypted).map_err(|err| {
                EdiError::transport(format!("cannot decrypt credentials: {}", err))
            })?),
            None => None,
        };
        let dir = self
            .transport
            .connect(&self.facility, self.key.kind, config, password.as_deref())
            .await?;
        Ok(Arc::new(TimedDirectory::new(dir, config.timeout())))
    }

    /// 连接并确认需要的目录可列出；不修改链路状态
    pub async fn probe(&self) -> EdiResult<()> {
        let config = self.config().await;
        let dir = self.connect(&config).await?;
        if self.key.kind.imports() {
            dir.probe(&config.import_path).await?;
        }
        if config.has_export_path() {
            dir.create_dir_all(&config.export_path).await?;
            dir.probe(&config.export_path).await?;
        }
        debug!(facility = %self.facility, gateway = %self.key.kind, remote = %dir.describe(), "probe ok");
        Ok(())
    }

    /// 一轮入站同步；同一网关的同步互斥执行
    pub async fn sync(&self, importers: &ImporterSet, cancel: &CancellationToken) -> SyncOutcome {
        let _running = self.sync_lock.lock().await;
        let started = Instant::now();
        let mut outcome = SyncOutcome::new(
            self.key,
            self.facility.domain_id.clone(),
            SyncStatus::Completed,
        );

        let config = self.config().await;
        if !config.active {
            outcome.status = SyncStatus::Inactive;
            return outcome;
        }
        if !self.link_state().await.is_linked() {
            outcome.status = SyncStatus::Unlinked;
            return outcome;
        }

        let dir = match self.connect(&config).await {
            Ok(dir) => dir,
            Err(err) => {
                self.mark_unlinked(&err.to_string(), false).await;
                metrics::inc_gateway_failure("transport");
                outcome.status = SyncStatus::TransportFailed(err.to_string());
                outcome.duration_ms = started.elapsed().as_millis() as u64;
                return outcome;
            }
        };
        let channel = FileDropChannel::new(dir, self.facility.clone(), self.claims.clone());

        for folder in self.routing.drop_folders(&config) {
            if cancel.is_cancelled() {
                outcome.status = SyncStatus::Cancelled;
                break;
            }
            let Some(importer) = importers.get(folder.kind) else {
                debug!(facility = %self.facility, kind = %folder.kind, "no importer registered");
                continue;
            };
            match channel.process_folder(&folder, &importer, cancel).await {
                Ok(pass) => {
                    outcome.skipped += pass.skipped;
                    for file in pass.files {
                        outcome.record(file);
                    }
                    if pass.cancelled {
                        outcome.status = SyncStatus::Cancelled;
                        break;
                    }
                }
                Err(err) => {
                    let reason = err.to_string();
                    self.mark_unlinked(&reason, false).await;
                    metrics::inc_gateway_failure("transport");
                    outcome.status = SyncStatus::TransportFailed(reason);
                    break;
                }
            }
        }

        if outcome.status == SyncStatus::Completed {
            self.link.write().await.last_success = Some(Utc::now());
        }
        outcome.duration_ms = started.elapsed().as_millis() as u64;
        if outcome.archived + outcome.failed > 0 {
            info!(
                facility = %self.facility,
                gateway = %self.key.kind,
                archived = outcome.archived,
                failed = outcome.failed,
                skipped = outcome.skipped,
                "gateway sync finished"
            );
        }
        outcome
    }

    /// 上传出站文件；不检查链路状态
    pub async fn export(&self, prefix: &str, content: Bytes) -> EdiResult<ExportReceipt> {
        let config = self.config().await;
        if !config.has_export_path() {
            return Err(EdiError::validation(format!(
                "gateway {} has no export path",
                self.key
            )));
        }
        let dir = match self.connect(&config).await {
            Ok(dir) => dir,
            Err(err) => {
                if err.is_transport() {
                    self.mark_unlinked(&err.to_string(), false).await;
                }
                metrics::inc_export("failed");
                return Err(err);
            }
        };
        let channel = FileDropChannel::new(dir, self.facility.clone(), self.claims.clone());
        match channel.export(&config.export_path, prefix, content).await {
            Ok(receipt) => {
                metrics::inc_export("ok");
                Ok(receipt)
            }
            Err(err) => {
                if err.is_transport() {
                    self.mark_unlinked(&err.to_string(), false).await;
                }
                metrics::inc_export("failed");
                Err(err.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::{MemoryDirectory, MemoryTransport};
    use crate::test_support::{ImportMode, StubImporter, facility};
    use edi_common::credentials::PlaintextCipher;
    use edi_common::models::ImportKind;
    use std::time::Duration;

    fn orders_config() -> GatewayConfig {
        GatewayConfig {
            host: "edi.example.com".to_string(),
            username: "wms".to_string(),
            password_enc: Some("pw".to_string()),
            import_path: "in".to_string(),
            export_path: "out".to_string(),
            timeout_ms: 200,
            ..Default::default()
        }
    }

    fn gateway(transport: &MemoryTransport, config: GatewayConfig) -> Gateway {
        Gateway::new(
            facility(),
            GatewayKind::SftpOrders,
            config,
            Arc::new(transport.clone()),
            Arc::new(PlaintextCipher),
        )
    }

    fn importers(stub: &Arc<StubImporter>) -> ImporterSet {
        ImporterSet::new().with(ImportKind::Orders, stub.clone())
    }

    #[tokio::test]
    async fn test_unlinked_gateway_touches_nothing() {
        let transport = MemoryTransport::new(MemoryDirectory::new());
        transport.directory().put("in/a.csv", "a");
        let gw = gateway(&transport, orders_config());
        let stub = StubImporter::new(ImportMode::Succeed);

        let outcome = gw.sync(&importers(&stub), &CancellationToken::new()).await;
        assert_eq!(outcome.status, SyncStatus::Unlinked);
        assert_eq!(stub.calls(), 0);
        assert_eq!(transport.directory().file_names("in"), vec!["a.csv"]);
    }

    #[tokio::test]
    async fn test_linked_gateway_archives_files() {
        let transport = MemoryTransport::new(MemoryDirectory::new());
        transport.directory().put("in/a.csv", "a");
        let gw = gateway(&transport, orders_config());
        gw.mark_linked().await;
        let stub = StubImporter::new(ImportMode::Succeed);

        let outcome = gw.sync(&importers(&stub), &CancellationToken::new()).await;
        assert_eq!(outcome.status, SyncStatus::Completed);
        assert_eq!(outcome.archived, 1);
        assert!(gw.status(0).await.last_success.is_some());
    }

    #[tokio::test]
    async fn test_transport_error_unlinks_gateway() {
        let transport = MemoryTransport::new(MemoryDirectory::new());
        transport.directory().put("in/a.csv", "a");
        let gw = gateway(&transport, orders_config());
        gw.mark_linked().await;
        transport.directory().set_offline(true);
        let stub = StubImporter::new(ImportMode::Succeed);

        let outcome = gw.sync(&importers(&stub), &CancellationToken::new()).await;
        assert!(matches!(outcome.status, SyncStatus::TransportFailed(_)));
        assert_eq!(gw.link_state().await, LinkState::Unlinked);
        assert!(gw.status(0).await.last_error.is_some());

        transport.directory().set_offline(false);
        assert_eq!(transport.directory().file_names("in"), vec!["a.csv"]);
    }

    #[tokio::test]
    async fn test_slow_remote_times_out_and_unlinks() {
        let transport = MemoryTransport::new(MemoryDirectory::new());
        transport.directory().put("in/a.csv", "a");
        let gw = gateway(&transport, orders_config());
        gw.mark_linked().await;
        transport
            .directory()
            .set_delay(Some(Duration::from_millis(1000)));
        let stub = StubImporter::new(ImportMode::Succeed);

        let outcome = gw.sync(&importers(&stub), &CancellationToken::new()).await;
        match outcome.status {
            SyncStatus::TransportFailed(reason) => assert!(reason.contains("timed out")),
            other => panic!("unexpected status {:?}", other),
        }
        assert_eq!(gw.link_state().await, LinkState::Unlinked);
        assert_eq!(stub.calls(), 0);
    }

    #[tokio::test]
    async fn test_inactive_gateway_is_skipped() {
        let transport = MemoryTransport::new(MemoryDirectory::new());
        let gw = gateway(
            &transport,
            GatewayConfig {
                active: false,
                ..orders_config()
            },
        );
        gw.mark_linked().await;
        let stub = StubImporter::new(ImportMode::Succeed);
        let outcome = gw.sync(&importers(&stub), &CancellationToken::new()).await;
        assert_eq!(outcome.status, SyncStatus::Inactive);
    }

    #[tokio::test]
    async fn test_connectivity_check_requires_import_directory() {
        let transport = MemoryTransport::new(MemoryDirectory::new()).with_password("pw");
        let gw = gateway(&transport, orders_config());
        assert!(gw.probe().await.is_err());

        transport.directory().create_dir_all("in").await.unwrap();
        gw.probe().await.unwrap();

        gw.set_config(GatewayConfig {
            password_enc: Some("wrong".to_string()),
            ..orders_config()
        })
        .await;
        assert!(gw.probe().await.unwrap_err().is_transport());
    }

    #[tokio::test]
    async fn test_export_ignores_link_state() {
        let transport = MemoryTransport::new(MemoryDirectory::new());
        let gw = gateway(&transport, orders_config());
        assert_eq!(gw.link_state().await, LinkState::Unlinked);

        let receipt = gw
            .export("WI", Bytes::from_static(b"\"facilityId\"\n"))
            .await
            .unwrap();
        assert!(receipt.path.starts_with("out/WI_"));
        assert!(transport.directory().contents(&receipt.path).is_some());
    }

    #[tokio::test]
    async fn test_export_without_path_is_rejected() {
        let transport = MemoryTransport::new(MemoryDirectory::new());
        let gw = gateway(
            &transport,
            GatewayConfig {
                export_path: String::new(),
                ..orders_config()
            },
        );
        let err = gw.export("WI", Bytes::new()).await.unwrap_err();
        assert!(matches!(err, EdiError::Validation(_)));
    }
}
