//! 链路校验
//!
//! 配置创建或更新时探测连通性与凭据；调度器遇到 UNLINKED 网关时按间隔重新探测。

use crate::gateway::Gateway;
use crate::registry::FacilityRegistry;
use chrono::Utc;
use edi_common::models::{GatewayConfig, LinkState};
use edi_common::store::{GatewayConfigStore, GatewayRecord};
use edi_common::validation::{ValidationContext, describe_all};
use edi_common::EdiResult;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

pub struct LinkValidator {
    store: Arc<dyn GatewayConfigStore>,
    relink_interval: Duration,
}

impl LinkValidator {
    pub fn new(store: Arc<dyn GatewayConfigStore>, relink_interval: Duration) -> Self {
        Self {
            store,
            relink_interval,
        }
    }

    /// 保存配置（即使校验失败也按原样保存），然后探测链路
    pub async fn apply_config(&self, gateway: &Gateway, config: GatewayConfig) -> EdiResult<LinkState> {
        let errors = ValidationContext::new(gateway.kind()).validate_config(&config);
        gateway.set_config(config).await;
        self.persist(gateway).await?;

        if !errors.is_empty() {
            gateway.mark_unlinked(&describe_all(&errors), true).await;
            return Ok(LinkState::Unlinked);
        }
        Ok(self.probe(gateway).await)
    }

    /// 保存网关当前配置，不探测
    pub async fn persist(&self, gateway: &Gateway) -> EdiResult<()> {
        self.store
            .save(&GatewayRecord {
                facility: gateway.facility().clone(),
                kind: gateway.kind(),
                config: gateway.config().await,
            })
            .await?;
        info!(
            facility = %gateway.facility(),
            gateway = %gateway.kind(),
            "gateway configuration saved"
        );
        Ok(())
    }

    /// 立即探测并更新链路状态
    pub async fn probe(&self, gateway: &Gateway) -> LinkState {
        let config = gateway.config().await;
        let errors = ValidationContext::new(gateway.kind()).validate_config(&config);
        if !errors.is_empty() {
            gateway.mark_unlinked(&describe_all(&errors), true).await;
            return LinkState::Unlinked;
        }
        match gateway.probe().await {
            Ok(()) => {
                gateway.mark_linked().await;
                LinkState::Linked
            }
            Err(err) => {
                gateway.mark_unlinked(&err.to_string(), true).await;
                LinkState::Unlinked
            }
        }
    }

    /// UNLINKED 网关距上次探测超过间隔时重新探测
    pub async fn revalidate_if_due(&self, gateway: &Gateway) -> LinkState {
        let state = gateway.link_state().await;
        if state.is_linked() {
            return state;
        }
        let due = match gateway.last_probe().await {
            None => true,
            Some(at) => (Utc::now() - at)
                .to_std()
                .map(|elapsed| elapsed >= self.relink_interval)
                .unwrap_or(true),
        };
        if !due {
            return state;
        }
        self.probe(gateway).await
    }

    /// 启动时探测所有启用的网关
    pub async fn probe_all(&self, registry: &FacilityRegistry) -> usize {
        let mut linked = 0;
        for gateway in registry.gateways().await {
            if !gateway.is_active().await {
                continue;
            }
            if self.probe(&gateway).await.is_linked() {
                linked += 1;
            }
        }
        linked
    }
}
