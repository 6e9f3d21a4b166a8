use crate::gateway::Gateway;
use crate::remote::Transport;
use edi_common::credentials::CredentialCipher;
use edi_common::models::{FacilityRef, GatewayConfig, GatewayKey, GatewayKind};
use edi_common::store::GatewayConfigStore;
use edi_common::EdiResult;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

/// 设施 -> 网关映射；遍历顺序按 (设施, 网关类型) 固定
#[derive(Clone)]
pub struct FacilityRegistry {
    gateways: Arc<RwLock<BTreeMap<GatewayKey, Arc<Gateway>>>>,
    transport: Arc<dyn Transport>,
    cipher: Arc<dyn CredentialCipher>,
}

impl FacilityRegistry {
    pub fn new(transport: Arc<dyn Transport>, cipher: Arc<dyn CredentialCipher>) -> Self {
        Self {
            gateways: Arc::new(RwLock::new(BTreeMap::new())),
            transport,
            cipher,
        }
    }

    /// 新增网关；已存在时只更新其配置（不改变链路状态）
    pub async fn upsert(
        &self,
        facility: FacilityRef,
        kind: GatewayKind,
        config: GatewayConfig,
    ) -> Arc<Gateway> {
        let key = GatewayKey::new(facility.id, kind);
        let mut gateways = self.gateways.write().await;
        if let Some(existing) = gateways.get(&key) {
            existing.set_config(config).await;
            return existing.clone();
        }
        let gateway = Arc::new(Gateway::new(
            facility,
            kind,
            config,
            self.transport.clone(),
            self.cipher.clone(),
        ));
        gateways.insert(key, gateway.clone());
        gateway
    }

    /// 为设施补齐每种类型的默认网关（未启用）
    pub async fn provision_defaults(&self, facility: FacilityRef) -> Vec<Arc<Gateway>> {
        let mut provisioned = Vec::new();
        for kind in GatewayKind::ALL {
            let key = GatewayKey::new(facility.id, kind);
            if self.get(&key).await.is_some() {
                continue;
            }
            let gateway = self
                .upsert(facility.clone(), kind, default_config(kind))
                .await;
            provisioned.push(gateway);
        }
        if !provisioned.is_empty() {
            info!(facility = %facility, count = provisioned.len(), "default gateways provisioned");
        }
        provisioned
    }

    /// 从配置存储加载全部网关
    pub async fn load(&self, store: &dyn GatewayConfigStore) -> EdiResult<usize> {
        let records = store.load_all().await?;
        let count = records.len();
        for record in records {
            self.upsert(record.facility, record.kind, record.config)
                .await;
        }
        info!(count, "gateways loaded");
        Ok(count)
    }

    pub async fn get(&self, key: &GatewayKey) -> Option<Arc<Gateway>> {
        self.gateways.read().await.get(key).cloned()
    }

    pub async fn gateways(&self) -> Vec<Arc<Gateway>> {
        self.gateways.read().await.values().cloned().collect()
    }

    /// 按设施分组
    pub async fn facilities(&self) -> Vec<(FacilityRef, Vec<Arc<Gateway>>)> {
        let mut grouped: Vec<(FacilityRef, Vec<Arc<Gateway>>)> = Vec::new();
        for gateway in self.gateways().await {
            match grouped.last_mut() {
                Some((facility, list)) if facility.id == gateway.facility().id => {
                    list.push(gateway)
                }
                _ => grouped.push((gateway.facility().clone(), vec![gateway])),
            }
        }
        grouped
    }
}

fn default_config(kind: GatewayKind) -> GatewayConfig {
    let mut config = GatewayConfig {
        active: false,
        ..Default::default()
    };
    match kind {
        GatewayKind::SftpOrders => {
            config.import_path = "/in".to_string();
        }
        GatewayKind::SftpWorkInstructions => {
            config.export_path = "/out".to_string();
        }
        GatewayKind::CloudFolder => {
            config.import_path = "import".to_string();
            config.export_path = "export".to_string();
        }
    }
    config
}
