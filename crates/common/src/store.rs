//! 网关配置持久化
//!
//! 链路状态不在这里保存；启动时重新探测。

use crate::entities::edi_gateways;
use crate::error::{EdiError, Result};
use crate::models::{FacilityRef, GatewayConfig, GatewayKey, GatewayKind};
use async_trait::async_trait;
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// 一条网关配置记录
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayRecord {
    pub facility: FacilityRef,
    pub kind: GatewayKind,
    pub config: GatewayConfig,
}

impl GatewayRecord {
    pub fn key(&self) -> GatewayKey {
        GatewayKey::new(self.facility.id, self.kind)
    }
}

/// 网关配置存储接口
#[async_trait]
pub trait GatewayConfigStore: Send + Sync {
    async fn load_all(&self) -> Result<Vec<GatewayRecord>>;

    /// 按 (facility, kind) 插入或覆盖
    async fn save(&self, record: &GatewayRecord) -> Result<()>;
}

#[derive(Debug, Deserialize)]
struct SeedFile {
    #[serde(default)]
    facilities: Vec<SeedFacility>,
}

#[derive(Debug, Deserialize)]
struct SeedFacility {
    id: Uuid,
    domain_id: String,
    #[serde(default)]
    gateways: Vec<SeedGateway>,
}

#[derive(Debug, Deserialize)]
struct SeedGateway {
    kind: GatewayKind,
    #[serde(flatten)]
    config: GatewayConfig,
}

/// 内存存储，可从 JSON 种子文件加载
#[derive(Clone, Default)]
pub struct MemoryGatewayStore {
    inner: Arc<RwLock<BTreeMap<GatewayKey, GatewayRecord>>>,
}

impl MemoryGatewayStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: impl IntoIterator<Item = GatewayRecord>) -> Self {
        let map = records.into_iter().map(|r| (r.key(), r)).collect();
        Self {
            inner: Arc::new(RwLock::new(map)),
        }
    }

    pub fn from_seed_str(raw: &str) -> Result<Self> {
        let seed: SeedFile = serde_json::from_str(raw)?;
        let mut records = Vec::new();
        for facility in seed.facilities {
            let facility_ref = FacilityRef::new(facility.id, facility.domain_id);
            for gateway in facility.gateways {
                records.push(GatewayRecord {
                    facility: facility_ref.clone(),
                    kind: gateway.kind,
                    config: gateway.config,
                });
            }
        }
        Ok(Self::with_records(records))
    }

    pub fn from_seed_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_seed_str(&raw)
    }
}

#[async_trait]
impl GatewayConfigStore for MemoryGatewayStore {
    async fn load_all(&self) -> Result<Vec<GatewayRecord>> {
        Ok(self.inner.read().await.values().cloned().collect())
    }

    async fn save(&self, record: &GatewayRecord) -> Result<()> {
        self.inner.write().await.insert(record.key(), record.clone());
        Ok(())
    }
}

/// Postgres 存储
#[derive(Clone)]
pub struct SeaOrmGatewayStore {
    db: DatabaseConnection,
}

impl SeaOrmGatewayStore {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

fn record_from_model(model: edi_gateways::Model) -> Result<GatewayRecord> {
    let kind = GatewayKind::parse(&model.kind)
        .ok_or_else(|| EdiError::validation(format!("unknown gateway kind {}", model.kind)))?;
    let port = u16::try_from(model.port)
        .map_err(|_| EdiError::validation(format!("invalid port {}", model.port)))?;
    Ok(GatewayRecord {
        facility: FacilityRef::new(model.facility_id, model.facility_domain_id),
        kind,
        config: GatewayConfig {
            host: model.host,
            port,
            username: model.username,
            password_enc: model.password_enc,
            import_path: model.import_path,
            archive_path: model.archive_path,
            export_path: model.export_path,
            timeout_ms: model.timeout_ms.max(0) as u64,
            active: model.active,
        },
    })
}

#[async_trait]
impl GatewayConfigStore for SeaOrmGatewayStore {
    async fn load_all(&self) -> Result<Vec<GatewayRecord>> {
        let models = edi_gateways::Entity::find()
            .order_by_asc(edi_gateways::Column::CreatedAt)
            .all(&self.db)
            .await?;

        let mut records = Vec::with_capacity(models.len());
        for model in models {
            let id = model.id;
            match record_from_model(model) {
                Ok(record) => records.push(record),
                Err(err) => tracing::warn!(gateway_id = %id, "skipping gateway row: {}", err),
            }
        }
        Ok(records)
    }

    async fn save(&self, record: &GatewayRecord) -> Result<()> {
        let now = Utc::now().fixed_offset();
        let existing = edi_gateways::Entity::find()
            .filter(edi_gateways::Column::FacilityId.eq(record.facility.id))
            .filter(edi_gateways::Column::Kind.eq(record.kind.as_str()))
            .one(&self.db)
            .await?;

        let config = &record.config;
        let is_new = existing.is_none();
        let mut active: edi_gateways::ActiveModel = match existing {
            Some(model) => model.into(),
            None => edi_gateways::ActiveModel {
                id: Set(Uuid::new_v4()),
                facility_id: Set(record.facility.id),
                kind: Set(record.kind.as_str().to_string()),
                created_at: Set(now),
                ..Default::default()
            },
        };
        active.facility_domain_id = Set(record.facility.domain_id.clone());
        active.host = Set(config.host.clone());
        active.port = Set(i32::from(config.port));
        active.username = Set(config.username.clone());
        active.password_enc = Set(config.password_enc.clone());
        active.import_path = Set(config.import_path.clone());
        active.archive_path = Set(config.archive_path.clone());
        active.export_path = Set(config.export_path.clone());
        active.timeout_ms = Set(i64::try_from(config.timeout_ms).unwrap_or(i64::MAX));
        active.active = Set(config.active);
        active.updated_at = Set(now);
        if is_new {
            active.insert(&self.db).await?;
        } else {
            active.update(&self.db).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SEED: &str = r#"{
        "facilities": [
            {
                "id": "6f1c2a8e-3c1e-4a52-9d49-8c1a7b1f0c11",
                "domain_id": "F1",
                "gateways": [
                    {"kind": "sftp_orders", "host": "edi.example.com", "username": "wms",
                     "password_enc": "pw", "import_path": "/in"},
                    {"kind": "cloud_folder", "import_path": "dropbox/import", "active": false}
                ]
            }
        ]
    }"#;

    #[tokio::test]
    async fn test_seed_loads_records() {
        let store = MemoryGatewayStore::from_seed_str(SEED).unwrap();
        let records = store.load_all().await.unwrap();
        assert_eq!(records.len(), 2);
        let orders = records
            .iter()
            .find(|r| r.kind == GatewayKind::SftpOrders)
            .unwrap();
        assert_eq!(orders.facility.domain_id, "F1");
        assert_eq!(orders.config.port, 22);
        let cloud = records
            .iter()
            .find(|r| r.kind == GatewayKind::CloudFolder)
            .unwrap();
        assert!(!cloud.config.active);
    }

    #[tokio::test]
    async fn test_save_overwrites_same_key() {
        let store = MemoryGatewayStore::from_seed_str(SEED).unwrap();
        let mut record = store.load_all().await.unwrap().remove(0);
        record.config.host = "other.example.com".to_string();
        store.save(&record).await.unwrap();

        let records = store.load_all().await.unwrap();
        assert_eq!(records.len(), 2);
        assert!(records.iter().any(|r| r.config.host == "other.example.com"));
    }

    #[test]
    fn test_seed_file_io_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let err = MemoryGatewayStore::from_seed_file(&dir.path().join("missing.json"))
            .err()
            .unwrap();
        assert!(matches!(err, EdiError::Io(_)));
    }

    #[test]
    fn test_record_from_model_rejects_unknown_kind() {
        let model = edi_gateways::Model {
            id: Uuid::new_v4(),
            facility_id: Uuid::new_v4(),
            facility_domain_id: "F1".to_string(),
            kind: "ftp".to_string(),
            host: String::new(),
            port: 22,
            username: String::new(),
            password_enc: None,
            import_path: String::new(),
            archive_path: String::new(),
            export_path: String::new(),
            timeout_ms: 5000,
            active: true,
            created_at: Default::default(),
            updated_at: Default::default(),
        };
        assert!(matches!(record_from_model(model), Err(EdiError::Validation(_))));
    }
}
