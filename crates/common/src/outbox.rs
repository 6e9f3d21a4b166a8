//! 待发送导出的持久化
//!
//! 导出请求先落库再进入内存队列，上传成功或被远端拒绝后删除；
//! 启动时按入队时间恢复未发送的记录。

use crate::entities::edi_pending_exports;
use crate::error::{EdiError, Result};
use crate::models::{GatewayKey, GatewayKind};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::{ActiveModelTrait, DatabaseConnection, EntityTrait, QueryOrder, Set};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// 一条尚未上传的出站文件
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingExport {
    pub id: Uuid,
    pub gateway: GatewayKey,
    pub prefix: String,
    pub content: Vec<u8>,
    pub queued_at: DateTime<Utc>,
}

#[async_trait]
pub trait ExportOutbox: Send + Sync {
    /// 按入队时间升序
    async fn load_pending(&self) -> Result<Vec<PendingExport>>;

    async fn insert(&self, export: &PendingExport) -> Result<()>;

    /// 记录不存在时视为成功
    async fn remove(&self, id: Uuid) -> Result<()>;
}

#[derive(Clone, Default)]
pub struct MemoryExportOutbox {
    inner: Arc<RwLock<BTreeMap<Uuid, PendingExport>>>,
}

impl MemoryExportOutbox {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ExportOutbox for MemoryExportOutbox {
    async fn load_pending(&self) -> Result<Vec<PendingExport>> {
        let mut pending: Vec<PendingExport> = self.inner.read().await.values().cloned().collect();
        pending.sort_by_key(|export| export.queued_at);
        Ok(pending)
    }

    async fn insert(&self, export: &PendingExport) -> Result<()> {
        self.inner.write().await.insert(export.id, export.clone());
        Ok(())
    }

    async fn remove(&self, id: Uuid) -> Result<()> {
        self.inner.write().await.remove(&id);
        Ok(())
    }
}

#[derive(Clone)]
pub struct SeaOrmExportOutbox {
    db: DatabaseConnection,
}

impl SeaOrmExportOutbox {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

fn export_from_model(model: edi_pending_exports::Model) -> Result<PendingExport> {
    let kind = GatewayKind::parse(&model.kind)
        .ok_or_else(|| EdiError::validation(format!("unknown gateway kind {}", model.kind)))?;
    Ok(PendingExport {
        id: model.id,
        gateway: GatewayKey::new(model.facility_id, kind),
        prefix: model.prefix,
        content: model.content,
        queued_at: model.queued_at.with_timezone(&Utc),
    })
}

#[async_trait]
impl ExportOutbox for SeaOrmExportOutbox {
    async fn load_pending(&self) -> Result<Vec<PendingExport>> {
        let models = edi_pending_exports::Entity::find()
            .order_by_asc(edi_pending_exports::Column::QueuedAt)
            .all(&self.db)
            .await?;

        let mut pending = Vec::with_capacity(models.len());
        for model in models {
            let id = model.id;
            match export_from_model(model) {
                Ok(export) => pending.push(export),
                Err(err) => tracing::warn!(export_id = %id, "skipping pending export row: {}", err),
            }
        }
        Ok(pending)
    }

    async fn insert(&self, export: &PendingExport) -> Result<()> {
        edi_pending_exports::ActiveModel {
            id: Set(export.id),
            facility_id: Set(export.gateway.facility_id),
            kind: Set(export.gateway.kind.as_str().to_string()),
            prefix: Set(export.prefix.clone()),
            content: Set(export.content.clone()),
            queued_at: Set(export.queued_at.fixed_offset()),
        }
        .insert(&self.db)
        .await?;
        Ok(())
    }

    async fn remove(&self, id: Uuid) -> Result<()> {
        edi_pending_exports::Entity::delete_by_id(id)
            .exec(&self.db)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn pending(prefix: &str, queued_at: DateTime<Utc>) -> PendingExport {
        PendingExport {
            id: Uuid::new_v4(),
            gateway: GatewayKey::new(Uuid::from_u128(1), GatewayKind::SftpWorkInstructions),
            prefix: prefix.to_string(),
            content: b"\"facilityId\"\n".to_vec(),
            queued_at,
        }
    }

    #[tokio::test]
    async fn test_memory_outbox_orders_by_queue_time() {
        let outbox = MemoryExportOutbox::new();
        let now = Utc::now();
        let late = pending("late", now);
        let early = pending("early", now - Duration::seconds(30));
        outbox.insert(&late).await.unwrap();
        outbox.insert(&early).await.unwrap();

        let loaded = outbox.load_pending().await.unwrap();
        let prefixes: Vec<&str> = loaded.iter().map(|p| p.prefix.as_str()).collect();
        assert_eq!(prefixes, vec!["early", "late"]);

        outbox.remove(early.id).await.unwrap();
        outbox.remove(early.id).await.unwrap();
        assert_eq!(outbox.load_pending().await.unwrap().len(), 1);
    }

    #[test]
    fn test_export_from_model_rejects_unknown_kind() {
        let model = edi_pending_exports::Model {
            id: Uuid::new_v4(),
            facility_id: Uuid::new_v4(),
            kind: "ftp".to_string(),
            prefix: "WI".to_string(),
            content: Vec::new(),
            queued_at: Default::default(),
        };
        assert!(matches!(export_from_model(model), Err(EdiError::Validation(_))));
    }
}
