//! 出站导出
//!
//! 作业指令 CSV 格式，以及每个网关一个的有界待发送队列（满时淘汰最旧消息）。
//! 队列里的每条消息在出站存储中都有一条同 ID 的记录。

use bytes::Bytes;
use chrono::{DateTime, Utc};
use edi_common::models::GatewayKey;
use edi_common::outbox::PendingExport;
use edi_common::{EdiError, EdiResult};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::warn;
use uuid::Uuid;

pub const WORK_INSTRUCTION_PREFIX: &str = "WI";

pub const WORK_INSTRUCTION_HEADER: [&str; 19] = [
    "facilityId",
    "workInstructionId",
    "type",
    "status",
    "orderGroupId",
    "orderId",
    "containerId",
    "itemId",
    "uom",
    "lotId",
    "locationId",
    "pickerId",
    "planQuantity",
    "actualQuantity",
    "cheId",
    "assigned",
    "started",
    "completed",
    "version-1.0",
];

/// 一条作业指令导出记录；缺失字段导出为空字符串
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkInstructionRecord {
    pub facility_id: String,
    pub work_instruction_id: String,
    #[serde(rename = "type", default)]
    pub instruction_type: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub order_group_id: Option<String>,
    #[serde(default)]
    pub order_id: Option<String>,
    #[serde(default)]
    pub container_id: Option<String>,
    #[serde(default)]
    pub item_id: Option<String>,
    #[serde(default)]
    pub uom: Option<String>,
    #[serde(default)]
    pub lot_id: Option<String>,
    #[serde(default)]
    pub location_id: Option<String>,
    #[serde(default)]
    pub picker_id: Option<String>,
    #[serde(default)]
    pub plan_quantity: Option<i64>,
    #[serde(default)]
    pub actual_quantity: Option<i64>,
    #[serde(default)]
    pub che_id: Option<String>,
    #[serde(default)]
    pub assigned: Option<DateTime<Utc>>,
    #[serde(default)]
    pub started: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed: Option<DateTime<Utc>>,
}

fn text(value: &Option<String>) -> String {
    value.clone().unwrap_or_default()
}

fn number(value: Option<i64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

fn timestamp(value: Option<DateTime<Utc>>) -> String {
    value
        .map(|v| v.format("%Y-%m-%dT%H:%M:%SZ").to_string())
        .unwrap_or_default()
}

impl WorkInstructionRecord {
    fn fields(&self) -> [String; 19] {
        [
            self.facility_id.clone(),
            self.work_instruction_id.clone(),
            text(&self.instruction_type),
            text(&self.status),
            text(&self.order_group_id),
            text(&self.order_id),
            text(&self.container_id),
            text(&self.item_id),
            text(&self.uom),
            text(&self.lot_id),
            text(&self.location_id),
            text(&self.picker_id),
            number(self.plan_quantity),
            number(self.actual_quantity),
            text(&self.che_id),
            timestamp(self.assigned),
            timestamp(self.started),
            timestamp(self.completed),
            // 版本列在数据行中始终为空
            String::new(),
        ]
    }
}

/// 生成作业指令 CSV：固定表头，所有字段加引号
pub fn write_work_instructions(records: &[WorkInstructionRecord]) -> EdiResult<Bytes> {
    let mut writer = csv::WriterBuilder::new()
        .quote_style(csv::QuoteStyle::Always)
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(Vec::new());
    writer
        .write_record(WORK_INSTRUCTION_HEADER)
        .map_err(|e| EdiError::export(e.to_string()))?;
    for record in records {
        writer
            .write_record(record.fields())
            .map_err(|e| EdiError::export(e.to_string()))?;
    }
    let buffer = writer
        .into_inner()
        .map_err(|e| EdiError::export(e.to_string()))?;
    Ok(Bytes::from(buffer))
}

/// 待上传的出站文件
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub id: Uuid,
    pub prefix: String,
    pub content: Bytes,
    pub queued_at: DateTime<Utc>,
}

impl OutboundMessage {
    pub fn new(prefix: impl Into<String>, content: Bytes) -> Self {
        Self {
            id: Uuid::new_v4(),
            prefix: prefix.into(),
            content,
            queued_at: Utc::now(),
        }
    }

    pub fn to_pending(&self, gateway: GatewayKey) -> PendingExport {
        PendingExport {
            id: self.id,
            gateway,
            prefix: self.prefix.clone(),
            content: self.content.to_vec(),
            queued_at: self.queued_at,
        }
    }
}

impl From<PendingExport> for OutboundMessage {
    fn from(pending: PendingExport) -> Self {
        Self {
            id: pending.id,
            prefix: pending.prefix,
            content: Bytes::from(pending.content),
            queued_at: pending.queued_at,
        }
    }
}

pub struct OutboundQueue {
    capacity: usize,
    queues: Mutex<HashMap<GatewayKey, VecDeque<OutboundMessage>>>,
}

impl OutboundQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            queues: Mutex::new(HashMap::new()),
        }
    }

    fn queues(&self) -> MutexGuard<'_, HashMap<GatewayKey, VecDeque<OutboundMessage>>> {
        self.queues.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 入队；队列已满时淘汰并返回最旧的消息
    pub fn push(&self, key: GatewayKey, message: OutboundMessage) -> Option<OutboundMessage> {
        let mut queues = self.queues();
        let queue = queues.entry(key).or_default();
        let evicted = if queue.len() >= self.capacity {
            queue.pop_front()
        } else {
            None
        };
        queue.push_back(message);
        if let Some(old) = &evicted {
            warn!(gateway = %key, queued_at = %old.queued_at, "outbound queue full, evicting oldest export");
        }
        evicted
    }

    pub fn pop(&self, key: &GatewayKey) -> Option<OutboundMessage> {
        self.queues().get_mut(key).and_then(VecDeque::pop_front)
    }

    /// 发送失败的消息放回队首；队列已被新消息填满时丢弃并返回它
    pub fn requeue(&self, key: GatewayKey, message: OutboundMessage) -> Option<OutboundMessage> {
        let mut queues = self.queues();
        let queue = queues.entry(key).or_default();
        if queue.len() >= self.capacity {
            warn!(gateway = %key, "outbound queue full, dropping failed export");
            return Some(message);
        }
        queue.push_front(message);
        None
    }

    pub fn contains(&self, key: &GatewayKey, id: Uuid) -> bool {
        self.queues()
            .get(key)
            .is_some_and(|queue| queue.iter().any(|message| message.id == id))
    }

    /// 有待发送消息的网关
    pub fn keys(&self) -> Vec<GatewayKey> {
        self.queues()
            .iter()
            .filter(|(_, queue)| !queue.is_empty())
            .map(|(key, _)| *key)
            .collect()
    }

    pub fn len(&self, key: &GatewayKey) -> usize {
        self.queues().get(key).map(VecDeque::len).unwrap_or(0)
    }
}
