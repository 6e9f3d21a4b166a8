//! 同步状态快照
//!
//! 调度器每个周期结束后发布，供运维接口读取。

use crate::models::{GatewayKey, LinkState, SyncOutcome, SyncStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 调度器生命周期状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SchedulerState {
    #[default]
    Stopped,
    Starting,
    Running,
    Stopping,
}

/// 触发同步周期的来源
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleTrigger {
    Timer,
    Signal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleReport {
    pub sequence: u64,
    pub trigger: CycleTrigger,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcomes: Vec<SyncOutcome>,
}

impl CycleReport {
    pub fn archived(&self) -> u32 {
        self.outcomes.iter().map(|o| o.archived).sum()
    }

    pub fn failed(&self) -> u32 {
        self.outcomes.iter().map(|o| o.failed).sum()
    }

    pub fn outcome(&self, key: &GatewayKey) -> Option<&SyncOutcome> {
        self.outcomes.iter().find(|o| &o.gateway == key)
    }

    /// "n/m EDI working"；全部正常时返回 None
    pub fn error_status(&self) -> Option<String> {
        let considered: Vec<&SyncOutcome> = self
            .outcomes
            .iter()
            .filter(|o| o.status != SyncStatus::Inactive)
            .collect();
        let working = considered.iter().filter(|o| o.is_working()).count();
        if working == considered.len() {
            None
        } else {
            Some(format!("{}/{} EDI working", working, considered.len()))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayStatus {
    pub key: GatewayKey,
    pub facility: String,
    pub url: String,
    pub active: bool,
    pub link_state: LinkState,
    pub last_success: Option<DateTime<Utc>>,
    pub last_probe: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub pending_exports: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FleetStatus {
    pub scheduler: SchedulerState,
    pub gateways: Vec<GatewayStatus>,
    pub last_cycle: Option<CycleReport>,
    pub error_status: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
}
