//! EDI 领域模型
//!
//! 网关配置、链路状态、导入结果、同步结果等在各 crate 之间共享的类型。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// 租户（仓库设施）引用
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FacilityRef {
    pub id: Uuid,
    pub domain_id: String,
}

impl FacilityRef {
    pub fn new(id: Uuid, domain_id: impl Into<String>) -> Self {
        Self {
            id,
            domain_id: domain_id.into(),
        }
    }
}

impl fmt::Display for FacilityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.domain_id)
    }
}

/// 网关类型，每个设施每种类型最多一个网关
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GatewayKind {
    /// SFTP 订单导入
    SftpOrders,
    /// SFTP 作业指令导出
    SftpWorkInstructions,
    /// 云同步文件夹（按子目录区分导入类型）
    CloudFolder,
}

impl GatewayKind {
    pub const ALL: [GatewayKind; 3] = [
        GatewayKind::SftpOrders,
        GatewayKind::SftpWorkInstructions,
        GatewayKind::CloudFolder,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SftpOrders => "sftp_orders",
            Self::SftpWorkInstructions => "sftp_work_instructions",
            Self::CloudFolder => "cloud_folder",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(raw.trim()))
    }

    /// 是否需要远程主机（云文件夹使用本地同步目录）
    pub fn is_remote(&self) -> bool {
        matches!(self, Self::SftpOrders | Self::SftpWorkInstructions)
    }

    /// 是否导入入站文件
    pub fn imports(&self) -> bool {
        matches!(self, Self::SftpOrders | Self::CloudFolder)
    }
}

impl fmt::Display for GatewayKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 网关标识：设施 + 类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GatewayKey {
    pub facility_id: Uuid,
    pub kind: GatewayKind,
}

impl GatewayKey {
    pub fn new(facility_id: Uuid, kind: GatewayKind) -> Self {
        Self { facility_id, kind }
    }
}

impl fmt::Display for GatewayKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.facility_id, self.kind)
    }
}

fn default_port() -> u16 {
    22
}

fn default_timeout_ms() -> u64 {
    5000
}

fn default_active() -> bool {
    true
}

/// 网关连接配置
///
/// 仅通过显式配置更新修改，独立于运行时链路状态持久化。
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub username: String,
    /// 加密后的密码，仅在建立连接时解密
    #[serde(default)]
    pub password_enc: Option<String>,
    #[serde(default)]
    pub import_path: String,
    #[serde(default)]
    pub archive_path: String,
    #[serde(default)]
    pub export_path: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_active")]
    pub active: bool,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: default_port(),
            username: String::new(),
            password_enc: None,
            import_path: String::new(),
            archive_path: String::new(),
            export_path: String::new(),
            timeout_ms: default_timeout_ms(),
            active: default_active(),
        }
    }
}

impl GatewayConfig {
    pub fn url(&self) -> String {
        format!("sftp://{}@{}:{}", self.username, self.host, self.port)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms.max(1))
    }

    pub fn has_credentials(&self) -> bool {
        !self.username.is_empty() && self.password_enc.is_some()
    }

    pub fn has_export_path(&self) -> bool {
        !self.export_path.trim().is_empty()
    }
}

// 手写 Debug，避免把加密密码写进日志
impl fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("url", &self.url())
            .field("import_path", &self.import_path)
            .field("archive_path", &self.archive_path)
            .field("export_path", &self.export_path)
            .field("timeout_ms", &self.timeout_ms)
            .field("active", &self.active)
            .finish()
    }
}

/// 网关链路状态，启动时探测得到，不持久化
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LinkState {
    Linked,
    Unlinked,
}

impl LinkState {
    pub fn is_linked(&self) -> bool {
        matches!(self, Self::Linked)
    }
}

/// 入站文件的导入类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportKind {
    Orders,
    OrderLocations,
    Inventory,
    LocationAliases,
    CrossBatches,
    Aisles,
    Workers,
}

impl ImportKind {
    pub const ALL: [ImportKind; 7] = [
        ImportKind::Orders,
        ImportKind::OrderLocations,
        ImportKind::Inventory,
        ImportKind::LocationAliases,
        ImportKind::CrossBatches,
        ImportKind::Aisles,
        ImportKind::Workers,
    ];

    /// 云文件夹网关中该类型对应的投递子目录
    pub fn folder(&self) -> &'static str {
        match self {
            Self::Orders => "orders",
            Self::OrderLocations => "slotting",
            Self::Inventory => "inventory",
            Self::LocationAliases => "locations",
            Self::CrossBatches => "batches",
            Self::Aisles => "site",
            Self::Workers => "workers",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Orders => "orders",
            Self::OrderLocations => "order_locations",
            Self::Inventory => "inventory",
            Self::LocationAliases => "location_aliases",
            Self::CrossBatches => "cross_batches",
            Self::Aisles => "aisles",
            Self::Workers => "workers",
        }
    }
}

impl fmt::Display for ImportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 单条业务校验违规
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    pub line: Option<u64>,
    pub message: String,
}

impl Violation {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            line: None,
            message: message.into(),
        }
    }

    pub fn at_line(line: u64, message: impl Into<String>) -> Self {
        Self {
            line: Some(line),
            message: message.into(),
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.line {
            Some(line) => write!(f, "line {}: {}", line, self.message),
            None => f.write_str(&self.message),
        }
    }
}

/// 导入器处理单个文件的结果；没有违规即视为成功
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchResult {
    pub records: u64,
    pub violations: Vec<Violation>,
}

impl BatchResult {
    pub fn success(records: u64) -> Self {
        Self {
            records,
            violations: Vec::new(),
        }
    }

    pub fn failed(violation: Violation) -> Self {
        Self {
            records: 0,
            violations: vec![violation],
        }
    }

    pub fn add_violation(&mut self, violation: Violation) {
        self.violations.push(violation);
    }

    pub fn is_successful(&self) -> bool {
        self.violations.is_empty()
    }
}

/// 出站文件上传回执
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportReceipt {
    pub path: String,
    pub size: u64,
    pub exported_at: DateTime<Utc>,
}

/// 已认领文件的最终去向
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileDisposition {
    Archived,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessedFile {
    pub name: String,
    pub final_path: String,
    pub disposition: FileDisposition,
}

/// 单个网关一次同步的状态
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum SyncStatus {
    Completed,
    Unlinked,
    Inactive,
    Cancelled,
    TransportFailed(String),
    Panicked(String),
}

impl SyncStatus {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Unlinked => "unlinked",
            Self::Inactive => "inactive",
            Self::Cancelled => "cancelled",
            Self::TransportFailed(_) => "transport_failed",
            Self::Panicked(_) => "panicked",
        }
    }
}

/// 单个网关一次同步周期的结果，由调度器汇总，不持久化
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncOutcome {
    pub gateway: GatewayKey,
    pub facility: String,
    pub status: SyncStatus,
    pub archived: u32,
    pub failed: u32,
    pub skipped: u32,
    pub exported: u32,
    pub files: Vec<ProcessedFile>,
    pub duration_ms: u64,
}

impl SyncOutcome {
    pub fn new(gateway: GatewayKey, facility: impl Into<String>, status: SyncStatus) -> Self {
        Self {
            gateway,
            facility: facility.into(),
            status,
            archived: 0,
            failed: 0,
            skipped: 0,
            exported: 0,
            files: Vec::new(),
            duration_ms: 0,
        }
    }

    pub fn record(&mut self, file: ProcessedFile) {
        match file.disposition {
            FileDisposition::Archived => self.archived += 1,
            FileDisposition::Failed => self.failed += 1,
        }
        self.files.push(file);
    }

    /// 网关是否正常工作（用于 "n/m EDI working" 统计）
    pub fn is_working(&self) -> bool {
        matches!(self.status, SyncStatus::Completed | SyncStatus::Cancelled)
    }

    pub fn archived_paths(&self) -> impl Iterator<Item = &str> {
        self.files
            .iter()
            .filter(|f| f.disposition == FileDisposition::Archived)
            .map(|f| f.final_path.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gateway_kind_parse() {
        assert_eq!(GatewayKind::parse("sftp_orders"), Some(GatewayKind::SftpOrders));
        assert_eq!(GatewayKind::parse(" CLOUD_FOLDER "), Some(GatewayKind::CloudFolder));
        assert_eq!(GatewayKind::parse("ftp"), None);
        assert!(GatewayKind::SftpOrders.imports());
        assert!(!GatewayKind::SftpWorkInstructions.imports());
        assert!(!GatewayKind::CloudFolder.is_remote());
    }

    #[test]
    fn test_gateway_config_url_and_debug_hide_password() {
        let config = GatewayConfig {
            host: "edi.example.com".to_string(),
            username: "wms".to_string(),
            password_enc: Some("secret".to_string()),
            ..Default::default()
        };
        assert_eq!(config.url(), "sftp://wms@edi.example.com:22");
        assert!(config.has_credentials());
        assert!(!format!("{:?}", config).contains("secret"));
    }

    #[test]
    fn test_gateway_config_serde_defaults() {
        let config: GatewayConfig = serde_json::from_str(r#"{"host":"h"}"#).unwrap();
        assert_eq!(config.port, 22);
        assert_eq!(config.timeout_ms, 5000);
        assert!(config.active);
        assert!(config.password_enc.is_none());
    }

    #[test]
    fn test_batch_result_success_depends_on_violations() {
        let mut result = BatchResult::success(3);
        assert!(result.is_successful());
        result.add_violation(Violation::at_line(2, "missing order id"));
        assert!(!result.is_successful());
        assert_eq!(result.violations[0].to_string(), "line 2: missing order id");
    }

    #[test]
    fn test_sync_outcome_counts() {
        let key = GatewayKey::new(Uuid::new_v4(), GatewayKind::SftpOrders);
        let mut outcome = SyncOutcome::new(key, "F1", SyncStatus::Completed);
        outcome.record(ProcessedFile {
            name: "a.csv".to_string(),
            final_path: "in/processed/a.csv".to_string(),
            disposition: FileDisposition::Archived,
        });
        outcome.record(ProcessedFile {
            name: "b.csv".to_string(),
            final_path: "in/b.csv.FAILED".to_string(),
            disposition: FileDisposition::Failed,
        });
        assert_eq!(outcome.archived, 1);
        assert_eq!(outcome.failed, 1);
        assert_eq!(outcome.archived_paths().collect::<Vec<_>>(), vec!["in/processed/a.csv"]);
        assert!(outcome.is_working());
    }

    #[test]
    fn test_link_state_serializes_upper_case() {
        assert_eq!(serde_json::to_string(&LinkState::Linked).unwrap(), "\"LINKED\"");
        assert_eq!(serde_json::to_string(&LinkState::Unlinked).unwrap(), "\"UNLINKED\"");
    }
}
