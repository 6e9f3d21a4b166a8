pub mod config;
pub mod credentials;
pub mod entities;
pub mod error;
pub mod models;
pub mod outbox;
pub mod state;
pub mod status;
pub mod store;
pub mod validation;

// ============ 重新导出常用类型 ============

// 错误处理
pub use error::{EdiError, Result as EdiResult};

// 配置相关
pub use config::{AppConfig, SchedulerSettings};

// 状态管理
pub use state::StatusStore;
pub use status::{CycleReport, CycleTrigger, FleetStatus, GatewayStatus, SchedulerState};

// 验证相关
pub use validation::{ValidationContext, ValidationError};

// 持久化
pub use outbox::{ExportOutbox, MemoryExportOutbox, PendingExport, SeaOrmExportOutbox};
pub use store::{GatewayConfigStore, GatewayRecord, MemoryGatewayStore, SeaOrmGatewayStore};

// 兼容性别名（Result 是更常用的名称）
pub use error::Result;
