//! EDI 网关同步引擎
//!
//! 文件投递通道的生命周期状态机、网关链路状态、链路校验与调度器。

pub mod channel;
pub mod export;
pub mod gateway;
pub mod import;
pub mod link;
pub mod metrics;
pub mod naming;
pub mod registry;
pub mod remote;
pub mod scheduler;

#[cfg(test)]
mod test_support;

pub use channel::{ActiveClaims, FileDropChannel};
pub use export::{
    OutboundMessage, OutboundQueue, WORK_INSTRUCTION_HEADER, WORK_INSTRUCTION_PREFIX,
    WorkInstructionRecord, write_work_instructions,
};
pub use gateway::Gateway;
pub use import::{ImportRequest, Importer, ImporterSet};
pub use link::LinkValidator;
pub use registry::FacilityRegistry;
pub use remote::{LocalTransport, MemoryDirectory, MemoryTransport, RemoteDirectory, Transport};
pub use scheduler::SyncScheduler;
