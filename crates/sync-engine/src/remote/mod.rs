//! 远程目录抽象
//!
//! 每种传输（SFTP、云同步文件夹、本地目录）实现同一个 [`RemoteDirectory`]，
//! 文件状态机只依赖这个接口。路径一律使用 `/` 分隔的相对路径。

mod local;
mod memory;
mod timed;

pub use local::{LocalDirectory, LocalTransport};
pub use memory::{MemoryDirectory, MemoryTransport};
pub use timed::TimedDirectory;

use async_trait::async_trait;
use bytes::Bytes;
use edi_common::EdiError;
use edi_common::models::{FacilityRef, GatewayConfig, GatewayKind};
use std::io::ErrorKind;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// 远程目录操作错误
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("authentication rejected for {0}")]
    Auth(String),

    #[error("unreachable: {0}")]
    Unreachable(String),

    #[error("{op} timed out after {}ms", timeout.as_millis())]
    Timeout { op: String, timeout: Duration },

    #[error("io error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl RemoteError {
    pub fn from_io(path: impl Into<String>, err: std::io::Error) -> Self {
        let path = path.into();
        match err.kind() {
            ErrorKind::NotFound => Self::NotFound(path),
            ErrorKind::AlreadyExists => Self::AlreadyExists(path),
            _ => Self::Io { path, source: err },
        }
    }

    /// 链路级错误：网关应转为 UNLINKED
    pub fn is_transport(&self) -> bool {
        !matches!(self, Self::NotFound(_) | Self::AlreadyExists(_))
    }
}

impl From<RemoteError> for EdiError {
    fn from(err: RemoteError) -> Self {
        match err {
            RemoteError::NotFound(path) => EdiError::not_found(path),
            other => EdiError::transport(other.to_string()),
        }
    }
}

pub type RemoteResult<T> = std::result::Result<T, RemoteError>;

/// 目录条目
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    pub name: String,
    pub is_file: bool,
    pub size: u64,
}

/// 单个网关的远程目录树
#[async_trait]
pub trait RemoteDirectory: Send + Sync {
    /// 日志用的连接描述
    fn describe(&self) -> String;

    /// 目录存在且可列出
    async fn probe(&self, dir: &str) -> RemoteResult<()>;

    /// 按名称排序列出目录
    async fn list(&self, dir: &str) -> RemoteResult<Vec<RemoteEntry>>;

    async fn exists(&self, path: &str) -> RemoteResult<bool>;

    /// 不覆盖目标；源不存在时返回 `NotFound`，目标已存在时返回 `AlreadyExists`
    async fn rename(&self, from: &str, to: &str) -> RemoteResult<()>;

    async fn read(&self, path: &str) -> RemoteResult<Bytes>;

    /// 仅创建新文件，目标已存在时返回 `AlreadyExists`
    async fn write_new(&self, path: &str, content: Bytes) -> RemoteResult<u64>;

    async fn create_dir_all(&self, dir: &str) -> RemoteResult<()>;
}

/// 根据网关配置建立远程目录连接
///
/// 共享存储上的传输必须把目录树限定在 `facility` 之下；远程主机由各自的账号隔离。
#[async_trait]
pub trait Transport: Send + Sync {
    /// `password` 为解密后的明文，仅在连接时使用
    async fn connect(
        &self,
        facility: &FacilityRef,
        kind: GatewayKind,
        config: &GatewayConfig,
        password: Option<&str>,
    ) -> RemoteResult<Arc<dyn RemoteDirectory>>;
}

/// 拼接目录与文件名
pub fn join(dir: &str, name: &str) -> String {
    let dir = dir.trim_end_matches('/');
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", dir, name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join() {
        assert_eq!(join("in", "a.csv"), "in/a.csv");
        assert_eq!(join("/in/", "a.csv"), "/in/a.csv");
        assert_eq!(join("", "a.csv"), "a.csv");
    }

    #[test]
    fn test_io_error_classification() {
        let err = RemoteError::from_io("x", std::io::Error::from(ErrorKind::NotFound));
        assert!(matches!(err, RemoteError::NotFound(_)));
        assert!(!err.is_transport());

        let err = RemoteError::from_io("x", std::io::Error::from(ErrorKind::PermissionDenied));
        assert!(err.is_transport());

        let err = RemoteError::Timeout {
            op: "list in".to_string(),
            timeout: Duration::from_millis(50),
        };
        assert!(err.is_transport());
        assert_eq!(err.to_string(), "list in timed out after 50ms");
        assert!(EdiError::from(err).is_transport());
    }
}
