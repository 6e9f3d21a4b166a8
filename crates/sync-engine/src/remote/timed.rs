use super::{RemoteDirectory, RemoteEntry, RemoteError, RemoteResult};
use async_trait::async_trait;
use bytes::Bytes;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

/// 为每次远程调用加超时；超时按传输错误处理
pub struct TimedDirectory {
    inner: Arc<dyn RemoteDirectory>,
    timeout: Duration,
}

impl TimedDirectory {
    pub fn new(inner: Arc<dyn RemoteDirectory>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    async fn guard<T>(
        &self,
        op: impl FnOnce() -> String,
        fut: impl Future<Output = RemoteResult<T>>,
    ) -> RemoteResult<T> {
        match timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(RemoteError::Timeout {
                op: op(),
                timeout: self.timeout,
            }),
        }
    }
}

#[async_trait]
impl RemoteDirectory for TimedDirectory {
    fn describe(&self) -> String {
        self.inner.describe()
    }

    async fn probe(&self, dir: &str) -> RemoteResult<()> {
        self.guard(|| format!("probe {}", dir), self.inner.probe(dir))
            .await
    }

    async fn list(&self, dir: &str) -> RemoteResult<Vec<RemoteEntry>> {
        self.guard(|| format!("list {}", dir), self.inner.list(dir))
            .await
    }

    async fn exists(&self, path: &str) -> RemoteResult<bool> {
        self.guard(|| format!("stat {}", path), self.inner.exists(path))
            .await
    }

    async fn rename(&self, from: &str, to: &str) -> RemoteResult<()> {
        self.guard(
            || format!("rename {} -> {}", from, to),
            self.inner.rename(from, to),
        )
        .await
    }

    async fn read(&self, path: &str) -> RemoteResult<Bytes> {
        self.guard(|| format!("read {}", path), self.inner.read(path))
            .await
    }

    async fn write_new(&self, path: &str, content: Bytes) -> RemoteResult<u64> {
        self.guard(
            || format!("write {}", path),
            self.inner.write_new(path, content),
        )
        .await
    }

    async fn create_dir_all(&self, dir: &str) -> RemoteResult<()> {
        self.guard(|| format!("mkdir {}", dir), self.inner.create_dir_all(dir))
            .await
    }
}
