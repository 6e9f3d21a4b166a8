//! 内存目录传输
//!
//! 用于测试和演练，支持模拟掉线、延迟和凭据校验。

use super::{RemoteDirectory, RemoteEntry, RemoteError, RemoteResult, Transport};
use async_trait::async_trait;
use bytes::Bytes;
use edi_common::models::{FacilityRef, GatewayConfig, GatewayKind};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

#[derive(Default)]
struct MemoryFs {
    files: BTreeMap<String, Bytes>,
    dirs: BTreeSet<String>,
}

impl MemoryFs {
    fn dir_exists(&self, dir: &str) -> bool {
        dir.is_empty() || self.dirs.contains(dir)
    }

    fn add_dirs(&mut self, dir: &str) {
        let mut current = String::new();
        for segment in dir.split('/').filter(|s| !s.is_empty()) {
            if !current.is_empty() {
                current.push('/');
            }
            current.push_str(segment);
            self.dirs.insert(current.clone());
        }
    }
}

#[derive(Default)]
struct Faults {
    offline: bool,
    delay: Option<Duration>,
}

/// 共享状态的内存目录树；克隆体看到同一份数据
#[derive(Clone, Default)]
pub struct MemoryDirectory {
    fs: Arc<Mutex<MemoryFs>>,
    faults: Arc<Mutex<Faults>>,
}

fn normalize(path: &str) -> RemoteResult<String> {
    let mut segments = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                return Err(RemoteError::Io {
                    path: path.to_string(),
                    source: std::io::Error::new(
                        std::io::ErrorKind::InvalidInput,
                        "path escapes directory root",
                    ),
                });
            }
            other => segments.push(other),
        }
    }
    Ok(segments.join("/"))
}

fn parent_of(path: &str) -> &str {
    path.rsplit_once('/').map(|(parent, _)| parent).unwrap_or("")
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    fn fs(&self) -> MutexGuard<'_, MemoryFs> {
        self.fs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn faults(&self) -> MutexGuard<'_, Faults> {
        self.faults.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 模拟主机不可达
    pub fn set_offline(&self, offline: bool) {
        self.faults().offline = offline;
    }

    pub fn is_offline(&self) -> bool {
        self.faults().offline
    }

    /// 每次调用前的人为延迟
    pub fn set_delay(&self, delay: Option<Duration>) {
        self.faults().delay = delay;
    }

    /// 直接写入文件（覆盖），自动创建父目录
    pub fn put(&self, path: &str, content: impl Into<Bytes>) {
        let Ok(path) = normalize(path) else {
            return;
        };
        let mut fs = self.fs();
        fs.add_dirs(parent_of(&path));
        fs.files.insert(path, content.into());
    }

    pub fn contents(&self, path: &str) -> Option<Bytes> {
        let path = normalize(path).ok()?;
        self.fs().files.get(&path).cloned()
    }

    /// 全部文件路径（排序）
    pub fn files(&self) -> Vec<String> {
        self.fs().files.keys().cloned().collect()
    }

    /// 某目录下直接包含的文件名
    pub fn file_names(&self, dir: &str) -> Vec<String> {
        let Ok(dir) = normalize(dir) else {
            return Vec::new();
        };
        self.fs()
            .files
            .keys()
            .filter(|path| parent_of(path) == dir)
            .map(|path| path.rsplit('/').next().unwrap_or(path).to_string())
            .collect()
    }

    async fn before_call(&self) -> RemoteResult<()> {
        let (offline, delay) = {
            let faults = self.faults();
            (faults.offline, faults.delay)
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if offline {
            return Err(RemoteError::Unreachable("memory://".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteDirectory for MemoryDirectory {
    fn describe(&self) -> String {
        "memory://".to_string()
    }

    async fn probe(&self, dir: &str) -> RemoteResult<()> {
        self.before_call().await?;
        let dir = normalize(dir)?;
        if self.fs().dir_exists(&dir) {
            Ok(())
        } else {
            Err(RemoteError::NotFound(dir))
        }
    }

    async fn list(&self, dir: &str) -> RemoteResult<Vec<RemoteEntry>> {
        self.before_call().await?;
        let dir = normalize(dir)?;
        let fs = self.fs();
        if !fs.dir_exists(&dir) {
            return Err(RemoteError::NotFound(dir));
        }

        let name_of = |path: &str| path.rsplit('/').next().unwrap_or(path).to_string();
        let mut entries: Vec<RemoteEntry> = fs
            .files
            .iter()
            .filter(|(path, _)| parent_of(path) == dir)
            .map(|(path, content)| RemoteEntry {
                name: name_of(path),
                is_file: true,
                size: content.len() as u64,
            })
            .collect();
        entries.extend(
            fs.dirs
                .iter()
                .filter(|path| parent_of(path) == dir)
                .map(|path| RemoteEntry {
                    name: name_of(path),
                    is_file: false,
                    size: 0,
                }),
        );
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    async fn exists(&self, path: &str) -> RemoteResult<bool> {
        self.before_call().await?;
        let path = normalize(path)?;
        let fs = self.fs();
        Ok(fs.files.contains_key(&path) || fs.dirs.contains(&path))
    }

    async fn rename(&self, from: &str, to: &str) -> RemoteResult<()> {
        self.before_call().await?;
        let from = normalize(from)?;
        let to = normalize(to)?;
        let mut fs = self.fs();
        if fs.files.contains_key(&to) || fs.dirs.contains(&to) {
            return Err(RemoteError::AlreadyExists(to));
        }
        if !fs.dir_exists(parent_of(&to)) {
            return Err(RemoteError::NotFound(to));
        }
        let content = fs.files.remove(&from).ok_or(RemoteError::NotFound(from))?;
        fs.files.insert(to, content);
        Ok(())
    }

    async fn read(&self, path: &str) -> RemoteResult<Bytes> {
        self.before_call().await?;
        let path = normalize(path)?;
        self.fs()
            .files
            .get(&path)
            .cloned()
            .ok_or(RemoteError::NotFound(path))
    }

    async fn write_new(&self, path: &str, content: Bytes) -> RemoteResult<u64> {
        self.before_call().await?;
        let path = normalize(path)?;
        let mut fs = self.fs();
        if fs.files.contains_key(&path) || fs.dirs.contains(&path) {
            return Err(RemoteError::AlreadyExists(path));
        }
        if !fs.dir_exists(parent_of(&path)) {
            return Err(RemoteError::NotFound(path));
        }
        let size = content.len() as u64;
        fs.files.insert(path, content);
        Ok(size)
    }

    async fn create_dir_all(&self, dir: &str) -> RemoteResult<()> {
        self.before_call().await?;
        let dir = normalize(dir)?;
        self.fs().add_dirs(&dir);
        Ok(())
    }
}

/// 模拟单台远程主机：所有连接看到同一个 [`MemoryDirectory`]，可要求固定密码
#[derive(Clone, Default)]
pub struct MemoryTransport {
    directory: MemoryDirectory,
    expected_password: Arc<Mutex<Option<String>>>,
}

impl MemoryTransport {
    pub fn new(directory: MemoryDirectory) -> Self {
        Self {
            directory,
            expected_password: Arc::new(Mutex::new(None)),
        }
    }

    pub fn with_password(self, password: impl Into<String>) -> Self {
        self.set_password(Some(password.into()));
        self
    }

    pub fn set_password(&self, password: Option<String>) {
        *self
            .expected_password
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = password;
    }

    pub fn directory(&self) -> &MemoryDirectory {
        &self.directory
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn connect(
        &self,
        _facility: &FacilityRef,
        _kind: GatewayKind,
        config: &GatewayConfig,
        password: Option<&str>,
    ) -> RemoteResult<Arc<dyn RemoteDirectory>> {
        if self.directory.is_offline() {
            return Err(RemoteError::Unreachable(config.url()));
        }
        let expected = self
            .expected_password
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(expected) = expected {
            if password != Some(expected.as_str()) {
                return Err(RemoteError::Auth(config.url()));
            }
        }
        Ok(Arc::new(self.directory.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_rename_semantics() {
        let dir = MemoryDirectory::new();
        dir.put("in/a.csv", "a");
        dir.put("in/b.csv", "b");

        assert!(matches!(
            dir.rename("in/a.csv", "in/b.csv").await,
            Err(RemoteError::AlreadyExists(_))
        ));
        assert!(matches!(
            dir.rename("in/a.csv", "in/processed/a.csv").await,
            Err(RemoteError::NotFound(_))
        ));
        dir.rename("in/a.csv", "in/a.csv.processing").await.unwrap();
        assert!(matches!(
            dir.rename("in/a.csv", "in/a.csv.processing2").await,
            Err(RemoteError::NotFound(_))
        ));
        assert_eq!(dir.file_names("in"), vec!["a.csv.processing", "b.csv"]);
    }

    #[tokio::test]
    async fn test_list_includes_directories() {
        let dir = MemoryDirectory::new();
        dir.put("/in/a.csv", "a");
        dir.create_dir_all("in/processed").await.unwrap();
        let entries = dir.list("in").await.unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries[0].is_file);
        assert_eq!(entries[1].name, "processed");
        assert!(!entries[1].is_file);
        assert!(matches!(dir.list("out").await, Err(RemoteError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_offline_directory_fails_every_call() {
        let dir = MemoryDirectory::new();
        dir.put("in/a.csv", "a");
        dir.set_offline(true);
        let err = dir.list("in").await.unwrap_err();
        assert!(err.is_transport());
        dir.set_offline(false);
        assert!(dir.list("in").await.is_ok());
    }

    #[tokio::test]
    async fn test_transport_checks_password() {
        let transport = MemoryTransport::new(MemoryDirectory::new()).with_password("right");
        let config = GatewayConfig::default();
        let facility = FacilityRef::new(uuid::Uuid::new_v4(), "F1");
        let err = transport
            .connect(&facility, GatewayKind::SftpOrders, &config, Some("wrong"))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, RemoteError::Auth(_)));
        assert!(
            transport
                .connect(&facility, GatewayKind::SftpOrders, &config, Some("right"))
                .await
                .is_ok()
        );
    }
}
