//! 本地目录传输
//!
//! 用于本地暂存目录和已挂载的云同步文件夹。

use super::{RemoteDirectory, RemoteEntry, RemoteError, RemoteResult, Transport};
use async_trait::async_trait;
use bytes::Bytes;
use edi_common::models::{FacilityRef, GatewayConfig, GatewayKind};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncWriteExt;

pub struct LocalDirectory {
    base_path: PathBuf,
}

impl LocalDirectory {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    fn resolve_path(&self, path: &str) -> RemoteResult<PathBuf> {
        // Remove leading slash if present
        let relative = Path::new(path.strip_prefix('/').unwrap_or(path));
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        {
            return Err(RemoteError::Io {
                path: path.to_string(),
                source: std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    "path escapes directory root",
                ),
            });
        }
        Ok(self.base_path.join(relative))
    }
}

#[async_trait]
impl RemoteDirectory for LocalDirectory {
    fn describe(&self) -> String {
        format!("file://{}", self.base_path.display())
    }

    async fn probe(&self, dir: &str) -> RemoteResult<()> {
        let full = self.resolve_path(dir)?;
        let metadata = fs::metadata(&full)
            .await
            .map_err(|e| RemoteError::from_io(dir, e))?;
        if !metadata.is_dir() {
            return Err(RemoteError::NotFound(dir.to_string()));
        }
        let mut entries = fs::read_dir(&full)
            .await
            .map_err(|e| RemoteError::from_io(dir, e))?;
        entries
            .next_entry()
            .await
            .map_err(|e| RemoteError::from_io(dir, e))?;
        Ok(())
    }

    async fn list(&self, dir: &str) -> RemoteResult<Vec<RemoteEntry>> {
        let full = self.resolve_path(dir)?;
        let mut reader = fs::read_dir(&full)
            .await
            .map_err(|e| RemoteError::from_io(dir, e))?;

        let mut entries = Vec::new();
        while let Some(entry) = reader
            .next_entry()
            .await
            .map_err(|e| RemoteError::from_io(dir, e))?
        {
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            // 条目可能在列出后被其他进程移走
            let metadata = match entry.metadata().await {
                Ok(metadata) => metadata,
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => continue,
                Err(err) => return Err(RemoteError::from_io(dir, err)),
            };
            entries.push(RemoteEntry {
                name,
                is_file: metadata.is_file(),
                size: metadata.len(),
            });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    async fn exists(&self, path: &str) -> RemoteResult<bool> {
        let full = self.resolve_path(path)?;
        fs::try_exists(&full)
            .await
            .map_err(|e| RemoteError::from_io(path, e))
    }

    async fn rename(&self, from: &str, to: &str) -> RemoteResult<()> {
        let source = self.resolve_path(from)?;
        let target = self.resolve_path(to)?;
        // rename(2) 会覆盖目标，这里先拒绝已存在的目标；源的原子消失保证同一文件只能被认领一次
        if fs::try_exists(&target)
            .await
            .map_err(|e| RemoteError::from_io(to, e))?
        {
            return Err(RemoteError::AlreadyExists(to.to_string()));
        }
        fs::rename(&source, &target)
            .await
            .map_err(|e| RemoteError::from_io(from, e))
    }

    async fn read(&self, path: &str) -> RemoteResult<Bytes> {
        let full = self.resolve_path(path)?;
        let content = fs::read(&full)
            .await
            .map_err(|e| RemoteError::from_io(path, e))?;
        Ok(Bytes::from(content))
    }

    async fn write_new(&self, path: &str, content: Bytes) -> RemoteResult<u64> {
        let full = self.resolve_path(path)?;
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&full)
            .await
            .map_err(|e| RemoteError::from_io(path, e))?;
        file.write_all(&content)
            .await
            .map_err(|e| RemoteError::from_io(path, e))?;
        file.flush()
            .await
            .map_err(|e| RemoteError::from_io(path, e))?;
        Ok(content.len() as u64)
    }

    async fn create_dir_all(&self, dir: &str) -> RemoteResult<()> {
        let full = self.resolve_path(dir)?;
        fs::create_dir_all(&full)
            .await
            .map_err(|e| RemoteError::from_io(dir, e))
    }
}

/// 本地根目录下每个设施一个子目录；凭据不参与校验
#[derive(Debug, Clone)]
pub struct LocalTransport {
    root: PathBuf,
}

impl LocalTransport {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// 设施目录：业务编号可作为单个路径段时使用它，否则使用设施 ID
    pub fn facility_root(&self, facility: &FacilityRef) -> PathBuf {
        let domain = Path::new(&facility.domain_id);
        let mut components = domain.components();
        let segment = match (components.next(), components.next()) {
            (Some(Component::Normal(name)), None) => name.to_string_lossy().into_owned(),
            _ => facility.id.to_string(),
        };
        self.root.join(segment)
    }
}

#[async_trait]
impl Transport for LocalTransport {
    async fn connect(
        &self,
        facility: &FacilityRef,
        _kind: GatewayKind,
        _config: &GatewayConfig,
        _password: Option<&str>,
    ) -> RemoteResult<Arc<dyn RemoteDirectory>> {
        let is_dir = fs::metadata(&self.root)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false);
        if !is_dir {
            return Err(RemoteError::Unreachable(self.root.display().to_string()));
        }
        let base = self.facility_root(facility);
        fs::create_dir_all(&base)
            .await
            .map_err(|e| RemoteError::from_io(base.display().to_string(), e))?;
        Ok(Arc::new(LocalDirectory::new(base)))
    }
}
