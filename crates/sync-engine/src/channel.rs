//! 文件投递通道
//!
//! 在一个网关的远程目录上驱动文件生命周期：
//! `DISCOVERED -> CLAIMED(.processing) -> ARCHIVED(processed/) | FAILED(.FAILED)`。
//! 跨进程唯一的串行化手段是把裸文件原子重命名为 `.processing`；
//! 进程内通过 [`ActiveClaims`] 保证同一个 `.processing` 只有一个认领者。

use crate::import::{DropFolder, ImportRequest, Importer};
use crate::metrics;
use crate::naming::{self, EntryName};
use crate::remote::{RemoteDirectory, RemoteError, RemoteResult, join};
use bytes::Bytes;
use chrono::Utc;
use edi_common::models::{BatchResult, ExportReceipt, FacilityRef, FileDisposition, ProcessedFile};
use futures::FutureExt;
use std::any::Any;
use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const MAX_NAME_ATTEMPTS: u32 = 1000;

/// 本进程内正在处理的 `.processing` 路径集合
#[derive(Clone, Default)]
pub struct ActiveClaims {
    inner: Arc<Mutex<HashSet<String>>>,
}

impl ActiveClaims {
    pub fn new() -> Self {
        Self::default()
    }

    fn set(&self) -> MutexGuard<'_, HashSet<String>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 登记认领；已被他人持有时返回 None
    pub fn try_claim(&self, path: &str) -> Option<ClaimGuard> {
        if self.set().insert(path.to_string()) {
            Some(ClaimGuard {
                claims: self.clone(),
                path: path.to_string(),
            })
        } else {
            None
        }
    }

    pub fn is_claimed(&self, path: &str) -> bool {
        self.set().contains(path)
    }

    #[cfg(test)]
    fn is_empty(&self) -> bool {
        self.set().is_empty()
    }
}

/// 释放时自动注销认领
pub struct ClaimGuard {
    claims: ActiveClaims,
    path: String,
}

impl Drop for ClaimGuard {
    fn drop(&mut self) {
        self.claims.set().remove(&self.path);
    }
}

/// 发现阶段得到的待处理文件
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub base: String,
    /// 来自崩溃遗留的 `.processing`
    pub orphan: bool,
}

/// 单个投递目录一次处理的结果
#[derive(Debug, Default)]
pub struct FolderPass {
    pub files: Vec<ProcessedFile>,
    pub skipped: u32,
    pub cancelled: bool,
}

#[derive(Debug)]
pub enum FileOutcome {
    Processed(ProcessedFile),
    Skipped,
}

enum Verdict {
    Archive { records: u64 },
    Fail(String),
}

pub struct FileDropChannel {
    dir: Arc<dyn RemoteDirectory>,
    facility: FacilityRef,
    claims: ActiveClaims,
}

impl FileDropChannel {
    pub fn new(dir: Arc<dyn RemoteDirectory>, facility: FacilityRef, claims: ActiveClaims) -> Self {
        Self {
            dir,
            facility,
            claims,
        }
    }

    /// 列出可处理的文件：裸文件与无人认领的 `.processing`，排除 `.FAILED` 和子目录
    pub async fn discover(&self, folder: &DropFolder) -> RemoteResult<Vec<Candidate>> {
        let entries = match self.dir.list(&folder.dir).await {
            Ok(entries) => entries,
            Err(RemoteError::NotFound(_)) => {
                debug!(facility = %self.facility, dir = %folder.dir, "drop folder missing");
                return Ok(Vec::new());
            }
            Err(err) => return Err(err),
        };

        let pending_orphans: HashSet<&str> = entries
            .iter()
            .filter(|e| e.is_file)
            .filter_map(|e| match naming::classify(&e.name) {
                EntryName::Processing(base) => Some(base),
                _ => None,
            })
            .collect();

        let mut candidates = Vec::new();
        for entry in entries.iter().filter(|e| e.is_file) {
            match naming::classify(&entry.name) {
                EntryName::Failed => {}
                EntryName::Processing(base) => {
                    let path = join(&folder.dir, &entry.name);
                    if self.claims.is_claimed(&path) || !folder.accepts(base) {
                        continue;
                    }
                    candidates.push(Candidate {
                        base: base.to_string(),
                        orphan: true,
                    });
                }
                EntryName::Bare(name) => {
                    if pending_orphans.contains(name) {
                        debug!(
                            facility = %self.facility,
                            file = %name,
                            "orphaned claim with the same name pending, leaving file for a later pass"
                        );
                        continue;
                    }
                    if !folder.accepts(name) {
                        debug!(facility = %self.facility, file = %name, "no import route for file");
                        continue;
                    }
                    candidates.push(Candidate {
                        base: name.to_string(),
                        orphan: false,
                    });
                }
            }
        }
        Ok(candidates)
    }

    /// 逐个处理投递目录中的文件；传输错误中止本次处理
    pub async fn process_folder(
        &self,
        folder: &DropFolder,
        importer: &Arc<dyn Importer>,
        cancel: &CancellationToken,
    ) -> RemoteResult<FolderPass> {
        let mut pass = FolderPass::default();
        for candidate in self.discover(folder).await? {
            if cancel.is_cancelled() {
                pass.cancelled = true;
                break;
            }
            match self.process_file(folder, importer, &candidate).await? {
                FileOutcome::Processed(file) => pass.files.push(file),
                FileOutcome::Skipped => {
                    pass.skipped += 1;
                    metrics::inc_file(folder.kind.as_str(), "skipped");
                }
            }
        }
        Ok(pass)
    }

    async fn claim(
        &self,
        folder: &DropFolder,
        candidate: &Candidate,
    ) -> RemoteResult<Option<(ClaimGuard, String)>> {
        let processing = join(&folder.dir, &naming::processing_name(&candidate.base));
        let Some(guard) = self.claims.try_claim(&processing) else {
            return Ok(None);
        };

        if candidate.orphan {
            if !self.dir.exists(&processing).await? {
                return Ok(None);
            }
            info!(
                facility = %self.facility,
                file = %candidate.base,
                "recovering orphaned claim"
            );
        } else {
            let bare = join(&folder.dir, &candidate.base);
            match self.dir.rename(&bare, &processing).await {
                Ok(()) => {}
                Err(RemoteError::NotFound(_)) | Err(RemoteError::AlreadyExists(_)) => {
                    debug!(facility = %self.facility, file = %candidate.base, "claim conflict, skipping");
                    return Ok(None);
                }
                Err(err) => return Err(err),
            }
        }
        Ok(Some((guard, processing)))
    }

    pub async fn process_file(
        &self,
        folder: &DropFolder,
        importer: &Arc<dyn Importer>,
        candidate: &Candidate,
    ) -> RemoteResult<FileOutcome> {
        let Some((_claim, processing)) = self.claim(folder, candidate).await? else {
            return Ok(FileOutcome::Skipped);
        };

        let content = match self.dir.read(&processing).await {
            Ok(content) => content,
            Err(RemoteError::NotFound(_)) => return Ok(FileOutcome::Skipped),
            Err(err) => return Err(err),
        };

        let now = Utc::now();
        let (moved, disposition) = match self.run_importer(folder, importer, candidate, content).await
        {
            Verdict::Archive { records } => {
                let moved = self
                    .move_unique(&processing, &folder.archive_dir, true, |attempt| {
                        naming::archive_candidate(&candidate.base, now, attempt)
                    })
                    .await;
                if let Ok(path) = &moved {
                    info!(
                        facility = %self.facility,
                        kind = %folder.kind,
                        file = %candidate.base,
                        records,
                        archived = %path,
                        "file imported"
                    );
                }
                (moved, FileDisposition::Archived)
            }
            Verdict::Fail(reason) => {
                let moved = self
                    .move_unique(&processing, &folder.dir, false, |attempt| {
                        naming::failed_candidate(&candidate.base, now, attempt)
                    })
                    .await;
                warn!(
                    facility = %self.facility,
                    kind = %folder.kind,
                    file = %candidate.base,
                    reason = %reason,
                    "file import failed, marking FAILED"
                );
                (moved, FileDisposition::Failed)
            }
        };

        match moved {
            Ok(final_path) => {
                let result = match disposition {
                    FileDisposition::Archived => "archived",
                    FileDisposition::Failed => "failed",
                };
                metrics::inc_file(folder.kind.as_str(), result);
                Ok(FileOutcome::Processed(ProcessedFile {
                    name: candidate.base.clone(),
                    final_path,
                    disposition,
                }))
            }
            Err(err) if err.is_transport() => Err(err),
            Err(err) => {
                // 文件保持 .processing，下一轮作为孤儿重试
                error!(
                    facility = %self.facility,
                    file = %candidate.base,
                    "could not settle claimed file: {}",
                    err
                );
                Ok(FileOutcome::Skipped)
            }
        }
    }

    async fn run_importer(
        &self,
        folder: &DropFolder,
        importer: &Arc<dyn Importer>,
        candidate: &Candidate,
        content: Bytes,
    ) -> Verdict {
        let request = ImportRequest {
            facility: self.facility.clone(),
            kind: folder.kind,
            file_name: candidate.base.clone(),
            content,
            processed_at: Utc::now(),
        };
        match AssertUnwindSafe(importer.import(request)).catch_unwind().await {
            Ok(Ok(batch)) if batch.is_successful() => Verdict::Archive {
                records: batch.records,
            },
            Ok(Ok(batch)) => Verdict::Fail(describe_violations(&batch)),
            Ok(Err(err)) => Verdict::Fail(format!("{:#}", err)),
            Err(panic) => Verdict::Fail(format!("importer panicked: {}", panic_message(&*panic))),
        }
    }

    async fn move_unique(
        &self,
        from: &str,
        dir: &str,
        create_dir: bool,
        candidate: impl Fn(u32) -> String,
    ) -> RemoteResult<String> {
        if create_dir {
            self.dir.create_dir_all(dir).await?;
        }
        for attempt in 0..MAX_NAME_ATTEMPTS {
            let target = join(dir, &candidate(attempt));
            if self.dir.exists(&target).await? {
                continue;
            }
            match self.dir.rename(from, &target).await {
                Ok(()) => return Ok(target),
                Err(RemoteError::AlreadyExists(_)) => continue,
                Err(err) => return Err(err),
            }
        }
        Err(RemoteError::AlreadyExists(join(
            dir,
            &candidate(MAX_NAME_ATTEMPTS),
        )))
    }

    /// 上传出站文件，名称保证不与目标目录已有内容冲突
    pub async fn export(
        &self,
        export_dir: &str,
        prefix: &str,
        content: Bytes,
    ) -> RemoteResult<ExportReceipt> {
        self.dir.create_dir_all(export_dir).await?;
        let now = Utc::now();
        for attempt in 0..MAX_NAME_ATTEMPTS {
            let path = join(export_dir, &naming::export_candidate(prefix, now, attempt));
            if self.dir.exists(&path).await? {
                continue;
            }
            match self.dir.write_new(&path, content.clone()).await {
                Ok(size) => {
                    info!(facility = %self.facility, path = %path, size, "file exported");
                    return Ok(ExportReceipt {
                        path,
                        size,
                        exported_at: now,
                    });
                }
                Err(RemoteError::AlreadyExists(_)) => continue,
                Err(err) => return Err(err),
            }
        }
        Err(RemoteError::AlreadyExists(join(
            export_dir,
            &naming::export_candidate(prefix, now, MAX_NAME_ATTEMPTS),
        )))
    }
}

fn describe_violations(batch: &BatchResult) -> String {
    let mut parts: Vec<String> = batch.violations.iter().take(3).map(|v| v.to_string()).collect();
    if batch.violations.len() > 3 {
        parts.push(format!("+{} more", batch.violations.len() - 3));
    }
    parts.join("; ")
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}
