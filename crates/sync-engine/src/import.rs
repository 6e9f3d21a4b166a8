//! 导入器接口与投递目录路由

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use edi_common::models::{BatchResult, FacilityRef, GatewayConfig, GatewayKind, ImportKind};
use regex::Regex;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

use crate::naming::ARCHIVE_DIR;
use crate::remote::join;

/// 交给导入器的单个已认领文件
#[derive(Debug, Clone)]
pub struct ImportRequest {
    pub facility: FacilityRef,
    pub kind: ImportKind,
    pub file_name: String,
    pub content: Bytes,
    pub processed_at: DateTime<Utc>,
}

impl ImportRequest {
    pub fn reader(&self) -> impl std::io::Read + '_ {
        self.content.as_ref()
    }
}

/// 业务导入器；返回错误或不成功的 [`BatchResult`] 都会让文件进入 FAILED
#[async_trait]
pub trait Importer: Send + Sync {
    async fn import(&self, request: ImportRequest) -> anyhow::Result<BatchResult>;
}

/// 按导入类型注册的导入器集合
#[derive(Clone, Default)]
pub struct ImporterSet {
    importers: HashMap<ImportKind, Arc<dyn Importer>>,
}

impl ImporterSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, kind: ImportKind, importer: Arc<dyn Importer>) -> Self {
        self.importers.insert(kind, importer);
        self
    }

    pub fn get(&self, kind: ImportKind) -> Option<Arc<dyn Importer>> {
        self.importers.get(&kind).cloned()
    }

    pub fn len(&self) -> usize {
        self.importers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.importers.is_empty()
    }
}

impl fmt::Debug for ImporterSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut kinds: Vec<_> = self.importers.keys().collect();
        kinds.sort();
        f.debug_struct("ImporterSet").field("kinds", &kinds).finish()
    }
}

fn csv_pattern() -> &'static Result<Regex, regex::Error> {
    static PATTERN: OnceLock<Result<Regex, regex::Error>> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?i)\.csv$"))
}

/// 一个被监视的投递目录
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DropFolder {
    pub kind: ImportKind,
    pub dir: String,
    pub archive_dir: String,
    pub csv_only: bool,
}

impl DropFolder {
    pub fn accepts(&self, name: &str) -> bool {
        if !self.csv_only {
            return true;
        }
        matches!(csv_pattern(), Ok(re) if re.is_match(name))
    }
}

/// 网关类型到投递目录的映射
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportRouting {
    /// 只导出，不监视任何目录
    None,
    /// 导入目录下的所有文件都按同一类型导入
    Flat(ImportKind),
    /// 导入目录下每个类型一个子目录，仅接受 `.csv`
    ByFolder,
}

impl ImportRouting {
    pub fn for_kind(kind: GatewayKind) -> Self {
        match kind {
            GatewayKind::SftpOrders => Self::Flat(ImportKind::Orders),
            GatewayKind::SftpWorkInstructions => Self::None,
            GatewayKind::CloudFolder => Self::ByFolder,
        }
    }

    pub fn drop_folders(&self, config: &GatewayConfig) -> Vec<DropFolder> {
        let import_path = config.import_path.trim();
        match self {
            Self::None => Vec::new(),
            Self::Flat(kind) => {
                let archive_dir = if config.archive_path.trim().is_empty() {
                    join(import_path, ARCHIVE_DIR)
                } else {
                    config.archive_path.trim().to_string()
                };
                vec![DropFolder {
                    kind: *kind,
                    dir: import_path.to_string(),
                    archive_dir,
                    csv_only: false,
                }]
            }
            Self::ByFolder => ImportKind::ALL
                .into_iter()
                .map(|kind| {
                    let dir = join(import_path, kind.folder());
                    DropFolder {
                        kind,
                        archive_dir: join(&dir, ARCHIVE_DIR),
                        dir,
                        csv_only: true,
                    }
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[test]
    fn test_flat_routing_uses_archive_path() {
        let config = GatewayConfig {
            import_path: "/in".to_string(),
            archive_path: "/archive".to_string(),
            ..Default::default()
        };
        let folders = ImportRouting::for_kind(GatewayKind::SftpOrders).drop_folders(&config);
        assert_eq!(folders.len(), 1);
        assert_eq!(folders[0].kind, ImportKind::Orders);
        assert_eq!(folders[0].dir, "/in");
        assert_eq!(folders[0].archive_dir, "/archive");
        assert!(folders[0].accepts("20260301a.DAT"));
    }

    #[test]
    fn test_flat_routing_default_archive() {
        let config = GatewayConfig {
            import_path: "in".to_string(),
            ..Default::default()
        };
        let folders = ImportRouting::Flat(ImportKind::Orders).drop_folders(&config);
        assert_eq!(folders[0].archive_dir, "in/processed");
    }

    #[test]
    fn test_by_folder_routing() {
        let config = GatewayConfig {
            import_path: "import".to_string(),
            ..Default::default()
        };
        let folders = ImportRouting::ByFolder.drop_folders(&config);
        assert_eq!(folders.len(), ImportKind::ALL.len());
        let slotting = folders
            .iter()
            .find(|f| f.kind == ImportKind::OrderLocations)
            .unwrap();
        assert_eq!(slotting.dir, "import/slotting");
        assert_eq!(slotting.archive_dir, "import/slotting/processed");
        assert!(slotting.accepts("slots.CSV"));
        assert!(!slotting.accepts("slots.txt"));
    }

    #[test]
    fn test_export_only_routing_watches_nothing() {
        let config = GatewayConfig::default();
        assert!(
            ImportRouting::for_kind(GatewayKind::SftpWorkInstructions)
                .drop_folders(&config)
                .is_empty()
        );
    }

    #[test]
    fn test_request_reader() {
        let request = ImportRequest {
            facility: FacilityRef::new(uuid::Uuid::new_v4(), "F1"),
            kind: ImportKind::Orders,
            file_name: "a.csv".to_string(),
            content: Bytes::from_static(b"order data 1"),
            processed_at: Utc::now(),
        };
        let mut text = String::new();
        request.reader().read_to_string(&mut text).unwrap();
        assert_eq!(text, "order data 1");
    }
}
