use async_trait::async_trait;
use chrono::Utc;
use edi_common::config::SchedulerSettings;
use edi_common::credentials::PlaintextCipher;
use edi_common::outbox::MemoryExportOutbox;
use edi_common::models::{
    BatchResult, FacilityRef, GatewayConfig, GatewayKind, ImportKind, LinkState, SyncStatus,
    Violation,
};
use edi_common::state::StatusStore;
use edi_common::status::CycleTrigger;
use edi_common::store::{GatewayConfigStore, MemoryGatewayStore};
use edi_sync::{
    FacilityRegistry, ImportRequest, Importer, ImporterSet, LinkValidator, LocalTransport,
    MemoryDirectory, MemoryTransport, SyncScheduler, Transport,
};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use uuid::Uuid;

/// 记录收到的文件内容；`reject` 打开时返回带违规的结果
#[derive(Default)]
struct RecordingImporter {
    seen: Mutex<Vec<(ImportKind, String, String)>>,
    facilities: Mutex<Vec<(String, String)>>,
    reject: AtomicBool,
}

impl RecordingImporter {
    fn seen(&self) -> Vec<(ImportKind, String, String)> {
        self.seen.lock().unwrap().clone()
    }

    /// (设施编号, 文件名)，按设施排序
    fn seen_by_facility(&self) -> Vec<(String, String)> {
        let mut seen = self.facilities.lock().unwrap().clone();
        seen.sort();
        seen
    }
}

#[async_trait]
impl Importer for RecordingImporter {
    async fn import(&self, request: ImportRequest) -> anyhow::Result<BatchResult> {
        self.seen.lock().unwrap().push((
            request.kind,
            request.file_name.clone(),
            String::from_utf8_lossy(&request.content).into_owned(),
        ));
        self.facilities
            .lock()
            .unwrap()
            .push((request.facility.domain_id.clone(), request.file_name.clone()));
        if self.reject.load(Ordering::SeqCst) {
            return Ok(BatchResult::failed(Violation::at_line(1, "unknown item")));
        }
        Ok(BatchResult::success(1))
    }
}

struct TestFleet {
    scheduler: SyncScheduler,
    validator: Arc<LinkValidator>,
    importer: Arc<RecordingImporter>,
    store: MemoryGatewayStore,
}

impl TestFleet {
    fn new(transport: Arc<dyn Transport>) -> Self {
        let importer = Arc::new(RecordingImporter::default());
        let mut importers = ImporterSet::new();
        for kind in ImportKind::ALL {
            importers = importers.with(kind, importer.clone());
        }
        let store = MemoryGatewayStore::new();
        let validator = Arc::new(LinkValidator::new(
            Arc::new(store.clone()),
            Duration::from_secs(3600),
        ));
        let registry = FacilityRegistry::new(transport, Arc::new(PlaintextCipher));
        let scheduler = SyncScheduler::new(
            registry,
            validator.clone(),
            importers,
            SchedulerSettings {
                interval: Duration::from_secs(3600),
                initial_delay: Duration::from_secs(3600),
                ..Default::default()
            },
            StatusStore::default(),
            Arc::new(MemoryExportOutbox::new()),
        );
        Self {
            scheduler,
            validator,
            importer,
            store,
        }
    }

    async fn configure(&self, kind: GatewayKind, config: GatewayConfig) -> LinkState {
        self.configure_for(FacilityRef::new(Uuid::from_u128(7), FACILITY), kind, config)
            .await
    }

    async fn configure_for(
        &self,
        facility: FacilityRef,
        kind: GatewayKind,
        config: GatewayConfig,
    ) -> LinkState {
        let gateway = self
            .scheduler
            .registry()
            .upsert(facility, kind, config.clone())
            .await;
        self.validator.apply_config(&gateway, config).await.unwrap()
    }
}

const FACILITY: &str = "DC-7";

fn sftp_orders(password: &str) -> GatewayConfig {
    GatewayConfig {
        host: "edi.example.com".to_string(),
        username: "wms".to_string(),
        password_enc: Some(password.to_string()),
        import_path: "in".to_string(),
        ..Default::default()
    }
}

fn write(root: &Path, relative: &str, content: &str) -> PathBuf {
    let path = root.join(relative);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, content).unwrap();
    path
}

fn names(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

#[tokio::test]
async fn order_file_is_imported_and_archived() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().join(FACILITY);
    let name = format!("{}a.DAT", Utc::now().format("%Y%m%d%H%M%S"));
    write(&root, &format!("in/{}", name), "order data 1");

    let fleet = TestFleet::new(Arc::new(LocalTransport::new(tmp.path())));
    assert_eq!(
        fleet.configure(GatewayKind::SftpOrders, sftp_orders("pw")).await,
        LinkState::Linked
    );

    let report = fleet.scheduler.run_cycle(CycleTrigger::Signal).await;
    assert_eq!(report.outcomes.len(), 1);
    let outcome = &report.outcomes[0];
    assert_eq!(outcome.status, SyncStatus::Completed);

    let archived: Vec<&str> = outcome.archived_paths().collect();
    assert_eq!(archived.len(), 1);
    assert!(!archived[0].is_empty());
    let archived_file = root.join(archived[0]);
    assert!(archived_file.starts_with(root.join("in/processed")));
    assert_eq!(
        std::fs::read_to_string(archived_file).unwrap(),
        "order data 1"
    );
    assert!(!root.join("in").join(&name).exists());
    assert_eq!(
        fleet.importer.seen(),
        vec![(ImportKind::Orders, name, "order data 1".to_string())]
    );
}

#[tokio::test]
async fn orphaned_claim_is_recovered() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().join(FACILITY);
    write(&root, "in/a.csv.processing", "left behind by a crash");

    let fleet = TestFleet::new(Arc::new(LocalTransport::new(tmp.path())));
    fleet.configure(GatewayKind::SftpOrders, sftp_orders("pw")).await;

    let report = fleet.scheduler.run_cycle(CycleTrigger::Timer).await;
    assert_eq!(report.archived(), 1);
    assert_eq!(names(&root.join("in/processed")), vec!["a.csv"]);
    assert_eq!(fleet.importer.seen()[0].1, "a.csv");
}

#[tokio::test]
async fn failed_file_is_never_retried() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().join(FACILITY);
    write(&root, "in/bad.csv", "sku,qty\nX,");

    let fleet = TestFleet::new(Arc::new(LocalTransport::new(tmp.path())));
    fleet.importer.reject.store(true, Ordering::SeqCst);
    fleet.configure(GatewayKind::SftpOrders, sftp_orders("pw")).await;

    for _ in 0..3 {
        fleet.scheduler.run_cycle(CycleTrigger::Timer).await;
    }
    assert_eq!(fleet.importer.seen().len(), 1);
    assert_eq!(names(&root.join("in")), vec!["bad.csv.FAILED"]);
}

#[tokio::test]
async fn invalid_credentials_block_import_until_relinked() {
    let directory = MemoryDirectory::new();
    directory.put("in/a.csv", "a");
    let transport = MemoryTransport::new(directory.clone()).with_password("secret");
    let fleet = TestFleet::new(Arc::new(transport));

    assert_eq!(
        fleet.configure(GatewayKind::SftpOrders, sftp_orders("guess")).await,
        LinkState::Unlinked
    );
    // 凭据错误的配置也会被保存
    assert_eq!(fleet.store.load_all().await.unwrap().len(), 1);

    for _ in 0..2 {
        let report = fleet.scheduler.run_cycle(CycleTrigger::Timer).await;
        assert_eq!(report.outcomes[0].status, SyncStatus::Unlinked);
    }
    assert!(fleet.importer.seen().is_empty());
    assert_eq!(directory.file_names("in"), vec!["a.csv"]);

    assert_eq!(
        fleet.configure(GatewayKind::SftpOrders, sftp_orders("secret")).await,
        LinkState::Linked
    );
    let report = fleet.scheduler.run_cycle(CycleTrigger::Timer).await;
    assert_eq!(report.archived(), 1);
    assert_eq!(fleet.importer.seen().len(), 1);
    assert_eq!(directory.file_names("in/processed"), vec!["a.csv"]);
}

#[tokio::test]
async fn cloud_folder_routes_by_subdirectory() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().join(FACILITY);
    write(&root, "import/orders/o.csv", "order");
    write(&root, "import/workers/w.csv", "worker");
    write(&root, "import/orders/readme.txt", "not a batch");

    let fleet = TestFleet::new(Arc::new(LocalTransport::new(tmp.path())));
    let config = GatewayConfig {
        import_path: "import".to_string(),
        export_path: "export".to_string(),
        ..Default::default()
    };
    assert_eq!(
        fleet.configure(GatewayKind::CloudFolder, config).await,
        LinkState::Linked
    );

    let report = fleet.scheduler.run_cycle(CycleTrigger::Timer).await;
    assert_eq!(report.archived(), 2);
    let mut kinds: Vec<ImportKind> = fleet.importer.seen().iter().map(|s| s.0).collect();
    kinds.sort();
    assert_eq!(kinds, vec![ImportKind::Orders, ImportKind::Workers]);
    assert!(root.join("import/orders/readme.txt").exists());
    assert!(root.join("import/workers/processed/w.csv").exists());
}

#[tokio::test]
async fn facilities_sharing_a_root_only_see_their_own_files() {
    let tmp = TempDir::new().unwrap();
    write(&tmp.path().join("ACME"), "in/acme.csv", "acme order");
    write(&tmp.path().join("OTHER"), "in/other.csv", "other order");

    let fleet = TestFleet::new(Arc::new(LocalTransport::new(tmp.path())));
    for (id, domain_id) in [(1, "ACME"), (2, "OTHER")] {
        let facility = FacilityRef::new(Uuid::from_u128(id), domain_id);
        assert_eq!(
            fleet
                .configure_for(facility, GatewayKind::SftpOrders, sftp_orders("pw"))
                .await,
            LinkState::Linked
        );
    }

    let report = fleet.scheduler.run_cycle(CycleTrigger::Timer).await;
    assert_eq!(report.outcomes.len(), 2);
    assert_eq!(report.archived(), 2);
    assert_eq!(
        fleet.importer.seen_by_facility(),
        vec![
            ("ACME".to_string(), "acme.csv".to_string()),
            ("OTHER".to_string(), "other.csv".to_string()),
        ]
    );
    assert_eq!(
        names(&tmp.path().join("ACME/in/processed")),
        vec!["acme.csv"]
    );
    assert_eq!(
        names(&tmp.path().join("OTHER/in/processed")),
        vec!["other.csv"]
    );
}
