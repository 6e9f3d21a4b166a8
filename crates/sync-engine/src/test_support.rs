use crate::import::{ImportRequest, Importer};
use async_trait::async_trait;
use edi_common::models::{BatchResult, FacilityRef, Violation};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportMode {
    Succeed,
    Violations,
    Error,
    Panic,
}

pub struct StubImporter {
    mode: ImportMode,
    delay: Option<Duration>,
    calls: AtomicUsize,
    contents: Mutex<Vec<String>>,
}

impl StubImporter {
    pub fn new(mode: ImportMode) -> Arc<Self> {
        Arc::new(Self {
            mode,
            delay: None,
            calls: AtomicUsize::new(0),
            contents: Mutex::new(Vec::new()),
        })
    }

    pub fn delayed(mode: ImportMode, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            mode,
            delay: Some(delay),
            calls: AtomicUsize::new(0),
            contents: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn contents(&self) -> Vec<String> {
        self.contents.lock().unwrap().clone()
    }
}

#[async_trait]
impl Importer for StubImporter {
    async fn import(&self, request: ImportRequest) -> anyhow::Result<BatchResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.contents
            .lock()
            .unwrap()
            .push(String::from_utf8_lossy(&request.content).into_owned());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match self.mode {
            ImportMode::Succeed => Ok(BatchResult::success(1)),
            ImportMode::Violations => Ok(BatchResult::failed(Violation::at_line(1, "bad row"))),
            ImportMode::Error => Err(anyhow::anyhow!("unreadable file")),
            ImportMode::Panic => panic!("importer exploded"),
        }
    }
}

pub fn facility() -> FacilityRef {
    FacilityRef::new(Uuid::from_u128(1), "F1")
}
