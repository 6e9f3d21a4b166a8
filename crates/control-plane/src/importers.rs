//! 默认导入器
//!
//! 业务导入器接入之前，所有导入类型只做 CSV 结构检查：表头非空、每行字段数与表头一致。
//! 不解释字段内容。

use async_trait::async_trait;
use edi_common::models::{BatchResult, ImportKind, Violation};
use edi_sync::{ImportRequest, Importer, ImporterSet};
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, Copy, Default)]
pub struct CsvStructureImporter;

#[async_trait]
impl Importer for CsvStructureImporter {
    async fn import(&self, request: ImportRequest) -> anyhow::Result<BatchResult> {
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .from_reader(request.reader());
        let headers = reader.headers()?.clone();
        if headers.iter().all(|h| h.trim().is_empty()) {
            return Ok(BatchResult::failed(Violation::new("missing header row")));
        }

        let mut result = BatchResult::success(0);
        for (index, row) in reader.records().enumerate() {
            let fallback_line = index as u64 + 2;
            match row {
                Ok(record) if record.len() == headers.len() => result.records += 1,
                Ok(record) => {
                    let line = record
                        .position()
                        .map(|p| p.line())
                        .unwrap_or(fallback_line);
                    result.add_violation(Violation::at_line(
                        line,
                        format!(
                            "expected {} fields, found {}",
                            headers.len(),
                            record.len()
                        ),
                    ));
                }
                Err(err) => {
                    let line = err
                        .position()
                        .map(|p| p.line())
                        .unwrap_or(fallback_line);
                    result.add_violation(Violation::at_line(line, err.to_string()));
                }
            }
        }

        debug!(
            facility = %request.facility,
            kind = %request.kind,
            file = %request.file_name,
            records = result.records,
            violations = result.violations.len(),
            "csv structure checked"
        );
        Ok(result)
    }
}

pub fn default_importers() -> ImporterSet {
    let importer: Arc<dyn Importer> = Arc::new(CsvStructureImporter);
    ImportKind::ALL
        .into_iter()
        .fold(ImporterSet::new(), |set, kind| set.with(kind, importer.clone()))
}
