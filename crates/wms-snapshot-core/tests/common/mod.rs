#![allow(dead_code)]

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;
use tempfile::NamedTempFile;
use wms_snapshot_core::upload::{
    JobHandle, JobOutcome, LoadJobConfig, TableId, TableInfo, UploadError, Warehouse,
};

pub fn fixture(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests/data")
        .join(name)
}

pub fn csv_file(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("temp file");
    file.write_all(contents.as_bytes()).expect("write temp csv");
    file.flush().expect("flush temp csv");
    file
}

#[derive(Debug, Clone)]
pub struct SubmittedLoad {
    pub table: TableId,
    pub config: LoadJobConfig,
    pub payload: Bytes,
}

/// In-memory warehouse that knows a fixed set of tables.
#[derive(Default)]
pub struct FakeWarehouse {
    pub tables: Vec<TableId>,
    pub job_error: Option<(String, String)>,
    pub submitted: Mutex<Vec<SubmittedLoad>>,
}

impl FakeWarehouse {
    pub fn with_table(table: TableId) -> Self {
        Self {
            tables: vec![table],
            ..Self::default()
        }
    }

    pub fn submitted(&self) -> Vec<SubmittedLoad> {
        self.submitted.lock().unwrap().clone()
    }
}

#[async_trait]
impl Warehouse for FakeWarehouse {
    async fn get_table(&self, table: &TableId) -> Result<TableInfo, UploadError> {
        if self.tables.contains(table) {
            Ok(TableInfo {
                id: table.clone(),
                num_rows: Some(0),
            })
        } else {
            Err(UploadError::TableNotFound(table.clone()))
        }
    }

    async fn submit_load(
        &self,
        table: &TableId,
        config: &LoadJobConfig,
        payload: Bytes,
    ) -> Result<JobHandle, UploadError> {
        let mut submitted = self.submitted.lock().unwrap();
        submitted.push(SubmittedLoad {
            table: table.clone(),
            config: *config,
            payload,
        });
        Ok(JobHandle {
            project: table.project.clone(),
            job_id: format!("job_{}", submitted.len()),
            location: Some("US".to_string()),
        })
    }

    async fn wait_for_job(&self, job: &JobHandle) -> Result<JobOutcome, UploadError> {
        if let Some((reason, message)) = &self.job_error {
            return Err(UploadError::JobFailed {
                job_id: job.job_id.clone(),
                reason: reason.clone(),
                message: message.clone(),
            });
        }
        Ok(JobOutcome {
            job_id: job.job_id.clone(),
            output_rows: None,
        })
    }
}
