//! Appending a finished table to the destination warehouse.
//!
//! [`Warehouse`] is the seam to the remote service; [`upload_frame`] drives a
//! single all-or-nothing load job through it.

use std::fmt;
use std::io::Cursor;
use std::str::FromStr;

use async_trait::async_trait;
use bytes::Bytes;
use polars::io::parquet::write::{ParquetCompression, ParquetWriter, StatisticsOptions};
use polars::prelude::{DataFrame, PolarsError};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("destination table {0} not found")]
    TableNotFound(TableId),
    #[error("invalid table id {0:?}; expected [project.]dataset.table")]
    InvalidTableId(String),
    #[error("table id {0:?} names no project and no default project was given")]
    MissingProject(String),
    #[error("unknown write disposition {0:?}")]
    InvalidWriteDisposition(String),
    #[error("failed to obtain access token: {0}")]
    Auth(String),
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("warehouse API returned {status}: {message}")]
    Api { status: u16, message: String },
    #[error("load job {job_id} failed ({reason}): {message}")]
    JobFailed {
        job_id: String,
        reason: String,
        message: String,
    },
    #[error("failed to serialize table as parquet: {0}")]
    Serialize(#[source] PolarsError),
    #[error("invalid JSON payload: {0}")]
    Json(#[from] serde_json::Error),
}

/// Fully-qualified destination table.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableId {
    pub project: String,
    pub dataset: String,
    pub table: String,
}

impl TableId {
    pub fn new(
        project: impl Into<String>,
        dataset: impl Into<String>,
        table: impl Into<String>,
    ) -> Self {
        Self {
            project: project.into(),
            dataset: dataset.into(),
            table: table.into(),
        }
    }

    /// Accepts `dataset.table`, `project.dataset.table` and the legacy
    /// `project:dataset.table`. `default_project` fills in the first form.
    pub fn parse(text: &str, default_project: Option<&str>) -> Result<Self, UploadError> {
        let text = text.trim();
        let invalid = || UploadError::InvalidTableId(text.to_string());

        let (project, rest) = match text.split_once(':') {
            Some((project, rest)) => (Some(project), rest),
            None => (None, text),
        };

        let parts: Vec<&str> = rest.split('.').collect();
        if parts.iter().any(|part| part.is_empty()) {
            return Err(invalid());
        }

        let (project, dataset, table) = match (project, parts.as_slice()) {
            (Some(project), [dataset, table]) => (Some(project), *dataset, *table),
            (None, [project, dataset, table]) => (Some(*project), *dataset, *table),
            (None, [dataset, table]) => (default_project, *dataset, *table),
            _ => return Err(invalid()),
        };

        let project = match project.map(str::trim) {
            Some(project) if !project.is_empty() => project,
            Some(_) => return Err(invalid()),
            None => return Err(UploadError::MissingProject(text.to_string())),
        };

        Ok(Self::new(project, dataset, table))
    }
}

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.project, self.dataset, self.table)
    }
}

/// Policy for rows already in the destination. Runs append by default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum WriteDisposition {
    #[default]
    #[serde(rename = "WRITE_APPEND")]
    Append,
    #[serde(rename = "WRITE_TRUNCATE")]
    Truncate,
    #[serde(rename = "WRITE_EMPTY")]
    Empty,
}

impl WriteDisposition {
    pub fn as_str(&self) -> &'static str {
        match self {
            WriteDisposition::Append => "WRITE_APPEND",
            WriteDisposition::Truncate => "WRITE_TRUNCATE",
            WriteDisposition::Empty => "WRITE_EMPTY",
        }
    }
}

impl FromStr for WriteDisposition {
    type Err = UploadError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_uppercase().as_str() {
            "WRITE_APPEND" | "APPEND" => Ok(WriteDisposition::Append),
            "WRITE_TRUNCATE" | "TRUNCATE" => Ok(WriteDisposition::Truncate),
            "WRITE_EMPTY" | "EMPTY" => Ok(WriteDisposition::Empty),
            _ => Err(UploadError::InvalidWriteDisposition(value.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadJobConfig {
    pub write_disposition: WriteDisposition,
    /// Let the warehouse infer the schema from the uploaded data.
    pub autodetect: bool,
}

impl Default for LoadJobConfig {
    fn default() -> Self {
        Self {
            write_disposition: WriteDisposition::Append,
            autodetect: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableInfo {
    pub id: TableId,
    pub num_rows: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobHandle {
    pub project: String,
    pub job_id: String,
    pub location: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobOutcome {
    pub job_id: String,
    pub output_rows: Option<u64>,
}

#[async_trait]
pub trait Warehouse: Send + Sync {
    /// Fails with [`UploadError::TableNotFound`] when the table does not exist.
    async fn get_table(&self, table: &TableId) -> Result<TableInfo, UploadError>;

    async fn submit_load(
        &self,
        table: &TableId,
        config: &LoadJobConfig,
        payload: Bytes,
    ) -> Result<JobHandle, UploadError>;

    /// Blocks until the job reaches a terminal state.
    async fn wait_for_job(&self, job: &JobHandle) -> Result<JobOutcome, UploadError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadReport {
    pub table: String,
    pub job_id: String,
    pub rows: usize,
    pub output_rows: Option<u64>,
}

/// Appends `frame` to `table` as one load job and waits for it to finish.
///
/// The table must already exist; nothing is serialized or sent otherwise.
/// Job errors are returned as reported, without retrying.
pub async fn upload_frame(
    warehouse: &dyn Warehouse,
    frame: &DataFrame,
    table: &TableId,
    config: &LoadJobConfig,
) -> Result<UploadReport, UploadError> {
    let existing = warehouse.get_table(table).await?;
    debug!(table = %existing.id, existing_rows = ?existing.num_rows, "destination table found");

    let payload = parquet_bytes(frame)?;
    debug!(bytes = payload.len(), rows = frame.height(), "serialized table as parquet");

    let job = warehouse.submit_load(table, config, payload).await?;
    info!(
        job_id = %job.job_id,
        table = %table,
        write_disposition = config.write_disposition.as_str(),
        "submitted load job"
    );

    let outcome = warehouse.wait_for_job(&job).await?;
    info!(job_id = %outcome.job_id, output_rows = ?outcome.output_rows, "load job finished");

    Ok(UploadReport {
        table: table.to_string(),
        job_id: outcome.job_id,
        rows: frame.height(),
        output_rows: outcome.output_rows,
    })
}

pub fn parquet_bytes(frame: &DataFrame) -> Result<Bytes, UploadError> {
    let mut buffer = Vec::new();
    {
        let mut cursor = Cursor::new(&mut buffer);
        let mut clone = frame.clone();
        ParquetWriter::new(&mut cursor)
            .with_compression(ParquetCompression::Snappy)
            .with_statistics(StatisticsOptions::default())
            .finish(&mut clone)
            .map_err(UploadError::Serialize)?;
    }
    Ok(Bytes::from(buffer))
}
