//! The once-per-invocation run: load, join, enrich, then upload.

use std::path::Path;

use chrono::{DateTime, NaiveDate, Utc};
use polars::prelude::DataFrame;
use serde::Serialize;
use tracing::info;

use crate::config::PipelineConfig;
use crate::enricher::{enrich, EnrichmentContext, Shift};
use crate::error::Result;
use crate::join::join_positions;
use crate::loaders::{load_position_attributes, load_warehouse, LoadedFrame};
use crate::schema::FLAG_COLUMNS;
use crate::upload::{upload_frame, LoadJobConfig, UploadReport, Warehouse};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceSummary {
    pub path: String,
    pub rows_read: usize,
    pub duplicates_dropped: usize,
    pub content_hash: String,
}

impl SourceSummary {
    fn new(path: &Path, loaded: &LoadedFrame) -> Self {
        Self {
            path: path.display().to_string(),
            rows_read: loaded.rows_read,
            duplicates_dropped: loaded.duplicates_dropped,
            content_hash: loaded.content_hash.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub warehouse: SourceSummary,
    pub position_attributes: SourceSummary,
    pub unmatched_rows: usize,
    pub output_rows: usize,
    pub created_at: NaiveDate,
    pub turno: Shift,
    pub upload: Option<UploadReport>,
}

/// The enriched table, ready to upload.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub frame: DataFrame,
    pub summary: RunSummary,
}

/// Runs every stage except the upload.
pub fn build_snapshot(config: &PipelineConfig, context: &EnrichmentContext) -> Result<Snapshot> {
    let warehouse = load_warehouse(&config.warehouse_path)?;
    let positions = load_position_attributes(&config.position_attributes_path)?;

    let joined = join_positions(&warehouse.frame, &positions.frame)?;
    let frame = enrich(&joined.frame, context, &FLAG_COLUMNS)?;

    let summary = RunSummary {
        warehouse: SourceSummary::new(&config.warehouse_path, &warehouse),
        position_attributes: SourceSummary::new(&config.position_attributes_path, &positions),
        unmatched_rows: joined.unmatched_rows,
        output_rows: frame.height(),
        created_at: context.created_at,
        turno: context.shift,
        upload: None,
    };

    Ok(Snapshot { frame, summary })
}

/// Builds the snapshot for `now` and appends it to the configured table.
pub async fn run(
    config: &PipelineConfig,
    warehouse: &dyn Warehouse,
    now: DateTime<Utc>,
) -> Result<RunSummary> {
    let context = EnrichmentContext::at(now);
    let Snapshot { frame, mut summary } = build_snapshot(config, &context)?;

    let load_config = LoadJobConfig {
        write_disposition: config.write_disposition,
        ..LoadJobConfig::default()
    };
    let report = upload_frame(warehouse, &frame, &config.destination, &load_config).await?;
    info!(table = %report.table, job_id = %report.job_id, rows = report.rows, "snapshot uploaded");

    summary.upload = Some(report);
    Ok(summary)
}
