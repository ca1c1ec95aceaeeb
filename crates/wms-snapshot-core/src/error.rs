// crates/wms-snapshot-core/src/error.rs

use thiserror::Error;

use crate::config::ConfigError;
use crate::enricher::EnrichError;
use crate::join::JoinError;
use crate::loaders::LoadError;
use crate::upload::UploadError;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Failed to load input: {0}")]
    Load(#[from] LoadError),

    #[error("Join failed: {0}")]
    Join(#[from] JoinError),

    #[error("Enrichment failed: {0}")]
    Enrich(#[from] EnrichError),

    #[error("Upload failed: {0}")]
    Upload(#[from] UploadError),
}

pub type Result<T> = std::result::Result<T, PipelineError>;
