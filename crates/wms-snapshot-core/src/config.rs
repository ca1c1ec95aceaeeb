//! Run configuration. Everything the pipeline needs from the environment is
//! resolved here once and handed to the entry point as a plain struct.

use std::path::PathBuf;

use thiserror::Error;

use crate::schema::{DEFAULT_DESTINATION_TABLE, DEFAULT_PROJECT_ID};
use crate::upload::{TableId, WriteDisposition};

pub const ENV_WAREHOUSE_PATH: &str = "PATH_WH";
pub const ENV_POSITION_ATTRIBUTES_PATH: &str = "PATH_POS_ATT";
pub const ENV_DESTINATION_TABLE: &str = "WMS_DESTINATION_TABLE";
pub const ENV_PROJECT_ID: &str = "WMS_PROJECT_ID";
pub const ENV_WRITE_DISPOSITION: &str = "WMS_WRITE_DISPOSITION";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("{0} must not be empty")]
    Empty(&'static str),
    #[error("{var}={value:?} is invalid: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    pub warehouse_path: PathBuf,
    pub position_attributes_path: PathBuf,
    /// Fully-qualified destination; the project is always resolved.
    pub destination: TableId,
    pub write_disposition: WriteDisposition,
}

impl PipelineConfig {
    /// Reads `.env` (if present) and then the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let warehouse_path = required(&lookup, ENV_WAREHOUSE_PATH)?;
        let position_attributes_path = required(&lookup, ENV_POSITION_ATTRIBUTES_PATH)?;

        let project_id = optional(&lookup, ENV_PROJECT_ID)
            .unwrap_or_else(|| DEFAULT_PROJECT_ID.to_string());
        let table = optional(&lookup, ENV_DESTINATION_TABLE)
            .unwrap_or_else(|| DEFAULT_DESTINATION_TABLE.to_string());
        let destination =
            TableId::parse(&table, Some(&project_id)).map_err(|err| ConfigError::Invalid {
                var: ENV_DESTINATION_TABLE,
                value: table.clone(),
                reason: err.to_string(),
            })?;

        let write_disposition = match optional(&lookup, ENV_WRITE_DISPOSITION) {
            Some(value) => {
                value
                    .parse::<WriteDisposition>()
                    .map_err(|err| ConfigError::Invalid {
                        var: ENV_WRITE_DISPOSITION,
                        value: value.clone(),
                        reason: err.to_string(),
                    })?
            }
            None => WriteDisposition::default(),
        };

        Ok(Self {
            warehouse_path: PathBuf::from(warehouse_path),
            position_attributes_path: PathBuf::from(position_attributes_path),
            destination,
            write_disposition,
        })
    }
}

fn required<F>(lookup: &F, var: &'static str) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(var) {
        None => Err(ConfigError::Missing(var)),
        Some(value) if value.trim().is_empty() => Err(ConfigError::Empty(var)),
        Some(value) => Ok(value),
    }
}

fn optional<F>(lookup: &F, var: &'static str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(var).filter(|value| !value.trim().is_empty())
}
