use chrono::{DateTime, Local, NaiveDate, Timelike, Utc};
use polars::prelude::*;
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::schema::{derived, FlagColumn, FlagRule, SHIFT_TIMEZONE};

#[derive(Debug, Error)]
pub enum EnrichError {
    #[error("flag column {0} is missing from the joined table")]
    MissingColumn(&'static str),
    #[error("flag column {column} could not be normalized: {source}")]
    InvalidFlag {
        column: &'static str,
        #[source]
        source: PolarsError,
    },
    #[error("polars operation failed: {0}")]
    Polars(#[from] PolarsError),
}

/// Coarse time-of-day label stamped on every row of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Shift {
    Matutino,
    Tarde,
}

impl Shift {
    /// Morning until noon in Santiago, afternoon after.
    pub fn at(now: DateTime<Utc>) -> Self {
        if now.with_timezone(&SHIFT_TIMEZONE).hour() < 12 {
            Shift::Matutino
        } else {
            Shift::Tarde
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Shift::Matutino => "matutino",
            Shift::Tarde => "tarde",
        }
    }
}

/// Values derived from the clock once per run and applied to every row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnrichmentContext {
    pub created_at: NaiveDate,
    pub shift: Shift,
}

impl EnrichmentContext {
    pub fn at(now: DateTime<Utc>) -> Self {
        Self {
            created_at: now.with_timezone(&Local).date_naive(),
            shift: Shift::at(now),
        }
    }
}

/// Adds `created_at` and `turno`, then normalizes every listed flag column
/// to a non-null Int64. Other columns are left as they are.
pub fn enrich(
    joined: &DataFrame,
    context: &EnrichmentContext,
    flags: &[FlagColumn],
) -> Result<DataFrame, EnrichError> {
    for flag in flags {
        if joined.column(flag.name).is_err() {
            return Err(EnrichError::MissingColumn(flag.name));
        }
    }

    let height = joined.height();
    let mut enriched = joined
        .clone()
        .lazy()
        .with_columns([
            lit(context.created_at).alias(derived::CREATED_AT),
            lit(context.shift.as_str()).alias(derived::TURNO),
        ])
        .collect()?;

    for flag in flags {
        let column = enriched.column(flag.name)?;
        let normalized =
            normalize_flag(column, flag.rule).map_err(|source| EnrichError::InvalidFlag {
                column: flag.name,
                source,
            })?;

        let non_binary = normalized
            .i64()?
            .into_iter()
            .flatten()
            .filter(|value| *value != 0 && *value != 1)
            .count();
        if non_binary > 0 {
            warn!(
                column = flag.name,
                non_binary, "flag column holds values other than 0/1; uploading as-is"
            );
        }

        enriched.with_column(normalized)?;
    }

    info!(
        rows = height,
        created_at = %context.created_at,
        turno = context.shift.as_str(),
        "enriched joined table"
    );

    Ok(enriched)
}

fn normalize_flag(column: &Column, rule: FlagRule) -> PolarsResult<Series> {
    match rule {
        FlagRule::ZeroIfMissing => column
            .as_materialized_series()
            .strict_cast(&DataType::Int64)?
            .fill_null(FillNullStrategy::Zero),
    }
}
