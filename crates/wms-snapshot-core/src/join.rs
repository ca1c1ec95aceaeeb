use std::fmt;

use polars::prelude::*;
use thiserror::Error;
use tracing::info;

use crate::schema::JOIN_KEY;

const MATCH_MARKER: &str = "__position_matched";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinSide {
    Warehouse,
    PositionAttributes,
}

impl fmt::Display for JoinSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JoinSide::Warehouse => write!(f, "warehouse"),
            JoinSide::PositionAttributes => write!(f, "position attributes"),
        }
    }
}

#[derive(Debug, Error)]
pub enum JoinError {
    #[error("{side} table has no {key} column", key = JOIN_KEY)]
    MissingKey { side: JoinSide },
    #[error("position attributes repeat {duplicates} {key} value(s); each position must appear once", key = JOIN_KEY)]
    AmbiguousPosition { duplicates: usize },
    #[error("position attribute column {0} collides with a warehouse column")]
    ColumnCollision(String),
    #[error("polars operation failed: {0}")]
    Polars(#[from] PolarsError),
}

#[derive(Debug, Clone)]
pub struct JoinOutcome {
    pub frame: DataFrame,
    /// Warehouse rows that found no position attributes.
    pub unmatched_rows: usize,
}

/// Left-joins the position attributes onto the warehouse rows by `posicion`.
///
/// Every warehouse row comes out exactly once; rows without a matching
/// position get nulls in every attribute column.
pub fn join_positions(
    warehouse: &DataFrame,
    positions: &DataFrame,
) -> Result<JoinOutcome, JoinError> {
    if warehouse.column(JOIN_KEY).is_err() {
        return Err(JoinError::MissingKey {
            side: JoinSide::Warehouse,
        });
    }
    let position_keys = positions
        .column(JOIN_KEY)
        .map_err(|_| JoinError::MissingKey {
            side: JoinSide::PositionAttributes,
        })?;

    let duplicates = positions.height() - position_keys.as_materialized_series().n_unique()?;
    if duplicates > 0 {
        return Err(JoinError::AmbiguousPosition { duplicates });
    }

    for name in positions.get_column_names() {
        if name.as_str() != JOIN_KEY && warehouse.column(name.as_str()).is_ok() {
            return Err(JoinError::ColumnCollision(name.to_string()));
        }
    }

    let mut right = positions.clone();
    right.with_column(Series::new(
        MATCH_MARKER.into(),
        vec![true; positions.height()],
    ))?;

    let joined = warehouse
        .clone()
        .lazy()
        .join(
            right.lazy(),
            [col(JOIN_KEY)],
            [col(JOIN_KEY)],
            JoinArgs::new(JoinType::Left),
        )
        .collect()?;

    let unmatched_rows = joined.column(MATCH_MARKER)?.null_count();
    let frame = joined.drop(MATCH_MARKER)?;

    info!(
        rows = frame.height(),
        unmatched_rows, "joined position attributes onto warehouse rows"
    );

    Ok(JoinOutcome {
        frame,
        unmatched_rows,
    })
}
