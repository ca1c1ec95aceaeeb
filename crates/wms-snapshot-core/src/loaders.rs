use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use polars::prelude::*;
use thiserror::Error;
use tracing::{debug, info};

use crate::schema::{position, warehouse, DATE_FORMAT, JOIN_KEY};

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{} is not valid UTF-8", path.display())]
    Encoding { path: PathBuf },
    #[error("failed to parse CSV {}: {source}", path.display())]
    Csv {
        path: PathBuf,
        #[source]
        source: PolarsError,
    },
    #[error("failed to read CSV header of {}: {source}", path.display())]
    Header {
        path: PathBuf,
        #[source]
        source: ::csv::Error,
    },
    #[error("{} is missing required column {column}", path.display())]
    MissingColumn { path: PathBuf, column: &'static str },
    #[error("{}: {column} value {value:?} does not match {format}", path.display())]
    InvalidDate {
        path: PathBuf,
        column: &'static str,
        value: String,
        format: &'static str,
    },
    #[error("polars operation failed: {0}")]
    Polars(#[from] PolarsError),
}

/// A deduplicated extract plus the bookkeeping reported in the run summary.
#[derive(Debug, Clone)]
pub struct LoadedFrame {
    pub frame: DataFrame,
    pub rows_read: usize,
    pub duplicates_dropped: usize,
    pub content_hash: String,
}

/// Loads the warehouse stock extract.
///
/// `lote` is always text so lot codes such as `007` survive untouched, exact
/// duplicate rows are dropped (first occurrence wins) and `fecha_vencimiento`
/// is parsed strictly as `%Y-%m-%d` into a `Date` column.
pub fn load_warehouse(path: &Path) -> Result<LoadedFrame, LoadError> {
    let (bytes, content_hash) = read_source(path)?;

    require_headers(path, &bytes, &warehouse::TEXT_COLUMNS)?;

    let mut text_schema = Schema::default();
    for column in warehouse::TEXT_COLUMNS {
        text_schema.with_column(column.into(), DataType::String);
    }

    let frame = parse_csv(path, bytes, Some(Arc::new(text_schema)))?;
    let rows_read = frame.height();
    let mut frame = drop_duplicate_rows(frame)?;
    let duplicates_dropped = rows_read - frame.height();

    parse_date_column(&mut frame, path, warehouse::FECHA_VENCIMIENTO)?;

    info!(
        path = %path.display(),
        rows_read,
        duplicates_dropped,
        content_hash = %content_hash,
        "loaded warehouse extract"
    );

    Ok(LoadedFrame {
        frame,
        rows_read,
        duplicates_dropped,
        content_hash,
    })
}

/// Loads the position attributes extract with inferred types, drops exact
/// duplicates and prefixes every column except the join key with `pos_`.
pub fn load_position_attributes(path: &Path) -> Result<LoadedFrame, LoadError> {
    let (bytes, content_hash) = read_source(path)?;

    let frame = parse_csv(path, bytes, None)?;
    let rows_read = frame.height();
    let mut frame = drop_duplicate_rows(frame)?;
    let duplicates_dropped = rows_read - frame.height();

    prefix_columns(&mut frame, position::PREFIX, JOIN_KEY)?;

    info!(
        path = %path.display(),
        rows_read,
        duplicates_dropped,
        content_hash = %content_hash,
        "loaded position attributes extract"
    );

    Ok(LoadedFrame {
        frame,
        rows_read,
        duplicates_dropped,
        content_hash,
    })
}

/// Removes rows whose every column matches an earlier row. Order is preserved
/// and nulls compare equal.
pub fn drop_duplicate_rows(df: DataFrame) -> PolarsResult<DataFrame> {
    df.lazy()
        .unique_stable(None, UniqueKeepStrategy::First)
        .collect()
}

/// Renames every column but `keep` to `{prefix}{name}`.
pub fn prefix_columns(df: &mut DataFrame, prefix: &str, keep: &str) -> PolarsResult<()> {
    let names: Vec<String> = df
        .get_column_names()
        .into_iter()
        .map(|name| name.to_string())
        .collect();

    for name in names {
        if name == keep {
            continue;
        }
        let renamed = format!("{prefix}{name}");
        debug!(from = %name, to = %renamed, "prefixing column");
        df.rename(&name, renamed.into())?;
    }

    Ok(())
}

fn read_source(path: &Path) -> Result<(Vec<u8>, String), LoadError> {
    let bytes = std::fs::read(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    if std::str::from_utf8(&bytes).is_err() {
        return Err(LoadError::Encoding {
            path: path.to_path_buf(),
        });
    }

    let content_hash = blake3::hash(&bytes).to_hex().to_string();
    Ok((bytes, content_hash))
}

fn require_headers(
    path: &Path,
    bytes: &[u8],
    columns: &[&'static str],
) -> Result<(), LoadError> {
    let mut reader = ::csv::ReaderBuilder::new()
        .has_headers(true)
        .from_reader(bytes);
    let headers = reader.headers().map_err(|source| LoadError::Header {
        path: path.to_path_buf(),
        source,
    })?;

    for &column in columns {
        if !headers.iter().any(|header| header.trim() == column) {
            return Err(LoadError::MissingColumn {
                path: path.to_path_buf(),
                column,
            });
        }
    }
    Ok(())
}

fn parse_csv(
    path: &Path,
    bytes: Vec<u8>,
    schema_overwrite: Option<SchemaRef>,
) -> Result<DataFrame, LoadError> {
    CsvReadOptions::default()
        .with_has_header(true)
        .with_infer_schema_length(None)
        .with_schema_overwrite(schema_overwrite)
        .into_reader_with_file_handle(Cursor::new(bytes))
        .finish()
        .map_err(|source| LoadError::Csv {
            path: path.to_path_buf(),
            source,
        })
}

fn parse_date_column(
    df: &mut DataFrame,
    path: &Path,
    column: &'static str,
) -> Result<(), LoadError> {
    let parsed = df
        .clone()
        .lazy()
        .select([col(column)
            .str()
            .strptime(
                DataType::Date,
                StrptimeOptions {
                    format: Some(DATE_FORMAT.into()),
                    strict: false,
                    exact: true,
                    cache: true,
                },
                lit("raise"),
            )
            .alias(column)])
        .collect()?;
    let dates = parsed.column(column)?;

    // A value that was present but came back null did not match the format.
    if dates.null_count() > df.column(column)?.null_count() {
        let raw = df.column(column)?.str()?;
        let parsed_nulls = dates.is_null();
        let rejected = raw
            .into_iter()
            .zip(parsed_nulls.into_iter())
            .find_map(|(value, is_null)| match (value, is_null) {
                (Some(value), Some(true)) => Some(value.to_string()),
                _ => None,
            })
            .unwrap_or_default();

        return Err(LoadError::InvalidDate {
            path: path.to_path_buf(),
            column,
            value: rejected,
            format: DATE_FORMAT,
        });
    }

    df.with_column(dates.clone())?;
    Ok(())
}
