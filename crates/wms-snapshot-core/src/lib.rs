pub mod bigquery;
pub mod config;
pub mod enricher;
pub mod error;
pub mod join;
pub mod loaders;
pub mod pipeline;
pub mod schema;
pub mod upload;
