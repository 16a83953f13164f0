//! Ingestion of header-first CSV files.
//!
//! Most callers should use [`stream`] (from [`chunked`]) which:
//!
//! - reads the input header once and fixes the chunk schema
//! - optionally loads a reference file once and left-joins every chunk against it
//! - yields bounded-size [`crate::types::DataChunk`]s lazily
//!
//! Whole-file helpers for previews and validation live in [`csv`].

pub mod chunked;
pub mod csv;
pub mod join;

pub use self::chunked::{stream, ChunkReader};
pub use self::csv::{read_columns, read_dataset, sample_rows, validate_csv};
pub use self::join::{JoinPlan, JoinSpec, ReferenceTable};
