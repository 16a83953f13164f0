//! `report-pipeline` turns large CSV datasets into report artifacts.
//!
//! A report job streams its input in fixed-size chunks, optionally left-joins every chunk against
//! a reference dataset, applies a [`rules::RuleSet`] (one expression per output column) on a
//! bounded worker pool, and writes the combined result as `csv`, `xlsx` or `json` into the
//! report directory, where the [`catalog::ArtifactCatalog`] can list, resolve and delete it.
//!
//! The primary entrypoint is [`report::ReportGenerator::generate`]:
//!
//! ```no_run
//! use report_pipeline::config::PipelineConfig;
//! use report_pipeline::ingestion::JoinSpec;
//! use report_pipeline::output::OutputFormat;
//! use report_pipeline::report::{ReportGenerator, ReportJob};
//! use report_pipeline::rules::RuleSet;
//!
//! # fn main() -> Result<(), report_pipeline::PipelineError> {
//! let rules: RuleSet = [("margin", "unit_price - cost_price")].into_iter().collect();
//! let job = ReportJob::new("sales.csv", rules, OutputFormat::Xlsx)
//!     .with_reference("products.csv", JoinSpec::new().on("product_id", "product_id"));
//!
//! let outcome = ReportGenerator::new(PipelineConfig::from_env()?).generate(&job)?;
//! println!("{} rows -> {}", outcome.rows, outcome.path.display());
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`ingestion`]: chunked CSV reading and the reference join
//! - [`rules`]: the expression language, rule application and validation, rules files
//! - [`execution`]: parallel chunk processing with backpressure and observer hooks
//! - [`output`]: csv / xlsx / json writers
//! - [`catalog`]: generated artifacts, tracked by filename
//! - [`report`]: the end-to-end report job
//! - [`schedule`]: persisted scheduled job definitions
//! - [`config`], [`logging`], [`error`], [`types`]: shared plumbing
//!
//! ## Applying rules to a chunk
//!
//! Rules only see the chunk's input columns. A rule that fails (here, an unknown column) yields
//! a null column; the other rules still compute.
//!
//! ```rust
//! use report_pipeline::rules::RuleSet;
//! use report_pipeline::types::{DataSet, Schema, Value};
//!
//! let chunk = DataSet::new(
//!     Schema::new(["quantity", "unit_price"]),
//!     vec![
//!         vec![Value::Int64(2), Value::Int64(5)],
//!         vec![Value::Int64(3), Value::Int64(10)],
//!     ],
//! );
//! let rules: RuleSet = [("total", "quantity * unit_price"), ("bad", "quantity * discount")]
//!     .into_iter()
//!     .collect();
//!
//! let out = rules.apply(chunk);
//! assert_eq!(out.column("total").unwrap(), vec![Value::Int64(10), Value::Int64(30)]);
//! assert_eq!(out.column("bad").unwrap(), vec![Value::Null, Value::Null]);
//! ```

pub mod catalog;
pub mod config;
pub mod error;
pub mod execution;
pub mod ingestion;
pub mod logging;
pub mod output;
pub mod report;
pub mod rules;
pub mod schedule;
pub mod types;

mod atomic;
mod ordered;

pub use error::{ErrorSeverity, PipelineError, PipelineResult, SourceKind};
