//! Pipeline configuration.
//!
//! Loaded from environment variables ([`PipelineConfig::from_env`]) or a TOML file
//! ([`PipelineConfig::from_toml_file`]); anything not set keeps its [`Default`].

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, PipelineResult, SourceKind};
use crate::execution::ExecutionOptions;

pub const DEFAULT_CHUNK_SIZE: usize = 100_000;
pub const DEFAULT_MAX_WORKERS: usize = 4;

const ENV_UPLOAD_FOLDER: &str = "UPLOAD_FOLDER";
const ENV_REPORT_FOLDER: &str = "REPORT_FOLDER";
const ENV_RULES_FOLDER: &str = "RULES_FOLDER";
const ENV_CHUNK_SIZE: &str = "CSV_CHUNK_SIZE";
const ENV_MAX_WORKERS: &str = "MAX_WORKERS";
const ENV_MAX_IN_FLIGHT: &str = "MAX_IN_FLIGHT_CHUNKS";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Where input and reference files are resolved from.
    pub upload_dir: PathBuf,
    /// Where artifacts are written.
    pub report_dir: PathBuf,
    /// Where persisted RuleSets live.
    pub rules_dir: PathBuf,
    /// Rows per chunk.
    pub chunk_size: usize,
    /// Worker threads applying rules.
    pub max_workers: usize,
    /// Chunks allowed in flight at once; `None` means twice `max_workers`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_in_flight_chunks: Option<usize>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            upload_dir: PathBuf::from("data/uploads"),
            report_dir: PathBuf::from("data/reports"),
            rules_dir: PathBuf::from("data/rules"),
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_workers: DEFAULT_MAX_WORKERS,
            max_in_flight_chunks: None,
        }
    }
}

impl PipelineConfig {
    /// Defaults overridden by `UPLOAD_FOLDER`, `REPORT_FOLDER`, `RULES_FOLDER`,
    /// `CSV_CHUNK_SIZE`, `MAX_WORKERS` and `MAX_IN_FLIGHT_CHUNKS`.
    pub fn from_env() -> PipelineResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`PipelineConfig::from_env`], reading variables through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> PipelineResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(dir) = lookup(ENV_UPLOAD_FOLDER) {
            config.upload_dir = dir.into();
        }
        if let Some(dir) = lookup(ENV_REPORT_FOLDER) {
            config.report_dir = dir.into();
        }
        if let Some(dir) = lookup(ENV_RULES_FOLDER) {
            config.rules_dir = dir.into();
        }
        if let Some(raw) = lookup(ENV_CHUNK_SIZE) {
            config.chunk_size = parse_count(ENV_CHUNK_SIZE, &raw)?;
        }
        if let Some(raw) = lookup(ENV_MAX_WORKERS) {
            config.max_workers = parse_count(ENV_MAX_WORKERS, &raw)?;
        }
        if let Some(raw) = lookup(ENV_MAX_IN_FLIGHT) {
            config.max_in_flight_chunks = Some(parse_count(ENV_MAX_IN_FLIGHT, &raw)?);
        }
        config.validate()?;
        Ok(config)
    }

    /// Read a TOML file; missing keys keep their defaults.
    pub fn from_toml_file(path: impl AsRef<Path>) -> PipelineResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(PipelineError::NotFound {
                kind: SourceKind::Config,
                path: path.to_path_buf(),
            });
        }
        let raw = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> PipelineResult<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> PipelineResult<()> {
        if self.chunk_size == 0 {
            return Err(PipelineError::config("chunk_size must be greater than zero"));
        }
        if self.max_workers == 0 {
            return Err(PipelineError::config("max_workers must be greater than zero"));
        }
        if self.max_in_flight_chunks == Some(0) {
            return Err(PipelineError::config(
                "max_in_flight_chunks must be greater than zero",
            ));
        }
        Ok(())
    }

    pub fn in_flight_limit(&self) -> usize {
        self.max_in_flight_chunks
            .unwrap_or_else(|| self.max_workers.saturating_mul(2))
    }

    pub fn execution_options(&self) -> ExecutionOptions {
        ExecutionOptions {
            num_workers: self.max_workers,
            max_in_flight_chunks: self.in_flight_limit(),
        }
    }
}

fn parse_count(key: &str, raw: &str) -> PipelineResult<usize> {
    raw.trim()
        .parse::<usize>()
        .map_err(|_| {
            PipelineError::config(format!("{key} must be a non-negative integer, got '{raw}'"))
        })
}
