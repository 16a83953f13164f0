use std::path::PathBuf;

use thiserror::Error;

/// Convenience result type for pipeline operations.
pub type PipelineResult<T> = Result<T, PipelineError>;

/// What kind of source a [`PipelineError::NotFound`] refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    /// The dataset being transformed.
    Input,
    /// The dataset joined onto the input.
    Reference,
    /// A persisted RuleSet.
    Rules,
    /// A configuration or schedule file.
    Config,
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Input => "input",
            Self::Reference => "reference",
            Self::Rules => "rules",
            Self::Config => "config",
        };
        f.write_str(s)
    }
}

/// Severity classification used when logging or reporting a failed job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    /// The job was rejected because of its inputs or configuration.
    Error,
    /// Infrastructure failure (I/O, serialization of the artifact).
    Critical,
}

/// Error type returned by the pipeline.
///
/// Validation-class variants ([`PipelineError::NotFound`], [`PipelineError::Configuration`],
/// [`PipelineError::UnsupportedFormat`], [`PipelineError::Schema`]) are raised before any chunk
/// is processed. Failures while evaluating a rule or processing a chunk never surface here; see
/// [`crate::rules::EvaluationError`] and [`crate::execution::ChunkFailure`].
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Underlying I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV parsing error.
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    /// JSON (de)serialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parse error.
    #[error("toml error: {0}")]
    TomlDe(#[from] toml::de::Error),

    /// TOML serialization error.
    #[error("toml error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    /// A required source file does not exist.
    #[error("{kind} file not found: {}", path.display())]
    NotFound { kind: SourceKind, path: PathBuf },

    /// The job or pipeline configuration is inconsistent.
    #[error("configuration error: {message}")]
    Configuration { message: String },

    /// Requested output format is not one of `csv`, `xlsx`, `json`.
    #[error("unsupported output format '{format}' (supported: csv, xlsx, json)")]
    UnsupportedFormat { format: String },

    /// A dataset is empty or not parseable as tabular data.
    #[error("schema error: {message}")]
    Schema { message: String },

    /// Writing an artifact failed.
    #[error("failed to write {}: {message}", path.display())]
    Write { path: PathBuf, message: String },
}

impl PipelineError {
    pub(crate) fn config(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub(crate) fn schema(message: impl Into<String>) -> Self {
        Self::Schema {
            message: message.into(),
        }
    }

    pub(crate) fn write(path: impl Into<PathBuf>, message: impl ToString) -> Self {
        Self::Write {
            path: path.into(),
            message: message.to_string(),
        }
    }

    /// True for errors that reject a job before any processing started.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::NotFound { .. }
                | Self::Configuration { .. }
                | Self::UnsupportedFormat { .. }
                | Self::Schema { .. }
        )
    }

    /// Severity used for logging and exit codes.
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            Self::Io(_) | Self::Write { .. } => ErrorSeverity::Critical,
            Self::Csv(err) => match err.kind() {
                csv::ErrorKind::Io(_) => ErrorSeverity::Critical,
                _ => ErrorSeverity::Error,
            },
            Self::Json(err) if err.is_io() => ErrorSeverity::Critical,
            _ => ErrorSeverity::Error,
        }
    }
}
