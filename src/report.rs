//! End-to-end report generation: validate, stream, transform in parallel, write, catalog.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Local;

use crate::catalog::ArtifactCatalog;
use crate::config::PipelineConfig;
use crate::error::{PipelineError, PipelineResult, SourceKind};
use crate::execution::{
    ChunkOrchestrator, ExecutionObserver, FailedChunk, RunSummary, TracingExecutionObserver,
};
use crate::ingestion::{self, JoinSpec, ReferenceTable};
use crate::output::{self, OutputFormat};
use crate::rules::{self, RuleSet, ValidationReport};
use crate::types::{DataSet, Schema};

/// Rows sampled from the input when validating rules against files.
pub const VALIDATION_SAMPLE_ROWS: usize = 10;

/// Where a job's rules come from.
#[derive(Debug, Clone)]
pub enum RulesSource {
    Inline(RuleSet),
    /// A `.json` or `.toml` rules file.
    File(PathBuf),
}

impl RulesSource {
    pub fn load(&self) -> PipelineResult<RuleSet> {
        match self {
            Self::Inline(rules) => Ok(rules.clone()),
            Self::File(path) => rules::load(path),
        }
    }
}

impl From<RuleSet> for RulesSource {
    fn from(rules: RuleSet) -> Self {
        Self::Inline(rules)
    }
}

impl From<PathBuf> for RulesSource {
    fn from(path: PathBuf) -> Self {
        Self::File(path)
    }
}

/// One report request.
#[derive(Debug, Clone)]
pub struct ReportJob {
    pub input: PathBuf,
    pub reference: Option<PathBuf>,
    pub rules: RulesSource,
    /// Ignored without a reference.
    pub join: JoinSpec,
    pub format: OutputFormat,
}

impl ReportJob {
    pub fn new(
        input: impl Into<PathBuf>,
        rules: impl Into<RulesSource>,
        format: OutputFormat,
    ) -> Self {
        Self {
            input: input.into(),
            reference: None,
            rules: rules.into(),
            join: JoinSpec::new(),
            format,
        }
    }

    pub fn with_reference(mut self, reference: impl Into<PathBuf>, join: JoinSpec) -> Self {
        self.reference = Some(reference.into());
        self.join = join;
        self
    }
}

/// A generated artifact and how the run went.
#[derive(Debug, Clone)]
pub struct ReportOutcome {
    pub artifact_id: String,
    pub path: PathBuf,
    /// Rows written to the artifact.
    pub rows: usize,
    pub stats: RunSummary,
    /// Chunks that were written without the reference join, one message each.
    pub join_warnings: Vec<String>,
}

impl ReportOutcome {
    /// Chunks that were dropped from the artifact.
    pub fn failed_chunks(&self) -> &[FailedChunk] {
        &self.stats.failed
    }
}

/// Runs [`ReportJob`]s against one configuration and report directory.
pub struct ReportGenerator {
    config: PipelineConfig,
    catalog: ArtifactCatalog,
    observer: Arc<dyn ExecutionObserver>,
}

impl ReportGenerator {
    pub fn new(config: PipelineConfig) -> Self {
        let catalog = ArtifactCatalog::new(config.report_dir.clone());
        Self {
            config,
            catalog,
            observer: Arc::new(TracingExecutionObserver),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn ExecutionObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn catalog(&self) -> &ArtifactCatalog {
        &self.catalog
    }

    /// Generate one artifact for `job`.
    ///
    /// Missing files, unreadable headers, bad join columns and unloadable rules are rejected
    /// before any chunk is processed. Chunk failures are not errors: the failed chunks are left
    /// out of the artifact and listed in [`ReportOutcome::failed_chunks`].
    pub fn generate(&self, job: &ReportJob) -> PipelineResult<ReportOutcome> {
        self.config.validate()?;

        ingestion::validate_csv(&job.input, SourceKind::Input, &[])?;
        if let Some(reference) = &job.reference {
            ingestion::validate_csv(reference, SourceKind::Reference, &[])?;
        }
        let rules = job.rules.load()?;

        let mut reader = ingestion::stream(
            &job.input,
            self.config.chunk_size,
            job.reference.as_deref(),
            Some(&job.join),
        )?;
        let fallback_schema = result_schema(reader.output_schema(), &rules);
        let orchestrator = ChunkOrchestrator::new(self.config.execution_options())?
            .with_observer(Arc::clone(&self.observer));

        tracing::info!(
            input = %job.input.display(),
            reference = ?job.reference,
            rules = rules.len(),
            format = %job.format,
            "generating report"
        );

        let run = orchestrator.run(reader.by_ref(), &rules);
        let join_warnings = reader.warnings().to_vec();
        let stats = run.summary;
        let data = if run.chunks.is_empty() {
            if stats.chunks_failed() > 0 {
                tracing::warn!(
                    failed = stats.chunks_failed(),
                    "no chunk was processed successfully; writing an empty report"
                );
            }
            DataSet::empty(fallback_schema)
        } else {
            DataSet::concat(run.chunks)
        };

        let artifact_id = ArtifactCatalog::create_id();
        let path = self
            .catalog
            .artifact_path(&artifact_id, job.format, Local::now().naive_local());
        output::write(&data, &path, job.format)?;

        tracing::info!(
            id = %artifact_id,
            path = %path.display(),
            rows = data.row_count(),
            failed_chunks = stats.chunks_failed(),
            unjoined_chunks = join_warnings.len(),
            "report generated"
        );

        Ok(ReportOutcome {
            artifact_id,
            path,
            rows: data.row_count(),
            stats,
            join_warnings,
        })
    }
}

/// Chunk schema followed by any rule output not already in it.
fn result_schema(chunk_schema: &Schema, rules: &RuleSet) -> Schema {
    let mut columns = chunk_schema.columns.clone();
    for field in rules.output_fields() {
        if !columns.iter().any(|c| c == field) {
            columns.push(field.to_owned());
        }
    }
    Schema::new(columns)
}

/// Validate `rules` against a small sample of `input`, joined with `reference` when given.
///
/// Without an explicit `join`, the input and reference are joined on every column they share;
/// having none in common is a [`PipelineError::Configuration`] error.
pub fn validate_rules_for_files(
    rules: &RuleSet,
    input: &Path,
    reference: Option<&Path>,
    join: Option<&JoinSpec>,
) -> PipelineResult<ValidationReport> {
    let sample = ingestion::sample_rows(input, SourceKind::Input, VALIDATION_SAMPLE_ROWS)?;

    let Some(reference) = reference else {
        return Ok(rules.validate(&sample.schema));
    };

    let spec = match join {
        Some(spec) if !spec.is_empty() => spec.clone(),
        _ => {
            let reference_schema = ingestion::read_columns(reference, SourceKind::Reference)?;
            let spec = JoinSpec::from_common_columns(&sample.schema, &reference_schema);
            if spec.is_empty() {
                return Err(PipelineError::config(
                    "no common columns found for joining input and reference files",
                ));
            }
            spec
        }
    };

    let table = ReferenceTable::load(reference, &spec)?;
    let Some(plan) = table.plan(&sample.schema) else {
        return Err(PipelineError::config(format!(
            "input file missing join keys: {}",
            table.missing_input_columns(&sample.schema).join(", ")
        )));
    };
    let joined = table.join_chunk(&plan, sample);
    Ok(rules.validate(&joined.schema))
}
