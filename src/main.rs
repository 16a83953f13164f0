//! `report-pipeline` command-line front end.

use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use report_pipeline::catalog::ArtifactCatalog;
use report_pipeline::config::PipelineConfig;
use report_pipeline::ingestion::{self, JoinSpec};
use report_pipeline::logging::{init_logging, LogFormat};
use report_pipeline::output::OutputFormat;
use report_pipeline::report::{validate_rules_for_files, ReportGenerator, ReportJob, RulesSource};
use report_pipeline::rules;
use report_pipeline::{PipelineResult, SourceKind};

#[derive(Parser)]
#[command(
    name = "report-pipeline",
    version,
    about = "Generate reports from CSV data with declarative transformation rules"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// TOML configuration file (default: environment variables).
    #[arg(long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON objects.
    #[arg(long = "log-json", global = true)]
    log_json: bool,

    /// Default log filter when RUST_LOG is unset.
    #[arg(long = "log-level", value_name = "FILTER", default_value = "info", global = true)]
    log_level: String,
}

#[derive(Subcommand)]
enum Command {
    /// Generate a report artifact.
    Generate {
        #[command(flatten)]
        files: JobFiles,

        /// Output format: csv, xlsx or json.
        #[arg(long, default_value = "csv")]
        format: String,
    },

    /// Check that every rule only references available columns.
    Validate {
        #[command(flatten)]
        files: JobFiles,
    },

    /// List generated artifacts, newest first.
    List,

    /// Delete a generated artifact.
    Delete {
        #[arg(value_name = "ID")]
        id: String,
    },

    /// Print the column names of a CSV file.
    Columns {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },

    /// Print the first rows of a CSV file.
    Sample {
        #[arg(value_name = "FILE")]
        file: PathBuf,

        #[arg(long, default_value_t = 10)]
        rows: usize,
    },
}

#[derive(clap::Args)]
struct JobFiles {
    /// Input CSV file.
    #[arg(long, value_name = "FILE")]
    input: PathBuf,

    /// Rules file (.json or .toml).
    #[arg(long, value_name = "FILE")]
    rules: PathBuf,

    /// Reference CSV file joined onto the input.
    #[arg(long, value_name = "FILE")]
    reference: Option<PathBuf>,

    /// Join key as INPUT_COLUMN=REFERENCE_COLUMN (repeatable, order kept).
    #[arg(long = "join", value_name = "INPUT=REFERENCE", value_parser = parse_join_pair)]
    join: Vec<(String, String)>,
}

impl JobFiles {
    fn join_spec(&self) -> JoinSpec {
        JoinSpec::from_pairs(self.join.iter().cloned())
    }
}

fn parse_join_pair(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((input, reference)) if !input.trim().is_empty() && !reference.trim().is_empty() => {
            Ok((input.trim().to_owned(), reference.trim().to_owned()))
        }
        _ => Err(format!("expected INPUT_COLUMN=REFERENCE_COLUMN, got '{raw}'")),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let format = if cli.log_json {
        LogFormat::Json
    } else {
        LogFormat::Text
    };
    if let Err(error) = init_logging(format, &cli.log_level) {
        eprintln!("error: {error}");
        return ExitCode::FAILURE;
    }

    match run(cli) {
        Ok(code) => code,
        Err(error) => {
            tracing::error!(severity = ?error.severity(), "{error}");
            eprintln!("error: {error}");
            ExitCode::FAILURE
        }
    }
}

fn load_config(path: Option<&PathBuf>) -> PipelineResult<PipelineConfig> {
    match path {
        Some(path) => PipelineConfig::from_toml_file(path),
        None => PipelineConfig::from_env(),
    }
}

fn run(cli: Cli) -> PipelineResult<ExitCode> {
    let config = load_config(cli.config.as_ref())?;

    match cli.command {
        Command::Generate { files, format } => {
            let format: OutputFormat = format.parse()?;
            let rules_source = RulesSource::File(files.rules.clone());
            let mut job = ReportJob::new(&files.input, rules_source, format);
            if let Some(reference) = &files.reference {
                job = job.with_reference(reference, files.join_spec());
            }

            let outcome = ReportGenerator::new(config).generate(&job)?;
            println!("{}\t{}\t{} rows", outcome.artifact_id, outcome.path.display(), outcome.rows);
            for failed in outcome.failed_chunks() {
                eprintln!("warning: chunk {} dropped: {}", failed.index, failed.failure);
            }
            for warning in &outcome.join_warnings {
                eprintln!("warning: {warning}");
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Validate { files } => {
            let rule_set = rules::load(&files.rules)?;
            let join = files.join_spec();
            let report = validate_rules_for_files(
                &rule_set,
                &files.input,
                files.reference.as_deref(),
                (!join.is_empty()).then_some(&join),
            )?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(if report.all_valid() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Command::List => {
            for artifact in ArtifactCatalog::new(&config.report_dir).list()? {
                println!(
                    "{}\t{}\t{}\t{}\t{}",
                    artifact.id,
                    artifact.created_at.format("%Y-%m-%dT%H:%M:%S"),
                    artifact.format,
                    artifact.size_bytes,
                    artifact.filename
                );
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Delete { id } => {
            if ArtifactCatalog::new(&config.report_dir).delete(&id) {
                println!("deleted {id}");
                Ok(ExitCode::SUCCESS)
            } else {
                eprintln!("error: no artifact with id '{id}'");
                Ok(ExitCode::FAILURE)
            }
        }
        Command::Columns { file } => {
            for column in ingestion::read_columns(&file, SourceKind::Input)?.field_names() {
                println!("{column}");
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Sample { file, rows } => {
            let data = ingestion::sample_rows(&file, SourceKind::Input, rows)?;
            let mut wtr = csv::Writer::from_writer(io::stdout().lock());
            wtr.write_record(&data.schema.columns)?;
            for row in &data.rows {
                wtr.write_record(row.iter().map(ToString::to_string))?;
            }
            wtr.flush()?;
            Ok(ExitCode::SUCCESS)
        }
    }
}
