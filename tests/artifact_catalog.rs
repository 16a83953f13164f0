use std::path::{Path, PathBuf};

use report_pipeline::catalog::ArtifactCatalog;
use report_pipeline::config::PipelineConfig;
use report_pipeline::output::OutputFormat;
use report_pipeline::report::{ReportGenerator, ReportJob, RulesSource};

fn fixture(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures")
        .join(name)
}

fn generator(report_dir: &Path) -> ReportGenerator {
    ReportGenerator::new(PipelineConfig {
        report_dir: report_dir.to_path_buf(),
        chunk_size: 3,
        max_workers: 2,
        ..PipelineConfig::default()
    })
}

fn job(format: OutputFormat) -> ReportJob {
    ReportJob::new(
        fixture("input_sales.csv"),
        RulesSource::File(fixture("rules.toml")),
        format,
    )
}

#[test]
fn list_resolve_and_delete_generated_reports() {
    let dir = tempfile::tempdir().unwrap();
    let generator = generator(dir.path());

    let csv = generator.generate(&job(OutputFormat::Csv)).unwrap();
    let json = generator.generate(&job(OutputFormat::Json)).unwrap();
    assert_ne!(csv.artifact_id, json.artifact_id);

    let catalog = ArtifactCatalog::new(dir.path());
    let listed = catalog.list().unwrap();
    assert_eq!(listed.len(), 2);
    assert!(listed.windows(2).all(|w| w[0].created_at >= w[1].created_at));

    let csv_entry = listed.iter().find(|a| a.id == csv.artifact_id).unwrap();
    assert_eq!(csv_entry.format, OutputFormat::Csv);
    assert_eq!(csv_entry.path, csv.path);
    assert_eq!(
        csv_entry.size_bytes,
        std::fs::metadata(&csv.path).unwrap().len()
    );
    assert!(csv_entry.filename.starts_with("report_"));
    assert!(csv_entry.filename.ends_with(&format!("_{}.csv", csv.artifact_id)));

    assert_eq!(catalog.resolve(&json.artifact_id), Some(json.path.clone()));

    assert!(catalog.delete(&csv.artifact_id));
    assert!(!csv.path.exists());
    assert!(catalog.resolve(&csv.artifact_id).is_none());
    assert!(!catalog.delete(&csv.artifact_id));

    let remaining: Vec<String> = catalog.list().unwrap().into_iter().map(|a| a.id).collect();
    assert_eq!(remaining, vec![json.artifact_id]);
}

#[test]
fn unknown_ids_resolve_to_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let outcome = generator(dir.path()).generate(&job(OutputFormat::Csv)).unwrap();
    let catalog = ArtifactCatalog::new(dir.path());

    let suffix = &outcome.artifact_id[outcome.artifact_id.len() - 12..];
    assert!(catalog.resolve(suffix).is_none());
    assert!(catalog.resolve("../etc/passwd").is_none());
    assert!(catalog.resolve("").is_none());
    assert!(!catalog.delete("*"));
    assert_eq!(catalog.list().unwrap().len(), 1);
}

#[test]
fn temporary_files_are_not_listed() {
    let dir = tempfile::tempdir().unwrap();
    let catalog = ArtifactCatalog::new(dir.path());
    std::fs::write(
        dir.path().join("report_20240101_000000_abc.csv.tmp"),
        "partial",
    )
    .unwrap();
    std::fs::write(dir.path().join("notes.txt"), "x").unwrap();

    assert!(catalog.list().unwrap().is_empty());
}
