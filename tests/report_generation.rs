use std::path::{Path, PathBuf};

use calamine::{open_workbook_auto, Data, Reader};
use report_pipeline::config::PipelineConfig;
use report_pipeline::ingestion::{read_dataset, JoinSpec};
use report_pipeline::output::OutputFormat;
use report_pipeline::report::{ReportGenerator, ReportJob, RulesSource};
use report_pipeline::rules::RuleSet;
use report_pipeline::schedule::{ScheduleRegistry, ScheduledJob};
use report_pipeline::types::{DataSet, Value};
use report_pipeline::{PipelineError, SourceKind};

fn fixtures() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures")
}

fn fixture(name: &str) -> PathBuf {
    fixtures().join(name)
}

fn config(report_dir: &Path) -> PipelineConfig {
    PipelineConfig {
        report_dir: report_dir.to_path_buf(),
        chunk_size: 4,
        max_workers: 2,
        max_in_flight_chunks: Some(2),
        ..PipelineConfig::default()
    }
}

fn sales_job(format: OutputFormat) -> ReportJob {
    ReportJob::new(
        fixture("input_sales.csv"),
        RulesSource::File(fixture("rules.json")),
        format,
    )
    .with_reference(
        fixture("reference_products.csv"),
        JoinSpec::new().on("product_id", "product_id"),
    )
}

/// Rows sorted by `order_id`; chunks complete in any order.
fn sorted_by_order(mut data: DataSet) -> DataSet {
    let idx = data.schema.index_of("order_id").unwrap();
    data.rows.sort_by_key(|row| match row[idx] {
        Value::Int64(v) => v,
        _ => i64::MAX,
    });
    data
}

fn cell<'a>(data: &'a DataSet, row: usize, column: &str) -> &'a Value {
    &data.rows[row][data.schema.index_of(column).unwrap()]
}

fn approx(value: &Value, expected: f64) {
    let actual = value.as_f64().unwrap_or(f64::NAN);
    assert!((actual - expected).abs() < 1e-9, "{value:?} != {expected}");
}

#[test]
fn joins_reference_and_computes_margin_across_chunks() {
    let dir = tempfile::tempdir().unwrap();
    let outcome = ReportGenerator::new(config(dir.path()))
        .generate(&sales_job(OutputFormat::Csv))
        .unwrap();

    assert_eq!(outcome.rows, 10);
    assert_eq!(outcome.stats.chunks_total, 3);
    assert_eq!(outcome.stats.chunks_succeeded, 3);
    assert_eq!(outcome.stats.rows_in, 10);
    assert!(outcome.failed_chunks().is_empty());

    let data = sorted_by_order(read_dataset(&outcome.path, SourceKind::Input).unwrap());
    assert_eq!(
        data.schema.columns,
        vec![
            "order_id",
            "product_id",
            "quantity",
            "unit_price",
            "customer_id",
            "order_date",
            "region",
            "product_name",
            "category",
            "cost_price",
            "supplier_id",
            "weight_kg",
            "stock_level",
            "total",
            "margin",
            "margin_pct",
            "in_stock",
        ]
    );

    // 1001: P1, 2 x 19.99, cost 12.50
    assert_eq!(cell(&data, 0, "product_name"), &Value::Utf8("Widget".into()));
    approx(cell(&data, 0, "total"), 2.0 * 19.99);
    approx(cell(&data, 0, "margin"), 19.99 - 12.5);
    approx(cell(&data, 0, "margin_pct"), 37.5);
    assert_eq!(cell(&data, 0, "in_stock"), &Value::Bool(true));

    // 1005: P4 is out of stock
    assert_eq!(cell(&data, 4, "in_stock"), &Value::Bool(false));

    // 1007: P5 has no reference row
    assert_eq!(cell(&data, 6, "product_id"), &Value::Utf8("P5".into()));
    assert_eq!(cell(&data, 6, "product_name"), &Value::Null);
    assert_eq!(cell(&data, 6, "margin"), &Value::Null);
    assert_eq!(cell(&data, 6, "in_stock"), &Value::Null);
    approx(cell(&data, 6, "total"), 99.0);
}

#[test]
fn failing_rule_only_nulls_its_own_column() {
    let dir = tempfile::tempdir().unwrap();
    let rules: RuleSet = [
        ("total", "quantity * unit_price"),
        ("discounted", "unit_price * discount"),
    ]
    .into_iter()
    .collect();
    let job = ReportJob::new(fixture("input_sales.csv"), rules, OutputFormat::Csv);

    let outcome = ReportGenerator::new(config(dir.path())).generate(&job).unwrap();
    let data = sorted_by_order(read_dataset(&outcome.path, SourceKind::Input).unwrap());

    assert_eq!(data.row_count(), 10);
    assert!(data.column("discounted").unwrap().iter().all(Value::is_null));
    approx(cell(&data, 2, "total"), 48.0);
}

#[test]
fn xlsx_artifact_reads_back() {
    let dir = tempfile::tempdir().unwrap();
    let outcome = ReportGenerator::new(config(dir.path()))
        .generate(&sales_job(OutputFormat::Xlsx))
        .unwrap();
    assert_eq!(outcome.path.extension().unwrap(), "xlsx");

    let mut workbook = open_workbook_auto(&outcome.path).unwrap();
    let range = workbook.worksheet_range("Sheet1").unwrap();
    assert_eq!(range.height(), 11);

    let mut rows = range.rows();
    let header = rows.next().unwrap();
    assert_eq!(header[0], Data::String("order_id".into()));
    assert_eq!(header[16], Data::String("in_stock".into()));

    let mut order_ids: Vec<f64> = rows
        .map(|row| match &row[0] {
            Data::Float(v) => *v,
            Data::Int(v) => *v as f64,
            other => panic!("unexpected order_id cell {other:?}"),
        })
        .collect();
    order_ids.sort_by(|a, b| a.partial_cmp(b).unwrap());
    assert_eq!(order_ids.first(), Some(&1001.0));
    assert_eq!(order_ids.last(), Some(&1010.0));
    assert_eq!(order_ids.len(), 10);
}

#[test]
fn json_artifact_is_an_array_of_row_objects() {
    let dir = tempfile::tempdir().unwrap();
    let outcome = ReportGenerator::new(config(dir.path()))
        .generate(&sales_job(OutputFormat::Json))
        .unwrap();

    let raw = std::fs::read_to_string(&outcome.path).unwrap();
    assert!(raw.starts_with("[\n  {"));
    let rows: Vec<serde_json::Value> = serde_json::from_str(&raw).unwrap();
    assert_eq!(rows.len(), 10);

    let unmatched = rows.iter().find(|r| r["order_id"] == 1007).unwrap();
    assert!(unmatched["margin"].is_null());
    assert!(unmatched["product_name"].is_null());
    assert_eq!(unmatched["region"], "East");
}

#[test]
fn missing_reference_key_is_rejected_before_processing() {
    let dir = tempfile::tempdir().unwrap();
    let generator = ReportGenerator::new(config(dir.path()));
    let job = ReportJob::new(
        fixture("input_sales.csv"),
        RulesSource::File(fixture("rules.json")),
        OutputFormat::Csv,
    )
    .with_reference(
        fixture("reference_products.csv"),
        JoinSpec::new().on("product_id", "sku"),
    );

    let err = generator.generate(&job).unwrap_err();
    assert!(matches!(err, PipelineError::Configuration { .. }), "{err}");
    assert!(err.is_validation());
    assert!(generator.catalog().list().unwrap().is_empty());
}

#[test]
fn unsupported_output_format() {
    let err = "pdf".parse::<OutputFormat>().unwrap_err();
    assert!(matches!(err, PipelineError::UnsupportedFormat { ref format } if format == "pdf"));
    assert_eq!(" XLSX ".parse::<OutputFormat>().unwrap(), OutputFormat::Xlsx);
}

#[test]
fn scheduled_job_runs_against_configured_directories() {
    let dir = tempfile::tempdir().unwrap();
    let config = PipelineConfig {
        upload_dir: fixtures(),
        rules_dir: fixtures(),
        ..config(dir.path())
    };

    let mut job = ScheduledJob::new("0 6 * * mon-fri", "input_sales.csv", "rules.toml");
    job.reference_file = Some("reference_products.csv".into());
    job.join_keys = Some(JoinSpec::new().on("product_id", "product_id"));
    job.output_format = "json".into();

    let mut registry = ScheduleRegistry::new();
    registry.add("weekday-sales", job).unwrap();
    let registry_path = dir.path().join("schedules.json");
    registry.save(&registry_path).unwrap();

    let loaded = ScheduleRegistry::load(&registry_path).unwrap();
    let report_job = loaded
        .get("weekday-sales")
        .unwrap()
        .to_report_job(&config)
        .unwrap();
    let outcome = ReportGenerator::new(config).generate(&report_job).unwrap();

    assert_eq!(outcome.rows, 10);
    assert_eq!(outcome.path.extension().unwrap(), "json");
}
