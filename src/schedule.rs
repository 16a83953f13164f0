//! Persisted definitions of scheduled report jobs.
//!
//! Only the registry lives here: firing jobs on their cron schedule is left to the host
//! scheduler, which turns a [`ScheduledJob`] into a [`ReportJob`] when it triggers.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::atomic::write_bytes_atomic;
use crate::config::PipelineConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::ingestion::JoinSpec;
use crate::output::OutputFormat;
use crate::report::{ReportJob, RulesSource};

/// File name of the registry inside the rules directory.
pub const SCHEDULES_FILE: &str = "schedules.json";

fn default_output_format() -> String {
    OutputFormat::Csv.to_string()
}

/// A report job fired on a cron schedule.
///
/// File names are relative: inputs and references to the upload directory, rules to the rules
/// directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledJob {
    /// Standard 5-field crontab expression.
    pub cron: String,
    pub input_file: String,
    pub rules_file: String,
    #[serde(default)]
    pub reference_file: Option<String>,
    #[serde(default)]
    pub join_keys: Option<JoinSpec>,
    #[serde(default = "default_output_format")]
    pub output_format: String,
}

impl ScheduledJob {
    pub fn new(
        cron: impl Into<String>,
        input_file: impl Into<String>,
        rules_file: impl Into<String>,
    ) -> Self {
        Self {
            cron: cron.into(),
            input_file: input_file.into(),
            rules_file: rules_file.into(),
            reference_file: None,
            join_keys: None,
            output_format: default_output_format(),
        }
    }

    pub fn validate(&self) -> PipelineResult<()> {
        validate_cron(&self.cron)?;
        self.output_format.parse::<OutputFormat>()?;
        Ok(())
    }

    /// Resolve file names against `config` into a runnable job.
    pub fn to_report_job(&self, config: &PipelineConfig) -> PipelineResult<ReportJob> {
        let format: OutputFormat = self.output_format.parse()?;
        let mut job = ReportJob::new(
            config.upload_dir.join(&self.input_file),
            RulesSource::File(config.rules_dir.join(&self.rules_file)),
            format,
        );
        if let Some(reference) = &self.reference_file {
            job = job.with_reference(
                config.upload_dir.join(reference),
                self.join_keys.clone().unwrap_or_default(),
            );
        }
        Ok(job)
    }
}

/// Scheduled jobs keyed by job id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScheduleRegistry {
    jobs: BTreeMap<String, ScheduledJob>,
}

impl ScheduleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Default registry location for `config`.
    pub fn default_path(config: &PipelineConfig) -> PathBuf {
        config.rules_dir.join(SCHEDULES_FILE)
    }

    /// Load a registry; a missing file is an empty registry.
    ///
    /// Entries that fail validation are logged and skipped.
    pub fn load(path: impl AsRef<Path>) -> PipelineResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)?;
        let parsed: BTreeMap<String, ScheduledJob> = serde_json::from_str(&raw)?;

        let mut registry = Self::default();
        for (id, job) in parsed {
            if let Err(err) = registry.add(id.clone(), job) {
                tracing::error!(job = %id, error = %err, "skipping invalid scheduled job");
            }
        }
        tracing::info!(path = %path.display(), jobs = registry.len(), "loaded schedules");
        Ok(registry)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> PipelineResult<()> {
        let path = path.as_ref();
        let mut body = serde_json::to_string_pretty(self)?;
        body.push('\n');
        write_bytes_atomic(path, body.as_bytes())?;
        tracing::info!(path = %path.display(), jobs = self.len(), "saved schedules");
        Ok(())
    }

    /// Add or replace the job `job_id`, returning the job it replaced.
    pub fn add(
        &mut self,
        job_id: impl Into<String>,
        job: ScheduledJob,
    ) -> PipelineResult<Option<ScheduledJob>> {
        let job_id = job_id.into();
        if job_id.trim().is_empty() {
            return Err(PipelineError::config("job id must not be empty"));
        }
        job.validate()?;
        tracing::debug!(job = %job_id, cron = %job.cron, "scheduled job registered");
        Ok(self.jobs.insert(job_id, job))
    }

    pub fn remove(&mut self, job_id: &str) -> Option<ScheduledJob> {
        self.jobs.remove(job_id)
    }

    pub fn get(&self, job_id: &str) -> Option<&ScheduledJob> {
        self.jobs.get(job_id)
    }

    /// Jobs ordered by id.
    pub fn list(&self) -> impl Iterator<Item = (&str, &ScheduledJob)> {
        self.jobs.iter().map(|(id, job)| (id.as_str(), job))
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

const MONTHS: [&str; 12] = [
    "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
];
const WEEKDAYS: [&str; 7] = ["sun", "mon", "tue", "wed", "thu", "fri", "sat"];

struct CronField {
    name: &'static str,
    min: u32,
    max: u32,
    names: &'static [&'static str],
}

const CRON_FIELDS: [CronField; 5] = [
    CronField { name: "minute", min: 0, max: 59, names: &[] },
    CronField { name: "hour", min: 0, max: 23, names: &[] },
    CronField { name: "day of month", min: 1, max: 31, names: &[] },
    CronField { name: "month", min: 1, max: 12, names: &MONTHS },
    CronField { name: "day of week", min: 0, max: 7, names: &WEEKDAYS },
];

/// Check a 5-field crontab expression (`minute hour day-of-month month day-of-week`).
///
/// Each field is a comma list of `*`, `N` or `N-M`, optionally followed by `/step`. Months and
/// weekdays also accept three-letter names.
pub fn validate_cron(expr: &str) -> PipelineResult<()> {
    let fields: Vec<&str> = expr.split_whitespace().collect();
    if fields.len() != CRON_FIELDS.len() {
        return Err(PipelineError::config(format!(
            "cron expression '{expr}' must have 5 fields, found {}",
            fields.len()
        )));
    }
    for (raw, field) in fields.iter().zip(CRON_FIELDS.iter()) {
        for part in raw.split(',') {
            if !valid_cron_part(part, field) {
                return Err(PipelineError::config(format!(
                    "invalid {} field '{raw}' in cron expression '{expr}'",
                    field.name
                )));
            }
        }
    }
    Ok(())
}

fn valid_cron_part(part: &str, field: &CronField) -> bool {
    let (range, step) = match part.split_once('/') {
        Some((range, step)) => (range, Some(step)),
        None => (part, None),
    };
    if let Some(step) = step {
        if !step.parse::<u32>().is_ok_and(|s| s > 0) {
            return false;
        }
    }
    if range == "*" {
        return true;
    }
    match range.split_once('-') {
        Some((lo, hi)) => match (cron_value(lo, field), cron_value(hi, field)) {
            (Some(lo), Some(hi)) => lo <= hi,
            _ => false,
        },
        None => cron_value(range, field).is_some(),
    }
}

fn cron_value(token: &str, field: &CronField) -> Option<u32> {
    if let Ok(n) = token.parse::<u32>() {
        return (field.min..=field.max).contains(&n).then_some(n);
    }
    let lower = token.to_ascii_lowercase();
    let pos = field.names.iter().position(|n| *n == lower)? as u32;
    // Names are 1-based for months, 0-based for weekdays.
    Some(pos + field.min.min(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_common_cron_expressions() {
        for expr in [
            "* * * * *",
            "0 6 * * *",
            "*/15 0-23/2 1,15 jan-jun mon-fri",
            "30 4 1 * 0",
            "0 0 * * 7",
        ] {
            assert!(validate_cron(expr).is_ok(), "{expr}");
        }
    }

    #[test]
    fn rejects_bad_cron_expressions() {
        for expr in [
            "",
            "* * * *",
            "0 0 * * * *",
            "60 * * * *",
            "* 24 * * *",
            "* * 0 * *",
            "* * * 13 *",
            "*/0 * * * *",
            "5-1 * * * *",
            "* * * foo *",
        ] {
            assert!(validate_cron(expr).is_err(), "{expr:?}");
        }
    }

    #[test]
    fn add_validates_and_replaces() {
        let mut registry = ScheduleRegistry::new();
        assert!(registry
            .add("daily", ScheduledJob::new("0 6 * * *", "sales.csv", "rules.json"))
            .unwrap()
            .is_none());

        let mut bad = ScheduledJob::new("0 6 * * *", "sales.csv", "rules.json");
        bad.output_format = "pdf".into();
        assert!(matches!(
            registry.add("bad", bad),
            Err(PipelineError::UnsupportedFormat { .. })
        ));
        assert!(registry.add("", ScheduledJob::new("* * * * *", "a", "b")).is_err());

        let replaced = registry
            .add("daily", ScheduledJob::new("0 7 * * *", "sales.csv", "rules.json"))
            .unwrap();
        assert_eq!(replaced.unwrap().cron, "0 6 * * *");
        assert_eq!(registry.len(), 1);
        assert!(registry.remove("daily").is_some());
        assert!(registry.is_empty());
    }

    #[test]
    fn persists_as_a_json_object() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rules").join(SCHEDULES_FILE);

        let mut job = ScheduledJob::new("0 6 * * 1", "sales.csv", "rules.toml");
        job.reference_file = Some("products.csv".into());
        job.join_keys = Some(JoinSpec::new().on("product_id", "product_id"));
        job.output_format = "xlsx".into();

        let mut registry = ScheduleRegistry::new();
        registry.add("weekly", job).unwrap();
        registry.save(&path).unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["weekly"]["join_keys"]["product_id"], "product_id");
        assert_eq!(raw["weekly"]["output_format"], "xlsx");

        assert_eq!(ScheduleRegistry::load(&path).unwrap(), registry);
    }

    #[test]
    fn load_tolerates_nulls_and_skips_invalid_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(SCHEDULES_FILE);
        std::fs::write(
            &path,
            r#"{
  "ok": {"cron": "0 1 * * *", "input_file": "a.csv", "rules_file": "r.json",
         "reference_file": null, "join_keys": null},
  "broken": {"cron": "every day", "input_file": "a.csv", "rules_file": "r.json"}
}"#,
        )
        .unwrap();

        let registry = ScheduleRegistry::load(&path).unwrap();
        let ids: Vec<&str> = registry.list().map(|(id, _)| id).collect();
        assert_eq!(ids, vec!["ok"]);
        assert_eq!(registry.get("ok").unwrap().output_format, "csv");

        assert!(ScheduleRegistry::load(dir.path().join("missing.json")).unwrap().is_empty());
    }

    #[test]
    fn resolves_paths_against_config() {
        let config = PipelineConfig::default();
        let mut job = ScheduledJob::new("0 6 * * *", "sales.csv", "margin.json");
        job.reference_file = Some("products.csv".into());

        let report = job.to_report_job(&config).unwrap();
        assert_eq!(report.input, PathBuf::from("data/uploads/sales.csv"));
        assert_eq!(report.reference, Some(PathBuf::from("data/uploads/products.csv")));
        assert!(report.join.is_empty());
        assert!(matches!(
            report.rules,
            RulesSource::File(ref p) if p == Path::new("data/rules/margin.json")
        ));
        assert_eq!(report.format, OutputFormat::Csv);
    }
}
