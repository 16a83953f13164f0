//! Serialization of result datasets into report artifacts.
//!
//! Every writer goes through a temporary sibling file that is renamed into place once complete,
//! so an artifact never appears under its final name half-written.

mod csv;
mod json;
mod xlsx;

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use crate::error::{PipelineError, PipelineResult};
use crate::types::DataSet;

/// Supported artifact formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputFormat {
    Csv,
    Xlsx,
    Json,
}

impl OutputFormat {
    pub const ALL: [OutputFormat; 3] = [Self::Csv, Self::Xlsx, Self::Json];

    /// File extension (without the dot); also the canonical name.
    pub fn extension(self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::Xlsx => "xlsx",
            Self::Json => "json",
        }
    }

    /// Match an extension exactly (artifact filenames are always lowercase).
    pub fn from_extension(ext: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.extension() == ext)
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for OutputFormat {
    type Err = PipelineError;

    /// Case-insensitive; anything other than `csv`, `xlsx` or `json` is
    /// [`PipelineError::UnsupportedFormat`].
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        Self::from_extension(&lower).ok_or_else(|| PipelineError::UnsupportedFormat {
            format: s.to_string(),
        })
    }
}

/// Write `data` to `path` in `format`, creating parent directories as needed.
///
/// Any failure is reported as [`PipelineError::Write`].
pub fn write(data: &DataSet, path: impl AsRef<Path>, format: OutputFormat) -> PipelineResult<()> {
    let path = path.as_ref();
    match format {
        OutputFormat::Csv => csv::write_csv(data, path),
        OutputFormat::Xlsx => xlsx::write_xlsx(data, path),
        OutputFormat::Json => json::write_json(data, path),
    }
    .map_err(|message| PipelineError::write(path, message))?;

    tracing::info!(
        path = %path.display(),
        %format,
        rows = data.row_count(),
        columns = data.schema.len(),
        "wrote artifact"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{write, OutputFormat};
    use crate::error::PipelineError;
    use crate::types::{DataSet, Schema, Value};

    fn report() -> DataSet {
        DataSet::new(
            Schema::new(["id", "name", "total", "ok"]),
            vec![
                vec![
                    Value::Int64(1),
                    Value::Utf8("Ada, L.".into()),
                    Value::Float64(10.0),
                    Value::Bool(true),
                ],
                vec![Value::Int64(2), Value::Null, Value::Float64(2.5), Value::Null],
            ],
        )
    }

    #[test]
    fn parses_formats_case_insensitively() {
        assert_eq!("CSV".parse::<OutputFormat>().unwrap(), OutputFormat::Csv);
        assert_eq!(" xlsx ".parse::<OutputFormat>().unwrap(), OutputFormat::Xlsx);
        let err = "parquet".parse::<OutputFormat>().unwrap_err();
        assert!(matches!(
            err,
            PipelineError::UnsupportedFormat { ref format } if format == "parquet"
        ));
    }

    #[test]
    fn csv_has_header_and_empty_nulls() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out/report.csv");
        write(&report(), &path, OutputFormat::Csv).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text, "id,name,total,ok\n1,\"Ada, L.\",10.0,true\n2,,2.5,\n");
    }

    #[test]
    fn json_is_an_array_of_ordered_objects() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.json");
        write(&report(), &path, OutputFormat::Json).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("[\n  {\n    \"id\": 1,\n    \"name\": \"Ada, L.\""));
        let parsed: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed[1]["name"], serde_json::Value::Null);
        assert_eq!(parsed[1]["total"], serde_json::json!(2.5));
    }

    #[test]
    fn empty_dataset_still_writes_a_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.csv");
        write(&DataSet::empty(Schema::new(["a", "b"])), &path, OutputFormat::Csv).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "a,b\n");
    }

    #[test]
    fn unwritable_destination_is_a_write_error() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, "x").unwrap();

        let err = write(&report(), blocker.join("report.csv"), OutputFormat::Csv).unwrap_err();
        assert!(matches!(err, PipelineError::Write { .. }));
    }
}
