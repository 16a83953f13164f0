//! CSV reading primitives shared by the chunked reader and the reference loader.

use std::fs::File;
use std::io;
use std::path::Path;

use crate::error::{PipelineError, PipelineResult, SourceKind};
use crate::types::{DataSet, Schema, Value};

/// Open a header-first CSV file.
///
/// A missing file is reported as [`PipelineError::NotFound`] tagged with `kind`.
pub fn open_reader(path: impl AsRef<Path>, kind: SourceKind) -> PipelineResult<csv::Reader<File>> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => PipelineError::NotFound {
            kind,
            path: path.to_path_buf(),
        },
        _ => PipelineError::Io(e),
    })?;
    Ok(csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(file))
}

/// Read the header row of `rdr` into a [`Schema`].
///
/// Fails with [`PipelineError::Schema`] if there is no header (empty input) or the header is not
/// valid UTF-8. Repeated names are disambiguated as `name.1`, `name.2`, ...
pub fn read_header<R: io::Read>(
    rdr: &mut csv::Reader<R>,
    kind: SourceKind,
) -> PipelineResult<Schema> {
    let headers = rdr.headers().map_err(|e| match e.kind() {
        csv::ErrorKind::Io(_) => PipelineError::Csv(e),
        _ => PipelineError::schema(format!("{kind} header is not parseable: {e}")),
    })?;

    if headers.is_empty() || headers.iter().all(|h| h.trim().is_empty()) {
        return Err(PipelineError::schema(format!(
            "{kind} dataset is empty (no header row)"
        )));
    }

    let mut columns: Vec<String> = Vec::with_capacity(headers.len());
    for h in headers.iter() {
        let mut name = h.to_owned();
        let mut n = 0;
        while columns.contains(&name) {
            n += 1;
            name = format!("{h}.{n}");
        }
        columns.push(name);
    }
    Ok(Schema { columns })
}

/// Convert one CSV record into a row of `width` values.
///
/// Short records are padded with nulls; records with more fields than the header are rejected.
/// `line` is the 1-based line number used in the error message.
pub fn record_to_row(
    record: &csv::StringRecord,
    width: usize,
    line: u64,
) -> PipelineResult<Vec<Value>> {
    if record.len() > width {
        return Err(PipelineError::schema(format!(
            "line {line}: expected {width} fields, found {}",
            record.len()
        )));
    }
    let mut row: Vec<Value> = Vec::with_capacity(width);
    row.extend(record.iter().map(Value::infer));
    row.resize(width, Value::Null);
    Ok(row)
}

/// Read the column names of a CSV file without reading its rows.
pub fn read_columns(path: impl AsRef<Path>, kind: SourceKind) -> PipelineResult<Schema> {
    let mut rdr = open_reader(path, kind)?;
    read_header(&mut rdr, kind)
}

/// Check that a CSV file exists, has a header, and contains every `required` column.
///
/// Returns the file's schema on success.
pub fn validate_csv(
    path: impl AsRef<Path>,
    kind: SourceKind,
    required: &[&str],
) -> PipelineResult<Schema> {
    let schema = read_columns(path, kind)?;
    let missing: Vec<&str> = required
        .iter()
        .copied()
        .filter(|c| !schema.contains(c))
        .collect();
    if !missing.is_empty() {
        return Err(PipelineError::schema(format!(
            "{kind} dataset is missing required columns: {}",
            missing.join(", ")
        )));
    }
    Ok(schema)
}

/// Read at most `limit` rows of a CSV file.
pub fn sample_rows(
    path: impl AsRef<Path>,
    kind: SourceKind,
    limit: usize,
) -> PipelineResult<DataSet> {
    let mut rdr = open_reader(path, kind)?;
    read_rows(&mut rdr, kind, Some(limit))
}

/// Read a whole CSV file into memory.
pub fn read_dataset(path: impl AsRef<Path>, kind: SourceKind) -> PipelineResult<DataSet> {
    let mut rdr = open_reader(path, kind)?;
    read_rows(&mut rdr, kind, None)
}

/// Read a CSV dataset from an existing reader (header included).
pub fn read_rows<R: io::Read>(
    rdr: &mut csv::Reader<R>,
    kind: SourceKind,
    limit: Option<usize>,
) -> PipelineResult<DataSet> {
    let schema = read_header(rdr, kind)?;
    let width = schema.len();

    let mut rows: Vec<Vec<Value>> = Vec::new();
    let mut record = csv::StringRecord::new();
    while limit.is_none_or(|l| rows.len() < l) {
        if !rdr.read_record(&mut record)? {
            break;
        }
        let line = record.position().map(|p| p.line()).unwrap_or(0);
        rows.push(record_to_row(&record, width, line)?);
    }

    Ok(DataSet::new(schema, rows))
}

#[cfg(test)]
mod tests {
    use super::{read_header, read_rows, record_to_row};
    use crate::error::{PipelineError, SourceKind};
    use crate::types::{Schema, Value};

    fn reader(input: &str) -> csv::Reader<&[u8]> {
        csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(input.as_bytes())
    }

    #[test]
    fn header_defines_schema() {
        let mut rdr = reader("id,name,score\n1,Ada,98.5\n");
        let schema = read_header(&mut rdr, SourceKind::Input).unwrap();
        assert_eq!(schema, Schema::new(["id", "name", "score"]));
    }

    #[test]
    fn empty_input_is_a_schema_error() {
        let mut rdr = reader("");
        let err = read_header(&mut rdr, SourceKind::Input).unwrap_err();
        assert!(matches!(err, PipelineError::Schema { .. }));
        assert!(err.to_string().contains("input dataset is empty"));
    }

    #[test]
    fn duplicate_headers_are_disambiguated() {
        let mut rdr = reader("a,b,a,a\n");
        let schema = read_header(&mut rdr, SourceKind::Input).unwrap();
        assert_eq!(schema, Schema::new(["a", "b", "a.1", "a.2"]));
    }

    #[test]
    fn short_records_are_padded_and_long_records_rejected() {
        let rec = csv::StringRecord::from(vec!["1"]);
        assert_eq!(
            record_to_row(&rec, 3, 2).unwrap(),
            vec![Value::Int64(1), Value::Null, Value::Null]
        );

        let rec = csv::StringRecord::from(vec!["1", "2", "3"]);
        let err = record_to_row(&rec, 2, 5).unwrap_err();
        assert!(err.to_string().contains("line 5"));
    }

    #[test]
    fn read_rows_respects_limit() {
        let mut rdr = reader("id\n1\n2\n3\n");
        let ds = read_rows(&mut rdr, SourceKind::Input, Some(2)).unwrap();
        assert_eq!(ds.rows, vec![vec![Value::Int64(1)], vec![Value::Int64(2)]]);
    }
}
