//! Lazy, chunked reading of a CSV input with an optional reference join.

use std::fs::File;
use std::io;
use std::path::Path;

use crate::error::{PipelineError, PipelineResult, SourceKind};
use crate::types::{DataChunk, DataSet, Schema};

use super::csv::{open_reader, read_header, record_to_row};
use super::join::{JoinPlan, JoinSpec, ReferenceTable};

/// Upper bound on the rows reserved up front for one chunk; larger chunks grow as they fill.
const PREALLOCATED_ROWS: usize = 8_192;

/// Open `input` as a stream of chunks of at most `chunk_size` rows.
///
/// When both `reference` and a non-empty `join` are given, the reference file is loaded once and
/// every chunk is left-joined against it. All validation (missing files, empty header, missing
/// reference key columns) happens here, before the first chunk is produced.
pub fn stream(
    input: impl AsRef<Path>,
    chunk_size: usize,
    reference: Option<&Path>,
    join: Option<&JoinSpec>,
) -> PipelineResult<ChunkReader> {
    let reader = ChunkReader::new(open_reader(input, SourceKind::Input)?, chunk_size)?;

    match (reference, join) {
        (Some(path), Some(spec)) if !spec.is_empty() => {
            Ok(reader.with_reference(ReferenceTable::load(path, spec)?))
        }
        (Some(path), _) => {
            tracing::warn!(
                reference = %path.display(),
                "reference file given without join keys; input is not joined"
            );
            Ok(reader)
        }
        _ => Ok(reader),
    }
}

struct JoinState {
    table: ReferenceTable,
    plan: Option<JoinPlan>,
}

/// Forward-only iterator of [`DataChunk`]s read from a CSV source.
///
/// Each item is either a chunk or the error that made that chunk unreadable (for example a
/// record with more fields than the header); the stream continues with the next chunk after a
/// chunk-level error and stops after an I/O error.
pub struct ChunkReader<R = File> {
    rdr: csv::Reader<R>,
    schema: Schema,
    chunk_size: usize,
    join: Option<JoinState>,
    record: csv::StringRecord,
    chunks_read: usize,
    warnings: Vec<String>,
    done: bool,
}

impl<R: io::Read> ChunkReader<R> {
    /// Wrap an open CSV reader (positioned before the header) and read the header.
    pub fn new(mut rdr: csv::Reader<R>, chunk_size: usize) -> PipelineResult<Self> {
        if chunk_size == 0 {
            return Err(PipelineError::config("chunk_size must be > 0"));
        }
        let schema = read_header(&mut rdr, SourceKind::Input)?;

        Ok(Self {
            rdr,
            schema,
            chunk_size,
            join: None,
            record: csv::StringRecord::new(),
            chunks_read: 0,
            warnings: Vec::new(),
            done: false,
        })
    }

    /// Left-join every chunk against `table`.
    pub fn with_reference(mut self, table: ReferenceTable) -> Self {
        let plan = table.plan(&self.schema);
        self.join = Some(JoinState { table, plan });
        self
    }

    /// Schema of the input file (before joining).
    pub fn input_schema(&self) -> &Schema {
        &self.schema
    }

    /// Schema of the chunks this reader yields.
    pub fn output_schema(&self) -> &Schema {
        match &self.join {
            Some(JoinState { plan: Some(plan), .. }) => plan.output_schema(),
            _ => &self.schema,
        }
    }

    /// Number of chunks produced so far (including failed ones).
    pub fn chunks_read(&self) -> usize {
        self.chunks_read
    }

    /// Warnings recorded while streaming (e.g. chunks passed through unjoined).
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    fn join_chunk(&mut self, index: usize, chunk: DataChunk) -> DataChunk {
        let Some(state) = &self.join else {
            return chunk;
        };
        match &state.plan {
            Some(plan) => state.table.join_chunk(plan, chunk),
            None => {
                let missing = state.table.missing_input_columns(&chunk.schema);
                tracing::warn!(
                    chunk = index,
                    missing = ?missing,
                    "chunk is missing join columns; passing it through unjoined"
                );
                self.warnings.push(format!(
                    "chunk {index}: missing join columns {missing:?}; passed through unjoined"
                ));
                chunk
            }
        }
    }
}

impl<R: io::Read> Iterator for ChunkReader<R> {
    type Item = PipelineResult<DataChunk>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let width = self.schema.len();
        let mut rows = Vec::with_capacity(self.chunk_size.min(PREALLOCATED_ROWS));
        let mut failure: Option<PipelineError> = None;
        let mut consumed = 0usize;

        while consumed < self.chunk_size {
            match self.rdr.read_record(&mut self.record) {
                Ok(false) => {
                    self.done = true;
                    break;
                }
                Ok(true) => {
                    consumed += 1;
                    if failure.is_some() {
                        continue;
                    }
                    let line = self.record.position().map(|p| p.line()).unwrap_or(0);
                    match record_to_row(&self.record, width, line) {
                        Ok(row) => rows.push(row),
                        Err(e) => failure = Some(e),
                    }
                }
                Err(e) => {
                    if matches!(e.kind(), csv::ErrorKind::Io(_)) {
                        self.done = true;
                        self.chunks_read += 1;
                        return Some(Err(e.into()));
                    }
                    consumed += 1;
                    failure.get_or_insert(e.into());
                }
            }
        }

        if consumed == 0 {
            return None;
        }

        let index = self.chunks_read;
        self.chunks_read += 1;

        if let Some(err) = failure {
            tracing::warn!(chunk = index, error = %err, "chunk could not be read");
            return Some(Err(err));
        }

        let chunk = DataSet::new(self.schema.clone(), rows);
        Some(Ok(self.join_chunk(index, chunk)))
    }
}

#[cfg(test)]
mod tests {
    use super::ChunkReader;
    use crate::error::PipelineError;
    use crate::ingestion::join::{JoinSpec, ReferenceTable};
    use crate::types::{DataSet, Schema, Value};

    fn reader(input: &str) -> csv::Reader<&[u8]> {
        csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(input.as_bytes())
    }

    #[test]
    fn splits_rows_into_bounded_chunks() {
        let input = "id\n1\n2\n3\n4\n5\n";
        let chunks: Vec<DataSet> = ChunkReader::new(reader(input), 2)
            .unwrap()
            .map(Result::unwrap)
            .collect();

        let sizes: Vec<usize> = chunks.iter().map(DataSet::row_count).collect();
        assert_eq!(sizes, vec![2, 2, 1]);
        assert_eq!(chunks[2].rows, vec![vec![Value::Int64(5)]]);
    }

    #[test]
    fn huge_chunk_size_reads_a_small_file_in_one_chunk() {
        let mut rdr = ChunkReader::new(reader("a\n1\n2\n"), usize::MAX / 64).unwrap();

        let chunk = rdr.next().unwrap().unwrap();
        assert_eq!(chunk.rows, vec![vec![Value::Int64(1)], vec![Value::Int64(2)]]);
        assert!(rdr.next().is_none());
        assert_eq!(rdr.chunks_read(), 1);
    }

    #[test]
    fn header_only_input_yields_no_chunks() {
        let mut rdr = ChunkReader::new(reader("id,name\n"), 10).unwrap();
        assert_eq!(rdr.input_schema(), &Schema::new(["id", "name"]));
        assert!(rdr.next().is_none());
    }

    #[test]
    fn zero_chunk_size_is_rejected() {
        let err = ChunkReader::new(reader("id\n1\n"), 0).err().unwrap();
        assert!(matches!(err, PipelineError::Configuration { .. }));
    }

    #[test]
    fn bad_record_fails_only_its_chunk() {
        let input = "a,b\n1,2\n3,4,5\n6,7\n8,9\n";
        let items: Vec<_> = ChunkReader::new(reader(input), 2)
            .unwrap()
            .collect();

        assert_eq!(items.len(), 2);
        assert!(items[0].is_err());
        let second = items[1].as_ref().unwrap();
        assert_eq!(second.row_count(), 2);
    }

    #[test]
    fn chunks_are_joined_against_the_reference() {
        let reference = DataSet::new(
            Schema::new(["k", "v"]),
            vec![vec![Value::Int64(1), Value::Utf8("one".to_string())]],
        );
        let table = ReferenceTable::from_dataset(reference, &JoinSpec::new().on("k", "k")).unwrap();
        let rdr = ChunkReader::new(reader("k\n1\n2\n"), 10).unwrap().with_reference(table);
        assert_eq!(rdr.output_schema(), &Schema::new(["k", "v"]));

        let chunks: Vec<DataSet> = rdr.map(Result::unwrap).collect();
        assert_eq!(
            chunks[0].rows,
            vec![
                vec![Value::Int64(1), Value::Utf8("one".to_string())],
                vec![Value::Int64(2), Value::Null],
            ]
        );
    }

    #[test]
    fn chunks_missing_join_columns_pass_through_with_a_warning() {
        let reference = DataSet::new(Schema::new(["k", "v"]), vec![]);
        let table = ReferenceTable::from_dataset(reference, &JoinSpec::new().on("k", "k")).unwrap();
        let mut rdr = ChunkReader::new(reader("other\n1\n"), 10).unwrap().with_reference(table);

        let chunk = rdr.next().unwrap().unwrap();
        assert_eq!(chunk.schema, Schema::new(["other"]));
        assert_eq!(chunk.rows, vec![vec![Value::Int64(1)]]);
        assert_eq!(rdr.warnings().len(), 1);
        assert!(rdr.warnings()[0].contains("passed through unjoined"));
    }
}
