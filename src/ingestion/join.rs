//! Left outer equi-join of input chunks against an in-memory reference dataset.
//!
//! The reference table is loaded once and indexed by its composite key. Each input chunk is
//! joined independently: every input row appears once per matching reference row, or once with
//! null reference columns when nothing matches.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{PipelineError, PipelineResult, SourceKind};
use crate::ordered::{deserialize_pairs, serialize_pairs};
use crate::types::{DataChunk, DataSet, Schema, Value};

use super::csv::read_dataset;

/// Ordered list of `(input_column, reference_column)` pairs forming a composite join key.
///
/// Serialized as a map `input_column → reference_column`; entry order is preserved.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JoinSpec {
    pairs: Vec<(String, String)>,
}

impl JoinSpec {
    /// An empty spec (no join).
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style: append a key pair.
    pub fn on(
        mut self,
        input_column: impl Into<String>,
        reference_column: impl Into<String>,
    ) -> Self {
        self.push(input_column, reference_column);
        self
    }

    /// Append a key pair.
    pub fn push(&mut self, input_column: impl Into<String>, reference_column: impl Into<String>) {
        self.pairs.push((input_column.into(), reference_column.into()));
    }

    /// Build a spec from key pairs, in order.
    pub fn from_pairs<I, A, B>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (A, B)>,
        A: Into<String>,
        B: Into<String>,
    {
        Self {
            pairs: pairs.into_iter().map(|(a, b)| (a.into(), b.into())).collect(),
        }
    }

    /// Join on every column name the two schemas share, in `input` order.
    pub fn from_common_columns(input: &Schema, reference: &Schema) -> Self {
        let pairs = input
            .field_names()
            .filter(|c| reference.contains(c))
            .map(|c| (c.to_owned(), c.to_owned()))
            .collect();
        Self { pairs }
    }

    /// The key pairs, in order.
    pub fn pairs(&self) -> &[(String, String)] {
        &self.pairs
    }

    /// True if there is nothing to join on.
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Input-side key columns, in order.
    pub fn input_columns(&self) -> impl Iterator<Item = &str> {
        self.pairs.iter().map(|(i, _)| i.as_str())
    }

    /// Reference-side key columns, in order.
    pub fn reference_columns(&self) -> impl Iterator<Item = &str> {
        self.pairs.iter().map(|(_, r)| r.as_str())
    }
}

impl Serialize for JoinSpec {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serialize_pairs(&self.pairs, serializer)
    }
}

impl<'de> Deserialize<'de> for JoinSpec {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(Self {
            pairs: deserialize_pairs(deserializer)?,
        })
    }
}

/// Hashable normalisation of a key cell. Integral floats compare equal to integers.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum KeyPart {
    Int(i64),
    Float(u64),
    Bool(bool),
    Str(String),
}

fn key_part(v: &Value) -> Option<KeyPart> {
    match v {
        Value::Null => None,
        Value::Int64(i) => Some(KeyPart::Int(*i)),
        Value::Float64(f) if f.is_nan() => None,
        Value::Float64(f) if f.fract() == 0.0 && *f >= i64::MIN as f64 && *f <= i64::MAX as f64 => {
            Some(KeyPart::Int(*f as i64))
        }
        Value::Float64(f) => Some(KeyPart::Float(f.to_bits())),
        Value::Bool(b) => Some(KeyPart::Bool(*b)),
        Value::Utf8(s) => Some(KeyPart::Str(s.clone())),
    }
}

/// Composite key of a row; `None` if any key cell is null (null keys never match).
fn row_key(row: &[Value], idxs: &[usize]) -> Option<Vec<KeyPart>> {
    idxs.iter()
        .map(|&i| row.get(i).and_then(key_part))
        .collect()
}

/// How to join chunks of one particular input schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinPlan {
    input_keys: Vec<usize>,
    reference_columns: Vec<usize>,
    output: Schema,
}

impl JoinPlan {
    /// Schema of joined chunks.
    pub fn output_schema(&self) -> &Schema {
        &self.output
    }
}

/// A reference dataset held in memory and indexed by its join key.
#[derive(Debug, Clone)]
pub struct ReferenceTable {
    data: DataSet,
    spec: JoinSpec,
    index: HashMap<Vec<KeyPart>, Vec<usize>>,
}

impl ReferenceTable {
    /// Load the reference CSV at `path` and index it for `spec`.
    ///
    /// Fails with [`PipelineError::Configuration`] if any reference key column is missing.
    pub fn load(path: impl AsRef<Path>, spec: &JoinSpec) -> PipelineResult<Self> {
        let path = path.as_ref();
        let data = read_dataset(path, SourceKind::Reference)?;
        tracing::info!(
            path = %path.display(),
            rows = data.row_count(),
            "loaded reference data"
        );
        Self::from_dataset(data, spec)
    }

    /// Index an already loaded reference dataset.
    pub fn from_dataset(data: DataSet, spec: &JoinSpec) -> PipelineResult<Self> {
        let missing: Vec<&str> = spec
            .reference_columns()
            .filter(|c| !data.schema.contains(c))
            .collect();
        if !missing.is_empty() {
            return Err(PipelineError::config(format!(
                "reference file missing join keys: {}. columns={:?}",
                missing.join(", "),
                data.schema.columns
            )));
        }

        let key_idxs: Vec<usize> = spec
            .reference_columns()
            .filter_map(|c| data.schema.index_of(c))
            .collect();

        let mut index: HashMap<Vec<KeyPart>, Vec<usize>> = HashMap::new();
        for (i, row) in data.rows.iter().enumerate() {
            if let Some(key) = row_key(row, &key_idxs) {
                index.entry(key).or_default().push(i);
            }
        }

        Ok(Self {
            data,
            spec: spec.clone(),
            index,
        })
    }

    /// The reference dataset's schema.
    pub fn schema(&self) -> &Schema {
        &self.data.schema
    }

    /// Number of reference rows.
    pub fn row_count(&self) -> usize {
        self.data.row_count()
    }

    /// Input key columns of the join that `input` lacks.
    pub fn missing_input_columns(&self, input: &Schema) -> Vec<String> {
        self.spec
            .input_columns()
            .filter(|c| !input.contains(c))
            .map(str::to_owned)
            .collect()
    }

    /// Build the join plan for chunks with schema `input`.
    ///
    /// Returns `None` if `input` lacks one of the join's input key columns. Reference key columns
    /// named like their paired input column are folded into it; any other name shared by both
    /// sides gets the suffix `_x` on the input side and `_y` on the reference side.
    pub fn plan(&self, input: &Schema) -> Option<JoinPlan> {
        let input_keys: Vec<usize> = self
            .spec
            .input_columns()
            .map(|c| input.index_of(c))
            .collect::<Option<_>>()?;

        let reference_columns: Vec<usize> = self
            .data
            .schema
            .columns
            .iter()
            .enumerate()
            .filter(|(_, name)| !self.spec.pairs().iter().any(|(i, r)| i == r && r == *name))
            .map(|(idx, _)| idx)
            .collect();

        let ref_names: Vec<&str> = reference_columns
            .iter()
            .map(|&i| self.data.schema.columns[i].as_str())
            .collect();

        let mut columns: Vec<String> = input
            .columns
            .iter()
            .map(|c| {
                if ref_names.contains(&c.as_str()) {
                    format!("{c}_x")
                } else {
                    c.clone()
                }
            })
            .collect();
        columns.extend(ref_names.iter().map(|r| {
            if input.contains(r) {
                format!("{r}_y")
            } else {
                (*r).to_owned()
            }
        }));

        Some(JoinPlan {
            input_keys,
            reference_columns,
            output: Schema { columns },
        })
    }

    /// Left-join `chunk` using a plan built for its schema.
    pub fn join_chunk(&self, plan: &JoinPlan, chunk: DataChunk) -> DataChunk {
        let nulls = vec![Value::Null; plan.reference_columns.len()];
        let mut rows: Vec<Vec<Value>> = Vec::with_capacity(chunk.row_count());

        for row in chunk.rows {
            let matches = row_key(&row, &plan.input_keys).and_then(|k| self.index.get(&k));
            match matches {
                Some(ref_rows) => {
                    for &r in ref_rows {
                        let ref_row = &self.data.rows[r];
                        let mut out = Vec::with_capacity(plan.output.len());
                        out.extend(row.iter().cloned());
                        out.extend(
                            plan.reference_columns
                                .iter()
                                .map(|&c| ref_row.get(c).cloned().unwrap_or(Value::Null)),
                        );
                        rows.push(out);
                    }
                }
                None => {
                    let mut out = row;
                    out.extend(nulls.iter().cloned());
                    rows.push(out);
                }
            }
        }

        DataSet::new(plan.output.clone(), rows)
    }
}

#[cfg(test)]
mod tests {
    use super::{JoinSpec, ReferenceTable};
    use crate::error::PipelineError;
    use crate::types::{DataSet, Schema, Value};

    fn s(v: &str) -> Value {
        Value::Utf8(v.to_string())
    }

    fn reference() -> DataSet {
        DataSet::new(
            Schema::new(["k", "v"]),
            vec![
                vec![s("A"), Value::Int64(1)],
                vec![s("A"), Value::Int64(2)],
                vec![s("B"), Value::Int64(3)],
            ],
        )
    }

    #[test]
    fn fan_out_on_multiple_matches() {
        let spec = JoinSpec::new().on("k", "k");
        let table = ReferenceTable::from_dataset(reference(), &spec).unwrap();
        let chunk = DataSet::new(Schema::new(["k"]), vec![vec![s("A")]]);

        let plan = table.plan(&chunk.schema).unwrap();
        let out = table.join_chunk(&plan, chunk);

        assert_eq!(out.schema, Schema::new(["k", "v"]));
        assert_eq!(
            out.rows,
            vec![vec![s("A"), Value::Int64(1)], vec![s("A"), Value::Int64(2)]]
        );
    }

    #[test]
    fn unmatched_and_null_keys_keep_the_row_with_null_reference_columns() {
        let spec = JoinSpec::new().on("k", "k");
        let table = ReferenceTable::from_dataset(reference(), &spec).unwrap();
        let chunk = DataSet::new(
            Schema::new(["k", "q"]),
            vec![vec![s("Z"), Value::Int64(5)], vec![Value::Null, Value::Int64(6)]],
        );

        let plan = table.plan(&chunk.schema).unwrap();
        let out = table.join_chunk(&plan, chunk);

        assert_eq!(out.schema, Schema::new(["k", "q", "v"]));
        assert_eq!(
            out.rows,
            vec![
                vec![s("Z"), Value::Int64(5), Value::Null],
                vec![Value::Null, Value::Int64(6), Value::Null],
            ]
        );
    }

    #[test]
    fn differently_named_keys_keep_both_columns_and_collisions_are_suffixed() {
        let reference = DataSet::new(
            Schema::new(["pid", "price"]),
            vec![vec![Value::Int64(7), Value::Float64(1.5)]],
        );
        let spec = JoinSpec::new().on("product", "pid");
        let table = ReferenceTable::from_dataset(reference, &spec).unwrap();
        let chunk = DataSet::new(
            Schema::new(["product", "price"]),
            vec![vec![Value::Float64(7.0), Value::Float64(2.0)]],
        );

        let plan = table.plan(&chunk.schema).unwrap();
        let out = table.join_chunk(&plan, chunk);

        assert_eq!(out.schema, Schema::new(["product", "price_x", "pid", "price_y"]));
        assert_eq!(
            out.rows,
            vec![vec![
                Value::Float64(7.0),
                Value::Float64(2.0),
                Value::Int64(7),
                Value::Float64(1.5)
            ]]
        );
    }

    #[test]
    fn composite_keys_match_on_every_pair() {
        let reference = DataSet::new(
            Schema::new(["a", "b", "v"]),
            vec![
                vec![Value::Int64(1), s("x"), Value::Int64(10)],
                vec![Value::Int64(1), s("y"), Value::Int64(20)],
            ],
        );
        let spec = JoinSpec::from_pairs([("a", "a"), ("b", "b")]);
        let table = ReferenceTable::from_dataset(reference, &spec).unwrap();
        let chunk = DataSet::new(Schema::new(["a", "b"]), vec![vec![Value::Int64(1), s("y")]]);

        let plan = table.plan(&chunk.schema).unwrap();
        let out = table.join_chunk(&plan, chunk);
        assert_eq!(out.rows, vec![vec![Value::Int64(1), s("y"), Value::Int64(20)]]);
    }

    #[test]
    fn missing_reference_key_is_a_configuration_error() {
        let spec = JoinSpec::new().on("k", "nope");
        let err = ReferenceTable::from_dataset(reference(), &spec).unwrap_err();
        assert!(matches!(err, PipelineError::Configuration { .. }));
        assert!(err.to_string().contains("reference file missing join keys: nope"));
    }

    #[test]
    fn plan_is_none_when_input_lacks_a_key_column() {
        let spec = JoinSpec::new().on("k", "k");
        let table = ReferenceTable::from_dataset(reference(), &spec).unwrap();
        let input = Schema::new(["other"]);
        assert!(table.plan(&input).is_none());
        assert_eq!(table.missing_input_columns(&input), vec!["k".to_string()]);
    }

    #[test]
    fn common_columns_become_the_join_spec() {
        let spec = JoinSpec::from_common_columns(
            &Schema::new(["id", "a", "b"]),
            &Schema::new(["b", "id"]),
        );
        assert_eq!(spec, JoinSpec::from_pairs([("id", "id"), ("b", "b")]));
    }

    #[test]
    fn join_spec_serializes_as_an_ordered_map() {
        let spec = JoinSpec::from_pairs([("z", "z_ref"), ("a", "a_ref")]);
        let json = serde_json::to_string(&spec).unwrap();
        assert_eq!(json, r#"{"z":"z_ref","a":"a_ref"}"#);
        let back: JoinSpec = serde_json::from_str(&json).unwrap();
        assert_eq!(back, spec);
    }
}
