//! The rule engine.
//!
//! A [`RuleSet`] is an ordered mapping `output_field → expression`. Applying it to a chunk adds
//! (or replaces) one column per rule, each computed column-wise from the chunk's *input* columns:
//!
//! ```
//! use report_pipeline::rules::RuleSet;
//! use report_pipeline::types::{DataSet, Schema, Value};
//!
//! let rules = RuleSet::from_iter([("total", "quantity * unit_price")]);
//! let chunk = DataSet::new(
//!     Schema::new(["quantity", "unit_price"]),
//!     vec![
//!         vec![Value::Int64(2), Value::Int64(5)],
//!         vec![Value::Int64(3), Value::Int64(10)],
//!     ],
//! );
//!
//! let out = rules.apply(chunk);
//! assert_eq!(out.column("total"), Some(vec![Value::Int64(10), Value::Int64(30)]));
//! ```
//!
//! A rule that fails (bad syntax, unknown column or function, incompatible operand types) yields
//! a column of nulls; the other rules are unaffected and `apply` itself never fails.

pub mod eval;
pub mod expr;
pub mod storage;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::PipelineResult;
use crate::ordered::{deserialize_pairs, serialize_pairs};
use crate::types::{DataChunk, Schema, Value};

pub use eval::{evaluate, EvaluationError};
pub use expr::{parse, BinaryOp, Builtin, Expr, UnaryOp, MAX_DEPTH};
pub use storage::{load, save, RulesFormat};

/// Ordered collection of rules.
///
/// Inserting an existing output field replaces its expression in place (last write wins, the
/// entry keeps its original position).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleSet {
    rules: Vec<(String, String)>,
}

impl RuleSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a rule. Returns the previous expression for `output_field`, if any.
    pub fn insert(
        &mut self,
        output_field: impl Into<String>,
        expression: impl Into<String>,
    ) -> Option<String> {
        let output_field = output_field.into();
        let expression = expression.into();
        match self.rules.iter_mut().find(|(name, _)| *name == output_field) {
            Some((_, existing)) => Some(std::mem::replace(existing, expression)),
            None => {
                self.rules.push((output_field, expression));
                None
            }
        }
    }

    /// Merge `other` into this set; rules in `other` win.
    pub fn update(&mut self, other: RuleSet) {
        self.extend(other.rules);
    }

    /// Remove a rule, returning its expression.
    pub fn remove(&mut self, output_field: &str) -> Option<String> {
        let pos = self.rules.iter().position(|(name, _)| name == output_field)?;
        Some(self.rules.remove(pos).1)
    }

    pub fn get(&self, output_field: &str) -> Option<&str> {
        self.rules
            .iter()
            .find(|(name, _)| name == output_field)
            .map(|(_, expr)| expr.as_str())
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// `(output_field, expression)` pairs in order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.rules.iter().map(|(n, e)| (n.as_str(), e.as_str()))
    }

    pub fn output_fields(&self) -> impl Iterator<Item = &str> {
        self.rules.iter().map(|(n, _)| n.as_str())
    }

    /// Parse every expression once. Parse failures are kept and reported when applied.
    pub fn compile(&self) -> CompiledRules {
        let rules = self
            .rules
            .iter()
            .map(|(name, expression)| CompiledRule {
                output_field: name.clone(),
                expression: expression.clone(),
                compiled: parse(expression),
            })
            .collect();
        CompiledRules { rules }
    }

    /// Apply every rule to `chunk`. See [`CompiledRules::apply`].
    pub fn apply(&self, chunk: DataChunk) -> DataChunk {
        self.compile().apply(chunk)
    }

    /// Check every rule against `schema` without evaluating anything.
    ///
    /// A rule is valid when its expression parses and every column it references exists in
    /// `schema`.
    pub fn validate(&self, schema: &Schema) -> ValidationReport {
        let entries = self
            .rules
            .iter()
            .map(|(name, expression)| match parse(expression) {
                Ok(expr) => {
                    let missing_columns: Vec<String> = expr
                        .column_refs()
                        .into_iter()
                        .filter(|c| !schema.contains(c))
                        .map(str::to_owned)
                        .collect();
                    RuleValidation {
                        output_field: name.clone(),
                        valid: missing_columns.is_empty(),
                        missing_columns,
                        error: None,
                    }
                }
                Err(err) => RuleValidation {
                    output_field: name.clone(),
                    valid: false,
                    missing_columns: Vec::new(),
                    error: Some(err.to_string()),
                },
            })
            .collect();
        ValidationReport { entries }
    }

    /// Parse a JSON object `output_field → expression`.
    pub fn from_json_str(text: &str) -> PipelineResult<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Pretty JSON (2-space indent), entries in order.
    pub fn to_json_string(&self) -> PipelineResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for RuleSet {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut rules = Self::new();
        rules.extend(iter);
        rules
    }
}

impl<K: Into<String>, V: Into<String>> Extend<(K, V)> for RuleSet {
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        for (k, v) in iter {
            self.insert(k, v);
        }
    }
}

impl Serialize for RuleSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serialize_pairs(&self.rules, serializer)
    }
}

impl<'de> Deserialize<'de> for RuleSet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(deserialize_pairs(deserializer)?.into_iter().collect())
    }
}

#[derive(Debug, Clone)]
struct CompiledRule {
    output_field: String,
    expression: String,
    compiled: Result<Expr, EvaluationError>,
}

/// A RuleSet with every expression parsed, ready to apply to many chunks.
#[derive(Debug, Clone)]
pub struct CompiledRules {
    rules: Vec<CompiledRule>,
}

impl CompiledRules {
    /// Evaluate every rule against the input columns of `chunk`, then attach the results.
    ///
    /// Output columns keep rule order after the input columns; a rule named like an input column
    /// overwrites that column where it stands. A failing rule produces an all-null column.
    pub fn apply(&self, mut chunk: DataChunk) -> DataChunk {
        if self.rules.is_empty() {
            return chunk;
        }

        let rows = chunk.row_count();
        let columns: Vec<Vec<Value>> = self
            .rules
            .iter()
            .map(|rule| {
                let result = rule
                    .compiled
                    .as_ref()
                    .map_err(|e| e.clone())
                    .and_then(|expr| evaluate(expr, &chunk));
                match result {
                    Ok(values) => {
                        tracing::debug!(field = %rule.output_field, rows, "applied rule");
                        values
                    }
                    Err(err) => {
                        tracing::error!(
                            field = %rule.output_field,
                            expression = %rule.expression,
                            error = %err,
                            "rule evaluation failed; filling column with nulls"
                        );
                        vec![Value::Null; rows]
                    }
                }
            })
            .collect();

        for (rule, values) in self.rules.iter().zip(columns) {
            chunk.set_column(&rule.output_field, values);
        }
        chunk
    }
}

/// Outcome of validating one rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuleValidation {
    pub output_field: String,
    pub valid: bool,
    /// Referenced columns absent from the schema.
    pub missing_columns: Vec<String>,
    /// Parse error, when the expression could not be compiled.
    pub error: Option<String>,
}

/// Per-rule validation results, in rule order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ValidationReport {
    entries: Vec<RuleValidation>,
}

impl ValidationReport {
    pub fn all_valid(&self) -> bool {
        self.entries.iter().all(|e| e.valid)
    }

    /// Validity of a single rule, or `None` if there is no such rule.
    pub fn is_valid(&self, output_field: &str) -> Option<bool> {
        self.get(output_field).map(|e| e.valid)
    }

    pub fn get(&self, output_field: &str) -> Option<&RuleValidation> {
        self.entries.iter().find(|e| e.output_field == output_field)
    }

    pub fn iter(&self) -> impl Iterator<Item = &RuleValidation> {
        self.entries.iter()
    }

    pub fn invalid(&self) -> impl Iterator<Item = &RuleValidation> {
        self.entries.iter().filter(|e| !e.valid)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
