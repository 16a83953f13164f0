//! Column-wise evaluation of compiled expressions against a chunk.

use std::cmp::Ordering;

use thiserror::Error;

use crate::types::{DataChunk, Value};

use super::expr::{BinaryOp, Builtin, Expr, UnaryOp};

/// Why a single rule could not produce its column.
///
/// These never escape [`crate::rules::RuleSet::apply`]: the affected output column is filled
/// with nulls and the error is logged.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EvaluationError {
    #[error("parse error: {message}")]
    Parse { message: String },

    #[error("unknown column '{column}'")]
    UnknownColumn { column: String },

    #[error("unknown function '{name}'")]
    UnknownFunction { name: String },

    #[error("{function}() takes {expected} argument(s), got {found}")]
    Arity {
        function: &'static str,
        expected: &'static str,
        found: usize,
    },

    #[error("unsupported operand types for {op}: {left} and {right}")]
    Type {
        op: String,
        left: &'static str,
        right: &'static str,
    },

    #[error("invalid argument to {function}(): {message}")]
    InvalidArgument {
        function: &'static str,
        message: String,
    },
}

/// Intermediate result: a single value or one value per row.
#[derive(Debug, Clone, PartialEq)]
enum Operand {
    Scalar(Value),
    Column(Vec<Value>),
}

impl Operand {
    fn map<F>(self, f: F) -> Result<Self, EvaluationError>
    where
        F: Fn(&Value) -> Result<Value, EvaluationError>,
    {
        Ok(match self {
            Self::Scalar(v) => Self::Scalar(f(&v)?),
            Self::Column(vs) => Self::Column(vs.iter().map(f).collect::<Result<_, _>>()?),
        })
    }

    fn zip_with<F>(self, other: Self, f: F) -> Result<Self, EvaluationError>
    where
        F: Fn(&Value, &Value) -> Result<Value, EvaluationError>,
    {
        Ok(match (self, other) {
            (Self::Scalar(a), Self::Scalar(b)) => Self::Scalar(f(&a, &b)?),
            (Self::Column(a), Self::Scalar(b)) => {
                Self::Column(a.iter().map(|x| f(x, &b)).collect::<Result<_, _>>()?)
            }
            (Self::Scalar(a), Self::Column(b)) => {
                Self::Column(b.iter().map(|y| f(&a, y)).collect::<Result<_, _>>()?)
            }
            (Self::Column(a), Self::Column(b)) => Self::Column(
                a.iter()
                    .zip(b.iter())
                    .map(|(x, y)| f(x, y))
                    .collect::<Result<_, _>>()?,
            ),
        })
    }

    fn into_column(self, rows: usize) -> Vec<Value> {
        match self {
            Self::Scalar(v) => vec![v; rows],
            Self::Column(vs) => vs,
        }
    }
}

/// Evaluate `expr` over every row of `chunk`, returning one value per row.
pub fn evaluate(expr: &Expr, chunk: &DataChunk) -> Result<Vec<Value>, EvaluationError> {
    Ok(eval(expr, chunk)?.into_column(chunk.row_count()))
}

fn eval(expr: &Expr, chunk: &DataChunk) -> Result<Operand, EvaluationError> {
    match expr {
        Expr::Literal(v) => Ok(Operand::Scalar(v.clone())),
        Expr::ColumnRef(name) => chunk
            .column(name)
            .map(Operand::Column)
            .ok_or_else(|| EvaluationError::UnknownColumn {
                column: name.clone(),
            }),
        Expr::Unary { op, operand } => {
            let value = eval(operand, chunk)?;
            match op {
                UnaryOp::Neg => value.map(negate),
                UnaryOp::Not => value.map(logical_not),
            }
        }
        Expr::Binary { op, left, right } => {
            let l = eval(left, chunk)?;
            let r = eval(right, chunk)?;
            let op = *op;
            l.zip_with(r, |a, b| binary(op, a, b))
        }
        Expr::Call { function, args } => call(*function, args, chunk),
    }
}

fn call(function: Builtin, args: &[Expr], chunk: &DataChunk) -> Result<Operand, EvaluationError> {
    let mut operands = args
        .iter()
        .map(|a| eval(a, chunk))
        .collect::<Result<Vec<_>, _>>()?
        .into_iter();

    let Some(first) = operands.next() else {
        return Err(EvaluationError::Arity {
            function: function.name(),
            expected: "at least 1",
            found: 0,
        });
    };

    match function {
        Builtin::Max | Builtin::Min => {
            let want = if function == Builtin::Max {
                Ordering::Greater
            } else {
                Ordering::Less
            };
            operands.try_fold(first, |acc, next| {
                acc.zip_with(next, |a, b| extremum(function, want, a, b))
            })
        }
        Builtin::Sum => total(first).map(Operand::Scalar),
        Builtin::Abs => first.map(absolute),
        Builtin::Round => {
            let digits = match operands.next() {
                None => 0,
                Some(Operand::Scalar(Value::Int64(d))) => d.clamp(-308, 308) as i32,
                Some(_) => {
                    return Err(EvaluationError::InvalidArgument {
                        function: "round",
                        message: "digits must be an integer literal".to_string(),
                    });
                }
            };
            first.map(|v| round_value(v, digits))
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Num {
    Int(i64),
    Float(f64),
}

impl Num {
    fn to_f64(self) -> f64 {
        match self {
            Self::Int(i) => i as f64,
            Self::Float(f) => f,
        }
    }
}

fn num(v: &Value) -> Option<Num> {
    match v {
        Value::Int64(i) => Some(Num::Int(*i)),
        Value::Bool(b) => Some(Num::Int(i64::from(*b))),
        Value::Float64(f) => Some(Num::Float(*f)),
        _ => None,
    }
}

fn float(v: f64) -> Value {
    if v.is_nan() {
        Value::Null
    } else {
        Value::Float64(v)
    }
}

fn type_error(op: impl ToString, left: &Value, right: &Value) -> EvaluationError {
    EvaluationError::Type {
        op: op.to_string(),
        left: left.type_name(),
        right: right.type_name(),
    }
}

fn binary(op: BinaryOp, a: &Value, b: &Value) -> Result<Value, EvaluationError> {
    match op {
        BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem => {
            arithmetic(op, a, b)
        }
        BinaryOp::Eq
        | BinaryOp::NotEq
        | BinaryOp::Lt
        | BinaryOp::LtEq
        | BinaryOp::Gt
        | BinaryOp::GtEq => compare(op, a, b),
        BinaryOp::And | BinaryOp::Or => logical(op, a, b),
    }
}

fn arithmetic(op: BinaryOp, a: &Value, b: &Value) -> Result<Value, EvaluationError> {
    if a.is_null() || b.is_null() {
        return Ok(Value::Null);
    }
    if let (BinaryOp::Add, Value::Utf8(x), Value::Utf8(y)) = (op, a, b) {
        return Ok(Value::Utf8(format!("{x}{y}")));
    }
    let (Some(x), Some(y)) = (num(a), num(b)) else {
        return Err(type_error(op, a, b));
    };

    Ok(match (x, y) {
        (Num::Int(x), Num::Int(y)) => int_arithmetic(op, x, y),
        _ => float_arithmetic(op, x.to_f64(), y.to_f64()),
    })
}

/// Integer arithmetic; overflow falls back to float.
fn int_arithmetic(op: BinaryOp, x: i64, y: i64) -> Value {
    let checked = match op {
        BinaryOp::Add => x.checked_add(y),
        BinaryOp::Sub => x.checked_sub(y),
        BinaryOp::Mul => x.checked_mul(y),
        BinaryOp::Rem if y == 0 => return Value::Null,
        BinaryOp::Rem => x
            .checked_rem(y)
            .map(|r| if r != 0 && (r < 0) != (y < 0) { r + y } else { r }),
        _ => None,
    };
    match checked {
        Some(v) => Value::Int64(v),
        None => float_arithmetic(op, x as f64, y as f64),
    }
}

/// Float arithmetic. `%` takes the sign of the divisor.
fn float_arithmetic(op: BinaryOp, x: f64, y: f64) -> Value {
    let v = match op {
        BinaryOp::Add => x + y,
        BinaryOp::Sub => x - y,
        BinaryOp::Mul => x * y,
        BinaryOp::Div => x / y,
        BinaryOp::Rem if y == 0.0 => f64::NAN,
        BinaryOp::Rem => {
            let r = x % y;
            if r != 0.0 && (r < 0.0) != (y < 0.0) { r + y } else { r }
        }
        _ => f64::NAN,
    };
    float(v)
}

fn compare(op: BinaryOp, a: &Value, b: &Value) -> Result<Value, EvaluationError> {
    if a.is_null() || b.is_null() {
        return Ok(Value::Null);
    }

    let ordering = match (a, b) {
        (Value::Utf8(x), Value::Utf8(y)) => Some(x.cmp(y)),
        _ => match (num(a), num(b)) {
            (Some(Num::Int(x)), Some(Num::Int(y))) => Some(x.cmp(&y)),
            (Some(x), Some(y)) => x.to_f64().partial_cmp(&y.to_f64()),
            _ => None,
        },
    };

    let result = match (op, ordering) {
        (BinaryOp::Eq, Some(o)) => o == Ordering::Equal,
        (BinaryOp::NotEq, Some(o)) => o != Ordering::Equal,
        (BinaryOp::Lt, Some(o)) => o == Ordering::Less,
        (BinaryOp::LtEq, Some(o)) => o != Ordering::Greater,
        (BinaryOp::Gt, Some(o)) => o == Ordering::Greater,
        (BinaryOp::GtEq, Some(o)) => o != Ordering::Less,
        // Values of unrelated types are never equal, but have no order.
        (BinaryOp::Eq, None) => false,
        (BinaryOp::NotEq, None) => true,
        _ => return Err(type_error(op, a, b)),
    };
    Ok(Value::Bool(result))
}

fn logical(op: BinaryOp, a: &Value, b: &Value) -> Result<Value, EvaluationError> {
    if a.is_null() || b.is_null() {
        return Ok(Value::Null);
    }
    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => Ok(Value::Bool(match op {
            BinaryOp::And => *x && *y,
            _ => *x || *y,
        })),
        _ => Err(type_error(op, a, b)),
    }
}

fn negate(v: &Value) -> Result<Value, EvaluationError> {
    match num(v) {
        _ if v.is_null() => Ok(Value::Null),
        Some(Num::Int(i)) => Ok(i
            .checked_neg()
            .map(Value::Int64)
            .unwrap_or_else(|| Value::Float64(-(i as f64)))),
        Some(Num::Float(f)) => Ok(Value::Float64(-f)),
        None => Err(type_error("unary -", v, v)),
    }
}

fn logical_not(v: &Value) -> Result<Value, EvaluationError> {
    match v {
        Value::Null => Ok(Value::Null),
        Value::Bool(b) => Ok(Value::Bool(!b)),
        _ => Err(type_error("not", v, v)),
    }
}

fn extremum(
    function: Builtin,
    want: Ordering,
    a: &Value,
    b: &Value,
) -> Result<Value, EvaluationError> {
    if a.is_null() || b.is_null() {
        return Ok(Value::Null);
    }
    let (Some(x), Some(y)) = (num(a), num(b)) else {
        return Err(type_error(format!("{}()", function.name()), a, b));
    };
    Ok(match (x, y) {
        (Num::Int(x), Num::Int(y)) => Value::Int64(if x.cmp(&y) == want { x } else { y }),
        _ => {
            let (x, y) = (x.to_f64(), y.to_f64());
            let pick_x = x.partial_cmp(&y) == Some(want);
            Value::Float64(if pick_x { x } else { y })
        }
    })
}

/// Column total; nulls are skipped, an all-null or empty column sums to 0.
fn total(operand: Operand) -> Result<Value, EvaluationError> {
    let values = match operand {
        Operand::Scalar(v) => vec![v],
        Operand::Column(vs) => vs,
    };

    let mut int_total: Option<i64> = Some(0);
    let mut float_total = 0.0f64;
    let mut saw_float = false;
    for v in values.iter().filter(|v| !v.is_null()) {
        match num(v) {
            Some(Num::Int(i)) => {
                int_total = int_total.and_then(|t| t.checked_add(i));
                float_total += i as f64;
            }
            Some(Num::Float(f)) => {
                saw_float = true;
                float_total += f;
            }
            None => return Err(type_error("sum()", v, v)),
        }
    }

    Ok(match int_total {
        Some(t) if !saw_float => Value::Int64(t),
        _ => float(float_total),
    })
}

fn absolute(v: &Value) -> Result<Value, EvaluationError> {
    match num(v) {
        _ if v.is_null() => Ok(Value::Null),
        Some(Num::Int(i)) => Ok(i
            .checked_abs()
            .map(Value::Int64)
            .unwrap_or_else(|| Value::Float64((i as f64).abs()))),
        Some(Num::Float(f)) => Ok(Value::Float64(f.abs())),
        None => Err(type_error("abs()", v, v)),
    }
}

/// Round half to even at `digits` decimal places (negative digits round to tens, hundreds, ...).
fn round_value(v: &Value, digits: i32) -> Result<Value, EvaluationError> {
    match num(v) {
        _ if v.is_null() => Ok(Value::Null),
        Some(Num::Int(i)) if digits >= 0 => Ok(Value::Int64(i)),
        Some(Num::Int(i)) => {
            let scale = 10f64.powi(-digits);
            let rounded = ((i as f64) / scale).round_ties_even() * scale;
            Ok(if rounded.abs() < i64::MAX as f64 {
                Value::Int64(rounded as i64)
            } else {
                Value::Float64(rounded)
            })
        }
        Some(Num::Float(f)) => {
            let scale = 10f64.powi(digits);
            let scaled = f * scale;
            if !scaled.is_finite() {
                return Ok(Value::Float64(f));
            }
            Ok(float(scaled.round_ties_even() / scale))
        }
        None => Err(type_error("round()", v, v)),
    }
}
