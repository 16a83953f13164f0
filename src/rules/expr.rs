//! Rule expression language: tokenizer, recursive-descent parser and the compiled [`Expr`] tree.
//!
//! Grammar, lowest precedence first:
//!
//! ```text
//! or          := and (("or" | "|") and)*
//! and         := not (("and" | "&") not)*
//! not         := "not" not | comparison
//! comparison  := additive (("==" | "!=" | "<" | "<=" | ">" | ">=") additive)?
//! additive    := multiplicative (("+" | "-") multiplicative)*
//! multiplicative := unary (("*" | "/" | "%") unary)*
//! unary       := ("-" | "+") unary | primary
//! primary     := "(" or ")" | name "(" args ")" | name | number | string | "true" | "false"
//! ```
//!
//! Bare names are column references. Column names that are not plain identifiers can be written
//! between backticks: `` `unit price` * 2 ``.

use std::fmt;

use crate::types::Value;

use super::eval::EvaluationError;

/// Deepest accepted nesting of parentheses, calls and prefix operators, and tallest accepted
/// expression tree.
pub const MAX_DEPTH: usize = 128;

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    And,
    Or,
}

impl BinaryOp {
    pub(crate) fn symbol(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Rem => "%",
            Self::Eq => "==",
            Self::NotEq => "!=",
            Self::Lt => "<",
            Self::LtEq => "<=",
            Self::Gt => ">",
            Self::GtEq => ">=",
            Self::And => "and",
            Self::Or => "or",
        }
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// Built-in functions callable from expressions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    /// Element-wise maximum of two or more arguments.
    Max,
    /// Element-wise minimum of two or more arguments.
    Min,
    /// Total of a column, broadcast to every row. Nulls are skipped.
    Sum,
    /// Absolute value.
    Abs,
    /// `round(x)` or `round(x, digits)`, half to even.
    Round,
}

impl Builtin {
    /// Look up a builtin by name (case-insensitive).
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "max" => Some(Self::Max),
            "min" => Some(Self::Min),
            "sum" => Some(Self::Sum),
            "abs" => Some(Self::Abs),
            "round" => Some(Self::Round),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Max => "max",
            Self::Min => "min",
            Self::Sum => "sum",
            Self::Abs => "abs",
            Self::Round => "round",
        }
    }

    fn check_arity(self, found: usize) -> Result<(), EvaluationError> {
        let (ok, expected) = match self {
            Self::Max | Self::Min => (found >= 2, "at least 2"),
            Self::Sum | Self::Abs => (found == 1, "exactly 1"),
            Self::Round => ((1..=2).contains(&found), "1 or 2"),
        };
        if ok {
            Ok(())
        } else {
            Err(EvaluationError::Arity {
                function: self.name(),
                expected,
                found,
            })
        }
    }
}

/// A compiled expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    ColumnRef(String),
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Call {
        function: Builtin,
        args: Vec<Expr>,
    },
}

impl Expr {
    /// Height of the tree. A literal or a column reference is 1.
    pub fn depth(&self) -> usize {
        match self {
            Self::Literal(_) | Self::ColumnRef(_) => 1,
            Self::Unary { operand, .. } => 1 + operand.depth(),
            Self::Binary { left, right, .. } => 1 + left.depth().max(right.depth()),
            Self::Call { args, .. } => 1 + args.iter().map(Expr::depth).max().unwrap_or(0),
        }
    }

    /// Column names referenced by the expression, in first-seen order, without duplicates.
    pub fn column_refs(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_refs(&mut out);
        out
    }

    fn collect_refs<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Self::Literal(_) => {}
            Self::ColumnRef(name) => {
                if !out.contains(&name.as_str()) {
                    out.push(name);
                }
            }
            Self::Unary { operand, .. } => operand.collect_refs(out),
            Self::Binary { left, right, .. } => {
                left.collect_refs(out);
                right.collect_refs(out);
            }
            Self::Call { args, .. } => {
                for arg in args {
                    arg.collect_refs(out);
                }
            }
        }
    }
}

/// Parse an expression string into an [`Expr`].
///
/// Unknown functions and wrong argument counts are rejected here, so a successfully parsed
/// expression can only fail at evaluation time on missing columns or operand types.
pub fn parse(expression: &str) -> Result<Expr, EvaluationError> {
    let tokens = tokenize(expression)?;
    if tokens.is_empty() {
        return Err(parse_error("empty expression"));
    }
    Parser::new(tokens).parse()
}

fn parse_error(message: impl Into<String>) -> EvaluationError {
    EvaluationError::Parse {
        message: message.into(),
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Identifier(String),
    Number(String),
    Str(String),
    Bool(bool),
    LParen,
    RParen,
    Comma,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Eq,
    NotEq,
    Lt,
    Lte,
    Gt,
    Gte,
    And,
    Or,
    Not,
}

fn tokenize(expression: &str) -> Result<Vec<Token>, EvaluationError> {
    let chars: Vec<char> = expression.chars().collect();
    let mut tokens = Vec::new();
    let mut index = 0usize;

    while index < chars.len() {
        let ch = chars[index];

        if ch.is_whitespace() {
            index += 1;
            continue;
        }

        if ch == '\'' || ch == '"' || ch == '`' {
            let (text, next) = read_quoted(&chars, index)?;
            index = next;
            tokens.push(if ch == '`' {
                Token::Identifier(text)
            } else {
                Token::Str(text)
            });
            continue;
        }

        if ch.is_alphabetic() || ch == '_' {
            let mut word = String::new();
            while index < chars.len() && (chars[index].is_alphanumeric() || chars[index] == '_') {
                word.push(chars[index]);
                index += 1;
            }
            let token = match word.to_ascii_lowercase().as_str() {
                "and" => Token::And,
                "or" => Token::Or,
                "not" => Token::Not,
                "true" => Token::Bool(true),
                "false" => Token::Bool(false),
                _ => Token::Identifier(word),
            };
            tokens.push(token);
            continue;
        }

        if ch.is_ascii_digit()
            || (ch == '.' && chars.get(index + 1).is_some_and(|c| c.is_ascii_digit()))
        {
            let (number, next) = read_number(&chars, index);
            index = next;
            tokens.push(Token::Number(number));
            continue;
        }

        let next = chars.get(index + 1).copied();
        let (token, width) = match (ch, next) {
            ('(', _) => (Token::LParen, 1),
            (')', _) => (Token::RParen, 1),
            (',', _) => (Token::Comma, 1),
            ('+', _) => (Token::Plus, 1),
            ('-', _) => (Token::Minus, 1),
            ('*', _) => (Token::Star, 1),
            ('/', _) => (Token::Slash, 1),
            ('%', _) => (Token::Percent, 1),
            ('=', Some('=')) => (Token::Eq, 2),
            ('!', Some('=')) => (Token::NotEq, 2),
            ('<', Some('=')) => (Token::Lte, 2),
            ('<', _) => (Token::Lt, 1),
            ('>', Some('=')) => (Token::Gte, 2),
            ('>', _) => (Token::Gt, 1),
            ('&', _) => (Token::And, 1),
            ('|', _) => (Token::Or, 1),
            _ => return Err(parse_error(format!("unexpected character '{ch}'"))),
        };
        tokens.push(token);
        index += width;
    }

    Ok(tokens)
}

/// Read a quoted run starting at `start` (the opening quote). Backslash escapes the next char.
fn read_quoted(chars: &[char], start: usize) -> Result<(String, usize), EvaluationError> {
    let quote = chars[start];
    let mut index = start + 1;
    let mut text = String::new();
    while index < chars.len() {
        match chars[index] {
            '\\' => {
                let Some(escaped) = chars.get(index + 1) else {
                    return Err(parse_error("unterminated escape sequence"));
                };
                text.push(*escaped);
                index += 2;
            }
            c if c == quote => return Ok((text, index + 1)),
            c => {
                text.push(c);
                index += 1;
            }
        }
    }
    Err(parse_error(format!("unterminated {quote}-quoted literal")))
}

fn read_number(chars: &[char], start: usize) -> (String, usize) {
    let mut index = start;
    let mut out = String::new();
    let digits = |index: &mut usize, out: &mut String| {
        while *index < chars.len() && chars[*index].is_ascii_digit() {
            out.push(chars[*index]);
            *index += 1;
        }
    };

    digits(&mut index, &mut out);
    if chars.get(index) == Some(&'.') {
        out.push('.');
        index += 1;
        digits(&mut index, &mut out);
    }
    if matches!(chars.get(index), Some('e' | 'E')) {
        let sign = matches!(chars.get(index + 1), Some('+' | '-'));
        let first_digit = if sign { index + 2 } else { index + 1 };
        if chars.get(first_digit).is_some_and(|c| c.is_ascii_digit()) {
            for c in &chars[index..first_digit] {
                out.push(*c);
            }
            index = first_digit;
            digits(&mut index, &mut out);
        }
    }
    (out, index)
}

struct Parser {
    tokens: Vec<Token>,
    cursor: usize,
    depth: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            cursor: 0,
            depth: 0,
        }
    }

    /// Run `rule` one nesting level deeper.
    fn nested(
        &mut self,
        rule: fn(&mut Self) -> Result<Expr, EvaluationError>,
    ) -> Result<Expr, EvaluationError> {
        if self.depth >= MAX_DEPTH {
            return Err(too_deep());
        }
        self.depth += 1;
        let expr = rule(self);
        self.depth -= 1;
        expr
    }

    fn parse(mut self) -> Result<Expr, EvaluationError> {
        let expr = self.parse_or()?;
        if let Some(token) = self.peek() {
            return Err(parse_error(format!("unexpected trailing token {token:?}")));
        }
        Ok(expr)
    }

    fn parse_or(&mut self) -> Result<Expr, EvaluationError> {
        let mut expr = self.parse_and()?;
        while self.consume_if(|t| matches!(t, Token::Or)) {
            let right = self.parse_and()?;
            expr = binary(BinaryOp::Or, expr, right)?;
        }
        Ok(expr)
    }

    fn parse_and(&mut self) -> Result<Expr, EvaluationError> {
        let mut expr = self.parse_not()?;
        while self.consume_if(|t| matches!(t, Token::And)) {
            let right = self.parse_not()?;
            expr = binary(BinaryOp::And, expr, right)?;
        }
        Ok(expr)
    }

    fn parse_not(&mut self) -> Result<Expr, EvaluationError> {
        if self.consume_if(|t| matches!(t, Token::Not)) {
            let operand = self.nested(Self::parse_not)?;
            return checked(Expr::Unary {
                op: UnaryOp::Not,
                operand: Box::new(operand),
            });
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expr, EvaluationError> {
        let left = self.parse_additive()?;
        let op = match self.peek() {
            Some(Token::Eq) => BinaryOp::Eq,
            Some(Token::NotEq) => BinaryOp::NotEq,
            Some(Token::Lt) => BinaryOp::Lt,
            Some(Token::Lte) => BinaryOp::LtEq,
            Some(Token::Gt) => BinaryOp::Gt,
            Some(Token::Gte) => BinaryOp::GtEq,
            _ => return Ok(left),
        };
        self.cursor += 1;
        let right = self.parse_additive()?;
        binary(op, left, right)
    }

    fn parse_additive(&mut self) -> Result<Expr, EvaluationError> {
        let mut expr = self.parse_multiplicative()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinaryOp::Add,
                Some(Token::Minus) => BinaryOp::Sub,
                _ => break,
            };
            self.cursor += 1;
            let right = self.parse_multiplicative()?;
            expr = binary(op, expr, right)?;
        }
        Ok(expr)
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, EvaluationError> {
        let mut expr = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinaryOp::Mul,
                Some(Token::Slash) => BinaryOp::Div,
                Some(Token::Percent) => BinaryOp::Rem,
                _ => break,
            };
            self.cursor += 1;
            let right = self.parse_unary()?;
            expr = binary(op, expr, right)?;
        }
        Ok(expr)
    }

    fn parse_unary(&mut self) -> Result<Expr, EvaluationError> {
        if self.consume_if(|t| matches!(t, Token::Minus)) {
            let operand = self.nested(Self::parse_unary)?;
            return checked(Expr::Unary {
                op: UnaryOp::Neg,
                operand: Box::new(operand),
            });
        }
        if self.consume_if(|t| matches!(t, Token::Plus)) {
            return self.nested(Self::parse_unary);
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expr, EvaluationError> {
        if self.consume_if(|t| matches!(t, Token::LParen)) {
            let expr = self.nested(Self::parse_or)?;
            if !self.consume_if(|t| matches!(t, Token::RParen)) {
                return Err(parse_error("missing closing ')'"));
            }
            return Ok(expr);
        }

        let token = self
            .take()
            .ok_or_else(|| parse_error("unexpected end of expression"))?;

        match token {
            Token::Identifier(name) => {
                if self.consume_if(|t| matches!(t, Token::LParen)) {
                    return self.parse_call(name);
                }
                Ok(Expr::ColumnRef(name))
            }
            Token::Number(text) => {
                if let Ok(v) = text.parse::<i64>() {
                    return Ok(Expr::Literal(Value::Int64(v)));
                }
                text.parse::<f64>()
                    .map(|v| Expr::Literal(Value::Float64(v)))
                    .map_err(|_| parse_error(format!("invalid numeric literal '{text}'")))
            }
            Token::Str(s) => Ok(Expr::Literal(Value::Utf8(s))),
            Token::Bool(b) => Ok(Expr::Literal(Value::Bool(b))),
            other => Err(parse_error(format!("unexpected token {other:?}"))),
        }
    }

    fn parse_call(&mut self, name: String) -> Result<Expr, EvaluationError> {
        let mut args = Vec::new();
        if !self.consume_if(|t| matches!(t, Token::RParen)) {
            loop {
                args.push(self.nested(Self::parse_or)?);
                if self.consume_if(|t| matches!(t, Token::Comma)) {
                    continue;
                }
                if self.consume_if(|t| matches!(t, Token::RParen)) {
                    break;
                }
                return Err(parse_error(format!(
                    "expected ',' or ')' in call to '{name}'"
                )));
            }
        }

        let function =
            Builtin::from_name(&name).ok_or(EvaluationError::UnknownFunction { name })?;
        function.check_arity(args.len())?;
        checked(Expr::Call { function, args })
    }

    fn consume_if(&mut self, predicate: impl FnOnce(&Token) -> bool) -> bool {
        match self.tokens.get(self.cursor) {
            Some(token) if predicate(token) => {
                self.cursor += 1;
                true
            }
            _ => false,
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.cursor)
    }

    fn take(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.cursor).cloned()?;
        self.cursor += 1;
        Some(token)
    }
}

fn binary(op: BinaryOp, left: Expr, right: Expr) -> Result<Expr, EvaluationError> {
    checked(Expr::Binary {
        op,
        left: Box::new(left),
        right: Box::new(right),
    })
}

/// Every node is checked as it is built, so `depth` never walks more than `MAX_DEPTH` levels.
fn checked(expr: Expr) -> Result<Expr, EvaluationError> {
    if expr.depth() > MAX_DEPTH {
        return Err(too_deep());
    }
    Ok(expr)
}

fn too_deep() -> EvaluationError {
    parse_error("expression nested too deeply")
}

#[cfg(test)]
mod tests {
    use super::{parse, BinaryOp, Builtin, Expr, MAX_DEPTH};
    use crate::rules::EvaluationError;
    use crate::types::Value;

    fn col(name: &str) -> Box<Expr> {
        Box::new(Expr::ColumnRef(name.to_string()))
    }

    #[test]
    fn multiplication_binds_tighter_than_addition() {
        let expr = parse("a + b * 2").unwrap();
        assert_eq!(
            expr,
            Expr::Binary {
                op: BinaryOp::Add,
                left: col("a"),
                right: Box::new(Expr::Binary {
                    op: BinaryOp::Mul,
                    left: col("b"),
                    right: Box::new(Expr::Literal(Value::Int64(2))),
                }),
            }
        );
    }

    #[test]
    fn parses_literals() {
        assert_eq!(parse("1.5").unwrap(), Expr::Literal(Value::Float64(1.5)));
        assert_eq!(parse("2e3").unwrap(), Expr::Literal(Value::Float64(2000.0)));
        assert_eq!(parse("'x y'").unwrap(), Expr::Literal(Value::Utf8("x y".into())));
        assert_eq!(parse("\"q\"").unwrap(), Expr::Literal(Value::Utf8("q".into())));
        assert_eq!(parse("TRUE").unwrap(), Expr::Literal(Value::Bool(true)));
    }

    #[test]
    fn backticks_quote_column_names() {
        let expr = parse("`unit price` * quantity").unwrap();
        assert_eq!(expr.column_refs(), vec!["unit price", "quantity"]);
    }

    #[test]
    fn column_refs_skip_builtins_and_literals() {
        let expr = parse("max(a, b) - sum(a) + round(c, 2) + 'd'").unwrap();
        assert_eq!(expr.column_refs(), vec!["a", "b", "c"]);
    }

    #[test]
    fn logical_operators_have_lowest_precedence() {
        let expr = parse("a > 1 and not b == 2 or c").unwrap();
        let Expr::Binary { op: BinaryOp::Or, left, .. } = expr else {
            panic!("expected top-level or");
        };
        assert!(matches!(*left, Expr::Binary { op: BinaryOp::And, .. }));

        let symbolic = parse("(a > 1) & (b < 2) | c").unwrap();
        assert!(matches!(symbolic, Expr::Binary { op: BinaryOp::Or, .. }));
    }

    #[test]
    fn function_names_are_case_insensitive() {
        let expr = parse("MAX(a, 0)").unwrap();
        assert!(matches!(
            expr,
            Expr::Call {
                function: Builtin::Max,
                ..
            }
        ));
    }

    #[test]
    fn rejects_malformed_expressions() {
        for bad in ["", "a +", "(a", "a b", "a $ b", "'open", "max(a,"] {
            let err = parse(bad).unwrap_err();
            assert!(matches!(err, EvaluationError::Parse { .. }), "{bad}: {err:?}");
        }
    }

    #[test]
    fn rejects_unknown_functions_and_bad_arity() {
        assert!(matches!(
            parse("median(a)").unwrap_err(),
            EvaluationError::UnknownFunction { .. }
        ));
        assert!(matches!(
            parse("max(a)").unwrap_err(),
            EvaluationError::Arity { function: "max", .. }
        ));
        assert!(matches!(
            parse("round(a, 1, 2)").unwrap_err(),
            EvaluationError::Arity { function: "round", .. }
        ));
    }

    #[test]
    fn rejects_deeply_nested_expressions() {
        let nested = format!("{}a{}", "(".repeat(20_000), ")".repeat(20_000));
        let chain = vec!["a"; 20_000].join(" + ");
        let negated = format!("{}a", "-".repeat(20_000));
        let calls = format!("{}a{}", "abs(".repeat(5_000), ")".repeat(5_000));

        for expression in [nested, chain, negated, calls] {
            let err = parse(&expression).unwrap_err();
            assert_eq!(
                err,
                EvaluationError::Parse {
                    message: "expression nested too deeply".to_string()
                }
            );
        }
    }

    #[test]
    fn accepts_nesting_up_to_the_limit() {
        let parens = MAX_DEPTH - 1;
        let nested = format!("{}a{}", "(".repeat(parens), ")".repeat(parens));
        assert_eq!(parse(&nested).unwrap(), Expr::ColumnRef("a".into()));

        let chain = vec!["a"; MAX_DEPTH].join(" + ");
        assert_eq!(parse(&chain).unwrap().depth(), MAX_DEPTH);
    }
}
