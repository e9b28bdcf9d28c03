//! Filter predicates: a small SQL-like `where` language.
//!
//! A filter string is parsed once into an [`Expr`] tree, bound against the
//! table schema into a [`Predicate`] (column checks, literal coercion), and then
//! evaluated columnwise over [`RecordBatch`]es to a boolean mask. Text is never
//! re-interpreted inside a scan loop.
//!
//! Grammar (keywords are case-insensitive):
//!
//! ```text
//! expr    := or
//! or      := and ("OR" and)*
//! and     := not ("AND" not)*
//! not     := "NOT" not | primary
//! primary := "(" expr ")" | "TRUE" | "FALSE"
//!          | column op literal
//!          | column
//!          | column ["NOT"] "IN" "(" literal ("," literal)* ")"
//!          | column ["NOT"] "BETWEEN" literal "AND" literal
//! op      := "=" | "!=" | "<>" | "<" | "<=" | ">" | ">="
//! column  := identifier | `quoted identifier`
//! literal := integer | float | 'string' | TRUE | FALSE
//! ```

use crate::config;
use crate::error::{Error, Result};
use crate::table::batch::{ColumnData, RecordBatch};
use crate::table::schema::{DataType, Schema};
use crate::table::value::ScalarValue;
use std::cmp::Ordering;
use std::fmt;

/// Comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
}

impl CmpOp {
    #[inline]
    fn matches(&self, ord: Ordering) -> bool {
        match self {
            CmpOp::Eq => ord == Ordering::Equal,
            CmpOp::NotEq => ord != Ordering::Equal,
            CmpOp::Lt => ord == Ordering::Less,
            CmpOp::LtEq => ord != Ordering::Greater,
            CmpOp::Gt => ord == Ordering::Greater,
            CmpOp::GtEq => ord != Ordering::Less,
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            CmpOp::Eq => "=",
            CmpOp::NotEq => "!=",
            CmpOp::Lt => "<",
            CmpOp::LtEq => "<=",
            CmpOp::Gt => ">",
            CmpOp::GtEq => ">=",
        }
    }
}

/// Boolean expression tree over scalar columns.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(bool),
    Compare {
        column: String,
        op: CmpOp,
        value: ScalarValue,
    },
    InList {
        column: String,
        values: Vec<ScalarValue>,
        negated: bool,
    },
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
}

impl Expr {
    /// Parse a filter string. Malformed input is a config error.
    pub fn parse(input: &str) -> Result<Expr> {
        let tokens = tokenize(input)?;
        let mut parser = Parser {
            tokens,
            pos: 0,
            depth: 0,
        };
        let expr = parser.parse_or()?;
        if let Some(tok) = parser.peek() {
            return Err(Error::config(format!(
                "unexpected token {tok} in filter '{input}'"
            )));
        }
        Ok(expr)
    }

    pub fn and(self, other: Expr) -> Expr {
        Expr::And(Box::new(self), Box::new(other))
    }

    pub fn or(self, other: Expr) -> Expr {
        Expr::Or(Box::new(self), Box::new(other))
    }

    pub fn negate(self) -> Expr {
        Expr::Not(Box::new(self))
    }

    /// Distinct column names referenced by the expression, in first-seen order.
    pub fn columns(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.collect_columns(&mut out);
        out
    }

    fn collect_columns(&self, out: &mut Vec<String>) {
        match self {
            Expr::Literal(_) => {}
            Expr::Compare { column, .. } | Expr::InList { column, .. } => {
                if !out.contains(column) {
                    out.push(column.clone());
                }
            }
            Expr::And(l, r) | Expr::Or(l, r) => {
                l.collect_columns(out);
                r.collect_columns(out);
            }
            Expr::Not(e) => e.collect_columns(out),
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Literal(b) => write!(f, "{}", if *b { "TRUE" } else { "FALSE" }),
            Expr::Compare { column, op, value } => write!(f, "{column} {} {value}", op.as_str()),
            Expr::InList {
                column,
                values,
                negated,
            } => {
                write!(f, "{column} {}IN (", if *negated { "NOT " } else { "" })?;
                for (i, v) in values.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{v}")?;
                }
                f.write_str(")")
            }
            Expr::And(l, r) => write!(f, "({l} AND {r})"),
            Expr::Or(l, r) => write!(f, "({l} OR {r})"),
            Expr::Not(e) => write!(f, "NOT {e}"),
        }
    }
}

/// An expression validated against a schema, ready for evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    expr: Expr,
    columns: Vec<String>,
}

impl Predicate {
    /// Check every referenced column exists and is scalar, and coerce literals
    /// to the column type where the conversion is lossless.
    pub fn bind(expr: &Expr, schema: &Schema) -> Result<Predicate> {
        let bound = bind_expr(expr, schema)?;
        let columns = bound.columns();
        Ok(Predicate {
            expr: bound,
            columns,
        })
    }

    pub fn expr(&self) -> &Expr {
        &self.expr
    }

    /// Columns that must be loaded to evaluate the predicate.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Evaluate against every row of `batch`. The batch must contain
    /// [`Predicate::columns`].
    pub fn evaluate(&self, batch: &RecordBatch) -> Result<Vec<bool>> {
        eval(&self.expr, batch)
    }
}

fn bind_expr(expr: &Expr, schema: &Schema) -> Result<Expr> {
    Ok(match expr {
        Expr::Literal(b) => Expr::Literal(*b),
        Expr::Compare { column, op, value } => {
            let data_type = scalar_column_type(schema, column)?;
            Expr::Compare {
                column: column.clone(),
                op: *op,
                value: coerce(value, data_type, column)?,
            }
        }
        Expr::InList {
            column,
            values,
            negated,
        } => {
            let data_type = scalar_column_type(schema, column)?;
            Expr::InList {
                column: column.clone(),
                values: values
                    .iter()
                    .map(|v| coerce(v, data_type, column))
                    .collect::<Result<_>>()?,
                negated: *negated,
            }
        }
        Expr::And(l, r) => bind_expr(l, schema)?.and(bind_expr(r, schema)?),
        Expr::Or(l, r) => bind_expr(l, schema)?.or(bind_expr(r, schema)?),
        Expr::Not(e) => bind_expr(e, schema)?.negate(),
    })
}

fn scalar_column_type(schema: &Schema, column: &str) -> Result<DataType> {
    let field = schema.require(column)?;
    if !field.data_type.is_scalar() {
        return Err(Error::config(format!(
            "cannot filter on vector column '{column}'"
        )));
    }
    Ok(field.data_type)
}

/// Coerce a literal to the variant the column produces from
/// [`ColumnData::value`], when that is lossless.
fn coerce(value: &ScalarValue, data_type: DataType, column: &str) -> Result<ScalarValue> {
    let mismatch = || {
        Error::config(format!(
            "literal {value} is not comparable with {data_type} column '{column}'"
        ))
    };
    match (data_type, value) {
        (DataType::Boolean, ScalarValue::Boolean(_)) => Ok(value.clone()),
        (DataType::Utf8, ScalarValue::Utf8(_)) => Ok(value.clone()),
        (DataType::Float32 | DataType::Float64, v) => {
            v.as_f64().map(ScalarValue::float).ok_or_else(mismatch)
        }
        (DataType::Int64, ScalarValue::UInt64(u)) => match i64::try_from(*u) {
            Ok(i) => Ok(ScalarValue::Int64(i)),
            Err(_) => Ok(value.clone()),
        },
        (DataType::UInt64, ScalarValue::Int64(i)) => match u64::try_from(*i) {
            Ok(u) => Ok(ScalarValue::UInt64(u)),
            Err(_) => Ok(value.clone()),
        },
        (DataType::Int64 | DataType::UInt64, v) if v.as_f64().is_some() => Ok(value.clone()),
        _ => Err(mismatch()),
    }
}

fn eval(expr: &Expr, batch: &RecordBatch) -> Result<Vec<bool>> {
    let n = batch.num_rows();
    match expr {
        Expr::Literal(b) => Ok(vec![*b; n]),
        Expr::Compare { column, op, value } => {
            let col = column_of(batch, column)?;
            Ok(compare_column(col, *op, value))
        }
        Expr::InList {
            column,
            values,
            negated,
        } => {
            let col = column_of(batch, column)?;
            let mut mask = vec![false; n];
            for v in values {
                for (m, hit) in mask.iter_mut().zip(compare_column(col, CmpOp::Eq, v)) {
                    *m |= hit;
                }
            }
            if *negated {
                mask.iter_mut().for_each(|m| *m = !*m);
            }
            Ok(mask)
        }
        Expr::And(l, r) => {
            let mut mask = eval(l, batch)?;
            for (m, b) in mask.iter_mut().zip(eval(r, batch)?) {
                *m &= b;
            }
            Ok(mask)
        }
        Expr::Or(l, r) => {
            let mut mask = eval(l, batch)?;
            for (m, b) in mask.iter_mut().zip(eval(r, batch)?) {
                *m |= b;
            }
            Ok(mask)
        }
        Expr::Not(e) => Ok(eval(e, batch)?.into_iter().map(|b| !b).collect()),
    }
}

fn column_of<'a>(batch: &'a RecordBatch, column: &str) -> Result<&'a ColumnData> {
    batch
        .column_by_name(column)
        .ok_or_else(|| Error::data(format!("filter column '{column}' missing from batch")))
}

/// Typed fast paths for the common same-type comparisons; anything else goes
/// through [`ScalarValue::compare`]. Incomparable pairs are `false`.
fn compare_column(col: &ColumnData, op: CmpOp, value: &ScalarValue) -> Vec<bool> {
    match (col, value) {
        (ColumnData::Int64(v), ScalarValue::Int64(x)) => {
            v.iter().map(|a| op.matches(a.cmp(x))).collect()
        }
        (ColumnData::UInt64(v), ScalarValue::UInt64(x)) => {
            v.iter().map(|a| op.matches(a.cmp(x))).collect()
        }
        (ColumnData::Float64(v), ScalarValue::Float64(x)) => v
            .iter()
            .map(|a| a.partial_cmp(&x.0).is_some_and(|o| op.matches(o)))
            .collect(),
        (ColumnData::Utf8(v), ScalarValue::Utf8(x)) => v
            .iter()
            .map(|a| op.matches(a.as_str().cmp(x.as_str())))
            .collect(),
        (ColumnData::Boolean(v), ScalarValue::Boolean(x)) => {
            v.iter().map(|a| op.matches(a.cmp(x))).collect()
        }
        _ => (0..col.len())
            .map(|i| {
                col.value(i)
                    .and_then(|a| a.compare(value))
                    .is_some_and(|o| op.matches(o))
            })
            .collect(),
    }
}

// ── Tokenizer ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Str(String),
    Int(i64),
    UInt(u64),
    Float(f64),
    Op(CmpOp),
    LParen,
    RParen,
    Comma,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Ident(s) => write!(f, "'{s}'"),
            Token::Str(s) => write!(f, "string '{s}'"),
            Token::Int(i) => write!(f, "{i}"),
            Token::UInt(u) => write!(f, "{u}"),
            Token::Float(x) => write!(f, "{x}"),
            Token::Op(op) => write!(f, "'{}'", op.as_str()),
            Token::LParen => f.write_str("'('"),
            Token::RParen => f.write_str("')'"),
            Token::Comma => f.write_str("','"),
        }
    }
}

fn tokenize(input: &str) -> Result<Vec<Token>> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            '=' => {
                tokens.push(Token::Op(CmpOp::Eq));
                i += if chars.get(i + 1) == Some(&'=') { 2 } else { 1 };
            }
            '!' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Token::Op(CmpOp::NotEq));
                i += 2;
            }
            '<' => match chars.get(i + 1) {
                Some('=') => {
                    tokens.push(Token::Op(CmpOp::LtEq));
                    i += 2;
                }
                Some('>') => {
                    tokens.push(Token::Op(CmpOp::NotEq));
                    i += 2;
                }
                _ => {
                    tokens.push(Token::Op(CmpOp::Lt));
                    i += 1;
                }
            },
            '>' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Op(CmpOp::GtEq));
                    i += 2;
                } else {
                    tokens.push(Token::Op(CmpOp::Gt));
                    i += 1;
                }
            }
            '\'' => {
                // '' inside a string is an escaped quote.
                let mut s = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        None => {
                            return Err(Error::config(format!(
                                "unterminated string literal in filter '{input}'"
                            )))
                        }
                        Some('\'') if chars.get(i + 1) == Some(&'\'') => {
                            s.push('\'');
                            i += 2;
                        }
                        Some('\'') => {
                            i += 1;
                            break;
                        }
                        Some(&ch) => {
                            s.push(ch);
                            i += 1;
                        }
                    }
                }
                tokens.push(Token::Str(s));
            }
            '`' => {
                let start = i + 1;
                let end = chars[start..]
                    .iter()
                    .position(|&ch| ch == '`')
                    .map(|p| start + p)
                    .ok_or_else(|| {
                        Error::config(format!("unterminated quoted identifier in filter '{input}'"))
                    })?;
                tokens.push(Token::Ident(chars[start..end].iter().collect()));
                i = end + 1;
            }
            c if c.is_ascii_digit()
                || (c == '-' && chars.get(i + 1).is_some_and(|n| n.is_ascii_digit() || *n == '.'))
                || (c == '.' && chars.get(i + 1).is_some_and(|n| n.is_ascii_digit())) =>
            {
                let start = i;
                i += 1;
                while i < chars.len()
                    && (chars[i].is_ascii_digit()
                        || chars[i] == '.'
                        || chars[i] == 'e'
                        || chars[i] == 'E'
                        || ((chars[i] == '-' || chars[i] == '+')
                            && matches!(chars[i - 1], 'e' | 'E')))
                {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                tokens.push(parse_number(&text, input)?);
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            other => {
                return Err(Error::config(format!(
                    "unexpected character '{other}' in filter '{input}'"
                )))
            }
        }
    }
    Ok(tokens)
}

fn parse_number(text: &str, input: &str) -> Result<Token> {
    if !text.contains(['.', 'e', 'E']) {
        if let Ok(i) = text.parse::<i64>() {
            return Ok(Token::Int(i));
        }
        if let Ok(u) = text.parse::<u64>() {
            return Ok(Token::UInt(u));
        }
    }
    text.parse::<f64>()
        .map(Token::Float)
        .map_err(|_| Error::config(format!("invalid number '{text}' in filter '{input}'")))
}

// ── Parser ───────────────────────────────────────────────────────────

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    /// Current nesting of parentheses and `NOT`.
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        tok
    }

    fn peek_keyword(&self, kw: &str) -> bool {
        matches!(self.peek(), Some(Token::Ident(s)) if s.eq_ignore_ascii_case(kw))
    }

    fn eat_keyword(&mut self, kw: &str) -> bool {
        if self.peek_keyword(kw) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: Token) -> Result<()> {
        match self.next() {
            Some(tok) if tok == expected => Ok(()),
            Some(tok) => Err(Error::config(format!("expected {expected}, found {tok}"))),
            None => Err(Error::config(format!(
                "expected {expected}, found end of filter"
            ))),
        }
    }

    fn descend(&mut self) -> Result<()> {
        self.depth += 1;
        if self.depth > config::MAX_FILTER_DEPTH {
            return Err(Error::config(format!(
                "filter nests deeper than {} levels",
                config::MAX_FILTER_DEPTH
            )));
        }
        Ok(())
    }

    fn parse_or(&mut self) -> Result<Expr> {
        let mut terms = vec![self.parse_and()?];
        while self.eat_keyword("OR") {
            terms.push(self.parse_and()?);
        }
        Ok(join_balanced(terms, Expr::or))
    }

    fn parse_and(&mut self) -> Result<Expr> {
        let mut terms = vec![self.parse_not()?];
        while self.eat_keyword("AND") {
            terms.push(self.parse_not()?);
        }
        Ok(join_balanced(terms, Expr::and))
    }

    fn parse_not(&mut self) -> Result<Expr> {
        if self.eat_keyword("NOT") {
            self.descend()?;
            let inner = self.parse_not()?;
            self.depth -= 1;
            return Ok(inner.negate());
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        match self.next() {
            Some(Token::LParen) => {
                self.descend()?;
                let e = self.parse_or()?;
                self.expect(Token::RParen)?;
                self.depth -= 1;
                Ok(e)
            }
            Some(Token::Ident(name)) if name.eq_ignore_ascii_case("TRUE") => {
                Ok(Expr::Literal(true))
            }
            Some(Token::Ident(name)) if name.eq_ignore_ascii_case("FALSE") => {
                Ok(Expr::Literal(false))
            }
            Some(Token::Ident(column)) => self.parse_column_predicate(column),
            Some(tok) => Err(Error::config(format!(
                "expected column name or '(', found {tok}"
            ))),
            None => Err(Error::config("unexpected end of filter")),
        }
    }

    fn parse_column_predicate(&mut self, column: String) -> Result<Expr> {
        let negated = self.eat_keyword("NOT");
        if self.eat_keyword("IN") {
            self.expect(Token::LParen)?;
            let mut values = vec![self.parse_literal()?];
            while matches!(self.peek(), Some(Token::Comma)) {
                self.pos += 1;
                values.push(self.parse_literal()?);
            }
            self.expect(Token::RParen)?;
            return Ok(Expr::InList {
                column,
                values,
                negated,
            });
        }
        if self.eat_keyword("BETWEEN") {
            let low = self.parse_literal()?;
            if !self.eat_keyword("AND") {
                return Err(Error::config("expected AND in BETWEEN"));
            }
            let high = self.parse_literal()?;
            let range = Expr::Compare {
                column: column.clone(),
                op: CmpOp::GtEq,
                value: low,
            }
            .and(Expr::Compare {
                column,
                op: CmpOp::LtEq,
                value: high,
            });
            return Ok(if negated { range.negate() } else { range });
        }
        if negated {
            return Err(Error::config(format!(
                "expected IN or BETWEEN after NOT for column '{column}'"
            )));
        }
        match self.peek() {
            Some(Token::Op(op)) => {
                let op = *op;
                self.pos += 1;
                let value = self.parse_literal()?;
                Ok(Expr::Compare { column, op, value })
            }
            // A bare column is shorthand for `column = TRUE`; binding rejects
            // it for non-boolean columns.
            _ => Ok(Expr::Compare {
                column,
                op: CmpOp::Eq,
                value: ScalarValue::Boolean(true),
            }),
        }
    }

    fn parse_literal(&mut self) -> Result<ScalarValue> {
        match self.next() {
            Some(Token::Int(i)) => Ok(ScalarValue::Int64(i)),
            Some(Token::UInt(u)) => Ok(ScalarValue::UInt64(u)),
            Some(Token::Float(f)) => Ok(ScalarValue::float(f)),
            Some(Token::Str(s)) => Ok(ScalarValue::Utf8(s)),
            Some(Token::Ident(s)) if s.eq_ignore_ascii_case("TRUE") => {
                Ok(ScalarValue::Boolean(true))
            }
            Some(Token::Ident(s)) if s.eq_ignore_ascii_case("FALSE") => {
                Ok(ScalarValue::Boolean(false))
            }
            Some(tok) => Err(Error::config(format!("expected literal, found {tok}"))),
            None => Err(Error::config("expected literal, found end of filter")),
        }
    }
}

/// Combine a non-empty run of operands pairwise, so long `AND` / `OR` chains
/// produce a tree of logarithmic depth.
fn join_balanced(mut terms: Vec<Expr>, join: fn(Expr, Expr) -> Expr) -> Expr {
    while terms.len() > 1 {
        let mut joined = Vec::with_capacity(terms.len().div_ceil(2));
        let mut it = terms.into_iter();
        while let Some(left) = it.next() {
            joined.push(match it.next() {
                Some(right) => join(left, right),
                None => left,
            });
        }
        terms = joined;
    }
    terms.pop().unwrap_or(Expr::Literal(true))
}
