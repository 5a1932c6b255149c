//! Condition building for SQL WHERE clauses
//!
//! A [`Predicate`] is an expression tree over [`ColumnRef`]s and typed
//! [`BindValue`]s. Rendering it produces a WHERE clause with `$n` placeholders
//! and the parameter list to bind; column names only ever come from the
//! entity's own column set and values only ever travel as parameters.
//!
//! The same tree evaluates against in-memory [`Record`]s with PostgreSQL
//! semantics for NULL (a NULL operand never matches a comparison).

use std::cmp::Ordering;

use serde_json::Value;

use crate::record::{Record, key_text};
use crate::schema::ColumnRef;
use crate::sql::sanitize::escape_like;
use crate::types::{BindValue, ColumnType, parse_date};

/// Range comparison operator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Gte,
    Lte,
}

impl CompareOp {
    fn as_sql(&self) -> &'static str {
        match self {
            CompareOp::Gte => ">=",
            CompareOp::Lte => "<=",
        }
    }

    fn accepts(&self, ordering: Ordering) -> bool {
        match self {
            CompareOp::Gte => ordering != Ordering::Less,
            CompareOp::Lte => ordering != Ordering::Greater,
        }
    }
}

/// Filter expression over an entity's columns
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// Matches every row
    True,
    /// Exact match
    Eq(ColumnRef, BindValue),
    /// Case-insensitive substring match; the needle is matched literally
    ContainsCi(ColumnRef, String),
    /// Set membership against a list value
    In(ColumnRef, BindValue),
    /// Inclusive range bound; `as_date` compares the column's calendar date
    Compare {
        column: ColumnRef,
        op: CompareOp,
        value: BindValue,
        as_date: bool,
    },
    IsNull(ColumnRef),
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Not(Box<Predicate>),
}

impl Predicate {
    pub fn eq(column: ColumnRef, value: BindValue) -> Self {
        Predicate::Eq(column, value)
    }

    pub fn contains(column: ColumnRef, needle: impl Into<String>) -> Self {
        Predicate::ContainsCi(column, needle.into())
    }

    /// Set membership; numeric lists bind as `bigint[]`, `numeric[]` or `float8[]`,
    /// anything else compares as text
    pub fn in_list(column: ColumnRef, values: Vec<BindValue>) -> Self {
        let list = if let Some(ints) = all_of(&values, |v| match v {
            BindValue::Int(i) => Some(*i),
            _ => None,
        }) {
            BindValue::IntList(ints)
        } else if let Some(decimals) = all_of(&values, |v| match v {
            BindValue::Decimal(d) => Some(*d),
            _ => None,
        }) {
            BindValue::DecimalList(decimals)
        } else if let Some(floats) = all_of(&values, |v| match v {
            BindValue::Float(f) => Some(*f),
            BindValue::Int(i) => Some(*i as f64),
            _ => None,
        }) {
            BindValue::FloatList(floats)
        } else {
            BindValue::TextList(values.iter().map(bind_text).collect())
        };
        Predicate::In(column, list)
    }

    pub fn gte(column: ColumnRef, value: BindValue) -> Self {
        Self::compare(column, CompareOp::Gte, value)
    }

    pub fn lte(column: ColumnRef, value: BindValue) -> Self {
        Self::compare(column, CompareOp::Lte, value)
    }

    fn compare(column: ColumnRef, op: CompareOp, value: BindValue) -> Self {
        // A bare date against a timestamp column compares by calendar day
        let as_date = matches!(value, BindValue::Date(_))
            && matches!(column.column_type(), ColumnType::Timestamp);
        Predicate::Compare {
            column,
            op,
            value,
            as_date,
        }
    }

    pub fn is_null(column: ColumnRef) -> Self {
        Predicate::IsNull(column)
    }

    /// Conjunction, flattening nested conjunctions and dropping `True`
    pub fn and(predicates: impl IntoIterator<Item = Predicate>) -> Self {
        let mut flat = Vec::new();
        for p in predicates {
            match p {
                Predicate::True => {}
                Predicate::And(inner) => flat.extend(inner),
                other => flat.push(other),
            }
        }
        match flat.len() {
            0 => Predicate::True,
            1 => flat.pop().unwrap_or(Predicate::True),
            _ => Predicate::And(flat),
        }
    }

    pub fn or(predicates: impl IntoIterator<Item = Predicate>) -> Self {
        let mut items: Vec<Predicate> = predicates.into_iter().collect();
        if items.len() == 1 {
            return items.pop().unwrap_or(Predicate::True);
        }
        Predicate::Or(items)
    }

    pub fn negate(predicate: Predicate) -> Self {
        Predicate::Not(Box::new(predicate))
    }

    /// Render as SQL, appending bound values to `params`
    pub fn to_sql(&self, params: &mut Vec<BindValue>) -> String {
        match self {
            Predicate::True => "TRUE".to_string(),
            Predicate::Eq(column, value) => {
                let placeholder = push(params, value.clone());
                format!("{} = {}", operand(column, value), placeholder)
            }
            Predicate::ContainsCi(column, needle) => {
                let pattern = BindValue::Text(format!("%{}%", escape_like(needle)));
                let text = operand(column, &pattern);
                let placeholder = push(params, pattern);
                format!("{} ILIKE {} ESCAPE '\\'", text, placeholder)
            }
            Predicate::In(column, values) => {
                if !values.is_list() {
                    let placeholder = push(params, values.clone());
                    return format!("{} = {}", operand(column, values), placeholder);
                }
                let placeholder = push(params, values.clone());
                format!("{} = ANY({})", operand(column, values), placeholder)
            }
            Predicate::Compare {
                column,
                op,
                value,
                as_date,
            } => {
                let lhs = if *as_date {
                    format!("{}::date", column.to_sql())
                } else {
                    operand(column, value)
                };
                let placeholder = push(params, value.clone());
                format!("{} {} {}", lhs, op.as_sql(), placeholder)
            }
            Predicate::IsNull(column) => format!("{} IS NULL", column.to_sql()),
            Predicate::And(items) => join(items, " AND ", "TRUE", params),
            Predicate::Or(items) => join(items, " OR ", "FALSE", params),
            Predicate::Not(inner) => format!("NOT ({})", inner.to_sql(params)),
        }
    }

    /// Evaluate against a record
    pub fn matches(&self, record: &Record) -> bool {
        match self {
            Predicate::True => true,
            Predicate::Eq(column, value) => record
                .get(column.name())
                .is_some_and(|raw| value_equals(column.column_type(), raw, value)),
            Predicate::ContainsCi(column, needle) => record
                .get(column.name())
                .and_then(json_text)
                .is_some_and(|text| text.to_lowercase().contains(&needle.to_lowercase())),
            Predicate::In(column, values) => {
                let Some(raw) = record.get(column.name()) else {
                    return false;
                };
                match values {
                    BindValue::IntList(ints) => raw
                        .as_i64()
                        .or_else(|| raw.as_str().and_then(|s| s.trim().parse().ok()))
                        .is_some_and(|v| ints.contains(&v)),
                    BindValue::DecimalList(items) => {
                        any_equal(column.column_type(), raw, items.iter().map(|d| BindValue::Decimal(*d)))
                    }
                    BindValue::FloatList(items) => {
                        any_equal(column.column_type(), raw, items.iter().map(|f| BindValue::Float(*f)))
                    }
                    BindValue::TextList(texts) => {
                        json_text(raw).is_some_and(|text| texts.contains(&text))
                    }
                    scalar => value_equals(column.column_type(), raw, scalar),
                }
            }
            Predicate::Compare {
                column,
                op,
                value,
                as_date,
            } => {
                let Some(raw) = record.get(column.name()) else {
                    return false;
                };
                let actual = if *as_date {
                    json_text(raw)
                        .as_deref()
                        .and_then(parse_date)
                        .map(BindValue::Date)
                } else {
                    column.column_type().coerce_json(raw)
                };
                actual
                    .and_then(|a| compare_bind(&a, value))
                    .is_some_and(|ordering| op.accepts(ordering))
            }
            Predicate::IsNull(column) => record.get(column.name()).is_none(),
            Predicate::And(items) => items.iter().all(|p| p.matches(record)),
            Predicate::Or(items) => items.iter().any(|p| p.matches(record)),
            Predicate::Not(inner) => !inner.matches(record),
        }
    }
}

/// Build SQL WHERE clause from a predicate
///
/// Returns the clause with `$n` placeholders numbered after any values already
/// in `params`, so several clauses can share one parameter list.
pub fn build_condition_clause(predicate: &Predicate, params: &mut Vec<BindValue>) -> String {
    predicate.to_sql(params)
}

fn push(params: &mut Vec<BindValue>, value: BindValue) -> String {
    params.push(value);
    format!("${}", params.len())
}

/// Left-hand side of a comparison; text values compare against the column's text form
fn operand(column: &ColumnRef, value: &BindValue) -> String {
    if value.is_text() && !column.column_type().is_textual() {
        format!("{}::text", column.to_sql())
    } else {
        column.to_sql()
    }
}

fn join(items: &[Predicate], separator: &str, empty: &str, params: &mut Vec<BindValue>) -> String {
    match items {
        [] => empty.to_string(),
        [single] => single.to_sql(params),
        _ => {
            let clauses: Vec<String> = items
                .iter()
                .map(|p| format!("({})", p.to_sql(params)))
                .collect();
            clauses.join(separator)
        }
    }
}

fn bind_text(value: &BindValue) -> String {
    match value {
        BindValue::Text(s) => s.clone(),
        BindValue::Int(i) => i.to_string(),
        BindValue::Float(f) => f.to_string(),
        BindValue::Decimal(d) => d.to_string(),
        BindValue::Bool(b) => b.to_string(),
        BindValue::Date(d) => d.to_string(),
        BindValue::Timestamp(ts) => ts.to_rfc3339(),
        BindValue::Uuid(u) => u.to_string(),
        BindValue::IntList(items) => format!("{:?}", items),
        BindValue::DecimalList(items) => format!("{:?}", items),
        BindValue::FloatList(items) => format!("{:?}", items),
        BindValue::TextList(items) => items.join(","),
    }
}

/// Text form of a JSON scalar, `None` for NULL, arrays and objects
pub(crate) fn json_text(value: &Value) -> Option<String> {
    key_text(value)
}

fn all_of<T>(values: &[BindValue], pick: impl Fn(&BindValue) -> Option<T>) -> Option<Vec<T>> {
    values.iter().map(pick).collect()
}

/// Numeric membership compares by value, so `1.50` is in `[1.5]`
fn any_equal(column_type: &ColumnType, raw: &Value, items: impl IntoIterator<Item = BindValue>) -> bool {
    let Some(actual) = column_type.coerce_json(raw) else {
        return false;
    };
    items
        .into_iter()
        .any(|item| compare_bind(&actual, &item) == Some(Ordering::Equal))
}

fn value_equals(column_type: &ColumnType, raw: &Value, expected: &BindValue) -> bool {
    match expected {
        BindValue::Text(s) => json_text(raw).is_some_and(|text| &text == s),
        other => column_type
            .coerce_json(raw)
            .is_some_and(|actual| compare_bind(&actual, other) == Some(Ordering::Equal)),
    }
}

/// Order two bind values of the same kind
pub(crate) fn compare_bind(a: &BindValue, b: &BindValue) -> Option<Ordering> {
    match (a, b) {
        (BindValue::Text(x), BindValue::Text(y)) => Some(x.cmp(y)),
        (BindValue::Int(x), BindValue::Int(y)) => Some(x.cmp(y)),
        (BindValue::Float(x), BindValue::Float(y)) => x.partial_cmp(y),
        (BindValue::Int(x), BindValue::Float(y)) => (*x as f64).partial_cmp(y),
        (BindValue::Float(x), BindValue::Int(y)) => x.partial_cmp(&(*y as f64)),
        (BindValue::Decimal(x), BindValue::Decimal(y)) => Some(x.cmp(y)),
        (BindValue::Bool(x), BindValue::Bool(y)) => Some(x.cmp(y)),
        (BindValue::Date(x), BindValue::Date(y)) => Some(x.cmp(y)),
        (BindValue::Timestamp(x), BindValue::Timestamp(y)) => Some(x.cmp(y)),
        (BindValue::Timestamp(x), BindValue::Date(y)) => Some(x.date_naive().cmp(y)),
        (BindValue::Uuid(x), BindValue::Uuid(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

/// Order two raw column values the way PostgreSQL ascending order does (NULLs last)
pub(crate) fn compare_json(column_type: &ColumnType, a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(x), Some(y)) => {
            let typed = column_type
                .coerce_json(x)
                .zip(column_type.coerce_json(y))
                .and_then(|(tx, ty)| compare_bind(&tx, &ty));
            typed.unwrap_or_else(|| json_text(x).cmp(&json_text(y)))
        }
    }
}
