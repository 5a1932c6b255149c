//! Core type definitions for the admin engine
//!
//! Includes column types, column definitions and the typed values that are
//! bound as query parameters.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

// ============================================================================
// Column Types
// ============================================================================

/// Column type of an entity attribute
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ColumnType {
    /// Short text (VARCHAR, CHAR, CITEXT)
    String,

    /// Long text (TEXT)
    Text,

    /// Integer (SMALLINT, INTEGER, BIGINT)
    Integer,

    /// Floating point (REAL, DOUBLE PRECISION)
    Float,

    /// Decimal with precision and scale (NUMERIC)
    Decimal {
        /// Total number of digits (default: 19)
        #[serde(default = "default_precision")]
        precision: u8,
        /// Number of digits after decimal point (default: 4)
        #[serde(default = "default_scale")]
        scale: u8,
    },

    /// Boolean (BOOLEAN)
    Boolean,

    /// Calendar date (DATE)
    Date,

    /// Point in time (TIMESTAMP, TIMESTAMPTZ)
    Timestamp,

    /// JSON document (JSON, JSONB)
    Json,

    /// UUID (UUID)
    Uuid,

    /// Text restricted to a fixed set of values
    Enum {
        /// List of allowed string values
        values: Vec<String>,
    },
}

fn default_precision() -> u8 {
    19
}

fn default_scale() -> u8 {
    4
}

impl ColumnType {
    /// Create a Decimal type with specified precision and scale
    pub fn decimal(precision: u8, scale: u8) -> Self {
        ColumnType::Decimal { precision, scale }
    }

    /// Create an Enum type from its allowed values
    pub fn enumeration<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ColumnType::Enum {
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    /// Free-text columns, searched and label-eligible by default
    pub fn is_textual(&self) -> bool {
        matches!(self, ColumnType::String | ColumnType::Text)
    }

    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            ColumnType::Integer | ColumnType::Float | ColumnType::Decimal { .. }
        )
    }

    pub fn is_temporal(&self) -> bool {
        matches!(self, ColumnType::Date | ColumnType::Timestamp)
    }

    /// Map an `information_schema.columns` type description to a column type
    pub fn from_pg(data_type: &str) -> Self {
        match data_type {
            "character varying" | "character" | "name" => ColumnType::String,
            "text" => ColumnType::Text,
            "smallint" | "integer" | "bigint" => ColumnType::Integer,
            "real" | "double precision" => ColumnType::Float,
            "numeric" => ColumnType::Decimal {
                precision: default_precision(),
                scale: default_scale(),
            },
            "boolean" => ColumnType::Boolean,
            "date" => ColumnType::Date,
            "timestamp with time zone" | "timestamp without time zone" => ColumnType::Timestamp,
            "json" | "jsonb" => ColumnType::Json,
            "uuid" => ColumnType::Uuid,
            // enum types; labels are not introspected, so any value is accepted
            "USER-DEFINED" => ColumnType::Enum { values: Vec::new() },
            // citext and anything unknown compare as text
            _ => ColumnType::String,
        }
    }

    /// Coerce a raw request string into a value of this column type
    ///
    /// Returns `None` for blank input or input that does not parse; callers
    /// treat that as "ignore this input".
    pub fn coerce(&self, raw: &str) -> Option<BindValue> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }

        match self {
            ColumnType::String | ColumnType::Text | ColumnType::Json => {
                Some(BindValue::Text(raw.to_string()))
            }
            ColumnType::Enum { values } => {
                if values.is_empty() || values.iter().any(|v| v == raw) {
                    Some(BindValue::Text(raw.to_string()))
                } else {
                    None
                }
            }
            ColumnType::Integer => raw.parse::<i64>().ok().map(BindValue::Int),
            ColumnType::Float => raw
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .map(BindValue::Float),
            ColumnType::Decimal { .. } => Decimal::from_str(raw).ok().map(BindValue::Decimal),
            ColumnType::Boolean => parse_bool(raw).map(BindValue::Bool),
            ColumnType::Date => parse_date(raw).map(BindValue::Date),
            ColumnType::Timestamp => parse_timestamp(raw).map(BindValue::Timestamp),
            ColumnType::Uuid => uuid::Uuid::parse_str(raw).ok().map(BindValue::Uuid),
        }
    }

    /// Coerce a JSON scalar (as decoded from a query string or request body)
    pub fn coerce_json(&self, value: &serde_json::Value) -> Option<BindValue> {
        match value {
            serde_json::Value::String(s) => self.coerce(s),
            serde_json::Value::Number(n) => self.coerce(&n.to_string()),
            serde_json::Value::Bool(b) => match self {
                ColumnType::Boolean => Some(BindValue::Bool(*b)),
                _ => self.coerce(&b.to_string()),
            },
            _ => None,
        }
    }
}

/// Parse the common truthy/falsy spellings of a boolean
pub fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_lowercase().as_str() {
        "true" | "t" | "1" | "yes" | "y" | "on" => Some(true),
        "false" | "f" | "0" | "no" | "n" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a calendar date, accepting a timestamp and keeping its date part
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .or_else(|| parse_timestamp(raw).map(|ts| ts.date_naive()))
}

/// Parse a timestamp as RFC 3339, or as a naive date-time interpreted as UTC
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
        .map(|naive| naive.and_utc())
}

/// Whether a raw string is a bare calendar date (no time component)
pub fn is_date_only(raw: &str) -> bool {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").is_ok()
}

// ============================================================================
// Column Definitions
// ============================================================================

fn default_nullable() -> bool {
    true
}

/// Column of an entity table
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ColumnDefinition {
    /// Column name (validated identifier)
    pub name: String,

    /// Column type
    #[serde(flatten)]
    pub column_type: ColumnType,

    /// Whether the column allows NULL values (default: true)
    #[serde(default = "default_nullable")]
    pub nullable: bool,

    /// Whether the column carries a single-column UNIQUE constraint (default: false)
    #[serde(default)]
    pub unique: bool,
}

impl ColumnDefinition {
    /// Create a new column definition with a name and type
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            nullable: true,
            unique: false,
        }
    }

    /// Set the column as non-nullable
    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    /// Set the column as unique
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }
}

// ============================================================================
// Bind Values
// ============================================================================

/// A typed query parameter
///
/// Every value that reaches SQL text does so as a `$n` placeholder bound to one
/// of these, never by string concatenation.
#[derive(Debug, Clone, PartialEq)]
pub enum BindValue {
    Text(String),
    Int(i64),
    Float(f64),
    Decimal(Decimal),
    Bool(bool),
    Date(NaiveDate),
    Timestamp(DateTime<Utc>),
    Uuid(uuid::Uuid),
    IntList(Vec<i64>),
    DecimalList(Vec<Decimal>),
    FloatList(Vec<f64>),
    TextList(Vec<String>),
}

impl BindValue {
    /// Whether this value is compared through the column's text representation
    pub fn is_text(&self) -> bool {
        matches!(self, BindValue::Text(_) | BindValue::TextList(_))
    }

    /// Whether this value binds as an array for `= ANY(..)`
    pub fn is_list(&self) -> bool {
        matches!(
            self,
            BindValue::IntList(_) | BindValue::DecimalList(_) | BindValue::FloatList(_) | BindValue::TextList(_)
        )
    }
}
