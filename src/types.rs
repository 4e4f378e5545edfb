//! Column model and the record type rows travel as

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::sql::sanitize::quote_identifier;

/// One row: output label to value, kept in insertion order
pub type Record = serde_json::Map<String, Value>;

/// Current UTC time as the JSON value stored into timestamp columns
pub fn timestamp_now() -> Value {
    Value::String(chrono::Utc::now().to_rfc3339())
}

// ============================================================================
// Column Types
// ============================================================================

/// Storage type of an entity column.
///
/// Serialized with a `type` tag so descriptors can be declared as JSON, e.g.
/// `{"name": "price", "type": "decimal", "precision": 10, "scale": 2}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ColumnType {
    String,
    /// 64-bit signed integer
    Integer,
    Decimal {
        #[serde(default = "default_precision")]
        precision: u8,
        #[serde(default = "default_scale")]
        scale: u8,
    },
    Boolean,
    /// UTC instant, exchanged as an RFC 3339 string
    Timestamp,
    Json,
    /// Text restricted to a fixed set of values
    Enum { values: Vec<String> },
}

fn default_precision() -> u8 {
    19
}

fn default_scale() -> u8 {
    4
}

impl ColumnType {
    pub fn decimal(precision: u8, scale: u8) -> Self {
        ColumnType::Decimal { precision, scale }
    }

    /// PostgreSQL column type used when creating a table
    pub fn to_sql_type(&self, column_name: &str) -> String {
        match self {
            ColumnType::String => "TEXT".into(),
            ColumnType::Integer => "BIGINT".into(),
            ColumnType::Decimal { precision, scale } => format!("NUMERIC({},{})", precision, scale),
            ColumnType::Boolean => "BOOLEAN".into(),
            ColumnType::Timestamp => "TIMESTAMP WITH TIME ZONE".into(),
            ColumnType::Json => "JSONB".into(),
            ColumnType::Enum { values } => {
                let allowed: Vec<String> = values
                    .iter()
                    .map(|v| format!("'{}'", v.replace('\'', "''")))
                    .collect();
                format!(
                    "TEXT CHECK ({} IN ({}))",
                    quote_identifier(column_name),
                    allowed.join(", ")
                )
            }
        }
    }

    /// Check that `value` can be written to a column of this type.
    ///
    /// Null always passes; nullability belongs to the column. Integers and
    /// decimals may arrive as numeric strings.
    pub fn validate_value(&self, value: &Value) -> Result<(), String> {
        let ok = match (self, value) {
            (_, Value::Null) | (ColumnType::Json, _) => true,
            (ColumnType::String, Value::String(_)) | (ColumnType::Boolean, Value::Bool(_)) => true,
            (ColumnType::Integer, Value::Number(n)) => n.is_i64(),
            (ColumnType::Integer, Value::String(s)) => {
                return s
                    .parse::<i64>()
                    .map(drop)
                    .map_err(|_| format!("'{}' is not an integer", s));
            }
            (ColumnType::Decimal { .. }, Value::Number(_)) => true,
            (ColumnType::Decimal { .. }, Value::String(s)) => {
                return s
                    .parse::<rust_decimal::Decimal>()
                    .map(drop)
                    .map_err(|_| format!("'{}' is not a decimal", s));
            }
            (ColumnType::Timestamp, Value::String(s)) => {
                return chrono::DateTime::parse_from_rfc3339(s)
                    .map(drop)
                    .map_err(|e| format!("'{}' is not an RFC 3339 timestamp: {}", s, e));
            }
            (ColumnType::Enum { values }, Value::String(s)) => {
                if values.contains(s) {
                    true
                } else {
                    return Err(format!("'{}' is not one of {:?}", s, values));
                }
            }
            _ => false,
        };

        if ok {
            Ok(())
        } else {
            Err(format!("{} does not fit a {:?} column", value, self))
        }
    }
}

// ============================================================================
// Column Definitions
// ============================================================================

fn nullable_by_default() -> bool {
    true
}

/// A named, typed column of an entity
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ColumnDefinition {
    pub name: String,

    #[serde(flatten)]
    pub column_type: ColumnType,

    #[serde(default = "nullable_by_default")]
    pub nullable: bool,

    #[serde(default)]
    pub unique: bool,

    /// SQL default expression, used only when creating the table
    #[serde(rename = "default", skip_serializing_if = "Option::is_none")]
    pub default_value: Option<String>,
}

impl ColumnDefinition {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            nullable: true,
            unique: false,
            default_value: None,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn default(mut self, expression: impl Into<String>) -> Self {
        self.default_value = Some(expression.into());
        self
    }
}
