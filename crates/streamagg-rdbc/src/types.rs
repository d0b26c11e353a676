//! Column values and result rows
//!
//! Backends decode into [`Value`]; lookups read fields back out of a [`Row`]
//! by column name with the `try_*` accessors.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// One column value as it came off the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// NULL of any column type
    Null,
    #[allow(missing_docs)]
    Bool(bool),
    /// SMALLINT
    Int16(i16),
    /// INT / INTEGER
    Int32(i32),
    /// BIGINT, and the id parameter of every lookup
    Int64(i64),
    /// FLOAT / REAL; `products.weight` on both backends
    Float32(f32),
    /// DOUBLE
    Float64(f64),
    /// Any character column
    String(String),
    /// BLOB / BYTEA, or text MySQL sent without a charset
    Bytes(Vec<u8>),
    /// DATE
    Date(NaiveDate),
    /// DATETIME / TIMESTAMP
    DateTime(NaiveDateTime),
    /// TIMESTAMPTZ
    DateTimeTz(DateTime<Utc>),
    /// JSON / JSONB
    Json(serde_json::Value),
}

impl Value {
    /// `true` for SQL NULL
    #[inline]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Column type name used in conversion errors
    pub fn sql_type(&self) -> &'static str {
        match self {
            Self::Null => "NULL",
            Self::Bool(_) => "BOOLEAN",
            Self::Int16(_) | Self::Int32(_) | Self::Int64(_) => "INTEGER",
            Self::Float32(_) | Self::Float64(_) => "FLOAT",
            Self::String(_) => "TEXT",
            Self::Bytes(_) => "BINARY",
            Self::Date(_) => "DATE",
            Self::DateTime(_) | Self::DateTimeTz(_) => "TIMESTAMP",
            Self::Json(_) => "JSON",
        }
    }

    /// Integer view; numeric text is parsed.
    pub fn as_i64(&self) -> Option<i64> {
        Some(match *self {
            Self::Int16(n) => n.into(),
            Self::Int32(n) => n.into(),
            Self::Int64(n) => n,
            Self::String(ref s) => return s.trim().parse().ok(),
            _ => return None,
        })
    }

    /// Floating point view; integers widen and numeric text is parsed.
    pub fn as_f64(&self) -> Option<f64> {
        Some(match *self {
            Self::Float32(n) => n.into(),
            Self::Float64(n) => n,
            Self::Int16(n) => n.into(),
            Self::Int32(n) => n.into(),
            Self::Int64(n) => n as f64,
            // DECIMAL and some FLOAT columns arrive from MySQL as text
            Self::String(ref s) => return s.trim().parse().ok(),
            _ => return None,
        })
    }

    #[allow(missing_docs)]
    pub fn as_str(&self) -> Option<&str> {
        if let Self::String(s) = self {
            Some(s)
        } else {
            None
        }
    }
}

macro_rules! value_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Self::$variant(v)
                }
            }
        )*
    };
}

value_from! {
    bool => Bool,
    i16 => Int16,
    i32 => Int32,
    i64 => Int64,
    f32 => Float32,
    f64 => Float64,
    String => String,
    NaiveDate => Date,
    serde_json::Value => Json,
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(v.to_owned())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

/// A result row: column names paired with their values
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Vec<String>,
    values: Vec<Value>,
}

impl Row {
    /// `columns` and `values` must be the same length.
    pub fn new(columns: Vec<String>, values: Vec<Value>) -> Self {
        debug_assert_eq!(columns.len(), values.len());
        Self { columns, values }
    }

    #[allow(missing_docs)]
    #[inline]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[allow(missing_docs)]
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    #[allow(missing_docs)]
    #[inline]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Value at position `idx`
    #[inline]
    pub fn get(&self, idx: usize) -> Option<&Value> {
        self.values.get(idx)
    }

    /// Value of the named column, ignoring ASCII case
    pub fn get_by_name(&self, name: &str) -> Option<&Value> {
        let idx = self
            .columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(name))?;
        self.values.get(idx)
    }

    /// Integer column that must not be NULL
    pub fn try_i64(&self, name: &str) -> Result<i64> {
        let value = self.non_null(name)?;
        value
            .as_i64()
            .ok_or_else(|| mismatch(name, "integer", value))
    }

    /// Numeric column that must not be NULL
    pub fn try_f64(&self, name: &str) -> Result<f64> {
        let value = self.non_null(name)?;
        value
            .as_f64()
            .ok_or_else(|| mismatch(name, "number", value))
    }

    /// Text column; NULL reads as `None`.
    pub fn try_opt_string(&self, name: &str) -> Result<Option<String>> {
        let value = self.column(name)?;
        match value {
            Value::Null => Ok(None),
            Value::String(s) => Ok(Some(s.clone())),
            Value::Bytes(raw) => std::str::from_utf8(raw)
                .map(|s| Some(s.to_owned()))
                .map_err(|_| mismatch(name, "utf-8 text", value)),
            other => Err(mismatch(name, "text", other)),
        }
    }

    fn column(&self, name: &str) -> Result<&Value> {
        self.get_by_name(name)
            .ok_or_else(|| Error::type_conversion(format!("no column named {name}")))
    }

    fn non_null(&self, name: &str) -> Result<&Value> {
        match self.column(name)? {
            Value::Null => Err(Error::type_conversion(format!("column {name} is NULL"))),
            value => Ok(value),
        }
    }
}

fn mismatch(name: &str, wanted: &str, found: &Value) -> Error {
    Error::type_conversion(format!(
        "column {name} holds {}, wanted {wanted}",
        found.sql_type()
    ))
}
