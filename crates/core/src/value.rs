use std::fmt;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};

/// Timestamps always carry six sub-second digits, even when zero.
pub const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";
pub const TIME_FORMAT: &str = "%H:%M:%S%.6f";
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Typed cell values as they arrive from a datasource.
///
/// Rendering to text happens in one place ([`fmt::Display`]) so that the
/// delimited writer, partition paths and SQL filters agree on the format.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Text(String),
    Integer(i64),
    Unsigned(u64),
    Float(f64),
    Boolean(bool),
    Date(NaiveDate),
    Time(NaiveTime),
    DateTime(NaiveDateTime),
    Null,
}

impl CellValue {
    pub fn is_null(&self) -> bool {
        matches!(self, CellValue::Null)
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Text(s) => f.write_str(s),
            CellValue::Integer(v) => write!(f, "{}", v),
            CellValue::Unsigned(v) => write!(f, "{}", v),
            CellValue::Float(v) => write!(f, "{}", v),
            CellValue::Boolean(v) => write!(f, "{}", v),
            CellValue::Date(d) => write!(f, "{}", d.format(DATE_FORMAT)),
            CellValue::Time(t) => write!(f, "{}", t.format(TIME_FORMAT)),
            CellValue::DateTime(dt) => write!(f, "{}", dt.format(DATETIME_FORMAT)),
            CellValue::Null => Ok(()),
        }
    }
}

impl From<&str> for CellValue {
    fn from(s: &str) -> Self {
        CellValue::Text(s.to_string())
    }
}

impl From<String> for CellValue {
    fn from(s: String) -> Self {
        CellValue::Text(s)
    }
}

impl From<i64> for CellValue {
    fn from(v: i64) -> Self {
        CellValue::Integer(v)
    }
}

impl<T: Into<CellValue>> From<Option<T>> for CellValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(CellValue::Null)
    }
}
