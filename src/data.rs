//! Typed row data shared by every backend

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize, Serializer};
use std::borrow::Cow;
use std::cmp::Ordering;
use std::fmt;

/// Declared value type of a column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColumnType {
    Boolean,
    Integer,
    Float,
    Decimal,
    Text,
    Date,
    DateTime,
    Time,
    Binary,
    Unknown,
}

impl ColumnType {
    /// Map a SQL type name to a column type using SQLite-style affinity rules
    pub fn from_sql_type(declared: &str) -> Self {
        let upper = declared.trim().to_ascii_uppercase();
        if upper.is_empty() {
            return Self::Unknown;
        }
        if upper.contains("INTERVAL") {
            Self::Text
        } else if upper.contains("BOOL") {
            Self::Boolean
        } else if upper.contains("TIMESTAMP") || upper.contains("DATETIME") {
            Self::DateTime
        } else if upper.contains("DATE") {
            Self::Date
        } else if upper.contains("TIME") {
            Self::Time
        } else if upper.contains("INT") {
            Self::Integer
        } else if upper.contains("CHAR")
            || upper.contains("CLOB")
            || upper.contains("TEXT")
            || upper.contains("STRING")
            || upper.contains("UUID")
        {
            Self::Text
        } else if upper.contains("BLOB") || upper.contains("BYTEA") || upper.contains("BINARY") {
            Self::Binary
        } else if upper.contains("REAL") || upper.contains("FLOA") || upper.contains("DOUB") {
            Self::Float
        } else if upper.contains("DEC") || upper.contains("NUMERIC") {
            Self::Decimal
        } else {
            Self::Unknown
        }
    }

    /// SQL type name used when a backend has to create a table
    pub fn sql_name(&self) -> &'static str {
        match self {
            Self::Boolean => "BOOLEAN",
            Self::Integer => "BIGINT",
            Self::Float => "DOUBLE",
            Self::Decimal => "DECIMAL(38,10)",
            Self::Text | Self::Unknown => "VARCHAR",
            Self::Date => "DATE",
            Self::DateTime => "TIMESTAMP",
            Self::Time => "TIME",
            Self::Binary => "BLOB",
        }
    }
}

/// Column name plus declared type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    pub name: String,
    pub column_type: ColumnType,
}

impl ColumnDescriptor {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
        }
    }
}

/// Shared null used where a borrowed value is missing
pub static NULL_VALUE: Value = Value::Null;

/// A single typed cell value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    /// Decimal kept as normalized text
    Decimal(String),
    Text(String),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
    Time(NaiveTime),
    Bytes(Vec<u8>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Build a decimal value, normalizing away trailing fractional zeros
    pub fn decimal(text: impl AsRef<str>) -> Self {
        Value::Decimal(normalize_decimal(text.as_ref()))
    }

    /// One-byte tag mixed into the row hash ahead of the value bytes
    pub fn type_tag(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Int(_) => 2,
            Value::Float(_) => 3,
            Value::Decimal(_) => 4,
            Value::Text(_) => 5,
            Value::Date(_) => 6,
            Value::DateTime(_) => 7,
            Value::Time(_) => 8,
            Value::Bytes(_) => 9,
        }
    }

    /// Culture-invariant text form; `None` for null
    pub fn canonical_text(&self) -> Option<Cow<'_, str>> {
        let text = match self {
            Value::Null => return None,
            Value::Bool(b) => Cow::Borrowed(if *b { "true" } else { "false" }),
            Value::Int(i) => Cow::Owned(i.to_string()),
            Value::Float(f) => Cow::Owned(f.to_string()),
            Value::Decimal(d) => Cow::Borrowed(d.as_str()),
            Value::Text(s) => Cow::Borrowed(s.as_str()),
            Value::Date(d) => Cow::Owned(d.format("%Y-%m-%d").to_string()),
            Value::DateTime(dt) => Cow::Owned(dt.format("%Y-%m-%dT%H:%M:%S%.9f").to_string()),
            Value::Time(t) => Cow::Owned(t.format("%H:%M:%S%.9f").to_string()),
            Value::Bytes(b) => Cow::Owned(b.iter().map(|byte| format!("{:02x}", byte)).collect()),
        };
        Some(text)
    }

    /// Convert between numeric and temporal representations according to
    /// the declared column type. Text is never reinterpreted here.
    pub fn widen(&self, declared: ColumnType) -> Cow<'_, Value> {
        match (declared, self) {
            (ColumnType::Float, Value::Int(i)) => Cow::Owned(Value::Float(*i as f64)),
            (ColumnType::Integer, Value::Float(f))
                if f.fract() == 0.0 && f.abs() < 9.007_199_254_740_992e15 =>
            {
                Cow::Owned(Value::Int(*f as i64))
            }
            (ColumnType::Boolean, Value::Int(i)) if *i == 0 || *i == 1 => {
                Cow::Owned(Value::Bool(*i == 1))
            }
            (ColumnType::Decimal, Value::Int(i)) => Cow::Owned(Value::Decimal(i.to_string())),
            (ColumnType::Decimal, Value::Float(f)) if f.is_finite() => {
                Cow::Owned(Value::decimal(f.to_string()))
            }
            (ColumnType::DateTime, Value::Date(d)) => {
                Cow::Owned(Value::DateTime(d.and_time(NaiveTime::MIN)))
            }
            _ => Cow::Borrowed(self),
        }
    }

    /// Parse raw text from an untyped source into the declared type,
    /// falling back to text when it does not fit
    pub fn parse_text(raw: &str, declared: ColumnType) -> Value {
        match declared {
            ColumnType::Integer => raw.trim().parse::<i64>().map(Value::Int).ok(),
            ColumnType::Float => raw.trim().parse::<f64>().map(Value::Float).ok(),
            ColumnType::Decimal => {
                let trimmed = raw.trim();
                trimmed.parse::<f64>().ok().map(|_| Value::decimal(trimmed))
            }
            ColumnType::Boolean => parse_bool(raw).map(Value::Bool),
            ColumnType::Date => parse_date(raw).map(Value::Date),
            ColumnType::DateTime => parse_datetime(raw).map(Value::DateTime),
            ColumnType::Time => parse_time(raw).map(Value::Time),
            ColumnType::Text | ColumnType::Binary | ColumnType::Unknown => None,
        }
        .unwrap_or_else(|| Value::Text(raw.to_string()))
    }

    /// Ordering used to sort row pairs by key values
    pub fn sort_cmp(&self, other: &Value) -> Ordering {
        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Null, _) => Ordering::Less,
            (_, Value::Null) => Ordering::Greater,
            (Value::Int(a), Value::Int(b)) => a.cmp(b),
            (Value::Float(a), Value::Float(b)) => a.total_cmp(b),
            (Value::Int(a), Value::Float(b)) => (*a as f64).total_cmp(b),
            (Value::Float(a), Value::Int(b)) => a.total_cmp(&(*b as f64)),
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Date(a), Value::Date(b)) => a.cmp(b),
            (Value::DateTime(a), Value::DateTime(b)) => a.cmp(b),
            (Value::Time(a), Value::Time(b)) => a.cmp(b),
            (Value::Bytes(a), Value::Bytes(b)) => a.cmp(b),
            (Value::Decimal(a), Value::Decimal(b)) => {
                match (a.parse::<f64>(), b.parse::<f64>()) {
                    (Ok(x), Ok(y)) => x.total_cmp(&y),
                    _ => a.cmp(b),
                }
            }
            (Value::Text(a), Value::Text(b)) => a.cmp(b),
            _ => self
                .type_tag()
                .cmp(&other.type_tag())
                .then_with(|| self.canonical_text().cmp(&other.canonical_text())),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.canonical_text() {
            Some(text) => f.write_str(&text),
            None => f.write_str("NULL"),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Value::Null => serializer.serialize_none(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Int(i) => serializer.serialize_i64(*i),
            Value::Float(f) => serializer.serialize_f64(*f),
            other => serializer.serialize_str(&other.to_string()),
        }
    }
}

/// Strip trailing fractional zeros and a redundant sign from decimal text
pub fn normalize_decimal(text: &str) -> String {
    let trimmed = text.trim();
    let (negative, digits) = match trimmed.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, trimmed.strip_prefix('+').unwrap_or(trimmed)),
    };

    let mut normalized = if let Some((int_part, frac_part)) = digits.split_once('.') {
        let frac = frac_part.trim_end_matches('0');
        let int_part = if int_part.is_empty() { "0" } else { int_part };
        if frac.is_empty() {
            int_part.to_string()
        } else {
            format!("{}.{}", int_part, frac)
        }
    } else {
        digits.to_string()
    };

    let stripped = normalized.trim_start_matches('0');
    if stripped.is_empty() || stripped.starts_with('.') {
        normalized = format!("0{}", stripped);
    } else {
        normalized = stripped.to_string();
    }

    if negative && normalized != "0" {
        format!("-{}", normalized)
    } else {
        normalized
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" => Some(true),
        "false" => Some(false),
        _ => None,
    }
}

pub(crate) fn parse_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").ok()
}

pub(crate) fn parse_datetime(raw: &str) -> Option<NaiveDateTime> {
    let trimmed = raw.trim();
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(trimmed, fmt).ok())
}

pub(crate) fn parse_time(raw: &str) -> Option<NaiveTime> {
    let trimmed = raw.trim();
    ["%H:%M:%S%.f", "%H:%M"]
        .iter()
        .find_map(|fmt| NaiveTime::parse_from_str(trimmed, fmt).ok())
}

/// Incremental type inference for one untyped column.
///
/// Candidates are narrowed as values arrive; the first survivor in the
/// order Integer, Float, Boolean, Date, DateTime wins, otherwise Text.
#[derive(Debug, Clone)]
pub struct TypeInference {
    candidates: Vec<ColumnType>,
    seen_any: bool,
}

impl TypeInference {
    pub fn new() -> Self {
        Self {
            candidates: vec![
                ColumnType::Integer,
                ColumnType::Float,
                ColumnType::Boolean,
                ColumnType::Date,
                ColumnType::DateTime,
            ],
            seen_any: false,
        }
    }

    /// Feed one raw value; empty values carry no type information
    pub fn observe(&mut self, value: &str) {
        if value.is_empty() || (self.seen_any && self.candidates.is_empty()) {
            return;
        }
        self.seen_any = true;
        self.candidates.retain(|candidate| match candidate {
            ColumnType::Integer => value.trim().parse::<i64>().is_ok(),
            ColumnType::Float => value.trim().parse::<f64>().is_ok(),
            ColumnType::Boolean => parse_bool(value).is_some(),
            ColumnType::Date => parse_date(value).is_some(),
            ColumnType::DateTime => parse_datetime(value).is_some(),
            _ => false,
        });
    }

    pub fn finish(&self) -> ColumnType {
        if !self.seen_any {
            return ColumnType::Text;
        }
        self.candidates.first().copied().unwrap_or(ColumnType::Text)
    }
}

impl Default for TypeInference {
    fn default() -> Self {
        Self::new()
    }
}

/// Infer a declared type for an untyped column from its non-empty values
pub fn infer_column_type<'a, I>(values: I) -> ColumnType
where
    I: IntoIterator<Item = &'a str>,
{
    let mut inference = TypeInference::new();
    for value in values {
        inference.observe(value);
    }
    inference.finish()
}

/// Ordered values aligned to a column descriptor list
pub type Row = Vec<Value>;

/// Full contents of one table as loaded from one side
#[derive(Debug, Clone, Default)]
pub struct TableSnapshot {
    pub columns: Vec<ColumnDescriptor>,
    pub rows: Vec<Row>,
}

impl TableSnapshot {
    pub fn new(columns: Vec<ColumnDescriptor>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn ordinal(&self, name: &str) -> Option<usize> {
        column_ordinal(&self.columns, name)
    }

    /// Re-align rows to another column list; absent columns become null
    pub fn project(&self, target: &[ColumnDescriptor]) -> Vec<Row> {
        let mapping: Vec<Option<usize>> = target.iter().map(|c| self.ordinal(&c.name)).collect();
        self.rows
            .iter()
            .map(|row| {
                mapping
                    .iter()
                    .map(|ordinal| {
                        ordinal
                            .and_then(|i| row.get(i).cloned())
                            .unwrap_or(Value::Null)
                    })
                    .collect()
            })
            .collect()
    }
}

/// Case-sensitive lookup first, then case-insensitive
pub fn column_ordinal(columns: &[ColumnDescriptor], name: &str) -> Option<usize> {
    columns
        .iter()
        .position(|c| c.name == name)
        .or_else(|| columns.iter().position(|c| c.name.eq_ignore_ascii_case(name)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sql_type_mapping() {
        assert_eq!(ColumnType::from_sql_type("INTEGER"), ColumnType::Integer);
        assert_eq!(ColumnType::from_sql_type("bigint"), ColumnType::Integer);
        assert_eq!(ColumnType::from_sql_type("VARCHAR(20)"), ColumnType::Text);
        assert_eq!(ColumnType::from_sql_type("DOUBLE"), ColumnType::Float);
        assert_eq!(ColumnType::from_sql_type("DECIMAL(10,2)"), ColumnType::Decimal);
        assert_eq!(ColumnType::from_sql_type("TIMESTAMP"), ColumnType::DateTime);
        assert_eq!(ColumnType::from_sql_type("DATE"), ColumnType::Date);
        assert_eq!(ColumnType::from_sql_type("INTERVAL"), ColumnType::Text);
        assert_eq!(ColumnType::from_sql_type(""), ColumnType::Unknown);
    }

    #[test]
    fn test_canonical_text() {
        assert_eq!(Value::Float(1.5).canonical_text().unwrap(), "1.5");
        assert_eq!(Value::Float(5.0).canonical_text().unwrap(), "5");
        assert_eq!(Value::Bool(true).canonical_text().unwrap(), "true");
        let date = NaiveDate::from_ymd_opt(2024, 2, 29).unwrap();
        assert_eq!(Value::Date(date).canonical_text().unwrap(), "2024-02-29");
        let dt = date.and_hms_milli_opt(13, 5, 9, 250).unwrap();
        assert_eq!(
            Value::DateTime(dt).canonical_text().unwrap(),
            "2024-02-29T13:05:09.250000000"
        );
        assert!(Value::Null.canonical_text().is_none());
    }

    #[test]
    fn test_normalize_decimal() {
        assert_eq!(normalize_decimal("1.50"), "1.5");
        assert_eq!(normalize_decimal("2.00"), "2");
        assert_eq!(normalize_decimal("-0.0"), "0");
        assert_eq!(normalize_decimal("007.10"), "7.1");
        assert_eq!(normalize_decimal(".5"), "0.5");
        assert_eq!(normalize_decimal("-12"), "-12");
    }

    #[test]
    fn test_widen_never_touches_text() {
        let text = Value::Text("5".to_string());
        assert_eq!(*text.widen(ColumnType::Integer), Value::Text("5".to_string()));
        assert_eq!(*Value::Float(5.0).widen(ColumnType::Integer), Value::Int(5));
        assert_eq!(*Value::Int(1).widen(ColumnType::Boolean), Value::Bool(true));
        assert_eq!(*Value::Int(2).widen(ColumnType::Float), Value::Float(2.0));
    }

    #[test]
    fn test_infer_column_type() {
        assert_eq!(infer_column_type(["1", "2", ""]), ColumnType::Integer);
        assert_eq!(infer_column_type(["1", "2.5"]), ColumnType::Float);
        assert_eq!(infer_column_type(["true", "False"]), ColumnType::Boolean);
        assert_eq!(infer_column_type(["2024-01-01"]), ColumnType::Date);
        assert_eq!(infer_column_type(["2024-01-01 10:00:00"]), ColumnType::DateTime);
        assert_eq!(infer_column_type(["1", "abc"]), ColumnType::Text);
        assert_eq!(infer_column_type(Vec::<&str>::new()), ColumnType::Text);
    }

    #[test]
    fn test_project_fills_missing_columns_with_null() {
        let mut snapshot = TableSnapshot::new(vec![
            ColumnDescriptor::new("id", ColumnType::Integer),
            ColumnDescriptor::new("name", ColumnType::Text),
        ]);
        snapshot.rows.push(vec![Value::Int(1), Value::Text("a".into())]);

        let target = vec![
            ColumnDescriptor::new("name", ColumnType::Text),
            ColumnDescriptor::new("email", ColumnType::Text),
            ColumnDescriptor::new("id", ColumnType::Integer),
        ];
        let rows = snapshot.project(&target);
        assert_eq!(rows[0], vec![Value::Text("a".into()), Value::Null, Value::Int(1)]);
    }
}
