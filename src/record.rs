use std::cmp::Ordering;
use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

/// One field value as handed over by the record source.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Number(f64),
    Date(DateTime<Utc>),
    Text(String),
}

impl Value {
    pub fn is_missing(&self) -> bool {
        match self {
            Value::Null => true,
            Value::Text(s) => s.trim().is_empty(),
            _ => false,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) if n.is_finite() => Some(*n),
            Value::Text(s) => s.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<DateTime<Utc>> {
        match self {
            Value::Date(d) => Some(*d),
            Value::Text(s) => parse_timestamp(s),
            _ => None,
        }
    }

    /// Plain text rendering; `None` for missing values so callers never print "null".
    pub fn as_text(&self) -> Option<String> {
        match self {
            Value::Null => None,
            Value::Bool(b) => Some(b.to_string()),
            Value::Number(n) => Some(format_number(*n)),
            Value::Date(d) => Some(d.to_rfc3339()),
            Value::Text(s) => Some(s.clone()),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self { Value::Text(s.to_string()) }
}

impl From<String> for Value {
    fn from(s: String) -> Self { Value::Text(s) }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self { Value::Number(n) }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self { Value::Number(n as f64) }
}

impl From<DateTime<Utc>> for Value {
    fn from(d: DateTime<Utc>) -> Self { Value::Date(d) }
}

/// One operational event. The engine only ever reads records.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    #[serde(flatten)]
    pub fields: BTreeMap<String, Value>,
}

impl Record {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into(), fields: BTreeMap::new() }
    }

    pub fn with(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(field.to_string(), value.into());
        self
    }

    /// Field lookup; `id` resolves to the record identifier.
    pub fn get(&self, field: &str) -> Option<Value> {
        if field == "id" { return Some(Value::Text(self.id.clone())); }
        self.fields.get(field).filter(|v| !v.is_missing()).cloned()
    }

    pub fn text(&self, field: &str) -> Option<String> {
        if field == "id" { return Some(self.id.clone()); }
        self.fields.get(field).filter(|v| !v.is_missing()).and_then(Value::as_text)
    }

    pub fn number(&self, field: &str) -> Option<f64> {
        self.fields.get(field).and_then(Value::as_number)
    }

    pub fn date(&self, field: &str) -> Option<DateTime<Utc>> {
        self.fields.get(field).and_then(Value::as_date)
    }
}

/// Total id order: integer ids first in numeric order, then every other id in
/// byte order.
pub fn compare_ids(a: &str, b: &str) -> Ordering {
    match (a.parse::<i64>(), b.parse::<i64>()) {
        (Ok(x), Ok(y)) => x.cmp(&y).then_with(|| a.cmp(b)),
        (Ok(_), Err(_)) => Ordering::Less,
        (Err(_), Ok(_)) => Ordering::Greater,
        (Err(_), Err(_)) => a.cmp(b),
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    #[default]
    String,
    Number,
    Date,
    Enum,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Default)]
pub struct FieldDef {
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: FieldType,
    /// Known value set for enum fields, in display order.
    #[serde(default)]
    pub values: Vec<String>,
}

/// Declared semantic type of every field the engine addresses by name.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldRegistry {
    fields: Vec<FieldDef>,
}

impl FieldRegistry {
    pub fn new() -> Self { Self::default() }

    pub fn from_defs(defs: Vec<FieldDef>) -> Self {
        let mut reg = Self::new();
        for d in defs { reg.insert(d); }
        reg
    }

    pub fn insert(&mut self, def: FieldDef) {
        if let Some(slot) = self.fields.iter_mut().find(|f| f.name == def.name) { *slot = def; } else { self.fields.push(def); }
    }

    pub fn declare(mut self, name: &str, kind: FieldType) -> Self {
        self.insert(FieldDef { name: name.to_string(), kind, values: vec![] });
        self
    }

    pub fn declare_enum(mut self, name: &str, values: &[&str]) -> Self {
        self.insert(FieldDef { name: name.to_string(), kind: FieldType::Enum, values: values.iter().map(|s| s.to_string()).collect() });
        self
    }

    pub fn def(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Declared type, or `None` for an unregistered field. `id` is always a string.
    pub fn kind(&self, name: &str) -> Option<FieldType> {
        if name == "id" { return Some(FieldType::String); }
        self.def(name).map(|d| d.kind)
    }

    pub fn kind_or_string(&self, name: &str) -> FieldType {
        self.kind(name).unwrap_or(FieldType::String)
    }

    pub fn iter(&self) -> impl Iterator<Item = &FieldDef> { self.fields.iter() }

    pub fn is_empty(&self) -> bool { self.fields.is_empty() }
}

/// Tolerant timestamp parsing shared by records and query bounds.
/// Zone-less values are read as UTC; a bare date means its midnight.
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if s.is_empty() { return None; }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) { return Some(dt.with_timezone(&Utc)); }
    let mut alt = s.replace(' ', "T");
    if !alt.ends_with('Z') && !alt.get(10..).unwrap_or("").contains(['+', '-']) { alt.push('Z'); }
    if let Ok(dt) = DateTime::parse_from_rfc3339(&alt) { return Some(dt.with_timezone(&Utc)); }
    parse_naive(s).map(|n| DateTime::<Utc>::from_naive_utc_and_offset(n, Utc))
}

/// Zone-less parsing used when a bound must be read in the caller's zone.
pub fn parse_naive(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    for fmt in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M", "%Y-%m-%dT%H:%M"] {
        if let Ok(n) = NaiveDateTime::parse_from_str(s, fmt) { return Some(n); }
    }
    parse_date_only(s).and_then(|d| d.and_hms_opt(0, 0, 0))
}

pub fn parse_date_only(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").ok()
}

pub fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 { format!("{}", n as i64) } else { format!("{}", n) }
}
