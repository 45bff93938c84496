//! Core data types for the timeflow event store
//!
//! This module defines the fundamental types used throughout the storage layer:
//! - `Value`: A dynamically typed scalar (signed, unsigned, float, bool, string)
//! - `Record`: A value observed at a point in time
//! - `Event`: A record tagged with the series key it belongs to
//! - `Series`: A key plus an ordered run of records, returned by range queries
//!   and live updates

use chrono::Utc;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;

/// Unix timestamp in seconds
pub type Timestamp = i64;

/// Current wall-clock time in unix seconds
pub fn now() -> Timestamp {
    Utc::now().timestamp()
}

/// A dynamically typed scalar value
///
/// Serialized untagged, so `{"y": 3}` holds an `Int` and `{"y": "3"}` a `Str`.
/// Variant order doubles as the deserialization priority.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Int(i64),
    UInt(u64),
    Float(f64),
    Bool(bool),
    Str(String),
}

impl Value {
    /// Numeric view of the value, used by the pipeline operators
    ///
    /// Booleans and strings have no numeric view.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(v) => Some(*v as f64),
            Value::UInt(v) => Some(*v as f64),
            Value::Float(v) => Some(*v),
            Value::Bool(_) | Value::Str(_) => None,
        }
    }

    /// Name of the variant, for log messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Int(_) => "int",
            Value::UInt(_) => "uint",
            Value::Float(_) => "float",
            Value::Bool(_) => "bool",
            Value::Str(_) => "string",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{}", v),
            Value::UInt(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::Bool(v) => write!(f, "{}", v),
            Value::Str(v) => write!(f, "{}", v),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::UInt(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

/// A single observation: a value at a point in time
///
/// Wire shape is `{"time": <unix-seconds>, "y": <value>}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Unix timestamp in seconds
    pub time: Timestamp,
    /// The observed value
    #[serde(rename = "y")]
    pub value: Value,
}

impl Record {
    pub fn new(time: Timestamp, value: impl Into<Value>) -> Self {
        Self {
            time,
            value: value.into(),
        }
    }
}

/// A record tagged with its series key; the unit of ingestion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub key: String,
    #[serde(flatten)]
    pub record: Record,
}

impl Event {
    /// Create an event at a specific time
    pub fn new(key: impl Into<String>, time: Timestamp, value: impl Into<Value>) -> Self {
        Self {
            key: key.into(),
            record: Record::new(time, value),
        }
    }

    /// Create an event stamped with the current time
    pub fn now(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(key, now(), value)
    }

    pub fn time(&self) -> Timestamp {
        self.record.time
    }

    pub fn value(&self) -> &Value {
        &self.record.value
    }
}

/// A series key with its records in ascending encoded order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Series {
    pub key: String,
    pub records: Vec<Record>,
}

impl Series {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            records: Vec::new(),
        }
    }

    /// Expand the series into one event per record, preserving order
    pub fn into_events(self) -> impl Iterator<Item = Event> {
        let key = self.key;
        self.records.into_iter().map(move |record| Event {
            key: key.clone(),
            record,
        })
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

fn key_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9_.]+$").expect("static key pattern"))
}

/// Check that a series key is non-empty and uses only alphanumerics, `_` and `.`
pub fn is_valid_key(key: &str) -> bool {
    key_pattern().is_match(key)
}
