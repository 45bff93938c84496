//! Order-preserving text encoding for records
//!
//! Records are stored as `<time>::<value>` strings in a lexicographically
//! ordered collection, so a plain string range scan is a time range scan.
//!
//! Format:
//! - time: 16 lowercase hex digits of the big-endian `u64` obtained by
//!   flipping the sign bit of the `i64` unix-seconds timestamp
//! - separator: `::`
//! - value: `-12` (signed), `12u` (unsigned), `1.5` / `1e300` (float),
//!   `true` / `false` (bool), `"text"` (JSON-quoted string)
//!
//! Decoding a value tries signed, unsigned, float, bool and quoted string in
//! that order; the first successful parse wins.

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::types::{Record, Timestamp, Value};

/// Separator between the encoded time and the encoded value
pub const SEPARATOR: &str = "::";

/// Appended to the upper range bound so every value suffix sorts below it
pub const RANGE_SENTINEL: char = char::MAX;

const SIGN_BIT: u64 = 1 << 63;
const TIME_WIDTH: usize = 16;

/// Encode a timestamp as fixed-width, order-preserving hex
pub fn encode_time(t: Timestamp) -> String {
    format!("{:016x}", (t as u64) ^ SIGN_BIT)
}

/// Decode a timestamp produced by [`encode_time`]
pub fn decode_time(s: &str) -> StorageResult<Timestamp> {
    if s.len() != TIME_WIDTH || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(StorageError::Decode(format!("invalid time: {:?}", s)));
    }

    let raw = u64::from_str_radix(s, 16)
        .map_err(|e| StorageError::Decode(format!("invalid time {:?}: {}", s, e)))?;
    Ok((raw ^ SIGN_BIT) as i64)
}

/// Encode a value in its type-preserving text form
pub fn encode_value(v: &Value) -> String {
    match v {
        Value::Int(n) => n.to_string(),
        Value::UInt(n) => format!("{}u", n),
        // Debug keeps a `.` or exponent on every finite float
        Value::Float(f) => format!("{:?}", f),
        Value::Bool(b) => b.to_string(),
        Value::Str(s) => serde_json::Value::String(s.clone()).to_string(),
    }
}

/// Decode a value, trying signed, unsigned, float, bool, then quoted string
pub fn decode_value(s: &str) -> StorageResult<Value> {
    if let Ok(n) = s.parse::<i64>() {
        return Ok(Value::Int(n));
    }

    if let Ok(n) = s.strip_suffix('u').unwrap_or(s).parse::<u64>() {
        return Ok(Value::UInt(n));
    }

    if let Ok(f) = s.parse::<f64>() {
        return Ok(Value::Float(f));
    }

    match s {
        "true" => return Ok(Value::Bool(true)),
        "false" => return Ok(Value::Bool(false)),
        _ => {}
    }

    serde_json::from_str::<String>(s)
        .map(Value::Str)
        .map_err(|e| StorageError::Decode(format!("invalid value {:?}: {}", s, e)))
}

/// Encode a record as `<time>::<value>`
pub fn encode_record(r: &Record) -> String {
    format!("{}{}{}", encode_time(r.time), SEPARATOR, encode_value(&r.value))
}

/// Strict inverse of [`encode_record`]
pub fn decode_record(entry: &str) -> StorageResult<Record> {
    let (time, value) = entry
        .split_once(SEPARATOR)
        .ok_or_else(|| StorageError::Decode(format!("invalid record: {:?}", entry)))?;

    Ok(Record {
        time: decode_time(time)?,
        value: decode_value(value)?,
    })
}

/// Inclusive lexicographic bounds covering every record with time in `[from, to]`
pub fn format_range(from: Timestamp, to: Timestamp) -> (String, String) {
    (
        format!("{}{}", encode_time(from), SEPARATOR),
        format!("{}{}{}", encode_time(to), SEPARATOR, RANGE_SENTINEL),
    )
}

/// Name of the ordered collection holding a series' records
pub fn data_key(key: &str) -> String {
    format!("d::{}", key)
}

/// Name of the topic carrying a series' live updates
pub fn pubsub_key(key: &str) -> String {
    format!("ps::{}", key)
}
