//! Continuation token codec.
//!
//! A token is the sort-key tuple of a boundary row, one `|`-separated
//! component per key column. String components escape `%` and `|` so the
//! split is unambiguous, and an empty string is written as `%00` so no token
//! is ever empty. The token carries no type tags; the decoding module
//! supplies the expected kinds from its sort key.

use std::fmt;

use rusqlite::types::Value;

use crate::timestamp::MwTimestamp;

const SEPARATOR: char = '|';
const EMPTY_STRING: &str = "%00";

// Upper bound on client-supplied token length.
pub const MAX_CONTINUATION_LEN: usize = 4 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContinuationKind {
    Int,
    String,
    Timestamp,
}

impl ContinuationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Int => "int",
            Self::String => "string",
            Self::Timestamp => "timestamp",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum ContinuationValue {
    Int(i64),
    String(String),
    Timestamp(MwTimestamp),
}

impl ContinuationValue {
    pub fn kind(&self) -> ContinuationKind {
        match self {
            Self::Int(_) => ContinuationKind::Int,
            Self::String(_) => ContinuationKind::String,
            Self::Timestamp(_) => ContinuationKind::Timestamp,
        }
    }

    /// The SQL parameter this value binds as.
    pub fn to_sql_value(&self) -> Value {
        match self {
            Self::Int(value) => Value::Integer(*value),
            Self::String(value) => Value::Text(value.clone()),
            Self::Timestamp(value) => Value::Text(value.as_mw().to_string()),
        }
    }
}

impl fmt::Display for ContinuationValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(value) => write!(f, "{value}"),
            Self::String(value) => f.write_str(value),
            Self::Timestamp(value) => f.write_str(value.as_mw()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BadContinuation {
    #[error("continuation token is empty")]
    Empty,

    #[error("continuation token exceeds {max} characters")]
    TooLong { max: usize },

    #[error("expected {expected} components, found {found}")]
    ComponentCount { expected: usize, found: usize },

    #[error("component {index} is not a valid {}: {value:?}", kind.as_str())]
    InvalidComponent {
        index: usize,
        kind: ContinuationKind,
        value: String,
    },

    #[error("component {index} has a malformed escape sequence")]
    InvalidEscape { index: usize },
}

pub fn encode_continuation(values: &[ContinuationValue]) -> String {
    let mut out = String::new();
    for (index, value) in values.iter().enumerate() {
        if index > 0 {
            out.push(SEPARATOR);
        }
        match value {
            ContinuationValue::Int(number) => out.push_str(&number.to_string()),
            ContinuationValue::String(text) => escape_component(text, &mut out),
            ContinuationValue::Timestamp(timestamp) => out.push_str(timestamp.as_mw()),
        }
    }
    out
}

pub fn decode_continuation(
    token: &str,
    kinds: &[ContinuationKind],
) -> Result<Vec<ContinuationValue>, BadContinuation> {
    if token.is_empty() {
        return Err(BadContinuation::Empty);
    }
    if token.len() > MAX_CONTINUATION_LEN {
        return Err(BadContinuation::TooLong {
            max: MAX_CONTINUATION_LEN,
        });
    }

    let components: Vec<&str> = token.split(SEPARATOR).collect();
    if components.len() != kinds.len() {
        return Err(BadContinuation::ComponentCount {
            expected: kinds.len(),
            found: components.len(),
        });
    }

    components
        .into_iter()
        .zip(kinds)
        .enumerate()
        .map(|(index, (raw, kind))| decode_component(index, raw, *kind))
        .collect()
}

fn decode_component(
    index: usize,
    raw: &str,
    kind: ContinuationKind,
) -> Result<ContinuationValue, BadContinuation> {
    let invalid = || BadContinuation::InvalidComponent {
        index,
        kind,
        value: raw.to_string(),
    };
    match kind {
        ContinuationKind::Int => {
            // Only the canonical decimal form round-trips.
            let value = raw.parse::<i64>().map_err(|_| invalid())?;
            if value.to_string() != raw {
                return Err(invalid());
            }
            Ok(ContinuationValue::Int(value))
        }
        ContinuationKind::String if raw == EMPTY_STRING => {
            Ok(ContinuationValue::String(String::new()))
        }
        ContinuationKind::String => unescape_component(raw)
            .map(ContinuationValue::String)
            .ok_or(BadContinuation::InvalidEscape { index }),
        ContinuationKind::Timestamp => {
            if raw.len() != 14 {
                return Err(invalid());
            }
            MwTimestamp::parse(raw)
                .map(ContinuationValue::Timestamp)
                .ok_or_else(invalid)
        }
    }
}

fn escape_component(value: &str, out: &mut String) {
    if value.is_empty() {
        out.push_str(EMPTY_STRING);
        return;
    }
    for ch in value.chars() {
        match ch {
            '%' => out.push_str("%25"),
            '|' => out.push_str("%7C"),
            other => out.push(other),
        }
    }
}

fn unescape_component(value: &str) -> Option<String> {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;
    while let Some(position) = rest.find('%') {
        out.push_str(&rest[..position]);
        let escape = rest.get(position..position + 3)?;
        match escape {
            "%25" => out.push('%'),
            "%7C" | "%7c" => out.push('|'),
            _ => return None,
        }
        rest = &rest[position + 3..];
    }
    out.push_str(rest);
    Some(out)
}
