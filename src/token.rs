//! Continuation tokens.
//!
//! A token maps each property that still has data to the timestamp of the
//! last point already returned for it:
//!
//! ```json
//! {"temperature": "2023-01-01T00:20:00"}
//! ```
//!
//! The timestamp is an exclusive bound: the lower bound when reading in
//! ascending order, the upper bound when reading in descending order.
//! Exhausted properties are simply absent.

use std::collections::BTreeMap;

use chrono::NaiveDateTime;
use serde_json::{Map, Value};

use crate::error::{ConnectorError, Result};
use crate::timestamp::{format_iso, parse_iso};

/// Resume point per property name.
pub type ResumePoints = BTreeMap<String, NaiveDateTime>;

/// Decode a continuation token against the request's selected properties.
///
/// An absent or blank token yields `Ok(None)`, meaning the query starts at
/// the request's global time range.
pub fn decode<S: AsRef<str>>(token: Option<&str>, selected: &[S]) -> Result<Option<ResumePoints>> {
    let token = match token.map(str::trim) {
        Some(t) if !t.is_empty() => t,
        _ => return Ok(None),
    };

    let parsed: Map<String, Value> = serde_json::from_str(token)
        .map_err(|e| ConnectorError::InvalidToken(format!("Cannot decode next token {}: {}", token, e)))?;

    if parsed.is_empty() {
        return Err(ConnectorError::InvalidToken(format!("Parsed next token is empty {}", token)));
    }

    let mut points = ResumePoints::new();
    for (property, bound) in parsed {
        if !selected.iter().any(|s| s.as_ref() == property) {
            let names: Vec<&str> = selected.iter().map(|s| s.as_ref()).collect();
            return Err(ConnectorError::InvalidToken(format!(
                "Next token {} doesn't match selected properties {}",
                token,
                names.join(", ")
            )));
        }

        let raw = bound.as_str().ok_or_else(|| {
            ConnectorError::InvalidToken(format!("Resume point for {} is not a string", property))
        })?;
        let ts = parse_iso(raw).map_err(|_| {
            ConnectorError::InvalidToken(format!("Resume point for {} is not a timestamp: {}", property, raw))
        })?;
        points.insert(property, ts);
    }

    Ok(Some(points))
}

/// Encode resume points. Returns `None` when every property is exhausted.
pub fn encode(points: &ResumePoints) -> Option<String> {
    if points.is_empty() {
        return None;
    }

    let map: Map<String, Value> = points
        .iter()
        .map(|(name, ts)| (name.clone(), Value::String(format_iso(ts))))
        .collect();
    Some(Value::Object(map).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SELECTED: [&str; 2] = ["temp", "pressure"];

    #[test]
    fn test_absent_token_is_not_an_error() {
        assert_eq!(decode(None, &SELECTED).unwrap(), None);
        assert_eq!(decode(Some(""), &SELECTED).unwrap(), None);
        assert_eq!(decode(Some("   "), &SELECTED).unwrap(), None);
    }

    #[test]
    fn test_empty_object_is_rejected() {
        let err = decode(Some("{}"), &SELECTED).unwrap_err();
        assert!(matches!(err, ConnectorError::InvalidToken(_)));
        assert!(err.is_validation());
    }

    #[test]
    fn test_malformed_token_is_rejected() {
        assert!(matches!(
            decode(Some("not-json"), &SELECTED),
            Err(ConnectorError::InvalidToken(_))
        ));
        assert!(matches!(
            decode(Some("[\"temp\"]"), &SELECTED),
            Err(ConnectorError::InvalidToken(_))
        ));
        assert!(matches!(
            decode(Some(r#"{"temp": 12}"#), &SELECTED),
            Err(ConnectorError::InvalidToken(_))
        ));
        assert!(matches!(
            decode(Some(r#"{"temp": "noon"}"#), &SELECTED),
            Err(ConnectorError::InvalidToken(_))
        ));
    }

    #[test]
    fn test_unselected_property_is_rejected() {
        let err = decode(Some(r#"{"humidity": "2023-01-01T00:20:00"}"#), &SELECTED).unwrap_err();
        assert!(err.to_string().contains("doesn't match selected properties temp, pressure"));
    }

    #[test]
    fn test_decode_subset() {
        let points = decode(Some(r#"{"temp": "2023-01-01T00:20:00"}"#), &SELECTED)
            .unwrap()
            .unwrap();
        assert_eq!(points.len(), 1);
        assert_eq!(points["temp"], parse_iso("2023-01-01T00:20:00").unwrap());
    }

    #[test]
    fn test_encode() {
        assert_eq!(encode(&ResumePoints::new()), None);

        let mut points = ResumePoints::new();
        points.insert("temp".to_string(), parse_iso("2023-01-01T00:20:00").unwrap());
        let token = encode(&points).unwrap();
        assert_eq!(token, r#"{"temp":"2023-01-01T00:20:00"}"#);
        assert_eq!(decode(Some(token.as_str()), &SELECTED).unwrap(), Some(points));
    }
}
