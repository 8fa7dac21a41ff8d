use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::ConnectorError;

/// Declared type of a TwinMaker property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    Double,
    Long,
    Integer,
    String,
    Boolean,
}

impl DataType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Double => "DOUBLE",
            Self::Long => "LONG",
            Self::Integer => "INTEGER",
            Self::String => "STRING",
            Self::Boolean => "BOOLEAN",
        }
    }

    /// Convert a raw Snowflake cell into a value of this type.
    /// Returns `None` when the cell does not hold a value of the declared type.
    /// Non-finite doubles have no JSON form and count as undecodable.
    pub fn decode(self, raw: &str) -> Option<PropertyValue> {
        let trimmed = raw.trim();
        match self {
            Self::Double => trimmed
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .map(PropertyValue::Double),
            Self::Long => parse_whole(trimmed).map(PropertyValue::Long),
            Self::Integer => parse_whole(trimmed)
                .and_then(|v| i32::try_from(v).ok())
                .map(PropertyValue::Integer),
            Self::String => Some(PropertyValue::String(raw.to_string())),
            Self::Boolean => match trimmed.to_ascii_lowercase().as_str() {
                "true" | "1" => Some(PropertyValue::Boolean(true)),
                "false" | "0" => Some(PropertyValue::Boolean(false)),
                _ => None,
            },
        }
    }
}

// NUMBER columns come back as "42", FLOAT columns as "42.0" or "4.2e1".
fn parse_whole(raw: &str) -> Option<i64> {
    if let Ok(v) = raw.parse::<i64>() {
        return Some(v);
    }
    let v = raw.parse::<f64>().ok()?;
    if v.fract() == 0.0 && v >= i64::MIN as f64 && v <= i64::MAX as f64 {
        Some(v as i64)
    } else {
        None
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataType {
    type Err = ConnectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "DOUBLE" => Ok(Self::Double),
            "LONG" => Ok(Self::Long),
            "INTEGER" => Ok(Self::Integer),
            "STRING" => Ok(Self::String),
            "BOOLEAN" => Ok(Self::Boolean),
            _ => Err(ConnectorError::Validation(format!("Unsupported data type {}", s))),
        }
    }
}

impl Serialize for DataType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for DataType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// A single typed property value, serialized with its TwinMaker tag,
/// e.g. `{"doubleValue": 21.5}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PropertyValue {
    #[serde(rename = "doubleValue")]
    Double(f64),
    #[serde(rename = "longValue")]
    Long(i64),
    #[serde(rename = "intValue")]
    Integer(i32),
    #[serde(rename = "stringValue")]
    String(String),
    #[serde(rename = "booleanValue")]
    Boolean(bool),
}

impl PropertyValue {
    pub fn data_type(&self) -> DataType {
        match self {
            Self::Double(_) => DataType::Double,
            Self::Long(_) => DataType::Long,
            Self::Integer(_) => DataType::Integer,
            Self::String(_) => DataType::String,
            Self::Boolean(_) => DataType::Boolean,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_data_type_parse_is_case_insensitive() {
        assert_eq!("double".parse::<DataType>().unwrap(), DataType::Double);
        assert_eq!("Integer".parse::<DataType>().unwrap(), DataType::Integer);
        assert!("LIST".parse::<DataType>().is_err());

        let parsed: DataType = serde_json::from_value(json!("boolean")).unwrap();
        assert_eq!(parsed, DataType::Boolean);
    }

    #[test]
    fn test_value_tags() {
        assert_eq!(
            serde_json::to_value(PropertyValue::Double(21.5)).unwrap(),
            json!({"doubleValue": 21.5})
        );
        assert_eq!(
            serde_json::to_value(PropertyValue::Integer(3)).unwrap(),
            json!({"intValue": 3})
        );
        assert_eq!(
            serde_json::to_value(PropertyValue::String("ok".into())).unwrap(),
            json!({"stringValue": "ok"})
        );
        let parsed: PropertyValue = serde_json::from_value(json!({"longValue": 7})).unwrap();
        assert_eq!(parsed, PropertyValue::Long(7));
    }

    #[test]
    fn test_decode_cells() {
        assert_eq!(DataType::Double.decode("21.5"), Some(PropertyValue::Double(21.5)));
        assert_eq!(DataType::Long.decode("42.0"), Some(PropertyValue::Long(42)));
        assert_eq!(DataType::Integer.decode("42"), Some(PropertyValue::Integer(42)));
        assert_eq!(DataType::Integer.decode("4200000000"), None);
        assert_eq!(DataType::Long.decode("4.5"), None);
        assert_eq!(DataType::Boolean.decode("TRUE"), Some(PropertyValue::Boolean(true)));
        assert_eq!(DataType::Boolean.decode("0"), Some(PropertyValue::Boolean(false)));
        assert_eq!(DataType::Boolean.decode("maybe"), None);
        assert_eq!(DataType::Double.decode("n/a"), None);
        assert_eq!(
            DataType::String.decode(" padded "),
            Some(PropertyValue::String(" padded ".into()))
        );
    }

    #[test]
    fn test_non_finite_doubles_are_undecodable() {
        for raw in ["inf", "-inf", "NaN", "infinity"] {
            assert_eq!(DataType::Double.decode(raw), None, "{}", raw);
        }
        assert_eq!(DataType::Long.decode("inf"), None);
        assert_eq!(
            serde_json::to_value(DataType::Double.decode("1e308").unwrap()).unwrap(),
            json!({"doubleValue": 1e308})
        );
    }
}
