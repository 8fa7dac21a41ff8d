//! Wire shapes of incoming UDQ/UDW requests and the checks shared by every
//! reader. Each connector turns a [`QueryRequest`] into its own validated
//! query type before any external call is made.

use std::collections::HashMap;

use chrono::NaiveDateTime;
use serde::Deserialize;
use serde_json::Value;

use crate::error::{ConnectorError, Result};
use crate::timestamp::parse_iso;
use crate::value::DataType;

/// Raw UDQ request as TwinMaker sends it to a reader.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryRequest {
    pub workspace_id: Option<String>,
    pub entity_id: Option<String>,
    pub component_name: Option<String>,
    pub component_type_id: Option<String>,
    pub selected_properties: Option<Vec<String>>,
    #[serde(default)]
    pub properties: HashMap<String, PropertyEntry>,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub order_by_time: Option<String>,
    pub max_results: Option<i64>,
    pub next_token: Option<String>,
    #[serde(default)]
    pub property_filters: Vec<PropertyFilter>,
}

/// A property as carried in a request: its definition and, for component
/// settings such as table names, its value.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyEntry {
    pub definition: Option<PropertyDefinition>,
    pub value: Option<Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyDefinition {
    pub data_type: Option<DataTypeSpec>,
    #[serde(default)]
    pub configuration: HashMap<String, String>,
    pub default_value: Option<Value>,
    pub is_time_series: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataTypeSpec {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub unit_of_measure: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyFilter {
    pub property_name: Option<String>,
    pub operator: Option<String>,
    pub value: Option<Value>,
}

/// Configuration key holding a property's foreign key in the time-series table.
pub const FOREIGN_KEY: &str = "PT";

impl PropertyEntry {
    /// `value.stringValue`, the form component settings are stored in.
    pub fn string_value(&self) -> Option<&str> {
        self.value.as_ref().and_then(string_value_of)
    }

    /// `value.stringValue`, falling back to `definition.defaultValue.stringValue`.
    pub fn string_value_or_default(&self) -> Option<&str> {
        self.string_value().or_else(|| {
            self.definition
                .as_ref()
                .and_then(|d| d.default_value.as_ref())
                .and_then(string_value_of)
        })
    }

    /// Declared data type from `definition.dataType.type`.
    pub fn data_type(&self, name: &str) -> Result<DataType> {
        self.definition
            .as_ref()
            .and_then(|d| d.data_type.as_ref())
            .and_then(|t| t.kind.as_deref())
            .ok_or_else(|| ConnectorError::Validation(format!("Property {} has no declared data type", name)))?
            .parse()
    }

    /// Foreign key from `definition.configuration.PT`.
    pub fn foreign_key(&self, name: &str) -> Result<&str> {
        self.definition
            .as_ref()
            .and_then(|d| d.configuration.get(FOREIGN_KEY))
            .map(String::as_str)
            .ok_or_else(|| ConnectorError::Validation(format!("Property {} has no {} configuration", name, FOREIGN_KEY)))
    }
}

impl PropertyFilter {
    pub fn string_value(&self) -> Option<&str> {
        self.value.as_ref().and_then(string_value_of)
    }
}

pub(crate) fn string_value_of(value: &Value) -> Option<&str> {
    value.get("stringValue").and_then(Value::as_str)
}

/// Scan direction over the time column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OrderBy {
    #[default]
    Ascending,
    Descending,
}

impl OrderBy {
    /// Absent order defaults to ascending; anything unrecognised is rejected.
    pub fn parse(raw: Option<&str>) -> Result<Self> {
        match raw.map(str::trim) {
            None | Some("") => Ok(Self::Ascending),
            Some("ASCENDING") => Ok(Self::Ascending),
            Some("DESCENDING") => Ok(Self::Descending),
            Some(other) => Err(ConnectorError::InvalidOrder(other.to_string())),
        }
    }

    pub fn sql_keyword(self) -> &'static str {
        match self {
            Self::Ascending => "ASC",
            Self::Descending => "DESC",
        }
    }
}

/// Global time range of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl QueryRequest {
    pub fn from_value(event: Value) -> Result<Self> {
        serde_json::from_value(event)
            .map_err(|e| ConnectorError::Validation(format!("Malformed request: {}", e)))
    }

    pub fn require_workspace_id(&self) -> Result<&str> {
        required(self.workspace_id.as_deref(), "workspaceId")
    }

    pub fn require_selected_properties(&self) -> Result<&[String]> {
        match self.selected_properties.as_deref() {
            Some(selected) if !selected.is_empty() => Ok(selected),
            _ => Err(missing("selectedProperties")),
        }
    }

    /// `entityId` and `componentName` must be both present or both absent.
    pub fn entity_reference(&self) -> Result<Option<(&str, &str)>> {
        match (self.entity_id.as_deref(), self.component_name.as_deref()) {
            (Some(entity_id), Some(component_name)) => Ok(Some((entity_id, component_name))),
            (None, None) => Ok(None),
            _ => Err(ConnectorError::Validation(
                "entityId and componentName must show up together".to_string(),
            )),
        }
    }

    pub fn require_entity_reference(&self) -> Result<(&str, &str)> {
        self.entity_reference()?
            .ok_or_else(|| missing("entityId"))
    }

    pub fn time_range(&self) -> Result<TimeRange> {
        let start = parse_iso(required(self.start_time.as_deref(), "startTime")?)?;
        let end = parse_iso(required(self.end_time.as_deref(), "endTime")?)?;
        Ok(TimeRange { start, end })
    }

    pub fn order(&self) -> Result<OrderBy> {
        OrderBy::parse(self.order_by_time.as_deref())
    }

    pub fn max_results(&self) -> Result<u32> {
        let raw = self.max_results.ok_or_else(|| missing("maxResults"))?;
        u32::try_from(raw)
            .ok()
            .filter(|v| *v > 0)
            .ok_or_else(|| ConnectorError::Validation(format!("maxResults must be a positive integer, got {}", raw)))
    }

    pub fn property(&self, name: &str) -> Result<&PropertyEntry> {
        self.properties
            .get(name)
            .ok_or_else(|| ConnectorError::Validation(format!("Property {} is not defined in the request", name)))
    }

    /// A component setting stored as `properties.<key>.value.stringValue`.
    pub fn setting(&self, key: &str) -> Option<&str> {
        self.properties.get(key).and_then(PropertyEntry::string_value)
    }

    pub fn require_setting(&self, key: &str) -> Result<&str> {
        self.setting(key).ok_or_else(|| missing(key))
    }
}

pub(crate) fn required<'a>(value: Option<&'a str>, key: &str) -> Result<&'a str> {
    value.ok_or_else(|| missing(key))
}

pub(crate) fn missing(key: &str) -> ConnectorError {
    ConnectorError::Validation(format!("Required key[{}] is missing", key))
}
