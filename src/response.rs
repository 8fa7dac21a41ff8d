use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::value::PropertyValue;

/// Identifies the property a series of values belongs to.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityPropertyReference {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub component_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_id_property: Option<BTreeMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub property_name: Option<String>,
}

impl EntityPropertyReference {
    pub fn for_entity(entity_id: &str, component_name: &str, property_name: &str) -> Self {
        Self {
            entity_id: Some(entity_id.to_string()),
            component_name: Some(component_name.to_string()),
            external_id_property: None,
            property_name: Some(property_name.to_string()),
        }
    }

    pub fn for_external_id(key: &str, id: &str, property_name: &str) -> Self {
        let mut external = BTreeMap::new();
        external.insert(key.to_string(), id.to_string());
        Self {
            entity_id: None,
            component_name: None,
            external_id_property: Some(external),
            property_name: Some(property_name.to_string()),
        }
    }
}

/// One timestamped value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataPoint {
    #[serde(alias = "timestamp")]
    pub time: String,
    pub value: PropertyValue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertySeries {
    pub entity_property_reference: EntityPropertyReference,
    pub values: Vec<DataPoint>,
}

/// Response of the time-series and alarm readers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadResponse {
    pub property_values: Vec<PropertySeries>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_token: Option<String>,
}
