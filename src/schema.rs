//! Derives an entity's TwinMaker property definitions from the Snowflake
//! attribute table: time-series attributes become properties bound to their
//! PT, static attributes become string properties carrying their value.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::{error, info};

use crate::error::{ConnectorError, Result};
use crate::reader::attribute::ELEMENT_ID;
use crate::request::{missing, QueryRequest, FOREIGN_KEY};
use crate::snowflake::{cell, Row, SqlExecutor, Statement};
use crate::value::{DataType, PropertyValue};

pub const ENTITY_PROPERTY_TABLE_NAME: &str = "entityPropertyTableName";

const ATTRIBUTE_QUERY: &str =
    "select ATTR_NAME, ATTR_VALUE, ATTR_PI_PT, PT_UOM, PT_DATATYPE from identifier(?) where ELEM_ID = ?";
const ILLEGAL_CHARACTERS: [char; 4] = ['#', '(', ')', ' '];

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaDataType {
    #[serde(rename = "type")]
    pub kind: DataType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit_of_measure: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaDefinition {
    pub data_type: SchemaDataType,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub configuration: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_value: Option<PropertyValue>,
    pub is_time_series: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SchemaProperty {
    pub definition: SchemaDefinition,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<PropertyValue>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SchemaResponse {
    pub properties: BTreeMap<String, SchemaProperty>,
}

/// Map the attribute table's numeric type code to a TwinMaker data type.
///
/// | code          | source type                 |
/// |---------------|-----------------------------|
/// | 6, 8          | Int16, Int32                |
/// | 11, 12, 13    | Float16, Float32, Float64   |
/// | 101, 104, 105 | Digital, Timestamp, String  |
/// | 102           | Blob                        |
pub fn map_data_type(attr_name: &str, code: i64) -> Result<DataType> {
    match code {
        6 | 8 => Ok(DataType::Integer),
        11 | 12 | 13 => Ok(DataType::Double),
        101 | 102 | 104 | 105 => Ok(DataType::String),
        _ => Err(ConnectorError::DataIntegrity(format!(
            "Invalid data type {} for attribute {}",
            code, attr_name
        ))),
    }
}

/// Property names may not contain `#`, `(`, `)` or spaces.
pub fn sanitize_property_name(attr_name: &str) -> String {
    let replaced: String = attr_name
        .chars()
        .map(|c| if ILLEGAL_CHARACTERS.contains(&c) { '_' } else { c })
        .collect();
    replaced.replace("__", "_")
}

fn setting<'a>(request: &'a QueryRequest, key: &str) -> Result<&'a str> {
    request
        .properties
        .get(key)
        .and_then(|p| p.string_value_or_default())
        .ok_or_else(|| missing(key))
}

fn schema_property(row: &Row) -> Result<(String, SchemaProperty)> {
    let (Some(attr_name), Some(raw_type)) = (cell(row, 0), cell(row, 4)) else {
        return Err(ConnectorError::DataIntegrity(
            "Data type and attribute name cannot be null".to_string(),
        ));
    };
    let code = raw_type
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.fract() == 0.0)
        .map(|v| v as i64)
        .ok_or_else(|| {
            ConnectorError::DataIntegrity(format!("Invalid data type {} for attribute {}", raw_type, attr_name))
        })?;

    let data_type = SchemaDataType {
        kind: map_data_type(attr_name, code)?,
        unit_of_measure: cell(row, 3).map(str::to_string),
    };

    let property = match cell(row, 2) {
        Some(pt) => SchemaProperty {
            definition: SchemaDefinition {
                data_type,
                configuration: BTreeMap::from([(FOREIGN_KEY.to_string(), pt.to_string())]),
                default_value: None,
                is_time_series: true,
            },
            value: None,
        },
        // A NULL attribute value leaves the property without a value.
        None => {
            let value = cell(row, 1).map(|v| PropertyValue::String(v.to_string()));
            SchemaProperty {
                definition: SchemaDefinition {
                    data_type,
                    configuration: BTreeMap::new(),
                    default_value: value.clone(),
                    is_time_series: false,
                },
                value,
            }
        }
    };

    Ok((sanitize_property_name(attr_name), property))
}

/// Build the property schema of one element.
pub async fn initialize_schema(executor: &dyn SqlExecutor, request: &QueryRequest) -> Result<SchemaResponse> {
    let element_id = setting(request, ELEMENT_ID)?;
    let table = setting(request, ENTITY_PROPERTY_TABLE_NAME)?;
    info!("Initializing schema for element {} from {}", element_id, table);

    let statement = Statement::new(ATTRIBUTE_QUERY)
        .bind_text(table)
        .bind_text(element_id);
    let rows = executor.execute(&statement).await.map_err(|e| {
        error!("Query exception: {}", e);
        e
    })?;

    let mut response = SchemaResponse::default();
    for row in &rows {
        let (name, property) = schema_property(row).map_err(|e| {
            error!("Cannot build schema for element {}: {}", element_id, e);
            e
        })?;
        response.properties.insert(name, property);
    }
    Ok(response)
}
