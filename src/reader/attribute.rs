//! Static attribute values of one element, read from a wide table with one
//! column per property.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::{error, info, warn};

use crate::error::{ConnectorError, Result};
use crate::request::QueryRequest;
use crate::response::EntityPropertyReference;
use crate::snowflake::{cell, identifier_literal, SqlExecutor, Statement};
use crate::value::{DataType, PropertyValue};

pub const ATTRIBUTE_PROPERTY_TABLE_NAME: &str = "attributePropertyTableName";
pub const ELEMENT_ID: &str = "elemId";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttributeValue {
    pub property_reference: EntityPropertyReference,
    pub property_value: PropertyValue,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttributeResponse {
    pub property_values: BTreeMap<String, AttributeValue>,
}

/// Validated attribute read.
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeRequest {
    pub entity_id: String,
    pub component_name: String,
    pub table: String,
    pub element_id: String,
    pub properties: Vec<(String, DataType)>,
}

impl AttributeRequest {
    pub fn from_request(request: &QueryRequest) -> Result<Self> {
        let (entity_id, component_name) = request.require_entity_reference()?;
        let selected = request.require_selected_properties()?;
        let table = request.require_setting(ATTRIBUTE_PROPERTY_TABLE_NAME)?;
        let element_id = request.require_setting(ELEMENT_ID)?;

        let properties = selected
            .iter()
            .map(|name| Ok((name.clone(), request.property(name)?.data_type(name)?)))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            entity_id: entity_id.to_string(),
            component_name: component_name.to_string(),
            table: table.to_string(),
            element_id: element_id.to_string(),
            properties,
        })
    }

    pub fn statement(&self) -> Result<Statement> {
        let columns = self
            .properties
            .iter()
            .map(|(name, _)| {
                identifier_literal(name)
                    .ok_or_else(|| ConnectorError::Validation(format!("Illegal property name {}", name)))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Statement::new(format!(
            "select {} from identifier(?) where elem_id = ?",
            columns.join(", ")
        ))
        .bind_text(&self.table)
        .bind_text(&self.element_id))
    }
}

/// Read the current attribute values of the selected properties.
pub async fn read_attributes(executor: &dyn SqlExecutor, request: &QueryRequest) -> Result<AttributeResponse> {
    let attribute_request = AttributeRequest::from_request(request)?;
    let statement = attribute_request.statement()?;
    info!(
        "Reading {} attributes of element {} from {}",
        attribute_request.properties.len(),
        attribute_request.element_id,
        attribute_request.table
    );

    let rows = executor.execute(&statement).await.map_err(|e| {
        error!("Attribute query failed: {}", e);
        e
    })?;

    if rows.len() > 1 {
        return Err(ConnectorError::DataIntegrity(format!(
            "Element {} has {} attribute rows, expected at most one",
            attribute_request.element_id,
            rows.len()
        )));
    }

    let mut response = AttributeResponse::default();
    let Some(row) = rows.first() else {
        return Ok(response);
    };

    for (index, (name, data_type)) in attribute_request.properties.iter().enumerate() {
        let Some(raw) = cell(row, index) else {
            continue;
        };
        let Some(value) = data_type.decode(raw) else {
            warn!("Attribute {} value {} is not a {} value", name, raw, data_type);
            continue;
        };
        response.property_values.insert(
            name.clone(),
            AttributeValue {
                property_reference: EntityPropertyReference::for_entity(
                    &attribute_request.entity_id,
                    &attribute_request.component_name,
                    name,
                ),
                property_value: value,
            },
        );
    }

    Ok(response)
}
