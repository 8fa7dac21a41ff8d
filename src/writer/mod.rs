//! UDW connector: writes time-series values into Snowflake and reports the
//! values that did not land.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use crate::error::{ConnectorError, Result};
use crate::reader::timeseries::TIMESERIES_TABLE_NAME;
use crate::request::{missing, PropertyEntry};
use crate::response::{DataPoint, EntityPropertyReference};
use crate::snowflake::{is_plain_object_name, SqlExecutor};
use crate::timestamp::parse_iso;
use crate::value::PropertyValue;

pub mod bulk_loader;

pub use bulk_loader::{BulkLoader, BulkRow, FileStage, S3Stage};

pub const UDW_DEFAULT_ERROR_CODE: &str = "INTERNAL_FAILURE";
pub const UDW_DEFAULT_ERROR_MESSAGE: &str = "Failed to write property values to Snowflake";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteRequest {
    pub workspace_id: Option<String>,
    /// Entity id to the entity's properties, component settings included.
    pub properties: Option<HashMap<String, HashMap<String, PropertyEntry>>>,
    pub entries: Option<Vec<WriteEntry>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteEntry {
    pub entry_id: String,
    pub entity_property_reference: Option<EntityPropertyReference>,
    #[serde(default)]
    pub property_values: Vec<DataPoint>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteError {
    pub error_code: String,
    pub error_message: String,
    pub entry: WriteEntry,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchErrorEntry {
    pub errors: Vec<WriteError>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteResponse {
    pub error_entries: Vec<BatchErrorEntry>,
}

/// Rows bound for one table, each tagged with the (entry, value) it came from.
#[derive(Debug, Default)]
struct TableBatch {
    table: String,
    rows: Vec<BulkRow>,
    origins: Vec<(usize, usize)>,
}

impl WriteRequest {
    pub fn from_value(event: Value) -> Result<Self> {
        serde_json::from_value(event)
            .map_err(|e| ConnectorError::Validation(format!("Malformed request: {}", e)))
    }

    /// Check every entry against `properties` and group its values per table,
    /// tables in first-seen order.
    fn batches(&self) -> Result<Vec<TableBatch>> {
        let properties = self.properties.as_ref().ok_or_else(|| missing("properties"))?;
        let entries = self.entries.as_ref().ok_or_else(|| missing("entries"))?;

        let mut batches: Vec<TableBatch> = Vec::new();
        for (entry_index, entry) in entries.iter().enumerate() {
            let reference = entry
                .entity_property_reference
                .as_ref()
                .ok_or_else(|| missing("entityPropertyReference"))?;
            let entity_id = reference.entity_id.as_deref().ok_or_else(|| missing("entityId"))?;
            let property_name = reference.property_name.as_deref().ok_or_else(|| missing("propertyName"))?;

            let entity = properties.get(entity_id).ok_or_else(|| missing(entity_id))?;
            let foreign_key = entity
                .get(property_name)
                .ok_or_else(|| missing(property_name))?
                .foreign_key(property_name)?;
            let table = entity
                .get(TIMESERIES_TABLE_NAME)
                .and_then(PropertyEntry::string_value)
                .ok_or_else(|| missing(TIMESERIES_TABLE_NAME))?;
            if !is_plain_object_name(table) {
                return Err(ConnectorError::Validation(format!("Illegal table name {}", table)));
            }

            let position = match batches.iter().position(|b| b.table == table) {
                Some(position) => position,
                None => {
                    batches.push(TableBatch {
                        table: table.to_string(),
                        ..Default::default()
                    });
                    batches.len() - 1
                }
            };
            let batch = &mut batches[position];

            for (value_index, point) in entry.property_values.iter().enumerate() {
                parse_iso(&point.time)?;
                let &PropertyValue::Double(value) = &point.value else {
                    return Err(ConnectorError::Validation(format!(
                        "Entry {} carries a {} value, only DOUBLE values can be written",
                        entry.entry_id,
                        point.value.data_type()
                    )));
                };
                batch.rows.push(BulkRow {
                    foreign_key: foreign_key.to_string(),
                    time: point.time.clone(),
                    value,
                });
                batch.origins.push((entry_index, value_index));
            }
        }
        Ok(batches)
    }
}

/// Write every entry and report the values that failed, grouped per entry.
pub async fn write_entries(
    executor: &dyn SqlExecutor,
    stage: &dyn FileStage,
    loader: &BulkLoader,
    request: &WriteRequest,
) -> Result<WriteResponse> {
    let batches = request.batches()?;
    let entries = request.entries.as_deref().unwrap_or_default();

    let mut failed: Vec<Vec<usize>> = vec![Vec::new(); entries.len()];
    for batch in &batches {
        if batch.rows.is_empty() {
            continue;
        }
        info!("Loading {} rows into {}", batch.rows.len(), batch.table);
        let failed_rows = loader.load(executor, stage, &batch.table, &batch.rows).await;
        for &(entry_index, value_index) in &batch.origins[failed_rows] {
            failed[entry_index].push(value_index);
        }
    }

    let error_entries = entries
        .iter()
        .zip(failed)
        .filter(|(_, values)| !values.is_empty())
        .map(|(entry, values)| BatchErrorEntry {
            errors: vec![WriteError {
                error_code: UDW_DEFAULT_ERROR_CODE.to_string(),
                error_message: UDW_DEFAULT_ERROR_MESSAGE.to_string(),
                entry: WriteEntry {
                    entry_id: entry.entry_id.clone(),
                    entity_property_reference: entry.entity_property_reference.clone(),
                    property_values: values.iter().map(|&i| entry.property_values[i].clone()).collect(),
                },
            }],
        })
        .collect();

    Ok(WriteResponse { error_entries })
}
