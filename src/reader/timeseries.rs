//! Paginated time-series reads for the properties of one entity component.
//!
//! Every selected property is scanned with its own bounded range query,
//! capped at `maxResults` rows. A property that fills its cap is still open
//! and its last timestamp goes into the continuation token; the next page
//! resumes strictly after (ascending) or strictly before (descending) it.

use std::collections::HashMap;

use chrono::NaiveDateTime;
use tracing::{error, info, warn};

use crate::error::Result;
use crate::request::{OrderBy, QueryRequest, TimeRange};
use crate::response::{DataPoint, EntityPropertyReference, PropertySeries, ReadResponse};
use crate::snowflake::{cell, Row, SqlExecutor, Statement};
use crate::timestamp::{format_iso, parse_cell};
use crate::token::{self, ResumePoints};
use crate::value::DataType;

/// Component setting naming the time-series table.
pub const TIMESERIES_TABLE_NAME: &str = "timeseriesTableName";

const ASCENDING_QUERY: &str =
    "select PT, PT_VALUE, TS from identifier(?) where PT = ? and TS > ? and TS < ? order by TS ASC LIMIT ?";
const DESCENDING_QUERY: &str =
    "select PT, PT_VALUE, TS from identifier(?) where PT = ? and TS > ? and TS < ? order by TS DESC LIMIT ?";

/// Validated time-series read.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeSeriesRequest {
    pub table: String,
    pub entity_id: String,
    pub component_name: String,
    pub selected: Vec<String>,
    pub range: TimeRange,
    pub order: OrderBy,
    pub max_results: u32,
    pub resume: Option<ResumePoints>,
    columns: HashMap<String, (String, DataType)>,
}

impl TimeSeriesRequest {
    pub fn from_request(request: &QueryRequest) -> Result<Self> {
        let (entity_id, component_name) = request.require_entity_reference()?;
        let selected = request.require_selected_properties()?.to_vec();
        let range = request.time_range()?;
        let order = request.order()?;
        let max_results = request.max_results()?;
        let table = request.require_setting(TIMESERIES_TABLE_NAME)?.to_string();
        let resume = token::decode(request.next_token.as_deref(), &selected)?;

        let mut columns = HashMap::with_capacity(selected.len());
        for name in &selected {
            let property = request.property(name)?;
            let foreign_key = property.foreign_key(name)?.to_string();
            let data_type = property.data_type(name)?;
            columns.insert(name.clone(), (foreign_key, data_type));
        }

        Ok(Self {
            table,
            entity_id: entity_id.to_string(),
            component_name: component_name.to_string(),
            selected,
            range,
            order,
            max_results,
            resume,
            columns,
        })
    }

    /// One query per property still to be scanned on this page. Without a
    /// token that is every selected property; with one, only the properties
    /// it names (the others are exhausted).
    pub fn plan(&self) -> Vec<PropertyQuery> {
        let names: Vec<&String> = match &self.resume {
            None => self.selected.iter().collect(),
            Some(points) => self.selected.iter().filter(|n| points.contains_key(*n)).collect(),
        };

        names
            .into_iter()
            .filter_map(|name| {
                let (foreign_key, data_type) = self.columns.get(name)?;
                let resume_at = self.resume.as_ref().and_then(|p| p.get(name)).copied();
                let (lower, upper) = match (self.order, resume_at) {
                    (OrderBy::Ascending, Some(at)) => (at, self.range.end),
                    (OrderBy::Descending, Some(at)) => (self.range.start, at),
                    (_, None) => (self.range.start, self.range.end),
                };
                Some(PropertyQuery {
                    name: name.clone(),
                    foreign_key: foreign_key.clone(),
                    data_type: *data_type,
                    lower,
                    upper,
                })
            })
            .collect()
    }
}

/// Scan of a single property, both bounds exclusive.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyQuery {
    pub name: String,
    pub foreign_key: String,
    pub data_type: DataType,
    pub lower: NaiveDateTime,
    pub upper: NaiveDateTime,
}

impl PropertyQuery {
    pub fn statement(&self, table: &str, order: OrderBy, max_results: u32) -> Statement {
        let sql = match order {
            OrderBy::Ascending => ASCENDING_QUERY,
            OrderBy::Descending => DESCENDING_QUERY,
        };
        Statement::new(sql)
            .bind_text(table)
            .bind_text(&self.foreign_key)
            .bind_text(format_iso(&self.lower))
            .bind_text(format_iso(&self.upper))
            .bind_fixed(i64::from(max_results))
    }
}

/// Rows scanned for one property on this page.
#[derive(Debug)]
struct ScannedSeries {
    name: String,
    points: Vec<DataPoint>,
    scanned: usize,
    last_seen: Option<NaiveDateTime>,
}

/// Collects scanned rows per property and derives the next token.
#[derive(Debug)]
pub struct PageBuilder {
    series: Vec<ScannedSeries>,
}

impl PageBuilder {
    /// Every selected property is present in the page, even when it
    /// returns no rows.
    pub fn new(selected: &[String]) -> Self {
        Self {
            series: selected
                .iter()
                .map(|name| ScannedSeries {
                    name: name.clone(),
                    points: Vec::new(),
                    scanned: 0,
                    last_seen: None,
                })
                .collect(),
        }
    }

    /// Append a `(PT, PT_VALUE, TS)` row to its property. Incomplete rows
    /// and values that do not match the declared type are skipped, but still
    /// count towards the scan and move its resume point.
    pub fn push(&mut self, query: &PropertyQuery, row: &Row) -> bool {
        let Some(series) = self.series.iter_mut().find(|s| s.name == query.name) else {
            warn!("Skipping row for unselected property {}", query.name);
            return false;
        };

        series.scanned += 1;
        let time = cell(row, 2).and_then(parse_cell);
        if time.is_some() {
            series.last_seen = time;
        }

        let (Some(_), Some(raw_value), Some(raw_time)) = (cell(row, 0), cell(row, 1), cell(row, 2)) else {
            warn!("Skipping incomplete row for property {}: {:?}", query.name, row);
            return false;
        };
        let Some(time) = time else {
            warn!("Skipping row for property {} with unreadable time {}", query.name, raw_time);
            return false;
        };
        let Some(value) = query.data_type.decode(raw_value) else {
            warn!(
                "Skipping row for property {}: {} is not a {} value",
                query.name, raw_value, query.data_type
            );
            return false;
        };

        series.points.push(DataPoint {
            time: format_iso(&time),
            value,
        });
        true
    }

    /// Finish the page. Properties whose scan returned exactly `max_results`
    /// rows resume after the last row scanned on the next page.
    pub fn finish(self, entity_id: &str, component_name: &str, max_results: u32) -> ReadResponse {
        let mut resume = ResumePoints::new();
        let mut property_values = Vec::with_capacity(self.series.len());

        for series in self.series {
            if series.scanned == max_results as usize {
                if let Some(last) = series.last_seen {
                    resume.insert(series.name.clone(), last);
                }
            }
            property_values.push(PropertySeries {
                entity_property_reference: EntityPropertyReference::for_entity(
                    entity_id,
                    component_name,
                    &series.name,
                ),
                values: series.points,
            });
        }

        ReadResponse {
            property_values,
            next_token: token::encode(&resume),
        }
    }
}

/// Read one page of time-series values for the selected properties of an
/// entity component.
pub async fn read_by_entity(executor: &dyn SqlExecutor, request: &QueryRequest) -> Result<ReadResponse> {
    let request = TimeSeriesRequest::from_request(request)?;
    let queries = request.plan();
    info!(
        "Reading {} of {} properties from {} for entity {}",
        queries.len(),
        request.selected.len(),
        request.table,
        request.entity_id
    );

    let mut page = PageBuilder::new(&request.selected);
    for query in &queries {
        let statement = query.statement(&request.table, request.order, request.max_results);
        let rows = executor.execute(&statement).await.map_err(|e| {
            error!("Query for property {} failed: {}", query.name, e);
            e
        })?;
        for row in &rows {
            page.push(query, row);
        }
    }

    Ok(page.finish(&request.entity_id, &request.component_name, request.max_results))
}
