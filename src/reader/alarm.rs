//! Alarm reads for a component type: a single `alarm_status` property read
//! from an alarm event table, optionally narrowed to one alarm or to alarms
//! whose latest status matches a filter.

use chrono::NaiveDateTime;
use tracing::{error, info, warn};

use crate::error::{ConnectorError, Result};
use crate::request::{OrderBy, QueryRequest, TimeRange};
use crate::response::{DataPoint, EntityPropertyReference, PropertySeries, ReadResponse};
use crate::snowflake::{cell, Row, SqlExecutor, Statement};
use crate::timestamp::{format_iso, parse_cell};
use crate::token::{self, ResumePoints};
use crate::value::PropertyValue;

pub const ALARM_STATUS_PROPERTY: &str = "alarm_status";
pub const ALARM_KEY: &str = "alarm_key";
pub const ALARM_TABLE_NAME: &str = "tableName";

/// How the alarm table is narrowed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AlarmSelector {
    All,
    AlarmId(String),
    /// Alarms whose most recent status equals the given value.
    LatestStatus(String),
}

/// Validated alarm read.
#[derive(Debug, Clone, PartialEq)]
pub struct AlarmRequest {
    pub entity: Option<(String, String)>,
    pub table: String,
    pub selector: AlarmSelector,
    pub range: TimeRange,
    pub order: OrderBy,
    pub max_results: u32,
    pub resume: Option<NaiveDateTime>,
}

impl AlarmRequest {
    pub fn from_request(request: &QueryRequest, default_table: &str) -> Result<Self> {
        request.require_workspace_id()?;
        let range = request.time_range()?;
        let selected = request.require_selected_properties()?;
        if selected.len() != 1 || selected[0] != ALARM_STATUS_PROPERTY {
            return Err(ConnectorError::Validation(format!(
                "Unexpected selectedProperties {:?}",
                selected
            )));
        }
        let entity = request
            .entity_reference()?
            .map(|(e, c)| (e.to_string(), c.to_string()));
        let order = request.order()?;
        let max_results = request.max_results()?;

        let resume = match token::decode(request.next_token.as_deref(), selected)? {
            Some(points) => Some(points.get(ALARM_STATUS_PROPERTY).copied().ok_or_else(|| {
                ConnectorError::InvalidToken(format!("Token has no {} entry", ALARM_STATUS_PROPERTY))
            })?),
            None => None,
        };

        let selector = match (request.setting(ALARM_KEY), status_filter(request)) {
            (Some(alarm_id), _) => AlarmSelector::AlarmId(alarm_id.to_string()),
            (None, Some(status)) => AlarmSelector::LatestStatus(status.to_string()),
            (None, None) => AlarmSelector::All,
        };

        Ok(Self {
            entity,
            table: request
                .setting(ALARM_TABLE_NAME)
                .unwrap_or(default_table)
                .to_string(),
            selector,
            range,
            order,
            max_results,
            resume,
        })
    }

    /// Effective `(lower, upper)` event-time bounds of this page.
    pub fn bounds(&self) -> (NaiveDateTime, NaiveDateTime) {
        match (self.order, self.resume) {
            (OrderBy::Ascending, Some(at)) => (at, self.range.end),
            (OrderBy::Descending, Some(at)) => (self.range.start, at),
            (_, None) => (self.range.start, self.range.end),
        }
    }

    /// The first descending page includes an event exactly at `endTime`;
    /// every other page keeps the upper bound exclusive.
    pub fn upper_operator(&self) -> &'static str {
        if self.order == OrderBy::Descending && self.resume.is_none() {
            "<="
        } else {
            "<"
        }
    }

    pub fn statement(&self) -> Statement {
        let (lower, upper) = self.bounds();
        let op = self.upper_operator();
        let direction = self.order.sql_keyword();

        match &self.selector {
            AlarmSelector::AlarmId(alarm_id) => Statement::new(format!(
                "SELECT ALARM_ID, EVENT_TIME, identifier(?) FROM identifier(?) \
                 WHERE ALARM_ID = ? AND EVENT_TIME > ? AND EVENT_TIME {} ? \
                 ORDER BY EVENT_TIME {} LIMIT ?",
                op, direction
            ))
            .bind_text(ALARM_STATUS_PROPERTY)
            .bind_text(&self.table)
            .bind_text(alarm_id)
            .bind_text(format_iso(&lower))
            .bind_text(format_iso(&upper))
            .bind_fixed(i64::from(self.max_results)),
            AlarmSelector::LatestStatus(status) => Statement::new(format!(
                "SELECT ALARM_ID, EVENT_TIME, identifier(?) FROM \
                 (SELECT ALARM_ID, EVENT_TIME, identifier(?), \
                 FIRST_VALUE(identifier(?)) OVER (PARTITION BY ALARM_ID ORDER BY EVENT_TIME DESC) last_status \
                 FROM identifier(?) WHERE EVENT_TIME > ? AND EVENT_TIME {} ? \
                 ORDER BY EVENT_TIME {} LIMIT ?) \
                 WHERE last_status = ?",
                op, direction
            ))
            .bind_text(ALARM_STATUS_PROPERTY)
            .bind_text(ALARM_STATUS_PROPERTY)
            .bind_text(ALARM_STATUS_PROPERTY)
            .bind_text(&self.table)
            .bind_text(format_iso(&lower))
            .bind_text(format_iso(&upper))
            .bind_fixed(i64::from(self.max_results))
            .bind_text(status),
            AlarmSelector::All => Statement::new(format!(
                "SELECT ALARM_ID, EVENT_TIME, identifier(?) FROM identifier(?) \
                 WHERE EVENT_TIME > ? AND EVENT_TIME {} ? \
                 ORDER BY EVENT_TIME {} LIMIT ?",
                op, direction
            ))
            .bind_text(ALARM_STATUS_PROPERTY)
            .bind_text(&self.table)
            .bind_text(format_iso(&lower))
            .bind_text(format_iso(&upper))
            .bind_fixed(i64::from(self.max_results)),
        }
    }

    /// Group `(ALARM_ID, EVENT_TIME, status)` rows per alarm, in first-seen order.
    pub fn page(&self, rows: &[Row]) -> ReadResponse {
        let mut groups: Vec<(String, Vec<DataPoint>)> = Vec::new();
        let mut last_time = None;

        for row in rows {
            let time = cell(row, 1).and_then(parse_cell);
            if time.is_some() {
                last_time = time;
            }

            let (Some(alarm_id), Some(raw_time), Some(status)) = (cell(row, 0), cell(row, 1), cell(row, 2)) else {
                warn!("Skipping incomplete alarm row: {:?}", row);
                continue;
            };
            let Some(time) = time else {
                warn!("Skipping alarm {} row with unreadable time {}", alarm_id, raw_time);
                continue;
            };

            let point = DataPoint {
                time: format_iso(&time),
                value: PropertyValue::String(status.to_string()),
            };
            match groups.iter_mut().find(|(id, _)| id == alarm_id) {
                Some((_, points)) => points.push(point),
                None => groups.push((alarm_id.to_string(), vec![point])),
            }
        }

        let property_values = groups
            .into_iter()
            .map(|(alarm_id, values)| {
                let reference = match &self.entity {
                    Some((entity_id, component_name)) => {
                        EntityPropertyReference::for_entity(entity_id, component_name, ALARM_STATUS_PROPERTY)
                    }
                    None => EntityPropertyReference::for_external_id(ALARM_KEY, &alarm_id, ALARM_STATUS_PROPERTY),
                };
                PropertySeries {
                    entity_property_reference: reference,
                    values,
                }
            })
            .collect();

        // The scan filled its cap, so there may be more events past the last
        // one scanned, kept or not.
        let next_token = match last_time {
            Some(last) if rows.len() == self.max_results as usize => {
                let mut resume = ResumePoints::new();
                resume.insert(ALARM_STATUS_PROPERTY.to_string(), last);
                token::encode(&resume)
            }
            _ => None,
        };

        ReadResponse {
            property_values,
            next_token,
        }
    }
}

/// Status equality filter: the request's only property filter, when it is
/// `alarm_status = <stringValue>`.
fn status_filter(request: &QueryRequest) -> Option<&str> {
    match request.property_filters.as_slice() {
        [filter]
            if filter.operator.as_deref() == Some("=")
                && filter.property_name.as_deref() == Some(ALARM_STATUS_PROPERTY) =>
        {
            filter.string_value()
        }
        _ => None,
    }
}

/// Read one page of alarm events.
pub async fn read_alarms(
    executor: &dyn SqlExecutor,
    request: &QueryRequest,
    default_table: &str,
) -> Result<ReadResponse> {
    let alarm_request = AlarmRequest::from_request(request, default_table)?;
    let statement = alarm_request.statement();
    info!(
        "Reading alarms from {} between {} and {} ({:?})",
        alarm_request.table, alarm_request.range.start, alarm_request.range.end, alarm_request.selector
    );

    let rows = executor.execute(&statement).await.map_err(|e| {
        error!("Alarm query failed: {}", e);
        e
    })?;

    Ok(alarm_request.page(&rows))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    use std::sync::Mutex;

    use async_trait::async_trait;

    use crate::snowflake::testing::{row, ScriptedExecutor};
    use crate::timestamp::parse_iso;

    /// In-memory ALARM_ID/EVENT_TIME/alarm_status table answering the
    /// unfiltered alarm query.
    struct AlarmTable {
        events: Vec<(String, NaiveDateTime, String)>,
        executed: Mutex<Vec<Statement>>,
    }

    impl AlarmTable {
        fn new(events: &[(&str, &str, &str)]) -> Self {
            Self {
                events: events
                    .iter()
                    .map(|(id, ts, status)| (id.to_string(), parse_iso(ts).unwrap(), status.to_string()))
                    .collect(),
                executed: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl SqlExecutor for AlarmTable {
        async fn execute(&self, statement: &Statement) -> Result<Vec<Row>> {
            self.executed.lock().unwrap().push(statement.clone());
            let b = &statement.bindings;
            let lower = parse_iso(b[2].as_text().unwrap()).unwrap();
            let upper = parse_iso(b[3].as_text().unwrap()).unwrap();
            let limit = b[4].as_fixed().unwrap() as usize;
            let inclusive = statement.sql.contains("EVENT_TIME <= ?");

            let mut matching: Vec<_> = self
                .events
                .iter()
                .filter(|(_, ts, _)| *ts > lower && (*ts < upper || (inclusive && *ts == upper)))
                .collect();
            matching.sort_by_key(|(_, ts, _)| *ts);
            if statement.sql.contains("ORDER BY EVENT_TIME DESC") {
                matching.reverse();
            }

            Ok(matching
                .into_iter()
                .take(limit)
                .map(|(id, ts, status)| vec![Some(id.clone()), Some(format_iso(ts)), Some(status.clone())])
                .collect())
        }
    }

    fn event_times(response: &ReadResponse) -> Vec<String> {
        let mut times: Vec<String> = response
            .property_values
            .iter()
            .flat_map(|series| series.values.iter().map(|p| p.time.clone()))
            .collect();
        times.sort();
        times
    }

    fn request(overrides: Value) -> QueryRequest {
        let mut base = json!({
            "workspaceId": "plant",
            "componentTypeId": "com.snowflake.alarm",
            "selectedProperties": ["alarm_status"],
            "startTime": "2023-01-01T00:00:00",
            "endTime": "2023-01-02T00:00:00",
            "maxResults": 2,
            "properties": {}
        });
        if let (Some(base), Some(overrides)) = (base.as_object_mut(), overrides.as_object()) {
            for (k, v) in overrides {
                base.insert(k.clone(), v.clone());
            }
        }
        QueryRequest::from_value(base).unwrap()
    }

    #[test]
    fn test_descending_first_page_includes_end_boundary() {
        let req = AlarmRequest::from_request(&request(json!({"orderByTime": "DESCENDING"})), "TEST_ALARMS").unwrap();
        assert_eq!(req.upper_operator(), "<=");

        let statement = req.statement();
        assert!(statement.sql.contains("EVENT_TIME <= ?"));
        assert!(statement.sql.contains("ORDER BY EVENT_TIME DESC"));
        assert_eq!(statement.bindings[1].as_text(), Some("TEST_ALARMS"));
        assert_eq!(statement.bindings[3].as_text(), Some("2023-01-02T00:00:00"));
    }

    #[test]
    fn test_ascending_or_resumed_pages_use_strict_upper_bound() {
        let ascending = AlarmRequest::from_request(&request(json!({})), "TEST_ALARMS").unwrap();
        assert_eq!(ascending.upper_operator(), "<");
        assert!(ascending.statement().sql.contains("EVENT_TIME < ?"));

        let resumed = AlarmRequest::from_request(
            &request(json!({
                "orderByTime": "DESCENDING",
                "nextToken": r#"{"alarm_status":"2023-01-01T12:00:00"}"#
            })),
            "TEST_ALARMS",
        )
        .unwrap();
        assert_eq!(resumed.upper_operator(), "<");
        assert_eq!(
            resumed.bounds(),
            (parse_iso("2023-01-01T00:00:00").unwrap(), parse_iso("2023-01-01T12:00:00").unwrap())
        );
    }

    #[test]
    fn test_ascending_resume_moves_lower_bound() {
        let req = AlarmRequest::from_request(
            &request(json!({"nextToken": r#"{"alarm_status":"2023-01-01T12:00:00"}"#})),
            "TEST_ALARMS",
        )
        .unwrap();
        let statement = req.statement();
        assert_eq!(statement.bindings[2].as_text(), Some("2023-01-01T12:00:00"));
        assert_eq!(statement.bindings[3].as_text(), Some("2023-01-02T00:00:00"));
    }

    #[test]
    fn test_query_shapes() {
        let by_id = AlarmRequest::from_request(
            &request(json!({"properties": {
                "alarm_key": {"value": {"stringValue": "A-7"}},
                "tableName": {"value": {"stringValue": "PLANT_ALARMS"}}
            }})),
            "TEST_ALARMS",
        )
        .unwrap();
        assert_eq!(by_id.selector, AlarmSelector::AlarmId("A-7".to_string()));
        let statement = by_id.statement();
        assert!(statement.sql.contains("WHERE ALARM_ID = ?"));
        assert_eq!(statement.bindings[1].as_text(), Some("PLANT_ALARMS"));
        assert_eq!(statement.bindings[2].as_text(), Some("A-7"));

        let by_status = AlarmRequest::from_request(
            &request(json!({"propertyFilters": [{
                "propertyName": "alarm_status",
                "operator": "=",
                "value": {"stringValue": "ACTIVE"}
            }]})),
            "TEST_ALARMS",
        )
        .unwrap();
        assert_eq!(by_status.selector, AlarmSelector::LatestStatus("ACTIVE".to_string()));
        let statement = by_status.statement();
        assert!(statement.sql.contains("FIRST_VALUE(identifier(?)) OVER (PARTITION BY ALARM_ID"));
        assert!(statement.sql.contains("WHERE last_status = ?"));
        assert_eq!(statement.bindings.len(), 8);
        assert_eq!(statement.bindings[7].as_text(), Some("ACTIVE"));

        let other_filter = AlarmRequest::from_request(
            &request(json!({"propertyFilters": [{
                "propertyName": "alarm_status",
                "operator": "!=",
                "value": {"stringValue": "ACTIVE"}
            }]})),
            "TEST_ALARMS",
        )
        .unwrap();
        assert_eq!(other_filter.selector, AlarmSelector::All);
        assert_eq!(other_filter.statement().bindings.len(), 5);
    }

    #[test]
    fn test_validation() {
        let wrong_property = AlarmRequest::from_request(&request(json!({"selectedProperties": ["temp"]})), "T");
        assert!(matches!(wrong_property, Err(ConnectorError::Validation(_))));

        let no_workspace = AlarmRequest::from_request(&request(json!({"workspaceId": null})), "T");
        assert!(matches!(no_workspace, Err(ConnectorError::Validation(_))));

        let half_entity = AlarmRequest::from_request(&request(json!({"entityId": "pump-1"})), "T");
        assert!(matches!(half_entity, Err(ConnectorError::Validation(_))));

        let bad_token = AlarmRequest::from_request(&request(json!({"nextToken": "{}"})), "T");
        assert!(matches!(bad_token, Err(ConnectorError::InvalidToken(_))));
    }

    #[tokio::test]
    async fn test_groups_by_alarm_and_emits_token_when_full() {
        let executor = ScriptedExecutor::new().respond(vec![
            row(&[Some("A-1"), Some("1672531800.000000000"), Some("ACTIVE")]),
            row(&[Some("A-2"), Some("1672532400.000000000"), Some("NORMAL")]),
        ]);

        let response = read_alarms(&executor, &request(json!({})), "TEST_ALARMS").await.unwrap();
        assert_eq!(response.property_values.len(), 2);
        let first = &response.property_values[0];
        assert_eq!(
            first.entity_property_reference,
            EntityPropertyReference::for_external_id("alarm_key", "A-1", "alarm_status")
        );
        assert_eq!(first.values[0].value, PropertyValue::String("ACTIVE".to_string()));
        assert_eq!(
            response.next_token.as_deref(),
            Some(r#"{"alarm_status":"2023-01-01T00:20:00"}"#)
        );
    }

    #[tokio::test]
    async fn test_entity_reference_and_short_page() {
        let executor = ScriptedExecutor::new().respond(vec![
            row(&[Some("A-1"), Some("1672531800.000000000"), Some("ACTIVE")]),
        ]);

        let response = read_alarms(
            &executor,
            &request(json!({"entityId": "pump-1", "componentName": "alarms"})),
            "TEST_ALARMS",
        )
        .await
        .unwrap();

        assert_eq!(
            response.property_values[0].entity_property_reference,
            EntityPropertyReference::for_entity("pump-1", "alarms", "alarm_status")
        );
        assert!(response.next_token.is_none());
        assert_eq!(executor.statements().len(), 1);
    }

    #[tokio::test]
    async fn test_ascending_pages_cover_every_event_once() {
        let table = AlarmTable::new(&[
            ("A-1", "2023-01-01T00:10:00", "ACTIVE"),
            ("A-2", "2023-01-01T00:20:00", "NORMAL"),
            ("A-1", "2023-01-01T00:30:00", "NORMAL"),
            ("A-3", "2023-01-01T00:40:00", "ACTIVE"),
        ]);

        let first = read_alarms(&table, &request(json!({})), "TEST_ALARMS").await.unwrap();
        assert_eq!(event_times(&first), vec!["2023-01-01T00:10:00", "2023-01-01T00:20:00"]);
        assert_eq!(first.next_token.as_deref(), Some(r#"{"alarm_status":"2023-01-01T00:20:00"}"#));

        let second = read_alarms(&table, &request(json!({"nextToken": first.next_token})), "TEST_ALARMS")
            .await
            .unwrap();
        assert_eq!(event_times(&second), vec!["2023-01-01T00:30:00", "2023-01-01T00:40:00"]);
        assert_eq!(second.property_values[0].values[0].value, PropertyValue::String("NORMAL".to_string()));

        let third = read_alarms(&table, &request(json!({"nextToken": second.next_token})), "TEST_ALARMS")
            .await
            .unwrap();
        assert!(third.property_values.is_empty());
        assert!(third.next_token.is_none());
    }

    #[tokio::test]
    async fn test_descending_pages_include_end_time_once() {
        let table = AlarmTable::new(&[
            ("A-1", "2023-01-01T00:10:00", "ACTIVE"),
            ("A-1", "2023-01-01T12:00:00", "NORMAL"),
            ("A-2", "2023-01-02T00:00:00", "ACTIVE"),
        ]);
        let order = json!({"orderByTime": "DESCENDING"});

        let first = read_alarms(&table, &request(order), "TEST_ALARMS").await.unwrap();
        assert_eq!(event_times(&first), vec!["2023-01-01T12:00:00", "2023-01-02T00:00:00"]);
        assert_eq!(first.next_token.as_deref(), Some(r#"{"alarm_status":"2023-01-01T12:00:00"}"#));

        let second = read_alarms(
            &table,
            &request(json!({"orderByTime": "DESCENDING", "nextToken": first.next_token})),
            "TEST_ALARMS",
        )
        .await
        .unwrap();
        assert_eq!(event_times(&second), vec!["2023-01-01T00:10:00"]);
        assert!(second.next_token.is_none());
        assert_eq!(table.executed.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_token_resumes_after_last_scanned_row() {
        let executor = ScriptedExecutor::new().respond(vec![
            row(&[Some("A-1"), Some("1672531800.000000000"), Some("ACTIVE")]),
            row(&[Some("A-2"), Some("1672532400.000000000"), None]),
        ]);

        let response = read_alarms(&executor, &request(json!({})), "TEST_ALARMS").await.unwrap();
        assert_eq!(response.property_values.len(), 1);
        assert_eq!(
            response.next_token.as_deref(),
            Some(r#"{"alarm_status":"2023-01-01T00:20:00"}"#)
        );
    }
}
