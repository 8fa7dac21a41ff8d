use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, error, info};
use uuid::Uuid;

use super::{Row, SnowflakeCredentials, SqlExecutor, Statement};
use crate::config::ConnectorConfig;
use crate::error::{ConnectorError, Result};

const STATEMENTS_PATH: &str = "/api/v2/statements";
const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Snowflake SQL REST API client.
///
/// Built once per Lambda process and shared by every invocation it serves.
pub struct SnowflakeClient {
    http: reqwest::Client,
    credentials: SnowflakeCredentials,
    base_url: String,
    statement_timeout: Duration,
}

#[derive(Debug, Serialize)]
struct StatementRequest<'a> {
    statement: &'a str,
    timeout: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    database: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    schema: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    warehouse: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    bindings: Option<Map<String, Value>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatementResponse {
    code: Option<String>,
    message: Option<String>,
    statement_handle: Option<String>,
    result_set_meta_data: Option<ResultSetMetaData>,
    #[serde(default)]
    data: Vec<Vec<Option<String>>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResultSetMetaData {
    #[serde(default)]
    partition_info: Vec<Value>,
}

impl SnowflakeClient {
    /// Load credentials from Secrets Manager and prepare the HTTP client.
    pub async fn connect(
        secrets: &aws_sdk_secretsmanager::Client,
        config: &ConnectorConfig,
    ) -> Result<Self> {
        let credentials = SnowflakeCredentials::load(secrets, &config.secret_id).await?;
        Self::new(credentials, config.statement_timeout)
    }

    pub fn new(credentials: SnowflakeCredentials, statement_timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(statement_timeout + Duration::from_secs(10))
            .build()
            .map_err(|e| ConnectorError::SnowflakeError(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url: credentials.base_url(),
            credentials,
            statement_timeout,
        })
    }

    fn headers(&self) -> Result<HeaderMap> {
        let bearer = format!("Bearer {}", self.credentials.jwt()?);
        let mut headers = HeaderMap::with_capacity(5);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(
            USER_AGENT,
            HeaderValue::from_static(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"))),
        );
        headers.insert(
            "x-snowflake-authorization-token-type",
            HeaderValue::from_static("KEYPAIR_JWT"),
        );
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&bearer)
                .map_err(|e| ConnectorError::SnowflakeError(format!("Invalid authorization header: {}", e)))?,
        );
        Ok(headers)
    }

    async fn submit(&self, statement: &Statement) -> Result<(StatusCode, StatementResponse)> {
        let body = StatementRequest {
            statement: &statement.sql,
            timeout: self.statement_timeout.as_secs(),
            database: self.credentials.database.as_deref(),
            schema: self.credentials.schema.as_deref(),
            warehouse: self.credentials.warehouse.as_deref(),
            role: self.credentials.role.as_deref(),
            bindings: statement.wire_bindings(),
        };

        let url = format!("{}{}?requestId={}", self.base_url, STATEMENTS_PATH, Uuid::new_v4());
        let response = self
            .http
            .post(url)
            .headers(self.headers()?)
            .json(&body)
            .send()
            .await
            .map_err(|e| ConnectorError::SnowflakeError(format!("Failed to submit statement: {}", e)))?;

        Self::decode(response).await
    }

    async fn fetch(&self, handle: &str, partition: Option<usize>) -> Result<(StatusCode, StatementResponse)> {
        let mut url = format!("{}{}/{}", self.base_url, STATEMENTS_PATH, handle);
        if let Some(partition) = partition {
            url.push_str(&format!("?partition={}", partition));
        }

        let response = self
            .http
            .get(url)
            .headers(self.headers()?)
            .send()
            .await
            .map_err(|e| ConnectorError::SnowflakeError(format!("Failed to fetch statement {}: {}", handle, e)))?;

        Self::decode(response).await
    }

    async fn decode(response: reqwest::Response) -> Result<(StatusCode, StatementResponse)> {
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| ConnectorError::SnowflakeError(format!("Failed to read response body: {}", e)))?;

        let parsed = if text.trim().is_empty() {
            StatementResponse::default()
        } else {
            serde_json::from_str(&text).map_err(|e| {
                ConnectorError::SnowflakeError(format!("Unexpected response ({}): {}: {}", status, e, text))
            })?
        };
        Ok((status, parsed))
    }
}

fn failure(status: StatusCode, response: &StatementResponse) -> ConnectorError {
    ConnectorError::SnowflakeError(format!(
        "HTTP {} code={} message={}",
        status,
        response.code.as_deref().unwrap_or("-"),
        response.message.as_deref().unwrap_or("-")
    ))
}

#[async_trait]
impl SqlExecutor for SnowflakeClient {
    async fn execute(&self, statement: &Statement) -> Result<Vec<Row>> {
        debug!("Executing statement: {}", statement.sql);

        let (mut status, mut response) = self.submit(statement).await?;
        let deadline = tokio::time::Instant::now() + self.statement_timeout;

        // 202 means the statement is still running; poll its handle.
        while status == StatusCode::ACCEPTED {
            let handle = response
                .statement_handle
                .clone()
                .ok_or_else(|| failure(status, &response))?;
            if tokio::time::Instant::now() >= deadline {
                error!("Statement {} did not finish within {:?}", handle, self.statement_timeout);
                return Err(ConnectorError::SnowflakeError(format!(
                    "Statement {} timed out",
                    handle
                )));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
            (status, response) = self.fetch(&handle, None).await?;
        }

        if !status.is_success() {
            let err = failure(status, &response);
            error!("Statement failed: {}", err);
            return Err(err);
        }

        let partitions = response
            .result_set_meta_data
            .as_ref()
            .map(|m| m.partition_info.len())
            .unwrap_or(1);
        let mut rows = std::mem::take(&mut response.data);

        if partitions > 1 {
            let handle = response
                .statement_handle
                .clone()
                .ok_or_else(|| failure(status, &response))?;
            for partition in 1..partitions {
                let (status, page) = self.fetch(&handle, Some(partition)).await?;
                if !status.is_success() {
                    return Err(failure(status, &page));
                }
                rows.extend(page.data);
            }
        }

        info!("Statement returned {} rows", rows.len());
        Ok(rows)
    }
}
