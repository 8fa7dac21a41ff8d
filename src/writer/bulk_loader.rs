//! Bulk loading of time-series rows into Snowflake.
//!
//! Rows are rendered as CSV, uploaded into the S3 location behind an external
//! stage, copied into the target table with `COPY INTO`, and the staged file
//! is removed again.

use std::ops::Range;

use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::{ConnectorError, Result};
use crate::snowflake::{cell, is_plain_object_name, Row, SqlExecutor, Statement};

/// Columns of the time-series table, in CSV order.
pub const TIMESERIES_TABLE_FIELDNAMES: [&str; 12] = [
    "PT_ID", "PT", "DESCRIPTION", "TS", "UOM", "DATA_TYPE", "PT_VALUE", "PT_VALUE_STR", "PT_STATUS", "YEAR",
    "MONTH", "DAY",
];

pub const COPY_INTO_SUCCESS_STATUS: &str = "LOADED";
pub const COPY_INTO_PARTIAL_STATUS: &str = "PARTIALLY_LOADED";

/// One value to load.
#[derive(Debug, Clone, PartialEq)]
pub struct BulkRow {
    pub foreign_key: String,
    pub time: String,
    pub value: f64,
}

impl BulkRow {
    fn field(&self, column: &str) -> String {
        match column {
            "PT" => self.foreign_key.clone(),
            "TS" => self.time.clone(),
            "PT_VALUE" => self.value.to_string(),
            _ => String::new(),
        }
    }
}

/// Where CSV files are staged before `COPY INTO`.
#[async_trait]
pub trait FileStage: Send + Sync {
    async fn put(&self, file_name: &str, body: Vec<u8>) -> Result<()>;
    async fn remove(&self, file_name: &str) -> Result<()>;
}

/// S3 location backing a Snowflake external stage.
pub struct S3Stage {
    client: aws_sdk_s3::Client,
    bucket: String,
    prefix: String,
}

impl S3Stage {
    pub fn new(client: aws_sdk_s3::Client, bucket: &str, prefix: &str) -> Self {
        Self {
            client,
            bucket: bucket.to_string(),
            prefix: prefix.trim_matches('/').to_string(),
        }
    }

    fn key(&self, file_name: &str) -> String {
        if self.prefix.is_empty() {
            file_name.to_string()
        } else {
            format!("{}/{}", self.prefix, file_name)
        }
    }
}

#[async_trait]
impl FileStage for S3Stage {
    async fn put(&self, file_name: &str, body: Vec<u8>) -> Result<()> {
        let key = self.key(file_name);
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .body(ByteStream::from(body))
            .content_type("text/csv")
            .send()
            .await
            .map_err(|e| ConnectorError::S3Error(format!("Failed to upload s3://{}/{}: {}", self.bucket, key, e)))?;

        info!("Staged s3://{}/{}", self.bucket, key);
        Ok(())
    }

    async fn remove(&self, file_name: &str) -> Result<()> {
        let key = self.key(file_name);
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
            .map_err(|e| ConnectorError::S3Error(format!("Failed to delete s3://{}/{}: {}", self.bucket, key, e)))?;

        info!("Removed staged file s3://{}/{}", self.bucket, key);
        Ok(())
    }
}

/// Outcome reported by `COPY INTO` for one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyOutcome {
    pub status: String,
    pub errors_seen: usize,
    /// 1-based CSV line of the first rejected row.
    pub first_error_line: Option<usize>,
}

impl CopyOutcome {
    /// Parse the first row of `COPY INTO` output:
    /// `file, status, rows_parsed, rows_loaded, error_limit, errors_seen,
    /// first_error, first_error_line, ...`
    pub fn from_row(row: &Row) -> Option<Self> {
        if row.len() <= 1 {
            return None;
        }
        let number = |index| cell(row, index).and_then(|v| v.trim().parse::<usize>().ok());
        Some(Self {
            status: cell(row, 1)?.to_string(),
            errors_seen: number(5).unwrap_or(0),
            first_error_line: number(7).filter(|line| *line > 0),
        })
    }

    /// Indices of rows of a `total`-row file that did not load.
    ///
    /// A fully loaded file has none. A partially loaded one reports only its
    /// first rejected line and an error count, so the failure is attributed
    /// to the `errors_seen` rows starting at that line. Any other status
    /// means nothing was committed.
    pub fn failed_rows(&self, total: usize) -> Range<usize> {
        match self.status.as_str() {
            COPY_INTO_SUCCESS_STATUS => 0..0,
            COPY_INTO_PARTIAL_STATUS => {
                let start = self.first_error_line.map(|line| line - 1).unwrap_or(0).min(total);
                let end = start.saturating_add(self.errors_seen).min(total);
                if start == end {
                    0..total
                } else {
                    start..end
                }
            }
            _ => 0..total,
        }
    }
}

/// Render rows as header-less CSV in table column order.
pub fn render_csv(rows: &[BulkRow]) -> Result<Vec<u8>> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .terminator(csv::Terminator::CRLF)
        .from_writer(Vec::new());

    for row in rows {
        writer
            .write_record(TIMESERIES_TABLE_FIELDNAMES.iter().map(|column| row.field(column)))
            .map_err(|e| ConnectorError::S3Error(format!("Failed to render staged CSV: {}", e)))?;
    }

    writer
        .into_inner()
        .map_err(|e| ConnectorError::S3Error(format!("Failed to render staged CSV: {}", e)))
}

pub struct BulkLoader {
    stage_name: String,
    file_format_name: String,
}

impl BulkLoader {
    pub fn new(stage_name: &str, file_format_name: &str) -> Result<Self> {
        for name in [stage_name, file_format_name] {
            if !is_plain_object_name(name) {
                return Err(ConnectorError::Config(format!("Invalid Snowflake object name {}", name)));
            }
        }
        Ok(Self {
            stage_name: stage_name.to_string(),
            file_format_name: file_format_name.to_string(),
        })
    }

    pub fn copy_statement(&self, table: &str, file_name: &str) -> Statement {
        Statement::new(format!(
            "COPY INTO {} FROM @{}/{} FILE_FORMAT = (FORMAT_NAME = {})",
            table, self.stage_name, file_name, self.file_format_name
        ))
    }

    /// Load `rows` into `table` and return the indices of rows that failed.
    /// Failures are reported, never raised: the caller maps them back onto
    /// request entries.
    pub async fn load(
        &self,
        executor: &dyn SqlExecutor,
        stage: &dyn FileStage,
        table: &str,
        rows: &[BulkRow],
    ) -> Range<usize> {
        if !is_plain_object_name(table) {
            error!("Refusing to load into table {}", table);
            return 0..rows.len();
        }

        let file_name = format!("batch-entry-{}.csv", Uuid::new_v4());
        let staged = match render_csv(rows) {
            Ok(body) => stage.put(&file_name, body).await,
            Err(e) => Err(e),
        };

        if let Err(e) = staged {
            error!("Failed to load {} rows to Snowflake table {}: {}", rows.len(), table, e);
            return 0..rows.len();
        }

        let outcome = match executor.execute(&self.copy_statement(table, &file_name)).await {
            Ok(output) => output.first().and_then(CopyOutcome::from_row),
            Err(e) => {
                error!("Failed to COPY {} INTO {}: {}", file_name, table, e);
                None
            }
        };

        if let Err(e) = stage.remove(&file_name).await {
            warn!("Staged file {} was not removed: {}", file_name, e);
        }

        match outcome {
            Some(outcome) => {
                info!(
                    "COPY INTO {} status={} errors_seen={} first_error_line={:?}",
                    table, outcome.status, outcome.errors_seen, outcome.first_error_line
                );
                let failed = outcome.failed_rows(rows.len());
                if !failed.is_empty() {
                    error!("Failed to load {} of {} rows to Snowflake table {}", failed.len(), rows.len(), table);
                }
                failed
            }
            None => {
                error!("COPY INTO {} reported no load result for {}", table, file_name);
                0..rows.len()
            }
        }
    }
}
