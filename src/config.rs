use std::env;
use std::time::Duration;

use crate::error::{ConnectorError, Result};

const DEFAULT_SECRET_ID: &str = "SnowflakeSecret";
const DEFAULT_ALARM_TABLE: &str = "TEST_ALARMS";
const DEFAULT_STAGE_NAME: &str = "twinmaker_batch_write_stage";
const DEFAULT_FILE_FORMAT_NAME: &str = "twinmaker_batch_write_format";
const DEFAULT_STAGE_PREFIX: &str = "twinmaker-batch-write";
const DEFAULT_STATEMENT_TIMEOUT_SECS: u64 = 60;

/// Process-wide settings read from the Lambda environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectorConfig {
    pub secret_id: String,
    pub alarm_table: String,
    pub stage_name: String,
    pub file_format_name: String,
    /// Bucket backing the external stage. Only the writer needs it.
    pub stage_bucket: Option<String>,
    pub stage_prefix: String,
    pub statement_timeout: Duration,
}

impl ConnectorConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let or_default = |key: &str, default: &str| {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| default.to_string())
        };

        let timeout_secs = match lookup("SNOWFLAKE_STATEMENT_TIMEOUT_SECS") {
            Some(raw) => raw.trim().parse::<u64>().map_err(|e| {
                ConnectorError::Config(format!(
                    "Invalid SNOWFLAKE_STATEMENT_TIMEOUT_SECS {}: {}",
                    raw, e
                ))
            })?,
            None => DEFAULT_STATEMENT_TIMEOUT_SECS,
        };

        Ok(Self {
            secret_id: or_default("SNOWFLAKE_SECRET_ID", DEFAULT_SECRET_ID),
            alarm_table: or_default("ALARM_TABLE", DEFAULT_ALARM_TABLE),
            stage_name: or_default("STAGE_NAME", DEFAULT_STAGE_NAME),
            file_format_name: or_default("FILE_FORMAT_NAME", DEFAULT_FILE_FORMAT_NAME),
            stage_bucket: lookup("STAGE_BUCKET").filter(|v| !v.trim().is_empty()),
            stage_prefix: or_default("STAGE_PREFIX", DEFAULT_STAGE_PREFIX)
                .trim_matches('/')
                .to_string(),
            statement_timeout: Duration::from_secs(timeout_secs),
        })
    }

    /// Bucket for the bulk loader's external stage.
    pub fn require_stage_bucket(&self) -> Result<&str> {
        self.stage_bucket
            .as_deref()
            .ok_or_else(|| ConnectorError::Config("STAGE_BUCKET environment variable not set".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = ConnectorConfig::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(config.secret_id, "SnowflakeSecret");
        assert_eq!(config.alarm_table, "TEST_ALARMS");
        assert_eq!(config.stage_name, "twinmaker_batch_write_stage");
        assert_eq!(config.file_format_name, "twinmaker_batch_write_format");
        assert_eq!(config.statement_timeout, Duration::from_secs(60));
        assert!(config.stage_bucket.is_none());
        assert!(config.require_stage_bucket().is_err());
    }

    #[test]
    fn test_overrides() {
        let config = ConnectorConfig::from_lookup(lookup_from(&[
            ("SNOWFLAKE_SECRET_ID", "prod/snowflake"),
            ("ALARM_TABLE", "PLANT_ALARMS"),
            ("STAGE_BUCKET", "loader-bucket"),
            ("STAGE_PREFIX", "/staging/"),
            ("SNOWFLAKE_STATEMENT_TIMEOUT_SECS", "15"),
        ]))
        .unwrap();

        assert_eq!(config.secret_id, "prod/snowflake");
        assert_eq!(config.alarm_table, "PLANT_ALARMS");
        assert_eq!(config.require_stage_bucket().unwrap(), "loader-bucket");
        assert_eq!(config.stage_prefix, "staging");
        assert_eq!(config.statement_timeout, Duration::from_secs(15));
    }

    #[test]
    fn test_invalid_timeout() {
        let result = ConnectorConfig::from_lookup(lookup_from(&[(
            "SNOWFLAKE_STATEMENT_TIMEOUT_SECS",
            "soon",
        )]));
        assert!(matches!(result, Err(ConnectorError::Config(_))));
    }
}
