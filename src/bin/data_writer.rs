//! UDW connector bulk loading time-series values into Snowflake.

use anyhow::Context;
use aws_config::BehaviorVersion;
use lambda_runtime::{run, service_fn, Error, LambdaEvent};
use serde_json::Value;
use tracing::info;

use snowflake_connector::writer::{write_entries, BulkLoader, S3Stage, WriteRequest, WriteResponse};
use snowflake_connector::{init_tracing, ConnectorConfig, ConnectorError, SnowflakeClient};

struct DataWriter {
    client: SnowflakeClient,
    stage: S3Stage,
    loader: BulkLoader,
}

impl DataWriter {
    async fn new(config: &ConnectorConfig) -> anyhow::Result<Self> {
        let sdk_config = aws_config::defaults(BehaviorVersion::latest()).load().await;
        let secrets = aws_sdk_secretsmanager::Client::new(&sdk_config);
        let client = SnowflakeClient::connect(&secrets, config)
            .await
            .context("Failed to initialize Snowflake client")?;

        let bucket = config.require_stage_bucket()?;
        let stage = S3Stage::new(aws_sdk_s3::Client::new(&sdk_config), bucket, &config.stage_prefix);
        let loader = BulkLoader::new(&config.stage_name, &config.file_format_name)?;

        Ok(Self { client, stage, loader })
    }

    async fn handle(&self, event: LambdaEvent<Value>) -> Result<WriteResponse, Error> {
        let (payload, _context) = event.into_parts();
        info!("Event: {}", payload);

        let request = WriteRequest::from_value(payload).map_err(ConnectorError::logged)?;
        let response = write_entries(&self.client, &self.stage, &self.loader, &request)
            .await
            .map_err(ConnectorError::logged)?;
        info!("Write finished with {} error entries", response.error_entries.len());
        Ok(response)
    }
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    init_tracing();

    let config = ConnectorConfig::from_env().context("Invalid connector configuration")?;
    let writer = DataWriter::new(&config).await?;

    run(service_fn(|event: LambdaEvent<Value>| writer.handle(event))).await
}
