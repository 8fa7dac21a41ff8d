//! UDQ connector reading static attribute values of one entity.

use anyhow::Context;
use aws_config::BehaviorVersion;
use lambda_runtime::{run, service_fn, Error, LambdaEvent};
use serde_json::Value;
use tracing::info;

use snowflake_connector::reader::attribute::AttributeResponse;
use snowflake_connector::reader::read_attributes;
use snowflake_connector::{init_tracing, ConnectorConfig, ConnectorError, QueryRequest, SnowflakeClient};

async fn function_handler(client: &SnowflakeClient, event: LambdaEvent<Value>) -> Result<AttributeResponse, Error> {
    let (payload, _context) = event.into_parts();
    info!("Event: {}", payload);

    let request = QueryRequest::from_value(payload).map_err(ConnectorError::logged)?;
    Ok(read_attributes(client, &request).await.map_err(ConnectorError::logged)?)
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    init_tracing();

    let config = ConnectorConfig::from_env().context("Invalid connector configuration")?;
    let sdk_config = aws_config::defaults(BehaviorVersion::latest()).load().await;
    let secrets = aws_sdk_secretsmanager::Client::new(&sdk_config);
    let client = SnowflakeClient::connect(&secrets, &config)
        .await
        .context("Failed to initialize Snowflake client")?;

    run(service_fn(|event: LambdaEvent<Value>| function_handler(&client, event))).await
}
