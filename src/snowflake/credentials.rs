use chrono::Utc;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{ConnectorError, Result};

const JWT_LIFETIME_SECS: i64 = 59 * 60;

/// Snowflake connection settings stored as a JSON secret in Secrets Manager.
#[derive(Clone, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct SnowflakeCredentials {
    pub account: String,
    pub user: String,
    pub role: Option<String>,
    pub warehouse: Option<String>,
    pub database: Option<String>,
    pub schema: Option<String>,
    /// PEM-encoded RSA private key registered for the user.
    pub private_key: String,
    /// `SHA256:<base64>` fingerprint of the registered public key.
    #[serde(rename = "PUBLIC_KEY_FP")]
    pub public_key_fingerprint: String,
    /// Overrides `https://<account>.snowflakecomputing.com`.
    pub host: Option<String>,
}

impl std::fmt::Debug for SnowflakeCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnowflakeCredentials")
            .field("account", &self.account)
            .field("user", &self.user)
            .field("role", &self.role)
            .field("warehouse", &self.warehouse)
            .field("database", &self.database)
            .field("schema", &self.schema)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    iss: String,
    sub: String,
    iat: i64,
    exp: i64,
}

impl SnowflakeCredentials {
    /// Fetch and parse the credential secret.
    pub async fn load(client: &aws_sdk_secretsmanager::Client, secret_id: &str) -> Result<Self> {
        let response = client
            .get_secret_value()
            .secret_id(secret_id)
            .send()
            .await
            .map_err(|e| ConnectorError::SecretsError(format!("Failed to read secret {}: {}", secret_id, e)))?;

        let secret = response
            .secret_string()
            .ok_or_else(|| ConnectorError::SecretsError(format!("Secret {} has no string value", secret_id)))?;

        let credentials = Self::from_json(secret)?;
        info!("Loaded Snowflake credentials for account {}", credentials.account);
        Ok(credentials)
    }

    pub fn from_json(secret: &str) -> Result<Self> {
        serde_json::from_str(secret)
            .map_err(|e| ConnectorError::SecretsError(format!("Malformed Snowflake secret: {}", e)))
    }

    /// Base URL of the SQL API.
    pub fn base_url(&self) -> String {
        match &self.host {
            Some(host) => host.trim_end_matches('/').to_string(),
            None => format!("https://{}.snowflakecomputing.com", self.account.to_ascii_lowercase()),
        }
    }

    /// Account locator as used in key-pair JWT claims: upper case, without
    /// region or cloud suffix.
    fn qualified_account(&self) -> String {
        self.account
            .split('.')
            .next()
            .unwrap_or(&self.account)
            .to_ascii_uppercase()
    }

    /// Build a key-pair JWT for the SQL API.
    pub fn jwt(&self) -> Result<String> {
        let subject = format!("{}.{}", self.qualified_account(), self.user.to_ascii_uppercase());
        let now = Utc::now().timestamp();
        let claims = Claims {
            iss: format!("{}.{}", subject, self.public_key_fingerprint),
            sub: subject,
            iat: now,
            exp: now + JWT_LIFETIME_SECS,
        };

        let key = EncodingKey::from_rsa_pem(self.private_key.as_bytes())
            .map_err(|e| ConnectorError::SecretsError(format!("Invalid Snowflake private key: {}", e)))?;

        jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &key)
            .map_err(|e| ConnectorError::SnowflakeError(format!("Failed to sign JWT: {}", e)))
    }
}
