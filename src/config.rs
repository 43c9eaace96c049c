use std::{env, net::SocketAddr, str::FromStr, time::Duration};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid environment variable format for {0}: {1}")]
    InvalidVar(String, String),
}

/// Where story records and media live.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Backend {
    DynamoDb,
    Memory,
}

impl FromStr for Backend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "dynamodb" => Ok(Backend::DynamoDb),
            "memory" => Ok(Backend::Memory),
            other => Err(format!("expected 'dynamodb' or 'memory', got '{}'", other)),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub backend: Backend,
    pub stories_table_name: String,
    pub media_bucket_name: String,
    pub media_public_base_url: String,
    pub aws_region: String,
    // Optional endpoint for LocalStack
    pub localstack_endpoint: Option<String>,
    pub store_timeout: Duration,
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        // Load .env file if present (ignores errors, relies on env vars otherwise)
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from any key lookup, so parsing is testable
    /// without touching the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var_or = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let bind_address_str = var_or("BIND_ADDRESS", "0.0.0.0:3000");
        let bind_address = SocketAddr::from_str(&bind_address_str)
            .map_err(|e| ConfigError::InvalidVar("BIND_ADDRESS".into(), e.to_string()))?;

        let backend = Backend::from_str(&var_or("STORY_BACKEND", "dynamodb"))
            .map_err(|e| ConfigError::InvalidVar("STORY_BACKEND".into(), e))?;

        let stories_table_name = non_blank("STORIES_TABLE_NAME", var_or("STORIES_TABLE_NAME", "stories"))?;
        let media_bucket_name = non_blank("MEDIA_BUCKET_NAME", var_or("MEDIA_BUCKET_NAME", "media"))?;
        let aws_region = var_or("AWS_DEFAULT_REGION", "ca-central-1");
        let localstack_endpoint = lookup("AWS_ENDPOINT_URL").filter(|url| !url.trim().is_empty());

        let media_public_base_url = match lookup("MEDIA_PUBLIC_BASE_URL") {
            Some(url) => url,
            None => match (backend, &localstack_endpoint) {
                (Backend::Memory, _) => "/media".to_string(),
                (Backend::DynamoDb, Some(endpoint)) => {
                    format!("{}/{}", endpoint.trim_end_matches('/'), media_bucket_name)
                }
                (Backend::DynamoDb, None) => {
                    format!("https://{}.s3.{}.amazonaws.com", media_bucket_name, aws_region)
                }
            },
        };

        let timeout_ms: u64 = var_or("STORE_TIMEOUT_MS", "5000")
            .parse()
            .map_err(|e: std::num::ParseIntError| ConfigError::InvalidVar("STORE_TIMEOUT_MS".into(), e.to_string()))?;
        if timeout_ms == 0 {
            return Err(ConfigError::InvalidVar("STORE_TIMEOUT_MS".into(), "must be greater than zero".into()));
        }

        Ok(Config {
            bind_address,
            backend,
            stories_table_name,
            media_bucket_name,
            media_public_base_url,
            aws_region,
            localstack_endpoint,
            store_timeout: Duration::from_millis(timeout_ms),
        })
    }
}

fn non_blank(key: &str, value: String) -> Result<String, ConfigError> {
    if value.trim().is_empty() {
        return Err(ConfigError::MissingVar(key.to_string()));
    }
    Ok(value)
}
