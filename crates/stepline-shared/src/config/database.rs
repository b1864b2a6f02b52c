//! Database connection configuration.

use serde::{Deserialize, Serialize};

use crate::errors::{EngineError, EngineResult};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Connection URL. Falls back to `DATABASE_URL` when unset.
    pub url: Option<String>,
    pub max_connections: u32,
    pub checkout_timeout_seconds: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 10,
            checkout_timeout_seconds: 10,
        }
    }
}

impl DatabaseConfig {
    pub fn resolve_url(&self) -> EngineResult<String> {
        if let Some(url) = &self.url {
            return Ok(url.clone());
        }
        std::env::var("DATABASE_URL").map_err(|_| {
            EngineError::Configuration(
                "no database url configured and DATABASE_URL is unset".to_string(),
            )
        })
    }
}
