//! Request, response and configuration types for the variant cache server

use crate::error::{Result, ServerError};
use serde::{Deserialize, Serialize};
use variant_cache::{CacheConfig, CacheStats, EngineState};

/// Configuration for the server process
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub cache: CacheConfig,
}

impl ServerConfig {
    /// Read `PORT` plus the cache's own environment variables
    pub fn from_env() -> Result<Self> {
        let port = match std::env::var("PORT") {
            Ok(value) => value
                .parse::<u16>()
                .map_err(|_| ServerError::Config(format!("invalid PORT: {}", value)))?,
            Err(_) => 3001,
        };

        Ok(Self {
            port,
            cache: CacheConfig::from_env()?,
        })
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 3001,
            cache: CacheConfig::default(),
        }
    }
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub uptime_secs: u64,
    pub engine_state: EngineState,
    pub cache: CacheStats,
}

#[derive(Debug, Deserialize)]
pub struct SourceQuery {
    pub source: String,
}

/// Exact variant address
#[derive(Debug, Deserialize)]
pub struct VariantQuery {
    pub source: String,
    pub width: u32,
    pub height: u32,
    pub format: String,
}

/// Approximate request; a missing side means unspecified
#[derive(Debug, Deserialize)]
pub struct MatchQuery {
    pub source: String,
    #[serde(default)]
    pub x: u32,
    #[serde(default)]
    pub y: u32,
    pub format: String,
}
