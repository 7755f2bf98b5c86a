//! Configuration management for the produce ledger
//!
//! Supports hierarchical configuration loading:
//! 1. Default values in code
//! 2. Configuration files (config/development.toml, config/production.toml)
//! 3. Environment variable overrides with LEDGER__ prefix

use config::{ConfigError, Environment, File};
use serde::Deserialize;

/// Main application configuration
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Current environment (development, production, test)
    pub environment: String,

    pub server: ServerConfig,

    pub database: DatabaseConfig,

    /// JWT authentication configuration
    pub jwt: JwtConfig,

    /// Account created when the users table is empty
    pub bootstrap: BootstrapConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    /// SQLite URL, e.g. `sqlite://ledger.db` or `sqlite::memory:`
    pub url: String,

    /// Maximum number of connections in the pool
    pub max_connections: u32,

    /// Minimum number of connections in the pool
    pub min_connections: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct JwtConfig {
    /// Secret key for signing JWT tokens
    pub secret: String,

    /// Access token expiration in seconds
    pub access_token_expiry: i64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BootstrapConfig {
    pub admin_username: String,
    pub admin_password: String,
}

impl Config {
    /// Load configuration from files and environment variables
    pub fn load() -> Result<Self, ConfigError> {
        let environment =
            std::env::var("LEDGER__ENVIRONMENT").unwrap_or_else(|_| "development".into());

        let config = config::Config::builder()
            .set_default("environment", environment.clone())?
            .set_default("server.port", 3000)?
            .set_default("server.host", "0.0.0.0")?
            .set_default("database.url", "sqlite://ledger.db")?
            .set_default("database.max_connections", 5)?
            .set_default("database.min_connections", 1)?
            .set_default("jwt.access_token_expiry", 28800)?
            .set_default("bootstrap.admin_username", "admin")?
            // Load environment-specific config file
            .add_source(File::with_name(&format!("config/{}", environment)).required(false))
            // Override with environment variables (LEDGER__ prefix)
            .add_source(
                Environment::with_prefix("LEDGER")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Self-contained configuration backed by an in-memory database
    pub fn in_memory(jwt_secret: &str) -> Self {
        Self {
            environment: "test".to_string(),
            server: ServerConfig::default(),
            database: DatabaseConfig {
                url: "sqlite::memory:".to_string(),
                max_connections: 1,
                min_connections: 1,
            },
            jwt: JwtConfig {
                secret: jwt_secret.to_string(),
                access_token_expiry: 3600,
            },
            bootstrap: BootstrapConfig {
                admin_username: "admin".to_string(),
                admin_password: "change-me-now".to_string(),
            },
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 3000,
            host: "0.0.0.0".to_string(),
        }
    }
}
