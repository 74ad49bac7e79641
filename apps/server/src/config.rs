//! Server configuration
//!
//! Values are layered, later sources winning:
//! 1. Built-in defaults
//! 2. `config.toml` (or `config.yaml`, `config.json`) in the working directory, if present
//! 3. Environment variables prefixed `SQLQ__`, nested with `__`,
//!    e.g. `SQLQ__DATABASE__URL` or `SQLQ__QUEUE__TIMEOUT_MS`
//!
//! A `.env` file is loaded into the environment first.

use std::net::SocketAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sqlq::QueueOptions;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub queue: QueueConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// `sqlite://...` or `postgres://...`
    pub url: String,
    pub max_connections: u32,
    /// Apply the embedded schema migrations at start-up.
    pub run_migrations: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://sqlq.db".to_string(),
            max_connections: 10,
            run_migrations: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct QueueConfig {
    pub name: String,
    pub max_receive: u32,
    pub timeout_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            max_receive: 3,
            timeout_ms: 5_000,
        }
    }
}

impl QueueConfig {
    pub fn options(&self) -> QueueOptions {
        QueueOptions::new(self.name.clone())
            .max_receive(self.max_receive)
            .timeout(Duration::from_millis(self.timeout_ms))
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default level for this crate and `sqlq`; `RUST_LOG` overrides it.
    pub level: String,
    pub json: bool,
    pub file_enabled: bool,
    pub file_directory: String,
    pub file_prefix: String,
    /// `daily`, `hourly`, `minutely` or `never`
    pub file_rotation: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            file_enabled: false,
            file_directory: "logs".to_string(),
            file_prefix: "sqlq-server".to_string(),
            file_rotation: "daily".to_string(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        // A missing .env file is fine.
        let _ = dotenvy::dotenv();

        config::Config::builder()
            .add_source(config::File::with_name("config").required(false))
            .add_source(
                config::Environment::with_prefix("SQLQ")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.database.url.trim().is_empty() {
            return Err("database.url cannot be empty".to_string());
        }

        if self.database.max_connections == 0 {
            return Err("database.max_connections must be greater than 0".to_string());
        }

        if self.queue.name.is_empty() {
            return Err("queue.name cannot be empty".to_string());
        }

        if self.queue.max_receive == 0 {
            return Err("queue.max_receive must be greater than 0".to_string());
        }

        if self.queue.timeout_ms == 0 {
            return Err("queue.timeout_ms must be greater than 0".to_string());
        }

        match self.logging.file_rotation.as_str() {
            "daily" | "hourly" | "minutely" | "never" => {}
            other => return Err(format!("logging.file_rotation \"{other}\" is not supported")),
        }

        Ok(())
    }

    pub fn socket_addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        format!("{}:{}", self.server.host, self.server.port).parse()
    }
}
