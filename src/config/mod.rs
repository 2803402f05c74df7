//! Typed configuration from environment variables.
//!
//! Loads once at startup, fails fast if required vars are missing or
//! malformed. The database URL is wrapped in secrecy::SecretString so it
//! never ends up in logs.

pub mod secrets;

use std::str::FromStr;
use std::time::Duration;

use crate::engine::ProcessorConfig;
use crate::error::{Error, Result};
use secrecy::SecretString;

#[derive(Debug)]
pub struct Config {
    pub database_url: SecretString,
    /// Worker pool size.
    pub workers: usize,
    /// Idle poll interval.
    pub poll_interval: Duration,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self> {
        let defaults = ProcessorConfig::default();
        Ok(Self {
            database_url: SecretString::from(required_var("DATABASE_URL")?),
            workers: optional_var("DEFERRAL_WORKERS")?.unwrap_or(defaults.workers),
            poll_interval: optional_var("DEFERRAL_POLL_INTERVAL_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.poll_interval),
            otel_endpoint: std::env::var("OTEL_ENDPOINT").ok(),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        })
    }

    /// Processor settings derived from this configuration.
    pub fn processor_config(&self) -> ProcessorConfig {
        ProcessorConfig {
            workers: self.workers,
            poll_interval: self.poll_interval,
            ..ProcessorConfig::default()
        }
    }
}

fn required_var(name: &str) -> Result<String> {
    std::env::var(name)
        .map_err(|_| Error::Config(format!("required environment variable {name} is not set")))
}

fn optional_var<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| Error::Config(format!("invalid value for {name}: {e}"))),
        Err(_) => Ok(None),
    }
}
