use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use job_scraper::config::validate_companies;
use job_scraper::{CompanyConfig, ConfigError};
use persistence::Retention;
use serde::Deserialize;

pub const DEFAULT_DATABASE_URL: &str = "sqlite://role-radar.db";

fn default_concurrency() -> usize {
    3
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_politeness_delay_ms() -> u64 {
    50
}

/// The configuration file as written. Company entries stay untyped so that a
/// single malformed entry does not reject the whole file.
#[derive(Deserialize)]
struct RawSettings {
    database_url: Option<String>,
    #[serde(default)]
    retention: Retention,
    #[serde(default = "default_concurrency")]
    concurrency: usize,
    #[serde(default = "default_request_timeout_secs")]
    request_timeout_secs: u64,
    #[serde(default = "default_politeness_delay_ms")]
    politeness_delay_ms: u64,
    #[serde(default, rename = "company")]
    companies: Vec<toml::Value>,
}

#[derive(Debug)]
pub struct Settings {
    pub database_url: String,
    pub retention: Retention,
    pub concurrency: usize,
    pub request_timeout: Duration,
    pub politeness_delay: Duration,
    /// valid company entries, in file order
    pub companies: Vec<CompanyConfig>,
    /// entries skipped at load time
    pub rejected: Vec<ConfigError>,
}

impl Settings {
    /// Reads the configuration at `path`. The database url is taken from
    /// `database_override`, then `DATABASE_URL`, then the file.
    pub fn load(path: &Path, database_override: Option<String>) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let database_override = database_override.or_else(|| std::env::var("DATABASE_URL").ok());
        Self::from_toml(&text, database_override)
            .with_context(|| format!("Failed to load config file {}", path.display()))
    }

    pub fn from_toml(text: &str, database_override: Option<String>) -> anyhow::Result<Self> {
        let raw: RawSettings = toml::from_str(text).context("Failed to parse TOML")?;

        let mut rejected = Vec::new();
        let mut parsed = Vec::with_capacity(raw.companies.len());
        for (index, value) in raw.companies.into_iter().enumerate() {
            match value.try_into::<CompanyConfig>() {
                Ok(company) => parsed.push((index, company)),
                Err(e) => rejected.push(ConfigError::Malformed {
                    index,
                    reason: e.to_string(),
                }),
            }
        }
        let (companies, invalid) = validate_companies(parsed);
        rejected.extend(invalid);
        for error in &rejected {
            log::warn!("skipping company entry: {}", error);
        }

        if raw.concurrency == 0 {
            log::warn!("concurrency must be at least 1, using 1");
        }

        Ok(Self {
            database_url: database_override
                .or(raw.database_url)
                .unwrap_or_else(|| DEFAULT_DATABASE_URL.to_owned()),
            retention: raw.retention,
            concurrency: raw.concurrency.max(1),
            request_timeout: Duration::from_secs(raw.request_timeout_secs),
            politeness_delay: Duration::from_millis(raw.politeness_delay_ms),
            companies,
            rejected,
        })
    }
}
