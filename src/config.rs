//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! Secrets (API token, sheets access token) are referenced by env-var name
//! in the config and resolved once at startup into `SecretString`s.

use anyhow::{bail, Context, Result};
use secrecy::SecretString;
use serde::Deserialize;
use std::fs;

use crate::pricing::FallbackPrice;
use crate::retry::RetryPolicy;
use crate::sheets::rows::RowSchema;

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub runner: RunnerConfig,
    pub sheet: SheetConfig,
    pub marketplace: MarketplaceConfig,
    #[serde(default)]
    pub crawler: CrawlerConfig,
    #[serde(default)]
    pub pricing: PricingConfig,
    #[serde(default)]
    pub retry: RetryConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RunnerConfig {
    pub name: String,
    pub worker_count: usize,
    /// Pause between the end of one cycle and the start of the next.
    pub cycle_pause_secs: u64,
    /// How long to wait for workers once the queue is drained.
    #[serde(default = "default_join_timeout_secs")]
    pub join_timeout_secs: u64,
    /// Flush dirty cells while a batch is running. 0 disables.
    #[serde(default)]
    pub flush_interval_secs: u64,
    /// Drop cached sheet contents at the start of every cycle.
    #[serde(default = "default_true")]
    pub refresh_each_cycle: bool,
    /// Run-flag values that select a row for repricing.
    #[serde(default = "default_run_flags")]
    pub run_flags: Vec<String>,
    /// Stop after this many cycles. Unset runs until Ctrl+C.
    #[serde(default)]
    pub max_cycles: Option<u64>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SheetConfig {
    pub main_sheet_id: String,
    pub main_sheet_name: String,
    /// Env var holding the OAuth access token for the Sheets API.
    pub token_env: String,
    #[serde(default = "default_sheets_url")]
    pub base_url: String,
    #[serde(default = "default_http_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct MarketplaceConfig {
    pub api_key_env: String,
    /// Env var holding our seller name on the marketplace.
    #[serde(default)]
    pub own_seller_env: Option<String>,
    #[serde(default = "default_marketplace_url")]
    pub base_url: String,
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default = "default_http_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CrawlerConfig {
    pub user_agent: String,
    pub timeout_secs: u64,
    /// Random pause after each page load, in milliseconds.
    pub jitter_min_ms: u64,
    pub jitter_max_ms: u64,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            user_agent: "Mozilla/5.0 (X11; Linux x86_64; rv:128.0) Gecko/20100101 Firefox/128.0"
                .into(),
            timeout_secs: 30,
            jitter_min_ms: 300,
            jitter_max_ms: 700,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct PricingConfig {
    #[serde(default)]
    pub fallback: FallbackPrice,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct RetryConfig {
    #[serde(default)]
    pub marketplace: RetryPolicy,
    #[serde(default)]
    pub sheets: RetryPolicy,
}

fn default_true() -> bool {
    true
}

fn default_join_timeout_secs() -> u64 {
    300
}

fn default_http_timeout_secs() -> u64 {
    30
}

fn default_run_flags() -> Vec<String> {
    vec!["1".to_string()]
}

fn default_sheets_url() -> String {
    crate::sheets::google::DEFAULT_BASE_URL.to_string()
}

fn default_marketplace_url() -> String {
    crate::marketplace::gameboost::DEFAULT_BASE_URL.to_string()
}

/// Credentials resolved from the environment at startup.
pub struct Secrets {
    pub sheets_token: SecretString,
    /// Absent only in dry-run mode.
    pub marketplace_key: Option<SecretString>,
    pub own_seller: Option<String>,
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        Self::parse(&contents).with_context(|| format!("Failed to load config file: {path}"))
    }

    /// Parse and validate configuration text.
    pub fn parse(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents).context("Invalid TOML")?;
        config.validate()?;
        Ok(config)
    }

    /// Sanity checks that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.runner.worker_count == 0 {
            bail!("runner.worker_count must be at least 1");
        }
        if self.runner.run_flags.iter().all(|f| f.trim().is_empty()) {
            bail!("runner.run_flags must contain a non-blank value");
        }
        if self.crawler.jitter_min_ms > self.crawler.jitter_max_ms {
            bail!("crawler.jitter_min_ms must not exceed crawler.jitter_max_ms");
        }
        for (name, policy) in [
            ("marketplace", &self.retry.marketplace),
            ("sheets", &self.retry.sheets),
        ] {
            if policy.base_delay_ms > policy.max_delay_ms {
                bail!("retry.{name}: base_delay_ms exceeds max_delay_ms");
            }
        }
        RowSchema::standard().map_err(|e| anyhow::anyhow!("{e}"))?;
        Ok(())
    }

    /// Resolve an environment variable name to its value.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))
    }

    /// Resolve every credential the run needs. Missing ones are fatal,
    /// except the marketplace key in dry-run mode.
    pub fn resolve_secrets(&self) -> Result<Secrets> {
        let sheets_token = SecretString::new(Self::resolve_env(&self.sheet.token_env)?);

        let marketplace_key = match Self::resolve_env(&self.marketplace.api_key_env) {
            Ok(key) => Some(SecretString::new(key)),
            Err(_) if self.marketplace.dry_run => None,
            Err(e) => return Err(e),
        };

        let own_seller = match &self.marketplace.own_seller_env {
            Some(var) => Some(Self::resolve_env(var)?),
            None => None,
        };

        Ok(Secrets {
            sheets_token,
            marketplace_key,
            own_seller,
        })
    }
}
