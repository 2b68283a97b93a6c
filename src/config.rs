//! Application configuration, loaded from environment variables via figment.
//!
//! Every field has a default except `database_url`; TTLs and intervals are
//! expressed in seconds so they can be overridden without code changes.

use anyhow::{Context, Result};
use figment::Figment;
use figment::providers::Env;
use serde::Deserialize;

/// Read the configuration from the process environment.
pub fn load() -> Result<Config> {
    Figment::new()
        .merge(Env::raw())
        .extract()
        .context("failed to load configuration from environment")
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database_url: String,

    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Exact CORS origin for the frontend; unset means permissive (local dev).
    #[serde(default)]
    pub frontend_origin: Option<String>,
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout: u64,

    // Card catalog mirror (YGOPRODeck bulk database).
    #[serde(default = "default_catalog_api_url")]
    pub catalog_api_url: String,
    /// How long the persisted snapshot stays fresh (7 days).
    #[serde(default = "default_catalog_ttl")]
    pub catalog_ttl_secs: u64,
    /// How long the in-memory freshness stamp is trusted before re-checking
    /// the database (1 hour).
    #[serde(default = "default_catalog_stamp_ttl")]
    pub catalog_stamp_ttl_secs: u64,
    #[serde(default = "default_catalog_refresh_interval")]
    pub catalog_refresh_interval_secs: u64,

    // Currency exchange rate (fixer.io).
    #[serde(default = "default_fixer_api_url")]
    pub fixer_api_url: String,
    #[serde(default)]
    pub fixer_api_key: String,
    #[serde(default = "default_rate_memory_ttl")]
    pub rate_memory_ttl_secs: u64,
    #[serde(default = "default_rate_persist_ttl")]
    pub rate_persist_ttl_secs: u64,
    /// Last-resort constant when upstream fails and nothing is persisted.
    #[serde(default = "default_fallback_rate")]
    pub fallback_rate: f64,
    #[serde(default = "default_from_currency")]
    pub from_currency: String,
    #[serde(default = "default_to_currency")]
    pub to_currency: String,

    // GitHub profile panel.
    #[serde(default = "default_github_api_url")]
    pub github_api_url: String,
    #[serde(default = "default_github_graphql_url")]
    pub github_graphql_url: String,
    #[serde(default = "default_github_username")]
    pub github_username: String,
    #[serde(default)]
    pub github_token: Option<String>,
    #[serde(default = "default_profile_ttl")]
    pub profile_ttl_secs: u64,
    #[serde(default = "default_profile_poll")]
    pub profile_poll_secs: u64,

    // Pricing.
    #[serde(default = "default_price_max_age")]
    pub price_max_age_secs: u64,
    #[serde(default = "default_price_refresh_interval")]
    pub price_refresh_interval_secs: u64,

    // Auth.
    #[serde(default = "default_session_ttl")]
    pub session_ttl_secs: u64,
    #[serde(default)]
    pub admin_username: Option<String>,
    #[serde(default)]
    pub admin_password: Option<String>,
}

fn default_port() -> u16 {
    5000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_shutdown_timeout() -> u64 {
    30
}

fn default_catalog_api_url() -> String {
    "https://db.ygoprodeck.com/api/v7/cardinfo.php".to_string()
}

fn default_catalog_ttl() -> u64 {
    7 * 24 * 3600
}

fn default_catalog_stamp_ttl() -> u64 {
    3600
}

fn default_catalog_refresh_interval() -> u64 {
    6 * 3600
}

fn default_fixer_api_url() -> String {
    "https://data.fixer.io/api/latest".to_string()
}

fn default_rate_memory_ttl() -> u64 {
    3600
}

fn default_rate_persist_ttl() -> u64 {
    24 * 3600
}

fn default_fallback_rate() -> f64 {
    1.5
}

fn default_from_currency() -> String {
    "USD".to_string()
}

fn default_to_currency() -> String {
    "AUD".to_string()
}

fn default_github_api_url() -> String {
    "https://api.github.com".to_string()
}

fn default_github_graphql_url() -> String {
    "https://api.github.com/graphql".to_string()
}

fn default_github_username() -> String {
    "octocat".to_string()
}

fn default_profile_ttl() -> u64 {
    3600
}

fn default_profile_poll() -> u64 {
    50 * 60
}

fn default_price_max_age() -> u64 {
    24 * 3600
}

fn default_price_refresh_interval() -> u64 {
    24 * 3600
}

fn default_session_ttl() -> u64 {
    24 * 3600
}
