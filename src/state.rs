//! Application state shared across components (web, scheduler).

use dashmap::DashMap;
use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter};
use serde::Serialize;
use sqlx::PgPool;
use std::net::IpAddr;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::{Duration, Instant};
use ts_rs::TS;

use crate::cache::{CacheConfig, FreshCache};
use crate::catalog::CatalogBacking;
use crate::config::Config;
use crate::profile::ProfileService;
use crate::rates::RateBacking;
use crate::web::auth::SessionCache;

/// Health status of a service.
#[derive(Debug, Clone, Serialize, PartialEq, TS)]
#[serde(rename_all = "lowercase")]
#[ts(export)]
pub enum ServiceStatus {
    Starting,
    Active,
    Error,
}

/// A timestamped status entry for a service.
#[derive(Debug, Clone)]
pub struct StatusEntry {
    pub status: ServiceStatus,
    #[allow(dead_code)]
    pub updated_at: Instant,
}

/// Thread-safe registry for services to self-report their health status.
#[derive(Debug, Clone, Default)]
pub struct ServiceStatusRegistry {
    inner: Arc<DashMap<String, StatusEntry>>,
}

impl ServiceStatusRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or updates the status for a named service.
    pub fn set(&self, name: &str, status: ServiceStatus) {
        self.inner.insert(
            name.to_owned(),
            StatusEntry {
                status,
                updated_at: Instant::now(),
            },
        );
    }

    /// Returns a snapshot of all service statuses.
    pub fn all(&self) -> Vec<(String, ServiceStatus)> {
        self.inner
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().status.clone()))
            .collect()
    }
}

/// Login attempts allowed per IP within [`LOGIN_WINDOW`].
const LOGIN_ATTEMPTS: u32 = 5;
const LOGIN_WINDOW: Duration = Duration::from_secs(15 * 60);

fn login_quota() -> Quota {
    // 5 per 15 minutes: one replenished every 3 minutes, burst of 5.
    Quota::with_period(LOGIN_WINDOW / LOGIN_ATTEMPTS)
        .expect("login quota period is non-zero")
        .allow_burst(NonZeroU32::new(LOGIN_ATTEMPTS).expect("login burst is non-zero"))
}

#[derive(Clone)]
pub struct AppState {
    pub db_pool: PgPool,
    pub service_statuses: ServiceStatusRegistry,
    pub session_cache: SessionCache,
    pub login_limiter: Arc<DefaultKeyedRateLimiter<IpAddr>>,
    /// Freshness stamp over the Postgres-mirrored card catalog.
    pub catalog: Arc<FreshCache<CatalogBacking>>,
    /// Cross-currency exchange rate, memory + Postgres tiers.
    pub rates: Arc<FreshCache<RateBacking>>,
    /// GitHub profile panel, memory-only with change detection.
    pub profile: Arc<ProfileService>,
    pub from_currency: String,
    pub to_currency: String,
    /// Owned-card prices older than this are re-resolved on read.
    pub price_max_age: chrono::Duration,
    pub session_ttl: chrono::Duration,
}

impl AppState {
    pub fn new(db_pool: PgPool, config: &Config, http: reqwest::Client) -> Self {
        let catalog = FreshCache::new(
            CatalogBacking::new(
                db_pool.clone(),
                http.clone(),
                config.catalog_api_url.clone(),
            ),
            CacheConfig {
                memory_ttl: Duration::from_secs(config.catalog_stamp_ttl_secs),
                persistent_ttl: Duration::from_secs(config.catalog_ttl_secs),
                fallback: None,
            },
        );

        let rates = FreshCache::new(
            RateBacking::new(
                db_pool.clone(),
                http.clone(),
                config.fixer_api_url.clone(),
                config.fixer_api_key.clone(),
                config.from_currency.clone(),
                config.to_currency.clone(),
            ),
            CacheConfig {
                memory_ttl: Duration::from_secs(config.rate_memory_ttl_secs),
                persistent_ttl: Duration::from_secs(config.rate_persist_ttl_secs),
                fallback: Some(config.fallback_rate),
            },
        );

        let profile = ProfileService::new(
            http,
            config.github_api_url.clone(),
            config.github_graphql_url.clone(),
            config.github_username.clone(),
            config.github_token.clone(),
            Duration::from_secs(config.profile_ttl_secs),
        );

        Self {
            session_cache: SessionCache::new(db_pool.clone()),
            db_pool,
            service_statuses: ServiceStatusRegistry::new(),
            login_limiter: Arc::new(RateLimiter::keyed(login_quota())),
            catalog: Arc::new(catalog),
            rates: Arc::new(rates),
            profile: Arc::new(profile),
            from_currency: config.from_currency.clone(),
            to_currency: config.to_currency.clone(),
            price_max_age: chrono::Duration::seconds(config.price_max_age_secs as i64),
            session_ttl: chrono::Duration::seconds(config.session_ttl_secs as i64),
        }
    }
}
