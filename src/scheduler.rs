//! Periodic background jobs: catalog snapshot refresh, owned-card price
//! refresh, profile polling, and session purging.
//!
//! The loop wakes every 60 seconds and decides which jobs are due. Job
//! timestamps are persisted in `app_kv` so restarts respect the remaining
//! cooldown instead of redoing recent work.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, trace, warn};

use crate::config::Config;
use crate::data::{cards, catalog, kv, sessions};
use crate::pricing::resolve_price;
use crate::services::Service;
use crate::state::{AppState, ServiceStatus};

/// How often expired sessions are deleted.
const SESSION_PURGE_INTERVAL: Duration = Duration::from_secs(3600);

// app_kv keys for persisting scheduler timestamps across restarts.
pub const KV_CATALOG_REFRESH: &str = "scheduler.catalog_refresh";
pub const KV_PRICE_REFRESH: &str = "scheduler.price_refresh";
pub const KV_PROFILE_POLL: &str = "scheduler.profile_poll";
pub const KV_SESSION_PURGE: &str = "scheduler.session_purge";

/// Convert a persisted UTC timestamp to an `Instant`, preserving remaining cooldown.
///
/// If the persisted time is older than `interval`, returns an `Instant` that
/// triggers immediate execution. If it's recent, the returned `Instant` reflects
/// how much time has actually elapsed so the scheduler respects the remaining cooldown.
fn persisted_to_instant(persisted: Option<DateTime<Utc>>, interval: Duration) -> Instant {
    match persisted {
        None => Instant::now() - interval,
        Some(ts) => {
            let elapsed = (Utc::now() - ts).to_std().unwrap_or(interval);
            if elapsed >= interval {
                Instant::now() - interval
            } else {
                Instant::now() - elapsed
            }
        }
    }
}

pub struct Scheduler {
    state: AppState,
    catalog_interval: Duration,
    price_interval: Duration,
    profile_interval: Duration,
}

impl Scheduler {
    pub fn new(state: AppState, config: &Config) -> Self {
        Self {
            state,
            catalog_interval: Duration::from_secs(config.catalog_refresh_interval_secs),
            price_interval: Duration::from_secs(config.price_refresh_interval_secs),
            profile_interval: Duration::from_secs(config.profile_poll_secs),
        }
    }

    /// Main loop. Wakes every 60 seconds; each cycle's due jobs run in one
    /// spawned task that shutdown can cancel.
    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) {
        info!("Scheduler service started");

        let work_interval = Duration::from_secs(60);
        let mut next_run = time::Instant::now();
        let mut current_work: Option<(tokio::task::JoinHandle<()>, CancellationToken)> = None;

        let pool = &self.state.db_pool;
        let persisted_catalog = kv::get_timestamp(pool, KV_CATALOG_REFRESH)
            .await
            .unwrap_or(None);
        let persisted_price = kv::get_timestamp(pool, KV_PRICE_REFRESH).await.unwrap_or(None);
        let persisted_profile = kv::get_timestamp(pool, KV_PROFILE_POLL).await.unwrap_or(None);
        let persisted_purge = kv::get_timestamp(pool, KV_SESSION_PURGE)
            .await
            .unwrap_or(None);

        if persisted_catalog.is_some() || persisted_price.is_some() || persisted_profile.is_some() {
            info!(
                last_catalog_refresh = ?persisted_catalog,
                last_price_refresh = ?persisted_price,
                last_profile_poll = ?persisted_profile,
                "Loaded persisted scheduler timestamps"
            );
        }

        let mut last_catalog = persisted_to_instant(persisted_catalog, self.catalog_interval);
        let mut last_price = persisted_to_instant(persisted_price, self.price_interval);
        let mut last_profile = persisted_to_instant(persisted_profile, self.profile_interval);
        let mut last_purge = persisted_to_instant(persisted_purge, SESSION_PURGE_INTERVAL);

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("Scheduler received shutdown signal");
                    if let Some((handle, cancel_token)) = current_work.take() {
                        cancel_token.cancel();
                        if time::timeout(Duration::from_secs(5), handle).await.is_err() {
                            warn!("Scheduling work did not stop in time, abandoning");
                        }
                    }
                    break;
                }
                _ = time::sleep_until(next_run) => {
                    // Skip this cycle if the previous one is still running.
                    if let Some((ref handle, _)) = current_work
                        && !handle.is_finished()
                    {
                        trace!("Previous scheduling cycle still running, skipping");
                        next_run = time::Instant::now() + work_interval;
                        continue;
                    }

                    let due_catalog = last_catalog.elapsed() >= self.catalog_interval;
                    let due_price = last_price.elapsed() >= self.price_interval;
                    let due_profile = last_profile.elapsed() >= self.profile_interval;
                    let due_purge = last_purge.elapsed() >= SESSION_PURGE_INTERVAL;

                    if due_catalog {
                        last_catalog = Instant::now();
                    }
                    if due_price {
                        last_price = Instant::now();
                    }
                    if due_profile {
                        last_profile = Instant::now();
                    }
                    if due_purge {
                        last_purge = Instant::now();
                    }

                    let cancel_token = CancellationToken::new();
                    let work_handle = tokio::spawn({
                        let state = self.state.clone();
                        let cancel_token = cancel_token.clone();
                        let price_max_age = self.state.price_max_age;

                        async move {
                            tokio::select! {
                                _ = async {
                                    if due_catalog {
                                        match state.catalog.get().await {
                                            Ok(stamp) => {
                                                info!(cards = stamp.cards, "Catalog freshness verified");
                                                if let Err(e) = kv::set_timestamp(&state.db_pool, KV_CATALOG_REFRESH, Utc::now()).await {
                                                    warn!(error = ?e, "Failed to persist catalog refresh timestamp");
                                                }
                                            }
                                            Err(e) => error!(error = %e, "Catalog refresh failed"),
                                        }
                                    }

                                    if due_price {
                                        match refresh_owned_prices(&state, price_max_age).await {
                                            Ok((refreshed, skipped)) => {
                                                info!(refreshed, skipped, "Owned-card price refresh complete");
                                                if let Err(e) = kv::set_timestamp(&state.db_pool, KV_PRICE_REFRESH, Utc::now()).await {
                                                    warn!(error = ?e, "Failed to persist price refresh timestamp");
                                                }
                                            }
                                            Err(e) => error!(error = ?e, "Owned-card price refresh failed"),
                                        }
                                    }

                                    if due_profile {
                                        // Invalidate first so the poll genuinely
                                        // re-contacts upstream and the change
                                        // detector sees fresh content.
                                        state.profile.invalidate();
                                        match state.profile.get().await {
                                            Ok(_) => {
                                                if let Err(e) = kv::set_timestamp(&state.db_pool, KV_PROFILE_POLL, Utc::now()).await {
                                                    warn!(error = ?e, "Failed to persist profile poll timestamp");
                                                }
                                            }
                                            Err(e) => warn!(error = %e, "Profile poll failed"),
                                        }
                                    }

                                    if due_purge {
                                        match sessions::purge_expired(&state.db_pool).await {
                                            Ok(0) => {}
                                            Ok(n) => info!(purged = n, "Expired sessions purged"),
                                            Err(e) => warn!(error = ?e, "Session purge failed"),
                                        }
                                        if let Err(e) = kv::set_timestamp(&state.db_pool, KV_SESSION_PURGE, Utc::now()).await {
                                            warn!(error = ?e, "Failed to persist session purge timestamp");
                                        }
                                    }
                                } => {}
                                _ = cancel_token.cancelled() => {
                                    trace!("Scheduling work cancelled");
                                }
                            }
                        }
                    });

                    current_work = Some((work_handle, cancel_token));
                    next_run = time::Instant::now() + work_interval;
                }
            }
        }
    }
}

/// Re-resolve prices for rows whose `price_updated_at` is older than
/// `max_age`. Returns (refreshed, skipped) counts; rows without a resolvable
/// price keep their stored value.
async fn refresh_owned_prices(
    state: &AppState,
    max_age: chrono::Duration,
) -> Result<(usize, usize)> {
    let cutoff = Utc::now() - max_age;
    let stale = cards::list_stale_prices(&state.db_pool, cutoff).await?;
    if stale.is_empty() {
        return Ok((0, 0));
    }

    let mut ids: Vec<i64> = stale.iter().map(|c| c.catalog_id).collect();
    ids.sort_unstable();
    ids.dedup();
    let infos = catalog::get_by_ids(&state.db_pool, &ids).await?;

    let mut refreshed = 0;
    let mut skipped = 0;
    for row in &stale {
        let price = infos
            .iter()
            .find(|info| info.id == row.catalog_id)
            .and_then(|info| resolve_price(info, &row.set_code));
        match price {
            Some(price) => {
                cards::update_price(&state.db_pool, row.id, price).await?;
                refreshed += 1;
            }
            None => skipped += 1,
        }
    }
    Ok((refreshed, skipped))
}

pub struct SchedulerService {
    scheduler: Scheduler,
}

impl SchedulerService {
    pub fn new(state: AppState, config: &Config) -> Self {
        Self {
            scheduler: Scheduler::new(state, config),
        }
    }
}

#[async_trait]
impl Service for SchedulerService {
    async fn run(&mut self, shutdown_rx: broadcast::Receiver<()>) -> anyhow::Result<()> {
        let statuses = self.scheduler.state.service_statuses.clone();
        statuses.set("scheduler", ServiceStatus::Active);
        self.scheduler.run(shutdown_rx).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_timestamp_triggers_immediately() {
        let interval = Duration::from_secs(3600);
        let instant = persisted_to_instant(None, interval);
        assert!(instant.elapsed() >= interval);
    }

    #[test]
    fn stale_timestamp_triggers_immediately() {
        let interval = Duration::from_secs(3600);
        let persisted = Utc::now() - chrono::Duration::hours(2);
        let instant = persisted_to_instant(Some(persisted), interval);
        assert!(instant.elapsed() >= interval);
    }

    #[test]
    fn recent_timestamp_preserves_cooldown() {
        let interval = Duration::from_secs(3600);
        let persisted = Utc::now() - chrono::Duration::minutes(10);
        let instant = persisted_to_instant(Some(persisted), interval);
        let elapsed = instant.elapsed();
        assert!(elapsed < interval);
        assert!(elapsed >= Duration::from_secs(9 * 60));
    }

    #[test]
    fn future_timestamp_falls_back_to_immediate() {
        // Clock skew: a persisted time in the future cannot convert to a
        // std Duration, so the job runs immediately.
        let interval = Duration::from_secs(3600);
        let persisted = Utc::now() + chrono::Duration::minutes(5);
        let instant = persisted_to_instant(Some(persisted), interval);
        assert!(instant.elapsed() >= interval);
    }
}
