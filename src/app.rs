//! Application assembly: database, shared state, and service registration.

use crate::cli::ServiceName;
use crate::config::Config;
use crate::scheduler::SchedulerService;
use crate::services::Service;
use crate::services::manager::ServiceManager;
use crate::services::signals::handle_shutdown_signals;
use crate::services::web::WebService;
use crate::state::AppState;
use anyhow::{Context, Result, bail};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::{ConnectOptions, PgPool};
use std::process::ExitCode;
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, warn};

pub struct App {
    config: Config,
    app_state: AppState,
    service_manager: ServiceManager,
}

/// Connect to Postgres and bring the schema up to date.
async fn connect_db(config: &Config) -> Result<PgPool> {
    let options = PgConnectOptions::from_str(&config.database_url)
        .context("invalid DATABASE_URL")?
        .log_statements(tracing::log::LevelFilter::Debug)
        .log_slow_statements(tracing::log::LevelFilter::Warn, Duration::from_secs(1));

    let pool = PgPoolOptions::new()
        .min_connections(0)
        .max_connections(4)
        .acquire_timeout(Duration::from_secs(4))
        .idle_timeout(Duration::from_secs(2 * 60))
        .max_lifetime(Duration::from_secs(30 * 60))
        .connect_with(options)
        .await
        .context("failed to connect to Postgres")?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("failed to run migrations")?;

    Ok(pool)
}

impl App {
    pub async fn new(config: Config) -> Result<Self> {
        let db_pool = connect_db(&config).await?;
        info!(max_connections = 4, "database ready");

        let http = reqwest::Client::builder()
            .user_agent(concat!("binder/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(120))
            .build()
            .context("failed to build HTTP client")?;

        let app_state = AppState::new(db_pool.clone(), &config, http);

        if let (Some(username), Some(password)) = (&config.admin_username, &config.admin_password) {
            let user = crate::data::users::ensure_seed_admin(&db_pool, username, password)
                .await
                .context("failed to seed admin user")?;
            info!(username = %user.username, "seed admin ensured");
        }

        match crate::data::sessions::purge_expired(&db_pool).await {
            Ok(0) => {}
            Ok(n) => info!(purged = n, "purged expired sessions on startup"),
            Err(e) => warn!(error = ?e, "session purge failed on startup"),
        }

        // Warm the catalog mirror in the background. The scheduler retries
        // later if this fails, and an empty mirror is still servable.
        let catalog = app_state.catalog.clone();
        tokio::spawn(async move {
            match catalog.get().await {
                Ok(stamp) => info!(cards = stamp.cards, "catalog mirror warmed"),
                Err(e) => warn!(error = %e, "catalog warm-up failed"),
            }
        });

        Ok(App {
            config,
            app_state,
            service_manager: ServiceManager::new(),
        })
    }

    pub fn setup_services(&mut self, services: &[ServiceName]) -> Result<()> {
        for service in services {
            let boxed: Box<dyn Service> = match service {
                ServiceName::Web => Box::new(WebService::new(
                    self.config.port,
                    self.app_state.clone(),
                    self.config.frontend_origin.clone(),
                )),
                ServiceName::Scheduler => {
                    Box::new(SchedulerService::new(self.app_state.clone(), &self.config))
                }
            };
            self.service_manager
                .register_service(service.as_str(), boxed);
        }

        if !self.service_manager.has_services() {
            bail!("no services enabled");
        }
        Ok(())
    }

    pub fn start_services(&mut self) {
        self.service_manager.spawn_all();
    }

    pub async fn run(self) -> ExitCode {
        handle_shutdown_signals(self.service_manager, self.config.shutdown_timeout).await
    }
}
