use crate::app::App;
use crate::cli::{Args, ServiceName};
use crate::logging::setup_logging;
use clap::Parser;
use std::process::ExitCode;
use tracing::info;

mod app;
mod cache;
mod catalog;
mod cli;
mod config;
mod data;
mod json;
mod logging;
mod pricing;
mod profile;
mod rates;
mod scheduler;
mod services;
mod state;
mod web;

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    // Logging needs the config, and App::new logs; load config first so no
    // startup output is dropped.
    let config = config::load().expect("failed to load configuration");
    setup_logging(&config, args.tracing);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        commit = env!("GIT_COMMIT_HASH"),
        profile = if cfg!(debug_assertions) {
            "debug"
        } else {
            "release"
        },
        "binder starting"
    );

    let mut app = App::new(config)
        .await
        .expect("failed to initialize application");
    app.setup_services(&ServiceName::all())
        .expect("failed to set up services");
    app.start_services();
    app.run().await
}
