//! `RecipeChat` development backend.
//!
//! Serves the contact roster, room negotiation, message history and the
//! realtime chat channel from memory.
//!
//! # Usage
//!
//! ```bash
//! # Run on the default address 127.0.0.1:8000 with two users
//! cargo run --bin recipechat-backend -- --user 1:ana --user 2:ben
//!
//! # Or configure the bind address via environment variable
//! RECIPECHAT_BACKEND_ADDR=0.0.0.0:8000 cargo run --bin recipechat-backend
//! ```

use std::sync::Arc;

use clap::Parser;
use recipechat_backend::config::{BackendCliArgs, BackendConfig};
use recipechat_backend::server::{self, BackendState};
use recipechat_backend::store::BackendStore;
use recipechat_proto::credential::dev_token;

#[tokio::main]
async fn main() {
    let cli = BackendCliArgs::parse();

    // Load config from CLI args + config file + env vars + defaults.
    let config = match BackendConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            std::process::exit(1);
        }
    };

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    tracing::info!(
        addr = %config.bind_addr,
        users = config.users.len(),
        "starting recipechat backend"
    );

    // Signatures are not checked, so any token naming a seeded user works.
    for user in &config.users {
        tracing::info!(
            user = %user.id,
            token = dev_token(user.id.as_str()).expose(),
            "development token"
        );
    }

    let state = Arc::new(BackendState::new(BackendStore::new(config.users)));

    match server::start_server_with_state(&config.bind_addr, state).await {
        Ok((bound_addr, handle)) => {
            tracing::info!(addr = %bound_addr, "backend listening");
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "backend server task failed");
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to start backend");
            std::process::exit(1);
        }
    }
}
