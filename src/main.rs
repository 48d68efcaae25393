#![forbid(unsafe_code)]
#![warn(clippy::pedantic)]
// easier to use when using the functions as callback of foreign functions
#![allow(clippy::needless_pass_by_value)]

use std::net::SocketAddr;

use anyhow::Result;
use axum::Extension;
use axum::Router;
use axum_client_ip::ClientIpSource;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing_subscriber::prelude::*;

use crate::api::JwtKeys;
use crate::api::TopicCache;
use crate::api::router;
use crate::config::Config;
use crate::config::DatabaseConfig;
use crate::config::Settings;
use crate::notifications::NotificationFeed;
use crate::session::SessionWatcher;
use crate::storage::Memory;
use crate::storage::Postgres;
use crate::storage::Storage;
use crate::users::ensure_initial_users;
use crate::utils::env_var_or_else;

mod access;
mod api;
mod bulk_upload;
mod config;
mod content;
mod events;
mod graceful_shutdown;
mod notifications;
mod password;
mod session;
mod storage;
#[cfg(test)]
mod tests;
mod topics;
mod users;
mod utils;

const DEFAULT_RUST_LOG: &str = "clubportal=debug,tower_http=debug";
const DEFAULT_ADDRESS: &str = "0.0.0.0:6000";

#[tokio::main]
async fn main() -> Result<()> {
    setup_environment();
    setup_tracing();

    let config = Config::from_env()?;
    let shutdown = CancellationToken::new();

    let app = setup_app(config, shutdown.clone()).await?;

    let address = setup_address()?;
    let listener = TcpListener::bind(address).await?;
    tracing::info!("Listening on {}", address);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(graceful_shutdown::handler(shutdown))
    .await?;

    Ok(())
}

/// Create and setup the app with its dependencies
///
/// The session watcher runs until `shutdown` is cancelled
///
/// # Errors
///
/// Will return `Err` if any of its dependencies fail to load:
/// - Database connection
/// - Initial user setup
pub async fn setup_app(config: Config, shutdown: CancellationToken) -> Result<Router> {
    let Config { database, settings } = config;

    match database {
        DatabaseConfig::Memory => build_app(Memory::new(), settings, shutdown).await,
        DatabaseConfig::Url(url) => {
            build_app(Postgres::connect(&url).await?, settings, shutdown).await
        }
        DatabaseConfig::ExistingConnection(pool) => {
            build_app(Postgres::new_with_pool(pool).await?, settings, shutdown).await
        }
    }
}

async fn build_app<S: Storage>(
    storage: S,
    settings: Settings,
    shutdown: CancellationToken,
) -> Result<Router> {
    ensure_initial_users(&storage, &settings).await?;

    SessionWatcher::new(storage.clone(), &settings).spawn(shutdown);

    Ok(create_router(storage, settings))
}

/// Create the router for the portal
fn create_router<S: Storage>(storage: S, settings: Settings) -> Router {
    let jwt_keys = JwtKeys::new(settings.jwt_secret.as_bytes());

    Router::new()
        .nest("/api", router::<S>())
        .fallback(api::not_found)
        .layer(TraceLayer::new_for_http())
        .layer(ClientIpSource::ConnectInfo.into_extension())
        .layer(Extension(storage))
        .layer(Extension(jwt_keys))
        .layer(Extension(settings))
        .layer(Extension(NotificationFeed::new()))
        .layer(Extension(TopicCache::new()))
}

fn setup_environment() {
    dotenvy::dotenv().ok();
}

fn setup_tracing() {
    use tracing_subscriber::EnvFilter;
    use tracing_subscriber::fmt;
    use tracing_subscriber::registry;

    registry()
        .with(EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| DEFAULT_RUST_LOG.into()),
        ))
        .with(fmt::layer())
        .init();
}

fn setup_address() -> Result<SocketAddr> {
    let mut address =
        env_var_or_else("ADDRESS", || String::from(DEFAULT_ADDRESS)).parse::<SocketAddr>()?;

    // optional override of just the port
    if let Ok(port) = std::env::var("PORT") {
        // only check non-empty strings
        if !port.is_empty() {
            let port = port.parse::<u16>()?;

            address.set_port(port);
        }
    }

    Ok(address)
}
