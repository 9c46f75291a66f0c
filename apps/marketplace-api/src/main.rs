//! Marketplace API server
//!
//! Loads `.env`, parses configuration, connects storage and serves the
//! authentication routes.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use identity_core::{
    GovernorRateLimiter, IdentityService, IdentityStore, MemoryStore, PgRateLimiter, PgStore,
    RateLimiter,
};
use tracing::{info, warn, Level};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use marketplace_api::config::{Args, LogFormat};
use marketplace_api::mailer::LogMailer;
use marketplace_api::provider::HttpProviderVerifier;
use marketplace_api::{build_router, cors_layer, AppState, RateLimits};

const PURGE_INTERVAL: Duration = Duration::from_secs(300);

fn init_tracing(args: &Args) -> Result<()> {
    let mut filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("marketplace_api=info,identity_core=info,audit=info,tower_http=debug")
    });
    if args.verbose {
        filter = filter.add_directive(Level::DEBUG.into());
    }

    let registry = tracing_subscriber::registry().with(filter);
    match args.log_format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).try_init()?,
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).try_init()?,
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();
    let args = Args::parse();
    init_tracing(&args)?;

    let auth_config = args.auth_config().context("invalid authentication configuration")?;
    info!(config = ?auth_config, "Starting marketplace API");

    let window = args.rate_limit_window();
    let (store, limits): (Arc<dyn IdentityStore>, RateLimits) = if args.in_memory {
        warn!("Running with in-memory storage; all state is lost on exit");
        let limits = RateLimits {
            auth: Arc::new(GovernorRateLimiter::new(args.rate_limit_max_auth, window)?),
            tight: Arc::new(GovernorRateLimiter::new(args.rate_limit_max_tight, window)?),
        };
        (Arc::new(MemoryStore::new()), limits)
    } else {
        let Some(url) = args.database_url.as_deref() else {
            bail!("DATABASE_URL is required unless --in-memory is set");
        };
        let store = PgStore::connect(url, args.max_connections)
            .await
            .context("failed to connect to PostgreSQL")?;
        let pool = store.pool().clone();
        let limits = RateLimits {
            auth: Arc::new(PgRateLimiter::new(pool.clone(), args.rate_limit_max_auth, window)?),
            tight: Arc::new(PgRateLimiter::new(pool, args.rate_limit_max_tight, window)?),
        };
        (Arc::new(store), limits)
    };

    spawn_purge(limits.clone());

    let verifier = HttpProviderVerifier::new(
        args.google_client_ids.clone(),
        args.facebook_app_id.clone(),
        args.facebook_app_secret.clone(),
    )?;

    let state = Arc::new(AppState {
        service: IdentityService::new(store, auth_config),
        verifier: Arc::new(verifier),
        mailer: Arc::new(LogMailer),
        limits,
        mailer_disabled: args.mailer_disabled,
        app_base_url: args.app_base_url.clone(),
        trust_proxy: args.trust_proxy,
    });
    if state.trust_proxy {
        info!("Client addresses taken from X-Forwarded-For");
    }
    if state.mailer_disabled {
        warn!("Mail delivery disabled; links are returned in responses");
    }

    let app = build_router(state, cors_layer(&args.cors_origins()));

    let addr: SocketAddr = format!("{}:{}", args.host, args.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Server listening on http://{}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    Ok(())
}

/// Periodically drop expired rate-limit state
fn spawn_purge(limits: RateLimits) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(PURGE_INTERVAL);
        loop {
            interval.tick().await;
            for limiter in [&limits.auth, &limits.tight] {
                if let Err(e) = limiter.purge().await {
                    warn!(error = %e, "Rate limit purge failed");
                }
            }
        }
    });
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutting down");
}
