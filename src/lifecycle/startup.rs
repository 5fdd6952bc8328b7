//! Startup orchestration.
//!
//! # Order
//! ```text
//! config → logging → metrics → rate limiter + sweeper → gateway
//!        → config watcher → admin listener → main listener
//! ```
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Listeners start last (traffic only when ready)
//! - A rejected hot reload is logged and the running bundle stays

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::broadcast;

use crate::admin::{setup_admin_router, AdminState};
use crate::config::validation::validate_config;
use crate::config::watcher::ConfigWatcher;
use crate::config::{load_config, ConfigError, GateConfig, SecurityConfig};
use crate::gateway::Gateway;
use crate::http::{AckHandler, HttpServer, RequestHandler, UpstreamError, UpstreamHandler};
use crate::lifecycle::shutdown::Shutdown;
use crate::lifecycle::signals::spawn_signal_listener;
use crate::observability::{logging, metrics};
use crate::security::auth::AuthConfigError;
use crate::security::rate_limit::RateLimiter;
use crate::security::sweeper::Sweeper;

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("authentication: {0}")]
    Auth(#[from] AuthConfigError),

    #[error("upstream: {0}")]
    Upstream(#[from] UpstreamError),

    #[error("invalid address '{0}'")]
    Address(String),

    #[error("config watcher: {0}")]
    Watch(#[from] notify::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Default)]
pub struct StartupOptions {
    /// TOML file to load and watch. Defaults apply when absent.
    pub config_path: Option<PathBuf>,
    /// Start from the high-security preset when no file is given.
    pub high_security: bool,
}

/// Run the gate until a termination signal arrives.
pub async fn run(options: StartupOptions) -> Result<(), StartupError> {
    let config = match &options.config_path {
        Some(path) => load_config(path)?,
        None => {
            let mut config = GateConfig::default();
            if options.high_security {
                config.security = SecurityConfig::high_security();
            }
            validate_config(&config).map_err(ConfigError::Validation)?;
            config
        }
    };

    logging::init_logging(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "request-gate starting");
    tracing::info!(
        bind_address = %config.listener.bind_address,
        request_timeout_secs = config.timeouts.request_secs,
        rate_limit = config.security.rate_limit.enabled,
        auth_required = config.security.authentication.required,
        upstream = ?config.upstream.as_ref().map(|u| u.url.as_str()),
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        metrics::init_metrics(parse_addr(&config.observability.metrics_address)?);
    }

    let shutdown = Shutdown::new();
    spawn_signal_listener(shutdown.clone());

    let limiter = if config.sweep.enabled {
        let limiter = RateLimiter::default();
        let sweeper_interval = Duration::from_secs(config.sweep.interval_secs);
        let (limiter, sweeper) = if config.sweep.request_threshold > 0 {
            let (limiter, trigger) = limiter.with_sweep_trigger(config.sweep.request_threshold);
            let limiter = Arc::new(limiter);
            let sweeper = Sweeper::new(limiter.clone(), sweeper_interval).with_trigger(trigger);
            (limiter, sweeper)
        } else {
            let limiter = Arc::new(limiter);
            let sweeper = Sweeper::new(limiter.clone(), sweeper_interval);
            (limiter, sweeper)
        };
        tokio::spawn(sweeper.run(shutdown.subscribe()));
        limiter
    } else {
        Arc::new(RateLimiter::default())
    };

    let gateway = Arc::new(
        Gateway::builder(config.security.clone())
            .limiter(limiter)
            .build()?,
    );

    let admin_state = AdminState::new(gateway.clone(), &config.admin.api_key);

    // Keeps the notify watcher alive for the life of the process.
    let _watcher = match &options.config_path {
        Some(path) => {
            let (watcher, mut updates) = ConfigWatcher::new(path);
            let watcher = watcher.run()?;
            let gateway = gateway.clone();
            let reloads = admin_state.reloads.clone();
            let mut stop = shutdown.subscribe();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        Some(security) = updates.recv() => match gateway.reload(security) {
                            Ok(()) => {
                                reloads.fetch_add(1, Ordering::Relaxed);
                            }
                            Err(e) => tracing::error!(error = %e, "Reloaded bundle rejected"),
                        },
                        _ = stop.recv() => break,
                    }
                }
            });
            Some(watcher)
        }
        None => None,
    };

    if config.admin.enabled {
        let admin_listener = TcpListener::bind(&config.admin.bind_address).await?;
        tracing::info!(address = %admin_listener.local_addr()?, "Admin API listening");
        let router = setup_admin_router(admin_state);
        let stop = shutdown.subscribe();
        tokio::spawn(async move {
            if let Err(e) = axum::serve(admin_listener, router)
                .with_graceful_shutdown(wait(stop))
                .await
            {
                tracing::error!(error = %e, "Admin API failed");
            }
        });
    }

    let handler: Arc<dyn RequestHandler> = match &config.upstream {
        Some(upstream) => Arc::new(UpstreamHandler::new(upstream)?),
        None => Arc::new(AckHandler),
    };

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let server = HttpServer::new(config, gateway, handler);
    server.run(listener, shutdown.subscribe()).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}

fn parse_addr(addr: &str) -> Result<SocketAddr, StartupError> {
    addr.parse().map_err(|_| StartupError::Address(addr.to_string()))
}

async fn wait(mut stop: broadcast::Receiver<()>) {
    let _ = stop.recv().await;
}
