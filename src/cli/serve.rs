use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use handoff_agent_core::{ActionOracle, BrowserDriver, JobManager};
use tokio::net::TcpListener;
use tokio::time::interval;
use tracing::{debug, error, info, warn};

use super::context::CliContext;
use crate::config::Config;
use crate::driver::HttpDriver;
use crate::llm::build_oracle;
use crate::server::{build_router, ServeState};

#[derive(Args, Clone)]
pub struct ServeArgs {
    /// Address to bind (defaults to server.host)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind (defaults to server.port)
    #[arg(long)]
    pub port: Option<u16>,

    /// Browser driver endpoint (defaults to driver.endpoint)
    #[arg(long = "driver-endpoint", value_name = "URL")]
    pub driver_endpoint: Option<String>,
}

pub async fn cmd_serve(args: ServeArgs, ctx: &CliContext) -> Result<()> {
    let mut config = ctx.config().clone();
    if let Some(endpoint) = args.driver_endpoint.clone() {
        config.driver.endpoint = Some(endpoint);
    }

    let services = config
        .services()
        .context("invalid privacy configuration")?;
    let manager = JobManager::new(config.engine.clone(), services);
    let (oracle, driver) = build_collaborators(&config)?;
    let state = ServeState::new(manager.clone(), oracle, driver)
        .with_allowed_origins(config.server.allowed_origins.clone());

    state.health.mark_live();
    match run_startup_readiness_checks(&config) {
        Ok(()) => {
            state.health.mark_ready();
            info!("Serve readiness checks passed");
        }
        Err(err) => {
            state.health.mark_unready(err.to_string());
            error!(?err, "Serve readiness checks failed");
        }
    }

    if config.server.prune_interval_secs > 0 {
        spawn_finished_job_cleanup(
            manager,
            Duration::from_secs(config.server.prune_interval_secs),
        );
    }

    let host = args.host.unwrap_or_else(|| config.server.host.clone());
    let port = args.port.unwrap_or(config.server.port);
    let ip: IpAddr = host
        .parse()
        .with_context(|| format!("invalid bind address {host}"))?;
    if !ip.is_loopback() {
        warn!(%ip, "Serve is bound to a non-loopback address; responses carry job state");
    }
    let addr = SocketAddr::new(ip, port);
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind job server on {}", addr))?;
    info!("Job API available at http://{}", addr);

    let router = build_router(state);
    info!("Server starting, waiting for requests...");
    axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("job server exited unexpectedly")?;
    Ok(())
}

fn build_collaborators(
    config: &Config,
) -> Result<(Arc<dyn ActionOracle>, Arc<dyn BrowserDriver>)> {
    let oracle = build_oracle(&config.oracle).with_context(|| {
        format!(
            "{} action oracle unavailable; set {} or oracle.api_key",
            config.oracle.provider.as_str(),
            config.oracle.api_key_env()
        )
    })?;
    let driver = HttpDriver::from_settings(&config.driver)
        .context("browser driver unavailable; set driver.endpoint or --driver-endpoint")?;
    Ok((oracle, Arc::new(driver)))
}

fn run_startup_readiness_checks(config: &Config) -> Result<()> {
    anyhow::ensure!(
        config.engine.max_steps > 0,
        "engine.max_steps must be greater than zero"
    );
    anyhow::ensure!(
        config.engine.input_timeout_ms > 0,
        "engine.input_timeout_ms must be greater than zero"
    );
    Ok(())
}

fn spawn_finished_job_cleanup(manager: JobManager, every: Duration) {
    tokio::spawn(async move {
        let mut ticker = interval(every);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let removed = manager.prune_finished();
            if removed > 0 {
                debug!(removed, "pruned finished jobs");
            }
        }
    });
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(?err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
