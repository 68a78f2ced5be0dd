//! idlefleet session agent binary.
//!
//! Runs a single session to completion and exits. A non-zero exit means the
//! session failed and cloud resources may have been left running.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use idlefleet_agent::aws::{AwsCompute, AwsDns, AwsFleet};
use idlefleet_agent::probe::SlpGameStatus;
use idlefleet_agent::{Collaborators, Config, LogFormat, SessionOrchestrator};
use idlefleet_poll::TokioSleeper;
use tracing::{error, info, warn, Instrument};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use ulid::Ulid;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    let registry = tracing_subscriber::registry().with(filter);
    match config.log_format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer().pretty()).init(),
    }

    config.validate().context("invalid configuration")?;

    let session_id = Ulid::new();
    let span = tracing::info_span!("session", session_id = %session_id);
    run(config).instrument(span).await
}

async fn run(config: Config) -> Result<()> {
    info!(
        record = %config.record_name,
        cluster = %config.cluster,
        idle_threshold = config.idle_threshold,
        "Starting idlefleet session agent"
    );

    let sdk_config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
    let collaborators = Collaborators {
        compute: Arc::new(AwsCompute::new(&sdk_config, config.cluster.clone())),
        fleet: Arc::new(AwsFleet::new(&sdk_config)),
        dns: Arc::new(AwsDns::new(&sdk_config)),
        status: Arc::new(SlpGameStatus::new(config.probe_timeout())),
        sleeper: Arc::new(TokioSleeper),
    };
    let mut orchestrator = SessionOrchestrator::new(&config, collaborators);

    tokio::select! {
        result = orchestrator.run() => {
            if let Err(e) = &result {
                error!(
                    error = %e,
                    phase = %orchestrator.phase(),
                    "Session ended with an error"
                );
            }
            result.context("session failed")?;
        }
        _ = tokio::signal::ctrl_c() => {
            warn!(
                phase = %orchestrator.phase(),
                "Interrupted, cloud resources may still be running"
            );
            anyhow::bail!("interrupted during {}", orchestrator.phase());
        }
    }

    info!("idlefleet session agent finished");
    Ok(())
}
