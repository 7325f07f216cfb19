//! AI Mine Client - Main Application
//!
//! Wires the ledger, text generator, preemption monitor and round
//! orchestrator together and mines until interrupted.

use aimine_client::{
    candidates::CandidatePipeline,
    config::{Config, LedgerType},
    events::{LogSink, EVENT_BUFFER},
    generator::{OfflineGenerator, OpenAiGenerator, TextGenerator},
    ledger::{HttpLedger, Ledger, SimulatedLedger},
    orchestrator::RoundOrchestrator,
    preemption::{self, PreemptionMonitor},
    utils::init_logging,
    SolverIdentity, APP_DESCRIPTION, APP_NAME, APP_VERSION,
};

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Load and validate configuration
    let config = Config::load().await.context("Failed to load configuration")?;

    // Handle special commands
    if config.info {
        print_info();
        return Ok(());
    }

    if config.print_config {
        print_configuration(&config)?;
        return Ok(());
    }

    let _log_guard = init_logging(config.log_level, config.log_format, config.log_file.as_deref())?;

    info!("Starting {} v{}", APP_NAME, APP_VERSION);
    info!(
        "Configuration: ledger={}, workers={}, nonce budget={}, ai batch={}",
        config.ledger, config.workers, config.max_nonce, config.ai_batch_size
    );

    let identity = solver_identity(&config)?;
    let ledger = create_ledger(&config)?;
    let generator = create_generator(&config)?;

    let shutdown = CancellationToken::new();
    let (event_tx, event_rx) = mpsc::channel(EVENT_BUFFER);
    let sink = tokio::spawn(LogSink::new(event_rx).run());

    let (notice_tx, notice_rx) = preemption::channel();
    let monitor = PreemptionMonitor::new(ledger.clone(), identity, notice_tx, Some(event_tx.clone()))
        .start(shutdown.child_token())
        .await
        .context("Failed to subscribe to solution events")?;

    let pipeline = CandidatePipeline::new(generator, config.workers, config.ai_batch_size);
    let orchestrator = RoundOrchestrator::new(
        ledger,
        pipeline,
        config.orchestrator_config(identity)?,
        notice_rx,
        event_tx,
    );

    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Interrupt received, shutting down"),
            Err(e) => warn!("Failed to listen for interrupt: {}", e),
        }
        signal_token.cancel();
    });

    orchestrator.run(shutdown.clone()).await;

    shutdown.cancel();
    monitor.await.context("Preemption monitor failed")?;
    let stats = sink.await.context("Event sink failed")?;
    info!("Total hashes: {}", stats.hashes);

    Ok(())
}

/// Configured identity, or a throwaway one on the simulated ledger
fn solver_identity(config: &Config) -> Result<SolverIdentity> {
    match config.solver_identity()? {
        Some(identity) => Ok(identity),
        None if config.ledger == LedgerType::Simulation => {
            let identity = SolverIdentity::random();
            info!("No solver address configured, using {}", identity);
            Ok(identity)
        }
        None => anyhow::bail!("A solver address is required for the {} ledger", config.ledger),
    }
}

fn create_ledger(config: &Config) -> Result<Arc<dyn Ledger>> {
    let ledger: Arc<dyn Ledger> = match config.ledger {
        LedgerType::Http => Arc::new(
            HttpLedger::new(&config.ledger_url, config.http_timeout_duration()?)?
                .with_backoff_config(config.backoff_config()?),
        ),
        LedgerType::Simulation => Arc::new(SimulatedLedger::new(config.simulation_difficulty_bits)),
    };
    Ok(ledger)
}

fn create_generator(config: &Config) -> Result<Arc<dyn TextGenerator>> {
    let generator: Arc<dyn TextGenerator> = match &config.openai_key {
        Some(key) => Arc::new(OpenAiGenerator::new(
            &config.ai_base_url,
            key.clone(),
            config.ai_model.clone(),
            config.ai_timeout_duration()?,
        )?),
        None => {
            warn!("No API key configured, the AI wave uses fallback texts only");
            Arc::new(OfflineGenerator)
        }
    };
    Ok(generator)
}

/// Print basic program information
fn print_info() {
    println!("{} v{}", APP_NAME, APP_VERSION);
    println!("{}", APP_DESCRIPTION);
}

/// Print current configuration
fn print_configuration(config: &Config) -> Result<()> {
    let mut config = config.clone();
    if config.openai_key.is_some() {
        config.openai_key = Some("<redacted>".to_string());
    }
    println!("{}", serde_yaml::to_string(&config)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_simulation_wiring() {
        let config = Config::try_parse_from(["aimine-client", "--ledger", "simulation"]).unwrap();

        assert!(solver_identity(&config).is_ok());
        assert_eq!(create_ledger(&config).unwrap().name(), "simulation");
        assert_eq!(create_generator(&config).unwrap().name(), "offline");
    }

    #[test]
    fn test_http_requires_address() {
        let config = Config::try_parse_from(["aimine-client"]).unwrap();
        assert!(solver_identity(&config).is_err());
    }

    #[test]
    fn test_config_printing() {
        let config = Config::try_parse_from(["aimine-client", "--openai-key", "sk-secret"]).unwrap();
        assert!(print_configuration(&config).is_ok());
    }
}
