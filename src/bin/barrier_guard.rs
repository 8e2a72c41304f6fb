//! Barrier guard risk monitor.
//!
//! - `run`: monitor a simulated drifting portfolio against a covariance risk engine
//! - `validate`: run the ground-state validation harness and print the report
//! - `generate-config` / `validate-config`: TOML config helpers

use clap::{Parser, Subcommand};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

use barrier_guard::infra::{init_logging, LogFormat};
use barrier_guard::{
    ChannelSink, CovarianceRiskEngine, EventLog, MonitoringLoop, PortfolioSnapshot, RiskAction,
    RiskControlConfig, RiskEngine, RiskEvent, ValidationHarness,
};

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser)]
#[command(name = "barrier_guard")]
#[command(version, about = "Energy-barrier risk monitor", long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "barrier_guard.toml")]
    config: String,

    /// Log filter override (e.g. "debug", "barrier_guard=trace")
    #[arg(long, env = "BARRIER_GUARD_LOG")]
    log_level: Option<String>,

    /// Stdout log format override (pretty, json, compact)
    #[arg(long)]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Monitor a simulated portfolio until Ctrl+C
    Run {
        /// Comma-separated asset names
        #[arg(long, value_delimiter = ',', default_value = "BTC,ETH,SOL")]
        assets: Vec<String>,

        /// Comma-separated annualized volatilities, one per asset
        #[arg(long, value_delimiter = ',', default_value = "0.6,0.75,0.9")]
        volatilities: Vec<f64>,

        /// Pairwise correlation between all assets
        #[arg(long, default_value_t = 0.5)]
        correlation: f64,

        /// Per-step standard deviation of the simulated position drift
        #[arg(long, default_value_t = 0.02)]
        drift: f64,

        /// Seed for the simulated drift
        #[arg(long)]
        seed: Option<u64>,
    },
    /// Validate the ground state of the covariance engine and print the report
    Validate {
        #[arg(long, value_delimiter = ',', default_value = "BTC,ETH,SOL")]
        assets: Vec<String>,

        #[arg(long, value_delimiter = ',', default_value = "0.6,0.75,0.9")]
        volatilities: Vec<f64>,

        #[arg(long, default_value_t = 0.5)]
        correlation: f64,

        /// Override validation.seed
        #[arg(long)]
        seed: Option<u64>,

        /// Override validation.num_random_tests
        #[arg(long)]
        tests: Option<usize>,
    },
    /// Generate a sample configuration file
    GenerateConfig {
        /// Output file path
        #[arg(short, long, default_value = "barrier_guard.toml")]
        output: String,
    },
    /// Validate the configuration file and exit
    ValidateConfig,
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match &cli.command {
        Some(Commands::GenerateConfig { output }) => {
            return generate_sample_config(output);
        }
        Some(Commands::ValidateConfig) => {
            let config = load_config(&cli)?;
            println!("Configuration is valid!");
            println!("{}", config.to_toml_string()?);
            return Ok(());
        }
        _ => {}
    }

    let mut config = load_config(&cli)?;
    if let Some(format) = cli.log_format {
        config.logging.stdout_format = format;
    }
    // Keep guards alive so the file writers flush on exit.
    let _log_guards = init_logging(&config.logging, cli.log_level.as_deref())?;

    match cli.command {
        Some(Commands::Validate {
            assets,
            volatilities,
            correlation,
            seed,
            tests,
        }) => {
            let engine = CovarianceRiskEngine::from_volatilities(assets, &volatilities, correlation)?;
            run_validation(&config, engine, seed, tests).await
        }
        Some(Commands::Run {
            assets,
            volatilities,
            correlation,
            drift,
            seed,
        }) => {
            let engine = CovarianceRiskEngine::from_volatilities(assets, &volatilities, correlation)?;
            run_monitor(config, engine, drift, seed).await
        }
        None => {
            let engine = CovarianceRiskEngine::from_volatilities(
                vec!["BTC".into(), "ETH".into(), "SOL".into()],
                &[0.6, 0.75, 0.9],
                0.5,
            )?;
            run_monitor(config, engine, 0.02, None).await
        }
        Some(Commands::GenerateConfig { .. }) | Some(Commands::ValidateConfig) => Ok(()),
    }
}

// ============================================================================
// Monitoring
// ============================================================================

async fn run_monitor(
    config: RiskControlConfig,
    engine: CovarianceRiskEngine,
    drift: f64,
    seed: Option<u64>,
) -> Result<(), Box<dyn std::error::Error>> {
    let ground = engine.find_ground_state()?;
    info!(
        assets = ?engine.assets(),
        ground_energy = %format!("{:.6}", ground.energy),
        interval_ms = config.monitoring.monitoring_interval_ms,
        "Starting barrier guard"
    );

    let (portfolio_tx, portfolio_rx) = watch::channel(ground.configuration.clone());

    let (channel_sink, mut events) = ChannelSink::channel();
    let event_log = Arc::new(EventLog::wrapping(
        EventLog::DEFAULT_CAPACITY,
        Arc::new(channel_sink),
    ));

    let engine: Arc<dyn RiskEngine> = Arc::new(engine);
    let monitor = MonitoringLoop::from_engine(&config, engine, portfolio_rx, event_log.clone())?;
    let handle = monitor.spawn();

    // Dispatcher stand-in: log every instruction the core hands out.
    let dispatcher = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match &event {
                RiskEvent::ActionDispatched { action, origin } => match action {
                    RiskAction::CompleteHalt | RiskAction::EmergencyStop => {
                        error!(?action, ?origin, "Dispatching risk action")
                    }
                    _ => warn!(?action, ?origin, "Dispatching risk action"),
                },
                other => info!(event = other.name(), ?other, "Risk event"),
            }
        }
    });

    let feeder = tokio::spawn(simulate_portfolio(
        ground.configuration,
        portfolio_tx,
        config.monitoring.interval(),
        drift,
        seed,
    ));

    wait_for_shutdown().await;

    feeder.abort();
    let final_status = handle.stop().await?;
    info!(
        ticks = final_status.ticks,
        rejected = final_status.rejected_ticks,
        health = %final_status.health.status,
        logged_events = event_log.len(),
        "Barrier guard stopped"
    );
    println!("{}", serde_json::to_string_pretty(&final_status)?);

    // The sink inside the stopped loop was the last sender.
    drop(event_log);
    if let Err(e) = dispatcher.await {
        warn!(error = %e, "Event dispatcher task failed");
    }
    Ok(())
}

/// Random walk on position sizes starting from `start`.
async fn simulate_portfolio(
    start: PortfolioSnapshot,
    tx: watch::Sender<PortfolioSnapshot>,
    period: Duration,
    drift: f64,
    seed: Option<u64>,
) {
    let mut rng = match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let step = match Normal::new(0.0, drift.abs()) {
        Ok(step) => step,
        Err(e) => {
            error!(error = %e, drift, "Invalid drift, simulated portfolio stays flat");
            return;
        }
    };

    let mut snapshot = start;
    let mut ticker = tokio::time::interval(period);
    loop {
        ticker.tick().await;
        for position in &mut snapshot.positions {
            position.quantity += step.sample(&mut rng);
        }
        if tx.send(snapshot.clone()).is_err() {
            break;
        }
    }
}

async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {
                        info!("Shutdown signal received (SIGINT/Ctrl+C)");
                    }
                    _ = sigterm.recv() => {
                        info!("Shutdown signal received (SIGTERM)");
                    }
                }
                return;
            }
            Err(e) => warn!(error = %e, "Failed to register SIGTERM handler"),
        }
    }
    let _ = tokio::signal::ctrl_c().await;
    info!("Shutdown signal received (SIGINT/Ctrl+C)");
}

// ============================================================================
// Validation
// ============================================================================

async fn run_validation(
    config: &RiskControlConfig,
    engine: CovarianceRiskEngine,
    seed: Option<u64>,
    tests: Option<usize>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut validation = config.validation.clone();
    if let Some(seed) = seed {
        validation = validation.with_seed(seed);
    }
    if let Some(tests) = tests {
        validation = validation.with_num_random_tests(tests);
    }

    let (channel_sink, _events) = ChannelSink::channel();
    let mut harness = ValidationHarness::new(validation)?.with_sink(Arc::new(channel_sink));

    // Eigendecomposition and thousands of energy evaluations; keep them off the runtime.
    let result = tokio::task::spawn_blocking(move || {
        let supplied = engine
            .find_ground_state()
            .map(|g| vec![g.configuration])
            .unwrap_or_default();
        harness.validate_principle(&engine, &supplied)
    })
    .await??;

    info!(
        validated = result.principle_validated,
        quality = %result.quality_rating,
        success_rate = %format!("{:.4}", result.overall_success_rate),
        "Validation finished"
    );
    println!("{}", serde_json::to_string_pretty(&result)?);

    if !result.principle_validated {
        return Err(format!("principle not validated (quality {})", result.quality_rating).into());
    }
    Ok(())
}

// ============================================================================
// Config
// ============================================================================

fn load_config(cli: &Cli) -> Result<RiskControlConfig, Box<dyn std::error::Error>> {
    let config_path = &cli.config;
    if Path::new(config_path).exists() {
        Ok(RiskControlConfig::load(config_path)?)
    } else {
        Ok(RiskControlConfig::default())
    }
}

fn generate_sample_config(path: &str) -> Result<(), Box<dyn std::error::Error>> {
    let sample = RiskControlConfig::default();
    let content = sample.to_toml_string()?;

    let with_comments = format!(
        r#"# Barrier Guard Configuration
# See: cargo run --bin barrier_guard -- --help
#
# Barrier heights and breaker thresholds are deviations from the ground
# energy. Breaker levels must be strictly ascending.

{}"#,
        content
    );

    std::fs::write(path, with_comments)?;
    println!("Sample config written to: {}", path);
    Ok(())
}
