use clap::Parser;
use fincore::bootstrap::{self, CoreServices};
use fincore::cli::{Cli, Commands};
use fincore::config::{AppConfig, LoggingConfig};
use fincore::error::{FinError, Result};
use fincore::exchange::PaperGateway;
use fincore::referral::InMemoryReferralGraph;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::load_from(&cli.config_dir)?;
    let _log_guard = init_logging(&config.logging, cli.json_logs);

    match cli.command {
        Commands::CheckConfig => check_config(&config),
        Commands::Settle => {
            let core = build_core(&config).await?;
            let settled = core.settlements.process_pending_commissions().await?;
            println!("Settled {} users", settled.len());
            for s in &settled {
                println!("  {} {} {}", s.id, s.user_id, s.amount);
            }
            Ok(())
        }
        Commands::Export {
            user,
            from,
            to,
            output,
        } => {
            let core = build_core(&config).await?;
            let csv = core
                .settlements
                .export_settlements(user.as_deref(), from, to)
                .await?;
            match output {
                Some(path) => {
                    std::fs::write(&path, csv)?;
                    info!("Settlements written to {}", path.display());
                }
                None => print!("{csv}"),
            }
            Ok(())
        }
        Commands::Run => run(&config).await,
    }
}

fn check_config(config: &AppConfig) -> Result<()> {
    if let Err(errors) = config.validate() {
        for e in &errors {
            eprintln!("✗ {e}");
        }
        return Err(FinError::Validation(errors.join("; ")));
    }

    println!("✓ Configuration is valid");
    println!(
        "  execution: max_retries={}, retry_delay={}ms, queue_size={}",
        config.execution.max_retries, config.execution.retry_delay_ms, config.execution.queue_size
    );
    println!(
        "  commission: platform={}, gen1={}, gen2={}, account={}, mode={:?}",
        config.commission.platform_fee_rate,
        config.commission.first_gen_rate,
        config.commission.second_gen_rate,
        config.commission.platform_account,
        config.commission.settlement_mode
    );
    for (rule, limit) in config.risk.configured() {
        println!("  risk.{rule} = {limit}");
    }
    println!(
        "  store: {}",
        if config.database.is_some() { "postgres" } else { "in-memory" }
    );
    Ok(())
}

async fn build_core(config: &AppConfig) -> Result<CoreServices> {
    if let Err(errors) = config.validate() {
        return Err(FinError::Validation(errors.join("; ")));
    }
    let store = bootstrap::connect_store(config).await?;
    let alerts = bootstrap::alert_manager(&config.alerts)?;

    Ok(CoreServices::build(
        config,
        store,
        Arc::new(PaperGateway::new()),
        Arc::new(InMemoryReferralGraph::new()),
        alerts,
    ))
}

async fn run(config: &AppConfig) -> Result<()> {
    let core = build_core(config).await?;

    let (requeued, rescheduled) = core.engine.recover().await?;
    info!(
        "Recovered {} pending and {} retrying orders",
        requeued, rescheduled
    );
    let worker = core.engine.start().await;
    let job = core
        .settlements
        .start_settlement_job(Duration::from_secs(config.settlement.batch_interval_secs));

    info!("fincore running, press Ctrl-C to stop");
    if let Err(e) = signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
    }

    info!("Shutting down");
    core.settlements.stop();
    for handle in [worker, job].into_iter().flatten() {
        handle.abort();
    }
    Ok(())
}

fn init_logging(logging: &LoggingConfig, json_override: bool) -> Option<WorkerGuard> {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("{},fincore=debug,sqlx=warn", logging.level))
    });

    let json = logging.json || json_override;
    let console_json = json.then(|| tracing_subscriber::fmt::layer().json().with_target(true));
    let console_text = (!json).then(|| {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
    });

    // `rolling::daily` panics if the first file cannot be created, so check
    // the directory is writable first
    let (file_layer, guard) = match std::env::var("FINCORE_LOG_DIR") {
        Ok(log_dir) if writable_dir(&log_dir) => {
            let appender = tracing_appender::rolling::daily(&log_dir, "fincore.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_target(true);
            eprintln!("Logging to: {}/fincore.log", log_dir);
            (Some(layer), Some(guard))
        }
        Ok(log_dir) => {
            eprintln!(
                "Warning: Could not write to log directory {}, file logging disabled",
                log_dir
            );
            (None, None)
        }
        Err(_) => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console_json)
        .with(console_text)
        .with(file_layer)
        .init();

    guard
}

fn writable_dir(dir: &str) -> bool {
    if std::fs::create_dir_all(dir).is_err() {
        return false;
    }
    let marker = std::path::Path::new(dir).join(".fincore_write_test");
    let ok = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&marker)
        .is_ok();
    let _ = std::fs::remove_file(&marker);
    ok
}
