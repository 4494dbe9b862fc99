//! `run` command implementation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use contracts::{RelayConfig, RunStatus};
use tracing::{info, warn};

use crate::cli::RunArgs;
use crate::error::CliError;
use crate::pipeline::{Pipeline, PipelineConfig};

/// Execute the `run` command
pub async fn run_pipeline(args: &RunArgs) -> Result<()> {
    info!(config = %args.config.display(), "Loading configuration");

    if !args.config.exists() {
        return Err(CliError::config_not_found(args.config.display().to_string()).into());
    }

    let mut config = config_loader::ConfigLoader::load_from_path(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;

    apply_overrides(&mut config, args)?;

    info!(
        frames = config.acquisition.frames,
        width = config.acquisition.width,
        height = config.acquisition.height,
        dtype = %config.acquisition.dtype,
        buffer_mb = config.buffer.size_mb,
        consumers = config.consumers.len(),
        "Configuration loaded"
    );

    if args.dry_run {
        info!("Dry run mode - configuration is valid, exiting");
        print_config_summary(&config);
        return Ok(());
    }

    // The Prometheus exporter spawns onto the current runtime
    if args.metrics_port != 0 {
        observability::init_metrics_only(args.metrics_port)?;
        info!("Metrics endpoint available on port {}", args.metrics_port);
    }

    let pipeline = Pipeline::new(PipelineConfig {
        relay: config,
        timeout: (args.timeout != 0).then(|| Duration::from_secs(args.timeout)),
    });

    let stop = Arc::new(AtomicBool::new(false));
    let worker_stop = Arc::clone(&stop);
    let mut task = tokio::task::spawn_blocking(move || pipeline.run(&worker_stop));

    info!("Starting pipeline...");

    let shutdown_signal = setup_shutdown_signal();
    tokio::pin!(shutdown_signal);

    let joined = tokio::select! {
        joined = &mut task => joined,
        _ = &mut shutdown_signal => {
            warn!("Received shutdown signal, stopping pipeline...");
            stop.store(true, Ordering::Release);
            task.await
        }
    };

    let stats = joined
        .context("Pipeline task panicked")?
        .context("Pipeline execution failed")?;

    info!(
        status = %stats.report.status,
        frames_produced = stats.frames_produced,
        frames_submitted = stats.frames_submitted,
        evicted = stats.evicted,
        duration_secs = stats.duration.as_secs_f64(),
        fps = format!("{:.2}", stats.fps()),
        "Pipeline finished"
    );

    if args.report_json {
        let json = serde_json::to_string_pretty(&stats.report)
            .context("Failed to serialize run report")?;
        println!("{}", json);
    } else {
        stats.print_summary();
    }

    if stats.report.status == RunStatus::Failed {
        let message = stats
            .failure
            .unwrap_or_else(|| "critical consumer failed".to_string());
        return Err(CliError::run_failed(message).into());
    }

    info!("Frame Relay finished");
    Ok(())
}

/// Apply command-line overrides and re-validate the result
fn apply_overrides(config: &mut RelayConfig, args: &RunArgs) -> Result<(), CliError> {
    if let Some(frames) = args.frames {
        info!(frames, "Overriding frame count from CLI");
        config.acquisition.frames = frames;
    }
    if let Some(interval_ms) = args.interval_ms {
        info!(interval_ms, "Overriding frame interval from CLI");
        config.acquisition.interval_ms = interval_ms;
    }
    if let Some(size_mb) = args.buffer_mb {
        info!(size_mb, "Overriding buffer size from CLI");
        config.buffer.size_mb = size_mb;
    }

    config_loader::ConfigLoader::validate(config)
        .map_err(|e| CliError::config_validation(e.to_string()))
}

/// Resolves on Ctrl+C or SIGTERM.
///
/// If a handler cannot be installed the corresponding branch never fires.
async fn setup_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// Print configuration summary for dry-run mode
fn print_config_summary(config: &RelayConfig) {
    let acq = &config.acquisition;
    println!("\n=== Configuration Summary ===\n");
    println!("Acquisition:");
    println!(
        "  Frames: {} x {}x{} {} ({} bytes each)",
        acq.frames,
        acq.width,
        acq.height,
        acq.dtype,
        acq.frame_bytes().unwrap_or(0)
    );
    println!("  Interval: {} ms", acq.interval_ms);
    println!("\nBuffer:");
    println!("  Size: {} MiB", config.buffer.size_mb);
    println!("  Overwrite on overflow: {}", config.buffer.overwrite_on_overflow);

    let policy = &config.policy;
    println!("\nPolicy:");
    println!("  Critical errors: {:?}", policy.critical_error);
    println!("  Non-critical errors: {:?}", policy.noncritical_error);
    println!("  Backpressure: {:?}", policy.backpressure);
    println!(
        "  Queues: critical={}, observer={}",
        policy.critical_queue, policy.observer_queue
    );

    if !config.consumers.is_empty() {
        println!("\nConsumers ({}):", config.consumers.len());
        for consumer in &config.consumers {
            println!(
                "  - {} ({:?}){}",
                consumer.name,
                consumer.kind,
                if consumer.critical { " [critical]" } else { "" }
            );
        }
    }

    println!();
}
