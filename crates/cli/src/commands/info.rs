//! `info` command implementation.

use anyhow::{Context, Result};
use contracts::{RelayConfig, RunPolicy};
use serde::Serialize;
use tracing::info;

use crate::cli::InfoArgs;
use crate::error::CliError;

/// Configuration info for JSON output
#[derive(Serialize)]
struct ConfigInfo {
    version: String,
    buffer: BufferInfo,
    acquisition: AcquisitionInfo,
    policy: RunPolicy,
    consumer_count: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    consumers: Vec<ConsumerInfo>,
}

#[derive(Serialize)]
struct BufferInfo {
    size_mb: usize,
    size_bytes: usize,
    overwrite_on_overflow: bool,
}

#[derive(Serialize)]
struct AcquisitionInfo {
    frames: u64,
    width: usize,
    height: usize,
    dtype: String,
    frame_bytes: usize,
    interval_ms: u64,
}

#[derive(Serialize)]
struct ConsumerInfo {
    name: String,
    kind: String,
    critical: bool,
    queue_capacity: usize,
    #[serde(skip_serializing_if = "is_zero")]
    delay_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    fail_every: Option<u64>,
}

fn is_zero(value: &u64) -> bool {
    *value == 0
}

/// Execute the `info` command
pub fn run_info(args: &InfoArgs) -> Result<()> {
    info!(config = %args.config.display(), "Loading configuration info");

    if !args.config.exists() {
        return Err(CliError::config_not_found(args.config.display().to_string()).into());
    }

    let config = config_loader::ConfigLoader::load_from_path(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;

    if args.json {
        let info = build_config_info(&config, args);
        let json =
            serde_json::to_string_pretty(&info).context("Failed to serialize config info")?;
        println!("{}", json);
    } else {
        print_config_info(&config, args);
    }

    Ok(())
}

fn build_config_info(config: &RelayConfig, args: &InfoArgs) -> ConfigInfo {
    let acq = &config.acquisition;

    let consumers = if args.consumers {
        config
            .consumers
            .iter()
            .map(|c| ConsumerInfo {
                name: c.name.clone(),
                kind: format!("{:?}", c.kind),
                critical: c.critical,
                queue_capacity: config.policy.queue_capacity(c.critical),
                delay_ms: c.delay_ms,
                fail_every: c.fail_every,
            })
            .collect()
    } else {
        Vec::new()
    };

    ConfigInfo {
        version: format!("{:?}", config.version),
        buffer: BufferInfo {
            size_mb: config.buffer.size_mb,
            size_bytes: config.buffer.size_bytes(),
            overwrite_on_overflow: config.buffer.overwrite_on_overflow,
        },
        acquisition: AcquisitionInfo {
            frames: acq.frames,
            width: acq.width,
            height: acq.height,
            dtype: acq.dtype.to_string(),
            frame_bytes: acq.frame_bytes().unwrap_or(0),
            interval_ms: acq.interval_ms,
        },
        policy: config.policy,
        consumer_count: config.consumers.len(),
        consumers,
    }
}

fn print_config_info(config: &RelayConfig, args: &InfoArgs) {
    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║                Frame Relay Configuration                     ║");
    println!("╚══════════════════════════════════════════════════════════════╝\n");

    let acq = &config.acquisition;
    println!("📷 Acquisition");
    println!("   ├─ Version: {:?}", config.version);
    println!("   ├─ Frames: {}", acq.frames);
    println!(
        "   ├─ Frame: {}x{} {} ({} bytes)",
        acq.width,
        acq.height,
        acq.dtype,
        acq.frame_bytes().unwrap_or(0)
    );
    if acq.interval_ms == 0 {
        println!("   └─ Interval: as fast as possible");
    } else {
        println!("   └─ Interval: {} ms", acq.interval_ms);
    }

    println!("\n🧱 Buffer");
    println!(
        "   ├─ Size: {} MiB ({} bytes)",
        config.buffer.size_mb,
        config.buffer.size_bytes()
    );
    println!(
        "   └─ Overwrite on overflow: {}",
        config.buffer.overwrite_on_overflow
    );

    let policy = &config.policy;
    println!("\n⚙️  Policy");
    println!("   ├─ Critical errors: {:?}", policy.critical_error);
    println!("   ├─ Non-critical errors: {:?}", policy.noncritical_error);
    println!("   ├─ Backpressure: {:?}", policy.backpressure);
    println!(
        "   └─ Queues: critical={}, observer={}",
        policy.critical_queue, policy.observer_queue
    );

    println!("\n📤 Consumers ({})", config.consumers.len());
    if args.consumers {
        for (i, consumer) in config.consumers.iter().enumerate() {
            let is_last = i == config.consumers.len() - 1;
            let prefix = if is_last { "└─" } else { "├─" };
            println!(
                "   {} {} ({:?}{}) queue={}",
                prefix,
                consumer.name,
                consumer.kind,
                if consumer.critical { ", critical" } else { "" },
                policy.queue_capacity(consumer.critical)
            );
        }
    } else if !config.consumers.is_empty() {
        let critical = config.consumers.iter().filter(|c| c.critical).count();
        println!("   └─ {} critical, {} observers", critical, config.consumers.len() - critical);
    }

    println!();
}
