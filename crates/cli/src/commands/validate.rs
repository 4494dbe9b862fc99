//! `validate` command implementation.

use anyhow::{Context, Result};
use contracts::{BackpressurePolicy, ConsumerKind, RelayConfig};
use serde::Serialize;
use tracing::info;

use crate::cli::ValidateArgs;

/// Validation result for JSON output
#[derive(Serialize)]
struct ValidationResult {
    valid: bool,
    config_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    warnings: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    summary: Option<ConfigSummary>,
}

#[derive(Serialize)]
struct ConfigSummary {
    version: String,
    frames: u64,
    frame_bytes: usize,
    buffer_mb: usize,
    frames_in_buffer: usize,
    consumer_count: usize,
    critical_count: usize,
}

/// Execute the `validate` command
pub fn run_validate(args: &ValidateArgs) -> Result<()> {
    info!(config = %args.config.display(), "Validating configuration");

    let result = validate_config(args);

    if args.json {
        let json = serde_json::to_string_pretty(&result)
            .context("Failed to serialize validation result")?;
        println!("{}", json);
    } else {
        print_validation_result(&result);
    }

    if result.valid {
        Ok(())
    } else {
        anyhow::bail!("Configuration validation failed")
    }
}

fn validate_config(args: &ValidateArgs) -> ValidationResult {
    let config_path = args.config.display().to_string();

    if !args.config.exists() {
        return ValidationResult {
            valid: false,
            config_path,
            error: Some(format!("File not found: {}", args.config.display())),
            warnings: None,
            summary: None,
        };
    }

    match config_loader::ConfigLoader::load_from_path(&args.config) {
        Ok(config) => {
            let warnings = collect_warnings(&config);
            let frame_bytes = config.acquisition.frame_bytes().unwrap_or(0);

            ValidationResult {
                valid: true,
                config_path,
                error: None,
                warnings: if warnings.is_empty() {
                    None
                } else {
                    Some(warnings)
                },
                summary: Some(ConfigSummary {
                    version: format!("{:?}", config.version),
                    frames: config.acquisition.frames,
                    frame_bytes,
                    buffer_mb: config.buffer.size_mb,
                    frames_in_buffer: frames_in_buffer(&config),
                    consumer_count: config.consumers.len(),
                    critical_count: config.consumers.iter().filter(|c| c.critical).count(),
                }),
            }
        }
        Err(e) => ValidationResult {
            valid: false,
            config_path,
            error: Some(e.to_string()),
            warnings: None,
            summary: None,
        },
    }
}

/// Approximate number of frames the ring holds at once
fn frames_in_buffer(config: &RelayConfig) -> usize {
    let slot = config
        .acquisition
        .frame_bytes()
        .map(|n| n.next_multiple_of(frame_buffer::SLOT_ALIGNMENT))
        .unwrap_or(0);
    if slot == 0 {
        0
    } else {
        config.buffer.size_bytes() / slot
    }
}

/// Collect configuration warnings (non-fatal issues)
fn collect_warnings(config: &RelayConfig) -> Vec<String> {
    let mut warnings = Vec::new();

    if config.consumers.is_empty() {
        warnings.push("No consumers configured - frames will only pass through the buffer".to_string());
    }

    if !config.consumers.iter().any(|c| c.critical) {
        warnings.push("No critical consumer - failures can never stop the run".to_string());
    }

    for consumer in &config.consumers {
        if consumer.kind == ConsumerKind::Relay && consumer.critical {
            warnings.push(format!(
                "Relay consumer '{}' is critical; relays usually observe",
                consumer.name
            ));
        }
        if consumer.fail_every.is_some() {
            warnings.push(format!(
                "Consumer '{}' has fault injection enabled (fail_every)",
                consumer.name
            ));
        }
    }

    if frames_in_buffer(config) < 2 {
        warnings.push("Buffer holds fewer than two frames - expect evictions".to_string());
    }

    if !config.buffer.overwrite_on_overflow && config.acquisition.interval_ms == 0 {
        warnings.push(
            "overwrite_on_overflow is false with interval_ms = 0 - the producer may see rejected frames"
                .to_string(),
        );
    }

    if config.policy.backpressure == BackpressurePolicy::Fail {
        warnings.push("Backpressure policy 'fail' rejects frames when any queue is full".to_string());
    }

    warnings
}

fn print_validation_result(result: &ValidationResult) {
    if result.valid {
        println!("✓ Configuration is valid: {}", result.config_path);

        if let Some(ref summary) = result.summary {
            println!("\n  Version: {}", summary.version);
            println!("  Frames: {} ({} bytes each)", summary.frames, summary.frame_bytes);
            println!(
                "  Buffer: {} MiB (~{} frames)",
                summary.buffer_mb, summary.frames_in_buffer
            );
            println!(
                "  Consumers: {} ({} critical)",
                summary.consumer_count, summary.critical_count
            );
        }

        if let Some(ref warnings) = result.warnings {
            println!("\n⚠ Warnings:");
            for warning in warnings {
                println!("  - {}", warning);
            }
        }
    } else {
        println!("✗ Configuration is invalid: {}", result.config_path);
        if let Some(ref error) = result.error {
            println!("\n  Error: {}", error);
        }
    }
}
