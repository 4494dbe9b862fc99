//! Pipeline orchestrator - coordinates buffer, dispatcher and consumers.
//!
//! A synthetic producer writes frames straight into ring buffer slots while
//! the control thread drains published frames into the dispatcher.

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::Utc;
use contracts::{
    ConsumerConfig, ConsumerKind, ConsumerSpec, FrameConsumer, FrameEvent, Metadata, RelayConfig,
    RunStatus, Sequence,
};
use dispatcher::{DispatcherError, FrameDispatcher, LogConsumer, NullConsumer, RelayEvent, SignalRelay};
use frame_buffer::{BufferError, FrameBuffer};
use observability::{RunningStats, StatsSummary};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, info, warn};

use super::{FaultInjector, PipelineStats};

/// Idle wait of the drain loop when the buffer is empty
const DRAIN_POLL: Duration = Duration::from_millis(1);

/// Submitted frames between two per-consumer progress lines
const PROGRESS_INTERVAL: u64 = 100;

/// Pipeline configuration
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Validated relay configuration
    pub relay: RelayConfig,

    /// Pipeline timeout (None = no timeout)
    pub timeout: Option<Duration>,
}

/// Counters reported by the producer thread
#[derive(Debug, Default)]
struct ProducerStats {
    produced: u64,
    rejected: u64,
}

/// Main pipeline orchestrator
pub struct Pipeline {
    config: PipelineConfig,
}

impl Pipeline {
    /// Create a new pipeline with the given configuration
    pub fn new(config: PipelineConfig) -> Self {
        Self { config }
    }

    /// Run the pipeline to completion on the calling thread.
    ///
    /// Blocks until every frame was produced and drained, a critical
    /// consumer requested cancellation, `stop` was raised or the timeout
    /// expired. A run that fails because of a critical consumer still
    /// returns its stats; `report.status` is then `Failed`.
    pub fn run(self, stop: &AtomicBool) -> Result<PipelineStats> {
        let start_time = Instant::now();
        let relay = &self.config.relay;

        let buffer =
            FrameBuffer::from_config(&relay.buffer).context("Failed to allocate frame buffer")?;
        info!(
            size_bytes = buffer.size_bytes(),
            overwrite = buffer.overwrite_on_overflow(),
            "Frame buffer allocated"
        );

        let mut dispatcher = FrameDispatcher::new(relay.policy);
        let mut monitors = Vec::new();
        for consumer in &relay.consumers {
            let (spec, monitor) = build_consumer(consumer)?;
            dispatcher
                .add_consumer(spec)
                .with_context(|| format!("Failed to register consumer '{}'", consumer.name))?;
            monitors.extend(monitor);
        }

        if relay.consumers.is_empty() {
            warn!("No consumers configured - frames will only pass through the buffer");
        }

        let result = self.drive(&buffer, &mut dispatcher, stop, start_time);

        // Dropping the dispatcher closes any relay channel still open
        drop(dispatcher);
        let relayed: u64 = monitors
            .into_iter()
            .filter_map(|monitor| monitor.join().ok())
            .sum();

        let mut stats = result?;
        stats.relayed_frames = relayed;
        stats.duration = start_time.elapsed();

        info!(
            duration_secs = stats.duration.as_secs_f64(),
            fps = format!("{:.2}", stats.fps()),
            "Pipeline shutdown complete"
        );

        Ok(stats)
    }

    fn drive(
        &self,
        buffer: &FrameBuffer,
        dispatcher: &mut FrameDispatcher,
        stop: &AtomicBool,
        start_time: Instant,
    ) -> Result<PipelineStats> {
        let acquisition = &self.config.relay.acquisition;
        let sequence = Sequence::new(format!("run-{}", Utc::now().format("%Y%m%dT%H%M%S%.3f")))
            .with_axis("t", usize::try_from(acquisition.frames).unwrap_or(usize::MAX));

        let mut run_meta = Metadata::new();
        run_meta.insert("source".into(), "synthetic".into());
        run_meta.insert("width".into(), acquisition.width.into());
        run_meta.insert("height".into(), acquisition.height.into());
        run_meta.insert("dtype".into(), acquisition.dtype.name().into());

        dispatcher
            .start(&sequence, &run_meta)
            .context("Failed to start dispatcher")?;

        info!(uid = %sequence.uid, frames = acquisition.frames, "Acquisition started");

        let halt = AtomicBool::new(false);
        let producer_done = AtomicBool::new(false);
        let mut status = RunStatus::Completed;
        let mut submitted = 0u64;
        let mut submit_rejected = 0u64;
        let mut submit_latency = RunningStats::default();

        let producer = thread::scope(|scope| -> Result<ProducerStats> {
            let producer = thread::Builder::new()
                .name("synthetic-producer".into())
                .spawn_scoped(scope, || {
                    let stats = self.produce(buffer, &halt);
                    producer_done.store(true, Ordering::Release);
                    stats
                })
                .context("Failed to spawn producer thread")?;

            loop {
                if dispatcher.should_cancel() {
                    warn!("Critical consumer requested cancellation");
                    status = RunStatus::Canceled;
                    break;
                }
                if stop.load(Ordering::Acquire) {
                    warn!("Stop requested");
                    status = RunStatus::Canceled;
                    break;
                }
                if let Some(timeout) = self.config.timeout {
                    if start_time.elapsed() >= timeout {
                        warn!(timeout_secs = timeout.as_secs(), "Pipeline timed out");
                        status = RunStatus::Canceled;
                        break;
                    }
                }

                // read before popping so a frame published just before the
                // producer finished is still drained
                let done = producer_done.load(Ordering::Acquire);
                let Some(frame) = buffer.pop_next() else {
                    if done {
                        break;
                    }
                    thread::sleep(DRAIN_POLL);
                    continue;
                };

                let t = frame
                    .metadata
                    .get("t")
                    .and_then(|v| v.as_u64())
                    .and_then(|t| usize::try_from(t).ok())
                    .unwrap_or_default();

                let submit_started = Instant::now();
                let submit_result =
                    dispatcher.submit(frame.image, FrameEvent::at([("t", t)]), frame.metadata);
                submit_latency.push(submit_started.elapsed().as_secs_f64() * 1e6);

                match submit_result {
                    Ok(_) => {
                        submitted += 1;
                        if submitted % PROGRESS_INTERVAL == 0 {
                            log_progress(dispatcher, submitted);
                        }
                    }
                    Err(e @ DispatcherError::QueueFull { .. }) => {
                        submit_rejected += 1;
                        debug!(error = %e, t, "Frame rejected by dispatcher");
                    }
                    Err(e) => {
                        halt.store(true, Ordering::Release);
                        return Err(e).context("Failed to submit frame");
                    }
                }
            }

            halt.store(true, Ordering::Release);
            producer
                .join()
                .map_err(|_| anyhow::anyhow!("Producer thread panicked"))
        });

        // Close even if draining failed, so workers are joined
        let producer = match producer {
            Ok(producer) => producer,
            Err(e) => {
                if let Err(close_err) = dispatcher.close(&sequence, RunStatus::Failed) {
                    warn!(error = %close_err, "Error closing dispatcher after failure");
                }
                return Err(e);
            }
        };

        info!(
            produced = producer.produced,
            submitted,
            status = %status,
            "Acquisition finished"
        );

        let (report, failure) = match dispatcher.close(&sequence, status) {
            Ok(report) => (report, None),
            Err(DispatcherError::ConsumerFailed {
                consumer,
                source,
                report,
            }) => {
                warn!(consumer = %consumer, error = %source, "Run failed");
                (*report, Some(format!("consumer '{consumer}' failed: {source}")))
            }
            Err(e) => return Err(e).context("Failed to close dispatcher"),
        };

        Ok(PipelineStats {
            frames_produced: producer.produced,
            frames_rejected: producer.rejected,
            frames_submitted: submitted,
            submit_rejected,
            submit_latency_us: StatsSummary::from(&submit_latency),
            evicted: buffer.evicted_count(),
            overflow_occurred: buffer.overflow_occurred(),
            relayed_frames: 0,
            duration: Duration::ZERO,
            report,
            failure,
        })
    }

    /// Synthetic acquisition: fill one slot per frame with a ramp pattern
    fn produce(&self, buffer: &FrameBuffer, halt: &AtomicBool) -> ProducerStats {
        let acquisition = &self.config.relay.acquisition;
        let shape = [acquisition.height, acquisition.width];
        let interval = Duration::from_millis(acquisition.interval_ms);
        let mut stats = ProducerStats::default();

        for t in 0..acquisition.frames {
            if halt.load(Ordering::Acquire) {
                debug!(t, "Producer halted");
                break;
            }

            match buffer.acquire_slot(&shape, acquisition.dtype) {
                Ok(mut slot) => {
                    fill_pattern(slot.data_mut(), t);
                    let mut meta = Metadata::new();
                    meta.insert("t".into(), t.into());
                    match slot.finalize(meta) {
                        Ok(()) => stats.produced += 1,
                        Err(e) => {
                            warn!(error = %e, t, "Failed to publish frame");
                            stats.rejected += 1;
                        }
                    }
                }
                Err(e @ BufferError::BufferOverflow { .. }) => {
                    debug!(error = %e, t, "Buffer full, frame rejected");
                    stats.rejected += 1;
                    thread::yield_now();
                }
                Err(e) => {
                    warn!(error = %e, t, "Cannot acquire slot, stopping producer");
                    break;
                }
            }

            if !interval.is_zero() {
                thread::sleep(interval);
            }
        }

        stats
    }
}

/// Log the live counters of every consumer.
///
/// Returns the number of consumers that dropped frames so far.
fn log_progress(dispatcher: &FrameDispatcher, submitted: u64) -> usize {
    let mut lagging = 0;
    for (name, snapshot) in dispatcher.metrics() {
        if snapshot.dropped > 0 {
            lagging += 1;
        }
        info!(
            consumer = %name,
            frames = submitted,
            processed = snapshot.processed,
            dropped = snapshot.dropped,
            errors = snapshot.errors,
            disconnected = snapshot.disconnected,
            "Consumer progress"
        );
    }
    lagging
}

/// Deterministic per-frame pixel pattern
fn fill_pattern(data: &mut [u8], t: u64) {
    let offset = t as u8;
    for (i, byte) in data.iter_mut().enumerate() {
        *byte = (i as u8).wrapping_add(offset);
    }
}

/// Build the consumer for one config entry, plus the relay monitor if any
fn build_consumer(config: &ConsumerConfig) -> Result<(ConsumerSpec, Option<JoinHandle<u64>>)> {
    let mut monitor = None;
    let mut consumer: Box<dyn FrameConsumer> = match config.kind {
        ConsumerKind::Log => Box::new(LogConsumer::new(&config.name)),
        ConsumerKind::Null => Box::new(NullConsumer),
        ConsumerKind::Relay => {
            let relay = SignalRelay::default();
            monitor = Some(spawn_relay_monitor(&config.name, relay.subscribe())?);
            Box::new(relay)
        }
    };

    if config.delay_ms > 0 || config.fail_every.is_some() {
        debug!(
            consumer = %config.name,
            delay_ms = config.delay_ms,
            fail_every = ?config.fail_every,
            "Fault injection enabled"
        );
        consumer = Box::new(FaultInjector::new(
            &config.name,
            consumer,
            config.delay_ms,
            config.fail_every,
        ));
    }

    let spec = ConsumerSpec {
        name: config.name.clone(),
        consumer,
        critical: config.critical,
    };
    Ok((spec, monitor))
}

/// Passive subscriber counting relayed frames until the run finishes
fn spawn_relay_monitor(
    name: &str,
    mut rx: broadcast::Receiver<RelayEvent>,
) -> Result<JoinHandle<u64>> {
    let name = name.to_string();
    thread::Builder::new()
        .name(format!("relay-monitor-{name}"))
        .spawn(move || {
            let mut frames = 0u64;
            loop {
                match rx.blocking_recv() {
                    Ok(RelayEvent::Started { sequence, .. }) => {
                        debug!(relay = %name, uid = %sequence.uid, "Relay subscriber attached");
                    }
                    Ok(RelayEvent::Frame { .. }) => frames += 1,
                    Ok(RelayEvent::Finished { status, .. }) => {
                        info!(relay = %name, frames, status = %status, "Relay finished");
                        break;
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(relay = %name, skipped, "Relay subscriber lagged");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            frames
        })
        .context("Failed to spawn relay monitor")
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{AcquisitionConfig, BufferConfig, DType, RunPolicy};

    fn relay_config(frames: u64, consumers: Vec<ConsumerConfig>) -> RelayConfig {
        RelayConfig {
            version: Default::default(),
            buffer: BufferConfig {
                size_mb: 1,
                overwrite_on_overflow: true,
            },
            policy: RunPolicy::default(),
            acquisition: AcquisitionConfig {
                frames,
                width: 16,
                height: 16,
                dtype: DType::U8,
                interval_ms: 0,
            },
            consumers,
        }
    }

    fn consumer(name: &str, kind: ConsumerKind, critical: bool) -> ConsumerConfig {
        ConsumerConfig {
            name: name.to_string(),
            kind,
            critical,
            delay_ms: 0,
            fail_every: None,
        }
    }

    #[test]
    fn test_fill_pattern_wraps() {
        let mut data = [0u8; 4];
        fill_pattern(&mut data, 254);
        assert_eq!(data, [254, 255, 0, 1]);
    }

    #[test]
    fn test_run_delivers_all_frames() {
        let config = relay_config(
            20,
            vec![
                consumer("writer", ConsumerKind::Null, true),
                consumer("relay", ConsumerKind::Relay, false),
            ],
        );
        let pipeline = Pipeline::new(PipelineConfig {
            relay: config,
            timeout: None,
        });

        let stats = pipeline.run(&AtomicBool::new(false)).unwrap();
        assert_eq!(stats.report.status, RunStatus::Completed);
        assert_eq!(stats.frames_produced, 20);
        assert_eq!(stats.frames_submitted, 20);
        assert_eq!(stats.evicted, 0);

        let writer = stats.report.consumer("writer").unwrap();
        assert_eq!(writer.submitted, 20);
        assert_eq!(writer.processed, 20);
        assert_eq!(stats.relayed_frames, stats.report.consumer("relay").unwrap().processed);
    }

    #[test]
    fn test_stop_flag_cancels_run() {
        let mut config = relay_config(1_000, vec![consumer("writer", ConsumerKind::Null, true)]);
        config.acquisition.interval_ms = 5;
        let pipeline = Pipeline::new(PipelineConfig {
            relay: config,
            timeout: None,
        });

        let stats = pipeline.run(&AtomicBool::new(true)).unwrap();
        assert_eq!(stats.report.status, RunStatus::Canceled);
        assert!(stats.frames_produced < 1_000);
    }

    #[test]
    fn test_critical_failure_fails_run() {
        let mut flaky = consumer("writer", ConsumerKind::Null, true);
        flaky.fail_every = Some(2);
        let pipeline = Pipeline::new(PipelineConfig {
            relay: relay_config(10, vec![flaky]),
            timeout: None,
        });

        let stats = pipeline.run(&AtomicBool::new(false)).unwrap();
        assert_eq!(stats.report.status, RunStatus::Failed);
        assert!(stats.failure.unwrap().contains("writer"));
    }

    #[test]
    fn test_progress_counts_lagging_consumers() {
        let mut dispatcher = FrameDispatcher::new(
            RunPolicy::default()
                .with_backpressure(contracts::BackpressurePolicy::DropNewest)
                .with_queues(1, 1),
        );
        let (slow, _) = build_consumer(&ConsumerConfig {
            delay_ms: 50,
            ..consumer("viewer", ConsumerKind::Null, false)
        })
        .unwrap();
        dispatcher.add_consumer(slow).unwrap();
        let sequence = Sequence::new("progress").with_axis("t", 5);
        dispatcher.start(&sequence, &Metadata::new()).unwrap();

        assert_eq!(log_progress(&dispatcher, 0), 0);
        for t in 0..5 {
            dispatcher
                .submit(
                    contracts::Image::zeros(vec![2, 2], DType::U8),
                    FrameEvent::at([("t", t)]),
                    Metadata::new(),
                )
                .unwrap();
        }
        assert_eq!(log_progress(&dispatcher, 5), 1);
        dispatcher.close(&sequence, RunStatus::Completed).unwrap();
    }
}
