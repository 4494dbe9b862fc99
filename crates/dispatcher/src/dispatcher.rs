//! FrameDispatcher - fan-out of one frame stream to many consumers

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, instrument, warn};

use contracts::{
    CapturedError, ConsumerSpec, ContractError, CriticalErrorPolicy, ErrorPhase, FrameConsumer, FrameEvent, FramePacket, Image,
    Metadata, RunPolicy, RunReport, RunStatus, Sequence,
};

use crate::error::DispatcherError;
use crate::handle::{ConsumerHandle, ErrorAction, WorkerContext};
use crate::metrics::{ConsumerMetrics, MetricsSnapshot};

/// Lifecycle of one run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatcherState {
    Idle,
    Started,
    Running,
    Closing,
    Closed,
}

impl fmt::Display for DispatcherState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DispatcherState::Idle => "idle",
            DispatcherState::Started => "started",
            DispatcherState::Running => "running",
            DispatcherState::Closing => "closing",
            DispatcherState::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Pending frames and capacity of one consumer queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueStatus {
    pub pending: usize,
    pub capacity: usize,
}

/// Where a registered consumer currently lives
enum Slot {
    /// Registered, not started
    Idle(Box<dyn FrameConsumer>),
    /// Owned by its worker thread
    Running(ConsumerHandle),
    /// Back on the control thread (setup-disconnected or joined)
    Parked(Box<dyn FrameConsumer>),
    /// Lost to a worker panic
    Gone,
}

struct Registration {
    name: String,
    critical: bool,
    metrics: Arc<ConsumerMetrics>,
    slot: Slot,
}

impl Registration {
    fn context(&self, policy: RunPolicy, cancel: &Arc<AtomicBool>) -> WorkerContext {
        WorkerContext {
            name: self.name.clone(),
            critical: self.critical,
            policy,
            metrics: Arc::clone(&self.metrics),
            cancel: Arc::clone(cancel),
        }
    }
}

/// Fans frames out to registered consumers.
///
/// Each consumer gets its own bounded queue and worker thread, so a slow or
/// failing consumer never stalls the others. Lifecycle:
/// `add_consumer`* -> `start` -> `submit`* -> `close`.
pub struct FrameDispatcher {
    policy: RunPolicy,
    state: DispatcherState,
    consumers: Vec<Registration>,
    cancel: Arc<AtomicBool>,
    next_seq: AtomicU64,
    started_at: Option<DateTime<Utc>>,
}

impl FrameDispatcher {
    pub fn new(policy: RunPolicy) -> Self {
        Self {
            policy,
            state: DispatcherState::Idle,
            consumers: Vec::new(),
            cancel: Arc::new(AtomicBool::new(false)),
            next_seq: AtomicU64::new(0),
            started_at: None,
        }
    }

    pub fn policy(&self) -> &RunPolicy {
        &self.policy
    }

    pub fn state(&self) -> DispatcherState {
        self.state
    }

    /// Registered consumer names, in registration order
    pub fn consumer_names(&self) -> impl Iterator<Item = &str> {
        self.consumers.iter().map(|c| c.name.as_str())
    }

    /// Register a consumer. Only valid before `start`.
    pub fn add_consumer(&mut self, spec: ConsumerSpec) -> Result<(), DispatcherError> {
        if self.state != DispatcherState::Idle {
            return Err(DispatcherError::invalid_state("add consumer", self.state));
        }
        if self.consumers.iter().any(|c| c.name == spec.name) {
            return Err(DispatcherError::DuplicateConsumer { name: spec.name });
        }

        debug!(consumer = %spec.name, critical = spec.critical, "Consumer registered");
        self.consumers.push(Registration {
            name: spec.name,
            critical: spec.critical,
            metrics: Arc::new(ConsumerMetrics::new()),
            slot: Slot::Idle(spec.consumer),
        });
        Ok(())
    }

    /// Register a consumer by parts
    pub fn add(
        &mut self,
        name: impl Into<String>,
        consumer: impl FrameConsumer + 'static,
        critical: bool,
    ) -> Result<(), DispatcherError> {
        self.add_consumer(ConsumerSpec::new(name, consumer, critical))
    }

    /// Set up every consumer in registration order, then spawn the workers.
    ///
    /// A critical setup failure under the `raise` policy aborts the run and
    /// leaves the dispatcher closed.
    #[instrument(
        name = "dispatcher_start",
        skip(self, sequence, meta),
        fields(uid = %sequence.uid, consumers = self.consumers.len())
    )]
    pub fn start(&mut self, sequence: &Sequence, meta: &Metadata) -> Result<(), DispatcherError> {
        if self.state != DispatcherState::Idle {
            return Err(DispatcherError::invalid_state("start", self.state));
        }
        self.state = DispatcherState::Started;
        self.started_at = Some(Utc::now());

        for i in 0..self.consumers.len() {
            if let Err(e) = self.setup_one(i, sequence, meta) {
                self.abort();
                return Err(e);
            }
        }

        for i in 0..self.consumers.len() {
            if let Err(e) = self.spawn_one(i) {
                self.abort();
                return Err(e);
            }
        }

        self.state = DispatcherState::Running;
        info!(
            consumers = self.consumers.len(),
            connected = self.connected_count(),
            "Dispatcher started"
        );
        Ok(())
    }

    fn setup_one(
        &mut self,
        index: usize,
        sequence: &Sequence,
        meta: &Metadata,
    ) -> Result<(), DispatcherError> {
        let ctx = self.consumers[index].context(self.policy, &self.cancel);
        let reg = &mut self.consumers[index];
        let Slot::Idle(consumer) = &mut reg.slot else {
            return Ok(());
        };
        let Err(e) = consumer.setup(sequence, meta) else {
            return Ok(());
        };

        if reg.critical && self.policy.critical_error == CriticalErrorPolicy::Raise {
            error!(consumer = %reg.name, error = %e, "Critical consumer setup failed");
            reg.metrics.record_error(CapturedError::new(
                ErrorPhase::Setup,
                e.to_string(),
                None,
            ));
            return Err(DispatcherError::ConsumerSetup {
                consumer: reg.name.clone(),
                source: e,
            });
        }

        if ctx.handle_error(ErrorPhase::Setup, None, e) == ErrorAction::Disconnect {
            let slot = std::mem::replace(&mut reg.slot, Slot::Gone);
            if let Slot::Idle(consumer) = slot {
                reg.slot = Slot::Parked(consumer);
            }
        }
        Ok(())
    }

    fn spawn_one(&mut self, index: usize) -> Result<(), DispatcherError> {
        let ctx = self.consumers[index].context(self.policy, &self.cancel);
        let reg = &mut self.consumers[index];
        if !matches!(reg.slot, Slot::Idle(_)) {
            return Ok(());
        }
        let Slot::Idle(consumer) = std::mem::replace(&mut reg.slot, Slot::Gone) else {
            return Ok(());
        };
        match ConsumerHandle::spawn(consumer, ctx) {
            Ok(handle) => {
                reg.slot = Slot::Running(handle);
                Ok(())
            }
            Err(e) => {
                error!(consumer = %reg.name, error = %e, "Failed to spawn consumer worker");
                Err(e)
            }
        }
    }

    /// Tear down after a failed start
    fn abort(&mut self) {
        for reg in &mut self.consumers {
            if let Slot::Running(handle) = std::mem::replace(&mut reg.slot, Slot::Gone) {
                reg.slot = handle.join().map_or(Slot::Gone, Slot::Parked);
            }
        }
        self.state = DispatcherState::Closed;
        warn!("Dispatcher start aborted");
    }

    /// Offer one frame to every connected consumer.
    ///
    /// Never blocks. Under the `fail` backpressure policy a full queue
    /// returns `QueueFull` and the frame is not offered to the remaining
    /// consumers.
    pub fn submit(
        &self,
        image: Image,
        event: FrameEvent,
        meta: Metadata,
    ) -> Result<u64, DispatcherError> {
        if self.state != DispatcherState::Running {
            return Err(DispatcherError::invalid_state("submit", self.state));
        }
        let started = Instant::now();
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let packet = Arc::new(FramePacket {
            seq,
            image,
            event,
            meta,
        });

        for reg in &self.consumers {
            if let Slot::Running(handle) = &reg.slot {
                handle.submit(&packet)?;
            }
        }

        observability::record_submit_latency_us(started.elapsed().as_secs_f64() * 1e6);
        if seq > 0 && seq % 100 == 0 {
            debug!(frames = seq, "Dispatcher progress");
        }
        Ok(seq)
    }

    /// True once a critical consumer failed under the `cancel` policy
    pub fn should_cancel(&self) -> bool {
        self.cancel.load(Ordering::Acquire)
    }

    /// Queue status of every connected consumer
    pub fn queue_status(&self) -> BTreeMap<String, QueueStatus> {
        self.consumers
            .iter()
            .filter_map(|reg| match &reg.slot {
                Slot::Running(handle) if !handle.is_disconnected() => Some((
                    reg.name.clone(),
                    QueueStatus {
                        pending: handle.pending(),
                        capacity: handle.capacity(),
                    },
                )),
                _ => None,
            })
            .collect()
    }

    /// Current counters of every registered consumer
    pub fn metrics(&self) -> Vec<(String, MetricsSnapshot)> {
        self.consumers
            .iter()
            .map(|reg| (reg.name.clone(), reg.metrics.snapshot()))
            .collect()
    }

    fn connected_count(&self) -> usize {
        self.consumers
            .iter()
            .filter(|reg| !reg.metrics.is_disconnected())
            .count()
    }

    /// End the run.
    ///
    /// Closes every queue, waits for the workers to drain them and exit,
    /// then calls `finish` on each connected consumer in registration
    /// order. A critical failure deferred under the `raise` policy is
    /// returned as `ConsumerFailed` carrying the final report.
    #[instrument(name = "dispatcher_close", skip(self, sequence), fields(uid = %sequence.uid))]
    pub fn close(
        &mut self,
        sequence: &Sequence,
        status: RunStatus,
    ) -> Result<RunReport, DispatcherError> {
        let was_running = match self.state {
            DispatcherState::Running => true,
            DispatcherState::Idle => false,
            state => return Err(DispatcherError::invalid_state("close", state)),
        };
        self.state = DispatcherState::Closing;
        let started_at = self.started_at.unwrap_or_else(Utc::now);

        for reg in &self.consumers {
            if let Slot::Running(handle) = &reg.slot {
                handle.close();
            }
        }

        for reg in &mut self.consumers {
            if let Slot::Running(handle) = std::mem::replace(&mut reg.slot, Slot::Gone) {
                match handle.join() {
                    Some(consumer) => reg.slot = Slot::Parked(consumer),
                    None => {
                        let ctx = reg.context(self.policy, &self.cancel);
                        ctx.handle_error(
                            ErrorPhase::Frame,
                            None,
                            ContractError::consumer(&reg.name, "worker panicked"),
                        );
                        reg.metrics.mark_disconnected();
                    }
                }
            }
        }

        if was_running {
            for reg in &mut self.consumers {
                if reg.metrics.is_disconnected() {
                    continue;
                }
                let Slot::Parked(consumer) = &mut reg.slot else {
                    continue;
                };
                if let Err(e) = consumer.finish(sequence, status) {
                    reg.context(self.policy, &self.cancel)
                        .handle_error(ErrorPhase::Finish, None, e);
                }
            }
        }

        self.state = DispatcherState::Closed;

        let deferred = self
            .consumers
            .iter()
            .find_map(|reg| reg.metrics.take_deferred().map(|e| (reg.name.clone(), e)));

        let mut report = RunReport {
            status,
            started_at,
            finished_at: Utc::now(),
            consumers: self
                .consumers
                .iter()
                .map(|reg| reg.metrics.to_report(&reg.name, reg.critical))
                .collect(),
        };

        if let Some((consumer, source)) = deferred {
            report.status = RunStatus::Failed;
            self.log_report(&report);
            return Err(DispatcherError::ConsumerFailed {
                consumer,
                source,
                report: Box::new(report),
            });
        }

        self.log_report(&report);
        Ok(report)
    }

    fn log_report(&self, report: &RunReport) {
        let duration = report
            .duration()
            .to_std()
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);
        observability::record_run_finished(report.status, duration);
        info!(
            status = %report.status,
            submitted = report.total_submitted(),
            processed = report.total_processed(),
            dropped = report.total_dropped(),
            errors = report.total_errors(),
            "Dispatcher closed"
        );
    }
}

/// Dropping a running dispatcher closes every queue and waits for the
/// workers to drain them. `finish` is only called by [`FrameDispatcher::close`].
impl Drop for FrameDispatcher {
    fn drop(&mut self) {
        for reg in &self.consumers {
            if let Slot::Running(handle) = &reg.slot {
                handle.close();
            }
        }
        for reg in &mut self.consumers {
            if let Slot::Running(handle) = std::mem::replace(&mut reg.slot, Slot::Gone) {
                handle.join();
            }
        }
    }
}

impl fmt::Debug for FrameDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameDispatcher")
            .field("state", &self.state)
            .field("policy", &self.policy)
            .field("consumers", &self.consumers.iter().map(|c| &c.name).collect::<Vec<_>>())
            .finish()
    }
}
