//! ConsumerHandle - one consumer with an isolated queue and worker thread

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use async_channel::{Receiver, Sender, TrySendError};
use tracing::{debug, error, instrument, warn};

use contracts::{
    BackpressurePolicy, CapturedError, ContractError, CriticalErrorPolicy, ErrorPhase,
    FrameConsumer, FramePacket, NoncriticalErrorPolicy, RunPolicy,
};

use crate::error::DispatcherError;
use crate::metrics::ConsumerMetrics;

/// Everything a worker needs besides the consumer and its queue
#[derive(Clone)]
pub(crate) struct WorkerContext {
    pub name: String,
    pub critical: bool,
    pub policy: RunPolicy,
    pub metrics: Arc<ConsumerMetrics>,
    /// Dispatcher-wide cancel request
    pub cancel: Arc<AtomicBool>,
}

/// What to do after a consumer error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ErrorAction {
    KeepGoing,
    Disconnect,
}

impl WorkerContext {
    /// Record a consumer error and apply the run policy to it
    pub fn handle_error(
        &self,
        phase: ErrorPhase,
        frame: Option<u64>,
        error: ContractError,
    ) -> ErrorAction {
        self.metrics
            .record_error(CapturedError::new(phase, error.to_string(), frame));

        if self.critical {
            match self.policy.critical_error {
                CriticalErrorPolicy::Raise => {
                    error!(consumer = %self.name, ?phase, frame, error = %error, "Critical consumer failed");
                    self.metrics.defer(error);
                }
                CriticalErrorPolicy::Cancel => {
                    error!(consumer = %self.name, ?phase, frame, error = %error, "Critical consumer failed, requesting cancel");
                    self.cancel.store(true, Ordering::Release);
                }
                CriticalErrorPolicy::Continue => {
                    warn!(consumer = %self.name, ?phase, frame, error = %error, "Critical consumer failed, continuing");
                }
            }
            return ErrorAction::KeepGoing;
        }

        match self.policy.noncritical_error {
            NoncriticalErrorPolicy::Log => {
                warn!(consumer = %self.name, ?phase, frame, error = %error, "Consumer failed");
                ErrorAction::KeepGoing
            }
            NoncriticalErrorPolicy::Disconnect => {
                warn!(consumer = %self.name, ?phase, frame, error = %error, "Consumer failed, disconnecting");
                self.metrics.mark_disconnected();
                observability::record_consumer_disconnected(&self.name);
                ErrorAction::Disconnect
            }
        }
    }
}

/// Handle to a running consumer worker
pub(crate) struct ConsumerHandle {
    name: String,
    capacity: usize,
    backpressure: BackpressurePolicy,
    /// Channel to send frames to the worker
    tx: Sender<Arc<FramePacket>>,
    /// Dispatcher-side receiver, used to evict the queue head
    rx: Receiver<Arc<FramePacket>>,
    metrics: Arc<ConsumerMetrics>,
    worker: JoinHandle<Box<dyn FrameConsumer>>,
}

impl ConsumerHandle {
    /// Create a queue for the consumer and spawn its worker thread
    pub fn spawn(
        consumer: Box<dyn FrameConsumer>,
        ctx: WorkerContext,
    ) -> Result<Self, DispatcherError> {
        let capacity = ctx.policy.queue_capacity(ctx.critical).max(1);
        let (tx, rx) = async_channel::bounded(capacity);

        let name = ctx.name.clone();
        let backpressure = ctx.policy.backpressure;
        let metrics = Arc::clone(&ctx.metrics);
        let worker_rx = rx.clone();

        let worker = thread::Builder::new()
            .name(format!("consumer-{name}"))
            .spawn(move || consumer_worker(consumer, worker_rx, ctx))
            .map_err(|source| DispatcherError::WorkerSpawn {
                consumer: name.clone(),
                source,
            })?;

        Ok(Self {
            name,
            capacity,
            backpressure,
            tx,
            rx,
            metrics,
            worker,
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Frames waiting in the queue
    pub fn pending(&self) -> usize {
        self.tx.len()
    }

    pub fn is_disconnected(&self) -> bool {
        self.metrics.is_disconnected()
    }

    /// Offer a frame to the consumer, applying backpressure if its queue is full.
    ///
    /// Never blocks. Disconnected consumers are skipped without counting.
    pub fn submit(&self, packet: &Arc<FramePacket>) -> Result<(), DispatcherError> {
        if self.is_disconnected() {
            return Ok(());
        }
        self.metrics.inc_submitted();
        observability::record_frame_submitted(&self.name);

        let mut packet = Arc::clone(packet);
        loop {
            match self.tx.try_send(packet) {
                Ok(()) => break,
                Err(TrySendError::Full(p)) => match self.backpressure {
                    BackpressurePolicy::Fail => {
                        warn!(consumer = %self.name, seq = p.seq, "Queue full");
                        return Err(DispatcherError::queue_full(&self.name, self.capacity));
                    }
                    BackpressurePolicy::DropNewest => {
                        self.metrics.inc_dropped();
                        observability::record_frame_dropped(&self.name, "drop_newest");
                        warn!(consumer = %self.name, seq = p.seq, "Queue full, newest frame dropped");
                        break;
                    }
                    BackpressurePolicy::DropOldest => {
                        // the worker may have taken the head meanwhile
                        if let Ok(old) = self.rx.try_recv() {
                            self.metrics.inc_dropped();
                            observability::record_frame_dropped(&self.name, "drop_oldest");
                            warn!(consumer = %self.name, seq = old.seq, "Queue full, oldest frame dropped");
                        }
                        packet = p;
                    }
                },
                Err(TrySendError::Closed(p)) => {
                    // disconnected between the check above and the send
                    debug!(consumer = %self.name, seq = p.seq, "Consumer queue closed");
                    break;
                }
            }
        }

        observability::record_queue_depth(&self.name, self.tx.len());
        Ok(())
    }

    /// Stop accepting frames; the worker drains what is queued, then exits
    pub fn close(&self) {
        self.tx.close();
    }

    /// Wait for the worker to drain its queue and exit.
    ///
    /// Returns the consumer, or `None` if the worker panicked.
    #[instrument(name = "consumer_handle_join", skip(self), fields(consumer = %self.name))]
    pub fn join(self) -> Option<Box<dyn FrameConsumer>> {
        self.tx.close();
        match self.worker.join() {
            Ok(consumer) => {
                debug!(consumer = %self.name, "ConsumerHandle join complete");
                Some(consumer)
            }
            Err(e) => {
                error!(consumer = %self.name, error = ?e, "Worker thread panicked");
                None
            }
        }
    }
}

/// Worker loop: deliver queued frames in order until the queue is closed and empty
#[instrument(
    name = "consumer_worker_loop",
    skip(consumer, rx, ctx),
    fields(consumer = %ctx.name, critical = ctx.critical)
)]
fn consumer_worker(
    mut consumer: Box<dyn FrameConsumer>,
    rx: Receiver<Arc<FramePacket>>,
    ctx: WorkerContext,
) -> Box<dyn FrameConsumer> {
    debug!(consumer = %ctx.name, "Consumer worker started");

    while let Ok(packet) = rx.recv_blocking() {
        observability::record_queue_depth(&ctx.name, rx.len());

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            consumer.frame(&packet.image, &packet.event, &packet.meta)
        }));
        ctx.metrics.inc_processed();
        observability::record_frame_processed(&ctx.name, matches!(outcome, Ok(Ok(()))));

        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                if ctx.handle_error(ErrorPhase::Frame, Some(packet.seq), e) == ErrorAction::Disconnect {
                    discard_queue(&rx, &ctx.name);
                    break;
                }
            }
            Err(payload) => {
                let message = format!("panicked: {}", panic_message(payload.as_ref()));
                let error = ContractError::consumer(&ctx.name, message);
                ctx.handle_error(ErrorPhase::Frame, Some(packet.seq), error);
                // a consumer that panicked is never fed again, whatever the policy
                if !ctx.metrics.is_disconnected() {
                    ctx.metrics.mark_disconnected();
                    observability::record_consumer_disconnected(&ctx.name);
                }
                discard_queue(&rx, &ctx.name);
                break;
            }
        }
    }

    debug!(consumer = %ctx.name, "Consumer worker stopped");
    consumer
}

/// Close the queue and throw away whatever is still in it
fn discard_queue(rx: &Receiver<Arc<FramePacket>>, name: &str) {
    rx.close();
    let mut discarded = 0usize;
    while rx.try_recv().is_ok() {
        discarded += 1;
    }
    debug!(consumer = %name, discarded, "Consumer disconnected, queue discarded");
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}
