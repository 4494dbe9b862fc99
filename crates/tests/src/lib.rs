//! # Integration Tests
//!
//! 集成测试与端到端测试。
//!
//! 负责：
//! - 合约快照测试
//! - 环形缓冲区 -> 分发器端到端测试
//! - 配置驱动的运行测试

#[cfg(test)]
mod contract_tests {
    use contracts::{ConfigVersion, RunPolicy, RunStatus};

    #[test]
    fn test_contracts_compile() {
        // 验证 contracts crate 可编译
        let _ = ConfigVersion::V1;
    }

    #[test]
    fn test_policy_snapshot() {
        let json = serde_json::to_value(RunPolicy::default()).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "critical_error": "raise",
                "noncritical_error": "log",
                "backpressure": "drop_oldest",
                "critical_queue": 256,
                "observer_queue": 16,
            })
        );
        assert_eq!(RunStatus::Failed.to_string(), "failed");
    }
}

#[cfg(test)]
mod e2e_tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::{Duration, Instant};

    use contracts::{
        ContractError, DType, FrameConsumer, FrameEvent, Image, Metadata, RunPolicy, RunStatus,
        Sequence,
    };
    use dispatcher::{FrameDispatcher, LegacyAdapter, RelayEvent, SignalRelay};
    use frame_buffer::FrameBuffer;
    use parking_lot::Mutex;

    /// (t, first pixel byte) of every delivered frame
    type Seen = Arc<Mutex<Vec<(usize, u8)>>>;

    struct Recorder {
        seen: Seen,
        delay: Duration,
        finished: Arc<Mutex<Option<RunStatus>>>,
    }

    impl Recorder {
        fn new(delay: Duration) -> (Self, Seen, Arc<Mutex<Option<RunStatus>>>) {
            let seen = Seen::default();
            let finished = Arc::new(Mutex::new(None));
            (
                Self {
                    seen: Arc::clone(&seen),
                    delay,
                    finished: Arc::clone(&finished),
                },
                seen,
                finished,
            )
        }
    }

    impl FrameConsumer for Recorder {
        fn frame(
            &mut self,
            image: &Image,
            event: &FrameEvent,
            _meta: &Metadata,
        ) -> Result<(), ContractError> {
            if !self.delay.is_zero() {
                thread::sleep(self.delay);
            }
            let t = event.index.get("t").copied().unwrap_or_default();
            self.seen.lock().push((t, image.data[0]));
            Ok(())
        }

        fn finish(&mut self, _sequence: &Sequence, status: RunStatus) -> Result<(), ContractError> {
            *self.finished.lock() = Some(status);
            Ok(())
        }
    }

    /// Critical consumer that fails on one frame
    struct FailAt(usize);

    impl FrameConsumer for FailAt {
        fn frame(
            &mut self,
            _image: &Image,
            event: &FrameEvent,
            _meta: &Metadata,
        ) -> Result<(), ContractError> {
            match event.index.get("t") {
                Some(&t) if t == self.0 => Err(ContractError::consumer("fail-at", "boom")),
                _ => Ok(()),
            }
        }
    }

    /// Write `frames` 8x8 u8 frames into the buffer, each filled with `t`
    fn produce(buffer: &FrameBuffer, frames: usize, interval: Duration, halt: &AtomicBool) -> usize {
        let mut produced = 0;
        for t in 0..frames {
            if halt.load(Ordering::Acquire) {
                break;
            }
            let mut slot = buffer.acquire_slot(&[8, 8], DType::U8).unwrap();
            slot.data_mut().fill(t as u8);
            let mut meta = Metadata::new();
            meta.insert("t".into(), t.into());
            slot.finalize(meta).unwrap();
            produced += 1;
            if !interval.is_zero() {
                thread::sleep(interval);
            }
        }
        produced
    }

    /// Drain the buffer into the dispatcher until the producer is done.
    ///
    /// Returns the `t` of every submitted frame.
    fn drain(
        buffer: &FrameBuffer,
        dispatcher: &FrameDispatcher,
        done: &AtomicBool,
        halt: &AtomicBool,
    ) -> Vec<usize> {
        let mut submitted = Vec::new();
        loop {
            if dispatcher.should_cancel() {
                halt.store(true, Ordering::Release);
                break;
            }
            let finished = done.load(Ordering::Acquire);
            let Some(frame) = buffer.pop_next() else {
                if finished {
                    break;
                }
                thread::sleep(Duration::from_millis(1));
                continue;
            };
            let t = frame.metadata["t"].as_u64().unwrap() as usize;
            dispatcher
                .submit(frame.image, FrameEvent::at([("t", t)]), frame.metadata)
                .unwrap();
            submitted.push(t);
        }
        submitted
    }

    /// Producer thread -> FrameBuffer -> drain -> FrameDispatcher
    fn run_acquisition(
        buffer: &FrameBuffer,
        dispatcher: &FrameDispatcher,
        frames: usize,
        interval: Duration,
    ) -> (usize, Vec<usize>) {
        let done = AtomicBool::new(false);
        let halt = AtomicBool::new(false);
        thread::scope(|scope| {
            let producer = scope.spawn(|| {
                let produced = produce(buffer, frames, interval, &halt);
                done.store(true, Ordering::Release);
                produced
            });
            let submitted = drain(buffer, dispatcher, &done, &halt);
            halt.store(true, Ordering::Release);
            (producer.join().unwrap(), submitted)
        })
    }

    /// End-to-end test: producer -> FrameBuffer -> FrameDispatcher -> consumers
    ///
    /// 验证完整的数据流：
    /// 1. 生产者直接写入缓冲区槽位
    /// 2. 按发布顺序取出并提交到分发器
    /// 3. 关键 consumer 按序收到全部帧，慢速观察者不阻塞
    #[test]
    fn test_e2e_buffer_to_consumers() {
        let buffer = FrameBuffer::new(1024 * 1024, true).unwrap();
        let mut dispatcher = FrameDispatcher::new(RunPolicy::default().with_queues(256, 2));

        let (writer, writer_seen, writer_finished) = Recorder::new(Duration::ZERO);
        let (viewer, viewer_seen, _) = Recorder::new(Duration::from_millis(5));
        dispatcher.add("writer", writer, true).unwrap();
        dispatcher.add("viewer", viewer, false).unwrap();

        let sequence = Sequence::new("e2e").with_axis("t", 50);
        dispatcher.start(&sequence, &Metadata::new()).unwrap();

        let (produced, submitted) = run_acquisition(&buffer, &dispatcher, 50, Duration::ZERO);
        assert_eq!(produced, 50);
        assert_eq!(submitted, (0..50).collect::<Vec<_>>());
        assert_eq!(buffer.evicted_count(), 0);
        assert!(buffer.is_empty());

        let report = dispatcher.close(&sequence, RunStatus::Completed).unwrap();
        assert_eq!(report.status, RunStatus::Completed);

        // pixel content survived the ring intact and in order
        let seen = writer_seen.lock().clone();
        assert_eq!(seen, (0..50).map(|t| (t, t as u8)).collect::<Vec<_>>());
        assert_eq!(*writer_finished.lock(), Some(RunStatus::Completed));

        let viewer_report = report.consumer("viewer").unwrap();
        assert_eq!(viewer_report.submitted, 50);
        assert_eq!(viewer_report.processed + viewer_report.dropped, 50);
        assert!(viewer_report.dropped > 0);

        // whatever the observer saw is still in order
        let viewer_t: Vec<usize> = viewer_seen.lock().iter().map(|&(t, _)| t).collect();
        assert!(viewer_t.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_e2e_eviction_keeps_newest_in_order() {
        // room for a handful of 64-byte frames
        let buffer = FrameBuffer::new(64 * 4, true).unwrap();
        let mut dispatcher = FrameDispatcher::new(RunPolicy::default());
        let (writer, writer_seen, _) = Recorder::new(Duration::ZERO);
        dispatcher.add("writer", writer, true).unwrap();

        let sequence = Sequence::new("evict");
        dispatcher.start(&sequence, &Metadata::new()).unwrap();

        // fill the ring before draining anything
        let halt = AtomicBool::new(false);
        assert_eq!(produce(&buffer, 10, Duration::ZERO, &halt), 10);
        assert_eq!(buffer.len(), 4);
        assert_eq!(buffer.evicted_count(), 6);
        assert!(buffer.overflow_occurred());

        let done = AtomicBool::new(true);
        let submitted = drain(&buffer, &dispatcher, &done, &halt);
        assert_eq!(submitted, vec![6, 7, 8, 9]);

        let report = dispatcher.close(&sequence, RunStatus::Completed).unwrap();
        assert_eq!(report.consumer("writer").unwrap().processed, 4);
        let seen = writer_seen.lock().clone();
        assert_eq!(seen, vec![(6, 6), (7, 7), (8, 8), (9, 9)]);
    }

    #[test]
    fn test_e2e_cancel_stops_producer() {
        let buffer = FrameBuffer::new(1024 * 1024, true).unwrap();
        let policy = RunPolicy::default()
            .with_critical_error(contracts::CriticalErrorPolicy::Cancel);
        let mut dispatcher = FrameDispatcher::new(policy);
        dispatcher.add("writer", FailAt(3), true).unwrap();

        let sequence = Sequence::new("cancel");
        dispatcher.start(&sequence, &Metadata::new()).unwrap();

        let started = Instant::now();
        let (produced, submitted) =
            run_acquisition(&buffer, &dispatcher, 10_000, Duration::from_millis(1));
        assert!(dispatcher.should_cancel());
        assert!(produced < 10_000);
        assert!(submitted.len() < 10_000);
        assert!(started.elapsed() < Duration::from_secs(10));

        let report = dispatcher.close(&sequence, RunStatus::Canceled).unwrap();
        assert_eq!(report.status, RunStatus::Canceled);
        let writer = report.consumer("writer").unwrap();
        assert_eq!(writer.errors.len(), 1);
        assert_eq!(writer.errors[0].frame, Some(3));
    }

    #[test]
    fn test_e2e_raise_fails_close() {
        let buffer = FrameBuffer::new(1024 * 1024, true).unwrap();
        let mut dispatcher = FrameDispatcher::new(RunPolicy::default());
        let (observer, _, observer_finished) = Recorder::new(Duration::ZERO);
        dispatcher.add("writer", FailAt(2), true).unwrap();
        dispatcher.add("observer", observer, false).unwrap();

        let sequence = Sequence::new("raise");
        dispatcher.start(&sequence, &Metadata::new()).unwrap();
        let (_, submitted) = run_acquisition(&buffer, &dispatcher, 5, Duration::ZERO);
        assert_eq!(submitted.len(), 5);

        let err = dispatcher
            .close(&sequence, RunStatus::Completed)
            .unwrap_err();
        assert_eq!(err.consumer(), Some("writer"));
        let report = err.report().unwrap();
        assert_eq!(report.status, RunStatus::Failed);
        assert_eq!(report.consumer("writer").unwrap().processed, 5);
        // finish still ran for the healthy consumer
        assert_eq!(*observer_finished.lock(), Some(RunStatus::Completed));
    }

    #[test]
    fn test_e2e_legacy_adapter() {
        let buffer = FrameBuffer::new(1024 * 1024, true).unwrap();
        let mut dispatcher = FrameDispatcher::new(RunPolicy::default());

        let bytes = Arc::new(Mutex::new(0usize));
        let finished = Arc::new(Mutex::new(None));
        let adapter = {
            let bytes = Arc::clone(&bytes);
            let finished = Arc::clone(&finished);
            LegacyAdapter::new()
                .on_frame_image(move |image| {
                    *bytes.lock() += image.nbytes();
                    Ok(())
                })
                .on_sequence_finished(move |_, status| {
                    *finished.lock() = Some(status);
                    Ok(())
                })
        };
        assert_eq!(adapter.frame_arity(), Some(1));
        dispatcher.add("legacy", adapter, false).unwrap();

        let sequence = Sequence::new("legacy");
        dispatcher.start(&sequence, &Metadata::new()).unwrap();
        run_acquisition(&buffer, &dispatcher, 8, Duration::ZERO);
        let report = dispatcher.close(&sequence, RunStatus::Completed).unwrap();

        let legacy = report.consumer("legacy").unwrap();
        assert_eq!(*bytes.lock(), legacy.processed as usize * 64);
        assert_eq!(*finished.lock(), Some(RunStatus::Completed));
    }

    #[tokio::test]
    async fn test_e2e_relay_subscriber() {
        let relay = SignalRelay::new(128);
        let mut rx = relay.subscribe();

        let run = tokio::task::spawn_blocking(move || {
            let buffer = FrameBuffer::new(1024 * 1024, true).unwrap();
            let mut dispatcher = FrameDispatcher::new(RunPolicy::default());
            dispatcher.add("relay", relay, false).unwrap();
            let sequence = Sequence::new("relay");
            dispatcher.start(&sequence, &Metadata::new()).unwrap();
            run_acquisition(&buffer, &dispatcher, 20, Duration::ZERO);
            dispatcher.close(&sequence, RunStatus::Completed).unwrap()
        });

        let mut frames = Vec::new();
        loop {
            match rx.recv().await.unwrap() {
                RelayEvent::Started { sequence, .. } => assert_eq!(sequence.uid, "relay"),
                RelayEvent::Frame { event, image, .. } => {
                    let t = event.index["t"];
                    assert_eq!(image.data[0], t as u8);
                    frames.push(t);
                }
                RelayEvent::Finished { status, .. } => {
                    assert_eq!(status, RunStatus::Completed);
                    break;
                }
            }
        }

        let report = run.await.unwrap();
        let relay_report = report.consumer("relay").unwrap();
        assert_eq!(frames.len() as u64, relay_report.processed);
        assert!(frames.windows(2).all(|w| w[0] < w[1]));
    }
}

#[cfg(test)]
mod config_tests {
    use config_loader::{ConfigFormat, ConfigLoader};
    use contracts::{BackpressurePolicy, ConsumerKind, CriticalErrorPolicy, DType};
    use dispatcher::{FrameDispatcher, NullConsumer};
    use frame_buffer::FrameBuffer;

    const CONFIG: &str = r#"
[buffer]
size_mb = 4
overwrite_on_overflow = false

[policy]
critical_error = "cancel"
backpressure = "drop_newest"
observer_queue = 4

[acquisition]
frames = 100
width = 256
height = 256
dtype = "u16"

[[consumers]]
name = "writer"
kind = "null"
critical = true

[[consumers]]
name = "viewer"
kind = "relay"
"#;

    #[test]
    fn test_config_builds_components() {
        let config = ConfigLoader::load_from_str(CONFIG, ConfigFormat::Toml).unwrap();
        assert_eq!(config.policy.critical_error, CriticalErrorPolicy::Cancel);
        assert_eq!(config.policy.backpressure, BackpressurePolicy::DropNewest);
        assert_eq!(config.consumers[1].kind, ConsumerKind::Relay);

        let buffer = FrameBuffer::from_config(&config.buffer).unwrap();
        assert_eq!(buffer.size_bytes(), 4 * 1024 * 1024);
        assert!(!buffer.overwrite_on_overflow());

        // 256x256 u16 = 128 KiB, so 32 frames fit
        for _ in 0..32 {
            let slot = buffer.acquire_slot(&[256, 256], DType::U16).unwrap();
            slot.finalize(Default::default()).unwrap();
        }
        assert!(buffer.acquire_slot(&[256, 256], DType::U16).is_err());
        assert!(buffer.overflow_occurred());

        let mut dispatcher = FrameDispatcher::new(config.policy);
        for consumer in &config.consumers {
            dispatcher
                .add(consumer.name.clone(), NullConsumer, consumer.critical)
                .unwrap();
        }
        let names: Vec<&str> = dispatcher.consumer_names().collect();
        assert_eq!(names, vec!["writer", "viewer"]);
    }

    #[test]
    fn test_config_rejects_frame_larger_than_buffer() {
        let toml = r#"
[buffer]
size_mb = 1

[acquisition]
frames = 1
width = 2048
height = 2048
"#;
        assert!(ConfigLoader::load_from_str(toml, ConfigFormat::Toml).is_err());
    }

    #[test]
    fn test_sample_config_is_valid() {
        let config =
            ConfigLoader::load_from_str(include_str!("../../../relay.toml"), ConfigFormat::Toml)
                .unwrap();
        assert_eq!(config.consumers.len(), 3);
        assert!(config.consumers.iter().any(|c| c.critical));
    }
}
