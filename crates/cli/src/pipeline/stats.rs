//! Pipeline statistics.

use std::time::Duration;

use contracts::RunReport;
use observability::{ReportSummary, StatsSummary};

/// Statistics from a pipeline run
#[derive(Debug, Clone)]
pub struct PipelineStats {
    /// Frames published into the ring buffer
    pub frames_produced: u64,

    /// Frames the producer could not place (buffer full without overwrite)
    pub frames_rejected: u64,

    /// Frames drained from the buffer and submitted to the dispatcher
    pub frames_submitted: u64,

    /// Submissions refused with a full queue under the `fail` policy
    pub submit_rejected: u64,

    /// Time spent in `FrameDispatcher::submit`, in microseconds
    pub submit_latency_us: StatsSummary,

    /// Unread frames overwritten by the producer
    pub evicted: u64,

    /// Whether the buffer ever ran out of space
    pub overflow_occurred: bool,

    /// Frames received by relay subscribers
    pub relayed_frames: u64,

    /// Total duration of the pipeline run
    pub duration: Duration,

    /// Final dispatcher report
    pub report: RunReport,

    /// Failure reason when a critical consumer failed the run
    pub failure: Option<String>,
}

impl PipelineStats {
    /// Calculate submitted frames per second
    pub fn fps(&self) -> f64 {
        if self.duration.as_secs_f64() > 0.0 {
            self.frames_submitted as f64 / self.duration.as_secs_f64()
        } else {
            0.0
        }
    }

    /// Percentage of produced frames lost to eviction
    pub fn eviction_rate(&self) -> f64 {
        if self.frames_produced > 0 {
            (self.evicted as f64 / self.frames_produced as f64) * 100.0
        } else {
            0.0
        }
    }

    /// Print detailed summary
    pub fn print_summary(&self) {
        println!("\n╔══════════════════════════════════════════════════════════════╗");
        println!("║                    Pipeline Statistics                       ║");
        println!("╚══════════════════════════════════════════════════════════════╝\n");

        println!("📊 Overview");
        println!("   ├─ Status: {}", self.report.status);
        println!("   ├─ Duration: {:.2}s", self.duration.as_secs_f64());
        println!("   ├─ Frames produced: {}", self.frames_produced);
        println!("   ├─ Frames submitted: {}", self.frames_submitted);
        println!("   ├─ FPS: {:.2}", self.fps());
        println!("   ├─ Submit latency (µs): {}", self.submit_latency_us);
        println!("   └─ Relayed frames: {}", self.relayed_frames);

        println!("\n🧱 Frame Buffer");
        println!(
            "   ├─ Evicted: {} ({:.2}%)",
            self.evicted,
            self.eviction_rate()
        );
        println!("   ├─ Rejected: {}", self.frames_rejected);
        println!("   └─ Overflow occurred: {}", self.overflow_occurred);

        let summary = ReportSummary::from_report(&self.report);
        println!("\n📤 Consumers ({}, {} disconnected)", summary.consumers, summary.disconnected);
        for (i, consumer) in self.report.consumers.iter().enumerate() {
            let is_last = i == self.report.consumers.len() - 1;
            let prefix = if is_last { "└─" } else { "├─" };
            println!(
                "   {} {}{}: submitted={}, processed={}, dropped={}, errors={}{}",
                prefix,
                consumer.name,
                if consumer.critical { " [critical]" } else { "" },
                consumer.submitted,
                consumer.processed,
                consumer.dropped,
                consumer.errors.len(),
                if consumer.disconnected { " (disconnected)" } else { "" }
            );
        }
        println!(
            "   Dropped by backpressure: {} ({:.2}%)",
            summary.total_dropped, summary.drop_rate
        );

        if self.submit_rejected > 0 {
            println!("   Rejected on full queue: {}", self.submit_rejected);
        }

        if let Some(ref failure) = self.failure {
            println!("\n⚠️  Failure");
            println!("   └─ {}", failure);
        }

        println!();
    }
}
