//! 帧分发指标收集模块
//!
//! 记录环形缓冲区与分发器的运行指标，并基于 RunReport 生成摘要。

use contracts::{RunReport, RunStatus};
use metrics::{counter, gauge, histogram};

/// 记录帧提交到某个 consumer 队列
pub fn record_frame_submitted(consumer: &str) {
    counter!(
        "frame_relay_frames_submitted_total",
        "consumer" => consumer.to_string()
    )
    .increment(1);
}

/// 记录 consumer 处理完一帧
pub fn record_frame_processed(consumer: &str, success: bool) {
    let status = if success { "success" } else { "failure" };
    counter!(
        "frame_relay_frames_processed_total",
        "consumer" => consumer.to_string(),
        "status" => status
    )
    .increment(1);
}

/// 记录因背压丢弃的帧
///
/// `reason` 为 `"drop_newest"` 或 `"drop_oldest"`。
pub fn record_frame_dropped(consumer: &str, reason: &'static str) {
    counter!(
        "frame_relay_frames_dropped_total",
        "consumer" => consumer.to_string(),
        "reason" => reason
    )
    .increment(1);
}

/// 记录 consumer 队列深度
pub fn record_queue_depth(consumer: &str, depth: usize) {
    gauge!(
        "frame_relay_queue_depth",
        "consumer" => consumer.to_string()
    )
    .set(depth as f64);
}

/// 记录 consumer 被断开
pub fn record_consumer_disconnected(consumer: &str) {
    counter!(
        "frame_relay_consumers_disconnected_total",
        "consumer" => consumer.to_string()
    )
    .increment(1);
}

/// 记录缓冲区占用
pub fn record_buffer_usage(used_bytes: usize, size_bytes: usize) {
    gauge!("frame_relay_buffer_used_bytes").set(used_bytes as f64);
    if size_bytes > 0 {
        gauge!("frame_relay_buffer_fill_ratio").set(used_bytes as f64 / size_bytes as f64);
    }
}

/// 记录缓冲区驱逐（覆盖最旧未读帧）
pub fn record_buffer_evictions(count: u64) {
    counter!("frame_relay_buffer_evictions_total").increment(count);
}

/// 记录 submit 调用耗时
pub fn record_submit_latency_us(latency_us: f64) {
    histogram!("frame_relay_submit_latency_us").record(latency_us);
}

/// 记录一次运行结束
pub fn record_run_finished(status: RunStatus, duration_secs: f64) {
    counter!("frame_relay_runs_total", "status" => status.to_string()).increment(1);
    histogram!("frame_relay_run_duration_seconds").record(duration_secs);
}

/// 运行报告摘要
#[derive(Debug, Clone, Default)]
pub struct ReportSummary {
    pub status: RunStatus,
    pub duration_secs: f64,
    pub consumers: usize,
    pub disconnected: usize,
    pub total_submitted: u64,
    pub total_processed: u64,
    pub total_dropped: u64,
    pub total_errors: usize,
    pub drop_rate: f64,
}

impl ReportSummary {
    /// 从 RunReport 生成摘要
    pub fn from_report(report: &RunReport) -> Self {
        let total_submitted = report.total_submitted();
        let total_dropped = report.total_dropped();
        let duration_secs = report
            .duration()
            .to_std()
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);

        Self {
            status: report.status,
            duration_secs,
            consumers: report.consumers.len(),
            disconnected: report.consumers.iter().filter(|c| c.disconnected).count(),
            total_submitted,
            total_processed: report.total_processed(),
            total_dropped,
            total_errors: report.total_errors(),
            drop_rate: if total_submitted > 0 {
                total_dropped as f64 / total_submitted as f64 * 100.0
            } else {
                0.0
            },
        }
    }
}

impl std::fmt::Display for ReportSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "=== Run Summary ===")?;
        writeln!(f, "Status: {}", self.status)?;
        writeln!(f, "Duration: {:.3}s", self.duration_secs)?;
        writeln!(
            f,
            "Consumers: {} ({} disconnected)",
            self.consumers, self.disconnected
        )?;
        writeln!(f, "Submitted: {}", self.total_submitted)?;
        writeln!(f, "Processed: {}", self.total_processed)?;
        writeln!(
            f,
            "Dropped: {} ({:.2}%)",
            self.total_dropped, self.drop_rate
        )?;
        writeln!(f, "Errors: {}", self.total_errors)?;
        Ok(())
    }
}

/// 统计摘要
#[derive(Debug, Clone, Default)]
pub struct StatsSummary {
    pub count: u64,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub std_dev: f64,
}

impl From<&RunningStats> for StatsSummary {
    fn from(stats: &RunningStats) -> Self {
        Self {
            count: stats.count,
            min: stats.min,
            max: stats.max,
            mean: stats.mean(),
            std_dev: stats.std_dev(),
        }
    }
}

impl std::fmt::Display for StatsSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.count == 0 {
            write!(f, "N/A")
        } else {
            write!(
                f,
                "min={:.3}, max={:.3}, mean={:.3}, std={:.3} (n={})",
                self.min, self.max, self.mean, self.std_dev, self.count
            )
        }
    }
}

/// 在线统计计算器 (Welford's algorithm)
#[derive(Debug, Clone, Default)]
pub struct RunningStats {
    count: u64,
    mean: f64,
    m2: f64,
    min: f64,
    max: f64,
}

impl RunningStats {
    /// 添加新值
    pub fn push(&mut self, value: f64) {
        self.count += 1;

        if self.count == 1 {
            self.min = value;
            self.max = value;
            self.mean = value;
            self.m2 = 0.0;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);

            let delta = value - self.mean;
            self.mean += delta / self.count as f64;
            let delta2 = value - self.mean;
            self.m2 += delta * delta2;
        }
    }

    /// 样本数量
    pub fn count(&self) -> u64 {
        self.count
    }

    /// 均值
    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.mean
        }
    }

    /// 方差
    pub fn variance(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            self.m2 / (self.count - 1) as f64
        }
    }

    /// 标准差
    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }

    /// 最小值
    pub fn min(&self) -> f64 {
        self.min
    }

    /// 最大值
    pub fn max(&self) -> f64 {
        self.max
    }
}
