use std::collections::BTreeMap;
use std::time::Instant;

/// Observer for control-loop events.
///
/// Decouples the live loop from where its telemetry goes (log lines, a
/// summary on exit, nothing at all in tests).
pub trait PipelineLogger: Send {
    /// Frames emitted so far; `total` is 0 for live sources.
    fn progress(&mut self, emitted: usize, total: usize);

    /// How long a named stage took for one tick.
    fn timing(&mut self, stage: &str, duration_ms: f64);

    /// A point-in-time metric (queue depth, faces in the current cycle).
    fn metric(&mut self, name: &str, value: f64);

    fn info(&mut self, message: &str);

    /// End-of-run report. Default: no-op.
    fn summary(&self) {}
}

/// Discards every event.
pub struct NullPipelineLogger;

impl PipelineLogger for NullPipelineLogger {
    fn progress(&mut self, _emitted: usize, _total: usize) {}
    fn timing(&mut self, _stage: &str, _duration_ms: f64) {}
    fn metric(&mut self, _name: &str, _value: f64) {}
    fn info(&mut self, _message: &str) {}
}

/// Running aggregate of one timing stage or metric.
///
/// Live sessions run for hours, so samples are folded in rather than kept.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Stat {
    pub count: usize,
    pub sum: f64,
    pub max: f64,
}

impl Stat {
    fn record(&mut self, value: f64) {
        if self.count == 0 || value > self.max {
            self.max = value;
        }
        self.count += 1;
        self.sum += value;
    }

    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / self.count as f64
        }
    }
}

/// Logs throttled progress through `log` and prints a per-stage summary
/// with output throughput at the end of the run.
pub struct StdoutPipelineLogger {
    throttle_frames: usize,
    timings: BTreeMap<String, Stat>,
    metrics: BTreeMap<String, Stat>,
    start_time: Instant,
    emitted: usize,
    messages: Vec<String>,
}

impl StdoutPipelineLogger {
    pub fn new(throttle_frames: usize) -> Self {
        Self {
            throttle_frames: throttle_frames.max(1),
            timings: BTreeMap::new(),
            metrics: BTreeMap::new(),
            start_time: Instant::now(),
            emitted: 0,
            messages: Vec::new(),
        }
    }

    /// Returns the formatted summary, or `None` if nothing was recorded.
    pub fn summary_string(&self) -> Option<String> {
        if self.timings.is_empty() && self.metrics.is_empty() {
            return None;
        }

        let elapsed_ms = self.start_time.elapsed().as_secs_f64() * 1000.0;
        let mut lines = vec![format!(
            "Session summary ({} frames, {:.1}s):",
            self.emitted,
            elapsed_ms / 1000.0
        )];

        for (stage, stat) in &self.timings {
            lines.push(format!(
                "  {stage:10}: avg {:6.1}ms  max {:6.1}ms  total {:7.0}ms",
                stat.mean(),
                stat.max,
                stat.sum
            ));
        }
        for (name, stat) in &self.metrics {
            lines.push(format!("  {name}: avg {:.1}  max {:.0}", stat.mean(), stat.max));
        }

        if self.emitted > 0 && elapsed_ms > 0.0 {
            let fps = self.emitted as f64 / (elapsed_ms / 1000.0);
            lines.push(format!("  Output rate: {fps:.1} fps"));
        }

        Some(lines.join("\n"))
    }

    pub fn timing_stat(&self, stage: &str) -> Option<Stat> {
        self.timings.get(stage).copied()
    }

    pub fn metric_stat(&self, name: &str) -> Option<Stat> {
        self.metrics.get(name).copied()
    }
}

impl Default for StdoutPipelineLogger {
    fn default() -> Self {
        Self::new(100)
    }
}

impl PipelineLogger for StdoutPipelineLogger {
    fn progress(&mut self, emitted: usize, total: usize) {
        self.emitted = emitted;
        if emitted % self.throttle_frames != 0 && emitted != total {
            return;
        }
        if total > 0 {
            let pct = emitted as f64 / total as f64 * 100.0;
            log::info!("Processed {emitted}/{total} frames ({pct:.1}%)");
        } else {
            let secs = self.start_time.elapsed().as_secs_f64();
            let fps = if secs > 0.0 { emitted as f64 / secs } else { 0.0 };
            log::info!("Emitted {emitted} frames ({fps:.1} fps)");
        }
    }

    fn timing(&mut self, stage: &str, duration_ms: f64) {
        self.timings
            .entry(stage.to_string())
            .or_default()
            .record(duration_ms);
    }

    fn metric(&mut self, name: &str, value: f64) {
        self.metrics.entry(name.to_string()).or_default().record(value);
    }

    fn info(&mut self, message: &str) {
        self.messages.push(message.to_string());
        log::info!("{message}");
    }

    fn summary(&self) {
        if let Some(text) = self.summary_string() {
            log::info!("\n\n{text}");
        }
    }
}
