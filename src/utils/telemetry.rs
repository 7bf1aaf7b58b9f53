// file: src/utils/telemetry.rs
// description: stage timing for pipeline runs
// reference: Production observability best practices

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Logs when a pipeline stage starts and how long it took.
pub struct StageTimer {
    task_id: String,
    stage: String,
    start: Instant,
}

impl StageTimer {
    pub fn start(task_id: &str, stage: &str) -> Self {
        info!("[{}] {} started", task_id, stage);
        Self {
            task_id: task_id.to_string(),
            stage: stage.to_string(),
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    pub fn finish(self) -> StageTiming {
        let elapsed = self.elapsed();
        info!(
            "[{}] {} completed in {:.2}s",
            self.task_id,
            self.stage,
            elapsed.as_secs_f64()
        );
        StageTiming::new(&self.stage, elapsed)
    }

    pub fn finish_with_count(self, count: usize, unit: &str) -> StageTiming {
        let elapsed = self.elapsed();
        info!(
            "[{}] {} completed in {:.2}s ({} {})",
            self.task_id,
            self.stage,
            elapsed.as_secs_f64(),
            count,
            unit
        );
        StageTiming::new(&self.stage, elapsed)
    }

    pub fn warn_if_slow(&self, threshold: Duration) {
        let elapsed = self.elapsed();
        if elapsed > threshold {
            warn!(
                "[{}] slow stage {}: {:.2}s (threshold: {:.2}s)",
                self.task_id,
                self.stage,
                elapsed.as_secs_f64(),
                threshold.as_secs_f64()
            );
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageTiming {
    pub stage: String,
    pub duration_ms: u64,
}

impl StageTiming {
    pub fn new(stage: &str, duration: Duration) -> Self {
        Self {
            stage: stage.to_string(),
            duration_ms: duration.as_millis() as u64,
        }
    }
}

pub fn total_duration_ms(timings: &[StageTiming]) -> u64 {
    timings.iter().map(|t| t.duration_ms).sum()
}
