use std::time::{Duration, Instant};

use serde::Serialize;

#[derive(Debug, Clone, Default, Serialize)]
pub struct StageTiming {
    pub stage: String,
    pub elapsed_us: u64,
}

/// Wall-clock time spent per pipeline stage (load, each rule, persist).
#[derive(Debug, Default)]
pub struct RunTimer {
    stages: Vec<StageTiming>,
}

impl RunTimer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&self) -> Instant {
        Instant::now()
    }

    pub fn record(&mut self, stage: &str, start: Instant) -> Duration {
        let elapsed = start.elapsed();
        self.stages.push(StageTiming {
            stage: stage.to_string(),
            elapsed_us: elapsed.as_micros() as u64,
        });
        elapsed
    }

    /// Time a closure under `stage` and hand back its result.
    pub fn time<T>(&mut self, stage: &str, f: impl FnOnce() -> T) -> T {
        let start = self.start();
        let out = f();
        self.record(stage, start);
        out
    }

    pub fn stages(&self) -> &[StageTiming] {
        &self.stages
    }

    pub fn total_us(&self) -> u64 {
        self.stages.iter().map(|s| s.elapsed_us).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stages_kept_in_order_and_totalled() {
        let mut timer = RunTimer::new();
        let v = timer.time("rule_5.1", || 7);
        assert_eq!(v, 7);
        timer.time("rule_5.2", || ());
        timer.time("persist", || ());
        let names: Vec<_> = timer.stages().iter().map(|s| s.stage.as_str()).collect();
        assert_eq!(names, ["rule_5.1", "rule_5.2", "persist"]);
        assert_eq!(timer.total_us(), timer.stages().iter().map(|s| s.elapsed_us).sum::<u64>());
    }
}
