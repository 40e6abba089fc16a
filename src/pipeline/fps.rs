//! Capture rate estimation

use std::time::{Duration, Instant};

use tracing::debug;

/// Running mean and standard deviation of a sample population.
#[derive(Debug, Default, Clone)]
pub struct RunningStats {
    accum: f64,
    square_accum: f64,
    count: u64,
}

impl RunningStats {
    pub fn update(&mut self, value: f64) {
        self.accum += value;
        self.square_accum += value * value;
        self.count += 1;
    }

    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        self.accum / self.count as f64
    }

    pub fn std_dev(&self) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        let mean = self.mean();
        (self.square_accum / self.count as f64 - mean * mean)
            .max(0.0)
            .sqrt()
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Rolling frames-per-second estimate, refreshed once per update period.
///
/// When jitter measurement is enabled, the deviation of each frame from its
/// expected arrival time is accumulated; deviations at or beyond the jitter
/// cap are treated as outliers and skipped.
#[derive(Debug)]
pub struct FpsCounter {
    update_period: Duration,
    jitter_cap: Duration,
    fps: f32,
    frame_count: u32,
    last_update: Instant,
    next_frame_at: Instant,
    jitter: Option<RunningStats>,
}

impl FpsCounter {
    pub fn new(initial_fps: f32, update_period: Duration, jitter_cap: Duration, measure_jitter: bool) -> Self {
        Self::starting_at(Instant::now(), initial_fps, update_period, jitter_cap, measure_jitter)
    }

    pub fn starting_at(
        now: Instant,
        initial_fps: f32,
        update_period: Duration,
        jitter_cap: Duration,
        measure_jitter: bool,
    ) -> Self {
        let mut counter = Self {
            update_period,
            jitter_cap,
            fps: initial_fps,
            frame_count: 0,
            last_update: now,
            next_frame_at: now,
            jitter: measure_jitter.then(RunningStats::default),
        };
        counter.next_frame_at = now + counter.frame_interval();
        counter
    }

    fn frame_interval(&self) -> Duration {
        if self.fps > 0.0 {
            Duration::from_secs_f64(1.0 / self.fps as f64)
        } else {
            Duration::ZERO
        }
    }

    /// Records a completed frame at `now`. Returns the new estimate when the
    /// update period elapsed with this frame.
    pub fn frame_completed(&mut self, now: Instant) -> Option<f32> {
        self.frame_count += 1;

        let mut updated = None;
        let elapsed = now.saturating_duration_since(self.last_update);
        if elapsed > self.update_period {
            self.fps = self.frame_count as f32 / elapsed.as_secs_f32();
            self.last_update = now;
            self.frame_count = 0;
            updated = Some(self.fps);

            match &self.jitter {
                Some(stats) => debug!(
                    "fps: {:.3} jitter mean: {:.3}ms jitter std: {:.3}ms",
                    self.fps,
                    stats.mean(),
                    stats.std_dev()
                ),
                None => debug!("fps: {:.3}", self.fps),
            }
        }

        if self.jitter.is_some() {
            let deviation_ms = if now >= self.next_frame_at {
                now.duration_since(self.next_frame_at).as_secs_f64() * 1000.0
            } else {
                -(self.next_frame_at.duration_since(now).as_secs_f64() * 1000.0)
            };
            self.next_frame_at = now + self.frame_interval();

            let cap_ms = self.jitter_cap.as_secs_f64() * 1000.0;
            if let Some(stats) = self.jitter.as_mut() {
                if deviation_ms.abs() < cap_ms {
                    stats.update(deviation_ms);
                }
            }
        }

        updated
    }

    pub fn fps(&self) -> f32 {
        self.fps
    }

    pub fn jitter(&self) -> Option<&RunningStats> {
        self.jitter.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_running_stats_mean_and_std_dev() {
        let mut stats = RunningStats::default();
        for v in [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0] {
            stats.update(v);
        }
        assert!((stats.mean() - 5.0).abs() < 1e-9);
        assert!((stats.std_dev() - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_running_stats_empty() {
        let stats = RunningStats::default();
        assert_eq!(stats.mean(), 0.0);
        assert_eq!(stats.std_dev(), 0.0);
    }

    #[test]
    fn test_fps_holds_initial_estimate_within_period() {
        let start = Instant::now();
        let mut counter = FpsCounter::starting_at(
            start,
            30.0,
            Duration::from_millis(500),
            Duration::from_millis(500),
            false,
        );
        assert_eq!(counter.frame_completed(start + Duration::from_millis(100)), None);
        assert_eq!(counter.fps(), 30.0);
    }

    #[test]
    fn test_fps_estimate_after_period() {
        let start = Instant::now();
        let mut counter = FpsCounter::starting_at(
            start,
            30.0,
            Duration::from_millis(500),
            Duration::from_millis(500),
            false,
        );

        // 20 frames 30ms apart -> 600ms elapsed on the last one
        let mut estimate = None;
        for i in 1..=20u64 {
            estimate = counter.frame_completed(start + Duration::from_millis(30 * i)).or(estimate);
        }

        let fps = estimate.expect("period elapsed");
        // First update fires at frame 17 (510ms)
        assert!((fps - 17.0 / 0.51).abs() < 0.01);
    }

    #[test]
    fn test_jitter_excludes_outliers() {
        let start = Instant::now();
        let mut counter = FpsCounter::starting_at(
            start,
            10.0,
            Duration::from_secs(60),
            Duration::from_millis(500),
            true,
        );

        // On schedule (100ms), then a 2s stall that must be ignored
        counter.frame_completed(start + Duration::from_millis(100));
        counter.frame_completed(start + Duration::from_millis(2100));

        let jitter = counter.jitter().expect("jitter enabled");
        assert_eq!(jitter.count(), 1);
        assert!(jitter.mean().abs() < 1.0);
    }
}
