// Frame rate measurement for the preview loop
use std::time::{Duration, Instant};

/// Frame counter that reports an average rate once per interval
pub struct FpsCounter {
    /// Start of the current measurement window
    window_start: Instant,
    /// Frames presented in the current window
    frames: u32,
    /// Rate measured over the last full window
    current_fps: f64,
    report_interval: Duration,
}

impl FpsCounter {
    pub fn new(report_interval: Duration) -> Self {
        Self::starting_at(Instant::now(), report_interval)
    }

    fn starting_at(start: Instant, report_interval: Duration) -> Self {
        Self {
            window_start: start,
            frames: 0,
            current_fps: 0.0,
            report_interval,
        }
    }

    /// Count one presented frame.
    /// Returns Some(fps) when a measurement window closes.
    pub fn tick(&mut self) -> Option<f64> {
        self.tick_at(Instant::now())
    }

    fn tick_at(&mut self, now: Instant) -> Option<f64> {
        self.frames += 1;

        let elapsed = now.saturating_duration_since(self.window_start);
        if elapsed < self.report_interval {
            return None;
        }

        self.current_fps = self.frames as f64 / elapsed.as_secs_f64();
        self.frames = 0;
        self.window_start = now;
        Some(self.current_fps)
    }

    #[cfg(test)]
    pub fn fps(&self) -> f64 {
        self.current_fps
    }
}

impl Default for FpsCounter {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}
