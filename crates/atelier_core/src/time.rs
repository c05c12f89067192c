use std::time::{Duration, Instant};

/// Frame clock owned by the host loop.
pub struct Time {
    startup: Instant,
    last_update: Instant,
    delta: Duration,
    frame_count: u64,
}

impl Default for Time {
    fn default() -> Self {
        let now = Instant::now();
        Self {
            startup: now,
            last_update: now,
            delta: Duration::ZERO,
            frame_count: 0,
        }
    }
}

impl Time {
    /// Called by the host loop once per frame
    pub fn update(&mut self) {
        let now = Instant::now();
        self.delta = now - self.last_update;
        self.last_update = now;
        self.frame_count += 1;
    }

    /// Returns time in seconds since last frame (e.g., 0.016 for 60fps)
    pub fn delta_seconds(&self) -> f32 {
        self.delta.as_secs_f32()
    }

    /// Returns total time since the clock started; drives the idle spin.
    pub fn elapsed_seconds(&self) -> f32 {
        self.startup.elapsed().as_secs_f32()
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Instantaneous frame rate, zero before the first measured frame.
    pub fn fps(&self) -> f32 {
        let dt = self.delta_seconds();
        if dt > 0.0 { 1.0 / dt } else { 0.0 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_clock_reports_no_delta() {
        let time = Time::default();

        assert_eq!(time.delta_seconds(), 0.0);
        assert_eq!(time.fps(), 0.0);
        assert_eq!(time.frame_count(), 0);
    }

    #[test]
    fn update_advances_monotonically() {
        let mut time = Time::default();

        std::thread::sleep(Duration::from_millis(2));
        time.update();

        assert!(time.delta_seconds() > 0.0);
        assert!(time.elapsed_seconds() >= time.delta_seconds());
        assert_eq!(time.frame_count(), 1);
    }
}
