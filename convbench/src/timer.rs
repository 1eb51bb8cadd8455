use std::time::{Duration, Instant};

/// Wall-clock stopwatch on the monotonic clock.
///
/// Time accumulates over every `start`/`stop` pair until the next
/// [`reset`][Self::reset].
#[derive(Clone, Debug, Default)]
pub struct Timer {
    accumulated: Duration,
    started: Option<Instant>,
}

impl Timer {
    /// A stopped timer reading zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stop and zero the timer.
    pub fn reset(&mut self) {
        self.accumulated = Duration::ZERO;
        self.started = None;
    }

    /// Start a segment. Restarting a running timer keeps the time so far.
    pub fn start(&mut self) {
        self.stop();
        self.started = Some(Instant::now());
    }

    /// End the current segment; a no-op when stopped.
    pub fn stop(&mut self) {
        if let Some(started) = self.started.take() {
            self.accumulated += started.elapsed();
        }
    }

    /// Whether a segment is in progress.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.started.is_some()
    }

    /// Total time, including a segment still in progress.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.accumulated + self.started.map_or(Duration::ZERO, |s| s.elapsed())
    }

    /// [`elapsed`][Self::elapsed] in seconds.
    #[must_use]
    pub fn elapsed_seconds(&self) -> f64 {
        self.elapsed().as_secs_f64()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn test_new_timer_reads_zero() {
        let timer = Timer::new();
        assert_eq!(timer.elapsed(), Duration::ZERO);
        assert!(!timer.is_running());
    }

    #[test]
    fn test_segments_accumulate() {
        let mut timer = Timer::new();
        timer.start();
        sleep(Duration::from_millis(5));
        timer.stop();
        let first = timer.elapsed();
        assert!(first >= Duration::from_millis(5));

        sleep(Duration::from_millis(5));
        assert_eq!(timer.elapsed(), first, "stopped timer must not advance");

        timer.start();
        sleep(Duration::from_millis(5));
        timer.stop();
        assert!(timer.elapsed() >= first + Duration::from_millis(5));
    }

    #[test]
    fn test_reset_cycles() {
        let mut timer = Timer::new();
        for _ in 0..3 {
            timer.reset();
            assert_eq!(timer.elapsed_seconds(), 0.0);
            timer.start();
            assert!(timer.is_running());
            timer.stop();
            assert!(!timer.is_running());
        }
    }

    #[test]
    fn test_running_segment_counts() {
        let mut timer = Timer::new();
        timer.start();
        sleep(Duration::from_millis(2));
        assert!(timer.elapsed() >= Duration::from_millis(2));
        assert!(timer.is_running());
    }
}
