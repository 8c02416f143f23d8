//! Fixed-window counters: the primary window and the burst guard.

/// Length and cap of a fixed window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedWindow {
    /// Requests admitted per window.
    pub max: u64,
    /// Window length in milliseconds.
    pub length_ms: u64,
}

impl FixedWindow {
    /// Create a window description.
    pub fn new(max: u64, length_ms: u64) -> Self {
        Self { max, length_ms }
    }

    /// Start a new window when the current one has fully elapsed.
    ///
    /// The comparison is inclusive: a request at exactly `start + length`
    /// opens the next window, so each elapsed period resets once.
    pub fn roll(&self, count: &mut u64, start: &mut u64, now: u64) -> bool {
        if now.saturating_sub(*start) >= self.length_ms {
            *count = 0;
            *start = now;
            true
        } else {
            false
        }
    }

    /// Whether one more request fits.
    pub fn has_headroom(&self, count: u64) -> bool {
        count < self.max
    }

    /// Requests left after `count`.
    pub fn remaining(&self, count: u64) -> u64 {
        self.max.saturating_sub(count)
    }

    /// Milliseconds until the window that started at `start` ends.
    pub fn reset_after(&self, start: u64, now: u64) -> u64 {
        start.saturating_add(self.length_ms).saturating_sub(now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rolls_exactly_at_boundary() {
        let w = FixedWindow::new(100, 60_000);
        let (mut count, mut start) = (100, 1_000);
        assert!(!w.roll(&mut count, &mut start, 60_999));
        assert_eq!(count, 100);
        assert!(w.roll(&mut count, &mut start, 61_000));
        assert_eq!((count, start), (0, 61_000));
    }

    #[test]
    fn headroom_and_remaining() {
        let w = FixedWindow::new(3, 1_000);
        assert!(w.has_headroom(2));
        assert!(!w.has_headroom(3));
        assert_eq!(w.remaining(1), 2);
        assert_eq!(w.remaining(5), 0);
    }

    #[test]
    fn reset_after_never_underflows() {
        let w = FixedWindow::new(3, 1_000);
        assert_eq!(w.reset_after(10_000, 10_250), 750);
        assert_eq!(w.reset_after(10_000, 20_000), 0);
    }
}
