//! Fixed window flood counter.

use super::Meter;

/// Counts requests inside a window that slides forward with each admitted
/// request and lapses after `delay` seconds of inactivity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FloodWindow {
    max: u32,
    delay: u64,
    count: u32,
    window_start: u64,
}

impl FloodWindow {
    /// Creates an empty window.
    #[must_use]
    pub fn new(max: u32, delay: u64, now: u64) -> Self {
        Self {
            max,
            delay,
            count: 0,
            window_start: now,
        }
    }

    /// Records `cost` against the window.
    ///
    /// Returns `true` when this would flood; the window is left untouched in
    /// that case.
    pub fn bump(&mut self, cost: u32, now: u64) -> bool {
        if now.saturating_sub(self.window_start) > self.delay {
            self.count = 0;
        }
        if self.count.saturating_add(cost) > self.max {
            return true;
        }
        self.window_start = now;
        self.count += cost;
        false
    }

    /// Requests counted in the current window.
    #[must_use]
    pub fn count(&self) -> u32 {
        self.count
    }
}

impl Meter for FloodWindow {
    fn try_admit(&mut self, cost: u32, now: u64) -> bool {
        !self.bump(cost, now)
    }

    fn remaining(&self) -> f64 {
        f64::from(self.max.saturating_sub(self.count))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_admits_up_to_max() {
        let mut window = FloodWindow::new(3, 10, 0);
        assert!(!window.bump(1, 0));
        assert!(!window.bump(1, 1));
        assert!(!window.bump(1, 2));
        assert!(window.bump(1, 3));
        assert_eq!(window.count(), 3);
    }

    #[test]
    fn test_never_exceeds_max_with_large_cost() {
        let mut window = FloodWindow::new(3, 10, 0);
        assert!(!window.bump(2, 0));
        assert!(window.bump(2, 0));
        assert_eq!(window.count(), 2);
        assert!(!window.bump(1, 0));
    }

    #[test]
    fn test_resets_only_after_delay_has_passed() {
        let mut window = FloodWindow::new(1, 10, 0);
        assert!(!window.bump(1, 0));
        // Exactly `delay` seconds later the window is still open.
        assert!(window.bump(1, 10));
        assert!(!window.bump(1, 11));
    }

    #[test]
    fn test_rejected_bump_does_not_extend_window() {
        let mut window = FloodWindow::new(1, 10, 0);
        assert!(!window.bump(1, 0));
        assert!(window.bump(1, 5));
        assert!(window.bump(1, 9));
        // Window started at 0, so it lapses after 10 regardless of the rejections.
        assert!(!window.bump(1, 11));
    }

    #[test]
    fn test_admitted_bump_extends_window() {
        let mut window = FloodWindow::new(2, 10, 0);
        assert!(!window.bump(1, 0));
        assert!(!window.bump(1, 8));
        // 12 - 8 = 4, still inside the window opened by the last bump.
        assert!(window.bump(1, 12));
    }
}
