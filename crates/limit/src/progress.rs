//! Fractional completion tracking.

use std::fmt;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Concurrency-safe progress counter.
///
/// `total` may be unknown (`-1`). Once an error is recorded the progress
/// is finished: later updates are ignored and rendering shows the error.
///
/// # Examples
///
/// ```
/// use tome_limit::Progress;
///
/// let progress = Progress::new(4);
/// progress.advance(1);
/// assert_eq!(progress.to_string(), "25.00%");
/// assert_eq!(Progress::indeterminate().to_string(), "null");
/// ```
#[derive(Debug)]
pub struct Progress {
    state: RwLock<State>,
}

#[derive(Debug)]
struct State {
    total: i64,
    current: i64,
    error: Option<String>,
}

impl Progress {
    pub const INDETERMINATE: i64 = -1;

    pub fn new(total: i64) -> Self {
        Self {
            state: RwLock::new(State {
                total: total.max(Self::INDETERMINATE),
                current: 0,
                error: None,
            }),
        }
    }

    pub fn indeterminate() -> Self {
        Self::new(Self::INDETERMINATE)
    }

    pub fn set_total(&self, total: i64) {
        let mut state = self.write();
        if state.error.is_none() {
            state.total = total.max(Self::INDETERMINATE);
        }
    }

    /// Move `current` forward. Never moves backwards.
    pub fn advance(&self, by: u64) {
        let mut state = self.write();
        if state.error.is_none() {
            let by = i64::try_from(by).unwrap_or(i64::MAX);
            state.current = state.current.saturating_add(by);
        }
    }

    /// Record a terminal error. The first error wins.
    pub fn fail(&self, error: impl fmt::Display) {
        let mut state = self.write();
        if state.error.is_none() {
            state.error = Some(error.to_string());
        }
    }

    pub fn total(&self) -> i64 {
        self.read().total
    }

    pub fn current(&self) -> i64 {
        self.read().current
    }

    pub fn error(&self) -> Option<String> {
        self.read().error.clone()
    }

    /// `-1.0` while the total is unknown, otherwise the completed fraction
    /// in `[0, 1]`. An empty total counts as complete.
    pub fn percent(&self) -> f64 {
        let state = self.read();
        if state.total < 0 {
            return -1.0;
        }
        if state.current >= state.total {
            return 1.0;
        }
        (state.current as f64 / state.total as f64).clamp(0.0, 1.0)
    }

    pub fn is_complete(&self) -> bool {
        self.percent() >= 1.0
    }

    fn read(&self) -> RwLockReadGuard<'_, State> {
        // A panicking writer cannot leave the counters half-updated.
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, State> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for Progress {
    fn default() -> Self {
        Self::indeterminate()
    }
}

impl fmt::Display for Progress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(error) = self.error() {
            return f.write_str(&error);
        }
        match self.percent() {
            p if p < 0.0 => f.write_str("null"),
            p => write!(f, "{:.2}%", p * 100.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(-1, 0, -1.0)]
    #[case(-1, 10, -1.0)]
    #[case(4, 0, 0.0)]
    #[case(4, 1, 0.25)]
    #[case(4, 4, 1.0)]
    #[case(4, 9, 1.0)]
    #[case(0, 0, 1.0)]
    fn test_percent(#[case] total: i64, #[case] current: u64, #[case] expected: f64) {
        let progress = Progress::new(total);
        progress.advance(current);
        assert_eq!(progress.percent(), expected);
    }

    #[rstest]
    #[case(-1, 0, "null")]
    #[case(3, 1, "33.33%")]
    #[case(2, 2, "100.00%")]
    #[case(8, 0, "0.00%")]
    fn test_render(#[case] total: i64, #[case] current: u64, #[case] expected: &str) {
        let progress = Progress::new(total);
        progress.advance(current);
        assert_eq!(progress.to_string(), expected);
    }

    #[test]
    fn test_error_is_terminal() {
        let progress = Progress::new(10);
        progress.advance(3);
        progress.fail("source went away");
        progress.fail("second error");
        progress.advance(7);
        progress.set_total(-1);
        assert_eq!(progress.to_string(), "source went away");
        assert_eq!(progress.current(), 3);
        assert_eq!(progress.total(), 10);
    }

    #[test]
    fn test_total_becomes_known() {
        let progress = Progress::indeterminate();
        progress.advance(1);
        progress.set_total(2);
        assert_eq!(progress.to_string(), "50.00%");
        assert!(!progress.is_complete());
        progress.advance(1);
        assert!(progress.is_complete());
    }

    #[test]
    fn test_concurrent_advances() {
        let progress = std::sync::Arc::new(Progress::new(800));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let progress = progress.clone();
                std::thread::spawn(move || (0..100).for_each(|_| progress.advance(1)))
            })
            .collect();
        handles.into_iter().for_each(|h| h.join().unwrap());
        assert_eq!(progress.current(), 800);
        assert!(progress.is_complete());
    }
}
