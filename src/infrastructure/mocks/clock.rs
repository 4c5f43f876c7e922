//! Mock clock for testing.

use crate::application::ports::Clock;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime};

/// Mock clock for testing.
///
/// Allows tests to control time progression explicitly. The monotonic and
/// wall-clock readings move together.
///
/// # Examples
///
/// ```
/// use docnum_guard::infrastructure::mocks::MockClock;
/// use docnum_guard::application::ports::Clock;
/// use std::time::{Duration, Instant, SystemTime};
///
/// let start = Instant::now();
/// let clock = MockClock::new(start);
///
/// assert_eq!(clock.now(), start);
/// assert_eq!(clock.system_time(), SystemTime::UNIX_EPOCH);
///
/// clock.advance(Duration::from_secs(10));
/// assert_eq!(clock.now(), start + Duration::from_secs(10));
/// assert_eq!(
///     clock.system_time(),
///     SystemTime::UNIX_EPOCH + Duration::from_secs(10)
/// );
/// ```
///
/// # Thread Safety
///
/// All clones share the same underlying time value, so advancing time in
/// one clone affects all clones.
#[derive(Debug, Clone)]
pub struct MockClock {
    state: Arc<Mutex<(Instant, SystemTime)>>,
}

impl MockClock {
    /// Create a mock clock starting at `start`, with wall-clock time at the
    /// Unix epoch.
    pub fn new(start: Instant) -> Self {
        Self::with_system_time(start, SystemTime::UNIX_EPOCH)
    }

    /// Create a mock clock with explicit monotonic and wall-clock readings.
    pub fn with_system_time(start: Instant, wall: SystemTime) -> Self {
        Self {
            state: Arc::new(Mutex::new((start, wall))),
        }
    }

    /// Advance both readings by a duration.
    pub fn advance(&self, duration: Duration) {
        let mut state = self
            .state
            .lock()
            .expect("MockClock mutex poisoned - a test thread panicked while holding the lock");
        state.0 += duration;
        state.1 += duration;
    }

    /// Set the monotonic reading to a specific instant.
    pub fn set(&self, instant: Instant) {
        let mut state = self
            .state
            .lock()
            .expect("MockClock mutex poisoned - a test thread panicked while holding the lock");
        state.0 = instant;
    }
}

impl Clock for MockClock {
    fn now(&self) -> Instant {
        self.state
            .lock()
            .expect("MockClock mutex poisoned - a test thread panicked while holding the lock")
            .0
    }

    fn system_time(&self) -> SystemTime {
        self.state
            .lock()
            .expect("MockClock mutex poisoned - a test thread panicked while holding the lock")
            .1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_clock() {
        let start = Instant::now();
        let clock = MockClock::new(start);

        assert_eq!(clock.now(), start);

        clock.advance(Duration::from_secs(10));
        assert_eq!(clock.now(), start + Duration::from_secs(10));

        let new_time = start + Duration::from_secs(100);
        clock.set(new_time);
        assert_eq!(clock.now(), new_time);
        assert_eq!(
            clock.system_time(),
            SystemTime::UNIX_EPOCH + Duration::from_secs(10)
        );
    }

    #[test]
    fn test_clones_share_time() {
        let clock = MockClock::new(Instant::now());
        let other = clock.clone();

        other.advance(Duration::from_secs(5));
        assert_eq!(clock.now(), other.now());
    }
}
