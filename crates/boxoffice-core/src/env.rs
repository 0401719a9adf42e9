//! Environment abstraction for deterministic testing.
//!
//! Event expiry and reservation timestamps depend on the local wall clock.
//! Protocol logic reads time only through [`Environment`], so tests can pin
//! the clock with [`ManualEnv`] while production uses the system clock.

use std::sync::{Arc, Mutex, PoisonError};

use chrono::{NaiveDateTime, TimeDelta};

/// Abstract environment providing the wall clock.
///
/// Times are naive local date-times, matching how event start times are
/// entered by users.
pub trait Environment: Clone + Send + Sync + 'static {
    /// Current local wall-clock time.
    fn now(&self) -> NaiveDateTime;
}

/// Clock that only moves when told to.
#[derive(Debug, Clone)]
pub struct ManualEnv {
    now: Arc<Mutex<NaiveDateTime>>,
}

impl ManualEnv {
    /// Creates a clock reading `start`.
    pub fn new(start: NaiveDateTime) -> Self {
        Self { now: Arc::new(Mutex::new(start)) }
    }

    /// Moves the clock to `at`. Every clone observes the change.
    pub fn set(&self, at: NaiveDateTime) {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner) = at;
    }

    /// Moves the clock forward.
    pub fn advance(&self, by: TimeDelta) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now += by;
    }
}

impl Environment for ManualEnv {
    fn now(&self) -> NaiveDateTime {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::NaiveDate;

    use super::*;

    #[test]
    fn clones_share_the_clock() {
        let start = NaiveDate::from_ymd_opt(2030, 1, 1).unwrap().and_hms_opt(9, 0, 0).unwrap();
        let env = ManualEnv::new(start);
        let observer = env.clone();

        env.advance(TimeDelta::minutes(90));
        assert_eq!(observer.now(), start + TimeDelta::minutes(90));
    }
}
