//! Production Environment implementation using the system clock.
//!
//! Event start times are entered as local wall-clock values without a zone,
//! so `SystemEnv` reports the local time with the offset dropped. Expiry
//! therefore follows the server's configured time zone.

use boxoffice_core::Environment;
use chrono::NaiveDateTime;

/// Production environment reading the local wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemEnv;

impl SystemEnv {
    /// Create a new system environment.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Environment for SystemEnv {
    #[allow(clippy::disallowed_methods)]
    fn now(&self) -> NaiveDateTime {
        chrono::Local::now().naive_local()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn system_env_time_advances() {
        let env = SystemEnv::new();

        let t1 = env.now();
        std::thread::sleep(Duration::from_millis(10));
        let t2 = env.now();

        assert!(t2 > t1, "Time should advance");
    }

    #[test]
    fn system_env_is_local_time() {
        let env = SystemEnv::new();
        let local = chrono::Local::now().naive_local();

        let drift = (env.now() - local).num_seconds().abs();
        assert!(drift < 5, "clock drifted {drift}s from local time");
    }
}
