use std::time::{Duration, Instant};

use log::Level;

/// Logs the wall time of the enclosing scope when dropped.
///
/// Store-wide operations time themselves at `Debug`; per-tile work that
/// would flood the log uses `Trace`.
pub struct ScopeTimer {
    name: &'static str,
    level: Level,
    start: Instant,
}

impl ScopeTimer {
    pub fn new(name: &'static str) -> Self {
        Self::with_level(name, Level::Debug)
    }

    pub fn with_level(name: &'static str, level: Level) -> Self {
        Self {
            name,
            level,
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl Drop for ScopeTimer {
    fn drop(&mut self) {
        if log::log_enabled!(self.level) {
            log::log!(self.level, "[TIMER] {} took {:?}", self.name, self.elapsed());
        }
    }
}
