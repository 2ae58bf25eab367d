use std::time::{SystemTime, UNIX_EPOCH};

/// A source of Unix time, injectable so that window arithmetic can be tested
/// deterministically.
pub trait Clock: Clone {
    /// Current Unix time in whole seconds.
    fn now_unix(&self) -> u64;
}

/// Reads the system wall clock.
///
/// A backwards clock jump can briefly resurrect a window that should already
/// have expired; the limiter does not attempt to correct for this.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_unix(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("System time unexpectedly before the Unix epoch")
            .as_secs()
    }
}
