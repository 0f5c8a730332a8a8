//! Time utilities for game simulation

use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Get current Unix timestamp in milliseconds
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_millis() as u64
}

/// Server start time for uptime tracking
static SERVER_START: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();

/// Initialize server start time (call once at startup)
pub fn init_server_time() {
    SERVER_START.get_or_init(Instant::now);
}

/// Get server uptime in seconds
pub fn uptime_secs() -> u64 {
    SERVER_START
        .get()
        .map(|start| start.elapsed().as_secs())
        .unwrap_or(0)
}

/// Tick rate configuration
pub const SIMULATION_TPS: u32 = 60; // 60 ticks per second
pub const TICK_DURATION_MICROS: u64 = 1_000_000 / SIMULATION_TPS as u64;

/// Fixed solver increment (in seconds)
pub fn tick_delta() -> f32 {
    1.0 / SIMULATION_TPS as f32
}

/// Wall-clock spacing between ticks
pub fn tick_interval() -> Duration {
    Duration::from_micros(TICK_DURATION_MICROS)
}

/// Elapsed values above this are taken to be milliseconds
pub const MILLIS_THRESHOLD: f32 = 1.0;

/// Normalize an elapsed-time value to seconds.
///
/// Callers are expected to pass seconds, but a value larger than
/// [`MILLIS_THRESHOLD`] cannot be a sane frame delta and is read as
/// milliseconds instead. Negative and non-finite values collapse to zero.
pub fn normalize_elapsed(elapsed: f32) -> f32 {
    if !elapsed.is_finite() || elapsed <= 0.0 {
        0.0
    } else if elapsed > MILLIS_THRESHOLD {
        elapsed / 1000.0
    } else {
        elapsed
    }
}

/// A simple timer for measuring durations
#[derive(Debug, Clone)]
pub struct Timer {
    start: Instant,
}

impl Timer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    pub fn elapsed_micros(&self) -> u64 {
        self.start.elapsed().as_micros() as u64
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}
