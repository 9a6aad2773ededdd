//! Time utilities for the simulation and lease clock

use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Get current Unix timestamp in milliseconds (the lease clock)
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

/// Default tick rate, standing in for the display refresh rate
pub const DEFAULT_TICK_RATE: u32 = 60;

/// Lease heartbeat period
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_millis(5_000);

/// A lease older than this is considered abandoned
pub const LEASE_STALE_AFTER_MS: u64 = 10_000;

/// Duration of one simulation tick at the given rate
pub fn tick_duration(tick_rate: u32) -> Duration {
    Duration::from_micros(1_000_000 / tick_rate.max(1) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tick_duration_at_sixty_hz() {
        assert_eq!(tick_duration(60), Duration::from_micros(16_666));
    }

    #[test]
    fn zero_tick_rate_does_not_divide_by_zero() {
        assert_eq!(tick_duration(0), Duration::from_secs(1));
    }
}
