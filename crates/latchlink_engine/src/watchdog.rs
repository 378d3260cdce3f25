//! Beacon-loss watchdog.

use tracing::{error, trace};

/// No restart is requested this early after boot.
pub const BOOT_GRACE_MS: u64 = 60_000;

/// Suppression window armed after every radio exchange.
pub const POSTPONE_WINDOW_MS: u64 = 15_000;

/// Outcome of a watchdog check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchdogVerdict {
    /// Nothing to do.
    Ok,
    /// The host must restart the device.
    RestartRequested,
}

/// Detects a radio stack that stopped seeing the device's advertisements.
#[derive(Debug, Clone)]
pub struct BeaconWatchdog {
    timeout_secs: i32,
    last_beacon_ms: Option<u64>,
    suppress_until_ms: u64,
    fired: bool,
}

impl BeaconWatchdog {
    /// Creates a watchdog. A timeout of zero or less disables it.
    pub fn new(timeout_secs: i32) -> Self {
        Self {
            timeout_secs,
            last_beacon_ms: None,
            suppress_until_ms: 0,
            fired: false,
        }
    }

    /// Whether the watchdog can ever fire.
    pub fn is_enabled(&self) -> bool {
        self.timeout_secs > 0
    }

    /// Time of the most recent beacon.
    pub fn last_beacon_ms(&self) -> Option<u64> {
        self.last_beacon_ms
    }

    /// Records a beacon. Timestamps older than the last one are ignored.
    pub fn on_beacon_observed(&mut self, at_ms: u64) {
        if at_ms == 0 {
            return;
        }
        if self.last_beacon_ms.map_or(true, |last| at_ms > last) {
            self.last_beacon_ms = Some(at_ms);
        }
    }

    /// Holds off the watchdog for [`POSTPONE_WINDOW_MS`].
    pub fn postpone(&mut self, now: u64) {
        self.suppress_until_ms = now.saturating_add(POSTPONE_WINDOW_MS);
        trace!(until = self.suppress_until_ms, "watchdog postponed");
    }

    /// Checks for beacon loss. Requests a restart at most once.
    pub fn check_and_maybe_restart(&mut self, now: u64) -> WatchdogVerdict {
        if !self.is_enabled() || self.fired || now <= BOOT_GRACE_MS {
            return WatchdogVerdict::Ok;
        }
        let Some(last) = self.last_beacon_ms else {
            return WatchdogVerdict::Ok;
        };
        if self.suppress_until_ms >= now {
            return WatchdogVerdict::Ok;
        }

        let timeout_ms = u64::from(self.timeout_secs.unsigned_abs()) * 1000;
        let silence = now.saturating_sub(last);
        if silence > timeout_ms {
            error!(silence_ms = silence, timeout_ms, "no beacon received, requesting restart");
            self.fired = true;
            return WatchdogVerdict::RestartRequested;
        }
        WatchdogVerdict::Ok
    }
}
