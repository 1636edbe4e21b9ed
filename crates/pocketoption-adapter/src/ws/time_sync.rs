/*
[INPUT]:  Server timestamps carried by stream-update frames
[OUTPUT]: Server-relative clock estimate for callers
[POS]:    WebSocket layer - time synchronization
[UPDATE]: When changing clock resolution or drift handling
*/

use std::sync::{Arc, RwLock};

use chrono::{DateTime, TimeZone, Utc};

use crate::error::{PocketOptionError, Result};

/// One clock measurement: server timestamp paired with the local wall-clock
/// reading taken at receipt
#[derive(Debug, Clone, Copy, PartialEq)]
struct ClockSample {
    server_secs: f64,
    local_secs: f64,
}

/// Continuously-correct estimate of "now" on the server.
///
/// Updated opportunistically by the dispatcher whenever a stream-update frame
/// carries a fresh server timestamp; read by anyone needing server-relative
/// time. Until the first sample arrives, readings surface `Unsynchronized`
/// instead of silently trusting the local clock.
#[derive(Debug, Clone, Default)]
pub struct ServerClock {
    sample: Arc<RwLock<Option<ClockSample>>>,
}

impl ServerClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a fresh server timestamp (seconds since epoch, fractional)
    pub fn update(&self, server_secs: f64) {
        self.update_at(server_secs, unix_now_secs());
    }

    fn update_at(&self, server_secs: f64, local_secs: f64) {
        let mut guard = self.sample.write().expect("server clock lock poisoned");
        *guard = Some(ClockSample {
            server_secs,
            local_secs,
        });
    }

    /// Offset between server and local clocks, if synchronized
    pub fn offset(&self) -> Option<f64> {
        self.snapshot().map(|s| s.server_secs - s.local_secs)
    }

    /// Whether at least one server timestamp has been observed
    pub fn is_synchronized(&self) -> bool {
        self.snapshot().is_some()
    }

    /// Current server-relative timestamp, seconds since epoch
    pub fn now(&self) -> Result<f64> {
        self.now_at(unix_now_secs())
    }

    fn now_at(&self, local_secs: f64) -> Result<f64> {
        let sample = self.snapshot().ok_or(PocketOptionError::Unsynchronized)?;
        Ok(local_secs + sample.server_secs - sample.local_secs)
    }

    /// Current server time as a UTC datetime
    pub fn server_datetime(&self) -> Result<DateTime<Utc>> {
        let secs = self.now()?;
        let micros = (secs * 1_000_000.0) as i64;
        Utc.timestamp_micros(micros)
            .single()
            .ok_or(PocketOptionError::Unsynchronized)
    }

    /// Open timestamp of the current candle for a period, server-relative
    pub fn last_candle_open(&self, period_secs: u32) -> Result<i64> {
        let now = self.now()? as i64;
        let period = i64::from(period_secs.max(1));
        Ok((now / period) * period)
    }

    fn snapshot(&self) -> Option<ClockSample> {
        *self.sample.read().expect("server clock lock poisoned")
    }
}

fn unix_now_secs() -> f64 {
    Utc::now().timestamp_micros() as f64 / 1_000_000.0
}
