//! Transfer telemetry
//!
//! Turns raw `(bytes_written, content_length)` samples into a progress
//! fraction, a transfer speed and an ETA. One [`ProgressTelemetry`] lives for
//! exactly one download session.

use std::fmt;
use std::time::{Duration, Instant};

const BYTES_PER_MIB: f64 = 1024.0 * 1024.0;

/// Estimated time remaining for a transfer
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Eta {
    /// No throughput observed yet, or the total size is unknown
    Indeterminate,
    Remaining(Duration),
}

impl fmt::Display for Eta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Indeterminate => write!(f, "--"),
            Self::Remaining(remaining) => {
                let secs = remaining.as_secs_f64();
                if secs >= 60.0 {
                    write!(f, "{} min", (secs / 60.0).ceil() as u64)
                } else {
                    write!(f, "{} sec", secs.ceil() as u64)
                }
            }
        }
    }
}

/// Derived figures for one transfer sample
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransferStats {
    /// Fraction in `[0, 1]`
    pub progress: f64,
    /// Bytes per second since the previous sample
    pub speed_bps: f64,
    pub eta: Eta,
}

impl TransferStats {
    /// Speed formatted as MiB/s with two decimals, e.g. `"1.50 MB/s"`
    pub fn speed_display(&self) -> String {
        format!("{:.2} MB/s", self.speed_bps / BYTES_PER_MIB)
    }

    /// Whole percent, rounded
    pub fn percent(&self) -> u8 {
        (self.progress * 100.0).round() as u8
    }
}

/// Per-session telemetry state
#[derive(Debug, Clone)]
pub struct ProgressTelemetry {
    last_bytes: u64,
    last_time: Instant,
    progress: f64,
    speed_bps: f64,
}

impl ProgressTelemetry {
    /// Start a new session; the first sample measures speed from `started_at`
    pub fn new(started_at: Instant) -> Self {
        Self {
            last_bytes: 0,
            last_time: started_at,
            progress: 0.0,
            speed_bps: 0.0,
        }
    }

    /// Record a sample and return the derived figures
    ///
    /// Progress is held at its previous value while the content length is
    /// unknown or zero, and never moves backwards. Speed is held when no time
    /// has elapsed since the previous sample.
    pub fn sample(
        &mut self,
        bytes_written: u64,
        content_length: Option<u64>,
        now: Instant,
    ) -> TransferStats {
        let total = content_length.filter(|len| *len > 0);

        if let Some(total) = total {
            let fraction = (bytes_written as f64 / total as f64).clamp(0.0, 1.0);
            self.progress = self.progress.max(fraction);
        }

        let elapsed = now.saturating_duration_since(self.last_time).as_secs_f64();
        if elapsed > 0.0 {
            let delta = bytes_written.saturating_sub(self.last_bytes);
            self.speed_bps = delta as f64 / elapsed;
        }

        let eta = match total {
            Some(total) if self.speed_bps > 0.0 => {
                let remaining = total.saturating_sub(bytes_written) as f64;
                // Absurd announced lengths overflow Duration
                Duration::try_from_secs_f64(remaining / self.speed_bps)
                    .map_or(Eta::Indeterminate, Eta::Remaining)
            }
            _ => Eta::Indeterminate,
        };

        self.last_bytes = bytes_written;
        self.last_time = now;

        TransferStats {
            progress: self.progress,
            speed_bps: self.speed_bps,
            eta,
        }
    }

    /// Last reported progress fraction
    pub fn progress(&self) -> f64 {
        self.progress
    }
}
