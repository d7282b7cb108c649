//! gate — wall-clock admission control for analysis
//!
//! Cameras deliver frames far faster than the detector can run. The gate
//! admits a frame only when the configured interval has elapsed since the
//! last admitted one; everything else is dropped on the floor, never queued.

use tracing::trace;

/// Admits at most one frame per interval.
#[derive(Debug, Clone)]
pub struct FrameGate {
    interval_ms: u64,
    /// `None` until the first frame is admitted.
    last_accepted_at_ms: Option<u64>,
}

impl FrameGate {
    pub fn new(interval_ms: u64) -> Self {
        Self {
            interval_ms,
            last_accepted_at_ms: None,
        }
    }

    /// Returns `true` and records `now_ms` when at least `interval_ms` has
    /// passed since the last admitted frame. Rejection leaves state untouched.
    ///
    /// Timestamps that run backwards count as zero elapsed time.
    pub fn accept(&mut self, now_ms: u64) -> bool {
        let admitted = match self.last_accepted_at_ms {
            None => true,
            Some(last) => now_ms.saturating_sub(last) >= self.interval_ms,
        };
        if admitted {
            self.last_accepted_at_ms = Some(now_ms);
        } else {
            trace!(now_ms, "frame rejected by gate");
        }
        admitted
    }

    pub fn last_accepted_at_ms(&self) -> Option<u64> {
        self.last_accepted_at_ms
    }

    pub fn interval_ms(&self) -> u64 {
        self.interval_ms
    }
}
