use std::thread;
use std::time::{Duration, Instant};

use crate::physical::LineSignals;

/// Pause before every send attempt
pub const DEFAULT_TX_TICK: Duration = Duration::from_millis(10);

/// Minimum time between the end of one transmission and the next
pub const DEFAULT_MIN_TX_SPACING: Duration = Duration::from_millis(10);

/// Whether a send may go out right now
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    Ready,
    NotClearToSend,
    TooSoon { remaining: Duration },
}

/// Paces writes against the clear-to-send line and the previous write
#[derive(Debug, Clone)]
pub struct TxScheduler {
    tick: Duration,
    min_spacing: Duration,
    max_wait: Option<Duration>,
}

impl TxScheduler {
    pub fn new(tick: Duration, min_spacing: Duration, max_wait: Option<Duration>) -> Self {
        Self {
            tick,
            min_spacing,
            max_wait,
        }
    }

    pub fn readiness(
        &self,
        signals: LineSignals,
        last_write: Option<Instant>,
        now: Instant,
    ) -> Readiness {
        if !signals.contains(LineSignals::CTS) {
            return Readiness::NotClearToSend;
        }

        match last_write {
            Some(last) => {
                let elapsed = now.saturating_duration_since(last);
                if elapsed < self.min_spacing {
                    Readiness::TooSoon {
                        remaining: self.min_spacing - elapsed,
                    }
                } else {
                    Readiness::Ready
                }
            }
            None => Readiness::Ready,
        }
    }

    /// Starts the wait for one outgoing packet
    pub fn begin(&self) -> SendWindow {
        let started = Instant::now();
        SendWindow {
            tick: self.tick,
            started,
            deadline: self.max_wait.map(|wait| started + wait),
            attempts: 0,
        }
    }
}

impl Default for TxScheduler {
    fn default() -> Self {
        Self::new(DEFAULT_TX_TICK, DEFAULT_MIN_TX_SPACING, None)
    }
}

/// Attempt bookkeeping for a single send
#[derive(Debug, Clone)]
pub struct SendWindow {
    tick: Duration,
    started: Instant,
    deadline: Option<Instant>,
    attempts: u32,
}

impl SendWindow {
    /// Sleeps one tick ahead of the next attempt
    pub fn wait_tick(&mut self) {
        thread::sleep(self.tick);
        self.attempts += 1;
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn waited(&self) -> Duration {
        self.started.elapsed()
    }

    /// When the window closes, if it is bounded
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn expired(&self, now: Instant) -> bool {
        self.deadline.map_or(false, |deadline| now >= deadline)
    }
}
