//! Button-driven measurement period.
//!
//! Every accepted button press halves the period until the fourth press,
//! which restores it: 2000 -> 1000 -> 500 -> 250 -> 2000 -> ...
//! Presses closer than [`DEBOUNCE`] to the previous accepted one are
//! ignored.

use std::sync::atomic::{AtomicI32, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

#[cfg(target_os = "linux")]
use nix::time::{clock_gettime, ClockId};

use crate::error::*;

pub const PERIOD_START_MS: i32 = 2000;
pub const PERIOD_DIVISOR: i32 = 2;
pub const MAX_STEP_COUNT: u32 = 4;
pub const DEBOUNCE: Duration = Duration::from_millis(250);

/// Outcome reported back to whoever delivered the edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrqReturn {
    None,
    Handled,
}

/// Source of monotonic timestamps, as offsets from an arbitrary origin.
pub trait MonotonicClock {
    fn now(&self) -> Result<Duration>;
}

#[cfg(target_os = "linux")]
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemMonotonic;

#[cfg(target_os = "linux")]
impl MonotonicClock for SystemMonotonic {
    fn now(&self) -> Result<Duration> {
        let ts = clock_gettime(ClockId::CLOCK_MONOTONIC)?;
        Ok(Duration::new(ts.tv_sec() as u64, ts.tv_nsec() as u32))
    }
}

/// Period, press counter and last accepted edge. Only `on_edge` mutates;
/// readers may load `period_ms` from any thread.
#[derive(Debug)]
pub struct PeriodState {
    period_ms: AtomicI32,
    button_pressed: AtomicU32,
    last_edge_ms: AtomicU64,
}

impl PeriodState {
    /// `now` is the load time; edges within [`DEBOUNCE`] of it are dropped.
    pub fn new(now: Duration) -> PeriodState {
        PeriodState {
            period_ms: AtomicI32::new(PERIOD_START_MS),
            button_pressed: AtomicU32::new(0),
            last_edge_ms: AtomicU64::new(as_millis(now)),
        }
    }

    pub fn period_ms(&self) -> i32 {
        self.period_ms.load(Ordering::Relaxed)
    }

    pub fn button_pressed(&self) -> u32 {
        self.button_pressed.load(Ordering::Relaxed)
    }

    /// Handles one falling edge observed at `now`.
    pub fn on_edge(&self, now: Duration) -> IrqReturn {
        let now_ms = as_millis(now);
        let last_ms = self.last_edge_ms.load(Ordering::Relaxed);
        if now_ms.saturating_sub(last_ms) < DEBOUNCE.as_millis() as u64 {
            return IrqReturn::None;
        }

        self.last_edge_ms.store(now_ms, Ordering::Relaxed);
        let pressed = self.button_pressed.fetch_add(1, Ordering::Relaxed).wrapping_add(1);

        let period = if pressed % MAX_STEP_COUNT != 0 {
            self.period_ms() / PERIOD_DIVISOR
        } else {
            PERIOD_START_MS
        };
        self.period_ms.store(period, Ordering::Relaxed);

        IrqReturn::Handled
    }
}

fn as_millis(t: Duration) -> u64 {
    t.as_secs() * 1000 + u64::from(t.subsec_millis())
}
