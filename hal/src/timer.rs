//! # Ticks and Deadlines
//!
//! Tick counters are free-running 32-bit values that wrap; every
//! comparison here uses wrapping subtraction.

use core::fmt;
use core::sync::atomic::{AtomicU32, Ordering};

use crate::{HalError, HalResult};

/// A monotonic, wrapping tick counter
pub trait TickSource {
    /// Current tick count
    fn ticks(&self) -> u32;
}

impl<T: TickSource + ?Sized> TickSource for &T {
    fn ticks(&self) -> u32 {
        (**self).ticks()
    }
}

/// Ticks elapsed from `start` to `now`, tolerant of counter wrap
#[inline]
pub const fn elapsed(start: u32, now: u32) -> u32 {
    now.wrapping_sub(start)
}

/// Upper bound on the time a busy-poll may spin
pub struct Deadline<'a> {
    clock: &'a dyn TickSource,
    start: u32,
    budget: u32,
}

impl<'a> Deadline<'a> {
    /// Start a deadline `budget` ticks from now
    pub fn new(clock: &'a dyn TickSource, budget: u32) -> Self {
        Self {
            clock,
            start: clock.ticks(),
            budget,
        }
    }

    /// Ticks spent since the deadline was started
    pub fn elapsed(&self) -> u32 {
        elapsed(self.start, self.clock.ticks())
    }

    /// Ticks left before the budget runs out
    pub fn remaining(&self) -> u32 {
        self.budget.saturating_sub(self.elapsed())
    }

    /// Has the budget been exceeded
    pub fn expired(&self) -> bool {
        self.elapsed() > self.budget
    }

    /// `Err(Timeout)` once the budget has been exceeded
    pub fn check(&self) -> HalResult<()> {
        if self.expired() {
            Err(HalError::Timeout)
        } else {
            Ok(())
        }
    }

    /// Spin until `ticks` have passed on the deadline's clock
    pub fn delay(&self, ticks: u32) -> HalResult<()> {
        let from = self.clock.ticks();
        while elapsed(from, self.clock.ticks()) < ticks {
            self.check()?;
            core::hint::spin_loop();
        }
        Ok(())
    }
}

impl fmt::Debug for Deadline<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Deadline")
            .field("start", &self.start)
            .field("budget", &self.budget)
            .finish()
    }
}

/// Tick counter that advances by a fixed step every time it is read
#[derive(Debug)]
pub struct StepClock {
    now: AtomicU32,
    step: u32,
}

impl StepClock {
    /// Create a clock starting at `start`
    pub const fn new(start: u32, step: u32) -> Self {
        Self {
            now: AtomicU32::new(start),
            step,
        }
    }

    /// Current value without advancing
    pub fn peek(&self) -> u32 {
        self.now.load(Ordering::Relaxed)
    }

    /// Jump the clock to `ticks`
    pub fn set(&self, ticks: u32) {
        self.now.store(ticks, Ordering::Relaxed);
    }
}

impl TickSource for StepClock {
    fn ticks(&self) -> u32 {
        self.now.fetch_add(self.step, Ordering::Relaxed)
    }
}
