// Simulation time: the monotonic clock and deadline helper.
//
// The sim advances in fixed ticks of `tick_duration_ms`. Everything that
// waits (grace delays, cooldowns, cache TTLs, meal and treatment durations)
// is expressed as a `Deadline`: a timestamp compared against `SimClock`,
// never a scheduled callback. Services that need the current time take a
// `&dyn Clock` (or `&impl Clock`) so tests can drive them with a clock they
// control.
//
// **Critical constraint: determinism.** Never read wall-clock time. Sim time
// is derived solely from the tick counter.

use serde::{Deserialize, Serialize};

/// Anything that can report the current sim time in milliseconds.
pub trait Clock {
    fn now_ms(&self) -> u64;
}

/// Tick-driven monotonic clock owned by the world.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct SimClock {
    tick: u64,
    tick_duration_ms: u64,
}

impl SimClock {
    /// Ticks are at least one millisecond long.
    pub fn new(tick_duration_ms: u64) -> Self {
        Self {
            tick: 0,
            tick_duration_ms: tick_duration_ms.max(1),
        }
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn tick_duration_ms(&self) -> u64 {
        self.tick_duration_ms
    }

    /// Seconds per tick, for rate-based integration (speeds, drains).
    pub fn dt_secs(&self) -> f32 {
        self.tick_duration_ms as f32 / 1000.0
    }

    /// Move the clock to `tick`. Ticks never run backwards.
    pub fn advance_to(&mut self, tick: u64) {
        debug_assert!(tick >= self.tick, "clock moved backwards");
        self.tick = self.tick.max(tick);
    }

    /// Number of whole ticks covering `ms`, at least one.
    pub fn ticks_for(&self, ms: u64) -> u64 {
        ms.div_ceil(self.tick_duration_ms).max(1)
    }
}

impl Clock for SimClock {
    fn now_ms(&self) -> u64 {
        self.tick * self.tick_duration_ms
    }
}

/// An optional point in sim time. Unset deadlines are never due and never
/// active.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deadline(Option<u64>);

impl Deadline {
    pub const UNSET: Self = Self(None);

    pub fn after(now_ms: u64, duration_ms: u64) -> Self {
        Self(Some(now_ms.saturating_add(duration_ms)))
    }

    pub fn at(&self) -> Option<u64> {
        self.0
    }

    pub fn is_set(&self) -> bool {
        self.0.is_some()
    }

    /// The deadline is set and has been reached.
    pub fn is_due(&self, now_ms: u64) -> bool {
        self.0.is_some_and(|t| now_ms >= t)
    }

    /// The deadline is set and still in the future (a running cooldown).
    pub fn is_active(&self, now_ms: u64) -> bool {
        self.0.is_some_and(|t| now_ms < t)
    }

    pub fn clear(&mut self) {
        self.0 = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clock_reports_ms_from_ticks() {
        let mut clock = SimClock::new(50);
        assert_eq!(clock.now_ms(), 0);
        clock.advance_to(3);
        assert_eq!(clock.now_ms(), 150);
        assert!((clock.dt_secs() - 0.05).abs() < 1e-6);
    }

    #[test]
    fn ticks_for_rounds_up() {
        let clock = SimClock::new(100);
        assert_eq!(clock.ticks_for(1), 1);
        assert_eq!(clock.ticks_for(100), 1);
        assert_eq!(clock.ticks_for(101), 2);
        assert_eq!(clock.ticks_for(0), 1);
    }

    #[test]
    fn zero_tick_duration_is_clamped() {
        let mut clock = SimClock::new(0);
        assert_eq!(clock.tick_duration_ms(), 1);
        assert_eq!(clock.ticks_for(250), 250);
        clock.advance_to(4);
        assert_eq!(clock.now_ms(), 4);
    }

    #[test]
    fn deadline_due_and_active() {
        let d = Deadline::after(1000, 500);
        assert!(d.is_active(1200));
        assert!(!d.is_due(1200));
        assert!(d.is_due(1500));
        assert!(!d.is_active(1500));

        let unset = Deadline::UNSET;
        assert!(!unset.is_due(u64::MAX));
        assert!(!unset.is_active(0));
    }
}
