use std::time::{Duration, Instant};

use crate::error::TimeControlError;
use crate::models::{ClockSnapshot, Side};

pub const MAX_START_MINUTES: u64 = 24 * 60;
pub const MAX_INCREMENT_SECONDS: u64 = 10 * 60;

/// Starting time per side plus the increment added after each move
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeControl {
    pub initial: Duration,
    pub increment: Duration,
}

impl TimeControl {
    /// `None` (untimed) unless a positive start time is given.
    /// Values above `MAX_START_MINUTES` or `MAX_INCREMENT_SECONDS` are refused.
    pub fn from_minutes(
        start_minutes: Option<u64>,
        increment_seconds: Option<u64>,
    ) -> Result<Option<Self>, TimeControlError> {
        let increment = increment_seconds.unwrap_or(0);
        if increment > MAX_INCREMENT_SECONDS {
            return Err(TimeControlError::IncrementTooLong(increment));
        }
        match start_minutes {
            Some(minutes) if minutes > MAX_START_MINUTES => Err(TimeControlError::StartTooLong(minutes)),
            Some(minutes) if minutes > 0 => {
                let secs = minutes
                    .checked_mul(60)
                    .ok_or(TimeControlError::StartTooLong(minutes))?;
                Ok(Some(Self {
                    initial: Duration::from_secs(secs),
                    increment: Duration::from_secs(increment),
                }))
            }
            _ => Ok(None),
        }
    }
}

/// Chess clock for one match.
///
/// Only the side to move is charged; `press` stops its clock, adds the
/// increment and starts the opponent's.
#[derive(Debug, Clone)]
pub struct MatchClock {
    control: TimeControl,
    white_remaining: Duration,
    black_remaining: Duration,
    running: Option<(Side, Instant)>,
}

impl MatchClock {
    pub fn new(control: TimeControl) -> Self {
        Self {
            control,
            white_remaining: control.initial,
            black_remaining: control.initial,
            running: None,
        }
    }

    pub fn control(&self) -> TimeControl {
        self.control
    }

    /// Resets both clocks and starts `side`'s
    pub fn start(&mut self, side: Side, now: Instant) {
        self.white_remaining = self.control.initial;
        self.black_remaining = self.control.initial;
        self.running = Some((side, now));
    }

    pub fn stop(&mut self, now: Instant) {
        if let Some((side, since)) = self.running.take() {
            self.charge(side, now.saturating_duration_since(since));
        }
    }

    /// Ends `mover`'s turn. Returns `Err(mover)` if its flag had already fallen.
    pub fn press(&mut self, mover: Side, now: Instant) -> Result<(), Side> {
        if let Some((side, since)) = self.running {
            if side == mover {
                self.charge(side, now.saturating_duration_since(since));
                if self.remaining_stored(side).is_zero() {
                    self.running = None;
                    return Err(side);
                }
                let incremented = self.remaining_stored(side).saturating_add(self.control.increment);
                self.set_remaining(side, incremented);
            }
        }
        self.running = Some((mover.opponent(), now));
        Ok(())
    }

    pub fn remaining(&self, side: Side, now: Instant) -> Duration {
        let stored = self.remaining_stored(side);
        match self.running {
            Some((running, since)) if running == side => {
                stored.saturating_sub(now.saturating_duration_since(since))
            }
            _ => stored,
        }
    }

    /// The side whose flag has fallen, if any
    pub fn expired(&self, now: Instant) -> Option<Side> {
        let (side, _) = self.running?;
        self.remaining(side, now).is_zero().then_some(side)
    }

    pub fn snapshot(&self, now: Instant) -> ClockSnapshot {
        ClockSnapshot {
            white_time_ms: millis(self.remaining(Side::White, now)),
            black_time_ms: millis(self.remaining(Side::Black, now)),
            increment_ms: millis(self.control.increment),
            active: self.running.map(|(side, _)| side),
        }
    }

    fn remaining_stored(&self, side: Side) -> Duration {
        match side {
            Side::White => self.white_remaining,
            Side::Black => self.black_remaining,
        }
    }

    fn set_remaining(&mut self, side: Side, value: Duration) {
        match side {
            Side::White => self.white_remaining = value,
            Side::Black => self.black_remaining = value,
        }
    }

    fn charge(&mut self, side: Side, elapsed: Duration) {
        let left = self.remaining_stored(side).saturating_sub(elapsed);
        self.set_remaining(side, left);
    }
}

/// Whole milliseconds, saturating at `u64::MAX`
pub fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
