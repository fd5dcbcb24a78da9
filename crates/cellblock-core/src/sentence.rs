//! Sentence clocks

use cellblock_api::ClockKind;
use chrono::{DateTime, Local, Utc};
use std::time::Duration;

/// Longest sentence the engine will hold (100 years)
pub const MAX_SENTENCE: Duration = Duration::from_secs(100 * 365 * 86_400);

/// Time left on a sentence.
///
/// A sentence runs against a deadline while it counts down and is frozen as a
/// remaining duration while it does not (an offline prisoner when offline
/// time is not counted).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SentenceClock {
    Remaining(Duration),
    Deadline(DateTime<Local>),
}

impl SentenceClock {
    /// A fresh clock; `running` selects the deadline representation
    pub fn start(duration: Duration, running: bool, now: DateTime<Local>) -> Self {
        let clock = SentenceClock::Remaining(duration);
        if running { clock.to_deadline(now) } else { clock }
    }

    /// Time left, never negative
    pub fn time_left(&self, now: DateTime<Local>) -> Duration {
        match self {
            SentenceClock::Remaining(left) => *left,
            SentenceClock::Deadline(deadline) => (*deadline - now).to_std().unwrap_or(Duration::ZERO),
        }
    }

    /// When the sentence ends if it runs from `now`; remaining time beyond
    /// [`MAX_SENTENCE`] is capped
    pub fn deadline(&self, now: DateTime<Local>) -> DateTime<Local> {
        match self {
            SentenceClock::Remaining(left) => {
                let left = cellblock_util::to_chrono((*left).min(MAX_SENTENCE));
                now.checked_add_signed(left)
                    .unwrap_or_else(|| DateTime::<Utc>::MAX_UTC.with_timezone(&Local))
            }
            SentenceClock::Deadline(deadline) => *deadline,
        }
    }

    pub fn to_deadline(self, now: DateTime<Local>) -> Self {
        SentenceClock::Deadline(self.deadline(now))
    }

    pub fn to_remaining(self, now: DateTime<Local>) -> Self {
        SentenceClock::Remaining(self.time_left(now))
    }

    pub fn is_served(&self, now: DateTime<Local>) -> bool {
        self.time_left(now).is_zero()
    }

    pub fn kind(&self) -> ClockKind {
        match self {
            SentenceClock::Remaining(_) => ClockKind::Remaining,
            SentenceClock::Deadline(_) => ClockKind::Deadline,
        }
    }
}
