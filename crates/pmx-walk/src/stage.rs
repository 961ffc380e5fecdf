//! Walk stage schedule.

use rust_decimal::Decimal;
use std::time::Duration;

/// How far into the spread the resting order is priced, by time in the
/// walk: at the touch for 30s, a quarter of the spread for the next 30s,
/// half the spread for the 30s after that, then the urgency policy takes
/// over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkStage {
    AtTouch,
    Walk25,
    Walk50,
    Escalate,
}

impl WalkStage {
    /// Stage for a given time since the walk started.
    pub fn at(elapsed: Duration) -> Self {
        match elapsed.as_secs() {
            0..=29 => Self::AtTouch,
            30..=59 => Self::Walk25,
            60..=89 => Self::Walk50,
            _ => Self::Escalate,
        }
    }

    /// Fraction of the spread conceded to the other side.
    pub fn fraction(&self) -> Decimal {
        match self {
            Self::AtTouch => Decimal::ZERO,
            Self::Walk25 => Decimal::new(25, 2),
            // Escalation pricing is the urgency policy's business; until it
            // acts the order holds at the half-spread level.
            Self::Walk50 | Self::Escalate => Decimal::new(5, 1),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::AtTouch => "at_touch",
            Self::Walk25 => "walk_25",
            Self::Walk50 => "walk_50",
            Self::Escalate => "escalate",
        }
    }
}
