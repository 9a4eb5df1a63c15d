//! Hysteretic liveness state machine for checked servers.
//!
//! A server climbs through `rise` consecutive successful probes before it is
//! declared up, and burns through `fall` consecutive failures before it is
//! declared down again. Transitions are edges; everything in between only
//! moves the counters.

use serde::Serialize;

/// Rise/fall thresholds governing liveness transitions. Both are at least 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Thresholds {
    pub rise: u32,
    pub fall: u32,
}

impl Thresholds {
    pub fn new(rise: u32, fall: u32) -> Self {
        debug_assert!(rise >= 1 && fall >= 1);
        Self { rise, fall }
    }

    /// Upper bound of the derived health counter.
    pub fn max_health(self) -> u32 {
        self.rise + self.fall - 1
    }
}

/// Liveness of a checked server.
///
/// `Down` carries the streak of consecutive successful probes since the
/// server went down; `Up` carries the cushion of failures the server can
/// still absorb before going down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum Liveness {
    Down { streak: u32 },
    Up { cushion: u32 },
}

/// Edge produced by feeding one probe outcome to the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    None,
    WentUp,
    WentDown,
}

impl Liveness {
    /// A fully down server with no recovery streak.
    pub fn down() -> Self {
        Liveness::Down { streak: 0 }
    }

    /// The boot state of a checked server: considered up, but with no
    /// cushion, so a single failed probe takes it down.
    pub fn initial() -> Self {
        Liveness::Up { cushion: 0 }
    }

    pub fn is_up(self) -> bool {
        matches!(self, Liveness::Up { .. })
    }

    /// The equivalent scalar health counter in `[0, rise + fall - 1]`:
    /// below `rise` while down, at or above `rise` while up. External
    /// counters and status reporting use this value.
    pub fn health(self, th: Thresholds) -> u32 {
        match self {
            Liveness::Down { streak } => streak,
            Liveness::Up { cushion } => th.rise + cushion,
        }
    }

    /// Feed a successful probe.
    ///
    /// Crossing the rise threshold restores the full failure cushion; a
    /// success while up only grows the cushion toward its clamp.
    #[must_use]
    pub fn observe_success(&mut self, th: Thresholds) -> Transition {
        match *self {
            Liveness::Down { streak } if streak + 1 >= th.rise => {
                *self = Liveness::Up { cushion: th.fall - 1 };
                Transition::WentUp
            }
            Liveness::Down { streak } => {
                *self = Liveness::Down { streak: streak + 1 };
                Transition::None
            }
            Liveness::Up { cushion } => {
                *self = Liveness::Up { cushion: (cushion + 1).min(th.fall - 1) };
                Transition::None
            }
        }
    }

    /// Feed a failed or timed-out probe.
    ///
    /// A failure while down erases any partial recovery streak.
    #[must_use]
    pub fn observe_failure(&mut self) -> Transition {
        match *self {
            Liveness::Up { cushion } if cushion > 0 => {
                *self = Liveness::Up { cushion: cushion - 1 };
                Transition::None
            }
            Liveness::Up { .. } => {
                *self = Liveness::Down { streak: 0 };
                Transition::WentDown
            }
            Liveness::Down { .. } => {
                *self = Liveness::Down { streak: 0 };
                Transition::None
            }
        }
    }
}
