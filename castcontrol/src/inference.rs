//! Track completion inference.
//!
//! Cast receivers do not say "track finished" in a reliable way. What we get
//! is a stream of media statuses, and an `IDLE` status can mean two things:
//!
//! - the track that was playing reached its end, or
//! - a new track is being loaded: for a short moment the receiver reports
//!   `IDLE` while still exposing the previous content id and duration.
//!
//! The only usable discriminant is to compare the idle status with the track
//! we believe is current: same content id *and* same duration (in whole
//! seconds). Duration alone does not help, it survives the loading blip too.
//!
//! This remains a best-effort guess. A receiver that reuses URLs or resets
//! its duration reporting can fool it.

use tracing::{debug, trace};

use crate::model::{MediaStatus, PlayerState};
use crate::track::CurrentTrack;

/// Tri-state idle flag.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Activity {
    /// Nothing known yet.
    Unknown,
    Idle,
    Playing,
}

impl Activity {
    /// True when a push should start playback right away.
    pub fn accepts_immediate_start(&self) -> bool {
        matches!(self, Activity::Unknown | Activity::Idle)
    }
}

/// Observation phase of the engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    /// No status accepted yet.
    Unobserved,
    /// Baseline recorded, every further status may trigger an advance.
    Observing,
}

/// Outcome of one status.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verdict {
    /// Player state unknown: status dropped.
    Discarded,
    /// First accepted status: recorded as baseline.
    Baseline,
    /// Flag updated, nothing to do.
    Updated,
    /// The current track reached its end: advance the queue.
    TrackEnded,
}

#[derive(Clone, Debug)]
pub struct CompletionEngine {
    phase: Phase,
    activity: Activity,
}

impl Default for CompletionEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl CompletionEngine {
    pub fn new() -> Self {
        Self {
            phase: Phase::Unobserved,
            activity: Activity::Unknown,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn activity(&self) -> Activity {
        self.activity
    }

    /// Forgets everything, back to the state of a fresh session.
    pub fn reset(&mut self) {
        self.phase = Phase::Unobserved;
        self.activity = Activity::Unknown;
    }

    /// Records that a play command was just acknowledged by the device.
    ///
    /// Until the receiver's own statuses come in, the player is considered
    /// busy so that an enqueue does not restart playback. The observation
    /// phase is left untouched: the first real status is still a baseline.
    pub fn note_play_started(&mut self) {
        self.activity = Activity::Playing;
    }

    /// Feeds one status and tells the caller whether the queue must advance.
    pub fn observe(&mut self, status: &MediaStatus, current: Option<&CurrentTrack>) -> Verdict {
        if status.player_state == PlayerState::Unknown {
            trace!("Dropping status with unknown player state");
            return Verdict::Discarded;
        }

        let idle = status.is_idle();
        self.activity = if idle {
            Activity::Idle
        } else {
            Activity::Playing
        };

        if self.phase == Phase::Unobserved {
            self.phase = Phase::Observing;
            debug!(idle, "Baseline status recorded");
            return Verdict::Baseline;
        }

        if idle && current.is_some_and(|track| matches_track(status, track)) {
            debug!(
                content_id = status.content_id.as_deref().unwrap_or("-"),
                "Current track reached its end"
            );
            return Verdict::TrackEnded;
        }

        Verdict::Updated
    }
}

/// Same content id and same duration in whole seconds.
fn matches_track(status: &MediaStatus, track: &CurrentTrack) -> bool {
    status.content_id.as_deref() == Some(track.url.as_str())
        && status.duration_secs() == Some(track.duration_secs)
}
