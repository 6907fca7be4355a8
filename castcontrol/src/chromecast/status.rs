use rust_cast::channels::media::{
    IdleReason as CastIdleReason, PlayerState as CastPlayerState, Status, StatusEntry,
};

use crate::model::{IdleReason, MediaStatus, PlayerState};

/// Converts a receiver media status into our own.
///
/// Only the first entry matters: the Default Media Receiver runs a single
/// media session. No entry at all means no media session, reported as
/// `Unknown`.
pub(crate) fn media_status_from(status: &Status) -> MediaStatus {
    match status.entries.first() {
        Some(entry) => media_status_from_entry(entry),
        None => MediaStatus::unknown(),
    }
}

pub(crate) fn media_status_from_entry(entry: &StatusEntry) -> MediaStatus {
    let mut status = MediaStatus::new(match entry.player_state {
        CastPlayerState::Idle => PlayerState::Idle,
        CastPlayerState::Playing => PlayerState::Playing,
        CastPlayerState::Paused => PlayerState::Paused,
        CastPlayerState::Buffering => PlayerState::Buffering,
    });

    if let Some(media) = entry.media.as_ref() {
        status.content_id = Some(media.content_id.clone());
        status.duration_ms = media.duration.map(secs_to_ms);
    }
    status.current_time_ms = entry.current_time.map(secs_to_ms);
    status.idle_reason = entry.idle_reason.as_ref().map(|reason| match reason {
        CastIdleReason::Cancelled => IdleReason::Cancelled,
        CastIdleReason::Interrupted => IdleReason::Interrupted,
        CastIdleReason::Finished => IdleReason::Finished,
        CastIdleReason::Error => IdleReason::Error,
    });
    status
}

fn secs_to_ms(secs: f32) -> u64 {
    if secs.is_finite() && secs > 0.0 {
        (secs as f64 * 1000.0).round() as u64
    } else {
        0
    }
}

/// Keeps the last known media identity across partial broadcasts.
///
/// Receivers only send the `media` block when it changes; the idle status
/// that closes a track usually comes without it. A client that kept the
/// previous values would still see the finished track's content id and
/// duration, and this is what completion inference expects.
#[derive(Debug, Default)]
pub(crate) struct StatusMerger {
    content_id: Option<String>,
    duration_ms: Option<u64>,
}

impl StatusMerger {
    pub(crate) fn merge(&mut self, mut status: MediaStatus) -> MediaStatus {
        if status.player_state == PlayerState::Unknown {
            return status;
        }

        match status.content_id.as_ref() {
            Some(content_id) => {
                if self.content_id.as_ref() != Some(content_id) {
                    self.duration_ms = None;
                }
                self.content_id = Some(content_id.clone());
            }
            None => status.content_id = self.content_id.clone(),
        }

        match status.duration_ms {
            Some(ms) => self.duration_ms = Some(ms),
            None => status.duration_ms = self.duration_ms,
        }
        status
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secs_to_ms() {
        assert_eq!(secs_to_ms(180.0), 180_000);
        assert_eq!(secs_to_ms(180.5), 180_500);
        assert_eq!(secs_to_ms(-1.0), 0);
        assert_eq!(secs_to_ms(f32::NAN), 0);
    }

    #[test]
    fn test_merger_fills_idle_status() {
        let mut merger = StatusMerger::default();
        let playing = MediaStatus::new(PlayerState::Playing).with_media("http://a", 180_000);
        assert_eq!(merger.merge(playing.clone()), playing);

        let mut idle = MediaStatus::new(PlayerState::Idle);
        idle.idle_reason = Some(IdleReason::Finished);
        let merged = merger.merge(idle);
        assert_eq!(merged.content_id.as_deref(), Some("http://a"));
        assert_eq!(merged.duration_ms, Some(180_000));
        assert_eq!(merged.idle_reason, Some(IdleReason::Finished));
    }

    #[test]
    fn test_merger_forgets_duration_of_previous_content() {
        let mut merger = StatusMerger::default();
        merger.merge(MediaStatus::new(PlayerState::Playing).with_media("http://a", 180_000));

        let mut loading = MediaStatus::new(PlayerState::Buffering);
        loading.content_id = Some("http://b".to_string());
        let merged = merger.merge(loading);
        assert_eq!(merged.duration_ms, None);
    }

    #[test]
    fn test_merger_leaves_unknown_untouched() {
        let mut merger = StatusMerger::default();
        merger.merge(MediaStatus::new(PlayerState::Playing).with_media("http://a", 1_000));
        let merged = merger.merge(MediaStatus::unknown());
        assert_eq!(merged.content_id, None);
    }
}
