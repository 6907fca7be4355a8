use std::fmt;
use std::sync::Arc;

use anyhow::Result;

/// Deferred resolution of a playable URL.
///
/// Catalog lookups are slow and the links they return may expire, so a
/// track only carries the means to obtain its URL. The queue calls
/// [`LazyUrl::resolve_url`] when the track is popped for playback, never
/// at enqueue time.
pub trait LazyUrl: Send + Sync + fmt::Debug {
    fn resolve_url(&self) -> Result<String>;
}

/// An URL that is already known.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StaticUrl(pub String);

impl LazyUrl for StaticUrl {
    fn resolve_url(&self) -> Result<String> {
        Ok(self.0.clone())
    }
}

/// A queued unit of audio. Immutable once built.
#[derive(Clone)]
pub struct Track {
    source: Arc<dyn LazyUrl>,
    title: String,
    duration_ms: u64,
}

impl Track {
    pub fn new(source: Arc<dyn LazyUrl>, title: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            source,
            title: title.into(),
            duration_ms,
        }
    }

    pub fn from_url(url: impl Into<String>, title: impl Into<String>, duration_ms: u64) -> Self {
        Self::new(Arc::new(StaticUrl(url.into())), title, duration_ms)
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn duration_ms(&self) -> u64 {
        self.duration_ms
    }

    pub fn resolve_url(&self) -> Result<String> {
        self.source.resolve_url()
    }
}

impl fmt::Debug for Track {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Track")
            .field("title", &self.title)
            .field("duration_ms", &self.duration_ms)
            .field("source", &self.source)
            .finish()
    }
}

/// The track the device is playing, with its URL resolved.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CurrentTrack {
    pub url: String,
    pub title: String,
    /// Duration truncated to whole seconds, as compared with device status.
    pub duration_secs: u64,
}

impl CurrentTrack {
    pub fn new(url: String, track: &Track) -> Self {
        Self {
            url,
            title: track.title.clone(),
            duration_secs: track.duration_ms / 1000,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[derive(Debug, Default)]
    struct CountingUrl {
        calls: AtomicUsize,
    }

    impl LazyUrl for CountingUrl {
        fn resolve_url(&self) -> Result<String> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(format!("http://cdn/track.mp3?token={}", n))
        }
    }

    #[test]
    fn test_resolution_is_deferred() {
        let source = Arc::new(CountingUrl::default());
        let track = Track::new(source.clone(), "Song", 215_999);
        assert_eq!(source.calls.load(Ordering::SeqCst), 0);

        let url = track.resolve_url().unwrap();
        assert_eq!(url, "http://cdn/track.mp3?token=0");
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_current_track_truncates_duration() {
        let track = Track::from_url("http://a", "A", 180_999);
        let current = CurrentTrack::new("http://a".to_string(), &track);
        assert_eq!(current.duration_secs, 180);
        assert_eq!(current.title, "A");
    }
}
