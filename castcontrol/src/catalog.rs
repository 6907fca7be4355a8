//! Turns a user-supplied link into queueable tracks.
//!
//! The controller never parses links. A [`CatalogResolver`] returns tracks
//! whose URL is still unresolved (see [`crate::track::LazyUrl`]); a batch
//! may come back partially resolved, in which case the tracks that made it
//! are enqueued and the failures are only counted.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, anyhow, bail};
use tracing::{debug, warn};
use ureq::Agent;
use url::Url;

use crate::errors::{ControlError, Result};
use crate::track::{StaticUrl, Track};

pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(15);

/// Longest duration accepted from an `#EXTINF` line (one week).
pub const MAX_TRACK_SECS: u64 = 7 * 24 * 3600;

/// Tracks obtained from one link, and how many entries could not be used.
#[derive(Clone, Debug, Default)]
pub struct Resolution {
    pub tracks: Vec<Track>,
    pub failures: usize,
}

impl Resolution {
    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }
}

pub trait CatalogResolver: Send + Sync {
    /// Resolves `link`. A link that yields nothing usable is an error.
    fn resolve(&self, link: &str) -> Result<Resolution>;
}

/// Resolver for extended M3U playlists, local or served over HTTP.
///
/// ```text
/// #EXTM3U
/// #EXTINF:215,Artist - Title
/// http://media.local/title.mp3
/// ```
///
/// Durations are mandatory: completion inference needs them. Entries must
/// end up as http(s) URLs since the receiver fetches them itself; relative
/// entries are only accepted in a playlist served over HTTP.
pub struct M3uResolver {
    agent: Agent,
}

impl Default for M3uResolver {
    fn default() -> Self {
        Self::new(DEFAULT_HTTP_TIMEOUT)
    }
}

impl M3uResolver {
    pub fn new(http_timeout: Duration) -> Self {
        let agent: Agent = Agent::config_builder()
            .timeout_global(Some(http_timeout))
            .build()
            .into();
        Self { agent }
    }

    fn fetch(&self, link: &str) -> anyhow::Result<(String, Location)> {
        if is_http(link) {
            let base = Url::parse(link).with_context(|| format!("invalid URL {}", link))?;
            if !looks_like_playlist(base.path()) {
                bail!("not a playlist (a bare media URL carries no duration)");
            }
            let mut response = self
                .agent
                .get(link)
                .call()
                .with_context(|| format!("HTTP request failed for {}", link))?;
            let body = response
                .body_mut()
                .read_to_string()
                .context("cannot read playlist body")?;
            Ok((body, Location::Remote(base)))
        } else {
            let path = PathBuf::from(link);
            let body = fs::read_to_string(&path)
                .with_context(|| format!("cannot read {}", path.display()))?;
            Ok((body, Location::Local))
        }
    }
}

impl CatalogResolver for M3uResolver {
    fn resolve(&self, link: &str) -> Result<Resolution> {
        let link = link.trim();
        let (body, base) = self
            .fetch(link)
            .map_err(|e| ControlError::resolution_failed(link, format!("{:#}", e)))?;

        let entries = parse_m3u(&body);
        let mut resolution = Resolution::default();
        for entry in entries {
            match entry.into_track(&base) {
                Ok(track) => resolution.tracks.push(track),
                Err(e) => {
                    warn!("Skipping playlist entry of {}: {:#}", link, e);
                    resolution.failures += 1;
                }
            }
        }

        debug!(
            link,
            tracks = resolution.tracks.len(),
            failures = resolution.failures,
            "Playlist resolved"
        );
        if resolution.is_empty() {
            return Err(ControlError::resolution_failed(
                link,
                format!("no playable entry ({} rejected)", resolution.failures),
            ));
        }
        Ok(resolution)
    }
}

enum Location {
    Remote(Url),
    Local,
}

impl Location {
    fn join(&self, reference: &str) -> anyhow::Result<String> {
        if is_http(reference) {
            return Ok(reference.to_string());
        }
        match self {
            Location::Remote(base) => {
                let joined = base
                    .join(reference)
                    .with_context(|| format!("cannot join {} to {}", reference, base))?;
                // "ftp://x" ou "file:..." restent absolus après join
                if !matches!(joined.scheme(), "http" | "https") {
                    bail!("{} is not an http(s) URL", joined);
                }
                Ok(joined.to_string())
            }
            Location::Local => bail!(
                "{} is not an http(s) URL, the receiver cannot fetch it",
                reference
            ),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct M3uEntry {
    location: String,
    title: Option<String>,
    duration_secs: Option<i64>,
}

impl M3uEntry {
    fn into_track(self, base: &Location) -> anyhow::Result<Track> {
        let secs = match self.duration_secs {
            Some(secs) if secs > 0 => secs as u64,
            _ => return Err(anyhow!("{} has no duration", self.location)),
        };
        if secs > MAX_TRACK_SECS {
            bail!("{} lasts {}s, more than {}s", self.location, secs, MAX_TRACK_SECS);
        }
        let url = base.join(&self.location)?;
        let title = self.title.unwrap_or_else(|| title_from_location(&self.location));
        Ok(Track::new(Arc::new(StaticUrl(url)), title, secs * 1000))
    }
}

fn parse_m3u(body: &str) -> Vec<M3uEntry> {
    let mut entries = Vec::new();
    let mut pending: Option<(Option<i64>, Option<String>)> = None;

    for line in body.lines().map(str::trim) {
        if line.is_empty() {
            continue;
        }
        if let Some(info) = line.strip_prefix("#EXTINF:") {
            pending = Some(parse_extinf(info));
            continue;
        }
        if line.starts_with('#') {
            continue;
        }
        let (duration_secs, title) = pending.take().unwrap_or((None, None));
        entries.push(M3uEntry {
            location: line.to_string(),
            title,
            duration_secs,
        });
    }
    entries
}

/// `215,Artist - Title` or `215 tvg-id="x",Title`.
fn parse_extinf(info: &str) -> (Option<i64>, Option<String>) {
    let (head, title) = match info.split_once(',') {
        Some((head, title)) => (head, Some(title.trim().to_string())),
        None => (info, None),
    };
    let secs = head
        .split_whitespace()
        .next()
        .and_then(|s| s.parse::<f64>().ok())
        .filter(|s| s.is_finite())
        .map(|s| s.trunc() as i64);
    (secs, title.filter(|t| !t.is_empty()))
}

fn title_from_location(location: &str) -> String {
    let name = location
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(location);
    name.split(['?', '#']).next().unwrap_or(name).to_string()
}

fn is_http(link: &str) -> bool {
    let lower = link.to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

fn looks_like_playlist(path: &str) -> bool {
    let lower = path.to_ascii_lowercase();
    lower.ends_with(".m3u") || lower.ends_with(".m3u8")
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    const PLAYLIST: &str = "#EXTM3U\n\
        #EXTINF:180,Artist - A\n\
        http://media.example/a.mp3\n\
        \n\
        #EXTINF:200.7,Artist - B\n\
        http://cdn.example/b.mp3\n\
        # a comment\n\
        c.mp3\n\
        #EXTINF:-1,Radio\n\
        http://radio.example/live\n\
        #EXTINF:90,Local\n\
        local.mp3\n";

    #[test]
    fn test_parse_m3u() {
        let entries = parse_m3u(PLAYLIST);
        assert_eq!(entries.len(), 5);
        assert_eq!(entries[0].title.as_deref(), Some("Artist - A"));
        assert_eq!(entries[0].duration_secs, Some(180));
        assert_eq!(entries[1].duration_secs, Some(200));
        assert_eq!(entries[2].title, None);
        assert_eq!(entries[2].duration_secs, None);
        assert_eq!(entries[3].duration_secs, Some(-1));
        assert_eq!(entries[4].location, "local.mp3");
    }

    #[test]
    fn test_parse_extinf_attributes() {
        assert_eq!(
            parse_extinf("215 tvg-id=\"x\",Title"),
            (Some(215), Some("Title".to_string()))
        );
        assert_eq!(parse_extinf("oops"), (None, None));
        assert_eq!(parse_extinf("inf,Endless").0, None);
        assert_eq!(parse_extinf("NaN,Broken").0, None);
    }

    #[test]
    fn test_absurd_durations_are_rejected() {
        let base = Location::Remote(Url::parse("http://host/mix.m3u").unwrap());
        for info in ["inf,Endless", "1e17,Huge", "604801,Too long"] {
            let (duration_secs, title) = parse_extinf(info);
            let entry = M3uEntry {
                location: "a.mp3".to_string(),
                title,
                duration_secs,
            };
            assert!(entry.into_track(&base).is_err(), "{} accepted", info);
        }

        let week = M3uEntry {
            location: "a.mp3".to_string(),
            title: None,
            duration_secs: Some(MAX_TRACK_SECS as i64),
        };
        assert_eq!(
            week.into_track(&base).unwrap().duration_ms(),
            MAX_TRACK_SECS * 1000
        );
    }

    #[test]
    fn test_overflowing_durations_count_as_failures() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("huge.m3u");
        fs::write(
            &path,
            "#EXTINF:1e17,Huge\nhttp://h/a.mp3\n#EXTINF:inf,Endless\nhttp://h/b.mp3\n#EXTINF:60,Ok\nhttp://h/c.mp3\n",
        )
        .unwrap();
        let resolution = M3uResolver::default()
            .resolve(path.to_str().unwrap())
            .unwrap();
        assert_eq!(resolution.tracks.len(), 1);
        assert_eq!(resolution.failures, 2);
        assert_eq!(resolution.tracks[0].title(), "Ok");
    }

    #[test]
    fn test_relative_entries_join_remote_base() {
        let base = Location::Remote(Url::parse("http://host/lists/mix.m3u").unwrap());
        assert_eq!(base.join("a.mp3").unwrap(), "http://host/lists/a.mp3");
        assert_eq!(base.join("/media/b.mp3").unwrap(), "http://host/media/b.mp3");
        assert_eq!(
            base.join("https://cdn/c.mp3").unwrap(),
            "https://cdn/c.mp3"
        );
        assert!(base.join("file:///etc/passwd").is_err());
        assert!(base.join("ftp://host/a.mp3").is_err());
    }

    #[test]
    fn test_local_playlist_needs_absolute_urls() {
        assert!(Location::Local.join("a.mp3").is_err());
        assert!(Location::Local.join("/music/a.mp3").is_err());
        assert_eq!(
            Location::Local.join("HTTP://host/a.mp3").unwrap(),
            "HTTP://host/a.mp3"
        );
    }

    #[test]
    fn test_title_from_location() {
        assert_eq!(title_from_location("http://h/x/song.mp3?sig=1"), "song.mp3");
        assert_eq!(title_from_location("song.mp3"), "song.mp3");
    }

    #[test]
    fn test_local_playlist_partial_batch() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mix.m3u");
        let mut file = fs::File::create(&path).unwrap();
        file.write_all(PLAYLIST.as_bytes()).unwrap();

        let resolution = M3uResolver::default()
            .resolve(path.to_str().unwrap())
            .unwrap();
        assert_eq!(resolution.tracks.len(), 2);
        assert_eq!(resolution.failures, 3);

        let first = &resolution.tracks[0];
        assert_eq!(first.title(), "Artist - A");
        assert_eq!(first.duration_ms(), 180_000);
        assert_eq!(first.resolve_url().unwrap(), "http://media.example/a.mp3");
        assert_eq!(resolution.tracks[1].duration_ms(), 200_000);
    }

    #[test]
    fn test_missing_file_is_resolution_failure() {
        let err = M3uResolver::default()
            .resolve("/nonexistent/castbot/mix.m3u")
            .unwrap_err();
        assert!(matches!(err, ControlError::ResolutionFailed { .. }));
    }

    #[test]
    fn test_bare_media_url_is_rejected() {
        let err = M3uResolver::default()
            .resolve("http://cdn.example/song.mp3")
            .unwrap_err();
        match err {
            ControlError::ResolutionFailed { link, .. } => {
                assert_eq!(link, "http://cdn.example/song.mp3")
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_playlist_without_durations_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bare.m3u");
        fs::write(&path, "a.mp3\nb.mp3\n").unwrap();
        let err = M3uResolver::default()
            .resolve(path.to_str().unwrap())
            .unwrap_err();
        assert!(matches!(err, ControlError::ResolutionFailed { .. }));
    }
}
