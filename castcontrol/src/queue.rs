//! Pending tracks, in play order.
//!
//! The queue only holds what has not started yet: the track being played
//! is popped before its play command is sent and lives in the controller
//! as the current track.

use std::collections::VecDeque;

use rand::seq::SliceRandom;
use tracing::info;

use crate::track::Track;

#[derive(Clone, Debug, Default)]
pub struct PlayQueue {
    items: VecDeque<Track>,
}

impl PlayQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn push(&mut self, track: Track) {
        self.items.push_back(track);
    }

    pub fn extend<I: IntoIterator<Item = Track>>(&mut self, tracks: I) {
        self.items.extend(tracks);
    }

    /// Puts a track back at the head (used when starting it failed).
    pub fn push_front(&mut self, track: Track) {
        self.items.push_front(track);
    }

    pub fn pop_front(&mut self) -> Option<Track> {
        self.items.pop_front()
    }

    pub fn peek(&self) -> Option<&Track> {
        self.items.front()
    }

    /// Uniform random permutation of the pending tracks (Fisher-Yates).
    pub fn shuffle(&mut self) {
        info!("Shuffling {} queued track(s)", self.items.len());
        let mut rng = rand::rng();
        self.items.make_contiguous().shuffle(&mut rng);
    }

    pub fn titles(&self) -> Vec<String> {
        self.items.iter().map(|t| t.title().to_string()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Track> {
        self.items.iter()
    }
}

/// Titles of the current track and of the pending ones, for display.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct QueueView {
    pub current: Option<String>,
    pub pending: Vec<String>,
}

impl QueueView {
    pub fn is_empty(&self) -> bool {
        self.current.is_none() && self.pending.is_empty()
    }

    /// Renders the view as one message.
    ///
    /// With a `limit` (in characters) whole pending lines are dropped from
    /// the tail and replaced by a "… and N more" marker; the result never
    /// exceeds the limit.
    pub fn render(&self, limit: Option<usize>) -> String {
        if self.is_empty() {
            return truncate_chars("Queue is empty".to_string(), limit);
        }

        let mut header = String::from("Now playing:\n");
        header.push_str(self.current.as_deref().unwrap_or("nothing"));
        if self.pending.is_empty() {
            return truncate_chars(header, limit);
        }
        header.push_str("\n\nUp next:");

        let lines: Vec<String> = self
            .pending
            .iter()
            .enumerate()
            .map(|(i, title)| format!("{}. {}", i + 1, title))
            .collect();

        let full = format!("{}\n{}", header, lines.join("\n"));
        let limit = match limit {
            Some(limit) if full.chars().count() > limit => limit,
            _ => return full,
        };

        // Réserve la place du marqueur dans le pire cas.
        let reserve = more_marker(lines.len()).chars().count();
        let mut out = header;
        let mut used = out.chars().count();
        let mut kept = 0;
        for line in &lines {
            let extra = 1 + line.chars().count();
            if used + extra + reserve > limit {
                break;
            }
            out.push('\n');
            out.push_str(line);
            used += extra;
            kept += 1;
        }
        out.push_str(&more_marker(lines.len() - kept));
        truncate_chars(out, Some(limit))
    }
}

fn more_marker(count: usize) -> String {
    format!("\n… and {} more", count)
}

fn truncate_chars(text: String, limit: Option<usize>) -> String {
    match limit {
        Some(limit) if text.chars().count() > limit => text.chars().take(limit).collect(),
        _ => text,
    }
}
