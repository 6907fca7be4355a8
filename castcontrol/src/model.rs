use std::fmt;

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct DeviceId(pub String);

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What discovery tells us about a cast device.
///
/// The identifier is only meaningful inside the discovery snapshot that
/// produced it: a device may come back with another address (or another
/// position in the list) after the next refresh.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceInfo {
    pub id: DeviceId,
    pub friendly_name: String,
    pub host: String,
    pub port: u16,
    pub model: Option<String>,
}

impl DeviceInfo {
    pub fn location(&self) -> String {
        format!("chromecast://{}:{}", self.host, self.port)
    }
}

/// Entry of the device list shown to the user.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceListing {
    pub index: usize,
    pub friendly_name: String,
    pub selected: bool,
}

/// Player state as reported by the receiver.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlayerState {
    Idle,
    Playing,
    Paused,
    Buffering,
    /// No media session, or a state we could not decode.
    Unknown,
}

impl PlayerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlayerState::Idle => "IDLE",
            PlayerState::Playing => "PLAYING",
            PlayerState::Paused => "PAUSED",
            PlayerState::Buffering => "BUFFERING",
            PlayerState::Unknown => "UNKNOWN",
        }
    }
}

/// Why the receiver went idle, when it says so.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IdleReason {
    Cancelled,
    Interrupted,
    Finished,
    Error,
}

/// One media status notification.
#[derive(Clone, Debug, PartialEq)]
pub struct MediaStatus {
    pub player_state: PlayerState,
    pub content_id: Option<String>,
    pub duration_ms: Option<u64>,
    pub idle_reason: Option<IdleReason>,
    pub current_time_ms: Option<u64>,
    pub volume: Option<f32>,
}

impl MediaStatus {
    pub fn new(player_state: PlayerState) -> Self {
        Self {
            player_state,
            content_id: None,
            duration_ms: None,
            idle_reason: None,
            current_time_ms: None,
            volume: None,
        }
    }

    /// Status with no media session at all.
    pub fn unknown() -> Self {
        Self::new(PlayerState::Unknown)
    }

    pub fn with_media(mut self, content_id: impl Into<String>, duration_ms: u64) -> Self {
        self.content_id = Some(content_id.into());
        self.duration_ms = Some(duration_ms);
        self
    }

    pub fn is_idle(&self) -> bool {
        self.player_state == PlayerState::Idle
    }

    pub fn is_playing(&self) -> bool {
        self.player_state == PlayerState::Playing
    }

    /// Reported duration truncated to whole seconds.
    pub fn duration_secs(&self) -> Option<u64> {
        self.duration_ms.map(|ms| ms / 1000)
    }
}

impl fmt::Display for MediaStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} content={} duration_ms={:?} position_ms={:?}",
            self.player_state.as_str(),
            self.content_id.as_deref().unwrap_or("-"),
            self.duration_ms,
            self.current_time_ms
        )
    }
}

/// Identifies one playback session (controller ↔ selected device).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SessionToken(pub u64);

impl fmt::Display for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session#{}", self.0)
    }
}

/// Advance generation observed by a caller.
///
/// Every time the queue advances the controller bumps its generation; a
/// skip carrying an older ticket refers to a track that is already gone.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct PlayTicket(pub u64);
