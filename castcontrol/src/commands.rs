//! User intents and their effect on the controller.
//!
//! A front-end turns whatever the user typed (or clicked) into a
//! [`Command`], hands it to [`CommandHandler::execute`] and shows the
//! [`Reply`]. Errors never escape this layer: they are logged and rendered
//! as a message.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};

use crate::catalog::CatalogResolver;
use crate::controller::{CastController, Started};
use crate::errors::ControlError;
use crate::model::PlayTicket;

pub const DEFAULT_MAX_MESSAGE_LENGTH: usize = 4096;

const CALLBACK_PLAYBACK: &str = "playbackControl";
const CALLBACK_DEVICE: &str = "device";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    Start,
    Help,
    Devices,
    SelectDevice(usize),
    Refresh,
    Enqueue(String),
    PlayPause,
    Stop,
    VolumeUp,
    VolumeDown,
    /// Skip the track playing now, or only the one designated by the ticket.
    Skip(Option<PlayTicket>),
    Shuffle,
    Repeat,
    ShowQueue,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ParseError {
    #[error("Empty command")]
    Empty,
    #[error("Unknown command: {0}")]
    Unknown(String),
    #[error("Invalid device index: {0}")]
    InvalidIndex(String),
    #[error("Invalid skip ticket: {0}")]
    InvalidTicket(String),
}

impl Command {
    /// Parses one line of user input.
    ///
    /// Understands `/command [arg]`, the button payloads
    /// (`playbackControl stop`, `playbackControl skip 3`, `device 1`), and
    /// treats any other text as a link to enqueue.
    pub fn parse(line: &str) -> Result<Command, ParseError> {
        let line = line.trim();
        if line.is_empty() {
            return Err(ParseError::Empty);
        }

        let mut words = line.split_whitespace();
        let head = words.next().unwrap_or_default();
        let arg = words.next();
        let extra = words.next();

        if let Some(name) = head.strip_prefix('/') {
            // "/device@bot" comes from group chats.
            let name = name.split('@').next().unwrap_or(name);
            // "/music/mix.m3u" is a path, not a command.
            if !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
                return Self::parse_named(&name.to_ascii_lowercase(), arg);
            }
        }

        match head {
            CALLBACK_PLAYBACK => match arg {
                Some(action) => Self::parse_playback_action(action, extra),
                None => Err(ParseError::Unknown(line.to_string())),
            },
            CALLBACK_DEVICE if arg.is_some() => Self::parse_index(arg),
            _ => Ok(Command::Enqueue(line.to_string())),
        }
    }

    fn parse_named(name: &str, arg: Option<&str>) -> Result<Command, ParseError> {
        match name {
            "start" => Ok(Command::Start),
            "help" => Ok(Command::Help),
            "devices" => Ok(Command::Devices),
            "device" => match arg {
                Some(_) => Self::parse_index(arg),
                None => Ok(Command::Devices),
            },
            "refresh" => Ok(Command::Refresh),
            "play" | "enqueue" => match arg {
                Some(link) => Ok(Command::Enqueue(link.to_string())),
                None => Err(ParseError::Unknown(format!("/{} needs a link", name))),
            },
            "queue" => Ok(Command::ShowQueue),
            other => Self::parse_playback_action(other, arg),
        }
    }

    fn parse_playback_action(action: &str, arg: Option<&str>) -> Result<Command, ParseError> {
        match action {
            "playpause" | "pause" => Ok(Command::PlayPause),
            "stop" => Ok(Command::Stop),
            "volume_up" | "volup" => Ok(Command::VolumeUp),
            "volume_down" | "voldown" => Ok(Command::VolumeDown),
            "skip" | "next" => match arg {
                Some(raw) => raw
                    .parse::<u64>()
                    .map(|generation| Command::Skip(Some(PlayTicket(generation))))
                    .map_err(|_| ParseError::InvalidTicket(raw.to_string())),
                None => Ok(Command::Skip(None)),
            },
            "shuffle" => Ok(Command::Shuffle),
            "repeat" => Ok(Command::Repeat),
            other => Err(ParseError::Unknown(other.to_string())),
        }
    }

    fn parse_index(arg: Option<&str>) -> Result<Command, ParseError> {
        let raw = arg.unwrap_or_default();
        raw.parse::<usize>()
            .map(Command::SelectDevice)
            .map_err(|_| ParseError::InvalidIndex(raw.to_string()))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReplyKind {
    Info,
    Error,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Reply {
    pub kind: ReplyKind,
    pub text: String,
    /// Set when the reply announces a track: the skip button must carry it.
    pub ticket: Option<PlayTicket>,
}

impl Reply {
    pub fn info(text: impl Into<String>) -> Self {
        Self {
            kind: ReplyKind::Info,
            text: text.into(),
            ticket: None,
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            kind: ReplyKind::Error,
            text: text.into(),
            ticket: None,
        }
    }

    fn with_ticket(mut self, ticket: PlayTicket) -> Self {
        self.ticket = Some(ticket);
        self
    }

    pub fn is_error(&self) -> bool {
        self.kind == ReplyKind::Error
    }

    /// Payload of the skip button for the announced track.
    pub fn skip_payload(&self) -> Option<String> {
        self.ticket
            .map(|ticket| format!("{} skip {}", CALLBACK_PLAYBACK, ticket.0))
    }

    fn bounded(mut self, max_len: usize) -> Self {
        if self.text.chars().count() > max_len {
            self.text = self.text.chars().take(max_len).collect();
        }
        self
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl From<ParseError> for Reply {
    fn from(err: ParseError) -> Self {
        Reply::error(format!("{}. Try /help", err))
    }
}

const HELP: &str = "/devices - list devices\n\
/device N - select device N\n\
/refresh - look for devices again\n\
/queue - show the queue\n\
/playpause /stop /volup /voldown /skip /shuffle /repeat\n\
Anything else is taken as a playlist link to enqueue.";

pub struct CommandHandler {
    controller: CastController,
    resolver: Arc<dyn CatalogResolver>,
    max_message_length: usize,
}

impl CommandHandler {
    pub fn new(controller: CastController, resolver: Arc<dyn CatalogResolver>) -> Self {
        Self {
            controller,
            resolver,
            max_message_length: DEFAULT_MAX_MESSAGE_LENGTH,
        }
    }

    pub fn with_max_message_length(mut self, max: usize) -> Self {
        self.max_message_length = max.max(1);
        self
    }

    pub fn controller(&self) -> &CastController {
        &self.controller
    }

    /// Parses then executes one line of input.
    pub fn handle_line(&self, line: &str) -> Reply {
        match Command::parse(line) {
            Ok(command) => self.execute(command),
            Err(err) => Reply::from(err).bounded(self.max_message_length),
        }
    }

    pub fn execute(&self, command: Command) -> Reply {
        info!(?command, "Executing command");
        let reply = match self.run(&command) {
            Ok(reply) => reply,
            Err(err) => {
                if err.needs_user_action() {
                    info!(?command, "Command rejected: {}", err);
                } else {
                    warn!(?command, "Command failed: {}", err);
                }
                Reply::error(err.to_string())
            }
        };
        reply.bounded(self.max_message_length)
    }

    fn run(&self, command: &Command) -> Result<Reply, ControlError> {
        let controller = &self.controller;
        match command {
            Command::Start => Ok(Reply::info(
                "Hello!\nPick a device with /device, then send a playlist link.",
            )),
            Command::Help => Ok(Reply::info(HELP)),
            Command::Devices => Ok(Reply::info(self.render_devices())),
            Command::SelectDevice(index) => {
                let info = controller.select_device(*index)?;
                Ok(Reply::info(format!("Selected {}", info.friendly_name)))
            }
            Command::Refresh => {
                controller.refresh_devices()?;
                Ok(Reply::info(self.render_devices()))
            }
            Command::Enqueue(link) => self.enqueue(link),
            Command::PlayPause => {
                controller.play_pause()?;
                Ok(Reply::info("⏯️"))
            }
            Command::Stop => {
                controller.stop()?;
                Ok(Reply::info("Stopped"))
            }
            Command::VolumeUp => {
                controller.volume_up()?;
                Ok(Reply::info("🔊"))
            }
            Command::VolumeDown => {
                controller.volume_down()?;
                Ok(Reply::info("🔉"))
            }
            Command::Skip(None) => match controller.skip()? {
                Some(started) => Ok(now_playing(&started, "")),
                None => Ok(Reply::info("Nothing left to play")),
            },
            Command::Skip(Some(ticket)) => match controller.skip_from(*ticket)? {
                Some(started) => Ok(now_playing(&started, "")),
                // Sans avance, le ticket n'a pu changer que s'il était déjà périmé.
                None if controller.now_playing() != *ticket => {
                    Ok(Reply::info("That track already ended"))
                }
                None => Ok(Reply::info("Nothing left to play")),
            },
            Command::Shuffle => {
                controller.shuffle();
                Ok(Reply::info(
                    controller.format_queue(Some(self.max_message_length)),
                ))
            }
            Command::Repeat => {
                let started = controller.repeat()?;
                Ok(Reply::info(format!("Repeating {}", started.title)).with_ticket(started.ticket))
            }
            Command::ShowQueue => Ok(Reply::info(
                controller.format_queue(Some(self.max_message_length)),
            )),
        }
    }

    fn enqueue(&self, link: &str) -> Result<Reply, ControlError> {
        let resolution = self.resolver.resolve(link)?;
        let count = resolution.tracks.len();
        let failures = resolution.failures;

        let mut reply = match self.controller.push_many(resolution.tracks) {
            Ok(Some(started)) if count == 1 => now_playing(&started, ""),
            Ok(Some(started)) => now_playing(&started, &format!(" ({} more queued)", count - 1)),
            Ok(None) => Reply::info(format!("Queued {} track(s)", count)),
            Err(err) => {
                warn!("Queued {} track(s) but playback did not start: {}", count, err);
                Reply::info(format!(
                    "Queued {} track(s), but playback did not start: {}",
                    count, err
                ))
            }
        };
        if failures > 0 {
            reply
                .text
                .push_str(&format!("\n{} playlist entry(ies) skipped", failures));
        }
        Ok(reply)
    }

    fn render_devices(&self) -> String {
        let devices = self.controller.list_devices();
        if devices.is_empty() {
            return "No device found, try /refresh".to_string();
        }
        let mut out = format!("Found {} device(s):", devices.len());
        for device in devices {
            out.push_str(&format!("\n{}. {}", device.index, device.friendly_name));
            if device.selected {
                out.push_str(" (selected)");
            }
        }
        out
    }
}

fn now_playing(started: &Started, suffix: &str) -> Reply {
    Reply::info(format!("Now playing: {}{}", started.title, suffix)).with_ticket(started.ticket)
}
