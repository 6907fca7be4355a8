pub mod backend;
pub mod catalog;
pub mod chromecast;
pub mod commands;
pub mod controller;
pub mod errors;
pub mod inference;
pub mod model;
pub mod queue;
pub mod registry;
pub mod session;
pub mod track;

pub use backend::{CastDevice, DeviceDiscovery, DeviceHandle, SessionEvent, StatusSink};
pub use catalog::{CatalogResolver, M3uResolver, Resolution};
pub use chromecast::{ChromecastDevice, ChromecastDiscovery};
pub use commands::{Command, CommandHandler, ParseError, Reply, ReplyKind};
pub use controller::{CastController, PlaybackSnapshot, Started};
pub use errors::{ControlError, Result};
pub use inference::{Activity, CompletionEngine, Phase, Verdict};
pub use model::{
    DeviceId, DeviceInfo, DeviceListing, IdleReason, MediaStatus, PlayTicket, PlayerState,
    SessionToken,
};
pub use queue::{PlayQueue, QueueView};
pub use registry::DeviceRegistry;
pub use session::{PlaybackSession, SessionSettings};
pub use track::{CurrentTrack, LazyUrl, StaticUrl, Track};
