//! Device control channel abstraction.
//!
//! The controller never talks to a protocol directly. A backend exposes the
//! handful of primitives the playback session needs (wait, load, play,
//! pause, stop, volume steps, status) plus a push subscription for media
//! status notifications. The Chromecast implementation lives in
//! [`crate::chromecast`]; tests plug an in-memory device instead.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use crossbeam_channel::Sender;
use tracing::trace;

use crate::model::{DeviceInfo, MediaStatus, SessionToken};

/// Shared handle on a discovered device.
pub type DeviceHandle = Arc<dyn CastDevice>;

/// Per-device transport primitives.
pub trait CastDevice: Send + Sync {
    fn info(&self) -> &DeviceInfo;

    /// Blocks until the device control channel answers, or `timeout` elapses.
    fn wait_ready(&self, timeout: Duration) -> Result<()>;

    /// Loads `url` on the device media receiver.
    fn load(&self, url: &str, content_type: &str) -> Result<()>;

    /// True once the device reports an active media session.
    fn is_active(&self) -> Result<bool>;

    fn play(&self) -> Result<()>;

    fn pause(&self) -> Result<()>;

    fn stop(&self) -> Result<()>;

    fn volume_up(&self) -> Result<()>;

    fn volume_down(&self) -> Result<()>;

    /// Last status known by the device (queried, not cached by the core).
    fn current_status(&self) -> Result<MediaStatus>;

    /// Routes every further status notification of this device to `sink`,
    /// replacing any previous subscription.
    fn subscribe(&self, sink: StatusSink) -> Result<()>;
}

/// Performs one discovery round.
pub trait DeviceDiscovery: Send + Sync {
    fn discover(&self) -> Result<Vec<DeviceHandle>>;
}

/// A status notification tagged with the session it was delivered for.
#[derive(Clone, Debug)]
pub struct SessionEvent {
    pub token: SessionToken,
    pub status: MediaStatus,
}

/// Subscription handle handed to a device.
///
/// Devices call [`StatusSink::deliver`] from whatever thread their control
/// channel runs on; the event is queued for the controller, which decides
/// later whether the token still designates the active session.
#[derive(Clone)]
pub struct StatusSink {
    token: SessionToken,
    tx: Sender<SessionEvent>,
}

impl StatusSink {
    pub(crate) fn new(token: SessionToken, tx: Sender<SessionEvent>) -> Self {
        Self { token, tx }
    }

    pub fn token(&self) -> SessionToken {
        self.token
    }

    /// Returns false once the controller is gone.
    pub fn deliver(&self, status: MediaStatus) -> bool {
        trace!(token = %self.token, %status, "Queueing media status");
        self.tx
            .send(SessionEvent {
                token: self.token,
                status,
            })
            .is_ok()
    }
}

impl fmt::Debug for StatusSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatusSink")
            .field("token", &self.token)
            .finish()
    }
}
