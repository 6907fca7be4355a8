//! Playback session on the selected device.
//!
//! A session is the live relationship between the controller and one
//! device: it owns the token status notifications are tagged with, and
//! wraps the transport commands. It is superseded (never cancelled) when
//! the user selects another device or stops playback.

use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::Sender;
use tracing::{debug, info, warn};

use crate::backend::{DeviceHandle, SessionEvent, StatusSink};
use crate::errors::{ControlError, Result};
use crate::model::{DeviceInfo, SessionToken};

/// Content type announced to the receiver for every load.
pub const DEFAULT_CONTENT_TYPE: &str = "audio/mpeg";

const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_READY_POLL: Duration = Duration::from_millis(250);

#[derive(Clone, Debug)]
pub struct SessionSettings {
    /// Upper bound for "device ready" and "media active" waits.
    pub ready_timeout: Duration,
    pub ready_poll_interval: Duration,
    pub content_type: String,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            ready_timeout: DEFAULT_READY_TIMEOUT,
            ready_poll_interval: DEFAULT_READY_POLL,
            content_type: DEFAULT_CONTENT_TYPE.to_string(),
        }
    }
}

pub struct PlaybackSession {
    token: SessionToken,
    device: DeviceHandle,
    settings: SessionSettings,
    subscribed: bool,
}

impl PlaybackSession {
    pub fn new(token: SessionToken, device: DeviceHandle, settings: SessionSettings) -> Self {
        debug!(%token, device = %device.info().friendly_name, "Opening playback session");
        Self {
            token,
            device,
            settings,
            subscribed: false,
        }
    }

    pub fn token(&self) -> SessionToken {
        self.token
    }

    pub fn device_info(&self) -> &DeviceInfo {
        self.device.info()
    }

    /// True when this session drives `device`.
    pub fn is_bound_to(&self, device: &DeviceHandle) -> bool {
        self.device.info().id == device.info().id
    }

    /// Loads `url` and starts it from the beginning.
    ///
    /// Waits for the device, loads the media with the fixed content type,
    /// waits (bounded) until the receiver reports an active media session,
    /// then issues an explicit play. Status notifications are routed to
    /// `events` under this session's token from then on.
    pub fn play_from_start(&mut self, url: &str, events: &Sender<SessionEvent>) -> Result<()> {
        let name = self.device.info().friendly_name.clone();

        self.device
            .wait_ready(self.settings.ready_timeout)
            .map_err(|e| ControlError::device_unavailable(&name, format!("{:#}", e)))?;

        if !self.subscribed {
            self.device
                .subscribe(StatusSink::new(self.token, events.clone()))
                .map_err(|e| ControlError::device_unavailable(&name, format!("{:#}", e)))?;
            self.subscribed = true;
        }

        self.device
            .load(url, &self.settings.content_type)
            .map_err(|e| ControlError::device_unavailable(&name, format!("{:#}", e)))?;

        self.block_until_active()?;

        self.device
            .play()
            .map_err(|e| ControlError::device_command("play", e))?;

        info!(device = %name, url, "Playback started");
        self.log_status("play_from_start");
        Ok(())
    }

    fn block_until_active(&self) -> Result<()> {
        let name = &self.device.info().friendly_name;
        let deadline = Instant::now() + self.settings.ready_timeout;
        loop {
            match self.device.is_active() {
                Ok(true) => return Ok(()),
                Ok(false) => {}
                Err(e) => warn!(device = %name, "Media status query failed: {:#}", e),
            }
            if Instant::now() >= deadline {
                return Err(ControlError::device_unavailable(
                    name,
                    format!(
                        "media not active after {} ms",
                        self.settings.ready_timeout.as_millis()
                    ),
                ));
            }
            thread::sleep(self.settings.ready_poll_interval);
        }
    }

    /// Pauses when the device says it is playing, resumes otherwise.
    ///
    /// Reads the device status then acts on it: a stale status may lead to a
    /// redundant command, which the receiver ignores.
    pub fn play_pause(&self) -> Result<()> {
        let status = self
            .device
            .current_status()
            .map_err(|e| ControlError::device_command("status", e))?;

        if status.is_playing() {
            self.device
                .pause()
                .map_err(|e| ControlError::device_command("pause", e))?;
            info!("pause");
        } else {
            self.device
                .play()
                .map_err(|e| ControlError::device_command("play", e))?;
            info!("continue");
        }
        self.log_status("play_pause");
        Ok(())
    }

    pub fn stop(&self) -> Result<()> {
        self.device
            .stop()
            .map_err(|e| ControlError::device_command("stop", e))?;
        self.log_status("stop");
        Ok(())
    }

    pub fn volume_up(&self) -> Result<()> {
        self.device
            .volume_up()
            .map_err(|e| ControlError::device_command("volume_up", e))?;
        self.log_status("volume_up");
        Ok(())
    }

    pub fn volume_down(&self) -> Result<()> {
        self.device
            .volume_down()
            .map_err(|e| ControlError::device_command("volume_down", e))?;
        self.log_status("volume_down");
        Ok(())
    }

    /// Diagnostics only, never fails the command.
    fn log_status(&self, command: &str) {
        info!("{} returned", command);
        match self.device.current_status() {
            Ok(status) => debug!(token = %self.token, %status, "Device status after {}", command),
            Err(e) => debug!(token = %self.token, "No device status after {}: {:#}", command, e),
        }
    }
}
