//! Chromecast device driven through rust_cast.
//!
//! Commands open a fresh connection each time (rust_cast connections borrow
//! their host, keeping one around is more trouble than it is worth) and
//! rely on cached receiver identifiers: the Default Media Receiver session,
//! its transport id and the media session id of the last load.
//!
//! Status notifications need a long-lived connection: a monitor thread per
//! app transport keeps one open, answers heartbeats and forwards every
//! media status broadcast to the subscribed [`StatusSink`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Result, anyhow};
use rust_cast::channels::heartbeat::HeartbeatResponse;
use rust_cast::channels::media::{Media, MediaResponse, StreamType};
use rust_cast::channels::receiver::CastDeviceApp;
use rust_cast::{CastDevice as CastConnection, ChannelMessage};
use tracing::{debug, info, trace, warn};

use super::ensure_crypto_provider;
use super::status::{StatusMerger, media_status_from};
use crate::backend::{CastDevice, StatusSink};
use crate::model::{DeviceInfo, MediaStatus, PlayerState};

const PLATFORM_RECEIVER: &str = "receiver-0";
const DEFAULT_MEDIA_RECEIVER_APP_ID: &str = "CC1AD845";
const READY_RETRY: Duration = Duration::from_millis(250);

/// Volume increment of one up/down step (receiver scale is 0.0-1.0).
pub const DEFAULT_VOLUME_STEP: f32 = 0.1;

#[derive(Debug, Default)]
struct CastSessionState {
    /// Receiver session of the Default Media Receiver app.
    receiver_session_id: Option<String>,
    /// App transport, destination of every media command.
    transport_id: Option<String>,
    media_session_id: Option<i32>,
}

impl CastSessionState {
    fn clear(&mut self) {
        self.receiver_session_id = None;
        self.transport_id = None;
        self.media_session_id = None;
    }
}

#[derive(Debug, Default)]
struct MonitorState {
    transport_id: Option<String>,
    running: bool,
}

pub struct ChromecastDevice {
    info: DeviceInfo,
    session: Mutex<CastSessionState>,
    sink: Arc<Mutex<Option<StatusSink>>>,
    monitor: Arc<Mutex<MonitorState>>,
    monitor_generation: Arc<AtomicU64>,
    volume_step: f32,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl ChromecastDevice {
    pub fn new(info: DeviceInfo) -> Self {
        debug!(
            "Creating ChromecastDevice for {} at {}:{}",
            info.friendly_name, info.host, info.port
        );
        Self {
            info,
            session: Mutex::new(CastSessionState::default()),
            sink: Arc::new(Mutex::new(None)),
            monitor: Arc::new(Mutex::new(MonitorState::default())),
            monitor_generation: Arc::new(AtomicU64::new(0)),
            volume_step: DEFAULT_VOLUME_STEP,
        }
    }

    pub fn with_volume_step(mut self, step: f32) -> Self {
        self.volume_step = step.clamp(0.01, 1.0);
        self
    }

    /// Opens a connection and joins the platform receiver.
    fn connect(&self) -> Result<CastConnection<'_>> {
        ensure_crypto_provider();
        trace!("Connecting to Chromecast at {}:{}", self.info.host, self.info.port);

        let device =
            CastConnection::connect_without_host_verification(self.info.host.as_str(), self.info.port)
                .map_err(|e| anyhow!("Failed to connect to {}: {}", self.info.friendly_name, e))?;

        device
            .connection
            .connect(PLATFORM_RECEIVER)
            .map_err(|e| anyhow!("Failed to connect to the platform receiver: {}", e))?;
        Ok(device)
    }

    /// Makes sure the Default Media Receiver runs and joins its transport.
    ///
    /// Reuses the app when the receiver already runs it (launched by us or
    /// by someone else), launches it otherwise. Returns `(transport, session)`.
    fn ensure_app(&self, device: &CastConnection<'_>) -> Result<(String, String)> {
        let status = device
            .receiver
            .get_status()
            .map_err(|e| anyhow!("Failed to get receiver status: {}", e))?;

        let running = status
            .applications
            .iter()
            .find(|app| app.app_id == DEFAULT_MEDIA_RECEIVER_APP_ID);

        let (transport_id, session_id) = match running {
            Some(app) => (app.transport_id.clone(), app.session_id.clone()),
            None => {
                debug!("Launching Default Media Receiver app");
                let app = device
                    .receiver
                    .launch_app(&CastDeviceApp::DefaultMediaReceiver)
                    .map_err(|e| anyhow!("Failed to launch app: {}", e))?;
                debug!(
                    "Launched app with session_id: {}, transport_id: {}",
                    app.session_id, app.transport_id
                );
                (app.transport_id, app.session_id)
            }
        };

        device
            .connection
            .connect(transport_id.as_str())
            .map_err(|e| anyhow!("Failed to connect to app transport: {}", e))?;

        let mut state = lock(&self.session);
        if state.transport_id.as_ref() != Some(&transport_id) {
            // Nouvelle instance de l'app : l'ancienne session média est morte.
            state.media_session_id = None;
        }
        state.transport_id = Some(transport_id.clone());
        state.receiver_session_id = Some(session_id.clone());
        Ok((transport_id, session_id))
    }

    /// Connection joined to the app transport, plus the media session id.
    fn media_target(&self) -> Result<(CastConnection<'_>, String, i32)> {
        let device = self.connect()?;
        let (transport_id, _) = self.ensure_app(&device)?;

        if let Some(id) = lock(&self.session).media_session_id {
            return Ok((device, transport_id, id));
        }

        let status = device
            .media
            .get_status(transport_id.as_str(), None)
            .map_err(|e| anyhow!("Failed to get media status: {}", e))?;
        let id = status
            .entries
            .first()
            .map(|entry| entry.media_session_id)
            .ok_or_else(|| anyhow!("No media session on {}", self.info.friendly_name))?;
        lock(&self.session).media_session_id = Some(id);
        Ok((device, transport_id, id))
    }

    fn query_media_status(&self) -> Result<MediaStatus> {
        let device = self.connect()?;
        let transport_id = match lock(&self.session).transport_id.clone() {
            Some(id) => id,
            None => return Ok(MediaStatus::unknown()),
        };
        device
            .connection
            .connect(transport_id.as_str())
            .map_err(|e| anyhow!("Failed to connect to app transport: {}", e))?;

        let media_session_id = lock(&self.session).media_session_id;
        let status = device
            .media
            .get_status(transport_id.as_str(), media_session_id)
            .map_err(|e| anyhow!("Failed to get media status: {}", e))?;

        let mut result = media_status_from(&status);
        if let Ok(receiver) = device.receiver.get_status() {
            result.volume = receiver.volume.level;
        }
        Ok(result)
    }

    fn step_volume(&self, delta: f32) -> Result<()> {
        let device = self.connect()?;
        let status = device
            .receiver
            .get_status()
            .map_err(|e| anyhow!("Failed to get receiver status: {}", e))?;

        let current = status.volume.level.unwrap_or(0.5);
        let level = (current + delta).clamp(0.0, 1.0);
        debug!("Volume {:.2} -> {:.2}", current, level);

        device
            .receiver
            .set_volume(level)
            .map_err(|e| anyhow!("Failed to set volume: {}", e))?;
        Ok(())
    }

    /// Starts a monitor on `transport_id` unless one already runs there.
    fn ensure_monitor(&self, transport_id: &str) {
        {
            let mut monitor = lock(&self.monitor);
            if monitor.running && monitor.transport_id.as_deref() == Some(transport_id) {
                return;
            }
            monitor.transport_id = Some(transport_id.to_string());
            monitor.running = true;
        }

        let generation = self.monitor_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let monitor = StatusMonitor {
            host: self.info.host.clone(),
            port: self.info.port,
            name: self.info.friendly_name.clone(),
            transport_id: transport_id.to_string(),
            sink: Arc::clone(&self.sink),
            state: Arc::clone(&self.monitor),
            generation,
            current_generation: Arc::clone(&self.monitor_generation),
        };

        let spawned = thread::Builder::new()
            .name(format!("cast-monitor-{}", generation))
            .spawn(move || monitor.run());
        if let Err(e) = spawned {
            warn!("Cannot start status monitor for {}: {}", self.info.friendly_name, e);
            lock(&self.monitor).running = false;
        }
    }
}

impl CastDevice for ChromecastDevice {
    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn wait_ready(&self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        loop {
            let attempt = self.connect().and_then(|device| {
                device
                    .heartbeat
                    .ping()
                    .map_err(|e| anyhow!("Heartbeat failed: {}", e))?;
                device
                    .receiver
                    .get_status()
                    .map_err(|e| anyhow!("Failed to get receiver status: {}", e))
            });

            match attempt {
                Ok(_) => return Ok(()),
                Err(e) if Instant::now() >= deadline => {
                    lock(&self.session).clear();
                    return Err(e.context(format!(
                        "{} not ready after {} ms",
                        self.info.friendly_name,
                        timeout.as_millis()
                    )));
                }
                Err(e) => {
                    debug!("{} not ready yet: {:#}", self.info.friendly_name, e);
                    thread::sleep(READY_RETRY);
                }
            }
        }
    }

    fn load(&self, url: &str, content_type: &str) -> Result<()> {
        debug!("ChromecastDevice: load({})", url);
        let device = self.connect()?;
        let (transport_id, session_id) = self.ensure_app(&device)?;

        let media = Media {
            content_id: url.to_string(),
            content_type: content_type.to_string(),
            stream_type: StreamType::Buffered,
            duration: None,
            metadata: None,
        };

        let status = device
            .media
            .load(transport_id.as_str(), session_id.as_str(), &media)
            .map_err(|e| anyhow!("Failed to load media: {}", e))?;

        let mut state = lock(&self.session);
        state.media_session_id = status.entries.first().map(|entry| entry.media_session_id);
        if let Some(id) = state.media_session_id {
            debug!("Media loaded with session ID: {}", id);
        }
        drop(state);

        if lock(&self.sink).is_some() {
            self.ensure_monitor(&transport_id);
        }
        Ok(())
    }

    fn is_active(&self) -> Result<bool> {
        let status = self.query_media_status()?;
        Ok(!matches!(
            status.player_state,
            PlayerState::Unknown | PlayerState::Idle
        ))
    }

    fn play(&self) -> Result<()> {
        debug!("ChromecastDevice: play()");
        let (device, transport_id, media_session_id) = self.media_target()?;
        device
            .media
            .play(transport_id.as_str(), media_session_id)
            .map_err(|e| anyhow!("Failed to play: {}", e))?;
        Ok(())
    }

    fn pause(&self) -> Result<()> {
        debug!("ChromecastDevice: pause()");
        let (device, transport_id, media_session_id) = self.media_target()?;
        device
            .media
            .pause(transport_id.as_str(), media_session_id)
            .map_err(|e| anyhow!("Failed to pause: {}", e))?;
        Ok(())
    }

    fn stop(&self) -> Result<()> {
        debug!("ChromecastDevice: stop()");
        let (device, transport_id, media_session_id) = self.media_target()?;
        device
            .media
            .stop(transport_id.as_str(), media_session_id)
            .map_err(|e| anyhow!("Failed to stop: {}", e))?;
        lock(&self.session).media_session_id = None;
        Ok(())
    }

    fn volume_up(&self) -> Result<()> {
        self.step_volume(self.volume_step)
    }

    fn volume_down(&self) -> Result<()> {
        self.step_volume(-self.volume_step)
    }

    fn current_status(&self) -> Result<MediaStatus> {
        self.query_media_status()
    }

    fn subscribe(&self, sink: StatusSink) -> Result<()> {
        info!(
            token = %sink.token(),
            "Routing {} statuses to a new subscriber",
            self.info.friendly_name
        );
        *lock(&self.sink) = Some(sink);

        let transport_id = lock(&self.session).transport_id.clone();
        if let Some(transport_id) = transport_id {
            self.ensure_monitor(&transport_id);
        }
        Ok(())
    }
}

/// Long-lived connection forwarding media statuses of one app transport.
struct StatusMonitor {
    host: String,
    port: u16,
    name: String,
    transport_id: String,
    sink: Arc<Mutex<Option<StatusSink>>>,
    state: Arc<Mutex<MonitorState>>,
    generation: u64,
    current_generation: Arc<AtomicU64>,
}

impl StatusMonitor {
    fn superseded(&self) -> bool {
        self.current_generation.load(Ordering::SeqCst) != self.generation
    }

    fn run(self) {
        info!(device = %self.name, transport = %self.transport_id, "Status monitor started");
        if let Err(e) = self.listen() {
            warn!(device = %self.name, "Status monitor stopped: {:#}", e);
        }
        if !self.superseded() {
            lock(&self.state).running = false;
        }
        debug!(device = %self.name, "Status monitor exited");
    }

    fn listen(&self) -> Result<()> {
        ensure_crypto_provider();
        let device = CastConnection::connect_without_host_verification(self.host.clone(), self.port)
            .map_err(|e| anyhow!("Failed to connect: {}", e))?;
        device
            .connection
            .connect(PLATFORM_RECEIVER)
            .map_err(|e| anyhow!("Failed to connect to the platform receiver: {}", e))?;
        device
            .connection
            .connect(self.transport_id.as_str())
            .map_err(|e| anyhow!("Failed to connect to app transport: {}", e))?;

        let mut merger = StatusMerger::default();

        // Statut initial, puis uniquement les diffusions.
        let initial = device
            .media
            .get_status(self.transport_id.as_str(), None)
            .map_err(|e| anyhow!("Failed to get media status: {}", e))?;
        if !self.forward(merger.merge(media_status_from(&initial))) {
            return Ok(());
        }

        loop {
            if self.superseded() {
                debug!(device = %self.name, "Status monitor superseded");
                return Ok(());
            }

            let message = device
                .receive()
                .map_err(|e| anyhow!("Error receiving message: {}", e))?;

            match message {
                ChannelMessage::Heartbeat(HeartbeatResponse::Ping) => {
                    device
                        .heartbeat
                        .pong()
                        .map_err(|e| anyhow!("Failed to send pong: {}", e))?;
                }
                ChannelMessage::Media(MediaResponse::Status(status)) => {
                    if !self.forward(merger.merge(media_status_from(&status))) {
                        return Ok(());
                    }
                }
                ChannelMessage::Media(other) => {
                    debug!(device = %self.name, "Media message: {:?}", other);
                }
                other => trace!(device = %self.name, "Ignored message: {:?}", other),
            }
        }
    }

    /// False once nobody listens anymore.
    fn forward(&self, status: MediaStatus) -> bool {
        if self.superseded() {
            return false;
        }
        match lock(&self.sink).as_ref() {
            Some(sink) => sink.deliver(status),
            None => true,
        }
    }
}
