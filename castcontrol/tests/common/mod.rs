//! In-memory cast device and discovery for controller tests.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Result, anyhow, bail};
use castcontrol::{
    CastController, CastDevice, DeviceDiscovery, DeviceHandle, DeviceId, DeviceInfo, IdleReason,
    LazyUrl, MediaStatus, PlayerState, SessionSettings, Started, StatusSink, Track,
};

#[derive(Default)]
struct FakeState {
    log: Vec<String>,
    sink: Option<StatusSink>,
    loaded: Option<String>,
    player: Option<PlayerState>,
    durations: HashMap<String, u64>,
    silent: bool,
    unreachable: bool,
    never_active: bool,
}

/// Records every command; emits a PLAYING status on play unless silent.
pub struct FakeDevice {
    info: DeviceInfo,
    state: Mutex<FakeState>,
}

impl FakeDevice {
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            info: DeviceInfo {
                id: DeviceId(format!("fake-{}", name.to_lowercase())),
                friendly_name: name.to_string(),
                host: "127.0.0.1".to_string(),
                port: 8009,
                model: Some("Fake".to_string()),
            },
            state: Mutex::new(FakeState::default()),
        })
    }

    pub fn handle(self: &Arc<Self>) -> DeviceHandle {
        Arc::clone(self) as DeviceHandle
    }

    pub fn set_silent(&self, silent: bool) {
        self.state.lock().unwrap().silent = silent;
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.state.lock().unwrap().unreachable = unreachable;
    }

    pub fn set_never_active(&self, never_active: bool) {
        self.state.lock().unwrap().never_active = never_active;
    }

    /// Duration the receiver will report for `url`.
    pub fn report_duration(&self, url: &str, ms: u64) {
        self.state
            .lock()
            .unwrap()
            .durations
            .insert(url.to_string(), ms);
    }

    pub fn log(&self) -> Vec<String> {
        self.state.lock().unwrap().log.clone()
    }

    pub fn loads(&self) -> Vec<String> {
        self.log()
            .into_iter()
            .filter_map(|entry| entry.strip_prefix("load ").map(str::to_string))
            .collect()
    }

    pub fn subscribed(&self) -> bool {
        self.state.lock().unwrap().sink.is_some()
    }

    /// Pushes a status through the current subscription.
    pub fn emit(&self, status: MediaStatus) -> bool {
        let sink = self.state.lock().unwrap().sink.clone();
        match sink {
            Some(sink) => sink.deliver(status),
            None => false,
        }
    }

    /// The loaded track reached its end, as the receiver reports it.
    pub fn finish(&self, url: &str, duration_ms: u64) -> bool {
        let mut status = MediaStatus::new(PlayerState::Idle).with_media(url, duration_ms);
        status.idle_reason = Some(IdleReason::Finished);
        self.state.lock().unwrap().player = Some(PlayerState::Idle);
        self.emit(status)
    }

    fn status_locked(state: &FakeState) -> MediaStatus {
        let mut status = MediaStatus::new(state.player.unwrap_or(PlayerState::Unknown));
        if let Some(url) = &state.loaded {
            status.content_id = Some(url.clone());
            status.duration_ms = state.durations.get(url).copied();
        }
        status
    }

    fn record(&self, entry: impl Into<String>) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.unreachable {
            bail!("{} unreachable", self.info.friendly_name);
        }
        state.log.push(entry.into());
        Ok(())
    }

    fn transition(&self, player: PlayerState) {
        let (sink, status) = {
            let mut state = self.state.lock().unwrap();
            state.player = Some(player);
            if state.silent {
                return;
            }
            (state.sink.clone(), Self::status_locked(&state))
        };
        if let Some(sink) = sink {
            sink.deliver(status);
        }
    }
}

impl CastDevice for FakeDevice {
    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn wait_ready(&self, _timeout: Duration) -> Result<()> {
        if self.state.lock().unwrap().unreachable {
            return Err(anyhow!("connection refused"));
        }
        Ok(())
    }

    fn load(&self, url: &str, _content_type: &str) -> Result<()> {
        self.record(format!("load {}", url))?;
        let mut state = self.state.lock().unwrap();
        state.loaded = Some(url.to_string());
        state.player = Some(PlayerState::Buffering);
        Ok(())
    }

    fn is_active(&self) -> Result<bool> {
        let state = self.state.lock().unwrap();
        Ok(state.loaded.is_some() && !state.never_active)
    }

    fn play(&self) -> Result<()> {
        self.record("play")?;
        self.transition(PlayerState::Playing);
        Ok(())
    }

    fn pause(&self) -> Result<()> {
        self.record("pause")?;
        self.transition(PlayerState::Paused);
        Ok(())
    }

    fn stop(&self) -> Result<()> {
        self.record("stop")?;
        let (sink, status) = {
            let mut state = self.state.lock().unwrap();
            state.player = Some(PlayerState::Idle);
            let mut status = Self::status_locked(&state);
            status.idle_reason = Some(IdleReason::Cancelled);
            (state.sink.clone(), status)
        };
        if let Some(sink) = sink {
            sink.deliver(status);
        }
        Ok(())
    }

    fn volume_up(&self) -> Result<()> {
        self.record("volume_up")
    }

    fn volume_down(&self) -> Result<()> {
        self.record("volume_down")
    }

    fn current_status(&self) -> Result<MediaStatus> {
        Ok(Self::status_locked(&self.state.lock().unwrap()))
    }

    fn subscribe(&self, sink: StatusSink) -> Result<()> {
        self.record(format!("subscribe {}", sink.token()))?;
        self.state.lock().unwrap().sink = Some(sink);
        Ok(())
    }
}

/// Discovery returning whatever the test put in it.
#[derive(Clone, Default)]
pub struct FakeDiscovery {
    devices: Arc<Mutex<Vec<DeviceHandle>>>,
    failing: Arc<Mutex<bool>>,
}

impl FakeDiscovery {
    pub fn set_devices(&self, devices: Vec<DeviceHandle>) {
        *self.devices.lock().unwrap() = devices;
    }

    pub fn set_failing(&self, failing: bool) {
        *self.failing.lock().unwrap() = failing;
    }
}

impl DeviceDiscovery for FakeDiscovery {
    fn discover(&self) -> Result<Vec<DeviceHandle>> {
        if *self.failing.lock().unwrap() {
            bail!("mDNS socket closed");
        }
        Ok(self.devices.lock().unwrap().clone())
    }
}

#[derive(Debug)]
pub struct BrokenUrl;

impl LazyUrl for BrokenUrl {
    fn resolve_url(&self) -> Result<String> {
        Err(anyhow!("link expired"))
    }
}

pub fn fast_settings() -> SessionSettings {
    SessionSettings {
        ready_timeout: Duration::from_millis(50),
        ready_poll_interval: Duration::from_millis(5),
        ..SessionSettings::default()
    }
}

pub fn track(name: &str, duration_ms: u64) -> Track {
    Track::from_url(url(name), name, duration_ms)
}

pub fn url(name: &str) -> String {
    format!("http://media.test/{}.mp3", name)
}

/// Controller over `devices`, refreshed, nothing selected.
pub fn controller_with(devices: &[&Arc<FakeDevice>]) -> (CastController, FakeDiscovery) {
    let discovery = FakeDiscovery::default();
    discovery.set_devices(devices.iter().map(|d| d.handle()).collect());
    let controller = CastController::new(Box::new(discovery.clone()), fast_settings());
    controller.refresh_devices().unwrap();
    (controller, discovery)
}

/// Controller with one device, already selected.
pub fn controller_on(device: &Arc<FakeDevice>) -> CastController {
    let (controller, _) = controller_with(&[device]);
    controller.select_device(0).unwrap();
    controller
}

pub fn current_title(controller: &CastController) -> Option<String> {
    controller.current_track().map(|t| t.title)
}

pub fn queued_titles(controller: &CastController) -> Vec<String> {
    controller.queue_view().pending
}

/// Title of the track an advance started; panics on error.
pub fn started_title(result: castcontrol::Result<Option<Started>>) -> Option<String> {
    result.unwrap().map(|started| started.title)
}
