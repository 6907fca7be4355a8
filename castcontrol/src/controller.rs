//! The controller context.
//!
//! `CastController` owns everything with state: the device registry, the
//! play queue, the current track, the playback session and the completion
//! inference engine. User commands and device status notifications reach
//! it from different threads; every mutation of the queue or of the
//! playback state goes through ONE mutex, so an inferred "track ended" and
//! a user skip can never interleave inside an advance.
//!
//! The value is cheap to clone and is meant to be handed to every command
//! handler for the lifetime of the process.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, unbounded};
use tracing::{debug, error, info, warn};

use crate::backend::{DeviceDiscovery, DeviceHandle, SessionEvent};
use crate::errors::{ControlError, Result};
use crate::inference::{Activity, CompletionEngine, Phase, Verdict};
use crate::model::{DeviceInfo, DeviceListing, MediaStatus, PlayTicket, SessionToken};
use crate::queue::{PlayQueue, QueueView};
use crate::registry::DeviceRegistry;
use crate::session::{PlaybackSession, SessionSettings};
use crate::track::{CurrentTrack, Track};

const WORKER_POLL: Duration = Duration::from_millis(200);

/// Everything guarded by the controller lock.
struct PlaybackState {
    queue: PlayQueue,
    current: Option<CurrentTrack>,
    session: Option<PlaybackSession>,
    engine: CompletionEngine,
    generation: u64,
    next_token: u64,
}

impl PlaybackState {
    fn new() -> Self {
        Self {
            queue: PlayQueue::new(),
            current: None,
            session: None,
            engine: CompletionEngine::new(),
            generation: 0,
            next_token: 1,
        }
    }

    fn active_token(&self) -> Option<SessionToken> {
        self.session.as_ref().map(|s| s.token())
    }

    /// Drops the session: its token no longer matches incoming statuses and
    /// the engine starts over from an unobserved state.
    fn retire_session(&mut self, reason: &str) {
        if let Some(session) = self.session.take() {
            info!(
                token = %session.token(),
                device = %session.device_info().friendly_name,
                "Session superseded ({})",
                reason
            );
        }
        self.engine.reset();
    }
}

/// A track that just started, with the ticket designating it.
///
/// Front-ends attach the ticket to their skip button so that a late press
/// can be recognised with [`CastController::skip_from`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Started {
    pub title: String,
    pub ticket: PlayTicket,
}

/// Read-only picture of the playback state.
#[derive(Clone, Debug)]
pub struct PlaybackSnapshot {
    pub current: Option<CurrentTrack>,
    pub queued: usize,
    pub activity: Activity,
    pub phase: Phase,
    pub session: Option<SessionToken>,
    pub selected: Option<DeviceInfo>,
    pub ticket: PlayTicket,
}

struct Inner {
    registry: DeviceRegistry,
    state: Mutex<PlaybackState>,
    settings: SessionSettings,
    events_tx: Sender<SessionEvent>,
    events_rx: Receiver<SessionEvent>,
    shutdown: AtomicBool,
}

#[derive(Clone)]
pub struct CastController {
    inner: Arc<Inner>,
}

impl CastController {
    pub fn new(discovery: Box<dyn DeviceDiscovery>, settings: SessionSettings) -> Self {
        let (events_tx, events_rx) = unbounded::<SessionEvent>();
        Self {
            inner: Arc::new(Inner {
                registry: DeviceRegistry::new(discovery),
                state: Mutex::new(PlaybackState::new()),
                settings,
                events_tx,
                events_rx,
                shutdown: AtomicBool::new(false),
            }),
        }
    }

    // Un verrou empoisonné ne doit pas tuer le bot : l'état reste cohérent
    // entre deux appels.
    fn lock_state(&self) -> MutexGuard<'_, PlaybackState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // ------------------------------------------------------------------
    // Devices
    // ------------------------------------------------------------------

    pub fn refresh_devices(&self) -> Result<usize> {
        self.inner.registry.refresh()
    }

    pub fn list_devices(&self) -> Vec<DeviceListing> {
        self.inner.registry.list()
    }

    pub fn selected_device(&self) -> Option<DeviceInfo> {
        self.inner.registry.selected_info()
    }

    /// Selects a device of the last discovery snapshot.
    ///
    /// The previous device is left as it is (it keeps playing if it was),
    /// but its session is superseded: its statuses are ignored from now on.
    pub fn select_device(&self, index: usize) -> Result<DeviceInfo> {
        let device = self.inner.registry.select(index)?;
        self.adopt_selected(&device);
        Ok(device.info().clone())
    }

    pub fn select_device_by_name(&self, name: &str) -> Result<DeviceInfo> {
        let device = self.inner.registry.select_by_name(name)?;
        self.adopt_selected(&device);
        Ok(device.info().clone())
    }

    fn adopt_selected(&self, device: &DeviceHandle) {
        let mut state = self.lock_state();
        let superseded = state
            .session
            .as_ref()
            .is_some_and(|session| !session.is_bound_to(device));
        if superseded {
            state.retire_session("another device was selected");
        }
    }

    // ------------------------------------------------------------------
    // Queue
    // ------------------------------------------------------------------

    /// Appends a track; starts it right away when the player is idle.
    pub fn push(&self, track: Track) -> Result<()> {
        self.push_many(vec![track]).map(|_| ())
    }

    /// Appends tracks in order; starts the first one when the player is idle.
    ///
    /// Returns the track that started playing, if any. When starting fails
    /// the tracks stay queued and the error is returned.
    pub fn push_many(&self, tracks: Vec<Track>) -> Result<Option<Started>> {
        let mut state = self.lock_state();
        let added = tracks.len();
        state.queue.extend(tracks);
        debug!(added, queued = state.queue.len(), "Tracks enqueued");

        if added > 0 && state.engine.activity().accepts_immediate_start() {
            return self.play_next_locked(&mut state);
        }
        Ok(None)
    }

    /// Starts the head of the queue. No-op on an empty queue.
    pub fn play_next(&self) -> Result<Option<Started>> {
        let mut state = self.lock_state();
        self.play_next_locked(&mut state)
    }

    /// Ticket designating the track currently playing.
    pub fn now_playing(&self) -> PlayTicket {
        PlayTicket(self.lock_state().generation)
    }

    /// Skips the track playing right now.
    pub fn skip(&self) -> Result<Option<Started>> {
        let ticket = self.now_playing();
        self.skip_from(ticket)
    }

    /// Skips the track designated by `ticket`.
    ///
    /// If the queue already moved on (a completion was inferred meanwhile,
    /// or another skip won the race) this is a no-op: one track, at most
    /// one advance.
    pub fn skip_from(&self, ticket: PlayTicket) -> Result<Option<Started>> {
        let mut state = self.lock_state();
        if state.generation != ticket.0 {
            info!(
                expected = ticket.0,
                actual = state.generation,
                "Skip ignored, the queue already advanced"
            );
            return Ok(None);
        }
        self.play_next_locked(&mut state)
    }

    pub fn shuffle(&self) {
        self.lock_state().queue.shuffle();
    }

    /// Replays the current track from the beginning.
    ///
    /// Rejected with `NothingPlaying` when no track ever started. The replay
    /// runs in a fresh session: reloading the same URL makes the receiver
    /// report an idle status carrying that very URL and duration, which the
    /// old session would take for the end of the track.
    pub fn repeat(&self) -> Result<Started> {
        let mut state = self.lock_state();
        let current = state.current.clone().ok_or(ControlError::NothingPlaying)?;
        let device = self.selected_handle()?;
        state.retire_session("repeat");
        let session = self.session_for(&mut state, &device);
        session.play_from_start(&current.url, &self.inner.events_tx)?;
        state.engine.note_play_started();
        info!("Repeating {}", current.title);
        Ok(Started {
            title: current.title,
            ticket: PlayTicket(state.generation),
        })
    }

    pub fn queue_view(&self) -> QueueView {
        let state = self.lock_state();
        QueueView {
            current: state.current.as_ref().map(|c| c.title.clone()),
            pending: state.queue.titles(),
        }
    }

    /// Current + pending titles, optionally bounded to `limit` characters.
    pub fn format_queue(&self, limit: Option<usize>) -> String {
        self.queue_view().render(limit)
    }

    pub fn current_track(&self) -> Option<CurrentTrack> {
        self.lock_state().current.clone()
    }

    pub fn snapshot(&self) -> PlaybackSnapshot {
        let state = self.lock_state();
        PlaybackSnapshot {
            current: state.current.clone(),
            queued: state.queue.len(),
            activity: state.engine.activity(),
            phase: state.engine.phase(),
            session: state.active_token(),
            selected: self.inner.registry.selected_info(),
            ticket: PlayTicket(state.generation),
        }
    }

    // ------------------------------------------------------------------
    // Transport
    // ------------------------------------------------------------------

    pub fn play_pause(&self) -> Result<()> {
        let mut state = self.lock_state();
        let device = self.selected_handle()?;
        self.session_for(&mut state, &device).play_pause()
    }

    /// Stops the device and supersedes the session, so the idle status the
    /// stop produces can never be taken for a finished track.
    pub fn stop(&self) -> Result<()> {
        let mut state = self.lock_state();
        let device = self.selected_handle()?;
        self.session_for(&mut state, &device).stop()?;
        state.retire_session("stopped by user");
        Ok(())
    }

    pub fn volume_up(&self) -> Result<()> {
        let mut state = self.lock_state();
        let device = self.selected_handle()?;
        self.session_for(&mut state, &device).volume_up()
    }

    pub fn volume_down(&self) -> Result<()> {
        let mut state = self.lock_state();
        let device = self.selected_handle()?;
        self.session_for(&mut state, &device).volume_down()
    }

    // ------------------------------------------------------------------
    // Status events
    // ------------------------------------------------------------------

    /// Applies one device status. Never fails: statuses from a superseded
    /// session or with an unknown player state are dropped, and advance
    /// failures are logged.
    pub fn handle_status(&self, token: SessionToken, status: &MediaStatus) -> Verdict {
        let mut guard = self.lock_state();
        let state = &mut *guard;
        if state.active_token() != Some(token) {
            debug!(%token, %status, "Ignoring status from a superseded session");
            return Verdict::Discarded;
        }

        debug!(%token, %status, "status_listener");
        let verdict = state.engine.observe(status, state.current.as_ref());
        if verdict == Verdict::TrackEnded {
            match self.play_next_locked(state) {
                Ok(Some(started)) => info!("Auto-advanced to {}", started.title),
                Ok(None) => info!("Track finished, queue is empty"),
                Err(e) => error!("Auto-advance failed: {}", e),
            }
        }
        verdict
    }

    /// Applies every queued status notification. Returns how many were read.
    pub fn process_pending_events(&self) -> usize {
        let mut count = 0;
        while let Ok(event) = self.inner.events_rx.try_recv() {
            self.handle_status(event.token, &event.status);
            count += 1;
        }
        count
    }

    /// Runs the status loop on its own thread until [`Self::shutdown`].
    pub fn spawn_event_worker(&self) -> JoinHandle<()> {
        let controller = self.clone();
        thread::spawn(move || controller.run_event_loop())
    }

    fn run_event_loop(&self) {
        info!("Status worker started");
        while !self.inner.shutdown.load(Ordering::SeqCst) {
            match self.inner.events_rx.recv_timeout(WORKER_POLL) {
                Ok(event) => {
                    self.handle_status(event.token, &event.status);
                }
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        info!("Status worker stopped");
    }

    /// Stops the status worker. The device is left as it is.
    pub fn shutdown(&self) {
        self.inner.shutdown.store(true, Ordering::SeqCst);
        let mut state = self.lock_state();
        state.retire_session("shutdown");
    }

    // ------------------------------------------------------------------
    // Internals (lock held)
    // ------------------------------------------------------------------

    fn selected_handle(&self) -> Result<DeviceHandle> {
        self.inner
            .registry
            .selected()
            .ok_or(ControlError::NoDeviceSelected)
    }

    /// Session bound to `device`, opening a fresh one when needed.
    fn session_for<'a>(
        &self,
        state: &'a mut PlaybackState,
        device: &DeviceHandle,
    ) -> &'a mut PlaybackSession {
        let session = match state.session.take() {
            Some(session) if session.is_bound_to(device) => session,
            previous => {
                state.session = previous;
                state.retire_session("new session");
                let token = SessionToken(state.next_token);
                state.next_token += 1;
                PlaybackSession::new(token, Arc::clone(device), self.inner.settings.clone())
            }
        };
        state.session.insert(session)
    }

    fn play_next_locked(&self, state: &mut PlaybackState) -> Result<Option<Started>> {
        if state.queue.is_empty() {
            debug!("Queue is empty, nothing to play");
            return Ok(None);
        }
        let device = self.selected_handle()?;

        let mut last_failure = None;
        while let Some(track) = state.queue.pop_front() {
            let url = match track.resolve_url() {
                Ok(url) => url,
                Err(e) => {
                    warn!("Dropping {}: cannot resolve its URL: {:#}", track.title(), e);
                    last_failure = Some(ControlError::resolution_failed(
                        track.title(),
                        format!("{:#}", e),
                    ));
                    continue;
                }
            };

            info!("Playing {}", track.title());
            let session = self.session_for(state, &device);
            if let Err(e) = session.play_from_start(&url, &self.inner.events_tx) {
                warn!("Cannot start {}: {}", track.title(), e);
                state.queue.push_front(track);
                return Err(e);
            }

            state.current = Some(CurrentTrack::new(url, &track));
            state.engine.note_play_started();
            state.generation += 1;
            return Ok(Some(Started {
                title: track.title().to_string(),
                ticket: PlayTicket(state.generation),
            }));
        }

        match last_failure {
            Some(err) => Err(err),
            None => Ok(None),
        }
    }
}
