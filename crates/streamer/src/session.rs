//! Single-session orchestrator.
//!
//! Start order: recreate FIFO, spawn main (it blocks opening the FIFO for
//! reading), then spawn the feeder (opens the FIFO for writing).
//!
//! Stop order: terminate the feeder so main sees EOF on the FIFO, moves on to
//! the outro and exits by itself; only if main overruns its ceiling is it
//! signalled. Handles are cleared and the FIFO removed before the stopping
//! flag drops, so the next start never sees leftovers.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use printcast_core::types::SessionState;
use serde::Serialize;
use tokio::process::Child;
use tracing::{info, warn};
use uuid::Uuid;

use crate::command::{self, usable_segment};
use crate::fifo;
use crate::normalize::{MediaLibrary, PreparedMedia};
use crate::process::{self, ProcessRole};
use crate::{EncodingProfile, StreamerConfig, StreamerError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StartOutcome {
    Started,
    Disabled,
    AlreadyRunning,
    StopInProgress,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopOutcome {
    Stopped,
    NotRunning,
    AlreadyStopping,
}

/// Polling intervals and ceilings used while starting and stopping.
#[derive(Debug, Clone)]
pub struct StopTimings {
    pub feeder_poll_attempts: u32,
    pub feeder_poll_interval: Duration,
    /// How long main may keep running after the feeder is gone (outro playback).
    pub main_exit_ceiling: Duration,
    pub main_poll_interval: Duration,
    pub main_kill_grace: Duration,
    /// A process exiting within this window after spawn is reported as a failure.
    pub early_exit_window: Duration,
}

impl Default for StopTimings {
    fn default() -> Self {
        Self {
            feeder_poll_attempts: 10,
            feeder_poll_interval: Duration::from_millis(300),
            main_exit_ceiling: Duration::from_secs(180),
            main_poll_interval: Duration::from_millis(500),
            main_kill_grace: Duration::from_secs(1),
            early_exit_window: Duration::from_secs(1),
        }
    }
}

#[derive(Default)]
struct Handles {
    session_id: Option<Uuid>,
    started_at: Option<Instant>,
    main: Option<Child>,
    feeder: Option<Child>,
}

impl Handles {
    fn slot(&mut self, role: ProcessRole) -> &mut Option<Child> {
        match role {
            ProcessRole::Main => &mut self.main,
            ProcessRole::Feeder => &mut self.feeder,
        }
    }

    fn is_running(&mut self, role: ProcessRole) -> bool {
        self.slot(role)
            .as_mut()
            .is_some_and(|child| !process::has_exited(child))
    }
}

/// Clears the flag when dropped, so an abandoned start/stop cannot leave it set.
struct FlagReset<'a>(&'a AtomicBool);

impl Drop for FlagReset<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Snapshot reported by the control surface.
#[derive(Debug, Clone, Serialize)]
pub struct StreamerStatus {
    pub enabled: bool,
    pub state: SessionState,
    pub streaming: bool,
    pub feeder_running: bool,
    pub uptime: f64,
    pub intro_enabled: bool,
    pub outro_enabled: bool,
    pub intro_video: Option<PathBuf>,
    pub outro_video: Option<PathBuf>,
    pub target: EncodingProfile,
    pub cache_dir: PathBuf,
    pub fifo_path: PathBuf,
    pub ffmpeg_log_path: PathBuf,
}

/// Owns the broadcast session and its two ffmpeg processes.
pub struct Orchestrator {
    config: StreamerConfig,
    timings: StopTimings,
    media: MediaLibrary,
    enabled: AtomicBool,
    intro_enabled: AtomicBool,
    outro_enabled: AtomicBool,
    starting: AtomicBool,
    stopping: AtomicBool,
    session_guard: tokio::sync::Mutex<()>,
    handles: Arc<Mutex<Handles>>,
}

impl Orchestrator {
    /// Validate the configuration and create the cache directory.
    pub fn new(config: StreamerConfig) -> Result<Self, StreamerError> {
        config.validate()?;
        std::fs::create_dir_all(&config.cache_dir)?;

        Ok(Self {
            timings: StopTimings::default(),
            media: MediaLibrary::new(&config),
            enabled: AtomicBool::new(config.enabled),
            intro_enabled: AtomicBool::new(config.intro_enabled),
            outro_enabled: AtomicBool::new(config.outro_enabled),
            starting: AtomicBool::new(false),
            stopping: AtomicBool::new(false),
            session_guard: tokio::sync::Mutex::new(()),
            handles: Arc::new(Mutex::new(Handles::default())),
            config,
        })
    }

    pub fn with_timings(mut self, timings: StopTimings) -> Self {
        self.timings = timings;
        self
    }

    pub fn config(&self) -> &StreamerConfig {
        &self.config
    }

    fn handles(&self) -> MutexGuard<'_, Handles> {
        self.handles.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn is_running(&self, role: ProcessRole) -> bool {
        self.handles().is_running(role)
    }

    fn has_session(&self) -> bool {
        let h = self.handles();
        h.main.is_some() || h.feeder.is_some()
    }

    // --- runtime toggles ---

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn set_enabled(&self, on: bool) {
        self.enabled.store(on, Ordering::SeqCst);
        info!(enabled = on, "streaming toggled");
    }

    pub fn intro_enabled(&self) -> bool {
        self.intro_enabled.load(Ordering::SeqCst)
    }

    pub fn set_intro_enabled(&self, on: bool) {
        self.intro_enabled.store(on, Ordering::SeqCst);
    }

    pub fn outro_enabled(&self) -> bool {
        self.outro_enabled.load(Ordering::SeqCst)
    }

    pub fn set_outro_enabled(&self, on: bool) {
        self.outro_enabled.store(on, Ordering::SeqCst);
    }

    // --- status ---

    /// Main process exists and has not exited.
    pub fn is_streaming(&self) -> bool {
        self.is_running(ProcessRole::Main)
    }

    pub fn feeder_running(&self) -> bool {
        self.is_running(ProcessRole::Feeder)
    }

    pub fn uptime(&self) -> Duration {
        self.handles()
            .started_at
            .map(|t| t.elapsed())
            .unwrap_or_default()
    }

    pub fn state(&self) -> SessionState {
        if self.stopping.load(Ordering::SeqCst) {
            SessionState::Stopping
        } else if self.starting.load(Ordering::SeqCst) {
            SessionState::Starting
        } else if self.is_streaming() {
            SessionState::Running
        } else {
            SessionState::Idle
        }
    }

    pub fn status(&self) -> StreamerStatus {
        let resolved = self.media.resolved();
        StreamerStatus {
            enabled: self.is_enabled(),
            state: self.state(),
            streaming: self.is_streaming(),
            feeder_running: self.feeder_running(),
            uptime: (self.uptime().as_secs_f64() * 10.0).round() / 10.0,
            intro_enabled: self.intro_enabled(),
            outro_enabled: self.outro_enabled(),
            intro_video: resolved.intro_video,
            outro_video: resolved.outro_video,
            target: self.config.profile.clone(),
            cache_dir: self.config.cache_dir.clone(),
            fifo_path: self.config.fifo_path(),
            ffmpeg_log_path: self.config.ffmpeg_log_path.clone(),
        }
    }

    /// Normalize intro/outro. Safe to call at any time.
    pub async fn prepare_media(&self) -> PreparedMedia {
        self.media.prepare().await
    }

    // --- lifecycle ---

    /// Start a session. Never fails upward; the outcome says what happened.
    pub async fn start(&self) -> StartOutcome {
        info!("start requested");
        if self.stopping.load(Ordering::SeqCst) {
            return StartOutcome::StopInProgress;
        }

        let _guard = self.session_guard.lock().await;
        if !self.is_enabled() {
            return StartOutcome::Disabled;
        }
        if self.stopping.load(Ordering::SeqCst) {
            return StartOutcome::StopInProgress;
        }
        if self.is_streaming() {
            return StartOutcome::AlreadyRunning;
        }

        self.starting.store(true, Ordering::SeqCst);
        let _starting = FlagReset(&self.starting);
        self.launch().await
    }

    async fn launch(&self) -> StartOutcome {
        // Only clips normalized in this pass are used; a failed one is left out.
        let media = self.media.normalize().await;
        let intro = usable_segment(self.intro_enabled(), media.intro_video.as_deref());
        let outro = usable_segment(self.outro_enabled(), media.outro_video.as_deref());

        let fifo_path = self.config.fifo_path();
        if let Err(e) = fifo::recreate_fifo(&fifo_path) {
            warn!(path = %fifo_path.display(), error = %e, "failed to create FIFO");
            return StartOutcome::Failed;
        }

        let log_path = &self.config.ffmpeg_log_path;
        let main_cmd = command::main_command(&self.config, intro, outro);
        let main = match process::spawn_logged(&main_cmd, ProcessRole::Main, log_path) {
            Ok(child) => child,
            Err(e) => {
                warn!(error = %e, "failed to start main ffmpeg");
                fifo::remove_fifo(&fifo_path);
                return StartOutcome::Failed;
            }
        };

        let session_id = Uuid::new_v4();
        {
            let mut h = self.handles();
            h.session_id = Some(session_id);
            h.started_at = Some(Instant::now());
            h.main = Some(main);
        }
        self.watch_early_exit(session_id, ProcessRole::Main);

        let feeder_cmd = command::feeder_command(&self.config);
        match process::spawn_logged(&feeder_cmd, ProcessRole::Feeder, log_path) {
            Ok(child) => {
                self.handles().feeder = Some(child);
            }
            Err(e) => {
                warn!(%session_id, error = %e, "failed to start feeder ffmpeg, aborting session");
                let mut h = self.handles();
                if let Some(main) = h.main.as_mut() {
                    process::kill(main);
                }
                *h = Handles::default();
                drop(h);
                fifo::remove_fifo(&fifo_path);
                return StartOutcome::Failed;
            }
        }
        self.watch_early_exit(session_id, ProcessRole::Feeder);

        info!(
            %session_id,
            intro = intro.is_some(),
            outro = outro.is_some(),
            "session started"
        );
        StartOutcome::Started
    }

    /// Warn if `role` dies within the early-exit window.
    fn watch_early_exit(&self, session_id: Uuid, role: ProcessRole) {
        let handles = Arc::clone(&self.handles);
        let window = self.timings.early_exit_window;
        let log_path = self.config.ffmpeg_log_path.clone();
        tokio::spawn(async move {
            tokio::time::sleep(window).await;
            let mut h = handles.lock().unwrap_or_else(|e| e.into_inner());
            if h.session_id != Some(session_id) {
                return;
            }
            let Some(child) = h.slot(role).as_mut() else {
                return;
            };
            if let Ok(Some(status)) = child.try_wait() {
                if !status.success() {
                    warn!(
                        %session_id,
                        %role,
                        %status,
                        log = %log_path.display(),
                        "ffmpeg exited immediately"
                    );
                }
            }
        });
    }

    /// Stop the session: feeder first, then let main drain through the outro.
    pub async fn stop(&self) -> StopOutcome {
        info!("stop requested");
        if !self.stopping.load(Ordering::SeqCst)
            && !self.starting.load(Ordering::SeqCst)
            && !self.has_session()
        {
            return StopOutcome::NotRunning;
        }
        if self
            .stopping
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return StopOutcome::AlreadyStopping;
        }
        // Dropped after the session guard, also when this future is abandoned.
        let _stopping = FlagReset(&self.stopping);

        let _guard = self.session_guard.lock().await;
        let session_id = {
            let h = self.handles();
            if h.main.is_none() && h.feeder.is_none() {
                None
            } else {
                Some(h.session_id.unwrap_or_else(Uuid::nil))
            }
        };
        let Some(session_id) = session_id else {
            return StopOutcome::NotRunning;
        };

        self.stop_feeder().await;
        self.drain_main().await;

        *self.handles() = Handles::default();
        fifo::remove_fifo(&self.config.fifo_path());

        info!(%session_id, "session stopped");
        StopOutcome::Stopped
    }

    async fn stop_feeder(&self) {
        let t = &self.timings;
        let signalled = {
            let mut h = self.handles();
            match h.feeder.as_mut() {
                Some(child) => {
                    let alive = !process::has_exited(child);
                    if alive {
                        process::terminate(child);
                    }
                    alive
                }
                None => false,
            }
        };

        if signalled {
            for _ in 0..t.feeder_poll_attempts {
                if !self.is_running(ProcessRole::Feeder) {
                    break;
                }
                tokio::time::sleep(t.feeder_poll_interval).await;
            }
            let mut h = self.handles();
            if let Some(child) = h.feeder.as_mut() {
                if !process::has_exited(child) {
                    warn!("feeder ignored SIGTERM, killing");
                    process::kill(child);
                }
            }
        }
        self.handles().feeder = None;
    }

    async fn drain_main(&self) {
        let t = &self.timings;
        let started = Instant::now();
        while self.is_running(ProcessRole::Main) && started.elapsed() < t.main_exit_ceiling {
            tokio::time::sleep(t.main_poll_interval).await;
        }

        let overran = {
            let mut h = self.handles();
            match h.main.as_mut() {
                Some(child) => {
                    let alive = !process::has_exited(child);
                    if alive {
                        warn!(ceiling = ?t.main_exit_ceiling, "main did not finish, terminating");
                        process::terminate(child);
                    }
                    alive
                }
                None => false,
            }
        };
        if overran {
            tokio::time::sleep(t.main_kill_grace).await;
            let mut h = self.handles();
            if let Some(child) = h.main.as_mut() {
                if !process::has_exited(child) {
                    process::kill(child);
                }
            }
        }
    }
}
