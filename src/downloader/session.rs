//! Single-flight download session.
//!
//! `start` validates and checks preconditions on the caller's thread, then hands the
//! fetch to a background task and returns. The task relays engine ticks to the sink
//! and finishes with exactly one terminal status. State lives in one atomic so the
//! start transition is a single compare-and-set; the cancel slot mutex orders
//! `cancel()` against the terminal decision.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinError;

use super::control::CancelFlag;
use super::errors::{EngineError, StartError};
use super::models::{
    DownloadRequest, Outcome, ProgressEvent, SessionEvent, SessionState, StatusEvent,
};
use super::options::{self, EngineOptions};
use super::tools::ToolType;
use super::traits::{Engine, EngineTick, EventSink, TickStatus, ToolProbe};

const IDLE: u8 = 0;
const RUNNING: u8 = 1;
const CANCELING: u8 = 2;
const COMPLETED: u8 = 3;
const FAILED: u8 = 4;
const CANCELED: u8 = 5;

fn encode(state: SessionState) -> u8 {
    match state {
        SessionState::Idle => IDLE,
        SessionState::Running => RUNNING,
        SessionState::Canceling => CANCELING,
        SessionState::Terminal(Outcome::Completed) => COMPLETED,
        SessionState::Terminal(Outcome::Failed) => FAILED,
        SessionState::Terminal(Outcome::Canceled) => CANCELED,
    }
}

fn decode(raw: u8) -> SessionState {
    match raw {
        RUNNING => SessionState::Running,
        CANCELING => SessionState::Canceling,
        COMPLETED => SessionState::Terminal(Outcome::Completed),
        FAILED => SessionState::Terminal(Outcome::Failed),
        CANCELED => SessionState::Terminal(Outcome::Canceled),
        _ => SessionState::Idle,
    }
}

fn is_active(raw: u8) -> bool {
    raw == RUNNING || raw == CANCELING
}

/// State shared between the session handle and its background task
struct Shared {
    state: AtomicU8,
    /// Flag of the in-flight run; `None` outside Running/Canceling
    cancel: Mutex<Option<CancelFlag>>,
    sink: Arc<dyn EventSink>,
    runs: AtomicU64,
}

impl Shared {
    fn cancel_slot(&self) -> MutexGuard<'_, Option<CancelFlag>> {
        self.cancel.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub struct DownloadSession {
    engine: Arc<dyn Engine>,
    tools: Arc<dyn ToolProbe>,
    shared: Arc<Shared>,
    runtime: Handle,
}

impl DownloadSession {
    /// Background work is spawned on `runtime`.
    pub fn new(
        engine: Arc<dyn Engine>,
        tools: Arc<dyn ToolProbe>,
        sink: Arc<dyn EventSink>,
        runtime: Handle,
    ) -> Self {
        Self {
            engine,
            tools,
            shared: Arc::new(Shared {
                state: AtomicU8::new(IDLE),
                cancel: Mutex::new(None),
                sink,
                runs: AtomicU64::new(0),
            }),
            runtime,
        }
    }

    pub fn state(&self) -> SessionState {
        decode(self.shared.state.load(Ordering::SeqCst))
    }

    pub fn is_running(&self) -> bool {
        self.state().is_active()
    }

    /// Begin downloading `request`. Returns as soon as the background task is spawned.
    pub fn start(&self, request: DownloadRequest) -> Result<(), StartError> {
        if is_active(self.shared.state.load(Ordering::SeqCst)) {
            return Err(StartError::AlreadyRunning);
        }

        request.validate()?;

        if !self.engine.is_available() {
            return Err(StartError::EngineUnavailable);
        }
        if request.audio_only() && !self.tools.is_available(ToolType::Ffmpeg) {
            return Err(StartError::AudioToolMissing);
        }

        let options = options::build(&request);
        let flag = CancelFlag::new();

        {
            let mut slot = self.shared.cancel_slot();
            self.shared
                .state
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |raw| {
                    (!is_active(raw)).then_some(RUNNING)
                })
                .map_err(|_| StartError::AlreadyRunning)?;
            *slot = Some(flag.clone());
        }

        let run = self.shared.runs.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::debug!(
            run,
            engine = self.engine.name(),
            service = %request.service(),
            url = request.url(),
            "session running"
        );

        self.runtime.spawn(drive(
            Arc::clone(&self.shared),
            Arc::clone(&self.engine),
            request.url().to_string(),
            options,
            flag,
            run,
        ));
        Ok(())
    }

    /// Ask the in-flight download to stop. No-op unless Running; safe to repeat.
    pub fn cancel(&self) {
        let slot = self.shared.cancel_slot();
        let Some(flag) = slot.as_ref() else {
            return;
        };
        if self
            .shared
            .state
            .compare_exchange(RUNNING, CANCELING, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            flag.cancel();
            tracing::debug!("session canceling");
        }
    }
}

impl Drop for DownloadSession {
    fn drop(&mut self) {
        self.cancel();
    }
}

async fn drive(
    shared: Arc<Shared>,
    engine: Arc<dyn Engine>,
    url: String,
    options: EngineOptions,
    flag: CancelFlag,
    run: u64,
) {
    let (tick_tx, mut tick_rx) = mpsc::unbounded_channel();
    let engine_flag = flag.clone();

    // Separate task so a panicking engine surfaces as a JoinError
    let mut fetch =
        tokio::spawn(async move { engine.download(&url, &options, tick_tx, engine_flag).await });

    let joined = loop {
        tokio::select! {
            biased;
            Some(tick) = tick_rx.recv() => relay(&shared, tick),
            joined = &mut fetch => break joined,
        }
    };
    while let Ok(tick) = tick_rx.try_recv() {
        relay(&shared, tick);
    }

    finish(&shared, &flag, joined, run);
}

fn relay(shared: &Shared, tick: EngineTick) {
    let event = match tick.status {
        TickStatus::Downloading => SessionEvent::Progress(progress_from_tick(&tick)),
        TickStatus::Finished => {
            SessionEvent::Status(StatusEvent::Finished(tick.filename.unwrap_or_default()))
        }
        TickStatus::Other => return,
    };
    shared.sink.emit(event);
}

pub(crate) fn progress_from_tick(tick: &EngineTick) -> ProgressEvent {
    let downloaded = tick.downloaded_bytes.unwrap_or(0);
    let total = tick.total_bytes.or_else(|| {
        tick.total_bytes_estimate
            .filter(|t| t.is_finite() && *t > 0.0)
            .map(|t| t as u64)
    });
    let percent = total
        .filter(|t| *t > 0)
        .map(|t| (downloaded as f64 / t as f64 * 100.0).clamp(0.0, 100.0));

    ProgressEvent {
        percent,
        bytes_downloaded: downloaded,
        bytes_total: total,
        speed_bytes_per_sec: tick.speed.filter(|s| s.is_finite() && *s >= 0.0),
        eta_seconds: tick
            .eta
            .filter(|e| e.is_finite() && *e >= 0.0)
            .map(|e| e.round() as u64),
    }
}

fn finish(
    shared: &Shared,
    flag: &CancelFlag,
    joined: Result<Result<(), EngineError>, JoinError>,
    run: u64,
) {
    let mut slot = shared.cancel_slot();

    let (outcome, status) = if flag.is_canceled() {
        (Outcome::Canceled, StatusEvent::Canceled)
    } else {
        match joined {
            Ok(Ok(())) => (Outcome::Completed, StatusEvent::Completed),
            Ok(Err(err)) => (Outcome::Failed, StatusEvent::Error(err.to_string())),
            Err(join_err) => {
                let message = if join_err.is_panic() {
                    "download engine panicked".to_string()
                } else {
                    "download task was aborted".to_string()
                };
                (Outcome::Failed, StatusEvent::Error(message))
            }
        }
    };

    let terminal = encode(SessionState::Terminal(outcome));
    shared.state.store(terminal, Ordering::SeqCst);
    *slot = None;
    tracing::debug!(run, outcome = ?outcome, "session finished");

    // Emitted under the slot lock so a new run cannot interleave with it
    shared.sink.emit(SessionEvent::Status(status));
    drop(slot);

    let _ = shared
        .state
        .compare_exchange(terminal, IDLE, Ordering::SeqCst, Ordering::SeqCst);
}
