//! Call lifecycle controller
//!
//! One actor task owns all mutable call state and reacts to four sources
//! (UI commands, captured input frames, session events, and the duration
//! tick) through a single `select!` loop. Handlers run to completion, so
//! no two of them ever interleave; the sources themselves arrive in any
//! order. The UI reads a [`CallSnapshot`] published through a watch
//! channel and never sees an error thrown at it.

use std::future::pending;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{Instant, Interval, MissedTickBehavior, interval_at};

use crate::audio::{AudioFrame, AudioIo, InputSubscription};
use crate::crisis::CrisisDetector;
use crate::session::client::{SessionConnector, SpeechSession};
use crate::session::protocol::{EmotionScore, SessionEvent};
use crate::{Error, Result};

/// Consecutive protocol errors tolerated before the call is ended
const FATAL_ERROR_STREAK: u32 = 3;

/// Command channel depth
const COMMAND_BUFFER: usize = 16;

/// Call lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CallState {
    Idle,
    Connecting,
    Active,
    Ended,
}

/// External crisis-line dialer
///
/// The actual dialing UI lives in the app shell; the controller only
/// delegates the handoff.
pub trait CrisisLineDialer: Send + Sync {
    fn dial(&self);
}

/// Default dialer: logs the handoff request
struct LogDialer;

impl CrisisLineDialer for LogDialer {
    fn dial(&self) {
        tracing::info!("crisis line handoff requested");
    }
}

/// Read-only call state snapshot for the presentation layer
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CallSnapshot {
    /// Lifecycle state
    pub call_state: CallState,
    /// Microphone muted by the user
    pub is_muted: bool,
    /// Whole seconds since the call became active
    pub call_duration_secs: u64,
    /// When the call became active
    pub started_at: Option<DateTime<Utc>>,
    /// Latest finalized user utterance (each new one replaces the prior)
    pub user_transcript: Option<String>,
    /// Latest finalized assistant reply
    pub assistant_text: Option<String>,
    /// Assistant audio is currently queued or playing
    pub is_assistant_speaking: bool,
    /// Top emotion scores from the latest user utterance
    pub top_emotions: Vec<EmotionScore>,
    /// Level-triggered distress flag; cleared only by explicit user action
    pub crisis_flag_active: bool,
    /// Most recent surfaced error, user-displayable
    pub last_error: Option<String>,
}

impl CallSnapshot {
    fn fresh() -> Self {
        Self {
            call_state: CallState::Idle,
            is_muted: false,
            call_duration_secs: 0,
            started_at: None,
            user_transcript: None,
            assistant_text: None,
            is_assistant_speaking: false,
            top_emotions: Vec::new(),
            crisis_flag_active: false,
            last_error: None,
        }
    }
}

/// User intent forwarded from the presentation layer
enum Command {
    StartCall(oneshot::Sender<Result<()>>),
    EndCall(oneshot::Sender<Result<()>>),
    ToggleMute(oneshot::Sender<Result<()>>),
    StartNewCall(oneshot::Sender<Result<()>>),
    DismissCrisisFlag(oneshot::Sender<Result<()>>),
    ConnectToCrisisLine(oneshot::Sender<Result<()>>),
}

/// Handle to the call controller actor
///
/// Cloning is cheap; dropping the last handle shuts the actor down after a
/// final teardown.
#[derive(Clone)]
pub struct CallController {
    commands: mpsc::Sender<Command>,
    snapshot: watch::Receiver<CallSnapshot>,
}

impl CallController {
    /// Spawn a controller with the default crisis detector and dialer
    #[must_use]
    pub fn new(audio: Arc<dyn AudioIo>, connector: Arc<dyn SessionConnector>) -> Self {
        Self::with_parts(audio, connector, CrisisDetector::default(), Arc::new(LogDialer))
    }

    /// Spawn a controller with explicit crisis detector and dialer
    #[must_use]
    pub fn with_parts(
        audio: Arc<dyn AudioIo>,
        connector: Arc<dyn SessionConnector>,
        crisis: CrisisDetector,
        dialer: Arc<dyn CrisisLineDialer>,
    ) -> Self {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let (snapshot_tx, snapshot_rx) = watch::channel(CallSnapshot::fresh());

        let task = ControllerTask {
            audio,
            connector,
            dialer,
            crisis,
            snapshot_tx,
            snapshot: CallSnapshot::fresh(),
            session: None,
            events: None,
            input: None,
            ticker: None,
            capturing: false,
            error_streak: 0,
        };
        tokio::spawn(task.run(command_rx));

        Self {
            commands: command_tx,
            snapshot: snapshot_rx,
        }
    }

    /// Current snapshot
    #[must_use]
    pub fn snapshot(&self) -> CallSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Subscribe to snapshot changes
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<CallSnapshot> {
        self.snapshot.clone()
    }

    /// Start a call from `Idle`/`Ended`
    ///
    /// # Errors
    ///
    /// Returns [`Error::PermissionDenied`], [`Error::Connection`], or
    /// [`Error::Session`] when a call is already in flight.
    pub async fn start_call(&self) -> Result<()> {
        self.send(Command::StartCall).await
    }

    /// End the current call; a no-op outside `Connecting`/`Active`
    ///
    /// # Errors
    ///
    /// Returns [`Error::Session`] if the controller has stopped.
    pub async fn end_call(&self) -> Result<()> {
        self.send(Command::EndCall).await
    }

    /// Toggle the microphone mute; only valid while `Active`
    ///
    /// # Errors
    ///
    /// Returns [`Error::Session`] outside an active call.
    pub async fn toggle_mute(&self) -> Result<()> {
        self.send(Command::ToggleMute).await
    }

    /// Reset an `Ended` call back to a fresh `Idle` state
    ///
    /// # Errors
    ///
    /// Returns [`Error::Session`] while a call is still in flight.
    pub async fn start_new_call(&self) -> Result<()> {
        self.send(Command::StartNewCall).await
    }

    /// Clear the crisis flag at the user's explicit request
    ///
    /// # Errors
    ///
    /// Returns [`Error::Session`] if the controller has stopped.
    pub async fn dismiss_crisis_flag(&self) -> Result<()> {
        self.send(Command::DismissCrisisFlag).await
    }

    /// Hand off to the external crisis line and clear the flag
    ///
    /// # Errors
    ///
    /// Returns [`Error::Session`] if the controller has stopped.
    pub async fn connect_to_crisis_line(&self) -> Result<()> {
        self.send(Command::ConnectToCrisisLine).await
    }

    async fn send(
        &self,
        make: impl FnOnce(oneshot::Sender<Result<()>>) -> Command,
    ) -> Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(make(reply_tx))
            .await
            .map_err(|_| Error::Session("controller stopped".to_string()))?;
        reply_rx
            .await
            .map_err(|_| Error::Session("controller stopped".to_string()))?
    }
}

/// One step of the actor loop
enum Step {
    Command(Command),
    Session(Option<SessionEvent>),
    Input(Option<AudioFrame>),
    Tick,
    Shutdown,
}

/// Actor state; exclusively owns the session, the input subscription, and
/// the duration ticker
struct ControllerTask {
    audio: Arc<dyn AudioIo>,
    connector: Arc<dyn SessionConnector>,
    dialer: Arc<dyn CrisisLineDialer>,
    crisis: CrisisDetector,
    snapshot_tx: watch::Sender<CallSnapshot>,
    snapshot: CallSnapshot,
    session: Option<Box<dyn SpeechSession>>,
    events: Option<mpsc::Receiver<SessionEvent>>,
    input: Option<InputSubscription>,
    ticker: Option<Interval>,
    capturing: bool,
    error_streak: u32,
}

async fn next_event(events: &mut Option<mpsc::Receiver<SessionEvent>>) -> Option<SessionEvent> {
    match events {
        Some(rx) => rx.recv().await,
        None => pending().await,
    }
}

async fn next_frame(input: &mut Option<InputSubscription>) -> Option<AudioFrame> {
    match input {
        Some(sub) => sub.recv().await,
        None => pending().await,
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(interval) => {
            interval.tick().await;
        }
        None => pending().await,
    }
}

impl ControllerTask {
    async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        loop {
            let step = {
                let events = &mut self.events;
                let input = &mut self.input;
                let ticker = &mut self.ticker;
                tokio::select! {
                    command = commands.recv() => {
                        command.map_or(Step::Shutdown, Step::Command)
                    }
                    event = next_event(events) => Step::Session(event),
                    frame = next_frame(input) => Step::Input(frame),
                    () = next_tick(ticker) => Step::Tick,
                }
            };

            match step {
                Step::Command(command) => self.handle_command(command).await,
                Step::Session(Some(event)) => self.handle_event(event).await,
                Step::Session(None) => self.on_events_closed().await,
                Step::Input(Some(frame)) => self.on_input_frame(frame),
                Step::Input(None) => {
                    // Capture source gone; stop polling the dead stream
                    if let Some(mut input) = self.input.take() {
                        input.remove();
                    }
                }
                Step::Tick => self.on_tick(),
                Step::Shutdown => {
                    self.teardown().await;
                    break;
                }
            }
        }
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::StartCall(reply) => {
                let result = self.start_call().await;
                let _ = reply.send(result);
            }
            Command::EndCall(reply) => {
                let result = self.end_call().await;
                let _ = reply.send(result);
            }
            Command::ToggleMute(reply) => {
                let result = self.toggle_mute().await;
                let _ = reply.send(result);
            }
            Command::StartNewCall(reply) => {
                let result = self.start_new_call();
                let _ = reply.send(result);
            }
            Command::DismissCrisisFlag(reply) => {
                self.snapshot.crisis_flag_active = false;
                self.publish();
                let _ = reply.send(Ok(()));
            }
            Command::ConnectToCrisisLine(reply) => {
                self.dialer.dial();
                self.snapshot.crisis_flag_active = false;
                self.publish();
                let _ = reply.send(Ok(()));
            }
        }
    }

    async fn start_call(&mut self) -> Result<()> {
        if !matches!(
            self.snapshot.call_state,
            CallState::Idle | CallState::Ended
        ) {
            return Err(Error::Session("call already in progress".to_string()));
        }

        self.snapshot = CallSnapshot::fresh();
        self.snapshot.call_state = CallState::Connecting;
        self.error_streak = 0;
        self.publish();

        let granted = match self.audio.request_permission().await {
            Ok(granted) => granted,
            Err(e) => return Err(self.abort_connect(e).await),
        };
        if !granted {
            tracing::warn!("microphone permission denied");
            return Err(self.abort_connect(Error::PermissionDenied).await);
        }

        let (session, events) = match self.connector.connect().await {
            Ok(pair) => pair,
            Err(e) => return Err(self.abort_connect(e).await),
        };
        self.session = Some(session);
        self.events = Some(events);
        self.input = Some(self.audio.subscribe_input());

        if let Err(e) = self.audio.start_capture().await {
            return Err(self.abort_connect(e).await);
        }
        self.capturing = true;

        tracing::debug!("session opened, capture started");
        Ok(())
    }

    /// Roll back a failed `start_call`: full teardown, back to `Idle`
    async fn abort_connect(&mut self, error: Error) -> Error {
        self.teardown().await;
        self.snapshot.call_state = CallState::Idle;
        self.snapshot.last_error = Some(error.to_string());
        self.publish();
        error
    }

    async fn end_call(&mut self) -> Result<()> {
        match self.snapshot.call_state {
            CallState::Connecting | CallState::Active => {
                tracing::info!("call ended by user");
                self.teardown().await;
                self.snapshot.call_state = CallState::Ended;
                self.publish();
                Ok(())
            }
            // Double taps and late taps are no-ops
            CallState::Idle | CallState::Ended => Ok(()),
        }
    }

    async fn toggle_mute(&mut self) -> Result<()> {
        if self.snapshot.call_state != CallState::Active {
            return Err(Error::Session(
                "mute is only available during a call".to_string(),
            ));
        }
        let muted = !self.snapshot.is_muted;
        self.snapshot.is_muted = muted;
        if let Err(e) = self.audio.set_muted(muted).await {
            tracing::warn!(error = %e, "native mute failed");
        }
        self.publish();
        Ok(())
    }

    fn start_new_call(&mut self) -> Result<()> {
        match self.snapshot.call_state {
            CallState::Ended => {
                self.snapshot = CallSnapshot::fresh();
                self.publish();
                Ok(())
            }
            CallState::Idle => Ok(()),
            CallState::Connecting | CallState::Active => {
                Err(Error::Session("call still in progress".to_string()))
            }
        }
    }

    async fn handle_event(&mut self, event: SessionEvent) {
        if let SessionEvent::Error { message } = &event {
            self.on_protocol_error(message.clone()).await;
            self.publish();
            return;
        }
        self.error_streak = 0;

        match event {
            SessionEvent::Connected { session_id } => {
                if self.snapshot.call_state == CallState::Connecting {
                    tracing::info!(session_id = %session_id, "call active");
                    self.snapshot.call_state = CallState::Active;
                    self.snapshot.started_at = Some(Utc::now());
                    let mut ticker = interval_at(
                        Instant::now() + Duration::from_secs(1),
                        Duration::from_secs(1),
                    );
                    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                    self.ticker = Some(ticker);
                }
            }
            SessionEvent::UserMessage { text, emotions } => {
                if !self.snapshot.crisis_flag_active && self.crisis.detect(&text, &emotions) {
                    tracing::warn!("crisis signal detected");
                    self.snapshot.crisis_flag_active = true;
                }
                self.snapshot.user_transcript = Some(text);
                self.snapshot.top_emotions = emotions;
            }
            SessionEvent::AssistantMessage { text } => {
                self.snapshot.assistant_text = Some(text);
            }
            SessionEvent::AudioOutput { frame } => {
                self.snapshot.is_assistant_speaking = true;
                if let Err(e) = self.audio.enqueue_audio(frame).await {
                    // Non-fatal: the conversation continues via transcript
                    tracing::warn!(error = %e, "playback enqueue failed");
                }
            }
            SessionEvent::UserInterruption => {
                // Barge-in: flush before any next-turn chunk can be enqueued
                if let Err(e) = self.audio.stop_playback().await {
                    tracing::warn!(error = %e, "stop playback failed");
                }
                self.snapshot.is_assistant_speaking = false;
            }
            SessionEvent::AssistantEnd => {
                self.snapshot.is_assistant_speaking = false;
            }
            SessionEvent::Disconnected => {
                tracing::warn!("session dropped unexpectedly");
                self.teardown().await;
                self.snapshot.call_state = CallState::Ended;
                self.snapshot.last_error = Some(Error::Disconnected.to_string());
            }
            SessionEvent::Error { .. } => {}
        }
        self.publish();
    }

    /// A protocol error is non-fatal until it repeats with nothing
    /// succeeding in between
    async fn on_protocol_error(&mut self, message: String) {
        self.error_streak += 1;
        tracing::warn!(error = %message, streak = self.error_streak, "session error");
        self.snapshot.last_error = Some(message);
        if self.error_streak >= FATAL_ERROR_STREAK {
            tracing::error!("repeated session errors, ending call");
            self.teardown().await;
            self.snapshot.call_state = CallState::Ended;
        }
    }

    /// Event channel closed without a `Disconnected`; treat it as one
    async fn on_events_closed(&mut self) {
        self.events = None;
        if matches!(
            self.snapshot.call_state,
            CallState::Connecting | CallState::Active
        ) {
            self.handle_event(SessionEvent::Disconnected).await;
        }
    }

    fn on_input_frame(&mut self, frame: AudioFrame) {
        // Muted frames never leave the device, so muted speech is also
        // never analyzed server-side
        if self.snapshot.is_muted {
            return;
        }
        if let Some(session) = &self.session {
            session.send_audio(frame);
        }
    }

    fn on_tick(&mut self) {
        self.snapshot.call_duration_secs += 1;
        self.publish();
    }

    /// Release everything in a fixed order: stop capture, stop playback,
    /// remove the input subscription, disconnect the session. Idempotent
    /// and safe on partially acquired state.
    async fn teardown(&mut self) {
        self.ticker = None;
        if self.capturing {
            self.capturing = false;
            if let Err(e) = self.audio.stop_capture().await {
                tracing::warn!(error = %e, "stop capture failed");
            }
        }
        if self.session.is_some() {
            if let Err(e) = self.audio.stop_playback().await {
                tracing::warn!(error = %e, "stop playback failed");
            }
        }
        if let Some(mut input) = self.input.take() {
            input.remove();
        }
        self.events = None;
        if let Some(session) = self.session.take() {
            session.disconnect().await;
        }
        self.snapshot.is_assistant_speaking = false;
    }

    fn publish(&self) {
        let _ = self.snapshot_tx.send(self.snapshot.clone());
    }
}
