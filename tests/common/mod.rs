//! Shared test doubles for the call pipeline

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use mello_voice::{
    AudioFrame, CallController, CallState, Error, Result, SessionConnector, SessionEvent,
    SpeechSession, StubAudioIo,
};

const EVENT_BUFFER: usize = 64;

struct SessionState {
    sent: Mutex<Vec<AudioFrame>>,
    disconnects: AtomicUsize,
}

/// Scripted stand-in for a live speech session
struct ScriptedSession {
    state: Arc<SessionState>,
}

#[async_trait]
impl SpeechSession for ScriptedSession {
    fn send_audio(&self, frame: AudioFrame) {
        self.state.sent.lock().unwrap().push(frame);
    }

    async fn disconnect(&self) {
        self.state.disconnects.fetch_add(1, Ordering::SeqCst);
    }
}

/// Test-side handle to one scripted session
#[derive(Clone)]
pub struct SessionHandle {
    state: Arc<SessionState>,
    events: mpsc::Sender<SessionEvent>,
}

impl SessionHandle {
    /// Deliver one event to the controller; silently dropped once the
    /// controller has detached from this session
    pub async fn push(&self, event: SessionEvent) {
        let _ = self.events.send(event).await;
    }

    /// Frames the controller forwarded, in order
    pub fn sent_frames(&self) -> Vec<AudioFrame> {
        self.state.sent.lock().unwrap().clone()
    }

    pub fn disconnect_count(&self) -> usize {
        self.state.disconnects.load(Ordering::SeqCst)
    }
}

/// Scripted connector handing out inspectable sessions
#[derive(Default)]
pub struct ScriptedConnector {
    fail_with: Mutex<Option<String>>,
    handles: Mutex<Vec<SessionHandle>>,
}

impl ScriptedConnector {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make the next `connect` call fail with a connection error
    pub fn fail_next(&self, message: &str) {
        *self.fail_with.lock().unwrap() = Some(message.to_string());
    }

    /// Handle to the `index`-th session opened so far
    #[must_use]
    pub fn session(&self, index: usize) -> SessionHandle {
        self.handles.lock().unwrap()[index].clone()
    }

    #[must_use]
    pub fn sessions_opened(&self) -> usize {
        self.handles.lock().unwrap().len()
    }
}

#[async_trait]
impl SessionConnector for ScriptedConnector {
    async fn connect(&self) -> Result<(Box<dyn SpeechSession>, mpsc::Receiver<SessionEvent>)> {
        if let Some(message) = self.fail_with.lock().unwrap().take() {
            return Err(Error::Connection(message));
        }
        let (event_tx, event_rx) = mpsc::channel(EVENT_BUFFER);
        let state = Arc::new(SessionState {
            sent: Mutex::new(Vec::new()),
            disconnects: AtomicUsize::new(0),
        });
        self.handles.lock().unwrap().push(SessionHandle {
            state: Arc::clone(&state),
            events: event_tx,
        });
        Ok((Box::new(ScriptedSession { state }), event_rx))
    }
}

/// Controller wired to a fresh audio stub and scripted connector
#[must_use]
pub fn harness() -> (CallController, StubAudioIo, Arc<ScriptedConnector>) {
    let audio = StubAudioIo::new();
    let connector = ScriptedConnector::new();
    let controller = CallController::new(
        Arc::new(audio.clone()),
        Arc::clone(&connector) as Arc<dyn SessionConnector>,
    );
    (controller, audio, connector)
}

/// Start a call, confirm it remotely, and wait for `Active`
pub async fn activate(
    controller: &CallController,
    connector: &ScriptedConnector,
) -> SessionHandle {
    controller.start_call().await.expect("start_call failed");
    let handle = connector.session(connector.sessions_opened() - 1);
    handle
        .push(SessionEvent::Connected {
            session_id: "test-session".to_string(),
        })
        .await;
    wait_for_state(controller, CallState::Active).await;
    handle
}

/// Block until the published call state matches
pub async fn wait_for_state(controller: &CallController, state: CallState) {
    let mut watch = controller.watch();
    watch
        .wait_for(|s| s.call_state == state)
        .await
        .expect("controller stopped");
}

/// Poll until `cond` holds; panics after ~1s of attempts
pub async fn eventually(mut cond: impl FnMut() -> bool) {
    for _ in 0..200 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached in time");
}

/// Yield repeatedly so the controller task drains its pending sources
pub async fn drain() {
    for _ in 0..50 {
        tokio::task::yield_now().await;
    }
}
