//! In-memory [`AudioIo`] adapter
//!
//! Records every native call in invocation order so tests can assert on
//! ordering and idempotence. Also usable for development without audio
//! hardware.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{AudioFrame, AudioIo, InputSubscription};
use crate::{Error, Result};

/// One recorded native call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudioCall {
    RequestPermission,
    StartCapture,
    StopCapture,
    Enqueue(AudioFrame),
    StopPlayback,
    SetMuted(bool),
    SubscribeInput,
    RemoveSubscription,
}

struct StubInner {
    calls: Mutex<Vec<AudioCall>>,
    permission: AtomicBool,
    fail_enqueue: AtomicBool,
    input_tx: Mutex<Option<mpsc::UnboundedSender<AudioFrame>>>,
    active_subs: AtomicUsize,
    max_active_subs: AtomicUsize,
}

/// In-memory audio adapter with a recorded call log
#[derive(Clone)]
pub struct StubAudioIo {
    inner: Arc<StubInner>,
}

impl Default for StubAudioIo {
    fn default() -> Self {
        Self::new()
    }
}

impl StubAudioIo {
    /// Create a stub that grants permission and accepts every call
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(StubInner {
                calls: Mutex::new(Vec::new()),
                permission: AtomicBool::new(true),
                fail_enqueue: AtomicBool::new(false),
                input_tx: Mutex::new(None),
                active_subs: AtomicUsize::new(0),
                max_active_subs: AtomicUsize::new(0),
            }),
        }
    }

    /// Make `request_permission` report denial
    pub fn deny_permission(&self) {
        self.inner.permission.store(false, Ordering::SeqCst);
    }

    /// Make every `enqueue_audio` call fail
    pub fn fail_enqueues(&self) {
        self.inner.fail_enqueue.store(true, Ordering::SeqCst);
    }

    /// Inject a captured input frame into the live subscription
    ///
    /// Dropped silently when nothing is subscribed, matching a native layer
    /// that keeps capturing after its listener is removed.
    pub fn push_input(&self, frame: AudioFrame) {
        if let Some(tx) = self.inner.input_tx.lock().unwrap().as_ref() {
            let _ = tx.send(frame);
        }
    }

    /// Snapshot of the full call log in invocation order
    #[must_use]
    pub fn calls(&self) -> Vec<AudioCall> {
        self.inner.calls.lock().unwrap().clone()
    }

    /// How many times a given call was recorded
    #[must_use]
    pub fn count(&self, call: &AudioCall) -> usize {
        self.inner
            .calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| *c == call)
            .count()
    }

    /// All enqueued frames, in enqueue order
    #[must_use]
    pub fn enqueued_frames(&self) -> Vec<AudioFrame> {
        self.inner
            .calls
            .lock()
            .unwrap()
            .iter()
            .filter_map(|c| match c {
                AudioCall::Enqueue(frame) => Some(frame.clone()),
                _ => None,
            })
            .collect()
    }

    /// Highest number of simultaneously live input subscriptions seen
    #[must_use]
    pub fn max_active_subscriptions(&self) -> usize {
        self.inner.max_active_subs.load(Ordering::SeqCst)
    }

    fn record(&self, call: AudioCall) {
        self.inner.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl AudioIo for StubAudioIo {
    async fn request_permission(&self) -> Result<bool> {
        self.record(AudioCall::RequestPermission);
        Ok(self.inner.permission.load(Ordering::SeqCst))
    }

    async fn start_capture(&self) -> Result<()> {
        self.record(AudioCall::StartCapture);
        Ok(())
    }

    async fn stop_capture(&self) -> Result<()> {
        self.record(AudioCall::StopCapture);
        Ok(())
    }

    async fn enqueue_audio(&self, frame: AudioFrame) -> Result<()> {
        if self.inner.fail_enqueue.load(Ordering::SeqCst) {
            return Err(Error::Audio("enqueue failed".to_string()));
        }
        self.record(AudioCall::Enqueue(frame));
        Ok(())
    }

    async fn stop_playback(&self) -> Result<()> {
        self.record(AudioCall::StopPlayback);
        Ok(())
    }

    async fn set_muted(&self, muted: bool) -> Result<()> {
        self.record(AudioCall::SetMuted(muted));
        Ok(())
    }

    fn subscribe_input(&self) -> InputSubscription {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.inner.input_tx.lock().unwrap() = Some(tx);
        self.record(AudioCall::SubscribeInput);

        let live = self.inner.active_subs.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.max_active_subs.fetch_max(live, Ordering::SeqCst);

        let inner = Arc::clone(&self.inner);
        InputSubscription::new(rx, move || {
            *inner.input_tx.lock().unwrap() = None;
            inner.active_subs.fetch_sub(1, Ordering::SeqCst);
            inner
                .calls
                .lock()
                .unwrap()
                .push(AudioCall::RemoveSubscription);
        })
    }
}
