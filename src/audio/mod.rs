//! Native audio boundary
//!
//! Capture and playback are owned by the app's native layer; this module
//! defines the contract the call controller drives. [`stub::StubAudioIo`]
//! is the in-memory adapter used by tests and hardware-free development.

pub mod stub;

pub use stub::StubAudioIo;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::Result;

/// Opaque encoded audio payload
///
/// Ordering is significant, identity is not: frames are never inspected,
/// only forwarded in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame(Vec<u8>);

impl AudioFrame {
    /// Wrap an encoded payload
    #[must_use]
    pub const fn new(data: Vec<u8>) -> Self {
        Self(data)
    }

    /// Borrow the encoded payload
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Consume the frame, returning the encoded payload
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }
}

impl From<Vec<u8>> for AudioFrame {
    fn from(data: Vec<u8>) -> Self {
        Self(data)
    }
}

/// Contract for the native capture/playback module
///
/// All operations are asynchronous because the native side hops to its own
/// audio thread. Playback is a FIFO queue: `enqueue_audio` appends,
/// `stop_playback` flushes whatever has not played yet.
#[async_trait]
pub trait AudioIo: Send + Sync {
    /// Request microphone permission from the OS; `false` means denied
    async fn request_permission(&self) -> Result<bool>;

    /// Start microphone capture
    async fn start_capture(&self) -> Result<()>;

    /// Stop microphone capture
    async fn stop_capture(&self) -> Result<()>;

    /// Append one chunk to the playback queue
    async fn enqueue_audio(&self, frame: AudioFrame) -> Result<()>;

    /// Stop playback immediately, flushing any queued audio
    async fn stop_playback(&self) -> Result<()>;

    /// Mute or unmute the microphone at the native layer
    async fn set_muted(&self, muted: bool) -> Result<()>;

    /// Subscribe to captured input frames
    ///
    /// The caller owns the returned subscription and must call
    /// [`InputSubscription::remove`] when done with it.
    fn subscribe_input(&self) -> InputSubscription;
}

/// Handle to a push-based input-frame subscription
///
/// Removal happens at most once, whether through [`remove`](Self::remove)
/// or on drop.
pub struct InputSubscription {
    frames: mpsc::UnboundedReceiver<AudioFrame>,
    on_remove: Option<Box<dyn FnOnce() + Send>>,
}

impl InputSubscription {
    /// Create a subscription from a frame receiver and a removal callback
    #[must_use]
    pub fn new(
        frames: mpsc::UnboundedReceiver<AudioFrame>,
        on_remove: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            frames,
            on_remove: Some(Box::new(on_remove)),
        }
    }

    /// Receive the next captured frame; `None` once the source is gone
    pub async fn recv(&mut self) -> Option<AudioFrame> {
        self.frames.recv().await
    }

    /// Detach the native listener
    pub fn remove(&mut self) {
        if let Some(on_remove) = self.on_remove.take() {
            on_remove();
        }
    }
}

impl Drop for InputSubscription {
    fn drop(&mut self) {
        self.remove();
    }
}
