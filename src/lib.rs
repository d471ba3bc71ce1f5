//! Mello Voice - real-time voice conversation pipeline
//!
//! This library powers the voice call feature of the Mello wellness app:
//! - Call lifecycle orchestration (connect, converse, barge-in, teardown)
//! - Duplex streaming session with the speech-to-speech service
//! - Crisis signal detection over transcripts and emotion scores
//! - Platform audio contract with an in-memory stub for tests
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                 Presentation layer                   │
//! │        commands in  │  CallSnapshot watch out       │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │                CallController actor                  │
//! │  lifecycle │ mute │ duration │ crisis │ teardown    │
//! └──────┬─────────────────────────────────────┬────────┘
//!        │ AudioIo                             │ SessionConnector
//! ┌──────▼────────────┐              ┌─────────▼────────┐
//! │  Platform audio   │              │ SpeechSession     │
//! │ capture/playback  │              │ client (duplex WS)│
//! └───────────────────┘              └──────────────────┘
//! ```
//!
//! The controller is the single writer of all call state. Audio frames,
//! session events, user commands, and the duration tick all funnel into
//! one actor loop, so every ordering rule lives in one place.

pub mod audio;
pub mod config;
pub mod crisis;
pub mod error;
pub mod session;

pub use audio::{AudioFrame, AudioIo, InputSubscription, StubAudioIo};
pub use config::VoiceConfig;
pub use crisis::CrisisDetector;
pub use error::{Error, Result};
pub use session::{
    CallController, CallSnapshot, CallState, CrisisLineDialer, EmotionScore, SessionConnector,
    SessionEvent, SpeechSession, SpeechSessionClient,
};

/// Initialize tracing from `RUST_LOG`, defaulting to `info`
///
/// Call once at process startup; later calls are ignored.
pub fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).try_init();
}
