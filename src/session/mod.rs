//! Streaming session with the speech-to-speech service
//!
//! [`protocol`] defines the wire messages and the typed event set,
//! [`client`] manages the duplex connection, and [`controller`] runs the
//! call lifecycle on top of both.

pub mod client;
pub mod controller;
pub mod protocol;

pub use client::{SessionConnector, SpeechSession, SpeechSessionClient};
pub use controller::{CallController, CallSnapshot, CallState, CrisisLineDialer};
pub use protocol::{EmotionScore, SessionEvent};
