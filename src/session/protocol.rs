//! Wire protocol for the speech-to-speech session
//!
//! The remote service is an opaque peer: it performs recognition, emotion
//! inference, response generation, and synthesis inside one streaming
//! session. This module defines the tagged wire messages in both directions
//! and the closed [`SessionEvent`] set the controller consumes.

use std::collections::HashMap;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};

use crate::audio::AudioFrame;

/// One named emotion confidence attached to a user transcript
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmotionScore {
    /// Emotion name as reported by the service (e.g. `"Sadness"`)
    pub name: String,
    /// Confidence in `[0.0, 1.0]`
    pub score: f32,
}

/// Outbound message to the service
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// One-time session configuration, sent right after the socket opens
    SessionSettings {
        #[serde(skip_serializing_if = "Option::is_none")]
        custom_session_id: Option<String>,
    },
    /// One captured microphone frame, base64-encoded
    AudioInput { data: String },
}

impl ClientMessage {
    /// Wrap a captured frame for the wire
    #[must_use]
    pub fn audio_input(frame: &AudioFrame) -> Self {
        Self::AudioInput {
            data: BASE64.encode(frame.as_bytes()),
        }
    }
}

/// Transcript payload shared by user and assistant messages
#[derive(Debug, Default, Deserialize)]
pub struct ChatText {
    #[serde(default)]
    pub content: String,
}

/// Per-model inference output attached to a user message
#[derive(Debug, Default, Deserialize)]
pub struct Models {
    #[serde(default)]
    pub prosody: Option<Prosody>,
}

/// Prosody (tone-of-voice) emotion scores
#[derive(Debug, Default, Deserialize)]
pub struct Prosody {
    #[serde(default)]
    pub scores: HashMap<String, f32>,
}

/// Inbound message from the service
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Session confirmed by the remote side
    ChatMetadata { chat_id: String },
    /// Finalized user utterance plus inference output
    UserMessage {
        #[serde(default)]
        message: ChatText,
        #[serde(default)]
        models: Models,
    },
    /// Finalized assistant reply text
    AssistantMessage {
        #[serde(default)]
        message: ChatText,
    },
    /// One chunk of synthesized assistant speech, base64-encoded
    AudioOutput { data: String },
    /// User began speaking while assistant audio was playing
    UserInterruption,
    /// Assistant finished speaking for the current turn
    AssistantEnd,
    /// Service-reported error
    Error {
        #[serde(default)]
        message: String,
    },
    /// Anything this client does not understand is tolerated and skipped
    #[serde(other)]
    Unknown,
}

/// Typed inbound event, dispatched to the controller in arrival order
///
/// One closed set instead of loose callbacks: ordering and interleaving
/// become a single testable property.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Remote side confirmed session start
    Connected { session_id: String },
    /// Finalized user utterance plus its top emotion scores
    UserMessage {
        text: String,
        emotions: Vec<EmotionScore>,
    },
    /// Finalized assistant reply text
    AssistantMessage { text: String },
    /// One chunk of synthesized assistant speech
    AudioOutput { frame: AudioFrame },
    /// Barge-in: stop playback before the next turn's audio
    UserInterruption,
    /// Assistant turn complete
    AssistantEnd,
    /// Non-fatal service error
    Error { message: String },
    /// Transport closed; fires at most once per connection
    Disconnected,
}

impl ServerMessage {
    /// Translate a wire message into a [`SessionEvent`]
    ///
    /// Returns `None` for unknown kinds and undecodable audio payloads,
    /// which are skipped rather than surfaced to the controller.
    #[must_use]
    pub fn into_event(self, top_n: usize) -> Option<SessionEvent> {
        match self {
            Self::ChatMetadata { chat_id } => Some(SessionEvent::Connected {
                session_id: chat_id,
            }),
            Self::UserMessage { message, models } => {
                let scores = models.prosody.map(|p| p.scores).unwrap_or_default();
                Some(SessionEvent::UserMessage {
                    text: message.content,
                    emotions: top_emotions(&scores, top_n),
                })
            }
            Self::AssistantMessage { message } => Some(SessionEvent::AssistantMessage {
                text: message.content,
            }),
            Self::AudioOutput { data } => match BASE64.decode(data.as_bytes()) {
                Ok(bytes) => Some(SessionEvent::AudioOutput {
                    frame: AudioFrame::from(bytes),
                }),
                Err(e) => {
                    tracing::warn!(error = %e, "dropping undecodable audio chunk");
                    None
                }
            },
            Self::UserInterruption => Some(SessionEvent::UserInterruption),
            Self::AssistantEnd => Some(SessionEvent::AssistantEnd),
            Self::Error { message } => Some(SessionEvent::Error { message }),
            Self::Unknown => {
                tracing::debug!("ignoring unknown message kind");
                None
            }
        }
    }
}

/// Extract the top `n` emotion scores, highest confidence first
///
/// Scores are rounded to two decimals for display; ties break on name so
/// the result is deterministic.
#[must_use]
pub fn top_emotions(scores: &HashMap<String, f32>, n: usize) -> Vec<EmotionScore> {
    let mut ranked: Vec<EmotionScore> = scores
        .iter()
        .map(|(name, score)| EmotionScore {
            name: name.clone(),
            score: (score * 100.0).round() / 100.0,
        })
        .collect();
    ranked.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.name.cmp(&b.name))
    });
    ranked.truncate(n);
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_chat_metadata() {
        let msg: ServerMessage =
            serde_json::from_str(r#"{"type":"chat_metadata","chat_id":"abc"}"#).unwrap();
        assert_eq!(
            msg.into_event(3),
            Some(SessionEvent::Connected {
                session_id: "abc".to_string()
            })
        );
    }

    #[test]
    fn parses_user_message_with_prosody() {
        let raw = r#"{
            "type": "user_message",
            "message": {"role": "user", "content": "hello"},
            "models": {"prosody": {"scores": {"Joy": 0.91, "Calmness": 0.4}}}
        }"#;
        let msg: ServerMessage = serde_json::from_str(raw).unwrap();
        let Some(SessionEvent::UserMessage { text, emotions }) = msg.into_event(3) else {
            panic!("expected user message event");
        };
        assert_eq!(text, "hello");
        assert_eq!(emotions[0].name, "Joy");
        assert!((emotions[0].score - 0.91).abs() < f32::EPSILON);
    }

    #[test]
    fn parses_user_message_without_models() {
        let raw = r#"{"type":"user_message","message":{"content":"hi"}}"#;
        let msg: ServerMessage = serde_json::from_str(raw).unwrap();
        assert_eq!(
            msg.into_event(3),
            Some(SessionEvent::UserMessage {
                text: "hi".to_string(),
                emotions: vec![],
            })
        );
    }

    #[test]
    fn decodes_audio_output() {
        let data = BASE64.encode([1u8, 2, 3]);
        let raw = format!(r#"{{"type":"audio_output","data":"{data}"}}"#);
        let msg: ServerMessage = serde_json::from_str(&raw).unwrap();
        assert_eq!(
            msg.into_event(3),
            Some(SessionEvent::AudioOutput {
                frame: AudioFrame::from(vec![1, 2, 3]),
            })
        );
    }

    #[test]
    fn undecodable_audio_is_skipped() {
        let msg: ServerMessage =
            serde_json::from_str(r#"{"type":"audio_output","data":"!!not-base64!!"}"#).unwrap();
        assert_eq!(msg.into_event(3), None);
    }

    #[test]
    fn unknown_kind_is_tolerated() {
        let msg: ServerMessage =
            serde_json::from_str(r#"{"type":"tool_call","name":"x"}"#).unwrap();
        assert_eq!(msg.into_event(3), None);
    }

    #[test]
    fn lifecycle_kinds_map_through() {
        let interruption: ServerMessage =
            serde_json::from_str(r#"{"type":"user_interruption"}"#).unwrap();
        assert_eq!(interruption.into_event(3), Some(SessionEvent::UserInterruption));

        let end: ServerMessage = serde_json::from_str(r#"{"type":"assistant_end"}"#).unwrap();
        assert_eq!(end.into_event(3), Some(SessionEvent::AssistantEnd));

        let err: ServerMessage =
            serde_json::from_str(r#"{"type":"error","message":"boom"}"#).unwrap();
        assert_eq!(
            err.into_event(3),
            Some(SessionEvent::Error {
                message: "boom".to_string()
            })
        );
    }

    #[test]
    fn top_emotions_sorts_rounds_and_truncates() {
        let scores: HashMap<String, f32> = [
            ("Calmness".to_string(), 0.123),
            ("Joy".to_string(), 0.667),
            ("Sadness".to_string(), 0.4),
            ("Fear".to_string(), 0.05),
        ]
        .into_iter()
        .collect();

        let top = top_emotions(&scores, 3);
        assert_eq!(top.len(), 3);
        assert_eq!(top[0].name, "Joy");
        assert!((top[0].score - 0.67).abs() < f32::EPSILON);
        assert_eq!(top[1].name, "Sadness");
        assert_eq!(top[2].name, "Calmness");
        assert!((top[2].score - 0.12).abs() < f32::EPSILON);
    }

    #[test]
    fn session_settings_skips_absent_fields() {
        let msg = ClientMessage::SessionSettings {
            custom_session_id: None,
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert_eq!(json, r#"{"type":"session_settings"}"#);
    }

    #[test]
    fn audio_input_is_base64() {
        let msg = ClientMessage::audio_input(&AudioFrame::from(vec![7, 8, 9]));
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains(r#""type":"audio_input""#));
        assert!(json.contains(&BASE64.encode([7u8, 8, 9])));
    }
}
