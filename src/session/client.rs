//! Speech-to-speech session client
//!
//! Manages exactly one persistent, authenticated duplex WebSocket to the
//! remote service. The connection is owned by two tasks: a writer draining
//! outbound messages and a reader translating wire messages into
//! [`SessionEvent`]s in arrival order. A transport drop surfaces as a single
//! `Disconnected`; no automatic reconnection is attempted, since silently
//! resuming a session the user may believe has ended is worse than asking
//! them to start a new call.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use secrecy::ExposeSecret;
use serde::Deserialize;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use url::Url;

use crate::audio::AudioFrame;
use crate::config::VoiceConfig;
use crate::session::protocol::{ClientMessage, ServerMessage, SessionEvent};
use crate::{Error, Result};

/// Inbound event channel depth
const EVENT_BUFFER: usize = 64;

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, WsMessage>;
type WsStream = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// Handle to a live speech session
#[async_trait]
pub trait SpeechSession: Send + Sync {
    /// Forward one captured frame, fire-and-forget
    ///
    /// If the connection is not currently open the frame is dropped, not
    /// queued: stale microphone audio has no value once the connection has
    /// lapsed.
    fn send_audio(&self, frame: AudioFrame);

    /// Close the session; idempotent, safe from any internal state
    async fn disconnect(&self);
}

/// Seam for opening speech sessions
///
/// The production implementation is [`SpeechSessionClient`]; tests provide
/// scripted connectors.
#[async_trait]
pub trait SessionConnector: Send + Sync {
    /// Open one session
    ///
    /// Resolves only after the remote side confirms session start. The
    /// returned receiver yields `SessionEvent::Connected` first, then
    /// events in arrival order.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connection`] on handshake failure or timeout.
    async fn connect(&self) -> Result<(Box<dyn SpeechSession>, mpsc::Receiver<SessionEvent>)>;
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// Production connector over an authenticated WebSocket
pub struct SpeechSessionClient {
    config: Arc<VoiceConfig>,
    http: reqwest::Client,
}

impl SpeechSessionClient {
    /// Create a client for the given configuration
    #[must_use]
    pub fn new(config: Arc<VoiceConfig>) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
        }
    }

    /// Fetch an OAuth access token when a secret key is configured
    async fn access_token(&self) -> Result<Option<String>> {
        let Some(secret) = &self.config.secret_key else {
            return Ok(None);
        };

        let response = self
            .http
            .post(&self.config.token_url)
            .basic_auth(
                self.config.api_key.expose_secret(),
                Some(secret.expose_secret()),
            )
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await
            .map_err(|e| Error::Connection(format!("token request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Connection(format!("token request failed: {status}")));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| Error::Connection(format!("token response invalid: {e}")))?;
        Ok(Some(token.access_token))
    }

    /// Build the session URL with credentials and configuration
    fn session_url(&self, token: Option<&str>) -> Result<Url> {
        let mut url =
            Url::parse(&self.config.endpoint).map_err(|e| Error::Config(e.to_string()))?;
        {
            let mut query = url.query_pairs_mut();
            match token {
                Some(token) => {
                    query.append_pair("access_token", token);
                }
                None => {
                    query.append_pair("api_key", self.config.api_key.expose_secret());
                }
            }
            if let Some(config_id) = &self.config.config_id {
                query.append_pair("config_id", config_id);
            }
        }
        Ok(url)
    }

    /// Dial, send session settings, and wait for the remote confirmation
    async fn open_session(
        &self,
    ) -> Result<(Box<dyn SpeechSession>, mpsc::Receiver<SessionEvent>)> {
        let token = self.access_token().await?;
        let url = self.session_url(token.as_deref())?;

        let (ws, _response) = connect_async(url.as_str())
            .await
            .map_err(|e| Error::Connection(e.to_string()))?;
        let (mut sink, mut stream) = ws.split();

        // One session-init message before any audio
        let settings = serde_json::to_string(&ClientMessage::SessionSettings {
            custom_session_id: self.config.config_id.clone(),
        })?;
        sink.send(WsMessage::Text(settings))
            .await
            .map_err(|e| Error::Connection(e.to_string()))?;

        let session_id = wait_for_session_start(&mut stream).await?;
        tracing::info!(session_id = %session_id, "speech session started");

        let (event_tx, event_rx) = mpsc::channel(EVENT_BUFFER);
        // The confirmation is the first event the controller sees
        let _ = event_tx.try_send(SessionEvent::Connected { session_id });

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let open = Arc::new(AtomicBool::new(true));

        tokio::spawn(write_loop(sink, outbound_rx, Arc::clone(&open)));
        tokio::spawn(read_loop(
            stream,
            event_tx,
            Arc::clone(&open),
            self.config.top_emotions,
        ));

        let session = WsSession {
            outbound: outbound_tx,
            open,
        };
        Ok((Box::new(session), event_rx))
    }
}

#[async_trait]
impl SessionConnector for SpeechSessionClient {
    async fn connect(&self) -> Result<(Box<dyn SpeechSession>, mpsc::Receiver<SessionEvent>)> {
        tokio::time::timeout(self.config.connect_timeout(), self.open_session())
            .await
            .map_err(|_| Error::Connection("handshake timed out".to_string()))?
    }
}

/// Consume handshake-phase messages until the session-start confirmation
async fn wait_for_session_start(stream: &mut WsStream) -> Result<String> {
    loop {
        match stream.next().await {
            Some(Ok(WsMessage::Text(text))) => match serde_json::from_str::<ServerMessage>(&text)
            {
                Ok(ServerMessage::ChatMetadata { chat_id }) => return Ok(chat_id),
                Ok(ServerMessage::Error { message }) => return Err(Error::Connection(message)),
                // Pre-handshake noise is skipped
                Ok(_) | Err(_) => {}
            },
            Some(Ok(WsMessage::Close(_))) | None => {
                return Err(Error::Connection("closed during handshake".to_string()));
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => return Err(Error::Connection(e.to_string())),
        }
    }
}

/// Outbound writer instruction
enum Outbound {
    Message(ClientMessage),
    Close,
}

/// Drain outbound messages onto the socket; closes the sink on shutdown
async fn write_loop(
    mut sink: WsSink,
    mut outbound_rx: mpsc::UnboundedReceiver<Outbound>,
    open: Arc<AtomicBool>,
) {
    loop {
        match outbound_rx.recv().await {
            Some(Outbound::Message(message)) => {
                let Ok(payload) = serde_json::to_string(&message) else {
                    continue;
                };
                if let Err(e) = sink.send(WsMessage::Text(payload)).await {
                    tracing::debug!(error = %e, "outbound send failed, closing writer");
                    open.store(false, Ordering::SeqCst);
                    break;
                }
            }
            // Explicit disconnect or every sender dropped
            Some(Outbound::Close) | None => {
                open.store(false, Ordering::SeqCst);
                let _ = sink.send(WsMessage::Close(None)).await;
                break;
            }
        }
    }
}

/// Translate inbound wire messages into events, in arrival order
async fn read_loop(
    mut stream: WsStream,
    event_tx: mpsc::Sender<SessionEvent>,
    open: Arc<AtomicBool>,
    top_emotions: usize,
) {
    loop {
        match stream.next().await {
            Some(Ok(WsMessage::Text(text))) => {
                let event = match serde_json::from_str::<ServerMessage>(&text) {
                    Ok(message) => message.into_event(top_emotions),
                    Err(e) => {
                        tracing::debug!(error = %e, "skipping unparseable message");
                        None
                    }
                };
                let Some(event) = event else { continue };
                // The handshake already delivered the confirmation
                if matches!(event, SessionEvent::Connected { .. }) {
                    continue;
                }
                if event_tx.send(event).await.is_err() {
                    // Controller detached; stop translating
                    break;
                }
            }
            Some(Ok(WsMessage::Close(_))) | None => {
                open.store(false, Ordering::SeqCst);
                let _ = event_tx.send(SessionEvent::Disconnected).await;
                break;
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                tracing::debug!(error = %e, "transport error, closing reader");
                open.store(false, Ordering::SeqCst);
                let _ = event_tx.send(SessionEvent::Disconnected).await;
                break;
            }
        }
    }
}

/// Live WebSocket session handle
struct WsSession {
    outbound: mpsc::UnboundedSender<Outbound>,
    open: Arc<AtomicBool>,
}

#[async_trait]
impl SpeechSession for WsSession {
    fn send_audio(&self, frame: AudioFrame) {
        if !self.open.load(Ordering::SeqCst) {
            tracing::trace!("dropping frame, connection not open");
            return;
        }
        let _ = self
            .outbound
            .send(Outbound::Message(ClientMessage::audio_input(&frame)));
    }

    async fn disconnect(&self) {
        if self.open.swap(false, Ordering::SeqCst) {
            let _ = self.outbound.send(Outbound::Close);
        }
    }
}
