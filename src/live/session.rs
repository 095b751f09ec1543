//! WebSocket client for the live session
//!
//! Owns the connection lifecycle: connect, send `setup`, wait for
//! `setupComplete`, then split the socket: the write half serves
//! `send_audio` / `send_tool_response`, while a background task drains the
//! read half into a bounded channel of [`Inbound`] items.
//!
//! Connection is a single attempt with a handshake timeout. A mid-session
//! end of stream is surfaced as a terminal [`Inbound`] item so the caller
//! can tell a transport failure from a clean server close; either way the
//! caller tears down rather than reconnecting.

use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::{
    connect_async_with_config,
    tungstenite::{client::IntoClientRequest, Message},
    MaybeTlsStream, WebSocketStream,
};

use super::protocol::{ClientMessage, FunctionDeclaration, FunctionResponse, ServerMessage};
use super::protocol::LIVE_API_URL;
use super::LiveError;

/// Connection timeout for the WebSocket handshake
const CONNECTION_TIMEOUT: Duration = Duration::from_secs(10);

/// Timeout for the setupComplete confirmation
const SETUP_TIMEOUT: Duration = Duration::from_secs(5);

type WriteHalf =
    futures_util::stream::SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

/// One item from the session's read side. Parsed frames arrive as
/// `Message`; the stream ends with exactly one terminal variant.
#[derive(Debug)]
pub enum Inbound {
    Message(ServerMessage),
    /// The transport failed mid-session
    TransportError(String),
    /// The server closed the connection cleanly
    Closed(String),
}

/// Handle to an active live session.
pub struct LiveSession {
    write: WriteHalf,
    /// Incoming items, drained by the pipeline. Wrapped in Option so it
    /// can be taken for concurrent processing.
    incoming_rx: Option<mpsc::Receiver<Inbound>>,
    /// Receiver task handle, aborted on close/drop
    receiver_task: tokio::task::JoinHandle<()>,
}

impl LiveSession {
    /// Connect and configure a live session.
    ///
    /// Single attempt: establishes the WebSocket (with timeout), sends the
    /// `setup` message, and waits for `setupComplete`. Any failure is final.
    pub async fn connect(
        api_key: &str,
        model: &str,
        system_instruction: Option<&str>,
        tools: Vec<FunctionDeclaration>,
    ) -> Result<Self, LiveError> {
        if api_key.is_empty() {
            return Err(LiveError::MissingApiKey);
        }

        let url = format!("{}?key={}", LIVE_API_URL, api_key);
        let request = url
            .into_client_request()
            .map_err(|e| LiveError::ConnectionFailed(e.to_string()))?;

        log::info!("Connecting to live session (model: {})...", model);

        let (ws_stream, _response) = timeout(
            CONNECTION_TIMEOUT,
            connect_async_with_config(
                request, None, true, // disable Nagle, we want low latency
            ),
        )
        .await
        .map_err(|_| LiveError::ConnectionFailed("Connection timeout".to_string()))?
        .map_err(|e| LiveError::ConnectionFailed(e.to_string()))?;

        let (mut write, mut read) = ws_stream.split();

        // The client speaks first: declare the model and tool schemas.
        let setup = ClientMessage::setup(model, system_instruction, tools);
        let json = serde_json::to_string(&setup)
            .map_err(|e| LiveError::ProtocolError(e.to_string()))?;
        write
            .send(Message::Text(json))
            .await
            .map_err(|e| LiveError::SendFailed(e.to_string()))?;

        log::info!("Setup sent, waiting for setupComplete...");

        timeout(SETUP_TIMEOUT, async {
            while let Some(frame) = read.next().await {
                match frame {
                    Ok(Message::Text(text)) => match serde_json::from_str::<ServerMessage>(&text) {
                        Ok(msg) if msg.is_setup_complete() => return Ok(()),
                        Ok(_) => {
                            log::debug!("Ignoring frame while waiting for setupComplete");
                        }
                        Err(e) => {
                            log::warn!("Failed to parse frame: {}", e);
                        }
                    },
                    // Some deployments deliver JSON as binary frames
                    Ok(Message::Binary(bytes)) => {
                        match serde_json::from_slice::<ServerMessage>(&bytes) {
                            Ok(msg) if msg.is_setup_complete() => return Ok(()),
                            Ok(_) => {}
                            Err(e) => log::warn!("Failed to parse binary frame: {}", e),
                        }
                    }
                    Ok(Message::Close(frame)) => {
                        return Err(LiveError::SetupFailed(format!(
                            "Connection closed before setup completed: {:?}",
                            frame
                        )));
                    }
                    Err(e) => return Err(LiveError::ProtocolError(e.to_string())),
                    _ => {} // ping/pong
                }
            }
            Err(LiveError::Disconnected("Stream ended".to_string()))
        })
        .await
        .map_err(|_| LiveError::SetupFailed("setupComplete timeout".to_string()))??;

        log::info!("Live session established");

        let (incoming_tx, incoming_rx) = mpsc::channel(100);

        // Background task: parse every inbound frame onto the channel. The
        // stream ends with a terminal item so the consumer can distinguish a
        // transport failure from a clean server close.
        let receiver_task = tokio::spawn(async move {
            while let Some(frame) = read.next().await {
                let parsed = match frame {
                    Ok(Message::Text(text)) => serde_json::from_str::<ServerMessage>(&text)
                        .map_err(|e| e.to_string()),
                    Ok(Message::Binary(bytes)) => serde_json::from_slice::<ServerMessage>(&bytes)
                        .map_err(|e| e.to_string()),
                    Ok(Message::Close(frame)) => {
                        log::info!("Live session closed by server: {:?}", frame);
                        let reason = frame
                            .map(|f| f.reason.to_string())
                            .filter(|r| !r.is_empty())
                            .unwrap_or_else(|| "closed by server".to_string());
                        let _ = incoming_tx.send(Inbound::Closed(reason)).await;
                        break;
                    }
                    Err(e) => {
                        log::warn!("Live session transport error: {}", e);
                        let _ = incoming_tx
                            .send(Inbound::TransportError(e.to_string()))
                            .await;
                        break;
                    }
                    _ => continue, // ping/pong
                };

                match parsed {
                    Ok(msg) => {
                        if incoming_tx.send(Inbound::Message(msg)).await.is_err() {
                            log::debug!("Receiver channel closed");
                            break;
                        }
                    }
                    Err(e) => log::warn!("Failed to parse frame: {}", e),
                }
            }
            log::debug!("Receiver task exiting");
        });

        Ok(Self {
            write,
            incoming_rx: Some(incoming_rx),
            receiver_task,
        })
    }

    async fn send_message(&mut self, msg: &ClientMessage) -> Result<(), LiveError> {
        let json =
            serde_json::to_string(msg).map_err(|e| LiveError::ProtocolError(e.to_string()))?;

        self.write
            .send(Message::Text(json))
            .await
            .map_err(|e| LiveError::SendFailed(e.to_string()))?;

        Ok(())
    }

    /// Forward one frame of PCM16 microphone samples at the wire input rate.
    pub async fn send_audio(&mut self, samples: &[i16]) -> Result<(), LiveError> {
        let msg = ClientMessage::realtime_audio(samples);
        self.send_message(&msg).await
    }

    /// Return a batch of tool results tagged with their original call ids.
    pub async fn send_tool_response(
        &mut self,
        responses: Vec<FunctionResponse>,
    ) -> Result<(), LiveError> {
        let msg = ClientMessage::tool_response(responses);
        self.send_message(&msg).await
    }

    /// Take ownership of the incoming item receiver for concurrent
    /// processing. After this, the session is send-only.
    pub fn take_receiver(&mut self) -> Option<mpsc::Receiver<Inbound>> {
        self.incoming_rx.take()
    }

    /// Gracefully close the session.
    pub async fn close(mut self) {
        log::info!("Closing live session...");

        self.receiver_task.abort();

        if let Err(e) = self.write.close().await {
            log::warn!("Error closing WebSocket: {}", e);
        }
    }
}

impl Drop for LiveSession {
    fn drop(&mut self) {
        // Ensure the receiver task dies if the session is dropped without close()
        self.receiver_task.abort();
    }
}

/// Read the API credential from the environment.
pub fn get_api_key() -> Option<String> {
    std::env::var("GEMINI_API_KEY")
        .ok()
        .filter(|k| !k.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_api_key_does_not_panic() {
        // Value depends on the environment; just verify the lookup is safe
        let _ = get_api_key();
    }

    #[tokio::test]
    #[ignore] // Requires valid API key
    async fn test_live_connection() {
        let api_key = get_api_key().expect("GEMINI_API_KEY required");

        let session = LiveSession::connect(
            &api_key,
            super::super::protocol::DEFAULT_MODEL,
            None,
            Vec::new(),
        )
        .await;
        assert!(session.is_ok(), "Connection failed: {:?}", session.err());

        session.unwrap().close().await;
    }

    #[tokio::test]
    #[ignore] // Requires valid API key
    async fn test_send_audio() {
        let api_key = get_api_key().expect("GEMINI_API_KEY required");

        let mut session = LiveSession::connect(
            &api_key,
            super::super::protocol::DEFAULT_MODEL,
            None,
            Vec::new(),
        )
        .await
        .expect("Connection failed");

        // 100ms of silence at 16kHz
        let silence = vec![0i16; 1600];
        let result = session.send_audio(&silence).await;
        assert!(result.is_ok(), "Send failed: {:?}", result.err());

        session.close().await;
    }
}
