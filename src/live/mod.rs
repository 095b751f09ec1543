//! Live duplex session with the vendor speech/AI service
//!
//! A single long-lived WebSocket carries microphone audio up and structured
//! events (transcription, synthesized audio, tool calls, interruption) down.
//!
//! # Connection Flow
//!
//! 1. `LiveSession::connect()`: establish the WebSocket, send `setup`,
//!    wait for `setupComplete`
//! 2. `send_audio()`: stream encoded microphone frames (no local buffering)
//! 3. `take_receiver()`: drain [`Inbound`] items (parsed messages, ending
//!    with a terminal transport-error or close item)
//! 4. `close()`: clean shutdown
//!
//! There is no reconnection or backoff: a transport failure surfaces once
//! and the session is torn down.

pub mod protocol;
mod session;

pub use protocol::{ClientMessage, FunctionCall, FunctionResponse, ServerMessage};
pub use session::{get_api_key, Inbound, LiveSession};

/// Errors that can occur on the live session.
#[derive(Debug, Clone)]
pub enum LiveError {
    /// API key not configured
    MissingApiKey,
    /// Failed to establish the WebSocket connection
    ConnectionFailed(String),
    /// The service rejected or never confirmed the setup message
    SetupFailed(String),
    /// Malformed or unexpected frame
    ProtocolError(String),
    /// Connection closed unexpectedly
    Disconnected(String),
    /// Failed to send a frame
    SendFailed(String),
}

impl std::fmt::Display for LiveError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LiveError::MissingApiKey => {
                write!(
                    f,
                    "API key not configured. Set the GEMINI_API_KEY environment variable."
                )
            }
            LiveError::ConnectionFailed(e) => {
                write!(f, "Failed to connect to the live service: {}", e)
            }
            LiveError::SetupFailed(e) => write!(f, "Session setup failed: {}", e),
            LiveError::ProtocolError(e) => write!(f, "Live protocol error: {}", e),
            LiveError::Disconnected(e) => write!(f, "Live session disconnected: {}", e),
            LiveError::SendFailed(e) => write!(f, "Failed to send frame: {}", e),
        }
    }
}

impl std::error::Error for LiveError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_live_error_display() {
        let err = LiveError::MissingApiKey;
        assert!(err.to_string().contains("GEMINI_API_KEY"));

        let err = LiveError::ConnectionFailed("timeout".to_string());
        assert!(err.to_string().contains("timeout"));

        let err = LiveError::SetupFailed("bad model".to_string());
        assert!(err.to_string().contains("bad model"));
    }
}
