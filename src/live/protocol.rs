//! Wire types for the live session protocol
//!
//! The vendor service speaks a bidirectional JSON protocol over a single
//! WebSocket. Every frame is a one-field object naming the message kind.
//!
//! # Protocol Overview
//!
//! 1. Connect to the live endpoint with the API key as a query parameter
//! 2. Send `setup` declaring the model, response modality, and tool schemas
//! 3. Receive `setupComplete`
//! 4. Stream microphone audio via `realtimeInput.mediaChunks`
//! 5. Receive `serverContent` carrying transcription text and/or synthesized
//!    audio parts, plus `interrupted` / `turnComplete` flags
//! 6. Receive `toolCall` batches; answer with `toolResponse`

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::audio::codec::encode_pcm16_base64;

/// Live session WebSocket endpoint (API key appended as `?key=`).
pub const LIVE_API_URL: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

/// Default model when settings don't override it.
pub const DEFAULT_MODEL: &str = "models/gemini-2.0-flash-exp";

/// Wire input rate: microphone audio must be PCM16 mono at 16 kHz.
pub const INPUT_SAMPLE_RATE: u32 = 16_000;

/// Wire output rate: synthesized audio arrives as PCM16 mono at 24 kHz.
pub const OUTPUT_SAMPLE_RATE: u32 = 24_000;

// ============================================================================
// Client Messages (sent TO the service)
// ============================================================================

/// Messages sent from the client. Externally tagged, so each serializes as
/// the one-field object the protocol expects (`{"setup": {...}}`).
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ClientMessage {
    Setup(Setup),
    RealtimeInput(RealtimeInput),
    ToolResponse(ToolResponse),
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Setup {
    pub model: String,
    pub generation_config: GenerationConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<Content>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDeclarations>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub response_modalities: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDeclarations {
    pub function_declarations: Vec<FunctionDeclaration>,
}

/// Schema for one remotely-invocable action.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionDeclaration {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInput {
    pub media_chunks: Vec<InlineData>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResponse {
    pub function_responses: Vec<FunctionResponse>,
}

/// Result for one call in a tool batch, tagged with its original id.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionResponse {
    pub id: String,
    pub name: String,
    pub response: Value,
}

impl ClientMessage {
    /// Build the session `setup` message.
    pub fn setup(
        model: &str,
        system_instruction: Option<&str>,
        tools: Vec<FunctionDeclaration>,
    ) -> Self {
        ClientMessage::Setup(Setup {
            model: model.to_string(),
            generation_config: GenerationConfig {
                response_modalities: vec!["AUDIO".to_string()],
            },
            system_instruction: system_instruction.map(|text| Content {
                parts: vec![Part {
                    text: Some(text.to_string()),
                    inline_data: None,
                }],
            }),
            tools: if tools.is_empty() {
                Vec::new()
            } else {
                vec![ToolDeclarations {
                    function_declarations: tools,
                }]
            },
        })
    }

    /// Wrap one frame of PCM16 microphone samples as realtime media input.
    pub fn realtime_audio(samples: &[i16]) -> Self {
        ClientMessage::RealtimeInput(RealtimeInput {
            media_chunks: vec![InlineData {
                mime_type: format!("audio/pcm;rate={}", INPUT_SAMPLE_RATE),
                data: encode_pcm16_base64(samples),
            }],
        })
    }

    /// Batch tool results back to the service.
    pub fn tool_response(responses: Vec<FunctionResponse>) -> Self {
        ClientMessage::ToolResponse(ToolResponse {
            function_responses: responses,
        })
    }
}

// ============================================================================
// Shared content shapes
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Content {
    #[serde(default)]
    pub parts: Vec<Part>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<InlineData>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InlineData {
    pub mime_type: String,
    pub data: String,
}

// ============================================================================
// Server Messages (received FROM the service)
// ============================================================================

/// One inbound frame. The fields are independent and non-exclusive: a single
/// frame may carry transcription text, audio, and flags at once, so this is
/// a struct of optionals rather than an enum.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessage {
    #[serde(default)]
    pub setup_complete: Option<Value>,
    #[serde(default)]
    pub server_content: Option<ServerContent>,
    #[serde(default)]
    pub tool_call: Option<ToolCallBatch>,
    #[serde(default)]
    pub go_away: Option<GoAway>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerContent {
    #[serde(default)]
    pub model_turn: Option<Content>,
    #[serde(default)]
    pub input_transcription: Option<Transcription>,
    #[serde(default)]
    pub output_transcription: Option<Transcription>,
    #[serde(default)]
    pub interrupted: bool,
    #[serde(default)]
    pub turn_complete: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Transcription {
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallBatch {
    #[serde(default)]
    pub function_calls: Vec<FunctionCall>,
}

/// A remote request to run one named local action.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionCall {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub args: Value,
}

/// Advance notice that the server is about to close the connection.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoAway {
    #[serde(default)]
    pub time_left: Option<String>,
}

impl ServerMessage {
    pub fn is_setup_complete(&self) -> bool {
        self.setup_complete.is_some()
    }
}

impl ServerContent {
    /// Base64 PCM payloads of every audio part in this frame, in order.
    pub fn audio_payloads(&self) -> Vec<&str> {
        self.model_turn
            .iter()
            .flat_map(|turn| turn.parts.iter())
            .filter_map(|part| part.inline_data.as_ref())
            .filter(|data| data.mime_type.starts_with("audio/pcm"))
            .map(|data| data.data.as_str())
            .collect()
    }

    /// Most recent transcription text in this frame, if any. Output
    /// transcription wins over input when both are present.
    pub fn transcript(&self) -> Option<&str> {
        self.output_transcription
            .as_ref()
            .or(self.input_transcription.as_ref())
            .map(|t| t.text.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setup_serialization() {
        let msg = ClientMessage::setup("models/test-live", Some("Be brief."), Vec::new());
        let json = serde_json::to_string(&msg).unwrap();

        assert!(json.contains("\"setup\":"));
        assert!(json.contains("\"model\":\"models/test-live\""));
        assert!(json.contains("\"responseModalities\":[\"AUDIO\"]"));
        assert!(json.contains("\"systemInstruction\""));
        // No tools declared: the key is omitted entirely
        assert!(!json.contains("\"tools\""));
    }

    #[test]
    fn test_setup_with_tool_declarations() {
        let decl = FunctionDeclaration {
            name: "navigate".to_string(),
            description: "Open a URL".to_string(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": { "url": { "type": "string" } },
                "required": ["url"]
            }),
        };
        let msg = ClientMessage::setup("models/test-live", None, vec![decl]);
        let json = serde_json::to_string(&msg).unwrap();

        assert!(json.contains("\"functionDeclarations\""));
        assert!(json.contains("\"navigate\""));
    }

    #[test]
    fn test_realtime_audio_serialization() {
        let msg = ClientMessage::realtime_audio(&[100i16, 200, 300]);
        let json = serde_json::to_string(&msg).unwrap();

        assert!(json.contains("\"realtimeInput\":"));
        assert!(json.contains("\"mediaChunks\":"));
        assert!(json.contains("\"mimeType\":\"audio/pcm;rate=16000\""));
    }

    #[test]
    fn test_tool_response_serialization() {
        let msg = ClientMessage::tool_response(vec![FunctionResponse {
            id: "call-1".to_string(),
            name: "search".to_string(),
            response: serde_json::json!({"status": "ok"}),
        }]);
        let json = serde_json::to_string(&msg).unwrap();

        assert!(json.contains("\"toolResponse\":"));
        assert!(json.contains("\"functionResponses\":"));
        assert!(json.contains("\"id\":\"call-1\""));
    }

    #[test]
    fn test_setup_complete_deserialization() {
        let msg: ServerMessage = serde_json::from_str(r#"{"setupComplete": {}}"#).unwrap();
        assert!(msg.is_setup_complete());
        assert!(msg.server_content.is_none());
    }

    #[test]
    fn test_server_content_with_audio_and_flags() {
        let json = r#"{
            "serverContent": {
                "modelTurn": {
                    "parts": [
                        {"inlineData": {"mimeType": "audio/pcm;rate=24000", "data": "AAAA"}},
                        {"text": "hello"}
                    ]
                },
                "outputTranscription": {"text": "hello there"},
                "turnComplete": true
            }
        }"#;

        let msg: ServerMessage = serde_json::from_str(json).unwrap();
        let content = msg.server_content.unwrap();

        assert_eq!(content.audio_payloads(), vec!["AAAA"]);
        assert_eq!(content.transcript(), Some("hello there"));
        assert!(content.turn_complete);
        assert!(!content.interrupted);
    }

    #[test]
    fn test_interrupted_flag() {
        let json = r#"{"serverContent": {"interrupted": true}}"#;
        let msg: ServerMessage = serde_json::from_str(json).unwrap();
        assert!(msg.server_content.unwrap().interrupted);
    }

    #[test]
    fn test_tool_call_batch_deserialization() {
        let json = r#"{
            "toolCall": {
                "functionCalls": [
                    {"id": "c1", "name": "navigate", "args": {"url": "example.com"}},
                    {"id": "c2", "name": "search", "args": {"query": "weather"}}
                ]
            }
        }"#;

        let msg: ServerMessage = serde_json::from_str(json).unwrap();
        let batch = msg.tool_call.unwrap();

        assert_eq!(batch.function_calls.len(), 2);
        assert_eq!(batch.function_calls[0].name, "navigate");
        assert_eq!(batch.function_calls[0].id, "c1");
        assert_eq!(batch.function_calls[1].args["query"], "weather");
    }

    #[test]
    fn test_unknown_fields_are_ignored() {
        let json = r#"{"usageMetadata": {"tokens": 12}}"#;
        let msg: ServerMessage = serde_json::from_str(json).unwrap();

        assert!(!msg.is_setup_complete());
        assert!(msg.server_content.is_none());
        assert!(msg.tool_call.is_none());
    }
}
