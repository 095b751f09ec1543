//! Conversation state for the voice assistant
//!
//! Single-writer pattern: all state transitions go through `reduce()`, which
//! takes the current state and an event and returns the replacement state
//! plus a list of effects for the pipeline to execute. State is never
//! mutated in place, which makes the whole-state-replace contract explicit
//! and testable.

use std::collections::VecDeque;

use serde::Serialize;
use uuid::Uuid;

/// Maximum entries kept in the activity log ring.
pub const LOG_CAPACITY: usize = 10;

/// Default interface theme color.
pub const DEFAULT_THEME_COLOR: &str = "#0ea5e9";

/// Coarse connection status, driven only by session lifecycle events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Idle,
    Connecting,
    Connected,
    Error,
}

/// A deferred, user-confirmable navigation that could not complete
/// automatically.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PendingAction {
    pub url: String,
    pub label: String,
}

/// The authoritative conversation state. Lifetime = one app session; reset
/// to defaults on teardown. Nothing here survives process restart.
#[derive(Debug, Clone, Serialize)]
pub struct ConversationState {
    pub status: ConnectionStatus,
    pub listening: bool,
    pub speaking: bool,
    /// Latest recognized speech text (input or output transcription)
    pub transcript: String,
    pub theme_color: String,
    /// Name of the most recently dispatched tool, cleared after a short delay
    pub active_tool: Option<String>,
    /// Token guarding the active-tool clear timer against stale timeouts
    #[serde(skip)]
    pub active_tool_token: Option<Uuid>,
    pub pending_action: Option<PendingAction>,
    /// The most recent human-readable events, newest first
    pub log: VecDeque<String>,
}

impl Default for ConversationState {
    fn default() -> Self {
        Self {
            status: ConnectionStatus::Idle,
            listening: false,
            speaking: false,
            transcript: String::new(),
            theme_color: DEFAULT_THEME_COLOR.to_string(),
            active_tool: None,
            active_tool_token: None,
            pending_action: None,
            log: VecDeque::new(),
        }
    }
}

impl ConversationState {
    fn with_log(mut self, entry: impl Into<String>) -> Self {
        self.log.push_front(entry.into());
        self.log.truncate(LOG_CAPACITY);
        self
    }
}

/// Events that drive state transitions. Sent from the pipeline: session
/// lifecycle, inbound server messages, tool dispatch outcomes, and timers.
#[derive(Debug, Clone)]
pub enum Event {
    /// User requested activation
    Activate,
    /// The live session confirmed setup and capture is about to begin
    SessionOpen,
    /// Recognized speech text replaces the transcript
    TranscriptUpdate { text: String },
    /// Response audio was scheduled for playback
    SpeakingStarted,
    /// All scheduled playback finished naturally
    PlaybackIdle,
    /// The user started speaking over a response
    Interrupted,
    /// A tool was dispatched; token guards the auto-clear timer
    ToolInvoked { name: String, token: Uuid },
    /// The active-tool display timed out
    ToolClearTimeout { token: Uuid },
    /// The update_interface tool changed the theme
    ThemeColorChanged {
        color: String,
        status_text: Option<String>,
    },
    /// A navigate call could not open automatically
    NavigationPending { action: PendingAction },
    /// A navigate call opened the target
    NavigationOpened { url: String },
    /// Transport or session failure; no retry
    TransportError { message: String },
    /// The server closed the session
    SessionClosed { reason: String },
    /// User requested deactivation
    Deactivate,
    /// All resources have been released
    TeardownComplete,
}

/// Effects to be executed by the pipeline after a transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Open the live session
    Connect,
    /// Start microphone capture and upstream forwarding
    BeginCapture,
    /// Hard-stop all scheduled playback
    StopPlayback,
    /// Clear the active tool name after the fixed display delay
    ScheduleToolClear { token: Uuid },
    /// Release capture, playback, and the session
    Teardown,
}

/// Reducer: (state, event) -> (next_state, effects)
///
/// Key rules:
/// - Never mutate state in place
/// - Ignore stale tool-clear tokens
/// - Status transitions only on session lifecycle events
pub fn reduce(state: &ConversationState, event: Event) -> (ConversationState, Vec<Effect>) {
    use ConnectionStatus::*;
    use Effect::*;
    use Event::*;

    match event {
        Activate => match state.status {
            Idle | Error => {
                let next = ConversationState {
                    status: Connecting,
                    ..ConversationState::default()
                }
                .with_log("Connecting to live session");
                (next, vec![Connect])
            }
            // Already connecting or connected
            _ => (state.clone(), vec![]),
        },

        SessionOpen => {
            let next = ConversationState {
                status: Connected,
                listening: true,
                ..state.clone()
            }
            .with_log("Session established, listening");
            (next, vec![BeginCapture])
        }

        TranscriptUpdate { text } => {
            let next = ConversationState {
                transcript: text,
                ..state.clone()
            };
            (next, vec![])
        }

        SpeakingStarted => {
            let next = ConversationState {
                speaking: true,
                ..state.clone()
            };
            (next, vec![])
        }

        PlaybackIdle => {
            let next = ConversationState {
                speaking: false,
                ..state.clone()
            };
            (next, vec![])
        }

        Interrupted => {
            let next = ConversationState {
                speaking: false,
                ..state.clone()
            }
            .with_log("Playback interrupted");
            (next, vec![StopPlayback])
        }

        ToolInvoked { name, token } => {
            let next = ConversationState {
                active_tool: Some(name.clone()),
                active_tool_token: Some(token),
                ..state.clone()
            }
            .with_log(format!("Tool invoked: {}", name));
            (next, vec![ScheduleToolClear { token }])
        }

        ToolClearTimeout { token } => {
            // Stale timeout from an earlier invocation: ignore
            if state.active_tool_token != Some(token) {
                return (state.clone(), vec![]);
            }
            let next = ConversationState {
                active_tool: None,
                active_tool_token: None,
                ..state.clone()
            };
            (next, vec![])
        }

        ThemeColorChanged { color, status_text } => {
            let next = ConversationState {
                theme_color: color,
                ..state.clone()
            };
            let next = match status_text {
                Some(text) => next.with_log(text),
                None => next,
            };
            (next, vec![])
        }

        NavigationPending { action } => {
            let label = action.label.clone();
            let next = ConversationState {
                pending_action: Some(action),
                ..state.clone()
            }
            .with_log(format!("Pending action: {}", label));
            (next, vec![])
        }

        NavigationOpened { url } => {
            let next = state.clone().with_log(format!("Opened {}", url));
            (next, vec![])
        }

        TransportError { message } => {
            let next = ConversationState {
                status: Error,
                listening: false,
                speaking: false,
                ..state.clone()
            }
            .with_log(format!("Error: {}", message));
            (next, vec![Teardown])
        }

        SessionClosed { reason } => {
            let next = state
                .clone()
                .with_log(format!("Session closed: {}", reason));
            (next, vec![Teardown])
        }

        Deactivate => {
            let next = state.clone().with_log("Deactivated");
            (next, vec![Teardown])
        }

        TeardownComplete => {
            // Reset to defaults; an error status sticks until the next
            // activation so the failure stays visible.
            let status = match state.status {
                Error => Error,
                _ => Idle,
            };
            let next = ConversationState {
                status,
                ..ConversationState::default()
            };
            (next, vec![])
        }
    }
}
