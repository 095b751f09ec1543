//! Remotely-invocable tool actions
//!
//! The live service can ask the client to perform a small, fixed set of
//! local actions: open a URL, restyle the interface, or run a (simulated)
//! search. Each call carries an id; results are returned over the session
//! as a single batched response tagged with those ids.
//!
//! Dispatch is pure apart from the URL opener, which is injectable so tests
//! can simulate a blocked open without spawning a browser.

use serde_json::{json, Value};

use crate::live::protocol::{FunctionCall, FunctionDeclaration, FunctionResponse};
use crate::state::{Event, PendingAction};

pub const TOOL_NAVIGATE: &str = "navigate";
pub const TOOL_UPDATE_INTERFACE: &str = "update_interface";
pub const TOOL_SEARCH: &str = "search";

type Opener = Box<dyn Fn(&str) -> Result<(), String> + Send>;

/// Fixed lookup of the three supported tools.
pub struct ToolDispatcher {
    opener: Opener,
}

impl Default for ToolDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolDispatcher {
    /// Dispatcher with the real URL opener (`xdg-open`).
    pub fn new() -> Self {
        Self::with_opener(Box::new(open_with_xdg))
    }

    /// Dispatcher with a custom opener, used by tests to simulate a
    /// blocked navigation.
    pub fn with_opener(opener: Opener) -> Self {
        Self { opener }
    }

    /// Execute a batch of tool calls in order.
    ///
    /// Returns one response per call (same order, original ids) plus the
    /// state events the calls produced.
    pub fn dispatch_batch(&self, calls: &[FunctionCall]) -> (Vec<FunctionResponse>, Vec<Event>) {
        let mut responses = Vec::with_capacity(calls.len());
        let mut events = Vec::new();

        for call in calls {
            let (response, mut call_events) = self.dispatch(call);
            responses.push(response);
            events.append(&mut call_events);
        }

        (responses, events)
    }

    /// Execute a single tool call.
    pub fn dispatch(&self, call: &FunctionCall) -> (FunctionResponse, Vec<Event>) {
        log::info!("Tool call: {} (id: {})", call.name, call.id);

        let (payload, events) = match call.name.as_str() {
            TOOL_NAVIGATE => self.navigate(&call.args),
            TOOL_UPDATE_INTERFACE => update_interface(&call.args),
            TOOL_SEARCH => search(&call.args),
            other => {
                log::warn!("Unrecognized tool call: {}", other);
                (json!({ "error": format!("unknown tool: {}", other) }), vec![])
            }
        };

        let response = FunctionResponse {
            id: call.id.clone(),
            name: call.name.clone(),
            response: payload,
        };
        (response, events)
    }

    fn navigate(&self, args: &Value) -> (Value, Vec<Event>) {
        let raw = match args.get("url").and_then(Value::as_str) {
            Some(url) if !url.is_empty() => url,
            _ => return (json!({ "error": "navigate requires a url" }), vec![]),
        };

        let url = resolve_url(raw);

        match (self.opener)(&url) {
            Ok(()) => {
                let event = Event::NavigationOpened { url: url.clone() };
                (json!({ "result": format!("Opened {}", url) }), vec![event])
            }
            Err(e) => {
                // Blocked open degrades to a user-confirmable pending action
                log::warn!("Failed to open {}: {}", url, e);
                let action = PendingAction {
                    url: url.clone(),
                    label: format!("Open {}", raw),
                };
                let event = Event::NavigationPending {
                    action: action.clone(),
                };
                (
                    json!({
                        "result": format!("Could not open {} automatically; awaiting user confirmation", url),
                        "pendingAction": { "url": action.url, "label": action.label },
                    }),
                    vec![event],
                )
            }
        }
    }
}

fn update_interface(args: &Value) -> (Value, Vec<Event>) {
    let color = match args.get("color").and_then(Value::as_str) {
        Some(color) if !color.is_empty() => color.to_string(),
        _ => return (json!({ "error": "update_interface requires a color" }), vec![]),
    };

    let status_text = args
        .get("status")
        .and_then(Value::as_str)
        .map(str::to_string);

    let event = Event::ThemeColorChanged {
        color: color.clone(),
        status_text,
    };
    (
        json!({ "result": format!("Interface color set to {}", color) }),
        vec![event],
    )
}

fn search(args: &Value) -> (Value, Vec<Event>) {
    let query = args.get("query").and_then(Value::as_str).unwrap_or("");

    // Simulated: no real effect, just a canned acknowledgement
    (
        json!({ "result": format!("Search completed for \"{}\"", query) }),
        vec![],
    )
}

/// Resolve a possibly scheme-less URL, defaulting to https.
pub fn resolve_url(raw: &str) -> String {
    if raw.contains("://") {
        raw.to_string()
    } else {
        format!("https://{}", raw)
    }
}

fn open_with_xdg(url: &str) -> Result<(), String> {
    std::process::Command::new("xdg-open")
        .arg(url)
        .spawn()
        .map(|_| ())
        .map_err(|e| e.to_string())
}

/// Tool schemas declared to the service during session setup.
pub fn declarations() -> Vec<FunctionDeclaration> {
    vec![
        FunctionDeclaration {
            name: TOOL_NAVIGATE.to_string(),
            description: "Open a URL in the user's browser".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "url": {
                        "type": "string",
                        "description": "Target URL; scheme optional, defaults to https"
                    }
                },
                "required": ["url"]
            }),
        },
        FunctionDeclaration {
            name: TOOL_UPDATE_INTERFACE.to_string(),
            description: "Change the interface theme color, optionally posting a status message".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "color": {
                        "type": "string",
                        "description": "Hex color, e.g. #ef4444"
                    },
                    "status": {
                        "type": "string",
                        "description": "Optional status text to log"
                    }
                },
                "required": ["color"]
            }),
        },
        FunctionDeclaration {
            name: TOOL_SEARCH.to_string(),
            description: "Search the web for a query".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "query": { "type": "string" }
                },
                "required": ["query"]
            }),
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(name: &str, args: Value) -> FunctionCall {
        FunctionCall {
            id: "call-1".to_string(),
            name: name.to_string(),
            args,
        }
    }

    fn always_open() -> ToolDispatcher {
        ToolDispatcher::with_opener(Box::new(|_| Ok(())))
    }

    fn always_blocked() -> ToolDispatcher {
        ToolDispatcher::with_opener(Box::new(|_| Err("blocked".to_string())))
    }

    #[test]
    fn resolve_url_defaults_to_https() {
        assert_eq!(resolve_url("example.com"), "https://example.com");
        assert_eq!(resolve_url("http://example.com"), "http://example.com");
        assert_eq!(resolve_url("https://example.com/a?b=c"), "https://example.com/a?b=c");
    }

    #[test]
    fn navigate_opens_and_reports_resolved_url() {
        let dispatcher = always_open();
        let (response, events) =
            dispatcher.dispatch(&call(TOOL_NAVIGATE, json!({ "url": "example.com" })));

        assert_eq!(response.id, "call-1");
        let result = response.response["result"].as_str().unwrap();
        assert!(result.contains("https://example.com"));
        assert!(matches!(
            events.as_slice(),
            [Event::NavigationOpened { url }] if url == "https://example.com"
        ));
    }

    #[test]
    fn blocked_navigate_yields_pending_action() {
        let dispatcher = always_blocked();
        let (response, events) =
            dispatcher.dispatch(&call(TOOL_NAVIGATE, json!({ "url": "example.com" })));

        assert_eq!(
            response.response["pendingAction"]["label"].as_str(),
            Some("Open example.com")
        );
        match events.as_slice() {
            [Event::NavigationPending { action }] => {
                assert_eq!(action.url, "https://example.com");
                assert_eq!(action.label, "Open example.com");
            }
            other => panic!("unexpected events: {:?}", other),
        }
    }

    #[test]
    fn navigate_without_url_is_an_error() {
        let dispatcher = always_open();
        let (response, events) = dispatcher.dispatch(&call(TOOL_NAVIGATE, json!({})));

        assert!(response.response.get("error").is_some());
        assert!(events.is_empty());
    }

    #[test]
    fn update_interface_emits_color_event() {
        let dispatcher = always_open();
        let (response, events) = dispatcher.dispatch(&call(
            TOOL_UPDATE_INTERFACE,
            json!({ "color": "#ef4444", "status": "Dark mode engaged" }),
        ));

        assert!(response.response["result"]
            .as_str()
            .unwrap()
            .contains("#ef4444"));
        match events.as_slice() {
            [Event::ThemeColorChanged { color, status_text }] => {
                assert_eq!(color, "#ef4444");
                assert_eq!(status_text.as_deref(), Some("Dark mode engaged"));
            }
            other => panic!("unexpected events: {:?}", other),
        }
    }

    #[test]
    fn update_interface_requires_color() {
        let dispatcher = always_open();
        let (response, events) =
            dispatcher.dispatch(&call(TOOL_UPDATE_INTERFACE, json!({ "status": "hi" })));

        assert!(response.response.get("error").is_some());
        assert!(events.is_empty());
    }

    #[test]
    fn search_returns_canned_acknowledgement() {
        let dispatcher = always_open();
        let (response, events) =
            dispatcher.dispatch(&call(TOOL_SEARCH, json!({ "query": "rust audio" })));

        assert_eq!(
            response.response["result"].as_str(),
            Some("Search completed for \"rust audio\"")
        );
        assert!(events.is_empty());
    }

    #[test]
    fn unknown_tool_reports_explicit_failure() {
        let dispatcher = always_open();
        let (response, events) = dispatcher.dispatch(&call("frobnicate", json!({})));

        assert_eq!(
            response.response["error"].as_str(),
            Some("unknown tool: frobnicate")
        );
        assert!(events.is_empty());
    }

    #[test]
    fn batch_preserves_order_and_ids() {
        let dispatcher = always_open();
        let calls = vec![
            FunctionCall {
                id: "a".to_string(),
                name: TOOL_SEARCH.to_string(),
                args: json!({ "query": "one" }),
            },
            FunctionCall {
                id: "b".to_string(),
                name: TOOL_UPDATE_INTERFACE.to_string(),
                args: json!({ "color": "#22c55e" }),
            },
        ];

        let (responses, events) = dispatcher.dispatch_batch(&calls);

        assert_eq!(responses.len(), 2);
        assert_eq!(responses[0].id, "a");
        assert_eq!(responses[1].id, "b");
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn declarations_cover_all_three_tools() {
        let decls = declarations();
        let names: Vec<&str> = decls.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec![TOOL_NAVIGATE, TOOL_UPDATE_INTERFACE, TOOL_SEARCH]);
    }
}
