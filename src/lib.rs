//! Voice-driven assistant client
//!
//! Streams microphone audio to a cloud AI service over a persistent duplex
//! WebSocket, plays back synthesized responses gaplessly, and executes the
//! small set of tool actions the service can request (navigation, interface
//! theming, simulated search).
//!
//! Module map:
//! - [`audio`]: capture, PCM codec helpers, playback scheduling and output
//! - [`live`]: the WebSocket session and its wire protocol
//! - [`tools`]: the remotely-invocable tool dispatcher
//! - [`state`]: conversation state and the reducer that mutates it
//! - [`pipeline`]: the event loop wiring everything together
//! - [`settings`]: on-disk configuration

pub mod audio;
pub mod live;
pub mod pipeline;
pub mod settings;
pub mod state;
pub mod tools;

use live::LiveError;
use pipeline::Pipeline;
use settings::load_settings;

/// Run the assistant until deactivation (Ctrl-C), server close, or error.
///
/// The API credential is resolved before anything else; a missing key is
/// fatal and no connection is attempted.
pub async fn run() -> Result<(), LiveError> {
    let api_key = live::get_api_key().ok_or(LiveError::MissingApiKey)?;

    let settings = load_settings();
    log::info!("Starting with model {}", settings.model);

    let mut pipeline = Pipeline::new(settings, api_key);
    pipeline.run().await
}
