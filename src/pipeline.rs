//! The real-time audio pipeline
//!
//! Owns every live resource (session, capture, playback) and runs the single
//! event loop that wires them together:
//!
//! ```text
//!   mic frames ──▶ downsample ──▶ chunk ──▶ session (upstream)
//!   session ──▶ transcript / audio / tool calls / interruption
//!   audio ──▶ decode ──▶ scheduler + output queue
//!   tool calls ──▶ dispatcher ──▶ batched response (upstream)
//! ```
//!
//! All state mutation flows through [`crate::state::reduce`]; the pipeline
//! executes the effects each transition returns. Teardown releases every
//! resource through `Option::take`, so invoking it again is a no-op.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use uuid::Uuid;

use crate::audio::{
    decode_pcm16_base64, downsample, start_capture, start_output, CaptureHandle, OutputHandle,
    PlaybackScheduler,
};
use crate::live::protocol::{ServerMessage, INPUT_SAMPLE_RATE, OUTPUT_SAMPLE_RATE};
use crate::live::{Inbound, LiveError, LiveSession};
use crate::settings::AppSettings;
use crate::state::{reduce, ConversationState, Effect, Event};
use crate::tools::{self, ToolDispatcher};

/// How long a dispatched tool name stays displayed.
const TOOL_CLEAR_DELAY: Duration = Duration::from_secs(2);

/// Capacity of the capture frame channel. Frames are dropped when full.
const FRAME_CHANNEL_CAPACITY: usize = 64;

/// Accumulates device-rate capture frames and emits fixed-duration chunks at
/// the wire input rate.
pub struct Chunker {
    source_rate: u32,
    chunk_samples: usize,
    buffer: Vec<i16>,
}

impl Chunker {
    pub fn new(source_rate: u32, chunk_duration_ms: u64) -> Self {
        let chunk_samples = (INPUT_SAMPLE_RATE as u64 * chunk_duration_ms / 1000).max(1) as usize;
        Self {
            source_rate,
            chunk_samples,
            buffer: Vec::new(),
        }
    }

    /// Feed one capture frame; returns any full chunks now ready to send.
    pub fn push(&mut self, frame: &[i16]) -> Vec<Vec<i16>> {
        let resampled = downsample(frame, self.source_rate, INPUT_SAMPLE_RATE);
        self.buffer.extend_from_slice(&resampled);

        let mut chunks = Vec::new();
        while self.buffer.len() >= self.chunk_samples {
            let rest = self.buffer.split_off(self.chunk_samples);
            let chunk = std::mem::replace(&mut self.buffer, rest);
            chunks.push(chunk);
        }
        chunks
    }

    /// Drain whatever partial chunk remains.
    pub fn flush(&mut self) -> Option<Vec<i16>> {
        if self.buffer.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.buffer))
        }
    }
}

/// Timer completions delivered back into the event loop.
#[derive(Debug)]
enum TimerEvent {
    /// A scheduled playback segment reached its natural end
    SegmentFinished(Uuid),
    /// The active-tool display delay elapsed
    ToolClear(Uuid),
}

pub struct Pipeline {
    settings: AppSettings,
    api_key: String,
    dispatcher: ToolDispatcher,

    state: ConversationState,
    scheduler: PlaybackScheduler,
    epoch: Instant,
    running: bool,

    session: Option<LiveSession>,
    capture: Option<CaptureHandle>,
    output: Option<OutputHandle>,
    chunker: Option<Chunker>,

    frame_rx: Option<mpsc::Receiver<Vec<i16>>>,
    server_rx: Option<mpsc::Receiver<Inbound>>,
    timer_tx: mpsc::Sender<TimerEvent>,
    timer_rx: mpsc::Receiver<TimerEvent>,
}

impl Pipeline {
    pub fn new(settings: AppSettings, api_key: String) -> Self {
        let (timer_tx, timer_rx) = mpsc::channel(64);
        Self {
            settings,
            api_key,
            dispatcher: ToolDispatcher::new(),
            state: ConversationState::default(),
            scheduler: PlaybackScheduler::new(),
            epoch: Instant::now(),
            running: true,
            session: None,
            capture: None,
            output: None,
            chunker: None,
            frame_rx: None,
            server_rx: None,
            timer_tx,
            timer_rx,
        }
    }

    pub fn state(&self) -> &ConversationState {
        &self.state
    }

    /// Activate the session and run the event loop until deactivation,
    /// server close, or error.
    pub async fn run(&mut self) -> Result<(), LiveError> {
        self.apply(Event::Activate).await;

        while self.running {
            tokio::select! {
                frame = recv_or_pending(&mut self.frame_rx) => {
                    match frame {
                        Some(frame) => self.handle_capture_frame(frame).await,
                        None => self.frame_rx = None,
                    }
                }
                inbound = recv_or_pending(&mut self.server_rx) => {
                    match inbound {
                        Some(inbound) => self.handle_inbound(inbound).await,
                        None => {
                            // Receiver task gone without a terminal item
                            self.server_rx = None;
                            self.apply(Event::SessionClosed {
                                reason: "connection closed".to_string(),
                            })
                            .await;
                        }
                    }
                }
                Some(timer) = self.timer_rx.recv() => {
                    self.handle_timer(timer).await;
                }
                _ = tokio::signal::ctrl_c() => {
                    log::info!("Interrupt signal received, deactivating");
                    self.apply(Event::Deactivate).await;
                }
            }
        }

        match self.state.status {
            crate::state::ConnectionStatus::Error => Err(LiveError::Disconnected(
                self.state
                    .log
                    .front()
                    .cloned()
                    .unwrap_or_else(|| "session failed".to_string()),
            )),
            _ => Ok(()),
        }
    }

    /// Run one event through the reducer and execute the resulting effects.
    /// Effects may produce follow-up events; those are processed in order.
    async fn apply(&mut self, event: Event) {
        let mut queue = VecDeque::new();
        queue.push_back(event);

        while let Some(event) = queue.pop_front() {
            log::debug!("Event: {:?}", event);
            let (next, effects) = reduce(&self.state, event);
            if next.status != self.state.status {
                log::info!("Status: {:?} -> {:?}", self.state.status, next.status);
            }
            self.state = next;

            for effect in effects {
                if let Some(follow_up) = self.execute(effect).await {
                    queue.push_back(follow_up);
                }
            }
        }
    }

    async fn execute(&mut self, effect: Effect) -> Option<Event> {
        match effect {
            Effect::Connect => {
                let result = LiveSession::connect(
                    &self.api_key,
                    &self.settings.model,
                    self.settings.system_instruction.as_deref(),
                    tools::declarations(),
                )
                .await;

                match result {
                    Ok(mut session) => {
                        self.server_rx = session.take_receiver();
                        self.session = Some(session);
                        Some(Event::SessionOpen)
                    }
                    Err(e) => Some(Event::TransportError {
                        message: e.to_string(),
                    }),
                }
            }

            Effect::BeginCapture => match self.begin_capture() {
                Ok(()) => None,
                Err(e) => Some(Event::TransportError {
                    message: e.to_string(),
                }),
            },

            Effect::StopPlayback => {
                let stopped = self.scheduler.interrupt();
                log::debug!("Hard-stopped {} playback segments", stopped.len());
                if let Some(output) = &self.output {
                    output.clear();
                }
                None
            }

            Effect::ScheduleToolClear { token } => {
                let tx = self.timer_tx.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(TOOL_CLEAR_DELAY).await;
                    let _ = tx.send(TimerEvent::ToolClear(token)).await;
                });
                None
            }

            Effect::Teardown => {
                self.teardown().await;
                Some(Event::TeardownComplete)
            }
        }
    }

    fn begin_capture(&mut self) -> Result<(), crate::audio::AudioError> {
        let (frame_tx, frame_rx) = mpsc::channel(FRAME_CHANNEL_CAPACITY);
        let capture = start_capture(frame_tx, self.settings.capture_dump_path.clone())?;
        let output = start_output(OUTPUT_SAMPLE_RATE)?;

        self.chunker = Some(Chunker::new(
            capture.sample_rate(),
            self.settings.chunk_duration_ms,
        ));
        self.frame_rx = Some(frame_rx);
        self.capture = Some(capture);
        self.output = Some(output);
        Ok(())
    }

    async fn handle_capture_frame(&mut self, frame: Vec<i16>) {
        let chunks = match &mut self.chunker {
            Some(chunker) => chunker.push(&frame),
            None => return,
        };

        for chunk in chunks {
            let result = match &mut self.session {
                Some(session) => session.send_audio(&chunk).await,
                None => return,
            };
            if let Err(e) = result {
                self.apply(Event::TransportError {
                    message: e.to_string(),
                })
                .await;
                return;
            }
        }
    }

    /// Route one read-side item: parsed messages are dispatched, a transport
    /// failure goes to the error state, a clean close tears down to idle.
    async fn handle_inbound(&mut self, inbound: Inbound) {
        match inbound {
            Inbound::Message(msg) => self.handle_server_message(msg).await,
            Inbound::TransportError(message) => {
                self.apply(Event::TransportError { message }).await;
            }
            Inbound::Closed(reason) => {
                self.apply(Event::SessionClosed { reason }).await;
            }
        }
    }

    async fn handle_server_message(&mut self, msg: ServerMessage) {
        if let Some(content) = msg.server_content {
            if content.interrupted {
                self.apply(Event::Interrupted).await;
            }

            if let Some(text) = content.transcript() {
                self.apply(Event::TranscriptUpdate {
                    text: text.to_string(),
                })
                .await;
            }

            for payload in content.audio_payloads() {
                match decode_pcm16_base64(payload) {
                    Ok(samples) => self.schedule_playback(samples).await,
                    Err(e) => log::warn!("Failed to decode audio chunk: {}", e),
                }
            }

            // A turn can complete without audio (text-only or after an
            // interruption); make sure the speaking flag clears.
            if content.turn_complete && self.scheduler.is_idle() && self.state.speaking {
                self.apply(Event::PlaybackIdle).await;
            }
        }

        if let Some(batch) = msg.tool_call {
            self.handle_tool_calls(batch.function_calls).await;
        }

        if let Some(go_away) = msg.go_away {
            let reason = match go_away.time_left {
                Some(t) => format!("server going away (time left: {})", t),
                None => "server going away".to_string(),
            };
            self.apply(Event::SessionClosed { reason }).await;
        }
    }

    async fn schedule_playback(&mut self, samples: Vec<f32>) {
        let duration = samples.len() as f64 / OUTPUT_SAMPLE_RATE as f64;
        let now = self.elapsed();
        let handle = self.scheduler.schedule(duration, now);

        if let Some(output) = &self.output {
            output.enqueue(&samples);
        }

        // Completion timer fires at the segment's scheduled end. Stale ids
        // (after an interruption) are ignored by the scheduler.
        let delay = Duration::from_secs_f64((handle.start + handle.duration - now).max(0.0));
        let tx = self.timer_tx.clone();
        let id = handle.id;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(TimerEvent::SegmentFinished(id)).await;
        });

        if !self.state.speaking {
            self.apply(Event::SpeakingStarted).await;
        }
    }

    async fn handle_tool_calls(&mut self, calls: Vec<crate::live::FunctionCall>) {
        for call in &calls {
            let token = Uuid::new_v4();
            self.apply(Event::ToolInvoked {
                name: call.name.clone(),
                token,
            })
            .await;
        }

        let (responses, events) = self.dispatcher.dispatch_batch(&calls);
        for event in events {
            self.apply(event).await;
        }

        let result = match &mut self.session {
            Some(session) => session.send_tool_response(responses).await,
            None => return,
        };
        if let Err(e) = result {
            self.apply(Event::TransportError {
                message: e.to_string(),
            })
            .await;
        }
    }

    async fn handle_timer(&mut self, timer: TimerEvent) {
        match timer {
            TimerEvent::SegmentFinished(id) => {
                if self.scheduler.finish(id) && self.state.speaking {
                    self.apply(Event::PlaybackIdle).await;
                }
            }
            TimerEvent::ToolClear(token) => {
                self.apply(Event::ToolClearTimeout { token }).await;
            }
        }
    }

    /// Release every live resource. Each resource is taken out of its slot,
    /// so a second invocation finds nothing to release.
    async fn teardown(&mut self) {
        log::info!("Tearing down pipeline");

        if let Some(mut capture) = self.capture.take() {
            capture.stop();
        }
        self.frame_rx = None;

        // Flush the partial chunk so the service hears the end of speech
        if let (Some(mut chunker), Some(session)) = (self.chunker.take(), self.session.as_mut()) {
            if let Some(rest) = chunker.flush() {
                if let Err(e) = session.send_audio(&rest).await {
                    log::debug!("Could not flush final audio chunk: {}", e);
                }
            }
        }

        self.scheduler.interrupt();
        if let Some(mut output) = self.output.take() {
            output.clear();
            output.stop();
        }

        if let Some(session) = self.session.take() {
            session.close().await;
        }
        self.server_rx = None;

        self.running = false;
    }

    fn elapsed(&self) -> f64 {
        self.epoch.elapsed().as_secs_f64()
    }
}

async fn recv_or_pending<T>(rx: &mut Option<mpsc::Receiver<T>>) -> Option<T> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
