//! Gapless playback scheduling and the speaker output sink
//!
//! Response audio arrives as a stream of decoded segments with arbitrary
//! timing. [`PlaybackScheduler`] keeps a single monotonically-advancing
//! cursor (the earliest time the next segment may start) plus the set of
//! in-flight segment handles, so segments play back-to-back with no gap and
//! no overlap and can all be hard-stopped on interruption. The scheduler is
//! pure bookkeeping: the caller passes `now` in, so it tests without a
//! device.
//!
//! [`OutputHandle`] realizes the schedule: a CPAL output stream on a
//! dedicated thread drains a shared sample queue, relying on the host audio
//! clock rather than explicit timers. Because segments are appended in
//! arrival order and the queue never reorders, the queue realizes exactly
//! the back-to-back schedule the cursor computes.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, StreamConfig};
use uuid::Uuid;

use super::capture::AudioError;

/// A scheduled playback segment.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlaybackHandle {
    pub id: Uuid,
    /// Scheduled start time, seconds on the caller's clock
    pub start: f64,
    /// Segment duration in seconds
    pub duration: f64,
}

/// Cursor plus active-set bookkeeping for gapless, non-overlapping playback.
#[derive(Debug, Default)]
pub struct PlaybackScheduler {
    /// Earliest time the next segment may start
    cursor: f64,
    active: HashMap<Uuid, PlaybackHandle>,
}

impl PlaybackScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule a segment of `duration` seconds at the current time `now`.
    ///
    /// The segment starts at `max(cursor, now)` and the cursor advances past
    /// its end, so consecutive segments neither gap nor overlap.
    pub fn schedule(&mut self, duration: f64, now: f64) -> PlaybackHandle {
        let start = self.cursor.max(now);
        self.cursor = start + duration;

        let handle = PlaybackHandle {
            id: Uuid::new_v4(),
            start,
            duration,
        };
        self.active.insert(handle.id, handle);
        handle
    }

    /// Mark a segment as naturally finished.
    ///
    /// Unknown (stale or already-stopped) ids are ignored. Returns true if
    /// the active set is empty after removal.
    pub fn finish(&mut self, id: Uuid) -> bool {
        self.active.remove(&id);
        self.active.is_empty()
    }

    /// Hard-stop everything: clear the active set and reset the cursor.
    ///
    /// Returns the ids that were still in flight so the caller can cancel
    /// their completion timers.
    pub fn interrupt(&mut self) -> Vec<Uuid> {
        let stopped: Vec<Uuid> = self.active.keys().copied().collect();
        self.active.clear();
        self.cursor = 0.0;
        stopped
    }

    /// True when no segments are in flight.
    pub fn is_idle(&self) -> bool {
        self.active.is_empty()
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn cursor(&self) -> f64 {
        self.cursor
    }
}

/// Handle to the speaker output stream.
///
/// Segments are enqueued as f32 samples; the CPAL callback drains the queue
/// and writes silence when it runs dry. `clear()` implements the hard-stop
/// half of interruption; `stop()` shuts the output thread down and is
/// idempotent.
pub struct OutputHandle {
    queue: Arc<Mutex<VecDeque<f32>>>,
    stop_flag: Arc<AtomicBool>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl OutputHandle {
    /// Append a decoded segment to the playback queue.
    pub fn enqueue(&self, samples: &[f32]) {
        if let Ok(mut queue) = self.queue.lock() {
            queue.extend(samples.iter().copied());
        }
    }

    /// Drop all queued audio immediately (interruption hard-stop).
    pub fn clear(&self) {
        if let Ok(mut queue) = self.queue.lock() {
            queue.clear();
        }
    }

    /// Samples still waiting in the queue.
    pub fn queued_len(&self) -> usize {
        self.queue.lock().map(|q| q.len()).unwrap_or(0)
    }

    /// Stop the output stream. Safe to call more than once.
    pub fn stop(&mut self) {
        self.stop_flag.store(true, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::warn!("Output thread panicked during shutdown");
            }
            log::info!("Audio output stopped");
        }
    }
}

impl Drop for OutputHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Start the speaker output stream at the given sample rate.
///
/// Blocks until the stream is running (or failed to start). Like capture,
/// the stream lives on a dedicated thread because it is not `Send`.
pub fn start_output(sample_rate: u32) -> Result<OutputHandle, AudioError> {
    let queue: Arc<Mutex<VecDeque<f32>>> = Arc::new(Mutex::new(VecDeque::new()));
    let stop_flag = Arc::new(AtomicBool::new(false));

    let thread_queue = queue.clone();
    let thread_stop = stop_flag.clone();
    let (ready_tx, ready_rx) = std::sync::mpsc::channel::<Result<(), AudioError>>();

    let thread = std::thread::spawn(move || {
        match build_output_stream(sample_rate, thread_queue) {
            Ok(stream) => {
                let _ = ready_tx.send(Ok(()));
                while !thread_stop.load(Ordering::SeqCst) {
                    std::thread::sleep(std::time::Duration::from_millis(20));
                }
                drop(stream);
            }
            Err(e) => {
                let _ = ready_tx.send(Err(e));
            }
        }
    });

    ready_rx
        .recv()
        .map_err(|_| AudioError::StreamCreationFailed("output thread exited".to_string()))??;

    log::info!("Audio output started at {} Hz", sample_rate);

    Ok(OutputHandle {
        queue,
        stop_flag,
        thread: Some(thread),
    })
}

fn build_output_stream(
    sample_rate: u32,
    queue: Arc<Mutex<VecDeque<f32>>>,
) -> Result<cpal::Stream, AudioError> {
    let host = cpal::default_host();

    let device = host
        .default_output_device()
        .ok_or(AudioError::NoOutputDevice)?;

    let supported_config = device
        .supported_output_configs()
        .map_err(|e| AudioError::StreamCreationFailed(e.to_string()))?
        .find(|c| {
            c.channels() == 1
                && c.min_sample_rate() <= SampleRate(sample_rate)
                && c.max_sample_rate() >= SampleRate(sample_rate)
        })
        .or_else(|| {
            // Fallback: stereo, duplicating the mono signal
            device.supported_output_configs().ok()?.find(|c| {
                c.channels() == 2
                    && c.min_sample_rate() <= SampleRate(sample_rate)
                    && c.max_sample_rate() >= SampleRate(sample_rate)
            })
        })
        .ok_or(AudioError::NoSupportedConfig)?;

    let config: StreamConfig = supported_config.with_sample_rate(SampleRate(sample_rate)).into();
    let channels = config.channels as usize;

    log::info!(
        "Output config: {} Hz, {} channels",
        config.sample_rate.0,
        config.channels
    );

    let err_fn = |err| log::error!("Audio output stream error: {}", err);

    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                let mut guard = match queue.lock() {
                    Ok(g) => g,
                    Err(_) => return,
                };
                for frame in data.chunks_mut(channels) {
                    let sample = guard.pop_front().unwrap_or(0.0);
                    for out in frame.iter_mut() {
                        *out = sample;
                    }
                }
            },
            err_fn,
            None,
        )
        .map_err(|e| AudioError::StreamCreationFailed(e.to_string()))?;

    stream
        .play()
        .map_err(|e| AudioError::StreamCreationFailed(e.to_string()))?;

    Ok(stream)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segments_are_back_to_back() {
        let mut sched = PlaybackScheduler::new();

        // First segment waits for "now"; the rest chain off the cursor even
        // though they arrive early.
        let a = sched.schedule(0.5, 1.0);
        let b = sched.schedule(0.25, 1.01);
        let c = sched.schedule(1.0, 1.02);

        assert_eq!(a.start, 1.0);
        assert_eq!(b.start, a.start + a.duration);
        assert_eq!(c.start, b.start + b.duration);
        assert_eq!(sched.cursor(), c.start + c.duration);
    }

    #[test]
    fn start_times_are_non_decreasing_for_any_arrival_timing() {
        let mut sched = PlaybackScheduler::new();
        let arrivals = [0.0, 0.9, 0.95, 3.0, 3.001, 10.0];

        let mut prev: Option<PlaybackHandle> = None;
        for &now in &arrivals {
            let h = sched.schedule(0.4, now);
            if let Some(p) = prev {
                assert!(h.start >= p.start + p.duration, "overlap at now={}", now);
            }
            prev = Some(h);
        }
    }

    #[test]
    fn late_arrival_clamps_to_now() {
        let mut sched = PlaybackScheduler::new();

        let a = sched.schedule(0.1, 0.0);
        // Arrives well after the previous segment finished: no stale cursor,
        // starts immediately.
        let b = sched.schedule(0.1, 5.0);

        assert_eq!(a.start, 0.0);
        assert_eq!(b.start, 5.0);
    }

    #[test]
    fn finish_empties_active_set() {
        let mut sched = PlaybackScheduler::new();
        let a = sched.schedule(0.5, 0.0);
        let b = sched.schedule(0.5, 0.0);

        assert!(!sched.finish(a.id));
        assert!(sched.finish(b.id));
        assert!(sched.is_idle());
    }

    #[test]
    fn finish_ignores_stale_id() {
        let mut sched = PlaybackScheduler::new();
        sched.schedule(0.5, 0.0);

        // Finishing an unknown id neither panics nor empties the set
        assert!(!sched.finish(Uuid::new_v4()));
        assert_eq!(sched.active_count(), 1);
    }

    #[test]
    fn interrupt_clears_set_and_resets_cursor() {
        let mut sched = PlaybackScheduler::new();
        sched.schedule(1.0, 0.0);
        sched.schedule(1.0, 0.0);
        assert_eq!(sched.active_count(), 2);

        let stopped = sched.interrupt();
        assert_eq!(stopped.len(), 2);
        assert!(sched.is_idle());
        assert_eq!(sched.cursor(), 0.0);

        // The next segment starts at "now", not at the stale cursor
        let h = sched.schedule(0.5, 0.25);
        assert_eq!(h.start, 0.25);
    }
}
