//! Microphone capture using CPAL
//!
//! Capture runs on a dedicated audio thread because the CPAL `Stream` handle
//! is not `Send`. The input callback converts samples to i16 and pushes each
//! frame into a bounded tokio channel with `try_send`; if the pipeline falls
//! behind, frames are dropped rather than back-pressuring the audio thread.
//!
//! ```text
//! Audio Thread (sync)                Tokio Runtime (async)
//! ┌──────────────────┐               ┌─────────────────────────┐
//! │ CPAL Callback    │──try_send──▶  │ Pipeline                │
//! │ (i16 frames)     │               │   ├─ downsample + chunk │
//! └──────────────────┘               │   └─ send to session    │
//! ```
//!
//! An optional WAV dump archives the raw device-rate capture for offline
//! inspection.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, SampleFormat, StreamConfig};
use hound::{WavSpec, WavWriter};
use tokio::sync::mpsc;

use super::codec::f32_to_i16;

type DumpWriter = Arc<Mutex<Option<WavWriter<std::io::BufWriter<std::fs::File>>>>>;

/// Errors that can occur during audio capture.
#[derive(Debug, Clone)]
pub enum AudioError {
    NoInputDevice,
    NoOutputDevice,
    NoSupportedConfig,
    StreamCreationFailed(String),
    DumpFileFailed(String),
}

impl std::fmt::Display for AudioError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AudioError::NoInputDevice => write!(f, "No audio input device found"),
            AudioError::NoOutputDevice => write!(f, "No audio output device found"),
            AudioError::NoSupportedConfig => write!(f, "No supported audio configuration"),
            AudioError::StreamCreationFailed(e) => {
                write!(f, "Failed to create audio stream: {}", e)
            }
            AudioError::DumpFileFailed(e) => write!(f, "Failed to create WAV dump: {}", e),
        }
    }
}

impl std::error::Error for AudioError {}

/// Handle to an active capture stream.
///
/// Dropping the handle (or calling `stop()`) shuts the audio thread down and
/// finalizes the WAV dump if one was requested. `stop()` is idempotent.
pub struct CaptureHandle {
    stop_flag: Arc<AtomicBool>,
    thread: Option<std::thread::JoinHandle<()>>,
    sample_rate: u32,
}

impl CaptureHandle {
    /// Device sample rate the capture stream is running at.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Stop capturing. Safe to call more than once.
    pub fn stop(&mut self) {
        self.stop_flag.store(true, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::warn!("Capture thread panicked during shutdown");
            }
            log::info!("Audio capture stopped");
        }
    }
}

impl Drop for CaptureHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Start capturing from the default input device.
///
/// Blocks until the stream is running (or failed to start) and returns a
/// handle carrying the device sample rate. Each callback frame is converted
/// to i16 and pushed to `frame_tx`.
pub fn start_capture(
    frame_tx: mpsc::Sender<Vec<i16>>,
    dump_path: Option<PathBuf>,
) -> Result<CaptureHandle, AudioError> {
    let stop_flag = Arc::new(AtomicBool::new(false));
    let thread_stop = stop_flag.clone();

    // The cpal Stream is not Send, so it must be created and kept alive on
    // its own thread. Startup errors are reported back over this channel.
    let (ready_tx, ready_rx) = std::sync::mpsc::channel::<Result<u32, AudioError>>();

    let thread = std::thread::spawn(move || {
        let started = build_and_run(frame_tx, dump_path, thread_stop);
        match started {
            Ok((stream, sample_rate, writer, stop)) => {
                let _ = ready_tx.send(Ok(sample_rate));
                // Keep the stream alive until stop is requested.
                while !stop.load(Ordering::SeqCst) {
                    std::thread::sleep(std::time::Duration::from_millis(20));
                }
                drop(stream);
                finalize_dump(&writer);
            }
            Err(e) => {
                let _ = ready_tx.send(Err(e));
            }
        }
    });

    let sample_rate = ready_rx
        .recv()
        .map_err(|_| AudioError::StreamCreationFailed("capture thread exited".to_string()))??;

    log::info!("Audio capture started at {} Hz", sample_rate);

    Ok(CaptureHandle {
        stop_flag,
        thread: Some(thread),
        sample_rate,
    })
}

type RunningCapture = (cpal::Stream, u32, DumpWriter, Arc<AtomicBool>);

fn build_and_run(
    frame_tx: mpsc::Sender<Vec<i16>>,
    dump_path: Option<PathBuf>,
    stop: Arc<AtomicBool>,
) -> Result<RunningCapture, AudioError> {
    let host = cpal::default_host();

    let device = host
        .default_input_device()
        .ok_or(AudioError::NoInputDevice)?;

    log::info!("Using audio input device: {:?}", device.name());

    let supported_config = device
        .default_input_config()
        .map_err(|_| AudioError::NoSupportedConfig)?;

    log::info!(
        "Capture config: {} Hz, {} channels, {:?}",
        supported_config.sample_rate().0,
        supported_config.channels(),
        supported_config.sample_format()
    );

    let sample_format = supported_config.sample_format();
    let config: StreamConfig = supported_config.into();
    let sample_rate = config.sample_rate.0;
    let channels = config.channels as usize;

    let writer: DumpWriter = Arc::new(Mutex::new(match dump_path {
        Some(path) => {
            let spec = WavSpec {
                channels: 1,
                sample_rate,
                bits_per_sample: 16,
                sample_format: hound::SampleFormat::Int,
            };
            let w = WavWriter::create(&path, spec)
                .map_err(|e| AudioError::DumpFileFailed(e.to_string()))?;
            log::info!("Capture WAV dump enabled: {:?}", path);
            Some(w)
        }
        None => None,
    }));

    let stream = match sample_format {
        SampleFormat::I16 => {
            build_stream_typed::<i16>(&device, &config, channels, frame_tx, writer.clone())?
        }
        SampleFormat::U16 => {
            build_stream_typed::<u16>(&device, &config, channels, frame_tx, writer.clone())?
        }
        SampleFormat::F32 => {
            build_stream_typed::<f32>(&device, &config, channels, frame_tx, writer.clone())?
        }
        _ => return Err(AudioError::NoSupportedConfig),
    };

    stream
        .play()
        .map_err(|e| AudioError::StreamCreationFailed(format!("Failed to start stream: {}", e)))?;

    Ok((stream, sample_rate, writer, stop))
}

fn build_stream_typed<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    channels: usize,
    frame_tx: mpsc::Sender<Vec<i16>>,
    writer: DumpWriter,
) -> Result<cpal::Stream, AudioError>
where
    T: cpal::SizedSample + Send + 'static,
    f32: cpal::FromSample<T>,
{
    let err_fn = |err| log::error!("Audio capture stream error: {}", err);

    let stream = device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                // Collapse to mono by taking the first channel of each frame.
                let samples: Vec<i16> = data
                    .chunks(channels)
                    .map(|frame| f32_to_i16(f32::from_sample_(frame[0])))
                    .collect();

                if let Ok(mut guard) = writer.lock() {
                    if let Some(ref mut w) = *guard {
                        for &s in &samples {
                            if w.write_sample(s).is_err() {
                                log::error!("Failed to write dump sample");
                                break;
                            }
                        }
                    }
                }

                // Drop the frame if the pipeline is behind; never block the
                // audio callback.
                if let Err(mpsc::error::TrySendError::Full(_)) = frame_tx.try_send(samples) {
                    log::warn!("Capture channel full, dropping frame");
                }
            },
            err_fn,
            None,
        )
        .map_err(|e| AudioError::StreamCreationFailed(e.to_string()))?;

    Ok(stream)
}

fn finalize_dump(writer: &DumpWriter) {
    let mut guard = match writer.lock() {
        Ok(g) => g,
        Err(_) => return,
    };
    if let Some(w) = guard.take() {
        if let Err(e) = w.finalize() {
            log::warn!("Failed to finalize capture dump: {}", e);
        }
    }
}

/// Downsample audio from source rate to target rate using simple averaging
///
/// Supports integer ratios only (e.g. 48kHz → 16kHz). Non-integer ratios and
/// degenerate rates return the input unchanged.
pub fn downsample(samples: &[i16], source_rate: u32, target_rate: u32) -> Vec<i16> {
    if target_rate == 0 || source_rate == 0 {
        log::warn!(
            "Invalid sample rate (source: {}, target: {}), returning original",
            source_rate,
            target_rate
        );
        return samples.to_vec();
    }

    if source_rate == target_rate {
        return samples.to_vec();
    }

    if source_rate % target_rate != 0 {
        log::warn!(
            "Unsupported resample ratio {}:{}, returning original",
            source_rate,
            target_rate
        );
        return samples.to_vec();
    }

    let ratio = (source_rate / target_rate) as usize;

    samples
        .chunks(ratio)
        .map(|chunk| {
            // i64 accumulator to avoid overflow
            let sum: i64 = chunk.iter().map(|&s| s as i64).sum();
            (sum / chunk.len() as i64) as i16
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_downsample_3x() {
        // 48kHz → 16kHz (3:1)
        let input = vec![100i16, 200, 300, 400, 500, 600];
        let output = downsample(&input, 48000, 16000);

        assert_eq!(output.len(), 2);
        assert_eq!(output[0], 200); // (100 + 200 + 300) / 3
        assert_eq!(output[1], 500); // (400 + 500 + 600) / 3
    }

    #[test]
    fn test_downsample_same_rate() {
        let input = vec![100i16, 200, 300];
        assert_eq!(downsample(&input, 16000, 16000), input);
    }

    #[test]
    fn test_downsample_unsupported_ratio() {
        let input = vec![100i16, 200, 300];
        assert_eq!(downsample(&input, 44100, 16000), input);
    }

    #[test]
    fn test_downsample_zero_rate() {
        let input = vec![100i16, 200, 300];
        assert_eq!(downsample(&input, 48000, 0), input);
        assert_eq!(downsample(&input, 0, 16000), input);
    }
}
