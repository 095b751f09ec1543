//! Audio pipeline: codec helpers, microphone capture, and playback scheduling.

pub mod capture;
pub mod codec;
pub mod playback;

pub use capture::{downsample, start_capture, AudioError, CaptureHandle};
pub use codec::{decode_pcm16_base64, encode_pcm16_base64, f32_to_i16, CodecError};
pub use playback::{start_output, OutputHandle, PlaybackHandle, PlaybackScheduler};
