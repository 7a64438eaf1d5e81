//! Audio devices for the capture client
//!
//! Microphone capture encodes to WAV; playback decodes MP3 replies,
//! resamples to the device rate and plays them as a unit.

mod capture;
mod playback;

pub use capture::{AudioCapture, SAMPLE_RATE, samples_to_wav};
pub use playback::AudioPlayback;
