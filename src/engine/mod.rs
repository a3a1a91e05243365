//! Audio Engine Module
//!
//! Core audio plumbing shared by every other component:
//! - Audio buffer type
//! - Codec (decode/encode)
//! - Test signal generators

pub mod buffer;
pub mod codec;
pub mod signal;

pub use buffer::{AudioBuffer, ChannelLayout};
pub use codec::{
    decode, decode_with_limits, encode, probe, wav_output_format, AudioFormat, AudioInfo,
    DecodeLimits, OutputFormat,
};
pub use signal::{
    generate_silence, generate_stereo_test_tone, generate_test_tone, generate_white_noise,
};
