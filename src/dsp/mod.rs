//! DSP Library
//!
//! Signal processing building blocks behind the manipulation engine and the
//! watermark methods. Every function here is pure: filter coefficients,
//! windows and FFT plans are derived per call from their parameters.

pub mod biquad;
pub mod codec_sim;
pub mod noise;
pub mod resample;
pub mod spectral;
pub mod vocoder;

pub use biquad::{BiquadCoeffs, ButterworthFilter, PassType, BUTTERWORTH_ORDER};
pub use codec_sim::{CodecProfile, SUPPORTED_BITRATES};
pub use noise::add_noise;
pub use resample::{resample_buffer, resample_to_length};
pub use spectral::{FftProcessor, Stft};
pub use vocoder::{pitch_shift, time_stretch};
