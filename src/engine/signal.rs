//! Test signal generators
//!
//! Deterministic fixtures for robustness runs: sine tones, seeded noise and
//! silence at any sample rate.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::engine::buffer::{AudioBuffer, ChannelLayout};

fn num_samples(duration_secs: f64, sample_rate: u32) -> usize {
    (duration_secs * sample_rate as f64).round().max(0.0) as usize
}

/// Generate a mono sine wave
///
/// # Arguments
/// * `frequency` - Frequency of the sine wave in Hz
/// * `duration_secs` - Duration of the tone in seconds
/// * `sample_rate` - Sample rate in Hz
/// * `amplitude` - Peak amplitude (0.0 to 1.0)
pub fn generate_test_tone(
    frequency: f64,
    duration_secs: f64,
    sample_rate: u32,
    amplitude: f32,
) -> AudioBuffer {
    let mut buffer = AudioBuffer::new(
        num_samples(duration_secs, sample_rate),
        ChannelLayout::Mono,
        sample_rate,
    );
    fill_sine(buffer.channel_mut(0), frequency, sample_rate, amplitude);
    buffer
}

/// Generate a stereo test tone with different frequencies per channel
pub fn generate_stereo_test_tone(
    freq_left: f64,
    freq_right: f64,
    duration_secs: f64,
    sample_rate: u32,
    amplitude: f32,
) -> AudioBuffer {
    let mut buffer = AudioBuffer::new(
        num_samples(duration_secs, sample_rate),
        ChannelLayout::Stereo,
        sample_rate,
    );
    fill_sine(buffer.channel_mut(0), freq_left, sample_rate, amplitude);
    fill_sine(buffer.channel_mut(1), freq_right, sample_rate, amplitude);
    buffer
}

/// Generate uniform white noise in [-amplitude, amplitude]
///
/// The same seed always yields the same samples.
pub fn generate_white_noise(
    duration_secs: f64,
    sample_rate: u32,
    amplitude: f32,
    seed: u64,
) -> AudioBuffer {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut buffer = AudioBuffer::new(
        num_samples(duration_secs, sample_rate),
        ChannelLayout::Mono,
        sample_rate,
    );
    for sample in buffer.channel_mut(0) {
        *sample = rng.gen_range(-amplitude..=amplitude);
    }
    buffer
}

/// Generate digital silence
pub fn generate_silence(duration_secs: f64, sample_rate: u32, layout: ChannelLayout) -> AudioBuffer {
    AudioBuffer::new(num_samples(duration_secs, sample_rate), layout, sample_rate)
}

fn fill_sine(channel: &mut [f32], frequency: f64, sample_rate: u32, amplitude: f32) {
    let angular_freq = 2.0 * std::f64::consts::PI * frequency / sample_rate as f64;
    for (i, sample) in channel.iter_mut().enumerate() {
        *sample = amplitude * (angular_freq * i as f64).sin() as f32;
    }
}
