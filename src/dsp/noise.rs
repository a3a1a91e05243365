//! Additive white Gaussian noise at a target SNR

use log::debug;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::engine::buffer::AudioBuffer;

/// Standard normal sample (Box-Muller)
fn gaussian<R: Rng>(rng: &mut R) -> f64 {
    // 1 - u keeps the log argument in (0, 1]
    let u1: f64 = 1.0 - rng.gen::<f64>();
    let u2: f64 = rng.gen::<f64>();
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}

/// Add white Gaussian noise so the result has `snr_db` relative to the
/// buffer's mean signal power, then clamp to [-1, 1]
///
/// Noise is drawn from a ChaCha stream seeded with `seed`, channel after
/// channel, so the same input and seed always give the same output. A silent
/// buffer has no power to measure against and is returned unchanged.
pub fn add_noise(buffer: &AudioBuffer, snr_db: f64, seed: u64) -> AudioBuffer {
    let signal_power = buffer.signal_power();
    if signal_power <= 0.0 {
        debug!("Silent input: noise manipulation leaves it unchanged");
        return buffer.clone();
    }

    let noise_power = signal_power / 10.0_f64.powf(snr_db / 10.0);
    let sigma = noise_power.sqrt();
    let mut rng = ChaCha8Rng::seed_from_u64(seed);

    let mut output = buffer.clone();
    for channel in &mut output.samples {
        for sample in channel.iter_mut() {
            let noisy = *sample as f64 + sigma * gaussian(&mut rng);
            *sample = noisy.clamp(-1.0, 1.0) as f32;
        }
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::buffer::{mean_square, ChannelLayout};
    use crate::engine::signal::generate_test_tone;

    #[test]
    fn test_measured_snr_matches_target() {
        let tone = generate_test_tone(440.0, 2.0, 16_000, 0.3);
        for target in [0.0, 10.0, 20.0, 30.0] {
            let noisy = add_noise(&tone, target, 1);
            let noise: Vec<f32> = noisy
                .channel(0)
                .iter()
                .zip(tone.channel(0))
                .map(|(a, b)| a - b)
                .collect();
            let measured = 10.0 * (mean_square(tone.channel(0)) / mean_square(&noise)).log10();
            assert!((measured - target).abs() < 0.3, "{} vs {}", measured, target);
        }
    }

    #[test]
    fn test_negative_snr_permitted() {
        let tone = generate_test_tone(440.0, 0.5, 16_000, 0.05);
        let noisy = add_noise(&tone, -6.0, 3);
        assert!(noisy.signal_power() > tone.signal_power());
        assert!(noisy.peak() <= 1.0);
    }

    #[test]
    fn test_silence_is_unchanged() {
        let silence = AudioBuffer::new(1000, ChannelLayout::Stereo, 16_000);
        assert_eq!(add_noise(&silence, 20.0, 0), silence);
    }

    #[test]
    fn test_seeded_determinism() {
        let tone = generate_test_tone(440.0, 0.25, 16_000, 0.5);
        assert_eq!(add_noise(&tone, 20.0, 9), add_noise(&tone, 20.0, 9));
        assert_ne!(add_noise(&tone, 20.0, 9), add_noise(&tone, 20.0, 10));
    }
}
