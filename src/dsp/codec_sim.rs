//! Lossy codec simulation
//!
//! Reproduces the two artifacts a perceptual audio codec introduces at a
//! given bitrate: a hard bandwidth limit and spectral quantization noise
//! whose level rises as the bitrate drops. The transform is a sine-windowed
//! STFT at 50% overlap, the same lapped structure MDCT codecs use, so an
//! unquantized pass reconstructs the input exactly.

use rustfft::num_complex::Complex;

use crate::dsp::spectral::{frame_size_for, Stft};
use crate::error::{Result, WmError};

/// Bitrates accepted by the compression manipulation (kbps)
pub const SUPPORTED_BITRATES: [u32; 9] = [32, 48, 64, 96, 128, 160, 192, 256, 320];

/// Lowest bitrate that still produces usable audio
pub const MIN_BITRATE_KBPS: u32 = 32;

/// Transform frame duration
const FRAME_SECONDS: f64 = 0.023;

/// Bandwidth and quantization level a bitrate maps to
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CodecProfile {
    pub bitrate_kbps: u32,
    /// Content above this frequency is discarded
    pub bandwidth_hz: f64,
    /// Signal to quantization noise ratio per frame
    pub snr_db: f64,
}

impl CodecProfile {
    /// Look up the profile for a bitrate
    ///
    /// # Errors
    /// * `InvalidParameter` - If the bitrate is below 32 kbps or not in [`SUPPORTED_BITRATES`]
    pub fn for_bitrate(bitrate_kbps: u32) -> Result<Self> {
        if bitrate_kbps < MIN_BITRATE_KBPS {
            return Err(WmError::invalid(
                "bitrate",
                format!(
                    "{} kbps is below the minimum viable bitrate of {} kbps",
                    bitrate_kbps, MIN_BITRATE_KBPS
                ),
            ));
        }
        let (bandwidth_hz, snr_db) = match bitrate_kbps {
            32 => (5_500.0, 14.0),
            48 => (7_000.0, 17.0),
            64 => (8_000.0, 20.0),
            96 => (11_000.0, 24.0),
            128 => (16_000.0, 28.0),
            160 => (17_000.0, 31.0),
            192 => (18_000.0, 34.0),
            256 => (19_500.0, 40.0),
            320 => (20_000.0, 46.0),
            other => {
                return Err(WmError::invalid(
                    "bitrate",
                    format!("{} kbps is not one of {:?}", other, SUPPORTED_BITRATES),
                ))
            }
        };
        Ok(Self {
            bitrate_kbps,
            bandwidth_hz,
            snr_db,
        })
    }
}

/// Run one channel through the simulated codec
pub fn simulate(samples: &[f32], sample_rate: u32, profile: &CodecProfile) -> Vec<f32> {
    if samples.is_empty() {
        return Vec::new();
    }

    let stft = Stft::sine(frame_size_for(sample_rate, FRAME_SECONDS));
    let fft = stft.fft();
    let num_bins = fft.num_bins();
    let bandwidth = profile.bandwidth_hz.min(0.98 * sample_rate as f64 / 2.0);
    let step_scale = 10.0_f64.powf(-profile.snr_db / 20.0);

    let frames: Vec<Vec<Complex<f64>>> = stft
        .analyze(samples)
        .into_iter()
        .map(|mut spectrum| {
            let peak = spectrum[..num_bins]
                .iter()
                .map(|c| c.norm())
                .fold(0.0_f64, f64::max);
            let step = peak * step_scale;

            for (k, bin) in spectrum[..num_bins].iter_mut().enumerate() {
                if fft.bin_frequency(k, sample_rate) > bandwidth {
                    *bin = Complex::new(0.0, 0.0);
                } else if step > 0.0 {
                    let magnitude = (bin.norm() / step).round() * step;
                    *bin = Complex::from_polar(magnitude, bin.arg());
                }
            }
            spectrum
        })
        .collect();

    stft.synthesize(frames, samples.len())
        .into_iter()
        .map(|s| s.clamp(-1.0, 1.0))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::buffer::rms;
    use crate::engine::signal::generate_test_tone;
    use test_case::test_case;

    #[test_case(16 ; "below minimum")]
    #[test_case(0 ; "zero")]
    #[test_case(100 ; "not enumerated")]
    fn test_rejected_bitrates(bitrate: u32) {
        let err = CodecProfile::for_bitrate(bitrate).unwrap_err();
        assert!(err.to_string().contains("bitrate"));
    }

    #[test]
    fn test_all_supported_bitrates_have_profiles() {
        for bitrate in SUPPORTED_BITRATES {
            assert!(CodecProfile::for_bitrate(bitrate).is_ok());
        }
    }

    #[test]
    fn test_high_bitrate_is_transparent_in_band() {
        let tone = generate_test_tone(1000.0, 0.5, 44_100, 0.5);
        let profile = CodecProfile::for_bitrate(320).unwrap();
        let out = simulate(tone.channel(0), 44_100, &profile);
        assert_eq!(out.len(), tone.len());

        let err: Vec<f32> = out.iter().zip(tone.channel(0)).map(|(a, b)| a - b).collect();
        assert!(rms(&err) < 0.03 * rms(tone.channel(0)));
    }

    #[test]
    fn test_low_bitrate_band_limits() {
        let tone = generate_test_tone(7000.0, 0.5, 44_100, 0.5);
        let profile = CodecProfile::for_bitrate(32).unwrap();
        let out = simulate(tone.channel(0), 44_100, &profile);
        assert!(rms(&out[2000..20_000]) < 0.01);
    }

    #[test]
    fn test_lower_bitrate_adds_more_error() {
        let tone = generate_test_tone(440.0, 0.5, 16_000, 0.5);
        let error_at = |bitrate: u32| {
            let profile = CodecProfile::for_bitrate(bitrate).unwrap();
            let out = simulate(tone.channel(0), 16_000, &profile);
            let err: Vec<f32> = out.iter().zip(tone.channel(0)).map(|(a, b)| a - b).collect();
            rms(&err)
        };
        assert!(error_at(32) > error_at(320));
    }

    #[test]
    fn test_simulation_is_deterministic() {
        let tone = generate_test_tone(440.0, 0.25, 16_000, 0.5);
        let profile = CodecProfile::for_bitrate(64).unwrap();
        assert_eq!(
            simulate(tone.channel(0), 16_000, &profile),
            simulate(tone.channel(0), 16_000, &profile)
        );
    }
}
