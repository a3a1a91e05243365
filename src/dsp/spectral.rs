//! FFT helpers shared by the spectral manipulations and watermark methods

use std::f64::consts::PI;
use std::sync::Arc;

use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};

/// Smallest analysis frame used anywhere
pub const MIN_FRAME_SIZE: usize = 256;

/// Largest analysis frame used anywhere
pub const MAX_FRAME_SIZE: usize = 8192;

/// Power-of-two frame size closest (in log scale) to `seconds` of audio
pub fn frame_size_for(sample_rate: u32, seconds: f64) -> usize {
    let target = (sample_rate as f64 * seconds).max(1.0);
    let exponent = target.log2().round() as u32;
    (1usize << exponent).clamp(MIN_FRAME_SIZE, MAX_FRAME_SIZE)
}

/// Periodic Hann window
pub fn hann_window(size: usize) -> Vec<f64> {
    (0..size)
        .map(|n| 0.5 - 0.5 * (2.0 * PI * n as f64 / size as f64).cos())
        .collect()
}

/// Sine window; satisfies w[n]^2 + w[n + N/2]^2 = 1
pub fn sine_window(size: usize) -> Vec<f64> {
    (0..size)
        .map(|n| (PI * (n as f64 + 0.5) / size as f64).sin())
        .collect()
}

/// Wrap a phase into [-pi, pi)
#[inline]
pub fn wrap_phase(phase: f64) -> f64 {
    (phase + PI).rem_euclid(2.0 * PI) - PI
}

/// Forward/inverse FFT pair for real signals of one size
pub struct FftProcessor {
    size: usize,
    forward: Arc<dyn Fft<f64>>,
    inverse: Arc<dyn Fft<f64>>,
}

impl FftProcessor {
    pub fn new(size: usize) -> Self {
        let mut planner = FftPlanner::new();
        Self {
            size,
            forward: planner.plan_fft_forward(size),
            inverse: planner.plan_fft_inverse(size),
        }
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Number of non-redundant bins (DC through Nyquist)
    #[inline]
    pub fn num_bins(&self) -> usize {
        self.size / 2 + 1
    }

    /// Centre frequency of bin `k`
    #[inline]
    pub fn bin_frequency(&self, k: usize, sample_rate: u32) -> f64 {
        k as f64 * sample_rate as f64 / self.size as f64
    }

    /// Full complex spectrum of a real frame, optionally windowed
    ///
    /// Frames shorter than the FFT size are zero-padded.
    pub fn forward_real(&self, frame: &[f64], window: Option<&[f64]>) -> Vec<Complex<f64>> {
        let mut spectrum: Vec<Complex<f64>> = (0..self.size)
            .map(|n| {
                let sample = frame.get(n).copied().unwrap_or(0.0);
                let w = window.map(|w| w[n]).unwrap_or(1.0);
                Complex::new(sample * w, 0.0)
            })
            .collect();
        self.forward.process(&mut spectrum);
        spectrum
    }

    /// Real frame from a spectrum whose bins 0..=N/2 are authoritative
    ///
    /// The upper half is rebuilt as the complex conjugate mirror so the
    /// output is real. Scaled by 1/N.
    pub fn inverse_real(&self, spectrum: &mut [Complex<f64>]) -> Vec<f64> {
        mirror_hermitian(spectrum);
        self.inverse.process(spectrum);
        let norm = self.size as f64;
        spectrum.iter().map(|c| c.re / norm).collect()
    }
}

/// Rebuild the upper half of a spectrum from the lower half
pub fn mirror_hermitian(spectrum: &mut [Complex<f64>]) {
    let n = spectrum.len();
    if n == 0 {
        return;
    }
    spectrum[0].im = 0.0;
    if n % 2 == 0 {
        spectrum[n / 2].im = 0.0;
    }
    for k in 1..(n + 1) / 2 {
        spectrum[n - k] = spectrum[k].conj();
    }
}

/// Short-time Fourier analysis/synthesis with a fixed window and hop
pub struct Stft {
    fft: FftProcessor,
    hop: usize,
    analysis: Vec<f64>,
    synthesis: Vec<f64>,
}

impl Stft {
    /// Hann analysis and synthesis
    pub fn hann(size: usize, hop: usize) -> Self {
        let window = hann_window(size);
        Self {
            fft: FftProcessor::new(size),
            hop,
            analysis: window.clone(),
            synthesis: window,
        }
    }

    /// Sine analysis and synthesis (perfect reconstruction at hop N/2)
    pub fn sine(size: usize) -> Self {
        let window = sine_window(size);
        Self {
            fft: FftProcessor::new(size),
            hop: size / 2,
            analysis: window.clone(),
            synthesis: window,
        }
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.fft.size()
    }

    #[inline]
    pub fn hop(&self) -> usize {
        self.hop
    }

    #[inline]
    pub fn fft(&self) -> &FftProcessor {
        &self.fft
    }

    /// Analyse a signal, padded by N/2 at the front so frame `t` is centred
    /// on sample `t * hop`
    pub fn analyze(&self, samples: &[f32]) -> Vec<Vec<Complex<f64>>> {
        let size = self.size();
        let half = size / 2;
        let num_frames = samples.len() / self.hop + 1;

        let mut padded = vec![0.0_f64; half];
        padded.extend(samples.iter().map(|&s| s as f64));
        padded.resize((num_frames - 1) * self.hop + size, 0.0);

        (0..num_frames)
            .map(|t| {
                let start = t * self.hop;
                self.fft
                    .forward_real(&padded[start..start + size], Some(&self.analysis))
            })
            .collect()
    }

    /// Overlap-add synthesis of `frames`, normalized by the summed squared
    /// window, returning `out_len` samples
    pub fn synthesize(&self, frames: Vec<Vec<Complex<f64>>>, out_len: usize) -> Vec<f32> {
        let size = self.size();
        let half = size / 2;
        let total = (frames.len().max(1) - 1) * self.hop + size;

        let mut output = vec![0.0_f64; total.max(out_len + half)];
        let mut weight = vec![0.0_f64; output.len()];

        for (t, mut spectrum) in frames.into_iter().enumerate() {
            let start = t * self.hop;
            let frame = self.fft.inverse_real(&mut spectrum);
            for n in 0..size {
                output[start + n] += frame[n] * self.synthesis[n];
                weight[start + n] += self.analysis[n] * self.synthesis[n];
            }
        }

        (0..out_len)
            .map(|i| {
                let w = weight[i + half];
                if w > 1e-8 {
                    (output[i + half] / w) as f32
                } else {
                    0.0
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::signal::generate_test_tone;

    #[test]
    fn test_frame_size_for() {
        assert_eq!(frame_size_for(16_000, 0.032), 512);
        assert_eq!(frame_size_for(48_000, 0.046), 2048);
        assert_eq!(frame_size_for(8_000, 0.001), MIN_FRAME_SIZE);
    }

    #[test]
    fn test_sine_window_power_complementary() {
        let w = sine_window(512);
        for n in 0..256 {
            assert!((w[n] * w[n] + w[n + 256] * w[n + 256] - 1.0).abs() < 1e-12);
        }
    }

    #[test]
    fn test_fft_roundtrip() {
        let fft = FftProcessor::new(256);
        let frame: Vec<f64> = (0..256).map(|n| ((n * 7) % 13) as f64 / 13.0 - 0.5).collect();
        let mut spectrum = fft.forward_real(&frame, None);
        let back = fft.inverse_real(&mut spectrum);
        for (a, b) in frame.iter().zip(back.iter()) {
            assert!((a - b).abs() < 1e-12);
        }
    }

    #[test]
    fn test_wrap_phase() {
        assert!((wrap_phase(3.0 * PI) - (-PI)).abs() < 1e-12);
        assert!((wrap_phase(0.5) - 0.5).abs() < 1e-12);
        assert!((wrap_phase(-0.5 - 2.0 * PI) + 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_stft_reconstruction() {
        let tone = generate_test_tone(440.0, 0.25, 16_000, 0.5);
        for stft in [Stft::sine(512), Stft::hann(1024, 256)] {
            let frames = stft.analyze(tone.channel(0));
            let out = stft.synthesize(frames, tone.len());
            assert_eq!(out.len(), tone.len());
            for (a, b) in tone.channel(0).iter().zip(out.iter()) {
                assert!((a - b).abs() < 1e-5);
            }
        }
    }
}
