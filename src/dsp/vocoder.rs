//! Phase vocoder time-stretch and pitch-shift
//!
//! Time-stretch resamples the STFT along the time axis: magnitudes are
//! interpolated between neighbouring analysis frames and phases are
//! accumulated from each bin's measured instantaneous frequency so partials
//! stay coherent. Pitch-shift stretches by the pitch ratio and resamples the
//! result back to the original length.

use std::f64::consts::PI;

use rustfft::num_complex::Complex;

use crate::dsp::resample::resample_to_length;
use crate::dsp::spectral::{frame_size_for, wrap_phase, Stft};
use crate::error::Result;

/// Analysis frame duration
const FRAME_SECONDS: f64 = 0.046;

/// Frames overlap by three quarters
const HOP_DIVISOR: usize = 4;

/// Output length of a stretch by `rate` (> 1 is faster/shorter)
pub fn stretched_len(len: usize, rate: f64) -> usize {
    ((len as f64) / rate).round() as usize
}

/// Change duration by `1 / rate` without changing pitch
///
/// `rate` must be finite and positive; the caller validates it.
pub fn time_stretch(samples: &[f32], rate: f64, sample_rate: u32) -> Vec<f32> {
    let out_len = stretched_len(samples.len(), rate);
    if samples.is_empty() || out_len == 0 {
        return vec![0.0; out_len];
    }

    let size = frame_size_for(sample_rate, FRAME_SECONDS);
    let hop = size / HOP_DIVISOR;
    let stft = Stft::hann(size, hop);
    let num_bins = size / 2 + 1;

    let frames = stft.analyze(samples);
    let num_frames = frames.len();

    // Expected phase advance per hop for each bin
    let advance: Vec<f64> = (0..num_bins)
        .map(|k| 2.0 * PI * hop as f64 * k as f64 / size as f64)
        .collect();

    let mut phase: Vec<f64> = frames[0][..num_bins].iter().map(|c| c.arg()).collect();
    let zero = vec![Complex::new(0.0, 0.0); size];

    let out_frames = stretched_len(num_frames, rate).max(1);
    let mut output = Vec::with_capacity(out_frames);

    for step in 0..out_frames {
        let position = step as f64 * rate;
        let index = position.floor() as usize;
        let alpha = position - index as f64;

        let current = frames.get(index).unwrap_or(&zero);
        let next = frames.get(index + 1).unwrap_or(&zero);

        let mut spectrum = vec![Complex::new(0.0, 0.0); size];
        for k in 0..num_bins {
            let magnitude = (1.0 - alpha) * current[k].norm() + alpha * next[k].norm();
            spectrum[k] = Complex::from_polar(magnitude, phase[k]);

            let delta = next[k].arg() - current[k].arg() - advance[k];
            phase[k] += advance[k] + wrap_phase(delta);
        }
        output.push(spectrum);
    }

    stft.synthesize(output, out_len)
}

/// Shift pitch by `semitones` keeping the original length
///
/// # Errors
/// * `InternalProcessingFailure` - If the squeeze-back resample fails
pub fn pitch_shift(samples: &[f32], semitones: f64, sample_rate: u32) -> Result<Vec<f32>> {
    let len = samples.len();
    if len == 0 {
        return Ok(Vec::new());
    }
    let ratio = 2.0_f64.powf(semitones / 12.0);

    // Stretch to len * ratio, then squeeze back: pitch scales by ratio
    let stretched = time_stretch(samples, 1.0 / ratio, sample_rate);
    if stretched.is_empty() {
        return Ok(vec![0.0; len]);
    }
    let squeeze = len as f64 / stretched.len() as f64;
    resample_to_length(&stretched, squeeze, len)
}
