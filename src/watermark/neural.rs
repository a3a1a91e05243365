//! Neural ("AudioSeal"-style) watermark
//!
//! The model is a keyed carrier: a fixed set of tones spread over 500-2500 Hz
//! with seeded phases. Audio is cut into quarter-second frames and each frame
//! receives the carrier with the sign of one bit of the model's 16-bit
//! signature, at an amplitude that follows the frame's own RMS down to an
//! absolute floor. Detection correlates each frame against the carrier,
//! undoes the signature sign and averages, which cancels any host content
//! that happens to correlate with the carrier.
//!
//! The payload is fixed by the model; caller payloads are ignored.

use std::f64::consts::PI;

use log::debug;
use once_cell::sync::Lazy;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rustfft::num_complex::Complex;

use super::Detection;
use crate::engine::buffer::{rms, AudioBuffer};
use crate::error::{Result, WmError};

// ============================================================================
// Constants
// ============================================================================

const NUM_TONES: usize = 48;
const BAND_LOW_HZ: f64 = 500.0;
const BAND_HIGH_HZ: f64 = 2500.0;

/// Carrier band is compressed below this fraction of the sample rate
const MAX_BAND_FRACTION: f64 = 0.4;

const MODEL_SEED: u64 = 0x4155_4449_4f53_4541;

/// Every adjacent bit pair differs, so even-length runs of frames sum to zero
pub const SIGNATURE: u16 = 0b1001_1010_0101_1001;
const SIGNATURE_BITS: usize = 16;

pub const FRAME_SECONDS: f64 = 0.25;
pub const MIN_FRAMES: usize = 2;

/// Watermark RMS relative to the frame RMS
const STRENGTH: f64 = 0.1;

/// Watermark RMS on silent or very quiet frames (about -50 dBFS)
const AMPLITUDE_FLOOR: f64 = 0.003;

const TAPER_FRACTION: f64 = 0.05;

/// Phasors are recomputed exactly at this interval
const RESYNC_INTERVAL: usize = 4096;

/// Logistic calibration of the mean correlation
const DECISION_CENTER: f64 = 0.04;
const DECISION_SCALE: f64 = 0.01;

pub const DETECTION_THRESHOLD: f64 = 0.5;

// ============================================================================
// Model
// ============================================================================

#[derive(Debug, Clone, Copy)]
struct Tone {
    frequency_hz: f64,
    phase: f64,
}

/// Carrier definition shared by every embed and detect call
#[derive(Debug)]
pub struct NeuralModel {
    tones: Vec<Tone>,
    signature: u16,
}

static MODEL: Lazy<NeuralModel> = Lazy::new(|| {
    debug!("Initializing neural watermark model");
    NeuralModel::generate(MODEL_SEED)
});

/// The process-wide model, built on first use
pub fn model() -> &'static NeuralModel {
    &MODEL
}

impl NeuralModel {
    fn generate(seed: u64) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let tones = (0..NUM_TONES)
            .map(|_| Tone {
                frequency_hz: rng.gen_range(BAND_LOW_HZ..BAND_HIGH_HZ),
                phase: rng.gen_range(0.0..2.0 * PI),
            })
            .collect();
        Self {
            tones,
            signature: SIGNATURE,
        }
    }

    /// Signature sign for frame `index`
    pub fn frame_sign(&self, index: usize) -> f64 {
        let bit = (self.signature >> (SIGNATURE_BITS - 1 - index % SIGNATURE_BITS)) & 1;
        if bit == 1 {
            1.0
        } else {
            -1.0
        }
    }

    /// Unit-RMS carrier of `len` samples at `sample_rate`
    pub fn carrier(&self, sample_rate: u32, len: usize) -> Vec<f64> {
        let fs = sample_rate as f64;
        let band_scale = if BAND_HIGH_HZ > MAX_BAND_FRACTION * fs {
            MAX_BAND_FRACTION * fs / BAND_HIGH_HZ
        } else {
            1.0
        };

        let mut carrier = vec![0.0_f64; len];
        for tone in &self.tones {
            let omega = 2.0 * PI * tone.frequency_hz * band_scale / fs;
            let step = Complex::from_polar(1.0, omega);
            let mut phasor = Complex::new(0.0, 0.0);
            for (n, value) in carrier.iter_mut().enumerate() {
                if n % RESYNC_INTERVAL == 0 {
                    phasor = Complex::from_polar(1.0, tone.phase + omega * n as f64);
                }
                *value += phasor.im;
                phasor *= step;
            }
        }

        let norm = 1.0 / (NUM_TONES as f64 / 2.0).sqrt();
        carrier.iter_mut().for_each(|v| *v *= norm);
        carrier
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Frame length in samples
pub fn frame_len(sample_rate: u32) -> usize {
    ((FRAME_SECONDS * sample_rate as f64).round() as usize).max(1)
}

/// Shortest input the method accepts
pub fn min_duration_secs(sample_rate: u32) -> f64 {
    (MIN_FRAMES * frame_len(sample_rate)) as f64 / sample_rate as f64
}

fn check_length(buffer: &AudioBuffer) -> Result<()> {
    let min_samples = MIN_FRAMES * frame_len(buffer.sample_rate);
    if buffer.len() < min_samples {
        return Err(WmError::AudioTooShort {
            duration_secs: buffer.duration_secs(),
            min_secs: min_duration_secs(buffer.sample_rate),
            method: "neural".to_string(),
        });
    }
    Ok(())
}

/// Tukey taper so sign flips between frames do not click
fn taper(len: usize) -> Vec<f64> {
    let edge = ((TAPER_FRACTION * len as f64) as usize).max(1);
    (0..len)
        .map(|n| {
            let distance = n.min(len - 1 - n);
            if distance >= edge {
                1.0
            } else {
                0.5 - 0.5 * (PI * distance as f64 / edge as f64).cos()
            }
        })
        .collect()
}

// ============================================================================
// Embed / Detect
// ============================================================================

/// Add the model carrier to every channel
///
/// # Errors
/// * `AudioTooShort` - If the input is shorter than two frames
pub fn embed(buffer: &AudioBuffer) -> Result<AudioBuffer> {
    check_length(buffer)?;
    let model = model();
    let frame = frame_len(buffer.sample_rate);
    let carrier = model.carrier(buffer.sample_rate, buffer.len());

    let output = buffer.map_channels(|samples| {
        let mut out = Vec::with_capacity(samples.len());
        for (index, chunk) in samples.chunks(frame).enumerate() {
            let start = index * frame;
            let gain = (STRENGTH * rms(chunk)).max(AMPLITUDE_FLOOR) * model.frame_sign(index);
            let window = taper(chunk.len());
            out.extend(chunk.iter().enumerate().map(|(i, &x)| {
                let marked = x as f64 + gain * window[i] * carrier[start + i];
                marked.clamp(-1.0, 1.0) as f32
            }));
        }
        Ok(out)
    })?;

    output.ensure_finite("neural embed")?;
    Ok(output)
}

/// Mean signed correlation between frames and the carrier
pub fn score(buffer: &AudioBuffer) -> f64 {
    let model = model();
    let frame = frame_len(buffer.sample_rate);
    let carrier = model.carrier(buffer.sample_rate, buffer.len());

    let mut total = 0.0;
    let mut count = 0usize;
    for channel in &buffer.samples {
        for (index, chunk) in channel.chunks(frame).enumerate() {
            // A short tail adds more noise than evidence
            if chunk.len() * 2 < frame {
                continue;
            }
            let reference = &carrier[index * frame..index * frame + chunk.len()];
            let (mut dot, mut energy_x, mut energy_c) = (0.0, 0.0, 0.0);
            for (&x, &c) in chunk.iter().zip(reference) {
                let x = x as f64;
                dot += x * c;
                energy_x += x * x;
                energy_c += c * c;
            }
            if energy_x > 0.0 && energy_c > 0.0 {
                total += model.frame_sign(index) * dot / (energy_x.sqrt() * energy_c.sqrt());
            }
            count += 1;
        }
    }

    if count == 0 {
        0.0
    } else {
        total / count as f64
    }
}

/// Map a correlation score onto [0, 1]
pub fn calibrate(score: f64) -> f64 {
    1.0 / (1.0 + (-(score - DECISION_CENTER) / DECISION_SCALE).exp())
}

/// Look for the model carrier
///
/// # Errors
/// * `AudioTooShort` - If the input is shorter than two frames
pub fn detect(buffer: &AudioBuffer) -> Result<Detection> {
    check_length(buffer)?;
    let score = score(buffer);
    let confidence = calibrate(score);
    debug!("Neural detection score {:.4} -> confidence {:.4}", score, confidence);

    Ok(Detection {
        present: confidence >= DETECTION_THRESHOLD,
        confidence,
        payload: None,
    })
}

// ============================================================================
// Tests
// ============================================================================
