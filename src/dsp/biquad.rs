//! Butterworth filters
//!
//! Low-pass and high-pass Butterworth filters of any order, built as a
//! cascade of biquad sections (plus one first-order section for odd orders)
//! and run forward then backward for zero phase shift.

use std::f64::consts::PI;

use rustfft::num_complex::Complex;
use serde::{Deserialize, Serialize};

use crate::error::{Result, WmError};

/// Order used by the lowpass/highpass manipulations
pub const BUTTERWORTH_ORDER: usize = 5;

/// Filter response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PassType {
    /// Remove above cutoff
    LowPass,
    /// Remove below cutoff
    HighPass,
}

/// Biquad filter coefficients
/// Transfer function: H(z) = (b0 + b1*z^-1 + b2*z^-2) / (1 + a1*z^-1 + a2*z^-2)
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BiquadCoeffs {
    pub b0: f64,
    pub b1: f64,
    pub b2: f64,
    pub a1: f64,
    pub a2: f64,
}

impl BiquadCoeffs {
    /// Second-order section using Audio EQ Cookbook formulas
    /// Reference: https://www.w3.org/2011/audio/audio-eq-cookbook.html
    pub fn second_order(pass: PassType, sample_rate: f64, frequency: f64, q: f64) -> Self {
        let w0 = 2.0 * PI * frequency / sample_rate;
        let cos_w0 = w0.cos();
        let alpha = w0.sin() / (2.0 * q);

        let (b0, b1, b2) = match pass {
            PassType::LowPass => ((1.0 - cos_w0) / 2.0, 1.0 - cos_w0, (1.0 - cos_w0) / 2.0),
            PassType::HighPass => ((1.0 + cos_w0) / 2.0, -(1.0 + cos_w0), (1.0 + cos_w0) / 2.0),
        };
        let a0 = 1.0 + alpha;

        BiquadCoeffs {
            b0: b0 / a0,
            b1: b1 / a0,
            b2: b2 / a0,
            a1: -2.0 * cos_w0 / a0,
            a2: (1.0 - alpha) / a0,
        }
    }

    /// First-order section from the bilinear transform with prewarping
    pub fn first_order(pass: PassType, sample_rate: f64, frequency: f64) -> Self {
        let k = (PI * frequency / sample_rate).tan();
        let norm = 1.0 / (k + 1.0);
        let (b0, b1) = match pass {
            PassType::LowPass => (k * norm, k * norm),
            PassType::HighPass => (norm, -norm),
        };
        BiquadCoeffs {
            b0,
            b1,
            b2: 0.0,
            a1: (k - 1.0) * norm,
            a2: 0.0,
        }
    }

    /// Complex response at normalized angular frequency `w` (radians/sample)
    fn response(&self, w: f64) -> Complex<f64> {
        let z1 = Complex::from_polar(1.0, -w);
        let z2 = z1 * z1;
        let num = Complex::new(self.b0, 0.0) + z1 * self.b1 + z2 * self.b2;
        let den = Complex::new(1.0, 0.0) + z1 * self.a1 + z2 * self.a2;
        num / den
    }
}

/// Biquad filter state for one pass over one channel
#[derive(Debug, Clone, Copy, Default)]
struct BiquadState {
    x1: f64, // x[n-1]
    x2: f64, // x[n-2]
    y1: f64, // y[n-1]
    y2: f64, // y[n-2]
}

impl BiquadState {
    /// Process a single sample (Direct Form I)
    fn process(&mut self, input: f64, coeffs: &BiquadCoeffs) -> f64 {
        let output = coeffs.b0 * input + coeffs.b1 * self.x1 + coeffs.b2 * self.x2
            - coeffs.a1 * self.y1
            - coeffs.a2 * self.y2;

        self.x2 = self.x1;
        self.x1 = input;
        self.y2 = self.y1;
        self.y1 = output;

        output
    }
}

/// Butterworth low/high-pass as a cascade of sections
#[derive(Debug, Clone)]
pub struct ButterworthFilter {
    pass: PassType,
    order: usize,
    cutoff_hz: f64,
    sample_rate: f64,
    sections: Vec<BiquadCoeffs>,
}

impl ButterworthFilter {
    /// Design a filter
    ///
    /// # Arguments
    /// * `pass` - Low-pass or high-pass
    /// * `order` - Filter order (1 or more)
    /// * `cutoff_hz` - -3 dB frequency
    /// * `sample_rate` - Sample rate in Hz
    ///
    /// # Errors
    /// * `InvalidParameter` - If `cutoff_hz` is not strictly between 0 and Nyquist
    pub fn new(pass: PassType, order: usize, cutoff_hz: f64, sample_rate: u32) -> Result<Self> {
        let nyquist = sample_rate as f64 / 2.0;
        if !cutoff_hz.is_finite() || cutoff_hz <= 0.0 || cutoff_hz >= nyquist {
            return Err(WmError::invalid(
                "cutoff",
                format!(
                    "{} Hz must lie strictly between 0 and the Nyquist frequency {} Hz",
                    cutoff_hz, nyquist
                ),
            ));
        }
        if order == 0 {
            return Err(WmError::invalid("order", "must be at least 1"));
        }

        let fs = sample_rate as f64;
        let odd = order % 2;
        let mut sections: Vec<BiquadCoeffs> = (0..order / 2)
            .map(|k| {
                // Pole-pair angle from the negative real axis
                let angle = PI * (2 * k + 1 + odd) as f64 / (2 * order) as f64;
                let q = 1.0 / (2.0 * angle.cos());
                BiquadCoeffs::second_order(pass, fs, cutoff_hz, q)
            })
            .collect();
        if odd == 1 {
            sections.push(BiquadCoeffs::first_order(pass, fs, cutoff_hz));
        }

        Ok(Self {
            pass,
            order,
            cutoff_hz,
            sample_rate: fs,
            sections,
        })
    }

    pub fn pass(&self) -> PassType {
        self.pass
    }

    pub fn order(&self) -> usize {
        self.order
    }

    /// Magnitude of the single-pass response at `freq_hz`
    pub fn magnitude_at(&self, freq_hz: f64) -> f64 {
        let w = 2.0 * PI * freq_hz / self.sample_rate;
        self.sections
            .iter()
            .map(|s| s.response(w).norm())
            .product()
    }

    /// Causal filtering from rest
    pub fn filter(&self, input: &[f64]) -> Vec<f64> {
        let mut data = input.to_vec();
        for coeffs in &self.sections {
            let mut state = BiquadState::default();
            for sample in data.iter_mut() {
                *sample = state.process(*sample, coeffs);
            }
        }
        data
    }

    /// Zero-phase filtering (forward, then backward)
    ///
    /// The signal is extended at both ends by odd reflection so the start-up
    /// transients fall outside the returned range. The effective magnitude
    /// response is the single-pass response squared.
    pub fn filtfilt(&self, input: &[f32]) -> Vec<f32> {
        let n = input.len();
        if n == 0 {
            return Vec::new();
        }

        let settle = (3.0 * self.sample_rate / self.cutoff_hz).ceil() as usize;
        let pad = (3 * (self.order + 1) + settle).min(n - 1);

        let first = input[0] as f64;
        let last = input[n - 1] as f64;
        let mut extended = Vec::with_capacity(n + 2 * pad);
        extended.extend((1..=pad).rev().map(|i| 2.0 * first - input[i] as f64));
        extended.extend(input.iter().map(|&s| s as f64));
        extended.extend((1..=pad).map(|i| 2.0 * last - input[n - 1 - i] as f64));

        let mut forward = self.filter(&extended);
        forward.reverse();
        let mut backward = self.filter(&forward);
        backward.reverse();

        backward[pad..pad + n].iter().map(|&s| s as f32).collect()
    }
}
