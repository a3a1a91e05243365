//! Manipulation Engine
//!
//! Deterministic transforms used to test watermark robustness. Each kind
//! has a typed parameter record parsed from a string-keyed JSON map;
//! missing keys take defaults, anything outside a kind's domain is rejected
//! with `InvalidParameter` naming the key. Noise, gain and the filters
//! clamp their output to [-1, 1].

pub mod params;

use std::fmt;
use std::str::FromStr;

use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::config::DEFAULT_MAX_DURATION_SECS;
use crate::dsp::biquad::{ButterworthFilter, PassType, BUTTERWORTH_ORDER};
use crate::dsp::codec_sim::{self, CodecProfile};
use crate::dsp::noise::add_noise;
use crate::dsp::resample::{resample_buffer, resampled_len};
use crate::dsp::vocoder::{pitch_shift, stretched_len, time_stretch};
use crate::engine::buffer::{db_to_linear, AudioBuffer, MAX_SAMPLE_RATE, MIN_SAMPLE_RATE};
use crate::error::{Result, WmError};

pub use params::Parameters;
use params::{get_f64, get_u32, get_u64, reject_unknown};

// ============================================================================
// Constants
// ============================================================================

pub const DEFAULT_SNR_DB: f64 = 20.0;
pub const DEFAULT_BITRATE_KBPS: u32 = 128;
pub const DEFAULT_RESAMPLE_RATE: u32 = 16_000;
pub const DEFAULT_LOWPASS_HZ: f64 = 3_000.0;
pub const DEFAULT_HIGHPASS_HZ: f64 = 300.0;

/// Largest pitch shift accepted, in semitones
pub const MAX_PITCH_STEPS: f64 = 48.0;

// ============================================================================
// Manipulation Kind
// ============================================================================

/// The closed set of manipulation kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ManipulationKind {
    Noise,
    Compression,
    Gain,
    Resample,
    Lowpass,
    Highpass,
    TimeStretch,
    PitchShift,
}

impl ManipulationKind {
    pub const ALL: [ManipulationKind; 8] = [
        ManipulationKind::Noise,
        ManipulationKind::Compression,
        ManipulationKind::Gain,
        ManipulationKind::Resample,
        ManipulationKind::Lowpass,
        ManipulationKind::Highpass,
        ManipulationKind::TimeStretch,
        ManipulationKind::PitchShift,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ManipulationKind::Noise => "noise",
            ManipulationKind::Compression => "compression",
            ManipulationKind::Gain => "gain",
            ManipulationKind::Resample => "resample",
            ManipulationKind::Lowpass => "lowpass",
            ManipulationKind::Highpass => "highpass",
            ManipulationKind::TimeStretch => "timestretch",
            ManipulationKind::PitchShift => "pitchshift",
        }
    }

    /// Accepted parameter keys
    pub fn parameter_keys(&self) -> &'static [&'static str] {
        match self {
            ManipulationKind::Noise => &["snr", "snr_db", "seed"],
            ManipulationKind::Compression => &["bitrate", "bitrate_kbps"],
            ManipulationKind::Gain => &["gain_db", "gain"],
            ManipulationKind::Resample => &["sample_rate", "target_sr"],
            ManipulationKind::Lowpass | ManipulationKind::Highpass => &["cutoff", "cutoff_hz"],
            ManipulationKind::TimeStretch => &["rate"],
            ManipulationKind::PitchShift => &["steps", "semitones"],
        }
    }
}

impl fmt::Display for ManipulationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ManipulationKind {
    type Err = WmError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "noise" => Ok(ManipulationKind::Noise),
            "compression" | "mp3" => Ok(ManipulationKind::Compression),
            "gain" => Ok(ManipulationKind::Gain),
            "resample" => Ok(ManipulationKind::Resample),
            "lowpass" => Ok(ManipulationKind::Lowpass),
            "highpass" => Ok(ManipulationKind::Highpass),
            "timestretch" | "time-stretch" | "time_stretch" => Ok(ManipulationKind::TimeStretch),
            "pitchshift" | "pitch-shift" | "pitch_shift" => Ok(ManipulationKind::PitchShift),
            other => Err(WmError::invalid(
                "kind",
                format!("unknown manipulation '{}'", other),
            )),
        }
    }
}

// ============================================================================
// Manipulation
// ============================================================================

/// A manipulation with validated, typed parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Manipulation {
    Noise { snr_db: f64, seed: u64 },
    Compression { bitrate_kbps: u32 },
    Gain { gain_db: f64 },
    Resample { sample_rate: u32 },
    Lowpass { cutoff_hz: f64 },
    Highpass { cutoff_hz: f64 },
    TimeStretch { rate: f64 },
    PitchShift { semitones: f64 },
}

impl Manipulation {
    /// Parse and validate parameters for `kind`
    ///
    /// Checks that do not depend on the audio happen here, so bad requests
    /// fail before anything is decoded.
    ///
    /// # Errors
    /// * `InvalidParameter` - Unknown key, wrong type or out-of-domain value
    pub fn from_params(kind: ManipulationKind, params: &Parameters) -> Result<Self> {
        reject_unknown(params, kind.parameter_keys())?;

        let manipulation = match kind {
            ManipulationKind::Noise => Manipulation::Noise {
                snr_db: get_f64(params, "snr", Some("snr_db"), DEFAULT_SNR_DB)?,
                seed: get_u64(params, "seed", None, 0)?,
            },
            ManipulationKind::Compression => {
                let bitrate_kbps =
                    get_u32(params, "bitrate", Some("bitrate_kbps"), DEFAULT_BITRATE_KBPS)?;
                CodecProfile::for_bitrate(bitrate_kbps)?;
                Manipulation::Compression { bitrate_kbps }
            }
            ManipulationKind::Gain => Manipulation::Gain {
                gain_db: get_f64(params, "gain_db", Some("gain"), 0.0)?,
            },
            ManipulationKind::Resample => {
                let sample_rate =
                    get_u32(params, "sample_rate", Some("target_sr"), DEFAULT_RESAMPLE_RATE)?;
                if !(MIN_SAMPLE_RATE..=MAX_SAMPLE_RATE).contains(&sample_rate) {
                    return Err(WmError::invalid(
                        "sample_rate",
                        format!(
                            "{} Hz outside {}..={} Hz",
                            sample_rate, MIN_SAMPLE_RATE, MAX_SAMPLE_RATE
                        ),
                    ));
                }
                Manipulation::Resample { sample_rate }
            }
            ManipulationKind::Lowpass => Manipulation::Lowpass {
                cutoff_hz: positive_cutoff(params, DEFAULT_LOWPASS_HZ)?,
            },
            ManipulationKind::Highpass => Manipulation::Highpass {
                cutoff_hz: positive_cutoff(params, DEFAULT_HIGHPASS_HZ)?,
            },
            ManipulationKind::TimeStretch => {
                let rate = get_f64(params, "rate", None, 1.0)?;
                if rate <= 0.0 {
                    return Err(WmError::invalid("rate", format!("{} must be above 0", rate)));
                }
                Manipulation::TimeStretch { rate }
            }
            ManipulationKind::PitchShift => {
                let semitones = get_f64(params, "steps", Some("semitones"), 0.0)?;
                if semitones.abs() > MAX_PITCH_STEPS {
                    return Err(WmError::invalid(
                        "steps",
                        format!("{} exceeds +/-{} semitones", semitones, MAX_PITCH_STEPS),
                    ));
                }
                Manipulation::PitchShift { semitones }
            }
        };
        Ok(manipulation)
    }

    pub fn kind(&self) -> ManipulationKind {
        match self {
            Manipulation::Noise { .. } => ManipulationKind::Noise,
            Manipulation::Compression { .. } => ManipulationKind::Compression,
            Manipulation::Gain { .. } => ManipulationKind::Gain,
            Manipulation::Resample { .. } => ManipulationKind::Resample,
            Manipulation::Lowpass { .. } => ManipulationKind::Lowpass,
            Manipulation::Highpass { .. } => ManipulationKind::Highpass,
            Manipulation::TimeStretch { .. } => ManipulationKind::TimeStretch,
            Manipulation::PitchShift { .. } => ManipulationKind::PitchShift,
        }
    }

    /// Canonical parameter map, defaults filled in
    ///
    /// Parsing the result with [`Manipulation::from_params`] gives back the
    /// same manipulation, which is what the catalog records.
    pub fn to_params(&self) -> Parameters {
        let value = match *self {
            Manipulation::Noise { snr_db, seed } => json!({ "snr": snr_db, "seed": seed }),
            Manipulation::Compression { bitrate_kbps } => json!({ "bitrate": bitrate_kbps }),
            Manipulation::Gain { gain_db } => json!({ "gain_db": gain_db }),
            Manipulation::Resample { sample_rate } => json!({ "sample_rate": sample_rate }),
            Manipulation::Lowpass { cutoff_hz } | Manipulation::Highpass { cutoff_hz } => {
                json!({ "cutoff": cutoff_hz })
            }
            Manipulation::TimeStretch { rate } => json!({ "rate": rate }),
            Manipulation::PitchShift { semitones } => json!({ "steps": semitones }),
        };
        match value {
            Value::Object(map) => map,
            _ => Parameters::new(),
        }
    }

    /// Checks that depend on the buffer being processed
    ///
    /// # Errors
    /// * `InvalidParameter` - Cutoff at or above Nyquist, an output longer
    ///   than `max_duration_secs`, or an output with no frames
    pub fn validate_for(&self, buffer: &AudioBuffer, max_duration_secs: f64) -> Result<()> {
        match *self {
            Manipulation::Lowpass { cutoff_hz } | Manipulation::Highpass { cutoff_hz } => {
                if cutoff_hz >= buffer.nyquist() {
                    return Err(WmError::invalid(
                        "cutoff",
                        format!(
                            "{} Hz must lie strictly between 0 and the Nyquist frequency {} Hz",
                            cutoff_hz,
                            buffer.nyquist()
                        ),
                    ));
                }
            }
            Manipulation::Resample { sample_rate } => {
                if resampled_len(buffer.len(), buffer.sample_rate, sample_rate) == 0 {
                    return Err(WmError::invalid(
                        "sample_rate",
                        format!(
                            "{} frames at {} Hz leave no frames at {} Hz",
                            buffer.len(),
                            buffer.sample_rate,
                            sample_rate
                        ),
                    ));
                }
            }
            Manipulation::TimeStretch { rate } => {
                if stretched_len(buffer.len(), rate) == 0 {
                    return Err(WmError::invalid(
                        "rate",
                        format!("{} frames stretched by {} leave no frames", buffer.len(), rate),
                    ));
                }
                let output_secs = buffer.duration_secs() / rate;
                if output_secs > max_duration_secs {
                    return Err(WmError::invalid(
                        "rate",
                        format!(
                            "output would last {:.1}s, above the {:.1}s limit",
                            output_secs, max_duration_secs
                        ),
                    ));
                }
            }
            Manipulation::PitchShift { semitones } => {
                // The vocoder works on an intermediate stretched copy
                let ratio = 2.0_f64.powf(semitones / 12.0);
                if stretched_len(buffer.len(), 1.0 / ratio) == 0 {
                    return Err(WmError::invalid(
                        "steps",
                        format!(
                            "{} frames shifted by {} semitones leave no frames",
                            buffer.len(),
                            semitones
                        ),
                    ));
                }
                let intermediate = buffer.duration_secs() * ratio;
                if intermediate > max_duration_secs {
                    return Err(WmError::invalid(
                        "steps",
                        format!(
                            "shift needs {:.1}s of intermediate audio, above the {:.1}s limit",
                            intermediate, max_duration_secs
                        ),
                    ));
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Apply with the default duration limit
    pub fn apply(&self, buffer: &AudioBuffer) -> Result<AudioBuffer> {
        self.apply_with_limit(buffer, DEFAULT_MAX_DURATION_SECS)
    }

    /// Apply to every channel
    ///
    /// # Errors
    /// * `InvalidParameter` - See [`Manipulation::validate_for`]
    /// * `InternalProcessingFailure` - If the transform produced non-finite
    ///   samples or changed the channel count
    pub fn apply_with_limit(
        &self,
        buffer: &AudioBuffer,
        max_duration_secs: f64,
    ) -> Result<AudioBuffer> {
        self.validate_for(buffer, max_duration_secs)?;
        debug!("Applying {} with {:?}", self.kind(), self.to_params());

        let sample_rate = buffer.sample_rate;
        let output = match *self {
            Manipulation::Noise { snr_db, seed } => add_noise(buffer, snr_db, seed),
            Manipulation::Compression { bitrate_kbps } => {
                let profile = CodecProfile::for_bitrate(bitrate_kbps)?;
                buffer.map_channels(|ch| Ok(codec_sim::simulate(ch, sample_rate, &profile)))?
            }
            Manipulation::Gain { gain_db } => {
                // Capped so silence stays silent instead of 0 * inf
                let gain = db_to_linear(gain_db).min(f64::MAX);
                let mut output = buffer.clone();
                for channel in &mut output.samples {
                    for sample in channel.iter_mut() {
                        *sample = (*sample as f64 * gain).clamp(-1.0, 1.0) as f32;
                    }
                }
                output
            }
            Manipulation::Resample { sample_rate } => resample_buffer(buffer, sample_rate)?,
            Manipulation::Lowpass { cutoff_hz } => filter(buffer, PassType::LowPass, cutoff_hz)?,
            Manipulation::Highpass { cutoff_hz } => filter(buffer, PassType::HighPass, cutoff_hz)?,
            Manipulation::TimeStretch { rate } => {
                buffer.map_channels(|ch| Ok(time_stretch(ch, rate, sample_rate)))?
            }
            Manipulation::PitchShift { semitones } => {
                buffer.map_channels(|ch| pitch_shift(ch, semitones, sample_rate))?
            }
        };

        if output.channels() != buffer.channels() {
            return Err(WmError::internal(format!(
                "{} changed the channel count from {} to {}",
                self.kind(),
                buffer.channels(),
                output.channels()
            )));
        }
        output.ensure_finite(self.kind().as_str())?;
        Ok(output)
    }
}

fn positive_cutoff(params: &Parameters, default: f64) -> Result<f64> {
    let cutoff = get_f64(params, "cutoff", Some("cutoff_hz"), default)?;
    if cutoff <= 0.0 {
        return Err(WmError::invalid(
            "cutoff",
            format!("{} Hz must be above 0", cutoff),
        ));
    }
    Ok(cutoff)
}

fn filter(buffer: &AudioBuffer, pass: PassType, cutoff_hz: f64) -> Result<AudioBuffer> {
    let filter = ButterworthFilter::new(pass, BUTTERWORTH_ORDER, cutoff_hz, buffer.sample_rate)?;
    let mut output = buffer.map_channels(|ch| Ok(filter.filtfilt(ch)))?;
    output.clamp();
    Ok(output)
}

/// Parse, validate and apply in one step
pub fn apply(
    buffer: &AudioBuffer,
    kind: ManipulationKind,
    params: &Parameters,
) -> Result<AudioBuffer> {
    Manipulation::from_params(kind, params)?.apply(buffer)
}

// ============================================================================
// Tests
// ============================================================================
