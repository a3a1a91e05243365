//! Watermark Engine
//!
//! Two incompatible watermark methods behind one contract:
//! - Neural ("AudioSeal"): fixed model signature, logistic confidence
//! - Perceptual ("PerTh"): small caller payload repeated per segment
//!
//! The method set is closed. Each method implements [`WatermarkScheme`] and
//! [`WatermarkMethod::scheme`] is the only place a method is looked up.

pub mod codeword;
pub mod neural;
pub mod perceptual;

use std::fmt;
use std::str::FromStr;

use log::info;
use serde::{Deserialize, Serialize};

use crate::engine::buffer::AudioBuffer;
use crate::error::{Result, WmError};

pub use codeword::{DEFAULT_PAYLOAD, MAX_PAYLOAD_BYTES};

/// Outcome of a detection
///
/// `confidence` is specific to the method that produced it and is not
/// comparable across methods.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub present: bool,
    pub confidence: f64,
    pub payload: Option<Vec<u8>>,
}

/// Embed/detect capability shared by every method
pub trait WatermarkScheme: Send + Sync {
    /// Embed, preserving length, channel count and sample rate
    fn embed(&self, buffer: &AudioBuffer, payload: Option<&[u8]>) -> Result<AudioBuffer>;

    /// Detect without modifying anything
    fn detect(&self, buffer: &AudioBuffer) -> Result<Detection>;

    /// Shortest input accepted at `sample_rate`
    fn min_duration_secs(&self, sample_rate: u32) -> f64;
}

struct NeuralScheme;

impl WatermarkScheme for NeuralScheme {
    fn embed(&self, buffer: &AudioBuffer, _payload: Option<&[u8]>) -> Result<AudioBuffer> {
        neural::embed(buffer)
    }

    fn detect(&self, buffer: &AudioBuffer) -> Result<Detection> {
        neural::detect(buffer)
    }

    fn min_duration_secs(&self, sample_rate: u32) -> f64 {
        neural::min_duration_secs(sample_rate)
    }
}

struct PerceptualScheme;

impl WatermarkScheme for PerceptualScheme {
    fn embed(&self, buffer: &AudioBuffer, payload: Option<&[u8]>) -> Result<AudioBuffer> {
        perceptual::embed(buffer, payload.unwrap_or(DEFAULT_PAYLOAD))
    }

    fn detect(&self, buffer: &AudioBuffer) -> Result<Detection> {
        perceptual::detect(buffer)
    }

    fn min_duration_secs(&self, sample_rate: u32) -> f64 {
        perceptual::min_duration_secs(sample_rate)
    }
}

/// Watermark method identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WatermarkMethod {
    Neural,
    Perceptual,
}

impl WatermarkMethod {
    pub const ALL: [WatermarkMethod; 2] = [WatermarkMethod::Neural, WatermarkMethod::Perceptual];

    /// Identifier used in requests, filenames and the catalog
    pub fn as_str(&self) -> &'static str {
        match self {
            WatermarkMethod::Neural => "neural",
            WatermarkMethod::Perceptual => "perceptual",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            WatermarkMethod::Neural => "AudioSeal",
            WatermarkMethod::Perceptual => "PerTh",
        }
    }

    /// Whether a caller payload is embedded and recovered
    pub fn carries_payload(&self) -> bool {
        matches!(self, WatermarkMethod::Perceptual)
    }

    pub fn scheme(&self) -> &'static dyn WatermarkScheme {
        match self {
            WatermarkMethod::Neural => &NeuralScheme,
            WatermarkMethod::Perceptual => &PerceptualScheme,
        }
    }
}

impl fmt::Display for WatermarkMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WatermarkMethod {
    type Err = WmError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "neural" | "audioseal" => Ok(WatermarkMethod::Neural),
            "perceptual" | "perth" => Ok(WatermarkMethod::Perceptual),
            other => Err(WmError::invalid(
                "method",
                format!("unknown watermark method '{}' (expected neural or perceptual)", other),
            )),
        }
    }
}

/// Embed a watermark with `method`
///
/// The neural method ignores `payload`. The perceptual method embeds
/// `payload`, or [`DEFAULT_PAYLOAD`] when none is given.
///
/// # Errors
/// * `AudioTooShort` - If the input is below the method's minimum duration
/// * `InvalidParameter` - If the payload does not fit the perceptual word
pub fn embed(
    buffer: &AudioBuffer,
    method: WatermarkMethod,
    payload: Option<&[u8]>,
) -> Result<AudioBuffer> {
    info!(
        "Embedding {} watermark into {:.2}s of audio",
        method.display_name(),
        buffer.duration_secs()
    );
    let output = method.scheme().embed(buffer, payload)?;
    if output.len() != buffer.len() || output.sample_rate != buffer.sample_rate {
        return Err(WmError::internal(format!(
            "{} embed changed the buffer shape",
            method
        )));
    }
    Ok(output)
}

/// Detect a watermark embedded with `method`
///
/// # Errors
/// * `AudioTooShort` - If the input is below the method's minimum duration
pub fn detect(buffer: &AudioBuffer, method: WatermarkMethod) -> Result<Detection> {
    let detection = method.scheme().detect(buffer)?;
    info!(
        "{} detection: present={} confidence={:.3}",
        method.display_name(),
        detection.present,
        detection.confidence
    );
    Ok(detection)
}

/// Description of one available method
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodInfo {
    pub id: WatermarkMethod,
    pub name: String,
    pub carries_payload: bool,
    pub max_payload_bytes: usize,
    /// Minimum input duration at 16 kHz
    pub min_duration_secs: f64,
}

/// Every method this build supports
pub fn available_methods() -> Vec<MethodInfo> {
    WatermarkMethod::ALL
        .iter()
        .map(|&method| MethodInfo {
            id: method,
            name: method.display_name().to_string(),
            carries_payload: method.carries_payload(),
            max_payload_bytes: if method.carries_payload() {
                MAX_PAYLOAD_BYTES
            } else {
                0
            },
            min_duration_secs: method.scheme().min_duration_secs(16_000),
        })
        .collect()
}
