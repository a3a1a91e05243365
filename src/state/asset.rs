//! Asset records
//!
//! An asset is one stored audio artifact plus the facts about how it was
//! made. Records are never edited after creation; the catalog only inserts
//! and removes them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::engine::buffer::AudioBuffer;
use crate::manipulate::{Manipulation, ManipulationKind, Parameters};
use crate::watermark::WatermarkMethod;

/// Watermark state recorded on an asset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WatermarkState {
    #[default]
    None,
    Neural,
    Perceptual,
}

impl WatermarkState {
    pub fn method(&self) -> Option<WatermarkMethod> {
        match self {
            WatermarkState::None => None,
            WatermarkState::Neural => Some(WatermarkMethod::Neural),
            WatermarkState::Perceptual => Some(WatermarkMethod::Perceptual),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WatermarkState::None => "none",
            WatermarkState::Neural => "neural",
            WatermarkState::Perceptual => "perceptual",
        }
    }
}

impl From<WatermarkMethod> for WatermarkState {
    fn from(method: WatermarkMethod) -> Self {
        match method {
            WatermarkMethod::Neural => WatermarkState::Neural,
            WatermarkMethod::Perceptual => WatermarkState::Perceptual,
        }
    }
}

/// How an asset came to exist
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetOrigin {
    Upload,
    Embed,
    Manipulation,
}

/// The manipulation that produced an asset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppliedManipulation {
    pub kind: ManipulationKind,
    pub parameters: Parameters,
}

impl From<&Manipulation> for AppliedManipulation {
    fn from(manipulation: &Manipulation) -> Self {
        Self {
            kind: manipulation.kind(),
            parameters: manipulation.to_params(),
        }
    }
}

/// One stored artifact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioAsset {
    pub id: Uuid,
    pub filename: String,
    pub sample_rate: u32,
    pub channels: u16,
    pub duration_secs: f64,
    pub has_watermark: bool,
    pub watermark_method: WatermarkState,
    /// Payload bytes embedded by the perceptual method
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub watermark_payload: Option<Vec<u8>>,
    pub source_asset_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    /// SHA-256 of the stored bytes
    pub storage_key: String,
    pub origin: AssetOrigin,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manipulation: Option<AppliedManipulation>,
    pub size_bytes: u64,
    /// Insertion order, assigned by the catalog
    #[serde(default)]
    pub sequence: u64,
}

/// Everything needed to record an asset except its storage key and size
#[derive(Debug, Clone)]
pub struct AssetDraft {
    pub filename: String,
    pub sample_rate: u32,
    pub channels: u16,
    pub duration_secs: f64,
    pub watermark_method: WatermarkState,
    pub watermark_payload: Option<Vec<u8>>,
    pub source_asset_id: Option<Uuid>,
    pub origin: AssetOrigin,
    pub manipulation: Option<AppliedManipulation>,
}

impl AssetDraft {
    /// An uploaded original: no watermark, no source
    pub fn upload(filename: impl Into<String>, audio: &AudioBuffer) -> Self {
        Self {
            filename: filename.into(),
            sample_rate: audio.sample_rate,
            channels: audio.channels() as u16,
            duration_secs: audio.duration_secs(),
            watermark_method: WatermarkState::None,
            watermark_payload: None,
            source_asset_id: None,
            origin: AssetOrigin::Upload,
            manipulation: None,
        }
    }

    /// A watermarked copy of `source`
    pub fn embedded(
        filename: impl Into<String>,
        audio: &AudioBuffer,
        source: &AudioAsset,
        method: WatermarkMethod,
        payload: Option<Vec<u8>>,
    ) -> Self {
        Self {
            watermark_method: method.into(),
            watermark_payload: payload,
            source_asset_id: Some(source.id),
            origin: AssetOrigin::Embed,
            ..Self::upload(filename, audio)
        }
    }

    /// A manipulated copy of `source`; watermark state is inherited
    pub fn manipulated(
        filename: impl Into<String>,
        audio: &AudioBuffer,
        source: &AudioAsset,
        manipulation: &Manipulation,
    ) -> Self {
        Self {
            watermark_method: source.watermark_method,
            watermark_payload: source.watermark_payload.clone(),
            source_asset_id: Some(source.id),
            origin: AssetOrigin::Manipulation,
            manipulation: Some(manipulation.into()),
            ..Self::upload(filename, audio)
        }
    }

    /// Finish the record with a fresh id
    pub fn into_asset(self, storage_key: String, size_bytes: u64) -> AudioAsset {
        AudioAsset {
            id: Uuid::new_v4(),
            filename: self.filename,
            sample_rate: self.sample_rate,
            channels: self.channels,
            duration_secs: self.duration_secs,
            has_watermark: self.watermark_method != WatermarkState::None,
            watermark_method: self.watermark_method,
            watermark_payload: self.watermark_payload,
            source_asset_id: self.source_asset_id,
            created_at: Utc::now(),
            storage_key,
            origin: self.origin,
            manipulation: self.manipulation,
            size_bytes,
            sequence: 0,
        }
    }
}
