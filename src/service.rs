//! Watermark service
//!
//! The request/response contract offered to a transport layer. Every
//! operation decodes, processes and encodes first, and only then touches
//! the catalog, so a failed request leaves no partial artifacts behind.

use std::path::Path;

use chrono::{DateTime, Utc};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::ServiceConfig;
use crate::engine::buffer::AudioBuffer;
use crate::engine::codec::{
    decode_with_limits, encode, wav_output_format, AudioFormat, DecodeLimits, OutputFormat,
};
use crate::error::{Result, WmError};
use crate::manipulate::{Manipulation, ManipulationKind, Parameters};
use crate::state::{
    content_key, AppliedManipulation, AssetDraft, AssetOrigin, AudioAsset, Catalog, LineageEntry,
    StorageUsage, WatermarkState,
};
use crate::watermark::{self, codeword, MethodInfo, WatermarkMethod, DEFAULT_PAYLOAD};

// ============================================================================
// Requests and Responses
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadRequest {
    pub filename: String,
    pub audio_bytes: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbedRequest {
    pub filename: String,
    pub audio_bytes: Vec<u8>,
    pub method: String,
    /// Perceptual payload, 1 to 4 bytes; ignored by the neural method
    #[serde(default)]
    pub payload: Option<Vec<u8>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbedResponse {
    pub asset: AudioAsset,
    pub source_asset_id: Uuid,
    pub audio_bytes: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectRequest {
    pub filename: String,
    pub audio_bytes: Vec<u8>,
    pub method: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectResponse {
    pub filename: String,
    pub method: WatermarkMethod,
    pub detected: bool,
    pub confidence: f64,
    /// Recovered payload as lowercase hex
    pub watermark: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManipulateRequest {
    pub filename: String,
    pub audio_bytes: Vec<u8>,
    pub kind: String,
    #[serde(default)]
    pub parameters: Parameters,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManipulateResponse {
    pub asset: AudioAsset,
    pub source_asset_id: Uuid,
    pub audio_bytes: Vec<u8>,
}

/// One row of [`AssetListing`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetSummary {
    pub id: Uuid,
    pub filename: String,
    pub created_at: DateTime<Utc>,
    pub duration_secs: f64,
    pub has_watermark: bool,
    pub watermark_type: WatermarkState,
}

impl From<&AudioAsset> for AssetSummary {
    fn from(asset: &AudioAsset) -> Self {
        Self {
            id: asset.id,
            filename: asset.filename.clone(),
            created_at: asset.created_at,
            duration_secs: asset.duration_secs,
            has_watermark: asset.has_watermark,
            watermark_type: asset.watermark_method,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetListing {
    pub files: Vec<AssetSummary>,
    pub count: usize,
}

/// A manipulated asset with the manipulation that produced it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManipulatedSummary {
    #[serde(flatten)]
    pub summary: AssetSummary,
    pub source_asset_id: Option<Uuid>,
    pub manipulation: AppliedManipulation,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeleteResponse {
    pub ok: bool,
    pub deleted_id: Uuid,
}

/// Result of re-deriving an asset from its recorded source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReproductionReport {
    pub asset_id: Uuid,
    pub source_asset_id: Uuid,
    pub origin: AssetOrigin,
    pub expected_key: String,
    pub actual_key: String,
    pub identical: bool,
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Lowercase hex rendering of a payload
pub fn to_hex(bytes: &[u8]) -> String {
    hex::encode(bytes)
}

fn stem(filename: &str) -> &str {
    Path::new(filename)
        .file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .unwrap_or("audio")
}

fn watermarked_name(method: WatermarkMethod, filename: &str) -> String {
    format!("watermarked_{}_{}.wav", method, stem(filename))
}

fn manipulated_name(kind: ManipulationKind, filename: &str) -> String {
    format!("manipulated_{}_{}.wav", kind, stem(filename))
}

/// Payload recorded for an embed: only the perceptual method carries one
fn recorded_payload(method: WatermarkMethod, payload: Option<&[u8]>) -> Option<Vec<u8>> {
    if method.carries_payload() {
        Some(payload.unwrap_or(DEFAULT_PAYLOAD).to_vec())
    } else {
        None
    }
}

// ============================================================================
// Service
// ============================================================================

/// Embed, detect and manipulate audio against a provenance catalog
pub struct WatermarkService {
    catalog: Catalog,
    config: ServiceConfig,
}

impl WatermarkService {
    /// Open the service over the catalog at `config.storage_root`
    pub fn open(config: ServiceConfig) -> Result<Self> {
        config.validate()?;
        let catalog = Catalog::open(&config.storage_root)?;
        info!("Opened catalog at {}", config.storage_root.display());
        Ok(Self { catalog, config })
    }

    /// A service whose catalog lives only in memory
    pub fn in_memory(config: ServiceConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            catalog: Catalog::in_memory(),
            config,
        })
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    fn limits(&self) -> DecodeLimits {
        DecodeLimits {
            max_input_bytes: self.config.max_input_bytes,
            max_duration_secs: self.config.max_duration_secs,
        }
    }

    fn output_format(&self) -> OutputFormat {
        OutputFormat::wav(self.config.output_bit_depth)
    }

    fn decode_input(&self, filename: &str, bytes: &[u8]) -> Result<AudioBuffer> {
        let format = AudioFormat::from_filename(filename)?;
        decode_with_limits(bytes, format, &self.limits())
    }

    /// The catalog asset holding these exact bytes, recording them as an
    /// upload if none does
    fn resolve_source(&self, filename: &str, bytes: &[u8], audio: &AudioBuffer) -> Result<AudioAsset> {
        if let Some(existing) = self.catalog.find_by_key(&content_key(bytes))? {
            debug!("Input matches existing asset {}", existing.id);
            return Ok(existing);
        }
        self.catalog.commit(bytes, AssetDraft::upload(filename, audio))
    }

    // ------------------------------------------------------------------------
    // Upload
    // ------------------------------------------------------------------------

    /// Record an original
    ///
    /// # Errors
    /// * `UnsupportedFormat` / `CorruptInput` - If the bytes do not decode
    pub fn upload(&self, request: UploadRequest) -> Result<AudioAsset> {
        let audio = self.decode_input(&request.filename, &request.audio_bytes)?;
        let asset = self
            .catalog
            .commit(&request.audio_bytes, AssetDraft::upload(&request.filename, &audio))?;
        info!("Uploaded {} as {}", asset.filename, asset.id);
        Ok(asset)
    }

    // ------------------------------------------------------------------------
    // Embed
    // ------------------------------------------------------------------------

    /// Embed a watermark into uploaded bytes
    ///
    /// # Errors
    /// * `InvalidParameter` - Unknown method or bad payload, checked before decoding
    /// * `AudioTooShort` - If the input is below the method's minimum duration
    pub fn embed(&self, request: EmbedRequest) -> Result<EmbedResponse> {
        let method: WatermarkMethod = request.method.parse()?;
        let payload = request.payload.as_deref();
        if method.carries_payload() {
            if let Some(payload) = payload {
                codeword::validate_payload(payload)?;
            }
        }

        let audio = self.decode_input(&request.filename, &request.audio_bytes)?;
        let marked = watermark::embed(&audio, method, payload)?;
        let bytes = encode(&marked, self.output_format())?;

        let source = self.resolve_source(&request.filename, &request.audio_bytes, &audio)?;
        self.commit_embed(&source, &marked, bytes, method, payload)
    }

    /// Embed a watermark into a stored asset
    pub fn embed_asset(
        &self,
        id: Uuid,
        method: WatermarkMethod,
        payload: Option<&[u8]>,
    ) -> Result<EmbedResponse> {
        if method.carries_payload() {
            if let Some(payload) = payload {
                codeword::validate_payload(payload)?;
            }
        }
        let (source, source_bytes) = self.catalog.read_asset(id)?;
        let audio = self.decode_input(&source.filename, &source_bytes)?;
        let marked = watermark::embed(&audio, method, payload)?;
        let bytes = encode(&marked, self.output_format())?;
        self.commit_embed(&source, &marked, bytes, method, payload)
    }

    fn commit_embed(
        &self,
        source: &AudioAsset,
        marked: &AudioBuffer,
        bytes: Vec<u8>,
        method: WatermarkMethod,
        payload: Option<&[u8]>,
    ) -> Result<EmbedResponse> {
        let draft = AssetDraft::embedded(
            watermarked_name(method, &source.filename),
            marked,
            source,
            method,
            recorded_payload(method, payload),
        );
        let asset = self.catalog.commit(&bytes, draft)?;
        info!(
            "Embedded {} watermark: {} -> {}",
            method.display_name(),
            source.id,
            asset.id
        );
        Ok(EmbedResponse {
            source_asset_id: source.id,
            asset,
            audio_bytes: bytes,
        })
    }

    // ------------------------------------------------------------------------
    // Detect
    // ------------------------------------------------------------------------

    /// Detect a watermark in uploaded bytes; creates no asset
    pub fn detect(&self, request: DetectRequest) -> Result<DetectResponse> {
        let method: WatermarkMethod = request.method.parse()?;
        let audio = self.decode_input(&request.filename, &request.audio_bytes)?;
        self.detect_decoded(request.filename, &audio, method)
    }

    /// Detect a watermark in a stored asset
    pub fn detect_asset(&self, id: Uuid, method: WatermarkMethod) -> Result<DetectResponse> {
        let (asset, bytes) = self.catalog.read_asset(id)?;
        let audio = self.decode_input(&asset.filename, &bytes)?;
        self.detect_decoded(asset.filename, &audio, method)
    }

    fn detect_decoded(
        &self,
        filename: String,
        audio: &AudioBuffer,
        method: WatermarkMethod,
    ) -> Result<DetectResponse> {
        let detection = watermark::detect(audio, method)?;
        Ok(DetectResponse {
            filename,
            method,
            detected: detection.present,
            confidence: detection.confidence,
            watermark: detection.payload.as_deref().map(to_hex),
        })
    }

    // ------------------------------------------------------------------------
    // Manipulate
    // ------------------------------------------------------------------------

    /// Apply a manipulation to uploaded bytes
    ///
    /// # Errors
    /// * `InvalidParameter` - Unknown kind or parameter, checked before decoding
    pub fn manipulate(&self, request: ManipulateRequest) -> Result<ManipulateResponse> {
        let kind: ManipulationKind = request.kind.parse()?;
        let manipulation = Manipulation::from_params(kind, &request.parameters)?;

        let audio = self.decode_input(&request.filename, &request.audio_bytes)?;
        let output = manipulation.apply_with_limit(&audio, self.config.max_duration_secs)?;
        let bytes = encode(&output, self.output_format())?;

        let source = self.resolve_source(&request.filename, &request.audio_bytes, &audio)?;
        self.commit_manipulation(&source, &output, bytes, &manipulation)
    }

    /// Apply a manipulation to a stored asset
    pub fn manipulate_asset(
        &self,
        id: Uuid,
        kind: ManipulationKind,
        parameters: &Parameters,
    ) -> Result<ManipulateResponse> {
        let manipulation = Manipulation::from_params(kind, parameters)?;
        let (source, source_bytes) = self.catalog.read_asset(id)?;
        let audio = self.decode_input(&source.filename, &source_bytes)?;
        let output = manipulation.apply_with_limit(&audio, self.config.max_duration_secs)?;
        let bytes = encode(&output, self.output_format())?;
        self.commit_manipulation(&source, &output, bytes, &manipulation)
    }

    fn commit_manipulation(
        &self,
        source: &AudioAsset,
        output: &AudioBuffer,
        bytes: Vec<u8>,
        manipulation: &Manipulation,
    ) -> Result<ManipulateResponse> {
        let draft = AssetDraft::manipulated(
            manipulated_name(manipulation.kind(), &source.filename),
            output,
            source,
            manipulation,
        );
        let asset = self.catalog.commit(&bytes, draft)?;
        info!(
            "Applied {}: {} -> {}",
            manipulation.kind(),
            source.id,
            asset.id
        );
        Ok(ManipulateResponse {
            source_asset_id: source.id,
            asset,
            audio_bytes: bytes,
        })
    }

    // ------------------------------------------------------------------------
    // Catalog queries
    // ------------------------------------------------------------------------

    pub fn list_assets(&self) -> Result<AssetListing> {
        let files: Vec<AssetSummary> = self.catalog.list()?.iter().map(AssetSummary::from).collect();
        Ok(AssetListing {
            count: files.len(),
            files,
        })
    }

    /// Manipulated assets with their kind and parameters
    pub fn list_manipulated(&self) -> Result<Vec<ManipulatedSummary>> {
        Ok(self
            .catalog
            .list()?
            .iter()
            .filter_map(|asset| {
                asset.manipulation.clone().map(|manipulation| ManipulatedSummary {
                    summary: AssetSummary::from(asset),
                    source_asset_id: asset.source_asset_id,
                    manipulation,
                })
            })
            .collect())
    }

    pub fn get_asset(&self, id: Uuid) -> Result<AudioAsset> {
        self.catalog.get(id)
    }

    pub fn get_asset_bytes(&self, id: Uuid) -> Result<Vec<u8>> {
        self.catalog.read_bytes(id)
    }

    pub fn delete_asset(&self, id: Uuid) -> Result<DeleteResponse> {
        self.catalog.delete(id)?;
        Ok(DeleteResponse {
            ok: true,
            deleted_id: id,
        })
    }

    pub fn lineage(&self, id: Uuid) -> Result<Vec<LineageEntry>> {
        self.catalog.lineage(id)
    }

    /// Re-derive an asset from its recorded source and parameters
    ///
    /// # Errors
    /// * `InvalidParameter` - If the asset is an upload
    /// * `NotFound` - If the asset or its source has been deleted
    pub fn reproduce(&self, id: Uuid) -> Result<ReproductionReport> {
        let (asset, stored) = self.catalog.read_asset(id)?;
        let source_id = match (asset.origin, asset.source_asset_id) {
            (AssetOrigin::Upload, _) | (_, None) => {
                return Err(WmError::invalid(
                    "id",
                    format!("asset {} is an upload and has no derivation", id),
                ))
            }
            (_, Some(source_id)) => source_id,
        };
        let (source, source_bytes) = self.catalog.read_asset(source_id)?;
        let audio = self.decode_input(&source.filename, &source_bytes)?;

        let output = match asset.origin {
            AssetOrigin::Embed => {
                let method = asset.watermark_method.method().ok_or_else(|| {
                    WmError::internal(format!("embedded asset {} has no method", id))
                })?;
                watermark::embed(&audio, method, asset.watermark_payload.as_deref())?
            }
            _ => {
                let applied = asset.manipulation.as_ref().ok_or_else(|| {
                    WmError::internal(format!("manipulated asset {} has no parameters", id))
                })?;
                Manipulation::from_params(applied.kind, &applied.parameters)?
                    .apply_with_limit(&audio, self.config.max_duration_secs)?
            }
        };
        let bytes = encode(&output, wav_output_format(&stored)?)?;
        let actual_key = content_key(&bytes);

        Ok(ReproductionReport {
            asset_id: id,
            source_asset_id: source_id,
            origin: asset.origin,
            identical: actual_key == asset.storage_key,
            expected_key: asset.storage_key,
            actual_key,
        })
    }

    pub fn available_methods(&self) -> Vec<MethodInfo> {
        watermark::available_methods()
    }

    pub fn usage(&self) -> Result<StorageUsage> {
        self.catalog.usage()
    }

    pub fn sweep_orphans(&self) -> Result<u64> {
        self.catalog.sweep_orphans()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::signal::generate_test_tone;
    use crate::error::ErrorKind;
    use serde_json::json;

    fn service() -> WatermarkService {
        WatermarkService::in_memory(ServiceConfig::default()).unwrap()
    }

    fn tone_bytes(seconds: f64) -> Vec<u8> {
        let tone = generate_test_tone(300.0, seconds, 16_000, 0.5);
        encode(&tone, OutputFormat::default()).unwrap()
    }

    #[test]
    fn test_output_names() {
        assert_eq!(
            watermarked_name(WatermarkMethod::Neural, "song.mp3"),
            "watermarked_neural_song.wav"
        );
        assert_eq!(
            manipulated_name(ManipulationKind::TimeStretch, "dir/take 2.wav"),
            "manipulated_timestretch_take 2.wav"
        );
        assert_eq!(stem(""), "audio");
    }

    #[test]
    fn test_to_hex() {
        assert_eq!(to_hex(b"WMB1"), "574d4231");
        assert_eq!(to_hex(&[]), "");
    }

    #[test]
    fn test_embed_records_source_and_result() {
        let service = service();
        let response = service
            .embed(EmbedRequest {
                filename: "tone.wav".to_string(),
                audio_bytes: tone_bytes(1.0),
                method: "neural".to_string(),
                payload: None,
            })
            .unwrap();

        assert_eq!(response.asset.filename, "watermarked_neural_tone.wav");
        assert_eq!(response.asset.source_asset_id, Some(response.source_asset_id));
        assert_eq!(service.list_assets().unwrap().count, 2);
        assert_eq!(
            service.get_asset_bytes(response.asset.id).unwrap(),
            response.audio_bytes
        );
    }

    #[test]
    fn test_repeated_embed_reuses_source() {
        let service = service();
        let bytes = tone_bytes(1.0);
        let request = EmbedRequest {
            filename: "tone.wav".to_string(),
            audio_bytes: bytes,
            method: "neural".to_string(),
            payload: None,
        };
        let a = service.embed(request.clone()).unwrap();
        let b = service.embed(request).unwrap();
        assert_eq!(a.source_asset_id, b.source_asset_id);
        assert_eq!(a.audio_bytes, b.audio_bytes);
        assert_eq!(service.list_assets().unwrap().count, 3);
    }

    #[test]
    fn test_bad_parameters_rejected_before_decoding() {
        let service = service();
        let err = service
            .manipulate(ManipulateRequest {
                filename: "x.wav".to_string(),
                audio_bytes: b"garbage".to_vec(),
                kind: "lowpass".to_string(),
                parameters: match json!({"cutoff": -5}) {
                    serde_json::Value::Object(map) => map,
                    _ => unreachable!(),
                },
            })
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidParameter);

        let err = service
            .embed(EmbedRequest {
                filename: "x.wav".to_string(),
                audio_bytes: b"garbage".to_vec(),
                method: "perceptual".to_string(),
                payload: Some(vec![1, 2, 3, 4, 5]),
            })
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidParameter);
    }

    #[test]
    fn test_failed_embed_leaves_no_assets() {
        let service = service();
        let err = service
            .embed(EmbedRequest {
                filename: "short.wav".to_string(),
                audio_bytes: tone_bytes(0.1),
                method: "neural".to_string(),
                payload: None,
            })
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AudioTooShort);
        assert_eq!(service.list_assets().unwrap().count, 0);
        assert_eq!(service.usage().unwrap().blob_count, 0);
    }

    #[test]
    fn test_detect_creates_no_asset() {
        let service = service();
        let response = service
            .detect(DetectRequest {
                filename: "tone.wav".to_string(),
                audio_bytes: tone_bytes(1.0),
                method: "audioseal".to_string(),
            })
            .unwrap();
        assert!(!response.detected);
        assert_eq!(response.watermark, None);
        assert!(service.catalog().is_empty().unwrap());
    }

    #[test]
    fn test_reproduce_upload_is_invalid() {
        let service = service();
        let asset = service
            .upload(UploadRequest {
                filename: "tone.wav".to_string(),
                audio_bytes: tone_bytes(1.0),
            })
            .unwrap();
        let err = service.reproduce(asset.id).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidParameter);
    }

    #[test]
    fn test_service_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<WatermarkService>();
    }
}
