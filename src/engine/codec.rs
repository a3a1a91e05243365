//! Audio codec
//!
//! Decodes encoded bytes into an [`AudioBuffer`] and encodes buffers back to
//! bytes. WAV goes through hound in both directions; FLAC, MP3 and OGG/Vorbis
//! are decode-only through symphonia. Decode never resamples: the buffer keeps
//! the source sample rate exactly.
//!
//! Size and duration limits are checked from the container header before any
//! sample data is read so malformed or oversized input is rejected early.

use std::fmt;
use std::io::Cursor;

use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use log::debug;
use serde::{Deserialize, Serialize};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::config::{DEFAULT_MAX_DURATION_SECS, DEFAULT_MAX_INPUT_BYTES};
use crate::engine::buffer::{AudioBuffer, ChannelLayout, MAX_SAMPLE_RATE, MIN_SAMPLE_RATE};
use crate::error::{Result, WmError};

// ============================================================================
// Formats
// ============================================================================

/// Containers the codec knows how to name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    Wav,
    Flac,
    Mp3,
    Ogg,
}

impl AudioFormat {
    /// Resolve a file extension (case-insensitive, leading dot allowed)
    ///
    /// # Errors
    /// * `UnsupportedFormat` - For any extension outside the supported set
    pub fn from_extension(ext: &str) -> Result<Self> {
        let ext = ext.trim_start_matches('.').to_ascii_lowercase();
        match ext.as_str() {
            "wav" | "wave" => Ok(AudioFormat::Wav),
            "flac" => Ok(AudioFormat::Flac),
            "mp3" => Ok(AudioFormat::Mp3),
            "ogg" | "oga" => Ok(AudioFormat::Ogg),
            other => Err(WmError::UnsupportedFormat {
                format: if other.is_empty() {
                    "file without extension".to_string()
                } else {
                    other.to_string()
                },
            }),
        }
    }

    /// Resolve the format from a filename's extension
    pub fn from_filename(filename: &str) -> Result<Self> {
        let ext = std::path::Path::new(filename)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("");
        Self::from_extension(ext)
    }

    /// Canonical file extension
    pub fn extension(&self) -> &'static str {
        match self {
            AudioFormat::Wav => "wav",
            AudioFormat::Flac => "flac",
            AudioFormat::Mp3 => "mp3",
            AudioFormat::Ogg => "ogg",
        }
    }

    /// Whether [`encode`] can produce this container
    pub fn can_encode(&self) -> bool {
        matches!(self, AudioFormat::Wav)
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// Target of an [`encode`] call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputFormat {
    pub container: AudioFormat,
    /// 16 or 24 for integer PCM, 32 for IEEE float
    pub bit_depth: u16,
}

impl OutputFormat {
    pub fn wav(bit_depth: u16) -> Self {
        Self {
            container: AudioFormat::Wav,
            bit_depth,
        }
    }
}

impl Default for OutputFormat {
    fn default() -> Self {
        Self::wav(16)
    }
}

/// Bounds applied while decoding
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecodeLimits {
    pub max_input_bytes: u64,
    pub max_duration_secs: f64,
}

impl Default for DecodeLimits {
    fn default() -> Self {
        Self {
            max_input_bytes: DEFAULT_MAX_INPUT_BYTES,
            max_duration_secs: DEFAULT_MAX_DURATION_SECS,
        }
    }
}

/// Stream properties, as recorded in the catalog
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AudioInfo {
    pub sample_rate: u32,
    pub channels: u16,
    pub frames: u64,
    pub duration_secs: f64,
}

impl AudioInfo {
    pub fn of(buffer: &AudioBuffer) -> Self {
        Self {
            sample_rate: buffer.sample_rate,
            channels: buffer.channels() as u16,
            frames: buffer.len() as u64,
            duration_secs: buffer.duration_secs(),
        }
    }
}

// ============================================================================
// Public API
// ============================================================================

/// Decode bytes with the default limits
pub fn decode(bytes: &[u8], format: AudioFormat) -> Result<AudioBuffer> {
    decode_with_limits(bytes, format, &DecodeLimits::default())
}

/// Decode bytes of the declared format into an [`AudioBuffer`]
///
/// # Errors
/// * `InvalidParameter` - If the input exceeds the byte or duration limits
/// * `UnsupportedFormat` - For more than 2 channels or an unsupported codec variant
/// * `CorruptInput` - If the bytes cannot be parsed as `format` or contain no audio
pub fn decode_with_limits(
    bytes: &[u8],
    format: AudioFormat,
    limits: &DecodeLimits,
) -> Result<AudioBuffer> {
    if bytes.len() as u64 > limits.max_input_bytes {
        return Err(WmError::invalid(
            "audio_bytes",
            format!(
                "input is {} bytes, limit is {} bytes",
                bytes.len(),
                limits.max_input_bytes
            ),
        ));
    }
    if bytes.is_empty() {
        return Err(WmError::corrupt("input is empty"));
    }

    let buffer = match format {
        AudioFormat::Wav => decode_wav(bytes, limits)?,
        AudioFormat::Flac | AudioFormat::Mp3 | AudioFormat::Ogg => {
            decode_compressed(bytes, format, limits)?
        }
    };

    if buffer.is_empty() {
        return Err(WmError::corrupt("stream contains no audio frames"));
    }

    debug!(
        "Decoded {} input: {} ch, {} Hz, {:.3}s",
        format,
        buffer.channels(),
        buffer.sample_rate,
        buffer.duration_secs()
    );

    Ok(buffer)
}

/// Read stream properties without keeping the samples
pub fn probe(bytes: &[u8], format: AudioFormat) -> Result<AudioInfo> {
    match format {
        AudioFormat::Wav => {
            let reader = WavReader::new(Cursor::new(bytes)).map_err(wav_decode_error)?;
            let spec = reader.spec();
            validate_stream_shape(spec.channels as usize, spec.sample_rate)?;
            let frames = reader.duration() as u64;
            Ok(AudioInfo {
                sample_rate: spec.sample_rate,
                channels: spec.channels,
                frames,
                duration_secs: frames as f64 / spec.sample_rate as f64,
            })
        }
        _ => decode(bytes, format).map(|buffer| AudioInfo::of(&buffer)),
    }
}

/// The [`OutputFormat`] a WAV file was written with
///
/// Used to re-encode a derivation exactly as it was first stored.
pub fn wav_output_format(bytes: &[u8]) -> Result<OutputFormat> {
    let reader = WavReader::new(Cursor::new(bytes)).map_err(wav_decode_error)?;
    Ok(OutputFormat::wav(reader.spec().bits_per_sample))
}

/// Encode a buffer into bytes
///
/// Samples are clamped to [-1, 1] before quantization. Output is a pure
/// function of the buffer and the target.
///
/// # Errors
/// * `UnsupportedFormat` - For non-WAV containers or bit depths other than 16, 24, 32
/// * `InternalProcessingFailure` - If the buffer holds non-finite samples
pub fn encode(buffer: &AudioBuffer, target: OutputFormat) -> Result<Vec<u8>> {
    if !target.container.can_encode() {
        return Err(WmError::UnsupportedFormat {
            format: format!("encoding to {} (only wav output supported)", target.container),
        });
    }
    if buffer.channel_layout().is_none() {
        return Err(WmError::UnsupportedFormat {
            format: format!("{}-channel audio", buffer.channels()),
        });
    }
    buffer.ensure_finite("encode")?;

    let sample_format = match target.bit_depth {
        16 | 24 => SampleFormat::Int,
        32 => SampleFormat::Float,
        other => {
            return Err(WmError::UnsupportedFormat {
                format: format!("{}-bit audio (only 16, 24, 32 supported)", other),
            })
        }
    };

    let spec = WavSpec {
        channels: buffer.channels() as u16,
        sample_rate: buffer.sample_rate,
        bits_per_sample: target.bit_depth,
        sample_format,
    };

    let interleaved = buffer.to_interleaved();
    let mut cursor = Cursor::new(Vec::with_capacity(
        44 + interleaved.len() * (target.bit_depth as usize / 8),
    ));

    {
        let mut writer = WavWriter::new(&mut cursor, spec)?;
        match target.bit_depth {
            16 => {
                for sample in interleaved {
                    let scaled = (sample.clamp(-1.0, 1.0) * 32768.0)
                        .round()
                        .clamp(-32768.0, 32767.0) as i16;
                    writer.write_sample(scaled)?;
                }
            }
            24 => {
                for sample in interleaved {
                    // 24-bit stored as i32 in hound
                    let scaled = (sample.clamp(-1.0, 1.0) as f64 * 8_388_608.0)
                        .round()
                        .clamp(-8_388_608.0, 8_388_607.0) as i32;
                    writer.write_sample(scaled)?;
                }
            }
            _ => {
                for sample in interleaved {
                    writer.write_sample(sample.clamp(-1.0, 1.0))?;
                }
            }
        }
        writer.finalize()?;
    }

    Ok(cursor.into_inner())
}

// ============================================================================
// Internal helper functions
// ============================================================================

fn validate_stream_shape(channels: usize, sample_rate: u32) -> Result<()> {
    if channels == 0 {
        return Err(WmError::corrupt("stream declares zero channels"));
    }
    if channels > 2 {
        return Err(WmError::UnsupportedFormat {
            format: format!("{}-channel audio (only mono/stereo supported)", channels),
        });
    }
    if !(MIN_SAMPLE_RATE..=MAX_SAMPLE_RATE).contains(&sample_rate) {
        return Err(WmError::corrupt(format!(
            "sample rate {} Hz outside {}..={} Hz",
            sample_rate, MIN_SAMPLE_RATE, MAX_SAMPLE_RATE
        )));
    }
    Ok(())
}

fn check_duration(frames: u64, sample_rate: u32, limits: &DecodeLimits) -> Result<()> {
    let duration_secs = frames as f64 / sample_rate as f64;
    if duration_secs > limits.max_duration_secs {
        return Err(WmError::invalid(
            "duration",
            format!(
                "{:.1}s exceeds the {:.1}s limit",
                duration_secs, limits.max_duration_secs
            ),
        ));
    }
    Ok(())
}

fn wav_decode_error(err: hound::Error) -> WmError {
    match err {
        hound::Error::Unsupported => WmError::UnsupportedFormat {
            format: "WAV variant not supported by decoder".to_string(),
        },
        other => WmError::CorruptInput {
            reason: format!("Invalid WAV data: {}", other),
            source: Some(Box::new(other)),
        },
    }
}

fn decode_wav(bytes: &[u8], limits: &DecodeLimits) -> Result<AudioBuffer> {
    let reader = WavReader::new(Cursor::new(bytes)).map_err(wav_decode_error)?;
    let spec = reader.spec();
    let channels = spec.channels as usize;

    validate_stream_shape(channels, spec.sample_rate)?;
    check_duration(reader.duration() as u64, spec.sample_rate, limits)?;

    let interleaved = read_samples_as_f32(reader, spec.bits_per_sample, spec.sample_format)?;
    if interleaved.len() % channels != 0 {
        return Err(WmError::corrupt("WAV data ends in the middle of a frame"));
    }

    let layout = ChannelLayout::from_count(channels)
        .ok_or_else(|| WmError::corrupt("invalid channel count"))?;
    AudioBuffer::from_interleaved(&interleaved, layout, spec.sample_rate)
}

/// Read samples from WAV reader and convert to f32
fn read_samples_as_f32<R: std::io::Read>(
    mut reader: WavReader<R>,
    bits_per_sample: u16,
    sample_format: SampleFormat,
) -> Result<Vec<f32>> {
    let samples = match sample_format {
        SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<std::result::Result<Vec<f32>, _>>(),
        SampleFormat::Int => match bits_per_sample {
            8 => reader
                .samples::<i8>()
                .map(|s| s.map(|v| v as f32 / 128.0))
                .collect(),
            16 => reader
                .samples::<i16>()
                .map(|s| s.map(|v| v as f32 / 32768.0))
                .collect(),
            // 24-bit stored as i32 in hound
            24 => reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / 8_388_608.0))
                .collect(),
            32 => reader
                .samples::<i32>()
                .map(|s| s.map(|v| (v as f64 / 2_147_483_648.0) as f32))
                .collect(),
            other => {
                return Err(WmError::UnsupportedFormat {
                    format: format!("{}-bit integer audio", other),
                })
            }
        },
    };
    samples.map_err(wav_decode_error)
}

fn symphonia_error(err: SymphoniaError, format: AudioFormat) -> WmError {
    match err {
        SymphoniaError::Unsupported(what) => WmError::UnsupportedFormat {
            format: format!("{} ({})", format, what),
        },
        other => WmError::CorruptInput {
            reason: format!("Cannot decode {} data: {}", format, other),
            source: Some(Box::new(other)),
        },
    }
}

fn decode_compressed(
    bytes: &[u8],
    format: AudioFormat,
    limits: &DecodeLimits,
) -> Result<AudioBuffer> {
    let cursor = Cursor::new(bytes.to_vec());
    let mss = MediaSourceStream::new(Box::new(cursor), Default::default());

    let mut hint = Hint::new();
    hint.with_extension(format.extension());

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| symphonia_error(e, format))?;
    let mut reader = probed.format;

    let track = reader
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| WmError::corrupt(format!("no audio track in {} data", format)))?;
    let track_id = track.id;
    let declared_rate = track.codec_params.sample_rate;
    let declared_frames = track.codec_params.n_frames;

    if let (Some(rate), Some(frames)) = (declared_rate, track.codec_params.n_frames) {
        validate_stream_shape(1, rate)?;
        check_duration(frames, rate, limits)?;
    }

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| symphonia_error(e, format))?;

    let mut interleaved: Vec<f32> = Vec::new();
    let mut channels = 0usize;
    let mut sample_rate = declared_rate.unwrap_or(0);

    loop {
        let packet = match reader.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break
            }
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => return Err(symphonia_error(e, format)),
        };
        if packet.track_id() != track_id {
            continue;
        }

        // A damaged packet fails the whole stream
        let decoded = decoder
            .decode(&packet)
            .map_err(|e| symphonia_error(e, format))?;

        let spec = *decoded.spec();
        let packet_channels = spec.channels.count();
        if channels == 0 {
            channels = packet_channels;
            sample_rate = spec.rate;
            validate_stream_shape(channels, sample_rate)?;
        } else if packet_channels != channels {
            return Err(WmError::corrupt("channel count changes mid-stream"));
        }

        let mut sample_buf = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
        sample_buf.copy_interleaved_ref(decoded);
        interleaved.extend_from_slice(sample_buf.samples());

        check_duration((interleaved.len() / channels) as u64, sample_rate, limits)?;
    }

    let layout = ChannelLayout::from_count(channels)
        .ok_or_else(|| WmError::corrupt(format!("no decodable audio in {} data", format)))?;
    if format == AudioFormat::Flac {
        check_complete((interleaved.len() / channels) as u64, declared_frames, format)?;
    }
    AudioBuffer::from_interleaved(&interleaved, layout, sample_rate)
}

/// Fail when a stream decodes to fewer frames than its header declares
///
/// The FLAC demuxer drops frames whose checksum fails, so a damaged frame
/// only shows up as a short stream.
fn check_complete(decoded: u64, declared: Option<u64>, format: AudioFormat) -> Result<()> {
    match declared {
        Some(declared) if decoded < declared => Err(WmError::corrupt(format!(
            "{} stream ends after {} of {} declared frames",
            format, decoded, declared
        ))),
        _ => Ok(()),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::signal::{generate_stereo_test_tone, generate_test_tone};
    use test_case::test_case;

    #[test_case("wav", AudioFormat::Wav ; "wav")]
    #[test_case(".FLAC", AudioFormat::Flac ; "flac with dot")]
    #[test_case("mp3", AudioFormat::Mp3 ; "mp3")]
    #[test_case("ogg", AudioFormat::Ogg ; "ogg")]
    fn test_from_extension(ext: &str, expected: AudioFormat) {
        assert_eq!(AudioFormat::from_extension(ext).unwrap(), expected);
    }

    #[test]
    fn test_m4a_is_unsupported() {
        let err = AudioFormat::from_filename("song.m4a").unwrap_err();
        assert_eq!(err.error_code(), "UNSUPPORTED_FORMAT");
    }

    #[test_case(16, 1.0 / 16384.0 ; "16 bit")]
    #[test_case(24, 1.0 / 4_000_000.0 ; "24 bit")]
    #[test_case(32, 1e-7 ; "32 bit float")]
    fn test_wav_roundtrip_fidelity(bit_depth: u16, tolerance: f32) {
        let buffer = generate_stereo_test_tone(440.0, 660.0, 0.25, 22_050, 0.8);
        let bytes = encode(&buffer, OutputFormat::wav(bit_depth)).unwrap();
        let decoded = decode(&bytes, AudioFormat::Wav).unwrap();

        assert_eq!(decoded.channels(), 2);
        assert_eq!(decoded.sample_rate, 22_050);
        assert_eq!(decoded.len(), buffer.len());
        for ch in 0..2 {
            for (a, b) in buffer.channel(ch).iter().zip(decoded.channel(ch)) {
                assert!((a - b).abs() <= tolerance, "{} vs {}", a, b);
            }
        }
    }

    #[test]
    fn test_encode_is_deterministic() {
        let buffer = generate_test_tone(1000.0, 0.1, 16_000, 0.5);
        let a = encode(&buffer, OutputFormat::default()).unwrap();
        let b = encode(&buffer, OutputFormat::default()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_wav_output_format_reads_bit_depth() {
        let buffer = generate_test_tone(1000.0, 0.1, 16_000, 0.5);
        let bytes = encode(&buffer, OutputFormat::wav(24)).unwrap();
        assert_eq!(wav_output_format(&bytes).unwrap(), OutputFormat::wav(24));
        assert!(wav_output_format(b"not a wav").is_err());
    }

    #[test]
    fn test_encode_lossy_container_unsupported() {
        let buffer = generate_test_tone(1000.0, 0.1, 16_000, 0.5);
        let err = encode(
            &buffer,
            OutputFormat {
                container: AudioFormat::Mp3,
                bit_depth: 16,
            },
        )
        .unwrap_err();
        assert_eq!(err.error_code(), "UNSUPPORTED_FORMAT");
    }

    #[test]
    fn test_encode_rejects_odd_bit_depth() {
        let buffer = generate_test_tone(1000.0, 0.1, 16_000, 0.5);
        assert!(encode(&buffer, OutputFormat::wav(12)).is_err());
    }

    #[test]
    fn test_encode_clamps_out_of_range() {
        let buffer = AudioBuffer::from_channels(vec![vec![2.0, -3.0, 0.0]], 8_000).unwrap();
        let bytes = encode(&buffer, OutputFormat::wav(16)).unwrap();
        let decoded = decode(&bytes, AudioFormat::Wav).unwrap();
        assert!(decoded.channel(0)[0] > 0.999);
        assert_eq!(decoded.channel(0)[1], -1.0);
    }

    #[test]
    fn test_garbage_is_corrupt_input() {
        let err = decode(b"definitely not a riff header", AudioFormat::Wav).unwrap_err();
        assert_eq!(err.error_code(), "CORRUPT_INPUT");
    }

    #[test]
    fn test_empty_input_is_corrupt() {
        let err = decode(&[], AudioFormat::Wav).unwrap_err();
        assert_eq!(err.error_code(), "CORRUPT_INPUT");
    }

    #[test]
    fn test_oversized_input_rejected_before_decoding() {
        let limits = DecodeLimits {
            max_input_bytes: 16,
            ..DecodeLimits::default()
        };
        let err = decode_with_limits(&[0u8; 64], AudioFormat::Wav, &limits).unwrap_err();
        assert_eq!(err.error_code(), "INVALID_PARAMETER");
        assert!(err.to_string().contains("audio_bytes"));
    }

    #[test]
    fn test_duration_limit_from_header() {
        let buffer = generate_test_tone(440.0, 2.0, 8_000, 0.5);
        let bytes = encode(&buffer, OutputFormat::wav(16)).unwrap();
        let limits = DecodeLimits {
            max_duration_secs: 1.0,
            ..DecodeLimits::default()
        };
        let err = decode_with_limits(&bytes, AudioFormat::Wav, &limits).unwrap_err();
        assert!(err.to_string().contains("duration"));
    }

    #[test]
    fn test_zero_frame_wav_is_corrupt() {
        let buffer = AudioBuffer::new(0, ChannelLayout::Mono, 16_000);
        let bytes = encode(&buffer, OutputFormat::wav(16)).unwrap();
        let err = decode(&bytes, AudioFormat::Wav).unwrap_err();
        assert_eq!(err.error_code(), "CORRUPT_INPUT");
    }

    #[test]
    fn test_probe_wav_reads_header() {
        let buffer = generate_test_tone(440.0, 1.5, 16_000, 0.5);
        let bytes = encode(&buffer, OutputFormat::wav(16)).unwrap();
        let info = probe(&bytes, AudioFormat::Wav).unwrap();
        assert_eq!(info.sample_rate, 16_000);
        assert_eq!(info.channels, 1);
        assert_eq!(info.frames, 24_000);
        assert!((info.duration_secs - 1.5).abs() < 1e-9);
    }

    fn flac_crc8(data: &[u8]) -> u8 {
        data.iter().fold(0u8, |mut crc, &byte| {
            crc ^= byte;
            for _ in 0..8 {
                crc = if crc & 0x80 != 0 { (crc << 1) ^ 0x07 } else { crc << 1 };
            }
            crc
        })
    }

    fn flac_crc16(data: &[u8]) -> u16 {
        data.iter().fold(0u16, |mut crc, &byte| {
            crc ^= (byte as u16) << 8;
            for _ in 0..8 {
                crc = if crc & 0x8000 != 0 { (crc << 1) ^ 0x8005 } else { crc << 1 };
            }
            crc
        })
    }

    const FLAC_BLOCK: usize = 256;

    /// Mono 16-bit 16 kHz FLAC with verbatim subframes, one per block
    fn build_flac(blocks: &[Vec<i16>], declared_frames: u64) -> (Vec<u8>, Vec<usize>) {
        let mut bytes = b"fLaC".to_vec();
        // Last metadata block, STREAMINFO, 34 bytes
        bytes.extend_from_slice(&[0x80, 0x00, 0x00, 0x22]);
        bytes.extend_from_slice(&(FLAC_BLOCK as u16).to_be_bytes());
        bytes.extend_from_slice(&(FLAC_BLOCK as u16).to_be_bytes());
        bytes.extend_from_slice(&[0; 6]);
        let packed: u64 = (16_000u64 << 44) | (15u64 << 36) | declared_frames;
        bytes.extend_from_slice(&packed.to_be_bytes());
        bytes.extend_from_slice(&[0; 16]);

        let mut frame_starts = Vec::new();
        for (number, block) in blocks.iter().enumerate() {
            assert_eq!(block.len(), FLAC_BLOCK);
            // 256-sample blocks at 16 kHz, mono, 16 bits
            let mut frame = vec![0xFF, 0xF8, 0x85, 0x08, number as u8];
            frame.push(flac_crc8(&frame));
            // Verbatim subframe
            frame.push(0x02);
            for sample in block {
                frame.extend_from_slice(&sample.to_be_bytes());
            }
            let crc = flac_crc16(&frame);
            frame.extend_from_slice(&crc.to_be_bytes());
            frame_starts.push(bytes.len());
            bytes.extend_from_slice(&frame);
        }
        (bytes, frame_starts)
    }

    /// Non-negative ramp so sample bytes never form a frame sync code
    fn flac_blocks(count: usize) -> Vec<Vec<i16>> {
        (0..count)
            .map(|b| {
                (0..FLAC_BLOCK)
                    .map(|i| (((b * FLAC_BLOCK + i) * 37) % 20_000) as i16)
                    .collect()
            })
            .collect()
    }

    #[test]
    fn test_flac_decodes_every_frame() {
        let blocks = flac_blocks(4);
        let (bytes, _) = build_flac(&blocks, 4 * FLAC_BLOCK as u64);
        let buffer = decode(&bytes, AudioFormat::Flac).unwrap();
        assert_eq!(buffer.sample_rate, 16_000);
        assert_eq!(buffer.len(), 4 * FLAC_BLOCK);
        let expected = blocks[2][10] as f32 / 32_768.0;
        assert!((buffer.channel(0)[2 * FLAC_BLOCK + 10] - expected).abs() < 1e-4);
    }

    #[test]
    fn test_damaged_flac_frame_is_corrupt() {
        let (mut bytes, frame_starts) = build_flac(&flac_blocks(4), 4 * FLAC_BLOCK as u64);
        // Flip a sample byte in the second frame; its checksum no longer matches
        bytes[frame_starts[1] + 40] ^= 0x55;
        let err = decode(&bytes, AudioFormat::Flac).unwrap_err();
        assert_eq!(err.error_code(), "CORRUPT_INPUT");
    }

    #[test]
    fn test_flac_shorter_than_declared_is_corrupt() {
        let (bytes, _) = build_flac(&flac_blocks(3), 4 * FLAC_BLOCK as u64);
        let err = decode(&bytes, AudioFormat::Flac).unwrap_err();
        assert_eq!(err.error_code(), "CORRUPT_INPUT");
        assert!(err.to_string().contains("768 of 1024"));
    }

    #[test]
    fn test_packet_decode_error_is_corrupt() {
        let err = symphonia_error(SymphoniaError::DecodeError("bad frame"), AudioFormat::Mp3);
        assert_eq!(err.error_code(), "CORRUPT_INPUT");
    }

    #[test]
    fn test_truncated_flac_is_rejected() {
        let err = decode(b"fLaC\x00\x00", AudioFormat::Flac).unwrap_err();
        assert!(err.is_client_error());
    }
}
