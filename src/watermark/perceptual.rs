//! Perceptual ("PerTh"-style) watermark
//!
//! A patchwork scheme on adjacent FFT bin pairs. Audio is cut into
//! non-overlapping rectangular frames of about 32 ms; eight consecutive
//! frames form a segment that carries one 64-bit codeword (see
//! [`super::codeword`]), eight bits per frame. Within each frame position a
//! keyed shuffle assigns the adjacent bin pairs of 200-4000 Hz to bits and
//! picks which bin of each pair is "up". Embedding pushes the magnitude
//! contrast `(|up| - |down|) / (|up| + |down|)` of every pair toward the
//! sign of its bit while keeping the pair's total magnitude and both phases.
//! The codeword repeats over every whole segment of the signal.

use log::debug;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rustfft::num_complex::Complex;

use super::codeword::{decode_word, encode_word, pilot_bits, WORD_BITS};
use super::Detection;
use crate::dsp::spectral::{frame_size_for, FftProcessor};
use crate::engine::buffer::AudioBuffer;
use crate::error::{Result, WmError};

// ============================================================================
// Constants
// ============================================================================

const FRAME_SECONDS: f64 = 0.032;
pub const FRAMES_PER_SEGMENT: usize = 8;
const BITS_PER_FRAME: usize = WORD_BITS / FRAMES_PER_SEGMENT;

/// Whole segments required before embedding or detection
pub const MIN_SEGMENTS: usize = 3;

const BAND_LOW_HZ: f64 = 200.0;
const BAND_HIGH_HZ: f64 = 4000.0;
const MAX_BAND_FRACTION: f64 = 0.45;

const LAYOUT_KEY: u64 = 0x5065_7254_6842_3031;

/// Contrast each pair is pushed to
const TARGET_CONTRAST: f64 = 0.4;

/// Minimum pair magnitude, as a linear amplitude
const AMPLITUDE_FLOOR: f64 = 1e-3;

/// Share of bits a segment must match to count as agreeing
const SEGMENT_AGREEMENT: f64 = 0.9;

// ============================================================================
// Bin layout
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct BinPair {
    bit: usize,
    up: usize,
    down: usize,
}

/// Keyed assignment of bin pairs to codeword bits for one sample rate
struct PairLayout {
    frame_size: usize,
    /// Pairs for each frame position within a segment
    positions: Vec<Vec<BinPair>>,
}

impl PairLayout {
    fn for_sample_rate(sample_rate: u32) -> Result<Self> {
        let frame_size = frame_size_for(sample_rate, FRAME_SECONDS);
        let bin_hz = sample_rate as f64 / frame_size as f64;
        let high_hz = BAND_HIGH_HZ.min(MAX_BAND_FRACTION * sample_rate as f64);
        let low = ((BAND_LOW_HZ / bin_hz).ceil() as usize).max(1);
        let high = (high_hz / bin_hz).floor() as usize;

        let base: Vec<(usize, usize)> = (low..high).step_by(2).map(|k| (k, k + 1)).collect();
        if base.len() < BITS_PER_FRAME {
            return Err(WmError::invalid(
                "sample_rate",
                format!(
                    "{} Hz leaves too few frequency bins for perceptual watermarking",
                    sample_rate
                ),
            ));
        }

        let positions = (0..FRAMES_PER_SEGMENT)
            .map(|position| {
                let mut rng = ChaCha8Rng::seed_from_u64(LAYOUT_KEY ^ position as u64);
                let mut pairs = base.clone();
                pairs.shuffle(&mut rng);
                pairs
                    .into_iter()
                    .enumerate()
                    .map(|(i, (a, b))| {
                        let (up, down) = if rng.gen::<bool>() { (a, b) } else { (b, a) };
                        BinPair {
                            bit: position * BITS_PER_FRAME + i % BITS_PER_FRAME,
                            up,
                            down,
                        }
                    })
                    .collect()
            })
            .collect();

        Ok(Self {
            frame_size,
            positions,
        })
    }

    fn segment_len(&self) -> usize {
        self.frame_size * FRAMES_PER_SEGMENT
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Shortest input the method accepts
pub fn min_duration_secs(sample_rate: u32) -> f64 {
    let frame_size = frame_size_for(sample_rate, FRAME_SECONDS);
    (frame_size * FRAMES_PER_SEGMENT * MIN_SEGMENTS) as f64 / sample_rate as f64
}

fn check_length(buffer: &AudioBuffer, layout: &PairLayout) -> Result<()> {
    if buffer.len() < layout.segment_len() * MIN_SEGMENTS {
        return Err(WmError::AudioTooShort {
            duration_secs: buffer.duration_secs(),
            min_secs: min_duration_secs(buffer.sample_rate),
            method: "perceptual".to_string(),
        });
    }
    Ok(())
}

/// Push one pair's contrast toward `bit`, leaving pairs that already exceed it
fn enforce_pair(spectrum: &mut [Complex<f64>], pair: &BinPair, bit: bool, floor: f64) {
    let up = spectrum[pair.up];
    let down = spectrum[pair.down];
    let (mag_up, mag_down) = (up.norm(), down.norm());
    let sum = mag_up + mag_down;

    let target = if bit { TARGET_CONTRAST } else { -TARGET_CONTRAST };
    if sum > floor {
        let contrast = (mag_up - mag_down) / sum;
        if (bit && contrast >= target) || (!bit && contrast <= target) {
            return;
        }
    }

    let total = sum.max(floor);
    spectrum[pair.up] = Complex::from_polar(total * (1.0 + target) / 2.0, up.arg());
    spectrum[pair.down] = Complex::from_polar(total * (1.0 - target) / 2.0, down.arg());
}

fn embed_channel(
    samples: &[f32],
    word: &[bool; WORD_BITS],
    layout: &PairLayout,
    fft: &FftProcessor,
) -> Vec<f32> {
    let size = layout.frame_size;
    let floor = AMPLITUDE_FLOOR * size as f64 / 2.0;
    let mut out = samples.to_vec();

    let segments = samples.len() / layout.segment_len();
    for segment in 0..segments {
        for (position, pairs) in layout.positions.iter().enumerate() {
            let start = (segment * FRAMES_PER_SEGMENT + position) * size;
            let frame: Vec<f64> = samples[start..start + size]
                .iter()
                .map(|&s| s as f64)
                .collect();

            let mut spectrum = fft.forward_real(&frame, None);
            for pair in pairs {
                enforce_pair(&mut spectrum, pair, word[pair.bit], floor);
            }
            let rebuilt = fft.inverse_real(&mut spectrum);

            for (dst, src) in out[start..start + size].iter_mut().zip(rebuilt) {
                *dst = src.clamp(-1.0, 1.0) as f32;
            }
        }
    }
    out
}

/// Soft bit values for every whole segment of one channel
///
/// Each value is the patchwork statistic over all pairs carrying that bit:
/// positive for 1, negative for 0, zero when the pairs hold no energy.
fn segment_soft_bits(
    samples: &[f32],
    layout: &PairLayout,
    fft: &FftProcessor,
) -> Vec<[f64; WORD_BITS]> {
    let size = layout.frame_size;
    let segments = samples.len() / layout.segment_len();

    (0..segments)
        .map(|segment| {
            let mut diff = [0.0_f64; WORD_BITS];
            let mut total = [0.0_f64; WORD_BITS];
            for (position, pairs) in layout.positions.iter().enumerate() {
                let start = (segment * FRAMES_PER_SEGMENT + position) * size;
                let frame: Vec<f64> = samples[start..start + size]
                    .iter()
                    .map(|&s| s as f64)
                    .collect();
                let spectrum = fft.forward_real(&frame, None);
                for pair in pairs {
                    let (up, down) = (spectrum[pair.up].norm(), spectrum[pair.down].norm());
                    diff[pair.bit] += up - down;
                    total[pair.bit] += up + down;
                }
            }

            let mut soft = [0.0_f64; WORD_BITS];
            for bit in 0..WORD_BITS {
                if total[bit] > 0.0 {
                    soft[bit] = diff[bit] / total[bit];
                }
            }
            soft
        })
        .collect()
}

/// 1 for a strict match, 0.5 for no decision, 0 for a mismatch
fn bit_agreement(soft: f64, expected: bool) -> f64 {
    if soft == 0.0 {
        0.5
    } else if (soft > 0.0) == expected {
        1.0
    } else {
        0.0
    }
}

// ============================================================================
// Embed / Detect
// ============================================================================

/// Embed `payload` in every whole segment of every channel
///
/// # Errors
/// * `InvalidParameter` - If the payload is empty or longer than 4 bytes
/// * `AudioTooShort` - If the input holds fewer than three segments
pub fn embed(buffer: &AudioBuffer, payload: &[u8]) -> Result<AudioBuffer> {
    let word = encode_word(payload)?;
    let layout = PairLayout::for_sample_rate(buffer.sample_rate)?;
    check_length(buffer, &layout)?;

    let fft = FftProcessor::new(layout.frame_size);
    let output = buffer.map_channels(|samples| Ok(embed_channel(samples, &word, &layout, &fft)))?;
    output.ensure_finite("perceptual embed")?;
    Ok(output)
}

/// Decode the repeated codeword
///
/// `present` requires the combined word to pass sync and CRC and a strict
/// majority of segments to agree with it on at least 90% of bits. The
/// confidence is the agreement of every segment with the known sync and
/// padding bits, rescaled from [0.5, 1] to [0, 1].
///
/// # Errors
/// * `AudioTooShort` - If the input holds fewer than three segments
pub fn detect(buffer: &AudioBuffer) -> Result<Detection> {
    let layout = PairLayout::for_sample_rate(buffer.sample_rate)?;
    check_length(buffer, &layout)?;
    let fft = FftProcessor::new(layout.frame_size);

    let segments: Vec<[f64; WORD_BITS]> = buffer
        .samples
        .iter()
        .flat_map(|channel| segment_soft_bits(channel, &layout, &fft))
        .collect();

    let mut combined = [0.0_f64; WORD_BITS];
    for soft in &segments {
        for (acc, value) in combined.iter_mut().zip(soft) {
            *acc += value;
        }
    }
    let word: Vec<bool> = combined.iter().map(|&v| v > 0.0).collect();
    let payload = decode_word(&word);

    let agreeing = segments
        .iter()
        .filter(|soft| {
            let matches: f64 = soft
                .iter()
                .zip(&word)
                .map(|(&s, &expected)| if bit_agreement(s, expected) == 1.0 { 1.0 } else { 0.0 })
                .sum();
            matches >= SEGMENT_AGREEMENT * WORD_BITS as f64
        })
        .count();
    let majority = agreeing * 2 > segments.len();

    let pilots: Vec<(usize, bool)> = pilot_bits().collect();
    let pilot_score: f64 = segments
        .iter()
        .flat_map(|soft| pilots.iter().map(move |&(i, expected)| bit_agreement(soft[i], expected)))
        .sum::<f64>()
        / (segments.len() * pilots.len()) as f64;
    let confidence = ((pilot_score - 0.5) * 2.0).clamp(0.0, 1.0);

    let present = payload.is_some() && majority;
    debug!(
        "Perceptual detection: {}/{} segments agree, pilot score {:.3}, decoded {}",
        agreeing,
        segments.len(),
        pilot_score,
        payload.is_some()
    );

    Ok(Detection {
        present,
        confidence,
        payload: if present { payload } else { None },
    })
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::buffer::ChannelLayout;
    use crate::engine::signal::{
        generate_silence, generate_stereo_test_tone, generate_test_tone, generate_white_noise,
    };
    use crate::watermark::codeword::DEFAULT_PAYLOAD;
    use test_case::test_case;

    #[test_case(16_000, 512 ; "16k")]
    #[test_case(44_100, 1024 ; "44k1")]
    #[test_case(48_000, 2048 ; "48k")]
    fn test_frame_sizes(sample_rate: u32, expected: usize) {
        let layout = PairLayout::for_sample_rate(sample_rate).unwrap();
        assert_eq!(layout.frame_size, expected);
    }

    #[test]
    fn test_layout_covers_every_bit() {
        let layout = PairLayout::for_sample_rate(16_000).unwrap();
        let mut counts = [0usize; WORD_BITS];
        for pairs in &layout.positions {
            for pair in pairs {
                counts[pair.bit] += 1;
                assert_eq!(pair.up.abs_diff(pair.down), 1);
            }
        }
        assert!(counts.iter().all(|&c| c >= 1));
    }

    #[test]
    fn test_layout_is_deterministic() {
        let a = PairLayout::for_sample_rate(22_050).unwrap();
        let b = PairLayout::for_sample_rate(22_050).unwrap();
        assert_eq!(a.positions, b.positions);
    }

    #[test]
    fn test_min_duration() {
        assert!((min_duration_secs(16_000) - 0.768).abs() < 1e-9);
        let short = generate_test_tone(440.0, 0.7, 16_000, 0.5);
        assert!(matches!(
            embed(&short, DEFAULT_PAYLOAD),
            Err(WmError::AudioTooShort { .. })
        ));
        assert!(matches!(detect(&short), Err(WmError::AudioTooShort { .. })));
    }

    #[test]
    fn test_roundtrip_on_noise() {
        let noise = generate_white_noise(2.0, 16_000, 0.3, 11);
        let marked = embed(&noise, b"ab").unwrap();
        assert_eq!(marked.len(), noise.len());

        let detection = detect(&marked).unwrap();
        assert!(detection.present);
        assert_eq!(detection.payload, Some(b"ab".to_vec()));
        assert!(detection.confidence > 0.9);
    }

    #[test]
    fn test_roundtrip_on_stereo_tone() {
        let tone = generate_stereo_test_tone(440.0, 550.0, 2.0, 48_000, 0.5);
        let marked = embed(&tone, DEFAULT_PAYLOAD).unwrap();
        assert_eq!(marked.channels(), 2);
        let detection = detect(&marked).unwrap();
        assert!(detection.present);
        assert_eq!(detection.payload.as_deref(), Some(DEFAULT_PAYLOAD));
    }

    #[test]
    fn test_roundtrip_on_silence() {
        let silence = generate_silence(1.0, 16_000, ChannelLayout::Mono);
        let detection = detect(&embed(&silence, b"Z").unwrap()).unwrap();
        assert!(detection.present);
        assert_eq!(detection.payload, Some(b"Z".to_vec()));
    }

    #[test]
    fn test_clean_audio_not_detected() {
        let noise = generate_white_noise(2.0, 16_000, 0.3, 5);
        let silence = generate_silence(2.0, 16_000, ChannelLayout::Mono);
        for clean in [noise, silence] {
            let detection = detect(&clean).unwrap();
            assert!(!detection.present);
            assert_eq!(detection.payload, None);
        }
        let silent = detect(&generate_silence(1.0, 16_000, ChannelLayout::Mono)).unwrap();
        assert_eq!(silent.confidence, 0.0);
    }

    #[test]
    fn test_embed_is_deterministic() {
        let noise = generate_white_noise(1.0, 16_000, 0.3, 2);
        assert_eq!(
            embed(&noise, DEFAULT_PAYLOAD).unwrap(),
            embed(&noise, DEFAULT_PAYLOAD).unwrap()
        );
    }

    #[test]
    fn test_trailing_partial_segment_untouched() {
        let noise = generate_white_noise(1.0, 16_000, 0.3, 3);
        let marked = embed(&noise, DEFAULT_PAYLOAD).unwrap();
        // 16000 samples hold three 4096-sample segments
        assert_eq!(&marked.channel(0)[12_288..], &noise.channel(0)[12_288..]);
    }

    #[test]
    fn test_oversized_payload_rejected() {
        let noise = generate_white_noise(1.0, 16_000, 0.3, 3);
        let err = embed(&noise, b"too long").unwrap_err();
        assert!(matches!(err, WmError::InvalidParameter { ref field, .. } if field == "payload"));
    }
}
