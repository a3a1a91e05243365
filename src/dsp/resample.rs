//! Band-limited resampling
//!
//! Runs rubato's sinc resampler over the whole signal in one chunk. When
//! downsampling rubato scales the anti-aliasing cutoff to the new Nyquist
//! frequency, so content above it is removed instead of folding back.

use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};

use crate::engine::buffer::{AudioBuffer, MAX_SAMPLE_RATE, MIN_SAMPLE_RATE};
use crate::error::{Result, WmError};

/// Sinc kernel length in input frames
const SINC_LEN: usize = 256;

fn sinc_parameters() -> SincInterpolationParameters {
    SincInterpolationParameters {
        sinc_len: SINC_LEN,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Cubic,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    }
}

/// Resample channels of equal length to exactly `out_len` frames each
///
/// `ratio` is output rate over input rate. The input is zero padded by one
/// kernel length so the tail is flushed, and the kernel delay of
/// `SINC_LEN / 2` input frames is dropped from the front.
///
/// # Errors
/// * `InternalProcessingFailure` - If rubato rejects the ratio or fails
pub fn resample_channels(
    channels: &[Vec<f32>],
    ratio: f64,
    out_len: usize,
) -> Result<Vec<Vec<f32>>> {
    let in_len = channels.first().map_or(0, Vec::len);
    if in_len == 0 || out_len == 0 {
        return Ok(vec![vec![0.0; out_len]; channels.len()]);
    }

    let chunk_size = in_len + SINC_LEN;
    let mut resampler =
        SincFixedIn::<f64>::new(ratio, 1.0, sinc_parameters(), chunk_size, channels.len())
            .map_err(|e| WmError::internal(format!("resampler setup failed: {}", e)))?;

    let input: Vec<Vec<f64>> = channels
        .iter()
        .map(|ch| {
            let mut padded: Vec<f64> = ch.iter().map(|&s| s as f64).collect();
            padded.resize(chunk_size, 0.0);
            padded
        })
        .collect();

    let output = resampler
        .process(&input, None)
        .map_err(|e| WmError::internal(format!("resampling failed: {}", e)))?;

    let delay = (SINC_LEN as f64 / 2.0 * ratio).round() as usize;
    Ok(output
        .into_iter()
        .map(|ch| {
            let mut trimmed: Vec<f32> = ch
                .into_iter()
                .skip(delay)
                .take(out_len)
                .map(|s| s as f32)
                .collect();
            trimmed.resize(out_len, 0.0);
            trimmed
        })
        .collect())
}

/// Resample one channel to exactly `out_len` samples
pub fn resample_to_length(samples: &[f32], ratio: f64, out_len: usize) -> Result<Vec<f32>> {
    let mut channels = resample_channels(&[samples.to_vec()], ratio, out_len)?;
    Ok(channels.pop().unwrap_or_default())
}

/// Output length for a rate change, preserving duration
pub fn resampled_len(len: usize, source_rate: u32, target_rate: u32) -> usize {
    ((len as f64) * target_rate as f64 / source_rate as f64).round() as usize
}

/// Resample every channel of a buffer to `target_rate`
///
/// # Errors
/// * `InvalidParameter` - If `target_rate` is outside 1 kHz..=384 kHz
/// * `InternalProcessingFailure` - If the resampler fails
pub fn resample_buffer(buffer: &AudioBuffer, target_rate: u32) -> Result<AudioBuffer> {
    if !(MIN_SAMPLE_RATE..=MAX_SAMPLE_RATE).contains(&target_rate) {
        return Err(WmError::invalid(
            "sample_rate",
            format!(
                "{} Hz outside {}..={} Hz",
                target_rate, MIN_SAMPLE_RATE, MAX_SAMPLE_RATE
            ),
        ));
    }
    if target_rate == buffer.sample_rate {
        return Ok(buffer.clone());
    }

    let ratio = target_rate as f64 / buffer.sample_rate as f64;
    let out_len = resampled_len(buffer.len(), buffer.sample_rate, target_rate);
    let samples = resample_channels(&buffer.samples, ratio, out_len)?;

    AudioBuffer::from_channels(samples, target_rate)
}
