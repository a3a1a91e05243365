//! Audio Buffer
//!
//! The canonical in-memory representation every codec, watermark method and
//! manipulation works on: non-interleaved 32-bit float samples in [-1, 1]
//! plus the sample rate they were recorded at. Buffers keep whatever rate the
//! source had; only the resample manipulation changes it.

use crate::error::{Result, WmError};

// ============================================================================
// Constants
// ============================================================================

/// Lowest sample rate accepted anywhere in the pipeline
pub const MIN_SAMPLE_RATE: u32 = 1_000;

/// Highest sample rate accepted anywhere in the pipeline
pub const MAX_SAMPLE_RATE: u32 = 384_000;

// ============================================================================
// Helper Functions
// ============================================================================

/// Convert decibels to linear amplitude
///
/// # Arguments
/// * `db` - Value in decibels
///
/// # Returns
/// Linear amplitude (0.0 to 1.0+ range)
#[inline]
pub fn db_to_linear(db: f64) -> f64 {
    10.0_f64.powf(db / 20.0)
}

/// Convert linear amplitude to decibels
///
/// Returns -infinity for zero input.
#[inline]
pub fn linear_to_db(linear: f64) -> f64 {
    if linear <= 0.0 {
        f64::NEG_INFINITY
    } else {
        20.0 * linear.log10()
    }
}

/// Mean square of a slice, accumulated in f64
pub fn mean_square(samples: &[f32]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f64 = samples.iter().map(|&s| (s as f64) * (s as f64)).sum();
    sum / samples.len() as f64
}

/// RMS of a slice
#[inline]
pub fn rms(samples: &[f32]) -> f64 {
    mean_square(samples).sqrt()
}

// ============================================================================
// Channel Layout
// ============================================================================

/// Audio channel configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ChannelLayout {
    /// Single channel (mono)
    #[default]
    Mono,
    /// Two channels (stereo: left, right)
    Stereo,
}

impl ChannelLayout {
    /// Returns the number of channels for this layout
    pub fn num_channels(&self) -> usize {
        match self {
            ChannelLayout::Mono => 1,
            ChannelLayout::Stereo => 2,
        }
    }

    /// Create a ChannelLayout from a channel count
    pub fn from_count(count: usize) -> Option<Self> {
        match count {
            1 => Some(ChannelLayout::Mono),
            2 => Some(ChannelLayout::Stereo),
            _ => None,
        }
    }
}

// ============================================================================
// Audio Buffer
// ============================================================================

/// Decoded audio: one `Vec<f32>` per channel
///
/// # Example
/// ```
/// use wmbench::engine::buffer::{AudioBuffer, ChannelLayout};
///
/// let buffer = AudioBuffer::new(16_000, ChannelLayout::Mono, 16_000);
/// assert_eq!(buffer.channels(), 1);
/// assert_eq!(buffer.duration_secs(), 1.0);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    /// Sample data: outer Vec is channels, inner Vec is samples
    pub samples: Vec<Vec<f32>>,
    /// Sample rate in Hz
    pub sample_rate: u32,
}

impl AudioBuffer {
    /// Create a silent buffer
    ///
    /// # Arguments
    /// * `num_samples` - Number of samples per channel
    /// * `layout` - Channel configuration (Mono or Stereo)
    /// * `sample_rate` - Sample rate in Hz
    pub fn new(num_samples: usize, layout: ChannelLayout, sample_rate: u32) -> Self {
        Self {
            samples: vec![vec![0.0_f32; num_samples]; layout.num_channels()],
            sample_rate,
        }
    }

    /// Create a buffer from per-channel sample vectors
    ///
    /// # Errors
    /// * `UnsupportedFormat` - If there are not 1 or 2 channels
    /// * `CorruptInput` - If the channels differ in length
    pub fn from_channels(samples: Vec<Vec<f32>>, sample_rate: u32) -> Result<Self> {
        if ChannelLayout::from_count(samples.len()).is_none() {
            return Err(WmError::UnsupportedFormat {
                format: format!(
                    "{}-channel audio (only mono/stereo supported)",
                    samples.len()
                ),
            });
        }
        let len = samples[0].len();
        if samples.iter().any(|ch| ch.len() != len) {
            return Err(WmError::corrupt("channels have different lengths"));
        }
        Ok(Self {
            samples,
            sample_rate,
        })
    }

    /// Create an audio buffer from interleaved sample data
    ///
    /// # Arguments
    /// * `interleaved` - Interleaved sample data (L, R, L, R, ... for stereo)
    /// * `layout` - Channel configuration
    /// * `sample_rate` - Sample rate in Hz
    ///
    /// # Errors
    /// * `CorruptInput` - If the data length is not a multiple of the channel count
    pub fn from_interleaved(
        interleaved: &[f32],
        layout: ChannelLayout,
        sample_rate: u32,
    ) -> Result<Self> {
        let num_channels = layout.num_channels();

        if interleaved.len() % num_channels != 0 {
            return Err(WmError::corrupt(format!(
                "Interleaved data length {} is not divisible by channel count {}",
                interleaved.len(),
                num_channels
            )));
        }

        let num_samples = interleaved.len() / num_channels;
        let mut samples = vec![Vec::with_capacity(num_samples); num_channels];

        for frame in interleaved.chunks_exact(num_channels) {
            for (ch, &sample) in frame.iter().enumerate() {
                samples[ch].push(sample);
            }
        }

        Ok(Self {
            samples,
            sample_rate,
        })
    }

    /// Convert the buffer to interleaved format
    pub fn to_interleaved(&self) -> Vec<f32> {
        let num_channels = self.channels();
        let num_samples = self.len();

        let mut interleaved = Vec::with_capacity(num_channels * num_samples);
        for sample_idx in 0..num_samples {
            for channel in &self.samples {
                interleaved.push(channel[sample_idx]);
            }
        }

        interleaved
    }

    /// Build a buffer with the same rate by mapping every channel
    pub fn map_channels<F>(&self, mut f: F) -> Result<Self>
    where
        F: FnMut(&[f32]) -> Result<Vec<f32>>,
    {
        let samples = self
            .samples
            .iter()
            .map(|ch| f(ch))
            .collect::<Result<Vec<_>>>()?;
        Self::from_channels(samples, self.sample_rate)
    }

    /// Get the number of channels
    #[inline]
    pub fn channels(&self) -> usize {
        self.samples.len()
    }

    /// Get the number of samples per channel
    #[inline]
    pub fn len(&self) -> usize {
        self.samples.first().map(|ch| ch.len()).unwrap_or(0)
    }

    /// Check if the buffer is empty (no samples)
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get the duration in seconds
    #[inline]
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.len() as f64 / self.sample_rate as f64
    }

    /// Nyquist frequency in Hz
    #[inline]
    pub fn nyquist(&self) -> f64 {
        self.sample_rate as f64 / 2.0
    }

    /// Get the channel layout
    pub fn channel_layout(&self) -> Option<ChannelLayout> {
        ChannelLayout::from_count(self.channels())
    }

    /// Get immutable access to a channel's samples
    ///
    /// # Panics
    /// Panics if the channel index is out of bounds
    #[inline]
    pub fn channel(&self, index: usize) -> &[f32] {
        &self.samples[index]
    }

    /// Get mutable access to a channel's samples
    ///
    /// # Panics
    /// Panics if the channel index is out of bounds
    #[inline]
    pub fn channel_mut(&mut self, index: usize) -> &mut [f32] {
        &mut self.samples[index]
    }

    /// Mean signal power across all channels
    pub fn signal_power(&self) -> f64 {
        let total = self.channels() * self.len();
        if total == 0 {
            return 0.0;
        }
        let sum: f64 = self
            .samples
            .iter()
            .map(|ch| mean_square(ch) * ch.len() as f64)
            .sum();
        sum / total as f64
    }

    /// Peak absolute sample value
    pub fn peak(&self) -> f32 {
        self.samples
            .iter()
            .flat_map(|channel| channel.iter())
            .map(|&s| s.abs())
            .fold(0.0_f32, f32::max)
    }

    /// Check if all samples are finite (not NaN or Infinity)
    pub fn is_finite(&self) -> bool {
        self.samples
            .iter()
            .flat_map(|ch| ch.iter())
            .all(|s| s.is_finite())
    }

    /// Fail with `InternalProcessingFailure` if any sample is NaN or infinite
    pub fn ensure_finite(&self, stage: &str) -> Result<()> {
        if self.is_finite() {
            Ok(())
        } else {
            Err(WmError::internal(format!(
                "{} produced non-finite samples",
                stage
            )))
        }
    }

    /// Clamp all samples to the valid range [-1.0, 1.0]
    pub fn clamp(&mut self) {
        for channel in &mut self.samples {
            for sample in channel.iter_mut() {
                *sample = sample.clamp(-1.0, 1.0);
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_db_to_linear() {
        assert_relative_eq!(db_to_linear(0.0), 1.0);
        assert!((db_to_linear(-6.0206) - 0.5).abs() < 1e-4);
        assert!((db_to_linear(20.0) - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_linear_to_db() {
        assert_relative_eq!(linear_to_db(1.0), 0.0);
        assert_eq!(linear_to_db(0.0), f64::NEG_INFINITY);
    }

    #[test]
    fn test_channel_layout() {
        assert_eq!(ChannelLayout::Mono.num_channels(), 1);
        assert_eq!(ChannelLayout::Stereo.num_channels(), 2);
        assert_eq!(ChannelLayout::from_count(2), Some(ChannelLayout::Stereo));
        assert_eq!(ChannelLayout::from_count(6), None);
    }

    #[test]
    fn test_buffer_duration_keeps_source_rate() {
        let buffer = AudioBuffer::new(24_000, ChannelLayout::Stereo, 16_000);
        assert_eq!(buffer.sample_rate, 16_000);
        assert_relative_eq!(buffer.duration_secs(), 1.5);
        assert_relative_eq!(buffer.nyquist(), 8_000.0);
    }

    #[test]
    fn test_from_channels_rejects_surround() {
        let err = AudioBuffer::from_channels(vec![vec![0.0; 4]; 6], 48_000).unwrap_err();
        assert_eq!(err.error_code(), "UNSUPPORTED_FORMAT");
    }

    #[test]
    fn test_from_channels_rejects_ragged() {
        let err = AudioBuffer::from_channels(vec![vec![0.0; 4], vec![0.0; 3]], 48_000)
            .unwrap_err();
        assert_eq!(err.error_code(), "CORRUPT_INPUT");
    }

    #[test]
    fn test_interleaved_roundtrip() {
        let interleaved = vec![0.1, -0.1, 0.2, -0.2, 0.3, -0.3];
        let buffer =
            AudioBuffer::from_interleaved(&interleaved, ChannelLayout::Stereo, 44_100).unwrap();
        assert_eq!(buffer.channel(0), &[0.1, 0.2, 0.3]);
        assert_eq!(buffer.channel(1), &[-0.1, -0.2, -0.3]);
        assert_eq!(buffer.to_interleaved(), interleaved);
    }

    #[test]
    fn test_from_interleaved_invalid_length() {
        let result = AudioBuffer::from_interleaved(&[0.0; 5], ChannelLayout::Stereo, 44_100);
        assert!(result.is_err());
    }

    #[test]
    fn test_signal_power() {
        let buffer = AudioBuffer::from_channels(vec![vec![0.5; 100], vec![-0.5; 100]], 8_000)
            .unwrap();
        assert_relative_eq!(buffer.signal_power(), 0.25, epsilon = 1e-9);
        assert_eq!(AudioBuffer::new(0, ChannelLayout::Mono, 8_000).signal_power(), 0.0);
    }

    #[test]
    fn test_ensure_finite() {
        let mut buffer = AudioBuffer::new(4, ChannelLayout::Mono, 8_000);
        assert!(buffer.ensure_finite("test").is_ok());
        buffer.channel_mut(0)[2] = f32::NAN;
        let err = buffer.ensure_finite("lowpass").unwrap_err();
        assert!(err.to_string().contains("lowpass"));
    }

    #[test]
    fn test_clamp() {
        let mut buffer =
            AudioBuffer::from_channels(vec![vec![1.5, -2.0, 0.25]], 8_000).unwrap();
        buffer.clamp();
        assert_eq!(buffer.channel(0), &[1.0, -1.0, 0.25]);
        assert_eq!(buffer.peak(), 1.0);
    }

    #[test]
    fn test_map_channels_preserves_rate() {
        let buffer = AudioBuffer::new(10, ChannelLayout::Stereo, 22_050);
        let mapped = buffer
            .map_channels(|ch| Ok(ch.iter().map(|s| s + 0.5).collect()))
            .unwrap();
        assert_eq!(mapped.sample_rate, 22_050);
        assert_eq!(mapped.channels(), 2);
        assert_eq!(mapped.channel(1)[9], 0.5);
    }
}
