//! CLI Module
//!
//! Command-line interface for the wmbench watermark service.

pub mod commands;

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use uuid::Uuid;

/// wmbench - audio watermark embedding, detection and robustness testing
#[derive(Parser, Debug)]
#[command(name = "wmbench")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Catalog directory (overrides the config file and WMBENCH_STORAGE_ROOT)
    #[arg(long, global = true)]
    pub root: Option<PathBuf>,

    /// JSON configuration file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Audio to operate on: a file on disk or a stored asset
#[derive(Args, Debug, Clone)]
pub struct InputArgs {
    /// Audio file to read
    #[arg(conflicts_with = "asset", required_unless_present = "asset")]
    pub input: Option<PathBuf>,

    /// Stored asset id to read instead of a file
    #[arg(long)]
    pub asset: Option<Uuid>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Record an audio file as an original
    #[command(name = "upload")]
    Upload {
        /// Audio file to upload
        input: PathBuf,
    },

    /// Embed a watermark
    #[command(name = "embed")]
    Embed {
        #[command(flatten)]
        source: InputArgs,

        /// Watermark method (neural/audioseal, perceptual/perth)
        #[arg(short, long, default_value = "neural")]
        method: String,

        /// Perceptual payload text, up to 4 bytes
        #[arg(short, long)]
        payload: Option<String>,

        /// Where to write the watermarked WAV
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Detect a watermark
    #[command(name = "detect")]
    Detect {
        #[command(flatten)]
        source: InputArgs,

        /// Watermark method (neural/audioseal, perceptual/perth)
        #[arg(short, long, default_value = "neural")]
        method: String,
    },

    /// Apply a signal manipulation
    #[command(name = "manipulate")]
    Manipulate {
        #[command(flatten)]
        source: InputArgs,

        /// Manipulation kind (noise, compression, gain, resample, lowpass,
        /// highpass, timestretch, pitchshift)
        #[arg(short, long)]
        kind: String,

        /// Parameter as key=value, repeatable
        #[arg(short = 'p', long = "param")]
        params: Vec<String>,

        /// Where to write the manipulated WAV
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// List every stored asset
    #[command(name = "list")]
    List,

    /// List manipulated assets with their parameters
    #[command(name = "list-manipulated")]
    ListManipulated,

    /// Write a stored asset's bytes to a file
    #[command(name = "get")]
    Get {
        id: Uuid,

        /// Destination file
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Delete a stored asset
    #[command(name = "delete")]
    Delete { id: Uuid },

    /// Show an asset's derivation chain
    #[command(name = "lineage")]
    Lineage { id: Uuid },

    /// Re-derive an asset and compare it with the stored bytes
    #[command(name = "reproduce")]
    Reproduce { id: Uuid },

    /// List available watermark methods
    #[command(name = "methods")]
    Methods,

    /// Show storage usage
    #[command(name = "usage")]
    Usage,

    /// Remove blobs no asset references
    #[command(name = "sweep")]
    Sweep,

    /// Write a generated test tone as WAV
    #[command(name = "tone")]
    Tone {
        /// Destination file
        output: PathBuf,

        /// Frequency in Hz
        #[arg(short, long, default_value_t = 440.0)]
        frequency: f64,

        /// Duration in seconds
        #[arg(short, long, default_value_t = 3.0)]
        duration: f64,

        /// Sample rate in Hz
        #[arg(short, long, default_value_t = 16_000)]
        sample_rate: u32,

        /// Peak amplitude
        #[arg(short, long, default_value_t = 0.5)]
        amplitude: f32,

        /// Write digital silence instead of a tone
        #[arg(long)]
        silence: bool,
    },
}
