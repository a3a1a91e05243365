//! wmbench - Audio Watermark Service
//!
//! Embeds and detects audio watermarks, stress-tests them with signal
//! manipulations, and keeps a provenance catalog of every artifact.
//!
//! # Architecture
//!
//! Leaves first:
//! - `engine`: audio buffers and the codec (bytes to samples and back)
//! - `dsp`: filters, resampling, FFT, phase vocoder, codec simulation
//! - `watermark`: the neural ("AudioSeal") and perceptual ("PerTh") methods
//! - `manipulate`: typed manipulations parsed from parameter maps
//! - `state`: asset records, the content-addressed store and the catalog
//! - `service`: the request/response facade over all of the above

pub mod cli;
pub mod config;
pub mod dsp;
pub mod engine;
pub mod error;
pub mod manipulate;
pub mod service;
pub mod state;
pub mod watermark;

pub use config::ServiceConfig;
pub use error::{ErrorKind, ErrorResponse, Result, WmError};
pub use service::WatermarkService;
