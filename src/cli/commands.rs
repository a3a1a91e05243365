//! CLI Command Implementations
//!
//! Implements the actual logic for each CLI command. Machine-readable
//! results are printed as pretty JSON.

use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use log::info;
use serde::Serialize;
use serde_json::Value;

use super::{Cli, Commands, InputArgs};
use crate::config::ServiceConfig;
use crate::engine::buffer::ChannelLayout;
use crate::engine::codec::{encode, OutputFormat};
use crate::engine::signal::{generate_silence, generate_test_tone};
use crate::manipulate::{ManipulationKind, Parameters};
use crate::service::{
    DetectRequest, EmbedRequest, ManipulateRequest, UploadRequest, WatermarkService,
};
use crate::watermark::WatermarkMethod;

/// Run a parsed command line
pub fn run(cli: Cli) -> Result<()> {
    if let Commands::Tone {
        output,
        frequency,
        duration,
        sample_rate,
        amplitude,
        silence,
    } = &cli.command
    {
        return tone(output, *frequency, *duration, *sample_rate, *amplitude, *silence);
    }

    let config = load_config(&cli)?;
    let service = WatermarkService::open(config).context("Failed to open catalog")?;

    match cli.command {
        Commands::Upload { input } => upload(&service, &input),
        Commands::Embed {
            source,
            method,
            payload,
            output,
        } => embed(&service, &source, &method, payload, output.as_deref()),
        Commands::Detect { source, method } => detect(&service, &source, &method),
        Commands::Manipulate {
            source,
            kind,
            params,
            output,
        } => manipulate(&service, &source, &kind, &params, output.as_deref()),
        Commands::List => print_json(&service.list_assets()?),
        Commands::ListManipulated => print_json(&service.list_manipulated()?),
        Commands::Get { id, output } => {
            let bytes = service.get_asset_bytes(id)?;
            write_output(&output, &bytes)
        }
        Commands::Delete { id } => print_json(&service.delete_asset(id)?),
        Commands::Lineage { id } => print_json(&service.lineage(id)?),
        Commands::Reproduce { id } => print_json(&service.reproduce(id)?),
        Commands::Methods => print_json(&service.available_methods()),
        Commands::Usage => print_json(&service.usage()?),
        Commands::Sweep => {
            let bytes_freed = service.sweep_orphans()?;
            print_json(&serde_json::json!({ "bytes_freed": bytes_freed }))
        }
        Commands::Tone { .. } => Ok(()),
    }
}

/// Config file (if given), environment overrides, then `--root`
pub fn load_config(cli: &Cli) -> Result<ServiceConfig> {
    let mut config = match &cli.config {
        Some(path) => ServiceConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => ServiceConfig::from_env()?,
    };
    if let Some(root) = &cli.root {
        config.storage_root = root.clone();
    }
    Ok(config)
}

/// Parse repeated `key=value` arguments into a parameter map
///
/// Values that parse as JSON (numbers, booleans) keep their type; anything
/// else is passed on as a string.
pub fn parse_params(params: &[String]) -> Result<Parameters> {
    let mut map = Parameters::new();
    for param in params {
        let (key, value) = match param.split_once('=') {
            Some((key, value)) if !key.trim().is_empty() => (key.trim(), value.trim()),
            _ => bail!("Parameter '{}' is not in key=value form", param),
        };
        let value = serde_json::from_str::<Value>(value)
            .unwrap_or_else(|_| Value::String(value.to_string()));
        if map.insert(key.to_string(), value).is_some() {
            bail!("Parameter '{}' given more than once", key);
        }
    }
    Ok(map)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn write_output(path: &Path, bytes: &[u8]) -> Result<()> {
    fs::write(path, bytes).with_context(|| format!("Failed to write {}", path.display()))?;
    println!("Wrote {} bytes to {}", bytes.len(), path.display());
    Ok(())
}

fn read_input(path: &Path) -> Result<(String, Vec<u8>)> {
    let bytes = fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let filename = path
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string());
    Ok((filename, bytes))
}

/// Record an audio file as an original.
fn upload(service: &WatermarkService, input: &Path) -> Result<()> {
    let (filename, audio_bytes) = read_input(input)?;
    let asset = service.upload(UploadRequest {
        filename,
        audio_bytes,
    })?;
    print_json(&asset)
}

/// Embed a watermark into a file or stored asset.
fn embed(
    service: &WatermarkService,
    source: &InputArgs,
    method: &str,
    payload: Option<String>,
    output: Option<&Path>,
) -> Result<()> {
    let payload = payload.map(String::into_bytes);
    let response = match (&source.input, source.asset) {
        (_, Some(id)) => {
            let method: WatermarkMethod = method.parse()?;
            service.embed_asset(id, method, payload.as_deref())?
        }
        (Some(input), None) => {
            let (filename, audio_bytes) = read_input(input)?;
            service.embed(EmbedRequest {
                filename,
                audio_bytes,
                method: method.to_string(),
                payload,
            })?
        }
        (None, None) => bail!("Give an input file or --asset"),
    };

    info!(
        "Watermarked asset {} from {}",
        response.asset.id, response.source_asset_id
    );
    if let Some(path) = output {
        write_output(path, &response.audio_bytes)?;
    }
    print_json(&response.asset)
}

/// Detect a watermark in a file or stored asset.
fn detect(service: &WatermarkService, source: &InputArgs, method: &str) -> Result<()> {
    let response = match (&source.input, source.asset) {
        (_, Some(id)) => service.detect_asset(id, method.parse()?)?,
        (Some(input), None) => {
            let (filename, audio_bytes) = read_input(input)?;
            service.detect(DetectRequest {
                filename,
                audio_bytes,
                method: method.to_string(),
            })?
        }
        (None, None) => bail!("Give an input file or --asset"),
    };
    print_json(&response)
}

/// Apply a manipulation to a file or stored asset.
fn manipulate(
    service: &WatermarkService,
    source: &InputArgs,
    kind: &str,
    params: &[String],
    output: Option<&Path>,
) -> Result<()> {
    let parameters = parse_params(params)?;
    let response = match (&source.input, source.asset) {
        (_, Some(id)) => {
            let kind: ManipulationKind = kind.parse()?;
            service.manipulate_asset(id, kind, &parameters)?
        }
        (Some(input), None) => {
            let (filename, audio_bytes) = read_input(input)?;
            service.manipulate(ManipulateRequest {
                filename,
                audio_bytes,
                kind: kind.to_string(),
                parameters,
            })?
        }
        (None, None) => bail!("Give an input file or --asset"),
    };

    if let Some(path) = output {
        write_output(path, &response.audio_bytes)?;
    }
    print_json(&response.asset)
}

/// Write a generated test signal.
fn tone(
    output: &Path,
    frequency: f64,
    duration: f64,
    sample_rate: u32,
    amplitude: f32,
    silence: bool,
) -> Result<()> {
    if !(duration.is_finite() && duration > 0.0) {
        bail!("Duration must be a positive number of seconds");
    }
    let buffer = if silence {
        generate_silence(duration, sample_rate, ChannelLayout::Mono)
    } else {
        generate_test_tone(frequency, duration, sample_rate, amplitude)
    };
    let bytes = encode(&buffer, OutputFormat::default())?;
    write_output(output, &bytes)
}
