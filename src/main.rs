// src/main.rs

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use fable::progress::BarProgress;
use fable::{detect_format, CodecOptions, PackFormat, RawCodec};
use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use tracing::info;

#[derive(Parser)]
#[command(name = "fable")]
#[command(author, version, about = "Story pack converter for screenless storyteller devices", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show a pack's format and header metadata
    Info {
        /// Pack file or device directory
        path: PathBuf,
    },
    /// Convert a pack to another format (chosen by the output path)
    Convert {
        /// Source pack file or device directory
        input: PathBuf,
        /// Destination: .pack, .zip, or a directory for the device layout
        output: PathBuf,
        /// Device cipher key, 32 hex digits (device input or output only)
        #[arg(short, long)]
        key: Option<String>,
    },
}

/// Parse a 128-bit cipher key from its hex notation
fn parse_key(hex_key: &str) -> Result<[u8; 16]> {
    let bytes = hex::decode(hex_key)?;
    match <[u8; 16]>::try_from(bytes.as_slice()) {
        Ok(key) => Ok(key),
        Err(_) => bail!("device key must be 32 hex digits, got {}", hex_key.len()),
    }
}

fn main() -> Result<()> {
    // Initialize tracing subscriber for logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Info { path } => {
            let format = detect_format(&path)?;
            println!("format: {}", format);
            if format == PackFormat::Raw {
                let info = RawCodec.read_info(BufReader::new(File::open(&path)?))?;
                println!("uuid: {}", info.uuid);
                println!("version: {}", info.version);
                println!("stages: {}", info.stage_count);
                println!("factory disabled: {}", info.factory_disabled);
            }
            Ok(())
        }
        Commands::Convert { input, output, key } => {
            info!("Converting {} -> {}", input.display(), output.display());
            let options = CodecOptions {
                device_key: key.as_deref().map(parse_key).transpose()?,
            };
            let progress = BarProgress::new("converting");
            fable::convert(&input, &output, &options, &progress)?;
            progress.finish();
            println!("Wrote {}", output.display());
            Ok(())
        }
    }
}
