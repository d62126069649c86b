//! List DRM connectors and show which output the presenter would bind
//!
//! Only queries the kernel; nothing is modeset.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use kms_presenter::config::DEFAULT_DEVICE;
use kms_presenter::{locate_output, Card, KmsDevice};

#[derive(Parser, Debug)]
#[command(name = "probe_outputs")]
#[command(about = "Show DRM outputs and the one kms-presenter would use", long_about = None)]
struct Args {
    /// DRM card node
    #[arg(default_value = DEFAULT_DEVICE)]
    device: PathBuf,

    /// Enable verbose debug output
    #[arg(short, long)]
    debug: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_max_level(if args.debug {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        })
        .init();

    println!("=== DRM output probe: {} ===\n", args.device.display());

    let card = Card::open(&args.device)?;
    let resources = card
        .resources()
        .context("Failed to read DRM resources")?;
    println!(
        "{} connectors, {} encoders, {} CRTCs\n",
        resources.connectors.len(),
        resources.encoders.len(),
        resources.crtcs.len()
    );

    for &id in &resources.connectors {
        match card.connector(id) {
            Ok(info) => {
                println!("Connector {} ({}): {:?}", id, info.name, info.state);
                if let Some(encoder) = info.encoder {
                    println!("  Encoder: {}", encoder);
                }
                for (i, mode) in info.modes.iter().enumerate() {
                    println!("  [{}] {} ({} kHz)", i, mode, mode.clock);
                }
            }
            Err(e) => println!("Connector {}: query failed: {}", id, e),
        }
    }

    println!("\n--- Selected output ---");
    match locate_output(&card) {
        Ok(located) => {
            let binding = &located.binding;
            println!("  Connector: {}", binding.connector);
            println!("  Encoder:   {}", binding.encoder);
            println!("  CRTC:      {}", binding.crtc);
            println!("  Mode:      {}", binding.mode);
            match located.saved_crtc.mode {
                Some(mode) => println!(
                    "  Currently: {} fb={}",
                    mode,
                    located
                        .saved_crtc
                        .framebuffer
                        .map(|fb| fb.to_string())
                        .unwrap_or_else(|| "none".into())
                ),
                None => println!("  Currently: disabled"),
            }
        }
        Err(e) => println!("  None: {}", e),
    }

    Ok(())
}
