//! kms-presenter - fullscreen GLES demo straight on a DRM card
//!
//! Takes over the first connected output, fades the screen from red to green
//! over the configured duration, then hands the CRTC back.

use std::path::PathBuf;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_appender::rolling;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use kms_presenter::gl::{self, Gles};
use kms_presenter::{Config, GbmEglBackend, Pipeline};

#[derive(Parser, Debug)]
#[command(name = "kms-presenter")]
#[command(about = "Render with OpenGL ES directly on a DRM/KMS output", long_about = None)]
struct Args {
    /// Config file (default: $XDG_CONFIG_HOME/kms-presenter/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// DRM card node, overrides the config file
    #[arg(long)]
    device: Option<PathBuf>,

    /// Seconds to keep presenting, overrides the config file
    #[arg(long)]
    duration: Option<u64>,

    /// Enable verbose debug output
    #[arg(short, long)]
    debug: bool,
}

fn state_dir() -> PathBuf {
    std::env::var("XDG_STATE_HOME")
        .map(PathBuf::from)
        .or_else(|_| std::env::var("HOME").map(|h| PathBuf::from(h).join(".local/state")))
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
        .join("kms-presenter")
}

fn main() -> Result<()> {
    let log_dir = state_dir();
    std::fs::create_dir_all(&log_dir).ok();

    // Set up panic hook to log panics before crashing
    let crash_log = log_dir.join("crash.log");
    std::panic::set_hook(Box::new(move |panic_info| {
        eprintln!("PANIC: {}", panic_info);
        if let Ok(mut f) = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&crash_log)
        {
            use std::io::Write;
            let _ = writeln!(f, "[{}] PANIC: {}", chrono::Local::now(), panic_info);
        }
    }));

    let args = Args::parse();

    // File appender, rotated daily
    let file_appender = rolling::daily(&log_dir, "kms-presenter.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    let default_filter = if args.debug {
        "debug,kms_presenter=debug"
    } else {
        "warn,kms_presenter=info"
    };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
        .init();

    info!(log_path = %log_dir.display(), "kms-presenter starting");

    let config = Config::load(args.config.as_deref())
        .context("Failed to load configuration")?
        .with_device(args.device)
        .with_duration(args.duration);

    run(&config)
}

fn run(config: &Config) -> Result<()> {
    let mut pipeline = Pipeline::open(
        &mut GbmEglBackend,
        &config.device.path,
        &config.egl_config(),
    )
    .with_context(|| format!("Failed to set up display on {}", config.device.path.display()))?;

    let gles = Gles::load()?;
    info!(
        renderer = %gles.get_string(gl::RENDERER).unwrap_or_default(),
        version = %gles.get_string(gl::VERSION).unwrap_or_default(),
        "GL context ready"
    );

    let (width, height) = match pipeline.binding() {
        Some(binding) => binding.mode.size(),
        None => bail!("Pipeline has no output binding"),
    };
    gles.viewport(0, 0, width as i32, height as i32);

    let duration = config.duration();
    let max_failures = config.demo.max_consecutive_failures;
    let start = Instant::now();
    let mut failures = 0u32;

    while start.elapsed() < duration {
        let progress = start.elapsed().as_secs_f32() / duration.as_secs_f32();
        let [r, g, b] = gl::fade_color(progress);
        gles.clear_color(r, g, b, 1.0);
        gles.clear(gl::COLOR_BUFFER_BIT);

        match pipeline.submit_frame() {
            Ok(_) => failures = 0,
            Err(e) => {
                failures += 1;
                warn!(failures, "Frame not presented: {}", e);
                if failures >= max_failures {
                    pipeline.shutdown();
                    bail!("Giving up after {} failed frames in a row: {}", failures, e);
                }
            }
        }
    }

    let frames = pipeline.presenter().map(|p| p.frame_count()).unwrap_or(0);
    info!(
        frames,
        secs = start.elapsed().as_secs_f32(),
        "Presentation finished"
    );

    pipeline.shutdown();
    Ok(())
}
