//! OMR Toolkit - bubble sheet recognition from the command line
//!
//! Reads answer forms from image files, or from a sequence of frames played
//! back as a camera feed, and prints a JSON report.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use omr_toolkit::capture::{CapturedFrame, StillImageCamera};
use omr_toolkit::config::{self, AppConfig, OcrBackend};
use omr_toolkit::shared::SessionEvent;
use omr_toolkit::template::Template;
use omr_toolkit::{KeySource, OmrApp, OmrReport};

/// OMR Toolkit - optical mark recognition for bubble answer sheets
#[derive(Parser, Debug)]
#[command(name = "omr-toolkit")]
#[command(about = "Reads and scores bubble answer sheets against a JSON template")]
struct Args {
    /// Configuration file (defaults to the user config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Override the configured OCR backend
    #[arg(long, global = true, value_enum)]
    ocr: Option<OcrBackend>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Read and score a single form image
    Read {
        /// Template JSON
        #[arg(long)]
        template: PathBuf,
        /// Student form image
        #[arg(long)]
        image: PathBuf,
        #[command(flatten)]
        key: KeyArgs,
        /// Write the report here instead of stdout
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Detect alignment markers in an image
    Detect {
        #[arg(long)]
        image: PathBuf,
    },
    /// Play frames back as a camera, capture once aligned, then read and score
    Scan {
        #[arg(long)]
        template: PathBuf,
        /// Frames in playback order; the last one is held
        #[arg(long, num_args = 1.., required = true)]
        frames: Vec<PathBuf>,
        #[command(flatten)]
        key: KeyArgs,
        #[arg(long)]
        output: Option<PathBuf>,
        /// Give up if nothing was captured after this long
        #[arg(long)]
        max_wait_ms: Option<u64>,
    },
    /// Write the default configuration file
    InitConfig {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[derive(clap::Args, Debug)]
#[group(multiple = false)]
struct KeyArgs {
    /// Read the answer key from a filled-in key form
    #[arg(long)]
    key_image: Option<PathBuf>,

    /// Use the student form as its own key
    #[arg(long)]
    self_key: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if let Command::InitConfig { force } = &args.command {
        return init_config(args.config.as_deref(), *force);
    }

    let mut config = load_or_default_config(args.config.as_deref())?;
    if let Some(backend) = args.ocr {
        config.ocr.backend = backend;
    }

    match args.command {
        Command::Read {
            template,
            image,
            key,
            output,
        } => {
            let app = OmrApp::new(config);
            let template = load_template(&template)?;
            let frame = load_frame(&image).await?;
            let key_frame = match &key.key_image {
                Some(path) if same_file(path, &image) => {
                    warn!("Key image {:?} is the student image", path);
                    Some(frame.clone())
                }
                Some(path) => Some(load_frame(path).await?),
                None => None,
            };
            let report = app
                .process(template, frame, key_source(&key, key_frame.as_ref()))
                .await?;
            write_report(&report, output.as_deref())?;
        }
        Command::Detect { image } => {
            let app = OmrApp::new(config);
            let frame = load_frame(&image).await?;
            let (corners, status) = app.detect(&frame);
            let out = serde_json::json!({ "status": status, "corners": corners });
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        Command::Scan {
            template,
            frames,
            key,
            output,
            max_wait_ms,
        } => {
            let (tx, rx) = crossbeam_channel::unbounded();
            std::thread::spawn(move || {
                for event in rx {
                    log_event(&event);
                }
            });

            let app = OmrApp::new(config).with_events(tx);
            let template = load_template(&template)?;
            let key_frame = match &key.key_image {
                Some(path) => Some(load_frame(path).await?),
                None => None,
            };

            let camera = StillImageCamera::new(frames);
            let mut session = app.capture_session();
            let handle = session.handle();

            let stopper = handle.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("Interrupted, stopping capture session");
                    stopper.stop();
                }
            });
            if let Some(ms) = max_wait_ms {
                let stopper = handle.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_millis(ms)).await;
                    if stopper.is_active() {
                        warn!("No capture after {} ms, stopping", ms);
                        stopper.stop();
                    }
                });
            }

            let frame = app.capture(&camera, &mut session).await?;
            let report = app
                .process(template, frame, key_source(&key, key_frame.as_ref()))
                .await?;
            write_report(&report, output.as_deref())?;
        }
        Command::InitConfig { .. } => {}
    }

    Ok(())
}

fn key_source<'a>(key: &KeyArgs, key_frame: Option<&'a CapturedFrame>) -> KeySource<'a> {
    match key_frame {
        Some(frame) => KeySource::Form(frame),
        None if key.self_key => KeySource::SelfKey,
        None => KeySource::Template,
    }
}

/// Whether two paths name the same file
fn same_file(a: &Path, b: &Path) -> bool {
    match (std::fs::canonicalize(a), std::fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

/// Load configuration from file or fall back to defaults
fn load_or_default_config(path: Option<&Path>) -> Result<AppConfig> {
    if let Some(path) = path {
        let config = config::load_config(path)?;
        info!("Loaded configuration from {:?}", path);
        return Ok(config);
    }

    if let Ok(path) = config::default_config_path() {
        if path.exists() {
            let config = config::load_config(&path)?;
            info!("Loaded configuration from {:?}", path);
            return Ok(config);
        }
    }

    debug!("Using default configuration");
    Ok(AppConfig::default())
}

fn init_config(path: Option<&Path>, force: bool) -> Result<()> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => config::default_config_path()?,
    };
    if path.exists() && !force {
        anyhow::bail!("{:?} already exists (use --force to overwrite)", path);
    }
    config::save_config(&AppConfig::default(), &path)
        .with_context(|| format!("Failed to write {:?}", path))?;
    info!("Wrote default configuration to {:?}", path);
    Ok(())
}

fn load_template(path: &Path) -> Result<Arc<Template>> {
    let template = Template::load(path).with_context(|| format!("Invalid template {:?}", path))?;
    Ok(Arc::new(template))
}

async fn load_frame(path: &Path) -> Result<CapturedFrame> {
    let owned = path.to_path_buf();
    let frame = tokio::task::spawn_blocking(move || CapturedFrame::open(&owned))
        .await?
        .with_context(|| format!("Failed to decode {:?}", path))?;
    debug!("Loaded {:?} ({}x{})", path, frame.width, frame.height);
    Ok(frame)
}

fn write_report(report: &OmrReport, output: Option<&Path>) -> Result<()> {
    for warning in &report.warnings {
        warn!("{}", warning);
    }
    let json = serde_json::to_string_pretty(report)?;
    match output {
        Some(path) => {
            std::fs::write(path, json).with_context(|| format!("Failed to write {:?}", path))?;
            info!("Report written to {:?}", path);
        }
        None => println!("{}", json),
    }
    Ok(())
}

fn log_event(event: &SessionEvent) {
    match event {
        SessionEvent::Started => info!("Scanning for alignment markers"),
        SessionEvent::StatusChanged { status, corners } => {
            info!("Alignment {:?} ({} corners)", status, corners.len())
        }
        SessionEvent::CaptureScheduled { delay_ms } => info!("Aligned, capturing in {} ms", delay_ms),
        SessionEvent::CaptureCancelled => info!("Alignment lost, capture cancelled"),
        SessionEvent::Captured { frame_id } => info!("Captured frame {}", frame_id),
        SessionEvent::Stopped => info!("Capture session stopped"),
    }
}
