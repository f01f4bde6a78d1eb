//! trec: capture, display and timestamped recording of V4L2 cameras

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use tracing::{debug, info, warn};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use trec::display::DisplayImage;
use trec::pipeline::status::StatusMessage;
use trec::ui::{self, ActionValue};
use trec::{utils, Config, Pipeline, UiSink};

#[derive(Parser, Debug)]
#[command(name = "trec", version, about)]
struct Cli {
    /// TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List capture devices and their formats
    List,

    /// Stream a V4L2 camera
    Camera {
        /// Device node, e.g. /dev/video0
        path: String,

        /// Index into the device's format list (see `list`)
        #[arg(long)]
        format: Option<usize>,

        /// Start recording right away
        #[arg(long)]
        record: bool,

        /// Appended to recording file names
        #[arg(long)]
        suffix: Option<String>,
    },

    /// Play a recording in a loop
    Play {
        file: PathBuf,

        /// Use the capture times stored in the frames
        #[arg(long)]
        embedded_time: bool,
    },
}

/// Headless UI: images are counted, status messages logged
#[derive(Default)]
struct LogUi {
    images: AtomicU64,
}

impl UiSink for LogUi {
    fn show_image(&self, image: DisplayImage) {
        let n = self.images.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(n, width = image.width, height = image.height, "image");
    }

    fn show_status(&self, status: StatusMessage) {
        match status {
            StatusMessage::Image(stat) => debug!(
                "{} | {} | {}",
                stat.variance_label(),
                stat.capture_fps_label,
                stat.display_fps_label
            ),
            StatusMessage::Queue(stat) => debug!(
                "{} | frame {} | queue {}",
                stat.record_fps_label, stat.frame_index, stat.queue_depth
            ),
            StatusMessage::Recorder(notice) => info!("recorder: {:?}", notice),
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("trec=debug"));
    let registry = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_timer(fmt::time::uptime()));
    #[cfg(feature = "profiling")]
    let registry = registry.with(tracing_tracy::TracyLayer::default());
    registry.init();
}

fn list() {
    let devices = utils::list_devices();
    if devices.is_empty() {
        println!("no capture devices found");
    }
    for device in devices {
        println!("{} ({})", device.path, device.name);
        for (i, label) in device.formats.labels().iter().enumerate() {
            println!("  [{i:>2}] {label}");
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    init_tracing();

    let cli = Cli::parse();
    let mut config = Config::load(cli.config.as_deref())?;

    if let Command::Play { embedded_time, .. } = &cli.command {
        config.capture.file.embedded_time |= *embedded_time;
    }
    if let Command::Camera {
        suffix: Some(suffix),
        ..
    } = &cli.command
    {
        config.record.suffix = Some(suffix.clone());
    }
    trec::CONFIG.store(Arc::new(config));

    let mut pipeline = match &cli.command {
        Command::List => {
            list();
            return Ok(());
        }
        Command::Camera {
            path,
            format,
            record,
            ..
        } => {
            let mut pipeline = Pipeline::new(Arc::new(LogUi::default()))?;
            let specs = pipeline.open_camera(&utils::device_name(path), path)?;
            let device = pipeline
                .device()
                .ok_or_else(|| eyre!("camera {path} did not open"))?
                .clone();

            match format {
                Some(index) => {
                    let chooser = ui::find(&specs, "Format - Size - FPS")
                        .ok_or_else(|| eyre!("{path} reports no selectable formats"))?;
                    if *index >= device.formats().len() {
                        return Err(eyre!("format index {index} out of range"));
                    }
                    chooser.invoke(ActionValue::Index(*index));
                    info!("format {}", device.formats().labels()[*index]);
                }
                None => {
                    device.start();
                }
            }
            if *record {
                if let Some(start) = ui::find(&specs, "Start Recording") {
                    start.invoke(ActionValue::Trigger);
                }
            }
            pipeline
        }
        Command::Play { file, .. } => {
            let mut pipeline = Pipeline::new(Arc::new(LogUi::default()))?;
            pipeline.open_file(file)?;
            if let Some(device) = pipeline.device() {
                device.start();
            }
            pipeline
        }
    };

    info!("running, press Ctrl-C to stop");
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("cannot listen for Ctrl-C: {}", e);
    }

    info!("trec shutting down");
    tokio::task::spawn_blocking(move || pipeline.shutdown()).await?;
    Ok(())
}
