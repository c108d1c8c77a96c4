//! mjpeg-grab - capture MJPEG frames from a V4L2 device into a file
//!
//! This tool:
//! 1. Opens the capture device and negotiates MJPEG at the requested size
//! 2. Reads frames with read() I/O into a single buffer
//! 3. Appends each frame to the output file, cut at its end-of-image marker
//! 4. Stops after the requested count, or on Ctrl-C in continuous mode

use anyhow::{Context, Result};
use clap::Parser;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use mjpeg_grab::config::parse_resolution;
use mjpeg_grab::ui::Ui;
use mjpeg_grab::{CaptureLoop, GrabConfig};

#[derive(Parser, Debug)]
#[command(
    name = "mjpeg-grab",
    about = "Grab MJPEG frames from a V4L2 capture device",
    disable_version_flag = true
)]
struct Args {
    /// Video device name [default: /dev/video0].
    #[arg(short = 'd', long, value_name = "NAME")]
    device: Option<String>,
    /// JPEG output filename; frames are appended [default: output.jpg].
    #[arg(short = 'o', long, value_name = "PATH")]
    output: Option<PathBuf>,
    /// Resolution, e.g. 1280x720.
    #[arg(
        short = 'r',
        long,
        value_name = "WxH",
        value_parser = parse_resolution_arg,
        conflicts_with_all = ["width", "height"]
    )]
    resolution: Option<(u32, u32)>,
    /// Image width.
    #[arg(short = 'W', long)]
    width: Option<u32>,
    /// Image height.
    #[arg(short = 'H', long)]
    height: Option<u32>,
    /// Frame interval (fps).
    #[arg(short = 'I', short_alias = 'i', long, value_name = "FPS")]
    interval: Option<u32>,
    /// Number of frames to capture [default: 1].
    #[arg(short = 'c', long, conflicts_with_all = ["single", "continuous"])]
    count: Option<u32>,
    /// Grab a single frame.
    #[arg(short = 's', long, conflicts_with = "continuous")]
    single: bool,
    /// Capture until interrupted with Ctrl-C.
    #[arg(long)]
    continuous: bool,
    /// Write every read verbatim instead of cutting at the end-of-image marker.
    #[arg(long)]
    no_truncate: bool,
    /// Readiness timeout in milliseconds.
    #[arg(long, value_name = "MS", conflicts_with = "wait_forever")]
    timeout_ms: Option<u64>,
    /// Consecutive readiness timeouts tolerated before giving up.
    #[arg(long, value_name = "N", conflicts_with = "wait_forever")]
    tolerate: Option<u32>,
    /// Wait for the device without a timeout.
    #[arg(long)]
    wait_forever: bool,
    /// TOML config file.
    #[arg(long, env = "MJPEG_GRAB_CONFIG", value_name = "PATH")]
    config: Option<PathBuf>,
    /// Output style: auto, plain or pretty.
    #[arg(long, env = "MJPEG_GRAB_UI", value_name = "MODE")]
    ui: Option<String>,
    /// Print version.
    #[arg(short = 'v', long)]
    version: bool,
}

impl Args {
    fn apply(&self, cfg: &mut GrabConfig) {
        if let Some(device) = &self.device {
            cfg.device = device.clone();
        }
        if let Some(output) = &self.output {
            cfg.output = output.clone();
        }
        if let Some((width, height)) = self.resolution {
            cfg.width = width;
            cfg.height = height;
        }
        if let Some(width) = self.width {
            cfg.width = width;
        }
        if let Some(height) = self.height {
            cfg.height = height;
        }
        if let Some(fps) = self.interval {
            cfg.fps = fps;
        }
        if let Some(count) = self.count {
            cfg.count = count;
            cfg.continuous = false;
        }
        if self.single {
            cfg.count = 1;
            cfg.continuous = false;
        }
        if self.continuous {
            cfg.continuous = true;
        }
        if self.no_truncate {
            cfg.truncate = false;
        }
        if let Some(ms) = self.timeout_ms {
            cfg.timeout.timeout = Duration::from_millis(ms);
            cfg.timeout.wait_forever = false;
        }
        if let Some(tolerated) = self.tolerate {
            cfg.timeout.tolerated = tolerated;
        }
        if self.wait_forever {
            cfg.timeout.wait_forever = true;
        }
    }
}

fn parse_resolution_arg(value: &str) -> Result<(u32, u32), String> {
    parse_resolution(value).map_err(|e| e.to_string())
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    if args.version {
        println!("Version: {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let mut cfg = GrabConfig::load(args.config.as_deref()).context("load configuration")?;
    args.apply(&mut cfg);
    cfg.validate()?;

    let stop = Arc::new(AtomicBool::new(false));
    let handler_flag = Arc::clone(&stop);
    ctrlc::set_handler(move || {
        handler_flag.store(true, Ordering::SeqCst);
    })
    .context("install Ctrl-C handler")?;

    let params = cfg.session_params();
    let sink = cfg.sink();
    let ui = Ui::from_args(args.ui.as_deref(), std::io::stderr().is_terminal());
    let progress = ui.capture_progress(params.budget);

    let result = {
        let mut session = CaptureLoop::new(&params)
            .with_stop(Arc::clone(&stop))
            .with_progress(|report| progress.update(report));
        session.run(&sink)
    };

    match result {
        Ok(report) => {
            progress.finish(&report);
            if let Some(negotiated) = report.negotiated {
                log::info!(
                    "wrote {} frame(s) ({} bytes) at {}x{} to {}",
                    report.frames_written,
                    report.bytes_written,
                    negotiated.width,
                    negotiated.height,
                    cfg.output.display()
                );
            }
            if report.would_blocks > 0 || report.timeouts > 0 {
                log::debug!(
                    "{} would-block retries, {} readiness timeouts",
                    report.would_blocks,
                    report.timeouts
                );
            }
            Ok(())
        }
        Err(err) => {
            progress.abandon();
            Err(anyhow::Error::new(err).context(format!("capture from {} failed", cfg.device)))
        }
    }
}
