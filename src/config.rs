//! Grabber configuration.
//!
//! Values are layered: built-in defaults, then an optional TOML file, then
//! `MJPEG_GRAB_*` environment variables. The binary applies command-line
//! flags on top and calls `validate` once more before building the session.

use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::capture::{FrameBudget, SessionParams};
use crate::device::CaptureConfig;
use crate::poll::{TimeoutPolicy, DEFAULT_TOLERATED_TIMEOUTS};
use crate::sink::FrameSink;

pub const DEFAULT_DEVICE: &str = "/dev/video0";
pub const DEFAULT_OUTPUT: &str = "output.jpg";
pub const DEFAULT_WIDTH: u32 = 1280;
pub const DEFAULT_HEIGHT: u32 = 720;
pub const DEFAULT_FPS: u32 = 30;
pub const DEFAULT_COUNT: u32 = 1;
pub const DEFAULT_TIMEOUT_MS: u64 = 1_000;

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct GrabConfigFile {
    device: Option<String>,
    output: Option<PathBuf>,
    capture: Option<CaptureConfigFile>,
    timeout: Option<TimeoutConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct CaptureConfigFile {
    resolution: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    fps: Option<u32>,
    count: Option<u32>,
    continuous: Option<bool>,
    truncate: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct TimeoutConfigFile {
    wait_forever: Option<bool>,
    ms: Option<u64>,
    tolerated: Option<u32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GrabConfig {
    pub device: String,
    pub output: PathBuf,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub count: u32,
    pub continuous: bool,
    pub truncate: bool,
    pub timeout: TimeoutSettings,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TimeoutSettings {
    pub wait_forever: bool,
    pub timeout: Duration,
    pub tolerated: u32,
}

impl Default for GrabConfig {
    fn default() -> Self {
        Self {
            device: DEFAULT_DEVICE.to_string(),
            output: PathBuf::from(DEFAULT_OUTPUT),
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            fps: DEFAULT_FPS,
            count: DEFAULT_COUNT,
            continuous: false,
            truncate: true,
            timeout: TimeoutSettings {
                wait_forever: false,
                timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
                tolerated: DEFAULT_TOLERATED_TIMEOUTS,
            },
        }
    }
}

impl GrabConfig {
    /// Load from `path` (or `MJPEG_GRAB_CONFIG` when `path` is `None`), then
    /// apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let env_path = std::env::var("MJPEG_GRAB_CONFIG")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .map(PathBuf::from);
        let file_cfg = match path.map(Path::to_path_buf).or(env_path) {
            Some(path) => Some(read_config_file(&path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: GrabConfigFile) -> Result<Self> {
        let mut cfg = Self::default();
        if let Some(device) = file.device {
            cfg.device = device;
        }
        if let Some(output) = file.output {
            cfg.output = output;
        }
        if let Some(capture) = file.capture {
            if let Some(resolution) = capture.resolution.as_deref() {
                let (width, height) = parse_resolution(resolution)?;
                cfg.width = width;
                cfg.height = height;
            }
            cfg.width = capture.width.unwrap_or(cfg.width);
            cfg.height = capture.height.unwrap_or(cfg.height);
            cfg.fps = capture.fps.unwrap_or(cfg.fps);
            cfg.count = capture.count.unwrap_or(cfg.count);
            cfg.continuous = capture.continuous.unwrap_or(cfg.continuous);
            cfg.truncate = capture.truncate.unwrap_or(cfg.truncate);
        }
        if let Some(timeout) = file.timeout {
            cfg.timeout.wait_forever = timeout.wait_forever.unwrap_or(false);
            if let Some(ms) = timeout.ms {
                cfg.timeout.timeout = Duration::from_millis(ms);
            }
            cfg.timeout.tolerated = timeout.tolerated.unwrap_or(cfg.timeout.tolerated);
        }
        Ok(cfg)
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(device) = env_value("MJPEG_GRAB_DEVICE") {
            self.device = device;
        }
        if let Some(output) = env_value("MJPEG_GRAB_OUTPUT") {
            self.output = PathBuf::from(output);
        }
        if let Some(resolution) = env_value("MJPEG_GRAB_RESOLUTION") {
            let (width, height) = parse_resolution(&resolution)
                .map_err(|e| anyhow!("MJPEG_GRAB_RESOLUTION: {}", e))?;
            self.width = width;
            self.height = height;
        }
        if let Some(fps) = env_value("MJPEG_GRAB_FPS") {
            self.fps = fps
                .parse()
                .map_err(|_| anyhow!("MJPEG_GRAB_FPS must be an integer"))?;
        }
        if let Some(count) = env_value("MJPEG_GRAB_COUNT") {
            self.count = count
                .parse()
                .map_err(|_| anyhow!("MJPEG_GRAB_COUNT must be an integer"))?;
        }
        if let Some(ms) = env_value("MJPEG_GRAB_TIMEOUT_MS") {
            let ms: u64 = ms.parse().map_err(|_| {
                anyhow!("MJPEG_GRAB_TIMEOUT_MS must be an integer number of milliseconds")
            })?;
            self.timeout.timeout = Duration::from_millis(ms);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.device.trim().is_empty() {
            return Err(anyhow!("device path must not be empty"));
        }
        if self.output.as_os_str().is_empty() {
            return Err(anyhow!("output path must not be empty"));
        }
        if self.width == 0 || self.height == 0 {
            return Err(anyhow!(
                "resolution must be non-zero (got {}x{})",
                self.width,
                self.height
            ));
        }
        if !self.continuous && self.count == 0 {
            return Err(anyhow!("frame count must be at least 1"));
        }
        if !self.timeout.wait_forever && self.timeout.timeout.is_zero() {
            return Err(anyhow!("poll timeout must be greater than zero"));
        }
        Ok(())
    }

    pub fn budget(&self) -> FrameBudget {
        if self.continuous {
            FrameBudget::Unbounded
        } else {
            FrameBudget::Bounded(self.count)
        }
    }

    pub fn timeout_policy(&self) -> TimeoutPolicy {
        if self.timeout.wait_forever {
            TimeoutPolicy::Indefinite
        } else {
            TimeoutPolicy::Bounded {
                timeout: self.timeout.timeout,
                tolerated: self.timeout.tolerated,
            }
        }
    }

    pub fn session_params(&self) -> SessionParams {
        SessionParams {
            device: self.device.clone(),
            capture: CaptureConfig::mjpeg(self.width, self.height, self.fps),
            budget: self.budget(),
            timeout_policy: self.timeout_policy(),
        }
    }

    pub fn sink(&self) -> FrameSink {
        FrameSink::new(self.output.clone(), self.truncate)
    }
}

/// Parse a `WIDTHxHEIGHT` token such as `1280x720`.
pub fn parse_resolution(value: &str) -> Result<(u32, u32)> {
    let (width, height) = value
        .trim()
        .split_once(['x', 'X'])
        .ok_or_else(|| anyhow!("illegal resolution argument '{}'", value))?;
    let width = width
        .trim()
        .parse()
        .map_err(|_| anyhow!("illegal resolution argument '{}'", value))?;
    let height = height
        .trim()
        .parse()
        .map_err(|_| anyhow!("illegal resolution argument '{}'", value))?;
    Ok((width, height))
}

fn read_config_file(path: &Path) -> Result<GrabConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = toml::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

fn env_value(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
