//! Synthetic capture device.
//!
//! Backs `stub://` paths and the test suite. By default it accepts whatever
//! format is requested and produces an endless stream of small MJPEG-shaped
//! frames. Tests script its behaviour: capabilities, the format the "driver"
//! substitutes, and the exact sequence of poll/read results.
//!
//! A `SyntheticProbe` stays readable after the device has been moved into a
//! handle, so tests can check what the capture loop did to it.

use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use super::{Capabilities, CaptureConfig, DeviceFormat, PixelFormat, VideoDevice};

/// One scripted device event, consumed in order by `wait_readable`/`read`.
#[derive(Clone, Debug)]
pub enum ReadStep {
    /// `read` returns these bytes (cut to the buffer length).
    Frame(Vec<u8>),
    /// `read` fails with `EAGAIN`.
    WouldBlock,
    /// `read` fails with the given OS error number.
    Fail(i32),
    /// `wait_readable` times out.
    Timeout,
    /// `wait_readable` is interrupted by a signal.
    Interrupted,
}

/// What the device does once its script runs out.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Exhausted {
    /// Keep producing synthetic frames.
    Frames,
    /// Never become readable again.
    Stall,
}

#[derive(Debug, Default)]
pub struct ProbeState {
    pub polls: u32,
    pub reads: u32,
    pub would_blocks: u32,
    pub format_requests: Vec<CaptureConfig>,
    pub frame_interval_requests: Vec<u32>,
    pub crop_resets: u32,
    pub closed: bool,
}

#[derive(Clone, Debug, Default)]
pub struct SyntheticProbe(Arc<Mutex<ProbeState>>);

impl SyntheticProbe {
    pub fn state(&self) -> MutexGuard<'_, ProbeState> {
        match self.0.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Format fields the device overrides when answering `set_format`.
#[derive(Clone, Copy, Debug, Default)]
struct FormatOverride {
    width: Option<u32>,
    height: Option<u32>,
    pixel_format: Option<PixelFormat>,
    bytes_per_line: Option<u32>,
    size_image: Option<u32>,
    fps: Option<u32>,
}

pub struct SyntheticDevice {
    name: String,
    capabilities: Capabilities,
    not_v4l2: bool,
    crop_supported: bool,
    frame_interval_supported: bool,
    fail_close: bool,
    overrides: FormatOverride,
    script: VecDeque<ReadStep>,
    exhausted: Exhausted,
    sequence: u32,
    probe: SyntheticProbe,
}

impl SyntheticDevice {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            capabilities: Capabilities::full(),
            not_v4l2: false,
            crop_supported: true,
            frame_interval_supported: true,
            fail_close: false,
            overrides: FormatOverride::default(),
            script: VecDeque::new(),
            exhausted: Exhausted::Frames,
            sequence: 0,
            probe: SyntheticProbe::default(),
        }
    }

    pub fn probe(&self) -> SyntheticProbe {
        self.probe.clone()
    }

    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Reject `VIDIOC_QUERYCAP` the way a non-V4L2 node does (`EINVAL`).
    pub fn not_v4l2(mut self) -> Self {
        self.not_v4l2 = true;
        self
    }

    pub fn without_crop(mut self) -> Self {
        self.crop_supported = false;
        self
    }

    pub fn without_frame_interval(mut self) -> Self {
        self.frame_interval_supported = false;
        self
    }

    pub fn failing_close(mut self) -> Self {
        self.fail_close = true;
        self
    }

    /// Substitute this resolution for whatever is requested.
    pub fn accepting_size(mut self, width: u32, height: u32) -> Self {
        self.overrides.width = Some(width);
        self.overrides.height = Some(height);
        self
    }

    pub fn accepting_pixel_format(mut self, format: PixelFormat) -> Self {
        self.overrides.pixel_format = Some(format);
        self
    }

    /// Settle on this frame rate whatever interval is requested.
    pub fn accepting_fps(mut self, fps: u32) -> Self {
        self.overrides.fps = Some(fps);
        self
    }

    /// Report these stride and image size values from `set_format`.
    pub fn reporting_sizes(mut self, bytes_per_line: u32, size_image: u32) -> Self {
        self.overrides.bytes_per_line = Some(bytes_per_line);
        self.overrides.size_image = Some(size_image);
        self
    }

    pub fn with_script(mut self, steps: impl IntoIterator<Item = ReadStep>) -> Self {
        self.script.extend(steps);
        self
    }

    pub fn then(mut self, exhausted: Exhausted) -> Self {
        self.exhausted = exhausted;
        self
    }

    fn next_frame(&mut self) -> Vec<u8> {
        self.sequence = self.sequence.wrapping_add(1);
        synthetic_jpeg(self.sequence)
    }
}

/// Minimal SOI ... EOI byte sequence carrying a sequence number.
pub fn synthetic_jpeg(sequence: u32) -> Vec<u8> {
    let mut frame = vec![0xFF, 0xD8, 0xFF, 0xFE, 0x00, 0x06];
    frame.extend_from_slice(&sequence.to_be_bytes());
    frame.extend_from_slice(&[0xFF, 0xD9]);
    frame
}

impl VideoDevice for SyntheticDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn query_capabilities(&mut self) -> io::Result<Capabilities> {
        if self.not_v4l2 {
            return Err(io::Error::from(io::ErrorKind::InvalidInput));
        }
        Ok(self.capabilities)
    }

    fn reset_crop(&mut self) -> io::Result<()> {
        self.probe.state().crop_resets += 1;
        if self.crop_supported {
            Ok(())
        } else {
            Err(io::Error::from(io::ErrorKind::InvalidInput))
        }
    }

    fn set_format(&mut self, request: &CaptureConfig) -> io::Result<DeviceFormat> {
        self.probe.state().format_requests.push(*request);
        let width = self.overrides.width.unwrap_or(request.width);
        let height = self.overrides.height.unwrap_or(request.height);
        // Compressed formats carry no stride; a real driver reports a
        // worst-case image size instead.
        Ok(DeviceFormat {
            width,
            height,
            pixel_format: self.overrides.pixel_format.unwrap_or(request.pixel_format),
            bytes_per_line: self.overrides.bytes_per_line.unwrap_or(0),
            size_image: self
                .overrides
                .size_image
                .unwrap_or_else(|| width.saturating_mul(height).saturating_mul(2)),
        })
    }

    fn set_frame_interval(&mut self, fps: u32) -> io::Result<u32> {
        self.probe.state().frame_interval_requests.push(fps);
        if self.frame_interval_supported {
            Ok(self.overrides.fps.unwrap_or(fps))
        } else {
            Err(io::Error::from(io::ErrorKind::InvalidInput))
        }
    }

    fn wait_readable(&mut self, _timeout: Option<Duration>) -> io::Result<bool> {
        self.probe.state().polls += 1;
        match self.script.front() {
            Some(ReadStep::Timeout) => {
                self.script.pop_front();
                Ok(false)
            }
            Some(ReadStep::Interrupted) => {
                self.script.pop_front();
                Err(io::Error::from(io::ErrorKind::Interrupted))
            }
            Some(_) => Ok(true),
            None => Ok(self.exhausted == Exhausted::Frames),
        }
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.probe.state().reads += 1;
        let step = match self.script.pop_front() {
            Some(step) => step,
            None if self.exhausted == Exhausted::Frames => ReadStep::Frame(self.next_frame()),
            None => ReadStep::WouldBlock,
        };
        match step {
            ReadStep::Frame(bytes) => {
                let n = bytes.len().min(buf.len());
                buf[..n].copy_from_slice(&bytes[..n]);
                Ok(n)
            }
            ReadStep::WouldBlock | ReadStep::Timeout | ReadStep::Interrupted => {
                self.probe.state().would_blocks += 1;
                Err(io::Error::from(io::ErrorKind::WouldBlock))
            }
            ReadStep::Fail(errno) => Err(io::Error::from_raw_os_error(errno)),
        }
    }

    fn close(self) -> io::Result<()> {
        if self.fail_close {
            return Err(io::Error::from_raw_os_error(9));
        }
        self.probe.state().closed = true;
        Ok(())
    }
}
