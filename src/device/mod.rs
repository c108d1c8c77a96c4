//! Capture device handle.
//!
//! `DeviceHandle` owns one open capture device, its negotiated configuration
//! and the single capture buffer. Backends implement `VideoDevice`:
//! - `v4l2`: a real V4L2 node using read() I/O (feature: device-v4l2)
//! - `synthetic`: a scripted in-memory device for `stub://` paths and tests
//!
//! Backend methods are single raw calls; this module applies the interrupt
//! retry uniformly and turns raw failures into the negotiation taxonomy.

use std::fmt;
use std::io;
use std::time::Duration;

use crate::buffer::CaptureBuffer;
use crate::error::{CloseError, InitError, NegotiateError, OpenError};
use crate::sys::retry_on_interrupt;

pub mod synthetic;
#[cfg(all(target_os = "linux", feature = "device-v4l2"))]
pub mod v4l2;

pub use synthetic::{ReadStep, SyntheticDevice, SyntheticProbe};
#[cfg(all(target_os = "linux", feature = "device-v4l2"))]
pub use v4l2::V4l2Device;

/// Prefix selecting the synthetic backend.
pub const STUB_SCHEME: &str = "stub://";

/// Four-character pixel format code.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PixelFormat(pub [u8; 4]);

impl PixelFormat {
    pub const MJPEG: PixelFormat = PixelFormat(*b"MJPG");

    pub fn from_code(code: u32) -> Self {
        PixelFormat(code.to_le_bytes())
    }

    pub fn code(self) -> u32 {
        u32::from_le_bytes(self.0)
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.0))
    }
}

impl fmt::Debug for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PixelFormat({})", self)
    }
}

/// Device capabilities the grabber depends on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Capability {
    VideoCapture,
    ReadWrite,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Capability::VideoCapture => f.write_str("video capture"),
            Capability::ReadWrite => f.write_str("read i/o"),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub video_capture: bool,
    pub read_write: bool,
}

impl Capabilities {
    pub fn full() -> Self {
        Self {
            video_capture: true,
            read_write: true,
        }
    }

    /// First required capability the device lacks, if any.
    pub fn missing(&self) -> Option<Capability> {
        if !self.video_capture {
            Some(Capability::VideoCapture)
        } else if !self.read_write {
            Some(Capability::ReadWrite)
        } else {
            None
        }
    }
}

/// Capture parameters. Holds the request before negotiation and the
/// device-accepted values after it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CaptureConfig {
    pub width: u32,
    pub height: u32,
    /// Frames per second; 0 leaves (or, once negotiated, means) the device
    /// default.
    pub fps: u32,
    pub pixel_format: PixelFormat,
}

impl CaptureConfig {
    pub fn mjpeg(width: u32, height: u32, fps: u32) -> Self {
        Self {
            width,
            height,
            fps,
            pixel_format: PixelFormat::MJPEG,
        }
    }
}

/// Format as reported back by the driver after `VIDIOC_S_FMT`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DeviceFormat {
    pub width: u32,
    pub height: u32,
    pub pixel_format: PixelFormat,
    pub bytes_per_line: u32,
    pub size_image: u32,
}

impl DeviceFormat {
    /// Apply the driver-safety floor: stride of at least two bytes per
    /// pixel, and an image of at least `stride * height` bytes.
    pub fn with_safety_floor(mut self) -> Self {
        let min_stride = self.width.saturating_mul(2);
        if self.bytes_per_line < min_stride {
            self.bytes_per_line = min_stride;
        }
        let min_size = self.bytes_per_line.saturating_mul(self.height);
        if self.size_image < min_size {
            self.size_image = min_size;
        }
        self
    }
}

/// Raw operations a capture backend provides. Each method is one call into
/// the device; retrying on `EINTR` is the caller's concern.
pub trait VideoDevice {
    /// Identifier used in log lines and errors.
    fn name(&self) -> &str;

    fn query_capabilities(&mut self) -> io::Result<Capabilities>;

    /// Reset cropping to the device default rectangle.
    fn reset_crop(&mut self) -> io::Result<()>;

    fn set_format(&mut self, request: &CaptureConfig) -> io::Result<DeviceFormat>;

    /// Request a time-per-frame of `1/fps`. Returns the rate the device
    /// settled on, 0 when it reports none.
    fn set_frame_interval(&mut self, fps: u32) -> io::Result<u32>;

    /// Block until readable. `Ok(false)` means the timeout elapsed; `None`
    /// waits without a timeout.
    fn wait_readable(&mut self, timeout: Option<Duration>) -> io::Result<bool>;

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    fn close(self) -> io::Result<()>
    where
        Self: Sized;
}

/// Device selected from a path: synthetic for `stub://`, V4L2 otherwise.
pub enum Backend {
    Synthetic(SyntheticDevice),
    #[cfg(all(target_os = "linux", feature = "device-v4l2"))]
    V4l2(V4l2Device),
}

impl Backend {
    pub fn open(path: &str) -> Result<Self, OpenError> {
        if path.starts_with(STUB_SCHEME) {
            return Ok(Backend::Synthetic(SyntheticDevice::new(path)));
        }
        #[cfg(all(target_os = "linux", feature = "device-v4l2"))]
        {
            Ok(Backend::V4l2(V4l2Device::open(path)?))
        }
        #[cfg(not(all(target_os = "linux", feature = "device-v4l2")))]
        {
            Err(OpenError::Io {
                path: path.to_string(),
                source: io::Error::new(
                    io::ErrorKind::Unsupported,
                    "V4L2 devices require the device-v4l2 feature on Linux",
                ),
            })
        }
    }
}

macro_rules! dispatch {
    ($self:expr, $dev:ident => $call:expr) => {
        match $self {
            Backend::Synthetic($dev) => $call,
            #[cfg(all(target_os = "linux", feature = "device-v4l2"))]
            Backend::V4l2($dev) => $call,
        }
    };
}

impl VideoDevice for Backend {
    fn name(&self) -> &str {
        dispatch!(self, dev => dev.name())
    }

    fn query_capabilities(&mut self) -> io::Result<Capabilities> {
        dispatch!(self, dev => dev.query_capabilities())
    }

    fn reset_crop(&mut self) -> io::Result<()> {
        dispatch!(self, dev => dev.reset_crop())
    }

    fn set_format(&mut self, request: &CaptureConfig) -> io::Result<DeviceFormat> {
        dispatch!(self, dev => dev.set_format(request))
    }

    fn set_frame_interval(&mut self, fps: u32) -> io::Result<u32> {
        dispatch!(self, dev => dev.set_frame_interval(fps))
    }

    fn wait_readable(&mut self, timeout: Option<Duration>) -> io::Result<bool> {
        dispatch!(self, dev => dev.wait_readable(timeout))
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        dispatch!(self, dev => dev.read(buf))
    }

    fn close(self) -> io::Result<()> {
        dispatch!(self, dev => dev.close())
    }
}

/// Where a handle is in its lifecycle. A closed handle no longer exists:
/// `close` consumes it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HandleState {
    Opened,
    Configured,
    Capturing,
}

pub struct DeviceHandle<D: VideoDevice = Backend> {
    device: D,
    state: HandleState,
    config: Option<CaptureConfig>,
    format: Option<DeviceFormat>,
    buffer: Option<CaptureBuffer>,
}

impl DeviceHandle<Backend> {
    /// Open the device at `path` in non-blocking mode.
    pub fn open(path: &str) -> Result<Self, OpenError> {
        let device = Backend::open(path)?;
        log::info!("opened {}", path);
        Ok(Self::from_device(device))
    }
}

impl<D: VideoDevice> DeviceHandle<D> {
    /// Wrap an already opened device.
    pub fn from_device(device: D) -> Self {
        Self {
            device,
            state: HandleState::Opened,
            config: None,
            format: None,
            buffer: None,
        }
    }

    pub fn name(&self) -> &str {
        self.device.name()
    }

    pub fn state(&self) -> HandleState {
        self.state
    }

    /// Negotiated configuration, once `negotiate_format` succeeded.
    pub fn config(&self) -> Option<&CaptureConfig> {
        self.config.as_ref()
    }

    /// Driver format after the safety floor was applied.
    pub fn format(&self) -> Option<&DeviceFormat> {
        self.format.as_ref()
    }

    /// Size of the capture buffer the negotiated format calls for.
    pub fn frame_size(&self) -> Option<usize> {
        self.format.map(|format| format.size_image as usize)
    }

    /// Negotiate MJPEG capture at the requested size and rate. The returned
    /// configuration holds the values the device accepted.
    pub fn negotiate_format(
        &mut self,
        requested: &CaptureConfig,
    ) -> Result<CaptureConfig, NegotiateError> {
        let name = self.device.name().to_string();

        let caps = retry_on_interrupt(|| self.device.query_capabilities()).map_err(|err| {
            if err.kind() == io::ErrorKind::InvalidInput {
                NegotiateError::NotV4l2 {
                    device: name.clone(),
                }
            } else {
                NegotiateError::Query {
                    device: name.clone(),
                    source: err,
                }
            }
        })?;
        if let Some(missing) = caps.missing() {
            return Err(NegotiateError::Unsupported {
                device: name,
                missing,
            });
        }

        // Not every device crops.
        if let Err(err) = retry_on_interrupt(|| self.device.reset_crop()) {
            log::debug!("{}: crop reset ignored: {}", name, err);
        }

        let request = CaptureConfig {
            pixel_format: PixelFormat::MJPEG,
            ..*requested
        };
        let accepted = retry_on_interrupt(|| self.device.set_format(&request)).map_err(|err| {
            NegotiateError::SetFormat {
                device: name.clone(),
                source: err,
            }
        })?;
        if accepted.pixel_format != PixelFormat::MJPEG {
            return Err(NegotiateError::FormatRefused {
                device: name,
                accepted: accepted.pixel_format.to_string(),
            });
        }

        if accepted.width != request.width {
            log::warn!("image width set to {} by device {}", accepted.width, name);
        }
        if accepted.height != request.height {
            log::warn!("image height set to {} by device {}", accepted.height, name);
        }

        // 0 keeps the device default, as does a refused interval.
        let fps = match request.fps {
            0 => 0,
            wanted => match retry_on_interrupt(|| self.device.set_frame_interval(wanted)) {
                Ok(fps) => {
                    if fps != wanted {
                        log::warn!("frame rate set to {} by device {}", fps, name);
                    }
                    fps
                }
                Err(err) => {
                    log::warn!("{}: unable to set frame interval 1/{}: {}", name, wanted, err);
                    0
                }
            },
        };

        let format = accepted.with_safety_floor();
        if format.size_image != accepted.size_image {
            log::debug!(
                "{}: driver reported {} byte frames, using {}",
                name,
                accepted.size_image,
                format.size_image
            );
        }

        let negotiated = CaptureConfig {
            width: accepted.width,
            height: accepted.height,
            fps,
            pixel_format: accepted.pixel_format,
        };
        self.config = Some(negotiated);
        self.format = Some(format);
        self.state = HandleState::Configured;
        log::info!(
            "{}: negotiated {}x{} {} ({} byte frames)",
            name,
            negotiated.width,
            negotiated.height,
            negotiated.pixel_format,
            format.size_image
        );
        Ok(negotiated)
    }

    /// Allocate the capture buffer for read() I/O.
    pub fn init_read(&mut self) -> Result<(), InitError> {
        let size = match (self.state, self.frame_size()) {
            (HandleState::Configured, Some(size)) => size,
            _ => {
                return Err(InitError::NotConfigured {
                    device: self.device.name().to_string(),
                });
            }
        };
        self.buffer = Some(CaptureBuffer::allocate(size)?);
        self.state = HandleState::Capturing;
        Ok(())
    }

    pub fn buffer(&self) -> Option<&CaptureBuffer> {
        self.buffer.as_ref()
    }

    pub(crate) fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    pub(crate) fn io_parts(&mut self) -> (&mut D, Option<&mut CaptureBuffer>) {
        (&mut self.device, self.buffer.as_mut())
    }

    /// Release the buffer, then the device.
    pub fn close(mut self) -> Result<(), CloseError> {
        drop(self.buffer.take());
        let device = self.device.name().to_string();
        self.device
            .close()
            .map_err(|source| CloseError {
                device: device.clone(),
                source,
            })?;
        log::debug!("closed {}", device);
        Ok(())
    }
}
