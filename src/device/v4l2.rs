//! V4L2 capture device using read() I/O.
//!
//! The node is opened `O_RDWR | O_NONBLOCK` and driven with raw ioctls; frames
//! are pulled with plain `read(2)` into the handle's single buffer, so no
//! streaming buffers are ever requested from the driver.

use std::fs::{File, OpenOptions};
use std::io::{self, Read};
use std::mem;
use std::os::raw::c_void;
use std::os::unix::fs::{FileTypeExt, OpenOptionsExt};
use std::os::unix::io::{AsRawFd, IntoRawFd};
use std::time::Duration;

use v4l::buffer::Type;
use v4l::v4l2;
use v4l2_sys_mit::*;

use super::{Capabilities, CaptureConfig, DeviceFormat, PixelFormat, VideoDevice};
use crate::error::OpenError;

/// `V4L2_FIELD_INTERLACED`
const FIELD_INTERLACED: u32 = 4;

macro_rules! ioctl {
    ($fd:expr, $request:ident, $arg:expr) => {
        // SAFETY: `$arg` is the argument struct `$request` is defined for and
        // outlives the call.
        unsafe { v4l2::ioctl($fd, v4l2::vidioc::$request, $arg as *mut _ as *mut c_void) }
    };
}

pub struct V4l2Device {
    path: String,
    file: File,
}

impl V4l2Device {
    /// Open a character device node in non-blocking mode.
    pub fn open(path: &str) -> Result<Self, OpenError> {
        let meta = std::fs::metadata(path).map_err(|err| OpenError::from_io(path, err))?;
        if !meta.file_type().is_char_device() {
            return Err(OpenError::NotADevice {
                path: path.to_string(),
            });
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(path)
            .map_err(|err| OpenError::from_io(path, err))?;

        Ok(Self {
            path: path.to_string(),
            file,
        })
    }
}

impl VideoDevice for V4l2Device {
    fn name(&self) -> &str {
        &self.path
    }

    fn query_capabilities(&mut self) -> io::Result<Capabilities> {
        let mut cap: v4l2_capability = unsafe { mem::zeroed() };
        ioctl!(self.file.as_raw_fd(), VIDIOC_QUERYCAP, &mut cap)?;
        Ok(Capabilities {
            video_capture: cap.capabilities & V4L2_CAP_VIDEO_CAPTURE != 0,
            read_write: cap.capabilities & V4L2_CAP_READWRITE != 0,
        })
    }

    fn reset_crop(&mut self) -> io::Result<()> {
        let fd = self.file.as_raw_fd();
        let mut cropcap: v4l2_cropcap = unsafe { mem::zeroed() };
        cropcap.type_ = Type::VideoCapture as u32;
        ioctl!(fd, VIDIOC_CROPCAP, &mut cropcap)?;

        let mut crop: v4l2_crop = unsafe { mem::zeroed() };
        crop.type_ = Type::VideoCapture as u32;
        crop.c = cropcap.defrect;
        ioctl!(fd, VIDIOC_S_CROP, &mut crop)
    }

    fn set_format(&mut self, request: &CaptureConfig) -> io::Result<DeviceFormat> {
        let mut fmt: v4l2_format = unsafe { mem::zeroed() };
        fmt.type_ = Type::VideoCapture as u32;
        // SAFETY: `pix` is the active union member for VIDEO_CAPTURE formats.
        unsafe {
            fmt.fmt.pix.width = request.width;
            fmt.fmt.pix.height = request.height;
            fmt.fmt.pix.field = FIELD_INTERLACED;
            fmt.fmt.pix.pixelformat = request.pixel_format.code();
        }
        ioctl!(self.file.as_raw_fd(), VIDIOC_S_FMT, &mut fmt)?;

        let pix = unsafe { fmt.fmt.pix };
        Ok(DeviceFormat {
            width: pix.width,
            height: pix.height,
            pixel_format: PixelFormat::from_code(pix.pixelformat),
            bytes_per_line: pix.bytesperline,
            size_image: pix.sizeimage,
        })
    }

    fn set_frame_interval(&mut self, fps: u32) -> io::Result<u32> {
        let mut parm: v4l2_streamparm = unsafe { mem::zeroed() };
        parm.type_ = Type::VideoCapture as u32;
        // SAFETY: `capture` is the active union member for VIDEO_CAPTURE.
        unsafe {
            parm.parm.capture.timeperframe.numerator = 1;
            parm.parm.capture.timeperframe.denominator = fps;
        }
        ioctl!(self.file.as_raw_fd(), VIDIOC_S_PARM, &mut parm)?;

        // The driver writes back the interval it applied.
        let applied = unsafe { parm.parm.capture.timeperframe };
        Ok(match applied.numerator {
            0 => 0,
            numerator => applied.denominator / numerator,
        })
    }

    fn wait_readable(&mut self, timeout: Option<Duration>) -> io::Result<bool> {
        let mut pfd = libc::pollfd {
            fd: self.file.as_raw_fd(),
            events: libc::POLLIN,
            revents: 0,
        };
        let timeout_ms = match timeout {
            Some(timeout) => timeout.as_millis().min(i32::MAX as u128) as libc::c_int,
            None => -1,
        };
        let ready = unsafe { libc::poll(&mut pfd, 1, timeout_ms) };
        if ready == -1 {
            return Err(io::Error::last_os_error());
        }
        Ok(ready > 0)
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf)
    }

    fn close(self) -> io::Result<()> {
        let fd = self.file.into_raw_fd();
        if unsafe { libc::close(fd) } == -1 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}
