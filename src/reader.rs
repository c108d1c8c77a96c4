//! Single read attempt against a configured device.

use std::io;

use crate::device::{DeviceHandle, VideoDevice};
use crate::error::ReadError;

/// Result of one read attempt. The frame borrows the handle's capture
/// buffer and is only valid until the next read.
#[derive(Debug)]
pub enum FrameOutcome<'a> {
    Frame(&'a [u8]),
    WouldBlock,
    Fatal(ReadError),
}

/// Issue one `read` into the capture buffer and classify the result.
///
/// A zero-length read is still a frame. Only `EAGAIN` is recoverable; any
/// other failure, `EIO` and `EINTR` included, is fatal.
pub fn read_frame<D: VideoDevice>(handle: &mut DeviceHandle<D>) -> FrameOutcome<'_> {
    let (device, buffer) = handle.io_parts();
    let Some(buffer) = buffer else {
        return FrameOutcome::Fatal(ReadError::Io(io::Error::new(
            io::ErrorKind::Other,
            "capture buffer not allocated",
        )));
    };

    match device.read(buffer.as_mut_slice()) {
        Ok(n) => {
            let n = n.min(buffer.len());
            FrameOutcome::Frame(&buffer.as_slice()[..n])
        }
        Err(err) if err.kind() == io::ErrorKind::WouldBlock => FrameOutcome::WouldBlock,
        Err(err) => FrameOutcome::Fatal(ReadError::from(err)),
    }
}
