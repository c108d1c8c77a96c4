//! Error types for the grabber.
//!
//! Every device-facing operation has its own closed enum so callers match
//! exhaustively. `CaptureError` is the session-level union returned by the
//! capture loop.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::device::Capability;

#[derive(Error, Debug)]
pub enum OpenError {
    #[error("cannot identify '{path}': no such file")]
    NotFound { path: String },

    #[error("cannot open '{path}': permission denied")]
    PermissionDenied { path: String },

    #[error("{path} is no device")]
    NotADevice { path: String },

    #[error("cannot open '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
}

impl OpenError {
    /// Map a stat/open failure onto the open taxonomy.
    pub fn from_io(path: &str, err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => OpenError::NotFound {
                path: path.to_string(),
            },
            io::ErrorKind::PermissionDenied => OpenError::PermissionDenied {
                path: path.to_string(),
            },
            _ => OpenError::Io {
                path: path.to_string(),
                source: err,
            },
        }
    }
}

#[derive(Error, Debug)]
pub enum NegotiateError {
    #[error("{device} is no V4L2 device")]
    NotV4l2 { device: String },

    #[error("VIDIOC_QUERYCAP failed on {device}: {source}")]
    Query {
        device: String,
        #[source]
        source: io::Error,
    },

    #[error("{device} does not support {missing}")]
    Unsupported { device: String, missing: Capability },

    #[error("VIDIOC_S_FMT failed on {device}: {source}")]
    SetFormat {
        device: String,
        #[source]
        source: io::Error,
    },

    #[error("{device} didn't accept MJPEG format (got {accepted}), can't proceed")]
    FormatRefused { device: String, accepted: String },
}

#[derive(Error, Debug)]
#[error("out of memory allocating {size} byte capture buffer")]
pub struct AllocError {
    pub size: usize,
}

#[derive(Error, Debug)]
pub enum InitError {
    #[error("{device}: read i/o requested before the format was negotiated")]
    NotConfigured { device: String },

    #[error(transparent)]
    Alloc(#[from] AllocError),
}

#[derive(Error, Debug)]
#[error("poll failed: {0}")]
pub struct PollError(#[source] pub io::Error);

#[derive(Error, Debug)]
pub enum ReadError {
    #[error("device reported an I/O error on the stream: {0}")]
    Stream(#[source] io::Error),

    #[error("read failed: {0}")]
    Io(#[source] io::Error),
}

impl From<io::Error> for ReadError {
    fn from(err: io::Error) -> Self {
        if err.raw_os_error() == Some(EIO) {
            ReadError::Stream(err)
        } else {
            ReadError::Io(err)
        }
    }
}

const EIO: i32 = 5;

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("cannot open output {path}: {source}")]
    Unavailable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("write to {path} failed: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Error, Debug)]
#[error("closing {device} failed: {source}")]
pub struct CloseError {
    pub device: String,
    #[source]
    pub source: io::Error,
}

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error(transparent)]
    Open(#[from] OpenError),

    #[error(transparent)]
    Negotiate(#[from] NegotiateError),

    #[error(transparent)]
    Init(#[from] InitError),

    #[error(transparent)]
    Poll(#[from] PollError),

    #[error(transparent)]
    Read(#[from] ReadError),

    #[error(transparent)]
    Sink(#[from] SinkError),

    #[error(transparent)]
    Close(#[from] CloseError),

    #[error("select timeout: device stalled after {timeouts} consecutive timeouts")]
    Stalled { timeouts: u32 },
}
