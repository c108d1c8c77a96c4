//! MJPEG frame grabber for V4L2 capture devices.
//!
//! Frames are pulled with plain `read()` I/O into a single buffer and
//! appended, optionally cut at their end-of-image marker, to an output file.
//!
//! # Module Structure
//!
//! - `device`: device handle, capability check and format negotiation
//! - `buffer`: the single capture buffer
//! - `poll`: readiness waiting and the timeout policy
//! - `reader`: one read attempt, classified as frame / would-block / fatal
//! - `sink`: appending frames to the output file
//! - `capture`: the session state machine tying the above together
//! - `config`, `ui`: layered configuration and terminal progress

pub mod buffer;
pub mod capture;
pub mod config;
pub mod device;
pub mod error;
pub mod poll;
pub mod reader;
pub mod sink;
pub mod sys;
pub mod ui;

pub use buffer::CaptureBuffer;
pub use capture::{CaptureLoop, CaptureReport, FrameBudget, SessionParams, SessionState};
pub use config::GrabConfig;
pub use device::{
    Backend, CaptureConfig, DeviceFormat, DeviceHandle, PixelFormat, SyntheticDevice, VideoDevice,
};
pub use error::{
    AllocError, CaptureError, CloseError, InitError, NegotiateError, OpenError, PollError,
    ReadError, SinkError,
};
pub use poll::{Readiness, ReadinessPoller, TimeoutPolicy};
pub use reader::{read_frame, FrameOutcome};
pub use sink::{find_end_of_image, FrameSink};
