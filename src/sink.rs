//! Output file sink.
//!
//! Frames are appended to the destination one at a time. The file is opened
//! for each frame and closed again right after, so no descriptor is held
//! across frames and a crash leaves at most one partial frame behind.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::SinkError;

/// JPEG end-of-image marker.
pub const END_OF_IMAGE: [u8; 2] = [0xFF, 0xD9];

/// Offset one past the first end-of-image marker, if the frame has one.
pub fn find_end_of_image(frame: &[u8]) -> Option<usize> {
    frame
        .windows(END_OF_IMAGE.len())
        .position(|pair| pair == END_OF_IMAGE.as_slice())
        .map(|start| start + END_OF_IMAGE.len())
}

#[derive(Clone, Debug)]
pub struct FrameSink {
    path: PathBuf,
    truncate_at_end_marker: bool,
}

impl FrameSink {
    pub fn new(path: impl Into<PathBuf>, truncate_at_end_marker: bool) -> Self {
        Self {
            path: path.into(),
            truncate_at_end_marker,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Bytes of `frame` that would be written.
    pub fn frame_extent<'a>(&self, frame: &'a [u8]) -> &'a [u8] {
        if !self.truncate_at_end_marker {
            return frame;
        }
        match find_end_of_image(frame) {
            Some(end) => &frame[..end],
            None => frame,
        }
    }

    /// Append one frame, returning the number of bytes written.
    pub fn write_frame(&self, frame: &[u8]) -> Result<usize, SinkError> {
        let bytes = self.frame_extent(frame);
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|source| SinkError::Unavailable {
                path: self.path.clone(),
                source,
            })?;
        file.write_all(bytes).map_err(|source| SinkError::Write {
            path: self.path.clone(),
            source,
        })?;
        if bytes.len() < frame.len() {
            log::trace!(
                "dropped {} trailing bytes after end-of-image",
                frame.len() - bytes.len()
            );
        }
        Ok(bytes.len())
    }
}
