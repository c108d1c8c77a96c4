//! Capture loop.
//!
//! Drives one capture session through
//! `Idle -> Opening -> Configuring -> Capturing -> Draining -> Closed`.
//! Any fatal error moves the session to `Failed` after the buffer and the
//! device have been released.
//!
//! Each iteration waits for readiness, reads once and, on a frame, appends
//! it to the sink. A would-block read goes back to waiting without touching
//! the frame budget. The stop flag is checked between iterations only.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::device::{Backend, CaptureConfig, DeviceHandle, VideoDevice};
use crate::error::{CaptureError, OpenError};
use crate::poll::{Readiness, ReadinessPoller, TimeoutPolicy};
use crate::reader::{read_frame, FrameOutcome};
use crate::sink::FrameSink;

/// How many frames a session captures.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameBudget {
    Bounded(u32),
    /// Until the stop flag is raised.
    Unbounded,
}

impl FrameBudget {
    fn is_exhausted(&self) -> bool {
        matches!(self, FrameBudget::Bounded(0))
    }

    fn consume(&mut self) {
        if let FrameBudget::Bounded(remaining) = self {
            *remaining = remaining.saturating_sub(1);
        }
    }
}

impl fmt::Display for FrameBudget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameBudget::Bounded(count) => write!(f, "{} frame(s)", count),
            FrameBudget::Unbounded => f.write_str("until stopped"),
        }
    }
}

/// Immutable parameters of one capture session.
#[derive(Clone, Debug)]
pub struct SessionParams {
    pub device: String,
    pub capture: CaptureConfig,
    pub budget: FrameBudget,
    pub timeout_policy: TimeoutPolicy,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Opening,
    Configuring,
    Capturing,
    Draining,
    Closed,
    Failed,
}

/// Outcome of a session that reached `Closed`.
#[derive(Clone, Debug, Default)]
pub struct CaptureReport {
    /// Configuration the device accepted.
    pub negotiated: Option<CaptureConfig>,
    pub frames_written: u64,
    pub bytes_written: u64,
    pub would_blocks: u64,
    pub timeouts: u64,
    pub stopped: bool,
}

type ProgressFn<'p> = Box<dyn FnMut(&CaptureReport) + 'p>;

pub struct CaptureLoop<'p> {
    params: &'p SessionParams,
    state: SessionState,
    stop: Option<Arc<AtomicBool>>,
    progress: Option<ProgressFn<'p>>,
}

impl<'p> CaptureLoop<'p> {
    pub fn new(params: &'p SessionParams) -> Self {
        Self {
            params,
            state: SessionState::Idle,
            stop: None,
            progress: None,
        }
    }

    /// Stop capturing once `flag` is set.
    pub fn with_stop(mut self, flag: Arc<AtomicBool>) -> Self {
        self.stop = Some(flag);
        self
    }

    /// Called after every frame written.
    pub fn with_progress(mut self, progress: impl FnMut(&CaptureReport) + 'p) -> Self {
        self.progress = Some(Box::new(progress));
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Run a session against the device named in the parameters.
    pub fn run(&mut self, sink: &FrameSink) -> Result<CaptureReport, CaptureError> {
        self.run_with(|path| DeviceHandle::<Backend>::open(path), sink)
    }

    /// Run a session, opening the device with `open`.
    pub fn run_with<D, F>(
        &mut self,
        open: F,
        sink: &FrameSink,
    ) -> Result<CaptureReport, CaptureError>
    where
        D: VideoDevice,
        F: FnOnce(&str) -> Result<DeviceHandle<D>, OpenError>,
    {
        debug_assert_eq!(self.state, SessionState::Idle, "capture loop reused");

        self.transition(SessionState::Opening);
        let mut handle = match open(self.params.device.as_str()) {
            Ok(handle) => handle,
            Err(err) => return Err(self.fail(err.into())),
        };

        self.transition(SessionState::Configuring);
        let mut report = CaptureReport::default();
        match self.capture(&mut handle, sink, &mut report) {
            Ok(()) => {
                self.transition(SessionState::Draining);
                if let Err(err) = handle.close() {
                    return Err(self.fail(err.into()));
                }
                self.transition(SessionState::Closed);
                Ok(report)
            }
            Err(err) => {
                if let Err(close_err) = handle.close() {
                    log::warn!("{}", close_err);
                }
                Err(self.fail(err))
            }
        }
    }

    fn capture<D: VideoDevice>(
        &mut self,
        handle: &mut DeviceHandle<D>,
        sink: &FrameSink,
        report: &mut CaptureReport,
    ) -> Result<(), CaptureError> {
        report.negotiated = Some(handle.negotiate_format(&self.params.capture)?);
        handle.init_read()?;
        self.transition(SessionState::Capturing);
        log::info!(
            "capturing {} from {} into {}",
            self.params.budget,
            handle.name(),
            sink.path().display()
        );

        let mut poller = ReadinessPoller::new(self.params.timeout_policy);
        let mut remaining = self.params.budget;
        while !remaining.is_exhausted() {
            if self.stop_requested() {
                log::info!("stop requested after {} frame(s)", report.frames_written);
                report.stopped = true;
                break;
            }

            if poller.wait_readable(handle)? == Readiness::TimedOut {
                report.timeouts += 1;
                poller.on_timeout()?;
                continue;
            }

            match read_frame(handle) {
                FrameOutcome::Frame(bytes) => {
                    let written = sink.write_frame(bytes)?;
                    remaining.consume();
                    report.frames_written += 1;
                    report.bytes_written += written as u64;
                    log::debug!("frame {} ({} bytes)", report.frames_written, written);
                    if let Some(progress) = self.progress.as_mut() {
                        progress(&*report);
                    }
                }
                FrameOutcome::WouldBlock => report.would_blocks += 1,
                FrameOutcome::Fatal(err) => return Err(err.into()),
            }
        }
        Ok(())
    }

    fn stop_requested(&self) -> bool {
        self.stop
            .as_ref()
            .map(|flag| flag.load(Ordering::SeqCst))
            .unwrap_or(false)
    }

    fn transition(&mut self, next: SessionState) {
        log::debug!("session {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    fn fail(&mut self, err: CaptureError) -> CaptureError {
        self.transition(SessionState::Failed);
        err
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounded_budget_counts_down_to_exhaustion() {
        let mut budget = FrameBudget::Bounded(2);
        assert!(!budget.is_exhausted());
        budget.consume();
        budget.consume();
        assert!(budget.is_exhausted());
        budget.consume();
        assert_eq!(budget, FrameBudget::Bounded(0));
    }

    #[test]
    fn unbounded_budget_never_exhausts() {
        let mut budget = FrameBudget::Unbounded;
        for _ in 0..100 {
            budget.consume();
        }
        assert!(!budget.is_exhausted());
    }
}
