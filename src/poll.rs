//! Readiness waiting.
//!
//! The timeout policy is fixed for a whole session:
//! - `Indefinite`: wait with no timeout; never stalls out.
//! - `Bounded`: wait up to `timeout`; up to `tolerated` consecutive timeouts
//!   are absorbed, the next one is a `CaptureError::Stalled`.

use std::time::Duration;

use crate::device::{DeviceHandle, VideoDevice};
use crate::error::{CaptureError, PollError};
use crate::sys::retry_on_interrupt;

pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(1);
pub const DEFAULT_TOLERATED_TIMEOUTS: u32 = 1;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimeoutPolicy {
    Indefinite,
    Bounded { timeout: Duration, tolerated: u32 },
}

impl Default for TimeoutPolicy {
    fn default() -> Self {
        TimeoutPolicy::Bounded {
            timeout: DEFAULT_POLL_TIMEOUT,
            tolerated: DEFAULT_TOLERATED_TIMEOUTS,
        }
    }
}

impl TimeoutPolicy {
    fn timeout(&self) -> Option<Duration> {
        match self {
            TimeoutPolicy::Indefinite => None,
            TimeoutPolicy::Bounded { timeout, .. } => Some(*timeout),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Readiness {
    Ready,
    TimedOut,
}

pub struct ReadinessPoller {
    policy: TimeoutPolicy,
    consecutive_timeouts: u32,
    total_timeouts: u64,
}

impl ReadinessPoller {
    pub fn new(policy: TimeoutPolicy) -> Self {
        Self {
            policy,
            consecutive_timeouts: 0,
            total_timeouts: 0,
        }
    }

    pub fn policy(&self) -> TimeoutPolicy {
        self.policy
    }

    pub fn total_timeouts(&self) -> u64 {
        self.total_timeouts
    }

    /// Wait for the device to become readable. Signal interruptions are
    /// retried; a wait failure is returned as is.
    pub fn wait_readable<D: VideoDevice>(
        &mut self,
        handle: &mut DeviceHandle<D>,
    ) -> Result<Readiness, PollError> {
        let timeout = self.policy.timeout();
        let device = handle.device_mut();
        let ready = retry_on_interrupt(|| device.wait_readable(timeout)).map_err(PollError)?;
        if ready {
            self.consecutive_timeouts = 0;
            Ok(Readiness::Ready)
        } else {
            self.total_timeouts += 1;
            Ok(Readiness::TimedOut)
        }
    }

    /// Account for a timeout under the session policy. Escalates once the
    /// tolerated number of consecutive timeouts is exceeded.
    pub fn on_timeout(&mut self) -> Result<(), CaptureError> {
        match self.policy {
            TimeoutPolicy::Indefinite => Ok(()),
            TimeoutPolicy::Bounded { tolerated, .. } => {
                self.consecutive_timeouts += 1;
                if self.consecutive_timeouts > tolerated {
                    Err(CaptureError::Stalled {
                        timeouts: self.consecutive_timeouts,
                    })
                } else {
                    log::warn!(
                        "select timeout ({} of {} tolerated)",
                        self.consecutive_timeouts,
                        tolerated
                    );
                    Ok(())
                }
            }
        }
    }
}
