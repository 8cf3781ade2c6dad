//! Flow control between the host's one-in/one-out calls and a pipelined device.
//!
//! A submit either fills the pipeline ([`SendStatus::NeedsMoreInput`]) or
//! makes an output due ([`SendStatus::Accepted`]). When an output is due the
//! adapter polls [`crate::Accelerator::receive`] until it is ready, waiting
//! according to a [`PollPolicy`]: spin, then yield, then sleep with
//! exponential backoff. A wait that outlives the policy timeout is a fault.

use std::time::{Duration, Instant};

use xma_codec::{CodecError, PollPolicy};

use crate::Accelerator;

/// Device answer to a submit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendStatus {
    /// The unit entered the pipeline and one output is now due.
    Accepted,
    /// The pipeline is still filling; no output is due this cycle.
    NeedsMoreInput,
}

/// Device answer to a receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecvStatus {
    /// A unit was written into the destination.
    Ready,
    /// Nothing ready yet; poll again.
    TryAgain,
    /// Nothing ready and the device wants more input first.
    SendMoreData,
}

/// What a completed poll produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Received {
    /// The destination holds a finished unit.
    Unit,
    /// The device asked for more input before it can produce.
    NeedsMoreInput,
}

/// Wait state for one receive.
#[derive(Debug)]
pub struct Backoff<'a> {
    policy: &'a PollPolicy,
    polls: u32,
    sleep: Duration,
    started: Instant,
}

impl<'a> Backoff<'a> {
    pub fn new(policy: &'a PollPolicy) -> Self {
        Self {
            policy,
            polls: 0,
            sleep: policy.min_sleep,
            started: Instant::now(),
        }
    }

    /// Empty polls recorded so far.
    #[must_use]
    pub fn polls(&self) -> u32 {
        self.polls
    }

    /// Record one empty poll and wait before the next one.
    pub fn wait(&mut self) -> Result<(), CodecError> {
        self.polls += 1;
        let waited = self.started.elapsed();
        if waited >= self.policy.timeout {
            return Err(CodecError::PollTimeout {
                polls: self.polls,
                waited_ms: waited.as_millis() as u64,
            });
        }

        if self.polls <= self.policy.spin_limit {
            std::hint::spin_loop();
        } else if self.polls <= self.policy.spin_limit.saturating_add(self.policy.yield_limit) {
            std::thread::yield_now();
        } else {
            std::thread::sleep(self.sleep);
            self.sleep = (self.sleep * 2).min(self.policy.max_sleep);
        }
        Ok(())
    }
}

/// Poll `device` until a unit is ready.
///
/// While draining, "send more data" is treated like "try again": no
/// further input will come, so the device has to flush on its own.
pub fn poll_receive<A: Accelerator>(
    device: &mut A,
    dst: &mut A::Output,
    policy: &PollPolicy,
    draining: bool,
) -> Result<Received, CodecError> {
    let mut backoff = Backoff::new(policy);
    loop {
        match device.receive(dst)? {
            RecvStatus::Ready => {
                if backoff.polls() > 0 {
                    tracing::trace!("Output ready after {} empty polls", backoff.polls());
                }
                return Ok(Received::Unit);
            }
            RecvStatus::SendMoreData if !draining => return Ok(Received::NeedsMoreInput),
            RecvStatus::SendMoreData | RecvStatus::TryAgain => backoff.wait()?,
        }
    }
}
