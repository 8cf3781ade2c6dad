//! In-process accelerators that behave like pipelined hardware.
//!
//! Each loopback device holds submitted units for `latency` submits
//! before the first output is due, may keep the caller polling for a
//! few rounds before an output is ready, and can be told to fail,
//! stall or pad its first output. The payloads themselves are trivial:
//! the encoder emits the packed picture behind a one-byte H.264 style
//! header, the decoder reverses that, and the filter copies or scales
//! with nearest-neighbour sampling.

mod decoder;
mod encoder;
mod filter;

pub use decoder::LoopbackDecoder;
pub use encoder::LoopbackEncoder;
pub use filter::LoopbackFilter;

use std::collections::VecDeque;

use rand::{rngs::StdRng, Rng, SeedableRng};
use xma_codec::CodecError;

use crate::flow::SendStatus;

/// Behaviour knobs shared by the loopback devices.
#[derive(Debug, Clone)]
pub struct LoopbackOptions {
    /// Submits held before the first output is due.
    pub latency: usize,
    /// Filler bytes written ahead of the first output.
    pub first_output_padding: usize,
    /// Upper bound on empty polls before each output is ready.
    pub max_busy_polls: u32,
    /// Seed for the busy-poll and padding generator.
    pub seed: u64,
    /// Report `latency` as the pipeline depth.
    pub depth_hint: bool,
    /// Fail every submit after this many.
    pub fail_after: Option<u64>,
    /// Never produce output.
    pub stall: bool,
    /// Refuse to open.
    pub reject_open: bool,
    /// Decoder only: fault on a picture that arrives before any SPS.
    pub require_parameter_sets: bool,
}

impl Default for LoopbackOptions {
    fn default() -> Self {
        Self {
            latency: 1,
            first_output_padding: 0,
            max_busy_polls: 0,
            seed: 0,
            depth_hint: true,
            fail_after: None,
            stall: false,
            reject_open: false,
            require_parameter_sets: false,
        }
    }
}

impl LoopbackOptions {
    #[must_use]
    pub fn latency(mut self, latency: usize) -> Self {
        self.latency = latency.max(1);
        self
    }

    #[must_use]
    pub fn first_output_padding(mut self, bytes: usize) -> Self {
        self.first_output_padding = bytes;
        self
    }

    #[must_use]
    pub fn busy_polls(mut self, max: u32, seed: u64) -> Self {
        self.max_busy_polls = max;
        self.seed = seed;
        self
    }

    #[must_use]
    pub fn without_depth_hint(mut self) -> Self {
        self.depth_hint = false;
        self
    }

    #[must_use]
    pub fn fail_after(mut self, submits: u64) -> Self {
        self.fail_after = Some(submits);
        self
    }

    #[must_use]
    pub fn stall(mut self) -> Self {
        self.stall = true;
        self
    }

    #[must_use]
    pub fn reject_open(mut self) -> Self {
        self.reject_open = true;
        self
    }

    #[must_use]
    pub fn require_parameter_sets(mut self) -> Self {
        self.require_parameter_sets = true;
        self
    }
}

/// Result of asking the pipeline for its oldest unit.
enum Take<T> {
    Ready(T),
    /// An output is due but the device is still "working" on it.
    Busy,
    /// Nothing is due.
    Starved,
}

/// Queue with latency, busy polling and fault injection.
struct Pipeline<T> {
    options: LoopbackOptions,
    queue: VecDeque<T>,
    submitted: u64,
    produced: u64,
    draining: bool,
    busy: Option<u32>,
    rng: StdRng,
    open: bool,
    closes: u32,
}

impl<T> Pipeline<T> {
    fn new(options: LoopbackOptions) -> Self {
        let rng = StdRng::seed_from_u64(options.seed);
        Self {
            options,
            queue: VecDeque::new(),
            submitted: 0,
            produced: 0,
            draining: false,
            busy: None,
            rng,
            open: false,
            closes: 0,
        }
    }

    fn open(&mut self) -> Result<(), CodecError> {
        if self.options.reject_open {
            return Err(CodecError::SessionCreate("loopback device refused".to_string()));
        }
        if self.open {
            return Err(CodecError::invalid_call("loopback device already open"));
        }
        self.open = true;
        Ok(())
    }

    fn check_submit(&self) -> Result<(), CodecError> {
        if !self.open {
            return Err(CodecError::Closed);
        }
        match self.options.fail_after {
            Some(limit) if self.submitted >= limit => {
                Err(CodecError::fault(format!("injected fault after {limit} submits")))
            }
            _ => Ok(()),
        }
    }

    fn push(&mut self, unit: T) -> SendStatus {
        self.queue.push_back(unit);
        self.status()
    }

    /// Status for a submit that did not add a unit.
    fn status(&self) -> SendStatus {
        if self.queue.len() >= self.latency() {
            SendStatus::Accepted
        } else {
            SendStatus::NeedsMoreInput
        }
    }

    fn count_submit(&mut self) {
        self.submitted += 1;
    }

    fn end_of_input(&mut self) {
        self.draining = true;
    }

    fn due(&self) -> bool {
        !self.options.stall
            && (self.queue.len() >= self.latency() || (self.draining && !self.queue.is_empty()))
    }

    fn take(&mut self) -> Result<Take<T>, CodecError> {
        if !self.open {
            return Err(CodecError::Closed);
        }
        if !self.due() {
            return Ok(Take::Starved);
        }
        let remaining = match self.busy {
            Some(remaining) => remaining,
            None => self.rng.random_range(0..=self.options.max_busy_polls),
        };
        if remaining > 0 {
            self.busy = Some(remaining - 1);
            return Ok(Take::Busy);
        }
        self.busy = None;
        match self.queue.pop_front() {
            Some(unit) => {
                self.produced += 1;
                Ok(Take::Ready(unit))
            }
            None => Ok(Take::Starved),
        }
    }

    /// Filler for the first output, free of start codes.
    fn padding(&mut self) -> Vec<u8> {
        if self.produced != 1 {
            return Vec::new();
        }
        (0..self.options.first_output_padding)
            .map(|_| self.rng.random_range(1..=u8::MAX))
            .collect()
    }

    fn depth_hint(&self) -> Option<usize> {
        self.options.depth_hint.then_some(self.latency())
    }

    fn latency(&self) -> usize {
        self.options.latency.max(1)
    }

    fn close(&mut self) {
        if self.open {
            self.open = false;
            self.closes += 1;
            self.queue.clear();
        }
    }
}
