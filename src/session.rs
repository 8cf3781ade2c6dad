//! Session lifecycle and the submit/receive cycle.
//!
//! A [`Session`] owns one device session and enforces the order of calls:
//!
//! ```text
//! Uninitialized --open--> Open --drain--> Draining --(all out)--> EndOfStream
//!        \                  |                 |
//!         \---close---------+------close------+-----> Closed
//! ```
//!
//! Two counters track units in flight: `pending` counts inputs submitted,
//! `produced` counts outputs returned. `produced <= pending` always holds,
//! and draining ends exactly when they meet.

use tracing::{debug, error, info};
use xma_codec::{CodecError, Direction, Output, PollPolicy, SessionConfig};

use crate::flow::{self, Received, SendStatus};
use crate::timestamps::{TimestampRing, Timestamps};
use crate::Accelerator;

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Created, device not opened.
    Uninitialized,
    /// Accepting input.
    Open,
    /// End of input seen; returning what is still in flight.
    Draining,
    /// Device released. Every further call fails with [`CodecError::Closed`].
    Closed,
}

/// A device session driven one unit at a time.
pub struct Session<A: Accelerator> {
    device: A,
    state: SessionState,
    pending: u64,
    produced: u64,
    ring: TimestampRing,
    poll: PollPolicy,
    null_sent: bool,
}

impl<A: Accelerator> Session<A> {
    /// Wrap a device. Nothing is created until [`Self::open`].
    pub fn new(device: A) -> Self {
        Self {
            device,
            state: SessionState::Uninitialized,
            pending: 0,
            produced: 0,
            ring: TimestampRing::new(None),
            poll: PollPolicy::default(),
            null_sent: false,
        }
    }

    /// Validate `config` and create the device session.
    pub fn open(&mut self, config: &SessionConfig) -> Result<(), CodecError> {
        if self.state != SessionState::Uninitialized {
            return Err(CodecError::invalid_call(format!(
                "open on a session in state {:?}",
                self.state
            )));
        }
        config.validate()?;
        if config.direction != self.device.direction() {
            return Err(CodecError::invalid_config(format!(
                "{:?} configuration for a {:?} accelerator",
                config.direction,
                self.device.direction()
            )));
        }

        if let Err(e) = self.device.open(config) {
            error!("Accelerator session creation failed: {}", e);
            self.state = SessionState::Closed;
            return Err(e);
        }

        let depth = config.pipeline_depth.or_else(|| self.device.pipeline_depth_hint());
        self.ring = TimestampRing::new(depth);
        self.poll = config.poll;
        self.state = SessionState::Open;

        info!(
            "Opened {:?} session: {}x{} {:?} {}-bit, pipeline depth {}",
            config.direction,
            config.width,
            config.height,
            config.pixel_format,
            config.bit_depth,
            depth.map_or_else(|| "unbounded".to_string(), |d| d.to_string()),
        );
        Ok(())
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Inputs submitted so far.
    pub fn pending(&self) -> u64 {
        self.pending
    }

    /// Outputs returned so far.
    pub fn produced(&self) -> u64 {
        self.produced
    }

    /// Units submitted and not yet returned.
    pub fn in_flight(&self) -> u64 {
        self.pending - self.produced
    }

    /// Bound on units in flight, `None` when unbounded.
    pub fn pipeline_depth(&self) -> Option<usize> {
        self.ring.capacity()
    }

    pub fn direction(&self) -> Direction {
        self.device.direction()
    }

    pub fn device(&self) -> &A {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut A {
        &mut self.device
    }

    /// Submit one piece of real input.
    ///
    /// One host unit may be split over several submits; call
    /// [`Self::record_input`] once after the last of them.
    pub fn submit(&mut self, unit: A::Input<'_>) -> Result<SendStatus, CodecError> {
        self.check_accepting_input()?;
        match self.device.submit(Some(unit)) {
            Ok(status) => Ok(status),
            Err(e) => Err(self.fault(e)),
        }
    }

    /// Count one host unit as submitted and remember its timestamps.
    pub fn record_input(&mut self, ts: Timestamps) -> Result<(), CodecError> {
        self.check_accepting_input()?;
        self.ring.push(ts)?;
        self.pending += 1;
        Ok(())
    }

    /// Submit a single-piece unit and collect at most one output.
    pub fn cycle(
        &mut self,
        unit: A::Input<'_>,
        ts: Timestamps,
        dst: &mut A::Output,
    ) -> Result<Output<Timestamps>, CodecError> {
        let status = self.submit(unit)?;
        self.record_input(ts)?;
        match status {
            SendStatus::NeedsMoreInput => Ok(Output::Pending),
            SendStatus::Accepted => self.receive(dst),
        }
    }

    /// Wait for the output made due by an accepted submit.
    pub fn receive(&mut self, dst: &mut A::Output) -> Result<Output<Timestamps>, CodecError> {
        match self.state {
            SessionState::Open => {}
            SessionState::Closed => return Err(CodecError::Closed),
            state => {
                return Err(CodecError::invalid_call(format!("receive in state {state:?}")));
            }
        }
        if self.produced >= self.pending {
            return Ok(Output::Pending);
        }
        match flow::poll_receive(&mut self.device, dst, &self.poll, false) {
            Ok(Received::Unit) => self.complete(),
            Ok(Received::NeedsMoreInput) => Ok(Output::Pending),
            Err(e) => Err(self.fault(e)),
        }
    }

    /// Signal end of input and return one unit still in flight.
    ///
    /// Call repeatedly until it returns [`Output::EndOfStream`]; that
    /// takes at most as many calls as there are units in flight.
    pub fn drain(&mut self, dst: &mut A::Output) -> Result<Output<Timestamps>, CodecError> {
        match self.state {
            SessionState::Uninitialized => {
                return Err(CodecError::invalid_call("drain before open"));
            }
            SessionState::Closed => return Err(CodecError::Closed),
            SessionState::Open => {
                info!(
                    "End of input: draining {} units ({} submitted, {} returned)",
                    self.in_flight(),
                    self.pending,
                    self.produced
                );
                self.state = SessionState::Draining;
            }
            SessionState::Draining => {}
        }

        if self.produced >= self.pending {
            return Ok(Output::EndOfStream);
        }

        if !self.null_sent || self.device.null_per_drain_cycle() {
            // The submit status is irrelevant here: no more input is coming.
            if let Err(e) = self.device.submit(None) {
                return Err(self.fault(e));
            }
            self.null_sent = true;
        }

        match flow::poll_receive(&mut self.device, dst, &self.poll, true) {
            Ok(_) => self.complete(),
            Err(e) => Err(self.fault(e)),
        }
    }

    /// Release the device session. Later calls are no-ops.
    pub fn close(&mut self) -> Result<(), CodecError> {
        match self.state {
            SessionState::Closed => return Ok(()),
            SessionState::Uninitialized => {
                self.state = SessionState::Closed;
                return Ok(());
            }
            SessionState::Open | SessionState::Draining => {}
        }
        self.state = SessionState::Closed;
        info!(
            "Closing {:?} session ({} submitted, {} returned)",
            self.device.direction(),
            self.pending,
            self.produced
        );
        self.device.close()
    }

    fn check_accepting_input(&self) -> Result<(), CodecError> {
        match self.state {
            SessionState::Open if self.ring.is_full() => Err(CodecError::invalid_call(format!(
                "pipeline depth {} exceeded",
                self.ring.capacity().unwrap_or_default()
            ))),
            SessionState::Open => Ok(()),
            SessionState::Draining => Err(CodecError::invalid_call("input after end of stream")),
            SessionState::Closed => Err(CodecError::Closed),
            SessionState::Uninitialized => Err(CodecError::invalid_call("input before open")),
        }
    }

    fn complete(&mut self) -> Result<Output<Timestamps>, CodecError> {
        let ts = match self.ring.pop() {
            Some(ts) => ts,
            None => {
                return Err(self.fault(CodecError::fault("output without a recorded input")));
            }
        };
        self.produced += 1;
        debug!("Unit {} out (pts {:?})", self.produced, ts.pts);
        Ok(Output::Unit(ts))
    }

    /// Close after a device failure and hand the error back.
    fn fault(&mut self, err: CodecError) -> CodecError {
        error!("Accelerator fault, closing session: {}", err);
        if let Err(close_err) = self.close() {
            error!("Close after fault failed: {}", close_err);
        }
        err
    }
}

impl<A: Accelerator> Drop for Session<A> {
    fn drop(&mut self) {
        // Best-effort release
        let _ = self.close();
    }
}
