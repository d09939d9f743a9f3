// In-memory motor link for dry runs and tests
//
// Records every frame it is asked to send and can be told to fail,
// so the drive core can be exercised without hardware.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::trace;

use super::link::{LinkError, MotorLink, Result};

/// A frame as the motor controller would have received it
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Frame {
    DutyCycle(f64),
    ZeroCurrent,
}

#[derive(Debug, Default)]
struct SimState {
    frames: Vec<Frame>,
    attempts: usize,
    fail_on_attempt: Option<usize>,
    failing: bool,
    closed: bool,
    /// Oldest frames are dropped beyond this many
    history: Option<usize>,
}

/// Simulated motor link; clones of [`SimHandle`] observe it
pub struct SimulatedLink {
    state: Arc<Mutex<SimState>>,
}

/// Observer and fault injector for a [`SimulatedLink`]
#[derive(Debug, Clone)]
pub struct SimHandle {
    state: Arc<Mutex<SimState>>,
}

fn lock(state: &Mutex<SimState>) -> MutexGuard<'_, SimState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

impl SimulatedLink {
    pub fn new() -> (Self, SimHandle) {
        Self::with_state(SimState::default())
    }

    /// A link that only remembers its last `frames` frames, for long dry runs
    pub fn with_history(frames: usize) -> (Self, SimHandle) {
        Self::with_state(SimState {
            history: Some(frames),
            ..SimState::default()
        })
    }

    fn with_state(state: SimState) -> (Self, SimHandle) {
        let state = Arc::new(Mutex::new(state));
        (
            Self {
                state: state.clone(),
            },
            SimHandle { state },
        )
    }

    fn record(&mut self, frame: Frame) -> Result<()> {
        let mut state = lock(&self.state);
        if state.closed {
            return Err(LinkError::Closed);
        }
        state.attempts += 1;
        if state.failing || state.fail_on_attempt == Some(state.attempts) {
            return Err(LinkError::Io(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "simulated write timeout",
            )));
        }
        trace!("Simulated frame {:?}", frame);
        let full = state
            .history
            .is_some_and(|limit| state.frames.len() >= limit);
        if full && !state.frames.is_empty() {
            state.frames.remove(0);
        }
        state.frames.push(frame);
        Ok(())
    }
}

impl MotorLink for SimulatedLink {
    fn send_duty_cycle(&mut self, duty_cycle: f64) -> Result<()> {
        self.record(Frame::DutyCycle(duty_cycle))
    }

    fn send_zero_current(&mut self) -> Result<()> {
        self.record(Frame::ZeroCurrent)
    }

    fn close(&mut self) {
        lock(&self.state).closed = true;
    }

    fn is_open(&self) -> bool {
        !lock(&self.state).closed
    }
}

impl SimHandle {
    /// Frames delivered so far
    pub fn frames(&self) -> Vec<Frame> {
        lock(&self.state).frames.clone()
    }

    /// Send attempts so far, failed ones included
    pub fn attempts(&self) -> usize {
        lock(&self.state).attempts
    }

    /// Fail the n-th send attempt (1-based, counted since creation or the last clear)
    pub fn fail_on_attempt(&self, n: usize) {
        lock(&self.state).fail_on_attempt = Some(n);
    }

    /// Fail every send until cleared
    pub fn set_failing(&self, failing: bool) {
        lock(&self.state).failing = failing;
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.state).closed
    }

    /// Forget recorded frames and restart the attempt count
    pub fn clear(&self) {
        let mut state = lock(&self.state);
        state.frames.clear();
        state.attempts = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_records_frames_in_order() {
        let (mut link, handle) = SimulatedLink::new();
        link.send_duty_cycle(0.1).unwrap();
        link.send_zero_current().unwrap();
        assert_eq!(handle.frames(), vec![Frame::DutyCycle(0.1), Frame::ZeroCurrent]);
        assert_eq!(handle.attempts(), 2);
    }

    #[test]
    fn test_injected_failure_hits_only_that_attempt() {
        let (mut link, handle) = SimulatedLink::new();
        handle.fail_on_attempt(2);
        assert!(link.send_duty_cycle(0.1).is_ok());
        assert!(link.send_duty_cycle(0.2).is_err());
        assert!(link.send_duty_cycle(0.3).is_ok());
        assert_eq!(handle.frames(), vec![Frame::DutyCycle(0.1), Frame::DutyCycle(0.3)]);
    }

    #[test]
    fn test_closed_link_rejects_sends() {
        let (mut link, handle) = SimulatedLink::new();
        link.close();
        link.close();
        assert!(!link.is_open());
        assert!(handle.is_closed());
        assert!(matches!(link.send_zero_current(), Err(LinkError::Closed)));
    }

    #[test]
    fn test_history_limit() {
        let (mut link, handle) = SimulatedLink::with_history(2);
        for d in [0.1, 0.2, 0.3] {
            link.send_duty_cycle(d).unwrap();
        }
        assert_eq!(handle.frames(), vec![Frame::DutyCycle(0.2), Frame::DutyCycle(0.3)]);
    }
}
