// One wheel: commanded duty cycle, its lock, and the ramps that move it
//
// The lock covers the duty cycle *and* the motor link, so a value and the
// frame that announces it always reach the controller in the same order,
// and nothing can be sent between an emergency stop's kill frame and its
// state reset.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use super::ramp::{self, Limits, Pacer};
use crate::config::DriveConfig;
use crate::error::{DriveError, Result};
use crate::motor::{LinkError, MotorLink};

/// The two driven wheels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Wheel {
    Left,
    Right,
}

impl Wheel {
    pub const ALL: [Wheel; 2] = [Wheel::Left, Wheel::Right];

    pub fn short_name(self) -> &'static str {
        match self {
            Wheel::Left => "L",
            Wheel::Right => "R",
        }
    }
}

impl fmt::Display for Wheel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Wheel::Left => f.write_str("left"),
            Wheel::Right => f.write_str("right"),
        }
    }
}

impl FromStr for Wheel {
    type Err = DriveError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "l" | "left" => Ok(Wheel::Left),
            "r" | "right" => Ok(Wheel::Right),
            _ => Err(DriveError::UnknownWheel(s.to_string())),
        }
    }
}

/// Ramp step sizes and pacing for one wheel
#[derive(Debug, Clone, Copy)]
pub struct RampParams {
    pub limits: Limits,
    pub acc_step: f64,
    pub dec_step: f64,
    pub brk_step: f64,
    pub step_interval: Duration,
}

impl From<&DriveConfig> for RampParams {
    fn from(config: &DriveConfig) -> Self {
        Self {
            limits: Limits {
                max: config.max_duty_cycle,
                min: config.min_duty_cycle,
            },
            acc_step: config.acc_step,
            dec_step: config.dec_step,
            brk_step: config.brk_step,
            step_interval: config.step_interval,
        }
    }
}

struct WheelState {
    duty_cycle: f64,
    /// Bumped by every emergency stop; a ramp that sees it change gives up
    stops: u64,
    /// Cleared on shutdown so no keep-alive frame follows the final stop
    keep_alive: bool,
    link: Box<dyn MotorLink>,
}

/// Thread-safe controller for one wheel
pub struct WheelController {
    wheel: Wheel,
    params: RampParams,
    state: Mutex<WheelState>,
    link_healthy: AtomicBool,
}

impl WheelController {
    pub fn new(wheel: Wheel, link: Box<dyn MotorLink>, params: RampParams) -> Self {
        Self {
            wheel,
            params,
            state: Mutex::new(WheelState {
                duty_cycle: 0.0,
                stops: 0,
                keep_alive: true,
                link,
            }),
            link_healthy: AtomicBool::new(true),
        }
    }

    // A panic while holding the lock cannot leave the duty cycle torn, so
    // poisoning is ignored.
    fn lock(&self) -> MutexGuard<'_, WheelState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_range(&self, duty_cycle: f64) -> Result<()> {
        if self.params.limits.contains(duty_cycle) {
            Ok(())
        } else {
            Err(DriveError::OutOfRange {
                value: duty_cycle,
                max: self.params.limits.max,
            })
        }
    }

    fn link_error(&self, source: LinkError) -> DriveError {
        DriveError::Link {
            wheel: self.wheel,
            source,
        }
    }

    pub fn wheel(&self) -> Wheel {
        self.wheel
    }

    /// Last commanded duty cycle
    pub fn get(&self) -> f64 {
        self.lock().duty_cycle
    }

    /// Command a duty cycle and send it right away
    ///
    /// The value is stored even if the send fails; the transmit loop keeps
    /// retrying it.
    pub fn set(&self, duty_cycle: f64) -> Result<()> {
        self.check_range(duty_cycle)?;
        let mut state = self.lock();
        state.duty_cycle = duty_cycle;
        state
            .link
            .send_duty_cycle(duty_cycle)
            .map_err(|e| self.link_error(e))
    }

    /// Atomically replace the duty cycle with `f(current)` and send it.
    /// Returns the new value.
    pub fn update(&self, f: impl FnOnce(f64) -> f64) -> Result<f64> {
        let mut state = self.lock();
        let next = f(state.duty_cycle);
        self.check_range(next)?;
        state.duty_cycle = next;
        state
            .link
            .send_duty_cycle(next)
            .map_err(|e| self.link_error(e))?;
        Ok(next)
    }

    /// `set` then keep the value for `duration`
    pub fn hold(&self, duty_cycle: f64, duration: Duration) -> Result<()> {
        self.set(duty_cycle)?;
        std::thread::sleep(duration);
        Ok(())
    }

    /// Ramp toward `target` with the acceleration step
    pub fn accelerate_to(&self, target: f64) -> Result<()> {
        self.ramp_to(target, self.params.acc_step, "accelerate")
    }

    /// Ramp toward `target` with the deceleration step; may cross zero
    pub fn decelerate_to(&self, target: f64) -> Result<()> {
        self.ramp_to(target, self.params.dec_step, "decelerate")
    }

    /// Ramp to a standstill with the braking step
    pub fn brake(&self) -> Result<()> {
        self.ramp_to(0.0, self.params.brk_step, "brake")
    }

    fn ramp_to(&self, target: f64, step: f64, kind: &str) -> Result<()> {
        self.check_range(target)?;

        let (start, epoch) = {
            let state = self.lock();
            (state.duty_cycle, state.stops)
        };
        if start == target {
            return Ok(());
        }
        let steps = ramp::max_steps(start, target, step).max(1);
        debug!(
            "{} {} ramp {:.3} -> {:.3} (up to {} steps)",
            self.wheel, kind, start, target, steps
        );

        // The ramp walks its own path from `start`; a concurrent `set` on this
        // wheel is overwritten by the next step, never stepped from.
        let mut current = start;
        let mut pacer = Pacer::new(self.params.step_interval);
        for n in 1..=steps {
            let next = if n == steps {
                target
            } else {
                ramp::next_step(current, target, step, &self.params.limits)
            };

            // One step under the lock; the lock is released before pacing
            let sent = {
                let mut state = self.lock();
                if state.stops != epoch {
                    warn!("{} {} ramp cut off by emergency stop", self.wheel, kind);
                    return Err(DriveError::Preempted { wheel: self.wheel });
                }
                state.duty_cycle = next;
                state.link.send_duty_cycle(next)
            };

            if let Err(e) = sent {
                error!("{} {} ramp aborted: {}", self.wheel, kind, e);
                if let Err(stop_err) = self.emergency_stop() {
                    error!(
                        "{} fallback emergency stop also failed: {}",
                        self.wheel, stop_err
                    );
                }
                return Err(self.link_error(e));
            }

            current = next;
            if current == target {
                break;
            }
            pacer.wait();
        }

        debug!("{} {} ramp reached {:.3}", self.wheel, kind, target);
        Ok(())
    }

    /// Kill motor current and zero the commanded duty cycle
    ///
    /// Any ramp running on this wheel observes the stop on its next step and
    /// returns [`DriveError::Preempted`].
    pub fn emergency_stop(&self) -> Result<()> {
        let mut state = self.lock();
        state.stops += 1;
        state.duty_cycle = 0.0;
        let sent = state.link.send_zero_current();
        drop(state);

        match sent {
            Ok(()) => {
                info!("{} wheel emergency stopped", self.wheel);
                Ok(())
            }
            Err(e) => Err(self.link_error(e)),
        }
    }

    /// Resend the current duty cycle; used by the transmit loop.
    /// Returns `None` once keep-alive has been halted.
    pub fn transmit(&self) -> Result<Option<f64>> {
        let mut state = self.lock();
        if !state.keep_alive {
            return Ok(None);
        }
        let duty_cycle = state.duty_cycle;
        let sent = state.link.send_duty_cycle(duty_cycle);
        drop(state);

        self.link_healthy.store(sent.is_ok(), Ordering::Relaxed);
        sent.map(|()| Some(duty_cycle))
            .map_err(|e| self.link_error(e))
    }

    /// Stop answering the transmit loop. Takes the lock, so a keep-alive
    /// frame already being written finishes before this returns.
    pub fn halt_keep_alive(&self) {
        self.lock().keep_alive = false;
    }

    /// Whether the last keep-alive frame went through
    pub fn link_healthy(&self) -> bool {
        self.link_healthy.load(Ordering::Relaxed)
    }

    pub fn close_link(&self) {
        self.lock().link.close();
    }
}
