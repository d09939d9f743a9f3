// Duty cycle step math shared by the wheel ramps and the vehicle commands.
// Pure functions, no locking or I/O.

use std::thread;
use std::time::{Duration, Instant};

/// Slack for float accumulation when deciding a ramp has arrived
const EPSILON: f64 = 1e-9;

/// Duty cycle bounds every commanded value must respect
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Limits {
    pub max: f64,
    /// Smallest magnitude that actually turns the motor
    pub min: f64,
}

impl Limits {
    pub fn contains(&self, duty_cycle: f64) -> bool {
        duty_cycle.is_finite() && duty_cycle.abs() <= self.max
    }

    pub fn clamp(&self, duty_cycle: f64) -> f64 {
        duty_cycle.clamp(-self.max, self.max)
    }
}

/// Next value of a ramp from `current` toward `target`.
///
/// Moves at most `step`, lands exactly on `target` once within reach and
/// never leaves `[-max, max]`. When the path crosses or ends at zero, a value
/// that would sit inside the dead zone on the way in snaps to zero.
pub fn next_step(current: f64, target: f64, step: f64, limits: &Limits) -> f64 {
    let delta = target - current;
    let next = if delta.abs() <= step + EPSILON {
        target
    } else {
        current + step.copysign(delta)
    };
    let next = limits.clamp(next);

    let through_zero = current * target <= 0.0;
    if through_zero
        && next != target
        && next != 0.0
        && next.abs() < limits.min
        && next.abs() < current.abs()
        && next.signum() == current.signum()
    {
        return 0.0;
    }
    next
}

/// One accelerate command: `max(min, current + step)`, capped at `max`.
/// From reverse or standstill this lands on `min` forward.
pub fn accelerate_step(current: f64, step: f64, limits: &Limits) -> f64 {
    limits.clamp((current + step).max(limits.min))
}

/// One decelerate command: `current - step`, floored at `-max`.
///
/// Never left in the dead zone: coming down toward zero it drops to zero,
/// going into reverse it jumps to `-min`.
pub fn decelerate_step(current: f64, step: f64, limits: &Limits) -> f64 {
    let next = limits.clamp(current - step);
    if next == 0.0 || next.abs() >= limits.min {
        next
    } else if next > 0.0 {
        0.0
    } else {
        -limits.min
    }
}

/// Upper bound on the number of steps a ramp needs
pub fn max_steps(current: f64, target: f64, step: f64) -> usize {
    ((target - current).abs() / step - EPSILON).ceil().max(0.0) as usize
}

/// Paces ramp steps against a monotonic deadline so sleeps do not drift
pub struct Pacer {
    period: Duration,
    next: Instant,
}

impl Pacer {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            next: Instant::now() + period,
        }
    }

    /// Block until the next deadline. If we are already late, the schedule
    /// restarts from now instead of bursting to catch up.
    pub fn wait(&mut self) {
        if self.period.is_zero() {
            return;
        }
        let now = Instant::now();
        if self.next > now {
            thread::sleep(self.next - now);
        } else {
            self.next = now;
        }
        self.next += self.period;
    }
}
