// High-level drive controller for the SkateBack board
//
// Owns both wheels and their transmit loops and exposes the vehicle-level
// commands the front ends use.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use tokio::runtime::Handle;
use tracing::{error, info, warn};

use super::ramp;
use super::transmit::TransmitLoop;
use super::wheel::{RampParams, Wheel, WheelController};
use crate::config::{DriveConfig, SERIAL_BAUDRATE, SERIAL_TIMEOUT};
use crate::error::{DriveError, Result};
use crate::messages::{LinkHealth, WheelTelemetry};
use crate::motor::{LinkError, MotorLink, VescLink};

/// Serial ports of the two wheel controllers
#[derive(Debug, Clone)]
pub struct SerialPorts {
    pub left: String,
    pub right: String,
    pub baudrate: u32,
    pub timeout: Duration,
}

impl SerialPorts {
    pub fn new(left: &str, right: &str) -> Self {
        Self {
            left: left.to_string(),
            right: right.to_string(),
            baudrate: SERIAL_BAUDRATE,
            timeout: SERIAL_TIMEOUT,
        }
    }

    fn port(&self, wheel: Wheel) -> &str {
        match wheel {
            Wheel::Left => &self.left,
            Wheel::Right => &self.right,
        }
    }
}

/// Two-wheel drive controller
pub struct VehicleController {
    left: Arc<WheelController>,
    right: Arc<WheelController>,
    params: RampParams,
    transmitters: Mutex<Vec<TransmitLoop>>,
    shut_down: AtomicBool,
}

impl VehicleController {
    /// Open both VESC serial links and start driving
    pub fn open(config: &DriveConfig, ports: &SerialPorts, runtime: &Handle) -> Result<Self> {
        Self::open_with(config, runtime, |wheel| {
            let port = ports.port(wheel);
            info!("Opening {} motor link on {}", wheel, port);
            VescLink::open(port, ports.baudrate, ports.timeout)
                .map(|link| Box::new(link) as Box<dyn MotorLink>)
        })
    }

    /// Open both links with `open_link` and start the transmit loops.
    ///
    /// If the right link fails to open, the left one is closed before the
    /// error is returned.
    pub fn open_with<F>(config: &DriveConfig, runtime: &Handle, mut open_link: F) -> Result<Self>
    where
        F: FnMut(Wheel) -> std::result::Result<Box<dyn MotorLink>, LinkError>,
    {
        config.validate()?;

        let mut left = open_link(Wheel::Left).map_err(|source| DriveError::Init {
            wheel: Wheel::Left,
            source,
        })?;
        let right = match open_link(Wheel::Right) {
            Ok(link) => link,
            Err(source) => {
                left.close();
                return Err(DriveError::Init {
                    wheel: Wheel::Right,
                    source,
                });
            }
        };

        let vehicle = Self::from_links(config, left, right);
        vehicle.start_transmitters(config, runtime);
        Ok(vehicle)
    }

    fn from_links(
        config: &DriveConfig,
        left: Box<dyn MotorLink>,
        right: Box<dyn MotorLink>,
    ) -> Self {
        let params = RampParams::from(config);
        Self {
            left: Arc::new(WheelController::new(Wheel::Left, left, params)),
            right: Arc::new(WheelController::new(Wheel::Right, right, params)),
            params,
            transmitters: Mutex::new(Vec::new()),
            shut_down: AtomicBool::new(false),
        }
    }

    fn start_transmitters(&self, config: &DriveConfig, runtime: &Handle) {
        let mut transmitters = self
            .transmitters
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        for wheel in [&self.left, &self.right] {
            transmitters.push(TransmitLoop::spawn(
                runtime,
                wheel.clone(),
                config.transmit_period,
                config.transmit_backoff,
            ));
        }
    }

    pub fn wheel(&self, wheel: Wheel) -> &WheelController {
        match wheel {
            Wheel::Left => &self.left,
            Wheel::Right => &self.right,
        }
    }

    /// Step both wheels forward: `max(MIN, current + ACC)`, capped at MAX
    pub fn accelerate(&self) -> Result<WheelTelemetry> {
        let (step, limits) = (self.params.acc_step, self.params.limits);
        self.step_both(|d| ramp::accelerate_step(d, step, &limits))
    }

    /// Step both wheels back by one deceleration step, into reverse if needed
    pub fn decelerate(&self) -> Result<WheelTelemetry> {
        let (step, limits) = (self.params.dec_step, self.params.limits);
        self.step_both(|d| ramp::decelerate_step(d, step, &limits))
    }

    fn step_both(&self, step: impl Fn(f64) -> f64) -> Result<WheelTelemetry> {
        let result = self.left.update(&step).and_then(|left| {
            let right = self.right.update(&step)?;
            Ok(WheelTelemetry { left, right })
        });

        match result {
            Ok(telemetry) => {
                info!(
                    "New duty cycles - Left: {:.3}, Right: {:.3}",
                    telemetry.left, telemetry.right
                );
                Ok(telemetry)
            }
            Err(e) => {
                error!("Duty cycle change failed, stopping: {}", e);
                self.stop_both_quietly();
                Err(e)
            }
        }
    }

    /// Ramp both wheels to a standstill in parallel
    ///
    /// If either ramp fails or is cut off by an emergency stop, both wheels
    /// are emergency stopped before the error is returned.
    pub fn stop(&self) -> Result<()> {
        let (left, right) = thread::scope(|s| {
            let left = s.spawn(|| self.left.brake());
            let right = self.right.brake();
            let left = left.join().unwrap_or_else(|panic| {
                self.stop_both_quietly();
                std::panic::resume_unwind(panic)
            });
            (left, right)
        });

        match left.and(right) {
            Ok(()) => {
                info!("Both wheels stopped smoothly");
                Ok(())
            }
            Err(e) => {
                warn!("Smooth stop failed, falling back to emergency stop: {}", e);
                self.stop_both_quietly();
                Err(e)
            }
        }
    }

    /// Kill current on both wheels
    ///
    /// Both wheels are always attempted; the first failure is returned.
    pub fn emergency_stop(&self) -> Result<()> {
        let left = self.left.emergency_stop();
        let right = self.right.emergency_stop();
        left.and(right)
    }

    fn stop_both_quietly(&self) {
        if let Err(e) = self.emergency_stop() {
            error!("Emergency stop failed: {}", e);
        }
    }

    /// External interrupt (Ctrl-C, lost operator): stop immediately
    pub fn interrupt(&self) {
        warn!("Interrupt received, emergency stopping");
        self.stop_both_quietly();
    }

    pub fn status(&self) -> WheelTelemetry {
        WheelTelemetry {
            left: self.left.get(),
            right: self.right.get(),
        }
    }

    /// `LinkFault` when either wheel's last keep-alive failed or a transmit
    /// loop is no longer running
    pub fn link_health(&self) -> LinkHealth {
        let transmitting = self
            .transmitters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .all(TransmitLoop::is_running);
        if transmitting && self.left.link_healthy() && self.right.link_healthy() {
            LinkHealth::Ok
        } else {
            LinkHealth::LinkFault
        }
    }

    /// Stop transmitting, kill both motors and close both links.
    ///
    /// Safe to call more than once; only the first call does anything.
    pub fn shutdown(&self) -> Result<()> {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        info!("Shutting down drive");

        for transmitter in self
            .transmitters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter_mut()
        {
            transmitter.stop();
        }
        self.left.halt_keep_alive();
        self.right.halt_keep_alive();

        let stopped = self.emergency_stop();
        self.left.close_link();
        self.right.close_link();
        stopped
    }
}

impl fmt::Display for VehicleController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.status())
    }
}

impl Drop for VehicleController {
    fn drop(&mut self) {
        // Last line of defence if nobody called shutdown
        if let Err(e) = self.shutdown() {
            warn!("Failed to stop motors on drop: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::motor::{Frame, SimHandle, SimulatedLink};

    fn config() -> DriveConfig {
        DriveConfig {
            step_interval: Duration::ZERO,
            transmit_period: Duration::from_millis(5),
            transmit_backoff: Duration::from_millis(5),
            ..DriveConfig::default()
        }
    }

    fn vehicle(config: &DriveConfig) -> (VehicleController, SimHandle, SimHandle) {
        let (left, left_handle) = SimulatedLink::new();
        let (right, right_handle) = SimulatedLink::new();
        let mut links = vec![Box::new(right), Box::new(left)];
        let vehicle = VehicleController::open_with(config, &Handle::current(), move |_| {
            links
                .pop()
                .map(|link| link as Box<dyn MotorLink>)
                .ok_or(LinkError::Closed)
        })
        .unwrap();
        (vehicle, left_handle, right_handle)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_accelerate_leaves_dead_zone_and_caps() {
        let (vehicle, _, _) = vehicle(&config());

        let t = vehicle.accelerate().unwrap();
        assert_eq!((t.left, t.right), (0.05, 0.05));
        let t = vehicle.accelerate().unwrap();
        assert!((t.left - 0.07).abs() < 1e-9);

        for _ in 0..50 {
            vehicle.accelerate().unwrap();
        }
        assert_eq!(vehicle.status(), WheelTelemetry { left: 0.6, right: 0.6 });
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_accelerate_from_reverse_goes_to_min_forward() {
        let (vehicle, left, right) = vehicle(&config());
        vehicle.wheel(Wheel::Left).set(-0.3).unwrap();
        vehicle.wheel(Wheel::Right).set(-0.3).unwrap();

        let t = vehicle.accelerate().unwrap();
        assert_eq!((t.left, t.right), (0.05, 0.05));
        for handle in [&left, &right] {
            assert!(handle.frames().contains(&Frame::DutyCycle(0.05)));
        }
        vehicle.shutdown().unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_link_health_follows_transmit_loops() {
        let (vehicle, left, _) = vehicle(&config());
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(vehicle.link_health(), LinkHealth::Ok);

        left.set_failing(true);
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(vehicle.link_health(), LinkHealth::LinkFault);

        left.set_failing(false);
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(vehicle.link_health(), LinkHealth::Ok);

        // No keep-alive after shutdown
        vehicle.shutdown().unwrap();
        assert_eq!(vehicle.link_health(), LinkHealth::LinkFault);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_decelerate_into_reverse() {
        let (vehicle, _, _) = vehicle(&config());

        let t = vehicle.decelerate().unwrap();
        assert_eq!((t.left, t.right), (-0.05, -0.05));
        for _ in 0..50 {
            vehicle.decelerate().unwrap();
        }
        assert_eq!(vehicle.status(), WheelTelemetry { left: -0.6, right: -0.6 });
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_stop_honours_sign_of_each_wheel() {
        let (vehicle, left, right) = vehicle(&config());
        vehicle.wheel(Wheel::Left).set(0.4).unwrap();
        vehicle.wheel(Wheel::Right).set(-0.3).unwrap();

        vehicle.stop().unwrap();
        assert_eq!(vehicle.status(), WheelTelemetry { left: 0.0, right: 0.0 });
        for (handle, sign) in [(&left, 1.0), (&right, -1.0)] {
            assert!(handle.frames().iter().all(|f| match f {
                Frame::DutyCycle(d) => *d == 0.0 || d.signum() == sign,
                Frame::ZeroCurrent => false,
            }));
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_stop_failure_falls_back_to_emergency_stop() {
        let (vehicle, left, right) = vehicle(&config());
        vehicle.wheel(Wheel::Left).set(0.4).unwrap();
        vehicle.wheel(Wheel::Right).set(0.4).unwrap();
        right.set_failing(true);

        assert!(vehicle.stop().is_err());
        assert_eq!(vehicle.status(), WheelTelemetry { left: 0.0, right: 0.0 });
        assert!(left.frames().contains(&Frame::ZeroCurrent));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_emergency_stop_both_wheels_twice() {
        let (vehicle, left, right) = vehicle(&config());
        vehicle.accelerate().unwrap();

        vehicle.emergency_stop().unwrap();
        vehicle.emergency_stop().unwrap();
        assert_eq!(vehicle.status(), WheelTelemetry { left: 0.0, right: 0.0 });
        assert!(left.frames().contains(&Frame::ZeroCurrent));
        assert!(right.frames().contains(&Frame::ZeroCurrent));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_emergency_stop_during_parallel_ramps() {
        let config = DriveConfig {
            step_interval: Duration::from_millis(10),
            ..config()
        };
        let (vehicle, left, right) = vehicle(&config);
        let vehicle = Arc::new(vehicle);

        let ramps: Vec<_> = Wheel::ALL
            .into_iter()
            .map(|wheel| {
                let vehicle = vehicle.clone();
                thread::spawn(move || vehicle.wheel(wheel).accelerate_to(0.6))
            })
            .collect();
        tokio::time::sleep(Duration::from_millis(50)).await;
        vehicle.emergency_stop().unwrap();

        for ramp in ramps {
            assert!(matches!(
                ramp.join().unwrap(),
                Err(DriveError::Preempted { .. })
            ));
        }
        assert_eq!(vehicle.status(), WheelTelemetry { left: 0.0, right: 0.0 });
        assert!(left.frames().contains(&Frame::ZeroCurrent));
        assert!(right.frames().contains(&Frame::ZeroCurrent));
        vehicle.shutdown().unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_concurrent_accelerate_stays_bounded() {
        let (vehicle, _, _) = vehicle(&config());
        let vehicle = Arc::new(vehicle);
        vehicle.wheel(Wheel::Left).set(0.55).unwrap();
        vehicle.wheel(Wheel::Right).set(0.55).unwrap();

        let callers: Vec<_> = (0..2)
            .map(|_| {
                let vehicle = vehicle.clone();
                thread::spawn(move || vehicle.accelerate().unwrap())
            })
            .collect();
        for caller in callers {
            caller.join().unwrap();
        }

        // 0.55 -> 0.57 -> 0.59, never past the cap
        let status = vehicle.status();
        for duty in [status.left, status.right] {
            assert!(duty <= 0.6);
            assert!((duty - 0.59).abs() < 1e-9);
        }
        vehicle.shutdown().unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_partial_open_closes_first_link() {
        let (left, left_handle) = SimulatedLink::new();
        let mut left = Some(left);
        let result = VehicleController::open_with(&config(), &Handle::current(), |wheel| {
            match wheel {
                Wheel::Left => left
                    .take()
                    .map(|link| Box::new(link) as Box<dyn MotorLink>)
                    .ok_or(LinkError::Closed),
                Wheel::Right => Err(LinkError::Io(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "no such port",
                ))),
            }
        });

        assert!(matches!(
            result,
            Err(DriveError::Init { wheel: Wheel::Right, .. })
        ));
        assert!(left_handle.is_closed());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_invalid_config_rejected_before_opening() {
        let bad = DriveConfig {
            max_duty_cycle: 1.5,
            ..config()
        };
        let mut opened = false;
        let result = VehicleController::open_with(&bad, &Handle::current(), |_| {
            opened = true;
            Err(LinkError::Closed)
        });
        assert!(matches!(result, Err(DriveError::InvalidConfig(_))));
        assert!(!opened);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_shutdown_is_idempotent_and_ends_with_kill() {
        let (vehicle, left, right) = vehicle(&config());
        vehicle.accelerate().unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        vehicle.shutdown().unwrap();
        vehicle.shutdown().unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        for handle in [&left, &right] {
            assert!(handle.is_closed());
            assert_eq!(handle.frames().last(), Some(&Frame::ZeroCurrent));
        }
        assert_eq!(vehicle.to_string(), "L: 0.000; R: 0.000");
    }
}
