// Fixed-rate keep-alive: resend each wheel's commanded duty cycle
//
// The VESC drops to idle when it stops hearing from us, so this runs for the
// controller's whole lifetime, whether or not a ramp is in progress.

use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::{self, JoinHandle};
use tokio::time::{MissedTickBehavior, interval, sleep};
use tracing::{error, info, trace, warn};

use super::wheel::WheelController;

/// Running transmit loop; aborted on drop
pub struct TransmitLoop {
    task: Option<JoinHandle<()>>,
}

impl TransmitLoop {
    /// Start the loop for one wheel on the given runtime
    pub fn spawn(
        runtime: &Handle,
        wheel: Arc<WheelController>,
        period: Duration,
        backoff: Duration,
    ) -> Self {
        let task = runtime.spawn(run(wheel, period, backoff));
        Self { task: Some(task) }
    }

    /// Stop the loop. It ends at its next await point; a frame already
    /// handed to the blocking pool still completes under the wheel lock.
    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    /// False once the loop has been stopped, halted or has crashed
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }
}

impl Drop for TransmitLoop {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run(wheel: Arc<WheelController>, period: Duration, backoff: Duration) {
    let mut tick = interval(period);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut failures: u32 = 0;

    info!(
        "{} transmit loop started: every {}ms",
        wheel.wheel(),
        period.as_millis()
    );

    loop {
        tick.tick().await;

        // Serial writes block for up to the port timeout, so they stay off
        // the runtime's worker threads
        let sent = {
            let wheel = wheel.clone();
            task::spawn_blocking(move || wheel.transmit()).await
        };

        match sent {
            Err(e) => {
                error!("{} transmit loop crashed: {}", wheel.wheel(), e);
                return;
            }
            Ok(Ok(None)) => {
                info!("{} transmit loop halted", wheel.wheel());
                return;
            }
            Ok(Ok(Some(duty_cycle))) => {
                if failures > 0 {
                    info!(
                        "{} link recovered after {} failed frames",
                        wheel.wheel(),
                        failures
                    );
                    failures = 0;
                }
                trace!("{} duty cycle {:.3} sent", wheel.wheel(), duty_cycle);
            }
            Ok(Err(e)) => {
                if failures == 0 {
                    warn!("{} transmit failed, backing off: {}", wheel.wheel(), e);
                }
                failures = failures.saturating_add(1);
                sleep(backoff).await;
                tick.reset();
            }
        }
    }
}
