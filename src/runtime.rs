// Command front ends: newline-delimited TCP server and optional Zenoh bridge
// Both translate commands into VehicleController calls; the drive core does
// not know they exist.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::runtime::Handle;
use tokio::time::interval;
use tracing::{error, info, warn};

// local imports
use crate::config::{DriveConfig, TOPIC_CMD, TOPIC_HEALTH, TOPIC_WHEELS};
use crate::drive::{SerialPorts, VehicleController};
use crate::error::DriveError;
use crate::messages::Command;
use crate::motor::{MotorLink, SimulatedLink};

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

// Frames kept per wheel in simulation mode
const SIM_HISTORY: usize = 256;

/// Everything the runtime needs to start
#[derive(Debug, Clone)]
pub struct RuntimeOptions {
    pub config: DriveConfig,
    pub ports: SerialPorts,
    pub listen: String,
    /// Drive simulated links instead of the serial ports
    pub simulate: bool,
    /// Also bridge commands and telemetry over Zenoh
    pub zenoh: bool,
}

/// Run a single command against the vehicle and describe the outcome
pub fn execute(vehicle: &VehicleController, command: Command) -> Result<String, DriveError> {
    match command {
        Command::Accelerate => {
            vehicle.accelerate()?;
            Ok("Successfully accelerated".to_string())
        }
        Command::Decelerate => {
            vehicle.decelerate()?;
            Ok("Successfully decelerated".to_string())
        }
        Command::Stop => {
            vehicle.stop()?;
            Ok("Successfully stopped".to_string())
        }
        Command::EmergencyStop => {
            vehicle.emergency_stop()?;
            Ok("Emergency stop executed".to_string())
        }
        Command::Status => Ok(vehicle.status().to_string()),
    }
}

/// Turn one line of client input into one line of reply
pub fn respond(vehicle: &VehicleController, line: &str) -> String {
    let command = match line.parse::<Command>() {
        Ok(command) => command,
        Err(unknown) => return unknown.to_string(),
    };

    match execute(vehicle, command) {
        Ok(reply) => reply,
        Err(e) => {
            let reply = format!("Error executing command '{}': {}", command, e);
            warn!("{}", reply);
            reply
        }
    }
}

// Commands block for the length of a ramp, so they run on the blocking pool
async fn respond_blocking(vehicle: Arc<VehicleController>, line: String) -> String {
    let command = line.clone();
    match tokio::task::spawn_blocking(move || respond(&vehicle, &line)).await {
        Ok(reply) => reply,
        Err(e) => format!("Error executing command '{}': {}", command, e),
    }
}

fn open_vehicle(
    options: &RuntimeOptions,
    runtime: &Handle,
) -> Result<VehicleController, DriveError> {
    if options.simulate {
        info!("Simulation mode: no serial ports will be opened");
        VehicleController::open_with(&options.config, runtime, |_| {
            let (link, _handle) = SimulatedLink::with_history(SIM_HISTORY);
            Ok(Box::new(link) as Box<dyn MotorLink>)
        })
    } else {
        VehicleController::open(&options.config, &options.ports, runtime)
    }
}

pub async fn run(options: RuntimeOptions) -> Result<(), BoxError> {
    let listener = TcpListener::bind(&options.listen).await?;

    let runtime = Handle::current();
    let vehicle = Arc::new(open_vehicle(&options, &runtime)?);
    info!(
        "Drive ready: max duty {}, steps acc {} / dec {} / brk {}",
        options.config.max_duty_cycle,
        options.config.acc_step,
        options.config.dec_step,
        options.config.brk_step
    );

    let bridge = async {
        if options.zenoh {
            zenoh_bridge(vehicle.clone(), options.config.transmit_period).await
        } else {
            std::future::pending().await
        }
    };

    let outcome: Result<(), BoxError> = tokio::select! {
        result = serve(listener, vehicle.clone()) => result,
        result = bridge => result,
        signal = tokio::signal::ctrl_c() => match signal {
            Ok(()) => {
                let vehicle = vehicle.clone();
                tokio::task::spawn_blocking(move || vehicle.interrupt())
                    .await
                    .map_err(BoxError::from)
            }
            Err(e) => Err(e.into()),
        }
    };
    if let Err(e) = &outcome {
        error!("Front end failed: {}", e);
    }

    // Runs on every exit path; a second call from Drop is a no-op
    let shutdown = {
        let vehicle = vehicle.clone();
        tokio::task::spawn_blocking(move || vehicle.shutdown()).await?
    };
    outcome?;
    shutdown?;
    info!("Drive shut down cleanly");
    Ok(())
}

/// Accept clients forever, one task per connection
pub async fn serve(
    listener: TcpListener,
    vehicle: Arc<VehicleController>,
) -> Result<(), BoxError> {
    info!("Command server listening on {}", listener.local_addr()?);

    loop {
        let (stream, addr) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!("Failed to accept connection: {}", e);
                continue;
            }
        };
        info!("Connected by {}", addr);

        let vehicle = vehicle.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, vehicle).await {
                warn!("Connection from {} failed: {}", addr, e);
            }
            info!("Connection with {} closed", addr);
        });
    }
}

async fn handle_connection(
    stream: TcpStream,
    vehicle: Arc<VehicleController>,
) -> std::io::Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        info!("Received command: {}", line);

        let reply = respond_blocking(vehicle.clone(), line.to_string()).await;
        info!("Command response: {}", reply);
        writer.write_all(reply.as_bytes()).await?;
        writer.write_all(b"\n").await?;
    }
    Ok(())
}

async fn zenoh_bridge(vehicle: Arc<VehicleController>, period: Duration) -> Result<(), BoxError> {
    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh::Config::default()).await?;

    info!("Setting up publishers and subscribers...");
    let subscriber = session.declare_subscriber(TOPIC_CMD).await?;
    let pub_wheels = session.declare_publisher(TOPIC_WHEELS).await?;
    let pub_health = session.declare_publisher(TOPIC_HEALTH).await?;

    info!("Subscribed to: {}", TOPIC_CMD);
    info!("Publishing to: {}, {}", TOPIC_WHEELS, TOPIC_HEALTH);

    let mut tick = interval(period);
    loop {
        tick.tick().await;

        // 1. Drain pending commands (non-blocking); each runs in the background
        while let Ok(Some(sample)) = subscriber.try_recv() {
            let payload = sample.payload().to_bytes();
            match serde_json::from_slice::<Command>(&payload) {
                Ok(command) => {
                    let vehicle = vehicle.clone();
                    tokio::spawn(async move {
                        let reply =
                            respond_blocking(vehicle, command.as_str().to_string()).await;
                        info!("Zenoh command {}: {}", command, reply);
                    });
                }
                Err(e) => {
                    warn!("Failed to parse command: {}", e);
                }
            }
        }

        // 2. Publish telemetry
        let wheels_json = serde_json::to_string(&vehicle.status())?;
        pub_wheels.put(wheels_json).await?;

        // 3. Publish health
        let health_json = serde_json::to_string(&vehicle.link_health())?;
        pub_health.put(health_json).await?;
    }
}
