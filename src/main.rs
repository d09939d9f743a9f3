use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use skateback_runtime::config::{
    DriveConfig, LISTEN_ADDR, SERIAL_BAUDRATE, SERIAL_LEFT, SERIAL_RIGHT, SERIAL_TIMEOUT,
};
use skateback_runtime::drive::SerialPorts;
use skateback_runtime::runtime::{self, RuntimeOptions};

/// SkateBack drive runtime: two VESC wheels behind a line-based command server
#[derive(Debug, Parser)]
#[command(version)]
struct Args {
    /// Serial port of the left wheel controller
    #[arg(long, default_value = SERIAL_LEFT)]
    left_port: String,

    /// Serial port of the right wheel controller
    #[arg(long, default_value = SERIAL_RIGHT)]
    right_port: String,

    #[arg(long, default_value_t = SERIAL_BAUDRATE)]
    baud: u32,

    /// Address of the command server
    #[arg(long, default_value = LISTEN_ADDR)]
    listen: String,

    /// JSON file overriding drive tuning
    #[arg(long)]
    config: Option<PathBuf>,

    /// Run without hardware
    #[arg(long)]
    simulate: bool,

    /// Bridge commands and telemetry over Zenoh
    #[arg(long)]
    zenoh: bool,
}

impl Args {
    fn into_options(self) -> Result<RuntimeOptions, skateback_runtime::error::DriveError> {
        let config = match &self.config {
            Some(path) => DriveConfig::from_file(path)?,
            None => DriveConfig::default(),
        };
        Ok(RuntimeOptions {
            config,
            ports: SerialPorts {
                left: self.left_port,
                right: self.right_port,
                baudrate: self.baud,
                timeout: SERIAL_TIMEOUT,
            },
            listen: self.listen,
            simulate: self.simulate,
            zenoh: self.zenoh,
        })
    }
}

#[tokio::main]
async fn main() {
    // Setup logging (set RUST_LOG=debug for ramp detail, trace for every frame)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let result = match Args::parse().into_options() {
        Ok(options) => runtime::run(options).await,
        Err(e) => Err(e.into()),
    };
    if let Err(e) = result {
        eprintln!("Runtime error: {}", e);
        std::process::exit(1);
    }
}
