// Direction test: spin each wheel forward then backward at a low duty cycle
//
// Use this to check wiring: which port is which wheel, and which sign is
// forward on each side.
//
// Usage: cargo run --example direction_test -- [left_port] [right_port]
// Example: cargo run --example direction_test -- /dev/ttyACM0 /dev/ttyACM1
//
// Safety features:
// - Explicit confirmation before any writes
// - Very low duty cycle
// - Emergency stop on every exit path

use skateback_runtime::config::{DriveConfig, SERIAL_LEFT, SERIAL_RIGHT};
use skateback_runtime::drive::{SerialPorts, VehicleController, Wheel};
use std::io::{self, Write};
use std::time::Duration;

const TEST_DUTY: f64 = 0.1;
const SPIN_TIME: Duration = Duration::from_secs(2);
const PAUSE_TIME: Duration = Duration::from_secs(1);

fn confirm(prompt: &str) -> bool {
    print!("{} [y/N]: ", prompt);
    if io::stdout().flush().is_err() {
        return false;
    }
    let mut input = String::new();
    io::stdin().read_line(&mut input).is_ok() && input.trim().eq_ignore_ascii_case("y")
}

fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Setup logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // Get ports from args or use defaults
    let mut args = std::env::args().skip(1);
    let left = args.next().unwrap_or_else(|| SERIAL_LEFT.to_string());
    let right = args.next().unwrap_or_else(|| SERIAL_RIGHT.to_string());

    println!("SkateBack direction test (WITH WRITES)");
    println!("  Wheels WILL spin. Lift the board off the ground first!");
    println!();
    println!("Left port:  {}", left);
    println!("Right port: {}", right);
    println!();

    if !confirm("Is the board elevated so both wheels spin freely?") {
        println!("Please lift the board before running this test.");
        return Ok(());
    }

    // Transmit loops need a runtime to live on
    let runtime = tokio::runtime::Runtime::new()?;
    let vehicle = VehicleController::open(
        &DriveConfig::default(),
        &SerialPorts::new(&left, &right),
        runtime.handle(),
    )?;
    println!("✓ Connected");

    let result = spin_each_wheel(&vehicle);
    vehicle.shutdown()?;
    result?;

    println!();
    println!("Direction test completed.");
    Ok(())
}

fn spin_each_wheel(
    vehicle: &VehicleController,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    for wheel in Wheel::ALL {
        for (label, duty) in [("positive", TEST_DUTY), ("negative", -TEST_DUTY)] {
            println!("Testing {} wheel with {} duty cycle...", wheel, label);
            let controller = vehicle.wheel(wheel);
            controller.hold(duty, SPIN_TIME)?;
            controller.hold(0.0, PAUSE_TIME)?;
        }
    }
    Ok(())
}
