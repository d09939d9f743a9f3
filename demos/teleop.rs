// Keyboard teleop over Zenoh: W/Up accelerate, S/Down decelerate,
// Space stop, E emergency stop, Q quit
//
// Start the runtime with `--zenoh` first.
// Usage: cargo run --example teleop
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind},
    terminal::{disable_raw_mode, enable_raw_mode},
};
use skateback_runtime::config::TOPIC_CMD;
use skateback_runtime::messages::Command;
use std::time::Duration;
use tracing::info;

const POLL_MS: u64 = 20;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh::Config::default()).await?;
    let publisher = session.declare_publisher(TOPIC_CMD).await?;

    info!("Controls: W/Up=accelerate, S/Down=decelerate, Space=stop, E=emergency stop, Q=quit");

    enable_raw_mode()?;
    let result = run_teleop(&publisher).await;
    disable_raw_mode()?;

    result
}

async fn run_teleop(
    publisher: &zenoh::pubsub::Publisher<'_>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    loop {
        if event::poll(Duration::from_millis(POLL_MS))? {
            if let Event::Key(KeyEvent { code, kind, .. }) = event::read()? {
                // Repeats are ignored: one key press is one command
                if kind != KeyEventKind::Press {
                    continue;
                }

                let command = match code {
                    KeyCode::Char('w') | KeyCode::Up => Some(Command::Accelerate),
                    KeyCode::Char('s') | KeyCode::Down => Some(Command::Decelerate),
                    KeyCode::Char(' ') => Some(Command::Stop),
                    KeyCode::Char('e') => Some(Command::EmergencyStop),
                    KeyCode::Char('q') | KeyCode::Esc => {
                        // Never leave the board rolling without a controller
                        publisher
                            .put(serde_json::to_string(&Command::Stop)?)
                            .await?;
                        break;
                    }
                    _ => None,
                };

                if let Some(command) = command {
                    info!("Sending {}", command);
                    publisher.put(serde_json::to_string(&command)?).await?;
                }
            }
        }
    }

    Ok(())
}
