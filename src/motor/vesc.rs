// VESC serial protocol (the subset the drive needs)
//
// Packet format (short): [0x02, Length, Payload..., CRC_hi, CRC_lo, 0x03]
// Packet format (long):  [0x03, Length_hi, Length_lo, Payload..., CRC_hi, CRC_lo, 0x03]
// Payload starts with a command id followed by big-endian fields.

use serialport::{self, SerialPort};
use std::io::Write;
use std::time::Duration;
use tracing::{debug, info};

use super::link::{LinkError, MotorLink, Result};

/// Packet framing bytes
const START_SHORT: u8 = 0x02;
const START_LONG: u8 = 0x03;
const STOP: u8 = 0x03;

/// Command ids
#[repr(u8)]
#[derive(Debug, Clone, Copy)]
pub enum CommandId {
    SetDutyCycle = 5,
    SetCurrent = 6,
}

/// Fixed-point scales used by the firmware
const DUTY_SCALE: f64 = 100_000.0;
const CURRENT_SCALE: f64 = 1_000.0;

/// Largest duty cycle magnitude the firmware accepts
pub const WIRE_MAX_DUTY: f64 = 1.0;

/// CRC-16/XMODEM over the payload
fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0;
    for &byte in data {
        crc ^= (byte as u16) << 8;
        for _ in 0..8 {
            crc = if crc & 0x8000 != 0 {
                (crc << 1) ^ 0x1021
            } else {
                crc << 1
            };
        }
    }
    crc
}

/// Wrap a payload in start byte, length, CRC and stop byte
fn frame(payload: &[u8]) -> Vec<u8> {
    let mut packet = Vec::with_capacity(payload.len() + 6);

    if payload.len() <= 0xFF {
        packet.push(START_SHORT);
        packet.push(payload.len() as u8);
    } else {
        packet.push(START_LONG);
        packet.extend_from_slice(&(payload.len() as u16).to_be_bytes());
    }
    packet.extend_from_slice(payload);
    packet.extend_from_slice(&crc16(payload).to_be_bytes());
    packet.push(STOP);

    packet
}

fn scaled_command(id: CommandId, value: f64, scale: f64) -> Vec<u8> {
    let raw = (value * scale).round() as i32;
    let mut payload = Vec::with_capacity(5);
    payload.push(id as u8);
    payload.extend_from_slice(&raw.to_be_bytes());
    frame(&payload)
}

/// Encode a SetDutyCycle packet
pub fn encode_duty_cycle(duty_cycle: f64) -> Result<Vec<u8>> {
    if !duty_cycle.is_finite() || duty_cycle.abs() > WIRE_MAX_DUTY {
        return Err(LinkError::Unencodable { value: duty_cycle });
    }
    Ok(scaled_command(CommandId::SetDutyCycle, duty_cycle, DUTY_SCALE))
}

/// Encode a SetCurrent packet
pub fn encode_current(amps: f64) -> Result<Vec<u8>> {
    if !amps.is_finite() {
        return Err(LinkError::Unencodable { value: amps });
    }
    Ok(scaled_command(CommandId::SetCurrent, amps, CURRENT_SCALE))
}

/// One serial connection to one VESC
pub struct VescLink {
    name: String,
    port: Option<Box<dyn SerialPort>>,
}

impl VescLink {
    /// Open the serial port with the given baudrate and write timeout
    pub fn open(port_name: &str, baudrate: u32, timeout: Duration) -> Result<Self> {
        let port = serialport::new(port_name, baudrate)
            .timeout(timeout)
            .open()?;

        info!("Opened VESC link on {} at {} baud", port_name, baudrate);
        Ok(Self {
            name: port_name.to_string(),
            port: Some(port),
        })
    }

    fn write_packet(&mut self, packet: &[u8]) -> Result<()> {
        let port = self.port.as_mut().ok_or(LinkError::Closed)?;
        port.write_all(packet)?;
        port.flush()?;
        Ok(())
    }
}

impl MotorLink for VescLink {
    fn send_duty_cycle(&mut self, duty_cycle: f64) -> Result<()> {
        let packet = encode_duty_cycle(duty_cycle)?;
        self.write_packet(&packet)
    }

    fn send_zero_current(&mut self) -> Result<()> {
        let packet = encode_current(0.0)?;
        debug!("Zero current on {}", self.name);
        self.write_packet(&packet)
    }

    fn close(&mut self) {
        if self.port.take().is_some() {
            info!("Closed VESC link on {}", self.name);
        }
    }

    fn is_open(&self) -> bool {
        self.port.is_some()
    }
}
