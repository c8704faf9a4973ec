//! Alphasense OPC-N3 optical particle counter.
//!
//! The driver is generic over [`SpiDevice`], so the same protocol runs over
//! native spidev and over the USB-ISS serial bridge. Every byte is its own
//! SPI frame; the device wants ~10 µs between bytes and a ready handshake
//! (0xF3) before each command's payload.

use std::thread;
use std::time::Duration;

use embedded_hal::spi::SpiDevice;
use log::{debug, warn};

use crate::error::{SensorError, SensorResult};
use crate::sample::{OpcReading, OPC_BINS};

const CMD_POWER: u8 = 0x03;
const OPT_FAN_OFF: u8 = 0x02;
const OPT_FAN_ON: u8 = 0x03;
const OPT_LASER_OFF: u8 = 0x06;
const OPT_LASER_ON: u8 = 0x07;
const CMD_SERIAL: u8 = 0x10;
const CMD_HISTOGRAM: u8 = 0x30;

const READY: u8 = 0xF3;
const HANDSHAKE_ATTEMPTS: u32 = 20;

const SERIAL_LEN: usize = 60;
pub const HISTOGRAM_LEN: usize = 86;

const BYTE_GAP: Duration = Duration::from_micros(10);
const RETRY_GAP: Duration = Duration::from_millis(10);
const FAN_SPINUP: Duration = Duration::from_millis(600);

pub struct OpcN3<SPI> {
    spi: SPI,
    powered: bool,
}

impl<SPI: SpiDevice> OpcN3<SPI> {
    pub fn new(spi: SPI) -> Self {
        OpcN3 {
            spi,
            powered: false,
        }
    }

    /// Power fan and laser, let the flow settle, then throw away the first
    /// histogram (its sampling period covers the power-off time).
    pub fn initialize(spi: SPI, warmup: Duration) -> SensorResult<Self> {
        let mut opc = OpcN3::new(spi);
        opc.power_on()?;
        thread::sleep(warmup);
        if let Err(e) = opc.histogram() {
            debug!("[opc] discarded warm-up histogram: {}", e);
        }
        Ok(opc)
    }

    pub fn is_powered(&self) -> bool {
        self.powered
    }

    pub fn power_on(&mut self) -> SensorResult<()> {
        self.set_power(OPT_FAN_ON)?;
        thread::sleep(FAN_SPINUP);
        self.set_power(OPT_LASER_ON)?;
        self.powered = true;
        Ok(())
    }

    /// Laser off then fan off. Safe to call repeatedly.
    pub fn power_off(&mut self) -> SensorResult<()> {
        if !self.powered {
            return Ok(());
        }
        self.set_power(OPT_LASER_OFF)?;
        self.set_power(OPT_FAN_OFF)?;
        self.powered = false;
        Ok(())
    }

    pub fn serial(&mut self) -> SensorResult<String> {
        self.handshake(CMD_SERIAL)?;
        let raw = self.read_payload(CMD_SERIAL, SERIAL_LEN)?;
        let text = String::from_utf8_lossy(&raw);
        let serial = text
            .trim_matches(|c: char| c == '\0' || c.is_whitespace() || c == '\u{FFFD}')
            .to_string();
        if serial.is_empty() {
            return Err(SensorError::Parse("empty serial string".to_string()));
        }
        Ok(serial)
    }

    pub fn histogram(&mut self) -> SensorResult<OpcReading> {
        self.handshake(CMD_HISTOGRAM)?;
        let raw = self.read_payload(CMD_HISTOGRAM, HISTOGRAM_LEN)?;
        parse_histogram(&raw)
    }

    pub fn release(self) -> SPI {
        self.spi
    }

    fn set_power(&mut self, option: u8) -> SensorResult<()> {
        self.handshake(CMD_POWER)?;
        self.xfer(option)?;
        thread::sleep(RETRY_GAP);
        Ok(())
    }

    fn handshake(&mut self, command: u8) -> SensorResult<()> {
        for attempt in 1..=HANDSHAKE_ATTEMPTS {
            if self.xfer(command)? == READY {
                thread::sleep(RETRY_GAP);
                return Ok(());
            }
            thread::sleep(RETRY_GAP);
            if attempt == HANDSHAKE_ATTEMPTS / 2 {
                warn!("[opc] command {:#04x} not acknowledged after {} attempts", command, attempt);
            }
        }
        Err(SensorError::NotReady(format!(
            "command {:#04x} not acknowledged",
            command
        )))
    }

    fn read_payload(&mut self, command: u8, len: usize) -> SensorResult<Vec<u8>> {
        let mut data = Vec::with_capacity(len);
        for _ in 0..len {
            thread::sleep(BYTE_GAP);
            data.push(self.xfer(command)?);
        }
        Ok(data)
    }

    fn xfer(&mut self, byte: u8) -> SensorResult<u8> {
        let mut buf = [byte];
        self.spi
            .transfer_in_place(&mut buf)
            .map_err(|e| SensorError::Bus(format!("{:?}", e)))?;
        Ok(buf[0])
    }
}

/// CRC-16 (init 0xFFFF, reflected poly 0xA001) as used by the OPC-N3
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for &byte in data {
        crc ^= byte as u16;
        for _ in 0..8 {
            if crc & 1 != 0 {
                crc = (crc >> 1) ^ 0xA001;
            } else {
                crc >>= 1;
            }
        }
    }
    crc
}

fn u16_at(raw: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([raw[offset], raw[offset + 1]])
}

fn f32_at(raw: &[u8], offset: usize) -> f32 {
    f32::from_le_bytes([raw[offset], raw[offset + 1], raw[offset + 2], raw[offset + 3]])
}

/// Decode an 86-byte histogram frame.
///
/// Layout (little endian): 24 × u16 bins, 4 × u8 MToF, u16 period (/100 s),
/// u16 flow (/100 ml/s), u16 temp, u16 RH, 3 × f32 PM, 4 × u16 reject
/// counters, u16 fan revs, u16 laser status, u16 CRC.
pub fn parse_histogram(raw: &[u8]) -> SensorResult<OpcReading> {
    if raw.len() != HISTOGRAM_LEN {
        return Err(SensorError::Parse(format!(
            "histogram is {} bytes, expected {}",
            raw.len(),
            HISTOGRAM_LEN
        )));
    }

    let expected = u16_at(raw, 84);
    let actual = crc16(&raw[..84]);
    if expected != actual {
        return Err(SensorError::Checksum { expected, actual });
    }

    let mut bins = [0u16; OPC_BINS];
    for (i, bin) in bins.iter_mut().enumerate() {
        *bin = u16_at(raw, i * 2);
    }

    let reading = OpcReading {
        bins,
        sampling_period: u16_at(raw, 52) as f32 / 100.0,
        flow_rate: u16_at(raw, 54) as f32 / 100.0,
        pm1: f32_at(raw, 60),
        pm2_5: f32_at(raw, 64),
        pm10: f32_at(raw, 68),
        reject_glitch: u16_at(raw, 72),
        reject_long_tof: u16_at(raw, 74),
        reject_ratio: u16_at(raw, 76),
        reject_out_of_range: u16_at(raw, 78),
    };

    if ![reading.pm1, reading.pm2_5, reading.pm10]
        .iter()
        .all(|v| v.is_finite() && *v >= 0.0)
    {
        return Err(SensorError::Parse("PM values out of range".to_string()));
    }

    Ok(reading)
}
