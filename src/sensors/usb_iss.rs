//! USB-ISS serial-to-SPI bridge.
//!
//! The bridge is driven over a CDC serial port. `0x5A 0x02` selects the
//! I/O mode, `0x61` clocks an SPI frame (chip select asserted for the frame
//! only) and is answered with `0xFF` followed by the bytes clocked in.

use std::io::{Read, Write};
use std::path::Path;
use std::thread;
use std::time::Duration;

use embedded_hal::spi::{ErrorKind, ErrorType, Operation, SpiDevice};
use serialport::SerialPort;

use crate::error::SensorError;

const ISS_CMD: u8 = 0x5A;
const ISS_MODE: u8 = 0x02;
/// SPI, TX on idle-to-active edge, clock idle low (OPC-N3 uses SPI mode 1)
const SPI_MODE_1: u8 = 0x92;
/// 6 MHz / (divisor + 1) = 500 kHz
const SPI_DIVISOR: u8 = 11;
const SPI_TRANSFER: u8 = 0x61;
const ACK: u8 = 0xFF;
const MAX_FRAME: usize = 62;

#[derive(Debug)]
pub struct UsbIssError(pub String);

impl embedded_hal::spi::Error for UsbIssError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::Other
    }
}

impl From<std::io::Error> for UsbIssError {
    fn from(e: std::io::Error) -> Self {
        UsbIssError(e.to_string())
    }
}

pub struct UsbIss<P = Box<dyn SerialPort>> {
    port: P,
}

impl UsbIss<Box<dyn SerialPort>> {
    pub fn open(path: &Path) -> Result<Self, SensorError> {
        let port = serialport::new(path.to_string_lossy(), 57_600)
            .timeout(Duration::from_millis(500))
            .open()
            .map_err(|e| SensorError::Bus(format!("{}: {}", path.display(), e)))?;
        UsbIss::with_port(port)
    }
}

impl<P: Read + Write> UsbIss<P> {
    /// Wrap an already-open port and switch the bridge into SPI mode
    pub fn with_port(port: P) -> Result<Self, SensorError> {
        let mut iss = UsbIss { port };
        iss.port
            .write_all(&[ISS_CMD, ISS_MODE, SPI_MODE_1, SPI_DIVISOR])?;
        let mut reply = [0u8; 2];
        iss.port.read_exact(&mut reply)?;
        if reply[0] != ACK {
            return Err(SensorError::Bus(format!(
                "USB-ISS rejected SPI mode (error code {:#04x})",
                reply[1]
            )));
        }
        Ok(iss)
    }

    fn exchange(&mut self, tx: &[u8]) -> Result<Vec<u8>, UsbIssError> {
        let mut rx = Vec::with_capacity(tx.len());
        for chunk in tx.chunks(MAX_FRAME) {
            let mut frame = Vec::with_capacity(chunk.len() + 1);
            frame.push(SPI_TRANSFER);
            frame.extend_from_slice(chunk);
            self.port.write_all(&frame)?;

            let mut reply = vec![0u8; chunk.len() + 1];
            self.port.read_exact(&mut reply)?;
            if reply[0] != ACK {
                return Err(UsbIssError(format!(
                    "SPI transfer not acknowledged ({:#04x})",
                    reply[0]
                )));
            }
            rx.extend_from_slice(&reply[1..]);
        }
        Ok(rx)
    }
}

impl<P> ErrorType for UsbIss<P> {
    type Error = UsbIssError;
}

impl<P: Read + Write> SpiDevice for UsbIss<P> {
    fn transaction(&mut self, operations: &mut [Operation<'_, u8>]) -> Result<(), UsbIssError> {
        for op in operations.iter_mut() {
            match op {
                Operation::Read(buf) => {
                    let rx = self.exchange(&vec![0u8; buf.len()])?;
                    buf.copy_from_slice(&rx);
                }
                Operation::Write(buf) => {
                    self.exchange(buf)?;
                }
                Operation::Transfer(read, write) => {
                    let mut tx = write.to_vec();
                    tx.resize(read.len().max(write.len()), 0);
                    let rx = self.exchange(&tx)?;
                    let n = read.len();
                    read.copy_from_slice(&rx[..n]);
                }
                Operation::TransferInPlace(buf) => {
                    let rx = self.exchange(buf)?;
                    buf.copy_from_slice(&rx);
                }
                Operation::DelayNs(ns) => thread::sleep(Duration::from_nanos(*ns as u64)),
            }
        }
        Ok(())
    }
}
