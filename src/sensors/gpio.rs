use embedded_hal::digital::OutputPin;
use linux_embedded_hal::sysfs_gpio::Direction;
use linux_embedded_hal::SysfsPin;
use log::debug;

use crate::error::{SensorError, SensorResult};

/// Sysfs GPIO line switching a sensor's supply
pub struct PowerRail {
    pin_number: u64,
    pin: Option<SysfsPin>,
}

impl PowerRail {
    /// Export the line, drive it high
    pub fn energize(pin_number: u64) -> SensorResult<Self> {
        let pin = SysfsPin::new(pin_number);
        pin.export().map_err(|e| gpio_error(pin_number, e))?;
        pin.set_direction(Direction::Out)
            .map_err(|e| gpio_error(pin_number, e))?;

        let mut rail = PowerRail {
            pin_number,
            pin: Some(pin),
        };
        if let Some(pin) = rail.pin.as_mut() {
            pin.set_high()
                .map_err(|e| SensorError::Bus(format!("gpio{}: {:?}", pin_number, e)))?;
        }
        debug!("[gpio] rail on gpio{} energized", pin_number);
        Ok(rail)
    }

    pub fn is_energized(&self) -> bool {
        self.pin.is_some()
    }

    /// Drive low and unexport. Calling again is a no-op.
    pub fn de_energize(&mut self) -> SensorResult<()> {
        let Some(mut pin) = self.pin.take() else {
            return Ok(());
        };
        pin.set_low()
            .map_err(|e| SensorError::Bus(format!("gpio{}: {:?}", self.pin_number, e)))?;
        pin.unexport().map_err(|e| gpio_error(self.pin_number, e))?;
        debug!("[gpio] rail on gpio{} de-energized", self.pin_number);
        Ok(())
    }
}

impl Drop for PowerRail {
    fn drop(&mut self) {
        let _ = self.de_energize();
    }
}

fn gpio_error(pin: u64, e: linux_embedded_hal::sysfs_gpio::Error) -> SensorError {
    SensorError::Bus(format!("gpio{}: {}", pin, e))
}
