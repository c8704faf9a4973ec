use std::time::Duration;

use linux_embedded_hal::spidev::{SpiModeFlags, SpidevOptions};
use linux_embedded_hal::SpidevDevice;
use log::info;

use crate::config::{PrimaryDriver, PrimarySlot};
use crate::error::{SensorError, SensorResult};
use crate::sample::OpcReading;
use crate::sensors::opcn3::OpcN3;
use crate::sensors::usb_iss::UsbIss;
use crate::sensors::Sensor;

const SPI_SPEED_HZ: u32 = 500_000;
const OPC_WARMUP: Duration = Duration::from_secs(2);

/// Particle counter behind whichever transport the slot names.
/// The variant is fixed when the slot is initialized.
pub enum PrimaryDevice {
    Spi(OpcN3<SpidevDevice>),
    UsbIss(OpcN3<UsbIss>),
}

impl PrimaryDevice {
    pub fn initialize(slot: &PrimarySlot) -> SensorResult<Self> {
        if !slot.path.exists() {
            return Err(SensorError::NotPresent(slot.path.display().to_string()));
        }

        let device = match slot.driver {
            PrimaryDriver::Spi => {
                let mut spi = SpidevDevice::open(&slot.path).map_err(|e| {
                    SensorError::Bus(format!("{}: {:?}", slot.path.display(), e))
                })?;
                let options = SpidevOptions::new()
                    .bits_per_word(8)
                    .max_speed_hz(SPI_SPEED_HZ)
                    .mode(SpiModeFlags::SPI_MODE_1)
                    .build();
                spi.configure(&options)?;
                PrimaryDevice::Spi(OpcN3::initialize(spi, OPC_WARMUP)?)
            }
            PrimaryDriver::UsbIss => {
                let iss = UsbIss::open(&slot.path)?;
                PrimaryDevice::UsbIss(OpcN3::initialize(iss, OPC_WARMUP)?)
            }
        };

        info!("[opc] {} initialized on {}", slot.label(), slot);
        Ok(device)
    }
}

impl Sensor for PrimaryDevice {
    type Reading = OpcReading;

    fn name(&self) -> &str {
        match self {
            PrimaryDevice::Spi(_) => PrimaryDriver::Spi.label(),
            PrimaryDevice::UsbIss(_) => PrimaryDriver::UsbIss.label(),
        }
    }

    fn read(&mut self) -> SensorResult<OpcReading> {
        match self {
            PrimaryDevice::Spi(opc) => opc.histogram(),
            PrimaryDevice::UsbIss(opc) => opc.histogram(),
        }
    }

    fn identify(&mut self) -> SensorResult<String> {
        match self {
            PrimaryDevice::Spi(opc) => opc.serial(),
            PrimaryDevice::UsbIss(opc) => opc.serial(),
        }
    }

    fn power_down(&mut self) -> SensorResult<()> {
        match self {
            PrimaryDevice::Spi(opc) => opc.power_off(),
            PrimaryDevice::UsbIss(opc) => opc.power_off(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_missing_device_is_not_present() {
        let slot = PrimarySlot {
            driver: PrimaryDriver::Spi,
            path: PathBuf::from("/nonexistent/spidev9.9"),
        };
        assert!(matches!(
            PrimaryDevice::initialize(&slot),
            Err(SensorError::NotPresent(_))
        ));
    }
}
