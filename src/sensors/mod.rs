//! Sensor capability trait and the set of sensors owned by the acquisition loop.

pub mod dht22;
pub mod gpio;
pub mod gps;
#[cfg(test)]
pub mod mock;
pub mod opcn3;
pub mod primary;
pub mod simulated;
pub mod usb_iss;

use log::{info, warn};

use crate::config::{Config, PrimarySlot};
use crate::error::SensorResult;
use crate::sample::{ClimateReading, OpcReading, Position, Schema};

/// Uniform contract over heterogeneous drivers.
///
/// Construction is the `initialize` step: each driver exposes its own
/// fallible constructor that powers the device and discards warm-up readings
/// (`PrimaryDevice::initialize`, `Dht22::initialize`, `Gpsd::connect`).
/// Those constructors take different arguments (a slot, GPIO pins, an
/// address) and the loops hold sensors as `Box<dyn Sensor>`, so `initialize`
/// is not a trait method; [`SensorSet::initialize`] is the single entry point.
pub trait Sensor: Send {
    type Reading;

    fn name(&self) -> &str;

    /// One reading; failures are reported, never retried here
    fn read(&mut self) -> SensorResult<Self::Reading>;

    /// Manufacturer serial
    fn identify(&mut self) -> SensorResult<String>;

    /// Release / de-energize the device. Must be idempotent.
    fn power_down(&mut self) -> SensorResult<()>;
}

pub type ParticleSensor = Box<dyn Sensor<Reading = OpcReading>>;
pub type ClimateSensor = Box<dyn Sensor<Reading = ClimateReading>>;
pub type LocationSensor = Box<dyn Sensor<Reading = Position>>;

/// A configured primary slot and its device, if it came up
pub struct PrimaryHandle {
    pub label: String,
    pub sensor: Option<ParticleSensor>,
}

impl PrimaryHandle {
    pub fn new(label: &str, sensor: Option<ParticleSensor>) -> Self {
        PrimaryHandle {
            label: label.to_string(),
            sensor,
        }
    }

    pub fn is_active(&self) -> bool {
        self.sensor.is_some()
    }
}

/// Every sensor the node owns
pub struct SensorSet {
    pub primaries: Vec<PrimaryHandle>,
    pub climate: Option<ClimateSensor>,
    pub location: Option<LocationSensor>,
}

impl SensorSet {
    /// Bring up every configured sensor. Individual failures only disable
    /// that sensor for the run.
    pub fn initialize(config: &Config) -> Self {
        if config.simulate {
            info!("Using simulated sensors");
            return simulated::sensor_set(config);
        }

        let primaries = config
            .primary_sensors
            .iter()
            .map(|slot| PrimaryHandle::new(slot.label(), init_primary(slot)))
            .collect();

        let climate = match dht22::Dht22::initialize(config.dht_power_pin, config.dht_data_pin) {
            Ok(dht) => Some(Box::new(dht) as ClimateSensor),
            Err(e) => {
                warn!("[dht22] not available, continuing without it: {}", e);
                None
            }
        };

        let location = match gps::Gpsd::connect(&config.gpsd_addr) {
            Ok(gpsd) => Some(Box::new(gpsd) as LocationSensor),
            Err(e) => {
                warn!("[gps] gpsd not available, continuing without it: {}", e);
                None
            }
        };

        SensorSet {
            primaries,
            climate,
            location,
        }
    }

    pub fn active_primaries(&self) -> usize {
        self.primaries.iter().filter(|p| p.is_active()).count()
    }

    /// Columns follow the configured slots, present or not, so a restart
    /// with a missing counter keeps the daily file layout.
    pub fn schema(&self) -> Schema {
        Schema::new(self.primaries.iter().map(|p| p.label.clone()))
    }

    /// Power down the ancillary sensors only
    pub fn power_down_ancillary(&mut self) {
        if let Some(climate) = self.climate.as_mut() {
            power_down(&mut **climate);
        }
        if let Some(location) = self.location.as_mut() {
            power_down(&mut **location);
        }
    }

    pub fn power_down_all(&mut self) {
        for handle in self.primaries.iter_mut() {
            if let Some(sensor) = handle.sensor.as_mut() {
                power_down(&mut **sensor);
            }
        }
        self.power_down_ancillary();
    }
}

fn init_primary(slot: &PrimarySlot) -> Option<ParticleSensor> {
    match primary::PrimaryDevice::initialize(slot) {
        Ok(device) => Some(Box::new(device)),
        Err(e) => {
            warn!("[opc] {} ({}) failed to initialize: {}", slot.label(), slot, e);
            None
        }
    }
}

fn power_down<R>(sensor: &mut dyn Sensor<Reading = R>) {
    match sensor.power_down() {
        Ok(()) => info!("[{}] powered down", sensor.name()),
        Err(e) => warn!("[{}] power down failed: {}", sensor.name(), e),
    }
}
