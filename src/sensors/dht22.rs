//! DHT22 temperature/humidity sensor.
//!
//! Timing-critical bit banging is left to the kernel's IIO `dht11` driver
//! (`dtoverlay=dht11,gpiopin=<data pin>`); this side only switches the supply
//! rail and reads the milli-unit values it exposes in sysfs.

use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use log::{debug, info};

use crate::error::{SensorError, SensorResult};
use crate::sample::ClimateReading;
use crate::sensors::gpio::PowerRail;
use crate::sensors::Sensor;

const IIO_ROOT: &str = "/sys/bus/iio/devices";
/// The DHT22 needs ~2 s after power-up before its first conversion
const POWER_UP_DELAY: Duration = Duration::from_secs(2);

pub struct Dht22 {
    device: PathBuf,
    data_pin: u64,
    rail: Option<PowerRail>,
}

impl Dht22 {
    pub fn initialize(power_pin: u64, data_pin: u64) -> SensorResult<Self> {
        let rail = PowerRail::energize(power_pin)?;
        thread::sleep(POWER_UP_DELAY);

        let device = locate_device(Path::new(IIO_ROOT), data_pin).ok_or_else(|| {
            SensorError::NotPresent(format!("no dht11 IIO device for gpio{}", data_pin))
        })?;

        let mut dht = Dht22 {
            device,
            data_pin,
            rail: Some(rail),
        };
        // First conversion after power-up is stale
        if let Err(e) = dht.read() {
            debug!("[dht22] discarded warm-up reading: {}", e);
        }
        info!("[dht22] initialized at {}", dht.device.display());
        Ok(dht)
    }

    /// Sensor on an already-bound IIO device, without supply control
    pub fn with_device(device: PathBuf, data_pin: u64) -> Self {
        Dht22 {
            device,
            data_pin,
            rail: None,
        }
    }

    fn read_milli(&self, file: &str) -> SensorResult<f64> {
        let path = self.device.join(file);
        let text = fs::read_to_string(&path)?;
        let raw: i64 = text
            .trim()
            .parse()
            .map_err(|_| SensorError::Parse(format!("{}: '{}'", path.display(), text.trim())))?;
        Ok(raw as f64 / 1000.0)
    }
}

impl Sensor for Dht22 {
    type Reading = ClimateReading;

    fn name(&self) -> &str {
        "dht22"
    }

    fn read(&mut self) -> SensorResult<ClimateReading> {
        let temperature = self.read_milli("in_temp_input")?;
        let humidity = self.read_milli("in_humidityrelative_input")?;

        if !(-40.0..=80.0).contains(&temperature) || !(0.0..=100.0).contains(&humidity) {
            return Err(SensorError::Parse(format!(
                "implausible reading {temperature}°C / {humidity}%"
            )));
        }
        Ok(ClimateReading::new(temperature, humidity))
    }

    fn identify(&mut self) -> SensorResult<String> {
        Ok(format!("DHT22@gpio{}", self.data_pin))
    }

    fn power_down(&mut self) -> SensorResult<()> {
        match self.rail.as_mut() {
            Some(rail) => rail.de_energize(),
            None => Ok(()),
        }
    }
}

/// Find the IIO device the dht11 overlay bound to `data_pin`.
///
/// The platform device is named `dht11@<pin in hex>`; when the path does not
/// reveal the pin, a single dht11 device is taken as ours.
pub fn locate_device(iio_root: &Path, data_pin: u64) -> Option<PathBuf> {
    let entries = fs::read_dir(iio_root).ok()?;
    let node = format!("dht11@{:x}", data_pin);

    let mut candidates = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        let name = fs::read_to_string(path.join("name")).unwrap_or_default();
        if !name.trim().starts_with("dht11") {
            continue;
        }
        let resolved = fs::canonicalize(&path).unwrap_or_else(|_| path.clone());
        if resolved.components().any(|c| c.as_os_str() == node.as_str()) {
            return Some(path);
        }
        candidates.push(path);
    }

    if candidates.len() == 1 {
        candidates.pop()
    } else {
        None
    }
}
