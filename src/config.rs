use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use clap::Parser;

use crate::error::ConfigError;

/// f64 carries about 15 significant decimal digits
pub const MAX_PRECISION: u32 = 15;

fn check_precision(key: &'static str, value: u32) -> Result<u32, ConfigError> {
    if value > MAX_PRECISION {
        return Err(ConfigError::Precision {
            key,
            value,
            max: MAX_PRECISION,
        });
    }
    Ok(value)
}

/// Command line / environment configuration.
///
/// Every option doubles as an environment variable so the service unit can
/// feed a plain `KEY=VALUE` environment file.
#[derive(Parser, Debug, Clone)]
#[command(name = "bib-sensor")]
#[command(about = "Air-quality sensor node: polls particle, climate and GPS sensors and logs daily CSV files", long_about = None)]
pub struct Args {
    /// Seconds between sensor polls
    #[arg(long, env = "POLL_INTERVAL", default_value_t = 10)]
    pub poll_interval: u64,

    /// Seconds between buffer flushes to disk
    #[arg(long, env = "LOG_INTERVAL", default_value_t = 60)]
    pub log_interval: u64,

    /// Output directory for daily CSV files and sysinfo.csv
    #[arg(long, env = "DATA_DIR", default_value = "/data/bib-sensor")]
    pub data_dir: PathBuf,

    /// Decimal places for particulate values
    #[arg(long, env = "PM_PRECISION", default_value_t = 3)]
    pub pm_precision: u32,

    /// Decimal places for temperature and humidity
    #[arg(long, env = "CLIMATE_PRECISION", default_value_t = 1)]
    pub climate_precision: u32,

    /// Placeholder written for unavailable values
    #[arg(long, env = "NODATA_VALUE", default_value_t = -999.0, allow_hyphen_values = true)]
    pub nodata_value: f64,

    /// Seconds without a successful read before a primary sensor counts as stalled
    #[arg(long, env = "SENSOR_TIMEOUT", default_value_t = 1500)]
    pub sensor_timeout: u64,

    /// GPIO (BCM) powering the DHT22
    #[arg(long, env = "DHT_POWER_PIN", default_value_t = 17)]
    pub dht_power_pin: u64,

    /// GPIO (BCM) carrying the DHT22 data line
    #[arg(long, env = "DHT_DATA_PIN", default_value_t = 4)]
    pub dht_data_pin: u64,

    /// Primary particle counters as driver:path (drivers: spi, usb-iss)
    #[arg(
        long,
        env = "PRIMARY_SENSORS",
        value_delimiter = ',',
        default_value = "spi:/dev/spidev0.0,usb-iss:/dev/ttyACM0"
    )]
    pub primary_sensors: Vec<String>,

    /// gpsd address
    #[arg(long, env = "GPSD_ADDR", default_value = "127.0.0.1:2947")]
    pub gpsd_addr: String,

    /// Timestamp file maintained by the auto-updater
    #[arg(long, env = "UPDATE_STAMP_FILE", default_value = "/var/lib/bib-sensor/last_update")]
    pub update_stamp_file: PathBuf,

    /// Use simulated sensors instead of hardware
    #[arg(long, env = "SIMULATE")]
    pub simulate: bool,
}

/// Transport used to reach an OPC-N3
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimaryDriver {
    /// Native SPI through spidev
    Spi,
    /// USB-ISS serial-to-SPI bridge
    UsbIss,
}

impl PrimaryDriver {
    pub fn tag(&self) -> &'static str {
        match self {
            PrimaryDriver::Spi => "spi",
            PrimaryDriver::UsbIss => "usb-iss",
        }
    }

    /// Column prefix used in the CSV schema
    pub fn label(&self) -> &'static str {
        match self {
            PrimaryDriver::Spi => "opc_spi",
            PrimaryDriver::UsbIss => "opc_usb",
        }
    }
}

/// One configured primary sensor slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrimarySlot {
    pub driver: PrimaryDriver,
    pub path: PathBuf,
}

impl PrimarySlot {
    pub fn label(&self) -> &'static str {
        self.driver.label()
    }
}

impl fmt::Display for PrimarySlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.driver.tag(), self.path.display())
    }
}

impl FromStr for PrimarySlot {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (tag, path) = s
            .trim()
            .split_once(':')
            .ok_or_else(|| ConfigError::InvalidSlot(s.to_string()))?;
        let driver = match tag.trim() {
            "spi" => PrimaryDriver::Spi,
            "usb-iss" | "usbiss" => PrimaryDriver::UsbIss,
            _ => return Err(ConfigError::InvalidSlot(s.to_string())),
        };
        let path = path.trim();
        if path.is_empty() {
            return Err(ConfigError::InvalidSlot(s.to_string()));
        }
        Ok(PrimarySlot {
            driver,
            path: PathBuf::from(path),
        })
    }
}

/// Validated, immutable runtime configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub poll_interval: Duration,
    pub log_interval: Duration,
    pub data_dir: PathBuf,
    pub pm_precision: u32,
    pub climate_precision: u32,
    pub nodata: f64,
    pub sensor_timeout: Duration,
    pub dht_power_pin: u64,
    pub dht_data_pin: u64,
    pub primary_sensors: Vec<PrimarySlot>,
    pub gpsd_addr: String,
    pub update_stamp_file: PathBuf,
    pub simulate: bool,
}

impl Config {
    pub fn from_args(args: Args) -> Result<Self, ConfigError> {
        if args.poll_interval == 0 {
            return Err(ConfigError::ZeroInterval("POLL_INTERVAL"));
        }
        if args.log_interval == 0 {
            return Err(ConfigError::ZeroInterval("LOG_INTERVAL"));
        }
        if args.sensor_timeout == 0 {
            return Err(ConfigError::ZeroInterval("SENSOR_TIMEOUT"));
        }
        if args.data_dir.as_os_str().is_empty() {
            return Err(ConfigError::EmptyDataDir);
        }

        let mut primary_sensors: Vec<PrimarySlot> = Vec::new();
        for raw in args.primary_sensors.iter().filter(|s| !s.trim().is_empty()) {
            let slot: PrimarySlot = raw.parse()?;
            // Labels name CSV columns, so one slot per driver.
            if primary_sensors.iter().any(|s| s.driver == slot.driver) {
                return Err(ConfigError::DuplicateSlot(raw.clone()));
            }
            primary_sensors.push(slot);
        }

        Ok(Config {
            poll_interval: Duration::from_secs(args.poll_interval),
            log_interval: Duration::from_secs(args.log_interval),
            data_dir: args.data_dir,
            pm_precision: check_precision("PM_PRECISION", args.pm_precision)?,
            climate_precision: check_precision("CLIMATE_PRECISION", args.climate_precision)?,
            nodata: args.nodata_value,
            sensor_timeout: Duration::from_secs(args.sensor_timeout),
            dht_power_pin: args.dht_power_pin,
            dht_data_pin: args.dht_data_pin,
            primary_sensors,
            gpsd_addr: args.gpsd_addr,
            update_stamp_file: args.update_stamp_file,
            simulate: args.simulate,
        })
    }

    pub fn sysinfo_path(&self) -> PathBuf {
        self.data_dir.join("sysinfo.csv")
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            poll_interval: Duration::from_secs(10),
            log_interval: Duration::from_secs(60),
            data_dir: PathBuf::from("/data/bib-sensor"),
            pm_precision: 3,
            climate_precision: 1,
            nodata: -999.0,
            sensor_timeout: Duration::from_secs(1500),
            dht_power_pin: 17,
            dht_data_pin: 4,
            primary_sensors: vec![
                PrimarySlot {
                    driver: PrimaryDriver::Spi,
                    path: PathBuf::from("/dev/spidev0.0"),
                },
                PrimarySlot {
                    driver: PrimaryDriver::UsbIss,
                    path: PathBuf::from("/dev/ttyACM0"),
                },
            ],
            gpsd_addr: "127.0.0.1:2947".to_string(),
            update_stamp_file: PathBuf::from("/var/lib/bib-sensor/last_update"),
            simulate: false,
        }
    }
}
