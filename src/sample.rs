//! Sample model and the fixed CSV schema.
//!
//! Readings stay `Option`al all the way through the pipeline; the nodata
//! placeholder only appears when a row is rendered.

use chrono::{DateTime, Utc};

use crate::config::Config;

/// Size bins reported by the OPC-N3 histogram
pub const OPC_BINS: usize = 24;

/// Particle counter histogram subset persisted per sample
#[derive(Debug, Clone, PartialEq)]
pub struct OpcReading {
    pub bins: [u16; OPC_BINS],
    /// PM1 [µg/m³]
    pub pm1: f32,
    /// PM2.5 [µg/m³]
    pub pm2_5: f32,
    /// PM10 [µg/m³]
    pub pm10: f32,
    /// Histogram sampling period [s]
    pub sampling_period: f32,
    /// Sample flow rate [ml/s]
    pub flow_rate: f32,
    pub reject_glitch: u16,
    pub reject_long_tof: u16,
    pub reject_ratio: u16,
    pub reject_out_of_range: u16,
}

/// Temperature [°C] and relative humidity [%]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClimateReading {
    pub temperature: f64,
    pub humidity: f64,
}

impl ClimateReading {
    pub fn new(temperature: f64, humidity: f64) -> Self {
        Self {
            temperature,
            humidity,
        }
    }
}

/// GPS position from gpsd
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Position {
    pub latitude: f64,
    pub longitude: f64,
    /// Absent on a 2D fix
    pub altitude: Option<f64>,
}

impl Position {
    pub fn new(latitude: f64, longitude: f64, altitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            altitude: Some(altitude),
        }
    }

    pub fn without_altitude(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            altitude: None,
        }
    }

    /// A receiver without a fix reports exactly (0, 0, 0).
    pub fn is_unfixed(&self) -> bool {
        self.latitude == 0.0 && self.longitude == 0.0 && self.altitude.map_or(true, |a| a == 0.0)
    }
}

/// One poll cycle's worth of data
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub timestamp: DateTime<Utc>,
    pub climate: Option<ClimateReading>,
    pub position: Option<Position>,
    /// One entry per configured primary slot, in slot order
    pub particles: Vec<Option<OpcReading>>,
}

impl Sample {
    /// Empty sample: every reading unavailable
    pub fn new(timestamp: DateTime<Utc>, primary_slots: usize) -> Self {
        Self {
            timestamp,
            climate: None,
            position: None,
            particles: vec![None; primary_slots],
        }
    }

    /// Render as one CSV record matching [`Schema::header`]
    pub fn to_record(&self, format: &RowFormat) -> Vec<String> {
        let mut record = Vec::with_capacity(6 + self.particles.len() * OPC_COLUMNS.len());
        record.push(self.timestamp.format(TIMESTAMP_FORMAT).to_string());

        match &self.climate {
            Some(c) => {
                record.push(format.rounded(c.temperature, format.climate_precision));
                record.push(format.rounded(c.humidity, format.climate_precision));
            }
            None => record.extend(format.nodata_cells(2)),
        }

        match &self.position {
            Some(p) => {
                record.push(p.latitude.to_string());
                record.push(p.longitude.to_string());
                record.push(match p.altitude {
                    Some(altitude) => altitude.to_string(),
                    None => format.nodata.to_string(),
                });
            }
            None => record.extend(format.nodata_cells(3)),
        }

        for reading in &self.particles {
            match reading {
                Some(r) => {
                    record.extend(r.bins.iter().map(|b| b.to_string()));
                    for value in [r.pm1, r.pm2_5, r.pm10, r.sampling_period, r.flow_rate] {
                        record.push(format.rounded(value as f64, format.pm_precision));
                    }
                    for count in [
                        r.reject_glitch,
                        r.reject_long_tof,
                        r.reject_ratio,
                        r.reject_out_of_range,
                    ] {
                        record.push(count.to_string());
                    }
                }
                None => record.extend(format.nodata_cells(OPC_BINS + OPC_COLUMNS.len())),
            }
        }

        record
    }
}

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

const BASE_COLUMNS: [&str; 6] = [
    "timestamp",
    "temperature",
    "humidity",
    "latitude",
    "longitude",
    "altitude",
];

const OPC_COLUMNS: [&str; 9] = [
    "pm1",
    "pm2_5",
    "pm10",
    "period",
    "flow_rate",
    "reject_glitch",
    "reject_long_tof",
    "reject_ratio",
    "reject_out_of_range",
];

/// Column layout for the active primary slots
#[derive(Debug, Clone)]
pub struct Schema {
    labels: Vec<String>,
}

impl Schema {
    pub fn new<I, S>(labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            labels: labels.into_iter().map(Into::into).collect(),
        }
    }

    pub fn slots(&self) -> usize {
        self.labels.len()
    }

    pub fn header(&self) -> Vec<String> {
        let mut header: Vec<String> = BASE_COLUMNS.iter().map(|c| c.to_string()).collect();
        for label in &self.labels {
            header.extend((0..OPC_BINS).map(|i| format!("{label}_bin{i:02}")));
            header.extend(OPC_COLUMNS.iter().map(|c| format!("{label}_{c}")));
        }
        header
    }
}

/// Rounding and placeholder rules applied when rendering rows
#[derive(Debug, Clone, Copy)]
pub struct RowFormat {
    pub nodata: f64,
    pub pm_precision: u32,
    pub climate_precision: u32,
}

impl RowFormat {
    pub fn from_config(config: &Config) -> Self {
        Self {
            nodata: config.nodata,
            pm_precision: config.pm_precision,
            climate_precision: config.climate_precision,
        }
    }

    fn rounded(&self, value: f64, precision: u32) -> String {
        if !value.is_finite() {
            return self.nodata.to_string();
        }
        round_to(value, precision).to_string()
    }

    fn nodata_cells(&self, n: usize) -> impl Iterator<Item = String> {
        std::iter::repeat(self.nodata.to_string()).take(n)
    }
}

pub fn round_to(value: f64, precision: u32) -> f64 {
    let factor = 10f64.powi(precision as i32);
    (value * factor).round() / factor
}
