//! Synthetic sensors for running the node without hardware.

use std::f64::consts::PI;

use crate::config::Config;
use crate::error::SensorResult;
use crate::sample::{ClimateReading, OpcReading, Position, OPC_BINS};
use crate::sensors::{PrimaryHandle, Sensor, SensorSet};

pub struct SimulatedOpc {
    label: String,
    tick: u64,
}

impl SimulatedOpc {
    pub fn new(label: &str) -> Self {
        SimulatedOpc {
            label: label.to_string(),
            tick: 0,
        }
    }
}

impl Sensor for SimulatedOpc {
    type Reading = OpcReading;

    fn name(&self) -> &str {
        &self.label
    }

    fn read(&mut self) -> SensorResult<OpcReading> {
        self.tick += 1;
        let t = self.tick as f64;
        let pm2_5 = 8.0 + (t * 0.1).sin() * 3.0;

        let mut bins = [0u16; OPC_BINS];
        for (i, bin) in bins.iter_mut().enumerate() {
            // Counts fall off with particle size
            *bin = ((pm2_5 * 40.0) / (i as f64 + 1.0).powi(2)) as u16;
        }

        Ok(OpcReading {
            bins,
            pm1: (pm2_5 * 0.6) as f32,
            pm2_5: pm2_5 as f32,
            pm10: (pm2_5 * 1.8 + (t * 0.03).cos()) as f32,
            sampling_period: 10.0,
            flow_rate: 5.5,
            reject_glitch: (self.tick % 3) as u16,
            reject_long_tof: 0,
            reject_ratio: 0,
            reject_out_of_range: 0,
        })
    }

    fn identify(&mut self) -> SensorResult<String> {
        Ok(format!("SIM-{}", self.label))
    }

    fn power_down(&mut self) -> SensorResult<()> {
        Ok(())
    }
}

#[derive(Default)]
pub struct SimulatedClimate {
    tick: u64,
}

impl Sensor for SimulatedClimate {
    type Reading = ClimateReading;

    fn name(&self) -> &str {
        "dht22"
    }

    fn read(&mut self) -> SensorResult<ClimateReading> {
        self.tick += 1;
        let t = self.tick as f64;
        Ok(ClimateReading::new(
            18.0 + (t * 2.0 * PI / 360.0).sin() * 4.0,
            55.0 + (t * 2.0 * PI / 500.0).cos() * 10.0,
        ))
    }

    fn identify(&mut self) -> SensorResult<String> {
        Ok("SIM-DHT22".to_string())
    }

    fn power_down(&mut self) -> SensorResult<()> {
        Ok(())
    }
}

#[derive(Default)]
pub struct SimulatedGps {
    tick: u64,
}

impl Sensor for SimulatedGps {
    type Reading = Position;

    fn name(&self) -> &str {
        "gps"
    }

    fn read(&mut self) -> SensorResult<Position> {
        self.tick += 1;
        let seq = self.tick as f64;
        Ok(Position::new(
            52.0907 + (seq * 0.05).sin() * 0.00002,
            5.1214 + (seq * 0.05).cos() * 0.00002,
            4.0 + (seq * 0.1).sin(),
        ))
    }

    fn identify(&mut self) -> SensorResult<String> {
        Ok("SIM-GPS".to_string())
    }

    fn power_down(&mut self) -> SensorResult<()> {
        Ok(())
    }
}

/// Full simulated node matching the configured primary slots
pub fn sensor_set(config: &Config) -> SensorSet {
    SensorSet {
        primaries: config
            .primary_sensors
            .iter()
            .map(|slot| {
                PrimaryHandle::new(slot.label(), Some(Box::new(SimulatedOpc::new(slot.label()))))
            })
            .collect(),
        climate: Some(Box::new(SimulatedClimate::default())),
        location: Some(Box::new(SimulatedGps::default())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simulated_set_covers_slots() {
        let config = Config {
            simulate: true,
            ..Config::default()
        };
        let mut set = sensor_set(&config);
        assert_eq!(set.active_primaries(), 2);

        let reading = set.primaries[0].sensor.as_mut().unwrap().read().unwrap();
        assert!(reading.pm2_5 > 0.0);
        assert!(reading.pm10 >= reading.pm1);

        let position = set.location.as_mut().unwrap().read().unwrap();
        assert!(!position.is_unfixed());
    }

    #[test]
    fn test_simulated_climate_in_range() {
        let mut dht = SimulatedClimate::default();
        for _ in 0..1000 {
            let c = dht.read().unwrap();
            assert!((14.0..=22.0).contains(&c.temperature));
            assert!((45.0..=65.0).contains(&c.humidity));
        }
    }
}
