//! Controllable sensor for loop tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::error::{SensorError, SensorResult};
use crate::sample::{OpcReading, OPC_BINS};
use crate::sensors::Sensor;

pub fn opc_reading(pm2_5: f32) -> OpcReading {
    OpcReading {
        bins: [1; OPC_BINS],
        pm1: pm2_5 / 2.0,
        pm2_5,
        pm10: pm2_5 * 2.0,
        sampling_period: 1.0,
        flow_rate: 5.0,
        reject_glitch: 0,
        reject_long_tof: 0,
        reject_ratio: 0,
        reject_out_of_range: 0,
    }
}

/// Shared handle to flip a [`MockSensor`] between working and failing
#[derive(Clone, Default)]
pub struct MockControl {
    failing: Arc<AtomicBool>,
    reads: Arc<AtomicUsize>,
    power_downs: Arc<AtomicUsize>,
}

impl MockControl {
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn power_downs(&self) -> usize {
        self.power_downs.load(Ordering::SeqCst)
    }
}

pub struct MockSensor<R> {
    name: String,
    reading: R,
    control: MockControl,
}

impl<R: Clone + Send> MockSensor<R> {
    pub fn ok(name: &str, reading: R) -> Self {
        MockSensor {
            name: name.to_string(),
            reading,
            control: MockControl::default(),
        }
    }

    pub fn failing(name: &str, reading: R) -> Self {
        let sensor = MockSensor::ok(name, reading);
        sensor.control.set_failing(true);
        sensor
    }

    pub fn control(&self) -> MockControl {
        self.control.clone()
    }
}

impl<R: Clone + Send> Sensor for MockSensor<R> {
    type Reading = R;

    fn name(&self) -> &str {
        &self.name
    }

    fn read(&mut self) -> SensorResult<R> {
        self.control.reads.fetch_add(1, Ordering::SeqCst);
        if self.control.failing.load(Ordering::SeqCst) {
            return Err(SensorError::Bus(format!("{} scripted failure", self.name)));
        }
        Ok(self.reading.clone())
    }

    fn identify(&mut self) -> SensorResult<String> {
        if self.control.failing.load(Ordering::SeqCst) {
            return Err(SensorError::NotReady(self.name.clone()));
        }
        Ok(format!("MOCK-{}", self.name))
    }

    fn power_down(&mut self) -> SensorResult<()> {
        self.control.power_downs.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
