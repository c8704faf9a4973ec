//! Producer loop: polls every sensor once per interval and appends a sample.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};

use crate::buffer::SharedBuffer;
use crate::cancel::{remaining_wait, CancellationToken};
use crate::config::Config;
use crate::error::SensorError;
use crate::sample::Sample;
use crate::sensors::SensorSet;

/// Why the acquisition loop returned
#[derive(Debug, Clone, PartialEq)]
pub enum StopReason {
    Cancelled,
    SensorStall { sensor: String, silence: Duration },
}

/// Handed back to the coordinator so it can power the hardware down
pub struct AcquisitionReport {
    pub sensors: SensorSet,
    pub stop: StopReason,
    pub samples: u64,
}

pub struct Acquisition {
    sensors: SensorSet,
    buffer: SharedBuffer,
    config: Arc<Config>,
    last_timestamp: Option<DateTime<Utc>>,
    samples: u64,
}

impl Acquisition {
    pub fn new(sensors: SensorSet, buffer: SharedBuffer, config: Arc<Config>) -> Self {
        Acquisition {
            sensors,
            buffer,
            config,
            last_timestamp: None,
            samples: 0,
        }
    }

    pub async fn run(mut self, token: CancellationToken) -> AcquisitionReport {
        info!(
            "[acq] polling {} primary sensor(s) every {:?}",
            self.sensors.active_primaries(),
            self.config.poll_interval
        );

        let stop = loop {
            if token.is_cancelled() {
                break StopReason::Cancelled;
            }

            let cycle_start = Instant::now();
            if let Some(stall) = self.cycle() {
                token.cancel();
                break stall;
            }

            let elapsed = cycle_start.elapsed();
            if elapsed >= self.config.poll_interval {
                warn!("[acq] cycle took {:?}, longer than the poll interval", elapsed);
            }
            if token.wait(remaining_wait(self.config.poll_interval, elapsed)).await {
                break StopReason::Cancelled;
            }
        };

        info!("[acq] stopped after {} samples ({:?})", self.samples, stop);
        AcquisitionReport {
            sensors: self.sensors,
            stop,
            samples: self.samples,
        }
    }

    /// One poll: read everything, append one sample. Returns the stall that
    /// tripped the watchdog, if any.
    pub fn cycle(&mut self) -> Option<StopReason> {
        let mut sample = Sample::new(self.next_timestamp(), self.sensors.primaries.len());

        // Ancillary sensors stay outside the lock so slow I/O here never
        // holds up a drain.
        if let Some(climate) = self.sensors.climate.as_mut() {
            match climate.read() {
                Ok(reading) => sample.climate = Some(reading),
                Err(e) => warn!("[acq] {} read failed: {}", climate.name(), e),
            }
        }

        if let Some(location) = self.sensors.location.as_mut() {
            match location.read() {
                Ok(position) if position.is_unfixed() => {
                    debug!("[acq] gps reports 0,0,0: no fix");
                }
                Ok(position) => sample.position = Some(position),
                Err(SensorError::NoFix) => debug!("[acq] gps has no fix"),
                Err(e) => warn!("[acq] {} read failed: {}", location.name(), e),
            }
        }

        // Primary reads and the append happen under one lock so a drain
        // never sees a half-filled sample and never races a device call.
        let mut state = self.buffer.lock();
        for (slot, handle) in self.sensors.primaries.iter_mut().enumerate() {
            let Some(sensor) = handle.sensor.as_mut() else {
                continue;
            };
            match sensor.read() {
                Ok(reading) => {
                    sample.particles[slot] = Some(reading);
                    state.watchdog.record_success(&handle.label, Instant::now());
                    if state.serial(&handle.label).is_none() {
                        if let Ok(serial) = sensor.identify() {
                            info!("[acq] {} identified as {}", handle.label, serial);
                            state.set_serial(&handle.label, Some(serial));
                        }
                    }
                }
                Err(e) => warn!("[acq] {} read failed: {}", handle.label, e),
            }
        }

        let now = Instant::now();
        let stall = state.watchdog.first_stalled(now).map(|health| {
            error!(
                "[acq] {} has not produced a reading for {:.0}s, stopping",
                health.name,
                health.silence(now).as_secs_f64()
            );
            StopReason::SensorStall {
                sensor: health.name.clone(),
                silence: health.silence(now),
            }
        });

        debug!("[acq] sample {}", sample.timestamp);
        state.append(sample);
        self.samples += 1;
        stall
    }

    /// Wall-clock time, never earlier than the previous sample's
    fn next_timestamp(&mut self) -> DateTime<Utc> {
        let now = Utc::now();
        let ts = match self.last_timestamp {
            Some(last) if last > now => last,
            _ => now,
        };
        self.last_timestamp = Some(ts);
        ts
    }
}
