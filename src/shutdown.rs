//! Startup policy, the two long-lived tasks and coordinated teardown.

use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use log::{error, info, warn};
use tokio::task::JoinHandle;

use crate::acquisition::{Acquisition, StopReason};
use crate::buffer::SharedBuffer;
use crate::cancel::CancellationToken;
use crate::config::Config;
use crate::logger::Logger;
use crate::sensors::SensorSet;
use crate::watchdog::Watchdog;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    /// Stopped by a termination signal with nothing fatal pending
    Clean,
    /// No primary sensor, a stalled sensor or a failed task
    Fatal,
}

impl ExitStatus {
    pub fn code(self) -> i32 {
        match self {
            ExitStatus::Clean => 0,
            ExitStatus::Fatal => 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub status: ExitStatus,
    /// `None` when acquisition never started or its task died
    pub stop: Option<StopReason>,
    pub samples: u64,
    pub rows_written: u64,
}

impl RunSummary {
    fn fatal_at_startup() -> Self {
        RunSummary {
            status: ExitStatus::Fatal,
            stop: None,
            samples: 0,
            rows_written: 0,
        }
    }
}

/// Bring up the hardware, run until a signal or a fatal condition, tear down.
pub async fn run(config: Config) -> Result<RunSummary> {
    let config = Arc::new(config);

    let init_config = Arc::clone(&config);
    let sensors = tokio::task::spawn_blocking(move || SensorSet::initialize(&init_config))
        .await
        .context("sensor initialization task failed")?;

    let token = CancellationToken::new();
    spawn_signal_listener(token.clone());

    Ok(run_with(config, sensors, token).await)
}

/// Everything after hardware bring-up. The token may already be shared with
/// a signal listener; this only ever sets it.
pub async fn run_with(
    config: Arc<Config>,
    mut sensors: SensorSet,
    token: CancellationToken,
) -> RunSummary {
    if sensors.active_primaries() == 0 {
        error!(
            "No primary sensor initialized ({} configured), exiting",
            sensors.primaries.len()
        );
        sensors.power_down_ancillary();
        return RunSummary::fatal_at_startup();
    }

    let active: Vec<String> = sensors
        .primaries
        .iter()
        .filter(|p| p.is_active())
        .map(|p| p.label.clone())
        .collect();
    let buffer = SharedBuffer::new(Watchdog::new(
        active.iter().map(String::as_str),
        config.sensor_timeout,
        Instant::now(),
    ));
    identify_primaries(&mut sensors, &buffer);

    let schema = sensors.schema();
    let acquisition = Acquisition::new(sensors, buffer.clone(), Arc::clone(&config));
    let logger = Logger::new(buffer, Arc::clone(&config), schema);

    let acq_handle = tokio::spawn(acquisition.run(token.clone()));
    let log_handle = tokio::spawn(logger.run(token.clone()));

    let (acq_report, log_report) = tokio::join!(
        supervise("acquisition", acq_handle, &token),
        supervise("logger", log_handle, &token),
    );

    // Both tasks are done; hardware is ours again.
    let (stop, samples) = match acq_report {
        Some(mut report) => {
            report.sensors.power_down_all();
            (Some(report.stop), report.samples)
        }
        None => (None, 0),
    };
    let rows_written = log_report.map_or(0, |r| r.rows_written);

    let status = match (&stop, log_report.is_some()) {
        (Some(StopReason::Cancelled), true) => ExitStatus::Clean,
        _ => ExitStatus::Fatal,
    };

    let summary = RunSummary {
        status,
        stop,
        samples,
        rows_written,
    };
    info!(
        "Shutdown complete: {:?}, stop={:?}, {} samples acquired, {} rows written",
        summary.status, summary.stop, summary.samples, summary.rows_written
    );
    summary
}

/// Serials are only needed for the snapshot, so a failure here is a warning.
fn identify_primaries(sensors: &mut SensorSet, buffer: &SharedBuffer) {
    let mut state = buffer.lock();
    for handle in sensors.primaries.iter_mut() {
        let Some(sensor) = handle.sensor.as_mut() else {
            continue;
        };
        let serial = match sensor.identify() {
            Ok(serial) => {
                info!("[{}] serial {}", handle.label, serial);
                Some(serial)
            }
            Err(e) => {
                warn!("[{}] identify failed: {}", handle.label, e);
                None
            }
        };
        state.set_serial(&handle.label, serial);
    }
}

/// Await a loop task; whichever way it ends, the other loop is told to stop.
async fn supervise<T>(name: &str, handle: JoinHandle<T>, token: &CancellationToken) -> Option<T> {
    let result = handle.await;
    token.cancel();
    match result {
        Ok(report) => Some(report),
        Err(e) => {
            error!("[{}] task failed: {}", name, e);
            None
        }
    }
}

/// The listener only sets the token.
fn spawn_signal_listener(token: CancellationToken) {
    tokio::spawn(async move {
        tokio::select! {
            signal = termination_signal() => match signal {
                Ok(name) => {
                    info!("Received {}, shutting down", name);
                    token.cancel();
                }
                Err(e) => warn!("Cannot listen for termination signals: {}", e),
            },
            _ = token.cancelled() => {}
        }
    });
}

#[cfg(unix)]
async fn termination_signal() -> std::io::Result<&'static str> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut term = signal(SignalKind::terminate())?;
    tokio::select! {
        _ = term.recv() => Ok("SIGTERM"),
        result = tokio::signal::ctrl_c() => result.map(|_| "SIGINT"),
    }
}

#[cfg(not(unix))]
async fn termination_signal() -> std::io::Result<&'static str> {
    tokio::signal::ctrl_c().await?;
    Ok("Ctrl-C")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample::{ClimateReading, Position};
    use crate::sensors::mock::{opc_reading, MockSensor};
    use crate::sensors::PrimaryHandle;
    use std::fs;
    use std::path::Path;
    use std::time::Duration;
    use tempfile::tempdir;

    fn config(dir: &Path, timeout_ms: u64) -> Arc<Config> {
        Arc::new(Config {
            poll_interval: Duration::from_millis(10),
            log_interval: Duration::from_millis(20),
            sensor_timeout: Duration::from_millis(timeout_ms),
            data_dir: dir.to_path_buf(),
            update_stamp_file: dir.join("last_update"),
            ..Config::default()
        })
    }

    fn daily_rows(dir: &Path) -> Vec<Vec<String>> {
        let mut rows = Vec::new();
        for entry in fs::read_dir(dir).unwrap() {
            let path = entry.unwrap().path();
            let name = path.file_name().unwrap().to_string_lossy().to_string();
            if name.ends_with(".csv") && name != "sysinfo.csv" {
                let mut reader = csv::Reader::from_path(&path).unwrap();
                for record in reader.records() {
                    rows.push(record.unwrap().iter().map(str::to_string).collect());
                }
            }
        }
        rows
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(ExitStatus::Clean.code(), 0);
        assert_eq!(ExitStatus::Fatal.code(), 1);
    }

    #[tokio::test]
    async fn test_clean_shutdown_powers_down() {
        let dir = tempdir().unwrap();
        let opc = MockSensor::ok("opc_spi", opc_reading(3.0));
        let dht = MockSensor::ok("dht22", ClimateReading::new(21.0, 48.0));
        let (opc_ctl, dht_ctl) = (opc.control(), dht.control());
        let sensors = SensorSet {
            primaries: vec![PrimaryHandle::new("opc_spi", Some(Box::new(opc)))],
            climate: Some(Box::new(dht)),
            location: Some(Box::new(MockSensor::ok("gps", Position::new(52.0, 5.1, 3.0)))),
        };

        let token = CancellationToken::new();
        let run = tokio::spawn(run_with(config(dir.path(), 60_000), sensors, token.clone()));
        tokio::time::sleep(Duration::from_millis(80)).await;
        token.cancel();
        let summary = run.await.unwrap();

        assert_eq!(summary.status, ExitStatus::Clean);
        assert_eq!(summary.stop, Some(StopReason::Cancelled));
        assert!(summary.samples > 0);
        assert_eq!(opc_ctl.power_downs(), 1);
        assert_eq!(dht_ctl.power_downs(), 1);

        let sysinfo = fs::read_to_string(dir.path().join("sysinfo.csv")).unwrap();
        assert!(sysinfo.contains("opc_spi_serial,MOCK-opc_spi\n"));
    }

    #[tokio::test]
    async fn test_stall_exits_fatal() {
        let dir = tempdir().unwrap();
        let opc = MockSensor::failing("opc_spi", opc_reading(3.0));
        let opc_ctl = opc.control();
        let sensors = SensorSet {
            primaries: vec![PrimaryHandle::new("opc_spi", Some(Box::new(opc)))],
            climate: None,
            location: None,
        };

        let token = CancellationToken::new();
        let summary = run_with(config(dir.path(), 50), sensors, token.clone()).await;

        assert_eq!(summary.status.code(), 1);
        assert!(matches!(summary.stop, Some(StopReason::SensorStall { .. })));
        assert!(token.is_cancelled());
        assert_eq!(opc_ctl.power_downs(), 1);
        // Identify failed at startup, so the snapshot reports unknown
        let sysinfo = fs::read_to_string(dir.path().join("sysinfo.csv")).unwrap();
        assert!(sysinfo.contains("opc_spi_serial,unknown\n"));
        // Everything written carries no particle data
        for row in daily_rows(dir.path()) {
            assert_eq!(row[6], "-999");
        }
    }

    #[tokio::test]
    async fn test_no_primary_is_fatal() {
        let dir = tempdir().unwrap();
        let dht = MockSensor::ok("dht22", ClimateReading::new(21.0, 48.0));
        let dht_ctl = dht.control();
        let sensors = SensorSet {
            primaries: vec![
                PrimaryHandle::new("opc_spi", None),
                PrimaryHandle::new("opc_usb", None),
            ],
            climate: Some(Box::new(dht)),
            location: None,
        };

        let summary = run_with(config(dir.path(), 60_000), sensors, CancellationToken::new()).await;
        assert_eq!(summary.status, ExitStatus::Fatal);
        assert_eq!(summary.stop, None);
        assert_eq!(dht_ctl.power_downs(), 1);
        assert!(daily_rows(dir.path()).is_empty());
    }

    #[tokio::test]
    async fn test_absent_climate_sensor_columns_are_nodata() {
        let dir = tempdir().unwrap();
        let sensors = SensorSet {
            primaries: vec![PrimaryHandle::new(
                "opc_spi",
                Some(Box::new(MockSensor::ok("opc_spi", opc_reading(3.0)))),
            )],
            climate: None,
            location: Some(Box::new(MockSensor::ok("gps", Position::new(52.0, 5.1, 3.0)))),
        };

        let token = CancellationToken::new();
        let run = tokio::spawn(run_with(config(dir.path(), 60_000), sensors, token.clone()));
        tokio::time::sleep(Duration::from_millis(70)).await;
        token.cancel();
        let summary = run.await.unwrap();
        assert_eq!(summary.status.code(), 0);

        let rows = daily_rows(dir.path());
        assert!(!rows.is_empty());
        for row in rows {
            assert_eq!(row[1], "-999");
            assert_eq!(row[2], "-999");
            assert_eq!(row[3], "52");
        }
    }
}
