//! Consumer loop: drains the buffer to the daily CSV and refreshes sysinfo.csv.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use log::{debug, info, warn};

use crate::buffer::SharedBuffer;
use crate::cancel::{remaining_wait, CancellationToken};
use crate::config::Config;
use crate::sample::{RowFormat, Schema};
use crate::storage;
use crate::snapshot::SystemSnapshot;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoggerReport {
    pub cycles: u64,
    pub rows_written: u64,
    pub write_failures: u64,
}

pub struct Logger {
    buffer: SharedBuffer,
    config: Arc<Config>,
    schema: Schema,
    format: RowFormat,
    report: LoggerReport,
}

impl Logger {
    pub fn new(buffer: SharedBuffer, config: Arc<Config>, schema: Schema) -> Self {
        let format = RowFormat::from_config(&config);
        Logger {
            buffer,
            config,
            schema,
            format,
            report: LoggerReport::default(),
        }
    }

    pub async fn run(mut self, token: CancellationToken) -> LoggerReport {
        info!(
            "[log] writing to {} every {:?}",
            self.config.data_dir.display(),
            self.config.log_interval
        );

        loop {
            if token.is_cancelled() {
                break;
            }

            let cycle_start = Instant::now();
            self.cycle();

            let elapsed = cycle_start.elapsed();
            if elapsed >= self.config.log_interval {
                warn!("[log] cycle took {:?}, longer than the log interval", elapsed);
            }
            if token.wait(remaining_wait(self.config.log_interval, elapsed)).await {
                break;
            }
        }

        info!(
            "[log] stopped after {} cycles, {} rows written",
            self.report.cycles, self.report.rows_written
        );
        self.report
    }

    /// One drain: samples go to today's file, the snapshot is always rewritten.
    pub fn cycle(&mut self) {
        self.report.cycles += 1;

        let (samples, serials) = {
            let mut state = self.buffer.lock();
            debug!("[log] {}", state.watchdog.format_status(Instant::now()));
            (state.drain_all(), state.serials())
        };

        if !samples.is_empty() {
            let path = storage::daily_path(&self.config.data_dir, Utc::now().date_naive());
            match storage::append_samples(&path, &self.schema, &self.format, &samples) {
                Ok(rows) => {
                    self.report.rows_written += rows as u64;
                    debug!("[log] appended {} rows to {}", rows, path.display());
                }
                Err(e) => {
                    self.report.write_failures += 1;
                    warn!(
                        "[log] write to {} failed, keeping {} samples for the next cycle: {}",
                        path.display(),
                        samples.len(),
                        e
                    );
                    self.buffer.lock().requeue_front(samples);
                }
            }
        }

        let snapshot = SystemSnapshot::collect(
            serials,
            &self.config.update_stamp_file,
            self.report.rows_written,
        );
        if let Err(e) = storage::write_key_values(&self.config.sysinfo_path(), &snapshot.entries()) {
            warn!("[log] sysinfo update failed: {}", e);
        }
    }

    pub fn report(&self) -> LoggerReport {
        self.report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample::Sample;
    use crate::watchdog::Watchdog;
    use std::fs;
    use std::path::Path;
    use std::time::Duration;
    use tempfile::tempdir;

    fn config(dir: &Path, log_ms: u64) -> Arc<Config> {
        Arc::new(Config {
            data_dir: dir.to_path_buf(),
            log_interval: Duration::from_millis(log_ms),
            update_stamp_file: dir.join("last_update"),
            ..Config::default()
        })
    }

    fn logger(dir: &Path, log_ms: u64) -> (Logger, SharedBuffer) {
        let buffer = SharedBuffer::new(Watchdog::new(
            ["opc_spi"],
            Duration::from_secs(60),
            Instant::now(),
        ));
        let logger = Logger::new(buffer.clone(), config(dir, log_ms), Schema::new(["opc_spi"]));
        (logger, buffer)
    }

    fn push(buffer: &SharedBuffer, n: usize) {
        for _ in 0..n {
            buffer.append(Sample::new(Utc::now(), 1));
        }
    }

    /// Every line of every daily file in the directory
    fn daily_lines(dir: &Path) -> Vec<String> {
        let mut lines = Vec::new();
        for entry in fs::read_dir(dir).unwrap() {
            let path = entry.unwrap().path();
            let name = path.file_name().unwrap().to_string_lossy().to_string();
            if name.ends_with(".csv") && name != "sysinfo.csv" {
                let text = fs::read_to_string(&path).unwrap();
                lines.extend(text.lines().map(str::to_string));
            }
        }
        lines
    }

    #[test]
    fn test_cycle_drains_into_daily_file() {
        let dir = tempdir().unwrap();
        let (mut logger, buffer) = logger(dir.path(), 1000);

        push(&buffer, 3);
        logger.cycle();
        assert!(buffer.lock().is_empty());
        push(&buffer, 2);
        logger.cycle();

        let lines = daily_lines(dir.path());
        assert_eq!(lines.len(), 1 + 5);
        assert!(lines[0].starts_with("timestamp,"));
        assert_eq!(logger.report().rows_written, 5);
    }

    #[test]
    fn test_snapshot_written_without_samples() {
        let dir = tempdir().unwrap();
        let (mut logger, buffer) = logger(dir.path(), 1000);
        buffer.lock().set_serial("opc_spi", Some("177230001".to_string()));
        fs::write(dir.path().join("last_update"), "2024-04-30T03:00:12Z").unwrap();

        logger.cycle();

        let sysinfo = fs::read_to_string(dir.path().join("sysinfo.csv")).unwrap();
        assert!(sysinfo.contains("opc_spi_serial,177230001\n"));
        assert!(sysinfo.contains("last_update,2024-04-30T03:00:12Z\n"));
        assert!(sysinfo.contains("rows_written,0\n"));
        // No samples, so no daily file
        assert!(daily_lines(dir.path()).is_empty());
    }

    #[test]
    fn test_write_failure_keeps_samples() {
        let dir = tempdir().unwrap();
        let blocked = dir.path().join("not-a-dir");
        fs::write(&blocked, "x").unwrap();
        let (mut logger, buffer) = logger(&blocked, 1000);

        push(&buffer, 2);
        logger.cycle();
        push(&buffer, 1);

        let state = buffer.lock();
        assert_eq!(state.len(), 3);
        drop(state);
        assert_eq!(logger.report().write_failures, 1);
        assert_eq!(logger.report().rows_written, 0);
    }

    #[test]
    fn test_retained_samples_written_first() {
        let dir = tempdir().unwrap();
        let data_dir = dir.path().join("data");
        fs::write(&data_dir, "x").unwrap();
        let (mut logger, buffer) = logger(&data_dir, 1000);

        let early = Sample::new(Utc::now(), 1);
        buffer.append(early.clone());
        logger.cycle();

        // Storage comes back
        fs::remove_file(&data_dir).unwrap();
        push(&buffer, 1);
        logger.cycle();

        let lines = daily_lines(&data_dir);
        assert_eq!(lines.len(), 3);
        let format = RowFormat::from_config(&Config::default());
        assert_eq!(lines[1], early.to_record(&format).join(","));
    }

    #[tokio::test]
    async fn test_run_until_cancelled() {
        let dir = tempdir().unwrap();
        let (logger, buffer) = logger(dir.path(), 20);
        push(&buffer, 4);

        let token = CancellationToken::new();
        let handle = tokio::spawn(logger.run(token.clone()));
        tokio::time::sleep(Duration::from_millis(70)).await;
        token.cancel();
        let report = handle.await.unwrap();

        assert!(report.cycles >= 2);
        assert_eq!(report.rows_written, 4);
        assert!(dir.path().join("sysinfo.csv").exists());
    }
}
