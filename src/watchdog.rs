use std::time::{Duration, Instant};

/// Tracks the last successful read of one primary sensor
#[derive(Clone, Debug)]
pub struct SensorHealth {
    pub name: String,
    last_success: Instant,
    stall_threshold: Duration,
}

impl SensorHealth {
    pub fn new(name: &str, stall_threshold: Duration, now: Instant) -> Self {
        SensorHealth {
            name: name.to_string(),
            last_success: now,
            stall_threshold,
        }
    }

    pub fn record_success(&mut self, now: Instant) {
        self.last_success = now;
    }

    pub fn silence(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_success)
    }

    pub fn is_stalled(&self, now: Instant) -> bool {
        self.silence(now) > self.stall_threshold
    }
}

/// Stall detector over every primary sensor.
///
/// Owned by the shared buffer so that success timestamps are updated under
/// the same lock as the reads they describe.
#[derive(Clone, Debug, Default)]
pub struct Watchdog {
    sensors: Vec<SensorHealth>,
}

impl Watchdog {
    pub fn new<'a>(
        names: impl IntoIterator<Item = &'a str>,
        stall_threshold: Duration,
        now: Instant,
    ) -> Self {
        Watchdog {
            sensors: names
                .into_iter()
                .map(|name| SensorHealth::new(name, stall_threshold, now))
                .collect(),
        }
    }

    pub fn record_success(&mut self, name: &str, now: Instant) {
        if let Some(sensor) = self.sensors.iter_mut().find(|s| s.name == name) {
            sensor.record_success(now);
        }
    }

    /// First sensor (in slot order) whose silence exceeds the threshold
    pub fn first_stalled(&self, now: Instant) -> Option<&SensorHealth> {
        self.sensors.iter().find(|s| s.is_stalled(now))
    }

    pub fn get(&self, name: &str) -> Option<&SensorHealth> {
        self.sensors.iter().find(|s| s.name == name)
    }

    /// Format health status for logging
    pub fn format_status(&self, now: Instant) -> String {
        let parts: Vec<String> = self
            .sensors
            .iter()
            .map(|s| {
                if s.is_stalled(now) {
                    format!("{} STALLED ({:.0}s)", s.name, s.silence(now).as_secs_f64())
                } else {
                    format!("{} ok ({:.0}s)", s.name, s.silence(now).as_secs_f64())
                }
            })
            .collect();
        format!("Health: {}", parts.join(" | "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sensor_stall_detection() {
        let start = Instant::now();
        let mut health = SensorHealth::new("opc_spi", Duration::from_secs(10), start);

        assert!(!health.is_stalled(start));
        // Exactly at the threshold is not yet a stall
        assert!(!health.is_stalled(start + Duration::from_secs(10)));
        assert!(health.is_stalled(start + Duration::from_secs(11)));

        health.record_success(start + Duration::from_secs(11));
        assert!(!health.is_stalled(start + Duration::from_secs(12)));
    }

    #[test]
    fn test_silence_never_negative() {
        let start = Instant::now();
        let health = SensorHealth::new("opc_spi", Duration::from_secs(1), start + Duration::from_secs(5));
        assert_eq!(health.silence(start), Duration::ZERO);
    }

    #[test]
    fn test_watchdog_reports_first_stalled() {
        let start = Instant::now();
        let mut watchdog = Watchdog::new(["opc_spi", "opc_usb"], Duration::from_secs(5), start);

        watchdog.record_success("opc_spi", start + Duration::from_secs(4));
        let later = start + Duration::from_secs(6);
        let stalled = watchdog.first_stalled(later).unwrap();
        assert_eq!(stalled.name, "opc_usb");

        let status = watchdog.format_status(later);
        assert!(status.contains("opc_spi ok"));
        assert!(status.contains("opc_usb STALLED"));
    }

    #[test]
    fn test_unknown_sensor_ignored() {
        let start = Instant::now();
        let mut watchdog = Watchdog::new(["opc_spi"], Duration::from_secs(5), start);
        watchdog.record_success("gps", start + Duration::from_secs(3));
        assert!(watchdog.get("gps").is_none());
        assert!(watchdog.first_stalled(start + Duration::from_secs(4)).is_none());
    }
}
