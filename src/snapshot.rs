//! Host and sensor identity written to `sysinfo.csv` every logger cycle.

use std::fs;
use std::net::IpAddr;
use std::path::Path;

use chrono::{DateTime, Utc};
use sysinfo::Networks;

use crate::sample::TIMESTAMP_FORMAT;

const UNKNOWN: &str = "unknown";
const MODEL_PATH: &str = "/proc/device-tree/model";
const CPUINFO_PATH: &str = "/proc/cpuinfo";

#[derive(Debug, Clone, PartialEq)]
pub struct SystemSnapshot {
    pub hostname: String,
    pub model: String,
    pub serial: String,
    pub ip_addresses: Vec<String>,
    /// (slot label, serial) per configured primary sensor
    pub sensor_serials: Vec<(String, Option<String>)>,
    pub last_update: String,
    pub updated: DateTime<Utc>,
    pub rows_written: u64,
}

impl SystemSnapshot {
    /// Gather everything fresh. Each field falls back to "unknown" on its own.
    pub fn collect(
        sensor_serials: Vec<(String, Option<String>)>,
        update_stamp_file: &Path,
        rows_written: u64,
    ) -> Self {
        SystemSnapshot {
            hostname: hostname::get()
                .ok()
                .and_then(|h| h.into_string().ok())
                .unwrap_or_else(|| UNKNOWN.to_string()),
            model: fs::read_to_string(MODEL_PATH)
                .ok()
                .and_then(|raw| parse_model(&raw))
                .unwrap_or_else(|| UNKNOWN.to_string()),
            serial: fs::read_to_string(CPUINFO_PATH)
                .ok()
                .and_then(|raw| parse_cpu_serial(&raw))
                .unwrap_or_else(|| UNKNOWN.to_string()),
            ip_addresses: ip_addresses(),
            sensor_serials,
            last_update: read_marker(update_stamp_file),
            updated: Utc::now(),
            rows_written,
        }
    }

    /// `key,value` pairs in file order
    pub fn entries(&self) -> Vec<(String, String)> {
        let mut entries = vec![
            ("hostname".to_string(), self.hostname.clone()),
            ("model".to_string(), self.model.clone()),
            ("serial".to_string(), self.serial.clone()),
            ("ip".to_string(), self.ip_addresses.join(" ")),
        ];
        for (label, serial) in &self.sensor_serials {
            entries.push((
                format!("{}_serial", label),
                serial.clone().unwrap_or_else(|| UNKNOWN.to_string()),
            ));
        }
        entries.push(("last_update".to_string(), self.last_update.clone()));
        entries.push(("version".to_string(), env!("CARGO_PKG_VERSION").to_string()));
        entries.push((
            "updated".to_string(),
            self.updated.format(TIMESTAMP_FORMAT).to_string(),
        ));
        entries.push(("rows_written".to_string(), self.rows_written.to_string()));
        entries
    }
}

/// Device-tree strings are NUL terminated
fn parse_model(raw: &str) -> Option<String> {
    let model = raw.trim_end_matches('\0').trim();
    (!model.is_empty()).then(|| model.to_string())
}

/// `Serial : 10000000abcdef01` line of /proc/cpuinfo (Raspberry Pi)
fn parse_cpu_serial(cpuinfo: &str) -> Option<String> {
    cpuinfo.lines().find_map(|line| {
        let (key, value) = line.split_once(':')?;
        if key.trim() == "Serial" {
            let value = value.trim();
            (!value.is_empty()).then(|| value.to_string())
        } else {
            None
        }
    })
}

/// Addresses worth reporting: no loopback, no IPv6 link-local
fn reportable_addresses(addrs: impl IntoIterator<Item = IpAddr>) -> Vec<String> {
    let mut reported: Vec<String> = Vec::new();
    for addr in addrs {
        let skip = match addr {
            IpAddr::V4(v4) => v4.is_loopback() || v4.is_unspecified(),
            IpAddr::V6(v6) => {
                v6.is_loopback() || v6.is_unspecified() || (v6.segments()[0] & 0xffc0) == 0xfe80
            }
        };
        let text = addr.to_string();
        if !skip && !reported.contains(&text) {
            reported.push(text);
        }
    }
    reported
}

/// Interface addresses, ordered by interface name
fn ip_addresses() -> Vec<String> {
    let networks = Networks::new_with_refreshed_list();
    let mut interfaces: Vec<_> = networks.list().iter().collect();
    interfaces.sort_by(|a, b| a.0.cmp(b.0));
    reportable_addresses(
        interfaces
            .into_iter()
            .flat_map(|(_, data)| data.ip_networks().iter().map(|net| net.addr)),
    )
}

fn read_marker(path: &Path) -> String {
    match fs::read_to_string(path) {
        Ok(raw) if !raw.trim().is_empty() => raw.trim().to_string(),
        _ => UNKNOWN.to_string(),
    }
}
