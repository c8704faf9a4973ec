//! Minimal gpsd client (JSON protocol over TCP).

use std::io::{BufRead, BufReader, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};

use log::{debug, info};
use serde::Deserialize;

use crate::error::{SensorError, SensorResult};
use crate::sample::Position;
use crate::sensors::Sensor;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);
const READ_TIMEOUT: Duration = Duration::from_secs(2);
/// How long to skip other reports while waiting for the POLL answer
const POLL_DEADLINE: Duration = Duration::from_secs(4);

/// Watching without `json` keeps gpsd in polling mode: nothing is streamed
/// between POLL requests.
const WATCH: &[u8] = b"?WATCH={\"enable\":true};\n";
const POLL: &[u8] = b"?POLL;\n";

#[derive(Debug, Deserialize)]
struct Report {
    class: String,
    #[serde(default)]
    release: Option<String>,
    #[serde(default)]
    tpv: Vec<Tpv>,
}

#[derive(Debug, Deserialize)]
struct Tpv {
    #[serde(default)]
    mode: u8,
    lat: Option<f64>,
    lon: Option<f64>,
    alt: Option<f64>,
    #[serde(rename = "altMSL")]
    alt_msl: Option<f64>,
}

pub struct Gpsd {
    addr: String,
    release: Option<String>,
    reader: Option<BufReader<TcpStream>>,
}

impl Gpsd {
    /// Connect and enable watching so POLL has fresh data to report
    pub fn connect(addr: &str) -> SensorResult<Self> {
        let socket = addr
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| SensorError::NotPresent(format!("cannot resolve {}", addr)))?;
        let stream = TcpStream::connect_timeout(&socket, CONNECT_TIMEOUT)?;
        stream.set_read_timeout(Some(READ_TIMEOUT))?;

        let mut gpsd = Gpsd {
            addr: addr.to_string(),
            release: None,
            reader: Some(BufReader::new(stream)),
        };
        gpsd.send(WATCH)?;
        // gpsd greets with VERSION before anything else
        if let Ok(line) = gpsd.next_line() {
            if let Ok(report) = serde_json::from_str::<Report>(&line) {
                if report.class == "VERSION" {
                    gpsd.release = report.release;
                }
            }
        }
        info!("[gps] connected to gpsd at {}", addr);
        Ok(gpsd)
    }

    fn reader(&mut self) -> SensorResult<&mut BufReader<TcpStream>> {
        self.reader
            .as_mut()
            .ok_or_else(|| SensorError::NotPresent("gpsd connection closed".to_string()))
    }

    fn send(&mut self, command: &[u8]) -> SensorResult<()> {
        self.reader()?.get_mut().write_all(command)?;
        Ok(())
    }

    fn next_line(&mut self) -> SensorResult<String> {
        let mut line = String::new();
        let n = self.reader()?.read_line(&mut line)?;
        if n == 0 {
            self.reader = None;
            return Err(SensorError::NotPresent("gpsd closed the connection".to_string()));
        }
        Ok(line)
    }
}

impl Sensor for Gpsd {
    type Reading = Position;

    fn name(&self) -> &str {
        "gps"
    }

    fn read(&mut self) -> SensorResult<Position> {
        self.send(POLL)?;
        let deadline = Instant::now() + POLL_DEADLINE;
        // Anything queued ahead of the answer (VERSION, WATCH, DEVICES or
        // reports from another client's watch) is skipped.
        while Instant::now() < deadline {
            let line = self.next_line()?;
            if let Some(result) = position_from_report(&line) {
                return result;
            }
        }
        Err(SensorError::Parse("no POLL response from gpsd".to_string()))
    }

    fn identify(&mut self) -> SensorResult<String> {
        Ok(match &self.release {
            Some(release) => format!("gpsd {} @ {}", release, self.addr),
            None => format!("gpsd @ {}", self.addr),
        })
    }

    fn power_down(&mut self) -> SensorResult<()> {
        if let Some(mut reader) = self.reader.take() {
            let _ = reader
                .get_mut()
                .write_all(b"?WATCH={\"enable\":false};\n");
        }
        Ok(())
    }
}

/// `None` for lines that are not a POLL report; otherwise the position or
/// why there is none.
fn position_from_report(line: &str) -> Option<SensorResult<Position>> {
    let report: Report = match serde_json::from_str(line) {
        Ok(report) => report,
        Err(e) => {
            debug!("[gps] skipping unparsable line: {}", e);
            return None;
        }
    };
    if report.class != "POLL" {
        return None;
    }

    let tpv = report.tpv.into_iter().find(|t| t.mode >= 2);
    Some(match tpv {
        Some(Tpv {
            lat: Some(lat),
            lon: Some(lon),
            alt,
            alt_msl,
            ..
        }) => Ok(Position {
            latitude: lat,
            longitude: lon,
            altitude: alt_msl.or(alt),
        }),
        _ => Err(SensorError::NoFix),
    })
}
