use std::sync::{Arc, Mutex, MutexGuard};

use crate::sample::Sample;
use crate::watchdog::Watchdog;

/// State guarded by the single buffer mutex
#[derive(Debug, Default)]
pub struct BufferState {
    samples: Vec<Sample>,
    serials: Vec<(String, Option<String>)>,
    pub watchdog: Watchdog,
}

impl BufferState {
    pub fn append(&mut self, sample: Sample) {
        debug_assert!(
            self.samples
                .last()
                .map_or(true, |last| last.timestamp <= sample.timestamp),
            "samples must be appended in timestamp order"
        );
        self.samples.push(sample);
    }

    /// Take everything appended so far, leaving the buffer empty
    pub fn drain_all(&mut self) -> Vec<Sample> {
        std::mem::take(&mut self.samples)
    }

    /// Put back samples whose write failed, ahead of anything appended since
    pub fn requeue_front(&mut self, mut samples: Vec<Sample>) {
        samples.append(&mut self.samples);
        self.samples = samples;
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn set_serial(&mut self, label: &str, serial: Option<String>) {
        match self.serials.iter_mut().find(|(l, _)| l == label) {
            Some(entry) => entry.1 = serial,
            None => self.serials.push((label.to_string(), serial)),
        }
    }

    pub fn serial(&self, label: &str) -> Option<&str> {
        self.serials
            .iter()
            .find(|(l, _)| l == label)
            .and_then(|(_, s)| s.as_deref())
    }

    /// Identity of each primary sensor, in registration order
    pub fn serials(&self) -> Vec<(String, Option<String>)> {
        self.serials.clone()
    }
}

/// Sample buffer shared by the acquisition and logger loops
#[derive(Clone, Debug, Default)]
pub struct SharedBuffer {
    inner: Arc<Mutex<BufferState>>,
}

impl SharedBuffer {
    pub fn new(watchdog: Watchdog) -> Self {
        SharedBuffer {
            inner: Arc::new(Mutex::new(BufferState {
                watchdog,
                ..BufferState::default()
            })),
        }
    }

    /// Lock the buffer. A panic in another holder does not make the
    /// samples unusable, so poisoning is ignored.
    pub fn lock(&self) -> MutexGuard<'_, BufferState> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn append(&self, sample: Sample) {
        self.lock().append(sample);
    }

    pub fn drain_all(&self) -> Vec<Sample> {
        self.lock().drain_all()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn sample(secs: i64) -> Sample {
        let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        Sample::new(base + Duration::seconds(secs), 1)
    }

    #[test]
    fn test_drain_empties_in_order() {
        let buffer = SharedBuffer::default();
        buffer.append(sample(0));
        buffer.append(sample(10));

        let drained = buffer.drain_all();
        assert_eq!(drained, vec![sample(0), sample(10)]);
        assert!(buffer.lock().is_empty());
        assert!(buffer.drain_all().is_empty());
    }

    #[test]
    fn test_appends_after_drain_go_to_next_drain() {
        let buffer = SharedBuffer::default();
        buffer.append(sample(0));
        let first = buffer.drain_all();
        buffer.append(sample(10));
        let second = buffer.drain_all();

        assert_eq!(first, vec![sample(0)]);
        assert_eq!(second, vec![sample(10)]);
    }

    #[test]
    fn test_requeue_preserves_order() {
        let buffer = SharedBuffer::default();
        buffer.append(sample(0));
        buffer.append(sample(10));
        let failed = buffer.drain_all();
        buffer.append(sample(20));

        buffer.lock().requeue_front(failed);
        assert_eq!(buffer.drain_all(), vec![sample(0), sample(10), sample(20)]);
    }

    #[test]
    fn test_serials_update_in_place() {
        let buffer = SharedBuffer::default();
        let mut state = buffer.lock();
        state.set_serial("opc_spi", None);
        state.set_serial("opc_usb", Some("177230001".to_string()));
        state.set_serial("opc_spi", Some("177230002".to_string()));

        assert_eq!(state.serial("opc_spi"), Some("177230002"));
        assert_eq!(state.serials().len(), 2);
        assert_eq!(state.serials()[0].0, "opc_spi");
    }

    #[test]
    fn test_poisoned_lock_recovers() {
        let buffer = SharedBuffer::default();
        buffer.append(sample(0));
        let clone = buffer.clone();
        let _ = std::thread::spawn(move || {
            let _guard = clone.lock();
            panic!("holder died");
        })
        .join();

        assert_eq!(buffer.lock().len(), 1);
    }
}
