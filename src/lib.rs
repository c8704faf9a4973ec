//! Core of the air-quality sensor node: sensor drivers, the acquisition and
//! logger loops sharing one sample buffer, and the shutdown coordinator.

pub mod acquisition;
pub mod buffer;
pub mod cancel;
pub mod config;
pub mod error;
pub mod logger;
pub mod sample;
pub mod sensors;
pub mod shutdown;
pub mod snapshot;
pub mod storage;
pub mod watchdog;
