//! Driver registry, session scheduler, and SCPI transport core for a
//! multi-instrument acquisition runtime.
//!
//! A [`driver::Context`] holds the registered [`driver::Driver`]s. Scanning
//! a driver yields [`device::DeviceInstance`]s, which are attached to a
//! [`session::Session`] and driven through `start`/`run`/`stop`. Acquired
//! samples and metadata flow out as [`feed::Packet`]s through the session's
//! transform chain to registered datafeed callbacks. [`scpi`] provides the
//! command-table-driven transport core and backend implementations
//! (serial, raw/LXI TCP, USBTMC, and stubbed GPIB/VISA) that SCPI-speaking
//! drivers build on; [`rational`] and [`config`] supply the exact-rational
//! arithmetic and typed configuration surface shared across both.

#![deny(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod config;
pub mod device;
pub mod driver;
pub mod error;
pub mod feed;
pub mod log;
pub mod rational;
pub mod scpi;
pub mod session;

pub use error::{Error, ErrorKind, Result};
