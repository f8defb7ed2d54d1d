//! Concrete [`super::Transport`] implementations, one per wire (spec §4.G).

pub mod gpib;
pub mod serial;
pub mod tcp;
pub mod usbtmc;
pub mod visa;

pub use gpib::GpibTransport;
pub use serial::SerialTransport;
pub use tcp::{RigolLxiTransport, TcpTransport};
pub use usbtmc::{UsbtmcCapabilities, UsbtmcTransport};
pub use visa::VisaTransport;
