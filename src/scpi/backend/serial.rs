//! Serial-port SCPI transport, built on the `serialport` crate (spec §4.G;
//! dependency swap documented in SPEC_FULL.md §2).

use std::time::Duration;

use crate::error::{Error, ErrorKind, Result};
use crate::scpi::core::Transport;

/// A SCPI device reached over a serial port (RS-232/USB-CDC).
pub struct SerialTransport {
    path: String,
    baud_rate: u32,
    port: Option<Box<dyn serialport::SerialPort>>,
    read_complete: bool,
}

impl SerialTransport {
    /// Construct a transport bound to `path` at `baud_rate`. Does not open
    /// the port; call [`Transport::open`].
    pub fn new(path: impl Into<String>, baud_rate: u32) -> Self {
        SerialTransport {
            path: path.into(),
            baud_rate,
            port: None,
            read_complete: true,
        }
    }

    fn port_mut(&mut self) -> Result<&mut Box<dyn serialport::SerialPort>> {
        self.port
            .as_mut()
            .ok_or_else(|| Error::new(ErrorKind::DeviceClosed, "serial transport is not open"))
    }
}

impl Transport for SerialTransport {
    fn open(&mut self) -> Result<()> {
        let port = serialport::new(&self.path, self.baud_rate)
            .timeout(Duration::from_millis(1000))
            .open()?;
        self.port = Some(port);
        Ok(())
    }

    fn connection_id(&self) -> String {
        format!("serial/{}@{}", self.path, self.baud_rate)
    }

    fn send(&mut self, data: &[u8]) -> Result<()> {
        use std::io::Write;
        self.read_complete = false;
        self.port_mut()?.write_all(data)?;
        Ok(())
    }

    fn read_begin(&mut self) -> Result<()> {
        self.read_complete = false;
        Ok(())
    }

    fn read_data(&mut self, buf: &mut [u8]) -> Result<usize> {
        use std::io::Read;
        match self.port_mut()?.read(buf) {
            Ok(0) => {
                self.read_complete = true;
                Ok(0)
            }
            Ok(n) => {
                if buf[..n].contains(&b'\n') {
                    self.read_complete = true;
                }
                Ok(n)
            }
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {
                self.read_complete = true;
                Ok(0)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn read_complete(&self) -> bool {
        self.read_complete
    }

    fn close(&mut self) -> Result<()> {
        self.port = None;
        Ok(())
    }
}
