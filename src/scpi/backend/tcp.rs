//! Raw-socket SCPI transports: plain newline-terminated TCP, and the
//! Rigol/LXI length-prefixed variant some instruments use for block data.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::time::Duration;

use byteorder::{BigEndian, ReadBytesExt};

use crate::error::{Error, ErrorKind, Result};
use crate::scpi::core::Transport;

/// A SCPI device reached over a plain TCP socket (e.g. LXI raw socket on
/// port 5025).
pub struct TcpTransport {
    addr: String,
    stream: Option<TcpStream>,
    read_complete: bool,
}

impl TcpTransport {
    /// Construct a transport bound to `addr` (e.g. `"192.168.1.5:5025"`).
    pub fn new(addr: impl Into<String>) -> Self {
        TcpTransport {
            addr: addr.into(),
            stream: None,
            read_complete: true,
        }
    }

    fn stream_mut(&mut self) -> Result<&mut TcpStream> {
        self.stream
            .as_mut()
            .ok_or_else(|| Error::new(ErrorKind::DeviceClosed, "tcp transport is not open"))
    }
}

impl Transport for TcpTransport {
    fn open(&mut self) -> Result<()> {
        let stream = TcpStream::connect(&self.addr)?;
        stream.set_read_timeout(Some(Duration::from_millis(1000)))?;
        stream.set_nodelay(true)?;
        self.stream = Some(stream);
        Ok(())
    }

    fn connection_id(&self) -> String {
        format!("tcp/{}", self.addr)
    }

    fn send(&mut self, data: &[u8]) -> Result<()> {
        self.read_complete = false;
        self.stream_mut()?.write_all(data)?;
        Ok(())
    }

    fn read_begin(&mut self) -> Result<()> {
        self.read_complete = false;
        Ok(())
    }

    fn read_data(&mut self, buf: &mut [u8]) -> Result<usize> {
        match self.stream_mut()?.read(buf) {
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
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock || e.kind() == std::io::ErrorKind::TimedOut => {
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
        self.stream = None;
        Ok(())
    }
}

/// A Rigol/LXI-style socket that frames every response with a 4-byte
/// big-endian length prefix instead of relying on a line terminator.
pub struct RigolLxiTransport {
    inner: TcpTransport,
    pending_len: Option<u32>,
    read_so_far: u32,
}

impl RigolLxiTransport {
    /// Construct a transport bound to `addr`.
    pub fn new(addr: impl Into<String>) -> Self {
        RigolLxiTransport {
            inner: TcpTransport::new(addr),
            pending_len: None,
            read_so_far: 0,
        }
    }
}

impl Transport for RigolLxiTransport {
    fn open(&mut self) -> Result<()> {
        self.inner.open()
    }

    fn connection_id(&self) -> String {
        format!("rigol-lxi/{}", self.inner.addr)
    }

    fn send(&mut self, data: &[u8]) -> Result<()> {
        self.pending_len = None;
        self.read_so_far = 0;
        self.inner.send(data)
    }

    fn read_begin(&mut self) -> Result<()> {
        self.pending_len = None;
        self.read_so_far = 0;
        self.inner.read_begin()
    }

    fn read_data(&mut self, buf: &mut [u8]) -> Result<usize> {
        if self.pending_len.is_none() {
            let stream = self.inner.stream_mut()?;
            let len = stream
                .read_u32::<BigEndian>()
                .map_err(|e| Error::new(ErrorKind::BadData, format!("missing Rigol length prefix: {}", e)))?;
            self.pending_len = Some(len);
        }
        let remaining = self.pending_len.unwrap() - self.read_so_far;
        if remaining == 0 {
            return Ok(0);
        }
        let want = (buf.len() as u32).min(remaining) as usize;
        let n = self.inner.stream_mut()?.read(&mut buf[..want])?;
        self.read_so_far += n as u32;
        Ok(n)
    }

    fn read_complete(&self) -> bool {
        matches!(self.pending_len, Some(len) if self.read_so_far >= len)
    }

    fn close(&mut self) -> Result<()> {
        self.inner.close()
    }
}
