//! The byte stream underneath a SFTP session.
//!
//! Normally this is a SSH channel, but anything reliable and ordered works.

#[allow(unused_imports)]
use {
    crate::error::{Error, Result},
    log::{debug, error, info, log, trace, warn},
};

use std::io::{ErrorKind, Read, Write};

/// A reliable ordered byte stream with explicit backpressure.
///
/// Implementations must not block. When no progress can be made
/// [`Error::WouldBlock`] is returned, the caller will retry later.
pub trait Stream {
    /// Sends some of `buf`, returning the length accepted.
    ///
    /// Returns [`Error::WindowFull`] when the transport's flow control window
    /// is exhausted, [`pump()`](Stream::pump) will be called before retrying.
    fn send(&mut self, buf: &[u8]) -> Result<usize>;

    /// Receives into `buf`. `Ok(0)` means the peer has closed the stream.
    fn recv(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Services the transport after [`Error::WindowFull`]
    fn pump(&mut self) -> Result<()> {
        Ok(())
    }
}

impl<T: Stream + ?Sized> Stream for &mut T {
    fn send(&mut self, buf: &[u8]) -> Result<usize> {
        (**self).send(buf)
    }

    fn recv(&mut self, buf: &mut [u8]) -> Result<usize> {
        (**self).recv(buf)
    }

    fn pump(&mut self) -> Result<()> {
        (**self).pump()
    }
}

/// Adapts a `std::io` non-blocking stream, such as a `TcpStream` with
/// `set_nonblocking(true)`.
#[derive(Debug)]
pub struct IoStream<T> {
    inner: T,
}

impl<T: Read + Write> IoStream<T> {
    pub fn new(inner: T) -> Self {
        Self { inner }
    }

    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    pub fn into_inner(self) -> T {
        self.inner
    }
}

impl<T: Read + Write> Stream for IoStream<T> {
    fn send(&mut self, buf: &[u8]) -> Result<usize> {
        loop {
            match self.inner.write(buf) {
                Ok(0) if !buf.is_empty() => return Err(Error::ConnectionLost),
                Ok(l) => return Ok(l),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn recv(&mut self, buf: &mut [u8]) -> Result<usize> {
        loop {
            match self.inner.read(buf) {
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                r => return r.map_err(Into::into),
            }
        }
    }

    fn pump(&mut self) -> Result<()> {
        self.inner.flush().map_err(Into::into)
    }
}
