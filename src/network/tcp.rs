//! TCP transport for the session layer.
//!
//! [`TcpConnector`] opens one [`TcpConnection`] per connect attempt. The
//! connection hands out a [`TcpWatcher`], a cloned handle on the same socket
//! that emulates poll(2) with `peek` under a read timeout, so the supervisor
//! can wait for input while other threads keep writing.

use std::io::{self, ErrorKind, Read as _, Write as _};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use tracing::{debug, error, info};

use super::error::Error;
use super::{Close, Connect, Connection, Poll, PollFlags, Read, Watch, Write};

/// Smallest wait handed to the socket; a zero read timeout is rejected by std.
const MIN_POLL_WAIT: Duration = Duration::from_millis(1);

/// Resolve the broker hostname once, preferring an IPv4 address.
///
/// Any failure here is fatal to client construction; the caller is expected
/// to stop rather than retry.
pub fn resolve(host: &str, port: u16) -> Result<SocketAddr, Error> {
    let addrs: Vec<SocketAddr> = (host, port)
        .to_socket_addrs()
        .map_err(|e| {
            error!(host, error = %e, "Broker address lookup failed");
            Error::InvalidAddress
        })?
        .collect();

    let addr = addrs
        .iter()
        .find(|addr| addr.is_ipv4())
        .or_else(|| addrs.first())
        .copied()
        .ok_or(Error::InvalidAddress)?;

    if addr.is_ipv4() {
        info!(%addr, "IPv4 address found");
    } else {
        info!(%addr, "No IPv4 address for broker, falling back to IPv6");
    }
    Ok(addr)
}

/// Map an I/O error onto the common error type.
fn classify(err: &io::Error, fallback: Error) -> Error {
    match err.kind() {
        ErrorKind::WouldBlock | ErrorKind::TimedOut => Error::Timeout,
        ErrorKind::ConnectionReset
        | ErrorKind::ConnectionAborted
        | ErrorKind::BrokenPipe
        | ErrorKind::UnexpectedEof => Error::ConnectionClosed,
        ErrorKind::NotConnected => Error::NotOpen,
        _ => fallback,
    }
}

/// Opens TCP connections to a resolved `ip:port` string.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    connect_timeout: Duration,
    io_timeout: Duration,
}

impl TcpConnector {
    /// Create a connector; `io_timeout` bounds every blocking read and write.
    pub fn new(connect_timeout: Duration, io_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            io_timeout,
        }
    }
}

impl Connect for TcpConnector {
    type Connection = TcpConnection;
    type Error = Error;

    fn connect(&mut self, remote: &str) -> Result<Self::Connection, Self::Error> {
        let addr: SocketAddr = remote.parse().map_err(|_| Error::InvalidAddress)?;
        let stream = TcpStream::connect_timeout(&addr, self.connect_timeout).map_err(|e| {
            debug!(%addr, error = %e, "TCP connect failed");
            classify(&e, Error::NotOpen)
        })?;

        stream.set_nodelay(true).map_err(|_| Error::NotOpen)?;
        stream
            .set_read_timeout(Some(self.io_timeout))
            .map_err(|_| Error::NotOpen)?;
        stream
            .set_write_timeout(Some(self.io_timeout))
            .map_err(|_| Error::NotOpen)?;

        Ok(TcpConnection {
            stream,
            io_timeout: self.io_timeout,
        })
    }
}

/// A connected TCP stream.
#[derive(Debug)]
pub struct TcpConnection {
    stream: TcpStream,
    io_timeout: Duration,
}

impl Read for TcpConnection {
    type Error = Error;

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        self.stream
            .read(buf)
            .map_err(|e| classify(&e, Error::ReadError))
    }
}

impl Write for TcpConnection {
    type Error = Error;

    fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        self.stream
            .write(buf)
            .map_err(|e| classify(&e, Error::WriteError))
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        self.stream
            .flush()
            .map_err(|e| classify(&e, Error::WriteError))
    }
}

impl Close for TcpConnection {
    type Error = Error;

    fn close(self) -> Result<(), Self::Error> {
        match self.stream.shutdown(Shutdown::Both) {
            Ok(()) => Ok(()),
            // The peer already tore the socket down.
            Err(e) if e.kind() == ErrorKind::NotConnected => Ok(()),
            Err(e) => Err(classify(&e, Error::WriteError)),
        }
    }
}

impl Connection for TcpConnection {}

impl Watch for TcpConnection {
    type Watcher = TcpWatcher;
    type Error = Error;

    fn watcher(&self) -> Result<Self::Watcher, Self::Error> {
        let stream = self.stream.try_clone().map_err(|_| Error::NotOpen)?;
        Ok(TcpWatcher {
            stream,
            io_timeout: self.io_timeout,
        })
    }
}

/// Readiness handle for a [`TcpConnection`].
#[derive(Debug)]
pub struct TcpWatcher {
    stream: TcpStream,
    io_timeout: Duration,
}

impl Poll for TcpWatcher {
    type Error = Error;

    fn poll(
        &mut self,
        interest: PollFlags,
        timeout: Option<Duration>,
    ) -> Result<PollFlags, Self::Error> {
        let wait = timeout.map(|t| t.max(MIN_POLL_WAIT));

        // The read timeout is a property of the socket, shared with the
        // connection; it is restored to the I/O timeout before returning.
        if let Err(e) = self.stream.set_read_timeout(wait) {
            return match e.kind() {
                ErrorKind::NotConnected => Ok(PollFlags::NVAL),
                _ => Err(Error::NotOpen),
            };
        }

        let mut peeked = [0u8; 1];
        let result = self.stream.peek(&mut peeked);

        self.stream
            .set_read_timeout(Some(self.io_timeout))
            .map_err(|_| Error::NotOpen)?;

        let ready = match result {
            Ok(0) => PollFlags::IN | PollFlags::HUP,
            Ok(_) => PollFlags::IN,
            Err(e) => match e.kind() {
                ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted => {
                    PollFlags::empty()
                }
                ErrorKind::NotConnected => PollFlags::NVAL,
                _ => PollFlags::ERR,
            },
        };

        Ok(ready & (interest | PollFlags::ERR | PollFlags::HUP | PollFlags::NVAL))
    }
}
