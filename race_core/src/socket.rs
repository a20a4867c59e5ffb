//! Raw socket lifecycle: TCP connect across a resolved address list, TLS
//! wrapping, `TCP_NODELAY`, and one-shot writable-readiness polling.
//!
//! Grounded on `pyrace.connection.BaseConnection._new_conn`
//! (`examples/original_source/pyrace/connection.py`): try each resolved
//! address in order, keep the last error if all fail, set `TCP_NODELAY` on
//! success. The writable-readiness probe
//! (`select([], [self.sock], [])` in `getresponse`) is realized with `mio`,
//! following the one-shot-poll pattern in the `ryanseipp-rask-old` and
//! `SleepingPills-bushhammer` pack examples.

use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;
use std::time::Duration;

use mio::net::TcpStream as MioTcpStream;
use mio::{Events, Interest, Poll, Token};
use once_cell::sync::OnceCell;
use rustls::{ClientConfig, ClientConnection, StreamOwned};
use rustls_pki_types::ServerName;

use crate::error::RaceError;

/// Either a plain TCP socket or one wrapped in a TLS session.
pub enum RawSocket {
    Plain(TcpStream),
    Tls(Box<StreamOwned<ClientConnection, TcpStream>>),
}

impl RawSocket {
    /// The underlying TCP stream, for readiness polling and socket options;
    /// both variants ultimately sit on one.
    pub fn tcp_stream(&self) -> &TcpStream {
        match self {
            RawSocket::Plain(stream) => stream,
            RawSocket::Tls(stream) => stream.get_ref(),
        }
    }
}

impl Read for RawSocket {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            RawSocket::Plain(stream) => stream.read(buf),
            RawSocket::Tls(stream) => stream.read(buf),
        }
    }
}

impl Write for RawSocket {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            RawSocket::Plain(stream) => stream.write(buf),
            RawSocket::Tls(stream) => stream.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            RawSocket::Plain(stream) => stream.flush(),
            RawSocket::Tls(stream) => stream.flush(),
        }
    }
}

/// Connects to the first reachable address in `addrs`, in order, matching
/// `socket.create_connection`'s try-each-then-raise-the-last-error
/// behavior. Sets `TCP_NODELAY` on success.
pub fn connect_tcp(host: &str, port: u16, addrs: &[SocketAddr]) -> Result<TcpStream, RaceError> {
    let mut last_error: Option<io::Error> = None;
    for addr in addrs {
        match TcpStream::connect(addr) {
            Ok(stream) => {
                stream.set_nodelay(true).map_err(|e| RaceError::ConnectFailure {
                    host: host.to_string(),
                    port,
                    source: e,
                })?;
                log::info!("connected to {addr} for {host}:{port}");
                return Ok(stream);
            }
            Err(e) => last_error = Some(e),
        }
    }
    Err(RaceError::ConnectFailure {
        host: host.to_string(),
        port,
        source: last_error
            .unwrap_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no addresses to try")),
    })
}

fn root_tls_config() -> Arc<ClientConfig> {
    static CONFIG: OnceCell<Arc<ClientConfig>> = OnceCell::new();
    CONFIG
        .get_or_init(|| {
            let mut roots = rustls::RootCertStore::empty();
            roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
            Arc::new(
                ClientConfig::builder()
                    .with_root_certificates(roots)
                    .with_no_client_auth(),
            )
        })
        .clone()
}

/// Wraps a connected TCP stream in a TLS client session using `hostname` as
/// the SNI / certificate-verification name, independent of whichever
/// `SocketAddr` the stream actually connected to (spec §4.2's SNI/Host
/// correctness requirement, needed because `connect_mode` may have
/// substituted the peer address).
pub fn wrap_tls(hostname: &str, stream: TcpStream) -> Result<RawSocket, RaceError> {
    let server_name = ServerName::try_from(hostname.to_string())
        .map_err(|e| RaceError::Transport(format!("invalid TLS server name {hostname:?}: {e}")))?;
    let conn = ClientConnection::new(root_tls_config(), server_name)
        .map_err(|e| RaceError::Transport(format!("TLS setup failed: {e}")))?;
    Ok(RawSocket::Tls(Box::new(StreamOwned::new(conn, stream))))
}

/// Blocks until `stream` is writable or `timeout` elapses, mirroring
/// `select([], [sock], [])`. Polls a cloned fd so the caller keeps
/// uninterrupted ownership of the original stream.
pub fn wait_writable(stream: &TcpStream, timeout: Option<Duration>) -> Result<(), RaceError> {
    let clone = stream
        .try_clone()
        .map_err(|e| RaceError::Transport(e.to_string()))?;
    let mut mio_stream = MioTcpStream::from_std(clone);
    let mut poll = Poll::new().map_err(|e| RaceError::Transport(e.to_string()))?;
    poll.registry()
        .register(&mut mio_stream, Token(0), Interest::WRITABLE)
        .map_err(|e| RaceError::Transport(e.to_string()))?;

    let mut events = Events::with_capacity(1);
    poll.poll(&mut events, timeout)
        .map_err(|e| RaceError::Transport(e.to_string()))?;

    if events.iter().next().is_none() {
        return Err(RaceError::Transport(
            "timed out waiting for socket to become writable".to_string(),
        ));
    }
    Ok(())
}
