//! The synchronized last-byte-barrier connection (spec §3 "Connection",
//! §4.2), grounded on `pyrace.connection.BaseConnection` (`examples/
//! original_source/pyrace/connection.py`).
//!
//! The Python original builds a request across several incremental
//! `send(data, flush=False)` calls (one per header line, one for the
//! body) because that is how `http.client.HTTPConnection.request` is
//! implemented, then does the barrier exchange once inside
//! `getresponse()`. This port serializes the whole request up front
//! (`crate::http::serialize_request`) and passes it to [`Connection`] as
//! one slice; [`Connection::send`] still implements the exact
//! append-then-decide buffering rule from the original so the on-wire
//! trailing-bytes behavior is identical.

use std::io::Write;
use std::time::Duration;

use crate::context::WorkerContext;
use crate::error::RaceError;
use crate::http;
use crate::socket::{self, RawSocket};
use crate::work::{PreparedRequest, Response};

/// Bytes withheld from every write until the send gate opens (spec §4.2:
/// two bytes is enough to also cover bodyless requests, whose final four
/// bytes are just `\r\n\r\n`).
const BUFFER_SIZE: usize = 2;

/// One HTTP[S] connection participating in the barrier protocol.
pub struct Connection {
    socket: RawSocket,
    ctx: WorkerContext,
    send_buffer: Vec<u8>,
}

impl Connection {
    /// Resolves `host`/`port` per the context's connect mode, connects to
    /// the first reachable address, and wraps it in TLS if `scheme` is
    /// `"https"`.
    pub fn open(scheme: &str, host: &str, port: u16, ctx: &WorkerContext) -> Result<Self, RaceError> {
        let addrs = ctx
            .resolver
            .resolve(host, port, ctx.connect_mode, ctx.worker_index)?;
        let tcp = socket::connect_tcp(host, port, &addrs)?;
        let socket = if scheme.eq_ignore_ascii_case("https") {
            socket::wrap_tls(host, tcp)?
        } else {
            RawSocket::Plain(tcp)
        };
        Ok(Self {
            socket,
            ctx: ctx.clone(),
            send_buffer: Vec::new(),
        })
    }

    /// Appends `data` to the send buffer, then transmits whatever the
    /// buffering rule allows: if `flush`, everything; otherwise all but the
    /// final [`BUFFER_SIZE`] bytes, which stay buffered for the next call.
    ///
    /// Resolves spec.md's Open Question (§9) on combined append+flush
    /// calls: append happens first, the flush/trim decision second.
    fn send(&mut self, data: &[u8], flush: bool) -> Result<(), RaceError> {
        self.send_buffer.extend_from_slice(data);

        let mut to_send = Vec::new();
        if flush {
            to_send.append(&mut self.send_buffer);
        } else if self.send_buffer.len() > BUFFER_SIZE {
            let split_at = self.send_buffer.len() - BUFFER_SIZE;
            to_send.extend_from_slice(&self.send_buffer[..split_at]);
            self.send_buffer.drain(..split_at);
        }

        if !to_send.is_empty() {
            self.socket
                .write_all(&to_send)
                .map_err(|e| RaceError::Transport(e.to_string()))?;
        }
        Ok(())
    }

    /// Runs one full barrier exchange for `request`: buffers the serialized
    /// request (withholding the last two bytes), raises the pre-send sync,
    /// waits for the send gate, flushes the residual, raises the post-send
    /// sync, waits for the read gate, then reads and parses the response,
    /// stamping it with the prepared request that produced it.
    pub fn exchange(
        &mut self,
        request: &PreparedRequest,
        writable_timeout: Option<Duration>,
    ) -> Result<Response, RaceError> {
        let request_bytes = http::serialize_request(request);
        socket::wait_writable(self.socket.tcp_stream(), writable_timeout)?;

        self.send(&request_bytes, false)?;

        self.ctx.sync_signal.raise();
        self.ctx.send_gate.wait();
        self.send(&[], true)?;

        self.ctx.sync_signal.raise();
        self.ctx.read_gate.wait();

        http::read_response(&mut self.socket, request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct RecordingSink {
        written: Vec<u8>,
    }

    impl RecordingSink {
        fn send(&mut self, buffer: &mut Vec<u8>, data: &[u8], flush: bool) {
            buffer.extend_from_slice(data);
            let mut to_send = Vec::new();
            if flush {
                to_send.append(buffer);
            } else if buffer.len() > BUFFER_SIZE {
                let split_at = buffer.len() - BUFFER_SIZE;
                to_send.extend_from_slice(&buffer[..split_at]);
                buffer.drain(..split_at);
            }
            self.written.extend_from_slice(&to_send);
        }
    }

    #[test]
    fn withholds_last_two_bytes_until_flush() {
        let mut sink = RecordingSink { written: Vec::new() };
        let mut buffer = Vec::new();

        sink.send(&mut buffer, b"hello world", false);
        assert_eq!(sink.written, b"hello wor");
        assert_eq!(buffer, b"ld");

        sink.send(&mut buffer, b"", true);
        assert_eq!(sink.written, b"hello world");
        assert!(buffer.is_empty());
    }

    #[test]
    fn combined_append_and_flush_sends_everything() {
        let mut sink = RecordingSink { written: Vec::new() };
        let mut buffer = Vec::new();

        sink.send(&mut buffer, b"ab", false);
        assert!(sink.written.is_empty());
        assert_eq!(buffer, b"ab");

        sink.send(&mut buffer, b"cdef", true);
        assert_eq!(sink.written, b"abcdef");
        assert!(buffer.is_empty());
    }

    #[test]
    fn short_writes_stay_fully_buffered_until_flush() {
        let mut sink = RecordingSink { written: Vec::new() };
        let mut buffer = Vec::new();

        sink.send(&mut buffer, b"a", false);
        assert!(sink.written.is_empty());
        assert_eq!(buffer, b"a");
    }
}
