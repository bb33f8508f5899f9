//! Blocking TCP transport with tagged frames and a hello handshake.
//!
//! Every message is a [`WireFrameHdr`] (tag + length) followed by the
//! payload. Sockets carry no implicit call-order matching the way
//! collectives do, so the receiver names the tag it expects and a frame
//! under any other tag is an error.

use crate::algs::wire::{
    TAG_HELLO, TAG_RANK, WIRE_VERSION, HELLO_MAGIC, WireCount, WireFrameHdr, WireHello, cast_slice,
    expect_exact_len, read_record,
};
use crate::m2n_error::M2nError;
use std::io::{ErrorKind, Read, Write};
use std::net::{Ipv4Addr, TcpListener, TcpStream};
use std::time::{Duration, Instant};

/// Which side of the hello exchange this end plays.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum HandshakeRole {
    /// Accepted the connection; reads the hello first.
    Server,
    /// Dialed the connection; writes the hello first.
    Client,
}

impl HandshakeRole {
    fn wire(self) -> u16 {
        match self {
            HandshakeRole::Server => 0,
            HandshakeRole::Client => 1,
        }
    }

    fn peer(self) -> Self {
        match self {
            HandshakeRole::Server => HandshakeRole::Client,
            HandshakeRole::Client => HandshakeRole::Server,
        }
    }
}

/// A bound, listening socket that accepts exactly one connection.
#[derive(Debug)]
pub struct SocketListener {
    inner: TcpListener,
    port: u16,
}

impl SocketListener {
    /// Bind on all interfaces; `port == 0` asks the OS for an ephemeral port.
    pub fn bind(port: u16) -> Result<Self, M2nError> {
        let inner = TcpListener::bind((Ipv4Addr::UNSPECIFIED, port))
            .map_err(|e| M2nError::io("bind", e))?;
        let port = inner
            .local_addr()
            .map_err(|e| M2nError::io("local_addr", e))?
            .port();
        Ok(Self { inner, port })
    }

    /// The port actually bound.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Block until one peer connects. The listener is closed on return.
    pub fn accept(self) -> Result<SocketConnection, M2nError> {
        let (stream, addr) = self.inner.accept().map_err(|e| M2nError::io("accept", e))?;
        log::trace!("accepted connection from {addr} on port {}", self.port);
        SocketConnection::from_stream(stream)
    }

    /// Like [`accept`](Self::accept) but gives up after `timeout`.
    pub fn accept_timeout(self, timeout: Duration) -> Result<SocketConnection, M2nError> {
        self.inner
            .set_nonblocking(true)
            .map_err(|e| M2nError::io("set_nonblocking", e))?;
        let deadline = Instant::now() + timeout;
        loop {
            match self.inner.accept() {
                Ok((stream, addr)) => {
                    log::trace!("accepted connection from {addr} on port {}", self.port);
                    stream
                        .set_nonblocking(false)
                        .map_err(|e| M2nError::io("set_nonblocking", e))?;
                    return SocketConnection::from_stream(stream);
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    if Instant::now() >= deadline {
                        return Err(M2nError::AcceptTimeout(timeout));
                    }
                    std::thread::sleep(Duration::from_millis(5));
                }
                Err(e) => return Err(M2nError::io("accept", e)),
            }
        }
    }
}

/// One established, exclusively owned TCP connection.
#[derive(Debug)]
pub struct SocketConnection {
    stream: TcpStream,
    peer_rank: Option<usize>,
}

impl SocketConnection {
    /// Dial `host:port`. No retry: a refused connection is returned as is.
    pub fn connect(host: &str, port: u16) -> Result<Self, M2nError> {
        let stream = TcpStream::connect((host, port)).map_err(|e| M2nError::io("connect", e))?;
        Self::from_stream(stream)
    }

    fn from_stream(stream: TcpStream) -> Result<Self, M2nError> {
        stream
            .set_nodelay(true)
            .map_err(|e| M2nError::io("set_nodelay", e))?;
        Ok(Self {
            stream,
            peer_rank: None,
        })
    }

    /// Rank learned from the peer during the rank exchange.
    pub fn peer_rank(&self) -> Option<usize> {
        self.peer_rank
    }

    /// Send one frame; returns the payload length.
    pub fn send(&mut self, tag: u32, buf: &[u8]) -> Result<usize, M2nError> {
        if u32::try_from(buf.len()).is_err() {
            return Err(M2nError::ShortTransfer {
                expected: buf.len(),
                actual: 0,
            });
        }
        let hdr = WireFrameHdr::new(tag, buf.len());
        self.stream
            .write_all(cast_slice(std::slice::from_ref(&hdr)))
            .and_then(|_| self.stream.write_all(buf))
            .and_then(|_| self.stream.flush())
            .map_err(|e| M2nError::io("send", e))?;
        log::trace!("sent frame tag={tag:#x} len={}", buf.len());
        Ok(buf.len())
    }

    /// Receive one frame of exactly `buf.len()` bytes under `tag`.
    ///
    /// A frame of any other length is consumed and reported as
    /// `ShortTransfer`; the stream stays aligned on the next frame.
    pub fn receive(&mut self, tag: u32, buf: &mut [u8]) -> Result<usize, M2nError> {
        let len = self.read_header(tag)?;
        if len != buf.len() {
            self.discard(len)?;
            return Err(M2nError::ShortTransfer {
                expected: buf.len(),
                actual: len,
            });
        }
        self.read_payload(buf)?;
        Ok(len)
    }

    /// Receive one frame of whatever length the sender announced.
    pub fn receive_vec(&mut self, tag: u32) -> Result<Vec<u8>, M2nError> {
        let len = self.read_header(tag)?;
        let mut buf = vec![0u8; len];
        self.read_payload(&mut buf)?;
        Ok(buf)
    }

    /// Send a single 4-byte count.
    pub fn send_count(&mut self, tag: u32, n: usize) -> Result<(), M2nError> {
        if u32::try_from(n).is_err() {
            return Err(M2nError::CountMismatch(format!(
                "{n} does not fit the 4-byte count field"
            )));
        }
        let w = WireCount::new(n);
        self.send(tag, cast_slice(std::slice::from_ref(&w)))
            .map(|_| ())
    }

    /// Receive a single 4-byte count.
    pub fn receive_count(&mut self, tag: u32) -> Result<usize, M2nError> {
        let mut buf = [0u8; 4];
        self.receive(tag, &mut buf)?;
        Ok(read_record::<WireCount>(&buf)?.get())
    }

    /// Exchange and validate hello records.
    pub fn handshake(&mut self, role: HandshakeRole) -> Result<(), M2nError> {
        let mine = WireHello::new(role.wire());
        match role {
            HandshakeRole::Client => {
                self.send(TAG_HELLO, cast_slice(std::slice::from_ref(&mine)))?;
                self.expect_hello(role.peer())
            }
            HandshakeRole::Server => {
                self.expect_hello(role.peer())?;
                self.send(TAG_HELLO, cast_slice(std::slice::from_ref(&mine)))
                    .map(|_| ())
            }
        }
    }

    /// Caller half of the rank exchange: send ours, then learn theirs.
    pub(crate) fn exchange_rank_as_caller(&mut self, my_rank: usize) -> Result<usize, M2nError> {
        self.send_count(TAG_RANK, my_rank)?;
        let peer = self.receive_count(TAG_RANK)?;
        self.peer_rank = Some(peer);
        Ok(peer)
    }

    /// Waiter half of the rank exchange: learn theirs, then send ours.
    pub(crate) fn exchange_rank_as_waiter(&mut self, my_rank: usize) -> Result<usize, M2nError> {
        let peer = self.receive_count(TAG_RANK)?;
        self.send_count(TAG_RANK, my_rank)?;
        self.peer_rank = Some(peer);
        Ok(peer)
    }

    /// Shut both directions down; the handle is closed on drop.
    pub fn close(self) -> Result<(), M2nError> {
        self.stream
            .shutdown(std::net::Shutdown::Both)
            .map_err(|e| M2nError::io("shutdown", e))
    }

    fn expect_hello(&mut self, from: HandshakeRole) -> Result<(), M2nError> {
        let mut buf = [0u8; 8];
        self.receive(TAG_HELLO, &mut buf)?;
        let hello: WireHello = read_record(&buf)?;
        if hello.magic() != HELLO_MAGIC {
            return Err(M2nError::HandshakeFailed(format!(
                "bad magic {:#x}",
                hello.magic()
            )));
        }
        if hello.version() != WIRE_VERSION {
            return Err(M2nError::HandshakeFailed(format!(
                "peer speaks wire version {}, we speak {WIRE_VERSION}",
                hello.version()
            )));
        }
        if hello.role() != from.wire() {
            return Err(M2nError::HandshakeFailed(format!(
                "both ends claim role {}",
                hello.role()
            )));
        }
        Ok(())
    }

    fn read_header(&mut self, expected: u32) -> Result<usize, M2nError> {
        let mut raw = [0u8; 8];
        self.read_payload(&mut raw)?;
        let hdr: WireFrameHdr = read_record(&raw)?;
        if hdr.tag() != expected {
            return Err(M2nError::TagMismatch {
                expected,
                got: hdr.tag(),
            });
        }
        Ok(hdr.len())
    }

    fn discard(&mut self, len: usize) -> Result<(), M2nError> {
        let skipped = std::io::copy(
            &mut Read::by_ref(&mut self.stream).take(len as u64),
            &mut std::io::sink(),
        )
        .map_err(|e| M2nError::io("receive", e))?;
        expect_exact_len(skipped as usize, len)
    }

    fn read_payload(&mut self, buf: &mut [u8]) -> Result<(), M2nError> {
        let expected = buf.len();
        self.stream.read_exact(buf).map_err(|e| match e.kind() {
            ErrorKind::UnexpectedEof => M2nError::ShortTransfer {
                expected,
                actual: 0,
            },
            _ => M2nError::io("receive", e),
        })
    }
}
