//! Bridge transfer protocol engine.
//!
//! The Amiga drives every exchange. It either asks for a frame (`RECV`), which is only legal once
//! the bridge has raised its receive-request line, or delivers one (`SEND`). The engine owns the
//! single packet buffer shared by both directions; a [`PacketHandler`] fills it before a `RECV`
//! and consumes it after a `SEND`.
//!
//! An exchange whose bytes cannot all be moved in one poll stays active and continues on the next
//! poll. While it is active the buffer belongs to the exchange.

use plipbox_proto::{PbCommand, PbStatus};
use thiserror::Error;
use tracing::{debug, trace, warn};

/// Size of the shared packet buffer.
pub const PKT_BUF_SIZE: usize = 1536;

/// Polls without progress before an exchange is abandoned.
pub const DEFAULT_STALL_LIMIT: u32 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PortError {
    #[error("peer dropped the handshake")]
    LinkFault,
}

/// Line level access to the Amiga side of the bridge protocol.
pub trait PeerPort {
    /// Command byte strobed by the peer, if any.
    fn poll_command(&mut self) -> Option<u8>;

    /// Raise or drop the line telling the peer a frame is waiting.
    fn set_recv_request(&mut self, active: bool);

    /// Announce the size of the frame about to be streamed for a `RECV`.
    fn write_size(&mut self, size: u16) -> Result<(), PortError>;

    /// Push frame bytes to the peer. Returns how many it accepted; zero means "not yet".
    fn write_data(&mut self, data: &[u8]) -> Result<usize, PortError>;

    /// Size announced by the peer for a `SEND`.
    fn read_size(&mut self) -> Result<u16, PortError>;

    /// Pull frame bytes from the peer. Returns how many were read; zero means "not yet".
    fn read_data(&mut self, buf: &mut [u8]) -> Result<usize, PortError>;

    /// Close the exchange.
    fn write_status(&mut self, status: PbStatus);
}

impl<T: PeerPort + ?Sized> PeerPort for &mut T {
    fn poll_command(&mut self) -> Option<u8> {
        <T as PeerPort>::poll_command(&mut **self)
    }

    fn set_recv_request(&mut self, active: bool) {
        <T as PeerPort>::set_recv_request(&mut **self, active)
    }

    fn write_size(&mut self, size: u16) -> Result<(), PortError> {
        <T as PeerPort>::write_size(&mut **self, size)
    }

    fn write_data(&mut self, data: &[u8]) -> Result<usize, PortError> {
        <T as PeerPort>::write_data(&mut **self, data)
    }

    fn read_size(&mut self) -> Result<u16, PortError> {
        <T as PeerPort>::read_size(&mut **self)
    }

    fn read_data(&mut self, buf: &mut [u8]) -> Result<usize, PortError> {
        <T as PeerPort>::read_data(&mut **self, buf)
    }

    fn write_status(&mut self, status: PbStatus) {
        <T as PeerPort>::write_status(&mut **self, status)
    }
}

/// The fill/process pair supplied by the bridge loop.
pub trait PacketHandler {
    /// Prepare the staged frame in `buf` and report its size.
    fn fill_packet(&mut self, buf: &mut [u8]) -> Result<usize, PbStatus>;

    /// Consume a frame delivered by the peer.
    fn process_packet(&mut self, buf: &mut [u8]) -> PbStatus;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("packet buffer is in use by an active exchange")]
pub struct EngineBusy;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Idle,
    /// Streaming a frame to the peer.
    Recv,
    /// Collecting a frame from the peer.
    Send,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Exchange {
    direction: Direction,
    cursor: usize,
    total: usize,
    stalls: u32,
}

impl Exchange {
    const IDLE: Exchange = Exchange {
        direction: Direction::Idle,
        cursor: 0,
        total: 0,
        stalls: 0,
    };
}

/// A finished exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExchangeResult {
    /// `None` when the peer sent an unknown command byte.
    pub command: Option<PbCommand>,
    pub size: usize,
    pub status: PbStatus,
}

#[derive(Debug)]
pub struct TransferEngine {
    buf: Box<[u8]>,
    exchange: Exchange,
    recv_requested: bool,
    stall_limit: u32,
}

impl Default for TransferEngine {
    fn default() -> Self {
        Self::new(PKT_BUF_SIZE)
    }
}

impl TransferEngine {
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: vec![0u8; capacity].into_boxed_slice(),
            exchange: Exchange::IDLE,
            recv_requested: false,
            stall_limit: DEFAULT_STALL_LIMIT,
        }
    }

    pub fn with_stall_limit(mut self, stall_limit: u32) -> Self {
        self.stall_limit = stall_limit.max(1);
        self
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    pub fn direction(&self) -> Direction {
        self.exchange.direction
    }

    pub fn is_busy(&self) -> bool {
        self.exchange.direction != Direction::Idle
    }

    pub fn recv_requested(&self) -> bool {
        self.recv_requested
    }

    /// The packet buffer, unless an exchange is using it.
    pub fn buffer_mut(&mut self) -> Result<&mut [u8], EngineBusy> {
        if self.is_busy() {
            return Err(EngineBusy);
        }
        Ok(&mut self.buf)
    }

    pub fn buffer(&self) -> &[u8] {
        &self.buf
    }

    /// Tell the peer a frame is waiting.
    pub fn request_recv(&mut self, port: &mut impl PeerPort) {
        self.recv_requested = true;
        port.set_recv_request(true);
    }

    /// Withdraw a pending receive request.
    pub fn cancel_recv(&mut self, port: &mut impl PeerPort) {
        self.recv_requested = false;
        port.set_recv_request(false);
    }

    /// Serve the peer once. Returns the exchange that completed during this poll, if any.
    pub fn handle(
        &mut self,
        port: &mut impl PeerPort,
        handler: &mut impl PacketHandler,
    ) -> Option<ExchangeResult> {
        if self.exchange.direction != Direction::Idle {
            return self.pump(port, handler);
        }

        let byte = port.poll_command()?;
        match PbCommand::from_u8(byte) {
            Ok(PbCommand::Recv) => self.start_recv(port, handler),
            Ok(PbCommand::Send) => self.start_send(port, handler),
            Err(err) => {
                warn!(%err, "invalid command from peer");
                Some(self.finish(port, None, 0, PbStatus::InvalidCommand))
            }
        }
    }

    fn start_recv(
        &mut self,
        port: &mut impl PeerPort,
        handler: &mut impl PacketHandler,
    ) -> Option<ExchangeResult> {
        let cmd = Some(PbCommand::Recv);
        if !self.recv_requested {
            debug!("peer asked for a frame but none is staged");
            return Some(self.finish(port, cmd, 0, PbStatus::NotReady));
        }

        let size = match handler.fill_packet(&mut self.buf) {
            Ok(size) if size <= self.buf.len() => size,
            Ok(size) => {
                debug!(size, capacity = self.buf.len(), "staged frame too large");
                return Some(self.finish(port, cmd, size, PbStatus::PacketTooLarge));
            }
            Err(status) => return Some(self.finish(port, cmd, 0, status)),
        };

        self.cancel_recv(port);
        if port.write_size(size as u16).is_err() {
            return Some(self.finish(port, cmd, size, PbStatus::LinkFault));
        }
        trace!(size, "recv exchange started");
        self.exchange = Exchange {
            direction: Direction::Recv,
            cursor: 0,
            total: size,
            stalls: 0,
        };
        self.pump(port, handler)
    }

    fn start_send(
        &mut self,
        port: &mut impl PeerPort,
        handler: &mut impl PacketHandler,
    ) -> Option<ExchangeResult> {
        let cmd = Some(PbCommand::Send);
        let size = match port.read_size() {
            Ok(size) => size as usize,
            Err(_) => return Some(self.finish(port, cmd, 0, PbStatus::LinkFault)),
        };
        if size > self.buf.len() {
            debug!(size, capacity = self.buf.len(), "peer frame too large");
            return Some(self.finish(port, cmd, size, PbStatus::PacketTooLarge));
        }
        trace!(size, "send exchange started");
        self.exchange = Exchange {
            direction: Direction::Send,
            cursor: 0,
            total: size,
            stalls: 0,
        };
        self.pump(port, handler)
    }

    /// Move as many bytes as the port takes right now.
    fn pump(
        &mut self,
        port: &mut impl PeerPort,
        handler: &mut impl PacketHandler,
    ) -> Option<ExchangeResult> {
        let Exchange {
            direction, total, ..
        } = self.exchange;
        let cmd = match direction {
            Direction::Idle => return None,
            Direction::Recv => PbCommand::Recv,
            Direction::Send => PbCommand::Send,
        };

        while self.exchange.cursor < total {
            let cursor = self.exchange.cursor;
            let moved = match direction {
                Direction::Recv => port.write_data(&self.buf[cursor..total]),
                _ => port.read_data(&mut self.buf[cursor..total]),
            };
            match moved {
                Ok(0) => {
                    self.exchange.stalls += 1;
                    if self.exchange.stalls >= self.stall_limit {
                        warn!(?cmd, cursor, total, "exchange stalled");
                        return Some(self.finish(port, Some(cmd), cursor, PbStatus::Timeout));
                    }
                    return None;
                }
                Ok(n) => {
                    self.exchange.cursor = (cursor + n).min(total);
                    self.exchange.stalls = 0;
                }
                Err(err) => {
                    warn!(?cmd, %err, cursor, total, "exchange aborted");
                    return Some(self.finish(port, Some(cmd), cursor, PbStatus::LinkFault));
                }
            }
        }

        let status = match direction {
            Direction::Recv => PbStatus::Ok,
            _ => handler.process_packet(&mut self.buf[..total]),
        };
        Some(self.finish(port, Some(cmd), total, status))
    }

    fn finish(
        &mut self,
        port: &mut impl PeerPort,
        command: Option<PbCommand>,
        size: usize,
        status: PbStatus,
    ) -> ExchangeResult {
        port.write_status(status);
        self.exchange = Exchange::IDLE;
        trace!(?command, size, status = status.to_u8(), "exchange done");
        ExchangeResult {
            command,
            size,
            status,
        }
    }
}
