//! In-memory stand-in for the Amiga end of the bridge protocol.

use std::collections::VecDeque;

use plipbox_proto::{PbCommand, PbStatus};
use tracing::trace;

use crate::pbproto::{PeerPort, PortError};

/// Simulated peer.
///
/// While the bridge holds the receive-request line high and no command is queued, the peer issues
/// a `RECV` on its own. Frames it pulls are collected and, with [`LoopbackPeer::with_echo`],
/// queued straight back as `SEND`s.
#[derive(Debug, Clone)]
pub struct LoopbackPeer {
    commands: VecDeque<u8>,
    outgoing: VecDeque<Vec<u8>>,
    current_out: Option<(Vec<u8>, usize)>,
    incoming: Option<(Vec<u8>, usize)>,
    received: Vec<Vec<u8>>,
    statuses: Vec<PbStatus>,
    recv_line: bool,
    auto_recv: bool,
    echo: bool,
    chunk: usize,
    stall: u32,
    fault: bool,
}

impl Default for LoopbackPeer {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackPeer {
    pub fn new() -> Self {
        Self {
            commands: VecDeque::new(),
            outgoing: VecDeque::new(),
            current_out: None,
            incoming: None,
            received: Vec::new(),
            statuses: Vec::new(),
            recv_line: false,
            auto_recv: true,
            echo: false,
            chunk: usize::MAX,
            stall: 0,
            fault: false,
        }
    }

    /// Send every pulled frame straight back.
    pub fn with_echo(mut self, echo: bool) -> Self {
        self.echo = echo;
        self
    }

    /// Move at most `chunk` bytes per data call.
    pub fn with_chunk(mut self, chunk: usize) -> Self {
        self.chunk = chunk.max(1);
        self
    }

    /// Only issue commands that were queued explicitly.
    pub fn with_auto_recv(mut self, auto_recv: bool) -> Self {
        self.auto_recv = auto_recv;
        self
    }

    pub fn queue_command(&mut self, byte: u8) {
        self.commands.push_back(byte);
    }

    /// Queue a `SEND` carrying `frame`.
    pub fn queue_send(&mut self, frame: Vec<u8>) {
        self.commands.push_back(PbCommand::Send.to_u8());
        self.outgoing.push_back(frame);
    }

    /// Refuse the next `polls` data calls.
    pub fn stall_for(&mut self, polls: u32) {
        self.stall = polls;
    }

    /// Fail the next data call.
    pub fn inject_fault(&mut self) {
        self.fault = true;
    }

    pub fn recv_line(&self) -> bool {
        self.recv_line
    }

    pub fn received(&self) -> &[Vec<u8>] {
        &self.received
    }

    pub fn take_received(&mut self) -> Vec<Vec<u8>> {
        std::mem::take(&mut self.received)
    }

    pub fn statuses(&self) -> &[PbStatus] {
        &self.statuses
    }

    pub fn is_idle(&self) -> bool {
        self.commands.is_empty() && self.current_out.is_none() && self.incoming.is_none()
    }

    fn gate(&mut self) -> Result<bool, PortError> {
        if std::mem::take(&mut self.fault) {
            return Err(PortError::LinkFault);
        }
        if self.stall > 0 {
            self.stall -= 1;
            return Ok(false);
        }
        Ok(true)
    }
}

impl PeerPort for LoopbackPeer {
    fn poll_command(&mut self) -> Option<u8> {
        if let Some(byte) = self.commands.pop_front() {
            return Some(byte);
        }
        (self.recv_line && self.auto_recv).then_some(PbCommand::Recv.to_u8())
    }

    fn set_recv_request(&mut self, active: bool) {
        self.recv_line = active;
    }

    fn write_size(&mut self, size: u16) -> Result<(), PortError> {
        self.incoming = Some((Vec::with_capacity(size as usize), size as usize));
        Ok(())
    }

    fn write_data(&mut self, data: &[u8]) -> Result<usize, PortError> {
        if !self.gate()? {
            return Ok(0);
        }
        let Some((frame, size)) = self.incoming.as_mut() else {
            return Err(PortError::LinkFault);
        };
        let n = data.len().min(self.chunk).min(*size - frame.len());
        frame.extend_from_slice(&data[..n]);
        if frame.len() == *size {
            if let Some((frame, _)) = self.incoming.take() {
                trace!(len = frame.len(), "peer pulled frame");
                if self.echo {
                    self.queue_send(frame.clone());
                }
                self.received.push(frame);
            }
        }
        Ok(n)
    }

    fn read_size(&mut self) -> Result<u16, PortError> {
        let frame = self.outgoing.pop_front().ok_or(PortError::LinkFault)?;
        let size = frame.len() as u16;
        self.current_out = Some((frame, 0));
        Ok(size)
    }

    fn read_data(&mut self, buf: &mut [u8]) -> Result<usize, PortError> {
        if !self.gate()? {
            return Ok(0);
        }
        let Some((frame, pos)) = self.current_out.as_mut() else {
            return Err(PortError::LinkFault);
        };
        let n = buf.len().min(self.chunk).min(frame.len() - *pos);
        buf[..n].copy_from_slice(&frame[*pos..*pos + n]);
        *pos += n;
        Ok(n)
    }

    fn write_status(&mut self, status: PbStatus) {
        self.current_out = None;
        self.incoming = None;
        self.statuses.push(status);
    }
}
