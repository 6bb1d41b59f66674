//! The wire below the server task.
//!
//! The actual parallel-port handshaking lives outside this crate; the server task only needs a
//! way to bring the link up and down and to move whole frames across it.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::Arc;
use std::time::Duration;

use crate::error::LinkError;
use crate::wiring::Handshake;

/// Parameters the server task passes when it opens the link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkParams {
    pub unit: u32,
    pub handshake: Handshake,
    pub timeout: Duration,
    /// Largest frame (header included) the driver will send.
    pub max_frame: usize,
}

pub trait PlipLink: Send {
    fn go_online(&mut self) -> Result<(), LinkError>;

    fn go_offline(&mut self);

    /// Transfer one Ethernet frame to the peer.
    fn send_frame(&mut self, frame: &[u8]) -> Result<(), LinkError>;

    /// Poll for a frame from the peer. Must not block.
    fn recv_frame(&mut self) -> Result<Option<Vec<u8>>, LinkError>;
}

impl<T: PlipLink + ?Sized> PlipLink for Box<T> {
    fn go_online(&mut self) -> Result<(), LinkError> {
        <T as PlipLink>::go_online(&mut **self)
    }

    fn go_offline(&mut self) {
        <T as PlipLink>::go_offline(&mut **self)
    }

    fn send_frame(&mut self, frame: &[u8]) -> Result<(), LinkError> {
        <T as PlipLink>::send_frame(&mut **self, frame)
    }

    fn recv_frame(&mut self) -> Result<Option<Vec<u8>>, LinkError> {
        <T as PlipLink>::recv_frame(&mut **self)
    }
}

/// Opens the link from within the server task. Failing here fails the `open` that started the
/// server.
pub type LinkFactory =
    Arc<dyn Fn(&LinkParams) -> Result<Box<dyn PlipLink>, LinkError> + Send + Sync>;

/// One end of an in-memory cable.
///
/// Frames sent while the sending end is offline are refused; frames arriving while the receiving
/// end is offline are discarded, the same as a real port that nobody is listening on.
#[derive(Debug)]
pub struct ChannelLink {
    tx: Sender<Vec<u8>>,
    rx: Receiver<Vec<u8>>,
    online: bool,
    max_frame: usize,
}

impl ChannelLink {
    pub fn pair(max_frame: usize) -> (ChannelLink, ChannelLink) {
        let (a_tx, b_rx) = mpsc::channel();
        let (b_tx, a_rx) = mpsc::channel();
        (
            ChannelLink {
                tx: a_tx,
                rx: a_rx,
                online: false,
                max_frame,
            },
            ChannelLink {
                tx: b_tx,
                rx: b_rx,
                online: false,
                max_frame,
            },
        )
    }

    pub fn is_online(&self) -> bool {
        self.online
    }

    /// Block up to `timeout` for the next frame, regardless of the online state.
    pub fn recv_timeout(&mut self, timeout: Duration) -> Option<Vec<u8>> {
        match self.rx.recv_timeout(timeout) {
            Ok(frame) => Some(frame),
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => None,
        }
    }
}

impl PlipLink for ChannelLink {
    fn go_online(&mut self) -> Result<(), LinkError> {
        self.online = true;
        Ok(())
    }

    fn go_offline(&mut self) {
        self.online = false;
    }

    fn send_frame(&mut self, frame: &[u8]) -> Result<(), LinkError> {
        if !self.online {
            return Err(LinkError::Offline);
        }
        if frame.len() > self.max_frame {
            return Err(LinkError::FrameTooLarge {
                len: frame.len(),
                max: self.max_frame,
            });
        }
        self.tx
            .send(frame.to_vec())
            .map_err(|_| LinkError::Disconnected)
    }

    fn recv_frame(&mut self) -> Result<Option<Vec<u8>>, LinkError> {
        match self.rx.try_recv() {
            Ok(frame) if self.online => Ok(Some(frame)),
            Ok(_) => Ok(None),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(LinkError::Disconnected),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offline_end_refuses_to_send() {
        let (mut a, mut b) = ChannelLink::pair(64);
        assert_eq!(a.send_frame(&[1, 2, 3]), Err(LinkError::Offline));

        a.go_online().unwrap();
        b.go_online().unwrap();
        a.send_frame(&[1, 2, 3]).unwrap();
        assert_eq!(b.recv_frame(), Ok(Some(vec![1, 2, 3])));
        assert_eq!(b.recv_frame(), Ok(None));
    }

    #[test]
    fn oversized_frames_are_rejected() {
        let (mut a, _b) = ChannelLink::pair(4);
        a.go_online().unwrap();
        assert_eq!(
            a.send_frame(&[0; 5]),
            Err(LinkError::FrameTooLarge { len: 5, max: 4 })
        );
    }

    #[test]
    fn dropped_peer_is_reported() {
        let (mut a, b) = ChannelLink::pair(64);
        a.go_online().unwrap();
        drop(b);
        assert_eq!(a.send_frame(&[0]), Err(LinkError::Disconnected));
        assert_eq!(a.recv_frame(), Err(LinkError::Disconnected));
    }
}
