//! The Ethernet controller as seen by the bridge loops.
//!
//! Received frames stay in the controller's buffer until [`EthernetController::finish_receive`]
//! releases them, so a frame can be read in pieces, rewound and read again. This is what lets the
//! PLIP downlink stream most of a frame straight from the chip.

use std::collections::VecDeque;

use plipbox_proto::eth::MAX_FRAME_SIZE;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EthError {
    #[error("frame of {len} bytes exceeds controller maximum of {max}")]
    FrameTooLarge { len: usize, max: usize },

    #[error("ethernet link is down")]
    LinkDown,

    #[error("controller fault: {0}")]
    Hardware(String),
}

pub trait EthernetController {
    /// Size of the oldest received frame, if one is waiting.
    fn frame_available(&mut self) -> Option<u16>;

    /// Next byte of the current frame. Reading past the end yields zeroes.
    fn receive_byte(&mut self) -> u8;

    fn receive_into(&mut self, buf: &mut [u8]) {
        for b in buf {
            *b = self.receive_byte();
        }
    }

    /// Move the read pointer of the current frame to `offset`.
    fn rewind_receive(&mut self, offset: u16);

    /// Release the current frame.
    fn finish_receive(&mut self);

    fn transmit(&mut self, frame: &[u8]) -> Result<(), EthError>;
}

impl<T: EthernetController + ?Sized> EthernetController for &mut T {
    fn frame_available(&mut self) -> Option<u16> {
        <T as EthernetController>::frame_available(&mut **self)
    }

    fn receive_byte(&mut self) -> u8 {
        <T as EthernetController>::receive_byte(&mut **self)
    }

    fn receive_into(&mut self, buf: &mut [u8]) {
        <T as EthernetController>::receive_into(&mut **self, buf)
    }

    fn rewind_receive(&mut self, offset: u16) {
        <T as EthernetController>::rewind_receive(&mut **self, offset)
    }

    fn finish_receive(&mut self) {
        <T as EthernetController>::finish_receive(&mut **self)
    }

    fn transmit(&mut self, frame: &[u8]) -> Result<(), EthError> {
        <T as EthernetController>::transmit(&mut **self, frame)
    }
}

impl<T: EthernetController + ?Sized> EthernetController for Box<T> {
    fn frame_available(&mut self) -> Option<u16> {
        <T as EthernetController>::frame_available(&mut **self)
    }

    fn receive_byte(&mut self) -> u8 {
        <T as EthernetController>::receive_byte(&mut **self)
    }

    fn receive_into(&mut self, buf: &mut [u8]) {
        <T as EthernetController>::receive_into(&mut **self, buf)
    }

    fn rewind_receive(&mut self, offset: u16) {
        <T as EthernetController>::rewind_receive(&mut **self, offset)
    }

    fn finish_receive(&mut self) {
        <T as EthernetController>::finish_receive(&mut **self)
    }

    fn transmit(&mut self, frame: &[u8]) -> Result<(), EthError> {
        <T as EthernetController>::transmit(&mut **self, frame)
    }
}

/// Controller backed by in-memory queues.
#[derive(Debug, Clone)]
pub struct MemoryController {
    rx: VecDeque<Vec<u8>>,
    cursor: usize,
    tx: Vec<Vec<u8>>,
    max_frame: usize,
    link_up: bool,
}

impl Default for MemoryController {
    fn default() -> Self {
        Self::new(MAX_FRAME_SIZE)
    }
}

impl MemoryController {
    pub fn new(max_frame: usize) -> Self {
        Self {
            rx: VecDeque::new(),
            cursor: 0,
            tx: Vec::new(),
            max_frame,
            link_up: true,
        }
    }

    /// Queue a frame as if it arrived from the network.
    pub fn inject(&mut self, frame: Vec<u8>) {
        self.rx.push_back(frame);
    }

    pub fn pending_rx(&self) -> usize {
        self.rx.len()
    }

    pub fn transmitted(&self) -> &[Vec<u8>] {
        &self.tx
    }

    pub fn take_transmitted(&mut self) -> Vec<Vec<u8>> {
        std::mem::take(&mut self.tx)
    }

    pub fn set_link_up(&mut self, up: bool) {
        self.link_up = up;
    }

    /// Read offset within the current frame.
    pub fn cursor(&self) -> usize {
        self.cursor
    }
}

impl EthernetController for MemoryController {
    fn frame_available(&mut self) -> Option<u16> {
        self.rx.front().map(|frame| frame.len() as u16)
    }

    fn receive_byte(&mut self) -> u8 {
        let byte = self
            .rx
            .front()
            .and_then(|frame| frame.get(self.cursor))
            .copied()
            .unwrap_or(0);
        self.cursor += 1;
        byte
    }

    fn rewind_receive(&mut self, offset: u16) {
        self.cursor = offset as usize;
    }

    fn finish_receive(&mut self) {
        self.rx.pop_front();
        self.cursor = 0;
    }

    fn transmit(&mut self, frame: &[u8]) -> Result<(), EthError> {
        if !self.link_up {
            return Err(EthError::LinkDown);
        }
        if frame.len() > self.max_frame {
            return Err(EthError::FrameTooLarge {
                len: frame.len(),
                max: self.max_frame,
            });
        }
        self.tx.push(frame.to_vec());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_can_be_reread_until_released() {
        let mut eth = MemoryController::default();
        eth.inject(vec![1, 2, 3, 4]);
        eth.inject(vec![9]);
        assert_eq!(eth.frame_available(), Some(4));

        let mut head = [0u8; 2];
        eth.receive_into(&mut head);
        assert_eq!(head, [1, 2]);
        eth.rewind_receive(1);
        assert_eq!(eth.receive_byte(), 2);
        assert_eq!(eth.receive_byte(), 3);
        assert_eq!(eth.receive_byte(), 4);
        assert_eq!(eth.receive_byte(), 0);

        eth.finish_receive();
        assert_eq!(eth.frame_available(), Some(1));
        assert_eq!(eth.receive_byte(), 9);
        eth.finish_receive();
        assert_eq!(eth.frame_available(), None);
    }

    #[test]
    fn transmit_respects_link_and_size() {
        let mut eth = MemoryController::new(8);
        eth.transmit(&[0; 8]).unwrap();
        assert_eq!(
            eth.transmit(&[0; 9]),
            Err(EthError::FrameTooLarge { len: 9, max: 8 })
        );
        eth.set_link_up(false);
        assert_eq!(eth.transmit(&[0; 4]), Err(EthError::LinkDown));
        assert_eq!(eth.transmitted().len(), 1);
    }
}
