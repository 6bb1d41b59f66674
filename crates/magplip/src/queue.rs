//! Pending request lists.
//!
//! Each list has its own lock so that clients queueing reads never wait for a client queueing
//! writes, and the server task only holds one lock at a time.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

use crate::request::{IoRequest, RequestId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueKind {
    Write,
    Read,
    Event,
    Orphan,
}

impl QueueKind {
    /// Order in which `abort_io` searches the queues.
    pub const ABORT_ORDER: [QueueKind; 4] = [
        QueueKind::Write,
        QueueKind::Read,
        QueueKind::Event,
        QueueKind::Orphan,
    ];
}

#[derive(Debug, Default)]
pub struct RequestQueue {
    inner: Mutex<VecDeque<IoRequest>>,
}

impl RequestQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<IoRequest>> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn push(&self, req: IoRequest) {
        self.lock().push_back(req);
    }

    pub fn pop_front(&self) -> Option<IoRequest> {
        self.lock().pop_front()
    }

    /// Remove the first request for which `pred` holds.
    pub fn take_first(&self, mut pred: impl FnMut(&IoRequest) -> bool) -> Option<IoRequest> {
        let mut queue = self.lock();
        let idx = queue.iter().position(|req| pred(req))?;
        queue.remove(idx)
    }

    pub fn remove(&self, id: RequestId) -> Option<IoRequest> {
        self.take_first(|req| req.id() == id)
    }

    pub fn contains(&self, id: RequestId) -> bool {
        self.lock().iter().any(|req| req.id() == id)
    }

    pub fn drain(&self) -> Vec<IoRequest> {
        self.lock().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

#[derive(Debug, Default)]
pub struct RequestQueues {
    pub read: RequestQueue,
    pub write: RequestQueue,
    pub event: RequestQueue,
    pub orphan: RequestQueue,
}

impl RequestQueues {
    pub fn get(&self, kind: QueueKind) -> &RequestQueue {
        match kind {
            QueueKind::Write => &self.write,
            QueueKind::Read => &self.read,
            QueueKind::Event => &self.event,
            QueueKind::Orphan => &self.orphan,
        }
    }

    /// Remove `id` from the first queue (in abort order) that holds it.
    pub fn remove(&self, id: RequestId) -> Option<(QueueKind, IoRequest)> {
        QueueKind::ABORT_ORDER
            .into_iter()
            .find_map(|kind| self.get(kind).remove(id).map(|req| (kind, req)))
    }

    /// Empty every queue, in abort order.
    pub fn drain_all(&self) -> Vec<IoRequest> {
        QueueKind::ABORT_ORDER
            .into_iter()
            .flat_map(|kind| self.get(kind).drain())
            .collect()
    }

    pub fn total_len(&self) -> usize {
        QueueKind::ABORT_ORDER
            .into_iter()
            .map(|kind| self.get(kind).len())
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sana2::Command;

    #[test]
    fn fifo_order_is_kept() {
        let q = RequestQueue::new();
        let a = IoRequest::new(Command::Read);
        let b = IoRequest::new(Command::Read);
        let (ida, idb) = (a.id(), b.id());
        q.push(a);
        q.push(b);
        assert_eq!(q.pop_front().map(|r| r.id()), Some(ida));
        assert_eq!(q.pop_front().map(|r| r.id()), Some(idb));
        assert!(q.pop_front().is_none());
    }

    #[test]
    fn take_first_skips_non_matching() {
        let q = RequestQueue::new();
        let mut arp = IoRequest::new(Command::Read);
        arp.packet_type = 0x0806;
        let mut ip = IoRequest::new(Command::Read);
        ip.packet_type = 0x0800;
        let ip_id = ip.id();
        q.push(arp);
        q.push(ip);

        let hit = q.take_first(|r| r.packet_type == 0x0800).unwrap();
        assert_eq!(hit.id(), ip_id);
        assert_eq!(q.len(), 1);
        assert!(q.take_first(|r| r.packet_type == 0x86dd).is_none());
    }

    #[test]
    fn removal_happens_exactly_once_for_every_queue() {
        for kind in QueueKind::ABORT_ORDER {
            let queues = RequestQueues::default();
            let req = IoRequest::new(Command::Read);
            let id = req.id();
            queues.get(kind).push(req);

            let (found, req) = queues.remove(id).unwrap();
            assert_eq!(found, kind);
            assert_eq!(req.id(), id);
            assert!(queues.remove(id).is_none());
            assert_eq!(queues.total_len(), 0);
        }
    }

    #[test]
    fn drain_all_follows_abort_order() {
        let queues = RequestQueues::default();
        let mut expected = Vec::new();
        for kind in QueueKind::ABORT_ORDER.into_iter().rev() {
            let req = IoRequest::new(Command::Read);
            expected.push((kind, req.id()));
            queues.get(kind).push(req);
        }
        expected.reverse();

        let ids: Vec<_> = queues.drain_all().into_iter().map(|r| r.id()).collect();
        assert_eq!(ids, expected.into_iter().map(|(_, id)| id).collect::<Vec<_>>());
        assert_eq!(queues.total_len(), 0);
    }
}
