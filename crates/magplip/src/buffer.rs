//! Per-opener buffer management.
//!
//! Each opener hands the driver a pair of copy functions that move packet data between the
//! driver's frame buffer and the opener's own request data. Either may be absent: an opener that
//! only reads statistics supplies neither.

use std::fmt;
use std::sync::Arc;

/// Copy a received payload into the request's data. Returns `false` if the opener could not
/// accept it.
pub type CopyToBuff = Arc<dyn Fn(&mut Vec<u8>, &[u8]) -> bool + Send + Sync>;

/// Copy the request's data into the outgoing frame. The destination is exactly as long as the
/// request's data length.
pub type CopyFromBuff = Arc<dyn Fn(&mut [u8], &[u8]) -> bool + Send + Sync>;

/// The tag list passed to `open` (`S2_CopyToBuff`, `S2_CopyFromBuff`).
#[derive(Clone, Default)]
pub struct BufferTags {
    pub copy_to_buff: Option<CopyToBuff>,
    pub copy_from_buff: Option<CopyFromBuff>,
}

impl BufferTags {
    /// Tags for an opener that only queries statistics.
    pub fn none() -> Self {
        Self::default()
    }

    /// Plain byte copies in both directions.
    pub fn copying() -> Self {
        Self {
            copy_to_buff: Some(Arc::new(|dst: &mut Vec<u8>, src: &[u8]| {
                dst.clear();
                dst.extend_from_slice(src);
                true
            })),
            copy_from_buff: Some(Arc::new(|dst: &mut [u8], src: &[u8]| {
                if dst.len() != src.len() {
                    return false;
                }
                dst.copy_from_slice(src);
                true
            })),
        }
    }
}

impl fmt::Debug for BufferTags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferTags")
            .field("copy_to_buff", &self.copy_to_buff.is_some())
            .field("copy_from_buff", &self.copy_from_buff.is_some())
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(pub(crate) u32);

impl BufferId {
    pub fn get(self) -> u32 {
        self.0
    }
}

/// Buffer management record of one open instance. Lives in the device's open list until the
/// opener closes.
pub struct BufferManagement {
    id: BufferId,
    tags: BufferTags,
}

impl BufferManagement {
    pub(crate) fn new(id: BufferId, tags: BufferTags) -> Self {
        Self { id, tags }
    }

    pub fn id(&self) -> BufferId {
        self.id
    }

    pub fn can_receive(&self) -> bool {
        self.tags.copy_to_buff.is_some()
    }

    pub fn can_send(&self) -> bool {
        self.tags.copy_from_buff.is_some()
    }

    pub(crate) fn copy_to_buff(&self, dst: &mut Vec<u8>, src: &[u8]) -> bool {
        match &self.tags.copy_to_buff {
            Some(copy) => copy(dst, src),
            None => false,
        }
    }

    pub(crate) fn copy_from_buff(&self, dst: &mut [u8], src: &[u8]) -> bool {
        match &self.tags.copy_from_buff {
            Some(copy) => copy(dst, src),
            None => false,
        }
    }
}

impl fmt::Debug for BufferManagement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferManagement")
            .field("id", &self.id)
            .field("tags", &self.tags)
            .finish()
    }
}
