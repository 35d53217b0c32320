use std::collections::VecDeque;
use std::fmt;
use std::sync::Mutex;

use crate::wire::codec::MAX_FRAME_SIZE_BYTES;

/// One queued message: the raw bytes of a writer frame, terminator included.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Payload {
    bytes: [u8; MAX_FRAME_SIZE_BYTES],
    len: usize,
}

#[derive(Debug, PartialEq, Eq)]
pub struct PayloadTooLarge {
    pub size: usize,
}

impl fmt::Display for PayloadTooLarge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "payload of {} bytes exceeds the {MAX_FRAME_SIZE_BYTES} byte limit",
            self.size
        )
    }
}

impl std::error::Error for PayloadTooLarge {}

impl Payload {
    pub fn new(source: &[u8]) -> Result<Self, PayloadTooLarge> {
        if source.len() > MAX_FRAME_SIZE_BYTES {
            return Err(PayloadTooLarge { size: source.len() });
        }

        let mut bytes = [0_u8; MAX_FRAME_SIZE_BYTES];
        bytes[..source.len()].copy_from_slice(source);
        Ok(Self {
            bytes,
            len: source.len(),
        })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len]
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Payload").field(&self.as_bytes()).finish()
    }
}

/// Bounded FIFO shared by every worker. Full means drop, never wait, never overwrite.
#[derive(Debug)]
pub struct SignalQueue {
    capacity: usize,
    entries: Mutex<VecDeque<Payload>>,
}

impl SignalQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Appends at the tail. Returns `false` when the queue is at capacity.
    pub fn try_push(&self, payload: Payload) -> bool {
        let mut entries = self.entries.lock().expect("signal queue lock poisoned");
        if entries.len() >= self.capacity {
            return false;
        }
        entries.push_back(payload);
        true
    }

    pub fn try_pop(&self) -> Option<Payload> {
        self.entries
            .lock()
            .expect("signal queue lock poisoned")
            .pop_front()
    }

    pub fn size(&self) -> usize {
        self.entries.lock().expect("signal queue lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Empties the queue, returning how many payloads were never delivered.
    pub fn drain(&self) -> usize {
        let mut entries = self.entries.lock().expect("signal queue lock poisoned");
        let undelivered = entries.len();
        entries.clear();
        undelivered
    }
}
