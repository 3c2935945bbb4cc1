//! Directory pages: fixed runs of packet slots for one incoming message.
//!
//! A page covers sequence numbers `[index * capacity, (index + 1) * capacity)`.
//! Each slot is explicitly `Empty`, `Filled` (stored, MAC not yet checked) or
//! `Verified` (unread bytes released for reading).

use crate::core::packet::MacBlock;
use crate::error::Result;
use bytes::Bytes;

/// Payload of one received packet with the MAC data needed to check it later.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    pub payload: Bytes,
    pub mac: Option<MacBlock>,
}

impl Fragment {
    pub fn new(payload: Bytes, mac: Option<MacBlock>) -> Self {
        Self { payload, mac }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Slot {
    #[default]
    Empty,
    Filled(Fragment),
    /// Unread remainder of a verified payload.
    Verified(Bytes),
}

impl Slot {
    pub fn is_empty(&self) -> bool {
        matches!(self, Slot::Empty)
    }

    /// Bytes held, read or not yet verified.
    pub fn len(&self) -> usize {
        match self {
            Slot::Empty => 0,
            Slot::Filled(fragment) => fragment.payload.len(),
            Slot::Verified(bytes) => bytes.len(),
        }
    }
}

#[derive(Debug)]
pub struct DirectoryPage {
    index: usize,
    slots: Vec<Slot>,
}

impl DirectoryPage {
    /// Allocate page `index` with `capacity` empty slots.
    pub fn new(index: usize, capacity: usize) -> Result<Self> {
        let mut slots = Vec::new();
        slots.try_reserve_exact(capacity)?;
        slots.resize_with(capacity, Slot::default);
        Ok(Self { index, slots })
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Sequence number held by slot 0.
    pub fn first_seq(&self) -> usize {
        self.index * self.slots.len()
    }

    pub fn slot(&self, offset: usize) -> &Slot {
        &self.slots[offset]
    }

    pub(crate) fn slot_mut(&mut self, offset: usize) -> &mut Slot {
        &mut self.slots[offset]
    }

    /// Store `fragment` at `offset`. Returns `false`, leaving the slot
    /// untouched, if it is already occupied.
    pub fn insert(&mut self, offset: usize, fragment: Fragment) -> bool {
        let slot = &mut self.slots[offset];
        if !slot.is_empty() {
            return false;
        }
        *slot = Slot::Filled(fragment);
        true
    }

    pub fn occupied(&self) -> usize {
        self.slots.iter().filter(|s| !s.is_empty()).count()
    }

    /// Bytes still held by this page.
    pub fn buffered_bytes(&self) -> usize {
        self.slots.iter().map(Slot::len).sum()
    }

    pub fn is_drained(&self) -> bool {
        self.slots.iter().all(Slot::is_empty)
    }
}
