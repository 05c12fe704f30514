//! Stream id allocation
//!
//! Each in-flight request occupies one stream id. The manager is also the arena that
//! owns the request: an item lives here from `acquire` until `release`, and `release`
//! is the only way to get it back out.

use crate::protocol::constants::MAX_STREAMS;

const BLOCKS: usize = MAX_STREAMS / 64;

/// Fixed-capacity map from stream id to the pending item
#[derive(Debug)]
pub struct StreamManager<T> {
    used: [u64; BLOCKS],
    items: Vec<Option<T>>,
    available: usize,
}

impl<T> Default for StreamManager<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> StreamManager<T> {
    /// Create a manager with every stream free
    pub fn new() -> Self {
        let mut items = Vec::with_capacity(MAX_STREAMS);
        items.resize_with(MAX_STREAMS, || None);
        Self {
            used: [0; BLOCKS],
            items,
            available: MAX_STREAMS,
        }
    }

    /// Assign the lowest free stream id to `item`
    ///
    /// Hands the item back when every stream is in use.
    pub fn acquire(&mut self, item: T) -> Result<i8, T> {
        for (block_id, block) in self.used.iter_mut().enumerate() {
            if *block != !0 {
                let off = block.trailing_ones() as usize;
                *block |= 1u64 << off;
                let index = block_id * 64 + off;
                self.items[index] = Some(item);
                self.available -= 1;
                return Ok(index as i8);
            }
        }
        Err(item)
    }

    /// Free `stream`, returning the item that held it
    ///
    /// Returns `None` for negative ids and ids that are not in use.
    pub fn release(&mut self, stream: i8) -> Option<T> {
        let index = Self::index(stream)?;
        let item = self.items[index].take()?;
        self.used[index / 64] &= !(1u64 << (index % 64));
        self.available += 1;
        Some(item)
    }

    /// Item holding `stream`
    pub fn get(&self, stream: i8) -> Option<&T> {
        self.items[Self::index(stream)?].as_ref()
    }

    /// Mutable item holding `stream`
    pub fn get_mut(&mut self, stream: i8) -> Option<&mut T> {
        self.items[Self::index(stream)?].as_mut()
    }

    /// Number of free stream ids
    pub fn available_streams(&self) -> usize {
        self.available
    }

    /// Number of stream ids in use
    pub fn in_use(&self) -> usize {
        MAX_STREAMS - self.available
    }

    /// Ids currently in use, lowest first
    pub fn streams_in_use(&self) -> Vec<i8> {
        self.items
            .iter()
            .enumerate()
            .filter(|(_, item)| item.is_some())
            .map(|(index, _)| index as i8)
            .collect()
    }

    fn index(stream: i8) -> Option<usize> {
        if stream < 0 {
            None
        } else {
            Some(stream as usize)
        }
    }
}
