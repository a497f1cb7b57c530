use std::sync::Arc;

use parking_lot::Mutex;

use crate::{CacheError, CacheResult};

// ---

/// A locator for bytes handed to a [`Serializer`].
///
/// The serializer only owns allocation granularity; every cacheable defines
/// its own (little-endian) byte layout within its allocation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Allocation {
    pub chunk_index: u32,
    pub offset: u32,
    pub len: u32,
}

/// Where cacheables store their serialized form.
pub trait Serializer: Send + Sync {
    /// Append `bytes`, receiving back a locator for them.
    fn store(&self, bytes: &[u8]) -> Allocation;
}

/// Where cacheables re-load their serialized form from.
pub trait Deserializer: Send + Sync {
    fn load(&self, allocation: Allocation) -> CacheResult<ArenaSlice>;
}

/// Both halves at once; what builders thread through to factories.
pub trait Arena: Serializer + Deserializer {}

impl<T: Serializer + Deserializer> Arena for T {}

/// A borrowed-like view into serialized bytes.
///
/// Holds the owning chunk alive; cloning is cheap and loading never copies.
#[derive(Clone)]
pub struct ArenaSlice {
    buffer: Arc<Vec<u8>>,
    offset: usize,
    len: usize,
}

impl std::ops::Deref for ArenaSlice {
    type Target = [u8];

    #[inline]
    fn deref(&self) -> &[u8] {
        &self.buffer[self.offset..self.offset + self.len]
    }
}

impl AsRef<[u8]> for ArenaSlice {
    #[inline]
    fn as_ref(&self) -> &[u8] {
        self
    }
}

// ---

/// The in-memory serializer: an append-only arena of variable-size chunks.
///
/// A disk serializer substitutes an append-only file behind the same
/// [`Allocation`] handle; nothing in the cache or in any cacheable layout
/// changes.
pub struct MemorySerializer {
    /// Soft chunk size: a `store` that doesn't fit starts a new chunk; a
    /// single oversized `store` gets a chunk of its own.
    chunk_size: usize,
    state: Mutex<ArenaState>,
}

#[derive(Default)]
struct ArenaState {
    frozen: Vec<Arc<Vec<u8>>>,
    current: Vec<u8>,
}

impl Default for MemorySerializer {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CHUNK_SIZE)
    }
}

impl MemorySerializer {
    pub const DEFAULT_CHUNK_SIZE: usize = 8 * 1024 * 1024;

    pub fn new(chunk_size: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            state: Mutex::new(ArenaState::default()),
        }
    }

    /// Total bytes stored so far, across all chunks.
    pub fn total_bytes(&self) -> u64 {
        let state = self.state.lock();
        let frozen: usize = state.frozen.iter().map(|chunk| chunk.len()).sum();
        (frozen + state.current.len()) as u64
    }
}

impl ArenaState {
    fn freeze_current(&mut self) {
        if !self.current.is_empty() {
            self.frozen.push(Arc::new(std::mem::take(&mut self.current)));
        }
    }
}

impl Serializer for MemorySerializer {
    fn store(&self, bytes: &[u8]) -> Allocation {
        let mut state = self.state.lock();

        if !state.current.is_empty() && state.current.len() + bytes.len() > self.chunk_size {
            state.freeze_current();
        }

        let chunk_index = state.frozen.len() as u32;
        let offset = state.current.len() as u32;
        state.current.extend_from_slice(bytes);

        Allocation {
            chunk_index,
            offset,
            len: bytes.len() as u32,
        }
    }
}

impl Deserializer for MemorySerializer {
    fn load(&self, allocation: Allocation) -> CacheResult<ArenaSlice> {
        let mut state = self.state.lock();

        // Loading from the chunk still being appended to freezes it; stores
        // just keep going in a fresh one.
        if allocation.chunk_index as usize == state.frozen.len() {
            state.freeze_current();
        }

        let buffer = state
            .frozen
            .get(allocation.chunk_index as usize)
            .ok_or_else(|| {
                CacheError::SerializerIo(format!(
                    "chunk {} does not exist (have {})",
                    allocation.chunk_index,
                    state.frozen.len()
                ))
            })?
            .clone();

        let offset = allocation.offset as usize;
        let len = allocation.len as usize;
        if offset + len > buffer.len() {
            return Err(CacheError::SerializerIo(format!(
                "allocation {allocation:?} out of bounds of its chunk ({} bytes)",
                buffer.len()
            )));
        }

        Ok(ArenaSlice {
            buffer,
            offset,
            len,
        })
    }
}

// ---
