//! Memory blocks: the heap-allocated byte ranges a process can `ALLOC`,
//! `FREE`, `PEEK`/`POKE` and reference by a 64-bit id.

use bitflags::bitflags;

bitflags! {
    /// Permission bits attached to a [`MemoryBlock`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BlockFlags: u8 {
        /// The block may be read via `PEEK`/`MEMMOVE`/`MEMDUP` source.
        const READABLE = 0b0000_0001;
        /// The block may be written via `POKE`/`MEMMOVE` destination.
        const WRITABLE = 0b0000_0010;
        /// The block was installed from a unit's static data table rather
        /// than allocated at runtime; `FREE`/`REALLOC` reject it.
        const STATIC   = 0b0000_0100;
    }
}

impl BlockFlags {
    /// Flags assigned to a unit's static data blocks when they're installed
    /// into a process: readable, immutable.
    pub const SOURCE_DATA: BlockFlags = BlockFlags::STATIC.union(BlockFlags::READABLE);

    /// Flags assigned to a freshly `ALLOC`ated block: readable and
    /// writable, not static.
    pub const READ_WRITE: BlockFlags = BlockFlags::READABLE.union(BlockFlags::WRITABLE);
}

/// A single addressable memory block: a byte buffer plus its permission
/// flags. Blocks are referenced by process-assigned id, never by raw
/// pointer or index, so a process's block table can move blocks around
/// freely (e.g. on `REALLOC`) without invalidating already-issued ids.
#[derive(Debug, Clone)]
pub struct MemoryBlock {
    bytes: alloc::vec::Vec<u8>,
    flags: BlockFlags,
}

impl MemoryBlock {
    /// A zeroed block of `size` bytes with `flags`.
    pub fn new(size: usize, flags: BlockFlags) -> Self {
        MemoryBlock {
            bytes: alloc::vec![0u8; size],
            flags,
        }
    }

    /// Wraps existing bytes (e.g. a unit's static data) as a block with
    /// `flags`.
    pub fn from_bytes(bytes: alloc::vec::Vec<u8>, flags: BlockFlags) -> Self {
        MemoryBlock { bytes, flags }
    }

    /// The block's current size in bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// True when the block holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// The block's permission flags.
    pub fn flags(&self) -> BlockFlags {
        self.flags
    }

    /// True if `READABLE` is set.
    pub fn is_readable(&self) -> bool {
        self.flags.contains(BlockFlags::READABLE)
    }

    /// True if `WRITABLE` is set.
    pub fn is_writable(&self) -> bool {
        self.flags.contains(BlockFlags::WRITABLE)
    }

    /// True if `STATIC` is set: the block may not be freed or resized.
    pub fn is_static(&self) -> bool {
        self.flags.contains(BlockFlags::STATIC)
    }

    /// The block's bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// The block's bytes, mutably. Callers are responsible for checking
    /// [`MemoryBlock::is_writable`] first; this does not enforce it.
    pub fn bytes_mut(&mut self) -> &mut alloc::vec::Vec<u8> {
        &mut self.bytes
    }

    /// Resizes the block in place, zero-filling any new bytes.
    pub fn resize(&mut self, new_size: usize) {
        self.bytes.resize(new_size, 0);
    }
}
