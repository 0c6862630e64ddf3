//! The process: owns a linked [`Unit`], its memory blocks, bound callbacks,
//! and the collection of threads executing against it.

use hashbrown::HashMap;

use crate::block::{BlockFlags, MemoryBlock};
use crate::consts::{DEFAULT_STACK_SIZE, NULL_BLOCK, VM_MAX_JOIN_LOOPS};
use crate::error::{PanicReason, SimpleResult};
use crate::interpreter::Thread;
use crate::unit::Unit;
use crate::value::TaggedValue;

/// A callback bound to an import slot: a host function pointer plus an
/// opaque context value threaded through to every invocation.
pub type CallbackFn = dyn Fn(&mut Process, usize, &[TaggedValue]) -> TaggedValue;

struct Callback {
    func: alloc::boxed::Box<CallbackFn>,
}

impl core::fmt::Debug for Callback {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("Callback(..)")
    }
}

/// A running instance of a [`Unit`]: its memory blocks, bound host
/// callbacks, and threads.
#[derive(Debug, Default)]
pub struct Process {
    unit: Unit,
    blocks: HashMap<i64, MemoryBlock>,
    block_counter: i64,
    callbacks: Vec<Option<Callback>>,
    threads: Vec<Option<Thread>>,
}

impl Process {
    /// A process with no unit loaded yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// The process's linked unit.
    pub fn unit(&self) -> &Unit {
        &self.unit
    }

    /// Installs `unit` as this process's program: releases every
    /// non-static block, installs the unit's static data as fresh
    /// `SOURCE_DATA` blocks, and resizes the callback table to match the
    /// unit's import count.
    pub fn set_unit(&mut self, mut unit: Unit) {
        self.blocks.clear();
        self.block_counter = 1;

        self.callbacks.clear();
        self.callbacks.resize_with(unit.imports().len(), || None);

        let mut new_ids = alloc::vec![0i64; unit.data_block_count()];
        unit.each_data(|index, _id, size, bytes| {
            let new_id = self.unused_block_id();
            let block = MemoryBlock::from_bytes(bytes.to_vec(), BlockFlags::SOURCE_DATA);
            self.blocks.insert(new_id, block);
            new_ids[index] = new_id;
            false
        });
        unit.relocate_static_data(&new_ids);

        self.unit = unit;
    }

    fn unused_block_id(&mut self) -> i64 {
        if self.block_counter == 0 {
            self.block_counter = 1;
        }
        while self.blocks.contains_key(&self.block_counter) || self.block_counter == 0 {
            self.block_counter += 1;
        }
        let id = self.block_counter;
        self.block_counter += 1;
        id
    }

    fn realloc_block_with_flags(&mut self, block_id: i64, size: i64, flags: BlockFlags) -> SimpleResult<i64> {
        let size = usize::try_from(size).map_err(|_| PanicReason::MemoryAccessError)?;

        if block_id != NULL_BLOCK {
            let block = self
                .blocks
                .get_mut(&block_id)
                .ok_or(PanicReason::MemoryAccessError)?;
            if block.is_static() {
                return Err(PanicReason::MemoryPermissionError);
            }
            block.resize(size);
            Ok(block_id)
        } else {
            let id = self.unused_block_id();
            self.blocks.insert(id, MemoryBlock::new(size, flags));
            Ok(id)
        }
    }

    /// Reallocates `block` to `size` bytes (allocating a fresh block if
    /// `block` is the null block), preserving existing contents up to the
    /// smaller of the old and new sizes.
    pub fn realloc_block(&mut self, block: i64, size: i64) -> SimpleResult<i64> {
        self.realloc_block_with_flags(block, size, BlockFlags::READ_WRITE)
    }

    /// Allocates a fresh `size`-byte read/write block.
    pub fn alloc_block(&mut self, size: i64) -> SimpleResult<i64> {
        self.realloc_block(NULL_BLOCK, size)
    }

    /// Frees `block_id`. Fails on the null block or a static block.
    pub fn free_block(&mut self, block_id: i64) -> SimpleResult<()> {
        if block_id == NULL_BLOCK {
            return Err(PanicReason::NullAccessError);
        }
        let block = self.blocks.get(&block_id).ok_or(PanicReason::MemoryAccessError)?;
        if block.is_static() {
            return Err(PanicReason::MemoryPermissionError);
        }
        self.blocks.remove(&block_id);
        Ok(())
    }

    /// The size, in bytes, of `block_id` (`0` for the null block or an
    /// unknown block).
    pub fn block_size(&self, block_id: i64) -> i64 {
        if block_id == NULL_BLOCK {
            return 0;
        }
        self.blocks.get(&block_id).map(|b| b.len() as i64).unwrap_or(0)
    }

    /// Allocates a new read/write block the same size as `block_id`,
    /// copies its contents in, and returns the new block's id. Returns
    /// `0` if `block_id` isn't readable.
    pub fn duplicate_block(&mut self, block_id: i64) -> SimpleResult<i64> {
        let Some(block) = self.blocks.get(&block_id) else {
            return Ok(0);
        };
        if !block.is_readable() {
            return Ok(0);
        }
        let bytes = block.bytes().to_vec();
        let new_id = self.alloc_block(bytes.len() as i64)?;
        if let Some(new_block) = self.blocks.get_mut(&new_id) {
            new_block.bytes_mut().copy_from_slice(&bytes);
        }
        Ok(new_id)
    }

    /// Returns `block_id`'s bytes, checked against `required` permission
    /// flags. The null block always yields `None`.
    pub fn get_block(&self, block_id: i64, required: BlockFlags) -> SimpleResult<Option<&[u8]>> {
        if required.is_empty() {
            return Err(PanicReason::MemoryPermissionError);
        }
        if block_id == NULL_BLOCK {
            return Ok(None);
        }
        let Some(block) = self.blocks.get(&block_id) else {
            return Ok(None);
        };
        if !block.flags().intersects(required) {
            return Err(PanicReason::MemoryPermissionError);
        }
        Ok(Some(block.bytes()))
    }

    /// Returns `block_id`'s bytes mutably, checked against `required`
    /// permission flags. The null block always yields `None`.
    pub fn get_block_mut(&mut self, block_id: i64, required: BlockFlags) -> SimpleResult<Option<&mut [u8]>> {
        if required.is_empty() {
            return Err(PanicReason::MemoryPermissionError);
        }
        if block_id == NULL_BLOCK {
            return Ok(None);
        }
        let Some(block) = self.blocks.get_mut(&block_id) else {
            return Ok(None);
        };
        if !block.flags().intersects(required) {
            return Err(PanicReason::MemoryPermissionError);
        }
        Ok(Some(block.bytes_mut()))
    }

    /// True if `[offset, offset + size)` lies entirely within `block_id`'s
    /// bounds.
    pub fn check_block_bounds(&self, block_id: i64, offset: i64, size: i64) -> bool {
        let bsize = self.block_size(block_id);
        let Some(end) = offset.checked_add(size) else {
            return false;
        };
        offset >= 0 && size >= 0 && size <= bsize && end <= bsize && end >= offset
    }

    /// Looks up a label's address: checks imports first, then exports.
    pub fn find_function_pointer(&self, name: &str) -> Option<i64> {
        self.unit.find_function_pointer(name)
    }

    /// Binds a host callback to the import named `name`, returning the
    /// import's (negative) address on success.
    pub fn bind_callback(
        &mut self,
        name: &str,
        func: impl Fn(&mut Process, usize, &[TaggedValue]) -> TaggedValue + 'static,
    ) -> Option<i64> {
        let key = crate::hash::hash_label(name.as_bytes());
        let address = *self.unit.imports().get(&key)?;
        let slot = usize::try_from(-(address + 1)).ok()?;
        if slot >= self.callbacks.len() {
            return None;
        }
        self.callbacks[slot] = Some(Callback {
            func: alloc::boxed::Box::new(func),
        });
        Some(address)
    }

    fn invoke_callback(&mut self, pointer: i64, args: &[TaggedValue]) -> SimpleResult<TaggedValue> {
        let slot = usize::try_from(-(pointer + 1)).map_err(|_| PanicReason::BadRegister)?;
        // Take the callback out of its slot so `self` is free to pass back
        // into it mutably; put it back once the call returns.
        let callback = self
            .callbacks
            .get_mut(slot)
            .ok_or(PanicReason::BadRegister)?
            .take()
            .ok_or(PanicReason::BadRegister)?;
        let result = (callback.func)(self, slot, args);
        self.callbacks[slot] = Some(callback);
        Ok(result)
    }

    /// Creates a new thread with the given stack size, returning its
    /// index.
    pub fn make_thread(&mut self, stack_size: usize) -> usize {
        self.load_thread(Thread::new(stack_size))
    }

    /// Creates a new thread with the default stack size.
    pub fn make_default_thread(&mut self) -> usize {
        self.make_thread(DEFAULT_STACK_SIZE)
    }

    /// Forks `thread`, returning the new thread's index.
    pub fn fork_thread(&mut self, thread: &Thread) -> usize {
        self.load_thread(thread.fork())
    }

    fn load_thread(&mut self, thread: Thread) -> usize {
        if let Some(slot) = self.threads.iter().position(|t| t.is_none()) {
            self.threads[slot] = Some(thread);
            slot
        } else {
            self.threads.push(Some(thread));
            self.threads.len() - 1
        }
    }

    /// Destroys the thread at `index`, freeing its slot for reuse.
    pub fn destroy_thread(&mut self, index: usize) -> SimpleResult<()> {
        let slot = self.threads.get_mut(index).ok_or(PanicReason::WrongProcess)?;
        *slot = None;
        Ok(())
    }

    /// Borrows the thread at `index`.
    pub fn thread_by_index(&self, index: usize) -> SimpleResult<&Thread> {
        self.threads
            .get(index)
            .and_then(|t| t.as_ref())
            .ok_or(PanicReason::WrongProcess)
    }

    /// Mutably borrows the thread at `index`.
    pub fn thread_by_index_mut(&mut self, index: usize) -> SimpleResult<&mut Thread> {
        self.threads
            .get_mut(index)
            .and_then(|t| t.as_mut())
            .ok_or(PanicReason::WrongProcess)
    }

    /// Runs the thread at `index` from its current instruction pointer
    /// until it traps or returns to the top level. Returns `false` if a
    /// `TRAP` was encountered.
    pub fn run_thread(&mut self, index: usize) -> SimpleResult<bool> {
        crate::interpreter::exec::run(self, index)
    }

    /// Runs the thread at `index` starting at `from_ip`.
    pub fn run_thread_from(&mut self, index: usize, from_ip: i64) -> SimpleResult<bool> {
        self.thread_by_index_mut(index)?.set_ip(from_ip);
        self.run_thread(index)
    }

    /// Calls `pointer` (an export/import address) with `args` already
    /// pushed onto `index`'s stack, running the thread to completion and
    /// returning its `RP` register.
    pub fn call_function(&mut self, index: usize, pointer: i64, args: &[TaggedValue]) -> SimpleResult<TaggedValue> {
        for &arg in args {
            self.thread_by_index_mut(index)?.push(arg);
        }
        crate::interpreter::exec::exec_call(self, index, pointer, args.len() as i64)?;
        if pointer >= 0 {
            let mut loops_remaining = VM_MAX_JOIN_LOOPS;
            while loops_remaining > 0 && !self.run_thread(index)? {
                loops_remaining -= 1;
            }
        }
        Ok(self.thread_by_index(index)?.rp())
    }

    pub(crate) fn invoke_callback_for(&mut self, pointer: i64, args: &[TaggedValue]) -> SimpleResult<TaggedValue> {
        self.invoke_callback(pointer, args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_then_free_roundtrips_block_ids() {
        let mut process = Process::new();
        let id = process.alloc_block(8).unwrap();
        assert_eq!(process.block_size(id), 8);
        process.free_block(id).unwrap();
        assert_eq!(process.block_size(id), 0);
    }

    #[test]
    fn freeing_the_null_block_is_rejected() {
        let mut process = Process::new();
        assert_eq!(process.free_block(NULL_BLOCK), Err(PanicReason::NullAccessError));
    }

    #[test]
    fn duplicate_block_copies_bytes() {
        let mut process = Process::new();
        let id = process.alloc_block(4).unwrap();
        {
            let bytes = process.get_block_mut(id, BlockFlags::WRITABLE).unwrap().unwrap();
            bytes.copy_from_slice(&[1, 2, 3, 4]);
        }
        let dup = process.duplicate_block(id).unwrap();
        assert_ne!(dup, id);
        assert_eq!(process.get_block(dup, BlockFlags::READABLE).unwrap().unwrap(), &[1, 2, 3, 4]);
    }

    #[test]
    fn check_block_bounds_rejects_overflowing_ranges() {
        let mut process = Process::new();
        let id = process.alloc_block(4).unwrap();
        assert!(process.check_block_bounds(id, 0, 4));
        assert!(!process.check_block_bounds(id, 1, 4));
        assert!(!process.check_block_bounds(id, -1, 2));
    }

    #[test]
    fn thread_slots_are_reused_after_destruction() {
        let mut process = Process::new();
        let a = process.make_default_thread();
        process.destroy_thread(a).unwrap();
        let b = process.make_default_thread();
        assert_eq!(a, b);
    }
}
