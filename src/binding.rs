//! Name-to-pointer resolution and callback binding: the thin host-facing
//! layer over [`crate::process::Process`] that lets a host bind named
//! callbacks and obtain reusable handles to named functions, without
//! re-hashing a label or re-threading a thread index through every call
//! site.

use crate::consts::DEFAULT_STACK_SIZE;
use crate::error::{PanicReason, SimpleResult};
use crate::process::Process;
use crate::value::TaggedValue;

/// A thread index within a [`Process`]. Newtype over `usize` so host code
/// can't accidentally pass a block or callback index where a thread index
/// is expected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ThreadId(pub usize);

impl From<usize> for ThreadId {
    fn from(index: usize) -> Self {
        ThreadId(index)
    }
}

impl From<ThreadId> for usize {
    fn from(id: ThreadId) -> Self {
        id.0
    }
}

/// A resolved, callable function: a function pointer (export or import
/// address) bound to the thread that will run it. Obtained from
/// [`resolve`]; call repeatedly with [`FunctionHandle::call`] without
/// re-resolving the name each time.
///
/// Mirrors the teacher's pattern of a small `Copy` handle type standing in
/// for a (contract, pointer) pair that's otherwise awkward to thread
/// through call sites one field at a time.
#[derive(Debug, Clone, Copy)]
pub struct FunctionHandle {
    thread: ThreadId,
    pointer: i64,
}

impl FunctionHandle {
    /// The underlying function pointer (non-negative for an export,
    /// negative for an import/callback).
    pub const fn pointer(&self) -> i64 {
        self.pointer
    }

    /// The thread this handle will run on.
    pub const fn thread(&self) -> ThreadId {
        self.thread
    }

    /// Invokes the bound function with `args`, running it to completion
    /// and returning its `RP` register.
    pub fn call(&self, process: &mut Process, args: &[TaggedValue]) -> SimpleResult<TaggedValue> {
        process.call_function(self.thread.0, self.pointer, args)
    }
}

/// Resolves `name` against `process`'s loaded unit and binds it to a fresh
/// thread of `stack_size`, yielding a reusable [`FunctionHandle`]. Fails if
/// the name isn't a known import or export.
pub fn resolve(process: &mut Process, name: &str, stack_size: usize) -> SimpleResult<FunctionHandle> {
    let pointer = process
        .find_function_pointer(name)
        .ok_or(PanicReason::BadUnit)?;
    let thread = ThreadId(process.make_thread(stack_size));
    Ok(FunctionHandle { thread, pointer })
}

/// [`resolve`] with [`DEFAULT_STACK_SIZE`].
pub fn resolve_default(process: &mut Process, name: &str) -> SimpleResult<FunctionHandle> {
    resolve(process, name, DEFAULT_STACK_SIZE)
}

/// Binds a host callback function to the import named `name`. Returns the
/// import's negative pointer on success, or `None` if `name` isn't a known
/// import in the process's loaded unit.
///
/// Thin wrapper over [`Process::bind_callback`] — kept here, not on
/// `Process`, so the "resolve a name, then act on it" idiom lives in one
/// place for both callbacks and callable exports/imports.
pub fn bind(
    process: &mut Process,
    name: &str,
    callback: impl Fn(&mut Process, usize, &[TaggedValue]) -> TaggedValue + 'static,
) -> Option<i64> {
    process.bind_callback(name, callback)
}
