//! Runtime and loader error types.
//!
//! The taxonomy mirrors the two fault families the original implementation
//! distinguishes: malformed units / opcodes (`Runtime`) and well-formed but
//! illegal state transitions encountered mid-execution (`Logic`). Both are
//! folded into a single [`PanicReason`] enum so the interpreter's dispatch
//! loop has one error type to propagate with `?`.

use derive_more::Display;

/// The reason a unit load or an instruction's execution was aborted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum PanicReason {
    // --- Runtime: malformed units / bytecode ---
    /// An opcode value outside the recognised instruction set.
    #[display(fmt = "encountered an unrecognised opcode")]
    BadOpcode,
    /// The unit is internally inconsistent (missing required chunk, bad
    /// offset table, truncated table).
    #[display(fmt = "unit is malformed or inconsistent")]
    BadUnit,
    /// The underlying byte stream failed to produce the bytes a chunk
    /// declared it would contain.
    #[display(fmt = "I/O error while reading a unit")]
    UnitIoError,
    /// The unit declares a format version below [`crate::consts::MIN_UNIT_VERSION`].
    #[display(fmt = "unsupported unit format version")]
    UnsupportedUnitVersion,

    // --- Logic: illegal state transitions during execution ---
    /// A register index was out of range, or a negative stack-relative
    /// index resolved below zero.
    #[display(fmt = "invalid register index")]
    BadRegister,
    /// `JUMP`/`CALL` target coerced to `UNDEFINED` or `ERROR`.
    #[display(fmt = "invalid instruction pointer")]
    InvalidInstructionPointer,
    /// `POP` (or an internal pop) was attempted with `ESP == EBP`, or the
    /// stack was otherwise empty.
    #[display(fmt = "stack underflow")]
    StackUnderflow,
    /// A stack index below zero was addressed directly.
    #[display(fmt = "invalid stack access")]
    StackAccessError,
    /// A `PEEK`/`POKE`/`MEMMOVE`/`MEMDUP` offset and size fell outside a
    /// block's bounds.
    #[display(fmt = "memory access out of bounds")]
    MemoryAccessError,
    /// A block was addressed without the permission flags the operation
    /// requires (specialises [`PanicReason::MemoryAccessError`]).
    #[display(fmt = "insufficient permissions for memory access")]
    MemoryPermissionError,
    /// The null block (id `0`) was used where a live block is required
    /// (specialises [`PanicReason::MemoryAccessError`]).
    #[display(fmt = "attempt to access the null block")]
    NullAccessError,
    /// `CALL`'s argument count coerced to a non-integer, was negative, or
    /// exceeded the number of values currently on the stack.
    #[display(fmt = "invalid argument count")]
    InvalidArgumentCount,
    /// A thread was forked or joined against a process that doesn't own it.
    #[display(fmt = "thread does not belong to this process")]
    WrongProcess,
}

impl PanicReason {
    /// True for the unit-loading family of faults; false for faults raised
    /// mid-execution by the interpreter.
    pub fn is_loader_fault(self) -> bool {
        matches!(
            self,
            PanicReason::BadUnit
                | PanicReason::UnitIoError
                | PanicReason::UnsupportedUnitVersion
        )
    }
}

impl std::error::Error for PanicReason {}

/// Top-level error returned by fallible VM operations.
///
/// Distinguishes a well-formed [`PanicReason`] (the VM's own cooperative
/// fault signal) from an I/O error surfaced while reading a unit from an
/// arbitrary byte source.
#[derive(Debug, Display)]
pub enum RuntimeError {
    /// A tagged panic reason raised by the loader or the interpreter.
    #[display(fmt = "{_0}")]
    Panic(PanicReason),
    /// An I/O error from the reader passed to [`crate::unit::Unit::read`].
    #[display(fmt = "I/O error: {_0}")]
    Io(std::io::Error),
}

impl From<PanicReason> for RuntimeError {
    fn from(reason: PanicReason) -> Self {
        RuntimeError::Panic(reason)
    }
}

impl From<std::io::Error> for RuntimeError {
    fn from(err: std::io::Error) -> Self {
        RuntimeError::Io(err)
    }
}

impl std::error::Error for RuntimeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RuntimeError::Panic(reason) => Some(reason),
            RuntimeError::Io(err) => Some(err),
        }
    }
}

impl PartialEq for RuntimeError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (RuntimeError::Panic(a), RuntimeError::Panic(b)) => a == b,
            (RuntimeError::Io(a), RuntimeError::Io(b)) => a.kind() == b.kind(),
            _ => false,
        }
    }
}

/// Convenience alias for results that fail with a [`RuntimeError`].
pub type Result<T> = core::result::Result<T, RuntimeError>;

/// Convenience alias for results that fail with a bare [`PanicReason`] —
/// used internally by the interpreter, where I/O is never in play.
pub type SimpleResult<T> = core::result::Result<T, PanicReason>;
