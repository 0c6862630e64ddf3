//! Call frames pushed by `DOWNFRAME`/`CALL` and popped by `UPFRAME`/`RETURN`.

use crate::consts::NONVOLATILE_REGISTER_COUNT;
use crate::value::TaggedValue;

/// A saved call frame: the registers `DOWNFRAME` preserves across the call,
/// plus enough of the caller's state to restore it on `UPFRAME`.
#[derive(Debug, Clone)]
pub struct CallFrame {
    /// Instruction to resume at once this frame is left.
    pub from_ip: i64,
    /// Caller's `EBP`.
    pub ebp: i64,
    /// Caller's `ESP`, already adjusted for the callee's argument window.
    pub esp: i64,
    /// The thread's sequence counter at the time this frame was entered;
    /// restored on `UPFRAME` so an outer `run()` loop's termination check
    /// still sees its own call as complete.
    pub sequence: i64,
    /// Snapshot of the nonvolatile registers, restored on `UPFRAME`.
    pub registers: [TaggedValue; NONVOLATILE_REGISTER_COUNT],
}
