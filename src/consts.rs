//! VM tunables shared across the loader, process state and interpreter.

/// Total number of addressable registers in a thread's register file.
pub const REGISTER_COUNT: usize = 256;

/// `IP` — the instruction pointer.
pub const R_IP: usize = 0;
/// `EBP` — base of the current call's stack window.
pub const R_EBP: usize = 1;
/// `ESP` — top of the current call's stack window.
pub const R_ESP: usize = 2;
/// `RP` — return value register, written by `CALL`-into-callback and read
/// by the host after a top-level call returns.
pub const R_RP: usize = 3;

/// Number of registers following the reserved four that are preserved
/// across a `CALL`/`RETURN` pair (saved into the call frame).
pub const NONVOLATILE_REGISTER_COUNT: usize = 8;

/// First nonvolatile register index.
pub const R_FIRST_NONVOLATILE: usize = 4;

/// Default stack size, in values, for a thread created without an explicit
/// size.
pub const DEFAULT_STACK_SIZE: usize = 8192;

/// Upper bound on `JOIN`'s retry loop: the number of times a joined
/// thread's `run` is invoked before giving up and returning its `RP` as-is.
pub const VM_MAX_JOIN_LOOPS: u32 = 4;

/// Minimum unit format version this loader accepts.
pub const MIN_UNIT_VERSION: i32 = 8;

/// Maximum unit format version this loader accepts. The loader only knows
/// how to decode the v8 (`double`) and v9 (`type_tag` + `bits`) value
/// encodings; a unit declaring anything higher is rejected before any
/// chunk is read, rather than failing partway through `INST` decoding.
pub const MAX_UNIT_VERSION: i32 = 9;

/// Default epsilon used by [`crate::value::TaggedValue::fcmp`].
pub const DEFAULT_FCMP_EPSILON: f64 = 1.0e-17;

/// Default 64-bit seed for [`crate::hash::hash64`].
pub const DEFAULT_HASH_SEED_64: u64 = 0x9E2030F1_9E2030F1;

/// Null memory block handle. Never present in the process's block table.
pub const NULL_BLOCK: i64 = 0;

static_assertions::const_assert!(R_FIRST_NONVOLATILE + NONVOLATILE_REGISTER_COUNT <= REGISTER_COUNT);
static_assertions::const_assert!(VM_MAX_JOIN_LOOPS > 0);
