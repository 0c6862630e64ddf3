//! Relocation maps threaded through the linking steps in
//! [`super::Unit::read`].
//!
//! A relocation map is keyed by the *old* address a label or data block had
//! in the incoming unit and maps to its *new* address after merging into
//! the accumulating unit. Maps are built incrementally (imports, then
//! exports, then data) and consumed by the relocation-table passes that
//! follow each table.

use hashbrown::HashMap;

/// `old address -> new address`, built while reading imports/exports/data
/// and consumed while rewriting label/extern/data relocation tables.
pub type RelocationMap = HashMap<i64, i64>;

/// An extern's resolution state, keyed by the extern's old in-file index.
#[derive(Debug, Clone, Copy)]
pub struct ExternRelocation {
    /// The address to rewrite matching arguments to.
    pub pointer: i64,
    /// Whether `pointer` is a confirmed export address (`true`) or itself
    /// another extern awaiting resolution (`false`).
    pub resolved: bool,
}

/// `old extern index -> resolution`, built while reading the extern table.
pub type ExternRelocationMap = HashMap<i64, ExternRelocation>;
