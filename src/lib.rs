//! `rusalka-vm`: a small register-based bytecode virtual machine with a
//! loader for a custom binary unit format.
//!
//! A host links this crate against native callbacks, loads a compiled
//! [`unit::Unit`] into a [`process::Process`], and calls named entry
//! points. Execution proceeds on one or more cooperative
//! [`interpreter::Thread`]s that share the process's memory blocks and
//! bound callbacks.
//!
//! The crate is organised leaf-first, following the component table in
//! `SPEC_FULL.md` §2:
//!
//! - [`value`] — the tagged value, the 16-byte discriminated number every
//!   register and stack slot holds.
//! - [`hash`] — the stable string hash used as a label-table key.
//! - [`opcode`] — the instruction set: opcode numbering and argument roles.
//! - [`block`] — addressable memory blocks and their permission flags.
//! - [`unit`] — the chunked binary loader and multi-unit linker.
//! - [`process`] — process-wide state: the loaded unit, blocks, callbacks,
//!   threads.
//! - [`interpreter`] — the register+stack thread and its opcode dispatch
//!   loop.
//! - [`binding`] — host-facing name resolution and callback binding.
//! - [`error`] — the fault taxonomy shared by the loader and interpreter.

#![cfg_attr(not(feature = "std"), no_std)]
#![deny(unsafe_code)]
#![deny(unused_must_use)]
#![deny(
    clippy::cast_sign_loss,
    clippy::cast_possible_truncation,
    clippy::cast_possible_wrap
)]

#[doc(hidden)]
pub extern crate alloc;

extern crate core;

pub mod binding;
pub mod block;
pub mod consts;
pub mod error;
pub mod hash;
pub mod interpreter;
pub mod opcode;
pub mod process;
pub mod unit;
pub mod value;

/// Commonly used types, re-exported for a single `use rusalka_vm::prelude::*;`.
pub mod prelude {
    #[doc(no_inline)]
    pub use crate::{
        binding::{bind, resolve, resolve_default, FunctionHandle, ThreadId},
        block::{BlockFlags, MemoryBlock},
        error::{PanicReason, Result, RuntimeError, SimpleResult},
        interpreter::Thread,
        opcode::Opcode,
        process::Process,
        unit::Unit,
        value::{FcmpResult, TaggedValue, ValueType},
    };
}
