//! The register-and-stack execution engine: [`Thread`] holds one thread's
//! registers, stack, and call-frame chain; dispatch of individual opcodes
//! against a [`crate::process::Process`] lives in [`exec`].

pub mod exec;
pub mod frame;

use crate::consts::{NONVOLATILE_REGISTER_COUNT, R_EBP, R_ESP, R_FIRST_NONVOLATILE, R_IP, R_RP, REGISTER_COUNT};
use crate::error::{PanicReason, SimpleResult};
use crate::value::TaggedValue;

use frame::CallFrame;

/// One thread of execution: a register file, an address-addressable stack,
/// and the chain of call frames `DOWNFRAME`/`UPFRAME` push and pop.
///
/// A `Thread` holds no reference back to its owning
/// [`crate::process::Process`] — every opcode that needs process-wide state
/// (memory blocks, callbacks, other threads) is dispatched through
/// [`crate::process::Process::run_thread`], which borrows the thread and the
/// process separately.
#[derive(Debug, Clone)]
pub struct Thread {
    registers: [TaggedValue; REGISTER_COUNT],
    stack: Vec<TaggedValue>,
    frames: Vec<CallFrame>,
    sequence: i64,
    trap: u32,
}

impl Thread {
    /// A fresh thread with a stack of `stack_size` values, all registers
    /// zeroed.
    pub fn new(stack_size: usize) -> Self {
        Thread {
            registers: [TaggedValue::default(); REGISTER_COUNT],
            stack: vec![TaggedValue::default(); stack_size],
            frames: Vec::new(),
            sequence: 0,
            trap: 0,
        }
    }

    /// The instruction pointer register.
    pub fn ip(&self) -> i64 {
        self.registers[R_IP].as_i64()
    }

    /// Sets the instruction pointer register.
    pub fn set_ip(&mut self, value: i64) {
        self.registers[R_IP] = TaggedValue::from_i64(value);
    }

    /// The base-of-frame register.
    pub fn ebp(&self) -> i64 {
        self.registers[R_EBP].as_i64()
    }

    fn set_ebp(&mut self, value: i64) {
        self.registers[R_EBP] = TaggedValue::from_i64(value);
    }

    /// The top-of-stack register.
    pub fn esp(&self) -> i64 {
        self.registers[R_ESP].as_i64()
    }

    fn set_esp(&mut self, value: i64) {
        self.registers[R_ESP] = TaggedValue::from_i64(value);
    }

    /// The return-value register, read by the host after a top-level call.
    pub fn rp(&self) -> TaggedValue {
        self.registers[R_RP]
    }

    /// Sets the return-value register.
    pub fn set_rp(&mut self, value: TaggedValue) {
        self.registers[R_RP] = value;
    }

    /// True once a `TRAP` has been hit and not yet cleared by `run`
    /// returning.
    pub fn is_trapped(&self) -> bool {
        self.trap != 0
    }

    /// Reads the register (non-negative `off`) or stack-relative slot
    /// (negative `off`, counted down from `ESP`) at `off`.
    pub fn reg(&self, off: i64) -> SimpleResult<TaggedValue> {
        if off >= 0 {
            let idx = usize::try_from(off).map_err(|_| PanicReason::BadRegister)?;
            self.registers.get(idx).copied().ok_or(PanicReason::BadRegister)
        } else {
            let idx = self.esp() + off;
            if idx < 0 {
                return Err(PanicReason::BadRegister);
            }
            self.stack_at(idx)
        }
    }

    /// Writes the register or stack-relative slot named by `off`. See
    /// [`Thread::reg`] for the sign convention.
    pub fn set_reg(&mut self, off: i64, value: TaggedValue) -> SimpleResult<()> {
        if off >= 0 {
            let idx = usize::try_from(off).map_err(|_| PanicReason::BadRegister)?;
            if idx >= REGISTER_COUNT {
                return Err(PanicReason::BadRegister);
            }
            self.registers[idx] = value;
            Ok(())
        } else {
            let idx = self.esp() + off;
            if idx < 0 {
                return Err(PanicReason::BadRegister);
            }
            self.set_stack_at(idx, value);
            Ok(())
        }
    }

    /// Reads an absolute stack location. Out-of-bounds reads return zero
    /// rather than growing the stack.
    pub fn stack_at(&self, loc: i64) -> SimpleResult<TaggedValue> {
        if loc < 0 {
            return Err(PanicReason::StackAccessError);
        }
        let idx = loc as usize;
        Ok(self.stack.get(idx).copied().unwrap_or_default())
    }

    /// Writes an absolute stack location, growing the stack (zero-filled)
    /// if necessary.
    pub fn set_stack_at(&mut self, loc: i64, value: TaggedValue) {
        let idx = loc as usize;
        if idx >= self.stack.len() {
            self.stack.resize(idx + 1, TaggedValue::default());
        }
        self.stack[idx] = value;
    }

    /// Pushes `value` onto the stack at `ESP` and advances `ESP`.
    pub fn push(&mut self, value: TaggedValue) {
        let esp = self.esp();
        self.set_stack_at(esp, value);
        self.set_esp(esp + 1);
    }

    /// Pops the top of the stack, decrementing `ESP` unless `copy_only` is
    /// set (in which case the top is merely returned).
    pub fn pop(&mut self, copy_only: bool) -> SimpleResult<TaggedValue> {
        let stack_top = self.esp() - 1;
        if stack_top < self.ebp() {
            return Err(PanicReason::StackUnderflow);
        }
        if stack_top < 0 {
            return Err(PanicReason::StackUnderflow);
        }
        let result = self.stack_at(stack_top)?;
        if !copy_only {
            self.set_esp(stack_top);
        }
        Ok(result)
    }

    /// Dereferences `input` as a literal (when the matching `litflag` bit
    /// is set) or otherwise as a register/stack-relative offset.
    pub fn deref(&self, input: TaggedValue, litflag: u64, mask: u64) -> SimpleResult<TaggedValue> {
        if litflag & mask != 0 {
            Ok(input)
        } else {
            self.reg(input.as_i64())
        }
    }

    /// Fetches the instruction pointer to execute next and advances `IP`.
    /// Sets the trap flag (without otherwise failing) if the fetched
    /// pointer fell outside `[0, instruction_count)`.
    pub fn fetch(&mut self, instruction_count: i64) -> i64 {
        let next = self.ip();
        self.set_ip(next + 1);
        if next < 0 || next >= instruction_count {
            self.trap += 1;
        }
        next
    }

    /// Clears the trap flag, returning whether it had been set.
    pub fn take_trap(&mut self) -> bool {
        let trapped = self.trap != 0;
        self.trap = 0;
        trapped
    }

    /// Forces the trap flag, as `TRAP` does.
    pub fn set_trapped(&mut self) {
        self.trap = 1;
    }

    /// The thread's current sequence number (incremented by `DOWNFRAME`,
    /// used by `run` to decide when a nested call has returned).
    pub fn sequence(&self) -> i64 {
        self.sequence
    }

    /// Advances the sequence counter, returning the previous value (the
    /// "current call's" term sequence, as used by `run`'s termination
    /// check).
    pub fn advance_sequence(&mut self) -> i64 {
        let current = self.sequence;
        self.sequence += 1;
        current
    }

    /// Produces the thread state `DEFER` hands to a freshly forked thread:
    /// a full copy of registers and stack, but with the call-frame history
    /// truncated to just the fork-point frame. Only that frame is
    /// joinable — a `RETURN` past it would otherwise resume execution in
    /// a caller context the fork never actually entered.
    pub fn fork(&self) -> Self {
        let mut copy = self.clone();
        let fork_frame = copy.frames.pop();
        copy.frames.clear();
        if let Some(frame) = fork_frame {
            copy.frames.push(frame);
        }
        copy
    }

    /// Descends a call frame, keeping `argc` values from the top of the
    /// stack inside the new frame's window.
    pub fn down_frame(&mut self, argc: i64) {
        let mut registers = [TaggedValue::default(); NONVOLATILE_REGISTER_COUNT];
        registers.copy_from_slice(
            &self.registers[R_FIRST_NONVOLATILE..R_FIRST_NONVOLATILE + NONVOLATILE_REGISTER_COUNT],
        );

        let frame = CallFrame {
            from_ip: self.ip(),
            ebp: self.ebp(),
            esp: self.esp() - argc,
            sequence: self.sequence,
            registers,
        };

        self.sequence += 1;
        self.set_ebp(frame.esp);
        self.frames.push(frame);
    }

    /// Ascends the current call frame, carrying `value_count` values from
    /// the top of the stack back across the frame boundary.
    pub fn up_frame(&mut self, value_count: i64) -> SimpleResult<()> {
        if value_count < 0 {
            return Err(PanicReason::StackAccessError);
        }
        let frame = self.frames.pop().ok_or(PanicReason::StackUnderflow)?;

        let esp = self.esp();
        let mut carried = Vec::with_capacity(value_count as usize);
        for offset in 0..value_count {
            carried.push(self.stack_at(esp - value_count + offset)?);
        }

        self.set_ip(frame.from_ip);
        self.set_ebp(frame.ebp);
        self.set_esp(frame.esp);
        self.registers[R_FIRST_NONVOLATILE..R_FIRST_NONVOLATILE + NONVOLATILE_REGISTER_COUNT]
            .copy_from_slice(&frame.registers);

        for value in carried {
            self.push(value);
        }

        self.sequence = frame.sequence;
        Ok(())
    }

    /// Drops the current call frame without restoring any state besides
    /// the sequence counter.
    pub fn drop_frame(&mut self) -> SimpleResult<()> {
        let frame = self.frames.pop().ok_or(PanicReason::StackUnderflow)?;
        self.sequence = frame.sequence;
        Ok(())
    }
}
