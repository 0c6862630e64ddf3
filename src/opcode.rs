//! The instruction set: opcode numbering, argument counts and argument
//! roles.
//!
//! Numbering and arity are fixed by the original unit format and must not
//! drift — units compiled against one version of this table must decode
//! identically under another. See `SPEC_FULL.md` §4 for the provenance of
//! this table.

use derive_more::Display;

use crate::error::PanicReason;

/// The role an instruction's argument plays, used by assemblers/disassemblers
/// and by documentation; the interpreter itself only cares about arg count
/// and which args are covered by the trailing litflag bitmask.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgRole {
    /// A register that receives a value.
    Output,
    /// A register or literal supplying a value.
    Input,
    /// A register, never a literal, regardless of the litflag bit.
    RegOnly,
    /// The trailing litflag bitmask itself (not a data argument).
    Litflag,
}

/// One of the 41 recognised opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[repr(u16)]
pub enum Opcode {
    /// `out = in0 + in1` (reduces through `f64`).
    #[display(fmt = "ADD")]
    Add = 0,
    /// `out = in0 - in1` (reduces through `f64`).
    #[display(fmt = "SUB")]
    Sub = 1,
    /// `out = in0 / in1` (reduces through `f64`).
    #[display(fmt = "DIV")]
    Div = 2,
    /// `out = in0 / in1`, truncating integer division (reduces through `i64`).
    #[display(fmt = "IDIV")]
    Idiv = 3,
    /// `out = in0 * in1` (reduces through `f64`).
    #[display(fmt = "MUL")]
    Mul = 4,
    /// `out = in0 ^ in1` (reduces through `f64`, via `powf`).
    #[display(fmt = "POW")]
    Pow = 5,
    /// `out = fmod(in0, in1)` (reduces through `f64`).
    #[display(fmt = "MOD")]
    Mod = 6,
    /// `out = in0 % in1`, integer remainder (reduces through `i64`).
    #[display(fmt = "IMOD")]
    Imod = 7,
    /// `out = -in`.
    #[display(fmt = "NEG")]
    Neg = 8,
    /// `out = !in` (bitwise complement).
    #[display(fmt = "NOT")]
    Not = 9,
    /// `out = in0 | in1`.
    #[display(fmt = "OR")]
    Or = 10,
    /// `out = in0 & in1`.
    #[display(fmt = "AND")]
    And = 11,
    /// `out = in0 ^ in1` (bitwise).
    #[display(fmt = "XOR")]
    Xor = 12,
    /// Arithmetic shift over `i64`; positive shifts left, negative right.
    #[display(fmt = "ARITHSHIFT")]
    ArithShift = 13,
    /// Logical shift over `u64`; positive shifts left, negative right.
    #[display(fmt = "BITSHIFT")]
    BitShift = 14,
    /// `out = floor(in)`.
    #[display(fmt = "FLOOR")]
    Floor = 15,
    /// `out = ceil(in)`.
    #[display(fmt = "CEIL")]
    Ceil = 16,
    /// `out = round(in)`, round-to-nearest-even.
    #[display(fmt = "ROUND")]
    Round = 17,
    /// `out = rint(in)`, truncated toward zero.
    #[display(fmt = "RINT")]
    Rint = 18,
    /// Skip the next instruction unless `(lhs == rhs) == (expected != 0)`.
    #[display(fmt = "EQ")]
    Eq = 19,
    /// Skip the next instruction unless `(lhs <= rhs) == (expected != 0)`.
    #[display(fmt = "LE")]
    Le = 20,
    /// Skip the next instruction unless `(lhs < rhs) == (expected != 0)`.
    #[display(fmt = "LT")]
    Lt = 21,
    /// Unconditional jump: writes `ptr` (coerced to `SIGNED`) to `IP`.
    #[display(fmt = "JUMP")]
    Jump = 22,
    /// Pushes one value onto the stack.
    #[display(fmt = "PUSH")]
    Push = 23,
    /// Pops one value off the stack.
    #[display(fmt = "POP")]
    Pop = 24,
    /// `out = in` (plain assignment).
    #[display(fmt = "LOAD")]
    Load = 25,
    /// Calls a function pointer or bound callback with `argc` arguments.
    #[display(fmt = "CALL")]
    Call = 26,
    /// Returns from the current call frame.
    #[display(fmt = "RETURN")]
    Return = 27,
    /// Allocates or resizes a memory block.
    #[display(fmt = "REALLOC")]
    Realloc = 28,
    /// Frees a memory block.
    #[display(fmt = "FREE")]
    Free = 29,
    /// Copies bytes between (or within) memory blocks.
    #[display(fmt = "MEMMOVE")]
    Memmove = 30,
    /// Raises a trap, aborting the thread's current `run`.
    #[display(fmt = "TRAP")]
    Trap = 31,
    /// Duplicates a memory block, returning the new block's id.
    #[display(fmt = "MEMDUP")]
    Memdup = 32,
    /// Returns a memory block's size in bytes.
    #[display(fmt = "MEMLEN")]
    Memlen = 33,
    /// Typed read from a memory block.
    #[display(fmt = "PEEK")]
    Peek = 34,
    /// Typed write to a memory block.
    #[display(fmt = "POKE")]
    Poke = 35,
    /// Forks the current thread; `out` receives the new thread's id.
    #[display(fmt = "DEFER")]
    Defer = 36,
    /// Joins a forked thread, retrying until it completes or the retry
    /// bound is exhausted.
    #[display(fmt = "JOIN")]
    Join = 37,
    /// Pushes a fresh call frame without a call (used by host-driven calls).
    #[display(fmt = "DOWNFRAME")]
    DownFrame = 38,
    /// Unwinds `n` call frames without a return.
    #[display(fmt = "UPFRAME")]
    UpFrame = 39,
    /// Drops the current call frame's locals without unwinding it.
    #[display(fmt = "DROPFRAME")]
    DropFrame = 40,
}

/// Total number of distinct opcodes.
pub const OPCODE_COUNT: usize = 41;

/// `(argument count including any trailing litflag, argument roles)` for
/// every opcode, indexed by [`Opcode`] discriminant.
pub const OPCODE_TABLE: [(u8, &[ArgRole]); OPCODE_COUNT] = {
    use ArgRole::*;
    [
        (4, &[Output, Input, Input, Litflag]),   // ADD
        (4, &[Output, Input, Input, Litflag]),   // SUB
        (4, &[Output, Input, Input, Litflag]),   // DIV
        (4, &[Output, Input, Input, Litflag]),   // IDIV
        (4, &[Output, Input, Input, Litflag]),   // MUL
        (4, &[Output, Input, Input, Litflag]),   // POW
        (4, &[Output, Input, Input, Litflag]),   // MOD
        (4, &[Output, Input, Input, Litflag]),   // IMOD
        (2, &[Output, Input]),                   // NEG
        (2, &[Output, Input]),                   // NOT
        (4, &[Output, Input, Input, Litflag]),   // OR
        (4, &[Output, Input, Input, Litflag]),   // AND
        (4, &[Output, Input, Input, Litflag]),   // XOR
        (4, &[Output, Input, Input, Litflag]),   // ARITHSHIFT
        (4, &[Output, Input, Input, Litflag]),   // BITSHIFT
        (2, &[Output, Input]),                   // FLOOR
        (2, &[Output, Input]),                   // CEIL
        (2, &[Output, Input]),                   // ROUND
        (2, &[Output, Input]),                   // RINT
        (4, &[Input, Input, Input, Litflag]),    // EQ
        (4, &[Input, Input, Input, Litflag]),    // LE
        (4, &[Input, Input, Input, Litflag]),    // LT
        (2, &[Input, Litflag]),                  // JUMP
        (1, &[RegOnly]),                          // PUSH
        (1, &[Output]),                          // POP
        (3, &[Output, Input, Litflag]),          // LOAD
        (3, &[Input, Input, Litflag]),           // CALL
        (0, &[]),                                // RETURN
        (4, &[Output, Input, Input, Litflag]),   // REALLOC
        (1, &[Output]),                          // FREE
        (6, &[RegOnly, Input, Input, Input, Input, Litflag]), // MEMMOVE
        (0, &[]),                                // TRAP
        (3, &[Output, Input, Litflag]),          // MEMDUP
        (3, &[Output, Input, Litflag]),          // MEMLEN
        (5, &[Output, Input, Input, Input, Litflag]), // PEEK
        (5, &[RegOnly, Input, Input, Input, Litflag]), // POKE
        (1, &[Output]),                          // DEFER
        (2, &[Output, RegOnly]),                 // JOIN
        (0, &[]),                                // DOWNFRAME
        (1, &[Input]),                            // UPFRAME
        (0, &[]),                                // DROPFRAME
    ]
};

impl Opcode {
    /// Decodes a raw `u16` opcode value, failing if it's out of range.
    pub fn from_u16(raw: u16) -> Result<Self, PanicReason> {
        use Opcode::*;
        Ok(match raw {
            0 => Add,
            1 => Sub,
            2 => Div,
            3 => Idiv,
            4 => Mul,
            5 => Pow,
            6 => Mod,
            7 => Imod,
            8 => Neg,
            9 => Not,
            10 => Or,
            11 => And,
            12 => Xor,
            13 => ArithShift,
            14 => BitShift,
            15 => Floor,
            16 => Ceil,
            17 => Round,
            18 => Rint,
            19 => Eq,
            20 => Le,
            21 => Lt,
            22 => Jump,
            23 => Push,
            24 => Pop,
            25 => Load,
            26 => Call,
            27 => Return,
            28 => Realloc,
            29 => Free,
            30 => Memmove,
            31 => Trap,
            32 => Memdup,
            33 => Memlen,
            34 => Peek,
            35 => Poke,
            36 => Defer,
            37 => Join,
            38 => DownFrame,
            39 => UpFrame,
            40 => DropFrame,
            _ => return Err(PanicReason::BadOpcode),
        })
    }

    /// The argument count, including the trailing litflag slot if present.
    pub fn arg_count(self) -> u8 {
        OPCODE_TABLE[self as usize].0
    }

    /// The per-argument roles, in order.
    pub fn arg_roles(self) -> &'static [ArgRole] {
        OPCODE_TABLE[self as usize].1
    }

    /// True if this opcode's encoding ends in a litflag bitmask argument.
    pub fn has_litflag(self) -> bool {
        matches!(self.arg_roles().last(), Some(ArgRole::Litflag))
    }

    /// Number of argument-pool slots consumed by this instruction, i.e.
    /// `arg_count()` minus one if a litflag argument is present (the
    /// litflag is stored in the instruction record itself, not the pool).
    pub fn pool_slots(self) -> u8 {
        self.arg_count() - self.has_litflag() as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_every_discriminant() {
        for raw in 0..OPCODE_COUNT as u16 {
            let op = Opcode::from_u16(raw).expect("in-range opcode decodes");
            assert_eq!(op as u16, raw);
        }
    }

    #[test]
    fn out_of_range_opcode_is_bad_opcode() {
        assert_eq!(Opcode::from_u16(OPCODE_COUNT as u16), Err(PanicReason::BadOpcode));
        assert_eq!(Opcode::from_u16(u16::MAX), Err(PanicReason::BadOpcode));
    }

    #[test]
    fn return_trap_have_no_litflag_or_args() {
        assert_eq!(Opcode::Return.arg_count(), 0);
        assert!(!Opcode::Return.has_litflag());
        assert_eq!(Opcode::Trap.pool_slots(), 0);
    }

    #[test]
    fn add_has_three_pool_slots_and_a_litflag() {
        assert_eq!(Opcode::Add.arg_count(), 4);
        assert!(Opcode::Add.has_litflag());
        assert_eq!(Opcode::Add.pool_slots(), 3);
    }

    #[test]
    fn poke_first_argument_is_regonly() {
        assert_eq!(Opcode::Poke.arg_roles()[0], ArgRole::RegOnly);
    }

    #[rstest::rstest]
    #[case(Opcode::Call, 3)]
    #[case(Opcode::Memmove, 6)]
    #[case(Opcode::Join, 2)]
    #[case(Opcode::UpFrame, 1)]
    fn arg_counts_match_original_table(#[case] op: Opcode, #[case] expected: u8) {
        assert_eq!(op.arg_count(), expected);
    }
}
