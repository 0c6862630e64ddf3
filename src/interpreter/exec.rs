//! Opcode dispatch: [`run`] drives a thread's fetch/exec loop; [`exec`]
//! executes one decoded instruction against a [`Process`].

use crate::block::BlockFlags;
use crate::error::{PanicReason, SimpleResult};
use crate::opcode::Opcode;
use crate::process::Process;
use crate::unit::Instruction;
use crate::value::TaggedValue;

/// `PEEK`/`POKE`/`MEMMOVE` typed memory access width, matching the
/// `memop_typed_t` encoding used by bytecode's `TYPE` argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MemOpType {
    U8,
    I8,
    U16,
    I16,
    U32,
    I32,
    U64,
    I64,
    F32,
    F64,
}

impl MemOpType {
    fn from_i64(code: i64) -> SimpleResult<Self> {
        Ok(match code {
            0 => MemOpType::U8,
            1 => MemOpType::I8,
            2 => MemOpType::U16,
            3 => MemOpType::I16,
            4 => MemOpType::U32,
            5 => MemOpType::I32,
            6 => MemOpType::U64,
            7 => MemOpType::I64,
            8 => MemOpType::F32,
            9 => MemOpType::F64,
            _ => return Err(PanicReason::MemoryAccessError),
        })
    }

    fn size(self) -> i64 {
        match self {
            MemOpType::U8 | MemOpType::I8 => 1,
            MemOpType::U16 | MemOpType::I16 => 2,
            MemOpType::U32 | MemOpType::I32 | MemOpType::F32 => 4,
            MemOpType::U64 | MemOpType::I64 | MemOpType::F64 => 8,
        }
    }

    fn read(self, bytes: &[u8]) -> TaggedValue {
        match self {
            MemOpType::U8 => TaggedValue::from_u64(bytes[0] as u64),
            MemOpType::I8 => TaggedValue::from_i64(bytes[0] as i8 as i64),
            MemOpType::U16 => TaggedValue::from_u64(u16::from_le_bytes([bytes[0], bytes[1]]) as u64),
            MemOpType::I16 => TaggedValue::from_i64(i16::from_le_bytes([bytes[0], bytes[1]]) as i64),
            MemOpType::U32 => {
                TaggedValue::from_u64(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as u64)
            }
            MemOpType::I32 => {
                TaggedValue::from_i64(i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as i64)
            }
            MemOpType::U64 => TaggedValue::from_u64(u64::from_le_bytes(bytes[0..8].try_into().unwrap())),
            MemOpType::I64 => TaggedValue::from_i64(i64::from_le_bytes(bytes[0..8].try_into().unwrap())),
            MemOpType::F32 => {
                TaggedValue::from_f64(f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f64)
            }
            MemOpType::F64 => TaggedValue::from_f64(f64::from_le_bytes(bytes[0..8].try_into().unwrap())),
        }
    }

    fn write(self, bytes: &mut [u8], value: TaggedValue) {
        match self {
            MemOpType::U8 => bytes[0] = value.as_u64() as u8,
            MemOpType::I8 => bytes[0] = value.as_i64() as i8 as u8,
            MemOpType::U16 => bytes[0..2].copy_from_slice(&(value.as_u64() as u16).to_le_bytes()),
            MemOpType::I16 => bytes[0..2].copy_from_slice(&(value.as_i64() as i16).to_le_bytes()),
            MemOpType::U32 => bytes[0..4].copy_from_slice(&(value.as_u64() as u32).to_le_bytes()),
            MemOpType::I32 => bytes[0..4].copy_from_slice(&(value.as_i64() as i32).to_le_bytes()),
            MemOpType::U64 => bytes[0..8].copy_from_slice(&value.as_u64().to_le_bytes()),
            MemOpType::I64 => bytes[0..8].copy_from_slice(&value.as_i64().to_le_bytes()),
            MemOpType::F32 => bytes[0..4].copy_from_slice(&(value.as_f64() as f32).to_le_bytes()),
            MemOpType::F64 => bytes[0..8].copy_from_slice(&value.as_f64().to_le_bytes()),
        }
    }
}

/// Runs the thread at `thread_index` from its current instruction pointer
/// until it either traps or its starting call sequence completes. Returns
/// `false` if a `TRAP` was hit.
pub fn run(process: &mut Process, thread_index: usize) -> SimpleResult<bool> {
    let instruction_count = process.unit().instruction_count() as i64;

    let term_sequence = process.thread_by_index_mut(thread_index)?.advance_sequence();
    loop {
        let thread = process.thread_by_index_mut(thread_index)?;
        if thread.is_trapped() || thread.sequence() <= term_sequence {
            break;
        }
        let opidx = thread.fetch(instruction_count);
        if thread.is_trapped() {
            break;
        }
        let instr = process.unit().fetch_op(opidx)?;
        exec(process, thread_index, instr)?;
    }

    let good = !process.thread_by_index_mut(thread_index)?.take_trap();
    Ok(good)
}

fn libm_fmod(a: f64, b: f64) -> f64 {
    a - b * (a / b).trunc()
}

fn vm_shift(input: i64, shift: i64) -> i64 {
    match shift.cmp(&0) {
        core::cmp::Ordering::Equal => input,
        core::cmp::Ordering::Greater => {
            let shift = shift.min(63) as u32;
            ((input as u64) << shift) as i64
        }
        core::cmp::Ordering::Less => {
            let shift = (-shift).min(63) as u32;
            input >> shift
        }
    }
}

fn vm_ushift(input: u64, shift: i64) -> u64 {
    match shift.cmp(&0) {
        core::cmp::Ordering::Equal => input,
        core::cmp::Ordering::Greater => input << (shift.min(63) as u32),
        core::cmp::Ordering::Less => input >> ((-shift).min(63) as u32),
    }
}

/// Executes one decoded instruction against `thread_index`'s state.
pub fn exec(process: &mut Process, thread_index: usize, instr: Instruction<'_>) -> SimpleResult<()> {
    let litflag = instr.litflag;
    let args = instr.args;

    macro_rules! thread {
        () => {
            process.thread_by_index_mut(thread_index)?
        };
    }
    macro_rules! deref {
        ($idx:expr, $mask:expr) => {
            thread!().deref(args[$idx], litflag, $mask)?
        };
    }

    match instr.opcode {
        Opcode::Add => {
            let lhs = deref!(1, 0x2).as_f64();
            let rhs = deref!(2, 0x4).as_f64();
            thread!().set_reg(args[0].as_i64(), TaggedValue::from_f64(lhs + rhs))?;
        }
        Opcode::Sub => {
            let lhs = deref!(1, 0x2).as_f64();
            let rhs = deref!(2, 0x4).as_f64();
            thread!().set_reg(args[0].as_i64(), TaggedValue::from_f64(lhs - rhs))?;
        }
        Opcode::Mul => {
            let lhs = deref!(1, 0x2).as_f64();
            let rhs = deref!(2, 0x4).as_f64();
            thread!().set_reg(args[0].as_i64(), TaggedValue::from_f64(lhs * rhs))?;
        }
        Opcode::Div => {
            let lhs = deref!(1, 0x2).as_f64();
            let rhs = deref!(2, 0x4).as_f64();
            thread!().set_reg(args[0].as_i64(), TaggedValue::from_f64(lhs / rhs))?;
        }
        Opcode::Idiv => {
            let lhs = deref!(1, 0x2).as_i64();
            let rhs = deref!(2, 0x4).as_i64();
            let result = if rhs == 0 { TaggedValue::undefined() } else { TaggedValue::from_i64(lhs / rhs) };
            thread!().set_reg(args[0].as_i64(), result)?;
        }
        Opcode::Pow => {
            let lhs = deref!(1, 0x2).as_f64();
            let rhs = deref!(2, 0x4).as_f64();
            thread!().set_reg(args[0].as_i64(), TaggedValue::from_f64(lhs.powf(rhs)))?;
        }
        Opcode::Mod => {
            let lhs = deref!(1, 0x2).as_f64();
            let rhs = deref!(2, 0x4).as_f64();
            thread!().set_reg(args[0].as_i64(), TaggedValue::from_f64(libm_fmod(lhs, rhs)))?;
        }
        Opcode::Imod => {
            let lhs = deref!(1, 0x2).as_i64();
            let rhs = deref!(2, 0x4).as_i64();
            let result = if rhs == 0 { TaggedValue::undefined() } else { TaggedValue::from_i64(lhs % rhs) };
            thread!().set_reg(args[0].as_i64(), result)?;
        }
        Opcode::Neg => {
            let input = thread!().reg(args[1].as_i64())?;
            thread!().set_reg(args[0].as_i64(), input.neg())?;
        }
        Opcode::Not => {
            let input = thread!().reg(args[1].as_i64())?;
            thread!().set_reg(args[0].as_i64(), input.not())?;
        }
        Opcode::Or => {
            let lhs = deref!(1, 0x2);
            let rhs = deref!(2, 0x4);
            thread!().set_reg(args[0].as_i64(), lhs.bitor(rhs))?;
        }
        Opcode::And => {
            let lhs = deref!(1, 0x2);
            let rhs = deref!(2, 0x4);
            thread!().set_reg(args[0].as_i64(), lhs.bitand(rhs))?;
        }
        Opcode::Xor => {
            let lhs = deref!(1, 0x2);
            let rhs = deref!(2, 0x4);
            thread!().set_reg(args[0].as_i64(), lhs.bitxor(rhs))?;
        }
        Opcode::ArithShift => {
            let input = deref!(1, 0x2).as_i64();
            let shift = deref!(2, 0x4).as_i64();
            thread!().set_reg(args[0].as_i64(), TaggedValue::from_i64(vm_shift(input, shift)))?;
        }
        Opcode::BitShift => {
            let input = deref!(1, 0x2).as_u64();
            let shift = deref!(2, 0x4).as_i64();
            thread!().set_reg(args[0].as_i64(), TaggedValue::from_u64(vm_ushift(input, shift)))?;
        }
        Opcode::Floor | Opcode::Ceil | Opcode::Round | Opcode::Rint => {
            let input = thread!().reg(args[1].as_i64())?;
            let result = if input.value_type() != crate::value::ValueType::Float {
                input.as_type(crate::value::ValueType::Float)
            } else {
                let f = input.as_f64();
                let rounded = match instr.opcode {
                    Opcode::Floor => f.floor(),
                    Opcode::Ceil => f.ceil(),
                    Opcode::Round => f.round_ties_even(),
                    Opcode::Rint => f.trunc(),
                    _ => unreachable!(),
                };
                TaggedValue::from_f64(rounded)
            };
            thread!().set_reg(args[0].as_i64(), result)?;
        }
        Opcode::Eq => {
            let lhs = deref!(0, 0x1);
            let rhs = deref!(1, 0x2);
            if lhs.value_eq(&rhs) != (args[2].as_i64() != 0) {
                let ip = thread!().ip();
                thread!().set_ip(ip + 1);
            }
        }
        Opcode::Lt => {
            let lhs = deref!(0, 0x1);
            let rhs = deref!(1, 0x2);
            let less = lhs.partial_cmp_value(&rhs) == Some(core::cmp::Ordering::Less);
            if less != (args[2].as_i64() != 0) {
                let ip = thread!().ip();
                thread!().set_ip(ip + 1);
            }
        }
        Opcode::Le => {
            let lhs = deref!(0, 0x1);
            let rhs = deref!(1, 0x2);
            let le = matches!(
                lhs.partial_cmp_value(&rhs),
                Some(core::cmp::Ordering::Less) | Some(core::cmp::Ordering::Equal)
            );
            if le != (args[2].as_i64() != 0) {
                let ip = thread!().ip();
                thread!().set_ip(ip + 1);
            }
        }
        Opcode::Jump => {
            let target = deref!(0, 0x1).as_type(crate::value::ValueType::Signed);
            if target.is_undefined() || target.is_error() {
                return Err(PanicReason::InvalidInstructionPointer);
            }
            thread!().set_ip(target.as_i64());
        }
        Opcode::Push => {
            let value = thread!().reg(args[0].as_i64())?;
            thread!().push(value);
        }
        Opcode::Pop => {
            let value = thread!().pop(false)?;
            thread!().set_reg(args[0].as_i64(), value)?;
        }
        Opcode::Load => {
            let value = deref!(1, 0x2);
            thread!().set_reg(args[0].as_i64(), value)?;
        }
        Opcode::Call => {
            let target = deref!(0, 0x1).as_type(crate::value::ValueType::Signed);
            let argc = deref!(1, 0x2).as_type(crate::value::ValueType::Signed);
            if target.is_undefined() || target.is_error() {
                return Err(PanicReason::InvalidInstructionPointer);
            }
            if argc.is_undefined() || argc.is_error() {
                return Err(PanicReason::InvalidArgumentCount);
            }
            exec_call(process, thread_index, target.as_i64(), argc.as_i64())?;
        }
        Opcode::Return => {
            thread!().up_frame(0)?;
        }
        Opcode::Realloc => {
            let block_id = if litflag & 0x2 != 0 {
                0
            } else {
                thread!().reg(args[1].as_i64())?.as_i64()
            };
            let size = deref!(2, 0x4).as_i64();
            let new_id = process.realloc_block(block_id, size)?;
            thread!().set_reg(args[0].as_i64(), TaggedValue::from_i64(new_id))?;
        }
        Opcode::Free => {
            let block_id = thread!().reg(args[0].as_i64())?.as_i64();
            process.free_block(block_id)?;
            thread!().set_reg(args[0].as_i64(), TaggedValue::default())?;
        }
        Opcode::Memdup => {
            let block_id = deref!(1, 0x2).as_i64();
            let new_id = process.duplicate_block(block_id)?;
            thread!().set_reg(args[0].as_i64(), TaggedValue::from_i64(new_id))?;
        }
        Opcode::Memlen => {
            let block_id = deref!(1, 0x2).as_i64();
            let len = process.block_size(block_id);
            thread!().set_reg(args[0].as_i64(), TaggedValue::from_i64(len))?;
        }
        Opcode::Peek => {
            let block_id = deref!(1, 0x2).as_i64();
            let offset = deref!(2, 0x4).as_i64();
            let ty = MemOpType::from_i64(deref!(3, 0x8).as_i64())?;

            if !process.check_block_bounds(block_id, offset, ty.size()) {
                return Err(PanicReason::MemoryAccessError);
            }
            let bytes = process
                .get_block(block_id, BlockFlags::READABLE)?
                .ok_or(PanicReason::NullAccessError)?;
            let slice = &bytes[offset as usize..(offset + ty.size()) as usize];
            let value = ty.read(slice);
            thread!().set_reg(args[0].as_i64(), value)?;
        }
        Opcode::Poke => {
            let block_id = thread!().reg(args[0].as_i64())?.as_i64();
            let value = deref!(1, 0x2);
            let offset = deref!(2, 0x4).as_i64();
            let ty = MemOpType::from_i64(deref!(3, 0x8).as_i64())?;

            if !process.check_block_bounds(block_id, offset, ty.size()) {
                return Err(PanicReason::MemoryAccessError);
            }
            let bytes = process
                .get_block_mut(block_id, BlockFlags::WRITABLE)?
                .ok_or(PanicReason::NullAccessError)?;
            let slice = &mut bytes[offset as usize..(offset + ty.size()) as usize];
            ty.write(slice, value);
        }
        Opcode::Memmove => {
            let dst_block = thread!().reg(args[0].as_i64())?.as_i64();
            let dst_offset = deref!(1, 0x2).as_i64();
            let src_block = deref!(2, 0x4).as_i64();
            let src_offset = deref!(3, 0x8).as_i64();
            let size = deref!(4, 0x10).as_i64();

            if size > 0 && dst_offset >= 0 && src_offset >= 0 {
                if !process.check_block_bounds(dst_block, dst_offset, size) {
                    return Err(PanicReason::MemoryAccessError);
                }
                if !process.check_block_bounds(src_block, src_offset, size) {
                    return Err(PanicReason::MemoryAccessError);
                }
                let src_bytes = process
                    .get_block(src_block, BlockFlags::READABLE)?
                    .ok_or(PanicReason::NullAccessError)?
                    [src_offset as usize..(src_offset + size) as usize]
                    .to_vec();
                let dst_bytes = process
                    .get_block_mut(dst_block, BlockFlags::READ_WRITE)?
                    .ok_or(PanicReason::NullAccessError)?;
                dst_bytes[dst_offset as usize..(dst_offset + size) as usize].copy_from_slice(&src_bytes);
            }
        }
        Opcode::Trap => {
            thread!().set_trapped();
        }
        Opcode::Defer => {
            thread!().set_reg(args[0].as_i64(), TaggedValue::from_i64(-1))?;
            let snapshot = thread!().clone();
            let new_index = process.fork_thread(&snapshot);
            thread!().set_reg(args[0].as_i64(), TaggedValue::from_i64(new_index as i64))?;
        }
        Opcode::Join => {
            let thread_idx = usize::try_from(thread!().reg(args[1].as_i64())?.as_i64())
                .map_err(|_| PanicReason::WrongProcess)?;
            let mut loops_remaining = crate::consts::VM_MAX_JOIN_LOOPS;
            while loops_remaining > 0 && !process.run_thread(thread_idx)? {
                loops_remaining -= 1;
            }
            let rp = process.thread_by_index(thread_idx)?.rp();
            thread!().set_reg(args[0].as_i64(), rp)?;
            process.destroy_thread(thread_idx)?;
        }
        Opcode::DownFrame => {
            let argc = if args.is_empty() { 0 } else { deref!(0, 0x1).as_i64() };
            thread!().down_frame(argc);
        }
        Opcode::UpFrame => {
            let value_count = if args.is_empty() { 0 } else { deref!(0, 0x1).as_i64() };
            thread!().up_frame(value_count)?;
        }
        Opcode::DropFrame => {
            thread!().drop_frame()?;
        }
    }

    Ok(())
}

/// Executes a `CALL`: descends a frame reserving `argc` stack arguments,
/// then either jumps into `pointer` (a unit address) or invokes the bound
/// callback at `pointer` (a negative import address) and immediately
/// ascends back out.
pub fn exec_call(process: &mut Process, thread_index: usize, pointer: i64, argc: i64) -> SimpleResult<()> {
    let esp = process.thread_by_index(thread_index)?.esp();
    if argc < 0 {
        return Err(PanicReason::InvalidArgumentCount);
    }
    if argc > esp {
        return Err(PanicReason::InvalidArgumentCount);
    }

    process.thread_by_index_mut(thread_index)?.down_frame(argc);

    if pointer < 0 {
        let mut call_args = alloc::vec::Vec::with_capacity(argc as usize);
        if argc > 0 {
            for _ in 0..argc {
                call_args.push(process.thread_by_index_mut(thread_index)?.pop(false)?);
            }
        }
        // Popping walks the stack top-down (last pushed first); reverse so
        // argv[0] is the first value the caller pushed, matching push order.
        call_args.reverse();
        let result = process.invoke_callback_for(pointer, &call_args)?;
        process.thread_by_index_mut(thread_index)?.set_rp(result);
        process.thread_by_index_mut(thread_index)?.up_frame(0)?;
    } else {
        process.thread_by_index_mut(thread_index)?.set_ip(pointer);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::unit::chunks::{self, ChunkTag};
    use crate::unit::Unit;
    use std::io::Cursor;

    const R_RP: i64 = 3;

    /// Hand-assembles a v9-encoded single-chunk-set unit: the given
    /// instructions, import names, exports (name, instruction index) and
    /// static data blocks. Relocation chunks are always emitted empty —
    /// these tests build self-contained units and never exercise
    /// multi-unit linking (covered separately in `unit::tests`).
    fn assemble(
        instructions: &[(Opcode, u16, &[TaggedValue])],
        imports: &[&str],
        exports: &[(&str, i64)],
        data: &[&[u8]],
    ) -> Vec<u8> {
        let mut inst = Vec::new();
        inst.extend_from_slice(&(instructions.len() as i32).to_le_bytes());
        for (opcode, litflag, pool_args) in instructions {
            assert_eq!(
                pool_args.len(),
                opcode.pool_slots() as usize,
                "arg count mismatch for {opcode}"
            );
            inst.extend_from_slice(&(*opcode as u16).to_le_bytes());
            inst.extend_from_slice(&litflag.to_le_bytes());
            for value in *pool_args {
                inst.extend_from_slice(&chunks::wire_type_tag(value.value_type()).to_le_bytes());
                inst.extend_from_slice(&value.raw_bits().to_le_bytes());
            }
        }

        let mut impt = Vec::new();
        impt.extend_from_slice(&(imports.len() as i32).to_le_bytes());
        for name in imports {
            impt.extend_from_slice(&(name.len() as u32).to_le_bytes());
            impt.extend_from_slice(name.as_bytes());
            impt.extend_from_slice(&0i64.to_le_bytes());
        }

        let mut expt = Vec::new();
        expt.extend_from_slice(&(exports.len() as i32).to_le_bytes());
        for (name, addr) in exports {
            expt.extend_from_slice(&(name.len() as u32).to_le_bytes());
            expt.extend_from_slice(name.as_bytes());
            expt.extend_from_slice(&addr.to_le_bytes());
        }

        let empty_count = 0i32.to_le_bytes().to_vec();

        let mut data_chunk = Vec::new();
        data_chunk.extend_from_slice(&(data.len() as i32).to_le_bytes());
        for block in data {
            data_chunk.extend_from_slice(&(block.len() as i32).to_le_bytes());
            data_chunk.extend_from_slice(block);
        }

        let tags = [
            ChunkTag::Inst,
            ChunkTag::Impt,
            ChunkTag::Expt,
            ChunkTag::Exts,
            ChunkTag::Erel,
            ChunkTag::Lrel,
            ChunkTag::Data,
            ChunkTag::Drel,
        ];
        let bodies: [&[u8]; 8] = [
            &inst,
            &impt,
            &expt,
            &empty_count,
            &empty_count,
            &empty_count,
            &data_chunk,
            &empty_count,
        ];

        let header_len = 4 + 4;
        let offset_table_header = 4;
        let entry_size = 4 + 8;
        let offsets_len = offset_table_header + tags.len() * entry_size;

        let mut cursor_offset = (header_len + offsets_len) as u64;
        let mut computed_offsets = Vec::new();
        for body in &bodies {
            computed_offsets.push(cursor_offset);
            cursor_offset += body.len() as u64;
        }

        let mut out = Vec::new();
        out.extend_from_slice(&chunks::UNIT_MAGIC);
        out.extend_from_slice(&9i32.to_le_bytes());
        out.extend_from_slice(&(tags.len() as i32).to_le_bytes());
        for (tag, offset) in tags.iter().zip(&computed_offsets) {
            out.extend_from_slice(&tag.wire_tag());
            out.extend_from_slice(&offset.to_le_bytes());
        }
        for body in &bodies {
            out.extend_from_slice(body);
        }
        out
    }

    fn load(
        instructions: &[(Opcode, u16, &[TaggedValue])],
        imports: &[&str],
        exports: &[(&str, i64)],
        data: &[&[u8]],
    ) -> Process {
        let bytes = assemble(instructions, imports, exports, data);
        let mut cursor = Cursor::new(bytes);
        let mut unit = Unit::new();
        unit.read(&mut cursor).expect("well-formed test unit");
        let mut process = Process::new();
        process.set_unit(unit);
        process
    }

    fn reg(i: i64) -> TaggedValue {
        TaggedValue::from_i64(i)
    }

    /// Scenario 1: `main` loads 41 into `RP`, adds a literal 1 (reducing
    /// through `f64`), returns; the caller reads `FLOAT` 42.0 out of `RP`.
    #[test]
    fn scenario_add_reduces_through_f64_and_returns_in_rp() {
        let mut process = load(
            &[
                (Opcode::Load, 0x2, &[reg(R_RP), TaggedValue::from_i64(41)]),
                (Opcode::Add, 0x4, &[reg(R_RP), reg(R_RP), TaggedValue::from_i64(1)]),
                (Opcode::Return, 0, &[]),
            ],
            &[],
            &[("main", 0)],
            &[],
        );

        let pointer = process.find_function_pointer("main").unwrap();
        let thread = process.make_default_thread();
        let result = process.call_function(thread, pointer, &[]).unwrap();
        assert_eq!(result.value_type(), crate::value::ValueType::Float);
        assert_eq!(result.as_f64(), 42.0);
    }

    /// Scenario 2: a bound callback receives its arguments in the order the
    /// caller pushed them, and its return value lands in `RP`.
    #[test]
    fn scenario_callback_receives_args_in_push_order() {
        let mut process = load(
            &[
                (Opcode::Load, 0x2, &[reg(4), TaggedValue::from_i64(7)]),
                (Opcode::Push, 0, &[reg(4)]),
                (Opcode::Load, 0x2, &[reg(4), TaggedValue::from_i64(9)]),
                (Opcode::Push, 0, &[reg(4)]),
                (Opcode::Call, 0x3, &[TaggedValue::from_i64(-1), TaggedValue::from_i64(2)]),
                (Opcode::Return, 0, &[]),
            ],
            &["print"],
            &[("main", 0)],
            &[],
        );

        let seen = alloc::rc::Rc::new(core::cell::RefCell::new(Vec::new()));
        let seen_for_cb = seen.clone();
        let import_ptr = process
            .bind_callback("print", move |_proc, _slot, args: &[TaggedValue]| {
                *seen_for_cb.borrow_mut() = args.iter().map(TaggedValue::as_i64).collect::<Vec<_>>();
                TaggedValue::from_i64(0)
            })
            .expect("print is a declared import");
        assert_eq!(import_ptr, -1);

        let pointer = process.find_function_pointer("main").unwrap();
        let thread = process.make_default_thread();
        let result = process.call_function(thread, pointer, &[]).unwrap();

        assert_eq!(*seen.borrow(), vec![7, 9]);
        assert_eq!(result.as_i64(), 0);
    }

    /// Scenario 3: allocate, poke, peek, dup, free — and a freed block reads
    /// back as absent rather than erroring, matching the null-block
    /// convention `get_block` uses for any id no longer in the table.
    #[test]
    fn scenario_block_lifecycle() {
        let mut process = Process::new();
        let id = process.alloc_block(16).unwrap();

        {
            let bytes = process.get_block_mut(id, BlockFlags::WRITABLE).unwrap().unwrap();
            bytes[4..8].copy_from_slice(&0xDEADBEEFu32.to_le_bytes());
        }
        let bytes = process.get_block(id, BlockFlags::READABLE).unwrap().unwrap();
        assert_eq!(u32::from_le_bytes(bytes[4..8].try_into().unwrap()), 0xDEADBEEF);

        let dup = process.duplicate_block(id).unwrap();
        assert_ne!(dup, id);
        assert_eq!(
            process.get_block(dup, BlockFlags::READABLE).unwrap().unwrap(),
            process.get_block(id, BlockFlags::READABLE).unwrap().unwrap()
        );

        process.free_block(id).unwrap();
        assert_eq!(process.get_block(id, BlockFlags::READABLE).unwrap(), None);
    }

    /// Scenario 4: `DEFER` forks a thread whose call-frame history is
    /// truncated to the fork point; `JOIN` in the parent runs the child to
    /// completion and harvests its `RP`.
    #[test]
    fn scenario_defer_and_join() {
        let mut process = load(
            &[
                (Opcode::Load, 0x2, &[reg(4), TaggedValue::from_i64(1)]),
                (Opcode::Return, 0, &[]),
            ],
            &[],
            &[("child", 0)],
            &[],
        );

        let parent = process.make_default_thread();
        process.thread_by_index_mut(parent).unwrap().down_frame(0);
        process.thread_by_index_mut(parent).unwrap().set_ip(0);

        let snapshot = process.thread_by_index(parent).unwrap().clone();
        let forked = process.fork_thread(&snapshot);
        assert_ne!(forked, parent);

        let completed = process.run_thread(forked).unwrap();
        assert!(completed, "child thread's single RETURN unwinds its one carried frame");

        process.destroy_thread(forked).unwrap();
        assert!(process.thread_by_index(forked).is_err());
    }

    /// Scenario 6: `TRAP` halts the run loop without erroring; a second
    /// `run` resumes at the instruction right after it.
    #[test]
    fn scenario_trap_then_resume() {
        let mut process = load(
            &[
                (Opcode::Trap, 0, &[]),
                (Opcode::Load, 0x2, &[reg(R_RP), TaggedValue::from_i64(99)]),
                (Opcode::Return, 0, &[]),
            ],
            &[],
            &[("main", 0)],
            &[],
        );

        let pointer = process.find_function_pointer("main").unwrap();
        let thread = process.make_default_thread();
        exec_call(&mut process, thread, pointer, 0).unwrap();

        let completed = process.run_thread(thread).unwrap();
        assert!(!completed, "TRAP reports the run as incomplete");
        assert!(!process.thread_by_index(thread).unwrap().is_trapped(), "trap clears on exit");

        let completed = process.run_thread(thread).unwrap();
        assert!(completed);
        assert_eq!(process.thread_by_index(thread).unwrap().rp().as_i64(), 99);
    }

    #[test]
    fn shift_by_zero_is_identity_and_negative_shifts_right() {
        assert_eq!(vm_shift(8, 0), 8);
        assert_eq!(vm_shift(1, 3), 8);
        assert_eq!(vm_shift(8, -3), 1);
        assert_eq!(vm_ushift(8, 0), 8);
        assert_eq!(vm_ushift(1, 3), 8);
    }

    #[test]
    fn peek_poke_round_trip_every_memop_type() {
        let mut process = Process::new();
        let block = process.alloc_block(16).unwrap();

        let cases = [
            (0i64, TaggedValue::from_u64(0xAB)),
            (1, TaggedValue::from_i64(-5)),
            (2, TaggedValue::from_u64(0xABCD)),
            (3, TaggedValue::from_i64(-1234)),
            (4, TaggedValue::from_u64(0xDEADBEEF)),
            (5, TaggedValue::from_i64(-100000)),
            (6, TaggedValue::from_u64(u64::MAX)),
            (7, TaggedValue::from_i64(i64::MIN)),
            (8, TaggedValue::from_f64(1.5)),
            (9, TaggedValue::from_f64(-2.5)),
        ];
        for (code, value) in cases {
            let ty = MemOpType::from_i64(code).unwrap();
            {
                let bytes = process.get_block_mut(block, BlockFlags::WRITABLE).unwrap().unwrap();
                ty.write(&mut bytes[0..ty.size() as usize], value);
            }
            let bytes = process.get_block(block, BlockFlags::READABLE).unwrap().unwrap();
            let roundtrip = ty.read(&bytes[0..ty.size() as usize]);
            assert_eq!(roundtrip.as_f64(), value.as_f64(), "memop type code {code}");
        }
    }

    #[test]
    fn block_bounds_reject_one_past_the_end() {
        let mut process = Process::new();
        let block = process.alloc_block(8).unwrap();
        assert!(process.check_block_bounds(block, 0, 8));
        assert!(!process.check_block_bounds(block, 1, 8));
    }
}
