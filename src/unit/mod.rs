//! The unit loader and linker: reads a chunked binary module and links its
//! imports, exports, externs, and static data against whatever has already
//! been loaded into this [`Unit`].
//!
//! Calling [`Unit::read`] a second time on the same `Unit` *links* the new
//! module in: instruction indices, data block ids and import pointers from
//! the incoming module are all shifted and cross-referenced against what's
//! already present, exactly as the original loader's multi-module linking
//! does.

pub mod chunks;
pub mod relocation;

use std::io::{Read, Seek};

use hashbrown::HashMap;

use crate::consts::{MAX_UNIT_VERSION, MIN_UNIT_VERSION};
use crate::error::{PanicReason, Result, SimpleResult};
use crate::opcode::Opcode;
use crate::value::TaggedValue;

use chunks::{ChunkOffsets, ChunkTag, RelocationPtr};
use relocation::{ExternRelocation, ExternRelocationMap, RelocationMap};

#[derive(Debug, Clone, Copy)]
struct InstructionRecord {
    opcode: Opcode,
    litflag: u64,
    arg_base: usize,
}

#[derive(Debug, Clone, Copy)]
struct DataBlock {
    id: i64,
    offset: usize,
    size: usize,
}

/// A decoded view of one instruction: its opcode, litflag mask, and its
/// slice of the unit's argument pool.
#[derive(Debug, Clone, Copy)]
pub struct Instruction<'a> {
    /// The decoded opcode.
    pub opcode: Opcode,
    /// The litflag bitmask, if the opcode has one (`0` otherwise).
    pub litflag: u64,
    /// This instruction's arguments, in declared order (excluding the
    /// litflag itself, which is never stored in the pool).
    pub args: &'a [TaggedValue],
}

/// A loaded (and possibly multiply-linked) bytecode module.
#[derive(Debug, Default)]
pub struct Unit {
    version: i32,
    last_import: i64,
    instructions: Vec<InstructionRecord>,
    instruction_argv: Vec<TaggedValue>,
    imports: HashMap<u64, i64>,
    exports: HashMap<u64, i64>,
    externs: HashMap<u64, i64>,
    unresolved_relocations: Vec<RelocationPtr>,
    data: Vec<u8>,
    data_blocks: Vec<DataBlock>,
    data_relocations: Vec<RelocationPtr>,
}

impl Unit {
    /// An empty unit, ready to [`Unit::read`] a module into.
    pub fn new() -> Self {
        Self::default()
    }

    /// The format version of the most recently read module.
    pub fn version(&self) -> i32 {
        self.version
    }

    /// True when every extern has been resolved and no relocation remains
    /// pending.
    pub fn is_valid(&self) -> bool {
        self.externs.is_empty() && self.unresolved_relocations.is_empty()
    }

    /// The unit's import table: label hash to negative pointer.
    pub fn imports(&self) -> &HashMap<u64, i64> {
        &self.imports
    }

    /// The unit's export table: label hash to instruction index.
    pub fn exports(&self) -> &HashMap<u64, i64> {
        &self.exports
    }

    /// Looks up `name`'s address: checks imports first, then exports,
    /// matching the host-facing `find_function_pointer` operation.
    pub fn find_function_pointer(&self, name: &str) -> Option<i64> {
        let key = crate::hash::hash_label(name.as_bytes());
        self.imports
            .get(&key)
            .or_else(|| self.exports.get(&key))
            .copied()
    }

    /// Decodes the instruction at `ip`.
    pub fn fetch_op(&self, ip: i64) -> SimpleResult<Instruction<'_>> {
        let idx = usize::try_from(ip).map_err(|_| PanicReason::InvalidInstructionPointer)?;
        let record = self
            .instructions
            .get(idx)
            .ok_or(PanicReason::InvalidInstructionPointer)?;
        let argc = record.opcode.pool_slots() as usize;
        let args = &self.instruction_argv[record.arg_base..record.arg_base + argc];
        Ok(Instruction {
            opcode: record.opcode,
            litflag: record.litflag,
            args,
        })
    }

    /// Total number of instructions currently loaded.
    pub fn instruction_count(&self) -> usize {
        self.instructions.len()
    }

    /// Number of static data blocks currently loaded.
    pub fn data_block_count(&self) -> usize {
        self.data_blocks.len()
    }

    /// Enumerates static data blocks in load order. `f` returns `true` to
    /// stop iteration early.
    pub fn each_data(&self, mut f: impl FnMut(usize, i64, usize, &[u8]) -> bool) {
        for (index, block) in self.data_blocks.iter().enumerate() {
            let bytes = &self.data[block.offset..block.offset + block.size];
            if f(index, block.id, block.size, bytes) {
                return;
            }
        }
    }

    /// Rewrites every static data block's id to the corresponding entry of
    /// `new_ids` (by load-order index), and patches any instruction
    /// argument that referenced an old id. Used by
    /// [`crate::process::Process::set_unit`] once it has allocated runtime
    /// blocks for each static data entry. Returns `false` if two blocks
    /// would have collided on the same old id (this should not happen with
    /// ids assigned by this loader).
    pub(crate) fn relocate_static_data(&mut self, new_ids: &[i64]) -> bool {
        let mut relocations = RelocationMap::new();
        for (index, block) in self.data_blocks.iter_mut().enumerate() {
            if relocations.insert(block.id, new_ids[index]).is_some() {
                return false;
            }
            block.id = new_ids[index];
        }
        self.apply_data_relocations(&relocations);
        true
    }

    fn arg_base_for(&self, pointer: i64) -> Result<usize> {
        usize::try_from(pointer)
            .ok()
            .and_then(|idx| self.instructions.get(idx))
            .map(|ins| ins.arg_base)
            .ok_or_else(|| PanicReason::BadUnit.into())
    }

    /// Reads a module from `input` and links it into this unit.
    #[tracing::instrument(skip(self, input))]
    pub fn read<R: Read + Seek>(&mut self, input: &mut R) -> Result<()> {
        let mut magic = [0u8; 4];
        input
            .read_exact(&mut magic)
            .map_err(|_| PanicReason::UnitIoError)?;
        if magic != chunks::UNIT_MAGIC {
            return Err(PanicReason::BadUnit.into());
        }

        let version = chunks::read_i32(input)?;
        if !(MIN_UNIT_VERSION..=MAX_UNIT_VERSION).contains(&version) {
            return Err(PanicReason::UnsupportedUnitVersion.into());
        }
        self.version = version;

        let instruction_base = self.instructions.len() as i64;
        let mut label_relocations = RelocationMap::new();

        let offsets = ChunkOffsets::read(input)?;

        if offsets.seek_to(input, ChunkTag::Inst)? {
            self.read_instructions(input)?;
        } else {
            return Err(PanicReason::BadUnit.into());
        }

        if offsets.seek_to(input, ChunkTag::Impt)? {
            self.read_imports(input, &mut label_relocations)?;
        } else {
            return Err(PanicReason::BadUnit.into());
        }

        if offsets.seek_to(input, ChunkTag::Expt)? {
            self.read_exports(input, instruction_base, &mut label_relocations)?;
        } else {
            return Err(PanicReason::BadUnit.into());
        }

        if !label_relocations.is_empty() {
            if offsets.seek_to(input, ChunkTag::Lrel)? {
                self.read_label_relocations(input, instruction_base, &label_relocations)?;
            } else {
                return Err(PanicReason::BadUnit.into());
            }
        }

        let mut extern_relocations = ExternRelocationMap::new();
        if offsets.seek_to(input, ChunkTag::Exts)? {
            self.read_externs(input, &mut extern_relocations)?;
        } else {
            return Err(PanicReason::BadUnit.into());
        }

        if offsets.seek_to(input, ChunkTag::Erel)? {
            self.read_extern_relocations(input, instruction_base, &extern_relocations)?;
        } else {
            return Err(PanicReason::BadUnit.into());
        }

        let mut data_relocations = RelocationMap::new();
        let data_base = self.data_blocks.len() as i64;

        if offsets.seek_to(input, ChunkTag::Data)? {
            self.read_data_table(input, data_base, &mut data_relocations)?;
        } else {
            return Err(PanicReason::BadUnit.into());
        }

        if offsets.seek_to(input, ChunkTag::Drel)? {
            self.read_data_relocations(input, instruction_base, &data_relocations)?;
        } else {
            return Err(PanicReason::BadUnit.into());
        }

        self.resolve_externs();

        tracing::debug!(version, instruction_base, "linked unit");
        Ok(())
    }

    fn read_instruction<R: Read>(&mut self, input: &mut R) -> Result<()> {
        let opcode = Opcode::from_u16(chunks::read_u16(input)?)?;
        let litflag = chunks::read_u16(input)? as u64;
        let arg_base = self.instruction_argv.len();
        self.instructions.push(InstructionRecord {
            opcode,
            litflag,
            arg_base,
        });
        for _ in 0..opcode.pool_slots() {
            let value = chunks::read_value(input, self.version)?;
            self.instruction_argv.push(value);
        }
        tracing::trace!(%opcode, litflag, "read instruction");
        Ok(())
    }

    fn read_instructions<R: Read>(&mut self, input: &mut R) -> Result<()> {
        let count = chunks::read_i32(input)?;
        if count < 0 {
            return Err(PanicReason::BadUnit.into());
        }
        for _ in 0..count {
            self.read_instruction(input)?;
        }
        Ok(())
    }

    fn read_imports<R: Read>(&mut self, input: &mut R, relocations: &mut RelocationMap) -> Result<()> {
        let count = chunks::read_i32(input)?;
        if count < 0 {
            return Err(PanicReason::BadUnit.into());
        }
        for _ in 0..count {
            let mut label = chunks::read_label(input)?;
            let name_key = crate::hash::hash_label(label.name.as_bytes());
            match self.imports.get(&name_key).copied() {
                None => {
                    let orig_address = label.address;
                    self.last_import -= 1;
                    label.address = self.last_import;
                    if orig_address != label.address {
                        relocations.insert(orig_address, label.address);
                    }
                    self.imports.insert(name_key, label.address);
                }
                Some(existing) if existing == label.address => {}
                Some(existing) => {
                    relocations.insert(label.address, existing);
                }
            }
            tracing::debug!(name = %label.name, address = label.address, "resolved import");
        }
        Ok(())
    }

    fn read_exports<R: Read>(
        &mut self,
        input: &mut R,
        base: i64,
        relocations: &mut RelocationMap,
    ) -> Result<()> {
        let count = chunks::read_i32(input)?;
        if count < 0 {
            return Err(PanicReason::BadUnit.into());
        }
        for _ in 0..count {
            let label = chunks::read_label(input)?;
            let name_key = crate::hash::hash_label(label.name.as_bytes());
            let mut address = label.address;

            if self.exports.contains_key(&name_key) {
                if base != 0 {
                    address += base;
                    relocations.insert(label.address, address);
                }
                continue;
            }

            if base != 0 {
                address += base;
                relocations.insert(label.address, address);
            }
            self.exports.insert(name_key, address);
            tracing::debug!(name = %label.name, address, "resolved export");
        }
        Ok(())
    }

    fn read_label_relocations<R: Read>(
        &mut self,
        input: &mut R,
        instruction_base: i64,
        relocations: &RelocationMap,
    ) -> Result<()> {
        let count = chunks::read_i32(input)?;
        if count < 0 {
            return Err(PanicReason::BadUnit.into());
        }
        for _ in 0..count {
            let mut rel = chunks::read_relocation_ptr(input)?;
            rel.pointer += instruction_base;
            let arg_base = self.arg_base_for(rel.pointer)?;
            let argv = &mut self.instruction_argv;
            chunks::each_in_mask(rel.args_mask, |mask_index| {
                let arg_index = arg_base + mask_index as usize;
                let arg = argv[arg_index].as_i64();
                if let Some(&new_base) = relocations.get(&arg) {
                    argv[arg_index] = TaggedValue::from_i64(new_base);
                } else if arg >= 0 {
                    argv[arg_index] = TaggedValue::from_i64(arg + instruction_base);
                }
            });
        }
        Ok(())
    }

    fn read_externs<R: Read>(
        &mut self,
        input: &mut R,
        relocations: &mut ExternRelocationMap,
    ) -> Result<()> {
        let count = chunks::read_i32(input)?;
        if count < 0 {
            return Err(PanicReason::BadUnit.into());
        }
        for index in 0..count as i64 {
            let name = chunks::read_lstring(input)?;
            let name_key = crate::hash::hash_label(name.as_bytes());

            if let Some(&export_addr) = self.exports.get(&name_key) {
                relocations.insert(
                    index,
                    ExternRelocation {
                        pointer: export_addr,
                        resolved: true,
                    },
                );
                continue;
            }

            if let Some(&extern_addr) = self.externs.get(&name_key) {
                if extern_addr != index {
                    relocations.insert(
                        index,
                        ExternRelocation {
                            pointer: extern_addr,
                            resolved: false,
                        },
                    );
                }
                continue;
            }

            let new_address = self.externs.len() as i64;
            if index != new_address {
                relocations.insert(
                    index,
                    ExternRelocation {
                        pointer: new_address,
                        resolved: false,
                    },
                );
            }
            self.externs.insert(name_key, new_address);
        }
        Ok(())
    }

    fn read_extern_relocations<R: Read>(
        &mut self,
        input: &mut R,
        instruction_base: i64,
        relocations: &ExternRelocationMap,
    ) -> Result<()> {
        let count = chunks::read_i32(input)?;
        if count < 0 {
            return Err(PanicReason::BadUnit.into());
        }
        for _ in 0..count {
            let mut rel = chunks::read_relocation_ptr(input)?;
            rel.pointer += instruction_base;
            let arg_base = self.arg_base_for(rel.pointer)?;

            let mut pending = 0u32;
            {
                let argv = &self.instruction_argv;
                chunks::each_in_mask(rel.args_mask, |mask_index| {
                    let arg_index = arg_base + mask_index as usize;
                    let arg = argv[arg_index].as_i64();
                    match relocations.get(&arg) {
                        None => pending += 1,
                        Some(r) if !r.resolved => pending += 1,
                        Some(_) => {}
                    }
                });
            }
            for _ in 0..pending {
                self.unresolved_relocations.push(rel);
            }
        }
        Ok(())
    }

    /// Sweeps `unresolved_relocations` once: any extern now present in
    /// `exports` is resolved and its matching instruction arguments
    /// rewritten; externs still missing stay pending for the next linked
    /// unit (or forever, if none ever supplies them).
    fn resolve_externs(&mut self) {
        if self.unresolved_relocations.is_empty() {
            return;
        }

        let mut relocations = RelocationMap::new();
        let mut next_externs = HashMap::new();

        for (&hash, &old_addr) in self.externs.iter() {
            match self.exports.get(&hash) {
                Some(&export_addr) => {
                    relocations.insert(old_addr, export_addr);
                }
                None => {
                    next_externs.insert(hash, old_addr);
                }
            }
        }

        if relocations.is_empty() {
            self.externs = next_externs;
            return;
        }

        let pending = std::mem::take(&mut self.unresolved_relocations);
        let mut next_relocations = Vec::new();

        for rel in pending {
            let Ok(arg_base) = self.arg_base_for(rel.pointer) else {
                continue;
            };
            let mut updated_mask = 0u64;
            {
                let argv = &mut self.instruction_argv;
                chunks::each_in_mask(rel.args_mask, |mask_index| {
                    let arg_index = arg_base + mask_index as usize;
                    let arg = argv[arg_index].as_i64();
                    match relocations.get(&arg) {
                        None => updated_mask |= 1 << mask_index,
                        Some(&new_addr) => argv[arg_index] = TaggedValue::from_i64(new_addr),
                    }
                });
            }
            if updated_mask != 0 {
                next_relocations.push(RelocationPtr {
                    pointer: rel.pointer,
                    args_mask: updated_mask,
                });
            }
        }

        self.externs = next_externs;
        self.unresolved_relocations = next_relocations;
    }

    fn read_data_table<R: Read>(
        &mut self,
        input: &mut R,
        data_base: i64,
        relocations: &mut RelocationMap,
    ) -> Result<()> {
        let count = chunks::read_i32(input)?;
        if count < 0 {
            return Err(PanicReason::BadUnit.into());
        }
        self.data_blocks.reserve(count as usize);
        for data_index in 0..count as i64 {
            let block_id = 1 + data_base + data_index;
            let block_size = chunks::read_i32(input)?;
            if block_size < 0 {
                return Err(PanicReason::BadUnit.into());
            }
            let offset = self.data.len();
            let mut buf = vec![0u8; block_size as usize];
            input
                .read_exact(&mut buf)
                .map_err(|_| PanicReason::UnitIoError)?;
            self.data.extend_from_slice(&buf);
            self.data_blocks.push(DataBlock {
                id: block_id,
                offset,
                size: block_size as usize,
            });
            if data_base > 0 {
                relocations.insert(1 + data_index, block_id);
            }
        }
        Ok(())
    }

    fn read_data_relocations<R: Read>(
        &mut self,
        input: &mut R,
        instruction_base: i64,
        relocations: &RelocationMap,
    ) -> Result<()> {
        let count = chunks::read_i32(input)?;
        if count < 0 {
            return Err(PanicReason::BadUnit.into());
        }
        self.data_relocations.reserve(count as usize);
        for _ in 0..count {
            let mut rel = chunks::read_relocation_ptr(input)?;
            rel.pointer += instruction_base;
            let arg_base = self.arg_base_for(rel.pointer)?;
            {
                let argv = &mut self.instruction_argv;
                chunks::each_in_mask(rel.args_mask, |mask_index| {
                    let arg_index = arg_base + mask_index as usize;
                    let arg = argv[arg_index].as_i64();
                    if let Some(&new_value) = relocations.get(&arg) {
                        argv[arg_index] = TaggedValue::from_i64(new_value);
                    }
                });
            }
            self.data_relocations.push(rel);
        }
        Ok(())
    }

    fn apply_data_relocations(&mut self, relocations: &RelocationMap) {
        let table = self.data_relocations.clone();
        for rel in table {
            let Ok(arg_base) = self.arg_base_for(rel.pointer) else {
                continue;
            };
            let argv = &mut self.instruction_argv;
            chunks::each_in_mask(rel.args_mask, |mask_index| {
                let arg_index = arg_base + mask_index as usize;
                let arg = argv[arg_index].as_i64();
                if let Some(&new_id) = relocations.get(&arg) {
                    argv[arg_index] = TaggedValue::from_data(new_id);
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    /// Hand-assembles the bytes for a minimal unit: one export ("main")
    /// pointing at a single `RETURN` instruction, no imports/externs/data.
    fn trivial_unit_bytes() -> Vec<u8> {
        let mut inst = Vec::new();
        inst.extend_from_slice(&1i32.to_le_bytes()); // count
        inst.extend_from_slice(&(Opcode::Return as u16).to_le_bytes());
        inst.extend_from_slice(&0u16.to_le_bytes()); // litflag

        let mut impt = Vec::new();
        impt.extend_from_slice(&0i32.to_le_bytes());

        let mut expt = Vec::new();
        expt.extend_from_slice(&1i32.to_le_bytes());
        expt.extend_from_slice(&4u32.to_le_bytes());
        expt.extend_from_slice(b"main");
        expt.extend_from_slice(&0i64.to_le_bytes());

        let mut exts = Vec::new();
        exts.extend_from_slice(&0i32.to_le_bytes());

        let mut erel = Vec::new();
        erel.extend_from_slice(&0i32.to_le_bytes());

        let mut lrel = Vec::new();
        lrel.extend_from_slice(&0i32.to_le_bytes());

        let mut data = Vec::new();
        data.extend_from_slice(&0i32.to_le_bytes());

        let mut drel = Vec::new();
        drel.extend_from_slice(&0i32.to_le_bytes());

        let header_len = 4 + 4; // magic + version
        let offset_table_header = 4; // count
        let entry_size = 4 + 8; // tag + offset
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
        let offsets_len = offset_table_header + tags.len() * entry_size;
        let bodies = [&inst, &impt, &expt, &exts, &erel, &lrel, &data, &drel];

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

    #[test]
    fn reads_a_trivial_unit_and_resolves_its_export() {
        let bytes = trivial_unit_bytes();
        let mut cursor = Cursor::new(bytes);
        let mut unit = Unit::new();
        unit.read(&mut cursor).expect("trivial unit loads");

        assert!(unit.is_valid());
        assert_eq!(unit.instruction_count(), 1);
        assert_eq!(unit.find_function_pointer("main"), Some(0));

        let op = unit.fetch_op(0).expect("ip 0 decodes");
        assert_eq!(op.opcode, Opcode::Return);
    }

    #[test]
    fn rejects_version_below_minimum() {
        let mut bytes = trivial_unit_bytes();
        bytes[4..8].copy_from_slice(&3i32.to_le_bytes());
        let mut cursor = Cursor::new(bytes);
        let mut unit = Unit::new();
        let err = unit.read(&mut cursor).unwrap_err();
        assert_eq!(err, PanicReason::UnsupportedUnitVersion.into());
    }

    #[test]
    fn rejects_version_above_maximum() {
        let mut bytes = trivial_unit_bytes();
        bytes[4..8].copy_from_slice(&10i32.to_le_bytes());
        let mut cursor = Cursor::new(bytes);
        let mut unit = Unit::new();
        let err = unit.read(&mut cursor).unwrap_err();
        assert_eq!(err, PanicReason::UnsupportedUnitVersion.into());
    }

    #[test]
    fn rejects_bad_magic() {
        let mut bytes = trivial_unit_bytes();
        bytes[0] = b'X';
        let mut cursor = Cursor::new(bytes);
        let mut unit = Unit::new();
        assert_eq!(
            unit.read(&mut cursor).unwrap_err(),
            PanicReason::BadUnit.into()
        );
    }

    /// Bytes for a single-instruction unit that calls through an extern
    /// named `foo`, relocated by the one `EREL` entry on its sole argument.
    fn extern_caller_unit_bytes() -> Vec<u8> {
        let mut inst = Vec::new();
        inst.extend_from_slice(&2i32.to_le_bytes());
        inst.extend_from_slice(&(Opcode::Call as u16).to_le_bytes());
        inst.extend_from_slice(&0x3u16.to_le_bytes());
        inst.extend_from_slice(&chunks::wire_type_tag(crate::value::ValueType::Signed).to_le_bytes());
        inst.extend_from_slice(&(0i64 as u64).to_le_bytes());
        inst.extend_from_slice(&chunks::wire_type_tag(crate::value::ValueType::Signed).to_le_bytes());
        inst.extend_from_slice(&(0i64 as u64).to_le_bytes());
        inst.extend_from_slice(&(Opcode::Return as u16).to_le_bytes());
        inst.extend_from_slice(&0u16.to_le_bytes());

        let empty_i32_count = || {
            let mut v = Vec::new();
            v.extend_from_slice(&0i32.to_le_bytes());
            v
        };
        let impt = empty_i32_count();
        let expt = empty_i32_count();

        let mut exts = Vec::new();
        exts.extend_from_slice(&1i32.to_le_bytes());
        exts.extend_from_slice(&4u32.to_le_bytes());
        exts.extend_from_slice(b"foo_");

        let lrel = empty_i32_count();

        let mut erel = Vec::new();
        erel.extend_from_slice(&1i32.to_le_bytes());
        erel.extend_from_slice(&0i32.to_le_bytes()); // instruction index 0
        erel.extend_from_slice(&0b01u32.to_le_bytes()); // relocate CALL's pointer arg only

        let data = empty_i32_count();
        let drel = empty_i32_count();

        build_unit_bytes(&[&inst, &impt, &expt, &exts, &erel, &lrel, &data, &drel])
    }

    /// Bytes for a single-instruction unit that exports `foo_` pointing at
    /// its sole `RETURN`.
    fn foo_exporter_unit_bytes() -> Vec<u8> {
        let mut inst = Vec::new();
        inst.extend_from_slice(&1i32.to_le_bytes());
        inst.extend_from_slice(&(Opcode::Return as u16).to_le_bytes());
        inst.extend_from_slice(&0u16.to_le_bytes());

        let empty_i32_count = || {
            let mut v = Vec::new();
            v.extend_from_slice(&0i32.to_le_bytes());
            v
        };
        let impt = empty_i32_count();

        let mut expt = Vec::new();
        expt.extend_from_slice(&1i32.to_le_bytes());
        expt.extend_from_slice(&4u32.to_le_bytes());
        expt.extend_from_slice(b"foo_");
        expt.extend_from_slice(&0i64.to_le_bytes());

        let exts = empty_i32_count();
        let lrel = empty_i32_count();
        let erel = empty_i32_count();
        let data = empty_i32_count();
        let drel = empty_i32_count();

        build_unit_bytes(&[&inst, &impt, &expt, &exts, &erel, &lrel, &data, &drel])
    }

    /// Assembles a full unit file from its eight chunk bodies, in the fixed
    /// `[Inst, Impt, Expt, Exts, Erel, Lrel, Data, Drel]` offset-table order.
    fn build_unit_bytes(bodies: &[&Vec<u8>; 8]) -> Vec<u8> {
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
        let header_len = 4 + 4;
        let offset_table_header = 4;
        let entry_size = 4 + 8;
        let offsets_len = offset_table_header + tags.len() * entry_size;

        let mut cursor_offset = (header_len + offsets_len) as u64;
        let mut computed_offsets = Vec::new();
        for body in bodies {
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
        for body in bodies {
            out.extend_from_slice(body);
        }
        out
    }

    /// Scenario 5: loading an extern-calling unit, then a unit exporting
    /// the extern it needs, leaves the unit fully linked: the extern table
    /// empties out and the `CALL`'s pointer argument is rewritten to the
    /// second unit's (base-shifted) export address.
    #[test]
    fn links_extern_call_against_a_later_exported_unit() {
        let mut unit = Unit::new();

        let mut cursor = Cursor::new(extern_caller_unit_bytes());
        unit.read(&mut cursor).expect("extern-caller unit loads");
        assert!(!unit.is_valid(), "foo is not yet resolved");

        let mut cursor = Cursor::new(foo_exporter_unit_bytes());
        unit.read(&mut cursor).expect("exporter unit links in");

        assert!(unit.is_valid(), "foo is now resolved and no relocation is pending");
        assert_eq!(unit.instruction_count(), 3);
        assert_eq!(unit.find_function_pointer("foo_"), Some(2));

        let call = unit.fetch_op(0).expect("ip 0 decodes");
        assert_eq!(call.opcode, Opcode::Call);
        assert_eq!(call.args[0].as_i64(), 2, "CALL's pointer now targets unit one's RETURN");
    }
}
