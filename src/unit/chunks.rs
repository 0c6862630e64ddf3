//! Low-level binary reading: chunk tags, the offset table, and the two
//! value encodings (v8/v9).

use std::io::{Read, Seek, SeekFrom};

use byteorder::{LittleEndian, ReadBytesExt};
use hashbrown::HashMap;

use crate::error::PanicReason;
use crate::value::{TaggedValue, ValueType};

/// This implementation's file magic. The original format never documents
/// its magic bytes outside the reference reader; this loader picks its own
/// and validates only that four bytes are present to read.
pub const UNIT_MAGIC: [u8; 4] = *b"RVMU";

/// A recognised chunk tag. Chunks present in a unit but not in this set are
/// skipped: the offset table is still consulted to know where they start,
/// but nothing reads past their header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChunkTag {
    /// Instruction table.
    Inst,
    /// Imported label table.
    Impt,
    /// Exported label table.
    Expt,
    /// Extern label table.
    Exts,
    /// Label relocation table.
    Lrel,
    /// Extern relocation table.
    Erel,
    /// Static data table.
    Data,
    /// Data relocation table.
    Drel,
}

impl ChunkTag {
    const ALL: [ChunkTag; 8] = [
        ChunkTag::Inst,
        ChunkTag::Impt,
        ChunkTag::Expt,
        ChunkTag::Exts,
        ChunkTag::Lrel,
        ChunkTag::Erel,
        ChunkTag::Data,
        ChunkTag::Drel,
    ];

    /// The 4-byte little-endian wire tag for this chunk.
    pub const fn wire_tag(self) -> [u8; 4] {
        match self {
            ChunkTag::Inst => *b"INST",
            ChunkTag::Impt => *b"IMPT",
            ChunkTag::Expt => *b"EXPT",
            ChunkTag::Exts => *b"EXTS",
            ChunkTag::Lrel => *b"LREL",
            ChunkTag::Erel => *b"EREL",
            ChunkTag::Data => *b"DATA",
            ChunkTag::Drel => *b"DREL",
        }
    }

    fn from_wire_tag(tag: [u8; 4]) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.wire_tag() == tag)
    }
}

/// Maps recognised chunk tags to their absolute byte offset in the stream.
#[derive(Debug, Default)]
pub struct ChunkOffsets {
    offsets: HashMap<ChunkTag, u64>,
}

impl ChunkOffsets {
    /// Reads the `OFFS`-equivalent table: `i32` count followed by that many
    /// `(tag: [u8; 4], offset: u64)` pairs. Unrecognised tags are recorded
    /// only if they happen to collide with a known one; otherwise ignored,
    /// matching the original's "unknown chunks are skipped by offset".
    pub fn read<R: Read>(input: &mut R) -> Result<Self, PanicReason> {
        let count = read_i32(input)?;
        if count < 0 {
            return Err(PanicReason::BadUnit);
        }
        let mut offsets = HashMap::with_capacity(count as usize);
        for _ in 0..count {
            let mut tag = [0u8; 4];
            input.read_exact(&mut tag).map_err(|_| PanicReason::UnitIoError)?;
            let offset = read_u64(input)?;
            if let Some(known) = ChunkTag::from_wire_tag(tag) {
                offsets.insert(known, offset);
            }
        }
        Ok(ChunkOffsets { offsets })
    }

    /// Seeks the stream to the start of `tag`'s chunk body, returning
    /// `false` if the chunk wasn't present in the offset table.
    pub fn seek_to<R: Seek>(&self, input: &mut R, tag: ChunkTag) -> Result<bool, PanicReason> {
        match self.offsets.get(&tag) {
            Some(&offset) => {
                input
                    .seek(SeekFrom::Start(offset))
                    .map_err(|_| PanicReason::UnitIoError)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

/// An `IMPT`/`EXPT` record: a length-prefixed name and an address.
#[derive(Debug, Clone)]
pub struct Label {
    /// The label's UTF-8 name.
    pub name: String,
    /// Its address: an instruction index (exports) or a negative pointer
    /// (imports).
    pub address: i64,
}

/// Reads a length-prefixed UTF-8 string: `u32` byte length then the bytes.
pub fn read_lstring<R: Read>(input: &mut R) -> Result<String, PanicReason> {
    let len = read_u32(input)? as usize;
    let mut buf = vec![0u8; len];
    input.read_exact(&mut buf).map_err(|_| PanicReason::UnitIoError)?;
    String::from_utf8(buf).map_err(|_| PanicReason::BadUnit)
}

/// Reads an `IMPT`/`EXPT` label record: name then `i64` address.
pub fn read_label<R: Read>(input: &mut R) -> Result<Label, PanicReason> {
    let name = read_lstring(input)?;
    let address = read_i64(input)?;
    Ok(Label { name, address })
}

/// Reads a `u16` as part of an instruction header.
pub fn read_u16<R: Read>(input: &mut R) -> Result<u16, PanicReason> {
    input.read_u16::<LittleEndian>().map_err(|_| PanicReason::UnitIoError)
}

/// Reads an `i32`.
pub fn read_i32<R: Read>(input: &mut R) -> Result<i32, PanicReason> {
    input.read_i32::<LittleEndian>().map_err(|_| PanicReason::UnitIoError)
}

/// Reads a `u32`.
pub fn read_u32<R: Read>(input: &mut R) -> Result<u32, PanicReason> {
    input.read_u32::<LittleEndian>().map_err(|_| PanicReason::UnitIoError)
}

/// Reads an `i64`.
pub fn read_i64<R: Read>(input: &mut R) -> Result<i64, PanicReason> {
    input.read_i64::<LittleEndian>().map_err(|_| PanicReason::UnitIoError)
}

/// Reads a `u64`.
pub fn read_u64<R: Read>(input: &mut R) -> Result<u64, PanicReason> {
    input.read_u64::<LittleEndian>().map_err(|_| PanicReason::UnitIoError)
}

/// Reads an `f64`.
pub fn read_f64<R: Read>(input: &mut R) -> Result<f64, PanicReason> {
    input.read_f64::<LittleEndian>().map_err(|_| PanicReason::UnitIoError)
}

/// A `(instruction_index, args_mask)` relocation pointer shared by the
/// label, extern and data relocation tables.
#[derive(Debug, Clone, Copy)]
pub struct RelocationPtr {
    /// Index into the unit's instruction table, already shifted by the
    /// relevant base when read for a linked-in unit.
    pub pointer: i64,
    /// Bitmask: bit `i` set means argument `i` of the instruction needs
    /// relocating.
    pub args_mask: u64,
}

/// Reads one `LREL`/`EREL`/`DREL` record: `i32` instruction index, `u32`
/// args mask.
pub fn read_relocation_ptr<R: Read>(input: &mut R) -> Result<RelocationPtr, PanicReason> {
    let pointer = read_i32(input)? as i64;
    let args_mask = read_u32(input)? as u64;
    Ok(RelocationPtr { pointer, args_mask })
}

/// Reads a unit format version value (v8 or v9) given the already-known
/// unit version.
pub fn read_value<R: Read>(input: &mut R, unit_version: i32) -> Result<TaggedValue, PanicReason> {
    match unit_version {
        8 => Ok(TaggedValue::from_f64(read_f64(input)?)),
        9 => {
            let type_tag = read_i32(input)?;
            let bits = read_u64(input)?;
            Ok(tagged_value_from_wire(type_tag, bits))
        }
        _ => Err(PanicReason::UnsupportedUnitVersion),
    }
}

/// Reconstructs a [`TaggedValue`] from a v9 `(type_tag, bits)` pair.
pub fn tagged_value_from_wire(type_tag: i32, bits: u64) -> TaggedValue {
    match type_tag {
        0 => TaggedValue::from_u64(bits),
        1 => TaggedValue::from_i64(bits as i64),
        2 => TaggedValue::from_f64(f64::from_bits(bits)),
        3 => TaggedValue::from_data(bits as i64),
        _ => TaggedValue::undefined(),
    }
}

/// Encodes a [`TaggedValue`]'s wire type tag for v9 writers (used by tests
/// and by any future encoder; the loader itself never writes units).
pub fn wire_type_tag(ty: ValueType) -> i32 {
    match ty {
        ValueType::Unsigned => 0,
        ValueType::Signed => 1,
        ValueType::Float => 2,
        ValueType::Data => 3,
        ValueType::Undefined | ValueType::Error => 4,
    }
}

/// Iterates the set bits of `mask` from least to most significant,
/// invoking `func` with each bit's index.
pub fn each_in_mask(mask: u64, mut func: impl FnMut(u32)) {
    let mut mask = mask;
    let mut index = 0;
    while mask != 0 {
        if mask & 1 != 0 {
            func(index);
        }
        mask >>= 1;
        index += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn v9_round_trips_every_tag() {
        let cases = [
            (TaggedValue::from_u64(7), 0),
            (TaggedValue::from_i64(-3), 1),
            (TaggedValue::from_f64(2.5), 2),
            (TaggedValue::from_data(9), 3),
        ];
        for (value, tag) in cases {
            assert_eq!(wire_type_tag(value.value_type()), tag);
            let back = tagged_value_from_wire(tag, value.raw_bits());
            assert_eq!(back.value_type(), value.value_type());
        }
    }

    #[test]
    fn each_in_mask_visits_set_bits_in_order() {
        let mut seen = Vec::new();
        each_in_mask(0b1010, |i| seen.push(i));
        assert_eq!(seen, vec![1, 3]);
    }

    #[test]
    fn read_lstring_reads_length_prefixed_utf8() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&3u32.to_le_bytes());
        buf.extend_from_slice(b"abc");
        let mut cursor = Cursor::new(buf);
        assert_eq!(read_lstring(&mut cursor).unwrap(), "abc");
    }
}
