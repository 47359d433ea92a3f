//! Metadata-slot layout contract (spec §6).
//!
//! At runtime the code block is followed by the bytecode stream (padded
//! to 8 bytes), then concatenated metadata structs grouped by kind. This
//! module computes the offset of each kind's first struct and validates
//! that every patched reference lands inside the trailing-array region.

use crate::error::{PipelineError, Result};

fn round_up(value: u32, alignment: u32) -> u32 {
    debug_assert!(alignment.is_power_of_two());
    (value + alignment - 1) & !(alignment - 1)
}

/// One kind of metadata struct trailing the bytecode stream: a fixed
/// per-struct size, a log2 alignment (must not exceed 8, i.e. log2 <= 3
/// per spec §6's "alignment must not exceed 8"), and the number of
/// instances of this kind across the whole bytecode.
#[derive(Copy, Clone, Debug)]
pub struct MetadataKind {
    pub size: u32,
    pub log2_alignment: u32,
    pub count: u32,
}

impl MetadataKind {
    fn alignment(&self) -> u32 {
        1 << self.log2_alignment
    }
}

/// The trailing-array region's layout: the bytecode stream length
/// (already padded to 8 bytes by the caller) followed by each kind's
/// struct array in declaration order.
pub struct MetadataLayout {
    bytecode_stream_len: u32,
    kinds: Vec<MetadataKind>,
    kind_offsets: Vec<u32>,
    total_len: u32,
}

impl MetadataLayout {
    /// Build the layout for a bytecode of `bytecode_len` bytes (padded
    /// up to 8 here if the caller has not already done so) and the given
    /// metadata kinds in declaration order.
    pub fn new(bytecode_len: u32, kinds: Vec<MetadataKind>) -> Result<Self> {
        for (i, kind) in kinds.iter().enumerate() {
            if kind.log2_alignment > 3 {
                return Err(PipelineError::InputMalformed(format!(
                    "metadata kind {i} alignment 1<<{} exceeds the maximum of 8",
                    kind.log2_alignment
                )));
            }
        }

        let bytecode_stream_len = round_up(bytecode_len, 8);
        let mut cursor = bytecode_stream_len;
        let mut kind_offsets = Vec::with_capacity(kinds.len());
        for kind in &kinds {
            let offset = round_up(cursor, kind.alignment());
            kind_offsets.push(offset);
            cursor = offset + kind.size * kind.count;
        }

        Ok(MetadataLayout { bytecode_stream_len, kinds, kind_offsets, total_len: cursor })
    }

    /// Offset of the first struct of kind `kind_index`.
    pub fn kind_base_offset(&self, kind_index: usize) -> u32 {
        self.kind_offsets[kind_index]
    }

    /// Offset of the `slot_index`-th struct of kind `kind_index`,
    /// validated to be in range and correctly aligned (spec §8 property
    /// 6).
    pub fn slot_offset(&self, kind_index: usize, slot_index: u32) -> Result<u32> {
        let kind = self.kinds.get(kind_index).ok_or_else(|| {
            PipelineError::InputMalformed(format!("no metadata kind at index {kind_index}"))
        })?;
        if slot_index >= kind.count {
            return Err(PipelineError::LayoutConflict(format!(
                "metadata slot {slot_index} out of range for kind {kind_index} (count {})",
                kind.count
            )));
        }
        let offset = self.kind_offsets[kind_index] + slot_index * kind.size;
        if offset % kind.alignment() != 0 {
            return Err(PipelineError::LayoutConflict(format!(
                "metadata slot offset {offset} is not a multiple of alignment {}",
                kind.alignment()
            )));
        }
        if offset + kind.size > self.total_len || offset < self.bytecode_stream_len {
            return Err(PipelineError::LayoutConflict(format!(
                "metadata slot offset {offset} falls outside the trailing-array region"
            )));
        }
        Ok(offset)
    }

    pub fn total_len(&self) -> u32 {
        self.total_len
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn s6_first_kind1_slot_offset_is_48() {
        // spec §8 S6: two kinds, sizes (12, 4), log2-alignments (2, 2),
        // counts (2, 3), bytecode length 24 -> offset = 24 + 2*12 = 48.
        let layout = MetadataLayout::new(
            24,
            vec![
                MetadataKind { size: 12, log2_alignment: 2, count: 2 },
                MetadataKind { size: 4, log2_alignment: 2, count: 3 },
            ],
        )
        .unwrap();
        assert_eq!(layout.slot_offset(1, 0).unwrap(), 48);
        assert_eq!(layout.slot_offset(1, 0).unwrap() % 4, 0);
    }

    #[test]
    fn bytecode_length_is_padded_to_eight_bytes() {
        let layout = MetadataLayout::new(21, vec![MetadataKind { size: 4, log2_alignment: 2, count: 1 }]).unwrap();
        assert_eq!(layout.kind_base_offset(0), 24);
    }

    #[test]
    fn alignment_beyond_eight_is_rejected() {
        let result = MetadataLayout::new(0, vec![MetadataKind { size: 4, log2_alignment: 4, count: 1 }]);
        assert!(result.is_err());
    }

    #[test]
    fn out_of_range_slot_is_a_layout_conflict() {
        let layout = MetadataLayout::new(0, vec![MetadataKind { size: 4, log2_alignment: 2, count: 2 }]).unwrap();
        assert!(layout.slot_offset(0, 5).is_err());
    }
}
