//! Core stencil data types (spec §3 "Stencil", "Placeholder", "Private
//! Data Object", "Inline-Cache Site").

use std::collections::HashSet;

use crate::error::{PipelineError, Result};
use crate::reloc::RelocationRecord;

/// A named integer ordinal identifying a byte range in a stencil whose
/// final value is supplied at instantiation (spec §3 "Placeholder").
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PlaceholderOrdinal(pub u32);

impl PlaceholderOrdinal {
    pub const BYTECODE_OPERAND_RANGE: std::ops::RangeInclusive<u32> = 0..=99;
    pub const SPECIAL_RANGE: std::ops::RangeInclusive<u32> = 100..=199;
    pub const MANUAL_MIN: u32 = 10000;

    pub fn is_bytecode_operand(self) -> bool {
        Self::BYTECODE_OPERAND_RANGE.contains(&self.0)
    }

    pub fn is_special(self) -> bool {
        Self::SPECIAL_RANGE.contains(&self.0)
    }

    pub fn is_manual(self) -> bool {
        self.0 >= Self::MANUAL_MIN
    }
}

/// Well-known "special" placeholder ordinals (spec §3: 100-199). The
/// first five are named directly by the spec; the rest are this crate's
/// own stable assignment for continuation/branch-target holes used by
/// API Lowering (spec §4.D), kept here so every stage shares one source
/// of ordinal truth (spec §5: ordinals must be stable across runs).
pub mod special {
    use super::PlaceholderOrdinal;
    pub const FAST_PATH_ADDR: PlaceholderOrdinal = PlaceholderOrdinal(100);
    pub const SLOW_PATH_ADDR: PlaceholderOrdinal = PlaceholderOrdinal(101);
    pub const IC_PATH_ADDR: PlaceholderOrdinal = PlaceholderOrdinal(102);
    pub const IC_DATA_ADDR: PlaceholderOrdinal = PlaceholderOrdinal(103);
    pub const DATA_SECTION_ADDR: PlaceholderOrdinal = PlaceholderOrdinal(104);

    pub const METADATA_BASE: PlaceholderOrdinal = PlaceholderOrdinal(105);
    pub const BRANCH_TARGET_TRUE: PlaceholderOrdinal = PlaceholderOrdinal(106);
    pub const BRANCH_TARGET_FALSE: PlaceholderOrdinal = PlaceholderOrdinal(107);
    pub const RETURN_CONTINUATION: PlaceholderOrdinal = PlaceholderOrdinal(108);
    pub const CALL_CONTINUATION: PlaceholderOrdinal = PlaceholderOrdinal(109);

    /// Branch-target holes are the ones subject to spec §4.F's late-patch
    /// rule: their final value depends on the layout of all bytecodes,
    /// not just this stencil's own base addresses.
    pub fn is_branch_target(ordinal: PlaceholderOrdinal) -> bool {
        ordinal == BRANCH_TARGET_TRUE || ordinal == BRANCH_TARGET_FALSE
    }
}

/// Per-instantiation read-only data embedded in code-section relocations
/// (spec §3 "Private Data Object"). Never shared across instantiations.
#[derive(Clone, Debug, Default)]
pub struct PrivateData {
    pub bytes: Vec<u8>,
    pub relocations: Vec<RelocationRecord>,
}

/// A named integer result a caller may query, e.g. "offset from fast-path
/// start to slow-path start" (spec §3 "Label-distance computations").
#[derive(Clone, Debug)]
pub struct LabelDistance {
    pub name: String,
    pub bytes: i64,
}

/// A byte offset whose encoded register field must be rewritten to
/// reflect the caller's allocation (spec §3 "Register-rename records").
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct RegisterRename {
    pub offset: u32,
    pub class: crate::cdsl::RegClass,
    /// The canonical (pre-fixup) slot this rename covers.
    pub canonical_slot: u32,
}

/// The 4-tuple ⟨FastPathCode, SlowPathCode, IcPathCode, PrivateData⟩ plus
/// annotations (spec §3 "Stencil").
#[derive(Clone, Debug, Default)]
pub struct Stencil {
    pub fast_path_code: Vec<u8>,
    pub slow_path_code: Vec<u8>,
    pub ic_path_code: Vec<u8>,
    pub private_data: PrivateData,
    pub relocations: Vec<RelocationRecord>,
    pub register_renames: Vec<RegisterRename>,
    pub label_distances: Vec<LabelDistance>,
}

impl Stencil {
    /// Invariant: placeholder ordinals are globally unique within the
    /// stencil (spec §3). Extracted from `Hole` relocations.
    pub fn validate_placeholder_uniqueness(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for reloc in &self.relocations {
            if let crate::reloc::SymbolKind::Hole { ordinal } = &reloc.symbol {
                if !seen.insert(*ordinal) {
                    return Err(PipelineError::LayoutConflict(format!(
                        "placeholder ordinal {ordinal} used more than once in stencil"
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn label_distance(&self, name: &str) -> Option<i64> {
        self.label_distances.iter().find(|l| l.name == name).map(|l| l.bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reloc::{RelocKind, SymbolKind};

    #[test]
    fn ordinal_ranges_classify_correctly() {
        assert!(PlaceholderOrdinal(5).is_bytecode_operand());
        assert!(PlaceholderOrdinal(150).is_special());
        assert!(PlaceholderOrdinal(10001).is_manual());
        assert!(!PlaceholderOrdinal(150).is_bytecode_operand());
    }

    #[test]
    fn duplicate_placeholder_ordinals_are_a_layout_conflict() {
        let mut stencil = Stencil::default();
        for _ in 0..2 {
            stencil.relocations.push(RelocationRecord {
                section: crate::reloc::StencilSection::FastPath,
                offset: 0,
                kind: RelocKind::Abs32,
                symbol: SymbolKind::Hole { ordinal: 7 },
                addend: 0,
            });
        }
        assert!(stencil.validate_placeholder_uniqueness().is_err());
    }
}
