//! Placeholder & Patch Planner (spec §4.F).
//!
//! Produces, per stencil, pre-fixup code (fixed across all
//! instantiations) and a compact patch program that turns it into final
//! machine code given the base addresses assigned to each section.

use crate::cdsl::RegClass;
use crate::error::Result;
use crate::reloc::{Addend, CodeOffset, RelocationRecord, StencilSection, SymbolKind};
use crate::stencil::types::{special, PlaceholderOrdinal, RegisterRename, Stencil};

/// What a patch op writes, as an explicit sum type whose arms carry
/// exactly the payload they need (spec design note "Relocation kinds as
/// a tagged variant", applied here to patch sources too). Every arm
/// carries the stencil section its offset is relative to, since one
/// `PatchProgram` covers all four of a stencil's byte vectors at once.
#[derive(Clone, Debug, PartialEq)]
pub enum PatchOp {
    Placeholder {
        section: StencilSection,
        offset: CodeOffset,
        width: u8,
        ordinal: PlaceholderOrdinal,
        pc_relative: bool,
        addend: Addend,
    },
    SharedConstant {
        section: StencilSection,
        offset: CodeOffset,
        width: u8,
        label: u32,
        pc_relative: bool,
        addend: Addend,
    },
    ExternalSymbol {
        section: StencilSection,
        offset: CodeOffset,
        width: u8,
        name: String,
        pc_relative: bool,
        addend: Addend,
    },
    RegisterRename {
        section: StencilSection,
        offset: CodeOffset,
        class: RegClass,
        canonical_slot: u32,
    },
}

impl PatchOp {
    /// Which of the stencil's four byte vectors this op's offset is
    /// relative to.
    pub fn section(&self) -> StencilSection {
        match self {
            PatchOp::Placeholder { section, .. }
            | PatchOp::SharedConstant { section, .. }
            | PatchOp::ExternalSymbol { section, .. }
            | PatchOp::RegisterRename { section, .. } => *section,
        }
    }

    pub fn offset(&self) -> CodeOffset {
        match self {
            PatchOp::Placeholder { offset, .. }
            | PatchOp::SharedConstant { offset, .. }
            | PatchOp::ExternalSymbol { offset, .. }
            | PatchOp::RegisterRename { offset, .. } => *offset,
        }
    }
}

/// A conditional-branch destination relocation deferred until the
/// layout of every bytecode is known (spec §4.F key rule 1).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct CondBrLatePatchRecord {
    pub offset: CodeOffset,
    pub bit_width: u8,
}

/// The complete, order-preserving patch program for one stencil, plus
/// the late-patch list the caller completes once all bytecodes are laid
/// out.
#[derive(Clone, Debug, Default)]
pub struct PatchProgram {
    pub ops: Vec<PatchOp>,
    pub late_patches: Vec<CondBrLatePatchRecord>,
}

/// Pre-fixup bytes: identical across every instantiation of the stencil.
/// Every variable byte in these vectors is covered by exactly one entry
/// in the accompanying [`PatchProgram`] (spec §4.F invariant).
#[derive(Clone, Debug, Default)]
pub struct PreFixupCode {
    pub fast_path: Vec<u8>,
    pub slow_path: Vec<u8>,
    pub ic_path: Vec<u8>,
    pub data_section: Vec<u8>,
}

fn zero_out(bytes: &mut [u8], offset: usize, width: usize) {
    for b in &mut bytes[offset..offset + width] {
        *b = 0;
    }
}

fn reloc_width(kind: crate::reloc::RelocKind) -> u8 {
    kind.width() as u8
}

/// Build pre-fixup code and a patch program from an extracted stencil.
pub fn plan(stencil: &Stencil) -> Result<(PreFixupCode, PatchProgram)> {
    let mut pre_fixup = PreFixupCode {
        fast_path: stencil.fast_path_code.clone(),
        slow_path: stencil.slow_path_code.clone(),
        ic_path: stencil.ic_path_code.clone(),
        data_section: stencil.private_data.bytes.clone(),
    };
    let mut program = PatchProgram::default();

    for reloc in &stencil.relocations {
        let bytes = section_buffer(&mut pre_fixup, reloc.section);
        plan_one(reloc, bytes, &mut program)?;
    }

    // Register-rename records only arise in the fast path: instructions
    // whose register field the caller's allocator must rewrite live in
    // the stencil's main logic, never in the slow path or private data.
    for rename in &stencil.register_renames {
        zero_out(&mut pre_fixup.fast_path, rename.offset as usize, register_field_width(rename));
        program.ops.push(PatchOp::RegisterRename {
            section: StencilSection::FastPath,
            offset: rename.offset,
            class: rename.class,
            canonical_slot: rename.canonical_slot,
        });
    }

    Ok((pre_fixup, program))
}

fn section_buffer(pre_fixup: &mut PreFixupCode, section: StencilSection) -> &mut Vec<u8> {
    match section {
        StencilSection::FastPath => &mut pre_fixup.fast_path,
        StencilSection::SlowPath => &mut pre_fixup.slow_path,
        StencilSection::IcPath => &mut pre_fixup.ic_path,
        StencilSection::PrivateData => &mut pre_fixup.data_section,
    }
}

fn register_field_width(_rename: &RegisterRename) -> usize {
    // Register fields in the small-code-model x86-64 target this stencil
    // format is designed for are encoded in a single byte (ModRM or REX
    // extension bit group).
    1
}

fn plan_one(reloc: &RelocationRecord, bytes: &mut [u8], program: &mut PatchProgram) -> Result<()> {
    let width = reloc_width(reloc.kind);
    let offset = reloc.offset;
    let section = reloc.section;

    if let SymbolKind::Hole { ordinal } = &reloc.symbol {
        let ordinal = PlaceholderOrdinal(*ordinal);
        if special::is_branch_target(ordinal) && reloc.kind == crate::reloc::RelocKind::Abs64 {
            // Key rule 1: 64-bit branch-target relocations are not
            // patched at stencil emission time.
            if (offset as usize) + 8 <= bytes.len() {
                zero_out(bytes, offset as usize, 8);
            }
            program.late_patches.push(CondBrLatePatchRecord { offset, bit_width: 64 });
            return Ok(());
        }
        if (offset as usize) + width as usize <= bytes.len() {
            zero_out(bytes, offset as usize, width as usize);
        }
        program.ops.push(PatchOp::Placeholder {
            section,
            offset,
            width,
            ordinal,
            pc_relative: reloc.kind.is_pc_relative(),
            addend: reloc.addend,
        });
        return Ok(());
    }

    match &reloc.symbol {
        SymbolKind::SharedConstant { label } => {
            program.ops.push(PatchOp::SharedConstant {
                section,
                offset,
                width,
                label: *label,
                pc_relative: reloc.kind.is_pc_relative(),
                addend: reloc.addend,
            });
        }
        SymbolKind::ExternalC { name } => {
            program.ops.push(PatchOp::ExternalSymbol {
                section,
                offset,
                width,
                name: name.clone(),
                pc_relative: reloc.kind.is_pc_relative(),
                addend: reloc.addend,
            });
        }
        SymbolKind::FastPathAddr => program.ops.push(PatchOp::Placeholder {
            section,
            offset,
            width,
            ordinal: special::FAST_PATH_ADDR,
            pc_relative: reloc.kind.is_pc_relative(),
            addend: reloc.addend,
        }),
        SymbolKind::SlowPathAddr => program.ops.push(PatchOp::Placeholder {
            section,
            offset,
            width,
            ordinal: special::SLOW_PATH_ADDR,
            pc_relative: reloc.kind.is_pc_relative(),
            addend: reloc.addend,
        }),
        SymbolKind::IcPathAddr => program.ops.push(PatchOp::Placeholder {
            section,
            offset,
            width,
            ordinal: special::IC_PATH_ADDR,
            pc_relative: reloc.kind.is_pc_relative(),
            addend: reloc.addend,
        }),
        SymbolKind::PrivateDataAddr => program.ops.push(PatchOp::Placeholder {
            section,
            offset,
            width,
            ordinal: special::DATA_SECTION_ADDR,
            pc_relative: reloc.kind.is_pc_relative(),
            addend: reloc.addend,
        }),
        SymbolKind::MainLogicPrivateDataAddr => program.ops.push(PatchOp::ExternalSymbol {
            section,
            offset,
            width,
            name: "__main_logic_private_data".to_string(),
            pc_relative: reloc.kind.is_pc_relative(),
            addend: reloc.addend,
        }),
        SymbolKind::Hole { .. } => unreachable!("handled above"),
    }
    Ok(())
}

/// The set of FPU registers referenced anywhere in a stencil's register-
/// rename records (spec §4.F: "used for spill/reload decisions
/// upstream").
pub fn fpu_registers_used(stencil: &Stencil) -> std::collections::BTreeSet<u32> {
    stencil
        .register_renames
        .iter()
        .filter(|r| r.class == RegClass::Fpr)
        .map(|r| r.canonical_slot)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reloc::RelocKind;
    use crate::stencil::types::RegisterRename;

    fn stencil_with(relocs: Vec<RelocationRecord>) -> Stencil {
        Stencil {
            fast_path_code: vec![0xffu8; 16],
            relocations: relocs,
            ..Stencil::default()
        }
    }

    #[test]
    fn branch_target_abs64_becomes_a_late_patch_not_an_op() {
        let stencil = stencil_with(vec![RelocationRecord {
            section: crate::reloc::StencilSection::FastPath,
            offset: 0,
            kind: RelocKind::Abs64,
            symbol: SymbolKind::Hole { ordinal: special::BRANCH_TARGET_TRUE.0 },
            addend: 0,
        }]);
        let (pre_fixup, program) = plan(&stencil).unwrap();
        assert_eq!(program.late_patches.len(), 1);
        assert_eq!(program.late_patches[0].bit_width, 64);
        assert!(program.ops.is_empty());
        assert_eq!(&pre_fixup.fast_path[0..8], &[0u8; 8]);
    }

    #[test]
    fn non_branch_hole_becomes_an_immediate_patch_op() {
        let stencil = stencil_with(vec![RelocationRecord {
            section: crate::reloc::StencilSection::FastPath,
            offset: 2,
            kind: RelocKind::Abs32,
            symbol: SymbolKind::Hole { ordinal: 3 },
            addend: 0,
        }]);
        let (_pre_fixup, program) = plan(&stencil).unwrap();
        assert_eq!(program.ops.len(), 1);
        assert!(matches!(program.ops[0], PatchOp::Placeholder { ordinal: PlaceholderOrdinal(3), .. }));
    }

    #[test]
    fn every_variable_byte_is_covered_by_exactly_one_patch_entry() {
        // testable property 3: placeholder coverage.
        let mut stencil = stencil_with(vec![RelocationRecord {
            section: crate::reloc::StencilSection::FastPath,
            offset: 0,
            kind: RelocKind::Abs32,
            symbol: SymbolKind::Hole { ordinal: 1 },
            addend: 0,
        }]);
        stencil.register_renames.push(RegisterRename { offset: 8, class: RegClass::Gpr, canonical_slot: 0 });
        let (_pre_fixup, program) = plan(&stencil).unwrap();
        let mut covered = std::collections::BTreeSet::new();
        for op in &program.ops {
            match op {
                PatchOp::Placeholder { offset, width, .. } => {
                    for b in *offset..*offset + *width as u32 {
                        assert!(covered.insert(b), "offset {b} covered twice");
                    }
                }
                PatchOp::RegisterRename { offset, .. } => {
                    assert!(covered.insert(*offset));
                }
                _ => {}
            }
        }
        assert_eq!(covered, [0, 1, 2, 3, 8].into_iter().collect());
    }
}
