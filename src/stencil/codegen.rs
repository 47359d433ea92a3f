//! Codegen Emitter (spec §4.G).
//!
//! Executes a stencil's patch program against its pre-fixup bytes,
//! writing resolved placeholder/constant/external-symbol values into a
//! destination buffer the caller has already populated with pre-fixup
//! code (spec §4.G: "does not copy bytes — the caller is responsible for
//! copying pre-fixup code into the destination buffer first").
//!
//! Grounded on `cranelift_codegen::binemit`'s separation of code
//! emission from relocation resolution: a `CodeSink` only records where
//! to patch, a separate pass resolves values against final addresses.

use std::collections::HashMap;

use crate::error::{PipelineError, Result};
use crate::pool::ConstantLabel;
use crate::reloc::StencilSection;
use crate::stencil::patch::{PatchOp, PatchProgram};
use crate::stencil::types::PlaceholderOrdinal;

/// The base addresses and placeholder values needed to turn one
/// stencil's pre-fixup bytes into final machine code (spec §4.G logical
/// signature: `special_placeholders[]`, `operand_values[]`,
/// `ic_state_values[]`, `extra_placeholders[]`).
#[derive(Clone, Debug, Default)]
pub struct PatchInputs {
    pub fast_addr: u64,
    pub slow_addr: u64,
    pub ic_addr: u64,
    pub ic_data_addr: u64,
    pub data_addr: u64,
    /// Bytecode-operand ordinals (0-99) and manually assigned ordinals
    /// (>=10000, e.g. IC state values), keyed by ordinal.
    pub operand_values: HashMap<PlaceholderOrdinal, u64>,
    /// Special ordinals (100-199) beyond the four section base
    /// addresses above — e.g. metadata base, branch targets.
    pub extra_placeholders: HashMap<PlaceholderOrdinal, u64>,
    pub shared_constant_addrs: HashMap<ConstantLabel, u64>,
    pub external_symbol_addrs: HashMap<String, u64>,
}

impl PatchInputs {
    fn section_base(&self, section: StencilSection) -> u64 {
        match section {
            StencilSection::FastPath => self.fast_addr,
            StencilSection::SlowPath => self.slow_addr,
            StencilSection::IcPath => self.ic_addr,
            StencilSection::PrivateData => self.data_addr,
        }
    }

    fn resolve_ordinal(&self, ordinal: PlaceholderOrdinal) -> Result<u64> {
        use crate::stencil::types::special;
        if let Some(v) = self.operand_values.get(&ordinal) {
            return Ok(*v);
        }
        if let Some(v) = self.extra_placeholders.get(&ordinal) {
            return Ok(*v);
        }
        match ordinal {
            special::FAST_PATH_ADDR => Ok(self.fast_addr),
            special::SLOW_PATH_ADDR => Ok(self.slow_addr),
            special::IC_PATH_ADDR => Ok(self.ic_addr),
            special::IC_DATA_ADDR => Ok(self.ic_data_addr),
            special::DATA_SECTION_ADDR => Ok(self.data_addr),
            _ => Err(PipelineError::UnsupportedConstruct {
                construct: format!("placeholder ordinal {}", ordinal.0),
                location: "codegen emitter: no value supplied for ordinal".to_string(),
            }),
        }
    }
}

fn write_value(bytes: &mut [u8], offset: usize, width: u8, value: i64) {
    let raw = value.to_le_bytes();
    bytes[offset..offset + width as usize].copy_from_slice(&raw[..width as usize]);
}

/// `S + A - P` where `P` is the address of the byte immediately after
/// the relocated field — the standard PC-relative relocation formula
/// also used by `cranelift_codegen::binemit::Reloc::X86PCRel4`.
fn resolve_value(site_base: u64, offset: u32, width: u8, target: u64, addend: i64, pc_relative: bool) -> i64 {
    let absolute = target as i64 + addend;
    if pc_relative {
        let pc_after = site_base as i64 + offset as i64 + width as i64;
        absolute - pc_after
    } else {
        absolute
    }
}

fn apply_op(op: &PatchOp, dest: &mut [u8], inputs: &PatchInputs) -> Result<()> {
    let site_base = inputs.section_base(op.section());
    match op {
        PatchOp::Placeholder { offset, width, ordinal, pc_relative, addend, .. } => {
            let target = inputs.resolve_ordinal(*ordinal)?;
            let value = resolve_value(site_base, *offset, *width, target, *addend, *pc_relative);
            write_value(dest, *offset as usize, *width, value);
        }
        PatchOp::SharedConstant { offset, width, label, pc_relative, addend, .. } => {
            let target = *inputs.shared_constant_addrs.get(&ConstantLabel(*label)).ok_or_else(|| {
                PipelineError::UnsupportedConstruct {
                    construct: format!("shared constant label {label}"),
                    location: "codegen emitter: no address supplied for shared constant".to_string(),
                }
            })?;
            let value = resolve_value(site_base, *offset, *width, target, *addend, *pc_relative);
            write_value(dest, *offset as usize, *width, value);
        }
        PatchOp::ExternalSymbol { offset, width, name, pc_relative, addend, .. } => {
            let target = *inputs.external_symbol_addrs.get(name).ok_or_else(|| PipelineError::UnsupportedConstruct {
                construct: format!("external symbol `{name}`"),
                location: "codegen emitter: no address supplied for external symbol".to_string(),
            })?;
            let value = resolve_value(site_base, *offset, *width, target, *addend, *pc_relative);
            write_value(dest, *offset as usize, *width, value);
        }
        PatchOp::RegisterRename { .. } => {
            // Register renames are applied by the caller's allocator
            // after the codegen emitter runs (spec §4.F); not this
            // function's concern.
        }
    }
    Ok(())
}

fn apply_section(dest: &mut [u8], section: StencilSection, program: &PatchProgram, inputs: &PatchInputs) -> Result<()> {
    for op in &program.ops {
        if op.section() != section {
            continue;
        }
        apply_op(op, dest, inputs)?;
    }
    Ok(())
}

/// Execute `program`'s fast-path ops against `dest`. `dest` must already
/// hold a copy of the stencil's fast-path pre-fixup bytes.
pub fn codegen_fastpath(dest: &mut [u8], program: &PatchProgram, inputs: &PatchInputs) -> Result<()> {
    apply_section(dest, StencilSection::FastPath, program, inputs)
}

pub fn codegen_slowpath(dest: &mut [u8], program: &PatchProgram, inputs: &PatchInputs) -> Result<()> {
    apply_section(dest, StencilSection::SlowPath, program, inputs)
}

pub fn codegen_icpath(dest: &mut [u8], program: &PatchProgram, inputs: &PatchInputs) -> Result<()> {
    apply_section(dest, StencilSection::IcPath, program, inputs)
}

pub fn codegen_datasec(dest: &mut [u8], program: &PatchProgram, inputs: &PatchInputs) -> Result<()> {
    apply_section(dest, StencilSection::PrivateData, program, inputs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reloc::{RelocKind, RelocationRecord, SymbolKind};
    use crate::stencil::patch::plan;
    use crate::stencil::types::Stencil;

    #[test]
    fn fastpath_placeholder_roundtrip_matches_baked_in_addresses() {
        // spec §8 S5: patching operand[0]/operand[1] holes plus the
        // fast/slow path address holes must reproduce bytes identical to
        // code compiled with those values baked in directly.
        let stencil = Stencil {
            fast_path_code: vec![0u8; 20],
            relocations: vec![
                RelocationRecord {
                    section: StencilSection::FastPath,
                    offset: 0,
                    kind: RelocKind::Abs64,
                    symbol: SymbolKind::FastPathAddr,
                    addend: 0,
                },
                RelocationRecord {
                    section: StencilSection::FastPath,
                    offset: 8,
                    kind: RelocKind::Abs64,
                    symbol: SymbolKind::SlowPathAddr,
                    addend: 0,
                },
                RelocationRecord {
                    section: StencilSection::FastPath,
                    offset: 16,
                    kind: RelocKind::Abs32,
                    symbol: SymbolKind::Hole { ordinal: 0 },
                    addend: 0,
                },
            ],
            ..Stencil::default()
        };
        let (pre_fixup, program) = plan(&stencil).unwrap();

        let mut dest = pre_fixup.fast_path.clone();
        let mut inputs = PatchInputs { fast_addr: 0x1000, slow_addr: 0x2000, ..PatchInputs::default() };
        inputs.operand_values.insert(PlaceholderOrdinal(0), 7);
        codegen_fastpath(&mut dest, &program, &inputs).unwrap();

        let mut expected = vec![0u8; 20];
        expected[0..8].copy_from_slice(&0x1000u64.to_le_bytes());
        expected[8..16].copy_from_slice(&0x2000u64.to_le_bytes());
        expected[16..20].copy_from_slice(&7u32.to_le_bytes());
        assert_eq!(dest, expected);
    }

    #[test]
    fn pc_relative_hole_accounts_for_site_address() {
        let stencil = Stencil {
            fast_path_code: vec![0u8; 8],
            relocations: vec![RelocationRecord {
                section: StencilSection::FastPath,
                offset: 4,
                kind: RelocKind::Pc32,
                symbol: SymbolKind::ExternalC { name: "helper".into() },
                addend: 0,
            }],
            ..Stencil::default()
        };
        let (pre_fixup, program) = plan(&stencil).unwrap();
        let mut dest = pre_fixup.fast_path.clone();
        let mut inputs = PatchInputs { fast_addr: 0x1000, ..PatchInputs::default() };
        inputs.external_symbol_addrs.insert("helper".into(), 0x1100);
        codegen_fastpath(&mut dest, &program, &inputs).unwrap();

        let expected_disp = 0x1100i64 - (0x1000 + 4 + 4);
        assert_eq!(i32::from_le_bytes(dest[4..8].try_into().unwrap()) as i64, expected_disp);
    }

    #[test]
    fn missing_external_symbol_address_is_unsupported_construct() {
        let stencil = Stencil {
            fast_path_code: vec![0u8; 4],
            relocations: vec![RelocationRecord {
                section: StencilSection::FastPath,
                offset: 0,
                kind: RelocKind::Abs32,
                symbol: SymbolKind::ExternalC { name: "missing".into() },
                addend: 0,
            }],
            ..Stencil::default()
        };
        let (pre_fixup, program) = plan(&stencil).unwrap();
        let mut dest = pre_fixup.fast_path.clone();
        let inputs = PatchInputs { fast_addr: 0x1000, ..PatchInputs::default() };
        assert!(codegen_fastpath(&mut dest, &program, &inputs).is_err());
    }
}
