//! Output artifact writers (spec §6 "Output artifacts").
//!
//! Four artifacts per compilation: a declaration file, a dispatch table
//! plus name table, one serialized stencil per (opcode, variant, tier),
//! and human-readable audit files. Grounded on
//! `cranelift-codegen-meta::srcgen`'s pattern of building text artifacts
//! through a `Formatter` rather than ad hoc `write!` calls.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::cdsl::OpcodeDef;
use crate::error::Result;
use crate::lowering::Tier;
use crate::srcgen::Formatter;
use crate::stencil::patch::{PatchOp, PatchProgram, PreFixupCode};
use crate::stencil::types::Stencil;

/// Output artifact #1: a builder class per variant, with a typed
/// `create(operands...)` entry and the opcode's base ordinal.
pub fn render_declaration_file(defs: &[OpcodeDef]) -> String {
    let mut fmt = Formatter::new();
    fmt.comment("Generated bytecode builder declarations. Do not edit by hand.");
    fmt.empty_line();

    let mut ordinal: u32 = 0;
    for def in defs {
        fmt.comment(format!("Opcode `{}`, base ordinal {ordinal}", def.name));
        for variant in &def.variants {
            fmt.line(format!("class {}Builder {{", variant.name));
            fmt.indent(|fmt| {
                fmt.line("public:");
                fmt.indent(|fmt| {
                    fmt.line(format!("static constexpr uint32_t kOpcodeOrdinal = {ordinal};"));
                    fmt.line(format!("static constexpr uint32_t kEncodedLength = {};", variant.encoded_len()));
                    fmt.line(format!("static {} create(/* operands */);", variant.name));
                });
            });
            fmt.line("};");
            fmt.empty_line();
            ordinal += 1;
        }
    }
    fmt.render()
}

fn variant_names(defs: &[OpcodeDef]) -> Vec<&str> {
    defs.iter().flat_map(|def| def.variants.iter().map(|v| v.name.as_str())).collect()
}

/// Output artifact #2a: the dispatch table, an array of function
/// pointers in opcode-ordinal order under the symbol name the VM ABI
/// fixes.
pub fn render_dispatch_table(defs: &[OpcodeDef], dispatch_table_symbol: &str) -> String {
    let mut fmt = Formatter::new();
    fmt.comment("Generated dispatch table. Do not edit by hand.");
    fmt.empty_line();
    fmt.line(format!("extern \"C\" const void* {dispatch_table_symbol}[] = {{"));
    fmt.indent(|fmt| {
        for name in variant_names(defs) {
            fmt.line(format!("(const void*)&{name}_entry,"));
        }
    });
    fmt.line("};");
    fmt.render()
}

/// Output artifact #2b: the parallel name table mapping ordinals to
/// opcode-variant names, for diagnostics.
pub fn render_name_table(defs: &[OpcodeDef], dispatch_table_symbol: &str) -> String {
    let mut fmt = Formatter::new();
    fmt.comment("Generated dispatch name table. Do not edit by hand.");
    fmt.empty_line();
    fmt.line(format!("extern \"C\" const char* {dispatch_table_symbol}_names[] = {{"));
    fmt.indent(|fmt| {
        for name in variant_names(defs) {
            fmt.line(format!("\"{name}\","));
        }
    });
    fmt.line("};");
    fmt.render()
}

/// A JSON-serializable view of a patch op, flattened from [`PatchOp`]'s
/// sum-type shape into a tagged record artifact #3 consumers can parse
/// without depending on this crate's internal types.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(tag = "kind")]
pub enum PatchOpArtifact {
    Placeholder { section: String, offset: u32, width: u8, ordinal: u32, pc_relative: bool, addend: i64 },
    SharedConstant { section: String, offset: u32, width: u8, label: u32, pc_relative: bool, addend: i64 },
    ExternalSymbol { section: String, offset: u32, width: u8, name: String, pc_relative: bool, addend: i64 },
    RegisterRename { section: String, offset: u32, class: String, canonical_slot: u32 },
}

fn section_name(section: crate::reloc::StencilSection) -> &'static str {
    use crate::reloc::StencilSection::*;
    match section {
        FastPath => "fast_path",
        SlowPath => "slow_path",
        IcPath => "ic_path",
        PrivateData => "private_data",
    }
}

impl From<&PatchOp> for PatchOpArtifact {
    fn from(op: &PatchOp) -> Self {
        match op {
            PatchOp::Placeholder { section, offset, width, ordinal, pc_relative, addend } => {
                PatchOpArtifact::Placeholder {
                    section: section_name(*section).to_string(),
                    offset: *offset,
                    width: *width,
                    ordinal: ordinal.0,
                    pc_relative: *pc_relative,
                    addend: *addend,
                }
            }
            PatchOp::SharedConstant { section, offset, width, label, pc_relative, addend } => {
                PatchOpArtifact::SharedConstant {
                    section: section_name(*section).to_string(),
                    offset: *offset,
                    width: *width,
                    label: *label,
                    pc_relative: *pc_relative,
                    addend: *addend,
                }
            }
            PatchOp::ExternalSymbol { section, offset, width, name, pc_relative, addend } => {
                PatchOpArtifact::ExternalSymbol {
                    section: section_name(*section).to_string(),
                    offset: *offset,
                    width: *width,
                    name: name.clone(),
                    pc_relative: *pc_relative,
                    addend: *addend,
                }
            }
            PatchOp::RegisterRename { section, offset, class, canonical_slot } => PatchOpArtifact::RegisterRename {
                section: section_name(*section).to_string(),
                offset: *offset,
                class: format!("{class:?}"),
                canonical_slot: *canonical_slot,
            },
        }
    }
}

/// Output artifact #3: one serialized stencil artifact per (opcode,
/// variant, tier) triple, self-describing per spec §6 ("Interchange
/// encoding is a self-describing text format").
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct StencilArtifact {
    pub opcode_name: String,
    pub variant_name: String,
    pub tier: String,
    pub fast_path_code: Vec<u8>,
    pub slow_path_code: Vec<u8>,
    pub ic_path_code: Vec<u8>,
    pub data_section: Vec<u8>,
    pub patch_ops: Vec<PatchOpArtifact>,
    pub late_patch_offsets: Vec<(u32, u8)>,
    pub label_distances: Vec<(String, i64)>,
}

fn tier_name(tier: Tier) -> &'static str {
    match tier {
        Tier::Interpreter => "interpreter",
        Tier::BaselineJit => "baseline_jit",
        Tier::OptimizingJit => "optimizing_jit",
    }
}

pub fn build_stencil_artifact(
    opcode_name: &str,
    variant_name: &str,
    tier: Tier,
    stencil: &Stencil,
    pre_fixup: &PreFixupCode,
    program: &PatchProgram,
) -> StencilArtifact {
    StencilArtifact {
        opcode_name: opcode_name.to_string(),
        variant_name: variant_name.to_string(),
        tier: tier_name(tier).to_string(),
        fast_path_code: pre_fixup.fast_path.clone(),
        slow_path_code: pre_fixup.slow_path.clone(),
        ic_path_code: pre_fixup.ic_path.clone(),
        data_section: pre_fixup.data_section.clone(),
        patch_ops: program.ops.iter().map(PatchOpArtifact::from).collect(),
        late_patch_offsets: program.late_patches.iter().map(|p| (p.offset, p.bit_width)).collect(),
        label_distances: stencil.label_distances.iter().map(|l| (l.name.clone(), l.bytes)).collect(),
    }
}

pub fn write_stencil_artifact(artifact: &StencilArtifact, path: impl AsRef<Path>) -> Result<()> {
    let json = serde_json::to_vec_pretty(artifact)?;
    crate::srcgen::write_atomically(path, &json)
}

/// Output artifact #4: a human-readable audit file per bytecode, with
/// every patched byte range in the pre-fixup dump marked with `**` —
/// intended for review, not machine consumption.
pub fn render_audit_file(artifact: &StencilArtifact) -> String {
    let mut fmt = Formatter::new();
    fmt.comment(format!("Audit: {} / {} / {}", artifact.opcode_name, artifact.variant_name, artifact.tier));
    fmt.empty_line();

    fmt.line("fast_path:");
    fmt.indent(|fmt| fmt.line(annotate(&artifact.fast_path_code, &artifact.patch_ops, "fast_path")));
    fmt.line("slow_path:");
    fmt.indent(|fmt| fmt.line(annotate(&artifact.slow_path_code, &artifact.patch_ops, "slow_path")));
    fmt.line("ic_path:");
    fmt.indent(|fmt| fmt.line(annotate(&artifact.ic_path_code, &artifact.patch_ops, "ic_path")));
    fmt.line("private_data:");
    fmt.indent(|fmt| fmt.line(annotate(&artifact.data_section, &artifact.patch_ops, "private_data")));

    fmt.render()
}

fn patched_offsets(ops: &[PatchOpArtifact], section: &str) -> Vec<(u32, u8)> {
    ops.iter()
        .filter_map(|op| match op {
            PatchOpArtifact::Placeholder { section: s, offset, width, .. } if s == section => Some((*offset, *width)),
            PatchOpArtifact::SharedConstant { section: s, offset, width, .. } if s == section => Some((*offset, *width)),
            PatchOpArtifact::ExternalSymbol { section: s, offset, width, .. } if s == section => Some((*offset, *width)),
            PatchOpArtifact::RegisterRename { section: s, offset, .. } if s == section => Some((*offset, 1)),
            _ => None,
        })
        .collect()
}

fn annotate(bytes: &[u8], ops: &[PatchOpArtifact], section: &str) -> String {
    if bytes.is_empty() {
        return "(empty)".to_string();
    }
    let patched = patched_offsets(ops, section);
    let mut marked = vec![false; bytes.len()];
    for (offset, width) in patched {
        for b in marked.iter_mut().skip(offset as usize).take(width as usize) {
            *b = true;
        }
    }
    bytes
        .iter()
        .zip(marked.iter())
        .map(|(b, is_patched)| if *is_patched { format!("**{b:02x}**") } else { format!("{b:02x}") })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cdsl::operand::Signedness;
    use crate::cdsl::{Operand, OpcodeDefBuilder, TypeDeductionRule, TypeMask, TypeTag, Width};

    fn sample_def() -> OpcodeDef {
        OpcodeDefBuilder::new("SetConstInt16", TypeDeductionRule::AlwaysOutput(TypeMask::single(TypeTag::Double)))
            .operand(Operand::literal(Width::Two, Signedness::Signed), vec![Width::Two])
            .build()
            .unwrap()
    }

    #[test]
    fn declaration_file_names_a_builder_class_per_variant() {
        let def = sample_def();
        let rendered = render_declaration_file(&[def]);
        assert!(rendered.contains("class SetConstInt16_0Builder"));
        assert!(rendered.contains("kOpcodeOrdinal = 0"));
    }

    #[test]
    fn dispatch_table_lists_one_entry_per_variant_in_order() {
        let def = sample_def();
        let table = render_dispatch_table(&[def], "g_dispatch_table");
        assert!(table.contains("g_dispatch_table[]"));
        assert!(table.contains("SetConstInt16_0_entry"));
    }

    #[test]
    fn name_table_lists_one_name_per_variant_in_order() {
        let def = sample_def();
        let names = render_name_table(&[def], "g_dispatch_table");
        assert!(names.contains("g_dispatch_table_names[]"));
        assert!(names.contains("\"SetConstInt16_0\""));
    }

    #[test]
    fn audit_file_marks_patched_bytes() {
        let artifact = StencilArtifact {
            opcode_name: "SetConstInt16".into(),
            variant_name: "SetConstInt16_0".into(),
            tier: "interpreter".into(),
            fast_path_code: vec![0x90, 0xff, 0xff, 0x90],
            slow_path_code: vec![],
            ic_path_code: vec![],
            data_section: vec![],
            patch_ops: vec![PatchOpArtifact::Placeholder {
                section: "fast_path".into(),
                offset: 1,
                width: 2,
                ordinal: 0,
                pc_relative: false,
                addend: 0,
            }],
            late_patch_offsets: vec![],
            label_distances: vec![],
        };
        let rendered = render_audit_file(&artifact);
        assert!(rendered.contains("**ff**"));
        assert!(rendered.contains("90"));
    }
}
