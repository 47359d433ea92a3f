//! Command-line surface (spec §6): the three subcommands a build system
//! invokes against this pipeline, wired to the interchange container, the
//! [`Pipeline`] driver, and the output-artifact writers.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};

use crate::cdsl::operand::{Signedness, Width};
use crate::cdsl::typemask::{TypeDeductionRule, TypeMask};
use crate::cdsl::variant::{QuickenState, Variant};
use crate::cdsl::{Operand, OpcodeDef};
use crate::desugar::Inliner;
use crate::error::{PipelineError, Result};
use crate::interchange::InputArtifact;
use crate::ir::IrFunction;
use crate::lowering::Tier;
use crate::output;
use crate::pipeline::{Pipeline, PipelineConfig};
use crate::stencil::JsonObjectFile;
use crate::wrapper::Section;

#[derive(Parser, Debug)]
#[command(name = "stencilc", about = "Bytecode lowering and copy-and-patch stencil generation pipeline")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Elaborate an input artifact's manifest and write the declaration
    /// header plus a processed-manifest summary for later stages.
    ProcessBytecodeDef {
        input: PathBuf,
        header_out: PathBuf,
        json_out: PathBuf,
    },
    /// Elaborate an input artifact's manifest and write the declaration
    /// header, the dispatch table, and the parallel name table.
    GenerateBuilderApi {
        input: PathBuf,
        header_out: PathBuf,
        cpp_out: PathBuf,
        cpp2_out: PathBuf,
    },
    /// Extract, patch-plan, and serialize a stencil for one compiled
    /// wrapper.
    GenerateStencil {
        #[arg(long, value_enum)]
        tier: TierArg,
        opcode_name: String,
        variant_name: String,
        object_file: PathBuf,
        stencil_out: PathBuf,
        #[arg(long)]
        audit_out: Option<PathBuf>,
    },
}

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum TierArg {
    Interpreter,
    Baseline,
    Optimizing,
}

impl From<TierArg> for Tier {
    fn from(arg: TierArg) -> Self {
        match arg {
            TierArg::Interpreter => Tier::Interpreter,
            TierArg::Baseline => Tier::BaselineJit,
            TierArg::Optimizing => Tier::OptimizingJit,
        }
    }
}

/// Stands in for the external function-level inliner library (spec §1):
/// the CLI has no general-purpose IR optimizer to call, so it hands the
/// desugaring driver an inliner that never finds anything to inline. Real
/// deployments wire `Inliner` to that library instead of this type.
#[derive(Clone)]
struct NoopInliner;

impl Inliner for NoopInliner {
    fn run_pass(&mut self, _func: &mut IrFunction, _attributes: &HashMap<String, crate::desugar::InlineAttribute>) -> bool {
        false
    }
}

fn width_of(bytes: u8) -> Result<Width> {
    match bytes {
        1 => Ok(Width::One),
        2 => Ok(Width::Two),
        4 => Ok(Width::Four),
        other => Err(PipelineError::InputMalformed(format!("unsupported operand width {other}"))),
    }
}

/// Builds the [`OpcodeDef`]s an input artifact's manifest describes,
/// pairing each manifest entry with its decoded IR module by position
/// (spec §6: the manifest and the IR module travel together in one
/// artifact, in matching order).
fn defs_from_artifact(artifact: &InputArtifact) -> Result<Vec<OpcodeDef>> {
    let ir_bytes = artifact.decode_ir_module()?;
    let bodies: Vec<IrFunction> = serde_json::from_slice(&ir_bytes)?;
    if bodies.len() != artifact.manifest.len() {
        return Err(PipelineError::InputMalformed(format!(
            "manifest declares {} opcodes but the IR module carries {} function bodies",
            artifact.manifest.len(),
            bodies.len()
        )));
    }

    artifact
        .manifest
        .iter()
        .zip(bodies)
        .map(|(entry, implementation)| {
            let variants = entry
                .variants
                .iter()
                .map(|v| {
                    let operand_widths =
                        v.operand_widths.iter().map(|&w| width_of(w)).collect::<Result<Vec<_>>>()?;
                    Ok(Variant {
                        name: v.name.clone(),
                        operand_widths,
                        result: None,
                        quicken: QuickenState::Fixed,
                        metadata_slot_width: v.metadata_slot_width.map(|w| w as usize),
                        guard: TypeMask::all(),
                    })
                })
                .collect::<Result<Vec<_>>>()?;

            let def = OpcodeDef {
                name: entry.name.clone(),
                operands: variants
                    .first()
                    .map(|v| v.operand_widths.iter().map(|&w| Operand::literal(w, Signedness::Unsigned)).collect())
                    .unwrap_or_default(),
                result: None,
                variants,
                dfg_variants: Vec::new(),
                type_rule: TypeDeductionRule::AlwaysOutput(TypeMask::NONE),
                reg_hints: Vec::new(),
                implementation,
            };
            def.validate()?;
            Ok(def)
        })
        .collect()
}

#[derive(Serialize, Deserialize, Debug)]
struct ProcessedWrapper {
    variant_name: String,
    tier: String,
    may_fall_through_to_next_bytecode: bool,
    may_make_tail_call: bool,
}

#[derive(Serialize, Deserialize, Debug)]
struct ProcessedOpcode {
    opcode_name: String,
    wrappers: Vec<ProcessedWrapper>,
}

#[derive(Serialize, Deserialize, Debug)]
struct ProcessedManifest {
    opcodes: Vec<ProcessedOpcode>,
}

fn tier_label(tier: Tier) -> &'static str {
    match tier {
        Tier::Interpreter => "interpreter",
        Tier::BaselineJit => "baseline_jit",
        Tier::OptimizingJit => "optimizing_jit",
    }
}

const ALL_TIERS: [Tier; 3] = [Tier::Interpreter, Tier::BaselineJit, Tier::OptimizingJit];
const DISPATCH_TABLE_SYMBOL: &str = "g_bytecode_dispatch_table";

pub fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::ProcessBytecodeDef { input, header_out, json_out } => {
            let artifact = InputArtifact::from_json(&fs::read(input)?)?;
            let defs = defs_from_artifact(&artifact)?;
            let pipeline = Pipeline::new(PipelineConfig::default());

            let mut processed = Vec::with_capacity(defs.len());
            for def in &defs {
                log::info!("lowering opcode `{}` ({} variants)", def.name, def.variants.len());
                let lowered =
                    pipeline.lower_opcode(def, &NoopInliner, &HashMap::new(), &ALL_TIERS, |_| Section::Hot)?;
                processed.push(ProcessedOpcode {
                    opcode_name: lowered.opcode_name,
                    wrappers: lowered
                        .wrappers
                        .iter()
                        .map(|w| ProcessedWrapper {
                            variant_name: w.variant_name.clone(),
                            tier: tier_label(w.tier).to_string(),
                            may_fall_through_to_next_bytecode: w.may_fall_through_to_next_bytecode,
                            may_make_tail_call: w.may_make_tail_call,
                        })
                        .collect(),
                });
            }

            crate::srcgen::write_atomically(header_out, output::render_declaration_file(&defs).as_bytes())?;
            let summary = ProcessedManifest { opcodes: processed };
            crate::srcgen::write_atomically(json_out, &serde_json::to_vec_pretty(&summary)?)?;
            Ok(())
        }

        Command::GenerateBuilderApi { input, header_out, cpp_out, cpp2_out } => {
            let artifact = InputArtifact::from_json(&fs::read(input)?)?;
            let defs = defs_from_artifact(&artifact)?;

            crate::srcgen::write_atomically(header_out, output::render_declaration_file(&defs).as_bytes())?;
            crate::srcgen::write_atomically(
                cpp_out,
                output::render_dispatch_table(&defs, DISPATCH_TABLE_SYMBOL).as_bytes(),
            )?;
            crate::srcgen::write_atomically(
                cpp2_out,
                output::render_name_table(&defs, DISPATCH_TABLE_SYMBOL).as_bytes(),
            )?;
            Ok(())
        }

        Command::GenerateStencil { tier, opcode_name, variant_name, object_file, stencil_out, audit_out } => {
            let obj: JsonObjectFile = serde_json::from_slice(&fs::read(object_file)?)?;
            obj.validate_relocation_kinds()?;

            let mut pipeline = Pipeline::new(PipelineConfig { emit_audit_files: audit_out.is_some(), ..PipelineConfig::default() });
            let stencil = pipeline.extract_stencil(&obj)?;
            let (pre_fixup, program) = pipeline.plan_patch(&stencil)?;
            let artifact =
                output::build_stencil_artifact(&opcode_name, &variant_name, tier.into(), &stencil, &pre_fixup, &program);

            output::write_stencil_artifact(&artifact, &stencil_out)?;
            if let Some(audit_path) = audit_out {
                crate::srcgen::write_atomically(audit_path, output::render_audit_file(&artifact).as_bytes())?;
            }
            log::info!("wrote stencil for {opcode_name}/{variant_name} ({:?})", Tier::from(tier));
            Ok(())
        }
    }
}
