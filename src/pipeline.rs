//! Top-level pipeline driver (spec §5): threads stages A→H, owning the
//! process-wide [`ConstantPool`] explicitly and passing it by reference
//! rather than through ambient state.

use std::collections::HashMap;

use crate::cdsl::OpcodeDef;
use crate::desugar::{DesugaringDriver, FunctionClass, Inliner};
use crate::error::Result;
use crate::lowering::{Tier, TierUpPolicy};
use crate::pool::{ConstantPool, FrozenConstantPool};
use crate::stencil::extract::ObjectFile;
use crate::stencil::patch::{self, PatchProgram, PreFixupCode};
use crate::stencil::types::Stencil;
use crate::stencil::{extract_stencil, ic};
use crate::wrapper::{self, Section, Wrapper};

/// Configuration threaded explicitly through the driver (spec §5 "never
/// as ambient state"): whether tier-up machinery is compiled in, and
/// whether human-readable audit files are emitted alongside the binary
/// stencil artifacts (spec §6 output artifact 4).
#[derive(Copy, Clone, Debug)]
pub struct PipelineConfig {
    pub tier_up: TierUpPolicy,
    pub emit_audit_files: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig { tier_up: TierUpPolicy::Disabled, emit_audit_files: false }
    }
}

/// One opcode's fully lowered output: a synthesized [`Wrapper`] per
/// (variant, tier), in variant-declaration order (spec §5 "variant
/// emission order within an opcode follows declaration order").
pub struct LoweredOpcode {
    pub opcode_name: String,
    pub wrappers: Vec<Wrapper>,
}

/// The single mutable owner of the process-wide shared-constant pool
/// (spec §5, design note "Process-wide constant pool"). Stages are pure
/// functions invoked as methods here only so the pool can be threaded by
/// `&mut` reference without becoming ambient/global state.
pub struct Pipeline {
    pool: ConstantPool,
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Pipeline { pool: ConstantPool::new(), config }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Stages B + C + D for one opcode definition: desugar each variant's
    /// semantic body once per `(variant, tier)` pair, then synthesize and
    /// lower its wrapper. `section_of` chooses hot/cold per variant (spec
    /// §4.C "chosen by a per-variant annotation").
    pub fn lower_opcode<I: Inliner + Clone>(
        &self,
        def: &OpcodeDef,
        inliner: &I,
        function_classes: &HashMap<String, FunctionClass>,
        tiers: &[Tier],
        section_of: impl Fn(&str) -> Section,
    ) -> Result<LoweredOpcode> {
        let mut wrappers = Vec::new();
        for variant in &def.variants {
            let mut body = def.implementation.clone();
            let mut driver = DesugaringDriver::new(inliner.clone(), function_classes.clone());
            driver.desugar(&mut body)?;

            for &tier in tiers {
                let wrapper = wrapper::synthesize(variant, &body, tier, self.config.tier_up, section_of(&variant.name))?;
                wrappers.push(wrapper);
            }
        }
        Ok(LoweredOpcode { opcode_name: def.name.clone(), wrappers })
    }

    /// Stage E: extract a stencil from a compiled object file, interning
    /// any shared constants it references into the pool this pipeline
    /// owns.
    pub fn extract_stencil(&mut self, obj: &dyn ObjectFile) -> Result<Stencil> {
        extract_stencil(obj, &mut self.pool)
    }

    /// Stage F: plan the patch program for a previously extracted
    /// stencil.
    pub fn plan_patch(&self, stencil: &Stencil) -> Result<(PreFixupCode, PatchProgram)> {
        patch::plan(stencil)
    }

    /// Stage H: split out this stencil's inline-cache sites.
    pub fn extract_ic_sites(&self, stencil: &Stencil, site_name: &str) -> Vec<ic::IcSite> {
        ic::extract_ic_sites(stencil, site_name)
    }

    /// Freeze the pool once every opcode has been extracted (spec §5:
    /// "readers see an immutable snapshot once extraction is complete").
    /// Consumes the pipeline, since nothing may mutate the pool after
    /// this point.
    pub fn into_frozen_pool(self) -> FrozenConstantPool {
        self.pool.into_frozen()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cdsl::{OpcodeDefBuilder, Operand, TypeDeductionRule, TypeMask, TypeTag, Width};
    use crate::cdsl::operand::Signedness;
    use crate::ir::{ApiCall, Instr};

    #[derive(Clone)]
    struct NullInliner;
    impl Inliner for NullInliner {
        fn run_pass(&mut self, _func: &mut crate::ir::IrFunction, _attrs: &HashMap<String, crate::desugar::InlineAttribute>) -> bool {
            false
        }
    }

    #[test]
    fn lowering_an_opcode_produces_one_wrapper_per_variant_and_tier() {
        let mut def = OpcodeDefBuilder::new(
            "SetConstInt16",
            TypeDeductionRule::AlwaysOutput(TypeMask::single(TypeTag::Double)),
        )
        .operand(Operand::literal(Width::Two, Signedness::Signed), vec![Width::Two])
        .build()
        .unwrap();
        def.implementation.push(Instr::Api(ApiCall::ReturnNone));

        let pipeline = Pipeline::new(PipelineConfig::default());
        let lowered = pipeline
            .lower_opcode(
                &def,
                &NullInliner,
                &HashMap::new(),
                &[Tier::Interpreter, Tier::BaselineJit],
                |_| Section::Hot,
            )
            .unwrap();

        assert_eq!(lowered.opcode_name, "SetConstInt16");
        assert_eq!(lowered.wrappers.len(), def.variants.len() * 2);
    }

    #[test]
    fn extracting_a_stencil_interns_into_the_owned_pool() {
        struct Empty;
        impl ObjectFile for Empty {
            fn sections(&self) -> Vec<crate::stencil::ObjectSection<'_>> {
                vec![]
            }
            fn relocations_in(&self, _name: &str) -> Vec<crate::stencil::RawRelocation<'_>> {
                vec![]
            }
        }
        let mut pipeline = Pipeline::new(PipelineConfig::default());
        pipeline.extract_stencil(&Empty).unwrap();
        let frozen = pipeline.into_frozen_pool();
        assert_eq!(frozen.iter().count(), 0);
    }
}
