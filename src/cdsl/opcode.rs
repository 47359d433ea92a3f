//! Opcode definitions (spec §3 "Opcode Definition", §4.A).

use crate::cdsl::operand::Operand;
use crate::cdsl::typemask::TypeDeductionRule;
use crate::cdsl::variant::{widths_are_monotone, RegAllocHint, Variant, WidthChoices};
use crate::error::{PipelineError, Result};
use crate::ir::IrFunction;

/// A named operation: its operand list, result descriptor, variants, DFG
/// (speculative) variants, type-deduction rule, register-allocation
/// hints, and semantic body. Lives for the entire compilation; its
/// variants are produced during elaboration and owned by it.
#[derive(Debug)]
pub struct OpcodeDef {
    pub name: String,
    pub operands: Vec<Operand>,
    pub result: Option<Operand>,
    pub variants: Vec<Variant>,
    pub dfg_variants: Vec<Variant>,
    pub type_rule: TypeDeductionRule,
    pub reg_hints: Vec<RegAllocHint>,
    pub implementation: IrFunction,
}

impl OpcodeDef {
    /// Validate the invariants spec §3 requires of an elaborated opcode:
    /// non-empty variant set, and pairwise-monotone variant operand
    /// widths. Exposed crate-wide since the CLI also assembles
    /// `OpcodeDef`s directly from an input artifact's manifest, bypassing
    /// [`OpcodeDefBuilder`].
    pub(crate) fn validate(&self) -> Result<()> {
        if self.variants.is_empty() {
            return Err(PipelineError::InputMalformed(format!(
                "opcode `{}` has an empty variant set after elaboration",
                self.name
            )));
        }
        for (i, a) in self.variants.iter().enumerate() {
            for b in &self.variants[i + 1..] {
                if !widths_are_monotone(&a.operand_widths, &b.operand_widths) {
                    return Err(PipelineError::InputMalformed(format!(
                        "opcode `{}` variants `{}` and `{}` have non-monotone operand widths",
                        self.name, a.name, b.name
                    )));
                }
            }
        }
        for (i, a) in self.dfg_variants.iter().enumerate() {
            for b in &self.dfg_variants[i + 1..] {
                if a.guard.intersects(b.guard) {
                    return Err(PipelineError::LayoutConflict(format!(
                        "opcode `{}` DFG variants `{}` and `{}` have overlapping input-type-mask coverage {:?}",
                        self.name,
                        a.name,
                        b.name,
                        a.guard.intersection(b.guard)
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Builds an [`OpcodeDef`] from declarative pieces, enumerating variants
/// from per-operand width choices the way `cdsl::instructions` builds an
/// `Instruction` from an `InstructionBuilder`: the builder is consumed
/// once into an immutable value.
pub struct OpcodeDefBuilder {
    name: String,
    operands: Vec<Operand>,
    result: Option<Operand>,
    width_choices: WidthChoices,
    restrictions: Option<Vec<Vec<crate::cdsl::operand::Width>>>,
    dfg_variants: Vec<Variant>,
    type_rule: TypeDeductionRule,
    reg_hints: Vec<RegAllocHint>,
    implementation: IrFunction,
}

impl OpcodeDefBuilder {
    pub fn new(name: impl Into<String>, type_rule: TypeDeductionRule) -> Self {
        OpcodeDefBuilder {
            name: name.into(),
            operands: Vec::new(),
            result: None,
            width_choices: Vec::new(),
            restrictions: None,
            dfg_variants: Vec::new(),
            type_rule,
            reg_hints: Vec::new(),
            implementation: IrFunction::new(),
        }
    }

    pub fn operand(mut self, operand: Operand, width_choices: Vec<crate::cdsl::operand::Width>) -> Self {
        self.operands.push(operand);
        self.width_choices.push(width_choices);
        self
    }

    pub fn result(mut self, result: Operand) -> Self {
        self.result = Some(result);
        self
    }

    pub fn restrict_variants(mut self, allowed: Vec<Vec<crate::cdsl::operand::Width>>) -> Self {
        self.restrictions = Some(allowed);
        self
    }

    pub fn dfg_variant(mut self, variant: Variant) -> Self {
        self.dfg_variants.push(variant);
        self
    }

    pub fn reg_hint(mut self, hint: RegAllocHint) -> Self {
        self.reg_hints.push(hint);
        self
    }

    pub fn implementation(mut self, ir: IrFunction) -> Self {
        self.implementation = ir;
        self
    }

    pub fn build(self) -> Result<OpcodeDef> {
        let tuples = crate::cdsl::variant::enumerate_width_tuples(
            &self.width_choices,
            self.restrictions.as_deref(),
        )?;

        let variants: Vec<Variant> = tuples
            .into_iter()
            .enumerate()
            .map(|(i, widths)| Variant {
                name: format!("{}_{}", self.name, i),
                operand_widths: widths,
                result: None,
                quicken: crate::cdsl::variant::QuickenState::Fixed,
                metadata_slot_width: None,
                guard: crate::cdsl::typemask::TypeMask::all(),
            })
            .collect();

        let def = OpcodeDef {
            name: self.name,
            operands: self.operands,
            result: self.result,
            variants,
            dfg_variants: self.dfg_variants,
            type_rule: self.type_rule,
            reg_hints: self.reg_hints,
            implementation: self.implementation,
        };
        def.validate()?;
        Ok(def)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cdsl::operand::{Signedness, Width};
    use crate::cdsl::typemask::{TypeMask, TypeTag};

    #[test]
    fn single_literal_operand_variant_matches_s1() {
        // spec §8 S1: SetConstInt16 with one literal-int16 operand.
        let def = OpcodeDefBuilder::new(
            "SetConstInt16",
            TypeDeductionRule::AlwaysOutput(TypeMask::single(TypeTag::Double)),
        )
        .operand(Operand::literal(Width::Two, Signedness::Signed), vec![Width::Two])
        .build()
        .unwrap();

        assert_eq!(def.variants.len(), 1);
        assert_eq!(def.variants[0].encoded_len(), 1 + 2);
    }

    #[test]
    fn empty_variant_set_is_fatal() {
        let result = OpcodeDefBuilder::new("Bad", TypeDeductionRule::AlwaysOutput(TypeMask::NONE))
            .operand(Operand::literal(Width::One, Signedness::Unsigned), vec![Width::One])
            .restrict_variants(vec![vec![Width::Two]])
            .build();
        assert!(result.is_err());
    }

    fn dfg_variant(name: &str, guard: TypeMask) -> Variant {
        Variant {
            name: name.into(),
            operand_widths: vec![Width::Two],
            result: None,
            quicken: crate::cdsl::variant::QuickenState::Fixed,
            metadata_slot_width: None,
            guard,
        }
    }

    #[test]
    fn overlapping_dfg_variant_guards_are_a_layout_conflict() {
        // testable property 4 (spec §8): no two variants of the same
        // opcode may claim overlapping input-type-mask coverage.
        let result = OpcodeDefBuilder::new("Add", TypeDeductionRule::AlwaysOutput(TypeMask::all()))
            .operand(Operand::literal(Width::Two, Signedness::Unsigned), vec![Width::Two])
            .dfg_variant(dfg_variant("Add_int", TypeMask::of([TypeTag::Int32, TypeTag::Double])))
            .dfg_variant(dfg_variant("Add_double", TypeMask::single(TypeTag::Double)))
            .build();
        assert!(matches!(result, Err(PipelineError::LayoutConflict(_))));
    }

    #[test]
    fn disjoint_dfg_variant_guards_are_accepted() {
        let result = OpcodeDefBuilder::new("Add", TypeDeductionRule::AlwaysOutput(TypeMask::all()))
            .operand(Operand::literal(Width::Two, Signedness::Unsigned), vec![Width::Two])
            .dfg_variant(dfg_variant("Add_int", TypeMask::single(TypeTag::Int32)))
            .dfg_variant(dfg_variant("Add_double", TypeMask::single(TypeTag::Double)))
            .build();
        assert!(result.is_ok());
    }
}
