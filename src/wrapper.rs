//! Wrapper Synthesis (spec §4.C): one entry function per (variant, tier)
//! pair with the correct dispatch ABI.

use crate::cdsl::Variant;
use crate::ir::IrFunction;
use crate::lowering::{self, Tier, TierUpPolicy};
use crate::error::Result;

/// Which section the synthesized entry function is placed in, chosen by
/// a per-variant annotation (spec §4.C).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Section {
    Hot,
    Cold,
}

/// The interpreter tier's fixed parameter list (spec §4.C).
pub const INTERPRETER_PARAMS: [&str; 4] = ["coroutine_context", "stack_base", "bytecode_pointer", "scratch"];

/// A synthesized entry function for one (variant, tier) pair.
#[derive(Debug)]
pub struct Wrapper {
    pub variant_name: String,
    pub tier: Tier,
    pub section: Section,
    pub may_fall_through_to_next_bytecode: bool,
    pub may_make_tail_call: bool,
    pub lowered: Vec<lowering::LoweredOp>,
}

/// Synthesize the entry function for `variant` at `tier`: inline the
/// (already-desugared) semantic body, then run API Lowering to rewrite
/// every remaining recognized call.
///
/// The two booleans `may_fall_through_to_next_bytecode` and
/// `may_make_tail_call` are derived here and persisted on the wrapper —
/// they are contracts the next stage (Stencil Extractor / Codegen
/// Emitter) relies on for epilogue shape (spec §8 S3).
pub fn synthesize(
    variant: &Variant,
    body: &IrFunction,
    tier: Tier,
    tier_up: TierUpPolicy,
    section: Section,
) -> Result<Wrapper> {
    let may_make_tail_call = body.api_calls().any(|c| c.is_tail_call());
    let may_fall_through_to_next_bytecode = body.api_calls().all(|c| c.may_fall_through());

    let lowered = lowering::lower_api_calls(body, tier, tier_up)?;

    Ok(Wrapper {
        variant_name: variant.name.clone(),
        tier,
        section,
        may_fall_through_to_next_bytecode,
        may_make_tail_call,
        lowered,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cdsl::variant::QuickenState;
    use crate::cdsl::Width;
    use crate::ir::{ApiCall, Instr, ValueId};

    fn trivial_variant() -> Variant {
        Variant {
            name: "Trivial_0".into(),
            operand_widths: vec![Width::Two],
            result: None,
            quicken: QuickenState::Fixed,
            metadata_slot_width: None,
            guard: crate::cdsl::TypeMask::all(),
        }
    }

    #[test]
    fn tail_call_body_yields_may_make_tail_call_true() {
        // spec §8 S3: a variant ending in MakeTailCall must produce a
        // wrapper with may_make_tail_call = true.
        let mut body = IrFunction::new();
        body.push(Instr::Api(ApiCall::MakeTailCall { callee: ValueId(0), args: vec![] }));

        let wrapper = synthesize(&trivial_variant(), &body, Tier::Interpreter, TierUpPolicy::Disabled, Section::Hot).unwrap();
        assert!(wrapper.may_make_tail_call);
        assert!(!wrapper.may_fall_through_to_next_bytecode);
    }

    #[test]
    fn plain_arithmetic_body_falls_through() {
        let mut body = IrFunction::new();
        body.push(Instr::Plain { op: "add".into(), args: vec![], result: None });

        let wrapper = synthesize(&trivial_variant(), &body, Tier::Interpreter, TierUpPolicy::Disabled, Section::Hot).unwrap();
        assert!(wrapper.may_fall_through_to_next_bytecode);
        assert!(!wrapper.may_make_tail_call);
    }
}
