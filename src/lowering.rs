//! API Lowering (spec §4.D): rewrites each recognized API call to
//! tier-appropriate IR.

use crate::error::{PipelineError, Result};
use crate::ir::{ApiCall, BlockId, IrFunction, ValueId};
#[cfg(test)]
use crate::ir::Instr;
use crate::reloc::{CodeOffset, SymbolKind};
use crate::stencil::types::special;

/// The three execution tiers the pipeline generates wrappers for.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Tier {
    Interpreter,
    BaselineJit,
    OptimizingJit,
}

/// Stack-frame discipline (spec §4.D "Stack-frame discipline"): every
/// frame is preceded by a fixed-size header; locals begin immediately
/// after it. `SLOT_WIDTH` is the VM's uniform stack-slot width in bytes.
pub const SLOT_WIDTH: usize = 8;
/// caller-base, return-address, function-pointer, caller-bytecode-offset.
pub const FRAME_HEADER_SLOTS: usize = 4;
pub const FRAME_HEADER_SIZE: usize = FRAME_HEADER_SLOTS * SLOT_WIDTH;

/// The VM-mandated minimum number of return slots a `Return` must zero-
/// fill up to (spec §8 S4).
pub const MIN_RETURN_SLOTS: usize = 3;

/// One lowered control-flow continuation: either a patch hole (JIT tiers,
/// resolved at stencil instantiation time) or a direct dispatch target
/// (interpreter tier, resolved at lowering time since bytecode offsets
/// are already known).
#[derive(Clone, Debug, PartialEq)]
pub enum Continuation {
    /// Dispatch to the next bytecode at `bytecode_pointer + variant_size`.
    NextBytecode,
    /// Dispatch to a computed destination (a branch target).
    Destination(BlockId),
    /// A patch hole the caller resolves once the JIT buffer's layout is
    /// known.
    Hole(SymbolKind),
}

/// A single lowered operation emitted in place of a recognized API call.
/// This is intentionally a small closed set of tier-agnostic primitives;
/// the stencil stages (E-H) are what turn these into bytes.
#[derive(Clone, Debug, PartialEq)]
pub enum LoweredOp {
    /// Write values to the caller's expected return slots, zero-filling
    /// up to `MIN_RETURN_SLOTS` with the nil immediate, then dispatch to
    /// `target`.
    WriteReturnValues { values: Vec<ValueId>, zero_fill_to: usize, target: Continuation },
    /// Clear the variadic-return cursor (no values returned).
    ClearVariadicReturn { target: Continuation },
    /// Build a new frame header at `sp + locals` and tail-call or call
    /// `callee`'s best entry for the given tier.
    BuildFrameAndCall { callee: ValueId, args: Vec<ValueId>, is_tail: bool, continuation: Continuation },
    /// Tail-call the VM's error handler with `kind` and the current frame.
    TailCallErrorHandler { kind: String },
    /// Compute `code_block_base + metadata_offset + slot * struct_size`.
    ComputeMetadataPtr { metadata_base: Continuation },
    /// Select between two dispatch targets based on `cond`, and — if
    /// tier-up is enabled — apply a tier-up counter delta on the
    /// backward-branch path.
    CondBranch { cond: ValueId, if_true: Continuation, if_false: Continuation, tier_up_delta: Option<i64> },
    /// Decrement the tier-up counter by `weight`; if it crosses zero,
    /// trigger compilation of the next tier.
    TierUpCheck { weight: i64 },
}

/// Whether tier-up machinery is compiled in at all. Spec §4.D: "must be
/// omitted entirely when tier-up is disabled at build time."
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TierUpPolicy {
    Enabled,
    Disabled,
}

/// Lowers every recognized API call in `func` to tier-specific
/// [`LoweredOp`]s, consuming the function's API calls entirely (testable
/// property 5: a second pass over already-lowered IR is a no-op since
/// there is nothing left for it to touch).
pub fn lower_api_calls(func: &IrFunction, tier: Tier, tier_up: TierUpPolicy) -> Result<Vec<LoweredOp>> {
    let mut ops = Vec::new();
    for call in func.api_calls() {
        ops.push(lower_one(call, tier, tier_up)?);
    }
    Ok(ops)
}

fn lower_one(call: &ApiCall, tier: Tier, tier_up: TierUpPolicy) -> Result<LoweredOp> {
    match call {
        ApiCall::Return(values) => Ok(LoweredOp::WriteReturnValues {
            values: values.clone(),
            zero_fill_to: MIN_RETURN_SLOTS,
            target: return_continuation(tier),
        }),
        ApiCall::ReturnNone => Ok(LoweredOp::ClearVariadicReturn { target: return_continuation(tier) }),
        ApiCall::MakeCall { callee, args } => Ok(LoweredOp::BuildFrameAndCall {
            callee: *callee,
            args: args.clone(),
            is_tail: false,
            continuation: call_continuation(tier),
        }),
        ApiCall::MakeTailCall { callee, args } => Ok(LoweredOp::BuildFrameAndCall {
            callee: *callee,
            args: args.clone(),
            is_tail: true,
            continuation: call_continuation(tier),
        }),
        ApiCall::Error(kind) => Ok(LoweredOp::TailCallErrorHandler { kind: kind.0.clone() }),
        ApiCall::GuardIsDouble(_) | ApiCall::GuardIsInt32(_) => Err(PipelineError::unsupported(
            "type guards are lowered by the Optimizing JIT speculation pass, not generic API Lowering",
            format!("{call:?}"),
        )),
        ApiCall::GetBytecodeMetadataPtr => Ok(LoweredOp::ComputeMetadataPtr {
            metadata_base: match tier {
                Tier::Interpreter => Continuation::NextBytecode,
                Tier::BaselineJit | Tier::OptimizingJit => {
                    Continuation::Hole(SymbolKind::Hole { ordinal: special::METADATA_BASE.0 })
                }
            },
        }),
        ApiCall::CondBr { cond, if_true, if_false, tier_up_weight } => {
            let (t, f) = match tier {
                Tier::Interpreter => (Continuation::Destination(*if_true), Continuation::Destination(*if_false)),
                Tier::BaselineJit | Tier::OptimizingJit => (
                    Continuation::Hole(SymbolKind::Hole { ordinal: special::BRANCH_TARGET_TRUE.0 }),
                    Continuation::Hole(SymbolKind::Hole { ordinal: special::BRANCH_TARGET_FALSE.0 }),
                ),
            };
            // Only a backward branch (tier_up_weight = Some(cur - dst)) makes
            // tier-up progress; a forward branch never touches the counter.
            let delta = match (tier_up, tier_up_weight) {
                (TierUpPolicy::Enabled, Some(weight)) => Some(-weight),
                _ => None,
            };
            Ok(LoweredOp::CondBranch { cond: *cond, if_true: t, if_false: f, tier_up_delta: delta })
        }
        ApiCall::TierUpCheck { weight } => match tier_up {
            TierUpPolicy::Enabled => Ok(LoweredOp::TierUpCheck { weight: *weight }),
            TierUpPolicy::Disabled => Err(PipelineError::unsupported(
                "TierUpCheck with tier-up disabled at build time",
                "lower_one",
            )),
        },
    }
}

fn return_continuation(tier: Tier) -> Continuation {
    match tier {
        Tier::Interpreter => Continuation::NextBytecode,
        Tier::BaselineJit | Tier::OptimizingJit => {
            Continuation::Hole(SymbolKind::Hole { ordinal: special::RETURN_CONTINUATION.0 })
        }
    }
}

fn call_continuation(tier: Tier) -> Continuation {
    match tier {
        Tier::Interpreter => Continuation::NextBytecode,
        Tier::BaselineJit | Tier::OptimizingJit => {
            Continuation::Hole(SymbolKind::Hole { ordinal: special::CALL_CONTINUATION.0 })
        }
    }
}

/// Decrements a 64-bit signed tier-up counter by `weight`. Crossing zero
/// (the result is `<= 0` after a strictly positive counter) signals
/// "trigger compilation of the next tier" to the caller.
pub fn apply_tier_up_delta(counter: i64, weight: i64) -> (i64, bool) {
    let next = counter - weight;
    (next, counter > 0 && next <= 0)
}

/// Layout of one frame header's field offsets, in bytes from the frame
/// base, derived from [`FRAME_HEADER_SLOTS`] (spec §4.D "Stack-frame
/// discipline"): caller-base, return-address, function-pointer,
/// caller-bytecode-offset.
pub struct FrameHeaderLayout;

impl FrameHeaderLayout {
    pub fn caller_base_offset() -> CodeOffset {
        0
    }
    pub fn return_address_offset() -> CodeOffset {
        SLOT_WIDTH as CodeOffset
    }
    pub fn function_pointer_offset() -> CodeOffset {
        (2 * SLOT_WIDTH) as CodeOffset
    }
    pub fn caller_bytecode_offset_offset() -> CodeOffset {
        (3 * SLOT_WIDTH) as CodeOffset
    }
    pub fn locals_base_offset() -> CodeOffset {
        FRAME_HEADER_SIZE as CodeOffset
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::ErrorKind;

    #[test]
    fn return_lowers_to_next_bytecode_on_interpreter_and_hole_on_jit() {
        let call = ApiCall::Return(vec![ValueId(0)]);
        let interp = lower_one(&call, Tier::Interpreter, TierUpPolicy::Disabled).unwrap();
        assert_eq!(
            interp,
            LoweredOp::WriteReturnValues {
                values: vec![ValueId(0)],
                zero_fill_to: MIN_RETURN_SLOTS,
                target: Continuation::NextBytecode,
            }
        );
        let jit = lower_one(&call, Tier::BaselineJit, TierUpPolicy::Disabled).unwrap();
        assert!(matches!(
            jit,
            LoweredOp::WriteReturnValues { target: Continuation::Hole(_), .. }
        ));
    }

    #[test]
    fn return_zero_fills_to_s4_minimum() {
        // spec §8 S4: a Return with 1 value zero-fills up to 3 slots.
        let call = ApiCall::Return(vec![ValueId(7)]);
        let lowered = lower_one(&call, Tier::Interpreter, TierUpPolicy::Disabled).unwrap();
        match lowered {
            LoweredOp::WriteReturnValues { values, zero_fill_to, .. } => {
                assert_eq!(values.len(), 1);
                assert_eq!(zero_fill_to, 3);
            }
            _ => panic!("expected WriteReturnValues"),
        }
    }

    #[test]
    fn error_lowers_to_tail_call_regardless_of_tier() {
        let call = ApiCall::Error(ErrorKind("OutOfMemory".into()));
        for tier in [Tier::Interpreter, Tier::BaselineJit, Tier::OptimizingJit] {
            let lowered = lower_one(&call, tier, TierUpPolicy::Disabled).unwrap();
            assert_eq!(lowered, LoweredOp::TailCallErrorHandler { kind: "OutOfMemory".into() });
        }
    }

    #[test]
    fn cond_br_weighted_delta_reflects_branch_distance_not_a_fixed_constant() {
        // property 7 (spec §5): the counter delta a backward branch applies
        // must track the branch's own weight, not a hardcoded step.
        let call = ApiCall::CondBr {
            cond: ValueId(0),
            if_true: BlockId(0),
            if_false: BlockId(1),
            tier_up_weight: Some(7),
        };
        let lowered = lower_one(&call, Tier::Interpreter, TierUpPolicy::Enabled).unwrap();
        assert_eq!(
            lowered,
            LoweredOp::CondBranch {
                cond: ValueId(0),
                if_true: Continuation::Destination(BlockId(0)),
                if_false: Continuation::Destination(BlockId(1)),
                tier_up_delta: Some(-7),
            }
        );
    }

    #[test]
    fn cond_br_forward_branch_never_touches_the_counter() {
        let call =
            ApiCall::CondBr { cond: ValueId(0), if_true: BlockId(0), if_false: BlockId(1), tier_up_weight: None };
        let lowered = lower_one(&call, Tier::Interpreter, TierUpPolicy::Enabled).unwrap();
        assert!(matches!(lowered, LoweredOp::CondBranch { tier_up_delta: None, .. }));
    }

    #[test]
    fn tier_up_check_is_unsupported_when_disabled() {
        let call = ApiCall::TierUpCheck { weight: 1 };
        assert!(lower_one(&call, Tier::Interpreter, TierUpPolicy::Disabled).is_err());
        assert!(lower_one(&call, Tier::Interpreter, TierUpPolicy::Enabled).is_ok());
    }

    #[test]
    fn lowering_is_idempotent() {
        // property 5: once API calls are lowered, a function built from
        // only non-API instructions has nothing left for API Lowering to
        // touch.
        let mut func = IrFunction::new();
        func.push(Instr::Plain { op: "nop".into(), args: vec![], result: None });
        assert!(func.has_no_api_calls());
        let ops = lower_api_calls(&func, Tier::Interpreter, TierUpPolicy::Disabled).unwrap();
        assert!(ops.is_empty());
    }

    #[test]
    fn tier_up_counter_crosses_zero_exactly_once() {
        let (c1, fired1) = apply_tier_up_delta(5, 3);
        assert_eq!(c1, 2);
        assert!(!fired1);
        let (c2, fired2) = apply_tier_up_delta(c1, 3);
        assert_eq!(c2, -1);
        assert!(fired2);
        // Further negative deltas must not refire.
        let (c3, fired3) = apply_tier_up_delta(c2, 1);
        assert_eq!(c3, -2);
        assert!(!fired3);
    }

    #[test]
    fn frame_header_is_four_slots_and_locals_follow_immediately() {
        assert_eq!(FrameHeaderLayout::locals_base_offset() as usize, FRAME_HEADER_SIZE);
        assert_eq!(FRAME_HEADER_SIZE, 4 * SLOT_WIDTH);
    }
}
