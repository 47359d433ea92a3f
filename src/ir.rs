//! Semantic IR: the opaque, SSA-form body of an opcode's implementation
//! (spec §3 "Semantic IR Function").
//!
//! The lowering pipeline never interprets a general instruction; it only
//! recognizes a fixed set of *API calls* by symbol name and rewrites
//! those. Everything else (ordinary helper calls, arithmetic, etc.) is
//! opaque and is only ever inlined or left alone by the desugaring
//! driver (`crate::desugar`).

use std::fmt;

use serde::{Deserialize, Serialize};

/// An SSA value produced somewhere in the function.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ValueId(pub u32);

/// A basic block identifier.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockId(pub u32);

/// The VM-author-facing error kinds an `Error` API call may raise. Kept
/// as an opaque string tag: this crate does not know the VM's full error
/// taxonomy, only that `Error(kind)` must become a tail-call to the VM's
/// error handler (spec §4.D).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorKind(pub String);

/// The distinguished API calls the pipeline recognizes by symbol name
/// (spec §3). Anything not in this enum is an ordinary instruction the
/// desugaring driver may inline but the API Lowering pass never touches.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ApiCall {
    Return(Vec<ValueId>),
    ReturnNone,
    MakeCall { callee: ValueId, args: Vec<ValueId> },
    MakeTailCall { callee: ValueId, args: Vec<ValueId> },
    Error(ErrorKind),
    GuardIsDouble(ValueId),
    GuardIsInt32(ValueId),
    GetBytecodeMetadataPtr,
    /// `tier_up_weight` is `Some(cur - dst)` for a backward branch (the
    /// bytecode distance it makes up toward tier-up) and `None` for a
    /// forward branch, which makes no tier-up progress (spec §4.D).
    CondBr { cond: ValueId, if_true: BlockId, if_false: BlockId, tier_up_weight: Option<i64> },
    TierUpCheck { weight: i64 },
}

impl ApiCall {
    /// Whether this call, if it remains un-lowered, makes the enclosing
    /// variant's wrapper end in a tail call (spec §4.C's
    /// `may_make_tail_call`).
    pub fn is_tail_call(&self) -> bool {
        matches!(self, ApiCall::MakeTailCall { .. })
    }

    /// Whether this call can make the enclosing variant fall through to
    /// dispatch the next bytecode in sequence.
    pub fn may_fall_through(&self) -> bool {
        !matches!(
            self,
            ApiCall::Return(_) | ApiCall::ReturnNone | ApiCall::MakeTailCall { .. } | ApiCall::Error(_)
        )
    }
}

/// One instruction in a basic block: either a recognized API call, an
/// ordinary (opaque) call to a named helper function, or a plain
/// operation the pipeline never inspects.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Instr {
    Api(ApiCall),
    Call { callee: String, args: Vec<ValueId>, result: Option<ValueId> },
    Plain { op: String, args: Vec<ValueId>, result: Option<ValueId> },
}

impl Instr {
    pub fn as_api(&self) -> Option<&ApiCall> {
        match self {
            Instr::Api(call) => Some(call),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct BasicBlock {
    pub instrs: Vec<Instr>,
}

/// The opaque semantic body of one opcode variant: basic blocks and
/// instructions in SSA form.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct IrFunction {
    pub blocks: Vec<BasicBlock>,
}

impl IrFunction {
    pub fn new() -> Self {
        IrFunction { blocks: vec![BasicBlock::default()] }
    }

    pub fn push(&mut self, instr: Instr) -> &mut Self {
        self.blocks.last_mut().expect("function has no blocks").instrs.push(instr);
        self
    }

    /// All recognized API calls appearing anywhere in the function, in
    /// block-then-instruction order.
    pub fn api_calls(&self) -> impl Iterator<Item = &ApiCall> {
        self.blocks.iter().flat_map(|b| b.instrs.iter().filter_map(Instr::as_api))
    }

    /// All plain `Call` targets appearing anywhere in the function
    /// (consumed by the desugaring driver's capability gate).
    pub fn call_targets(&self) -> impl Iterator<Item = &str> {
        self.blocks.iter().flat_map(|b| b.instrs.iter()).filter_map(|i| match i {
            Instr::Call { callee, .. } => Some(callee.as_str()),
            _ => None,
        })
    }

    /// True iff no recognized API call remains anywhere in the function
    /// (testable property 5, "lowering idempotence").
    pub fn has_no_api_calls(&self) -> bool {
        self.api_calls().next().is_none()
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
