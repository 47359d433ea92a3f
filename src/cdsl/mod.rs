//! Operand & Variant Model (spec §4.A, component A of the pipeline).

pub mod opcode;
pub mod operand;
pub mod typemask;
pub mod variant;

pub use opcode::{OpcodeDef, OpcodeDefBuilder};
pub use operand::{Operand, OperandKind, Signedness, Width};
pub use typemask::{TypeDeductionRule, TypeMask, TypeTag};
pub use variant::{QuickenState, RegAllocHint, RegClass, ResultPlacement, Variant};
