//! Type masks and type-deduction rules (spec §4.A).

use std::fmt;

/// A dynamic-language value tag. The set here is deliberately small and
/// fixed: the pipeline never needs to know more about a VM's type lattice
/// than "which tags can this slot hold."
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TypeTag {
    Nil,
    Boolean,
    Int32,
    Double,
    String,
    Table,
    Function,
}

impl TypeTag {
    pub const ALL: [TypeTag; 7] = [
        TypeTag::Nil,
        TypeTag::Boolean,
        TypeTag::Int32,
        TypeTag::Double,
        TypeTag::String,
        TypeTag::Table,
        TypeTag::Function,
    ];

    fn bit(self) -> u32 {
        1 << (self as u8)
    }
}

/// A set of [`TypeTag`]s, represented as a bitmask so deduction rules can
/// be pure, cheap, total functions.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Default)]
pub struct TypeMask(u32);

impl TypeMask {
    pub const NONE: TypeMask = TypeMask(0);

    pub fn single(tag: TypeTag) -> Self {
        TypeMask(tag.bit())
    }

    pub fn of(tags: impl IntoIterator<Item = TypeTag>) -> Self {
        tags.into_iter().fold(TypeMask::NONE, |acc, t| acc.union(TypeMask::single(t)))
    }

    pub fn all() -> Self {
        TypeMask::of(TypeTag::ALL)
    }

    pub fn union(self, other: TypeMask) -> Self {
        TypeMask(self.0 | other.0)
    }

    pub fn intersection(self, other: TypeMask) -> Self {
        TypeMask(self.0 & other.0)
    }

    pub fn contains(self, tag: TypeTag) -> bool {
        self.0 & tag.bit() != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// True if `self` and `other` share at least one tag: two variants
    /// whose input masks intersect are not exclusive (testable property
    /// 4, spec §8).
    pub fn intersects(self, other: TypeMask) -> bool {
        !self.intersection(other).is_empty()
    }
}

impl fmt::Debug for TypeMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = TypeTag::ALL
            .iter()
            .filter(|t| self.contains(**t))
            .map(|t| match t {
                TypeTag::Nil => "Nil",
                TypeTag::Boolean => "Boolean",
                TypeTag::Int32 => "Int32",
                TypeTag::Double => "Double",
                TypeTag::String => "String",
                TypeTag::Table => "Table",
                TypeTag::Function => "Function",
            })
            .collect();
        write!(f, "TypeMask({})", names.join("|"))
    }
}

/// A total function from input type masks to an output type mask (spec
/// §4.A). Implementations offer `AlwaysOutput`, `BypassFromOperand`,
/// `UpcastFromUnion`, and a rule-combinator (`Either`, union of two rules'
/// outputs) rather than an open trait, so every rule is inspectable and
/// `Debug`-able for audit-file dumps.
#[derive(Clone, Debug)]
pub enum TypeDeductionRule {
    /// The output type mask is fixed regardless of input.
    AlwaysOutput(TypeMask),
    /// The output type mask equals the type mask of input operand `i`.
    BypassFromOperand(usize),
    /// The output type mask is the union of input operands `i` and `j`'s
    /// type masks (e.g. a phi-like merge of two possible producers).
    UpcastFromUnion(usize, usize),
    /// The output is the union of what both sub-rules would deduce.
    Either(Box<TypeDeductionRule>, Box<TypeDeductionRule>),
}

impl TypeDeductionRule {
    pub fn apply(&self, inputs: &[TypeMask]) -> TypeMask {
        match self {
            TypeDeductionRule::AlwaysOutput(mask) => *mask,
            TypeDeductionRule::BypassFromOperand(i) => inputs[*i],
            TypeDeductionRule::UpcastFromUnion(i, j) => inputs[*i].union(inputs[*j]),
            TypeDeductionRule::Either(a, b) => a.apply(inputs).union(b.apply(inputs)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn always_output_ignores_inputs() {
        let rule = TypeDeductionRule::AlwaysOutput(TypeMask::single(TypeTag::Double));
        assert_eq!(rule.apply(&[]), TypeMask::single(TypeTag::Double));
    }

    #[test]
    fn bypass_from_operand_selects_input() {
        let rule = TypeDeductionRule::BypassFromOperand(1);
        let inputs = [TypeMask::single(TypeTag::Int32), TypeMask::single(TypeTag::String)];
        assert_eq!(rule.apply(&inputs), TypeMask::single(TypeTag::String));
    }

    #[test]
    fn upcast_from_union_merges_two_operands() {
        let rule = TypeDeductionRule::UpcastFromUnion(0, 1);
        let inputs = [TypeMask::single(TypeTag::Int32), TypeMask::single(TypeTag::Double)];
        let out = rule.apply(&inputs);
        assert!(out.contains(TypeTag::Int32));
        assert!(out.contains(TypeTag::Double));
        assert!(!out.contains(TypeTag::String));
    }

    #[test]
    fn masks_intersect_iff_sharing_a_tag() {
        let a = TypeMask::of([TypeTag::Int32, TypeTag::Double]);
        let b = TypeMask::single(TypeTag::Double);
        let c = TypeMask::single(TypeTag::String);
        assert!(a.intersects(b));
        assert!(!a.intersects(c));
    }
}
