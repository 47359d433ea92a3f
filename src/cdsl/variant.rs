//! Variant enumeration and encoding layout (spec §3 "Variant", §4.A).

use crate::cdsl::operand::Width;
use crate::cdsl::typemask::TypeMask;
use crate::error::{PipelineError, Result};

/// Register class a result (or a register-allocation hint) belongs to.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RegClass {
    Gpr,
    Fpr,
}

/// Where a variant's result is placed.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ResultPlacement {
    pub class: RegClass,
}

/// Whether a variant may be replaced at runtime by a type-specialized
/// sibling (an inline-cache-driven "quickened" bytecode).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum QuickenState {
    Fixed,
    MayQuicken { sibling: String },
}

/// A register-allocation hint attached to one operand of an opcode
/// definition (spec §3, Opcode Definition).
#[derive(Copy, Clone, Debug)]
pub struct RegAllocHint {
    pub operand_index: usize,
    pub class: RegClass,
}

/// A concretization of an opcode definition: operand widths bound, result
/// placement bound, quickening state bound.
#[derive(Clone, Debug)]
pub struct Variant {
    pub name: String,
    pub operand_widths: Vec<Width>,
    pub result: Option<ResultPlacement>,
    pub quicken: QuickenState,
    /// Width (in bytes) of a trailing metadata-slot reference, if this
    /// variant's encoding carries one (spec §6, metadata-slot layout).
    pub metadata_slot_width: Option<usize>,
    /// The input-type-mask coverage this variant claims under the
    /// opcode's type-deduction rule. `TypeMask::all()` for an ordinary
    /// (non-speculative) variant, meaning "no type constraint selects
    /// this variant over a sibling." A DFG (speculative) variant narrows
    /// this to the types its guard actually covers (spec §4.A, testable
    /// property 4).
    pub guard: TypeMask,
}

impl Variant {
    /// Total encoded length: 1 opcode byte + operand widths + optional
    /// metadata-slot reference (spec §4.A, and testable property 2).
    pub fn encoded_len(&self) -> usize {
        1 + self.operand_widths.iter().map(|w| w.bytes()).sum::<usize>()
            + self.metadata_slot_width.unwrap_or(0)
    }

    /// Two variants are interchangeable if they share operand count,
    /// result class, and have compatible (i.e. identical) encodings
    /// (spec §3).
    pub fn interchangeable_with(&self, other: &Variant) -> bool {
        self.operand_widths.len() == other.operand_widths.len()
            && self.result.map(|r| r.class) == other.result.map(|r| r.class)
            && self.operand_widths == other.operand_widths
    }

    /// Packs `values` into this variant's operand layout, little-endian,
    /// one entry per declared operand width (spec §4.A, testable property
    /// 2's round-trip half). Values wider than their declared width are
    /// truncated, matching the builder's own narrowing behavior.
    pub fn encode_operands(&self, values: &[u32]) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.operand_widths.iter().map(|w| w.bytes()).sum());
        for (width, value) in self.operand_widths.iter().zip(values) {
            bytes.extend_from_slice(&value.to_le_bytes()[..width.bytes()]);
        }
        bytes
    }

    /// Inverse of [`Variant::encode_operands`]: splits `bytes` back into
    /// one value per declared operand width.
    pub fn decode_operands(&self, bytes: &[u8]) -> Vec<u32> {
        let mut out = Vec::with_capacity(self.operand_widths.len());
        let mut offset = 0;
        for width in &self.operand_widths {
            let w = width.bytes();
            let mut buf = [0u8; 4];
            buf[..w].copy_from_slice(&bytes[offset..offset + w]);
            out.push(u32::from_le_bytes(buf));
            offset += w;
        }
        out
    }
}

/// Per-operand declared width choices, e.g. `[[One, Two], [Four]]` means
/// operand 0 may be encoded in 1 or 2 bytes and operand 1 is always 4
/// bytes.
pub type WidthChoices = Vec<Vec<Width>>;

/// Enumerate the cartesian product of declared operand-width choices,
/// intersected with an optional explicit list of allowed width tuples
/// ("variant restrictions"). Each resulting tuple becomes one variant's
/// `operand_widths`. Declaration order is preserved so placeholder
/// ordinals (spec §5) stay stable across runs.
pub fn enumerate_width_tuples(
    choices: &WidthChoices,
    restrictions: Option<&[Vec<Width>]>,
) -> Result<Vec<Vec<Width>>> {
    if choices.is_empty() {
        return Ok(vec![Vec::new()]);
    }
    let mut product: Vec<Vec<Width>> = vec![Vec::new()];
    for operand_choices in choices {
        if operand_choices.is_empty() {
            return Err(PipelineError::InputMalformed(
                "operand has no declared width choices".into(),
            ));
        }
        let mut next = Vec::with_capacity(product.len() * operand_choices.len());
        for prefix in &product {
            for w in operand_choices {
                let mut tuple = prefix.clone();
                tuple.push(*w);
                next.push(tuple);
            }
        }
        product = next;
    }

    let tuples = match restrictions {
        None => product,
        Some(allowed) => product
            .into_iter()
            .filter(|tuple| allowed.contains(tuple))
            .collect(),
    };

    if tuples.is_empty() {
        return Err(PipelineError::InputMalformed(
            "variant set is empty after elaboration".into(),
        ));
    }
    Ok(tuples)
}

/// Variant operand widths are monotone: for any two variants, one's
/// widths dominate the other's pointwise (`>=` in every position) or the
/// two are disjoint in every position (spec §3 invariant).
pub fn widths_are_monotone(a: &[Width], b: &[Width]) -> bool {
    if a.len() != b.len() {
        return true; // different arities can't be compared, so vacuously fine
    }
    let dominates_ge = a.iter().zip(b).all(|(x, y)| x >= y);
    let dominates_le = a.iter().zip(b).all(|(x, y)| x <= y);
    let disjoint = a.iter().zip(b).all(|(x, y)| x != y);
    dominates_ge || dominates_le || disjoint
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cartesian_product_preserves_declaration_order() {
        let choices = vec![vec![Width::One, Width::Two], vec![Width::Four]];
        let tuples = enumerate_width_tuples(&choices, None).unwrap();
        assert_eq!(
            tuples,
            vec![vec![Width::One, Width::Four], vec![Width::Two, Width::Four]]
        );
    }

    #[test]
    fn restrictions_filter_the_product() {
        let choices = vec![vec![Width::One, Width::Two]];
        let restrictions = vec![vec![Width::Two]];
        let tuples = enumerate_width_tuples(&choices, Some(&restrictions)).unwrap();
        assert_eq!(tuples, vec![vec![Width::Two]]);
    }

    #[test]
    fn empty_variant_set_after_elaboration_is_fatal() {
        let choices = vec![vec![Width::One]];
        let restrictions = vec![vec![Width::Four]];
        assert!(enumerate_width_tuples(&choices, Some(&restrictions)).is_err());
    }

    #[test]
    fn encoded_len_matches_one_plus_operand_widths() {
        let v = Variant {
            name: "v".into(),
            operand_widths: vec![Width::Two, Width::Four],
            result: None,
            quicken: QuickenState::Fixed,
            metadata_slot_width: None,
            guard: TypeMask::all(),
        };
        assert_eq!(v.encoded_len(), 1 + 2 + 4);
    }

    #[test]
    fn monotone_widths_accepts_dominance_and_disjointness() {
        assert!(widths_are_monotone(&[Width::One], &[Width::Two]));
        assert!(widths_are_monotone(&[Width::Two, Width::One], &[Width::One, Width::Two]));
    }

    #[test]
    fn decode_operands_recovers_values_written_by_encode_operands() {
        let v = Variant {
            name: "v".into(),
            operand_widths: vec![Width::One, Width::Four, Width::Two],
            result: None,
            quicken: QuickenState::Fixed,
            metadata_slot_width: None,
            guard: TypeMask::all(),
        };
        let values = vec![0xab, 0xdeadbeef, 0xbeef];
        let bytes = v.encode_operands(&values);
        assert_eq!(bytes.len(), v.encoded_len() - 1);
        assert_eq!(v.decode_operands(&bytes), values);
    }
}
