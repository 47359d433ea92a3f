//! Process-wide shared constant pool (spec §3 "Shared Constant Datum",
//! §5 "Shared resources").
//!
//! Modeled as an explicitly constructed object owned by the top-level
//! pipeline driver and threaded through stages by reference, never as
//! ambient/global state (spec design note "Process-wide constant pool").

use std::collections::HashMap;

/// A process-unique label identifying one interned shared constant.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConstantLabel(pub u32);

/// An element of a shared constant's value definition: either a raw byte
/// or a pointer-plus-addend to another shared constant (spec §3, §9
/// "Self-referential shared constants").
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConstantElement {
    Byte(u8),
    PointerTo { target: ConstantLabel, addend: i64 },
}

#[derive(Clone, Debug)]
pub struct SharedConstant {
    pub label: ConstantLabel,
    pub alignment: usize,
    pub elements: Vec<ConstantElement>,
    /// True iff this constant is referenced by pointer from another
    /// constant; an emitter must forward-declare it before defining
    /// anything that references it first (spec §9).
    pub should_forward_declare: bool,
}

/// Content-addressed, deduplicating pool of shared constants. The pool's
/// only mutator is the Stencil Extractor (spec §5); once extraction is
/// complete, callers should only read from it ([`into_frozen`]).
///
/// [`into_frozen`]: ConstantPool::into_frozen
#[derive(Default)]
pub struct ConstantPool {
    by_content: HashMap<Vec<u8>, ConstantLabel>,
    constants: Vec<SharedConstant>,
}

impl ConstantPool {
    pub fn new() -> Self {
        ConstantPool::default()
    }

    /// Intern a pure-byte constant, deduplicating by content. Insertion
    /// is idempotent: interning the same bytes twice returns the same
    /// label.
    pub fn intern_bytes(&mut self, alignment: usize, bytes: &[u8]) -> ConstantLabel {
        if let Some(label) = self.by_content.get(bytes) {
            return *label;
        }
        let label = ConstantLabel(self.constants.len() as u32);
        self.constants.push(SharedConstant {
            label,
            alignment,
            elements: bytes.iter().map(|b| ConstantElement::Byte(*b)).collect(),
            should_forward_declare: false,
        });
        self.by_content.insert(bytes.to_vec(), label);
        label
    }

    /// Intern a constant that references other constants by pointer.
    /// Marks every referenced constant as needing a forward declaration.
    pub fn intern_with_pointers(&mut self, alignment: usize, elements: Vec<ConstantElement>) -> ConstantLabel {
        let label = ConstantLabel(self.constants.len() as u32);
        for el in &elements {
            if let ConstantElement::PointerTo { target, .. } = el {
                if let Some(c) = self.constants.iter_mut().find(|c| c.label == *target) {
                    c.should_forward_declare = true;
                }
            }
        }
        self.constants.push(SharedConstant { label, alignment, elements, should_forward_declare: false });
        label
    }

    pub fn get(&self, label: ConstantLabel) -> &SharedConstant {
        &self.constants[label.0 as usize]
    }

    pub fn len(&self) -> usize {
        self.constants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.constants.is_empty()
    }

    /// All constants in insertion order, forward-declared ones first so
    /// an emitter walking this list in order never references something
    /// not yet declared (spec §9: "emit forward declarations for every
    /// node referenced by pointer, then definitions in topological
    /// order").
    pub fn into_frozen(self) -> FrozenConstantPool {
        let mut constants = self.constants;
        constants.sort_by_key(|c| !c.should_forward_declare);
        FrozenConstantPool { constants }
    }
}

/// An immutable snapshot of the pool, safe to hand to readers (the
/// Codegen Emitter) once extraction is complete.
pub struct FrozenConstantPool {
    constants: Vec<SharedConstant>,
}

impl FrozenConstantPool {
    pub fn iter(&self) -> impl Iterator<Item = &SharedConstant> {
        self.constants.iter()
    }
}
