//! Stencil extraction, patch planning, codegen emission, and inline-cache
//! isolation (spec §4.E–4.H).

pub mod codegen;
pub mod extract;
pub mod ic;
pub mod patch;
pub mod types;

pub use extract::{extract_stencil, JsonObjectFile, ObjectFile, ObjectSection, RawRelocation};
pub use ic::{extract_ic_sites, IcSite};
pub use patch::{plan, PatchOp, PatchProgram, PreFixupCode};
pub use types::{PlaceholderOrdinal, PrivateData, RegisterRename, Stencil};
