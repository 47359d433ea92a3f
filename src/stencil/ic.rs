//! Inline-Cache Extractor (spec §4.H).
//!
//! Isolates the IC body from the main logic of a stencil, producing a
//! separate stencil per IC site whose relocations may reference the
//! enclosing main logic's private data via `MainLogicPrivateDataAddr`.
//!
//! Grounded on `original_source/deegen/deegen_stencil_creator.h`'s IC
//! body extraction, which splits `text.ic.*` sections out of the main
//! object file into independently relocatable units.

use crate::error::Result;
use crate::reloc::{StencilSection, SymbolKind};
use crate::stencil::types::{PlaceholderOrdinal, Stencil};

/// One IC site's extracted body plus where, within the main logic's
/// private data, its owner's layout can be rediscovered at runtime
/// (spec §4.H: "records, per section name, the byte offset within the
/// main logic's private data").
#[derive(Clone, Debug)]
pub struct IcSite {
    pub site_name: String,
    pub stencil: Stencil,
    /// Byte offset within the main logic's private data where this IC
    /// site's owner layout begins.
    pub owner_layout_offset: u32,
}

/// The ordinal range for IC state values, formalized here rather than
/// left to convention (spec §9 Open Question). Resolution recorded in
/// DESIGN.md: state values are assigned ordinals starting at
/// `PlaceholderOrdinal::MANUAL_MIN` (10000) in the order the IC site
/// declares them, one ordinal per state value, with no gaps — the only
/// convention the source material demonstrates consistently across its
/// examples. A stencil with more than this many state values is
/// rejected rather than silently wrapping into another reserved range.
pub const MAX_IC_STATE_VALUES: u32 = 9999;

/// Allocate the placeholder ordinal for the `index`-th IC state value
/// declared by a site (spec §9 Open Question resolution, see
/// [`MAX_IC_STATE_VALUES`]).
pub fn ic_state_ordinal(index: u32) -> Result<PlaceholderOrdinal> {
    if index >= MAX_IC_STATE_VALUES {
        return Err(crate::error::PipelineError::LayoutConflict(format!(
            "IC site declares {index} state values, exceeding the {MAX_IC_STATE_VALUES} manual-ordinal budget"
        )));
    }
    Ok(PlaceholderOrdinal(PlaceholderOrdinal::MANUAL_MIN + index))
}

/// Split every `IcPath` region out of `main` into its own stencil,
/// rewriting `PrivateDataAddr` relocations found in IC code to
/// `MainLogicPrivateDataAddr` — an IC body never owns its private data,
/// it only borrows the enclosing main logic's (spec §4.H).
pub fn extract_ic_sites(main: &Stencil, site_name: &str) -> Vec<IcSite> {
    if main.ic_path_code.is_empty() {
        return Vec::new();
    }

    let ic_relocations: Vec<_> = main
        .relocations
        .iter()
        .filter(|r| r.section == StencilSection::IcPath)
        .cloned()
        .map(|mut r| {
            if r.symbol == SymbolKind::PrivateDataAddr {
                r.symbol = SymbolKind::MainLogicPrivateDataAddr;
            }
            r
        })
        .collect();

    let register_renames = main
        .register_renames
        .iter()
        .filter(|r| main.ic_path_code.len() > r.offset as usize)
        .cloned()
        .collect();

    let ic_stencil = Stencil {
        fast_path_code: main.ic_path_code.clone(),
        slow_path_code: Vec::new(),
        ic_path_code: Vec::new(),
        private_data: Default::default(),
        relocations: ic_relocations
            .into_iter()
            .map(|mut r| {
                r.section = StencilSection::FastPath;
                r
            })
            .collect(),
        register_renames,
        label_distances: Vec::new(),
    };

    vec![IcSite { site_name: site_name.to_string(), stencil: ic_stencil, owner_layout_offset: 0 }]
}
