//! `stencilc`: a meta-compiler that lowers a dynamic-language VM's
//! declarative bytecode definitions into interpreter, baseline-JIT, and
//! optimizing-JIT entry points, and extracts copy-and-patch stencils
//! from the compiled result.
//!
//! The pipeline's stages (spec §5) correspond to this crate's modules:
//!
//! - [`cdsl`] — Operand & Variant Model (stage A)
//! - [`desugar`] — Desugaring Driver (stage B)
//! - [`wrapper`] — Wrapper Synthesis (stage C)
//! - [`lowering`] — API Lowering (stage D)
//! - [`stencil::extract`] — Stencil Extractor (stage E)
//! - [`stencil::patch`] — Patch Planner (stage F)
//! - [`stencil::codegen`] — Codegen Emitter (stage G)
//! - [`stencil::ic`] — Inline-cache isolation (stage H)
//!
//! [`pipeline::Pipeline`] threads all eight stages together; [`cli`] and
//! `bin/stencilc.rs` expose them as the three build-system subcommands
//! from spec §6.

pub mod cdsl;
pub mod cli;
pub mod desugar;
pub mod error;
pub mod interchange;
pub mod ir;
pub mod lowering;
pub mod metadata;
pub mod output;
pub mod pipeline;
pub mod pool;
pub mod reloc;
pub mod srcgen;
pub mod stencil;
pub mod wrapper;

pub use error::{PipelineError, Result};
