//! Input artifact format (spec §6 "Input artifact format").
//!
//! A self-describing JSON container carrying the manifest of opcodes to
//! process, their variant descriptors and metadata-field declarations,
//! and the one opaque binary field — a serialized IR module for the
//! semantic bodies — carried as a base64 string rather than raw bytes,
//! so the whole container stays human-inspectable except for that one
//! field.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};

/// One opcode's declarative metadata, as read from the input artifact.
/// The IR optimizer/parser that produces the semantic body itself is an
/// external collaborator (spec §1); this crate only consumes its output.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct VariantDescriptor {
    pub name: String,
    pub operand_widths: Vec<u8>,
    pub metadata_slot_width: Option<u32>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct MetadataFieldDeclaration {
    pub kind_name: String,
    pub size: u32,
    pub log2_alignment: u32,
    pub count: u32,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct OpcodeManifestEntry {
    pub name: String,
    pub variants: Vec<VariantDescriptor>,
}

/// The complete input artifact: manifest, variant/metadata declarations,
/// and the base64-encoded serialized IR module (spec §6).
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct InputArtifact {
    pub manifest: Vec<OpcodeManifestEntry>,
    pub metadata_fields: Vec<MetadataFieldDeclaration>,
    /// Base64-encoded serialized IR module for every opcode's semantic
    /// body. Opaque to this container; only the upstream IR reader
    /// (external collaborator) knows how to decode its contents.
    pub ir_module_base64: String,
}

impl InputArtifact {
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    pub fn to_json_pretty(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    /// Decode the opaque IR module payload.
    pub fn decode_ir_module(&self) -> Result<Vec<u8>> {
        BASE64
            .decode(&self.ir_module_base64)
            .map_err(|e| PipelineError::InputMalformed(format!("malformed base64 IR module payload: {e}")))
    }

    pub fn encode_ir_module(bytes: &[u8]) -> String {
        BASE64.encode(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_json_and_base64() {
        let artifact = InputArtifact {
            manifest: vec![OpcodeManifestEntry {
                name: "SetConstInt16".into(),
                variants: vec![VariantDescriptor {
                    name: "SetConstInt16_0".into(),
                    operand_widths: vec![2],
                    metadata_slot_width: None,
                }],
            }],
            metadata_fields: vec![],
            ir_module_base64: InputArtifact::encode_ir_module(b"opaque ir bytes"),
        };

        let json = artifact.to_json_pretty().unwrap();
        let parsed = InputArtifact::from_json(&json).unwrap();
        assert_eq!(parsed.manifest[0].name, "SetConstInt16");
        assert_eq!(parsed.decode_ir_module().unwrap(), b"opaque ir bytes");
    }

    #[test]
    fn malformed_base64_is_input_malformed() {
        let artifact = InputArtifact {
            manifest: vec![],
            metadata_fields: vec![],
            ir_module_base64: "not valid base64 !!".into(),
        };
        assert!(artifact.decode_ir_module().is_err());
    }
}
