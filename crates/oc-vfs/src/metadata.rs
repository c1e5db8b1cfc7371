//! Title metadata collaborator

use oc_core::EmulatorError;
use std::collections::HashMap;

/// Parses a metadata sidecar into key/value text pairs
pub trait MetadataParser: Send + Sync {
    fn parse(&self, data: &[u8]) -> Result<HashMap<String, String>, EmulatorError>;
}
