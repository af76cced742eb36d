//! Serializable form of an authorized file-group result.
//!
//! The session layer resolves which containers hold which file chunks and
//! hands the result over in this shape. Byte fields are hex strings so the
//! document stays readable as JSON.
//!
//! ```json
//! {
//!   "containers": {
//!     "c0": { "host": "p01.blobs", "path": "/b/0", "chunks": [
//!       { "length": 5, "key": "01…", "checksum": "01…" } ] }
//!   },
//!   "signatures": { "a1b2…": [ { "container": "c0", "index": 0 } ] }
//! }
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::model::{ChunkMeta, ContainerId, Signature};
use crate::registry::RegistryError;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizedGroups {
    /// Containers keyed by a name local to this document
    #[serde(default)]
    pub containers: BTreeMap<String, ContainerSpec>,
    /// Hex signature -> ordered chunk pointers
    #[serde(default)]
    pub signatures: BTreeMap<String, Vec<ChunkPointer>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerSpec {
    pub host: String,
    pub path: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub headers: Vec<(String, String)>,
    pub chunks: Vec<ChunkSpec>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkSpec {
    pub length: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkPointer {
    pub container: String,
    pub index: usize,
}

fn default_method() -> String {
    "GET".to_string()
}

impl AuthorizedGroups {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a container under `name`, replacing any previous one.
    pub fn insert_container(&mut self, name: &str, id: &ContainerId) {
        let spec = ContainerSpec {
            host: id.host.clone(),
            path: id.path.clone(),
            method: id.method.clone(),
            headers: id.headers.clone(),
            chunks: id
                .chunks
                .iter()
                .map(|c| ChunkSpec {
                    length: c.length,
                    key: c.encryption_key.as_ref().map(hex::encode),
                    checksum: c.checksum.as_ref().map(hex::encode),
                })
                .collect(),
        };
        self.containers.insert(name.to_string(), spec);
    }

    /// Declare a signature as the concatenation of `(container name, chunk index)` pairs.
    pub fn insert_signature(&mut self, signature: &Signature, chunks: &[(&str, usize)]) {
        let pointers = chunks
            .iter()
            .map(|(container, index)| ChunkPointer {
                container: container.to_string(),
                index: *index,
            })
            .collect();
        self.signatures.insert(signature.to_hex(), pointers);
    }
}

impl ContainerSpec {
    /// Decode hex fields into a [`ContainerId`].
    pub fn to_container_id(&self, name: &str) -> Result<ContainerId, RegistryError> {
        let chunks = self
            .chunks
            .iter()
            .map(|c| {
                Ok(ChunkMeta {
                    length: c.length,
                    encryption_key: decode_hex(name, "key", c.key.as_deref())?,
                    checksum: decode_hex(name, "checksum", c.checksum.as_deref())?,
                })
            })
            .collect::<Result<Vec<_>, RegistryError>>()?;

        let id = ContainerId {
            host: self.host.clone(),
            path: self.path.clone(),
            method: self.method.clone(),
            headers: self.headers.clone(),
            chunks,
        };
        if id.payload_len().is_none() {
            return Err(RegistryError::PayloadTooLarge {
                container: name.to_string(),
            });
        }
        Ok(id)
    }
}

fn decode_hex(
    container: &str,
    field: &str,
    value: Option<&str>,
) -> Result<Option<Vec<u8>>, RegistryError> {
    value
        .map(hex::decode)
        .transpose()
        .map_err(|e| RegistryError::InvalidHex {
            what: format!("container {container} {field}"),
            reason: e.to_string(),
        })
}
