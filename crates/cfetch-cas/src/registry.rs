//! Signature -> ordered chunk references, built once per run.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use thiserror::Error;

use crate::groups::AuthorizedGroups;
use crate::model::{ChunkRef, ContainerId, ContainerRef, Signature};

/// Errors raised while validating an authorized file-group result.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("signature {signature} references undeclared container {container}")]
    UnknownContainer { signature: String, container: String },

    #[error("signature {signature}: chunk {index} out of range for {container} ({len} chunks)")]
    ChunkIndexOutOfRange {
        signature: String,
        container: String,
        index: usize,
        len: usize,
    },

    #[error("invalid hex in {what}: {reason}")]
    InvalidHex { what: String, reason: String },

    #[error("duplicate signature {signature}")]
    DuplicateSignature { signature: String },

    #[error("container {container}: declared chunk lengths overflow")]
    PayloadTooLarge { container: String },
}

/// Immutable-shape index of every signature this run has to reassemble.
///
/// Entries only ever leave the registry, through the dedup store, when their
/// signature completes or fails.
#[derive(Debug, Default)]
pub struct ChunkRegistry {
    entries: HashMap<Signature, Vec<ChunkRef>>,
}

impl ChunkRegistry {
    /// Build from already-resolved references, validating chunk indices.
    pub fn from_entries<I>(entries: I) -> Result<Self, RegistryError>
    where
        I: IntoIterator<Item = (Signature, Vec<ChunkRef>)>,
    {
        let mut map = HashMap::new();
        for (signature, refs) in entries {
            for r in &refs {
                if r.index >= r.container.chunks.len() {
                    return Err(RegistryError::ChunkIndexOutOfRange {
                        signature: signature.to_hex(),
                        container: r.container.label(),
                        index: r.index,
                        len: r.container.chunks.len(),
                    });
                }
            }
            match map.entry(signature) {
                Entry::Occupied(e) => {
                    return Err(RegistryError::DuplicateSignature {
                        signature: e.key().to_hex(),
                    })
                }
                Entry::Vacant(e) => {
                    e.insert(refs);
                }
            }
        }
        Ok(Self { entries: map })
    }

    /// Build from the serializable authorization result.
    pub fn from_groups(groups: &AuthorizedGroups) -> Result<Self, RegistryError> {
        // Intern by value so equal containers declared twice share one Arc
        let mut interned: HashMap<ContainerId, ContainerRef> = HashMap::new();
        let mut by_name: HashMap<&str, ContainerRef> = HashMap::new();
        for (name, spec) in &groups.containers {
            let id = spec.to_container_id(name)?;
            let shared = interned
                .entry(id.clone())
                .or_insert_with(|| Arc::new(id))
                .clone();
            by_name.insert(name.as_str(), shared);
        }

        let mut entries = Vec::with_capacity(groups.signatures.len());
        for (hex_sig, pointers) in &groups.signatures {
            let signature =
                Signature::from_hex(hex_sig).map_err(|e| RegistryError::InvalidHex {
                    what: format!("signature {hex_sig}"),
                    reason: e.to_string(),
                })?;
            let refs = pointers
                .iter()
                .map(|p| {
                    by_name
                        .get(p.container.as_str())
                        .map(|c| ChunkRef::new(c.clone(), p.index))
                        .ok_or_else(|| RegistryError::UnknownContainer {
                            signature: hex_sig.clone(),
                            container: p.container.clone(),
                        })
                })
                .collect::<Result<Vec<_>, _>>()?;
            entries.push((signature, refs));
        }
        Self::from_entries(entries)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, signature: &Signature) -> Option<&[ChunkRef]> {
        self.entries.get(signature).map(Vec::as_slice)
    }

    pub fn signatures(&self) -> impl Iterator<Item = &Signature> {
        self.entries.keys()
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (&Signature, &Vec<ChunkRef>)> {
        self.entries.iter()
    }

    /// Every distinct container referenced by at least one signature,
    /// ordered by label so job seeding is deterministic.
    pub fn containers(&self) -> Vec<ContainerRef> {
        let mut seen = HashSet::new();
        let mut out: Vec<ContainerRef> = self
            .entries
            .values()
            .flatten()
            .filter(|r| seen.insert(r.container.clone()))
            .map(|r| r.container.clone())
            .collect();
        out.sort_by(|a, b| a.label().cmp(&b.label()));
        out
    }

    /// Remove an entry. Only the first caller for a given signature gets `Some`.
    pub(crate) fn remove(&mut self, signature: &Signature) -> Option<Vec<ChunkRef>> {
        self.entries.remove(signature)
    }
}
