//! # cfetch-cas
//!
//! Content-addressed reassembly of deduplicated backup payloads.
//!
//! A backup file is identified by its content [`Signature`] and is the
//! concatenation of chunks scattered across encrypted transport containers.
//! Many signatures share containers, so a container is decrypted once, kept
//! in memory while any pending signature still needs it, and purged the
//! moment the last one resolves.
//!
//! ## Flow
//!
//! ```text
//! AuthorizedGroups ─► ChunkRegistry ─► DedupStore
//!                                        ▲    │
//!        payload ─► decrypt_container ─ put   process ─► SignatureWriter
//! ```
//!
//! [`DedupStore`] is the only entry point that mutates anything. The reference
//! tracker and chunk store it wraps are internal.

mod chunk_store;
mod dedup;
pub mod decrypt;
pub mod groups;
mod model;
mod registry;
mod tracker;
mod writer;

#[cfg(any(test, feature = "testutil"))]
pub mod testutil;

pub use chunk_store::ChunkBytes;
pub use decrypt::{decrypt_container, DecodeError};
pub use dedup::{DedupStore, StoreStats};
pub use groups::AuthorizedGroups;
pub use model::{ChunkMeta, ChunkRef, ContainerId, ContainerRef, Signature};
pub use registry::{ChunkRegistry, RegistryError};
pub use writer::SignatureWriter;
