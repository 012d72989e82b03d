//! Schema Registry Core
//!
//! A content-addressed, versioned registry for Avro, JSON Schema and Protobuf
//! schemas organized into subjects.
//!
//! ## Features
//!
//! - **Content Addressing**: SHA-256 hashes of raw and canonical text; one global id per distinct content
//! - **Append-only Versions**: gap-free 1-based ordinals per subject with lifecycle states
//! - **Compatibility Checking**: BACKWARD / FORWARD / FULL, transitive or not, per format
//! - **Protobuf Linking**: `.proto` sources linked into descriptor graphs without `protoc`
//! - **References**: schemas may depend on other registered versions; the graph stays acyclic
//!
//! ## Registration pipeline
//!
//! ```text
//! bytes ─► Canonicalizer (ProtoLinker) ─► ContentStore lookup
//!       ─► CompatibilityChecker (subject history) ─► ContentStore put
//!       ─► VersionStore append ─► ReferenceResolver edges
//! ```

pub mod canonical;
pub mod checksum;
pub mod compatibility;
pub mod config;
pub mod content;
pub mod error;
pub mod protobuf;
pub mod references;
pub mod registry;
pub mod schema;
pub mod sequence;
pub mod snapshot;
pub mod version;

pub use canonical::{Canonicalizer, SchemaDocument};
pub use checksum::ContentHash;
pub use compatibility::{
    ChangeType, CompatibilityChecker, CompatibilityLevel, CompatibilityResult, CompatibilityVerdict, Direction,
    SchemaChange,
};
pub use config::RegistryConfig;
pub use content::{ContentStore, DedupScope, StoredContent};
pub use error::{ErrorKind, ProtoError, RegistryError, Result};
pub use references::{ReferenceResolver, VersionKey};
pub use registry::{RegisterOptions, SchemaRegistry};
pub use schema::{ContentId, GlobalId, LifecycleState, Reference, SchemaContent, SchemaFormat, SubjectKey};
pub use sequence::{AtomicSequence, IdSequence};
pub use snapshot::RegistrySnapshot;
pub use version::{Version, VersionSelector, VersionStore};
