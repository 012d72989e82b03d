//! Schema types and structures

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::checksum::ContentHash;
use crate::error::RegistryError;

/// Group used when a caller does not name one
pub const DEFAULT_GROUP: &str = "default";

/// Format of a schema
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SchemaFormat {
    /// Apache Avro schemas (JSON encoded)
    Avro,
    /// JSON Schema documents
    Json,
    /// Protobuf `.proto` sources
    Protobuf,
}

impl SchemaFormat {
    /// Formats in the order they are advertised to clients
    pub const ALL: [SchemaFormat; 3] = [SchemaFormat::Json, SchemaFormat::Protobuf, SchemaFormat::Avro];

    /// Upper-case tag (e.g. "AVRO")
    pub fn as_str(&self) -> &'static str {
        match self {
            SchemaFormat::Avro => "AVRO",
            SchemaFormat::Json => "JSON",
            SchemaFormat::Protobuf => "PROTOBUF",
        }
    }

    /// Conventional file extension for this format
    pub fn extension(&self) -> &'static str {
        match self {
            SchemaFormat::Avro => "avsc",
            SchemaFormat::Json => "json",
            SchemaFormat::Protobuf => "proto",
        }
    }
}

impl fmt::Display for SchemaFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SchemaFormat {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "AVRO" => Ok(SchemaFormat::Avro),
            "JSON" | "JSONSCHEMA" | "JSON_SCHEMA" => Ok(SchemaFormat::Json),
            "PROTOBUF" | "PROTO" => Ok(SchemaFormat::Protobuf),
            other => Err(RegistryError::UnknownFormat(other.to_string())),
        }
    }
}

/// Surrogate key for one distinct piece of content
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentId(pub i64);

/// Registry-wide identity handed to clients
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GlobalId(pub i64);

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for GlobalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A subject (artifact), identified by group and name
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubjectKey {
    pub group: String,
    pub name: String,
}

impl SubjectKey {
    pub fn new(group: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            name: name.into(),
        }
    }

    /// Subject in the default group
    pub fn named(name: impl Into<String>) -> Self {
        Self::new(DEFAULT_GROUP, name)
    }
}

impl fmt::Display for SubjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.group == DEFAULT_GROUP {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{}/{}", self.group, self.name)
        }
    }
}

impl From<&str> for SubjectKey {
    fn from(name: &str) -> Self {
        Self::named(name)
    }
}

/// Lifecycle of a subject or of a single version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LifecycleState {
    #[default]
    Enabled,
    /// Invisible to "latest" lookups; still addressable by explicit ordinal
    Disabled,
    Deprecated,
}

impl LifecycleState {
    pub fn is_disabled(&self) -> bool {
        matches!(self, LifecycleState::Disabled)
    }
}

/// Named edge from one schema to a schema it depends on
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Reference {
    /// Import path (protobuf), type name (avro) or `$ref` target (json)
    pub name: String,
    pub subject: SubjectKey,
    pub version: u32,
}

impl Reference {
    pub fn new(name: impl Into<String>, subject: impl Into<SubjectKey>, version: u32) -> Self {
        Self {
            name: name.into(),
            subject: subject.into(),
            version,
        }
    }
}

/// Immutable schema content together with its canonical form
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaContent {
    pub format: SchemaFormat,
    /// The schema exactly as submitted
    pub raw: String,
    /// Normalized form, used only for hashing and equality
    pub canonical: String,
    /// Hash of `raw`
    pub content_hash: ContentHash,
    /// Hash of `canonical`
    pub canonical_hash: ContentHash,
}

impl SchemaContent {
    pub fn new(format: SchemaFormat, raw: impl Into<String>, canonical: impl Into<String>) -> Self {
        let raw = raw.into();
        let canonical = canonical.into();
        Self {
            content_hash: ContentHash::compute(format, raw.as_bytes()),
            canonical_hash: ContentHash::compute(format, canonical.as_bytes()),
            format,
            raw,
            canonical,
        }
    }

    /// Verify both hashes match the stored text
    pub fn verify(&self) -> bool {
        self.content_hash.verify(self.format, self.raw.as_bytes())
            && self.canonical_hash.verify(self.format, self.canonical.as_bytes())
    }
}
