//! Error types for the schema registry

use thiserror::Error;

use crate::compatibility::CompatibilityLevel;
use crate::schema::{GlobalId, SchemaFormat, SubjectKey};

/// Result type for registry operations
pub type Result<T> = std::result::Result<T, RegistryError>;

/// Coarse classification a caller (e.g. a REST layer) can branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed input, unresolved protobuf import or type. Never retried.
    InvalidSchema,
    /// Unknown subject, version or content, or a disabled version.
    NotFound,
    /// Rejected by the compatibility checker.
    Incompatible,
    /// Dangling or cyclic schema reference.
    Reference,
    /// Storage, serialization or configuration failure.
    Internal,
}

/// Schema registry errors
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Invalid {format} schema: {reason}")]
    InvalidSchema { format: SchemaFormat, reason: String },

    #[error("Unknown schema type: {0}")]
    UnknownFormat(String),

    #[error("Invalid protobuf schema: {0}")]
    Proto(#[from] ProtoError),

    #[error("Subject not found: {0}")]
    SubjectNotFound(SubjectKey),

    #[error("Version not found: {subject} version {version}")]
    VersionNotFound { subject: SubjectKey, version: String },

    #[error("Schema not found: {0}")]
    SchemaNotFound(String),

    #[error("No content registered for global id {0}")]
    ContentNotFound(GlobalId),

    #[error("Invalid version: {0}")]
    InvalidVersion(String),

    #[error("Invalid compatibility level: {0}")]
    InvalidCompatibilityLevel(String),

    #[error("Schema for {subject} is incompatible with version {version} under {level}: {summary}")]
    Incompatible {
        subject: SubjectKey,
        version: u32,
        level: CompatibilityLevel,
        summary: String,
    },

    #[error("Reference '{name}' points to {subject} version {version}, which does not exist")]
    DanglingReference {
        name: String,
        subject: SubjectKey,
        version: u32,
    },

    #[error("Reference '{name}' would introduce a cycle through {subject} version {version}")]
    CyclicReference {
        name: String,
        subject: SubjectKey,
        version: u32,
    },

    #[error("Invalid references: {0}")]
    InvalidReferences(String),

    #[error("Snapshot is inconsistent: {0}")]
    CorruptSnapshot(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config_crate::ConfigError),
}

impl RegistryError {
    pub(crate) fn invalid(format: SchemaFormat, reason: impl Into<String>) -> Self {
        RegistryError::InvalidSchema {
            format,
            reason: reason.into(),
        }
    }

    /// Classify this error into one of the taxonomy buckets.
    pub fn kind(&self) -> ErrorKind {
        match self {
            RegistryError::InvalidSchema { .. }
            | RegistryError::UnknownFormat(_)
            | RegistryError::Proto(_)
            | RegistryError::InvalidVersion(_)
            | RegistryError::InvalidCompatibilityLevel(_) => ErrorKind::InvalidSchema,
            RegistryError::SubjectNotFound(_)
            | RegistryError::VersionNotFound { .. }
            | RegistryError::SchemaNotFound(_)
            | RegistryError::ContentNotFound(_) => ErrorKind::NotFound,
            RegistryError::Incompatible { .. } => ErrorKind::Incompatible,
            RegistryError::DanglingReference { .. }
            | RegistryError::CyclicReference { .. }
            | RegistryError::InvalidReferences(_) => ErrorKind::Reference,
            RegistryError::CorruptSnapshot(_)
            | RegistryError::Io(_)
            | RegistryError::Json(_)
            | RegistryError::Config(_) => ErrorKind::Internal,
        }
    }

    /// Error code understood by Confluent-style clients.
    pub fn error_code(&self) -> u32 {
        match self {
            RegistryError::SubjectNotFound(_) => 40401,
            RegistryError::VersionNotFound { .. } => 40402,
            RegistryError::SchemaNotFound(_) | RegistryError::ContentNotFound(_) => 40403,
            RegistryError::InvalidSchema { .. }
            | RegistryError::UnknownFormat(_)
            | RegistryError::Proto(_)
            | RegistryError::DanglingReference { .. }
            | RegistryError::CyclicReference { .. }
            | RegistryError::InvalidReferences(_) => 42201,
            RegistryError::InvalidVersion(_) => 42202,
            RegistryError::InvalidCompatibilityLevel(_) => 42203,
            RegistryError::Incompatible { .. } => 409,
            RegistryError::CorruptSnapshot(_)
            | RegistryError::Io(_)
            | RegistryError::Json(_)
            | RegistryError::Config(_) => 50001,
        }
    }
}

/// Errors raised while parsing or linking protobuf sources
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtoError {
    #[error("{file}:{line}:{column}: {message}")]
    Syntax {
        file: String,
        line: usize,
        column: usize,
        message: String,
    },

    #[error("import \"{0}\" was not found in the supplied dependencies or well-known types")]
    MissingDependency(String),

    #[error("import cycle through \"{0}\"")]
    ImportCycle(String),

    #[error("unresolved type \"{name}\" referenced from {scope}")]
    TypeResolution { name: String, scope: String },

    #[error("\"{0}\" is already defined")]
    DuplicateSymbol(String),

    #[error("{0}")]
    Invalid(String),
}
