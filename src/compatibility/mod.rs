//! Schema compatibility checking
//!
//! Decides whether a candidate schema may join a subject's history under a
//! [`CompatibilityLevel`]. Each comparison is between a *reader* and a
//! *writer*: BACKWARD makes the candidate the reader of data written with a
//! prior version, FORWARD swaps the roles, FULL requires both.

mod avro;
mod json;
mod protobuf;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::canonical::SchemaDocument;
use crate::error::RegistryError;

/// Compatibility policy of a subject (or the registry default)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CompatibilityLevel {
    #[default]
    None,
    Backward,
    BackwardTransitive,
    Forward,
    ForwardTransitive,
    Full,
    FullTransitive,
}

impl CompatibilityLevel {
    pub const ALL: [CompatibilityLevel; 7] = [
        CompatibilityLevel::None,
        CompatibilityLevel::Backward,
        CompatibilityLevel::BackwardTransitive,
        CompatibilityLevel::Forward,
        CompatibilityLevel::ForwardTransitive,
        CompatibilityLevel::Full,
        CompatibilityLevel::FullTransitive,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CompatibilityLevel::None => "NONE",
            CompatibilityLevel::Backward => "BACKWARD",
            CompatibilityLevel::BackwardTransitive => "BACKWARD_TRANSITIVE",
            CompatibilityLevel::Forward => "FORWARD",
            CompatibilityLevel::ForwardTransitive => "FORWARD_TRANSITIVE",
            CompatibilityLevel::Full => "FULL",
            CompatibilityLevel::FullTransitive => "FULL_TRANSITIVE",
        }
    }

    /// Checked against every prior version rather than only the latest
    pub fn is_transitive(&self) -> bool {
        matches!(
            self,
            CompatibilityLevel::BackwardTransitive
                | CompatibilityLevel::ForwardTransitive
                | CompatibilityLevel::FullTransitive
        )
    }

    pub fn checks_backward(&self) -> bool {
        matches!(
            self,
            CompatibilityLevel::Backward
                | CompatibilityLevel::BackwardTransitive
                | CompatibilityLevel::Full
                | CompatibilityLevel::FullTransitive
        )
    }

    pub fn checks_forward(&self) -> bool {
        matches!(
            self,
            CompatibilityLevel::Forward
                | CompatibilityLevel::ForwardTransitive
                | CompatibilityLevel::Full
                | CompatibilityLevel::FullTransitive
        )
    }
}

impl fmt::Display for CompatibilityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CompatibilityLevel {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_uppercase().replace('-', "_");
        CompatibilityLevel::ALL
            .into_iter()
            .find(|level| level.as_str() == normalized)
            .ok_or_else(|| RegistryError::InvalidCompatibilityLevel(s.to_string()))
    }
}

/// Which side of a comparison the candidate was on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Candidate reads data written with the prior version
    Backward,
    /// Prior version reads data written with the candidate
    Forward,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Backward => f.write_str("backward"),
            Direction::Forward => f.write_str("forward"),
        }
    }
}

/// Result of comparing one reader with one writer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompatibilityResult {
    /// Whether the reader can decode everything the writer produces
    pub is_compatible: bool,
    /// List of changes detected
    pub changes: Vec<SchemaChange>,
    /// Summary of the comparison
    pub summary: String,
}

impl CompatibilityResult {
    /// Create a compatible result
    pub fn compatible(changes: Vec<SchemaChange>) -> Self {
        let summary = if changes.is_empty() {
            "No changes detected".to_string()
        } else {
            format!("{} compatible changes detected", changes.len())
        };
        Self {
            is_compatible: true,
            changes,
            summary,
        }
    }

    /// Create an incompatible result
    pub fn incompatible(changes: Vec<SchemaChange>, reason: impl Into<String>) -> Self {
        Self {
            is_compatible: false,
            changes,
            summary: reason.into(),
        }
    }

    fn from_changes(changes: Vec<SchemaChange>) -> Self {
        let breaking: Vec<&SchemaChange> = changes.iter().filter(|c| c.is_breaking).collect();
        match breaking.as_slice() {
            [] => Self::compatible(changes),
            [only] => {
                let reason = only.description.clone();
                Self::incompatible(changes, reason)
            }
            [first, ..] => {
                let reason = format!("{} breaking changes detected; first: {}", breaking.len(), first.description);
                Self::incompatible(changes, reason)
            }
        }
    }
}

/// A detected difference between reader and writer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaChange {
    /// Type of change
    pub change_type: ChangeType,
    /// Path to the changed element (e.g. `User.fields.email` or `#/properties/age`)
    pub path: String,
    /// Writer-side value (if applicable)
    pub old_value: Option<String>,
    /// Reader-side value (if applicable)
    pub new_value: Option<String>,
    /// Whether this change prevents the reader from decoding
    pub is_breaking: bool,
    /// Human-readable description
    pub description: String,
}

impl SchemaChange {
    pub(crate) fn breaking(change_type: ChangeType, path: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            change_type,
            path: path.into(),
            old_value: None,
            new_value: None,
            is_breaking: true,
            description: description.into(),
        }
    }

    pub(crate) fn compatible(change_type: ChangeType, path: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            is_breaking: false,
            ..Self::breaking(change_type, path, description)
        }
    }

    pub(crate) fn values(mut self, writer: impl Into<String>, reader: impl Into<String>) -> Self {
        self.old_value = Some(writer.into());
        self.new_value = Some(reader.into());
        self
    }
}

/// Type of schema change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    /// The reader knows a field the writer lacks
    FieldAdded,
    /// The writer has a field the reader lacks
    FieldRemoved,
    /// A field's type changed
    TypeChanged,
    /// A field was renamed (same number or matched by alias)
    FieldRenamed,
    /// A field's optionality changed (required <-> optional)
    OptionalityChanged,
    /// Enum variant added
    EnumVariantAdded,
    /// Enum variant removed
    EnumVariantRemoved,
    /// Schema format changed
    FormatChanged,
    /// Protobuf package changed
    PackageChanged,
    /// A message, enum, or named type disappeared
    TypeRemoved,
    /// A protobuf field number now uses a different wire type
    WireTypeChanged,
    /// Singular <-> repeated
    CardinalityChanged,
    /// A protobuf field moved into or out of a oneof
    OneofMembershipChanged,
    /// A validation bound became stricter
    ConstraintTightened,
    /// Other change
    Other,
}

/// Outcome of checking a candidate against a subject's history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompatibilityVerdict {
    pub level: CompatibilityLevel,
    pub is_compatible: bool,
    /// Prior version that failed the check
    pub version: Option<u32>,
    /// Direction of the failed comparison
    pub direction: Option<Direction>,
    pub changes: Vec<SchemaChange>,
    pub summary: String,
}

impl CompatibilityVerdict {
    fn passed(level: CompatibilityLevel, changes: Vec<SchemaChange>, summary: impl Into<String>) -> Self {
        Self {
            level,
            is_compatible: true,
            version: None,
            direction: None,
            changes,
            summary: summary.into(),
        }
    }
}

/// Compatibility checker for schema versions
#[derive(Debug, Clone, Copy, Default)]
pub struct CompatibilityChecker;

impl CompatibilityChecker {
    /// Create a new compatibility checker
    pub fn new() -> Self {
        Self
    }

    /// Can `reader` decode data written with `writer`?
    pub fn check_pair(&self, reader: &SchemaDocument, writer: &SchemaDocument) -> CompatibilityResult {
        let mut changes = Vec::new();
        match (reader, writer) {
            (SchemaDocument::Avro(reader), SchemaDocument::Avro(writer)) => avro::check(reader, writer, &mut changes),
            (SchemaDocument::Json(reader), SchemaDocument::Json(writer)) => json::check(reader, writer, &mut changes),
            (SchemaDocument::Protobuf(reader), SchemaDocument::Protobuf(writer)) => {
                protobuf::check(reader, writer, &mut changes)
            }
            (reader, writer) => changes.push(
                SchemaChange::breaking(
                    ChangeType::FormatChanged,
                    "",
                    format!("schema type changed from {} to {}", writer.format(), reader.format()),
                )
                .values(writer.format().as_str(), reader.format().as_str()),
            ),
        }
        CompatibilityResult::from_changes(changes)
    }

    /// Check `candidate` against `history` (ordinal, document) in ordinal order.
    ///
    /// Non-transitive levels only look at the last entry; transitive levels
    /// walk newest to oldest and report the first failure.
    pub fn check(
        &self,
        level: CompatibilityLevel,
        candidate: &SchemaDocument,
        history: &[(u32, SchemaDocument)],
    ) -> CompatibilityVerdict {
        if level == CompatibilityLevel::None {
            return CompatibilityVerdict::passed(level, Vec::new(), "compatibility checks are disabled");
        }
        if history.is_empty() {
            return CompatibilityVerdict::passed(level, Vec::new(), "no prior versions");
        }

        let priors: Vec<&(u32, SchemaDocument)> = if level.is_transitive() {
            history.iter().rev().collect()
        } else {
            history.last().into_iter().collect()
        };

        let mut reported = Vec::new();
        for (index, (version, prior)) in priors.into_iter().enumerate() {
            let mut comparisons = Vec::with_capacity(2);
            if level.checks_backward() {
                comparisons.push((Direction::Backward, self.check_pair(candidate, prior)));
            }
            if level.checks_forward() {
                comparisons.push((Direction::Forward, self.check_pair(prior, candidate)));
            }
            for (direction, result) in comparisons {
                debug!(version, %direction, compatible = result.is_compatible, "compared with prior version");
                if !result.is_compatible {
                    return CompatibilityVerdict {
                        level,
                        is_compatible: false,
                        version: Some(*version),
                        direction: Some(direction),
                        summary: format!("{direction} check against version {version} failed: {}", result.summary),
                        changes: result.changes,
                    };
                }
                if index == 0 {
                    reported.extend(result.changes);
                }
            }
        }
        let summary = format!("compatible under {level}");
        CompatibilityVerdict::passed(level, reported, summary)
    }
}
