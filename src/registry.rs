//! Schema Registry
//!
//! Orchestrates registration: references are resolved, the schema is parsed
//! and canonicalized, equivalent content is looked up, the candidate is
//! checked against the subject's history, and only then is content stored,
//! a version appended and reference edges recorded.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info, instrument, warn};

use crate::canonical::{Canonicalizer, SchemaDocument};
use crate::compatibility::{CompatibilityChecker, CompatibilityLevel, CompatibilityVerdict};
use crate::config::RegistryConfig;
use crate::content::{ContentQuery, ContentStore, DedupScope};
use crate::error::{RegistryError, Result};
use crate::protobuf;
use crate::references::{ReferenceResolver, VersionKey};
use crate::schema::{ContentId, GlobalId, LifecycleState, Reference, SchemaContent, SchemaFormat, SubjectKey};
use crate::sequence::{AtomicSequence, IdSequence};
use crate::snapshot::RegistrySnapshot;
use crate::version::{Version, VersionSelector, VersionStore};

/// Per-call registration options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RegisterOptions {
    /// Collapse onto existing content with the same canonical form
    pub normalize: bool,
    /// Where normalized matches are looked for
    pub scope: DedupScope,
}

impl RegisterOptions {
    pub fn normalized() -> Self {
        Self {
            normalize: true,
            ..Self::default()
        }
    }

    pub fn with_scope(mut self, scope: DedupScope) -> Self {
        self.scope = scope;
        self
    }
}

/// A parsed candidate ready for lookup and checking
struct Prepared {
    document: SchemaDocument,
    content: SchemaContent,
}

/// The main schema registry
#[derive(Debug)]
pub struct SchemaRegistry {
    config: RegistryConfig,
    global_compatibility: RwLock<CompatibilityLevel>,
    canonicalizer: Canonicalizer,
    checker: CompatibilityChecker,
    contents: ContentStore,
    versions: VersionStore,
    references: ReferenceResolver,
}

impl Default for SchemaRegistry {
    fn default() -> Self {
        Self::new(RegistryConfig::default())
    }
}

impl SchemaRegistry {
    /// Empty registry with in-memory id sequences
    pub fn new(config: RegistryConfig) -> Self {
        Self::with_sequences(config, Arc::new(AtomicSequence::new()), Arc::new(AtomicSequence::new()))
    }

    /// Empty registry drawing ids from the given sequences
    pub fn with_sequences(
        config: RegistryConfig,
        content_ids: Arc<dyn IdSequence>,
        global_ids: Arc<dyn IdSequence>,
    ) -> Self {
        Self {
            global_compatibility: RwLock::new(config.registry.compatibility),
            canonicalizer: Canonicalizer::new(config.registry.protobuf_file_name.clone()),
            checker: CompatibilityChecker::new(),
            contents: ContentStore::new(content_ids, global_ids),
            versions: VersionStore::new(),
            references: ReferenceResolver::new(),
            config,
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Options taken from the configuration
    pub fn default_options(&self) -> RegisterOptions {
        RegisterOptions {
            normalize: self.config.registry.normalize,
            scope: self.config.registry.dedup_scope,
        }
    }

    /// Parse `group/name` or a bare name in the configured default group
    pub fn subject(&self, name: &str) -> SubjectKey {
        match name.split_once('/') {
            Some((group, name)) if !group.is_empty() => SubjectKey::new(group, name),
            _ => SubjectKey::new(self.config.registry.default_group.clone(), name),
        }
    }

    /// Register `schema` under `subject`, returning its global id.
    ///
    /// Registering content that a live version of the subject already holds
    /// returns that version's id without creating a new version.
    #[instrument(skip_all, fields(subject = %subject, format = %format))]
    pub fn register_schema(
        &self,
        subject: &SubjectKey,
        format: SchemaFormat,
        schema: impl AsRef<[u8]>,
        references: &[Reference],
        options: RegisterOptions,
    ) -> Result<GlobalId> {
        let result = self.register(subject, format, schema.as_ref(), references, options);
        if let Err(error) = &result {
            warn!(code = error.error_code(), %error, "registration rejected");
        }
        result
    }

    fn register(
        &self,
        subject: &SubjectKey,
        format: SchemaFormat,
        schema: &[u8],
        references: &[Reference],
        options: RegisterOptions,
    ) -> Result<GlobalId> {
        let prepared = self.prepare(format, schema, references)?;

        self.versions.with_append(subject, |append| {
            let subject_contents: Vec<ContentId> = append.versions().iter().map(|v| v.content_id).collect();
            let query = ContentQuery {
                content: &prepared.content,
                references,
                normalize: options.normalize,
                scope: options.scope,
                subject_contents: &subject_contents,
            };

            let history = append.history();
            if let Some(existing) = self.contents.find(&query) {
                if let Some(version) = history.iter().find(|v| v.content_id == existing.id) {
                    debug!(version = version.version, global_id = %existing.global_id, "schema already registered");
                    return Ok(existing.global_id);
                }
            }

            let level = append.compatibility().unwrap_or_else(|| self.global_compatibility());
            if level != CompatibilityLevel::None && !history.is_empty() {
                let documents = history
                    .iter()
                    .map(|version| Ok((version.version, self.document_of(version)?)))
                    .collect::<Result<Vec<_>>>()?;
                let verdict = self.checker.check(level, &prepared.document, &documents);
                if !verdict.is_compatible {
                    return Err(RegistryError::Incompatible {
                        subject: subject.clone(),
                        version: verdict.version.unwrap_or_default(),
                        level,
                        summary: verdict.summary,
                    });
                }
            }

            let key = VersionKey::new(subject.clone(), append.next_version());
            self.references.ensure_acyclic(&key, references)?;

            let stored = self.contents.put(&query);
            let version = append.append(stored.id, stored.global_id, references.to_vec());
            self.references.link(&key, references)?;
            info!(
                version = version.version,
                global_id = %stored.global_id,
                content_id = %stored.id,
                "registered new version"
            );
            Ok(stored.global_id)
        })
    }

    /// Resolve references, parse and canonicalize. Nothing is written.
    fn prepare(&self, format: SchemaFormat, schema: &[u8], references: &[Reference]) -> Result<Prepared> {
        let deps = self.dependency_closure(references)?;
        let document = self.canonicalizer.parse(format, schema, &deps)?;
        let raw = std::str::from_utf8(schema)
            .map_err(|e| RegistryError::invalid(format, format!("schema is not valid UTF-8: {e}")))?;

        if format == SchemaFormat::Protobuf {
            let imports: BTreeSet<String> =
                protobuf::required_imports(&self.config.registry.protobuf_file_name, raw)?.into_iter().collect();
            let named: BTreeSet<String> = references.iter().map(|r| r.name.clone()).collect();
            if imports != named {
                return Err(RegistryError::InvalidReferences(format!(
                    "references {named:?} do not match imports {imports:?}"
                )));
            }
        }

        let canonical = document.canonical_text()?;
        Ok(Prepared {
            document,
            content: SchemaContent::new(format, raw, canonical),
        })
    }

    /// Validate `references` and collect the text of everything they reach
    fn dependency_closure(&self, references: &[Reference]) -> Result<BTreeMap<String, String>> {
        let root = self.config.registry.protobuf_file_name.as_str();
        ReferenceResolver::validate(references, root, |subject, version| self.versions.exists(subject, version))?;
        let closure = ReferenceResolver::resolve_closure(references, |reference| {
            let version = self.versions.get(&reference.subject, reference.version)?;
            let stored = self
                .contents
                .get(version.content_id)
                .ok_or(RegistryError::ContentNotFound(version.global_id))?;
            Ok((stored.content.raw, version.references))
        })?;
        if closure.contains_key(root) {
            return Err(RegistryError::InvalidReferences(format!(
                "a transitive reference is named '{root}', which collides with the name of the referencing schema"
            )));
        }
        Ok(closure)
    }

    /// Re-parse a stored version for compatibility checking
    fn document_of(&self, version: &Version) -> Result<SchemaDocument> {
        let stored = self
            .contents
            .get(version.content_id)
            .ok_or(RegistryError::ContentNotFound(version.global_id))?;
        let deps = self.dependency_closure(&version.references)?;
        self.canonicalizer
            .parse(stored.content.format, stored.content.raw.as_bytes(), &deps)
    }

    /// Content registered under `global_id`
    pub fn get_content_by_global_id(&self, global_id: GlobalId) -> Result<SchemaContent> {
        self.contents
            .get_by_global_id(global_id)
            .map(|stored| stored.content)
            .ok_or(RegistryError::ContentNotFound(global_id))
    }

    /// Version metadata; `latest` skips disabled versions
    pub fn get_version(&self, subject: &SubjectKey, selector: VersionSelector) -> Result<Version> {
        self.versions.resolve(subject, selector)
    }

    /// Schema content of a version
    pub fn get_schema(&self, subject: &SubjectKey, selector: VersionSelector) -> Result<SchemaContent> {
        let version = self.versions.resolve(subject, selector)?;
        self.get_content_by_global_id(version.global_id)
    }

    /// Ordinals of the subject's non-disabled versions
    pub fn list_versions(&self, subject: &SubjectKey) -> Result<Vec<u32>> {
        self.versions.list_versions(subject)
    }

    pub fn list_subjects(&self) -> Vec<SubjectKey> {
        self.versions.list_subjects()
    }

    /// Global ids of the versions that reference `subject` version `version`
    pub fn get_referenced_by(&self, subject: &SubjectKey, version: u32) -> Result<BTreeSet<GlobalId>> {
        self.versions.get(subject, version)?;
        self.references
            .referenced_by(&VersionKey::new(subject.clone(), version))
            .into_iter()
            .map(|key| self.versions.get(&key.subject, key.version).map(|v| v.global_id))
            .collect()
    }

    /// Flip the state of one version, or of the whole subject when `version` is `None`
    #[instrument(skip(self, subject), fields(subject = %subject))]
    pub fn set_subject_state(&self, subject: &SubjectKey, version: Option<u32>, state: LifecycleState) -> Result<()> {
        match version {
            Some(version) => {
                self.versions.set_state(subject, version, state)?;
            }
            None => self.versions.set_subject_state(subject, state)?,
        }
        info!(?version, ?state, "lifecycle state changed");
        Ok(())
    }

    fn global_compatibility(&self) -> CompatibilityLevel {
        *self.global_compatibility.read()
    }

    /// Set the level of a subject, or the global level when `subject` is `None`
    #[instrument(skip(self))]
    pub fn set_compatibility(&self, subject: Option<&SubjectKey>, level: CompatibilityLevel) {
        match subject {
            Some(subject) => self.versions.set_compatibility(subject, level),
            None => *self.global_compatibility.write() = level,
        }
        info!(%level, "compatibility level set");
    }

    /// Effective level of a subject, or the global level
    pub fn get_compatibility(&self, subject: Option<&SubjectKey>) -> CompatibilityLevel {
        subject
            .and_then(|subject| self.versions.compatibility(subject))
            .unwrap_or_else(|| self.global_compatibility())
    }

    /// Drop a subject override so the global level applies again.
    ///
    /// Returns the removed override, or the global level when the subject had none.
    pub fn delete_compatibility(&self, subject: &SubjectKey) -> Result<CompatibilityLevel> {
        match self.versions.clear_compatibility(subject) {
            Some(previous) => {
                info!(subject = %subject, %previous, "compatibility override removed");
                Ok(previous)
            }
            None => {
                debug!(subject = %subject, "no compatibility override to remove");
                Ok(self.global_compatibility())
            }
        }
    }

    /// Find the version of `subject` holding the given schema
    pub fn lookup_schema(
        &self,
        subject: &SubjectKey,
        format: SchemaFormat,
        schema: impl AsRef<[u8]>,
        references: &[Reference],
        normalize: bool,
    ) -> Result<Version> {
        let prepared = self.prepare(format, schema.as_ref(), references)?;
        self.versions
            .versions(subject)?
            .into_iter()
            .filter(|version| !version.state.is_disabled())
            .find(|version| {
                self.contents.get(version.content_id).is_some_and(|stored| {
                    stored.references == references
                        && stored.content.format == format
                        && (stored.content.content_hash == prepared.content.content_hash
                            || (normalize && stored.content.canonical_hash == prepared.content.canonical_hash))
                })
            })
            .ok_or_else(|| RegistryError::SchemaNotFound(format!("no version of {subject} holds this schema")))
    }

    /// Dry-run a compatibility check.
    ///
    /// With a selector only that version is compared; otherwise the subject's
    /// history is checked under its effective level.
    pub fn test_compatibility(
        &self,
        subject: &SubjectKey,
        selector: Option<VersionSelector>,
        format: SchemaFormat,
        schema: impl AsRef<[u8]>,
        references: &[Reference],
    ) -> Result<CompatibilityVerdict> {
        let prepared = self.prepare(format, schema.as_ref(), references)?;
        let level = self.get_compatibility(Some(subject));
        let history = match selector {
            Some(selector) => vec![self.versions.resolve(subject, selector)?],
            None => match self.versions.list_versions(subject) {
                Ok(ordinals) => ordinals
                    .into_iter()
                    .map(|ordinal| self.versions.get(subject, ordinal))
                    .collect::<Result<Vec<_>>>()?,
                Err(RegistryError::SubjectNotFound(_)) => Vec::new(),
                Err(error) => return Err(error),
            },
        };
        let documents = history
            .iter()
            .map(|version| Ok((version.version, self.document_of(version)?)))
            .collect::<Result<Vec<_>>>()?;
        Ok(self.checker.check(level, &prepared.document, &documents))
    }

    /// Every (subject, version) using `global_id`
    pub fn subject_versions_for(&self, global_id: GlobalId) -> Result<Vec<(SubjectKey, u32)>> {
        if self.contents.get_by_global_id(global_id).is_none() {
            return Err(RegistryError::ContentNotFound(global_id));
        }
        Ok(self
            .versions
            .versions_with_global_id(global_id)
            .into_iter()
            .map(|version| (version.subject, version.version))
            .collect())
    }

    pub fn schema_types(&self) -> Vec<SchemaFormat> {
        SchemaFormat::ALL.to_vec()
    }

    /// Number of distinct stored contents
    pub fn content_count(&self) -> usize {
        self.contents.len()
    }

    pub fn snapshot(&self) -> RegistrySnapshot {
        RegistrySnapshot::new(self.global_compatibility(), self.contents.rows(), self.versions.records())
    }

    /// Rebuild a registry from a snapshot; id sequences resume after the highest persisted ids
    pub fn restore(config: RegistryConfig, snapshot: RegistrySnapshot) -> Result<Self> {
        let content_ids: Arc<dyn IdSequence> = Arc::new(AtomicSequence::starting_after(snapshot.max_content_id()));
        let global_ids: Arc<dyn IdSequence> = Arc::new(AtomicSequence::starting_after(snapshot.max_global_id()));
        let content_rows = snapshot.contents;
        let known: BTreeSet<ContentId> = content_rows.iter().map(|row| row.id).collect();
        let contents = ContentStore::restore(content_rows, content_ids, global_ids)?;

        let records: Vec<_> = snapshot
            .subjects
            .into_iter()
            .map(|entry| (entry.subject, entry.record))
            .collect();
        let references = ReferenceResolver::new();
        for (subject, record) in &records {
            for version in &record.versions {
                if !known.contains(&version.content_id) {
                    return Err(RegistryError::CorruptSnapshot(format!(
                        "{subject} version {} points at missing content {}",
                        version.version, version.content_id
                    )));
                }
                references.link(&VersionKey::new(subject.clone(), version.version), &version.references)?;
            }
        }
        let versions = VersionStore::restore(records)?;

        info!(contents = contents.len(), subjects = versions.list_subjects().len(), "restored registry");
        Ok(Self {
            global_compatibility: RwLock::new(snapshot.global_compatibility),
            canonicalizer: Canonicalizer::new(config.registry.protobuf_file_name.clone()),
            checker: CompatibilityChecker::new(),
            contents,
            versions,
            references,
            config,
        })
    }

    /// Write a snapshot using the configured output format
    pub fn save_snapshot(&self, path: impl AsRef<Path>) -> Result<()> {
        self.snapshot().write_to(path, self.config.pretty_output())
    }

    pub fn load_snapshot(config: RegistryConfig, path: impl AsRef<Path>) -> Result<Self> {
        Self::restore(config, RegistrySnapshot::read_from(path)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const USER_V1: &str = r#"{"type":"record","name":"User","fields":[{"name":"id","type":"long"}]}"#;

    #[test]
    fn test_register_and_fetch() {
        let registry = SchemaRegistry::default();
        let subject = SubjectKey::named("users-value");
        let id = registry
            .register_schema(&subject, SchemaFormat::Avro, USER_V1, &[], RegisterOptions::default())
            .unwrap();

        assert_eq!(id, GlobalId(1));
        assert_eq!(registry.get_content_by_global_id(id).unwrap().raw, USER_V1);
        assert_eq!(registry.list_versions(&subject).unwrap(), vec![1]);
        let latest = registry.get_version(&subject, VersionSelector::Latest).unwrap();
        assert_eq!(latest.global_id, id);
    }

    #[test]
    fn test_invalid_schema_writes_nothing() {
        let registry = SchemaRegistry::default();
        let subject = SubjectKey::named("broken");
        let err = registry
            .register_schema(&subject, SchemaFormat::Json, "{not json", &[], RegisterOptions::default())
            .unwrap_err();
        assert_eq!(err.error_code(), 42201);
        assert_eq!(registry.content_count(), 0);
        assert!(registry.list_subjects().is_empty());
    }

    #[test]
    fn test_subject_parsing_uses_default_group() {
        let registry = SchemaRegistry::default();
        assert_eq!(registry.subject("orders"), SubjectKey::named("orders"));
        assert_eq!(registry.subject("billing/invoice"), SubjectKey::new("billing", "invoice"));
    }

    #[test]
    fn test_compatibility_levels() {
        let registry = SchemaRegistry::default();
        let subject = SubjectKey::named("s");
        assert_eq!(registry.get_compatibility(Some(&subject)), CompatibilityLevel::None);

        registry.set_compatibility(None, CompatibilityLevel::Backward);
        registry.set_compatibility(Some(&subject), CompatibilityLevel::Full);
        assert_eq!(registry.get_compatibility(Some(&subject)), CompatibilityLevel::Full);
        assert_eq!(registry.delete_compatibility(&subject).unwrap(), CompatibilityLevel::Full);
        assert_eq!(registry.get_compatibility(Some(&subject)), CompatibilityLevel::Backward);
        assert_eq!(registry.delete_compatibility(&subject).unwrap(), CompatibilityLevel::Backward);
    }
}
