//! Per-subject version sequences
//!
//! Each subject owns an append-only list of versions numbered from 1. Appends
//! run inside the subject's append scope (a per-subject mutex) so ordinals are
//! gap-free, and so the compatibility check sees the same history the new
//! version is appended to.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use crate::compatibility::CompatibilityLevel;
use crate::error::{RegistryError, Result};
use crate::schema::{ContentId, GlobalId, LifecycleState, Reference, SubjectKey};

/// One registered version of a subject
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Version {
    pub subject: SubjectKey,
    /// 1-based ordinal within the subject
    pub version: u32,
    pub content_id: ContentId,
    pub global_id: GlobalId,
    #[serde(default)]
    pub state: LifecycleState,
    #[serde(default)]
    pub references: Vec<Reference>,
    pub created_at: DateTime<Utc>,
}

/// Which version of a subject to read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionSelector {
    /// Highest non-disabled version
    Latest,
    Version(u32),
}

impl FromStr for VersionSelector {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "latest" | "-1" => Ok(VersionSelector::Latest),
            other => match other.parse::<u32>() {
                Ok(n) if n > 0 => Ok(VersionSelector::Version(n)),
                _ => Err(RegistryError::InvalidVersion(other.to_string())),
            },
        }
    }
}

impl From<u32> for VersionSelector {
    fn from(version: u32) -> Self {
        VersionSelector::Version(version)
    }
}

impl fmt::Display for VersionSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionSelector::Latest => f.write_str("latest"),
            VersionSelector::Version(n) => write!(f, "{n}"),
        }
    }
}

/// Persistent state of one subject
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubjectRecord {
    #[serde(default)]
    pub state: LifecycleState,
    /// Overrides the registry-wide level when set
    #[serde(default)]
    pub compatibility: Option<CompatibilityLevel>,
    #[serde(default)]
    pub versions: Vec<Version>,
}

impl SubjectRecord {
    fn live(&self) -> impl Iterator<Item = &Version> {
        self.versions.iter().filter(|v| !v.state.is_disabled())
    }
}

#[derive(Debug, Default)]
struct SubjectLog {
    append_lock: Mutex<()>,
    record: RwLock<SubjectRecord>,
}

/// Handle given to code running inside a subject's append scope
pub struct SubjectAppend<'a> {
    subject: &'a SubjectKey,
    log: &'a SubjectLog,
}

impl SubjectAppend<'_> {
    /// Non-disabled versions in ordinal order
    pub fn history(&self) -> Vec<Version> {
        self.log.record.read().live().cloned().collect()
    }

    /// Every version, disabled ones included
    pub fn versions(&self) -> Vec<Version> {
        self.log.record.read().versions.clone()
    }

    pub fn compatibility(&self) -> Option<CompatibilityLevel> {
        self.log.record.read().compatibility
    }

    /// Ordinal the next append will receive
    pub fn next_version(&self) -> u32 {
        self.log.record.read().versions.len() as u32 + 1
    }

    pub fn append(&mut self, content_id: ContentId, global_id: GlobalId, references: Vec<Reference>) -> Version {
        let mut record = self.log.record.write();
        let version = Version {
            subject: self.subject.clone(),
            version: record.versions.len() as u32 + 1,
            content_id,
            global_id,
            state: LifecycleState::Enabled,
            references,
            created_at: Utc::now(),
        };
        record.versions.push(version.clone());
        version
    }
}

/// All subjects and their versions
#[derive(Debug, Default)]
pub struct VersionStore {
    subjects: RwLock<BTreeMap<SubjectKey, Arc<SubjectLog>>>,
}

impl VersionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn restore(records: Vec<(SubjectKey, SubjectRecord)>) -> Result<Self> {
        let mut subjects = BTreeMap::new();
        for (subject, record) in records {
            for (index, version) in record.versions.iter().enumerate() {
                if version.version as usize != index + 1 || version.subject != subject {
                    return Err(RegistryError::CorruptSnapshot(format!(
                        "{subject} has a misnumbered version {}",
                        version.version
                    )));
                }
            }
            let log = SubjectLog {
                append_lock: Mutex::new(()),
                record: RwLock::new(record),
            };
            subjects.insert(subject, Arc::new(log));
        }
        Ok(Self {
            subjects: RwLock::new(subjects),
        })
    }

    fn log(&self, subject: &SubjectKey) -> Option<Arc<SubjectLog>> {
        self.subjects.read().get(subject).cloned()
    }

    fn log_or_create(&self, subject: &SubjectKey) -> Arc<SubjectLog> {
        if let Some(log) = self.log(subject) {
            return log;
        }
        Arc::clone(self.subjects.write().entry(subject.clone()).or_default())
    }

    /// Log of a subject that has at least one version
    fn existing(&self, subject: &SubjectKey) -> Result<Arc<SubjectLog>> {
        self.log(subject)
            .filter(|log| !log.record.read().versions.is_empty())
            .ok_or_else(|| RegistryError::SubjectNotFound(subject.clone()))
    }

    /// Run `f` inside the subject's append scope.
    pub fn with_append<T>(&self, subject: &SubjectKey, f: impl FnOnce(&mut SubjectAppend<'_>) -> Result<T>) -> Result<T> {
        let log = self.log_or_create(subject);
        let _guard = log.append_lock.lock();
        let mut append = SubjectAppend { subject, log: &log };
        f(&mut append)
    }

    /// Highest-ordinal non-disabled version.
    ///
    /// A disabled subject, or one whose versions are all disabled, reads as
    /// absent.
    pub fn latest(&self, subject: &SubjectKey) -> Result<Version> {
        let log = self.existing(subject)?;
        let record = log.record.read();
        if record.state.is_disabled() {
            return Err(RegistryError::SubjectNotFound(subject.clone()));
        }
        record
            .live()
            .last()
            .cloned()
            .ok_or_else(|| RegistryError::SubjectNotFound(subject.clone()))
    }

    /// Explicit lookup; disabled versions are returned too
    pub fn get(&self, subject: &SubjectKey, version: u32) -> Result<Version> {
        let log = self.existing(subject)?;
        let record = log.record.read();
        version
            .checked_sub(1)
            .and_then(|index| record.versions.get(index as usize))
            .cloned()
            .ok_or_else(|| RegistryError::VersionNotFound {
                subject: subject.clone(),
                version: version.to_string(),
            })
    }

    pub fn resolve(&self, subject: &SubjectKey, selector: VersionSelector) -> Result<Version> {
        match selector {
            VersionSelector::Latest => self.latest(subject),
            VersionSelector::Version(n) => self.get(subject, n),
        }
    }

    pub fn exists(&self, subject: &SubjectKey, version: u32) -> bool {
        self.get(subject, version).is_ok()
    }

    pub fn set_state(&self, subject: &SubjectKey, version: u32, state: LifecycleState) -> Result<Version> {
        let log = self.existing(subject)?;
        let mut record = log.record.write();
        let entry = version
            .checked_sub(1)
            .and_then(|index| record.versions.get_mut(index as usize))
            .ok_or_else(|| RegistryError::VersionNotFound {
                subject: subject.clone(),
                version: version.to_string(),
            })?;
        entry.state = state;
        Ok(entry.clone())
    }

    pub fn set_subject_state(&self, subject: &SubjectKey, state: LifecycleState) -> Result<()> {
        let log = self.existing(subject)?;
        log.record.write().state = state;
        Ok(())
    }

    pub fn subject_state(&self, subject: &SubjectKey) -> Result<LifecycleState> {
        Ok(self.existing(subject)?.record.read().state)
    }

    /// Ordinals of non-disabled versions
    pub fn list_versions(&self, subject: &SubjectKey) -> Result<Vec<u32>> {
        let log = self.existing(subject)?;
        let record = log.record.read();
        Ok(record.live().map(|v| v.version).collect())
    }

    /// Every version of a subject, disabled ones included
    pub fn versions(&self, subject: &SubjectKey) -> Result<Vec<Version>> {
        Ok(self.existing(subject)?.record.read().versions.clone())
    }

    /// Subjects with at least one version
    pub fn list_subjects(&self) -> Vec<SubjectKey> {
        self.subjects
            .read()
            .iter()
            .filter(|(_, log)| !log.record.read().versions.is_empty())
            .map(|(subject, _)| subject.clone())
            .collect()
    }

    pub fn compatibility(&self, subject: &SubjectKey) -> Option<CompatibilityLevel> {
        self.log(subject).and_then(|log| log.record.read().compatibility)
    }

    /// Set a subject override. The subject need not have versions yet.
    pub fn set_compatibility(&self, subject: &SubjectKey, level: CompatibilityLevel) {
        self.log_or_create(subject).record.write().compatibility = Some(level);
    }

    /// Remove a subject override, returning the previous value
    pub fn clear_compatibility(&self, subject: &SubjectKey) -> Option<CompatibilityLevel> {
        self.log(subject).and_then(|log| log.record.write().compatibility.take())
    }

    /// Every version, in any subject, that points at `global_id`
    pub fn versions_with_global_id(&self, global_id: GlobalId) -> Vec<Version> {
        let subjects = self.subjects.read();
        subjects
            .values()
            .flat_map(|log| {
                log.record
                    .read()
                    .versions
                    .iter()
                    .filter(|v| v.global_id == global_id)
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    /// Copy of every subject record, in subject order
    pub fn records(&self) -> Vec<(SubjectKey, SubjectRecord)> {
        self.subjects
            .read()
            .iter()
            .map(|(subject, log)| (subject.clone(), log.record.read().clone()))
            .filter(|(_, record)| !record.versions.is_empty() || record.compatibility.is_some())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn append(store: &VersionStore, subject: &SubjectKey, id: i64) -> Version {
        store
            .with_append(subject, |scope| Ok(scope.append(ContentId(id), GlobalId(id), Vec::new())))
            .unwrap()
    }

    #[test]
    fn test_ordinals_are_contiguous() {
        let store = VersionStore::new();
        let subject = SubjectKey::named("orders");
        assert_eq!(append(&store, &subject, 1).version, 1);
        assert_eq!(append(&store, &subject, 2).version, 2);
        assert_eq!(store.list_versions(&subject).unwrap(), vec![1, 2]);
        assert_eq!(store.latest(&subject).unwrap().global_id, GlobalId(2));
    }

    #[test]
    fn test_disabled_version_is_hidden_from_latest() {
        let store = VersionStore::new();
        let subject = SubjectKey::named("orders");
        append(&store, &subject, 1);
        append(&store, &subject, 2);
        store.set_state(&subject, 2, LifecycleState::Disabled).unwrap();

        assert_eq!(store.latest(&subject).unwrap().version, 1);
        assert_eq!(store.list_versions(&subject).unwrap(), vec![1]);
        assert_eq!(store.get(&subject, 2).unwrap().state, LifecycleState::Disabled);

        store.set_subject_state(&subject, LifecycleState::Disabled).unwrap();
        assert!(matches!(store.latest(&subject), Err(RegistryError::SubjectNotFound(_))));
    }

    #[test]
    fn test_all_versions_disabled_reads_as_missing_subject() {
        let store = VersionStore::new();
        let subject = SubjectKey::named("orders");
        append(&store, &subject, 1);
        store.set_state(&subject, 1, LifecycleState::Disabled).unwrap();

        assert!(matches!(store.latest(&subject), Err(RegistryError::SubjectNotFound(_))));
        assert_eq!(store.get(&subject, 1).unwrap().version, 1);
    }

    #[test]
    fn test_missing_subject_and_version() {
        let store = VersionStore::new();
        let subject = SubjectKey::named("nope");
        assert!(matches!(store.latest(&subject), Err(RegistryError::SubjectNotFound(_))));
        append(&store, &subject, 1);
        assert!(matches!(store.get(&subject, 7), Err(RegistryError::VersionNotFound { .. })));
        assert!(matches!(store.get(&subject, 0), Err(RegistryError::VersionNotFound { .. })));
    }

    #[test]
    fn test_compatibility_override_without_versions() {
        let store = VersionStore::new();
        let subject = SubjectKey::named("configured");
        store.set_compatibility(&subject, CompatibilityLevel::Full);
        assert_eq!(store.compatibility(&subject), Some(CompatibilityLevel::Full));
        assert!(store.list_subjects().is_empty());
        assert_eq!(store.clear_compatibility(&subject), Some(CompatibilityLevel::Full));
        assert_eq!(store.compatibility(&subject), None);
    }

    #[test]
    fn test_selector_parsing() {
        assert_eq!("latest".parse::<VersionSelector>().unwrap(), VersionSelector::Latest);
        assert_eq!("-1".parse::<VersionSelector>().unwrap(), VersionSelector::Latest);
        assert_eq!("3".parse::<VersionSelector>().unwrap(), VersionSelector::Version(3));
        assert!(matches!("0".parse::<VersionSelector>(), Err(RegistryError::InvalidVersion(_))));
        assert!("abc".parse::<VersionSelector>().is_err());
    }
}
