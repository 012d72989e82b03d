//! Schema-to-schema reference graph
//!
//! Nodes are subject versions; an edge `a -> b` named `n` means version `a`
//! was registered with reference `n` pointing at version `b`. The graph stays
//! acyclic and is append-only like the versions it describes.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::fmt;

use parking_lot::RwLock;
use petgraph::algo::has_path_connecting;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{RegistryError, Result};
use crate::schema::{Reference, SubjectKey};

/// A (subject, version) pair
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VersionKey {
    pub subject: SubjectKey,
    pub version: u32,
}

impl VersionKey {
    pub fn new(subject: SubjectKey, version: u32) -> Self {
        Self { subject, version }
    }

    pub fn target_of(reference: &Reference) -> Self {
        Self::new(reference.subject.clone(), reference.version)
    }
}

impl fmt::Display for VersionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} v{}", self.subject, self.version)
    }
}

#[derive(Debug, Default)]
struct ReferenceGraph {
    graph: DiGraph<VersionKey, String>,
    node_indices: HashMap<VersionKey, NodeIndex>,
}

impl ReferenceGraph {
    fn node(&mut self, key: &VersionKey) -> NodeIndex {
        if let Some(index) = self.node_indices.get(key) {
            return *index;
        }
        let index = self.graph.add_node(key.clone());
        self.node_indices.insert(key.clone(), index);
        index
    }

    /// Would an edge `from -> target` close a cycle?
    fn closes_cycle(&self, from: &VersionKey, target: &VersionKey) -> bool {
        if from == target {
            return true;
        }
        match (self.node_indices.get(from), self.node_indices.get(target)) {
            (Some(from), Some(target)) => has_path_connecting(&self.graph, *target, *from, None),
            _ => false,
        }
    }
}

/// Tracks reference edges and assembles dependency closures
#[derive(Debug, Default)]
pub struct ReferenceResolver {
    inner: RwLock<ReferenceGraph>,
}

impl ReferenceResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check reference names are unique, none is `root_name`, and every target exists.
    ///
    /// `root_name` is the name the referencing schema itself is linked under.
    pub fn validate(
        references: &[Reference],
        root_name: &str,
        exists: impl Fn(&SubjectKey, u32) -> bool,
    ) -> Result<()> {
        let mut names = HashSet::new();
        for reference in references {
            if reference.name.is_empty() {
                return Err(RegistryError::InvalidReferences("reference names must not be empty".to_string()));
            }
            if reference.name == root_name {
                return Err(RegistryError::InvalidReferences(format!(
                    "reference name '{root_name}' collides with the name of the referencing schema"
                )));
            }
            if !names.insert(reference.name.as_str()) {
                return Err(RegistryError::InvalidReferences(format!(
                    "reference name '{}' is used more than once",
                    reference.name
                )));
            }
            if !exists(&reference.subject, reference.version) {
                return Err(RegistryError::DanglingReference {
                    name: reference.name.clone(),
                    subject: reference.subject.clone(),
                    version: reference.version,
                });
            }
        }
        Ok(())
    }

    /// Fail if linking `from` to `references` would introduce a cycle.
    pub fn ensure_acyclic(&self, from: &VersionKey, references: &[Reference]) -> Result<()> {
        let graph = self.inner.read();
        for reference in references {
            if graph.closes_cycle(from, &VersionKey::target_of(reference)) {
                return Err(RegistryError::CyclicReference {
                    name: reference.name.clone(),
                    subject: reference.subject.clone(),
                    version: reference.version,
                });
            }
        }
        Ok(())
    }

    /// Record the edges of a newly registered version.
    pub fn link(&self, from: &VersionKey, references: &[Reference]) -> Result<()> {
        let mut graph = self.inner.write();
        for reference in references {
            if graph.closes_cycle(from, &VersionKey::target_of(reference)) {
                return Err(RegistryError::CyclicReference {
                    name: reference.name.clone(),
                    subject: reference.subject.clone(),
                    version: reference.version,
                });
            }
        }
        let source = graph.node(from);
        for reference in references {
            let target = graph.node(&VersionKey::target_of(reference));
            graph.graph.add_edge(source, target, reference.name.clone());
        }
        if !references.is_empty() {
            debug!(from = %from, edges = references.len(), "linked references");
        }
        Ok(())
    }

    /// Versions that reference `target` directly
    pub fn referenced_by(&self, target: &VersionKey) -> BTreeSet<VersionKey> {
        let graph = self.inner.read();
        let Some(index) = graph.node_indices.get(target) else {
            return BTreeSet::new();
        };
        graph
            .graph
            .neighbors_directed(*index, Direction::Incoming)
            .map(|n| graph.graph[n].clone())
            .collect()
    }

    /// Outgoing edges of `from`: reference name and target
    pub fn references_of(&self, from: &VersionKey) -> Vec<(String, VersionKey)> {
        let graph = self.inner.read();
        let Some(index) = graph.node_indices.get(from) else {
            return Vec::new();
        };
        let mut edges: Vec<(String, VersionKey)> = graph
            .graph
            .edges_directed(*index, Direction::Outgoing)
            .map(|edge| (edge.weight().clone(), graph.graph[edge.target()].clone()))
            .collect();
        edges.sort();
        edges
    }

    pub fn edge_count(&self) -> usize {
        self.inner.read().graph.edge_count()
    }

    /// Transitive dependency map (reference name -> schema text).
    ///
    /// `fetch` returns the raw text and the references of a version. The same
    /// name reached through two paths must name the same version.
    pub fn resolve_closure(
        references: &[Reference],
        fetch: impl Fn(&Reference) -> Result<(String, Vec<Reference>)>,
    ) -> Result<BTreeMap<String, String>> {
        let mut closure = BTreeMap::new();
        let mut targets: HashMap<String, VersionKey> = HashMap::new();
        let mut queue: VecDeque<Reference> = references.iter().cloned().collect();
        while let Some(reference) = queue.pop_front() {
            let target = VersionKey::target_of(&reference);
            if let Some(previous) = targets.get(&reference.name) {
                if *previous != target {
                    return Err(RegistryError::InvalidReferences(format!(
                        "'{}' resolves to both {previous} and {target}",
                        reference.name
                    )));
                }
                continue;
            }
            let (raw, nested) = fetch(&reference)?;
            targets.insert(reference.name.clone(), target);
            closure.insert(reference.name.clone(), raw);
            queue.extend(nested);
        }
        Ok(closure)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(subject: &str, version: u32) -> VersionKey {
        VersionKey::new(SubjectKey::named(subject), version)
    }

    #[test]
    fn test_referenced_by() {
        let resolver = ReferenceResolver::new();
        resolver
            .link(&key("order", 1), &[Reference::new("customer.proto", "customer", 1)])
            .unwrap();
        resolver
            .link(&key("invoice", 1), &[Reference::new("customer.proto", "customer", 1)])
            .unwrap();

        let users = resolver.referenced_by(&key("customer", 1));
        assert_eq!(users.into_iter().collect::<Vec<_>>(), vec![key("invoice", 1), key("order", 1)]);
        assert!(resolver.referenced_by(&key("customer", 2)).is_empty());
    }

    #[test]
    fn test_cycle_is_rejected() {
        let resolver = ReferenceResolver::new();
        resolver.link(&key("a", 1), &[Reference::new("b", "b", 1)]).unwrap();
        let err = resolver.link(&key("b", 1), &[Reference::new("a", "a", 1)]).unwrap_err();
        assert!(matches!(err, RegistryError::CyclicReference { .. }));
        assert!(resolver.ensure_acyclic(&key("a", 2), &[Reference::new("a", "a", 2)]).is_err());
        assert_eq!(resolver.edge_count(), 1);
    }

    #[test]
    fn test_validate() {
        let exists = |subject: &SubjectKey, version: u32| subject.name == "known" && version == 1;
        assert!(ReferenceResolver::validate(&[Reference::new("x", "known", 1)], "schema.proto", exists).is_ok());

        let dangling = ReferenceResolver::validate(&[Reference::new("x", "known", 2)], "schema.proto", exists).unwrap_err();
        assert!(matches!(dangling, RegistryError::DanglingReference { version: 2, .. }));

        let duplicate = ReferenceResolver::validate(
            &[Reference::new("x", "known", 1), Reference::new("x", "known", 1)],
            "schema.proto",
            exists,
        )
        .unwrap_err();
        assert!(matches!(duplicate, RegistryError::InvalidReferences(_)));

        let shadowing =
            ReferenceResolver::validate(&[Reference::new("schema.proto", "known", 1)], "schema.proto", exists)
                .unwrap_err();
        assert!(matches!(shadowing, RegistryError::InvalidReferences(_)));
    }

    #[test]
    fn test_resolve_closure_is_transitive() {
        let fetch = |reference: &Reference| -> Result<(String, Vec<Reference>)> {
            match reference.subject.name.as_str() {
                "a" => Ok(("A".to_string(), vec![Reference::new("b.proto", "b", 1)])),
                "b" => Ok(("B".to_string(), Vec::new())),
                other => Err(RegistryError::SubjectNotFound(SubjectKey::named(other))),
            }
        };
        let closure = ReferenceResolver::resolve_closure(&[Reference::new("a.proto", "a", 1)], fetch).unwrap();
        assert_eq!(closure.get("a.proto").map(String::as_str), Some("A"));
        assert_eq!(closure.get("b.proto").map(String::as_str), Some("B"));
    }
}
