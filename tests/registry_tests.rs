//! Registry Integration Tests
//!
//! Drive the public registry API end to end with the fixture schemas.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::thread;

use schema_registry::{
    CompatibilityLevel, ErrorKind, GlobalId, LifecycleState, Reference, RegisterOptions, RegistryConfig,
    RegistryError, SchemaFormat, SchemaRegistry, SubjectKey, VersionSelector,
};

const CUSTOMER: &str = include_str!("fixtures/customer.proto");
const ORDER: &str = include_str!("fixtures/order.proto");
const USER_V1: &str = include_str!("fixtures/user_v1.avsc");
const USER_V2: &str = include_str!("fixtures/user_v2.avsc");
const USER_V3: &str = include_str!("fixtures/user_v3.avsc");

fn register(registry: &SchemaRegistry, subject: &SubjectKey, format: SchemaFormat, schema: &str) -> GlobalId {
    registry
        .register_schema(subject, format, schema, &[], RegisterOptions::default())
        .unwrap()
}

fn user_history(registry: &SchemaRegistry, subject: &SubjectKey) {
    register(registry, subject, SchemaFormat::Avro, USER_V1);
    register(registry, subject, SchemaFormat::Avro, USER_V2);
}

// =============================================================================
// Content Identity
// =============================================================================

#[test]
fn test_reregistering_is_idempotent() {
    let registry = SchemaRegistry::default();
    let subject = SubjectKey::named("user");

    let first = register(&registry, &subject, SchemaFormat::Avro, USER_V1);
    let second = register(&registry, &subject, SchemaFormat::Avro, USER_V1);

    assert_eq!(first, second);
    assert_eq!(registry.list_versions(&subject).unwrap(), vec![1]);
    assert_eq!(registry.content_count(), 1);
}

#[test]
fn test_normalize_collapses_formatting_changes() {
    let registry = SchemaRegistry::default();
    let subject = SubjectKey::named("point");
    let compact = r#"{"type":"object","properties":{"x":{"type":"number"}}}"#;
    let spaced = r#"{ "properties": { "x": { "type": "number" } }, "type": "object" }"#;

    let original = register(&registry, &subject, SchemaFormat::Json, compact);
    let normalized = registry
        .register_schema(&subject, SchemaFormat::Json, spaced, &[], RegisterOptions::normalized())
        .unwrap();
    assert_eq!(normalized, original);
    assert_eq!(registry.list_versions(&subject).unwrap(), vec![1]);

    let verbatim = register(&registry, &subject, SchemaFormat::Json, spaced);
    assert_ne!(verbatim, original);
    assert_eq!(registry.list_versions(&subject).unwrap(), vec![1, 2]);
}

#[test]
fn test_content_is_shared_across_subjects() {
    let registry = SchemaRegistry::default();
    let first = SubjectKey::named("first");
    let second = SubjectKey::named("second");

    let shared = register(&registry, &first, SchemaFormat::Avro, USER_V1);
    register(&registry, &second, SchemaFormat::Avro, USER_V2);
    let reused = register(&registry, &second, SchemaFormat::Avro, USER_V1);

    assert_eq!(reused, shared);
    assert_eq!(registry.get_version(&second, VersionSelector::Latest).unwrap().version, 2);
    assert_eq!(registry.content_count(), 2);

    let users: BTreeSet<(SubjectKey, u32)> = registry.subject_versions_for(shared).unwrap().into_iter().collect();
    assert_eq!(users, BTreeSet::from([(first, 1), (second, 2)]));
}

#[test]
fn test_lookup_schema() {
    let registry = SchemaRegistry::default();
    let subject = SubjectKey::named("user");
    user_history(&registry, &subject);

    let found = registry
        .lookup_schema(&subject, SchemaFormat::Avro, USER_V2, &[], false)
        .unwrap();
    assert_eq!(found.version, 2);

    let err = registry
        .lookup_schema(&subject, SchemaFormat::Avro, USER_V3, &[], false)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

// =============================================================================
// References
// =============================================================================

#[test]
fn test_protobuf_references() {
    let registry = SchemaRegistry::default();
    let customer = registry.subject("customer");
    let orders = registry.subject("orders");

    let customer_id = register(&registry, &customer, SchemaFormat::Protobuf, CUSTOMER);
    let reference = Reference::new("customer.proto", customer.clone(), 1);
    let order_id = registry
        .register_schema(
            &orders,
            SchemaFormat::Protobuf,
            ORDER,
            std::slice::from_ref(&reference),
            RegisterOptions::default(),
        )
        .unwrap();

    assert_ne!(order_id, customer_id);
    assert_eq!(registry.get_referenced_by(&customer, 1).unwrap(), BTreeSet::from([order_id]));
    let version = registry.get_version(&orders, VersionSelector::Latest).unwrap();
    assert_eq!(version.references, vec![reference]);
}

#[test]
fn test_dangling_reference_is_rejected() {
    let registry = SchemaRegistry::default();
    let orders = registry.subject("orders");
    let reference = Reference::new("customer.proto", "customer", 1);

    let err = registry
        .register_schema(&orders, SchemaFormat::Protobuf, ORDER, &[reference], RegisterOptions::default())
        .unwrap_err();
    assert!(matches!(err, RegistryError::DanglingReference { .. }), "{err}");
    assert_eq!(err.error_code(), 42201);
    assert!(registry.list_subjects().is_empty());
    assert_eq!(registry.content_count(), 0);
}

#[test]
fn test_references_must_match_imports() {
    let registry = SchemaRegistry::default();
    let customer = registry.subject("customer");
    let orders = registry.subject("orders");
    register(&registry, &customer, SchemaFormat::Protobuf, CUSTOMER);

    let err = registry
        .register_schema(&orders, SchemaFormat::Protobuf, ORDER, &[], RegisterOptions::default())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidSchema);

    let references = [
        Reference::new("customer.proto", customer.clone(), 1),
        Reference::new("extra.proto", customer, 1),
    ];
    let err = registry
        .register_schema(&orders, SchemaFormat::Protobuf, ORDER, &references, RegisterOptions::default())
        .unwrap_err();
    assert!(matches!(err, RegistryError::InvalidReferences(_)), "{err}");
}

#[test]
fn test_reference_named_like_root_file_is_rejected() {
    let registry = SchemaRegistry::default();
    let customer = registry.subject("customer");
    let orders = registry.subject("orders");
    register(&registry, &customer, SchemaFormat::Protobuf, CUSTOMER);

    let shadowing = ORDER.replace("import \"customer.proto\";", "import \"schema.proto\";");
    let err = registry
        .register_schema(
            &orders,
            SchemaFormat::Protobuf,
            shadowing,
            &[Reference::new("schema.proto", customer, 1)],
            RegisterOptions::default(),
        )
        .unwrap_err();
    assert!(matches!(err, RegistryError::InvalidReferences(_)), "{err}");
    assert_eq!(err.error_code(), 42201);
    assert!(registry.list_versions(&orders).is_err());
}

// =============================================================================
// Compatibility
// =============================================================================

#[test]
fn test_backward_vs_backward_transitive() {
    let registry = SchemaRegistry::default();
    let subject = SubjectKey::named("user");
    user_history(&registry, &subject);

    registry.set_compatibility(Some(&subject), CompatibilityLevel::Backward);
    let verdict = registry
        .test_compatibility(&subject, None, SchemaFormat::Avro, USER_V3, &[])
        .unwrap();
    assert!(verdict.is_compatible, "{}", verdict.summary);

    registry.set_compatibility(Some(&subject), CompatibilityLevel::BackwardTransitive);
    let verdict = registry
        .test_compatibility(&subject, None, SchemaFormat::Avro, USER_V3, &[])
        .unwrap();
    assert!(!verdict.is_compatible);
    assert_eq!(verdict.version, Some(1));

    let err = registry
        .register_schema(&subject, SchemaFormat::Avro, USER_V3, &[], RegisterOptions::default())
        .unwrap_err();
    assert!(matches!(err, RegistryError::Incompatible { version: 1, .. }), "{err}");
    assert_eq!(err.error_code(), 409);
    assert_eq!(registry.list_versions(&subject).unwrap(), vec![1, 2]);

    registry.set_compatibility(Some(&subject), CompatibilityLevel::Backward);
    register(&registry, &subject, SchemaFormat::Avro, USER_V3);
    assert_eq!(registry.list_versions(&subject).unwrap(), vec![1, 2, 3]);
}

#[test]
fn test_compatibility_overrides() {
    let registry = SchemaRegistry::default();
    let subject = SubjectKey::named("user");

    assert_eq!(registry.get_compatibility(None), CompatibilityLevel::None);
    registry.set_compatibility(None, CompatibilityLevel::Full);
    assert_eq!(registry.get_compatibility(Some(&subject)), CompatibilityLevel::Full);

    registry.set_compatibility(Some(&subject), CompatibilityLevel::Forward);
    assert_eq!(registry.get_compatibility(Some(&subject)), CompatibilityLevel::Forward);
    assert_eq!(registry.delete_compatibility(&subject).unwrap(), CompatibilityLevel::Forward);
    assert_eq!(registry.get_compatibility(Some(&subject)), CompatibilityLevel::Full);
    assert_eq!(registry.delete_compatibility(&subject).unwrap(), CompatibilityLevel::Full);
    assert_eq!(registry.get_compatibility(Some(&subject)), CompatibilityLevel::Full);
}

// =============================================================================
// Lifecycle
// =============================================================================

#[test]
fn test_disabled_versions_are_hidden_from_latest() {
    let registry = SchemaRegistry::default();
    let subject = SubjectKey::named("user");
    user_history(&registry, &subject);

    registry
        .set_subject_state(&subject, Some(2), LifecycleState::Disabled)
        .unwrap();

    assert_eq!(registry.get_version(&subject, VersionSelector::Latest).unwrap().version, 1);
    assert_eq!(registry.list_versions(&subject).unwrap(), vec![1]);
    let disabled = registry.get_version(&subject, VersionSelector::Version(2)).unwrap();
    assert_eq!(disabled.state, LifecycleState::Disabled);

    registry
        .set_subject_state(&subject, Some(2), LifecycleState::Enabled)
        .unwrap();
    assert_eq!(registry.get_version(&subject, VersionSelector::Latest).unwrap().version, 2);
}

#[test]
fn test_disabling_only_version_hides_subject() {
    let registry = SchemaRegistry::default();
    let subject = SubjectKey::named("name");
    register(&registry, &subject, SchemaFormat::Avro, r#""string""#);

    registry
        .set_subject_state(&subject, Some(1), LifecycleState::Disabled)
        .unwrap();

    let err = registry.get_version(&subject, VersionSelector::Latest).unwrap_err();
    assert_eq!(err.error_code(), 40401);
    let err = registry.get_schema(&subject, VersionSelector::Latest).unwrap_err();
    assert_eq!(err.error_code(), 40401);

    let explicit = registry.get_version(&subject, VersionSelector::Version(1)).unwrap();
    assert_eq!(explicit.state, LifecycleState::Disabled);
}

#[test]
fn test_unknown_subject_and_version() {
    let registry = SchemaRegistry::default();
    let subject = SubjectKey::named("user");

    let err = registry.get_version(&subject, VersionSelector::Latest).unwrap_err();
    assert_eq!(err.error_code(), 40401);

    register(&registry, &subject, SchemaFormat::Avro, USER_V1);
    let err = registry.get_version(&subject, VersionSelector::Version(5)).unwrap_err();
    assert_eq!(err.error_code(), 40402);

    let err = registry.get_content_by_global_id(GlobalId(999)).unwrap_err();
    assert_eq!(err.error_code(), 40403);
}

// =============================================================================
// Concurrency
// =============================================================================

#[test]
fn test_concurrent_registration_yields_gap_free_versions() {
    let registry = Arc::new(SchemaRegistry::default());
    let subject = SubjectKey::named("events");

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let registry = Arc::clone(&registry);
            let subject = subject.clone();
            thread::spawn(move || {
                let schema = format!(r#"{{"type":"object","properties":{{"field_{i}":{{"type":"string"}}}}}}"#);
                registry
                    .register_schema(&subject, SchemaFormat::Json, schema, &[], RegisterOptions::default())
                    .unwrap()
            })
        })
        .collect();

    let ids: BTreeSet<GlobalId> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(ids.len(), 8);
    assert_eq!(registry.list_versions(&subject).unwrap(), (1..=8).collect::<Vec<u32>>());
}

// =============================================================================
// Snapshots
// =============================================================================

#[test]
fn test_snapshot_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("registry.json");

    let registry = SchemaRegistry::default();
    let customer = registry.subject("customer");
    let orders = registry.subject("orders");
    let users = SubjectKey::new("accounts", "user");
    register(&registry, &customer, SchemaFormat::Protobuf, CUSTOMER);
    registry
        .register_schema(
            &orders,
            SchemaFormat::Protobuf,
            ORDER,
            &[Reference::new("customer.proto", customer.clone(), 1)],
            RegisterOptions::default(),
        )
        .unwrap();
    let user_v1 = register(&registry, &users, SchemaFormat::Avro, USER_V1);
    registry.set_compatibility(Some(&users), CompatibilityLevel::BackwardTransitive);
    registry.save_snapshot(&path).unwrap();

    let restored = SchemaRegistry::load_snapshot(RegistryConfig::default(), &path).unwrap();
    assert_eq!(restored.list_subjects(), registry.list_subjects());
    assert_eq!(restored.get_content_by_global_id(user_v1).unwrap().raw, USER_V1);
    assert_eq!(
        restored.get_compatibility(Some(&users)),
        CompatibilityLevel::BackwardTransitive
    );
    assert_eq!(restored.get_referenced_by(&customer, 1).unwrap().len(), 1);

    let next = register(&restored, &SubjectKey::named("fresh"), SchemaFormat::Avro, USER_V3);
    assert!(next > user_v1);
}
