//! Protobuf Linking Tests
//!
//! Links the fixture files with their imports and checks that rendering
//! produces text which links back to the same descriptor graph.

use std::collections::BTreeMap;

use proptest::prelude::*;
use schema_registry::error::ProtoError;
use schema_registry::protobuf::ast::OptionValue;
use schema_registry::protobuf::{self, DescriptorGraph, FieldKind, Label};

const CUSTOMER: &str = include_str!("fixtures/customer.proto");
const ORDER: &str = include_str!("fixtures/order.proto");
const OPTIONS: &str = include_str!("fixtures/options.proto");
const GREETER: &str = include_str!("fixtures/greeter.proto");

fn no_deps() -> BTreeMap<String, String> {
    BTreeMap::new()
}

fn order_deps() -> BTreeMap<String, String> {
    let mut deps = BTreeMap::new();
    deps.insert("customer.proto".to_string(), CUSTOMER.to_string());
    deps
}

fn assert_round_trip(name: &str, source: &str, deps: &BTreeMap<String, String>) -> DescriptorGraph {
    let graph = protobuf::link(name, source, deps).unwrap();
    let rendered = protobuf::render(&graph);
    let relinked = protobuf::link(name, &rendered, deps).unwrap_or_else(|e| panic!("{e}\n{rendered}"));
    assert_eq!(relinked, graph, "render output did not link back:\n{rendered}");
    assert_eq!(protobuf::render(&relinked), rendered, "render is not a fixed point");
    graph
}

// =============================================================================
// Round Trip Tests
// =============================================================================

#[test]
fn test_round_trip_fixtures() {
    assert_round_trip("customer.proto", CUSTOMER, &no_deps());
    assert_round_trip("order.proto", ORDER, &order_deps());
    assert_round_trip("options.proto", OPTIONS, &no_deps());
    assert_round_trip("greeter.proto", GREETER, &no_deps());
}

#[test]
fn test_round_trip_non_finite_defaults() {
    let source = r#"
        syntax = "proto2";
        message Limits {
          optional double high = 1 [default = 1e999];
          optional double low = 2 [default = -1e999];
          optional float ceiling = 3 [default = inf];
          optional double unknown = 4 [default = nan];
        }
    "#;
    let graph = assert_round_trip("limits.proto", source, &no_deps());
    let limits = graph.find_message("Limits").unwrap();
    assert_eq!(
        limits.field_by_name("high").unwrap().default_value,
        Some(OptionValue::Ident("inf".into()))
    );
    assert_eq!(
        limits.field_by_name("low").unwrap().default_value,
        Some(OptionValue::Ident("-inf".into()))
    );
}

#[test]
fn test_canonical_text_ignores_formatting() {
    let compact = GREETER
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    assert_eq!(
        protobuf::canonical_text("greeter.proto", GREETER, &no_deps()).unwrap(),
        protobuf::canonical_text("greeter.proto", &compact, &no_deps()).unwrap()
    );
}

// =============================================================================
// Resolution Tests
// =============================================================================

#[test]
fn test_well_known_types_resolve_without_deps() {
    let graph = protobuf::link("customer.proto", CUSTOMER, &no_deps()).unwrap();
    let customer = graph.find_message("acme.customer.Customer").unwrap();

    let created_at = customer.field_by_name("created_at").unwrap();
    assert_eq!(created_at.kind, FieldKind::Message);
    assert_eq!(created_at.type_name.as_deref(), Some(".google.protobuf.Timestamp"));
    assert!(graph.dependencies.contains_key("google/protobuf/timestamp.proto"));

    let tier = customer.field_by_name("tier").unwrap();
    assert_eq!(tier.kind, FieldKind::Enum);
    assert_eq!(tier.type_name.as_deref(), Some(".acme.customer.Customer.Tier"));
}

#[test]
fn test_cross_package_import() {
    let graph = protobuf::link("order.proto", ORDER, &order_deps()).unwrap();
    let order = graph.file().message_by_name("Order").unwrap();

    assert_eq!(
        order.field_by_name("customer").unwrap().type_name.as_deref(),
        Some(".acme.customer.Customer")
    );
    let items = order.field_by_name("items").unwrap();
    assert_eq!(items.label, Label::Repeated);
    assert_eq!(items.type_name.as_deref(), Some(".acme.orders.Order.LineItem"));
    assert!(graph.find_message("acme.customer.Customer").is_some());
}

#[test]
fn test_missing_dependency() {
    let err = protobuf::link("order.proto", ORDER, &no_deps()).unwrap_err();
    assert_eq!(err, ProtoError::MissingDependency("customer.proto".to_string()));
}

#[test]
fn test_unresolved_type() {
    let source = r#"
        syntax = "proto3";
        package acme;
        message Invoice { Money total = 1; }
    "#;
    let err = protobuf::link("invoice.proto", source, &no_deps()).unwrap_err();
    assert!(matches!(err, ProtoError::TypeResolution { ref name, .. } if name == "Money"), "{err}");
}

#[test]
fn test_json_name_and_oneofs() {
    let graph = protobuf::link("customer.proto", CUSTOMER, &no_deps()).unwrap();
    let customer = graph.find_message("acme.customer.Customer").unwrap();

    let display_name = customer.field_by_name("display_name").unwrap();
    assert_eq!(display_name.json_name.as_deref(), Some("name"));
    assert_eq!(display_name.effective_json_name(), "name");
    assert_eq!(customer.field_by_name("created_at").unwrap().effective_json_name(), "createdAt");

    let email = customer.field_by_name("email").unwrap();
    let phone = customer.field_by_name("phone").unwrap();
    assert_eq!(email.oneof_index, phone.oneof_index);
    assert_eq!(customer.oneofs[0].name, "contact");
    assert!(!customer.oneofs[0].synthetic);

    let age = customer.field_by_name("age").unwrap();
    assert!(age.proto3_optional);
    assert!(customer.oneofs[age.oneof_index.unwrap()].synthetic);
}

#[test]
fn test_custom_options() {
    let graph = protobuf::link("options.proto", OPTIONS, &no_deps()).unwrap();
    let account = graph.find_message("acme.opts.Account").unwrap();

    assert_eq!(account.options[0].name, "(.acme.opts.table)");
    let secret = account.field_by_name("secret").unwrap();
    let names: Vec<&str> = secret.options.iter().map(|o| o.name.as_str()).collect();
    assert_eq!(names, vec!["(.acme.opts.sensitive)", "(.acme.opts.label)"]);

    let retries = account.field_by_name("retries").unwrap();
    assert!(retries.default_value.is_some());
    assert_eq!(account.field_by_name("id").unwrap().label, Label::Required);
    assert_eq!(graph.file().extensions.len(), 3);
}

#[test]
fn test_services() {
    let graph = protobuf::link("greeter.proto", GREETER, &no_deps()).unwrap();
    let greeter = graph.file().service_by_name("Greeter").unwrap();
    let say_hello = greeter.method("SayHello").unwrap();
    assert_eq!(say_hello.input_type, ".helloworld.HelloRequest");
    assert_eq!(say_hello.output_type, ".helloworld.HelloReply");
    assert!(!say_hello.client_streaming && !say_hello.server_streaming);

    let orders = protobuf::link("order.proto", ORDER, &order_deps()).unwrap();
    let watch = orders.file().service_by_name("OrderService").unwrap().method("WatchOrders").unwrap();
    assert!(watch.client_streaming && watch.server_streaming);
}

// =============================================================================
// Generated Round Trips
// =============================================================================

const FIELD_TYPES: [&str; 6] = ["double", "int32", "string", "bool", "Color", "Inner"];

/// One generated field: label, type and an optional default literal
#[derive(Debug, Clone)]
struct GeneratedField {
    label: &'static str,
    type_name: &'static str,
    default: Option<String>,
}

fn default_literal(type_name: &'static str) -> BoxedStrategy<Option<String>> {
    match type_name {
        "double" => prop_oneof![
            (-1.0e6f64..1.0e6).prop_map(|f| f.to_string()),
            Just("1e999".to_string()),
            Just("-1e999".to_string()),
            Just("-inf".to_string()),
            Just("nan".to_string()),
        ]
        .prop_map(Some)
        .boxed(),
        "int32" => any::<i32>().prop_map(|n| Some(n.to_string())).boxed(),
        "string" => "[a-z \"\\\\]{0,8}"
            .prop_map(|s| Some(format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))))
            .boxed(),
        "bool" => any::<bool>().prop_map(|b| Some(b.to_string())).boxed(),
        "Color" => prop::sample::select(vec!["RED", "GREEN"])
            .prop_map(|v| Some(v.to_string()))
            .boxed(),
        _ => Just(None).boxed(),
    }
}

fn generated_field() -> impl Strategy<Value = GeneratedField> {
    (
        prop::sample::select(vec!["optional", "required", "repeated"]),
        prop::sample::select(FIELD_TYPES.to_vec()),
    )
        .prop_flat_map(|(label, type_name)| {
            let default = if label == "optional" {
                prop_oneof![Just(None), default_literal(type_name)].boxed()
            } else {
                Just(None).boxed()
            };
            default.prop_map(move |default| GeneratedField {
                label,
                type_name,
                default,
            })
        })
}

fn generated_source() -> impl Strategy<Value = String> {
    prop::collection::vec(prop::collection::vec(generated_field(), 1..6), 1..4).prop_map(|messages| {
        let mut source = String::from(
            "syntax = \"proto2\";\npackage gen.shapes;\nenum Color { RED = 0; GREEN = 1; }\n",
        );
        for (i, fields) in messages.iter().enumerate() {
            source.push_str(&format!("message M{i} {{\n  message Inner {{ optional int32 x = 1; }}\n"));
            for (j, field) in fields.iter().enumerate() {
                let default = field
                    .default
                    .as_ref()
                    .map(|d| format!(" [default = {d}]"))
                    .unwrap_or_default();
                source.push_str(&format!(
                    "  {} {} f{j} = {}{default};\n",
                    field.label,
                    field.type_name,
                    j + 1
                ));
            }
            source.push_str("}\n");
        }
        source
    })
}

proptest! {
    #[test]
    fn generated_sources_round_trip(source in generated_source()) {
        let graph = protobuf::link("gen.proto", &source, &no_deps()).unwrap();
        let rendered = protobuf::render(&graph);
        let relinked = protobuf::link("gen.proto", &rendered, &no_deps()).unwrap();
        prop_assert_eq!(relinked, graph, "source:\n{}\nrendered:\n{}", source, rendered);
    }
}
