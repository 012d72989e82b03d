//! Canonical forms used for hashing and equality
//!
//! Avro and JSON Schema documents are validated with their format's parser
//! and re-serialized as RFC 8785 canonical JSON (`serde_jcs`), which removes
//! key-order and whitespace differences. Protobuf sources are linked and
//! rendered back to text (see [`crate::protobuf`]).

use std::collections::BTreeMap;

use serde_json::Value;
use tracing::debug;

use crate::error::{RegistryError, Result};
use crate::protobuf::{self, DescriptorGraph};
use crate::schema::SchemaFormat;

/// A parsed, validated schema
#[derive(Debug, Clone)]
pub enum SchemaDocument {
    Avro(AvroDocument),
    Json(Value),
    Protobuf(Box<DescriptorGraph>),
}

impl SchemaDocument {
    pub fn format(&self) -> SchemaFormat {
        match self {
            SchemaDocument::Avro(_) => SchemaFormat::Avro,
            SchemaDocument::Json(_) => SchemaFormat::Json,
            SchemaDocument::Protobuf(_) => SchemaFormat::Protobuf,
        }
    }

    /// Canonical text of this document
    pub fn canonical_text(&self) -> Result<String> {
        match self {
            SchemaDocument::Avro(doc) => canonical_json(SchemaFormat::Avro, &doc.schema),
            SchemaDocument::Json(value) => canonical_json(SchemaFormat::Json, value),
            SchemaDocument::Protobuf(graph) => Ok(protobuf::render(graph)),
        }
    }
}

/// An Avro schema together with every named type visible to it
#[derive(Debug, Clone, PartialEq)]
pub struct AvroDocument {
    pub schema: Value,
    /// Full name -> definition, including types defined by references
    pub named: BTreeMap<String, Value>,
}

impl AvroDocument {
    pub fn new(schema: Value, references: &[Value]) -> Self {
        let mut named = BTreeMap::new();
        for reference in references {
            collect_named_types(reference, "", &mut named);
        }
        collect_named_types(&schema, "", &mut named);
        Self { schema, named }
    }

    /// Resolve a type name as written inside namespace `namespace`
    pub fn lookup(&self, name: &str, namespace: &str) -> Option<&Value> {
        if !name.contains('.') && !namespace.is_empty() {
            if let Some(found) = self.named.get(&format!("{namespace}.{name}")) {
                return Some(found);
            }
        }
        self.named.get(name)
    }
}

/// Full name of a named Avro type and the namespace its children inherit
pub(crate) fn avro_full_name(schema: &Value, enclosing: &str) -> Option<(String, String)> {
    let name = schema.get("name")?.as_str()?;
    if let Some((namespace, _)) = name.rsplit_once('.') {
        return Some((name.to_string(), namespace.to_string()));
    }
    let namespace = schema
        .get("namespace")
        .and_then(Value::as_str)
        .unwrap_or(enclosing)
        .to_string();
    let full = if namespace.is_empty() {
        name.to_string()
    } else {
        format!("{namespace}.{name}")
    };
    Some((full, namespace))
}

fn collect_named_types(schema: &Value, namespace: &str, named: &mut BTreeMap<String, Value>) {
    match schema {
        Value::Array(branches) => {
            for branch in branches {
                collect_named_types(branch, namespace, named);
            }
        }
        Value::Object(object) => match object.get("type") {
            Some(Value::String(kind)) if matches!(kind.as_str(), "record" | "error" | "enum" | "fixed") => {
                let Some((full, inner)) = avro_full_name(schema, namespace) else {
                    return;
                };
                named.entry(full).or_insert_with(|| schema.clone());
                if let Some(Value::Array(fields)) = object.get("fields") {
                    for field in fields {
                        if let Some(kind) = field.get("type") {
                            collect_named_types(kind, &inner, named);
                        }
                    }
                }
            }
            Some(Value::String(kind)) if kind == "array" => {
                if let Some(items) = object.get("items") {
                    collect_named_types(items, namespace, named);
                }
            }
            Some(Value::String(kind)) if kind == "map" => {
                if let Some(values) = object.get("values") {
                    collect_named_types(values, namespace, named);
                }
            }
            Some(nested @ (Value::Object(_) | Value::Array(_))) => collect_named_types(nested, namespace, named),
            _ => {}
        },
        _ => {}
    }
}

/// Turns raw schema text into a [`SchemaDocument`] and its canonical text
#[derive(Debug, Clone)]
pub struct Canonicalizer {
    proto_file_name: String,
}

impl Default for Canonicalizer {
    fn default() -> Self {
        Self::new("schema.proto")
    }
}

impl Canonicalizer {
    /// `proto_file_name` names the root file when linking protobuf sources
    pub fn new(proto_file_name: impl Into<String>) -> Self {
        Self {
            proto_file_name: proto_file_name.into(),
        }
    }

    /// Parse and validate `bytes` as `format`.
    ///
    /// `deps` maps reference names (protobuf import paths, Avro type names,
    /// JSON `$ref` targets) to the referenced schema text.
    pub fn parse(&self, format: SchemaFormat, bytes: &[u8], deps: &BTreeMap<String, String>) -> Result<SchemaDocument> {
        let text = std::str::from_utf8(bytes)
            .map_err(|e| RegistryError::invalid(format, format!("schema is not valid UTF-8: {e}")))?;
        match format {
            SchemaFormat::Avro => parse_avro(text, deps).map(SchemaDocument::Avro),
            SchemaFormat::Json => parse_json_schema(text).map(SchemaDocument::Json),
            SchemaFormat::Protobuf => {
                let graph = protobuf::link(&self.proto_file_name, text, deps)?;
                Ok(SchemaDocument::Protobuf(Box::new(graph)))
            }
        }
    }

    /// Canonical text of `bytes`; pure and deterministic
    pub fn canonicalize(&self, format: SchemaFormat, bytes: &[u8], deps: &BTreeMap<String, String>) -> Result<String> {
        self.parse(format, bytes, deps)?.canonical_text()
    }
}

fn parse_avro(text: &str, deps: &BTreeMap<String, String>) -> Result<AvroDocument> {
    let value: Value = serde_json::from_str(text)
        .map_err(|e| RegistryError::invalid(SchemaFormat::Avro, format!("not valid JSON: {e}")))?;

    if deps.is_empty() {
        apache_avro::Schema::parse_str(text).map_err(|e| RegistryError::invalid(SchemaFormat::Avro, e.to_string()))?;
    } else {
        let mut sources: Vec<&str> = deps.values().map(String::as_str).collect();
        sources.push(text);
        apache_avro::Schema::parse_list(&sources)
            .map_err(|e| RegistryError::invalid(SchemaFormat::Avro, e.to_string()))?;
    }

    let mut references = Vec::with_capacity(deps.len());
    for (name, source) in deps {
        let parsed: Value = serde_json::from_str(source).map_err(|e| {
            RegistryError::invalid(SchemaFormat::Avro, format!("reference '{name}' is not valid JSON: {e}"))
        })?;
        references.push(parsed);
    }
    debug!(references = references.len(), "parsed avro schema");
    Ok(AvroDocument::new(value, &references))
}

fn parse_json_schema(text: &str) -> Result<Value> {
    let value: Value = serde_json::from_str(text)
        .map_err(|e| RegistryError::invalid(SchemaFormat::Json, format!("not valid JSON: {e}")))?;
    if !matches!(value, Value::Object(_) | Value::Bool(_)) {
        return Err(RegistryError::invalid(
            SchemaFormat::Json,
            "a JSON Schema must be an object or a boolean",
        ));
    }
    jsonschema::JSONSchema::compile(&value).map_err(|e| RegistryError::invalid(SchemaFormat::Json, e.to_string()))?;
    Ok(value)
}

fn canonical_json(format: SchemaFormat, value: &Value) -> Result<String> {
    serde_jcs::to_string(value).map_err(|e| RegistryError::invalid(format, format!("cannot canonicalize: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn canonicalize(format: SchemaFormat, text: &str) -> Result<String> {
        Canonicalizer::default().canonicalize(format, text.as_bytes(), &BTreeMap::new())
    }

    #[test]
    fn test_json_key_order_and_whitespace() {
        let a = canonicalize(SchemaFormat::Json, r#"{"type": "object", "properties": {"b": {"type": "string"}, "a": {"type": "integer"}}}"#).unwrap();
        let b = canonicalize(SchemaFormat::Json, "{\n  \"properties\": {\"a\": {\"type\":\"integer\"},\"b\":{\"type\":\"string\"}},\n  \"type\":\"object\"\n}").unwrap();
        assert_eq!(a, b);
        assert_eq!(a, r#"{"properties":{"a":{"type":"integer"},"b":{"type":"string"}},"type":"object"}"#);
    }

    #[test]
    fn test_avro_canonical_and_invalid() {
        let canonical = canonicalize(
            SchemaFormat::Avro,
            r#"{ "type": "record", "name": "User", "fields": [ { "name": "id", "type": "long" } ] }"#,
        )
        .unwrap();
        assert_eq!(canonical, r#"{"fields":[{"name":"id","type":"long"}],"name":"User","type":"record"}"#);

        let err = canonicalize(SchemaFormat::Avro, r#"{"type": "record", "name": "Broken"}"#).unwrap_err();
        assert!(matches!(err, RegistryError::InvalidSchema { format: SchemaFormat::Avro, .. }));
    }

    #[test]
    fn test_avro_named_types_from_references() {
        let mut deps = BTreeMap::new();
        deps.insert(
            "com.acme.Address".to_string(),
            r#"{"type":"record","name":"Address","namespace":"com.acme","fields":[{"name":"street","type":"string"}]}"#
                .to_string(),
        );
        let doc = Canonicalizer::default()
            .parse(
                SchemaFormat::Avro,
                br#"{"type":"record","name":"Customer","namespace":"com.acme","fields":[{"name":"home","type":"Address"}]}"#,
                &deps,
            )
            .unwrap();
        let SchemaDocument::Avro(doc) = doc else {
            panic!("expected an avro document");
        };
        assert!(doc.lookup("Address", "com.acme").is_some());
        assert!(doc.named.contains_key("com.acme.Customer"));
    }

    #[test]
    fn test_rejects_non_utf8_and_bad_json_schema() {
        let err = Canonicalizer::default()
            .canonicalize(SchemaFormat::Json, &[0xff, 0xfe], &BTreeMap::new())
            .unwrap_err();
        assert!(err.to_string().contains("UTF-8"));
        assert!(canonicalize(SchemaFormat::Json, r#"{"type": 12}"#).is_err());
        assert!(canonicalize(SchemaFormat::Json, "[1, 2]").is_err());
    }

    #[test]
    fn test_protobuf_canonical_ignores_comments_and_spacing() {
        let a = canonicalize(SchemaFormat::Protobuf, "syntax = \"proto3\";\nmessage A { string x = 1; }").unwrap();
        let b = canonicalize(
            SchemaFormat::Protobuf,
            "// header\nsyntax=\"proto3\";   message A {\n  // the id\n  string x=1;\n}\n",
        )
        .unwrap();
        assert_eq!(a, b);
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    /// Object-rooted JSON without floats and without JSON Schema keywords.
    fn annotation_schema() -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i32>().prop_map(|n| serde_json::json!(n)),
            "[a-zA-Z0-9 ]{0,20}".prop_map(Value::String),
        ];
        let value = leaf.prop_recursive(3, 32, 6, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..6).prop_map(Value::Array),
                prop::collection::btree_map("x-[a-z]{1,8}", inner, 0..6)
                    .prop_map(|m| Value::Object(m.into_iter().collect())),
            ]
        });
        prop::collection::btree_map("x-[a-z]{1,8}", value, 0..6).prop_map(|m| Value::Object(m.into_iter().collect()))
    }

    /// Serialize with object keys in reverse order and generous whitespace.
    fn reversed_text(value: &Value) -> String {
        match value {
            Value::Object(map) => {
                let entries: Vec<String> = map
                    .iter()
                    .rev()
                    .map(|(k, v)| format!("\n  {} :  {}", Value::String(k.clone()), reversed_text(v)))
                    .collect();
                format!("{{ {} }}", entries.join(" ,"))
            }
            Value::Array(items) => {
                let items: Vec<String> = items.iter().map(reversed_text).collect();
                format!("[ {} ]", items.join(" , "))
            }
            other => other.to_string(),
        }
    }

    proptest! {
        #[test]
        fn json_canonical_form_ignores_layout(value in annotation_schema()) {
            let canonicalizer = Canonicalizer::default();
            let compact = serde_json::to_string(&value).unwrap();
            let shuffled = reversed_text(&value);
            let a = canonicalizer.canonicalize(SchemaFormat::Json, compact.as_bytes(), &BTreeMap::new()).unwrap();
            let b = canonicalizer.canonicalize(SchemaFormat::Json, shuffled.as_bytes(), &BTreeMap::new()).unwrap();
            prop_assert_eq!(a, b);
        }

        #[test]
        fn canonical_json_is_a_fixed_point(value in annotation_schema()) {
            let canonicalizer = Canonicalizer::default();
            let once = canonicalizer.canonicalize(SchemaFormat::Json, value.to_string().as_bytes(), &BTreeMap::new()).unwrap();
            let twice = canonicalizer.canonicalize(SchemaFormat::Json, once.as_bytes(), &BTreeMap::new()).unwrap();
            prop_assert_eq!(once, twice);
        }
    }
}
