//! Avro schema resolution between a reader and a writer schema

use std::collections::HashSet;

use serde_json::Value;

use super::{ChangeType, SchemaChange};
use crate::canonical::{avro_full_name, AvroDocument};

const PRIMITIVES: [&str; 8] = ["null", "boolean", "int", "long", "float", "double", "bytes", "string"];

pub(crate) fn check(reader: &AvroDocument, writer: &AvroDocument, changes: &mut Vec<SchemaChange>) {
    let mut resolver = Resolver {
        reader,
        writer,
        seen: HashSet::new(),
    };
    resolver.resolve(Side::new(&reader.schema, ""), Side::new(&writer.schema, ""), "", changes);
}

/// A schema as written at some position, with the namespace it inherits
#[derive(Clone, Copy)]
struct Side<'d> {
    schema: &'d Value,
    namespace: &'d str,
}

impl<'d> Side<'d> {
    fn new(schema: &'d Value, namespace: &'d str) -> Self {
        Self { schema, namespace }
    }
}

enum Kind<'d> {
    Primitive(&'d str),
    Record(Named<'d>),
    Enum(Named<'d>),
    Fixed(Named<'d>),
    Array(Side<'d>),
    Map(Side<'d>),
    Union(&'d [Value], &'d str),
    Unknown(String),
}

struct Named<'d> {
    schema: &'d Value,
    full_name: String,
    /// Namespace inherited by nested definitions
    namespace: String,
}

impl Named<'_> {
    fn short_name(&self) -> &str {
        self.full_name.rsplit('.').next().unwrap_or(&self.full_name)
    }

    fn aliases(&self) -> Vec<String> {
        aliases(self.schema, &self.namespace)
    }
}

fn aliases(schema: &Value, namespace: &str) -> Vec<String> {
    schema
        .get("aliases")
        .and_then(Value::as_array)
        .map(|aliases| {
            aliases
                .iter()
                .filter_map(Value::as_str)
                .map(|alias| {
                    if alias.contains('.') || namespace.is_empty() {
                        alias.to_string()
                    } else {
                        format!("{namespace}.{alias}")
                    }
                })
                .collect()
        })
        .unwrap_or_default()
}

fn classify<'a>(doc: &'a AvroDocument, side: Side<'a>) -> Kind<'a> {
    match side.schema {
        Value::String(name) => {
            if let Some(primitive) = PRIMITIVES.iter().find(|p| **p == name.as_str()) {
                return Kind::Primitive(*primitive);
            }
            match lookup(doc, name, side.namespace) {
                Some((full_name, definition)) => {
                    let namespace = full_name.rsplit_once('.').map(|(ns, _)| ns).unwrap_or("");
                    classify(doc, Side::new(definition, namespace))
                }
                None => Kind::Unknown(name.clone()),
            }
        }
        Value::Array(branches) => Kind::Union(branches, side.namespace),
        Value::Object(object) => match object.get("type") {
            Some(Value::String(kind)) => match kind.as_str() {
                "record" | "error" | "enum" | "fixed" => {
                    let Some((full_name, namespace)) = avro_full_name(side.schema, side.namespace) else {
                        return Kind::Unknown(side.schema.to_string());
                    };
                    let named = Named {
                        schema: side.schema,
                        full_name,
                        namespace,
                    };
                    match kind.as_str() {
                        "enum" => Kind::Enum(named),
                        "fixed" => Kind::Fixed(named),
                        _ => Kind::Record(named),
                    }
                }
                "array" => match object.get("items") {
                    Some(items) => Kind::Array(Side::new(items, side.namespace)),
                    None => Kind::Unknown(side.schema.to_string()),
                },
                "map" => match object.get("values") {
                    Some(values) => Kind::Map(Side::new(values, side.namespace)),
                    None => Kind::Unknown(side.schema.to_string()),
                },
                // `{"type": "long", "logicalType": ...}` or a named reference
                _ => classify(doc, Side::new(&object["type"], side.namespace)),
            },
            Some(nested) => classify(doc, Side::new(nested, side.namespace)),
            None => Kind::Unknown(side.schema.to_string()),
        },
        other => Kind::Unknown(other.to_string()),
    }
}

fn lookup<'a>(doc: &'a AvroDocument, name: &str, namespace: &str) -> Option<(&'a str, &'a Value)> {
    if !name.contains('.') && !namespace.is_empty() {
        if let Some((key, value)) = doc.named.get_key_value(&format!("{namespace}.{name}")) {
            return Some((key.as_str(), value));
        }
    }
    doc.named.get_key_value(name).map(|(key, value)| (key.as_str(), value))
}

fn describe(kind: &Kind<'_>) -> String {
    match kind {
        Kind::Primitive(name) => (*name).to_string(),
        Kind::Record(named) => format!("record {}", named.full_name),
        Kind::Enum(named) => format!("enum {}", named.full_name),
        Kind::Fixed(named) => format!("fixed {}", named.full_name),
        Kind::Array(_) => "array".to_string(),
        Kind::Map(_) => "map".to_string(),
        Kind::Union(..) => "union".to_string(),
        Kind::Unknown(text) => format!("unknown type {text}"),
    }
}

/// Writer primitive `writer` can be read as `reader`
fn promotes(writer: &str, reader: &str) -> bool {
    writer == reader
        || matches!(
            (writer, reader),
            ("int", "long" | "float" | "double")
                | ("long", "float" | "double")
                | ("float", "double")
                | ("string", "bytes")
                | ("bytes", "string")
        )
}

fn field_name(field: &Value) -> &str {
    field.get("name").and_then(Value::as_str).unwrap_or("")
}

fn symbols(schema: &Value) -> Vec<&str> {
    schema
        .get("symbols")
        .and_then(Value::as_array)
        .map(|symbols| symbols.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default()
}

fn join(path: &str, segment: &str) -> String {
    if path.is_empty() {
        segment.to_string()
    } else {
        format!("{path}.{segment}")
    }
}

struct Resolver<'d> {
    reader: &'d AvroDocument,
    writer: &'d AvroDocument,
    /// Record pairs currently being resolved; recursive types meet themselves here
    seen: HashSet<(String, String)>,
}

impl<'d> Resolver<'d> {
    /// Returns whether `reader` can read `writer`; detected changes are appended.
    fn resolve(&mut self, reader: Side<'_>, writer: Side<'_>, path: &str, changes: &mut Vec<SchemaChange>) -> bool {
        let reader_kind = classify(self.reader, reader);
        let writer_kind = classify(self.writer, writer);

        match (reader_kind, writer_kind) {
            (_, Kind::Union(branches, namespace)) => {
                let mut ok = true;
                for branch in branches {
                    ok &= self.resolve(reader, Side::new(branch, namespace), path, changes);
                }
                ok
            }
            (Kind::Union(branches, namespace), writer_kind) => {
                for branch in branches {
                    let mut scratch = Vec::new();
                    if self.resolve(Side::new(branch, namespace), writer, path, &mut scratch) {
                        changes.extend(scratch);
                        return true;
                    }
                }
                changes.push(
                    SchemaChange::breaking(
                        ChangeType::TypeChanged,
                        path,
                        format!("reader union at '{path}' has no branch for writer type {}", describe(&writer_kind)),
                    )
                    .values(describe(&writer_kind), "union"),
                );
                false
            }
            (Kind::Primitive(reader), Kind::Primitive(writer)) => {
                if promotes(writer, reader) {
                    if reader != writer {
                        changes.push(
                            SchemaChange::compatible(ChangeType::TypeChanged, path, format!("{writer} promoted to {reader}"))
                                .values(writer, reader),
                        );
                    }
                    true
                } else {
                    changes.push(
                        SchemaChange::breaking(
                            ChangeType::TypeChanged,
                            path,
                            format!("type at '{path}' changed from {writer} to {reader}"),
                        )
                        .values(writer, reader),
                    );
                    false
                }
            }
            (Kind::Record(reader), Kind::Record(writer)) => self.record(reader, writer, path, changes),
            (Kind::Enum(reader), Kind::Enum(writer)) => self.enumeration(reader, writer, path, changes),
            (Kind::Fixed(reader), Kind::Fixed(writer)) => {
                let mut ok = self.names_match(&reader, &writer, path, changes);
                let reader_size = reader.schema.get("size").and_then(Value::as_u64);
                let writer_size = writer.schema.get("size").and_then(Value::as_u64);
                if reader_size != writer_size {
                    changes.push(
                        SchemaChange::breaking(
                            ChangeType::TypeChanged,
                            path,
                            format!("fixed {} changed size", reader.full_name),
                        )
                        .values(format!("{writer_size:?}"), format!("{reader_size:?}")),
                    );
                    ok = false;
                }
                ok
            }
            (Kind::Array(reader), Kind::Array(writer)) => self.resolve(reader, writer, &join(path, "items"), changes),
            (Kind::Map(reader), Kind::Map(writer)) => self.resolve(reader, writer, &join(path, "values"), changes),
            (reader_kind, writer_kind) => {
                changes.push(
                    SchemaChange::breaking(
                        ChangeType::TypeChanged,
                        path,
                        format!(
                            "type at '{path}' changed from {} to {}",
                            describe(&writer_kind),
                            describe(&reader_kind)
                        ),
                    )
                    .values(describe(&writer_kind), describe(&reader_kind)),
                );
                false
            }
        }
    }

    fn names_match(&self, reader: &Named<'_>, writer: &Named<'_>, path: &str, changes: &mut Vec<SchemaChange>) -> bool {
        if reader.short_name() == writer.short_name()
            || reader.aliases().iter().any(|alias| *alias == writer.full_name || alias == writer.short_name())
        {
            return true;
        }
        changes.push(
            SchemaChange::breaking(
                ChangeType::TypeChanged,
                path,
                format!("named type {} cannot read {}", reader.full_name, writer.full_name),
            )
            .values(writer.full_name.clone(), reader.full_name.clone()),
        );
        false
    }

    fn record(&mut self, reader: Named<'_>, writer: Named<'_>, path: &str, changes: &mut Vec<SchemaChange>) -> bool {
        if !self.names_match(&reader, &writer, path, changes) {
            return false;
        }
        let pair = (reader.full_name.clone(), writer.full_name.clone());
        if !self.seen.insert(pair.clone()) {
            return true;
        }

        let record_path = if path.is_empty() { reader.full_name.clone() } else { path.to_string() };
        let empty = Vec::new();
        let reader_fields = reader.schema.get("fields").and_then(Value::as_array).unwrap_or(&empty);
        let writer_fields = writer.schema.get("fields").and_then(Value::as_array).unwrap_or(&empty);

        let mut ok = true;
        let mut matched = HashSet::new();
        for reader_field in reader_fields {
            let name = field_name(reader_field);
            let field_path = join(&record_path, name);
            let field_aliases = aliases(reader_field, "");
            let writer_field = writer_fields
                .iter()
                .find(|w| field_name(w) == name)
                .or_else(|| writer_fields.iter().find(|w| field_aliases.iter().any(|a| a == field_name(w))));

            match writer_field {
                Some(writer_field) => {
                    let writer_name = field_name(writer_field);
                    matched.insert(writer_name);
                    if writer_name != name {
                        changes.push(
                            SchemaChange::compatible(
                                ChangeType::FieldRenamed,
                                field_path.clone(),
                                format!("field '{writer_name}' is read as '{name}' through an alias"),
                            )
                            .values(writer_name, name),
                        );
                    }
                    if let (Some(reader_type), Some(writer_type)) = (reader_field.get("type"), writer_field.get("type")) {
                        ok &= self.resolve(
                            Side::new(reader_type, &reader.namespace),
                            Side::new(writer_type, &writer.namespace),
                            &field_path,
                            changes,
                        );
                    }
                }
                None if reader_field.get("default").is_some() => changes.push(SchemaChange::compatible(
                    ChangeType::FieldAdded,
                    field_path,
                    format!("field '{name}' was added with a default value"),
                )),
                None => {
                    changes.push(SchemaChange::breaking(
                        ChangeType::FieldAdded,
                        field_path,
                        format!("field '{name}' is missing from the writer and has no default"),
                    ));
                    ok = false;
                }
            }
        }

        for writer_field in writer_fields {
            let name = field_name(writer_field);
            if !matched.contains(name) {
                changes.push(SchemaChange::compatible(
                    ChangeType::FieldRemoved,
                    join(&record_path, name),
                    format!("writer field '{name}' is ignored by the reader"),
                ));
            }
        }

        self.seen.remove(&pair);
        ok
    }

    fn enumeration(&mut self, reader: Named<'_>, writer: Named<'_>, path: &str, changes: &mut Vec<SchemaChange>) -> bool {
        if !self.names_match(&reader, &writer, path, changes) {
            return false;
        }
        let enum_path = if path.is_empty() { reader.full_name.clone() } else { path.to_string() };
        let reader_symbols = symbols(reader.schema);
        let writer_symbols = symbols(writer.schema);
        let has_default = reader.schema.get("default").is_some();

        let mut ok = true;
        for symbol in &writer_symbols {
            if !reader_symbols.contains(symbol) {
                let change = if has_default {
                    SchemaChange::compatible(
                        ChangeType::EnumVariantRemoved,
                        enum_path.clone(),
                        format!("symbol {symbol} falls back to the reader default"),
                    )
                } else {
                    ok = false;
                    SchemaChange::breaking(
                        ChangeType::EnumVariantRemoved,
                        enum_path.clone(),
                        format!("symbol {symbol} is unknown to the reader"),
                    )
                };
                changes.push(change.values(*symbol, ""));
            }
        }
        for symbol in &reader_symbols {
            if !writer_symbols.contains(symbol) {
                changes.push(SchemaChange::compatible(
                    ChangeType::EnumVariantAdded,
                    enum_path.clone(),
                    format!("symbol {symbol} was added"),
                ));
            }
        }
        ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn compatible(reader: Value, writer: Value) -> bool {
        let mut changes = Vec::new();
        check(&AvroDocument::new(reader, &[]), &AvroDocument::new(writer, &[]), &mut changes);
        changes.iter().all(|c| !c.is_breaking)
    }

    #[test]
    fn test_promotions() {
        assert!(compatible(json!("long"), json!("int")));
        assert!(compatible(json!("double"), json!("float")));
        assert!(compatible(json!("bytes"), json!("string")));
        assert!(!compatible(json!("int"), json!("long")));
        assert!(compatible(json!({"type": "long", "logicalType": "timestamp-millis"}), json!("long")));
    }

    #[test]
    fn test_record_defaults_and_aliases() {
        let writer = json!({"type": "record", "name": "User", "fields": [{"name": "id", "type": "int"}]});
        let with_default = json!({"type": "record", "name": "User", "fields": [
            {"name": "id", "type": "long"},
            {"name": "email", "type": ["null", "string"], "default": null}
        ]});
        assert!(compatible(with_default, writer.clone()));

        let without_default = json!({"type": "record", "name": "User", "fields": [
            {"name": "id", "type": "int"},
            {"name": "email", "type": "string"}
        ]});
        assert!(!compatible(without_default, writer.clone()));

        let renamed = json!({"type": "record", "name": "User", "fields": [
            {"name": "user_id", "type": "int", "aliases": ["id"]}
        ]});
        assert!(compatible(renamed, writer));
    }

    #[test]
    fn test_unions() {
        assert!(compatible(json!(["null", "string"]), json!("string")));
        assert!(!compatible(json!("string"), json!(["null", "string"])));
        assert!(compatible(json!(["null", "long"]), json!(["null", "int"])));
    }

    #[test]
    fn test_enums() {
        let writer = json!({"type": "enum", "name": "Suit", "symbols": ["HEARTS", "SPADES", "CLUBS"]});
        let reader = json!({"type": "enum", "name": "Suit", "symbols": ["HEARTS", "SPADES"]});
        assert!(!compatible(reader, writer.clone()));
        let defaulted = json!({"type": "enum", "name": "Suit", "symbols": ["HEARTS", "SPADES", "UNKNOWN"], "default": "UNKNOWN"});
        assert!(compatible(defaulted, writer));
    }

    #[test]
    fn test_recursive_record_terminates() {
        let list = json!({"type": "record", "name": "Node", "fields": [
            {"name": "value", "type": "int"},
            {"name": "next", "type": ["null", "Node"], "default": null}
        ]});
        assert!(compatible(list.clone(), list));
    }

    #[test]
    fn test_fixed_size_must_match() {
        assert!(!compatible(
            json!({"type": "fixed", "name": "Hash", "size": 32}),
            json!({"type": "fixed", "name": "Hash", "size": 16})
        ));
    }
}
