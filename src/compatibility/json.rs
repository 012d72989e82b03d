//! JSON Schema compatibility: can documents valid under the writer schema be
//! accepted by the reader schema?

use std::collections::BTreeSet;

use serde_json::{Map, Value};

use super::{ChangeType, SchemaChange};

const UPPER_BOUNDS: [&str; 5] = ["maxLength", "maximum", "exclusiveMaximum", "maxItems", "maxProperties"];
const LOWER_BOUNDS: [&str; 5] = ["minLength", "minimum", "exclusiveMinimum", "minItems", "minProperties"];

pub(crate) fn check(reader: &Value, writer: &Value, changes: &mut Vec<SchemaChange>) {
    compare(reader, writer, "#", changes);
}

fn compare(reader: &Value, writer: &Value, path: &str, changes: &mut Vec<SchemaChange>) {
    let (reader, writer) = match (reader, writer) {
        (Value::Bool(true), _) | (_, Value::Bool(false)) => return,
        (Value::Bool(false), _) => {
            changes.push(SchemaChange::breaking(
                ChangeType::ConstraintTightened,
                path,
                format!("reader rejects everything at '{path}'"),
            ));
            return;
        }
        (Value::Object(reader), Value::Bool(true)) => {
            if !reader.is_empty() {
                changes.push(SchemaChange::breaking(
                    ChangeType::ConstraintTightened,
                    path,
                    format!("writer accepts anything at '{path}' but the reader is constrained"),
                ));
            }
            return;
        }
        (Value::Object(reader), Value::Object(writer)) => (reader, writer),
        _ => return,
    };

    types(reader, writer, path, changes);
    required(reader, writer, path, changes);
    properties(reader, writer, path, changes);
    enumeration(reader, writer, path, changes);
    bounds(reader, writer, path, changes);

    if let (Some(reader_items), Some(writer_items)) = (reader.get("items"), writer.get("items")) {
        compare(reader_items, writer_items, &format!("{path}/items"), changes);
    }
}

fn type_set(schema: &Map<String, Value>) -> Option<BTreeSet<&str>> {
    match schema.get("type")? {
        Value::String(kind) => Some(BTreeSet::from([kind.as_str()])),
        Value::Array(kinds) => Some(kinds.iter().filter_map(Value::as_str).collect()),
        _ => None,
    }
}

fn types(reader: &Map<String, Value>, writer: &Map<String, Value>, path: &str, changes: &mut Vec<SchemaChange>) {
    let (Some(reader_types), Some(writer_types)) = (type_set(reader), type_set(writer)) else {
        return;
    };
    for kind in &writer_types {
        let accepted = reader_types.contains(kind) || (*kind == "integer" && reader_types.contains("number"));
        if !accepted {
            changes.push(
                SchemaChange::breaking(
                    ChangeType::TypeChanged,
                    path,
                    format!("writer type '{kind}' is not accepted by the reader at '{path}'"),
                )
                .values(format!("{writer_types:?}"), format!("{reader_types:?}")),
            );
        }
    }
}

fn required_set(schema: &Map<String, Value>) -> BTreeSet<&str> {
    schema
        .get("required")
        .and_then(Value::as_array)
        .map(|names| names.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default()
}

fn required(reader: &Map<String, Value>, writer: &Map<String, Value>, path: &str, changes: &mut Vec<SchemaChange>) {
    let writer_required = required_set(writer);
    for name in required_set(reader) {
        if !writer_required.contains(name) {
            changes.push(SchemaChange::breaking(
                ChangeType::OptionalityChanged,
                format!("{path}/properties/{name}"),
                format!("property '{name}' is required by the reader but optional for the writer"),
            ));
        }
    }
}

fn is_closed(schema: &Map<String, Value>) -> bool {
    matches!(schema.get("additionalProperties"), Some(Value::Bool(false)))
}

fn properties(reader: &Map<String, Value>, writer: &Map<String, Value>, path: &str, changes: &mut Vec<SchemaChange>) {
    let empty = Map::new();
    let reader_props = reader.get("properties").and_then(Value::as_object).unwrap_or(&empty);
    let writer_props = writer.get("properties").and_then(Value::as_object).unwrap_or(&empty);

    for (name, reader_prop) in reader_props {
        let prop_path = format!("{path}/properties/{name}");
        match writer_props.get(name) {
            Some(writer_prop) => compare(reader_prop, writer_prop, &prop_path, changes),
            None => changes.push(SchemaChange::compatible(
                ChangeType::FieldAdded,
                prop_path,
                format!("property '{name}' was added"),
            )),
        }
    }

    for (name, writer_prop) in writer_props {
        if reader_props.contains_key(name) {
            continue;
        }
        let prop_path = format!("{path}/properties/{name}");
        match reader.get("additionalProperties") {
            Some(Value::Bool(false)) => changes.push(SchemaChange::breaking(
                ChangeType::FieldRemoved,
                prop_path,
                format!("property '{name}' was removed from a closed content model"),
            )),
            Some(additional @ Value::Object(_)) => compare(additional, writer_prop, &prop_path, changes),
            _ => changes.push(SchemaChange::compatible(
                ChangeType::FieldRemoved,
                prop_path,
                format!("property '{name}' was removed"),
            )),
        }
    }

    if is_closed(reader) && !is_closed(writer) && (writer.contains_key("properties") || reader.contains_key("properties"))
    {
        changes.push(SchemaChange::breaking(
            ChangeType::ConstraintTightened,
            format!("{path}/additionalProperties"),
            "reader forbids additional properties the writer allows",
        ));
    }
}

fn enumeration(reader: &Map<String, Value>, writer: &Map<String, Value>, path: &str, changes: &mut Vec<SchemaChange>) {
    let Some(reader_values) = reader.get("enum").and_then(Value::as_array) else {
        return;
    };
    let enum_path = format!("{path}/enum");
    let Some(writer_values) = writer.get("enum").and_then(Value::as_array) else {
        changes.push(SchemaChange::breaking(
            ChangeType::ConstraintTightened,
            enum_path,
            "reader restricts values to an enum the writer does not declare",
        ));
        return;
    };
    for value in writer_values {
        if !reader_values.contains(value) {
            changes.push(
                SchemaChange::breaking(
                    ChangeType::EnumVariantRemoved,
                    enum_path.clone(),
                    format!("enum value {value} was removed"),
                )
                .values(value.to_string(), ""),
            );
        }
    }
    for value in reader_values {
        if !writer_values.contains(value) {
            changes.push(SchemaChange::compatible(
                ChangeType::EnumVariantAdded,
                enum_path.clone(),
                format!("enum value {value} was added"),
            ));
        }
    }
}

fn bounds(reader: &Map<String, Value>, writer: &Map<String, Value>, path: &str, changes: &mut Vec<SchemaChange>) {
    let mut tightened = |keyword: &str, stricter: fn(f64, f64) -> bool| {
        let Some(reader_bound) = reader.get(keyword).and_then(Value::as_f64) else {
            return;
        };
        let writer_bound = writer.get(keyword).and_then(Value::as_f64);
        if writer_bound.map_or(true, |writer_bound| stricter(reader_bound, writer_bound)) {
            changes.push(
                SchemaChange::breaking(
                    ChangeType::ConstraintTightened,
                    format!("{path}/{keyword}"),
                    format!("{keyword} was tightened to {reader_bound}"),
                )
                .values(writer_bound.map(|b| b.to_string()).unwrap_or_default(), reader_bound.to_string()),
            );
        }
    };
    for keyword in UPPER_BOUNDS {
        tightened(keyword, |r, w| r < w);
    }
    for keyword in LOWER_BOUNDS {
        tightened(keyword, |r, w| r > w);
    }

    if let Some(pattern) = reader.get("pattern") {
        if writer.get("pattern") != Some(pattern) {
            changes.push(SchemaChange::breaking(
                ChangeType::ConstraintTightened,
                format!("{path}/pattern"),
                format!("pattern changed to {pattern}"),
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn breaking(reader: Value, writer: Value) -> Vec<ChangeType> {
        let mut changes = Vec::new();
        check(&reader, &writer, &mut changes);
        changes.into_iter().filter(|c| c.is_breaking).map(|c| c.change_type).collect()
    }

    #[test]
    fn test_optional_property_addition() {
        let writer = json!({"type": "object", "properties": {"name": {"type": "string"}}});
        let reader = json!({"type": "object", "properties": {"name": {"type": "string"}, "age": {"type": "number"}}});
        assert!(breaking(reader, writer).is_empty());
    }

    #[test]
    fn test_required_property_addition_breaks() {
        let writer = json!({"type": "object", "properties": {"name": {"type": "string"}}});
        let reader = json!({
            "type": "object",
            "properties": {"name": {"type": "string"}, "age": {"type": "number"}},
            "required": ["age"]
        });
        assert_eq!(breaking(reader, writer), vec![ChangeType::OptionalityChanged]);
    }

    #[test]
    fn test_integer_widens_to_number() {
        assert!(breaking(json!({"type": "number"}), json!({"type": "integer"})).is_empty());
        assert_eq!(
            breaking(json!({"type": "integer"}), json!({"type": "number"})),
            vec![ChangeType::TypeChanged]
        );
    }

    #[test]
    fn test_closed_reader_drops_property() {
        let writer = json!({"type": "object", "properties": {"a": {"type": "string"}, "b": {"type": "string"}}, "additionalProperties": false});
        let reader = json!({"type": "object", "properties": {"a": {"type": "string"}}, "additionalProperties": false});
        assert_eq!(breaking(reader, writer), vec![ChangeType::FieldRemoved]);
    }

    #[test]
    fn test_bounds_and_enums() {
        assert_eq!(
            breaking(json!({"type": "string", "maxLength": 5}), json!({"type": "string", "maxLength": 10})),
            vec![ChangeType::ConstraintTightened]
        );
        assert!(breaking(json!({"type": "string", "maxLength": 20}), json!({"type": "string", "maxLength": 10})).is_empty());
        assert_eq!(
            breaking(json!({"enum": ["a", "b"]}), json!({"enum": ["a", "b", "c"]})),
            vec![ChangeType::EnumVariantRemoved]
        );
    }

    #[test]
    fn test_array_items_recurse() {
        let writer = json!({"type": "array", "items": {"type": "string"}});
        let reader = json!({"type": "array", "items": {"type": "integer"}});
        assert_eq!(breaking(reader, writer), vec![ChangeType::TypeChanged]);
    }
}
