//! Protobuf wire compatibility between linked descriptor graphs

use std::collections::BTreeSet;

use super::{ChangeType, SchemaChange};
use crate::protobuf::{DescriptorGraph, FieldDescriptor, FieldKind, Label, MessageDescriptor};

pub(crate) fn check(reader: &DescriptorGraph, writer: &DescriptorGraph, changes: &mut Vec<SchemaChange>) {
    let reader_file = reader.file();
    let writer_file = writer.file();

    if reader_file.package != writer_file.package {
        let package = |p: &Option<String>| p.clone().unwrap_or_default();
        changes.push(
            SchemaChange::breaking(
                ChangeType::PackageChanged,
                "package",
                format!(
                    "package changed from '{}' to '{}'",
                    package(&writer_file.package),
                    package(&reader_file.package)
                ),
            )
            .values(package(&writer_file.package), package(&reader_file.package)),
        );
        return;
    }

    for writer_message in writer_file.all_messages() {
        if writer_message.map_entry {
            continue;
        }
        match reader_file.find_message(&writer_message.full_name) {
            Some(reader_message) => message(reader, writer, reader_message, writer_message, changes),
            None => changes.push(SchemaChange::breaking(
                ChangeType::TypeRemoved,
                writer_message.full_name.clone(),
                format!("message {} was removed", writer_message.full_name),
            )),
        }
    }

    for writer_enum in writer_file.all_enums() {
        let Some(reader_enum) = reader_file.find_enum(&writer_enum.full_name) else {
            changes.push(SchemaChange::breaking(
                ChangeType::TypeRemoved,
                writer_enum.full_name.clone(),
                format!("enum {} was removed", writer_enum.full_name),
            ));
            continue;
        };
        let reader_numbers: BTreeSet<i32> = reader_enum.values.iter().map(|v| v.number).collect();
        let writer_numbers: BTreeSet<i32> = writer_enum.values.iter().map(|v| v.number).collect();
        for value in &writer_enum.values {
            if !reader_numbers.contains(&value.number) {
                changes.push(
                    SchemaChange::breaking(
                        ChangeType::EnumVariantRemoved,
                        format!("{}.{}", writer_enum.full_name, value.name),
                        format!("enum value {} = {} was removed", value.name, value.number),
                    )
                    .values(value.number.to_string(), ""),
                );
            }
        }
        for value in &reader_enum.values {
            if !writer_numbers.contains(&value.number) {
                changes.push(SchemaChange::compatible(
                    ChangeType::EnumVariantAdded,
                    format!("{}.{}", reader_enum.full_name, value.name),
                    format!("enum value {} = {} was added", value.name, value.number),
                ));
            }
        }
    }
}

fn real_oneof<'m>(message: &'m MessageDescriptor, field: &FieldDescriptor) -> Option<&'m str> {
    let oneof = message.oneofs.get(field.oneof_index?)?;
    (!oneof.synthetic).then_some(oneof.name.as_str())
}

fn message(
    reader: &DescriptorGraph,
    writer: &DescriptorGraph,
    reader_message: &MessageDescriptor,
    writer_message: &MessageDescriptor,
    changes: &mut Vec<SchemaChange>,
) {
    for writer_field in &writer_message.fields {
        let path = format!("{}.{}", writer_message.full_name, writer_field.name);
        let Some(reader_field) = reader_message.field_by_number(writer_field.number) else {
            changes.push(SchemaChange::compatible(
                ChangeType::FieldRemoved,
                path,
                format!("field {} = {} was removed", writer_field.name, writer_field.number),
            ));
            continue;
        };
        field(reader, writer, reader_field, writer_field, &path, changes);

        let reader_oneof = real_oneof(reader_message, reader_field);
        let writer_oneof = real_oneof(writer_message, writer_field);
        if reader_oneof.is_some() != writer_oneof.is_some() {
            changes.push(
                SchemaChange::breaking(
                    ChangeType::OneofMembershipChanged,
                    path.clone(),
                    format!("field {} moved into or out of a oneof", writer_field.number),
                )
                .values(writer_oneof.unwrap_or_default(), reader_oneof.unwrap_or_default()),
            );
        }

        if reader_field.name != writer_field.name {
            changes.push(
                SchemaChange::compatible(
                    ChangeType::FieldRenamed,
                    path.clone(),
                    format!("field {} was renamed", writer_field.number),
                )
                .values(writer_field.name.clone(), reader_field.name.clone()),
            );
        }

        if reader_field.label == Label::Required && writer_field.label != Label::Required {
            changes.push(SchemaChange::breaking(
                ChangeType::OptionalityChanged,
                path,
                format!("field {} is required by the reader but optional for the writer", reader_field.name),
            ));
        }
    }

    for reader_field in &reader_message.fields {
        if writer_message.field_by_number(reader_field.number).is_some() {
            continue;
        }
        let path = format!("{}.{}", reader_message.full_name, reader_field.name);
        if reader_field.label == Label::Required {
            changes.push(SchemaChange::breaking(
                ChangeType::FieldAdded,
                path,
                format!("required field {} = {} was added", reader_field.name, reader_field.number),
            ));
        } else {
            changes.push(SchemaChange::compatible(
                ChangeType::FieldAdded,
                path,
                format!("field {} = {} was added", reader_field.name, reader_field.number),
            ));
        }
    }
}

/// Compare two fields sharing a number
fn field(
    reader: &DescriptorGraph,
    writer: &DescriptorGraph,
    reader_field: &FieldDescriptor,
    writer_field: &FieldDescriptor,
    path: &str,
    changes: &mut Vec<SchemaChange>,
) {
    let kind_name = |field: &FieldDescriptor| {
        field
            .kind
            .keyword()
            .map(str::to_string)
            .or_else(|| field.type_name.clone())
            .unwrap_or_default()
    };

    if reader_field.kind.wire_type() != writer_field.kind.wire_type() {
        changes.push(
            SchemaChange::breaking(
                ChangeType::WireTypeChanged,
                path,
                format!(
                    "field {} changed wire type from {:?} to {:?}",
                    writer_field.number,
                    writer_field.kind.wire_type(),
                    reader_field.kind.wire_type()
                ),
            )
            .values(kind_name(writer_field), kind_name(reader_field)),
        );
        return;
    }
    if reader_field.kind.encoding_family() != writer_field.kind.encoding_family() {
        changes.push(
            SchemaChange::breaking(
                ChangeType::TypeChanged,
                path,
                format!(
                    "field {} changed from {} to {}",
                    writer_field.number,
                    kind_name(writer_field),
                    kind_name(reader_field)
                ),
            )
            .values(kind_name(writer_field), kind_name(reader_field)),
        );
        return;
    }

    if reader_field.is_repeated() != writer_field.is_repeated() {
        changes.push(SchemaChange::breaking(
            ChangeType::CardinalityChanged,
            path,
            format!("field {} changed between singular and repeated", writer_field.number),
        ));
        return;
    }

    if matches!(reader_field.kind, FieldKind::Message | FieldKind::Enum | FieldKind::Group)
        && reader_field.type_name != writer_field.type_name
    {
        let entries = (
            map_entry(reader, reader_field.type_name.as_deref()),
            map_entry(writer, writer_field.type_name.as_deref()),
        );
        match entries {
            // map entry names follow the field name; compare key and value instead
            (Some(reader_entry), Some(writer_entry)) => {
                for (reader_part, writer_part) in reader_entry.fields.iter().zip(&writer_entry.fields) {
                    field(reader, writer, reader_part, writer_part, &format!("{path}.{}", writer_part.name), changes);
                }
            }
            _ => changes.push(
                SchemaChange::breaking(
                    ChangeType::TypeChanged,
                    path,
                    format!("field {} changed type", writer_field.number),
                )
                .values(kind_name(writer_field), kind_name(reader_field)),
            ),
        }
    }
}

fn map_entry<'g>(graph: &'g DescriptorGraph, type_name: Option<&str>) -> Option<&'g MessageDescriptor> {
    graph.find_message(type_name?).filter(|message| message.map_entry)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::protobuf::link;

    fn breaking(reader: &str, writer: &str) -> Vec<ChangeType> {
        let reader = link("schema.proto", reader, &BTreeMap::new()).unwrap();
        let writer = link("schema.proto", writer, &BTreeMap::new()).unwrap();
        let mut changes = Vec::new();
        check(&reader, &writer, &mut changes);
        changes.into_iter().filter(|c| c.is_breaking).map(|c| c.change_type).collect()
    }

    #[test]
    fn test_added_and_renamed_fields_are_compatible() {
        let writer = "syntax = \"proto3\"; package shop; message Order { string id = 1; }";
        let reader = "syntax = \"proto3\"; package shop; message Order { string order_id = 1; int64 total = 2; }";
        assert!(breaking(reader, writer).is_empty());
    }

    #[test]
    fn test_wire_and_family_changes() {
        let writer = "syntax = \"proto3\"; message M { int32 a = 1; sint32 b = 2; string c = 3; }";
        let reader = "syntax = \"proto3\"; message M { string a = 1; int32 b = 2; bytes c = 3; }";
        assert_eq!(
            breaking(reader, writer),
            vec![ChangeType::WireTypeChanged, ChangeType::TypeChanged]
        );
    }

    #[test]
    fn test_package_and_removed_message() {
        assert_eq!(
            breaking("syntax = \"proto3\"; package b; message M {}", "syntax = \"proto3\"; package a; message M {}"),
            vec![ChangeType::PackageChanged]
        );
        assert_eq!(
            breaking("syntax = \"proto3\"; message M {}", "syntax = \"proto3\"; message M {} message N {}"),
            vec![ChangeType::TypeRemoved]
        );
    }

    #[test]
    fn test_oneof_and_cardinality() {
        let writer = "syntax = \"proto3\"; message M { string a = 1; string b = 2; }";
        let reader = "syntax = \"proto3\"; message M { oneof choice { string a = 1; } repeated string b = 2; }";
        let found = breaking(reader, writer);
        assert!(found.contains(&ChangeType::OneofMembershipChanged));
        assert!(found.contains(&ChangeType::CardinalityChanged));
    }

    #[test]
    fn test_required_and_enum_values() {
        let writer = "syntax = \"proto2\"; message M { optional int32 a = 1; } enum E { X = 0; Y = 1; }";
        let reader = "syntax = \"proto2\"; message M { required int32 a = 1; } enum E { X = 0; }";
        let found = breaking(reader, writer);
        assert!(found.contains(&ChangeType::OptionalityChanged));
        assert!(found.contains(&ChangeType::EnumVariantRemoved));
    }

    #[test]
    fn test_renamed_map_field_is_compatible() {
        let writer = "syntax = \"proto3\"; message M { map<string, int64> counts = 1; }";
        let reader = "syntax = \"proto3\"; message M { map<string, int64> totals = 1; }";
        assert!(breaking(reader, writer).is_empty());
    }
}
