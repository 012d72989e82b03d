//! Linked descriptor graph
//!
//! Mirrors the shape of `google.protobuf.FileDescriptorProto`: every type
//! reference is resolved to a fully qualified name with a leading dot, and
//! field kinds are known. Equality is structural.

use std::collections::BTreeMap;

pub use super::ast::{ImportKind, NumberRange, OptionValue, Syntax};

/// Wire encoding of a field on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WireType {
    Varint,
    Fixed64,
    LengthDelimited,
    StartGroup,
    Fixed32,
}

/// `FieldDescriptorProto.Type`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldKind {
    Double,
    Float,
    Int64,
    Uint64,
    Int32,
    Fixed64,
    Fixed32,
    Bool,
    String,
    Group,
    Message,
    Bytes,
    Uint32,
    Enum,
    Sfixed32,
    Sfixed64,
    Sint32,
    Sint64,
}

impl FieldKind {
    /// Scalar type for a keyword such as `int32`; `None` for named types
    pub fn from_keyword(keyword: &str) -> Option<Self> {
        Some(match keyword {
            "double" => FieldKind::Double,
            "float" => FieldKind::Float,
            "int64" => FieldKind::Int64,
            "uint64" => FieldKind::Uint64,
            "int32" => FieldKind::Int32,
            "fixed64" => FieldKind::Fixed64,
            "fixed32" => FieldKind::Fixed32,
            "bool" => FieldKind::Bool,
            "string" => FieldKind::String,
            "bytes" => FieldKind::Bytes,
            "uint32" => FieldKind::Uint32,
            "sfixed32" => FieldKind::Sfixed32,
            "sfixed64" => FieldKind::Sfixed64,
            "sint32" => FieldKind::Sint32,
            "sint64" => FieldKind::Sint64,
            _ => return None,
        })
    }

    /// Keyword for scalar kinds; `None` for message, enum and group
    pub fn keyword(&self) -> Option<&'static str> {
        Some(match self {
            FieldKind::Double => "double",
            FieldKind::Float => "float",
            FieldKind::Int64 => "int64",
            FieldKind::Uint64 => "uint64",
            FieldKind::Int32 => "int32",
            FieldKind::Fixed64 => "fixed64",
            FieldKind::Fixed32 => "fixed32",
            FieldKind::Bool => "bool",
            FieldKind::String => "string",
            FieldKind::Bytes => "bytes",
            FieldKind::Uint32 => "uint32",
            FieldKind::Sfixed32 => "sfixed32",
            FieldKind::Sfixed64 => "sfixed64",
            FieldKind::Sint32 => "sint32",
            FieldKind::Sint64 => "sint64",
            FieldKind::Group | FieldKind::Message | FieldKind::Enum => return None,
        })
    }

    pub fn wire_type(&self) -> WireType {
        match self {
            FieldKind::Int32
            | FieldKind::Int64
            | FieldKind::Uint32
            | FieldKind::Uint64
            | FieldKind::Sint32
            | FieldKind::Sint64
            | FieldKind::Bool
            | FieldKind::Enum => WireType::Varint,
            FieldKind::Fixed64 | FieldKind::Sfixed64 | FieldKind::Double => WireType::Fixed64,
            FieldKind::Fixed32 | FieldKind::Sfixed32 | FieldKind::Float => WireType::Fixed32,
            FieldKind::String | FieldKind::Bytes | FieldKind::Message => WireType::LengthDelimited,
            FieldKind::Group => WireType::StartGroup,
        }
    }

    /// Types whose encoded values can be read interchangeably
    pub fn encoding_family(&self) -> u8 {
        match self {
            FieldKind::Int32 | FieldKind::Int64 | FieldKind::Uint32 | FieldKind::Uint64 | FieldKind::Bool => 0,
            FieldKind::Sint32 | FieldKind::Sint64 => 1,
            FieldKind::Fixed32 | FieldKind::Sfixed32 => 2,
            FieldKind::Fixed64 | FieldKind::Sfixed64 => 3,
            FieldKind::String | FieldKind::Bytes => 4,
            FieldKind::Message => 5,
            FieldKind::Enum => 6,
            FieldKind::Float => 7,
            FieldKind::Double => 8,
            FieldKind::Group => 9,
        }
    }

    /// Valid as a `map<K, _>` key
    pub fn is_map_key(&self) -> bool {
        !matches!(
            self,
            FieldKind::Double | FieldKind::Float | FieldKind::Bytes | FieldKind::Message | FieldKind::Enum | FieldKind::Group
        )
    }

    pub fn is_packable(&self) -> bool {
        !matches!(self, FieldKind::String | FieldKind::Bytes | FieldKind::Message | FieldKind::Group)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Label {
    Optional,
    Required,
    Repeated,
}

/// A resolved option; extension names are fully qualified: `(.pkg.ext).sub`
#[derive(Debug, Clone, PartialEq)]
pub struct OptionDescriptor {
    pub name: String,
    pub value: OptionValue,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldDescriptor {
    pub name: String,
    pub number: i32,
    pub label: Label,
    pub kind: FieldKind,
    /// Fully qualified message or enum name (leading dot) for named kinds
    pub type_name: Option<String>,
    /// Fully qualified extended message for extension fields
    pub extendee: Option<String>,
    pub default_value: Option<OptionValue>,
    pub oneof_index: Option<usize>,
    /// Present only when declared in the source
    pub json_name: Option<String>,
    /// proto3 field declared with an explicit `optional`
    pub proto3_optional: bool,
    pub options: Vec<OptionDescriptor>,
}

impl FieldDescriptor {
    /// JSON name: the declared one, or lowerCamelCase of the field name
    pub fn effective_json_name(&self) -> String {
        self.json_name.clone().unwrap_or_else(|| default_json_name(&self.name))
    }

    pub fn is_repeated(&self) -> bool {
        self.label == Label::Repeated
    }
}

/// protoc's `ToJsonName`: drop underscores and upper-case the following letter
pub fn default_json_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut capitalize = false;
    for c in name.chars() {
        if c == '_' {
            capitalize = true;
        } else if capitalize {
            out.push(c.to_ascii_uppercase());
            capitalize = false;
        } else {
            out.push(c);
        }
    }
    out
}

#[derive(Debug, Clone, PartialEq)]
pub struct OneofDescriptor {
    pub name: String,
    pub options: Vec<OptionDescriptor>,
    /// Generated for a proto3 `optional` field; never rendered
    pub synthetic: bool,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct MessageDescriptor {
    pub name: String,
    /// Without leading dot
    pub full_name: String,
    pub fields: Vec<FieldDescriptor>,
    pub oneofs: Vec<OneofDescriptor>,
    pub nested_messages: Vec<MessageDescriptor>,
    pub nested_enums: Vec<EnumDescriptor>,
    pub extensions: Vec<FieldDescriptor>,
    pub options: Vec<OptionDescriptor>,
    pub reserved_ranges: Vec<NumberRange>,
    pub reserved_names: Vec<String>,
    pub extension_ranges: Vec<NumberRange>,
    /// Synthesized entry type of a `map<K, V>` field
    pub map_entry: bool,
}

impl MessageDescriptor {
    pub fn field_by_number(&self, number: i32) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.number == number)
    }

    pub fn field_by_name(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn nested_message(&self, name: &str) -> Option<&MessageDescriptor> {
        self.nested_messages.iter().find(|m| m.name == name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnumValueDescriptor {
    pub name: String,
    pub number: i32,
    pub options: Vec<OptionDescriptor>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct EnumDescriptor {
    pub name: String,
    pub full_name: String,
    pub values: Vec<EnumValueDescriptor>,
    pub options: Vec<OptionDescriptor>,
    pub reserved_ranges: Vec<NumberRange>,
    pub reserved_names: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MethodDescriptor {
    pub name: String,
    pub input_type: String,
    pub output_type: String,
    pub client_streaming: bool,
    pub server_streaming: bool,
    pub options: Vec<OptionDescriptor>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ServiceDescriptor {
    pub name: String,
    pub full_name: String,
    pub methods: Vec<MethodDescriptor>,
    pub options: Vec<OptionDescriptor>,
}

impl ServiceDescriptor {
    pub fn method(&self, name: &str) -> Option<&MethodDescriptor> {
        self.methods.iter().find(|m| m.name == name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DependencyDescriptor {
    pub path: String,
    pub kind: ImportKind,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct FileDescriptor {
    pub name: String,
    pub package: Option<String>,
    pub syntax: Syntax,
    pub dependencies: Vec<DependencyDescriptor>,
    pub messages: Vec<MessageDescriptor>,
    pub enums: Vec<EnumDescriptor>,
    pub services: Vec<ServiceDescriptor>,
    pub extensions: Vec<FieldDescriptor>,
    pub options: Vec<OptionDescriptor>,
}

impl FileDescriptor {
    /// Find a message declared in this file by fully qualified name (no leading dot)
    pub fn find_message(&self, full_name: &str) -> Option<&MessageDescriptor> {
        fn walk<'m>(messages: &'m [MessageDescriptor], full_name: &str) -> Option<&'m MessageDescriptor> {
            for message in messages {
                if message.full_name == full_name {
                    return Some(message);
                }
                if full_name.starts_with(&format!("{}.", message.full_name)) {
                    if let Some(found) = walk(&message.nested_messages, full_name) {
                        return Some(found);
                    }
                }
            }
            None
        }
        walk(&self.messages, full_name.trim_start_matches('.'))
    }

    /// Find an enum declared in this file by fully qualified name
    pub fn find_enum(&self, full_name: &str) -> Option<&EnumDescriptor> {
        let full_name = full_name.trim_start_matches('.');
        if let Some(found) = self.enums.iter().find(|e| e.full_name == full_name) {
            return Some(found);
        }
        let mut stack: Vec<&MessageDescriptor> = self.messages.iter().collect();
        while let Some(message) = stack.pop() {
            if let Some(found) = message.nested_enums.iter().find(|e| e.full_name == full_name) {
                return Some(found);
            }
            stack.extend(message.nested_messages.iter());
        }
        None
    }

    /// Find a top-level message by its simple name
    pub fn message_by_name(&self, name: &str) -> Option<&MessageDescriptor> {
        self.messages.iter().find(|m| m.name == name)
    }

    pub fn service_by_name(&self, name: &str) -> Option<&ServiceDescriptor> {
        self.services.iter().find(|s| s.name == name)
    }

    /// Every message in the file, nested ones included, in declaration order
    pub fn all_messages(&self) -> Vec<&MessageDescriptor> {
        fn collect<'m>(messages: &'m [MessageDescriptor], out: &mut Vec<&'m MessageDescriptor>) {
            for message in messages {
                out.push(message);
                collect(&message.nested_messages, out);
            }
        }
        let mut out = Vec::new();
        collect(&self.messages, &mut out);
        out
    }

    /// Every enum in the file, nested ones included
    pub fn all_enums(&self) -> Vec<&EnumDescriptor> {
        let mut out: Vec<&EnumDescriptor> = self.enums.iter().collect();
        for message in self.all_messages() {
            out.extend(message.nested_enums.iter());
        }
        out
    }
}

/// A linked file together with its transitive dependencies
#[derive(Debug, Clone, PartialEq)]
pub struct DescriptorGraph {
    pub file: FileDescriptor,
    pub dependencies: BTreeMap<String, FileDescriptor>,
}

impl DescriptorGraph {
    pub fn file(&self) -> &FileDescriptor {
        &self.file
    }

    fn files(&self) -> impl Iterator<Item = &FileDescriptor> {
        std::iter::once(&self.file).chain(self.dependencies.values())
    }

    /// Look up a message anywhere in the closure
    pub fn find_message(&self, full_name: &str) -> Option<&MessageDescriptor> {
        self.files().find_map(|f| f.find_message(full_name))
    }

    /// Look up an enum anywhere in the closure
    pub fn find_enum(&self, full_name: &str) -> Option<&EnumDescriptor> {
        self.files().find_map(|f| f.find_enum(full_name))
    }
}
