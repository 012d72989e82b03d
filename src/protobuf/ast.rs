//! Unlinked syntax tree of a single `.proto` file
//!
//! Type names are kept exactly as written; the linker resolves them.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Syntax {
    #[default]
    Proto2,
    Proto3,
}

impl Syntax {
    pub fn as_str(&self) -> &'static str {
        match self {
            Syntax::Proto2 => "proto2",
            Syntax::Proto3 => "proto3",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImportKind {
    Default,
    Public,
    Weak,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Import {
    pub path: String,
    pub kind: ImportKind,
}

/// One component of an option name: `foo` or `(my.ext)`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptionNamePart {
    pub name: String,
    pub is_extension: bool,
}

/// Literal value of an option or field default
#[derive(Debug, Clone, PartialEq)]
pub enum OptionValue {
    Bool(bool),
    Int(i128),
    Float(f64),
    Str(String),
    /// Enum value names and the special float identifiers
    Ident(String),
    /// Text-format message literal
    Message(Vec<(String, OptionValue)>),
    List(Vec<OptionValue>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct OptionDecl {
    pub name: Vec<OptionNamePart>,
    pub value: OptionValue,
}

impl OptionDecl {
    /// `Some(name)` when this is a plain single-component option like `deprecated`
    pub fn simple_name(&self) -> Option<&str> {
        match self.name.as_slice() {
            [part] if !part.is_extension => Some(&part.name),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldLabel {
    Required,
    Optional,
    Repeated,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldDecl {
    pub name: String,
    pub number: i64,
    /// Label as written, `None` when omitted
    pub label: Option<FieldLabel>,
    pub type_name: String,
    /// `map<key, value>` fields keep both halves here; `type_name` is empty
    pub map: Option<(String, String)>,
    pub options: Vec<OptionDecl>,
    /// Index into the enclosing message's `oneofs`
    pub oneof: Option<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OneofDecl {
    pub name: String,
    pub options: Vec<OptionDecl>,
}

/// Inclusive number range (`reserved 5 to 9`, `extensions 100 to max`)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NumberRange {
    pub start: i64,
    pub end: i64,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct MessageDecl {
    pub name: String,
    pub fields: Vec<FieldDecl>,
    pub oneofs: Vec<OneofDecl>,
    pub messages: Vec<MessageDecl>,
    pub enums: Vec<EnumDecl>,
    pub extends: Vec<ExtendDecl>,
    pub options: Vec<OptionDecl>,
    pub reserved_ranges: Vec<NumberRange>,
    pub reserved_names: Vec<String>,
    pub extension_ranges: Vec<NumberRange>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnumValueDecl {
    pub name: String,
    pub number: i64,
    pub options: Vec<OptionDecl>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct EnumDecl {
    pub name: String,
    pub values: Vec<EnumValueDecl>,
    pub options: Vec<OptionDecl>,
    pub reserved_ranges: Vec<NumberRange>,
    pub reserved_names: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MethodDecl {
    pub name: String,
    pub input_type: String,
    pub output_type: String,
    pub client_streaming: bool,
    pub server_streaming: bool,
    pub options: Vec<OptionDecl>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ServiceDecl {
    pub name: String,
    pub methods: Vec<MethodDecl>,
    pub options: Vec<OptionDecl>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExtendDecl {
    pub extendee: String,
    pub fields: Vec<FieldDecl>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ProtoFile {
    pub syntax: Syntax,
    pub package: Option<String>,
    pub imports: Vec<Import>,
    pub options: Vec<OptionDecl>,
    pub messages: Vec<MessageDecl>,
    pub enums: Vec<EnumDecl>,
    pub services: Vec<ServiceDecl>,
    pub extends: Vec<ExtendDecl>,
}
