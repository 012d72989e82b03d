//! Links a parsed `.proto` file and its imports into a [`DescriptorGraph`]
//!
//! Imports come from the caller-supplied dependency map first and from the
//! bundled well-known set second. All files of the closure share one symbol
//! table; names resolve with protobuf scoping (innermost scope outward, a
//! leading dot makes a name absolute).

use std::collections::{BTreeMap, HashMap};
use std::ops::RangeInclusive;

use tracing::debug;

use super::ast::{
    EnumDecl, ExtendDecl, FieldDecl, FieldLabel, MessageDecl, NumberRange, OptionDecl, OptionValue, ProtoFile,
    ServiceDecl, Syntax,
};
use super::descriptor::{
    DependencyDescriptor, DescriptorGraph, EnumDescriptor, EnumValueDescriptor, FieldDescriptor, FieldKind,
    FileDescriptor, Label, MessageDescriptor, MethodDescriptor, OneofDescriptor, OptionDescriptor,
    ServiceDescriptor,
};
use super::{parser, well_known};
use crate::error::ProtoError;

const MAX_FIELD_NUMBER: i64 = 536_870_911;
const IMPLEMENTATION_RESERVED: RangeInclusive<i64> = 19_000..=19_999;

/// Parse and link `source` (named `name`) against `deps` (import path -> source).
pub fn link(name: &str, source: &str, deps: &BTreeMap<String, String>) -> Result<DescriptorGraph, ProtoError> {
    let root = parser::parse(name, source)?;
    let mut loader = Loader {
        deps,
        files: Vec::new(),
        loading: vec![name.to_string()],
    };
    loader.load_imports(&root)?;
    loader.files.push((name.to_string(), root));

    let symbols = SymbolTable::build(&loader.files)?;
    let mut linked = Vec::with_capacity(loader.files.len());
    for (path, file) in &loader.files {
        let linker = FileLinker {
            symbols: &symbols,
            syntax: file.syntax,
        };
        linked.push(linker.file(path, file)?);
    }

    let file = linked
        .pop()
        .ok_or_else(|| ProtoError::Invalid(format!("nothing to link for {name}")))?;
    let dependencies: BTreeMap<String, FileDescriptor> = linked.into_iter().map(|f| (f.name.clone(), f)).collect();
    debug!(file = name, dependencies = dependencies.len(), "linked protobuf file");
    Ok(DescriptorGraph { file, dependencies })
}

/// Loads the import closure, dependencies before dependents.
struct Loader<'d> {
    deps: &'d BTreeMap<String, String>,
    files: Vec<(String, ProtoFile)>,
    loading: Vec<String>,
}

impl Loader<'_> {
    fn load_imports(&mut self, file: &ProtoFile) -> Result<(), ProtoError> {
        for import in &file.imports {
            let path = import.path.as_str();
            if self.loading.iter().any(|p| p == path) {
                return Err(ProtoError::ImportCycle(path.to_string()));
            }
            if self.files.iter().any(|(p, _)| p == path) {
                continue;
            }
            let source = self
                .deps
                .get(path)
                .map(String::as_str)
                .or_else(|| well_known::source(path))
                .ok_or_else(|| ProtoError::MissingDependency(path.to_string()))?;
            let parsed = parser::parse(path, source)?;
            self.loading.push(path.to_string());
            self.load_imports(&parsed)?;
            self.loading.pop();
            self.files.push((path.to_string(), parsed));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
enum Symbol {
    Package,
    Message { extension_ranges: Vec<NumberRange> },
    Enum,
    EnumValue,
    Service,
    /// Fields, oneofs and methods
    Member,
    Extension { extendee: String, scope: String },
}

impl Symbol {
    fn is_aggregate(&self) -> bool {
        matches!(self, Symbol::Package | Symbol::Message { .. } | Symbol::Service)
    }

    fn is_type(&self) -> bool {
        matches!(self, Symbol::Message { .. } | Symbol::Enum)
    }

    fn is_message(&self) -> bool {
        matches!(self, Symbol::Message { .. })
    }

    fn is_extension(&self) -> bool {
        matches!(self, Symbol::Extension { .. })
    }
}

#[derive(Debug, Default)]
struct SymbolTable {
    symbols: HashMap<String, Symbol>,
}

impl SymbolTable {
    fn build(files: &[(String, ProtoFile)]) -> Result<Self, ProtoError> {
        let mut table = SymbolTable::default();
        for (_, file) in files {
            let package = file.package.clone().unwrap_or_default();
            if !package.is_empty() {
                let mut prefix = String::new();
                for part in package.split('.') {
                    if !prefix.is_empty() {
                        prefix.push('.');
                    }
                    prefix.push_str(part);
                    table.insert(prefix.clone(), Symbol::Package)?;
                }
            }
            for message in &file.messages {
                table.message(&package, message)?;
            }
            for decl in &file.enums {
                table.enumeration(&package, decl)?;
            }
            for service in &file.services {
                let full_name = qualify(&package, &service.name);
                table.insert(full_name.clone(), Symbol::Service)?;
                for method in &service.methods {
                    table.insert(qualify(&full_name, &method.name), Symbol::Member)?;
                }
            }
            table.extends(&package, &file.extends)?;
        }
        Ok(table)
    }

    fn insert(&mut self, name: String, symbol: Symbol) -> Result<(), ProtoError> {
        match self.symbols.get(&name) {
            Some(Symbol::Package) if matches!(symbol, Symbol::Package) => Ok(()),
            Some(_) => Err(ProtoError::DuplicateSymbol(name)),
            None => {
                self.symbols.insert(name, symbol);
                Ok(())
            }
        }
    }

    fn message(&mut self, scope: &str, decl: &MessageDecl) -> Result<(), ProtoError> {
        let full_name = qualify(scope, &decl.name);
        self.insert(
            full_name.clone(),
            Symbol::Message {
                extension_ranges: decl.extension_ranges.clone(),
            },
        )?;
        for field in &decl.fields {
            self.insert(qualify(&full_name, &field.name), Symbol::Member)?;
            if field.map.is_some() {
                self.insert(
                    qualify(&full_name, &map_entry_name(&field.name)),
                    Symbol::Message {
                        extension_ranges: Vec::new(),
                    },
                )?;
            }
        }
        for oneof in &decl.oneofs {
            self.insert(qualify(&full_name, &oneof.name), Symbol::Member)?;
        }
        for nested in &decl.messages {
            self.message(&full_name, nested)?;
        }
        for nested in &decl.enums {
            self.enumeration(&full_name, nested)?;
        }
        self.extends(&full_name, &decl.extends)
    }

    /// Enum values live in the enum's enclosing scope, as in C++.
    fn enumeration(&mut self, scope: &str, decl: &EnumDecl) -> Result<(), ProtoError> {
        self.insert(qualify(scope, &decl.name), Symbol::Enum)?;
        for value in &decl.values {
            self.insert(qualify(scope, &value.name), Symbol::EnumValue)?;
        }
        Ok(())
    }

    fn extends(&mut self, scope: &str, extends: &[ExtendDecl]) -> Result<(), ProtoError> {
        for extend in extends {
            for field in &extend.fields {
                self.insert(
                    qualify(scope, &field.name),
                    Symbol::Extension {
                        extendee: extend.extendee.clone(),
                        scope: scope.to_string(),
                    },
                )?;
            }
        }
        Ok(())
    }

    /// Resolve `name` as seen from `scope`, returning the fully qualified name.
    ///
    /// The first component is looked up from the innermost scope outward; once
    /// it is found as an aggregate the rest of the name must resolve inside it.
    fn resolve(&self, name: &str, scope: &str, accept: impl Fn(&Symbol) -> bool) -> Option<(String, &Symbol)> {
        if let Some(absolute) = name.strip_prefix('.') {
            return self
                .symbols
                .get_key_value(absolute)
                .filter(|(_, symbol)| accept(symbol))
                .map(|(full, symbol)| (full.clone(), symbol));
        }

        let first = name.split('.').next().unwrap_or(name);
        let mut scope = scope;
        loop {
            let candidate = qualify(scope, first);
            if let Some(symbol) = self.symbols.get(&candidate) {
                if first.len() == name.len() {
                    if accept(symbol) {
                        return Some((candidate, symbol));
                    }
                } else if symbol.is_aggregate() {
                    let full = qualify(scope, name);
                    return match self.symbols.get(&full) {
                        Some(symbol) if accept(symbol) => Some((full, symbol)),
                        _ => None,
                    };
                }
            }
            if scope.is_empty() {
                return None;
            }
            scope = scope.rsplit_once('.').map(|(parent, _)| parent).unwrap_or("");
        }
    }
}

fn qualify(scope: &str, name: &str) -> String {
    if scope.is_empty() {
        name.to_string()
    } else {
        format!("{scope}.{name}")
    }
}

/// `foo_bar` -> `FooBarEntry`
pub(crate) fn map_entry_name(field: &str) -> String {
    let mut out = String::with_capacity(field.len() + 5);
    let mut upper = true;
    for c in field.chars() {
        if c == '_' {
            upper = true;
        } else if upper {
            out.push(c.to_ascii_uppercase());
            upper = false;
        } else {
            out.push(c);
        }
    }
    out.push_str("Entry");
    out
}

fn unresolved(name: &str, scope: &str) -> ProtoError {
    ProtoError::TypeResolution {
        name: name.to_string(),
        scope: if scope.is_empty() {
            "the default package".to_string()
        } else {
            scope.to_string()
        },
    }
}

fn invalid(message: String) -> ProtoError {
    ProtoError::Invalid(message)
}

fn in_ranges(ranges: &[NumberRange], number: i64) -> bool {
    ranges.iter().any(|r| (r.start..=r.end).contains(&number))
}

fn entry_field(name: &str, number: i32, kind: FieldKind, type_name: Option<String>) -> FieldDescriptor {
    FieldDescriptor {
        name: name.to_string(),
        number,
        label: Label::Optional,
        kind,
        type_name,
        extendee: None,
        default_value: None,
        oneof_index: None,
        json_name: None,
        proto3_optional: false,
        options: Vec::new(),
    }
}

/// Links the declarations of one file against the shared symbol table.
struct FileLinker<'s> {
    symbols: &'s SymbolTable,
    syntax: Syntax,
}

impl FileLinker<'_> {
    fn proto3(&self) -> bool {
        self.syntax == Syntax::Proto3
    }

    fn file(&self, path: &str, file: &ProtoFile) -> Result<FileDescriptor, ProtoError> {
        let package = file.package.clone().unwrap_or_default();

        let mut messages = Vec::with_capacity(file.messages.len());
        for decl in &file.messages {
            messages.push(self.message(&package, decl)?);
        }
        let mut enums = Vec::with_capacity(file.enums.len());
        for decl in &file.enums {
            enums.push(self.enumeration(&package, decl)?);
        }
        let mut services = Vec::with_capacity(file.services.len());
        for decl in &file.services {
            services.push(self.service(&package, decl)?);
        }

        Ok(FileDescriptor {
            name: path.to_string(),
            package: file.package.clone(),
            syntax: file.syntax,
            dependencies: file
                .imports
                .iter()
                .map(|import| DependencyDescriptor {
                    path: import.path.clone(),
                    kind: import.kind,
                })
                .collect(),
            messages,
            enums,
            services,
            extensions: self.extensions(&package, &file.extends)?,
            options: self.options(&file.options, &package, "FileOptions")?,
        })
    }

    fn message(&self, scope: &str, decl: &MessageDecl) -> Result<MessageDescriptor, ProtoError> {
        let full_name = qualify(scope, &decl.name);

        let mut fields = Vec::with_capacity(decl.fields.len());
        let mut nested_messages = Vec::new();
        for field in &decl.fields {
            let (descriptor, entry) = self.field(&full_name, field, None)?;
            fields.push(descriptor);
            nested_messages.extend(entry);
        }

        let mut oneofs = Vec::with_capacity(decl.oneofs.len());
        for oneof in &decl.oneofs {
            oneofs.push(OneofDescriptor {
                name: oneof.name.clone(),
                options: self.options(&oneof.options, &full_name, "OneofOptions")?,
                synthetic: false,
            });
        }
        // synthetic oneofs follow the declared ones
        for field in fields.iter_mut().filter(|f| f.proto3_optional) {
            field.oneof_index = Some(oneofs.len());
            oneofs.push(OneofDescriptor {
                name: format!("_{}", field.name),
                options: Vec::new(),
                synthetic: true,
            });
        }

        for nested in &decl.messages {
            nested_messages.push(self.message(&full_name, nested)?);
        }
        let mut nested_enums = Vec::with_capacity(decl.enums.len());
        for nested in &decl.enums {
            nested_enums.push(self.enumeration(&full_name, nested)?);
        }

        let message = MessageDescriptor {
            name: decl.name.clone(),
            extensions: self.extensions(&full_name, &decl.extends)?,
            options: self.options(&decl.options, &full_name, "MessageOptions")?,
            full_name,
            fields,
            oneofs,
            nested_messages,
            nested_enums,
            reserved_ranges: decl.reserved_ranges.clone(),
            reserved_names: decl.reserved_names.clone(),
            extension_ranges: decl.extension_ranges.clone(),
            map_entry: false,
        };
        validate_message(&message)?;
        Ok(message)
    }

    /// Link one field. Map fields also yield their synthesized entry message.
    fn field(
        &self,
        scope: &str,
        decl: &FieldDecl,
        extendee: Option<&str>,
    ) -> Result<(FieldDescriptor, Option<MessageDescriptor>), ProtoError> {
        if !(1..=MAX_FIELD_NUMBER).contains(&decl.number) || IMPLEMENTATION_RESERVED.contains(&decl.number) {
            return Err(invalid(format!(
                "field '{}' in {scope} has invalid number {}",
                decl.name, decl.number
            )));
        }
        let number = decl.number as i32;
        let (label, proto3_optional) = self.label(scope, decl, extendee.is_some())?;

        let mut entry = None;
        let (kind, type_name) = match &decl.map {
            Some((key, value)) => {
                let name = map_entry_name(&decl.name);
                let entry_full_name = qualify(scope, &name);
                let key_kind = FieldKind::from_keyword(key).filter(FieldKind::is_map_key).ok_or_else(|| {
                    invalid(format!(
                        "'{key}' is not a valid map key type for field '{}' in {scope}",
                        decl.name
                    ))
                })?;
                let (value_kind, value_type) = self.resolve_type(value, scope)?;
                entry = Some(MessageDescriptor {
                    name,
                    full_name: entry_full_name.clone(),
                    fields: vec![
                        entry_field("key", 1, key_kind, None),
                        entry_field("value", 2, value_kind, value_type),
                    ],
                    map_entry: true,
                    ..Default::default()
                });
                (FieldKind::Message, Some(format!(".{entry_full_name}")))
            }
            None => self.resolve_type(&decl.type_name, scope)?,
        };

        let mut default_value = None;
        let mut json_name = None;
        let mut remaining = Vec::with_capacity(decl.options.len());
        for option in &decl.options {
            match option.simple_name() {
                Some("default") => default_value = Some(option.value.clone()),
                Some("json_name") => match &option.value {
                    OptionValue::Str(s) => json_name = Some(s.clone()),
                    _ => return Err(invalid(format!("json_name of field '{}' must be a string", decl.name))),
                },
                _ => remaining.push(option.clone()),
            }
        }
        if default_value.is_some() {
            if self.proto3() {
                return Err(invalid(format!(
                    "explicit default values are not allowed in proto3 (field '{}' in {scope})",
                    decl.name
                )));
            }
            if label == Label::Repeated || kind == FieldKind::Message {
                return Err(invalid(format!(
                    "field '{}' in {scope} cannot have a default value",
                    decl.name
                )));
            }
        }
        if json_name.is_some() && extendee.is_some() {
            return Err(invalid(format!("extension '{}' cannot declare json_name", decl.name)));
        }

        let field = FieldDescriptor {
            name: decl.name.clone(),
            number,
            label,
            kind,
            type_name,
            extendee: extendee.map(|e| format!(".{e}")),
            default_value,
            oneof_index: decl.oneof,
            json_name,
            proto3_optional,
            options: self.options(&remaining, scope, "FieldOptions")?,
        };
        Ok((field, entry))
    }

    fn label(&self, scope: &str, decl: &FieldDecl, is_extension: bool) -> Result<(Label, bool), ProtoError> {
        if decl.map.is_some() {
            if decl.label.is_some() {
                return Err(invalid(format!("map field '{}' in {scope} cannot have a label", decl.name)));
            }
            if decl.oneof.is_some() || is_extension {
                return Err(invalid(format!(
                    "map field '{}' in {scope} must be a plain message field",
                    decl.name
                )));
            }
            return Ok((Label::Repeated, false));
        }
        if decl.oneof.is_some() {
            return Ok((Label::Optional, false));
        }
        match decl.label {
            Some(FieldLabel::Required) if self.proto3() => Err(invalid(format!(
                "required fields are not allowed in proto3 (field '{}' in {scope})",
                decl.name
            ))),
            Some(FieldLabel::Required) if is_extension => Err(invalid(format!(
                "extension '{}' cannot be required",
                decl.name
            ))),
            Some(FieldLabel::Required) => Ok((Label::Required, false)),
            Some(FieldLabel::Repeated) => Ok((Label::Repeated, false)),
            Some(FieldLabel::Optional) => Ok((Label::Optional, self.proto3() && !is_extension)),
            None if self.proto3() => Ok((Label::Optional, false)),
            None => Err(invalid(format!(
                "field '{}' in {scope} needs a label (optional, required or repeated) in proto2",
                decl.name
            ))),
        }
    }

    fn resolve_type(&self, name: &str, scope: &str) -> Result<(FieldKind, Option<String>), ProtoError> {
        if let Some(kind) = FieldKind::from_keyword(name) {
            return Ok((kind, None));
        }
        match self.symbols.resolve(name, scope, Symbol::is_type) {
            Some((full, Symbol::Enum)) => Ok((FieldKind::Enum, Some(format!(".{full}")))),
            Some((full, _)) => Ok((FieldKind::Message, Some(format!(".{full}")))),
            None => Err(unresolved(name, scope)),
        }
    }

    fn resolve_message(&self, name: &str, scope: &str) -> Result<String, ProtoError> {
        self.symbols
            .resolve(name, scope, Symbol::is_message)
            .map(|(full, _)| format!(".{full}"))
            .ok_or_else(|| unresolved(name, scope))
    }

    fn extensions(&self, scope: &str, extends: &[ExtendDecl]) -> Result<Vec<FieldDescriptor>, ProtoError> {
        let mut out = Vec::new();
        for extend in extends {
            let (extendee, ranges) = match self.symbols.resolve(&extend.extendee, scope, Symbol::is_message) {
                Some((full, Symbol::Message { extension_ranges })) => (full, extension_ranges.clone()),
                _ => return Err(unresolved(&extend.extendee, scope)),
            };
            for decl in &extend.fields {
                let (field, _) = self.field(scope, decl, Some(&extendee))?;
                if !in_ranges(&ranges, i64::from(field.number)) {
                    return Err(invalid(format!(
                        "extension '{}' uses number {}, which {extendee} does not declare as an extension range",
                        field.name, field.number
                    )));
                }
                out.push(field);
            }
        }
        Ok(out)
    }

    fn enumeration(&self, scope: &str, decl: &EnumDecl) -> Result<EnumDescriptor, ProtoError> {
        let full_name = qualify(scope, &decl.name);
        let Some(first) = decl.values.first() else {
            return Err(invalid(format!("enum {full_name} must declare at least one value")));
        };
        if self.proto3() && first.number != 0 {
            return Err(invalid(format!("the first value of enum {full_name} must be zero in proto3")));
        }
        let allow_alias = decl
            .options
            .iter()
            .any(|o| o.simple_name() == Some("allow_alias") && o.value == OptionValue::Bool(true));

        let mut seen: HashMap<i64, &str> = HashMap::new();
        let mut values = Vec::with_capacity(decl.values.len());
        for value in &decl.values {
            let number = i32::try_from(value.number)
                .map_err(|_| invalid(format!("enum value {} in {full_name} is out of range", value.name)))?;
            if let Some(previous) = seen.insert(value.number, &value.name) {
                if !allow_alias {
                    return Err(invalid(format!(
                        "enum values '{previous}' and '{}' in {full_name} share number {} without allow_alias",
                        value.name, value.number
                    )));
                }
            }
            if in_ranges(&decl.reserved_ranges, value.number) || decl.reserved_names.contains(&value.name) {
                return Err(invalid(format!("enum value '{}' in {full_name} is reserved", value.name)));
            }
            values.push(EnumValueDescriptor {
                name: value.name.clone(),
                number,
                options: self.options(&value.options, &full_name, "EnumValueOptions")?,
            });
        }

        Ok(EnumDescriptor {
            name: decl.name.clone(),
            options: self.options(&decl.options, &full_name, "EnumOptions")?,
            full_name,
            values,
            reserved_ranges: decl.reserved_ranges.clone(),
            reserved_names: decl.reserved_names.clone(),
        })
    }

    fn service(&self, scope: &str, decl: &ServiceDecl) -> Result<ServiceDescriptor, ProtoError> {
        let full_name = qualify(scope, &decl.name);
        let mut methods = Vec::with_capacity(decl.methods.len());
        for method in &decl.methods {
            methods.push(MethodDescriptor {
                name: method.name.clone(),
                input_type: self.resolve_message(&method.input_type, &full_name)?,
                output_type: self.resolve_message(&method.output_type, &full_name)?,
                client_streaming: method.client_streaming,
                server_streaming: method.server_streaming,
                options: self.options(&method.options, &full_name, "MethodOptions")?,
            });
        }
        Ok(ServiceDescriptor {
            name: decl.name.clone(),
            options: self.options(&decl.options, &full_name, "ServiceOptions")?,
            full_name,
            methods,
        })
    }

    /// Resolve option names. Custom options must extend `google.protobuf.<target>`.
    fn options(&self, decls: &[OptionDecl], scope: &str, target: &str) -> Result<Vec<OptionDescriptor>, ProtoError> {
        let expected = format!("google.protobuf.{target}");
        let mut out = Vec::with_capacity(decls.len());
        for decl in decls {
            let mut name = String::new();
            for (i, part) in decl.name.iter().enumerate() {
                if i > 0 {
                    name.push('.');
                }
                if !part.is_extension {
                    name.push_str(&part.name);
                    continue;
                }
                let (full, symbol) = self
                    .symbols
                    .resolve(&part.name, scope, Symbol::is_extension)
                    .ok_or_else(|| unresolved(&format!("({})", part.name), scope))?;
                if let (0, Symbol::Extension { extendee, scope: ext_scope }) = (i, symbol) {
                    let extended = self
                        .symbols
                        .resolve(extendee, ext_scope, Symbol::is_message)
                        .map(|(full, _)| full)
                        .ok_or_else(|| unresolved(extendee, ext_scope))?;
                    if extended != expected {
                        return Err(invalid(format!(
                            "option ({}) extends {extended}, not {expected}",
                            part.name
                        )));
                    }
                }
                name.push_str(&format!("(.{full})"));
            }
            out.push(OptionDescriptor {
                name,
                value: decl.value.clone(),
            });
        }
        Ok(out)
    }
}

fn validate_message(message: &MessageDescriptor) -> Result<(), ProtoError> {
    let mut numbers: HashMap<i32, &str> = HashMap::new();
    for field in &message.fields {
        if let Some(previous) = numbers.insert(field.number, &field.name) {
            return Err(invalid(format!(
                "fields '{previous}' and '{}' in {} share number {}",
                field.name, message.full_name, field.number
            )));
        }
        let number = i64::from(field.number);
        if in_ranges(&message.reserved_ranges, number) {
            return Err(invalid(format!(
                "field '{}' in {} uses reserved number {number}",
                field.name, message.full_name
            )));
        }
        if message.reserved_names.contains(&field.name) {
            return Err(invalid(format!(
                "field name '{}' is reserved in {}",
                field.name, message.full_name
            )));
        }
        if in_ranges(&message.extension_ranges, number) {
            return Err(invalid(format!(
                "field '{}' in {} uses number {number}, which is an extension range",
                field.name, message.full_name
            )));
        }
    }
    for (index, oneof) in message.oneofs.iter().enumerate() {
        if !oneof.synthetic && !message.fields.iter().any(|f| f.oneof_index == Some(index)) {
            return Err(invalid(format!(
                "oneof '{}' in {} has no fields",
                oneof.name, message.full_name
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn link_one(source: &str) -> Result<DescriptorGraph, ProtoError> {
        link("test.proto", source, &BTreeMap::new())
    }

    #[test]
    fn test_resolves_nested_and_relative_types() {
        let graph = link_one(
            r#"
            syntax = "proto3";
            package acme.orders;
            message Order {
              message Line { Money price = 1; }
              repeated Line lines = 1;
              Status status = 2;
            }
            message Money { int64 units = 1; }
            enum Status { UNKNOWN = 0; OPEN = 1; }
            "#,
        )
        .unwrap();
        let order = graph.find_message("acme.orders.Order").unwrap();
        assert_eq!(order.fields[0].type_name.as_deref(), Some(".acme.orders.Order.Line"));
        assert_eq!(order.fields[1].kind, FieldKind::Enum);
        let line = order.nested_message("Line").unwrap();
        assert_eq!(line.fields[0].type_name.as_deref(), Some(".acme.orders.Money"));
    }

    #[test]
    fn test_map_field_synthesizes_entry() {
        let graph = link_one(
            r#"syntax = "proto3"; message Bag { map<string, int32> item_counts = 1; }"#,
        )
        .unwrap();
        let bag = graph.find_message("Bag").unwrap();
        assert_eq!(bag.fields[0].label, Label::Repeated);
        assert_eq!(bag.fields[0].type_name.as_deref(), Some(".Bag.ItemCountsEntry"));
        let entry = bag.nested_message("ItemCountsEntry").unwrap();
        assert!(entry.map_entry);
        assert_eq!(entry.fields[0].kind, FieldKind::String);
        assert_eq!(entry.fields[1].kind, FieldKind::Int32);
    }

    #[test]
    fn test_proto3_optional_gets_synthetic_oneof() {
        let graph = link_one(r#"syntax = "proto3"; message M { optional string nick = 1; }"#).unwrap();
        let message = graph.find_message("M").unwrap();
        assert!(message.fields[0].proto3_optional);
        assert_eq!(message.fields[0].oneof_index, Some(0));
        assert!(message.oneofs[0].synthetic);
        assert_eq!(message.oneofs[0].name, "_nick");
    }

    #[test]
    fn test_validation_errors() {
        let cases = [
            r#"syntax = "proto3"; message M { required int32 a = 1; }"#,
            r#"syntax = "proto3"; message M { int32 a = 1; int32 b = 1; }"#,
            r#"syntax = "proto3"; message M { int32 a = 19500; }"#,
            r#"syntax = "proto3"; message M { reserved 3; int32 a = 3; }"#,
            r#"syntax = "proto3"; enum E { A = 1; }"#,
            r#"syntax = "proto3"; message M { map<double, int32> m = 1; }"#,
            r#"syntax = "proto2"; message M { int32 a = 1; }"#,
            r#"syntax = "proto3"; message M { int32 a = 1 [default = 5]; }"#,
        ];
        for source in cases {
            assert!(link_one(source).is_err(), "expected failure for {source}");
        }
    }

    #[test]
    fn test_duplicate_symbol() {
        let err = link_one(r#"syntax = "proto3"; message A {} message A {}"#).unwrap_err();
        assert_eq!(err, ProtoError::DuplicateSymbol("A".into()));
    }

    #[test]
    fn test_import_cycle() {
        let mut deps = BTreeMap::new();
        deps.insert("b.proto".to_string(), r#"import "a.proto";"#.to_string());
        deps.insert("a.proto".to_string(), r#"import "b.proto";"#.to_string());
        let err = link("root.proto", r#"import "a.proto";"#, &deps).unwrap_err();
        assert!(matches!(err, ProtoError::ImportCycle(_)));
    }

    #[test]
    fn test_custom_option_must_extend_matching_options() {
        let source = r#"
            syntax = "proto3";
            import "google/protobuf/descriptor.proto";
            extend google.protobuf.MessageOptions { string table = 50001; }
            message M { option (table) = "m"; string id = 1 [(table) = "nope"]; }
        "#;
        let err = link_one(source).unwrap_err();
        assert!(err.to_string().contains("FieldOptions"), "{err}");
    }

    #[test]
    fn test_map_entry_name() {
        assert_eq!(map_entry_name("item_counts"), "ItemCountsEntry");
        assert_eq!(map_entry_name("tags"), "TagsEntry");
    }
}
