//! Deterministic `.proto` text for a linked file
//!
//! All type references are written fully qualified, so the output links back
//! to the same descriptors without needing the original scoping context.

use std::fmt::Write as _;

use super::ast::{ImportKind, NumberRange, OptionValue, Syntax};
use super::descriptor::{
    DescriptorGraph, EnumDescriptor, FieldDescriptor, FileDescriptor, Label, MessageDescriptor, OptionDescriptor,
    ServiceDescriptor,
};

/// Canonical text of the root file of `graph`
pub fn render(graph: &DescriptorGraph) -> String {
    render_file(&graph.file)
}

pub fn render_file(file: &FileDescriptor) -> String {
    let mut printer = Printer {
        out: String::new(),
        indent: 0,
        syntax: file.syntax,
    };
    printer.file(file);
    printer.out
}

struct Printer {
    out: String,
    indent: usize,
    syntax: Syntax,
}

impl Printer {
    fn line(&mut self, text: &str) {
        for _ in 0..self.indent {
            self.out.push_str("  ");
        }
        self.out.push_str(text);
        self.out.push('\n');
    }

    fn blank(&mut self) {
        if !self.out.is_empty() && !self.out.ends_with("\n\n") {
            self.out.push('\n');
        }
    }

    fn file(&mut self, file: &FileDescriptor) {
        self.line(&format!("syntax = \"{}\";", file.syntax.as_str()));
        if let Some(package) = &file.package {
            self.blank();
            self.line(&format!("package {package};"));
        }
        if !file.dependencies.is_empty() {
            self.blank();
            for dependency in &file.dependencies {
                let modifier = match dependency.kind {
                    ImportKind::Default => "",
                    ImportKind::Public => "public ",
                    ImportKind::Weak => "weak ",
                };
                self.line(&format!("import {modifier}{};", quote(&dependency.path)));
            }
        }
        if !file.options.is_empty() {
            self.blank();
            self.option_statements(&file.options);
        }
        for message in &file.messages {
            self.blank();
            self.message(message);
        }
        for decl in &file.enums {
            self.blank();
            self.enumeration(decl);
        }
        for service in &file.services {
            self.blank();
            self.service(service);
        }
        if !file.extensions.is_empty() {
            self.blank();
            self.extensions(&file.extensions);
        }
    }

    fn option_statements(&mut self, options: &[OptionDescriptor]) {
        for option in options {
            self.line(&format!("option {} = {};", option.name, value(&option.value)));
        }
    }

    fn message(&mut self, message: &MessageDescriptor) {
        self.line(&format!("message {} {{", message.name));
        self.indent += 1;
        self.option_statements(&message.options);

        let mut rendered_oneofs = Vec::new();
        for field in &message.fields {
            match field.oneof_index {
                Some(index) if !message.oneofs[index].synthetic => {
                    if rendered_oneofs.contains(&index) {
                        continue;
                    }
                    rendered_oneofs.push(index);
                    let oneof = &message.oneofs[index];
                    self.line(&format!("oneof {} {{", oneof.name));
                    self.indent += 1;
                    self.option_statements(&oneof.options);
                    for member in message.fields.iter().filter(|f| f.oneof_index == Some(index)) {
                        self.field(member, Some(message), true);
                    }
                    self.indent -= 1;
                    self.line("}");
                }
                _ => self.field(field, Some(message), false),
            }
        }

        for nested in message.nested_messages.iter().filter(|m| !m.map_entry) {
            self.message(nested);
        }
        for nested in &message.nested_enums {
            self.enumeration(nested);
        }
        if !message.extensions.is_empty() {
            self.extensions(&message.extensions);
        }
        self.reserved(&message.reserved_ranges, &message.reserved_names);
        if !message.extension_ranges.is_empty() {
            self.line(&format!("extensions {};", ranges(&message.extension_ranges)));
        }
        self.indent -= 1;
        self.line("}");
    }

    fn field(&mut self, field: &FieldDescriptor, parent: Option<&MessageDescriptor>, in_oneof: bool) {
        let map_entry = parent.and_then(|p| {
            p.nested_messages
                .iter()
                .find(|m| m.map_entry && field.type_name.as_deref() == Some(format!(".{}", m.full_name).as_str()))
        });

        let mut text = String::new();
        match map_entry {
            Some(entry) => {
                let key = entry.field_by_number(1).map(type_of).unwrap_or_default();
                let value = entry.field_by_number(2).map(type_of).unwrap_or_default();
                let _ = write!(text, "map<{key}, {value}>");
            }
            None => {
                if !in_oneof {
                    text.push_str(self.label(field));
                }
                text.push_str(&type_of(field));
            }
        }
        let _ = write!(text, " {} = {}", field.name, field.number);

        let mut bracketed = Vec::new();
        if let Some(default) = &field.default_value {
            bracketed.push(format!("default = {}", value(default)));
        }
        if let Some(json_name) = &field.json_name {
            bracketed.push(format!("json_name = {}", quote(json_name)));
        }
        for option in &field.options {
            bracketed.push(format!("{} = {}", option.name, value(&option.value)));
        }
        if !bracketed.is_empty() {
            let _ = write!(text, " [{}]", bracketed.join(", "));
        }
        text.push(';');
        self.line(&text);
    }

    fn label(&self, field: &FieldDescriptor) -> &'static str {
        match (self.syntax, field.label) {
            (_, Label::Repeated) => "repeated ",
            (Syntax::Proto2, Label::Required) => "required ",
            (Syntax::Proto2, Label::Optional) => "optional ",
            (Syntax::Proto3, Label::Optional) if field.proto3_optional => "optional ",
            _ => "",
        }
    }

    fn extensions(&mut self, extensions: &[FieldDescriptor]) {
        let mut start = 0;
        while start < extensions.len() {
            let extendee = extensions[start].extendee.clone().unwrap_or_default();
            let end = extensions[start..]
                .iter()
                .position(|f| f.extendee.as_deref() != Some(extendee.as_str()))
                .map_or(extensions.len(), |offset| start + offset);
            self.line(&format!("extend {extendee} {{"));
            self.indent += 1;
            for field in &extensions[start..end] {
                self.field(field, None, false);
            }
            self.indent -= 1;
            self.line("}");
            start = end;
        }
    }

    fn reserved(&mut self, numbers: &[NumberRange], names: &[String]) {
        if !numbers.is_empty() {
            self.line(&format!("reserved {};", ranges(numbers)));
        }
        if !names.is_empty() {
            let names: Vec<String> = names.iter().map(|n| quote(n)).collect();
            self.line(&format!("reserved {};", names.join(", ")));
        }
    }

    fn enumeration(&mut self, decl: &EnumDescriptor) {
        self.line(&format!("enum {} {{", decl.name));
        self.indent += 1;
        self.option_statements(&decl.options);
        for entry in &decl.values {
            let mut text = format!("{} = {}", entry.name, entry.number);
            if !entry.options.is_empty() {
                let options: Vec<String> = entry
                    .options
                    .iter()
                    .map(|o| format!("{} = {}", o.name, value(&o.value)))
                    .collect();
                let _ = write!(text, " [{}]", options.join(", "));
            }
            text.push(';');
            self.line(&text);
        }
        self.reserved(&decl.reserved_ranges, &decl.reserved_names);
        self.indent -= 1;
        self.line("}");
    }

    fn service(&mut self, service: &ServiceDescriptor) {
        self.line(&format!("service {} {{", service.name));
        self.indent += 1;
        self.option_statements(&service.options);
        for method in &service.methods {
            let signature = format!(
                "rpc {} ({}{}) returns ({}{})",
                method.name,
                if method.client_streaming { "stream " } else { "" },
                method.input_type,
                if method.server_streaming { "stream " } else { "" },
                method.output_type,
            );
            if method.options.is_empty() {
                self.line(&format!("{signature};"));
            } else {
                self.line(&format!("{signature} {{"));
                self.indent += 1;
                self.option_statements(&method.options);
                self.indent -= 1;
                self.line("}");
            }
        }
        self.indent -= 1;
        self.line("}");
    }
}

fn type_of(field: &FieldDescriptor) -> String {
    field
        .kind
        .keyword()
        .map(str::to_string)
        .or_else(|| field.type_name.clone())
        .unwrap_or_default()
}

fn ranges(ranges: &[NumberRange]) -> String {
    ranges
        .iter()
        .map(|r| match (r.start, r.end) {
            (start, end) if start == end => start.to_string(),
            (start, i64::MAX) => format!("{start} to max"),
            (start, end) => format!("{start} to {end}"),
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// Text-format rendering of an option or default value
pub(crate) fn value(option: &OptionValue) -> String {
    match option {
        OptionValue::Bool(b) => b.to_string(),
        OptionValue::Int(i) => i.to_string(),
        OptionValue::Float(f) => float(*f),
        OptionValue::Str(s) => quote(s),
        OptionValue::Ident(ident) => ident.clone(),
        OptionValue::Message(entries) if entries.is_empty() => "{}".to_string(),
        OptionValue::Message(entries) => {
            let body: Vec<String> = entries.iter().map(|(k, v)| format!("{k}: {}", value(v))).collect();
            format!("{{ {} }}", body.join(" "))
        }
        OptionValue::List(items) => {
            let items: Vec<String> = items.iter().map(value).collect();
            format!("[{}]", items.join(", "))
        }
    }
}

fn float(f: f64) -> String {
    let text = f.to_string();
    if f.is_finite() && !text.contains(['.', 'e', 'E']) {
        format!("{text}.0")
    } else {
        text
    }
}

fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 || c == '\u{7f}' => {
                let _ = write!(out, "\\{:03o}", c as u32);
            }
            c => out.push(c),
        }
    }
    out.push('"');
    out
}
