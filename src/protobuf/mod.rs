//! Protobuf descriptor linking without an external compiler
//!
//! [`link`] parses a `.proto` source, loads its imports from a caller-supplied
//! map (falling back to the bundled well-known types), and produces a fully
//! resolved [`DescriptorGraph`]. [`render`] is the inverse: deterministic text
//! that links back to an equal graph, used as the canonical form for hashing.

pub mod ast;
pub mod descriptor;
mod lexer;
mod linker;
mod parser;
mod render;
pub mod well_known;

pub use descriptor::{
    DescriptorGraph, EnumDescriptor, FieldDescriptor, FieldKind, FileDescriptor, Label, MessageDescriptor,
    MethodDescriptor, OptionDescriptor, ServiceDescriptor, WireType,
};
pub use linker::link;
pub use parser::parse;
pub use render::{render, render_file};

use std::collections::BTreeMap;

use crate::error::ProtoError;

/// Link `source` and return its canonical text.
pub fn canonical_text(name: &str, source: &str, deps: &BTreeMap<String, String>) -> Result<String, ProtoError> {
    link(name, source, deps).map(|graph| render(&graph))
}

/// Import paths of `source` that must be satisfied by references.
pub fn required_imports(name: &str, source: &str) -> Result<Vec<String>, ProtoError> {
    Ok(parse(name, source)?
        .imports
        .into_iter()
        .map(|import| import.path)
        .filter(|path| !well_known::is_well_known(path))
        .collect())
}
