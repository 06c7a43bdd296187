//! In-memory model of classes and method bodies.
//!
//! The model mirrors the tree representation bytecode tools commonly use: a [`Class`]
//! owns its [`Method`]s, a method owns an [`InsnList`] of [`Insn`] nodes, and labels
//! stand in for code positions. The analyzer in [`crate::analysis`] and the rewriters in
//! [`crate::rewrite`] operate on this model; [`crate::file`] produces it from class files.
//!
//! # Key Components
//!
//! - [`opcodes`] - opcode constants and mnemonics
//! - [`Type`] / [`MethodDescriptor`] - descriptor parsing and slot sizes
//! - [`Insn`] / [`InsnKind`] / [`InsnList`] - instructions and sequences
//! - [`Method`] / [`Class`] - owners of instruction sequences
//! - [`MethodListing`] - disassembly for diagnostics

mod class;
mod disasm;
mod insn;
mod method;
pub mod opcodes;
mod types;

pub use class::{Annotation, Attribute, Class, ClassAccess, ClassSource, Field, FieldAccess};
pub use disasm::MethodListing;
pub use insn::{Handle, Insn, InsnId, InsnKind, InsnList, LabelId, LdcValue};
pub use method::{LocalVariable, Method, MethodAccess, MethodId, TryCatchBlock};
pub use types::{MethodDescriptor, Type};
