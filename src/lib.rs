// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]
#![deny(unsafe_code)]

//! # dekotlin
//!
//! Dataflow analysis and safe rewriting of JVM bytecode.
//!
//! `dekotlin` abstractly interprets method bodies to learn, for every instruction,
//! which instructions produced and which consume each value on the operand stack and in
//! the local variables. On top of that it answers the questions a bytecode rewriter has
//! to ask before touching code: where can a value be pushed or modified without
//! disturbing anybody else, which constant does a slot hold, which local is free. Edits
//! are collected and applied in batches, and calls into trusted helper namespaces can
//! be inlined transitively.
//!
//! ## Features
//!
//! - **Dataflow analysis** - per-instruction frames with producer and consumer sets,
//!   constant folding including string builders and concatenation helpers
//! - **Safety queries** - safe insertion and modification points, spill fallbacks
//! - **Batch editing** - edits keyed by instruction identity, applied in one pass
//! - **Inlining** - transitive inlining of trusted helpers with recursion detection
//! - **Class files and jars** - reading and writing classes, resolving them from classpaths
//! - **Parallel pipeline** - independent classes are processed concurrently
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use dekotlin::prelude::*;
//! use std::path::Path;
//!
//! let class = ClassReader::from_file(Path::new("build/Example.class"))?;
//! let method = class.method("main", "([Ljava/lang/String;)V").expect("main");
//!
//! let cache = FrameCache::new();
//! let analysis = Analysis::new(&cache, &class.name, method)?;
//! for insn in method.instructions.iter() {
//!     if let Some(value) = analysis.constant_at(insn.id(), 0) {
//!         println!("{} leaves {:?} on top of the stack", insn.id(), value);
//!     }
//! }
//! # Ok::<(), dekotlin::Error>(())
//! ```
//!
//! ## Architecture
//!
//! - [`ir`] - classes, methods, instructions and descriptors
//! - [`file`] - class file and jar input and output
//! - [`analysis`] - the dataflow analyzer and the safety query layer
//! - [`rewrite`] - the batch editor and the function inliner
//! - [`resolver`] - class lookup by name for the inliner
//! - [`engine`] - the class pipeline tying everything together
//! - [`prelude`] - convenient re-exports of commonly used types
//! - [`Error`] and [`Result`] - error handling

#[macro_use]
pub(crate) mod macros;

#[macro_use]
pub(crate) mod error;

/// Convenient re-exports of the most commonly used types and traits.
///
/// # Example
///
/// ```rust,no_run
/// use dekotlin::prelude::*;
///
/// let engine = Engine::new(EngineConfig::default());
/// let mut classes = vec![ClassReader::from_file("A.class".as_ref())?];
/// engine.process_classes(&mut classes)?;
/// # Ok::<(), dekotlin::Error>(())
/// ```
pub mod prelude;

/// In-memory model of classes, methods and instructions.
///
/// Every instruction carries a process-unique [`ir::InsnId`]; analysis results and
/// edit requests refer to instructions by this identity, never by position.
///
/// # Examples
///
/// ```rust
/// use dekotlin::ir::{opcodes::*, Insn, Method, MethodAccess};
///
/// let mut method = Method::new(MethodAccess::STATIC, "two", "()I");
/// method.instructions.push(Insn::simple(ICONST_2));
/// method.instructions.push(Insn::simple(IRETURN));
/// assert_eq!(method.signature(), "two()I");
/// ```
pub mod ir;

/// Reading and writing class files and jars.
pub mod file;

/// Abstract interpretation of method bodies and the queries built on it.
///
/// # Examples
///
/// ```rust
/// use dekotlin::analysis::{Analysis, Constant, FrameCache};
/// use dekotlin::ir::{opcodes::*, Insn, Method, MethodAccess};
///
/// let mut method = Method::new(MethodAccess::STATIC, "sum", "()I");
/// for opcode in [ICONST_2, ICONST_3, IADD, IRETURN] {
///     method.instructions.push(Insn::simple(opcode));
/// }
/// let ret = method.instructions.get(3).unwrap().id();
///
/// let cache = FrameCache::new();
/// let analysis = Analysis::new(&cache, "demo/Sum", &method)?;
/// assert_eq!(analysis.constant_at(ret, 0), Some(Constant::Int(5)));
/// # Ok::<(), dekotlin::Error>(())
/// ```
pub mod analysis;

/// Batch editing of instruction sequences and function inlining.
pub mod rewrite;

/// Class lookup for the inliner.
pub mod resolver;

/// The class processing pipeline.
pub mod engine;

/// `dekotlin` Result type
///
/// A type alias for [`std::result::Result<T, Error>`] where the error type is always [`Error`].
/// This is used consistently throughout the crate for all fallible operations.
///
/// # Examples
///
/// ```rust,no_run
/// use dekotlin::{file::ClassReader, ir::Class, Result};
///
/// fn load(path: &str) -> Result<Class> {
///     ClassReader::from_file(std::path::Path::new(path))
/// }
/// ```
pub type Result<T> = std::result::Result<T, Error>;

/// `dekotlin` Error type
///
/// The main error type for all operations in this crate. Provides detailed error
/// information for class file parsing, analysis and rewriting.
///
/// # Examples
///
/// ```rust,no_run
/// use dekotlin::{engine::Engine, file::ClassReader, Error};
///
/// let mut class = ClassReader::from_file("A.class".as_ref())?;
/// match Engine::default().process_class(&mut class) {
///     Ok(changed) => println!("changed: {}", changed),
///     Err(Error::Analysis { class, method, message }) => {
///         println!("{}.{} rejected: {}", class, method, message)
///     }
///     Err(e) => println!("Error: {}", e),
/// }
/// # Ok::<(), dekotlin::Error>(())
/// ```
pub use error::Error;

/// Low-level big-endian parsing of class file data.
///
/// # Example
///
/// ```rust
/// use dekotlin::Parser;
///
/// let data = [0xCA, 0xFE, 0xBA, 0xBE];
/// let mut parser = Parser::new(&data);
/// assert_eq!(parser.read_be::<u32>()?, 0xCAFE_BABE);
/// # Ok::<(), dekotlin::Error>(())
/// ```
pub use file::Parser;
