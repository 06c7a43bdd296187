//! Class file and archive input and output.
//!
//! This module turns the bytes of class files and jars into the model of
//! [`crate::ir`], and rewritten classes back into class files.
//!
//! # Key Components
//!
//! - [`ClassReader`] - parses one class file, decoding every method body into an
//!   instruction list with synthesised labels
//! - [`ClassWriter`] - encodes a class again, keeping its original constant pool and
//!   recomputing stack sizes and `StackMapTable` frames
//! - [`Archive`] / [`ArchiveEntry`] - the file entries of a jar, in stored order
//! - [`Parser`] - bounds-checked big-endian cursor used by the reader
//! - [`io`] - primitive big-endian reads
//!
//! # Examples
//!
//! ```rust,no_run
//! use dekotlin::file::{Archive, ClassReader};
//! use std::path::Path;
//!
//! let archive = Archive::open(Path::new("app.jar"))?;
//! for entry in archive.classes() {
//!     let class = ClassReader::parse(&entry.data)?;
//!     println!("{} ({} methods)", class.name, class.methods.len());
//! }
//! # Ok::<(), dekotlin::Error>(())
//! ```

mod archive;
mod code;
mod constpool;
pub mod io;
mod parser;
mod reader;
mod writer;

pub use archive::{Archive, ArchiveEntry};
pub use parser::Parser;
pub use reader::ClassReader;
pub use writer::ClassWriter;
