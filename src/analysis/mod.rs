//! Dataflow analysis of method bodies.
//!
//! This module abstractly interprets a method body and records, for every reachable
//! instruction, the [`Frame`] before it. Each stack or local slot in a frame is an
//! [`AbstractValue`] carrying three facts at once:
//!
//! - the verifier-level kind of the value,
//! - the instructions that may have produced it,
//! - a literal, when one is statically known (including folded arithmetic and
//!   string concatenation).
//!
//! The instructions that consume a value are recorded in a shared [`UsageTable`], so
//! two values merged at a join see each other's consumers.
//!
//! # Architecture
//!
//! - [`Analyzer`] - worklist fixpoint producing [`Frames`]
//! - [`FrameCache`] - per-thread memoization keyed by method identity and revision
//! - [`Analysis`] - safety queries used by rewrite rules (relocation, in-place
//!   modification, spilling, literal lookup, scratch locals)
//!
//! # Usage
//!
//! ```rust,no_run
//! use dekotlin::analysis::{Analysis, FrameCache};
//! # fn demo(class: &dekotlin::ir::Class) -> dekotlin::Result<()> {
//! let cache = FrameCache::new();
//! for method in &class.methods {
//!     let analysis = Analysis::new(&cache, &class.name, method)?;
//!     if let Some(first) = method.instructions.get(0) {
//!         println!("scratch local: {}", analysis.next_free_local(first.id()));
//!     }
//! }
//! # Ok(())
//! # }
//! ```

mod analyzer;
mod cache;
mod folding;
mod frame;
mod interpreter;
mod query;
mod usages;
mod value;

pub(crate) use analyzer::required_locals;
pub use analyzer::{Analyzer, Frames};
pub use cache::FrameCache;
pub use folding::{java_double_to_string, java_float_to_string};
pub use frame::Frame;
pub use query::Analysis;
pub use usages::{UsageKey, UsageTable};
pub use value::{AbstractValue, BasicType, Constant, StringBuilderLiteral, ValueRef};
