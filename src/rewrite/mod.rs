//! Rewriting of method bodies.
//!
//! - [`EditBatch`] / [`rewrite`] - the single mutation primitive for instruction
//!   sequences
//! - [`FunctionInliner`] - splices trusted library methods into their callers

mod editor;
mod inliner;

pub use editor::{rewrite, EditBatch, EditCursor, EditKind};
pub use inliner::{FunctionInliner, InlineSkip, TrustPolicy};
