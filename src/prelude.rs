//! # dekotlin Prelude
//!
//! This module provides a convenient prelude for the most commonly used types and traits
//! from the dekotlin library. Import this module to get quick access to the essential
//! types for analyzing and rewriting bytecode.

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all dekotlin operations
pub use crate::Error;

/// The result type used throughout dekotlin
pub use crate::Result;

// ================================================================================================
// Class Model
// ================================================================================================

/// Classes, methods and instructions
pub use crate::ir::{
    Class, Insn, InsnId, InsnKind, InsnList, LabelId, Method, MethodAccess, MethodListing, Type,
};

// ================================================================================================
// Input
// ================================================================================================

/// Class file and jar input
pub use crate::file::{Archive, ClassReader, ClassWriter, Parser};

// ================================================================================================
// Analysis
// ================================================================================================

/// Dataflow analysis and safety queries
pub use crate::analysis::{Analysis, Analyzer, Constant, FrameCache, Frames};

// ================================================================================================
// Rewriting
// ================================================================================================

/// Batch editing and inlining
pub use crate::rewrite::{rewrite, EditBatch, FunctionInliner, TrustPolicy};

/// Class lookup
pub use crate::resolver::{ClassResolver, MemoryResolver, ResolverChain};

/// The class pipeline
pub use crate::engine::{ClassPass, Engine, EngineConfig};
