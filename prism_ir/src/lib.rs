//! Optimizing-compiler IR substrate for Prism.
//!
//! This crate provides:
//! - Sea-of-Nodes graph with hash-consing and fixed control chains
//! - Stamp lattice (integer ranges and known bits, object type facts)
//! - Worklist canonicalizer with per-kind rewrite rules
//! - Guards, deoptimization signals and class-hierarchy assumptions
//! - Type-check lowering with profile-driven speculation
//! - Greedy, profile-driven inlining with a decision trace
//! - Branch instrumentation, a reference interpreter and a phase pipeline

#![deny(unsafe_op_in_unsafe_fn)]

pub mod assume;
pub mod canon;
pub mod compile;
pub mod deopt;
pub mod error;
pub mod inline;
pub mod instrument;
pub mod interp;
pub mod ir;
pub mod lower;
pub mod phases;
pub mod profile;
pub mod stamp;
pub mod types;

// Re-export commonly used items
pub use compile::{CompilationOutcome, Compiler, CompilerConfig};
pub use error::{CompileError, CompileResult};
pub use ir::{Graph, GraphBuilder, NodeId, NodeKind};
pub use stamp::{ObjectStamp, Stamp};
pub use types::{MethodId, TypeHierarchy, TypeId, TypeResolver};
