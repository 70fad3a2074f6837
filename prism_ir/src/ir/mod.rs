//! Sea-of-nodes intermediate representation.
//!
//! - [`arena`]: typed ids and dense storage
//! - [`node`]: node kinds, capabilities and per-node storage
//! - [`graph`]: the graph with use lists, hash-consing and control editing
//! - [`builder`]: cursor-based construction for front ends and tests
//! - `verify`: structural checks, exposed as [`Graph::verify`]

pub mod arena;
pub mod builder;
pub mod graph;
pub mod node;
mod verify;

pub use arena::{Arena, BitSet, Id, SecondaryMap};
pub use builder::GraphBuilder;
pub use graph::{Graph, TypeCheckResolution};
pub use node::{
    BinaryOp, Capabilities, CompareOp, Constant, InputList, Node, NodeFlags, NodeId, NodeKind, SuccessorList,
};
