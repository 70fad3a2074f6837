//! Compiler errors.
//!
//! Errors stop the current compilation only. The caller falls back to
//! interpreting the method; see [`CompilationOutcome`](crate::compile::CompilationOutcome).

use thiserror::Error;

use crate::assume::Assumption;
use crate::ir::NodeId;
use crate::types::MethodId;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    /// A structural invariant of the graph does not hold.
    #[error("malformed graph at {node}: {reason}")]
    MalformedGraph { node: NodeId, reason: String },

    /// A reachable value node carries an impossible stamp.
    #[error("contradictory stamp on reachable node {node}")]
    ContradictoryStamp { node: NodeId },

    /// The canonicalizer kept finding rewrites past its iteration budget.
    #[error("canonicalization did not converge within {iterations} iterations")]
    CanonicalizationDiverged { iterations: usize },

    /// An assumption the compilation relied on broke before installation.
    #[error("assumption invalidated during compilation: {0}")]
    AssumptionInvalidated(Assumption),

    #[error("no graph available for method {0}")]
    UnknownMethod(MethodId),

    /// A deoptimization asked never to compile this method again.
    #[error("method {0} is not compilable")]
    NotCompilable(MethodId),
}

impl CompileError {
    pub(crate) fn malformed(node: NodeId, reason: impl Into<String>) -> Self {
        CompileError::MalformedGraph {
            node,
            reason: reason.into(),
        }
    }
}

pub type CompileResult<T> = Result<T, CompileError>;
