//! Inlining decision trace.

use std::fmt;

use super::policy::{InliningDecision, InliningRule};
use crate::types::MethodId;

/// One evaluated call site.
#[derive(Debug, Clone, PartialEq)]
pub struct InliningDecisionRecord {
    pub callee: MethodId,
    pub callee_name: String,
    pub depth: usize,
    pub fully_processed: bool,
    pub inlined: bool,
    pub rule: InliningRule,
    pub relevance: f64,
    pub probability: f64,
    pub bonus: f64,
    pub nodes: usize,
    pub value: Option<f64>,
}

impl fmt::Display for InliningDecisionRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verdict = if self.inlined { "inlining" } else { "not inlining" };
        write!(
            f,
            "{verdict} {} ({}) depth={}{}: {} (relevance={:.6}, probability={:.6}, bonus={:.6}, nodes={}",
            self.callee_name,
            self.callee,
            self.depth,
            if self.fully_processed { " explored" } else { "" },
            self.rule.description(),
            self.relevance,
            self.probability,
            self.bonus,
            self.nodes,
        )?;
        match (self.rule, self.value) {
            (InliningRule::RelevanceBased, Some(max)) => {
                let cmp = if self.inlined { "<=" } else { ">" };
                write!(f, " {cmp} {max:.6}")?;
            }
            (InliningRule::TooLargeLowLevelGraph, Some(size)) => write!(f, ", low-level-nodes={size}")?,
            (InliningRule::InvokeProbabilityTooHigh, Some(p)) => write!(f, ", invokeP={p:.6}")?,
            _ => {}
        }
        f.write_str(")")
    }
}

/// Ordered log of every decision made in one inlining run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InliningTrace {
    records: Vec<InliningDecisionRecord>,
    cut_off: bool,
}

impl InliningTrace {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&mut self, record: InliningDecisionRecord) {
        tracing::debug!(%record, "inlining decision");
        self.records.push(record);
    }

    pub(crate) fn mark_cut_off(&mut self) {
        self.cut_off = true;
    }

    pub fn records(&self) -> &[InliningDecisionRecord] {
        &self.records
    }

    /// Whether the run stopped at the maximum desired graph size.
    pub fn was_cut_off(&self) -> bool {
        self.cut_off
    }

    pub fn inlined(&self) -> impl Iterator<Item = &InliningDecisionRecord> {
        self.records.iter().filter(|r| r.inlined)
    }

    /// The final record for each site decided by `rule`.
    pub fn by_rule(&self, rule: InliningRule) -> impl Iterator<Item = &InliningDecisionRecord> {
        self.records.iter().filter(move |r| r.rule == rule)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl fmt::Display for InliningTrace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for record in &self.records {
            writeln!(f, "{record}")?;
        }
        if self.cut_off {
            writeln!(f, "{}", InliningRule::MaximumDesiredSize.description())?;
        }
        Ok(())
    }
}

impl InliningDecisionRecord {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn from_decision(
        callee: MethodId,
        callee_name: &str,
        depth: usize,
        fully_processed: bool,
        decision: &InliningDecision,
        relevance: f64,
        probability: f64,
        nodes: usize,
    ) -> Self {
        InliningDecisionRecord {
            callee,
            callee_name: callee_name.to_string(),
            depth,
            fully_processed,
            inlined: decision.inline,
            rule: decision.rule,
            relevance,
            probability,
            bonus: decision.bonus,
            nodes,
            value: decision.value,
        }
    }
}
