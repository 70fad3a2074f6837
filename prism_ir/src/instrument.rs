//! Branch coverage instrumentation.
//!
//! Every `If` that directly follows an `Infopoint` in a method selected by
//! the configured name filter gets a `BranchCounter` at the head of each
//! arm. Counters write into a shared table of flags owned by a
//! [`BranchInstrumentation`]; points are keyed by source position, so
//! recompiling the same method reuses the same slots.
//!
//! Collect the profile with [`BranchInstrumentation::report`] and start over
//! with [`BranchInstrumentation::reset`].

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use regex::Regex;
use rustc_hash::FxHashMap;
use tracing::{debug, warn};

use crate::error::CompileResult;
use crate::ir::{Graph, NodeId, NodeKind};
use crate::phases::Phase;
use crate::stamp::Stamp;

/// Default number of counter flags (two per point).
pub const DEFAULT_TABLE_SIZE: usize = 10_000;

// =============================================================================
// Configuration
// =============================================================================

#[derive(Debug, Clone)]
pub struct InstrumentationConfig {
    /// Matched against the whole graph name; `None` selects every method.
    pub method_filter: Option<Regex>,
    pub table_size: usize,
}

impl InstrumentationConfig {
    /// Instrument methods whose full name matches `pattern`.
    pub fn with_filter(pattern: &str) -> Result<Self, regex::Error> {
        Ok(InstrumentationConfig {
            method_filter: Some(Regex::new(&format!("^(?:{pattern})$"))?),
            table_size: DEFAULT_TABLE_SIZE,
        })
    }

    pub fn with_table_size(mut self, table_size: usize) -> Self {
        self.table_size = table_size;
        self
    }

    pub fn matches(&self, method_name: &str) -> bool {
        self.method_filter
            .as_ref()
            .map_or(true, |filter| filter.is_match(method_name))
    }
}

impl Default for InstrumentationConfig {
    fn default() -> Self {
        InstrumentationConfig {
            method_filter: None,
            table_size: DEFAULT_TABLE_SIZE,
        }
    }
}

// =============================================================================
// Branch State
// =============================================================================

/// Which arms of an instrumented branch have executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BranchState {
    None,
    If,
    Else,
    Both,
}

impl BranchState {
    pub fn from_visits(if_visited: bool, else_visited: bool) -> Self {
        match (if_visited, else_visited) {
            (true, true) => BranchState::Both,
            (true, false) => BranchState::If,
            (false, true) => BranchState::Else,
            (false, false) => BranchState::None,
        }
    }
}

impl fmt::Display for BranchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BranchState::None => "NONE",
            BranchState::If => "IF",
            BranchState::Else => "ELSE",
            BranchState::Both => "BOTH",
        })
    }
}

/// An instrumented branch: owns table slots `2 * index` (true arm) and
/// `2 * index + 1` (false arm).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BranchPoint {
    index: u32,
}

impl BranchPoint {
    #[inline]
    pub fn index(&self) -> u32 {
        self.index
    }

    #[inline]
    pub fn raw_index(&self, taken: bool) -> u32 {
        if taken {
            self.index * 2
        } else {
            self.index * 2 + 1
        }
    }
}

// =============================================================================
// Counter Table
// =============================================================================

#[derive(Default)]
struct Points {
    by_key: FxHashMap<String, BranchPoint>,
    /// Keys in creation order, for reporting.
    order: Vec<String>,
}

/// Counter table plus the position-to-point mapping.
pub struct BranchInstrumentation {
    table: Box<[AtomicBool]>,
    points: Mutex<Points>,
}

impl BranchInstrumentation {
    pub fn new(table_size: usize) -> Self {
        BranchInstrumentation {
            table: (0..table_size).map(|_| AtomicBool::new(false)).collect(),
            points: Mutex::new(Points::default()),
        }
    }

    pub fn table_size(&self) -> usize {
        self.table.len()
    }

    /// The point for `key`, allocated on first use. `None` once the table
    /// has no room for another pair of slots.
    pub fn point(&self, key: &str) -> Option<BranchPoint> {
        let mut points = self.points.lock();
        if let Some(&p) = points.by_key.get(key) {
            return Some(p);
        }
        let index = points.order.len();
        if index * 2 + 1 >= self.table.len() {
            return None;
        }
        let point = BranchPoint { index: index as u32 };
        points.by_key.insert(key.to_string(), point);
        points.order.push(key.to_string());
        Some(point)
    }

    pub fn point_count(&self) -> usize {
        self.points.lock().order.len()
    }

    /// Mark table slot `raw_index` as visited.
    pub fn hit(&self, raw_index: u32) {
        if let Some(flag) = self.table.get(raw_index as usize) {
            flag.store(true, Ordering::Relaxed);
        }
    }

    pub fn state(&self, point: BranchPoint) -> BranchState {
        let visited = |raw: u32| {
            self.table
                .get(raw as usize)
                .is_some_and(|f| f.load(Ordering::Relaxed))
        };
        BranchState::from_visits(visited(point.raw_index(true)), visited(point.raw_index(false)))
    }

    /// State of the point registered for `key`, if any.
    pub fn state_of(&self, key: &str) -> Option<BranchState> {
        let point = self.points.lock().by_key.get(key).copied()?;
        Some(self.state(point))
    }

    /// All points with their current state, in creation order.
    pub fn snapshot(&self) -> Vec<(String, BranchPoint, BranchState)> {
        let points = self.points.lock();
        points
            .order
            .iter()
            .filter_map(|key| {
                let p = *points.by_key.get(key)?;
                Some((key.clone(), p, self.state(p)))
            })
            .collect()
    }

    /// Forget all points and clear every counter.
    pub fn reset(&self) {
        let mut points = self.points.lock();
        points.by_key.clear();
        points.order.clear();
        for flag in self.table.iter() {
            flag.store(false, Ordering::Relaxed);
        }
    }

    /// Human-readable profile of every point.
    pub fn report(&self) -> BranchProfileReport {
        BranchProfileReport {
            entries: self.snapshot(),
        }
    }
}

impl Default for BranchInstrumentation {
    fn default() -> Self {
        Self::new(DEFAULT_TABLE_SIZE)
    }
}

impl fmt::Debug for BranchInstrumentation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BranchInstrumentation")
            .field("table_size", &self.table.len())
            .field("points", &self.point_count())
            .finish()
    }
}

/// Rendered by [`BranchInstrumentation::report`].
#[derive(Debug, Clone)]
pub struct BranchProfileReport {
    pub entries: Vec<(String, BranchPoint, BranchState)>,
}

impl fmt::Display for BranchProfileReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Branch execution profile")?;
        writeln!(f, "========================")?;
        for (key, point, state) in &self.entries {
            writeln!(f, "{key}: [{}] state = {state}", point.index())?;
        }
        Ok(())
    }
}

// =============================================================================
// Phase
// =============================================================================

/// Position key of an `If`, taken from the infopoint right before it.
/// Branches without one are synthetic and stay uninstrumented.
fn position_key(graph: &Graph, if_node: NodeId) -> Option<String> {
    let pred = graph.predecessor(if_node)?;
    match graph.kind(pred) {
        NodeKind::Infopoint { bci } => Some(format!("{}@{}", graph.name(), bci)),
        _ => None,
    }
}

fn insert_counter(graph: &mut Graph, begin: NodeId, raw_index: u32) -> bool {
    if let Some(next) = graph.next(begin) {
        if graph.kind(next) == &(NodeKind::BranchCounter { index: raw_index }) {
            return false;
        }
    }
    let counter = graph.add_node(NodeKind::BranchCounter { index: raw_index }, &[], Stamp::Void);
    graph.insert_after(begin, counter);
    true
}

/// Instrument `graph` if its name passes the filter. Returns the number of
/// branches that received counters.
pub fn instrument_branches(
    graph: &mut Graph,
    config: &InstrumentationConfig,
    instrumentation: &BranchInstrumentation,
) -> usize {
    if !config.matches(graph.name()) {
        return 0;
    }
    let mut instrumented = 0;
    for if_node in graph.find_all(|k| matches!(k, NodeKind::If)) {
        let Some(key) = position_key(graph, if_node) else {
            continue;
        };
        let Some(point) = instrumentation.point(&key) else {
            warn!(%key, "branch counter table is full");
            break;
        };
        let arms = graph.successors(if_node).to_vec();
        let [true_begin, false_begin] = arms[..] else {
            continue;
        };
        let added_true = insert_counter(graph, true_begin, point.raw_index(true));
        let added_false = insert_counter(graph, false_begin, point.raw_index(false));
        if added_true || added_false {
            debug!(%key, index = point.index(), "instrumented branch");
            instrumented += 1;
        }
    }
    instrumented
}

/// [`instrument_branches`] as a pipeline phase.
pub struct InstrumentBranchesPhase {
    config: InstrumentationConfig,
    instrumentation: Arc<BranchInstrumentation>,
}

impl InstrumentBranchesPhase {
    pub fn new(config: InstrumentationConfig, instrumentation: Arc<BranchInstrumentation>) -> Self {
        InstrumentBranchesPhase {
            config,
            instrumentation,
        }
    }
}

impl Phase for InstrumentBranchesPhase {
    fn name(&self) -> &'static str {
        "InstrumentBranches"
    }

    fn run(&mut self, graph: &mut Graph) -> CompileResult<bool> {
        let count = instrument_branches(graph, &self.config, &self.instrumentation);
        if count > 0 {
            graph.verify()?;
        }
        Ok(count > 0)
    }
}
