//! Sea-of-nodes graph.
//!
//! The graph owns all nodes of one compilation unit and keeps the def/use
//! relation in both directions: every node lists its inputs, and the graph
//! keeps a user list per node with one entry per input edge.
//!
//! # Structure
//!
//! - **Fixed nodes** form control chains through `successors`/`predecessor`
//!   edges, starting at the unique `Start` node. `If` splits a chain into two
//!   `Begin`-headed arms; arms rejoin through `End` nodes listed as inputs of
//!   a `Merge`.
//! - **Floating nodes** are ordered only by their data inputs. Pure floating
//!   nodes are hash-consed: at most one live node exists per
//!   `(kind, inputs)` pair.
//!
//! Dead nodes stay in the arena flagged [`NodeFlags::DEAD`], so node ids are
//! stable for the whole compilation.

use std::fmt;

use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;

use super::arena::{Arena, SecondaryMap};
use super::node::{Capabilities, Constant, InputList, Node, NodeFlags, NodeId, NodeKind, SuccessorList};
use crate::assume::Assumptions;
use crate::profile::{CallSiteProfile, ProfileSite, TypeProfile};
use crate::stamp::{fold_stamp, Stamp};
use crate::types::{MethodId, TypeResolver};

type UserList = SmallVec<[NodeId; 4]>;

// =============================================================================
// Type Check Resolution
// =============================================================================

/// How a type-check site of the source program was finally implemented.
///
/// Resolution only moves forward: once a site leaves `Unresolved` it keeps
/// its first resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeCheckResolution {
    Unresolved,
    /// Answered from stamps and the current hierarchy alone.
    ResolvedStatic,
    /// Answered under an assumption recorded on the graph.
    ResolvedSpeculative,
    /// Emitted as a full runtime subtype test.
    RuntimeChecked,
}

// =============================================================================
// Graph
// =============================================================================

/// A sea-of-nodes graph for one method.
#[derive(Clone)]
pub struct Graph {
    nodes: Arena<Node>,
    users: SecondaryMap<Node, UserList>,
    value_numbers: FxHashMap<(NodeKind, InputList), NodeId>,
    start: NodeId,
    method: MethodId,
    name: String,
    live: usize,
    assumptions: Assumptions,
    call_profiles: FxHashMap<NodeId, CallSiteProfile>,
    type_profiles: FxHashMap<NodeId, (ProfileSite, TypeProfile)>,
    resolutions: FxHashMap<NodeId, TypeCheckResolution>,
    /// Nodes touched since the last `take_changes`, when tracking is on.
    changes: Option<Vec<NodeId>>,
}

impl Graph {
    /// Create a graph containing only its `Start` node.
    pub fn new(method: MethodId, name: impl Into<String>) -> Self {
        let mut nodes = Arena::with_capacity(64);
        let start = nodes.alloc(Node::new(NodeKind::Start, InputList::new(), Stamp::Void));
        Graph {
            nodes,
            users: SecondaryMap::new(),
            value_numbers: FxHashMap::default(),
            start,
            method,
            name: name.into(),
            live: 1,
            assumptions: Assumptions::new(true),
            call_profiles: FxHashMap::default(),
            type_profiles: FxHashMap::default(),
            resolutions: FxHashMap::default(),
            changes: None,
        }
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    #[inline]
    pub fn start(&self) -> NodeId {
        self.start
    }

    #[inline]
    pub fn method(&self) -> MethodId {
        self.method
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id]
    }

    #[inline]
    pub fn kind(&self, id: NodeId) -> &NodeKind {
        &self.nodes[id].kind
    }

    #[inline]
    pub fn stamp(&self, id: NodeId) -> &Stamp {
        &self.nodes[id].stamp
    }

    #[inline]
    pub fn inputs(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id].inputs
    }

    #[inline]
    pub fn input(&self, id: NodeId, index: usize) -> Option<NodeId> {
        self.nodes[id].inputs.get(index).copied()
    }

    /// Users of `id`, one entry per input edge.
    #[inline]
    pub fn users(&self, id: NodeId) -> &[NodeId] {
        self.users.get(id).map_or(&[], |u| u.as_slice())
    }

    #[inline]
    pub fn is_alive(&self, id: NodeId) -> bool {
        self.nodes.get(id).is_some_and(|n| !n.is_dead())
    }

    /// Number of live nodes.
    #[inline]
    pub fn live_node_count(&self) -> usize {
        self.live
    }

    /// Number of ids ever handed out, dead nodes included.
    #[inline]
    pub fn id_bound(&self) -> usize {
        self.nodes.len()
    }

    /// Live node ids in creation order.
    pub fn live_ids(&self) -> Vec<NodeId> {
        self.nodes
            .iter()
            .filter(|(_, n)| !n.is_dead())
            .map(|(id, _)| id)
            .collect()
    }

    /// Live nodes whose kind satisfies `pred`, in creation order.
    pub fn find_all(&self, pred: impl Fn(&NodeKind) -> bool) -> Vec<NodeId> {
        self.nodes
            .iter()
            .filter(|(_, n)| !n.is_dead() && pred(&n.kind))
            .map(|(id, _)| id)
            .collect()
    }

    pub fn count(&self, pred: impl Fn(&NodeKind) -> bool) -> usize {
        self.nodes
            .iter()
            .filter(|(_, n)| !n.is_dead() && pred(&n.kind))
            .count()
    }

    /// Parameter nodes ordered by index.
    pub fn parameters(&self) -> Vec<NodeId> {
        let mut params = self.find_all(|k| matches!(k, NodeKind::Parameter { .. }));
        params.sort_by_key(|&p| match self.kind(p) {
            NodeKind::Parameter { index } => *index,
            _ => u16::MAX,
        });
        params
    }

    pub fn invokes(&self) -> Vec<NodeId> {
        self.find_all(|k| matches!(k, NodeKind::Invoke { .. }))
    }

    pub fn returns(&self) -> Vec<NodeId> {
        self.find_all(|k| matches!(k, NodeKind::Return))
    }

    /// Whether executing `id` can transfer control to the interpreter or
    /// raise a runtime fault.
    pub fn may_deoptimize(&self, id: NodeId) -> bool {
        let node = &self.nodes[id];
        if node.capabilities().contains(Capabilities::DEOPTIMIZES) {
            return true;
        }
        match node.kind {
            NodeKind::IntegerDiv | NodeKind::IntegerRem => node
                .inputs
                .get(1)
                .and_then(|&y| self.stamp(y).as_integer())
                .map_or(true, |s| s.contains(0)),
            NodeKind::Invoke { .. } => true,
            _ => false,
        }
    }

    // =========================================================================
    // Change Tracking
    // =========================================================================

    /// Start or stop recording which nodes are added or have their edges
    /// edited.
    pub fn track_changes(&mut self, enabled: bool) {
        self.changes = enabled.then(Vec::new);
    }

    /// Drain the nodes recorded since the previous call.
    pub fn take_changes(&mut self) -> Vec<NodeId> {
        match &mut self.changes {
            Some(changes) => std::mem::take(changes),
            None => Vec::new(),
        }
    }

    #[inline]
    fn note(&mut self, id: NodeId) {
        if let Some(changes) = &mut self.changes {
            changes.push(id);
        }
    }

    // =========================================================================
    // Node Creation
    // =========================================================================

    /// Add a node without value numbering.
    pub fn add_node(&mut self, kind: NodeKind, inputs: &[NodeId], stamp: Stamp) -> NodeId {
        let inputs: InputList = inputs.iter().copied().collect();
        let id = self.nodes.alloc(Node::new(kind, inputs, stamp));
        for i in 0..self.nodes[id].inputs.len() {
            let def = self.nodes[id].inputs[i];
            self.add_use(def, id);
        }
        self.live += 1;
        self.note(id);
        id
    }

    /// Add a node whose stamp is inferred from its inputs.
    ///
    /// Pure floating kinds are hash-consed: an existing equivalent node is
    /// returned instead of creating a duplicate.
    pub fn unique(&mut self, kind: NodeKind, inputs: &[NodeId], types: &dyn TypeResolver) -> NodeId {
        if let Some(existing) = self.lookup(&kind, inputs) {
            return existing;
        }
        let stamp = {
            let stamps: SmallVec<[&Stamp; 4]> = inputs.iter().map(|&i| self.stamp(i)).collect();
            fold_stamp(&kind, &stamps, &Stamp::Void, types)
        };
        self.insert_unique(kind, inputs, stamp)
    }

    /// Add a node with an explicit stamp, hash-consing pure kinds.
    pub fn unique_with_stamp(&mut self, kind: NodeKind, inputs: &[NodeId], stamp: Stamp) -> NodeId {
        if let Some(existing) = self.lookup(&kind, inputs) {
            return existing;
        }
        self.insert_unique(kind, inputs, stamp)
    }

    fn insert_unique(&mut self, kind: NodeKind, inputs: &[NodeId], stamp: Stamp) -> NodeId {
        let pure = kind.is_pure();
        let id = self.add_node(kind, inputs, stamp);
        if pure {
            self.value_numbers.insert(self.value_key(id), id);
        }
        id
    }

    /// The canonical constant node for `constant`.
    pub fn constant(&mut self, constant: Constant) -> NodeId {
        self.unique_with_stamp(NodeKind::Constant(constant), &[], Stamp::for_constant(&constant))
    }

    #[inline]
    pub fn int_constant(&mut self, bits: u8, value: i64) -> NodeId {
        self.constant(Constant::Int {
            bits,
            value: crate::stamp::sign_extend(value, bits),
        })
    }

    // =========================================================================
    // Value Numbering
    // =========================================================================

    fn value_key(&self, id: NodeId) -> (NodeKind, InputList) {
        let node = &self.nodes[id];
        (node.kind.clone(), node.inputs.clone())
    }

    /// Find a live pure node equal to `(kind, inputs)`.
    ///
    /// Table entries can be stale after input edits, so every hit is
    /// re-validated against the node it points to.
    fn lookup(&self, kind: &NodeKind, inputs: &[NodeId]) -> Option<NodeId> {
        if !kind.is_pure() {
            return None;
        }
        let key = (kind.clone(), inputs.iter().copied().collect::<InputList>());
        let &found = self.value_numbers.get(&key)?;
        let node = self.nodes.get(found)?;
        (!node.is_dead() && node.kind == *kind && node.inputs.as_slice() == inputs).then_some(found)
    }

    /// If a different live node is equal to `id`, return it. Otherwise make
    /// `id` the representative of its equivalence class.
    pub fn find_duplicate(&mut self, id: NodeId) -> Option<NodeId> {
        if !self.is_alive(id) || !self.nodes[id].kind.is_pure() {
            return None;
        }
        let key = self.value_key(id);
        match self.lookup(&key.0, &key.1) {
            Some(existing) if existing != id => Some(existing),
            Some(_) => None,
            None => {
                self.value_numbers.insert(key, id);
                None
            }
        }
    }

    // =========================================================================
    // Edges
    // =========================================================================

    fn add_use(&mut self, def: NodeId, user: NodeId) {
        self.users.get_or_insert(def).push(user);
    }

    fn remove_use(&mut self, def: NodeId, user: NodeId) {
        let users = self.users.get_or_insert(def);
        if let Some(pos) = users.iter().position(|&u| u == user) {
            users.swap_remove(pos);
        }
    }

    /// Point input `index` of `node` at `new_input`.
    pub fn replace_input(&mut self, node: NodeId, index: usize, new_input: NodeId) {
        let old = self.nodes[node].inputs[index];
        if old == new_input {
            return;
        }
        self.remove_use(old, node);
        self.nodes[node].inputs[index] = new_input;
        self.add_use(new_input, node);
        self.note(node);
        self.note(old);
    }

    /// Exchange the first two inputs of a node.
    pub(crate) fn swap_inputs(&mut self, node: NodeId) {
        self.nodes[node].inputs.swap(0, 1);
        self.note(node);
    }

    /// Append an input to a variadic node (`Merge`, `Phi`).
    pub fn push_input(&mut self, node: NodeId, input: NodeId) {
        self.nodes[node].inputs.push(input);
        self.add_use(input, node);
        self.note(node);
    }

    fn remove_input_at(&mut self, node: NodeId, index: usize) -> NodeId {
        let old = self.nodes[node].inputs.remove(index);
        self.remove_use(old, node);
        self.note(node);
        self.note(old);
        old
    }

    /// Redirect every use of `old` to `new`.
    pub fn replace_at_usages(&mut self, old: NodeId, new: NodeId) {
        if old == new {
            return;
        }
        let users = std::mem::take(self.users.get_or_insert(old));
        for &user in &users {
            for slot in self.nodes[user].inputs.iter_mut() {
                if *slot == old {
                    *slot = new;
                }
            }
            self.note(user);
        }
        self.note(new);
        // Each edge of a repeated input was recorded separately; after the
        // rewrite `new` gains exactly the edges `old` lost.
        self.users.get_or_insert(new).extend(users);
    }

    /// Update a stamp. Returns `true` if it changed.
    pub fn set_stamp(&mut self, id: NodeId, stamp: Stamp) -> bool {
        let node = &mut self.nodes[id];
        if node.stamp == stamp {
            return false;
        }
        node.stamp = stamp;
        true
    }

    /// Replace the kind of a node in place, keeping its edges.
    pub(crate) fn set_kind(&mut self, id: NodeId, kind: NodeKind) {
        self.nodes[id].kind = kind;
        self.note(id);
    }

    // =========================================================================
    // Fixed Chains
    // =========================================================================

    /// The `next` successor of a single-successor node.
    pub fn next(&self, id: NodeId) -> Option<NodeId> {
        let node = &self.nodes[id];
        if node.capabilities().contains(Capabilities::SINGLE_SUCCESSOR) {
            node.successors.first().copied()
        } else {
            None
        }
    }

    #[inline]
    pub fn predecessor(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id].predecessor
    }

    #[inline]
    pub fn successors(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id].successors
    }

    /// The merge an `End` jumps to.
    pub fn merge_of(&self, end: NodeId) -> Option<NodeId> {
        self.users(end)
            .iter()
            .copied()
            .find(|&u| matches!(self.kind(u), NodeKind::Merge))
    }

    /// Link `node -> next`.
    pub fn set_next(&mut self, node: NodeId, next: NodeId) {
        if let Some(&old) = self.nodes[node].successors.first() {
            if self.nodes[old].predecessor == Some(node) {
                self.nodes[old].predecessor = None;
            }
        }
        self.nodes[node].successors = SuccessorList::from_slice(&[next]);
        self.nodes[next].predecessor = Some(node);
    }

    /// Set both arms of an `If`.
    pub fn set_branches(&mut self, if_node: NodeId, true_begin: NodeId, false_begin: NodeId) {
        self.nodes[if_node].successors = SuccessorList::from_slice(&[true_begin, false_begin]);
        self.nodes[true_begin].predecessor = Some(if_node);
        self.nodes[false_begin].predecessor = Some(if_node);
    }

    /// Swap the arms of an `If`.
    pub(crate) fn swap_branches(&mut self, if_node: NodeId) {
        self.nodes[if_node].successors.swap(0, 1);
    }

    fn replace_successor(&mut self, pred: NodeId, old: NodeId, new: NodeId) {
        for slot in self.nodes[pred].successors.iter_mut() {
            if *slot == old {
                *slot = new;
            }
        }
        self.nodes[new].predecessor = Some(pred);
        self.note(new);
    }

    /// Splice the unlinked single-successor `node` between `anchor` and its
    /// `next`.
    pub fn insert_after(&mut self, anchor: NodeId, node: NodeId) {
        match self.next(anchor) {
            Some(next) => {
                self.nodes[next].predecessor = None;
                self.set_next(anchor, node);
                self.set_next(node, next);
            }
            None => self.set_next(anchor, node),
        }
    }

    /// Splice the unlinked single-successor `node` right before `anchor`.
    pub fn insert_before(&mut self, anchor: NodeId, node: NodeId) {
        if let Some(pred) = self.nodes[anchor].predecessor {
            self.replace_successor(pred, anchor, node);
        }
        self.set_next(node, anchor);
    }

    /// Remove a single-successor node from its chain, joining its
    /// predecessor to its successor. The node stays alive.
    pub fn unlink_fixed(&mut self, id: NodeId) {
        let pred = self.nodes[id].predecessor.take();
        let next = self.next(id);
        self.nodes[id].successors.clear();
        match (pred, next) {
            (Some(p), Some(n)) => self.replace_successor(p, id, n),
            (None, Some(n)) => self.nodes[n].predecessor = None,
            (Some(p), None) => self.nodes[p].successors.retain(|s| *s != id),
            (None, None) => {}
        }
    }

    /// Put the unlinked fixed node `new` in `old`'s chain position, move
    /// `old`'s usages to `new`, and delete `old`.
    pub fn replace_fixed(&mut self, old: NodeId, new: NodeId) {
        let pred = self.nodes[old].predecessor.take();
        let successors = std::mem::take(&mut self.nodes[old].successors);
        if let Some(p) = pred {
            self.replace_successor(p, old, new);
        }
        for &s in &successors {
            self.nodes[s].predecessor = Some(new);
        }
        self.nodes[new].successors = successors;
        self.replace_at_usages(old, new);
        self.kill(old);
    }

    /// Replace a fixed value node by a floating value and delete it.
    pub fn replace_fixed_with_floating(&mut self, old: NodeId, value: NodeId) {
        self.replace_at_usages(old, value);
        self.unlink_fixed(old);
        self.kill(old);
    }

    /// Cut the chain at `node`: it is replaced by `sink` (an unlinked
    /// control sink such as `Deoptimize`) and everything after it dies.
    pub fn replace_with_sink(&mut self, node: NodeId, sink: NodeId) {
        let rest = self.next(node);
        let pred = self.nodes[node].predecessor.take();
        self.nodes[node].successors.clear();
        if let Some(p) = pred {
            self.replace_successor(p, node, sink);
        }
        if let Some(r) = rest {
            self.nodes[r].predecessor = None;
            self.kill_cfg(r);
        }
        let start = self.start;
        // Remaining users sit in the dead chain or float above it.
        self.kill_floating_usages(node);
        self.replace_at_usages(node, start);
        self.kill(node);
    }

    // =========================================================================
    // Removal
    // =========================================================================

    /// Delete a node. Floating inputs left without users are deleted too.
    pub fn kill(&mut self, id: NodeId) {
        let mut worklist = vec![id];
        while let Some(n) = worklist.pop() {
            if !self.is_alive(n) || n == self.start {
                continue;
            }
            self.nodes[n].flags.insert(NodeFlags::DEAD);
            self.live -= 1;
            let inputs = std::mem::take(&mut self.nodes[n].inputs);
            for input in inputs {
                self.remove_use(input, n);
                self.note(input);
                if self.is_alive(input) && self.users(input).is_empty() && !self.nodes[input].is_fixed() {
                    worklist.push(input);
                }
            }
            self.users.set(n, UserList::new());
            self.call_profiles.remove(&n);
            self.type_profiles.remove(&n);
        }
    }

    /// Delete all floating nodes that (transitively) use `id`.
    pub fn kill_floating_usages(&mut self, id: NodeId) {
        let mut stack: Vec<NodeId> = self.users(id).to_vec();
        let mut order = Vec::new();
        let mut seen = FxHashSet::default();
        while let Some(u) = stack.pop() {
            if !self.is_alive(u) || self.nodes[u].is_fixed() || !seen.insert(u) {
                continue;
            }
            order.push(u);
            stack.extend(self.users(u).iter().copied());
        }
        for u in order.into_iter().rev() {
            if self.is_alive(u) {
                let users = std::mem::take(self.users.get_or_insert(u));
                for user in users {
                    if let Some(pos) = self.nodes[user].inputs.iter().position(|&i| i == u) {
                        self.nodes[user].inputs.remove(pos);
                    }
                }
                self.kill(u);
            }
        }
    }

    /// Delete the control-flow region that starts at `head`.
    ///
    /// Merges reached from inside the region lose the corresponding ends;
    /// a merge whose every end lies inside the region dies with it.
    pub fn kill_cfg(&mut self, head: NodeId) {
        let mut dead: FxHashSet<NodeId> = FxHashSet::default();
        let mut stack = vec![head];
        let mut merges: Vec<NodeId> = Vec::new();
        loop {
            while let Some(n) = stack.pop() {
                if !self.is_alive(n) || !dead.insert(n) {
                    continue;
                }
                if matches!(self.kind(n), NodeKind::End) {
                    if let Some(m) = self.merge_of(n) {
                        if !merges.contains(&m) {
                            merges.push(m);
                        }
                    }
                }
                stack.extend(self.nodes[n].successors.iter().copied());
            }
            let mut grew = false;
            for &m in &merges {
                if !dead.contains(&m) && self.inputs(m).iter().all(|e| dead.contains(e)) {
                    stack.push(m);
                    grew = true;
                }
            }
            if !grew {
                break;
            }
        }

        let surviving: Vec<NodeId> = merges.into_iter().filter(|m| !dead.contains(m)).collect();
        for &m in &surviving {
            let ends: Vec<NodeId> = self.inputs(m).iter().copied().filter(|e| dead.contains(e)).collect();
            for end in ends {
                self.detach_end(m, end);
            }
        }

        let mut ordered: Vec<NodeId> = dead.into_iter().collect();
        ordered.sort();
        for &n in &ordered {
            if self.is_alive(n) {
                self.kill_floating_usages(n);
            }
        }
        for &n in &ordered {
            if self.is_alive(n) {
                let users = std::mem::take(self.users.get_or_insert(n));
                for user in users {
                    if self.is_alive(user) && !ordered.contains(&user) {
                        if let Some(pos) = self.nodes[user].inputs.iter().position(|&i| i == n) {
                            self.nodes[user].inputs.remove(pos);
                        }
                    }
                }
                self.nodes[n].predecessor = None;
                self.nodes[n].successors.clear();
                self.kill(n);
            }
        }
        tracing::trace!(graph = %self.name, head = %head, killed = ordered.len(), "dead control flow removed");

        for m in surviving {
            self.simplify_merge(m);
        }
    }

    /// Remove `end` from `merge` together with the matching phi inputs.
    fn detach_end(&mut self, merge: NodeId, end: NodeId) {
        let Some(index) = self.inputs(merge).iter().position(|&e| e == end) else {
            return;
        };
        let phis: Vec<NodeId> = self
            .users(merge)
            .iter()
            .copied()
            .filter(|&u| matches!(self.kind(u), NodeKind::Phi))
            .collect();
        for phi in phis {
            if self.inputs(phi).len() > index + 1 {
                self.remove_input_at(phi, index + 1);
            }
        }
        self.remove_input_at(merge, index);
    }

    /// Collapse a merge that has one end left, or delete one with none.
    pub fn simplify_merge(&mut self, merge: NodeId) {
        if !self.is_alive(merge) {
            return;
        }
        match self.inputs(merge).len() {
            0 => self.kill_cfg(merge),
            1 => {
                let end = self.inputs(merge)[0];
                let phis: Vec<NodeId> = self
                    .users(merge)
                    .iter()
                    .copied()
                    .filter(|&u| matches!(self.kind(u), NodeKind::Phi))
                    .collect();
                for phi in phis {
                    if let Some(value) = self.input(phi, 1) {
                        self.replace_at_usages(phi, value);
                    }
                    self.kill(phi);
                }
                let pred = self.nodes[end].predecessor.take();
                let next = self.next(merge);
                self.nodes[merge].successors.clear();

                // Anything still anchored on the merge moves to a fresh begin.
                let target = if !self.users(merge).is_empty() {
                    let begin = self.add_node(NodeKind::Begin, &[], Stamp::Void);
                    self.replace_at_usages(merge, begin);
                    if let Some(n) = next {
                        self.set_next(begin, n);
                    }
                    Some(begin)
                } else {
                    next
                };
                match (pred, target) {
                    (Some(p), Some(t)) => self.replace_successor(p, end, t),
                    (Some(p), None) => self.nodes[p].successors.retain(|s| *s != end),
                    _ => {}
                }
                self.kill(merge);
                self.kill(end);
            }
            _ => {}
        }
    }

    /// Replace an `If` with the arm selected by `taken`, deleting the other.
    pub fn simplify_if(&mut self, if_node: NodeId, taken: bool) {
        let successors = self.nodes[if_node].successors.clone();
        let [true_begin, false_begin] = successors.as_slice() else {
            return;
        };
        let (survivor, dead) = if taken {
            (*true_begin, *false_begin)
        } else {
            (*false_begin, *true_begin)
        };
        let pred = self.nodes[if_node].predecessor.take();
        self.nodes[if_node].successors.clear();
        self.nodes[dead].predecessor = None;
        self.kill_cfg(dead);

        match pred {
            Some(p) => self.replace_successor(p, if_node, survivor),
            None => self.nodes[survivor].predecessor = None,
        }
        self.kill(if_node);

        // A begin nobody anchors on is just a pass-through now.
        if self.is_alive(survivor) && self.users(survivor).is_empty() {
            self.unlink_fixed(survivor);
            self.kill(survivor);
        }
    }

    /// Delete floating nodes without users (left over by rewrites).
    pub fn sweep_unused(&mut self) -> usize {
        let mut removed = 0;
        for id in self.live_ids() {
            let node = &self.nodes[id];
            if !node.is_dead()
                && !node.is_fixed()
                && !matches!(node.kind, NodeKind::Parameter { .. })
                && self.users(id).is_empty()
            {
                let before = self.live;
                self.kill(id);
                removed += before - self.live;
            }
        }
        removed
    }

    // =========================================================================
    // Side Tables
    // =========================================================================

    #[inline]
    pub fn assumptions(&self) -> &Assumptions {
        &self.assumptions
    }

    #[inline]
    pub fn assumptions_mut(&mut self) -> &mut Assumptions {
        &mut self.assumptions
    }

    pub fn call_profile(&self, invoke: NodeId) -> Option<CallSiteProfile> {
        self.call_profiles.get(&invoke).copied()
    }

    pub fn set_call_profile(&mut self, invoke: NodeId, profile: CallSiteProfile) {
        self.call_profiles.insert(invoke, profile);
    }

    pub fn type_profile(&self, node: NodeId) -> Option<&TypeProfile> {
        self.type_profiles.get(&node).map(|(_, profile)| profile)
    }

    /// Where the type profile of `node` was collected. Inlined nodes keep
    /// their callee's site.
    pub fn type_profile_site(&self, node: NodeId) -> Option<ProfileSite> {
        self.type_profiles.get(&node).map(|(site, _)| *site)
    }

    pub fn set_type_profile(&mut self, node: NodeId, site: ProfileSite, profile: TypeProfile) {
        self.type_profiles.insert(node, (site, profile));
    }

    /// Register a type-check site as unresolved.
    pub fn track_type_check(&mut self, node: NodeId) {
        self.resolutions
            .entry(node)
            .or_insert(TypeCheckResolution::Unresolved);
    }

    /// Record how a tracked site was resolved. Returns `false` if the site
    /// was already resolved (or is not tracked).
    pub fn resolve_type_check(&mut self, node: NodeId, resolution: TypeCheckResolution) -> bool {
        match self.resolutions.get_mut(&node) {
            Some(r @ TypeCheckResolution::Unresolved) if resolution != TypeCheckResolution::Unresolved => {
                *r = resolution;
                true
            }
            _ => false,
        }
    }

    /// Move a tracked site to the node that now implements it.
    pub fn transfer_type_check(&mut self, from: NodeId, to: NodeId) {
        if let Some(state) = self.resolutions.remove(&from) {
            self.resolutions.insert(to, state);
        }
    }

    pub fn type_check_resolution(&self, node: NodeId) -> Option<TypeCheckResolution> {
        self.resolutions.get(&node).copied()
    }

    /// All tracked type-check sites in creation order.
    pub fn type_check_sites(&self) -> Vec<(NodeId, TypeCheckResolution)> {
        let mut sites: Vec<_> = self.resolutions.iter().map(|(&n, &r)| (n, r)).collect();
        sites.sort_by_key(|(n, _)| *n);
        sites
    }

    // =========================================================================
    // Dumping
    // =========================================================================

    /// Order-independent summary: the sorted multiset of live node kinds.
    pub fn shape(&self) -> Vec<String> {
        let mut shape: Vec<String> = self
            .nodes
            .iter()
            .filter(|(_, n)| !n.is_dead())
            .map(|(_, n)| match &n.kind {
                NodeKind::Constant(c) => format!("Constant({c})"),
                k => k.mnemonic().to_string(),
            })
            .collect();
        shape.sort();
        shape
    }
}

impl fmt::Debug for Graph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Graph {} ({}, {} live nodes)", self.name, self.method, self.live)?;
        for (id, node) in self.nodes.iter().filter(|(_, n)| !n.is_dead()) {
            write!(f, "  {id} = {}", node.kind.mnemonic())?;
            if !node.inputs.is_empty() {
                let inputs: Vec<String> = node.inputs.iter().map(|i| i.to_string()).collect();
                write!(f, "({})", inputs.join(", "))?;
            }
            if !node.successors.is_empty() {
                let succ: Vec<String> = node.successors.iter().map(|s| s.to_string()).collect();
                write!(f, " -> {}", succ.join(", "))?;
            }
            writeln!(f, " : {}", node.stamp)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::BinaryOp;
    use crate::stamp::IntegerStamp;
    use crate::types::TypeHierarchy;

    fn graph() -> (Graph, TypeHierarchy) {
        (Graph::new(MethodId::new(0), "test"), TypeHierarchy::new())
    }

    #[test]
    fn test_constants_are_hash_consed() {
        let (mut g, _) = graph();
        let a = g.int_constant(32, 7);
        let b = g.int_constant(32, 7);
        let c = g.int_constant(64, 7);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(g.live_node_count(), 3);
    }

    #[test]
    fn test_unique_reuses_pure_nodes() {
        let (mut g, types) = graph();
        let p = g.add_node(NodeKind::Parameter { index: 0 }, &[], Stamp::int(32));
        let one = g.int_constant(32, 1);
        let a = g.unique(NodeKind::Binary(BinaryOp::Add), &[p, one], &types);
        let b = g.unique(NodeKind::Binary(BinaryOp::Add), &[p, one], &types);
        assert_eq!(a, b);
        assert_eq!(g.users(one), &[a]);
    }

    #[test]
    fn test_find_duplicate_after_input_edit() {
        let (mut g, types) = graph();
        let p = g.add_node(NodeKind::Parameter { index: 0 }, &[], Stamp::int(32));
        let q = g.add_node(NodeKind::Parameter { index: 1 }, &[], Stamp::int(32));
        let a = g.unique(NodeKind::Negate, &[p], &types);
        let b = g.unique(NodeKind::Negate, &[q], &types);
        assert_ne!(a, b);

        g.replace_input(b, 0, p);
        assert_eq!(g.find_duplicate(b), Some(a));
        assert_eq!(g.find_duplicate(a), None);
    }

    #[test]
    fn test_replace_at_usages_moves_every_edge() {
        let (mut g, types) = graph();
        let p = g.add_node(NodeKind::Parameter { index: 0 }, &[], Stamp::int(32));
        let q = g.add_node(NodeKind::Parameter { index: 1 }, &[], Stamp::int(32));
        let sq = g.add_node(NodeKind::Binary(BinaryOp::Mul), &[p, p], Stamp::int(32));
        g.replace_at_usages(p, q);
        assert_eq!(g.inputs(sq), &[q, q]);
        assert_eq!(g.users(q).len(), 2);
        assert!(g.users(p).is_empty());
        let _ = types;
    }

    #[test]
    fn test_kill_removes_unused_floating_inputs() {
        let (mut g, types) = graph();
        let p = g.add_node(NodeKind::Parameter { index: 0 }, &[], Stamp::int(32));
        let one = g.int_constant(32, 1);
        let add = g.unique(NodeKind::Binary(BinaryOp::Add), &[p, one], &types);
        let before = g.live_node_count();
        g.kill(add);
        assert!(!g.is_alive(add));
        assert!(!g.is_alive(one));
        assert!(!g.is_alive(p));
        assert_eq!(g.live_node_count(), before - 3);
    }

    #[test]
    fn test_fixed_chain_editing() {
        let (mut g, _) = graph();
        let start = g.start();
        let ret = g.add_node(NodeKind::Return, &[], Stamp::Void);
        g.set_next(start, ret);
        let info = g.add_node(NodeKind::Infopoint { bci: 3 }, &[], Stamp::Void);
        g.insert_before(ret, info);
        assert_eq!(g.next(start), Some(info));
        assert_eq!(g.next(info), Some(ret));
        assert_eq!(g.predecessor(ret), Some(info));

        g.unlink_fixed(info);
        assert_eq!(g.next(start), Some(ret));
        assert_eq!(g.predecessor(ret), Some(start));
    }

    #[test]
    fn test_simplify_if_removes_dead_arm_and_phi() {
        let (mut g, types) = graph();
        let start = g.start();
        let p = g.add_node(NodeKind::Parameter { index: 0 }, &[], Stamp::int(32));
        let cond = g.constant(Constant::Bool(true));
        let branch = g.add_node(NodeKind::If, &[cond], Stamp::Void);
        g.set_next(start, branch);
        let t = g.add_node(NodeKind::Begin, &[], Stamp::Void);
        let f = g.add_node(NodeKind::Begin, &[], Stamp::Void);
        g.set_branches(branch, t, f);
        let te = g.add_node(NodeKind::End, &[], Stamp::Void);
        let fe = g.add_node(NodeKind::End, &[], Stamp::Void);
        g.set_next(t, te);
        g.set_next(f, fe);
        let merge = g.add_node(NodeKind::Merge, &[te, fe], Stamp::Void);
        let two = g.int_constant(32, 2);
        let phi = g.add_node(NodeKind::Phi, &[merge, p, two], Stamp::int(32));
        let ret = g.add_node(NodeKind::Return, &[phi], Stamp::Void);
        g.set_next(merge, ret);

        g.simplify_if(branch, true);

        assert!(!g.is_alive(branch));
        assert!(!g.is_alive(merge));
        assert!(!g.is_alive(phi));
        assert!(!g.is_alive(two));
        assert_eq!(g.inputs(ret), &[p]);
        assert_eq!(g.next(start), Some(ret));
        let _ = types;
    }

    #[test]
    fn test_type_check_resolution_is_monotone() {
        let (mut g, _) = graph();
        let n = g.add_node(NodeKind::Parameter { index: 0 }, &[], Stamp::object());
        g.track_type_check(n);
        assert!(g.resolve_type_check(n, TypeCheckResolution::ResolvedStatic));
        assert!(!g.resolve_type_check(n, TypeCheckResolution::RuntimeChecked));
        assert_eq!(g.type_check_resolution(n), Some(TypeCheckResolution::ResolvedStatic));
    }

    #[test]
    fn test_may_deoptimize_follows_divisor_stamp() {
        let (mut g, _) = graph();
        let x = g.add_node(NodeKind::Parameter { index: 0 }, &[], Stamp::int(32));
        let y = g.add_node(NodeKind::Parameter { index: 1 }, &[], Stamp::int(32));
        let nz = g.add_node(
            NodeKind::Parameter { index: 2 },
            &[],
            Stamp::Integer(IntegerStamp::range(32, 1, 100)),
        );
        let rem = g.add_node(NodeKind::IntegerRem, &[x, y], Stamp::int(32));
        let safe = g.add_node(NodeKind::IntegerRem, &[x, nz], Stamp::int(32));
        assert!(g.may_deoptimize(rem));
        assert!(!g.may_deoptimize(safe));
    }
}
