//! Inlining transformation.
//!
//! Copies a callee graph into the caller in place of an `Invoke`:
//!
//! ```text
//! Before:                     After:
//!
//!   pred                        pred
//!    │                           │
//!  Invoke(args)                Begin      (anchor for the callee's guards)
//!    │                           │
//!   next                       callee body, parameters := args
//!                                │
//!                              Merge + Phi (one End per callee Return)
//!                                │
//!                               next
//! ```
//!
//! A callee with a single return needs no merge; one without returns (every
//! path deoptimizes) kills the caller's continuation.

use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use tracing::trace;

use crate::error::{CompileError, CompileResult};
use crate::ir::{Graph, NodeId, NodeKind, TypeCheckResolution};
use crate::stamp::Stamp;
use crate::types::TypeResolver;

/// What one inlining step added to the caller.
#[derive(Debug, Clone, Default)]
pub struct InlineInfo {
    /// Callee node id to caller node id.
    pub duplicates: FxHashMap<NodeId, NodeId>,
    /// Invokes copied from the callee, in callee order.
    pub new_invokes: Vec<NodeId>,
    /// The value now standing for the call's result.
    pub result: Option<NodeId>,
    pub nodes_added: usize,
}

impl InlineInfo {
    /// Caller nodes to revisit after the step.
    pub fn seeds(&self) -> Vec<NodeId> {
        let mut seeds: Vec<NodeId> = self.duplicates.values().copied().collect();
        seeds.sort();
        seeds.extend(self.result);
        seeds
    }
}

/// Replace `invoke` in `caller` by a copy of `callee`.
pub fn inline_invoke(
    caller: &mut Graph,
    invoke: NodeId,
    callee: &Graph,
    types: &dyn TypeResolver,
) -> CompileResult<InlineInfo> {
    if !caller.is_alive(invoke) || !matches!(caller.kind(invoke), NodeKind::Invoke { .. }) {
        return Err(CompileError::malformed(invoke, "inlining target is not a live invoke"));
    }
    let args: SmallVec<[NodeId; 8]> = caller.inputs(invoke).iter().copied().collect();
    let body_first = callee
        .next(callee.start())
        .ok_or_else(|| CompileError::malformed(callee.start(), "callee has an empty body"))?;
    let site_profile = caller.call_profile(invoke).unwrap_or_default();

    // Anchor for everything the callee anchored at its start.
    let entry = caller.add_node(NodeKind::Begin, &[], Stamp::Void);
    caller.insert_before(invoke, entry);
    caller.unlink_fixed(invoke);
    let continuation = caller.next(entry);

    let mut info = InlineInfo::default();
    let map = &mut info.duplicates;
    map.insert(callee.start(), entry);
    for param in callee.parameters() {
        let NodeKind::Parameter { index } = *callee.kind(param) else {
            continue;
        };
        let arg = *args
            .get(index as usize)
            .ok_or_else(|| CompileError::malformed(invoke, "too few arguments for callee"))?;
        map.insert(param, arg);
    }

    // Allocate first so that forward references (phis, merges) resolve.
    let order: Vec<NodeId> = callee
        .live_ids()
        .into_iter()
        .filter(|id| !map.contains_key(id))
        .collect();
    for &id in &order {
        let copy = caller.add_node(callee.kind(id).clone(), &[], callee.stamp(id).clone());
        map.insert(id, copy);
    }
    for &id in &order {
        let copy = map[&id];
        for input in callee.inputs(id) {
            caller.push_input(copy, map[input]);
        }
        match (callee.kind(id), callee.successors(id)) {
            (NodeKind::If, &[t, f]) => caller.set_branches(copy, map[&t], map[&f]),
            (_, &[next]) => caller.set_next(copy, map[&next]),
            _ => {}
        }
        if let Some(profile) = callee.call_profile(id) {
            caller.set_call_profile(copy, profile.nested_in(&site_profile));
            info.new_invokes.push(copy);
        }
        if let (Some(site), Some(profile)) = (callee.type_profile_site(id), callee.type_profile(id)) {
            caller.set_type_profile(copy, site, profile.clone());
        }
        if callee.type_check_resolution(id) == Some(TypeCheckResolution::Unresolved) {
            caller.track_type_check(copy);
        }
    }
    info.nodes_added = order.len() + 1;
    caller.set_next(entry, map[&body_first]);

    let returns: Vec<NodeId> = callee.returns().iter().map(|r| map[r]).collect();
    let Some(next) = continuation else {
        return Err(CompileError::malformed(invoke, "invoke has no successor"));
    };
    // Usages move to the result before the returns die, so the returned
    // values keep a user.
    info.result = match returns.as_slice() {
        [] => {
            caller.kill_cfg(next);
            caller.kill_floating_usages(invoke);
            None
        }
        &[ret] => {
            let value = caller.input(ret, 0);
            if let Some(v) = value {
                caller.replace_at_usages(invoke, v);
            }
            let pred = chain_predecessor(caller, ret)?;
            caller.unlink_fixed(ret);
            caller.kill(ret);
            caller.set_next(pred, next);
            value
        }
        rets => {
            let mut exits = SmallVec::<[(NodeId, NodeId, NodeId); 4]>::new();
            let mut values = SmallVec::<[NodeId; 4]>::new();
            for &ret in rets {
                values.extend(caller.input(ret, 0));
                let pred = chain_predecessor(caller, ret)?;
                let end = caller.add_node(NodeKind::End, &[], Stamp::Void);
                exits.push((ret, pred, end));
            }
            let ends: SmallVec<[NodeId; 4]> = exits.iter().map(|&(_, _, end)| end).collect();
            let merge = caller.add_node(NodeKind::Merge, &ends, Stamp::Void);
            caller.set_next(merge, next);
            let phi = (values.len() == ends.len()).then(|| {
                let mut inputs: SmallVec<[NodeId; 5]> = SmallVec::new();
                inputs.push(merge);
                inputs.extend(values.iter().copied());
                let stamp = values
                    .iter()
                    .fold(Stamp::Illegal, |acc, &v| acc.meet(caller.stamp(v), types));
                caller.add_node(NodeKind::Phi, &inputs, stamp)
            });
            match phi {
                Some(phi) => caller.replace_at_usages(invoke, phi),
                None => caller.kill_floating_usages(invoke),
            }
            for (ret, pred, end) in exits {
                caller.unlink_fixed(ret);
                caller.kill(ret);
                caller.set_next(pred, end);
            }
            phi
        }
    };
    caller.kill(invoke);

    if !caller.assumptions_mut().merge(callee.assumptions()) {
        return Err(CompileError::malformed(invoke, "callee assumptions not allowed in caller"));
    }
    trace!(
        caller = caller.name(),
        callee = callee.name(),
        nodes = info.nodes_added,
        "inlined"
    );
    Ok(info)
}

fn chain_predecessor(graph: &Graph, node: NodeId) -> CompileResult<NodeId> {
    graph
        .predecessor(node)
        .ok_or_else(|| CompileError::malformed(node, "fixed node not in a chain"))
}
