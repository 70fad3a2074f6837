//! Reference interpreter.
//!
//! Executes a graph directly: the fixed chain is walked from `Start`,
//! floating values are evaluated on demand and memoized per frame. It exists
//! to check that graph transformations preserve observable behaviour, so it
//! follows the same rules compiled code would:
//!
//! - `ShortCircuitOr` evaluates its right side only when the left side is
//!   false, so a hub load behind a null test never sees `null`.
//! - Floating guards are checked when control passes their anchor.
//! - Division by zero traps; it is never a deoptimization.
//! - Calls execute the callee graph from the [`CalleeProvider`].

use std::fmt;

use rustc_hash::FxHashMap;
use thiserror::Error;
use tracing::trace;

use crate::deopt::{DeoptAction, DeoptReason, DeoptSignal, SpeculationId};
use crate::error::{CompileError, CompileResult};
use crate::inline::CalleeProvider;
use crate::instrument::BranchInstrumentation;
use crate::ir::{BinaryOp, CompareOp, Constant, Graph, NodeId, NodeKind};
use crate::stamp::{binary_constant, div_constant, rem_constant, sign_extend};
use crate::types::{MethodId, TypeId, TypeResolver};

/// Nested calls allowed before execution is abandoned.
pub const DEFAULT_MAX_CALL_DEPTH: usize = 64;

// =============================================================================
// Values and Heap
// =============================================================================

/// Reference to an object on the [`Heap`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectRef(u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Value {
    Int(i64),
    Bool(bool),
    Null,
    Object(ObjectRef),
    Hub(TypeId),
}

impl Value {
    pub fn as_int(self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_bool(self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(b),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{v}"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Null => f.write_str("null"),
            Value::Object(o) => write!(f, "obj#{}", o.0),
            Value::Hub(ty) => write!(f, "hub({ty})"),
        }
    }
}

/// Objects only carry their runtime type.
#[derive(Debug, Clone, Default)]
pub struct Heap {
    objects: Vec<TypeId>,
}

impl Heap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allocate(&mut self, ty: TypeId) -> Value {
        let r = ObjectRef(self.objects.len() as u32);
        self.objects.push(ty);
        Value::Object(r)
    }

    pub fn type_of(&self, object: ObjectRef) -> Option<TypeId> {
        self.objects.get(object.0 as usize).copied()
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

// =============================================================================
// Outcomes
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("division by zero at {node}")]
pub struct ArithmeticFault {
    pub node: NodeId,
}

/// How an execution ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Returned(Option<Value>),
    Deoptimized(DeoptSignal),
    Trapped(ArithmeticFault),
}

impl Outcome {
    pub fn value(&self) -> Option<Value> {
        match self {
            Outcome::Returned(v) => *v,
            _ => None,
        }
    }

    /// Equal up to the node that trapped, which transformations renumber.
    pub fn is_equivalent(&self, other: &Outcome) -> bool {
        match (self, other) {
            (Outcome::Trapped(_), Outcome::Trapped(_)) => true,
            _ => self == other,
        }
    }
}

/// Where the walk of a fixed chain stopped early.
enum Exit {
    Outcome(Outcome),
    Error(CompileError),
}

impl From<CompileError> for Exit {
    fn from(e: CompileError) -> Self {
        Exit::Error(e)
    }
}

type Step<T> = Result<T, Exit>;

// =============================================================================
// Interpreter
// =============================================================================

pub struct Interpreter<'a> {
    types: &'a dyn TypeResolver,
    heap: &'a Heap,
    provider: Option<&'a dyn CalleeProvider>,
    instrumentation: Option<&'a BranchInstrumentation>,
    max_call_depth: usize,
}

impl<'a> Interpreter<'a> {
    pub fn new(types: &'a dyn TypeResolver, heap: &'a Heap) -> Self {
        Interpreter {
            types,
            heap,
            provider: None,
            instrumentation: None,
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
        }
    }

    pub fn with_provider(mut self, provider: &'a dyn CalleeProvider) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn with_instrumentation(mut self, instrumentation: &'a BranchInstrumentation) -> Self {
        self.instrumentation = Some(instrumentation);
        self
    }

    pub fn with_max_call_depth(mut self, depth: usize) -> Self {
        self.max_call_depth = depth;
        self
    }

    /// Run `graph` on `args`.
    ///
    /// Errors report graphs the interpreter cannot execute (a missing
    /// callee, a value used before its fixed node ran, a hub load on
    /// `null`); they indicate a broken graph, not a program outcome.
    pub fn execute(&self, graph: &Graph, args: &[Value]) -> CompileResult<Outcome> {
        self.execute_at_depth(graph, args, 0)
    }

    fn execute_at_depth(&self, graph: &Graph, args: &[Value], depth: usize) -> CompileResult<Outcome> {
        let mut frame = Frame {
            graph,
            args,
            values: FxHashMap::default(),
            depth,
        };
        match self.run(&mut frame) {
            Ok(outcome) | Err(Exit::Outcome(outcome)) => Ok(outcome),
            Err(Exit::Error(e)) => Err(e),
        }
    }

    fn run(&self, frame: &mut Frame<'_>) -> Step<Outcome> {
        let graph = frame.graph;
        let mut current = graph.start();
        loop {
            match graph.kind(current).clone() {
                NodeKind::Start | NodeKind::Begin | NodeKind::Merge => {
                    self.check_anchored_guards(frame, current)?;
                }
                NodeKind::End => {
                    let merge = graph
                        .merge_of(current)
                        .ok_or_else(|| CompileError::malformed(current, "end without merge"))?;
                    self.enter_merge(frame, merge, current)?;
                    current = merge;
                    continue;
                }
                NodeKind::If => {
                    let taken = self.eval_bool(frame, graph.inputs(current)[0])?;
                    let arm = if taken { 0 } else { 1 };
                    current = graph.successors(current)[arm];
                    continue;
                }
                NodeKind::Return => {
                    let value = match graph.input(current, 0) {
                        Some(v) => Some(self.eval(frame, v)?),
                        None => None,
                    };
                    return Ok(Outcome::Returned(value));
                }
                NodeKind::Deoptimize {
                    reason,
                    action,
                    speculation,
                } => {
                    return Ok(self.deopt(graph, current, DeoptSignal::new(reason, action, speculation)));
                }
                NodeKind::FixedGuard {
                    reason,
                    action,
                    speculation,
                    negated,
                } => {
                    let passed = self.eval_bool(frame, graph.inputs(current)[0])? != negated;
                    if !passed {
                        return Ok(self.deopt(graph, current, DeoptSignal::new(reason, action, speculation)));
                    }
                }
                NodeKind::IntegerDiv | NodeKind::IntegerRem => {
                    let (x, y) = (graph.inputs(current)[0], graph.inputs(current)[1]);
                    let a = self.eval_int(frame, x)?;
                    let b = self.eval_int(frame, y)?;
                    let bits = bits_of(graph, current);
                    let result = if matches!(graph.kind(current), NodeKind::IntegerRem) {
                        rem_constant(bits, a, b)
                    } else {
                        div_constant(bits, a, b)
                    };
                    match result {
                        Some(v) => {
                            frame.values.insert(current, Value::Int(v));
                        }
                        None => return Ok(Outcome::Trapped(ArithmeticFault { node: current })),
                    }
                }
                NodeKind::CheckCast { ty } => {
                    let object = self.eval(frame, graph.inputs(current)[0])?;
                    if !self.passes_cast(current, object, ty)? {
                        return Ok(self.deopt(graph, current, class_cast()));
                    }
                    frame.values.insert(current, object);
                }
                NodeKind::CheckCastDynamic => {
                    let ty = match self.eval(frame, graph.inputs(current)[0])? {
                        Value::Hub(ty) => ty,
                        other => {
                            return Err(CompileError::malformed(current, format!("cast against non-hub {other}")).into())
                        }
                    };
                    let object = self.eval(frame, graph.inputs(current)[1])?;
                    if !self.passes_cast(current, object, ty)? {
                        return Ok(self.deopt(graph, current, class_cast()));
                    }
                    frame.values.insert(current, object);
                }
                NodeKind::Invoke { target, .. } => {
                    let args = graph
                        .inputs(current)
                        .iter()
                        .map(|&a| self.eval(frame, a))
                        .collect::<Step<Vec<_>>>()?;
                    match self.call(current, target, &args, frame.depth)? {
                        Outcome::Returned(Some(v)) => {
                            frame.values.insert(current, v);
                        }
                        Outcome::Returned(None) => {}
                        other => return Ok(other),
                    }
                }
                NodeKind::Infopoint { .. } => {}
                NodeKind::BranchCounter { index } => {
                    if let Some(inst) = self.instrumentation {
                        inst.hit(index);
                    }
                }
                other => {
                    return Err(CompileError::malformed(current, format!("{} in control flow", other.mnemonic())).into())
                }
            }
            current = graph
                .next(current)
                .ok_or_else(|| CompileError::malformed(current, "missing successor"))?;
        }
    }

    fn deopt(&self, graph: &Graph, at: NodeId, signal: DeoptSignal) -> Outcome {
        trace!(method = %graph.method(), node = %at, %signal, "deoptimized");
        Outcome::Deoptimized(signal)
    }

    fn call(&self, site: NodeId, target: MethodId, args: &[Value], depth: usize) -> Step<Outcome> {
        let provider = self.provider.ok_or(CompileError::UnknownMethod(target))?;
        let callee = provider.callee(target).ok_or(CompileError::UnknownMethod(target))?;
        if depth + 1 > self.max_call_depth {
            return Err(CompileError::malformed(site, "call depth exceeded").into());
        }
        Ok(self.execute_at_depth(&callee.graph, args, depth + 1)?)
    }

    fn passes_cast(&self, node: NodeId, object: Value, ty: TypeId) -> Step<bool> {
        match object {
            Value::Null => Ok(true),
            Value::Object(o) => {
                let actual = self.type_of(node, o)?;
                Ok(self.types.is_subtype_at_runtime(actual, ty))
            }
            other => Err(CompileError::malformed(node, format!("cast of non-object {other}")).into()),
        }
    }

    fn type_of(&self, node: NodeId, object: ObjectRef) -> Step<TypeId> {
        self.heap
            .type_of(object)
            .ok_or_else(|| CompileError::malformed(node, "dangling object reference").into())
    }

    /// Assign the phis of `merge` for arrival through `end`.
    fn enter_merge(&self, frame: &mut Frame<'_>, merge: NodeId, end: NodeId) -> Step<()> {
        let graph = frame.graph;
        let slot = graph
            .inputs(merge)
            .iter()
            .position(|&e| e == end)
            .ok_or_else(|| CompileError::malformed(end, "end not listed by its merge"))?;
        let phis: Vec<NodeId> = graph
            .users(merge)
            .iter()
            .copied()
            .filter(|&u| matches!(graph.kind(u), NodeKind::Phi) && graph.inputs(u)[0] == merge)
            .collect();
        // All phis read their inputs before any of them is assigned.
        let mut incoming = Vec::with_capacity(phis.len());
        for &phi in &phis {
            incoming.push(self.eval(frame, graph.inputs(phi)[slot + 1])?);
        }
        for (phi, value) in phis.into_iter().zip(incoming) {
            frame.values.insert(phi, value);
        }
        Ok(())
    }

    fn check_anchored_guards(&self, frame: &mut Frame<'_>, anchor: NodeId) -> Step<()> {
        let graph = frame.graph;
        let guards: Vec<NodeId> = graph
            .users(anchor)
            .iter()
            .copied()
            .filter(|&u| matches!(graph.kind(u), NodeKind::Guard { .. }) && graph.input(u, 1) == Some(anchor))
            .collect();
        for guard in guards {
            let NodeKind::Guard {
                reason,
                action,
                speculation,
                negated,
            } = *graph.kind(guard)
            else {
                continue;
            };
            if self.eval_bool(frame, graph.inputs(guard)[0])? == negated {
                let outcome = self.deopt(graph, guard, DeoptSignal::new(reason, action, speculation));
                return Err(Exit::Outcome(outcome));
            }
        }
        Ok(())
    }

    fn eval_bool(&self, frame: &mut Frame<'_>, id: NodeId) -> Step<bool> {
        match self.eval(frame, id)? {
            Value::Bool(b) => Ok(b),
            other => Err(CompileError::malformed(id, format!("expected a condition, found {other}")).into()),
        }
    }

    fn eval_int(&self, frame: &mut Frame<'_>, id: NodeId) -> Step<i64> {
        match self.eval(frame, id)? {
            Value::Int(v) => Ok(v),
            other => Err(CompileError::malformed(id, format!("expected an integer, found {other}")).into()),
        }
    }

    fn eval(&self, frame: &mut Frame<'_>, id: NodeId) -> Step<Value> {
        if let Some(&v) = frame.values.get(&id) {
            return Ok(v);
        }
        let graph = frame.graph;
        let inputs = graph.inputs(id);
        let value = match graph.kind(id).clone() {
            NodeKind::Constant(c) => match c {
                Constant::Int { value, .. } => Value::Int(value),
                Constant::Bool(b) => Value::Bool(b),
                Constant::Null => Value::Null,
                Constant::Hub(ty) => Value::Hub(ty),
            },
            NodeKind::Parameter { index } => *frame
                .args
                .get(index as usize)
                .ok_or_else(|| CompileError::malformed(id, format!("missing argument {index}")))?,
            NodeKind::Binary(op) => {
                let a = self.eval_int(frame, inputs[0])?;
                let b = self.eval_int(frame, inputs[1])?;
                Value::Int(binary_constant(op, bits_of(graph, id), a, b))
            }
            NodeKind::Negate => {
                let a = self.eval_int(frame, inputs[0])?;
                Value::Int(binary_constant(BinaryOp::Sub, bits_of(graph, id), 0, a))
            }
            NodeKind::Compare(op) => {
                let bits = bits_of(graph, inputs[0]);
                let a = sign_extend(self.eval_int(frame, inputs[0])?, bits);
                let b = sign_extend(self.eval_int(frame, inputs[1])?, bits);
                Value::Bool(match op {
                    CompareOp::Equals => a == b,
                    CompareOp::LessThan => a < b,
                })
            }
            NodeKind::LogicNot => Value::Bool(!self.eval_bool(frame, inputs[0])?),
            NodeKind::ShortCircuitOr { x_negated, y_negated } => {
                let (x, y) = (inputs[0], inputs[1]);
                if self.eval_bool(frame, x)? != x_negated {
                    Value::Bool(true)
                } else {
                    Value::Bool(self.eval_bool(frame, y)? != y_negated)
                }
            }
            NodeKind::IsNull => Value::Bool(self.eval(frame, inputs[0])? == Value::Null),
            NodeKind::InstanceOf { ty, allow_null } => match self.eval(frame, inputs[0])? {
                Value::Null => Value::Bool(allow_null),
                Value::Object(o) => Value::Bool(self.types.is_subtype_at_runtime(self.type_of(id, o)?, ty)),
                other => return Err(CompileError::malformed(id, format!("instance test of {other}")).into()),
            },
            NodeKind::TypeCheck { ty } => match self.eval(frame, inputs[0])? {
                Value::Null => Value::Bool(false),
                Value::Object(o) => Value::Bool(self.type_of(id, o)? == ty),
                other => return Err(CompileError::malformed(id, format!("type check of {other}")).into()),
            },
            NodeKind::LoadHub => match self.eval(frame, inputs[0])? {
                Value::Object(o) => Value::Hub(self.type_of(id, o)?),
                other => return Err(CompileError::malformed(id, format!("hub load from {other}")).into()),
            },
            NodeKind::SubtypeCheck => {
                let sup = self.eval(frame, inputs[0])?;
                let sub = self.eval(frame, inputs[1])?;
                match (sup, sub) {
                    (Value::Hub(sup), Value::Hub(sub)) => Value::Bool(self.types.is_subtype_at_runtime(sub, sup)),
                    _ => return Err(CompileError::malformed(id, "subtype check on non-hubs").into()),
                }
            }
            NodeKind::Pi { .. } | NodeKind::GuardedValue { .. } => self.eval(frame, inputs[0])?,
            NodeKind::Phi => {
                return Err(CompileError::malformed(id, "phi read before its merge was reached").into());
            }
            other => {
                return Err(CompileError::malformed(
                    id,
                    format!("{} used before it executed", other.mnemonic()),
                )
                .into());
            }
        };
        frame.values.insert(id, value);
        Ok(value)
    }
}

struct Frame<'g> {
    graph: &'g Graph,
    args: &'g [Value],
    values: FxHashMap<NodeId, Value>,
    depth: usize,
}

fn bits_of(graph: &Graph, id: NodeId) -> u8 {
    graph.stamp(id).as_integer().map_or(64, |s| s.bits())
}

fn class_cast() -> DeoptSignal {
    DeoptSignal::new(
        DeoptReason::ClassCastException,
        DeoptAction::InvalidateReprofile,
        SpeculationId::NONE,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inline::{CalleeGraph, CalleeRegistry};
    use crate::ir::GraphBuilder;
    use crate::stamp::{ObjectStamp, Stamp};
    use crate::types::{ClassFlags, TypeHierarchy};

    #[test]
    fn test_arithmetic_and_trap() {
        let types = TypeHierarchy::new();
        let mut b = GraphBuilder::new(MethodId::new(0), "rem", &types);
        let x = b.parameter(0, Stamp::int(32));
        let y = b.parameter(1, Stamp::int(32));
        let r = b.rem(x, y);
        let one = b.int(1);
        let sum = b.add(r, one);
        b.ret(Some(sum));
        let g = b.finish().expect("valid");

        let heap = Heap::new();
        let interp = Interpreter::new(&types, &heap);
        assert_eq!(
            interp.execute(&g, &[Value::Int(17), Value::Int(5)]).expect("runs"),
            Outcome::Returned(Some(Value::Int(3)))
        );
        assert!(matches!(
            interp.execute(&g, &[Value::Int(17), Value::Int(0)]).expect("runs"),
            Outcome::Trapped(_)
        ));
    }

    #[test]
    fn test_short_circuit_protects_hub_load() {
        let types = TypeHierarchy::new();
        let a = types.define_class("A", TypeHierarchy::ROOT, &[], ClassFlags::empty());
        let mut b = GraphBuilder::new(MethodId::new(0), "sc", &types);
        let obj = b.parameter(0, Stamp::object());
        let is_null = b.is_null(obj);
        let hub = b.hub(a);
        let graph = b.graph_mut();
        let load = graph.unique(NodeKind::LoadHub, &[obj], &types);
        let test = graph.unique(NodeKind::SubtypeCheck, &[hub, load], &types);
        let or = b.short_circuit_or(is_null, false, test, false);
        b.ret(Some(or));
        let g = b.finish().expect("valid");

        let mut heap = Heap::new();
        let instance = heap.allocate(a);
        let interp = Interpreter::new(&types, &heap);
        assert_eq!(interp.execute(&g, &[Value::Null]).expect("runs").value(), Some(Value::Bool(true)));
        assert_eq!(interp.execute(&g, &[instance]).expect("runs").value(), Some(Value::Bool(true)));
    }

    #[test]
    fn test_failing_cast_deoptimizes() {
        let types = TypeHierarchy::new();
        let a = types.define_class("A", TypeHierarchy::ROOT, &[], ClassFlags::empty());
        let other = types.define_class("B", TypeHierarchy::ROOT, &[], ClassFlags::empty());
        let mut b = GraphBuilder::new(MethodId::new(0), "cast", &types);
        let obj = b.parameter(0, Stamp::Object(ObjectStamp::unrestricted()));
        let cast = b.check_cast(obj, a, 3);
        b.ret(Some(cast));
        let g = b.finish().expect("valid");

        let mut heap = Heap::new();
        let good = heap.allocate(a);
        let bad = heap.allocate(other);
        let interp = Interpreter::new(&types, &heap);
        assert_eq!(interp.execute(&g, &[good]).expect("runs").value(), Some(good));
        assert_eq!(interp.execute(&g, &[Value::Null]).expect("runs").value(), Some(Value::Null));
        assert_eq!(
            interp.execute(&g, &[bad]).expect("runs"),
            Outcome::Deoptimized(class_cast())
        );
    }

    #[test]
    fn test_phi_follows_taken_arm_and_counts_branches() {
        let types = TypeHierarchy::new();
        let mut b = GraphBuilder::new(MethodId::new(0), "phi", &types);
        let x = b.parameter(0, Stamp::int(32));
        let zero = b.int(0);
        let cond = b.compare(CompareOp::LessThan, x, zero);
        b.infopoint(2);
        let (t, f) = b.branch(cond);
        b.set_cursor(t);
        let neg = b.negate(x);
        let e1 = b.end();
        b.set_cursor(f);
        let e2 = b.end();
        let merge = b.merge(&[e1, e2]);
        let abs = b.phi(merge, &[neg, x]);
        b.ret(Some(abs));
        let mut g = b.finish().expect("valid");

        let inst = BranchInstrumentation::new(8);
        let config = crate::instrument::InstrumentationConfig::default();
        crate::instrument::instrument_branches(&mut g, &config, &inst);

        let heap = Heap::new();
        let interp = Interpreter::new(&types, &heap).with_instrumentation(&inst);
        assert_eq!(interp.execute(&g, &[Value::Int(-4)]).expect("runs").value(), Some(Value::Int(4)));
        assert_eq!(inst.state_of("phi@2"), Some(crate::instrument::BranchState::If));
        assert_eq!(interp.execute(&g, &[Value::Int(9)]).expect("runs").value(), Some(Value::Int(9)));
        assert_eq!(inst.state_of("phi@2"), Some(crate::instrument::BranchState::Both));
    }

    #[test]
    fn test_invoke_runs_callee() {
        let types = TypeHierarchy::new();
        let mut cb = GraphBuilder::new(MethodId::new(7), "twice", &types);
        let p = cb.parameter(0, Stamp::int(32));
        let s = cb.add(p, p);
        cb.ret(Some(s));
        let callee = cb.finish().expect("valid");
        let registry = CalleeRegistry::new();
        registry.register(CalleeGraph::new(callee));

        let mut b = GraphBuilder::new(MethodId::new(0), "caller", &types);
        let x = b.parameter(0, Stamp::int(32));
        let call = b.invoke(MethodId::new(7), &[x], Stamp::int(32), 0);
        b.ret(Some(call));
        let g = b.finish().expect("valid");

        let heap = Heap::new();
        let interp = Interpreter::new(&types, &heap).with_provider(&registry);
        assert_eq!(interp.execute(&g, &[Value::Int(21)]).expect("runs").value(), Some(Value::Int(42)));

        let bare = Interpreter::new(&types, &heap);
        assert_eq!(
            bare.execute(&g, &[Value::Int(1)]),
            Err(CompileError::UnknownMethod(MethodId::new(7)))
        );
    }
}
