//! Function bodies as an arena of operations with use-def edges.

use std::fmt;

use petgraph::Direction;
use petgraph::stable_graph::{NodeIndex, StableDiGraph};
use petgraph::visit::EdgeRef;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::error::{IrError, IrResult};
use crate::op::{Index, OpKind, Operation};
use crate::types::{Signature, Type};

/// Identifier of an operation (and of its result value).
pub type OpId = NodeIndex<u32>;

/// A use-def edge: the target consumes the source's result in `slot`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Use {
    /// Operand position in the consuming operation.
    pub slot: u32,
}

/// A function body.
///
/// Operations live in a stable graph arena: nodes are operations, edges run
/// from a defining operation to each user. Indices stay valid when other
/// operations are erased, so rewrites may hold [`OpId`]s across mutation.
/// Program order is the separate `body` list; a value must be defined
/// earlier in that list than any of its uses.
#[derive(Debug, Clone)]
pub struct Function {
    /// Symbol name.
    name: String,
    /// Parameter and result types.
    signature: Signature,
    /// Use-def graph.
    graph: StableDiGraph<Operation, Use, u32>,
    /// Operations in program order.
    body: Vec<OpId>,
    /// Argument operations, by parameter position.
    arguments: Vec<OpId>,
}

impl Function {
    /// Create a new function whose body holds only its arguments.
    #[allow(clippy::cast_possible_truncation)]
    pub fn new(name: impl Into<String>, signature: Signature) -> Self {
        let mut graph = StableDiGraph::default();
        let mut body = Vec::with_capacity(signature.params.len());
        for (index, ty) in signature.params.iter().enumerate() {
            let op = Operation::new(
                OpKind::Argument {
                    index: index as u32,
                },
                Some(ty.clone()),
            );
            body.push(graph.add_node(op));
        }
        let arguments = body.clone();
        Self {
            name: name.into(),
            signature,
            graph,
            body,
            arguments,
        }
    }

    /// Get the function name.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the function signature.
    #[inline]
    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    /// Get the operation holding parameter `index`.
    #[inline]
    pub fn argument(&self, index: usize) -> Option<OpId> {
        self.arguments.get(index).copied()
    }

    /// Append an operation at the end of the body.
    pub fn append(&mut self, op: Operation, operands: &[OpId]) -> IrResult<OpId> {
        let id = self.add_node(op, operands)?;
        self.body.push(id);
        Ok(id)
    }

    /// Insert an operation immediately before `anchor`.
    pub fn insert_before(
        &mut self,
        anchor: OpId,
        op: Operation,
        operands: &[OpId],
    ) -> IrResult<OpId> {
        let position = self.position(anchor).ok_or_else(|| self.not_found(anchor))?;
        let id = self.add_node(op, operands)?;
        self.body.insert(position, id);
        Ok(id)
    }

    #[allow(clippy::cast_possible_truncation)]
    fn add_node(&mut self, op: Operation, operands: &[OpId]) -> IrResult<OpId> {
        for &def in operands {
            if !self.graph.contains_node(def) {
                return Err(self.not_found(def));
            }
        }
        let id = self.graph.add_node(op);
        for (slot, &def) in operands.iter().enumerate() {
            self.graph.add_edge(def, id, Use { slot: slot as u32 });
        }
        Ok(id)
    }

    fn not_found(&self, op: OpId) -> IrError {
        IrError::OpNotFound {
            op,
            function: Some(self.name.clone()),
        }
    }

    /// Get an operation.
    #[inline]
    pub fn op(&self, id: OpId) -> Option<&Operation> {
        self.graph.node_weight(id)
    }

    /// Get an operation, failing if it does not exist.
    pub fn get(&self, id: OpId) -> IrResult<&Operation> {
        self.op(id).ok_or_else(|| self.not_found(id))
    }

    /// Result type of an operation.
    #[inline]
    pub fn result_type(&self, id: OpId) -> Option<&Type> {
        self.op(id).and_then(Operation::result_type)
    }

    /// Operands of an operation, ordered by slot.
    pub fn operands(&self, id: OpId) -> Vec<OpId> {
        let mut uses: Vec<(u32, OpId)> = self
            .graph
            .edges_directed(id, Direction::Incoming)
            .map(|e| (e.weight().slot, e.source()))
            .collect();
        uses.sort_unstable_by_key(|&(slot, _)| slot);
        uses.into_iter().map(|(_, def)| def).collect()
    }

    /// The operand in a given slot.
    pub fn operand(&self, id: OpId, slot: u32) -> Option<OpId> {
        self.graph
            .edges_directed(id, Direction::Incoming)
            .find(|e| e.weight().slot == slot)
            .map(|e| e.source())
    }

    /// Operations using the result of `id`, in creation order, without
    /// duplicates.
    pub fn users(&self, id: OpId) -> Vec<OpId> {
        let mut users: Vec<OpId> = self
            .graph
            .edges_directed(id, Direction::Outgoing)
            .map(|e| e.target())
            .collect();
        users.sort_unstable();
        users.dedup();
        users
    }

    /// Check if any operation uses the result of `id`.
    #[inline]
    pub fn has_users(&self, id: OpId) -> bool {
        self.graph
            .edges_directed(id, Direction::Outgoing)
            .next()
            .is_some()
    }

    /// Rewire operand `slot` of `user` to the result of `def`.
    pub fn set_operand(&mut self, user: OpId, slot: u32, def: OpId) -> IrResult<()> {
        if !self.graph.contains_node(def) {
            return Err(self.not_found(def));
        }
        let edge = self
            .graph
            .edges_directed(user, Direction::Incoming)
            .find(|e| e.weight().slot == slot)
            .map(|e| e.id())
            .ok_or(IrError::InvalidOperand { op: user, slot })?;
        self.graph.remove_edge(edge);
        self.graph.add_edge(def, user, Use { slot });
        Ok(())
    }

    /// Redirect every use of `old` to `new`.
    pub fn replace_all_uses(&mut self, old: OpId, new: OpId) -> IrResult<()> {
        if !self.graph.contains_node(new) {
            return Err(self.not_found(new));
        }
        let uses: Vec<_> = self
            .graph
            .edges_directed(old, Direction::Outgoing)
            .map(|e| (e.id(), e.target(), *e.weight()))
            .collect();
        for (edge, user, weight) in uses {
            self.graph.remove_edge(edge);
            self.graph.add_edge(new, user, weight);
        }
        Ok(())
    }

    /// Replace all uses of `old` with `new`, then erase `old`.
    pub fn replace_op(&mut self, old: OpId, new: OpId) -> IrResult<Operation> {
        self.replace_all_uses(old, new)?;
        self.erase(old)
    }

    /// Erase an operation whose result has no remaining users.
    ///
    /// The operation's own operand edges are dropped with it.
    pub fn erase(&mut self, id: OpId) -> IrResult<Operation> {
        if !self.graph.contains_node(id) {
            return Err(self.not_found(id));
        }
        let users = self.users(id).len();
        if users > 0 {
            return Err(IrError::OpHasUsers { op: id, users });
        }
        self.body.retain(|&op| op != id);
        self.graph.remove_node(id).ok_or_else(|| self.not_found(id))
    }

    /// Iterate over operations in program order.
    pub fn ops(&self) -> impl Iterator<Item = (OpId, &Operation)> {
        self.body.iter().map(|&id| (id, &self.graph[id]))
    }

    /// Number of operations in the body, arguments included.
    #[inline]
    pub fn num_ops(&self) -> usize {
        self.body.len()
    }

    /// Count operations matching a predicate.
    pub fn count_ops(&self, pred: impl Fn(&Operation) -> bool) -> usize {
        self.ops().filter(|(_, op)| pred(op)).count()
    }

    /// Position of an operation in program order.
    pub fn position(&self, id: OpId) -> Option<usize> {
        self.body.iter().position(|&op| op == id)
    }

    /// Value of an integer `Constant` operation.
    pub fn constant_int(&self, id: OpId) -> Option<i64> {
        match self.op(id)?.kind {
            OpKind::Constant { value } => Some(value),
            _ => None,
        }
    }

    fn resolve_index(&self, index: Index, op: OpId, slot: Option<u32>) -> Option<u64> {
        match index {
            Index::Const(value) => Some(value),
            Index::Operand => {
                let def = self.operand(op, slot?)?;
                u64::try_from(self.constant_int(def)?).ok()
            }
        }
    }

    /// Constant index of an `ExtractRef`, if it has one.
    ///
    /// An operand index counts as constant when it is produced by a
    /// non-negative integer `Constant`.
    pub fn extract_index(&self, id: OpId) -> Option<u64> {
        let op = self.op(id)?;
        match &op.kind {
            OpKind::ExtractRef { index } => {
                self.resolve_index(*index, id, op.kind.extract_index_slot())
            }
            _ => None,
        }
    }

    /// Constant bounds of a `SubVeq`, each `None` when not constant.
    pub fn subveq_bounds(&self, id: OpId) -> (Option<u64>, Option<u64>) {
        let Some(op) = self.op(id) else {
            return (None, None);
        };
        match &op.kind {
            OpKind::SubVeq { lower, upper } => {
                let (lower_slot, upper_slot) = op.kind.subveq_bound_slots();
                (
                    self.resolve_index(*lower, id, lower_slot),
                    self.resolve_index(*upper, id, upper_slot),
                )
            }
            _ => (None, None),
        }
    }

    /// Snapshot of the body for JSON debugging output.
    pub fn dump(&self) -> FunctionDump {
        FunctionDump {
            name: self.name.clone(),
            signature: self.signature.clone(),
            ops: self
                .ops()
                .map(|(id, op)| OpDump {
                    id: id.index(),
                    op: op.clone(),
                    operands: self.operands(id).iter().map(|o| o.index()).collect(),
                })
                .collect(),
        }
    }

    /// Verify the structural integrity of the body.
    ///
    /// Checks that:
    /// - Every operation in the arena appears exactly once in program order
    /// - Every operand is defined earlier in program order
    /// - Operand counts and operand types match each operation's layout
    pub fn verify(&self) -> IrResult<()> {
        if self.graph.node_count() != self.body.len() {
            return Err(IrError::InvalidBody(format!(
                "{} operations in arena but {} in program order",
                self.graph.node_count(),
                self.body.len()
            )));
        }

        let positions: FxHashMap<OpId, usize> =
            self.body.iter().enumerate().map(|(i, &id)| (id, i)).collect();
        if positions.len() != self.body.len() {
            return Err(IrError::InvalidBody(
                "operation listed twice in program order".into(),
            ));
        }

        for (position, &id) in self.body.iter().enumerate() {
            let operands = self.operands(id);
            for &def in &operands {
                match positions.get(&def) {
                    Some(&p) if p < position => {}
                    _ => return Err(IrError::UseBeforeDef { def, user: id }),
                }
            }
            self.verify_op(id, &operands)?;
        }
        Ok(())
    }

    #[allow(clippy::too_many_lines)]
    fn verify_op(&self, id: OpId, operands: &[OpId]) -> IrResult<()> {
        let op = &self.graph[id];
        let count = |expected: usize| -> IrResult<()> {
            if operands.len() == expected {
                Ok(())
            } else {
                Err(IrError::OperandCountMismatch {
                    op: id,
                    name: op.name(),
                    expected,
                    got: operands.len(),
                })
            }
        };
        let expect = |def: OpId, ok: fn(&Type) -> bool, expected: &str| -> IrResult<()> {
            match self.result_type(def) {
                Some(ty) if ok(ty) => Ok(()),
                other => Err(IrError::TypeMismatch {
                    op: id,
                    expected: expected.to_string(),
                    got: other.map_or_else(|| "no value".to_string(), ToString::to_string),
                }),
            }
        };
        let result_is = |ok: fn(&Type) -> bool, expected: &str| -> IrResult<()> {
            match &op.result {
                Some(ty) if ok(ty) => Ok(()),
                other => Err(IrError::TypeMismatch {
                    op: id,
                    expected: expected.to_string(),
                    got: other
                        .as_ref()
                        .map_or_else(|| "no value".to_string(), ToString::to_string),
                }),
            }
        };

        match &op.kind {
            OpKind::Argument { .. }
            | OpKind::Constant { .. }
            | OpKind::ConstantFloat { .. }
            | OpKind::StackSlot { .. } => count(0),
            OpKind::Alloca => {
                result_is(Type::is_quantum, "ref or veq")?;
                if op.result == Some(Type::Veq(None)) {
                    count(1)
                } else {
                    count(0)
                }
            }
            OpKind::InitializeState => {
                count(2)?;
                expect(operands[0], Type::is_veq, "veq")
            }
            OpKind::Dealloc => {
                count(1)?;
                expect(operands[0], Type::is_quantum, "ref or veq")
            }
            OpKind::ExtractRef { index } => {
                count(1 + usize::from(index.is_operand()))?;
                result_is(Type::is_ref, "ref")?;
                expect(operands[0], Type::is_veq, "veq")
            }
            OpKind::SubVeq { lower, upper } => {
                count(1 + usize::from(lower.is_operand()) + usize::from(upper.is_operand()))?;
                result_is(Type::is_veq, "veq")?;
                expect(operands[0], Type::is_veq, "veq")
            }
            OpKind::VeqSize => {
                count(1)?;
                expect(operands[0], Type::is_veq, "veq")
            }
            OpKind::Gate {
                num_params,
                num_controls,
                num_targets,
                ..
            } => {
                let params = *num_params as usize;
                let controls = *num_controls as usize;
                count(params + controls + *num_targets as usize)?;
                for &def in &operands[..params] {
                    expect(def, |t| *t == Type::F64, "f64")?;
                }
                for &def in &operands[params..params + controls] {
                    expect(def, Type::is_quantum, "ref or veq")?;
                }
                for &def in &operands[params + controls..] {
                    expect(def, Type::is_ref, "ref")?;
                }
                Ok(())
            }
            OpKind::Measure | OpKind::Reset => {
                count(1)?;
                expect(operands[0], Type::is_ref, "ref")
            }
            OpKind::Instantiate { .. } => {
                result_is(|t| t.as_callable().is_some(), "callable")
            }
            OpKind::CallCallable => {
                let Some(&callable) = operands.first() else {
                    return count(1);
                };
                let sig = self
                    .result_type(callable)
                    .and_then(Type::as_callable)
                    .ok_or_else(|| IrError::TypeMismatch {
                        op: id,
                        expected: "callable".into(),
                        got: self
                            .result_type(callable)
                            .map_or_else(|| "no value".to_string(), ToString::to_string),
                    })?;
                count(1 + sig.params.len())
            }
            OpKind::Load => {
                count(1)?;
                expect(operands[0], |t| *t == Type::Ptr, "ptr")
            }
            OpKind::Store => {
                count(2)?;
                expect(operands[1], |t| *t == Type::Ptr, "ptr")
            }
            OpKind::Call { .. } | OpKind::Return => Ok(()),
        }
    }
}

/// Serializable snapshot of a function body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionDump {
    /// Function name.
    pub name: String,
    /// Function signature.
    pub signature: Signature,
    /// Operations in program order.
    pub ops: Vec<OpDump>,
}

/// Serializable snapshot of one operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpDump {
    /// Operation index.
    pub id: usize,
    /// The operation.
    pub op: Operation,
    /// Operand indices, ordered by slot.
    pub operands: Vec<usize>,
}

impl FunctionDump {
    /// Render as pretty-printed JSON.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "func @{}(", self.name)?;
        for (i, &arg) in self.arguments.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            let ty = self.result_type(arg).map(ToString::to_string);
            write!(f, "%{}: {}", arg.index(), ty.unwrap_or_default())?;
        }
        write!(f, ")")?;
        if let Some(result) = &self.signature.result {
            write!(f, " -> {result}")?;
        }
        writeln!(f, " {{")?;
        for (id, op) in self.ops() {
            if matches!(op.kind, OpKind::Argument { .. }) {
                continue;
            }
            write!(f, "  ")?;
            if op.result.is_some() {
                write!(f, "%{} = ", id.index())?;
            }
            write!(f, "{}", op.name())?;
            write_attributes(f, &op.kind)?;
            for (i, operand) in self.operands(id).iter().enumerate() {
                let sep = if i == 0 { " " } else { ", " };
                write!(f, "{sep}%{}", operand.index())?;
            }
            if let Some(ty) = &op.result {
                write!(f, " : {ty}")?;
            }
            writeln!(f)?;
        }
        writeln!(f, "}}")
    }
}

fn write_attributes(f: &mut fmt::Formatter<'_>, kind: &OpKind) -> fmt::Result {
    let bound = |index: &Index| match index {
        Index::Const(v) => v.to_string(),
        Index::Operand => "?".to_string(),
    };
    match kind {
        OpKind::Constant { value } => write!(f, " {value}"),
        OpKind::ConstantFloat { value } => write!(f, " {value:?}"),
        OpKind::ExtractRef { index } => write!(f, "[{}]", bound(index)),
        OpKind::SubVeq { lower, upper } => write!(f, "[{}..{}]", bound(lower), bound(upper)),
        OpKind::Gate {
            gate,
            adjoint,
            num_params,
            num_controls,
            num_targets,
        } => {
            write!(f, " {gate}")?;
            if *adjoint {
                write!(f, "<adj>")?;
            }
            write!(f, " ({num_params}p, {num_controls}c, {num_targets}t)")
        }
        OpKind::Instantiate { callee } => match callee {
            crate::op::Callee::Symbol(name) => write!(f, " @{name}"),
            crate::op::Callee::Value => write!(f, " <dynamic>"),
        },
        OpKind::StackSlot { ty } => write!(f, " <{ty}>"),
        OpKind::Call { callee } => write!(f, " @{callee}"),
        _ => Ok(()),
    }
}
