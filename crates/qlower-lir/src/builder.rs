//! Incremental construction of target functions.

use crate::error::{LirError, LirResult};
use crate::function::{Block, BlockId, Callee, Inst, InstId, InstKind, LirFunction, Terminator, Value};
use crate::types::{FnSig, LirType};

/// Builds one [`LirFunction`], appending at the end of a current block.
pub struct FunctionBuilder {
    /// The function under construction.
    function: LirFunction,
    /// Block receiving new instructions.
    current: BlockId,
    /// Number of stack allocations hoisted to the top of the entry block.
    entry_allocas: usize,
}

impl FunctionBuilder {
    /// Start a function with an empty `entry` block.
    pub fn new(name: impl Into<String>, sig: FnSig) -> Self {
        Self {
            function: LirFunction {
                name: name.into(),
                sig,
                blocks: vec![Block {
                    label: "entry".into(),
                    insts: vec![],
                    terminator: None,
                }],
                insts: vec![],
            },
            current: BlockId(0),
            entry_allocas: 0,
        }
    }

    /// The function built so far.
    pub fn function(&self) -> &LirFunction {
        &self.function
    }

    /// Create a new block with a label derived from `label`.
    ///
    /// Labels are made unique by appending the block number on collision.
    #[allow(clippy::cast_possible_truncation)]
    pub fn append_block(&mut self, label: &str) -> BlockId {
        let id = BlockId(self.function.blocks.len() as u32);
        let label = if self.function.block_by_label(label).is_some() {
            format!("{label}.{}", id.0)
        } else {
            label.to_string()
        };
        self.function.blocks.push(Block {
            label,
            insts: vec![],
            terminator: None,
        });
        id
    }

    /// Make `block` the insertion block.
    pub fn position_at_end(&mut self, block: BlockId) {
        self.current = block;
    }

    /// The current insertion block.
    #[inline]
    pub fn current_block(&self) -> BlockId {
        self.current
    }

    fn current_mut(&mut self) -> LirResult<&mut Block> {
        let block = &mut self.function.blocks[self.current.0 as usize];
        if block.terminator.is_some() {
            return Err(LirError::BlockTerminated(block.label.clone()));
        }
        Ok(block)
    }

    #[allow(clippy::cast_possible_truncation)]
    fn new_inst(&mut self, kind: InstKind, ty: LirType) -> InstId {
        let id = InstId(self.function.insts.len() as u32);
        self.function.insts.push(Inst { kind, ty });
        id
    }

    /// Append an instruction to the current block.
    pub fn push(&mut self, kind: InstKind, ty: LirType) -> LirResult<Value> {
        self.current_mut()?;
        let id = self.new_inst(kind, ty);
        self.current_mut()?.insts.push(id);
        Ok(Value::Inst(id))
    }

    /// Stack allocation hoisted to the top of the entry block.
    pub fn entry_alloca(&mut self, ty: LirType) -> Value {
        let id = self.new_inst(InstKind::Alloca { ty }, LirType::Ptr);
        self.function.blocks[0].insts.insert(self.entry_allocas, id);
        self.entry_allocas += 1;
        Value::Inst(id)
    }

    /// Direct call.
    pub fn call(&mut self, callee: &str, args: Vec<Value>, ret: LirType) -> LirResult<Value> {
        self.push(
            InstKind::Call {
                callee: Callee::Direct(callee.to_string()),
                args,
            },
            ret,
        )
    }

    /// Call through a function pointer.
    pub fn call_indirect(&mut self, target: Value, args: Vec<Value>, ret: LirType) -> LirResult<Value> {
        self.push(
            InstKind::Call {
                callee: Callee::Indirect(target),
                args,
            },
            ret,
        )
    }

    /// Load a value of type `ty`.
    pub fn load(&mut self, ty: LirType, ptr: Value) -> LirResult<Value> {
        self.push(InstKind::Load { ptr }, ty)
    }

    /// Store a value.
    pub fn store(&mut self, value: Value, ptr: Value) -> LirResult<()> {
        self.push(InstKind::Store { value, ptr }, LirType::Void)
            .map(|_| ())
    }

    /// Address of a struct field.
    pub fn field_ptr(&mut self, aggregate: LirType, ptr: Value, index: u32) -> LirResult<Value> {
        self.push(
            InstKind::FieldPtr {
                aggregate,
                ptr,
                index,
            },
            LirType::Ptr,
        )
    }

    /// Struct value from fields.
    pub fn aggregate(&mut self, ty: LirType, fields: Vec<Value>) -> LirResult<Value> {
        self.push(InstKind::Aggregate { fields }, ty)
    }

    /// Field of a struct value.
    pub fn extract_value(&mut self, aggregate: Value, index: u32, ty: LirType) -> LirResult<Value> {
        self.push(InstKind::ExtractValue { aggregate, index }, ty)
    }

    /// Null test on a pointer.
    pub fn is_null(&mut self, value: Value) -> LirResult<Value> {
        self.push(InstKind::IsNull { value }, LirType::I1)
    }

    /// Float negation.
    pub fn fneg(&mut self, value: Value) -> LirResult<Value> {
        self.push(InstKind::FNeg { value }, LirType::F64)
    }

    /// Value merge.
    pub fn phi(&mut self, ty: LirType, incoming: Vec<(Value, BlockId)>) -> LirResult<Value> {
        self.push(InstKind::Phi { incoming }, ty)
    }

    fn terminate(&mut self, terminator: Terminator) -> LirResult<()> {
        self.current_mut()?.terminator = Some(terminator);
        Ok(())
    }

    /// Unconditional branch.
    pub fn br(&mut self, target: BlockId) -> LirResult<()> {
        self.terminate(Terminator::Br(target))
    }

    /// Conditional branch.
    pub fn cond_br(&mut self, cond: Value, then_block: BlockId, else_block: BlockId) -> LirResult<()> {
        self.terminate(Terminator::CondBr {
            cond,
            then_block,
            else_block,
        })
    }

    /// Return.
    pub fn ret(&mut self, value: Option<Value>) -> LirResult<()> {
        self.terminate(Terminator::Ret(value))
    }

    /// Finish, checking every block is terminated.
    pub fn finish(self) -> LirResult<LirFunction> {
        if let Some(block) = self
            .function
            .blocks
            .iter()
            .find(|b| b.terminator.is_none())
        {
            return Err(LirError::UnterminatedBlock {
                function: self.function.name.clone(),
                block: block.label.clone(),
            });
        }
        Ok(self.function)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_diamond_with_phi() {
        let mut b = FunctionBuilder::new("pick", FnSig::new([LirType::Ptr], LirType::I64));
        let cond = b.is_null(Value::Param(0)).unwrap();
        let then_block = b.append_block("then");
        let else_block = b.append_block("else");
        let join = b.append_block("join");
        b.cond_br(cond, then_block, else_block).unwrap();

        b.position_at_end(then_block);
        b.br(join).unwrap();
        b.position_at_end(else_block);
        b.br(join).unwrap();

        b.position_at_end(join);
        let merged = b
            .phi(
                LirType::I64,
                vec![(Value::i64(0), then_block), (Value::i64(1), else_block)],
            )
            .unwrap();
        b.ret(Some(merged)).unwrap();

        let f = b.finish().unwrap();
        let text = f.to_string();
        assert!(text.contains("br i1 %0, label %then, label %else"));
        assert!(text.contains("phi i64 [ 0, %then ], [ 1, %else ]"));
        assert!(text.contains("ret i64 %1"));
    }

    #[test]
    fn test_push_after_terminator_fails() {
        let mut b = FunctionBuilder::new("f", FnSig::new([], LirType::Void));
        b.ret(None).unwrap();
        assert!(matches!(
            b.call("g", vec![], LirType::Void),
            Err(LirError::BlockTerminated(_))
        ));
    }

    #[test]
    fn test_entry_allocas_hoisted() {
        let mut b = FunctionBuilder::new("f", FnSig::new([], LirType::Void));
        b.call("g", vec![], LirType::Void).unwrap();
        let slot = b.entry_alloca(LirType::I64);
        let f = {
            b.ret(None).unwrap();
            b.finish().unwrap()
        };
        assert_eq!(f.blocks[0].insts[0], match slot {
            Value::Inst(id) => id,
            _ => unreachable!(),
        });
    }

    #[test]
    fn test_unterminated_block_rejected() {
        let mut b = FunctionBuilder::new("f", FnSig::new([], LirType::Void));
        b.append_block("dangling");
        b.ret(None).unwrap();
        assert!(matches!(b.finish(), Err(LirError::UnterminatedBlock { .. })));
    }
}
