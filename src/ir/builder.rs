//! Construction of functions in SSA form.
//!
//! [`FunctionBuilder`] is the write-side API used by IR producers and by
//! tests. It appends instructions to a current block, enforces the single
//! structural invariant the analysis depends on (exactly one terminator,
//! at the end of each block), and computes result types so call sites stay
//! terse.
//!
//! # Examples
//!
//! ```rust,ignore
//! use mkint::ir::{BinaryOp, ConstInt, FunctionBuilder, Predicate, Type, Value};
//!
//! let mut b = FunctionBuilder::new("sys_demo", vec![Type::Int(32)], Type::Int(32));
//! let entry = b.add_block();
//! let exit = b.add_block();
//! b.switch_to(entry);
//! let doubled = b.binary(BinaryOp::Add, Value::Arg(0), Value::Arg(0))?;
//! b.jump(exit)?;
//! b.switch_to(exit);
//! b.ret(Some(doubled))?;
//! let func = b.finish()?;
//! ```

use crate::ir::{
    BinaryOp, BlockId, CastOp, ConstInt, FuncId, Function, InstId, InstKind, Instruction,
    Predicate, Type, Value,
};
use crate::Result;

/// Incremental builder for one function body.
#[derive(Debug)]
pub struct FunctionBuilder {
    func: Function,
    current: Option<BlockId>,
}

impl FunctionBuilder {
    /// Starts building a function with the given signature.
    #[must_use]
    pub fn new(name: impl Into<String>, params: Vec<Type>, ret: Type) -> Self {
        Self {
            func: Function::declaration(name, params, ret),
            current: None,
        }
    }

    /// Appends a new block. The first block added is the entry block.
    pub fn add_block(&mut self) -> BlockId {
        self.func.add_block()
    }

    /// Makes `block` the insertion point for subsequent instructions.
    pub fn switch_to(&mut self, block: BlockId) {
        self.current = Some(block);
    }

    /// Returns the argument value for parameter `index`.
    #[must_use]
    pub const fn arg(&self, index: usize) -> Value {
        Value::Arg(index)
    }

    /// Returns an integer constant value of the given width.
    #[must_use]
    pub fn const_int(&self, width: u32, value: u64) -> Value {
        Value::Const(ConstInt::new(width, value))
    }

    fn push(&mut self, kind: InstKind, ty: Type) -> Result<InstId> {
        let block = self
            .current
            .ok_or_else(|| malformed_error!("no current block in {}", self.func.name()))?;
        if self.func.terminator(block).is_some() {
            return Err(malformed_error!(
                "instruction appended after terminator in {}::{block}",
                self.func.name()
            ));
        }
        Ok(self.func.push_inst(block, Instruction::new(kind, ty)))
    }

    fn value_width(&self, value: Value) -> Option<u32> {
        match value {
            Value::Const(c) => Some(c.width()),
            Value::Arg(i) => self.func.params().get(i).and_then(Type::int_width),
            Value::Inst(id) => self.func.inst(id).and_then(|inst| inst.ty().int_width()),
            Value::Global(_) => None,
        }
    }

    /// Appends a binary operation; the result width is the wider operand's.
    pub fn binary(&mut self, op: BinaryOp, lhs: Value, rhs: Value) -> Result<Value> {
        let lw = self.value_width(lhs);
        let rw = self.value_width(rhs);
        let width = match (lw, rw) {
            (Some(a), Some(b)) => a.max(b),
            (Some(a), None) | (None, Some(a)) => a,
            (None, None) => {
                return Err(malformed_error!(
                    "binary {} on non-integer operands in {}",
                    op.mnemonic(),
                    self.func.name()
                ))
            }
        };
        let id = self.push(InstKind::Binary { op, lhs, rhs }, Type::Int(width))?;
        Ok(Value::Inst(id))
    }

    /// Appends a comparison; the result is an `i1`.
    pub fn icmp(&mut self, pred: Predicate, lhs: Value, rhs: Value) -> Result<Value> {
        let id = self.push(InstKind::ICmp { pred, lhs, rhs }, Type::Int(1))?;
        Ok(Value::Inst(id))
    }

    /// Appends a cast to `width` bits.
    pub fn cast(&mut self, op: CastOp, value: Value, width: u32) -> Result<Value> {
        let id = self.push(InstKind::Cast { op, value }, Type::Int(width))?;
        Ok(Value::Inst(id))
    }

    /// Appends a select; the result type is taken from the true operand.
    pub fn select(&mut self, cond: Value, on_true: Value, on_false: Value) -> Result<Value> {
        let width = self
            .value_width(on_true)
            .or_else(|| self.value_width(on_false))
            .ok_or_else(|| {
                malformed_error!("select over non-integer operands in {}", self.func.name())
            })?;
        let id = self.push(
            InstKind::Select {
                cond,
                on_true,
                on_false,
            },
            Type::Int(width),
        )?;
        Ok(Value::Inst(id))
    }

    /// Appends a phi of type `i<width>` over `(value, predecessor)` pairs.
    pub fn phi(&mut self, width: u32, incomings: Vec<(Value, BlockId)>) -> Result<Value> {
        let id = self.push(InstKind::Phi { incomings }, Type::Int(width))?;
        Ok(Value::Inst(id))
    }

    /// Appends a load producing `ty`.
    pub fn load(&mut self, ty: Type, addr: Value) -> Result<Value> {
        let id = self.push(InstKind::Load { addr }, ty)?;
        Ok(Value::Inst(id))
    }

    /// Appends a store.
    pub fn store(&mut self, value: Value, addr: Value) -> Result<()> {
        self.push(InstKind::Store { value, addr }, Type::Void)?;
        Ok(())
    }

    /// Appends a call; `ret` is the callee's return type.
    pub fn call(&mut self, callee: FuncId, ret: Type, args: Vec<Value>) -> Result<Value> {
        let id = self.push(InstKind::Call { callee, args }, ret)?;
        Ok(Value::Inst(id))
    }

    /// Appends an address computation into `base`.
    pub fn gep(&mut self, base: Value, indices: Vec<Value>) -> Result<Value> {
        let id = self.push(InstKind::GetElementPtr { base, indices }, Type::Ptr)?;
        Ok(Value::Inst(id))
    }

    /// Terminates the current block with a conditional branch.
    pub fn branch(&mut self, cond: Value, then_dest: BlockId, else_dest: BlockId) -> Result<()> {
        self.push(
            InstKind::Branch {
                cond: Some(cond),
                then_dest,
                else_dest: Some(else_dest),
            },
            Type::Void,
        )?;
        Ok(())
    }

    /// Terminates the current block with an unconditional branch.
    pub fn jump(&mut self, dest: BlockId) -> Result<()> {
        self.push(
            InstKind::Branch {
                cond: None,
                then_dest: dest,
                else_dest: None,
            },
            Type::Void,
        )?;
        Ok(())
    }

    /// Terminates the current block with a switch.
    pub fn switch(
        &mut self,
        value: Value,
        default_dest: BlockId,
        cases: Vec<(ConstInt, BlockId)>,
    ) -> Result<()> {
        self.push(
            InstKind::Switch {
                value,
                default_dest,
                cases,
            },
            Type::Void,
        )?;
        Ok(())
    }

    /// Terminates the current block with a return.
    pub fn ret(&mut self, value: Option<Value>) -> Result<()> {
        self.push(InstKind::Return { value }, Type::Void)?;
        Ok(())
    }

    /// Finishes the function, checking that every block is terminated.
    pub fn finish(self) -> Result<Function> {
        for (id, _) in self.func.blocks() {
            if self.func.terminator(id).is_none() {
                return Err(malformed_error!(
                    "block {id} of {} has no terminator",
                    self.func.name()
                ));
            }
        }
        Ok(self.func)
    }
}
