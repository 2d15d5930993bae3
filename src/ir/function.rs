//! Functions: signatures, block lists, and the instruction arena.
//!
//! A function owns all of its instructions in a single arena indexed by
//! [`InstId`]; blocks hold ordered id lists into that arena. A function
//! with no blocks is a declaration - its body is unknown to the analysis
//! and its behavior is approximated conservatively.

use std::fmt;

use crate::ir::{BasicBlock, BlockId, InstKind, Instruction, Type, Value};

/// Unique identifier of a function within a module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FuncId(usize);

impl FuncId {
    /// Creates a function id from an index.
    #[must_use]
    pub const fn new(index: usize) -> Self {
        Self(index)
    }

    /// Returns the underlying index.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

/// Unique identifier of an instruction within one function's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstId(usize);

impl InstId {
    /// Creates an instruction id from an index.
    #[must_use]
    pub const fn new(index: usize) -> Self {
        Self(index)
    }

    /// Returns the underlying index.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

/// A function: signature plus (for definitions) blocks and instructions.
#[derive(Debug, Clone)]
pub struct Function {
    name: String,
    params: Vec<Type>,
    ret: Type,
    blocks: Vec<BasicBlock>,
    insts: Vec<Instruction>,
}

impl Function {
    /// Creates a declaration: a signature with no body.
    #[must_use]
    pub fn declaration(name: impl Into<String>, params: Vec<Type>, ret: Type) -> Self {
        Self {
            name: name.into(),
            params,
            ret,
            blocks: Vec::new(),
            insts: Vec::new(),
        }
    }

    /// Returns the function name (as emitted by the IR producer).
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the parameter types.
    #[must_use]
    pub fn params(&self) -> &[Type] {
        &self.params
    }

    /// Returns the return type.
    #[must_use]
    pub const fn ret(&self) -> Type {
        self.ret
    }

    /// Returns `true` if this function has no body.
    #[must_use]
    pub fn is_declaration(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Returns the entry block id, or `None` for declarations.
    #[must_use]
    pub fn entry_block(&self) -> Option<BlockId> {
        if self.blocks.is_empty() {
            None
        } else {
            Some(BlockId::new(0))
        }
    }

    /// Returns a block by id.
    #[must_use]
    pub fn block(&self, id: BlockId) -> Option<&BasicBlock> {
        self.blocks.get(id.index())
    }

    /// Iterates blocks in program order.
    pub fn blocks(&self) -> impl Iterator<Item = (BlockId, &BasicBlock)> {
        self.blocks
            .iter()
            .enumerate()
            .map(|(i, bb)| (BlockId::new(i), bb))
    }

    /// Returns the number of blocks.
    #[must_use]
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Returns an instruction by id.
    #[must_use]
    pub fn inst(&self, id: InstId) -> Option<&Instruction> {
        self.insts.get(id.index())
    }

    /// Returns an instruction by id, for writing.
    pub fn inst_mut(&mut self, id: InstId) -> Option<&mut Instruction> {
        self.insts.get_mut(id.index())
    }

    /// Iterates every instruction in the arena with its id.
    ///
    /// Arena order equals creation order, which for built functions is
    /// program order per block.
    pub fn instructions(&self) -> impl Iterator<Item = (InstId, &Instruction)> {
        self.insts
            .iter()
            .enumerate()
            .map(|(i, inst)| (InstId::new(i), inst))
    }

    /// Returns the terminator of a block, if the block is complete.
    #[must_use]
    pub fn terminator(&self, block: BlockId) -> Option<(InstId, &Instruction)> {
        let id = self.block(block)?.last_inst()?;
        let inst = self.inst(id)?;
        inst.is_terminator().then_some((id, inst))
    }

    /// Returns the successor blocks of `block`.
    #[must_use]
    pub fn successors(&self, block: BlockId) -> Vec<BlockId> {
        self.terminator(block)
            .map(|(_, t)| t.successors())
            .unwrap_or_default()
    }

    /// Appends a new empty block and returns its id.
    pub fn add_block(&mut self) -> BlockId {
        self.blocks.push(BasicBlock::new());
        BlockId::new(self.blocks.len() - 1)
    }

    /// Appends an instruction to `block`, returning its id.
    pub(crate) fn push_inst(&mut self, block: BlockId, inst: Instruction) -> InstId {
        let id = InstId::new(self.insts.len());
        self.insts.push(inst);
        self.blocks[block.index()].push(id);
        id
    }

    /// Inserts an instruction at the entry block's first insertion point.
    ///
    /// Anchors synthesized by the taint marker land here, ahead of any use
    /// of the rewritten arguments.
    pub fn insert_at_entry(&mut self, inst: Instruction) -> Option<InstId> {
        let entry = self.entry_block()?;
        let id = InstId::new(self.insts.len());
        self.insts.push(inst);
        self.blocks[entry.index()].insert_front(id);
        Some(id)
    }

    /// Returns `true` if argument `index` is read by any instruction.
    #[must_use]
    pub fn arg_has_uses(&self, index: usize) -> bool {
        self.insts
            .iter()
            .any(|inst| inst.operands().contains(&Value::Arg(index)))
    }

    /// Replaces every use of argument `index` with `new`, skipping the
    /// instruction `except` (the replacement's own definition).
    pub fn replace_arg_uses(&mut self, index: usize, new: Value, except: InstId) {
        for (i, inst) in self.insts.iter_mut().enumerate() {
            if i != except.index() {
                inst.replace_operand(Value::Arg(index), new);
            }
        }
    }

    /// Returns the ids of every `Return` instruction.
    #[must_use]
    pub fn return_insts(&self) -> Vec<InstId> {
        self.instructions()
            .filter(|(_, inst)| matches!(inst.kind(), InstKind::Return { .. }))
            .map(|(id, _)| id)
            .collect()
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} @{}(", self.ret, self.name)?;
        for (i, p) in self.params.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{p} %arg{i}")?;
        }
        if self.is_declaration() {
            return writeln!(f, ")");
        }
        writeln!(f, ") {{")?;
        for (id, bb) in self.blocks() {
            writeln!(f, "{id}:")?;
            for &inst_id in bb.insts() {
                let inst = &self.insts[inst_id.index()];
                if inst.has_result() {
                    writeln!(f, "  %{} = {inst}", inst_id.index())?;
                } else {
                    writeln!(f, "  {inst}")?;
                }
            }
        }
        writeln!(f, "}}")
    }
}
