//! The closed instruction sum type.
//!
//! Instructions form a small, fixed set; the analyzer dispatches on the
//! kind tag rather than through virtual calls. Each instruction carries its
//! result [`Type`] (void for stores, branches and friends) and a
//! [`MetadataMap`] the analysis writes its findings into.
//!
//! # Conventions
//!
//! - `lhs`/`rhs`: binary and comparison operands
//! - `value`: a value being stored, switched over, cast or returned
//! - `addr`: the address of a load or store
//! - `then_dest`/`else_dest`/`default_dest`: branch targets (block ids)
//! - all targets and operand references are arena indices, never pointers

use std::fmt;

use strum::EnumIter;

use crate::ir::{BlockId, ConstInt, FuncId, MetadataMap, Type, Value};

/// Binary integer opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter)]
pub enum BinaryOp {
    /// Wrapping addition.
    Add,
    /// Wrapping subtraction.
    Sub,
    /// Wrapping multiplication.
    Mul,
    /// Unsigned division.
    UDiv,
    /// Signed division.
    SDiv,
    /// Unsigned remainder.
    URem,
    /// Signed remainder.
    SRem,
    /// Left shift.
    Shl,
    /// Logical right shift.
    LShr,
    /// Arithmetic right shift.
    AShr,
    /// Bitwise and.
    And,
    /// Bitwise or.
    Or,
    /// Bitwise xor.
    Xor,
}

impl BinaryOp {
    /// Returns `true` for opcodes that interpret their operands as signed
    /// integers. Drives the sign/zero choice when operands of different
    /// widths are promoted.
    #[must_use]
    pub const fn is_signed(self) -> bool {
        matches!(self, Self::SDiv | Self::SRem | Self::AShr)
    }

    /// Returns `true` for division and remainder opcodes (divide-by-zero
    /// candidates).
    #[must_use]
    pub const fn is_division(self) -> bool {
        matches!(self, Self::UDiv | Self::SDiv | Self::URem | Self::SRem)
    }

    /// Returns `true` for shift opcodes (bad-shift candidates).
    #[must_use]
    pub const fn is_shift(self) -> bool {
        matches!(self, Self::Shl | Self::LShr | Self::AShr)
    }

    /// The textual opcode name.
    #[must_use]
    pub const fn mnemonic(self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Sub => "sub",
            Self::Mul => "mul",
            Self::UDiv => "udiv",
            Self::SDiv => "sdiv",
            Self::URem => "urem",
            Self::SRem => "srem",
            Self::Shl => "shl",
            Self::LShr => "lshr",
            Self::AShr => "ashr",
            Self::And => "and",
            Self::Or => "or",
            Self::Xor => "xor",
        }
    }
}

/// Integer cast opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CastOp {
    /// Truncate to a narrower width.
    Trunc,
    /// Zero-extend to a wider width.
    ZExt,
    /// Sign-extend to a wider width.
    SExt,
}

impl CastOp {
    /// The textual opcode name.
    #[must_use]
    pub const fn mnemonic(self) -> &'static str {
        match self {
            Self::Trunc => "trunc",
            Self::ZExt => "zext",
            Self::SExt => "sext",
        }
    }
}

/// Integer comparison predicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter)]
pub enum Predicate {
    /// Equal.
    Eq,
    /// Not equal.
    Ne,
    /// Unsigned less than.
    Ult,
    /// Unsigned less or equal.
    Ule,
    /// Unsigned greater than.
    Ugt,
    /// Unsigned greater or equal.
    Uge,
    /// Signed less than.
    Slt,
    /// Signed less or equal.
    Sle,
    /// Signed greater than.
    Sgt,
    /// Signed greater or equal.
    Sge,
}

impl Predicate {
    /// The predicate with operands swapped: `a pred b` iff `b swapped(pred) a`.
    #[must_use]
    pub const fn swapped(self) -> Self {
        match self {
            Self::Eq => Self::Eq,
            Self::Ne => Self::Ne,
            Self::Ult => Self::Ugt,
            Self::Ule => Self::Uge,
            Self::Ugt => Self::Ult,
            Self::Uge => Self::Ule,
            Self::Slt => Self::Sgt,
            Self::Sle => Self::Sge,
            Self::Sgt => Self::Slt,
            Self::Sge => Self::Sle,
        }
    }

    /// The logical negation: `a pred b` iff not `a inverse(pred) b`.
    #[must_use]
    pub const fn inverse(self) -> Self {
        match self {
            Self::Eq => Self::Ne,
            Self::Ne => Self::Eq,
            Self::Ult => Self::Uge,
            Self::Ule => Self::Ugt,
            Self::Ugt => Self::Ule,
            Self::Uge => Self::Ult,
            Self::Slt => Self::Sge,
            Self::Sle => Self::Sgt,
            Self::Sgt => Self::Sle,
            Self::Sge => Self::Slt,
        }
    }

    /// Returns `true` for predicates comparing under the signed reading.
    #[must_use]
    pub const fn is_signed(self) -> bool {
        matches!(self, Self::Slt | Self::Sle | Self::Sgt | Self::Sge)
    }

    /// The textual predicate name.
    #[must_use]
    pub const fn mnemonic(self) -> &'static str {
        match self {
            Self::Eq => "eq",
            Self::Ne => "ne",
            Self::Ult => "ult",
            Self::Ule => "ule",
            Self::Ugt => "ugt",
            Self::Uge => "uge",
            Self::Slt => "slt",
            Self::Sle => "sle",
            Self::Sgt => "sgt",
            Self::Sge => "sge",
        }
    }
}

/// The operation an [`Instruction`] performs.
#[derive(Debug, Clone, PartialEq)]
pub enum InstKind {
    /// `result = op lhs, rhs` over the thirteen integer binary opcodes.
    Binary {
        /// The opcode.
        op: BinaryOp,
        /// Left operand.
        lhs: Value,
        /// Right operand.
        rhs: Value,
    },

    /// `result = trunc/zext/sext value` to the instruction's result width.
    Cast {
        /// The cast opcode.
        op: CastOp,
        /// The value being converted.
        value: Value,
    },

    /// `result = cond ? on_true : on_false`.
    Select {
        /// Boolean selector.
        cond: Value,
        /// Value when the selector is true.
        on_true: Value,
        /// Value when the selector is false.
        on_false: Value,
    },

    /// SSA merge of per-predecessor incoming values.
    Phi {
        /// `(value, predecessor)` pairs, one per incoming edge.
        incomings: Vec<(Value, BlockId)>,
    },

    /// `result = load addr`.
    Load {
        /// The address read from.
        addr: Value,
    },

    /// `store value, addr` (void result).
    Store {
        /// The value written.
        value: Value,
        /// The address written to.
        addr: Value,
    },

    /// `result = call callee(args)`; void result for void callees.
    Call {
        /// The called function.
        callee: FuncId,
        /// Actual arguments in positional order.
        args: Vec<Value>,
    },

    /// `result = icmp pred lhs, rhs` (an `i1`).
    ICmp {
        /// The comparison predicate.
        pred: Predicate,
        /// Left operand.
        lhs: Value,
        /// Right operand.
        rhs: Value,
    },

    /// Conditional or unconditional branch terminator.
    Branch {
        /// Boolean condition; `None` for an unconditional branch.
        cond: Option<Value>,
        /// Target when the condition holds (or the sole target).
        then_dest: BlockId,
        /// Target when the condition fails; `None` when unconditional.
        else_dest: Option<BlockId>,
    },

    /// Multi-way branch terminator.
    Switch {
        /// The integer scrutinee.
        value: Value,
        /// Target when no case matches.
        default_dest: BlockId,
        /// `(case constant, target)` pairs.
        cases: Vec<(ConstInt, BlockId)>,
    },

    /// Return terminator; `None` for void functions.
    Return {
        /// The returned value, if any.
        value: Option<Value>,
    },

    /// `result = getelementptr base, indices` - address computation into an
    /// aggregate. One-dimensional global integer arrays are addressed as
    /// `(base, [0, index])`.
    GetElementPtr {
        /// The aggregate base address.
        base: Value,
        /// Index path into the aggregate.
        indices: Vec<Value>,
    },
}

/// An instruction: an [`InstKind`], its result [`Type`], and attached
/// metadata.
///
/// Instructions live in a per-function arena and are addressed by
/// [`crate::ir::InstId`]; the id doubles as the SSA name of the result.
#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    kind: InstKind,
    ty: Type,
    metadata: MetadataMap,
}

impl Instruction {
    /// Creates an instruction with no metadata.
    #[must_use]
    pub fn new(kind: InstKind, ty: Type) -> Self {
        Self {
            kind,
            ty,
            metadata: MetadataMap::new(),
        }
    }

    /// Returns the operation.
    #[must_use]
    pub const fn kind(&self) -> &InstKind {
        &self.kind
    }

    /// Returns the result type.
    #[must_use]
    pub const fn ty(&self) -> Type {
        self.ty
    }

    /// Returns the attached metadata.
    #[must_use]
    pub const fn metadata(&self) -> &MetadataMap {
        &self.metadata
    }

    /// Returns the attached metadata for writing.
    pub fn metadata_mut(&mut self) -> &mut MetadataMap {
        &mut self.metadata
    }

    /// Returns `true` if this instruction ends a basic block.
    #[must_use]
    pub const fn is_terminator(&self) -> bool {
        matches!(
            self.kind,
            InstKind::Branch { .. } | InstKind::Switch { .. } | InstKind::Return { .. }
        )
    }

    /// Returns `true` if this instruction defines a value.
    #[must_use]
    pub const fn has_result(&self) -> bool {
        !self.ty.is_void()
    }

    /// Collects every operand [`Value`] this instruction reads.
    ///
    /// Branch/switch targets and phi predecessor blocks are not values and
    /// are not included.
    #[must_use]
    pub fn operands(&self) -> Vec<Value> {
        match &self.kind {
            InstKind::Binary { lhs, rhs, .. } | InstKind::ICmp { lhs, rhs, .. } => {
                vec![*lhs, *rhs]
            }
            InstKind::Cast { value, .. } => vec![*value],
            InstKind::Select {
                cond,
                on_true,
                on_false,
            } => vec![*cond, *on_true, *on_false],
            InstKind::Phi { incomings } => incomings.iter().map(|(v, _)| *v).collect(),
            InstKind::Load { addr } => vec![*addr],
            InstKind::Store { value, addr } => vec![*value, *addr],
            InstKind::Call { args, .. } => args.clone(),
            InstKind::Branch { cond, .. } => cond.iter().copied().collect(),
            InstKind::Switch { value, .. } => vec![*value],
            InstKind::Return { value } => value.iter().copied().collect(),
            InstKind::GetElementPtr { base, indices } => {
                let mut ops = vec![*base];
                ops.extend(indices.iter().copied());
                ops
            }
        }
    }

    /// Returns the successor blocks if this is a terminator.
    #[must_use]
    pub fn successors(&self) -> Vec<BlockId> {
        match &self.kind {
            InstKind::Branch {
                then_dest,
                else_dest,
                ..
            } => {
                let mut succs = vec![*then_dest];
                succs.extend(*else_dest);
                succs
            }
            InstKind::Switch {
                default_dest,
                cases,
                ..
            } => {
                let mut succs = vec![*default_dest];
                succs.extend(cases.iter().map(|(_, bb)| *bb));
                succs
            }
            _ => Vec::new(),
        }
    }

    /// Replaces every operand occurrence of `from` with `to`.
    ///
    /// Used when source-function arguments are rewritten to synthetic
    /// calls. Targets and phi predecessor blocks are untouched.
    pub fn replace_operand(&mut self, from: Value, to: Value) {
        let repl = |v: &mut Value| {
            if *v == from {
                *v = to;
            }
        };
        match &mut self.kind {
            InstKind::Binary { lhs, rhs, .. } | InstKind::ICmp { lhs, rhs, .. } => {
                repl(lhs);
                repl(rhs);
            }
            InstKind::Cast { value, .. } | InstKind::Switch { value, .. } => repl(value),
            InstKind::Select {
                cond,
                on_true,
                on_false,
            } => {
                repl(cond);
                repl(on_true);
                repl(on_false);
            }
            InstKind::Phi { incomings } => {
                for (v, _) in incomings {
                    repl(v);
                }
            }
            InstKind::Load { addr } => repl(addr),
            InstKind::Store { value, addr } => {
                repl(value);
                repl(addr);
            }
            InstKind::Call { args, .. } => {
                for arg in args {
                    repl(arg);
                }
            }
            InstKind::Branch { cond, .. } => {
                if let Some(c) = cond {
                    repl(c);
                }
            }
            InstKind::Return { value } => {
                if let Some(v) = value {
                    repl(v);
                }
            }
            InstKind::GetElementPtr { base, indices } => {
                repl(base);
                for idx in indices {
                    repl(idx);
                }
            }
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            InstKind::Binary { op, lhs, rhs } => {
                write!(f, "{} {} {lhs}, {rhs}", op.mnemonic(), self.ty)
            }
            InstKind::Cast { op, value } => {
                write!(f, "{} {value} to {}", op.mnemonic(), self.ty)
            }
            InstKind::Select {
                cond,
                on_true,
                on_false,
            } => write!(f, "select {cond}, {on_true}, {on_false}"),
            InstKind::Phi { incomings } => {
                write!(f, "phi {} ", self.ty)?;
                for (i, (v, bb)) in incomings.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "[ {v}, bb{} ]", bb.index())?;
                }
                Ok(())
            }
            InstKind::Load { addr } => write!(f, "load {}, {addr}", self.ty),
            InstKind::Store { value, addr } => write!(f, "store {value}, {addr}"),
            InstKind::Call { callee, args } => {
                write!(f, "call {} fn{}(", self.ty, callee.index())?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{arg}")?;
                }
                write!(f, ")")
            }
            InstKind::ICmp { pred, lhs, rhs } => {
                write!(f, "icmp {} {lhs}, {rhs}", pred.mnemonic())
            }
            InstKind::Branch {
                cond: Some(c),
                then_dest,
                else_dest: Some(e),
            } => write!(f, "br {c}, bb{}, bb{}", then_dest.index(), e.index()),
            InstKind::Branch { then_dest, .. } => write!(f, "br bb{}", then_dest.index()),
            InstKind::Switch {
                value,
                default_dest,
                cases,
            } => {
                write!(f, "switch {value}, bb{} [", default_dest.index())?;
                for (i, (c, bb)) in cases.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{c} -> bb{}", bb.index())?;
                }
                write!(f, "]")
            }
            InstKind::Return { value: Some(v) } => write!(f, "ret {v}"),
            InstKind::Return { value: None } => write!(f, "ret void"),
            InstKind::GetElementPtr { base, indices } => {
                write!(f, "getelementptr {base}")?;
                for idx in indices {
                    write!(f, ", {idx}")?;
                }
                Ok(())
            }
        }?;
        write!(f, "{}", self.metadata)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::InstId;
    use strum::IntoEnumIterator;

    #[test]
    fn test_predicate_swapped_involution() {
        for pred in Predicate::iter() {
            assert_eq!(pred.swapped().swapped(), pred);
        }
    }

    #[test]
    fn test_predicate_inverse_involution() {
        for pred in Predicate::iter() {
            assert_eq!(pred.inverse().inverse(), pred);
        }
    }

    #[test]
    fn test_binary_op_classes() {
        assert!(BinaryOp::SDiv.is_signed());
        assert!(BinaryOp::AShr.is_signed());
        assert!(!BinaryOp::Add.is_signed());
        assert!(BinaryOp::URem.is_division());
        assert!(!BinaryOp::Shl.is_division());
        assert!(BinaryOp::LShr.is_shift());
        assert!(!BinaryOp::Xor.is_shift());
    }

    #[test]
    fn test_instruction_operands_and_successors() {
        let a = Value::Inst(InstId::new(0));
        let b = Value::Inst(InstId::new(1));
        let add = Instruction::new(
            InstKind::Binary {
                op: BinaryOp::Add,
                lhs: a,
                rhs: b,
            },
            Type::Int(32),
        );
        assert_eq!(add.operands(), vec![a, b]);
        assert!(add.successors().is_empty());
        assert!(!add.is_terminator());
        assert!(add.has_result());

        let br = Instruction::new(
            InstKind::Branch {
                cond: Some(a),
                then_dest: BlockId::new(1),
                else_dest: Some(BlockId::new(2)),
            },
            Type::Void,
        );
        assert!(br.is_terminator());
        assert!(!br.has_result());
        assert_eq!(br.successors(), vec![BlockId::new(1), BlockId::new(2)]);
    }

    #[test]
    fn test_instruction_replace_operand() {
        let old = Value::Arg(0);
        let new = Value::Inst(InstId::new(9));
        let mut inst = Instruction::new(
            InstKind::Binary {
                op: BinaryOp::Mul,
                lhs: old,
                rhs: old,
            },
            Type::Int(32),
        );
        inst.replace_operand(old, new);
        assert_eq!(inst.operands(), vec![new, new]);
    }

    #[test]
    fn test_instruction_display_carries_metadata() {
        let mut inst = Instruction::new(
            InstKind::Return {
                value: Some(Value::Arg(0)),
            },
            Type::Void,
        );
        inst.metadata_mut().set(crate::ir::metadata::SINK, "return");
        assert_eq!(format!("{inst}"), "ret %arg0, !mkint.sink !\"return\"");
    }
}
