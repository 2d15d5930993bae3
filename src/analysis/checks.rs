//! The bug classifier.
//!
//! Consumes the post-fixed-point analysis state and writes `mkint.err`
//! annotations: dead branch outcomes and out-of-bounds address
//! computations recorded during range analysis, plus the binary checks
//! derived from stable operand intervals - possible overflow, division by
//! a range containing zero, and shift amounts reaching the operand width.
//!
//! Binary checks skip operands whose interval is the full set: an
//! unconstrained value would flag every site and the finding would carry
//! no information.

use strum::EnumIter;

use crate::analysis::state::AnalysisState;
use crate::ir::{metadata, BinaryOp, FuncId, InstId, InstKind, Module};

/// The six diagnosed integer-bug kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter)]
pub enum ErrKind {
    /// An add/sub/mul that may wrap its width.
    Overflow,
    /// A division or remainder whose divisor may be zero.
    DivByZero,
    /// A shift amount that may reach the operand width.
    BadShift,
    /// An array index that may exceed the array length.
    ArrayOob,
    /// A comparison whose true branch can never be taken.
    DeadTrueBr,
    /// A comparison whose false branch can never be taken.
    DeadFalseBr,
}

impl ErrKind {
    /// The canonical metadata string for this kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Overflow => "integer overflow",
            Self::DivByZero => "divide by zero",
            Self::BadShift => "bad shift",
            Self::ArrayOob => "array index out of bound",
            Self::DeadTrueBr => "impossible true branch",
            Self::DeadFalseBr => "impossible false branch",
        }
    }
}

impl std::fmt::Display for ErrKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn mark_err(module: &mut Module, func: FuncId, inst: InstId, kind: ErrKind) {
    if let Some(inst) = module.function_mut(func).and_then(|f| f.inst_mut(inst)) {
        inst.metadata_mut().set(metadata::ERR, kind.as_str());
    }
}

/// Writes `mkint.err` annotations from the stable analysis state.
pub(crate) fn mark_errors(module: &mut Module, state: &AnalysisState) {
    let mut dead: Vec<_> = state.dead_branches().collect();
    dead.sort_unstable();
    for ((fid, cmp), is_true_br) in dead {
        let kind = if is_true_br {
            ErrKind::DeadTrueBr
        } else {
            ErrKind::DeadFalseBr
        };
        mark_err(module, fid, cmp, kind);
    }

    let mut oob: Vec<_> = state.oob_geps().collect();
    oob.sort_unstable();
    for (fid, gep) in oob {
        mark_err(module, fid, gep, ErrKind::ArrayOob);
    }

    binary_checks(module, state);
}

/// Inspects operand intervals at every binary of the analyzed functions.
fn binary_checks(module: &mut Module, state: &AnalysisState) {
    let mut findings: Vec<(FuncId, InstId, ErrKind)> = Vec::new();

    for &fid in state.analysis_funcs() {
        let Some(func) = module.function(fid) else {
            continue;
        };
        for (bid, block) in func.blocks() {
            for &inst_id in block.insts() {
                let Some(inst) = func.inst(inst_id) else {
                    continue;
                };
                let InstKind::Binary { op, lhs, rhs } = inst.kind() else {
                    continue;
                };
                let Some(width) = inst.ty().int_width() else {
                    continue;
                };
                let (Some(l), Some(r)) = (
                    state.operand_range(module, fid, bid, *lhs),
                    state.operand_range(module, fid, bid, *rhs),
                ) else {
                    continue;
                };

                if op.is_division() {
                    if !r.is_full() && !r.is_empty() && r.contains(0) {
                        findings.push((fid, inst_id, ErrKind::DivByZero));
                    }
                    continue;
                }
                if op.is_shift() {
                    if !r.is_full() && r.unsigned_max() >= u64::from(width) {
                        findings.push((fid, inst_id, ErrKind::BadShift));
                    }
                    continue;
                }
                if l.is_full() || r.is_full() || l.is_empty() || r.is_empty() {
                    continue;
                }
                let may_overflow = match op {
                    BinaryOp::Add => {
                        l.signed_add_may_overflow(&r) || l.unsigned_add_may_overflow(&r)
                    }
                    BinaryOp::Sub => {
                        l.signed_sub_may_overflow(&r) || l.unsigned_sub_may_overflow(&r)
                    }
                    BinaryOp::Mul => {
                        l.signed_mul_may_overflow(&r) || l.unsigned_mul_may_overflow(&r)
                    }
                    _ => false,
                };
                if may_overflow {
                    findings.push((fid, inst_id, ErrKind::Overflow));
                }
            }
        }
    }

    for (fid, inst, kind) in findings {
        mark_err(module, fid, inst, kind);
    }
}
