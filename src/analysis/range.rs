//! Range seeding and the iterative per-block range analyzer.
//!
//! A function participates in range analysis iff it returns an integer or
//! takes part in a tainted flow. Analysis is a forward walk over each
//! function's blocks in program order - no worklist - repeated by the
//! orchestrator until the per-block stores, the global summaries and the
//! return summaries all stop changing (or the iteration cap is reached).
//!
//! At each block the analyzer first merges the out-states of all
//! non-back-edge predecessors, refining through conditional-branch
//! comparisons and switch cases, then interprets the block's instructions
//! in order. Interprocedural flow happens in both directions at call
//! sites: caller argument ranges widen the callee's entry state, and the
//! callee's return summary becomes the call result's range.

use log::{debug, warn};
use rustc_hash::{FxHashMap, FxHashSet};

use crate::analysis::interval::auto_promote;
use crate::analysis::state::{value_width, AnalysisState};
use crate::analysis::taint::is_taint_source;
use crate::analysis::Interval;
use crate::ir::{
    BinaryOp, BlockId, CastOp, FuncId, GlobalInit, InstKind, Instruction, Module, Type, Value,
};
use crate::{Error, Result};

/// Clamps `iv` to `width` bits, zero-extending or truncating as needed.
///
/// Operand widths normally already match; this only catches producer IR
/// with mixed widths, conservatively.
fn fit_width(iv: Interval, width: u32) -> Interval {
    if iv.width() < width {
        iv.zero_extend(width)
    } else if iv.width() > width {
        iv.truncate(width)
    } else {
        iv
    }
}

/// Dispatches a binary opcode to its interval transfer function.
fn eval_binary(op: BinaryOp, lhs: &Interval, rhs: &Interval) -> Interval {
    match op {
        BinaryOp::Add => lhs.add(rhs),
        BinaryOp::Sub => lhs.sub(rhs),
        BinaryOp::Mul => lhs.mul(rhs),
        BinaryOp::UDiv => lhs.udiv(rhs),
        BinaryOp::SDiv => lhs.sdiv(rhs),
        BinaryOp::URem => lhs.urem(rhs),
        BinaryOp::SRem => lhs.srem(rhs),
        BinaryOp::Shl => lhs.shl(rhs),
        BinaryOp::LShr => lhs.lshr(rhs),
        BinaryOp::AShr => lhs.ashr(rhs),
        BinaryOp::And => lhs.and(rhs),
        BinaryOp::Or => lhs.or(rhs),
        BinaryOp::Xor => lhs.xor(rhs),
    }
}

/// Seeds the analysis state: classifies functions, seeds entry-block
/// argument ranges and return summaries, and initializes global
/// summaries from their initializers.
pub(crate) fn init_ranges(module: &Module, state: &mut AnalysisState) -> Result<()> {
    for (fid, func) in module.functions() {
        if !func.ret().is_integer() && !state.taint_funcs.contains(&fid) {
            continue;
        }
        if func.is_declaration() {
            // No body to analyze; the return can be anything.
            if let Some(width) = func.ret().int_width() {
                state.func_ret.insert(fid, Interval::full(width));
            }
            debug!("skip range analysis for func w/o impl: {}", func.name());
            continue;
        }
        if let Some(width) = func.ret().int_width() {
            state.func_ret.insert(fid, Interval::empty(width));
        }
        let entry = func.entry_block().expect("defined function has an entry");
        let source = is_taint_source(func.name());
        let entry_map = state
            .block_ranges
            .entry(fid)
            .or_default()
            .entry(entry)
            .or_default();
        for (index, ty) in func.params().iter().enumerate() {
            if let Some(width) = ty.int_width() {
                // Source inputs come from an unknown environment; callee
                // inputs start empty so caller context can tighten them.
                let seed = if source {
                    Interval::full(width)
                } else {
                    Interval::empty(width)
                };
                entry_map.insert(Value::Arg(index), seed);
            }
        }
        state.analysis_funcs.push(fid);
    }

    for (gid, global) in module.globals() {
        debug!("found global var {} of type {}", global.name(), global.ty());
        match (global.ty(), global.init()) {
            (Type::Int(width), GlobalInit::Scalar(c)) => {
                state
                    .global_ranges
                    .insert(gid, Interval::singleton(width, c.value()));
            }
            (Type::Int(width), GlobalInit::None) => {
                state.global_ranges.insert(gid, Interval::full(width));
            }
            (Type::IntArray { width, len }, GlobalInit::Array(elems)) => {
                if elems.len() != len {
                    return Err(Error::UnsupportedInitializer {
                        global: global.name().to_string(),
                    });
                }
                state.global_array_ranges.insert(
                    gid,
                    elems
                        .iter()
                        .map(|c| Interval::singleton(width, c.value()))
                        .collect(),
                );
            }
            (Type::IntArray { width, len }, GlobalInit::None) => {
                state
                    .global_array_ranges
                    .insert(gid, vec![Interval::full(width); len]);
            }
            (Type::Int(_) | Type::IntArray { .. }, _) => {
                return Err(Error::UnsupportedInitializer {
                    global: global.name().to_string(),
                });
            }
            _ => {
                warn!(
                    "unhandled global var type: {} -> {}",
                    global.ty(),
                    global.name()
                );
            }
        }
    }
    Ok(())
}

/// One forward pass of range analysis over `func`'s blocks.
pub(crate) fn analyze_function(
    module: &Module,
    fid: FuncId,
    state: &mut AnalysisState,
) -> Result<()> {
    let func = module
        .function(fid)
        .ok_or_else(|| malformed_error!("analysis of unknown function {fid:?}"))?;
    debug!("range analysis -> {}", func.name());

    let non_integer = |context: String| Error::NonIntegerOperand {
        context: format!("{context} in {}", func.name()),
    };

    let mut preds: FxHashMap<BlockId, Vec<BlockId>> = FxHashMap::default();
    for (bid, _) in func.blocks() {
        for succ in func.successors(bid) {
            preds.entry(succ).or_default().push(bid);
        }
    }

    for (bid, block) in func.blocks() {
        // ---- Step 1: merge non-back-edge predecessors ----------------
        for &pred in preds.get(&bid).map_or(&[][..], Vec::as_slice) {
            if state.is_back_edge(fid, bid, pred) {
                continue;
            }

            let mut narrowed: FxHashSet<Value> = FxHashSet::default();
            let Some((_, term)) = func.terminator(pred) else {
                return Err(Error::UnknownTerminator {
                    function: func.name().to_string(),
                    block: pred.to_string(),
                });
            };

            match term.kind() {
                InstKind::Branch {
                    cond: Some(Value::Inst(cmp_id)),
                    then_dest,
                    ..
                } => {
                    let cmp_id = *cmp_id;
                    if let Some(InstKind::ICmp { pred: cpred, lhs, rhs }) =
                        func.inst(cmp_id).map(Instruction::kind)
                    {
                        let (cpred, lhs, rhs) = (*cpred, *lhs, *rhs);
                        let lw = value_width(module, fid, lhs)
                            .ok_or_else(|| non_integer(format!("compared value {lhs}")))?;
                        let rw = value_width(module, fid, rhs)
                            .ok_or_else(|| non_integer(format!("compared value {rhs}")))?;
                        let lrng = state
                            .operand_range(module, fid, pred, lhs)
                            .ok_or_else(|| non_integer(format!("compared value {lhs}")))?;
                        let rrng = state
                            .operand_range(module, fid, pred, rhs)
                            .ok_or_else(|| non_integer(format!("compared value {rhs}")))?;

                        // The false successor sees the negated predicate.
                        let is_true_br = *then_dest == bid;
                        let effective = if is_true_br { cpred } else { cpred.inverse() };
                        let (lp, rp) = auto_promote(lrng, rrng, cpred.is_signed());
                        let allowed_l = Interval::from_compare(effective, &rp);
                        let allowed_r = Interval::from_compare(effective.swapped(), &lp);

                        let cur = state
                            .block_ranges
                            .entry(fid)
                            .or_default()
                            .entry(bid)
                            .or_default();
                        // Constants keep their fixed range.
                        let stored_l = if lhs.is_const() {
                            lrng
                        } else {
                            let refined = fit_width(lp.intersect(&allowed_l), lw);
                            cur.get(&lhs).map_or(refined, |prev| refined.union(prev))
                        };
                        cur.insert(lhs, stored_l);
                        let stored_r = if rhs.is_const() {
                            rrng
                        } else {
                            let refined = fit_width(rp.intersect(&allowed_r), rw);
                            cur.get(&rhs).map_or(refined, |prev| refined.union(prev))
                        };
                        cur.insert(rhs, stored_r);

                        if stored_l.is_empty() || stored_r.is_empty() {
                            state.dead_branches.insert((fid, cmp_id), is_true_br);
                        }
                        narrowed.insert(lhs);
                        narrowed.insert(rhs);
                    }
                }
                InstKind::Branch { .. } => {}
                InstKind::Switch {
                    value,
                    default_dest,
                    cases,
                } => {
                    let Some(width) = value_width(module, fid, *value) else {
                        // Non-integer scrutinee; nothing to transfer from
                        // this predecessor.
                        continue;
                    };
                    let cond_rng = state
                        .operand_range(module, fid, pred, *value)
                        .unwrap_or_else(|| Interval::empty(width));
                    let mut case_set = Interval::empty(width);
                    if *default_dest == bid {
                        for (c, _) in cases {
                            case_set = case_set.union(&Interval::from_const(*c));
                        }
                        case_set = case_set.inverse();
                    } else {
                        for (c, dest) in cases {
                            if *dest == bid {
                                case_set = case_set.union(&Interval::from_const(*c));
                            }
                        }
                    }
                    state
                        .block_ranges
                        .entry(fid)
                        .or_default()
                        .entry(bid)
                        .or_default()
                        .insert(*value, cond_rng.union(&case_set));
                    narrowed.insert(*value);
                }
                _ => {
                    return Err(Error::UnknownTerminator {
                        function: func.name().to_string(),
                        block: pred.to_string(),
                    });
                }
            }

            // Union-merge everything else the predecessor knows.
            let pred_ranges: Vec<(Value, Interval)> = state
                .block_ranges
                .get(&fid)
                .and_then(|m| m.get(&pred))
                .map(|m| m.iter().map(|(k, v)| (*k, *v)).collect())
                .unwrap_or_default();
            let cur = state
                .block_ranges
                .entry(fid)
                .or_default()
                .entry(bid)
                .or_default();
            for (value, rng) in pred_ranges {
                if narrowed.contains(&value) {
                    continue;
                }
                let merged = cur.get(&value).map_or(rng, |prev| rng.union(prev));
                cur.insert(value, merged);
            }
        }

        // ---- Step 2: straight-line transfer --------------------------
        for &inst_id in block.insts() {
            let inst = func
                .inst(inst_id)
                .ok_or_else(|| malformed_error!("missing instruction in {}", func.name()))?;

            match inst.kind() {
                InstKind::Call { callee, args } => {
                    let Some(callee_func) = module.function(*callee) else {
                        continue;
                    };
                    if !callee_func.is_declaration() {
                        let entry = callee_func
                            .entry_block()
                            .expect("defined function has an entry");
                        for (index, pty) in callee_func.params().iter().enumerate() {
                            let (Some(pwidth), Some(arg)) = (pty.int_width(), args.get(index))
                            else {
                                continue;
                            };
                            // Caller context flows down into the callee's
                            // entry state.
                            let arg_rng = state
                                .operand_range(module, fid, bid, *arg)
                                .ok_or_else(|| non_integer(format!("call argument {arg}")))?;
                            let arg_rng = fit_width(arg_rng, pwidth);
                            let entry_map = state
                                .block_ranges
                                .entry(*callee)
                                .or_default()
                                .entry(entry)
                                .or_default();
                            let merged = entry_map
                                .get(&Value::Arg(index))
                                .map_or(arg_rng, |prev| arg_rng.union(prev));
                            entry_map.insert(Value::Arg(index), merged);
                        }
                    }
                    if let Some(rwidth) = callee_func.ret().int_width() {
                        let ret_rng = state
                            .func_ret
                            .get(callee)
                            .copied()
                            .unwrap_or_else(|| Interval::empty(rwidth));
                        state
                            .block_ranges
                            .entry(fid)
                            .or_default()
                            .entry(bid)
                            .or_default()
                            .insert(Value::Inst(inst_id), ret_rng);
                    }
                    continue;
                }
                InstKind::Store { value, addr } => {
                    let Some(val_rng) = state.operand_range(module, fid, bid, *value) else {
                        debug!("skipping store of non-integer value in {}", func.name());
                        continue;
                    };
                    if let Value::Global(g) = addr {
                        let merged = state
                            .global_ranges
                            .get(g)
                            .map_or(val_rng, |prev| val_rng.union(prev));
                        state.global_ranges.insert(*g, merged);
                    }
                    // Best-effort local tracking keyed on the pointer.
                    state
                        .block_ranges
                        .entry(fid)
                        .or_default()
                        .entry(bid)
                        .or_default()
                        .insert(*addr, val_rng);
                    continue;
                }
                InstKind::Return { value } => {
                    if let (Some(rwidth), Some(v)) = (func.ret().int_width(), value) {
                        let vrng = state
                            .operand_range(module, fid, bid, *v)
                            .ok_or_else(|| non_integer(format!("returned value {v}")))?;
                        let vrng = fit_width(vrng, rwidth);
                        let merged = state
                            .func_ret
                            .get(&fid)
                            .map_or(vrng, |prev| vrng.union(prev));
                        state.func_ret.insert(fid, merged);
                    }
                    continue;
                }
                _ => {}
            }

            let Some(width) = inst.ty().int_width() else {
                continue;
            };
            let mut new_range = Interval::empty(width);

            match inst.kind() {
                InstKind::Binary { op, lhs, rhs } => {
                    let l = state
                        .operand_range(module, fid, bid, *lhs)
                        .ok_or_else(|| non_integer(format!("operand {lhs}")))?;
                    let r = state
                        .operand_range(module, fid, bid, *rhs)
                        .ok_or_else(|| non_integer(format!("operand {rhs}")))?;
                    let (l, r) = auto_promote(l, r, op.is_signed());
                    new_range = fit_width(eval_binary(*op, &l, &r), width);
                }
                InstKind::Select {
                    on_true, on_false, ..
                } => {
                    let t = state
                        .operand_range(module, fid, bid, *on_true)
                        .ok_or_else(|| non_integer(format!("operand {on_true}")))?;
                    let f = state
                        .operand_range(module, fid, bid, *on_false)
                        .ok_or_else(|| non_integer(format!("operand {on_false}")))?;
                    let (t, f) = auto_promote(t, f, false);
                    new_range = fit_width(t.union(&f), width);
                }
                InstKind::Cast { op, value } => {
                    let inp = state
                        .operand_range(module, fid, bid, *value)
                        .ok_or_else(|| non_integer(format!("operand {value}")))?;
                    new_range = match op {
                        CastOp::Trunc => inp.truncate(width),
                        CastOp::ZExt => inp.zero_extend(width),
                        CastOp::SExt => inp.sign_extend(width),
                    };
                }
                InstKind::Phi { incomings } => {
                    for (v, pbb) in incomings {
                        if state.is_back_edge(fid, bid, *pbb) {
                            continue;
                        }
                        // Incoming values read in the predecessor's state.
                        let vrng = state
                            .operand_range(module, fid, *pbb, *v)
                            .ok_or_else(|| non_integer(format!("phi incoming {v}")))?;
                        new_range = new_range.union(&fit_width(vrng, width));
                    }
                }
                InstKind::Load { addr } => match addr {
                    Value::Global(g) if state.global_ranges.contains_key(g) => {
                        new_range = fit_width(state.global_ranges[g], width);
                    }
                    Value::Inst(gep_id)
                        if matches!(
                            func.inst(*gep_id).map(Instruction::kind),
                            Some(InstKind::GetElementPtr { .. })
                        ) =>
                    {
                        if let Some(InstKind::GetElementPtr {
                            base: Value::Global(g),
                            indices,
                        }) = func.inst(*gep_id).map(Instruction::kind)
                        {
                            // Only one-dimensional integer arrays are
                            // modeled: (base, [0, idx]).
                            if let Some(elems) = state.global_array_ranges.get(g) {
                                if indices.len() == 2 {
                                    let idx = indices[1];
                                    let idx_rng = state
                                        .operand_range(module, fid, bid, idx)
                                        .ok_or_else(|| {
                                            non_integer(format!("array index {idx}"))
                                        })?;
                                    if idx_rng.unsigned_max() >= elems.len() as u64 {
                                        state.oob_geps.insert((fid, *gep_id));
                                    }
                                }
                            }
                        }
                    }
                    _ => {
                        warn!("cannot analyze unknown address: load in {}", func.name());
                        new_range = Interval::full(width);
                    }
                },
                InstKind::ICmp { .. } => {
                    // Comparisons refine at branch merges, not here.
                }
                _ => {
                    debug!("unhandled instruction kind in {}", func.name());
                }
            }

            let cur = state
                .block_ranges
                .entry(fid)
                .or_default()
                .entry(bid)
                .or_default();
            let merged = cur
                .get(&Value::Inst(inst_id))
                .map_or(new_range, |prev| new_range.union(prev));
            cur.insert(Value::Inst(inst_id), merged);
        }
    }

    Ok(())
}
