//! The per-invocation analysis state.
//!
//! Everything the pass learns about a module lives in one owning record,
//! created at the start of a `run` call and read-only once the bug
//! classifier has consumed it. Nothing is stored in statics, so the pass
//! is re-entrant across modules.

use rustc_hash::{FxHashMap, FxHashSet};

use crate::analysis::{backedge::BackEdgeMap, Interval};
use crate::ir::{BlockId, FuncId, GlobalId, InstId, Module, Value};

/// Value ranges known at one basic block.
pub type ValueRanges = FxHashMap<Value, Interval>;

/// Per-block value ranges for one function.
pub type BlockRanges = FxHashMap<BlockId, ValueRanges>;

/// A reference to an instruction anywhere in the module.
pub type InstRef = (FuncId, InstId);

/// Analysis state for one pass invocation.
///
/// The snapshot-comparable parts (`block_ranges`, `global_ranges`,
/// `func_ret`) drive the fixed-point test; the rest accumulates
/// monotonically.
#[derive(Debug, Clone, Default)]
pub struct AnalysisState {
    /// Inferred return-value interval per function.
    pub(crate) func_ret: FxHashMap<FuncId, Interval>,

    /// Per-function, per-block abstract store.
    pub(crate) block_ranges: FxHashMap<FuncId, BlockRanges>,

    /// Summary interval for scalar integer globals.
    pub(crate) global_ranges: FxHashMap<GlobalId, Interval>,

    /// Per-element summaries for one-dimensional integer-array globals.
    pub(crate) global_array_ranges: FxHashMap<GlobalId, Vec<Interval>>,

    /// Back-edge relation per defined function.
    pub(crate) back_edges: FxHashMap<FuncId, BackEdgeMap>,

    /// Functions participating in a tainted flow.
    pub(crate) taint_funcs: FxHashSet<FuncId>,

    /// Functions range analysis runs on, in discovery order.
    pub(crate) analysis_funcs: Vec<FuncId>,

    /// Comparisons with an impossible outcome; the flag records whether
    /// the *true* branch is the dead one.
    pub(crate) dead_branches: FxHashMap<InstRef, bool>,

    /// Address computations whose index interval exceeds the array length.
    pub(crate) oob_geps: FxHashSet<InstRef>,

    /// Synthetic source instructions per source function, in program
    /// order.
    pub(crate) func_sources: Vec<(FuncId, Vec<InstId>)>,
}

impl AnalysisState {
    /// Creates an empty state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the inferred return interval of `func`.
    #[must_use]
    pub fn func_return_range(&self, func: FuncId) -> Option<&Interval> {
        self.func_ret.get(&func)
    }

    /// Returns the recorded interval of `value` at the start-to-end
    /// accumulation of `block` in `func`.
    #[must_use]
    pub fn value_range(&self, func: FuncId, block: BlockId, value: Value) -> Option<&Interval> {
        self.block_ranges.get(&func)?.get(&block)?.get(&value)
    }

    /// Returns the summary interval of a scalar integer global.
    #[must_use]
    pub fn global_range(&self, global: GlobalId) -> Option<&Interval> {
        self.global_ranges.get(&global)
    }

    /// Returns `true` if `func` participates in a tainted flow.
    #[must_use]
    pub fn is_tainted_func(&self, func: FuncId) -> bool {
        self.taint_funcs.contains(&func)
    }

    /// Returns the functions range analysis ran on.
    #[must_use]
    pub fn analysis_funcs(&self) -> &[FuncId] {
        &self.analysis_funcs
    }

    /// Iterates comparisons with a provably dead outcome.
    pub fn dead_branches(&self) -> impl Iterator<Item = (InstRef, bool)> + '_ {
        self.dead_branches.iter().map(|(k, v)| (*k, *v))
    }

    /// Iterates address computations flagged out of bounds.
    pub fn oob_geps(&self) -> impl Iterator<Item = InstRef> + '_ {
        self.oob_geps.iter().copied()
    }

    /// Returns `true` if `pred -> block` in `func` is a back-edge.
    #[must_use]
    pub(crate) fn is_back_edge(&self, func: FuncId, block: BlockId, pred: BlockId) -> bool {
        self.back_edges
            .get(&func)
            .is_some_and(|edges| edges.is_back_edge(block, pred))
    }

    /// Reads the interval an operand holds when evaluated in `block`.
    ///
    /// Constants read as singletons, globals as their module summary, and
    /// everything else from the block's abstract store; a value not yet
    /// recorded reads as the empty set of its width. Returns `None` for
    /// operands with no integer reading (the caller decides whether that
    /// is structural or merely a loss of precision).
    #[must_use]
    pub(crate) fn operand_range(
        &self,
        module: &Module,
        func: FuncId,
        block: BlockId,
        value: Value,
    ) -> Option<Interval> {
        match value {
            Value::Const(c) => Some(Interval::from_const(c)),
            Value::Global(g) => {
                if let Some(rng) = self.global_ranges.get(&g) {
                    return Some(*rng);
                }
                let width = module.global(g)?.ty().int_width()?;
                Some(Interval::full(width))
            }
            Value::Arg(_) | Value::Inst(_) => {
                let width = value_width(module, func, value)?;
                Some(
                    self.value_range(func, block, value)
                        .copied()
                        .unwrap_or_else(|| Interval::empty(width)),
                )
            }
        }
    }
}

/// The integer bit-width of `value` within `func`, if it has one.
#[must_use]
pub(crate) fn value_width(module: &Module, func: FuncId, value: Value) -> Option<u32> {
    match value {
        Value::Const(c) => Some(c.width()),
        Value::Arg(i) => module.function(func)?.params().get(i)?.int_width(),
        Value::Inst(id) => module.function(func)?.inst(id)?.ty().int_width(),
        Value::Global(g) => module.global(g)?.ty().int_width(),
    }
}
