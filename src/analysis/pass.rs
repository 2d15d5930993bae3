//! The orchestrating pass.
//!
//! [`MkintPass`] runs the full analysis over a module:
//!
//! 1. mark sinks and rewrite source arguments into synthetic source calls
//! 2. broadcast taint from every source's synthetic calls
//! 3. re-broadcast through tainted non-source functions to a fixed point
//! 4. compute back-edges for every defined function
//! 5. seed ranges (entry arguments, return summaries, globals)
//! 6. iterate the range analyzer until the state stabilizes, capped at
//!    [`MAX_ITERATIONS`] sweeps
//! 7. classify bugs from the stable state and annotate the module
//!
//! The pass owns its [`AnalysisState`] and exposes it read-only after a
//! run, so a harness can inspect inferred ranges alongside the metadata
//! written into the IR.

use log::debug;

use crate::analysis::state::AnalysisState;
use crate::analysis::taint::{is_taint_source, TaintPropagator, UseIndex};
use crate::analysis::{backedge::BackEdgeMap, checks, range};
use crate::ir::Module;
use crate::Result;

/// Cap on range-analysis sweeps. Back-edge exclusion keeps each sweep
/// monotone on a finite lattice, so the cap is a hard stop for pathological
/// modules rather than the usual exit.
pub const MAX_ITERATIONS: usize = 128;

/// What a pass invocation preserves of previously computed host analyses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreservedAnalyses {
    /// The module shape is unchanged; only metadata was added.
    All,
}

/// The integer-flow analysis pass.
///
/// # Examples
///
/// ```rust,ignore
/// use mkint::MkintPass;
///
/// let mut pass = MkintPass::new();
/// pass.run(&mut module)?;
/// for ((func, inst), is_true_br) in pass.state().dead_branches() {
///     println!("dead {} branch", if is_true_br { "true" } else { "false" });
/// }
/// ```
#[derive(Debug, Default)]
pub struct MkintPass {
    state: AnalysisState,
}

impl MkintPass {
    /// The name this pass registers under with a host pipeline.
    pub const NAME: &'static str = "mkint-pass";

    /// Creates a pass with empty state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the analysis state of the last run.
    #[must_use]
    pub const fn state(&self) -> &AnalysisState {
        &self.state
    }

    /// Runs the analysis over `module`, annotating it in place.
    ///
    /// # Errors
    ///
    /// Returns the analysis-fatal conditions of the error taxonomy:
    /// unknown terminators, structurally non-integer operands, and
    /// unsupported global initializers. Soft conditions are logged and
    /// recovered conservatively.
    pub fn run(&mut self, module: &mut Module) -> Result<PreservedAnalyses> {
        debug!("running {} on module {}", Self::NAME, module.name());
        self.state = AnalysisState::new();

        // Sources are rewritten first: the synthetic calls must exist
        // before the use index and every later phase.
        for fid in module.func_ids() {
            let sources = crate::analysis::taint::rewrite_taint_sources(module, fid);
            let is_source = module
                .function(fid)
                .is_some_and(|f| is_taint_source(f.name()));
            if is_source {
                self.state.func_sources.push((fid, sources));
            }
        }

        let uses = UseIndex::build(module);
        for fid in module.func_ids() {
            crate::analysis::taint::mark_func_sinks(module, fid, &uses);
        }

        {
            let func_sources = self.state.func_sources.clone();
            let mut propagator = TaintPropagator::new(module, &uses, &mut self.state);
            for (fid, sources) in func_sources {
                if propagator.broadcast_sources(fid, &sources) {
                    propagator.mark_func_tainted(fid);
                }
            }
            propagator.propagate_to_fixpoint();
        }

        for (fid, func) in module.functions() {
            if !func.is_declaration() {
                self.state
                    .back_edges
                    .insert(fid, BackEdgeMap::compute(func));
            }
        }

        range::init_ranges(module, &mut self.state)?;

        let mut iterations = 0usize;
        loop {
            let snapshot = (
                self.state.block_ranges.clone(),
                self.state.global_ranges.clone(),
                self.state.func_ret.clone(),
            );
            // Emptiness seen mid-convergence is not a finding; only the
            // stable sweep's dead branches survive.
            self.state.dead_branches.clear();
            for fid in self.state.analysis_funcs.clone() {
                range::analyze_function(module, fid, &mut self.state)?;
            }
            let stable = snapshot.0 == self.state.block_ranges
                && snapshot.1 == self.state.global_ranges
                && snapshot.2 == self.state.func_ret;
            if stable {
                break;
            }
            iterations += 1;
            if iterations > MAX_ITERATIONS {
                debug!("iterative range analysis: cap {MAX_ITERATIONS} reached, stopping");
                break;
            }
        }

        self.log_ranges(module);
        checks::mark_errors(module, &self.state);

        Ok(PreservedAnalyses::All)
    }

    /// Logs the stable range state at debug level.
    fn log_ranges(&self, module: &Module) {
        debug!("========== function return ranges ==========");
        let mut rets: Vec<_> = self.state.func_ret.iter().collect();
        rets.sort_by_key(|(fid, _)| **fid);
        for (fid, rng) in rets {
            if let Some(func) = module.function(*fid) {
                debug!("{} -> {rng}", func.name());
            }
        }

        debug!("========== global variable ranges ==========");
        let mut globals: Vec<_> = self.state.global_ranges.iter().collect();
        globals.sort_by_key(|(gid, _)| **gid);
        for (gid, rng) in globals {
            if let Some(global) = module.global(*gid) {
                debug!("{} -> {rng}", global.name());
            }
        }

        debug!("========== function inst ranges ==========");
        for &fid in &self.state.analysis_funcs {
            let Some(func) = module.function(fid) else {
                continue;
            };
            debug!("----------- function: {}", func.name());
            let Some(blocks) = self.state.block_ranges.get(&fid) else {
                continue;
            };
            let mut block_ids: Vec<_> = blocks.keys().copied().collect();
            block_ids.sort_unstable();
            for bid in block_ids {
                debug!("----------- {bid}");
                let mut entries: Vec<_> = blocks[&bid]
                    .iter()
                    .filter(|(value, _)| !value.is_const())
                    .collect();
                entries.sort_by_key(|(value, _)| format!("{value}"));
                for (value, rng) in entries {
                    debug!("{value} -> {rng}");
                }
            }
        }

        debug!("========== impossible branches ==========");
        for ((fid, cmp), is_true_br) in self.state.dead_branches() {
            if let Some(func) = module.function(fid) {
                debug!(
                    "{}::%{} -> {} branch",
                    func.name(),
                    cmp.index(),
                    if is_true_br { "true" } else { "false" }
                );
            }
        }

        debug!("========== array index out of bound ==========");
        for (fid, gep) in self.state.oob_geps() {
            if let Some(func) = module.function(fid) {
                debug!("{}::%{} may be out of bound", func.name(), gep.index());
            }
        }
    }
}
