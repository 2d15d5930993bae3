//! The integer-flow analysis.
//!
//! Two cooperating analyses run over a module. **Taint propagation**
//! traces integer data from source functions (identified by naming
//! convention) forward along use-def chains to sink call arguments,
//! marking every instruction on a reaching path. **Range analysis**
//! abstractly interprets each candidate function over a wrapped-interval
//! lattice, merging at block joins, refining through branch and switch
//! conditions, and exchanging argument and return summaries across call
//! sites until a fixed point.
//!
//! The analyses interact: range analysis runs only on functions that
//! return integers *or* participate in a tainted flow, so taint runs
//! first and can grow the range-analysis set.
//!
//! # Architecture
//!
//! - [`interval`] - the wrapped-interval lattice ([`Interval`])
//! - [`backedge`] - per-function back-edge detection; merges skip
//!   back-edges so the finite lattice terminates without widening
//! - [`taint`] - source/sink marking and the sink-reachability fixed point
//! - `range` - entry seeding and the per-block range analyzer
//! - [`checks`] - the bug classifier emitting `mkint.err`
//! - [`state`] - the per-invocation [`AnalysisState`] record
//! - `pass` - the [`MkintPass`] orchestrator
//!
//! # Usage
//!
//! ```rust,ignore
//! use mkint::{MkintPass, PreservedAnalyses};
//!
//! let mut pass = MkintPass::new();
//! assert_eq!(pass.run(&mut module)?, PreservedAnalyses::All);
//! ```

pub mod backedge;
pub mod checks;
pub mod interval;
pub mod state;
pub mod taint;

mod pass;
mod range;

pub use backedge::BackEdgeMap;
pub use checks::ErrKind;
pub use interval::{auto_promote, Interval};
pub use pass::{MkintPass, PreservedAnalyses, MAX_ITERATIONS};
pub use state::AnalysisState;
pub use taint::{demangle, is_taint_source, SINKS, SOURCE_PREFIXES};
