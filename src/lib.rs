// Copyright 2025-2026 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]

//! # mkint
//!
//! An integer-flow static analysis over a typed, SSA-form intermediate
//! representation. Given a lowered module, the pass
//!
//! - identifies integer-valued data flows from *taint sources* (functions
//!   whose names mark their integer inputs as attacker-controlled) to
//!   *taint sinks* (call arguments that must not be attacker-controlled),
//! - infers, per program point, a conservative over-approximation of the
//!   range of values each integer expression may take, and
//! - derives integer-bug diagnostics from the stable ranges: dead
//!   conditional branches, array indices provably out of bounds, possible
//!   overflow, divide-by-zero, and bad shift amounts.
//!
//! Findings are attached to the offending instructions (and globals) as
//! string metadata under three keys: `mkint.taint`, `mkint.sink` and
//! `mkint.err`. A downstream harness re-reads the annotated module; the
//! pass itself produces no file output.
//!
//! # Architecture
//!
//! The crate is organized into two layers:
//!
//! - [`crate::ir`] - the arena-based SSA module representation consumed by
//!   the analysis: functions, basic blocks, a closed instruction sum type,
//!   globals, metadata tables, and a builder for IR producers and tests
//! - [`crate::analysis`] - the analysis itself: the wrapped-interval
//!   lattice, back-edge detection, taint marking and propagation, range
//!   seeding and the iterative per-block range analyzer, the bug
//!   classifier, and the orchestrating [`crate::MkintPass`]
//!
//! # Usage
//!
//! ```rust,ignore
//! use mkint::{ir::Module, MkintPass};
//!
//! let mut module: Module = produce_module();
//! MkintPass::new().run(&mut module)?;
//!
//! for (_, func) in module.functions() {
//!     for (_, inst) in func.instructions() {
//!         if let Some(err) = inst.metadata().get(mkint::ir::metadata::ERR) {
//!             println!("{}: {err}", func.name());
//!         }
//!     }
//! }
//! ```
//!
//! # Analysis contract
//!
//! The pass expects SSA form post register-promotion: each non-void
//! instruction defines exactly one value, multi-predecessor merges use phi
//! instructions, and locals live in registers rather than memory. Source
//! functions are recognized by demangled-name prefix (`sys_`,
//! `__mkint_ann_`); sink functions by exact match against a fixed table.
//! Both conventions are a contract with the upstream IR producer.
//!
//! The analysis is single-threaded and re-entrant: all state lives in a
//! per-invocation record owned by the pass object, never in statics.

#[macro_use]
mod error;

pub mod analysis;
pub mod ir;

pub use crate::{
    analysis::{Interval, MkintPass, PreservedAnalyses},
    error::{Error, Result},
};
