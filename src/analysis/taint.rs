//! Taint marking and propagation.
//!
//! Taint flows from *sources* to *sinks*, both identified by naming
//! conventions shared with the upstream tooling:
//!
//! - a function is a **source** iff its demangled name starts with `sys_`
//!   or `__mkint_ann_`; its integer arguments are considered
//!   attacker-controlled
//! - a function is a **sink** iff its demangled name matches a fixed
//!   table; the table names the parameter whose value must not be
//!   attacker-controlled
//!
//! Arguments cannot carry metadata, so the marker *rewrites* each used
//! integer argument of a source: it synthesizes a call to an external
//! nullary function named `<func>.mkint.arg<i>` at the entry block and
//! redirects all uses of the argument to the call. The synthetic calls
//! anchor the forward use-def traversal that then marks every instruction
//! on a path to a sink with `mkint.taint`.
//!
//! Propagation is a fixed point: functions found to participate in a
//! tainted flow have their own arguments re-broadcast until the tainted
//! set stops growing.

use std::borrow::Cow;

use log::{debug, warn};
use rustc_hash::{FxHashMap, FxHashSet};

use crate::analysis::state::{AnalysisState, InstRef};
use crate::ir::{metadata, FuncId, GlobalId, InstId, InstKind, Instruction, Module, Value};

/// Demangled-name prefixes that make a function a taint source.
pub const SOURCE_PREFIXES: [&str; 2] = ["sys_", "__mkint_ann_"];

/// Sink functions and the index of the sink-relevant parameter.
pub const SINKS: [(&str, usize); 7] = [
    ("malloc", 0),
    ("__mkint_sink0", 0),
    ("__mkint_sink1", 1),
    ("xmalloc", 0),
    ("kmalloc", 0),
    ("kzalloc", 0),
    ("vmalloc", 0),
];

/// Strips Itanium mangling from a symbol name.
///
/// `_Z`-prefixed names have their nested identifiers extracted and joined
/// with `::`; anything else (including the unmangled names a C frontend
/// emits) passes through unchanged.
#[must_use]
pub fn demangle(name: &str) -> Cow<'_, str> {
    let Some(rest) = name.strip_prefix("_Z") else {
        return Cow::Borrowed(name);
    };
    let mut s = rest.strip_prefix('N').unwrap_or(rest);
    let mut parts: Vec<&str> = Vec::new();
    loop {
        let digits = s.len() - s.trim_start_matches(|c: char| c.is_ascii_digit()).len();
        if digits == 0 {
            break;
        }
        let Ok(len) = s[..digits].parse::<usize>() else {
            break;
        };
        let rest = &s[digits..];
        if rest.len() < len {
            break;
        }
        parts.push(&rest[..len]);
        s = &rest[len..];
    }
    if parts.is_empty() {
        Cow::Borrowed(name)
    } else {
        Cow::Owned(parts.join("::"))
    }
}

/// Returns `true` if a function of this (mangled) name is a taint source.
#[must_use]
pub fn is_taint_source(name: &str) -> bool {
    let demangled = demangle(name);
    SOURCE_PREFIXES
        .iter()
        .any(|prefix| demangled.starts_with(prefix))
}

/// Looks up `name` in the sink table.
#[must_use]
fn sink_entry(demangled: &str) -> Option<(&'static str, usize)> {
    SINKS
        .iter()
        .copied()
        .find(|(sink, _)| *sink == demangled)
}

/// Def-use information derived from the module, rebuilt after source
/// arguments are rewritten.
#[derive(Debug, Default)]
pub(crate) struct UseIndex {
    /// Per function: users of each operand value.
    users: FxHashMap<FuncId, FxHashMap<Value, Vec<InstId>>>,
    /// Call sites of each function across the module.
    callers: FxHashMap<FuncId, Vec<InstRef>>,
    /// Instructions reading or writing each global, across the module.
    global_users: FxHashMap<GlobalId, Vec<InstRef>>,
}

impl UseIndex {
    pub(crate) fn build(module: &Module) -> Self {
        let mut index = Self::default();
        for (fid, func) in module.functions() {
            let per_func = index.users.entry(fid).or_default();
            for (inst_id, inst) in func.instructions() {
                for op in inst.operands() {
                    per_func.entry(op).or_default().push(inst_id);
                    if let Value::Global(g) = op {
                        index.global_users.entry(g).or_default().push((fid, inst_id));
                    }
                }
                if let InstKind::Call { callee, .. } = inst.kind() {
                    index
                        .callers
                        .entry(*callee)
                        .or_default()
                        .push((fid, inst_id));
                }
            }
        }
        index
    }

    fn users_of(&self, func: FuncId, value: Value) -> &[InstId] {
        self.users
            .get(&func)
            .and_then(|m| m.get(&value))
            .map_or(&[], Vec::as_slice)
    }

    fn callers_of(&self, func: FuncId) -> &[InstRef] {
        self.callers.get(&func).map_or(&[], Vec::as_slice)
    }

    fn users_of_global(&self, global: GlobalId) -> &[InstRef] {
        self.global_users.get(&global).map_or(&[], Vec::as_slice)
    }
}

/// Rewrites the used integer arguments of a source function into synthetic
/// source calls, returning the calls in argument order.
///
/// Non-sources and declarations return an empty list.
pub(crate) fn rewrite_taint_sources(module: &mut Module, fid: FuncId) -> Vec<InstId> {
    let Some(func) = module.function(fid) else {
        return Vec::new();
    };
    if func.is_declaration() || !is_taint_source(func.name()) {
        return Vec::new();
    }
    let name = func.name().to_string();
    let rewrites: Vec<(usize, crate::ir::Type)> = func
        .params()
        .iter()
        .enumerate()
        .filter(|(i, ty)| ty.is_integer() && func.arg_has_uses(*i))
        .map(|(i, ty)| (i, *ty))
        .collect();

    let mut sources = Vec::with_capacity(rewrites.len());
    for (index, ty) in rewrites {
        let call_name = format!("{name}.mkint.arg{index}");
        debug!("taint source arg -> call inst: {call_name}");
        let callee = module.get_or_insert_declaration(&call_name, ty);
        let func = module
            .function_mut(fid)
            .expect("source function disappeared");
        let call = Instruction::new(
            InstKind::Call {
                callee,
                args: Vec::new(),
            },
            ty,
        );
        if let Some(call_id) = func.insert_at_entry(call) {
            func.replace_arg_uses(index, Value::Inst(call_id), call_id);
            sources.push(call_id);
        }
    }
    sources
}

/// Marks sink arguments and source-return sinks in `func`.
///
/// A call argument at a sink's table index is annotated `mkint.sink` with
/// the sink's name when it is itself an instruction. If the function is a
/// source returning an integer and has a caller outside source functions,
/// every return is annotated `mkint.sink "return"`.
pub(crate) fn mark_func_sinks(module: &mut Module, fid: FuncId, uses: &UseIndex) {
    let Some(func) = module.function(fid) else {
        return;
    };

    // Call arguments feeding a table sink.
    let mut sink_args: Vec<(InstId, &'static str)> = Vec::new();
    for (_, inst) in func.instructions() {
        if let InstKind::Call { callee, args } = inst.kind() {
            let Some(callee_func) = module.function(*callee) else {
                continue;
            };
            let demangled = demangle(callee_func.name());
            if let Some((sink_name, index)) = sink_entry(&demangled) {
                if let Some(Value::Inst(arg)) = args.get(index) {
                    debug!("sink: argument [{index}] of {demangled}");
                    sink_args.push((*arg, sink_name));
                }
            } else if SINKS.iter().any(|(sink, _)| demangled.starts_with(sink)) {
                warn!("possible missed sink: {demangled}");
            }
        }
    }

    // Source functions whose return value escapes to non-source callers
    // have every return marked as a sink.
    let mut return_sinks: Vec<InstId> = Vec::new();
    if is_taint_source(func.name()) && func.ret().is_integer() {
        let escapes = uses.callers_of(fid).iter().any(|(caller, _)| {
            module
                .function(*caller)
                .is_some_and(|f| !is_taint_source(f.name()))
        });
        if escapes {
            debug!("sink: return insts of {}", func.name());
            return_sinks = func.return_insts();
        }
    }

    let func = module.function_mut(fid).expect("function disappeared");
    for (arg, sink_name) in sink_args {
        if let Some(inst) = func.inst_mut(arg) {
            inst.metadata_mut().set(metadata::SINK, sink_name);
        }
    }
    for ret in return_sinks {
        if let Some(inst) = func.inst_mut(ret) {
            inst.metadata_mut().set(metadata::SINK, "return");
        }
    }
}

/// Fixed-point sink-reachability propagation over the use index.
pub(crate) struct TaintPropagator<'a> {
    module: &'a mut Module,
    uses: &'a UseIndex,
    state: &'a mut AnalysisState,
    /// Instructions on the current DFS stack; cycles in the use graph
    /// contribute nothing new and are cut here.
    active: FxHashSet<InstRef>,
    /// Settled reachability answers.
    memo: FxHashMap<InstRef, bool>,
}

impl<'a> TaintPropagator<'a> {
    pub(crate) fn new(
        module: &'a mut Module,
        uses: &'a UseIndex,
        state: &'a mut AnalysisState,
    ) -> Self {
        Self {
            module,
            uses,
            state,
            active: FxHashSet::default(),
            memo: FxHashMap::default(),
        }
    }

    fn mark_taint(&mut self, at: InstRef, label: &str) {
        if let Some(inst) = self
            .module
            .function_mut(at.0)
            .and_then(|f| f.inst_mut(at.1))
        {
            inst.metadata_mut().set(metadata::TAINT, label);
        }
    }

    /// The sink functions called with `inst`'s result as an operand.
    fn sink_callees(&self, at: InstRef) -> Vec<FuncId> {
        let mut callees = Vec::new();
        for user in self.uses.users_of(at.0, Value::Inst(at.1)) {
            let Some(inst) = self
                .module
                .function(at.0)
                .and_then(|f| f.inst(*user))
            else {
                continue;
            };
            if let InstKind::Call { callee, .. } = inst.kind() {
                let is_sink = self
                    .module
                    .function(*callee)
                    .is_some_and(|f| sink_entry(&demangle(f.name())).is_some());
                if is_sink {
                    callees.push(*callee);
                }
            }
        }
        callees
    }

    /// Returns `true` iff a sink is transitively reachable from `inst`'s
    /// uses, marking `mkint.taint` along every successful path.
    fn is_sink_reachable(&mut self, at: InstRef) -> bool {
        if let Some(&settled) = self.memo.get(&at) {
            return settled;
        }
        if !self.active.insert(at) {
            return false;
        }

        let result = self.visit(at);

        self.active.remove(&at);
        self.memo.insert(at, result);
        result
    }

    fn visit(&mut self, at: InstRef) -> bool {
        let Some(inst) = self.module.function(at.0).and_then(|f| f.inst(at.1)) else {
            return false;
        };

        if inst.metadata().contains(metadata::SINK) {
            for callee in self.sink_callees(at) {
                self.state.taint_funcs.insert(callee);
            }
            // The sink endpoint is itself on the tainted path.
            self.mark_taint(at, "");
            return true;
        }

        if let InstKind::Store { addr, .. } = inst.kind() {
            let Value::Global(global) = *addr else {
                return false;
            };
            let mut seen_sink = false;
            for user in self.uses.users_of_global(global).to_vec() {
                if user != at {
                    seen_sink |= self.is_sink_reachable(user);
                }
            }
            if seen_sink {
                self.mark_taint(at, "");
                if let Some(g) = self.module.global_mut(global) {
                    g.metadata_mut().set(metadata::TAINT, "");
                }
            }
            return seen_sink;
        }

        let mut seen_sink = false;
        let callee = match inst.kind() {
            InstKind::Call { callee, .. } => Some(*callee),
            _ => None,
        };

        // A call into a known body broadcasts through the callee's
        // arguments; unknown callees are assumed to propagate.
        if let Some(callee) = callee {
            let has_body = self
                .module
                .function(callee)
                .is_some_and(|f| !f.is_declaration());
            if has_body && self.broadcast_args(callee) {
                seen_sink = true;
                self.state.taint_funcs.insert(callee);
            }
        }

        for user in self.uses.users_of(at.0, Value::Inst(at.1)).to_vec() {
            seen_sink |= self.is_sink_reachable((at.0, user));
        }

        if seen_sink {
            self.mark_taint(at, "");
            if let Some(callee) = callee {
                let returns_value = self
                    .module
                    .function(callee)
                    .is_some_and(|f| !f.ret().is_void());
                if returns_value {
                    self.state.taint_funcs.insert(callee);
                }
            }
        }
        seen_sink
    }

    /// Records `fid` as participating in a tainted flow.
    pub(crate) fn mark_func_tainted(&mut self, fid: FuncId) {
        self.state.taint_funcs.insert(fid);
    }

    /// Broadcasts from a source function's synthetic source calls. The
    /// originating calls are labeled `"source"`.
    pub(crate) fn broadcast_sources(&mut self, fid: FuncId, sources: &[InstId]) -> bool {
        let mut reached = false;
        for &source in sources {
            if self.is_sink_reachable((fid, source)) {
                self.mark_taint((fid, source), "source");
                reached = true;
            }
        }
        reached
    }

    /// Broadcasts from every direct user of `fid`'s arguments.
    pub(crate) fn broadcast_args(&mut self, fid: FuncId) -> bool {
        let Some(func) = self.module.function(fid) else {
            return false;
        };
        let arg_count = func.params().len();
        let mut reached = false;
        for index in 0..arg_count {
            for user in self.uses.users_of(fid, Value::Arg(index)).to_vec() {
                if self.is_sink_reachable((fid, user)) {
                    self.mark_taint((fid, user), "");
                    reached = true;
                }
            }
        }
        reached
    }

    /// Re-broadcasts through tainted non-source functions until the
    /// tainted set stops growing.
    pub(crate) fn propagate_to_fixpoint(&mut self) {
        loop {
            let before = self.state.taint_funcs.len();
            let mut tainted: Vec<FuncId> = self.state.taint_funcs.iter().copied().collect();
            tainted.sort_unstable();
            for fid in tainted {
                let is_source = self
                    .module
                    .function(fid)
                    .is_some_and(|f| is_taint_source(f.name()));
                if !is_source {
                    self.broadcast_args(fid);
                }
            }
            if self.state.taint_funcs.len() == before {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Function, FunctionBuilder, Type};

    #[test]
    fn test_demangle_passthrough() {
        assert_eq!(demangle("sys_read"), "sys_read");
        assert_eq!(demangle("kzalloc"), "kzalloc");
    }

    #[test]
    fn test_demangle_itanium() {
        assert_eq!(demangle("_Z7sys_fooi"), "sys_foo");
        assert_eq!(demangle("_ZN3net8sys_recvEi"), "net::sys_recv");
        // Malformed mangles fall back to the raw name.
        assert_eq!(demangle("_Z"), "_Z");
    }

    #[test]
    fn test_is_taint_source() {
        assert!(is_taint_source("sys_read"));
        assert!(is_taint_source("__mkint_ann_input"));
        assert!(is_taint_source("_Z7sys_fooi"));
        assert!(!is_taint_source("helper"));
        assert!(!is_taint_source("kzalloc"));
    }

    #[test]
    fn test_sink_table_lookup() {
        assert_eq!(sink_entry("kzalloc"), Some(("kzalloc", 0)));
        assert_eq!(sink_entry("__mkint_sink1"), Some(("__mkint_sink1", 1)));
        assert_eq!(sink_entry("memcpy"), None);
    }

    #[test]
    fn test_rewrite_taint_sources_inserts_anchor_calls() {
        let mut module = Module::new("m");
        let mut b = FunctionBuilder::new("sys_two", vec![Type::Int(32), Type::Int(32)], Type::Void);
        let entry = b.add_block();
        b.switch_to(entry);
        // Only arg0 is used.
        let _sum = b
            .binary(crate::ir::BinaryOp::Add, b.arg(0), b.const_int(32, 1))
            .unwrap();
        b.ret(None).unwrap();
        let fid = module.add_function(b.finish().unwrap());

        let sources = rewrite_taint_sources(&mut module, fid);
        assert_eq!(sources.len(), 1);

        // The anchor's callee declaration exists by convention name.
        let anchor = module.function_by_name("sys_two.mkint.arg0").unwrap();
        assert!(module.function(anchor).unwrap().is_declaration());

        // The add now consumes the anchor call, not the argument.
        let func = module.function(fid).unwrap();
        assert!(!func.arg_has_uses(0));
        let entry_first = func.block(func.entry_block().unwrap()).unwrap().insts()[0];
        assert_eq!(entry_first, sources[0]);
    }

    #[test]
    fn test_rewrite_skips_non_sources() {
        let mut module = Module::new("m");
        let mut b = FunctionBuilder::new("helper", vec![Type::Int(32)], Type::Void);
        let entry = b.add_block();
        b.switch_to(entry);
        let _ = b
            .binary(crate::ir::BinaryOp::Add, b.arg(0), b.const_int(32, 1))
            .unwrap();
        b.ret(None).unwrap();
        let fid = module.add_function(b.finish().unwrap());
        assert!(rewrite_taint_sources(&mut module, fid).is_empty());
        assert_eq!(module.function_count(), 1);
    }

    #[test]
    fn test_mark_func_sinks_annotates_call_argument() {
        let mut module = Module::new("m");
        let kzalloc = module.add_function(Function::declaration(
            "kzalloc",
            vec![Type::Int(64)],
            Type::Ptr,
        ));
        let mut b = FunctionBuilder::new("f", vec![Type::Int(64)], Type::Void);
        let entry = b.add_block();
        b.switch_to(entry);
        let size = b
            .binary(crate::ir::BinaryOp::Mul, b.arg(0), b.const_int(64, 4))
            .unwrap();
        b.call(kzalloc, Type::Ptr, vec![size]).unwrap();
        b.ret(None).unwrap();
        let fid = module.add_function(b.finish().unwrap());

        let uses = UseIndex::build(&module);
        mark_func_sinks(&mut module, fid, &uses);

        let func = module.function(fid).unwrap();
        let size_inst = func.inst(size.as_inst().unwrap()).unwrap();
        assert_eq!(size_inst.metadata().get(metadata::SINK), Some("kzalloc"));
    }

    #[test]
    fn test_mark_func_sinks_return_of_escaping_source() {
        let mut module = Module::new("m");
        let mut b = FunctionBuilder::new("sys_bar", vec![], Type::Int(32));
        let entry = b.add_block();
        b.switch_to(entry);
        b.ret(Some(b.const_int(32, 1))).unwrap();
        let source = module.add_function(b.finish().unwrap());

        let mut b = FunctionBuilder::new("caller", vec![], Type::Void);
        let entry = b.add_block();
        b.switch_to(entry);
        b.call(source, Type::Int(32), vec![]).unwrap();
        b.ret(None).unwrap();
        module.add_function(b.finish().unwrap());

        let uses = UseIndex::build(&module);
        mark_func_sinks(&mut module, source, &uses);

        let func = module.function(source).unwrap();
        let ret = func.return_insts()[0];
        assert_eq!(
            func.inst(ret).unwrap().metadata().get(metadata::SINK),
            Some("return")
        );
    }

    #[test]
    fn test_source_without_callers_has_no_return_sink() {
        let mut module = Module::new("m");
        let mut b = FunctionBuilder::new("sys_bar", vec![], Type::Int(32));
        let entry = b.add_block();
        b.switch_to(entry);
        b.ret(Some(b.const_int(32, 1))).unwrap();
        let source = module.add_function(b.finish().unwrap());

        let uses = UseIndex::build(&module);
        mark_func_sinks(&mut module, source, &uses);

        let func = module.function(source).unwrap();
        let ret = func.return_insts()[0];
        assert!(!func.inst(ret).unwrap().metadata().contains(metadata::SINK));
    }
}
