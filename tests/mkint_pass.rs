//! End-to-end scenarios for the integer-flow analysis pass.
//!
//! Each test builds a small module with the public builder API, runs the
//! pass, and checks the metadata written into the IR together with the
//! exposed analysis state.

use mkint::ir::{
    metadata, BinaryOp, ConstInt, FuncId, Function, FunctionBuilder, Global, GlobalInit, InstId,
    Module, Predicate, Type, Value,
};
use mkint::{Interval, MkintPass, PreservedAnalyses, Result};

fn sink_decl(module: &mut Module, name: &str, param: Type) -> FuncId {
    module.add_function(Function::declaration(name, vec![param], Type::Ptr))
}

fn err_of(module: &Module, func: FuncId, inst: InstId) -> Option<String> {
    module
        .function(func)
        .unwrap()
        .inst(inst)
        .unwrap()
        .metadata()
        .get(metadata::ERR)
        .map(str::to_string)
}

fn taint_of(module: &Module, func: FuncId, inst: InstId) -> Option<String> {
    module
        .function(func)
        .unwrap()
        .inst(inst)
        .unwrap()
        .metadata()
        .get(metadata::TAINT)
        .map(str::to_string)
}

/// Scenario: `sys_check(x)` tests `x < 0` and then `x >= 0` on the true
/// path; the inner compare's true branch is impossible.
#[test]
fn test_dead_branch_via_constant_range() -> Result<()> {
    let mut module = Module::new("dead_branch");
    let sink = sink_decl(&mut module, "__mkint_sink0", Type::Int(32));

    let mut b = FunctionBuilder::new("sys_check", vec![Type::Int(32)], Type::Int(32));
    let entry = b.add_block();
    let negative = b.add_block();
    let dead = b.add_block();
    let exit = b.add_block();
    b.switch_to(entry);
    let outer = b.icmp(Predicate::Slt, b.arg(0), b.const_int(32, 0))?;
    b.branch(outer, negative, exit)?;
    b.switch_to(negative);
    let inner = b.icmp(Predicate::Sge, b.arg(0), b.const_int(32, 0))?;
    b.branch(inner, dead, exit)?;
    b.switch_to(dead);
    b.call(sink, Type::Ptr, vec![b.arg(0)])?;
    b.jump(exit)?;
    b.switch_to(exit);
    b.ret(Some(b.const_int(32, 0)))?;
    let fid = module.add_function(b.finish()?);

    let mut pass = MkintPass::new();
    assert_eq!(pass.run(&mut module)?, PreservedAnalyses::All);

    let inner_cmp = inner.as_inst().unwrap();
    assert_eq!(
        err_of(&module, fid, inner_cmp).as_deref(),
        Some("impossible true branch")
    );
    // The outer compare itself is feasible both ways.
    assert_eq!(err_of(&module, fid, outer.as_inst().unwrap()), None);
    Ok(())
}

/// Scenario: indexing `arr: [i32; 4]` with an index whose interval is
/// `[0, 7]` flags the address computation.
#[test]
fn test_array_oob() -> Result<()> {
    let mut module = Module::new("oob");
    let arr = module.add_global(Global::new(
        "arr",
        Type::IntArray { width: 32, len: 4 },
        GlobalInit::Array(vec![
            ConstInt::new(32, 1),
            ConstInt::new(32, 2),
            ConstInt::new(32, 3),
            ConstInt::new(32, 4),
        ]),
    ));

    let mut b = FunctionBuilder::new("sys_index", vec![Type::Int(32)], Type::Int(32));
    let entry = b.add_block();
    b.switch_to(entry);
    let idx = b.binary(BinaryOp::And, b.arg(0), b.const_int(32, 7))?;
    let gep = b.gep(Value::Global(arr), vec![b.const_int(32, 0), idx])?;
    let loaded = b.load(Type::Int(32), gep)?;
    b.ret(Some(loaded))?;
    let fid = module.add_function(b.finish()?);

    let mut pass = MkintPass::new();
    pass.run(&mut module)?;

    let gep_id = gep.as_inst().unwrap();
    assert_eq!(
        err_of(&module, fid, gep_id).as_deref(),
        Some("array index out of bound")
    );
    assert!(pass.state().oob_geps().any(|r| r == (fid, gep_id)));
    Ok(())
}

/// Scenario: `sys_foo(x)` calls `kzalloc(x * 4)`. The synthetic source
/// call and the multiply carry taint, the multiply is the sink argument,
/// and `kzalloc` lands in the tainted-function set.
#[test]
fn test_taint_to_sink() -> Result<()> {
    let mut module = Module::new("taint");
    let kzalloc = sink_decl(&mut module, "kzalloc", Type::Int(32));

    let mut b = FunctionBuilder::new("sys_foo", vec![Type::Int(32)], Type::Void);
    let entry = b.add_block();
    b.switch_to(entry);
    let size = b.binary(BinaryOp::Mul, b.arg(0), b.const_int(32, 4))?;
    b.call(kzalloc, Type::Ptr, vec![size])?;
    b.ret(None)?;
    let fid = module.add_function(b.finish()?);

    let mut pass = MkintPass::new();
    pass.run(&mut module)?;

    let func = module.function(fid).unwrap();
    // The synthetic source call was inserted at the entry's front.
    let anchor = func.block(func.entry_block().unwrap()).unwrap().insts()[0];
    assert_eq!(taint_of(&module, fid, anchor).as_deref(), Some("source"));

    let mul = size.as_inst().unwrap();
    assert_eq!(taint_of(&module, fid, mul).as_deref(), Some(""));
    assert_eq!(
        module
            .function(fid)
            .unwrap()
            .inst(mul)
            .unwrap()
            .metadata()
            .get(metadata::SINK),
        Some("kzalloc")
    );
    assert!(pass.state().is_tainted_func(kzalloc));
    Ok(())
}

/// Scenario: inside the true successor of `if (x < 10)`, the argument's
/// interval is a subset of `[INT_MIN, 9]`.
#[test]
fn test_branch_refinement() -> Result<()> {
    let mut module = Module::new("refine");
    let mut b = FunctionBuilder::new("sys_narrow", vec![Type::Int(32)], Type::Int(32));
    let entry = b.add_block();
    let small = b.add_block();
    let other = b.add_block();
    b.switch_to(entry);
    let cond = b.icmp(Predicate::Slt, b.arg(0), b.const_int(32, 10))?;
    b.branch(cond, small, other)?;
    b.switch_to(small);
    b.ret(Some(b.arg(0)))?;
    b.switch_to(other);
    b.ret(Some(b.const_int(32, 0)))?;
    let fid = module.add_function(b.finish()?);

    let mut pass = MkintPass::new();
    pass.run(&mut module)?;

    // The argument was rewritten; its value is the entry's synthetic call.
    let func = module.function(fid).unwrap();
    let anchor = func.block(func.entry_block().unwrap()).unwrap().insts()[0];
    let in_small = pass
        .state()
        .value_range(fid, small, Value::Inst(anchor))
        .unwrap();
    assert_eq!(in_small.signed_max(), 9);
    assert_eq!(in_small.signed_min(), i64::from(i32::MIN));
    Ok(())
}

/// Scenario: `int g(int y) { return y + 1; }  int f() { return g(5); }` -
/// both return summaries contain 6 after the fixed point.
#[test]
fn test_interprocedural_return_summary() -> Result<()> {
    let mut module = Module::new("interproc");

    let mut b = FunctionBuilder::new("g", vec![Type::Int(32)], Type::Int(32));
    let entry = b.add_block();
    b.switch_to(entry);
    let sum = b.binary(BinaryOp::Add, b.arg(0), b.const_int(32, 1))?;
    b.ret(Some(sum))?;
    let g = module.add_function(b.finish()?);

    let mut b = FunctionBuilder::new("f", vec![], Type::Int(32));
    let entry = b.add_block();
    b.switch_to(entry);
    let call = b.call(g, Type::Int(32), vec![b.const_int(32, 5)])?;
    b.ret(Some(call))?;
    let f = module.add_function(b.finish()?);

    let mut pass = MkintPass::new();
    pass.run(&mut module)?;

    assert!(pass.state().func_return_range(g).unwrap().contains(6));
    assert!(pass.state().func_return_range(f).unwrap().contains(6));
    Ok(())
}

/// Scenario: `sys_bar()` returns an integer consumed by a non-source
/// caller; its returns are sinks, and the tainted return expression is
/// marked.
#[test]
fn test_source_return_as_sink() -> Result<()> {
    let mut module = Module::new("ret_sink");

    let mut b = FunctionBuilder::new("sys_bar", vec![Type::Int(32)], Type::Int(32));
    let entry = b.add_block();
    b.switch_to(entry);
    let doubled = b.binary(BinaryOp::Add, b.arg(0), b.arg(0))?;
    b.ret(Some(doubled))?;
    let source = module.add_function(b.finish()?);

    let mut b = FunctionBuilder::new("driver", vec![], Type::Int(32));
    let entry = b.add_block();
    b.switch_to(entry);
    let got = b.call(source, Type::Int(32), vec![b.const_int(32, 3)])?;
    b.ret(Some(got))?;
    module.add_function(b.finish()?);

    let mut pass = MkintPass::new();
    pass.run(&mut module)?;

    let func = module.function(source).unwrap();
    for ret in func.return_insts() {
        assert_eq!(
            func.inst(ret).unwrap().metadata().get(metadata::SINK),
            Some("return")
        );
    }
    // The returned expression reaches the return sink, so it is tainted.
    assert_eq!(
        taint_of(&module, source, doubled.as_inst().unwrap()).as_deref(),
        Some("")
    );
    assert!(pass.state().is_tainted_func(source));
    Ok(())
}

/// Supplement: a divisor interval containing zero flags the division.
#[test]
fn test_div_by_zero() -> Result<()> {
    let mut module = Module::new("div");
    let mut b = FunctionBuilder::new("sys_div", vec![Type::Int(32)], Type::Int(32));
    let entry = b.add_block();
    b.switch_to(entry);
    let divisor = b.binary(BinaryOp::And, b.arg(0), b.const_int(32, 1))?;
    let quotient = b.binary(BinaryOp::UDiv, b.const_int(32, 100), divisor)?;
    b.ret(Some(quotient))?;
    let fid = module.add_function(b.finish()?);

    let mut pass = MkintPass::new();
    pass.run(&mut module)?;

    assert_eq!(
        err_of(&module, fid, quotient.as_inst().unwrap()).as_deref(),
        Some("divide by zero")
    );
    Ok(())
}

/// Supplement: a shift amount that can reach the operand width flags the
/// shift.
#[test]
fn test_bad_shift() -> Result<()> {
    let mut module = Module::new("shift");
    let mut b = FunctionBuilder::new("sys_shift", vec![Type::Int(32)], Type::Int(32));
    let entry = b.add_block();
    b.switch_to(entry);
    let amount = b.binary(BinaryOp::And, b.arg(0), b.const_int(32, 63))?;
    let shifted = b.binary(BinaryOp::Shl, b.const_int(32, 1), amount)?;
    b.ret(Some(shifted))?;
    let fid = module.add_function(b.finish()?);

    let mut pass = MkintPass::new();
    pass.run(&mut module)?;

    assert_eq!(
        err_of(&module, fid, shifted.as_inst().unwrap()).as_deref(),
        Some("bad shift")
    );
    Ok(())
}

/// Supplement: adding one to the signed maximum flags the addition, while
/// a full-set operand suppresses the check.
#[test]
fn test_overflow() -> Result<()> {
    let mut module = Module::new("overflow");
    let mut b = FunctionBuilder::new("calc", vec![], Type::Int(32));
    let entry = b.add_block();
    b.switch_to(entry);
    let wrapped = b.binary(
        BinaryOp::Add,
        b.const_int(32, 0x7fff_ffff),
        b.const_int(32, 1),
    )?;
    b.ret(Some(wrapped))?;
    let fid = module.add_function(b.finish()?);

    let mut b = FunctionBuilder::new("sys_unconstrained", vec![Type::Int(32)], Type::Int(32));
    let entry = b.add_block();
    b.switch_to(entry);
    let unconstrained = b.binary(BinaryOp::Add, b.arg(0), b.const_int(32, 1))?;
    b.ret(Some(unconstrained))?;
    let sys = module.add_function(b.finish()?);

    let mut pass = MkintPass::new();
    pass.run(&mut module)?;

    assert_eq!(
        err_of(&module, fid, wrapped.as_inst().unwrap()).as_deref(),
        Some("integer overflow")
    );
    assert_eq!(
        err_of(&module, sys, unconstrained.as_inst().unwrap()),
        None
    );
    Ok(())
}

/// Running the pass twice produces the same printed module: annotations
/// are a pure function of the input IR and the fixed name tables.
#[test]
fn test_idempotence() -> Result<()> {
    let build = || -> Result<Module> {
        let mut module = Module::new("idem");
        let kzalloc = sink_decl(&mut module, "kzalloc", Type::Int(32));
        let mut b = FunctionBuilder::new("sys_foo", vec![Type::Int(32)], Type::Int(32));
        let entry = b.add_block();
        let small = b.add_block();
        let other = b.add_block();
        b.switch_to(entry);
        let size = b.binary(BinaryOp::Mul, b.arg(0), b.const_int(32, 4))?;
        b.call(kzalloc, Type::Ptr, vec![size])?;
        let cond = b.icmp(Predicate::Ult, size, b.const_int(32, 64))?;
        b.branch(cond, small, other)?;
        b.switch_to(small);
        b.ret(Some(size))?;
        b.switch_to(other);
        b.ret(Some(b.const_int(32, 0)))?;
        module.add_function(b.finish()?);
        Ok(module)
    };

    let mut module = build()?;
    MkintPass::new().run(&mut module)?;
    let first = format!("{module}");

    MkintPass::new().run(&mut module)?;
    let second = format!("{module}");

    assert_eq!(first, second);
    Ok(())
}

/// A loop neither diverges nor flows values around its back-edge; the
/// pass terminates and the loop-carried phi keeps its entry value.
#[test]
fn test_loop_terminates_without_widening() -> Result<()> {
    let mut module = Module::new("looping");
    let mut b = FunctionBuilder::new("sys_loop", vec![Type::Int(32)], Type::Int(32));
    let entry = b.add_block();
    let header = b.add_block();
    let body = b.add_block();
    let exit = b.add_block();
    b.switch_to(entry);
    b.jump(header)?;
    b.switch_to(header);
    let counter = b.phi(32, vec![(b.const_int(32, 0), entry), (b.arg(0), body)])?;
    let cond = b.icmp(Predicate::Slt, counter, b.const_int(32, 100))?;
    b.branch(cond, body, exit)?;
    b.switch_to(body);
    b.jump(header)?;
    b.switch_to(exit);
    b.ret(Some(counter))?;
    let fid = module.add_function(b.finish()?);

    let mut pass = MkintPass::new();
    pass.run(&mut module)?;

    let phi_rng = pass
        .state()
        .value_range(fid, header, counter)
        .unwrap();
    assert_eq!(phi_rng.as_single_element(), Some(0));
    Ok(())
}

/// Every recorded interval respects the bit-width of its value.
#[test]
fn test_intervals_respect_bit_widths() -> Result<()> {
    let mut module = Module::new("widths");
    let mut b = FunctionBuilder::new(
        "sys_mixed",
        vec![Type::Int(8), Type::Int(32)],
        Type::Int(64),
    );
    let entry = b.add_block();
    b.switch_to(entry);
    let widened = b.cast(mkint::ir::CastOp::SExt, b.arg(0), 32)?;
    let sum = b.binary(BinaryOp::Add, widened, b.arg(1))?;
    let big = b.cast(mkint::ir::CastOp::ZExt, sum, 64)?;
    b.ret(Some(big))?;
    let fid = module.add_function(b.finish()?);

    let mut pass = MkintPass::new();
    pass.run(&mut module)?;

    let func = module.function(fid).unwrap();
    for (bid, _) in func.blocks() {
        for (inst_id, inst) in func.instructions() {
            if let Some(width) = inst.ty().int_width() {
                if let Some(rng) = pass.state().value_range(fid, bid, Value::Inst(inst_id)) {
                    assert_eq!(rng.width(), width);
                }
            }
        }
    }
    assert_eq!(
        pass.state().func_return_range(fid).map(Interval::width),
        Some(64)
    );
    Ok(())
}
