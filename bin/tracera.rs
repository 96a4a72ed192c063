/* -*- Mode: Rust; tab-width: 8; indent-tabs-mode: nil; rust-indent-offset: 2 -*-
 * vim: set ts=8 sts=2 et sw=2 tw=80:
*/

use tracera::test_cases::{all_funcs, find_func, test_args};
use tracera::test_framework::{
  allocate_and_compare, block_traces, linear_traces, make_universe, run_func,
  DEFAULT_MAX_STEPS,
};
use trace_regalloc::{
  AllocStats, Options, RegEnv, SpillState, TraceIntervals, TraceIx, VirtualReg,
};

use clap::{App, Arg};
use log::{error, info};
use serde::{Deserialize, Serialize};

use std::fs::File;
use std::io::BufWriter;
use std::process;

/// What `--dump` writes, bincode-encoded.
#[derive(Serialize, Deserialize)]
struct AllocSummary {
  func: String,
  num_spill_slots: u32,
  stats: AllocStats,
  spill_states: Vec<(TraceIx, VirtualReg, SpillState)>,
  intervals: Vec<TraceIntervals>,
}

fn dump(path: &str, summary: &AllocSummary) -> Result<(), String> {
  let file = File::create(path).map_err(|err| err.to_string())?;
  bincode::serialize_into(BufWriter::new(file), summary)
    .map_err(|err| err.to_string())
}

//=============================================================================
// Top level

fn main() {
  pretty_env_logger::init();

  let app = App::new("tracera")
    .about("a simple program to allow separate testing of the trace allocator")
    .arg(
      Arg::new("iregs")
        .short('i')
        .takes_value(true)
        .help("number of integer registers available (4 if not set)"),
    )
    .arg(
      Arg::new("fregs")
        .short('f')
        .takes_value(true)
        .help("number of floating-point registers available (4 if not set)"),
    )
    .arg(
      Arg::new("test")
        .short('t')
        .takes_value(true)
        .required_unless_present("list")
        .help("test case name"),
    )
    .arg(
      Arg::new("traces")
        .long("traces")
        .takes_value(true)
        .possible_values(["linear", "block"])
        .help("how blocks are grouped into traces (linear if not set)"),
    )
    .arg(
      Arg::new("never-spill-constants")
        .long("never-spill-constants")
        .help("rematerialize every constant"),
    )
    .arg(
      Arg::new("dump")
        .long("dump")
        .takes_value(true)
        .help("write the allocation summary to this file"),
    )
    .arg(Arg::new("list").long("list").help("list the test cases"));
  let matches = app.get_matches();

  if matches.is_present("list") {
    for func in all_funcs() {
      println!("{}", func.name);
    }
    return;
  }

  let func_name = matches.value_of("test").unwrap_or_default();
  let func = match find_func(func_name) {
    Ok(func) => func,
    Err(available_func_names) => {
      error!("can't find Func with name '{}'", func_name);
      println!("available func names are:");
      for name in available_func_names {
        println!("     {}", name);
      }
      process::exit(1);
    }
  };

  let (num_regs_i64, num_regs_f64) = match (
    matches.value_of("iregs").unwrap_or("4").parse::<usize>(),
    matches.value_of("fregs").unwrap_or("4").parse::<usize>(),
  ) {
    (Ok(num_i64), Ok(num_f64)) => (num_i64, num_f64),
    _other => {
      println!("invalid iregs/fregs values");
      process::exit(1);
    }
  };

  let traces = match matches.value_of("traces") {
    Some("block") => {
      info!("one trace per block");
      block_traces(&func)
    }
    _ => linear_traces(&func),
  };

  let env = RegEnv::new(make_universe(num_regs_i64, num_regs_f64));
  let mut opts = Options::from_env();
  opts.run_checker = true;
  if matches.is_present("never-spill-constants") {
    opts.never_spill_constants = true;
  }

  println!("{:?}", func);
  println!("traces: {:?}", traces);

  let args = test_args(&func);
  let before = match run_func(&func, &args, &env.rru, DEFAULT_MAX_STEPS) {
    Ok(result) => result,
    Err(err) => {
      println!("can't run {} before allocation: {}", func.name, err);
      process::exit(1);
    }
  };

  let allocated =
    match allocate_and_compare(&func, traces, &env, &opts, &args, &before) {
      Ok(allocated) => allocated,
      Err(err) => {
        println!("{}: {}", func.name, err);
        process::exit(1);
      }
    };

  println!("{:?}", allocated.func);
  let stats = allocated.result.stats;
  println!(
    "{} steps before, {} after; {} spill slots; {:?}",
    before.num_steps,
    allocated.run.num_steps,
    allocated.result.num_spill_slots,
    stats
  );
  println!("result: {}, output: {:?}", before.ret_value, before.stdout);

  if let Some(path) = matches.value_of("dump") {
    let summary = AllocSummary {
      func: func.name.clone(),
      num_spill_slots: allocated.result.num_spill_slots,
      stats,
      spill_states: allocated.result.spill_states,
      intervals: allocated.result.intervals.iter().cloned().collect(),
    };
    if let Err(err) = dump(path, &summary) {
      println!("can't write {}: {}", path, err);
      process::exit(1);
    }
    info!("summary written to {}", path);
  }
}

#[cfg(test)]
mod test_utils {
  use super::*;
  use trace_regalloc::{compute_intervals, TraceBuilderResult, TypedIxVec};
  use tracera::test_framework::{Allocated, Func};

  pub fn options() -> Options {
    Options { run_checker: true, never_spill_constants: false }
  }

  pub fn env(num_i64: usize, num_f64: usize) -> RegEnv {
    RegEnv::new(make_universe(num_i64, num_f64))
  }

  pub fn allocate(
    func: &Func, traces: Vec<Vec<trace_regalloc::BlockIx>>, env: &RegEnv,
    opts: &Options,
  ) -> Allocated {
    let args = test_args(func);
    let before = run_func(func, &args, &env.rru, DEFAULT_MAX_STEPS)
      .expect("the original function runs");
    allocate_and_compare(func, traces, env, opts, &args, &before)
      .unwrap_or_else(|err| panic!("{}: {}", func.name, err))
  }

  /// Allocates with both trace partitions and both constant policies.
  pub fn check(func_name: &str, num_i64: usize, num_f64: usize) {
    let _ = pretty_env_logger::try_init();
    let func = find_func(func_name).unwrap();
    let env = env(num_i64, num_f64);
    for never_spill_constants in &[false, true] {
      let opts = Options { never_spill_constants: *never_spill_constants, ..options() };
      allocate(&func, linear_traces(&func), &env, &opts);
      allocate(&func, block_traces(&func), &env, &opts);
    }
  }

  pub fn intervals(
    func: &Func, env: &RegEnv, opts: &Options,
  ) -> TypedIxVec<TraceIx, TraceIntervals> {
    let traces = TraceBuilderResult::new(func, linear_traces(func)).unwrap();
    compute_intervals(func, &traces, env, opts).unwrap()
  }
}

#[test]
fn straight_line() {
  for i in 1..5 {
    test_utils::check("straight_line", i, 0);
  }
}
#[test]
fn sum_loop() {
  for i in 2..6 {
    test_utils::check("sum_loop", i, 0);
  }
}
#[test]
fn nested_loops() {
  for i in 2..7 {
    test_utils::check("nested_loops", i, 0);
  }
}
#[test]
fn diamond() {
  for i in 2..6 {
    test_utils::check("diamond", i, 0);
  }
}
#[test]
fn pressure() {
  for i in 2..14 {
    test_utils::check("pressure", i, 0);
  }
}
#[test]
fn calls() {
  for i in 2..8 {
    test_utils::check("calls", i, 0);
  }
}
#[test]
fn stack_args() {
  for i in 2..6 {
    test_utils::check("stack_args", i, 0);
  }
}
#[test]
fn constants() {
  for i in 2..7 {
    test_utils::check("constants", i, 0);
  }
}
#[test]
fn rematerialize() {
  for i in 2..6 {
    test_utils::check("rematerialize", i, 0);
  }
}
#[test]
fn arg_redefined() {
  for i in 2..5 {
    test_utils::check("arg_redefined", i, 0);
  }
}
#[test]
fn fixed_regs() {
  for i in 2..5 {
    test_utils::check("fixed_regs", i, 0);
  }
}
#[test]
fn safepoints() {
  for i in 2..6 {
    test_utils::check("safepoints", i, 0);
  }
}
#[test]
fn while_loop() {
  for i in 2..5 {
    test_utils::check("while_loop", i, 0);
  }
}
#[test]
fn two_classes() {
  for i in 2..5 {
    test_utils::check("two_classes", i, i);
  }
}
#[test]
fn unknown_test_case() {
  let names = find_func("no_such_test").err().unwrap();
  assert!(names.iter().any(|name| name == "sum_loop"));
}

#[test]
fn straight_line_intervals() {
  use trace_regalloc::{
    Hint, LiveRange, OpId, RegClass, RegisterPriority, UsePosition,
  };
  let func = find_func("straight_line").unwrap();
  let env = test_utils::env(2, 0);
  let ints = test_utils::intervals(&func, &env, &test_utils::options());
  assert_eq!(ints.len(), 1);
  let ints = &ints[TraceIx::new(0)];
  let op = OpId::new;
  let must = RegisterPriority::MustHaveRegister;

  let v0 = ints.root_of_vreg(VirtualReg::new(RegClass::I64, 0)).unwrap();
  let interval = ints.var(v0);
  assert_eq!(interval.ranges, vec![LiveRange::new(op(2), op(8))]);
  assert_eq!(
    interval.uses,
    vec![
      UsePosition { pos: op(2), priority: must },
      UsePosition { pos: op(8), priority: must }
    ]
  );
  assert_eq!(interval.materialized, Some(7));
  assert_eq!(interval.spill.state(), SpillState::NoSpillStore);

  let v1 = ints.root_of_vreg(VirtualReg::new(RegClass::I64, 1)).unwrap();
  let interval = ints.var(v1);
  assert_eq!(interval.ranges, vec![LiveRange::new(op(8), op(10))]);
  assert_eq!(interval.hint, Some(Hint::Interval(v0)));
  assert_eq!(
    interval.uses.last().map(|u| u.priority),
    Some(RegisterPriority::ShouldHaveRegister)
  );

  // Nothing to spill, split or connect.
  let allocated =
    test_utils::allocate(&func, linear_traces(&func), &env, &test_utils::options());
  assert_eq!(allocated.result.stats, AllocStats::default());
  assert_eq!(allocated.run.ret_value, 8);
  assert_eq!(allocated.run.stdout, vec![1, 2]);
}

#[test]
fn building_intervals_is_repeatable() {
  for func in all_funcs() {
    let env = test_utils::env(4, 4);
    let opts = test_utils::options();
    let first = test_utils::intervals(&func, &env, &opts);
    let second = test_utils::intervals(&func, &env, &opts);
    assert_eq!(format!("{:?}", first), format!("{:?}", second));
  }
}

#[test]
fn nothing_survives_a_call_in_a_caller_saved_register() {
  use tracera::test_framework::Inst;
  let func = find_func("calls").unwrap();
  for i in 2..6 {
    let env = test_utils::env(i, 0);
    let allocated = test_utils::allocate(
      &func,
      linear_traces(&func),
      &env,
      &test_utils::options(),
    );
    // A single block: op ids follow the instruction indices.
    let ints = &allocated.result.intervals[TraceIx::new(0)];
    for (n, insn) in func.insns.iter().enumerate() {
      if !matches!(insn, Inst::Call { .. }) {
        continue;
      }
      let op = trace_regalloc::OpId::new(2 * n as i32);
      for interval in ints.vars.iter() {
        if let Some(reg) = interval.location.reg() {
          assert!(
            !(interval.covers(op) && env.rru.is_caller_saved(reg)),
            "{} is in {:?} over the call at {:?}",
            interval,
            reg,
            op
          );
        }
      }
    }
  }
}

#[test]
fn constants_with_memory_uses_are_not_rematerialized() {
  use trace_regalloc::{Location, RegClass};
  let func = find_func("constants").unwrap();
  let env = test_utils::env(2, 0);
  let k1 = VirtualReg::new(RegClass::I64, 0);
  let k4 = VirtualReg::new(RegClass::I64, 3);

  let ints = test_utils::intervals(&func, &env, &test_utils::options());
  let ints = &ints[TraceIx::new(0)];
  let materialized = |vreg| ints.var(ints.root_of_vreg(vreg).unwrap()).materialized;
  assert_eq!(materialized(k1), None);
  assert_eq!(materialized(k4), Some(5));

  let opts = Options { never_spill_constants: true, ..test_utils::options() };
  let ints = test_utils::intervals(&func, &env, &opts);
  let ints = &ints[TraceIx::new(0)];
  let root = ints.root_of_vreg(k1).unwrap();
  assert_eq!(ints.var(root).materialized, Some(100));

  // Under pressure, k1 goes to memory rather than being reloaded as a
  // constant.
  let allocated = test_utils::allocate(
    &func,
    linear_traces(&func),
    &env,
    &test_utils::options(),
  );
  let ints = &allocated.result.intervals[TraceIx::new(0)];
  for interval in ints.vars.iter().filter(|interval| interval.vreg == k1) {
    assert!(!matches!(interval.location, Location::Const(_)));
  }
}

#[test]
fn constants_read_from_registers_are_rematerialized() {
  use tracera::test_framework::{i_add, i_call, i_imm, s, Blockifier, Opnd};
  use trace_regalloc::{Location, RegClass, RegisterPriority};
  let mut bif = Blockifier::new("remat_imm");
  let k = bif.new_vreg();
  let x = bif.new_vreg();
  let stmts = vec![
    s(i_imm(k, 5)),
    s(i_add(x, k, Opnd::C(1))),
    s(i_call(None, vec![k])),
    s(i_add(x, k, x)),
  ];
  let func = bif.finish(stmts, x);
  let k = VirtualReg::new(RegClass::I64, 0);

  // The load itself accepts a stack destination; only the reads matter.
  let env = test_utils::env(2, 0);
  let ints = test_utils::intervals(&func, &env, &test_utils::options());
  let ints = &ints[TraceIx::new(0)];
  let root = ints.var(ints.root_of_vreg(k).unwrap());
  assert_eq!(
    root.uses.first().map(|u| u.priority),
    Some(RegisterPriority::ShouldHaveRegister)
  );
  assert!(!root.dead);
  assert_eq!(root.materialized, Some(5));

  for i in 2..5 {
    let env = test_utils::env(i, 0);
    let allocated = test_utils::allocate(
      &func,
      linear_traces(&func),
      &env,
      &test_utils::options(),
    );
    assert_eq!(allocated.run.ret_value, 11);
    let ints = &allocated.result.intervals[TraceIx::new(0)];
    for interval in ints.vars.iter().filter(|interval| interval.vreg == k) {
      assert!(!matches!(interval.location, Location::Stack(_)));
    }
  }
}

#[test]
fn redefined_argument_copy_leaves_the_slot() {
  use tracera::test_framework::{i_copy, i_imm, i_print, s, Blockifier};
  use trace_regalloc::{RegClass, StackSlot};
  let mut bif = Blockifier::new("arg_after_imm");
  let arg0 = bif.new_arg();
  let x = bif.new_vreg();
  let stmts = vec![
    s(i_imm(x, 1)),
    s(i_print(x)),
    s(i_copy(x, arg0)),
    s(i_print(x)),
  ];
  let func = bif.finish(stmts, x);
  let x = VirtualReg::new(RegClass::I64, 0);

  let env = test_utils::env(2, 0);
  let ints = test_utils::intervals(&func, &env, &test_utils::options());
  let ints = &ints[TraceIx::new(0)];
  let root = ints.var(ints.root_of_vreg(x).unwrap());
  assert_eq!(root.spill.state(), SpillState::NoOptimization);
  assert_ne!(root.spill_slot, Some(StackSlot::Incoming(0)));

  for i in 2..5 {
    let env = test_utils::env(i, 0);
    let allocated = test_utils::allocate(
      &func,
      linear_traces(&func),
      &env,
      &test_utils::options(),
    );
    assert_eq!(allocated.run.ret_value, 2);
    assert_eq!(allocated.run.stdout, vec![1, 2]);
  }
}

#[test]
fn unused_definitions_are_flagged() {
  use tracera::test_framework::{i_imm, s, Blockifier, Opnd};
  use trace_regalloc::RegClass;
  let mut bif = Blockifier::new("dead_def");
  let x = bif.new_vreg();
  let y = bif.new_vreg();
  let stmts = vec![s(i_imm(x, 1)), s(i_imm(y, 2))];
  let func = bif.finish(stmts, Opnd::C(0));
  let env = test_utils::env(2, 0);
  let ints = test_utils::intervals(&func, &env, &test_utils::options());
  let ints = &ints[TraceIx::new(0)];
  for n in 0..2 {
    let vreg = VirtualReg::new(RegClass::I64, n);
    assert!(ints.var(ints.root_of_vreg(vreg).unwrap()).dead);
  }
  let allocated =
    test_utils::allocate(&func, linear_traces(&func), &env, &test_utils::options());
  assert_eq!(allocated.run.ret_value, 0);
}

#[test]
fn labels_with_operands_are_rejected() {
  use smallvec::SmallVec;
  use trace_regalloc::{
    AnalysisError, BlockIx, Function, InstIx, Location, MyRange, Operand,
    RealReg, RegAllocError, RegClass, StackSlot, TraceBuilderResult, Value,
  };
  use tracera::test_framework::{Func, Inst};

  // Delegates to `Func`, but gives every label a read.
  struct ReadingLabels(Func);

  impl Function for ReadingLabels {
    type Inst = Inst;
    fn insns(&self) -> &[Inst] {
      self.0.insns()
    }
    fn blocks(&self) -> MyRange<BlockIx> {
      self.0.blocks()
    }
    fn entry_block(&self) -> BlockIx {
      self.0.entry_block()
    }
    fn block_insns(&self, block: BlockIx) -> MyRange<InstIx> {
      self.0.block_insns(block)
    }
    fn block_succs(&self, block: BlockIx) -> Vec<BlockIx> {
      self.0.block_succs(block)
    }
    fn get_operands(&self, insn: &Inst) -> SmallVec<[Operand; 4]> {
      let mut operands = self.0.get_operands(insn);
      if self.0.is_label(insn) {
        let vreg = VirtualReg::new(RegClass::I64, 0);
        operands.push(Operand::use_(Value::Virtual(vreg)));
      }
      operands
    }
    fn is_label(&self, insn: &Inst) -> bool {
      self.0.is_label(insn)
    }
    fn is_move(&self, insn: &Inst) -> Option<(Value, Value)> {
      self.0.is_move(insn)
    }
    fn destroys_caller_saved(&self, insn: &Inst) -> bool {
      self.0.destroys_caller_saved(insn)
    }
    fn map_operands(&self, insn: &mut Inst, locations: &[Location]) {
      self.0.map_operands(insn, locations)
    }
    fn gen_spill(
      &self, to_slot: StackSlot, from_reg: RealReg, for_vreg: VirtualReg,
    ) -> Inst {
      self.0.gen_spill(to_slot, from_reg, for_vreg)
    }
    fn gen_reload(
      &self, to_reg: RealReg, from_slot: StackSlot, for_vreg: VirtualReg,
    ) -> Inst {
      self.0.gen_reload(to_reg, from_slot, for_vreg)
    }
    fn gen_move(
      &self, to_reg: RealReg, from_reg: RealReg, for_vreg: VirtualReg,
    ) -> Inst {
      self.0.gen_move(to_reg, from_reg, for_vreg)
    }
    fn gen_materialize(
      &self, to: Location, value: i64, for_vreg: VirtualReg,
    ) -> Inst {
      self.0.gen_materialize(to, value, for_vreg)
    }
  }

  let inner = find_func("straight_line").unwrap();
  let traces = linear_traces(&inner);
  let func = ReadingLabels(inner);
  let env = test_utils::env(2, 0);
  let traces = TraceBuilderResult::new(&func, traces).unwrap();
  let result = trace_regalloc::allocate_registers(
    &func,
    &traces,
    &env,
    &test_utils::options(),
  );
  assert!(matches!(
    result,
    Err(RegAllocError::Analysis(AnalysisError::LabelWithOperands(_)))
  ));
}

#[test]
fn copy_from_fixed_register_takes_the_hint() {
  use trace_regalloc::{Location, RealReg, RegClass};
  let func = find_func("fixed_regs").unwrap();
  let r0 = RealReg::new(RegClass::I64, 0);
  let b = VirtualReg::new(RegClass::I64, 1);
  for i in 2..5 {
    let env = test_utils::env(i, 0);
    let allocated = test_utils::allocate(
      &func,
      linear_traces(&func),
      &env,
      &test_utils::options(),
    );
    let ints = &allocated.result.intervals[TraceIx::new(0)];
    let root = ints.root_of_vreg(b).unwrap();
    assert_eq!(ints.var(root).location, Location::Reg(r0));
  }
}

#[test]
fn argument_values_start_in_their_slots() {
  use trace_regalloc::{Location, RegClass, StackSlot};
  let func = find_func("stack_args").unwrap();
  let env = test_utils::env(3, 0);
  let ints = test_utils::intervals(&func, &env, &test_utils::options());
  // The entry block is a trace of its own: the loop header has two
  // predecessors.
  let ints = &ints[TraceIx::new(0)];
  for (n, vreg) in (0..2).map(|n| (n, VirtualReg::new(RegClass::I64, n))) {
    let interval = ints.var(ints.root_of_vreg(vreg).unwrap());
    assert_eq!(interval.spill.state(), SpillState::StartInMemory);
    assert_eq!(interval.location, Location::Stack(StackSlot::Incoming(n)));
  }
}

#[test]
fn adjacent_definitions_count_as_one() {
  use tracera::test_framework::{i_add, i_imm, i_print, s, Blockifier, Opnd};
  use trace_regalloc::RegClass;
  let mut bif = Blockifier::new("two_defs");
  let x = bif.new_vreg();
  let y = bif.new_vreg();
  let stmts = vec![
    s(i_imm(x, 1)),
    s(i_add(x, x, Opnd::C(1))),
    s(i_imm(y, 2)),
    s(i_print(y)),
    s(i_add(y, y, x)),
  ];
  let func = bif.finish(stmts, y);

  let env = test_utils::env(2, 0);
  let ints = test_utils::intervals(&func, &env, &test_utils::options());
  let ints = &ints[TraceIx::new(0)];
  let state = |n| {
    let vreg = VirtualReg::new(RegClass::I64, n);
    ints.var(ints.root_of_vreg(vreg).unwrap()).spill.state()
  };
  assert_eq!(state(0), SpillState::NoSpillStore);
  assert_eq!(state(1), SpillState::NoOptimization);

  let allocated =
    test_utils::allocate(&func, linear_traces(&func), &env, &test_utils::options());
  assert_eq!(allocated.run.ret_value, 4);
}

#[test]
fn malformed_traces_are_rejected() {
  use trace_regalloc::{AnalysisError, BlockIx, RegAllocError};
  use tracera::test_framework::{CompareError, RunResult};
  let func = find_func("sum_loop").unwrap();
  let env = test_utils::env(3, 0);
  let before = RunResult { num_steps: 0, ret_value: 0, stdout: vec![] };
  let mut traces = linear_traces(&func);
  traces.retain(|trace| trace[0] != BlockIx::new(0));
  let result = allocate_and_compare(
    &func,
    traces,
    &env,
    &test_utils::options(),
    &[],
    &before,
  );
  assert!(matches!(
    result,
    Err(CompareError::Alloc(RegAllocError::Analysis(
      AnalysisError::InvalidTraces(_)
    )))
  ));
}
