/* -*- Mode: Rust; tab-width: 8; indent-tabs-mode: nil; rust-indent-offset: 2 -*-
 * vim: set ts=8 sts=2 et sw=2 tw=80:
*/

//! Building the intervals of one trace.
//!
//! The trace is walked backwards, from its last instruction to its first.
//! A use opens a range back to the start of its block; the definition found
//! later in the walk then cuts the range down to where the value is born.

use log::{debug, info, trace};

use crate::analysis::AnalysisInfo;
use crate::data_structures::{
  BlockIx, InstIx, IntId, Location, Map, OpId, RealReg, StackSlot, TraceIx,
  VirtualReg,
};
use crate::interface::{
  Function, Operand, OperandFlags, OperandMode, Options, RegAllocError,
  RegEnv, TraceBuilderResult, Value,
};
use crate::intervals::{Hint, RegisterPriority, TraceIntervals};
use crate::spill_state::SpillState;
use crate::ssi::SsiInfo;

fn use_priority(flags: OperandFlags) -> RegisterPriority {
  if flags.contains(OperandFlags::CALL_ARG) {
    RegisterPriority::None
  } else if flags.contains(OperandFlags::STACK) {
    RegisterPriority::ShouldHaveRegister
  } else {
    RegisterPriority::MustHaveRegister
  }
}

/// What the definitions of one instruction need to know about it.
struct DefContext {
  op: OpId,
  is_label: bool,
  /// Source slot of a move from an incoming stack argument.
  method_arg: Option<u32>,
  /// Value of a constant load.
  constant: Option<i64>,
  /// The first input flagged as a hint.
  hint_src: Option<Value>,
}

struct IntervalBuilder<'a, F: Function> {
  func: &'a F,
  info: &'a AnalysisInfo,
  ssi: &'a SsiInfo,
  env: &'a RegEnv,
  opts: &'a Options,
  incoming_hints: &'a Map<VirtualReg, RealReg>,
  spill_map: &'a mut Map<VirtualReg, StackSlot>,
  ints: TraceIntervals,
  /// Moves from incoming stack arguments: interval, value, position, slot.
  method_args: Vec<(IntId, VirtualReg, OpId, u32)>,
}

impl<'a, F: Function> IntervalBuilder<'a, F> {
  fn build_block(
    &mut self, block: BlockIx, is_head: bool,
  ) -> Result<(), RegAllocError> {
    let block_from = self.info.numbering.block_first_op(block);
    let insns = self.func.block_insns(block);
    let last = insns.last();

    let mut iix = insns.last_plus1();
    while iix > insns.first() {
      iix = iix.minus(1);
      self.build_inst(block, block_from, iix, iix == last, is_head)?;
    }
    Ok(())
  }

  fn build_inst(
    &mut self, block: BlockIx, block_from: OpId, iix: InstIx,
    is_terminator: bool, is_head: bool,
  ) -> Result<(), RegAllocError> {
    let func = self.func;
    let insn = func.get_insn(iix);
    let op = self.info.numbering.op_of_inst(iix);
    let operands = func.get_operands(insn);
    let is_label = func.is_label(insn);

    // Calls make every caller-saved register unavailable across them.
    if func.destroys_caller_saved(insn) {
      let rru = &self.env.rru;
      for &reg in &rru.caller_saved {
        if rru.is_allocable(reg) {
          self.ints.add_fixed_range(reg, op, op.plus(1))?;
        }
      }
    }

    let (method_arg, constant) = match func.is_move(insn) {
      Some((Value::Virtual(_), Value::Incoming(slot))) => (Some(slot), None),
      Some((Value::Virtual(_), Value::Const(value))) => (None, Some(value)),
      _ => (None, None),
    };
    let hint_src = operands
      .iter()
      .find(|o| {
        o.flags.contains(OperandFlags::HINT)
          && (o.mode == OperandMode::Use || o.mode == OperandMode::Alive)
      })
      .map(|o| o.value);
    let ctx = DefContext { op, is_label, method_arg, constant, hint_src };

    for operand in operands.iter().filter(|o| o.mode == OperandMode::Def) {
      self.visit_def(&ctx, operand)?;
    }

    if is_label {
      for &vreg in self.ssi.incoming(block) {
        let id = self.visit_var_def(&ctx, vreg, RegisterPriority::None)?;
        if is_head {
          // Something else flows in here: the value isn't a single constant.
          self.ints.var_mut(id).add_materialization_value(None);
          if let Some(reg) = self.incoming_hints.get(&vreg) {
            self.set_hint(id, Hint::Fixed(*reg));
          }
        }
      }
    }

    for operand in operands.iter().filter(|o| o.mode == OperandMode::Temp) {
      match operand.value {
        Value::Virtual(vreg) => {
          let id = self.ints.get_or_create(vreg);
          self.ints.add_var_temp(id, op, RegisterPriority::MustHaveRegister)?;
        }
        Value::Real(reg) => self.ints.add_fixed_range(reg, op, op.plus(1))?,
        Value::Incoming(_) | Value::Const(_) => {}
      }
    }

    for operand in operands.iter().filter(|o| o.mode == OperandMode::Alive) {
      let priority = use_priority(operand.flags);
      self.visit_read(block_from, op, op.plus(1), operand.value, priority)?;
    }
    if is_terminator {
      for &vreg in self.ssi.outgoing(block) {
        let value = Value::Virtual(vreg);
        let priority = RegisterPriority::None;
        self.visit_read(block_from, op, op.plus(1), value, priority)?;
      }
    }

    for operand in operands.iter().filter(|o| o.mode == OperandMode::Use) {
      let priority = use_priority(operand.flags);
      self.visit_read(block_from, op, op, operand.value, priority)?;
    }

    for operand in operands.iter().filter(|o| o.mode == OperandMode::State) {
      let priority = RegisterPriority::None;
      self.visit_read(block_from, op, op.plus(1), operand.value, priority)?;
    }

    Ok(())
  }

  fn visit_read(
    &mut self, block_from: OpId, op: OpId, to: OpId, value: Value,
    priority: RegisterPriority,
  ) -> Result<(), RegAllocError> {
    match value {
      Value::Virtual(vreg) => {
        let id = self.ints.get_or_create(vreg);
        self.ints.add_var_use(id, block_from, to, op, priority)
      }
      Value::Real(reg) => {
        if block_from < to {
          self.ints.add_fixed_range(reg, block_from, to)?;
        }
        Ok(())
      }
      Value::Incoming(_) | Value::Const(_) => Ok(()),
    }
  }

  fn visit_def(
    &mut self, ctx: &DefContext, operand: &Operand,
  ) -> Result<(), RegAllocError> {
    match operand.value {
      Value::Virtual(vreg) => {
        let priority = if ctx.method_arg.is_some() {
          RegisterPriority::None
        } else if operand.flags.contains(OperandFlags::STACK) {
          RegisterPriority::ShouldHaveRegister
        } else {
          RegisterPriority::MustHaveRegister
        };
        // Only the reads seen so far count, not this definition itself.
        let memory_read = self.ints.root_of_vreg(vreg).map_or(false, |id| {
          self.ints.var(id).has_uses_with(RegisterPriority::ShouldHaveRegister)
        });
        let id = self.visit_var_def(ctx, vreg, priority)?;

        if let Some(slot) = ctx.method_arg {
          self.method_args.push((id, vreg, ctx.op, slot));
        }

        let materialized = ctx.constant.filter(|value| {
          self.opts.never_spill_constants
            || ((self.env.can_store_constant_to_stack)(*value) && !memory_read)
        });
        self.ints.var_mut(id).add_materialization_value(materialized);

        if operand.flags.contains(OperandFlags::HINT) {
          match ctx.hint_src {
            Some(Value::Virtual(src)) if src != vreg => {
              let src_id = self.ints.get_or_create(src);
              self.set_hint(id, Hint::Interval(src_id));
            }
            Some(Value::Real(reg)) => self.set_hint(id, Hint::Fixed(reg)),
            _ => {}
          }
        }
        Ok(())
      }
      Value::Real(reg) => {
        self.ints.add_fixed_def(reg, ctx.op)?;
        if operand.flags.contains(OperandFlags::HINT) {
          if let Some(Value::Virtual(src)) = ctx.hint_src {
            let src_id = self.ints.get_or_create(src);
            self.set_hint(src_id, Hint::Fixed(reg));
          }
        }
        Ok(())
      }
      Value::Incoming(_) | Value::Const(_) => Ok(()),
    }
  }

  fn visit_var_def(
    &mut self, ctx: &DefContext, vreg: VirtualReg, priority: RegisterPriority,
  ) -> Result<IntId, RegAllocError> {
    let id = self.ints.get_or_create(vreg);
    let interval = self.ints.var_mut(id);
    if interval.ranges.last().map_or(true, |first| first.from > ctx.op) {
      debug!("{:?} defined at {:?} but never used", vreg, ctx.op);
      interval.dead = true;
    }
    self.ints.add_var_def(id, ctx.op, priority)?;
    self.ints.var_mut(id).spill.record_definition(ctx.op, ctx.is_label)?;
    Ok(id)
  }

  /// A value loaded from an incoming stack argument can stay in the
  /// argument slot, provided this move is its only definition.  Runs after
  /// the reverse walk, once every definition in the trace has been seen.
  fn optimize_method_argument(
    &mut self, id: IntId, vreg: VirtualReg, op: OpId, slot: u32,
  ) {
    let arg_slot = StackSlot::Incoming(slot);
    let interval = self.ints.var(id);
    if self.info.num_defs(vreg) != 1
      || interval.spill.state() != SpillState::NoSpillStore
      || interval.spill.def_pos() != Some(op)
    {
      debug!("{:?} is redefined, it leaves {:?}", vreg, arg_slot);
      return;
    }
    match self.spill_map.get(&vreg) {
      Some(existing) if *existing != arg_slot => return,
      _ => {}
    }
    let interval = self.ints.var_mut(id);
    if interval.spill.mark_start_in_memory().is_err() {
      return;
    }
    interval.spill_slot = Some(arg_slot);
    interval.location = Location::Stack(arg_slot);
    self.spill_map.insert(vreg, arg_slot);
    debug!("{:?} starts in its argument slot {:?}", vreg, arg_slot);
  }

  /// First hint wins.
  fn set_hint(&mut self, id: IntId, hint: Hint) {
    let interval = self.ints.var_mut(id);
    if interval.hint.is_none() {
      trace!("hint {:?} -> {:?}", interval.vreg, hint);
      interval.hint = Some(hint);
    }
  }
}

/// Builds the interval table of `trace`.
///
/// `incoming_hints` gives registers for the values live into the trace's
/// head; `spill_map` holds the stack slots already given to values of the
/// compilation unit.
#[inline(never)]
pub fn build_intervals<F: Function>(
  func: &F, trace_ix: TraceIx, traces: &TraceBuilderResult,
  info: &AnalysisInfo, ssi: &SsiInfo, env: &RegEnv, opts: &Options,
  incoming_hints: &Map<VirtualReg, RealReg>,
  spill_map: &mut Map<VirtualReg, StackSlot>,
) -> Result<TraceIntervals, RegAllocError> {
  info!("build_intervals: {:?}", trace_ix);
  let trace = traces.trace(trace_ix);

  let mut builder = IntervalBuilder {
    func,
    info,
    ssi,
    env,
    opts,
    incoming_hints,
    spill_map,
    ints: TraceIntervals::new(trace_ix, &env.rru),
    method_args: Vec::new(),
  };

  for (i, &block) in trace.blocks.iter().enumerate().rev() {
    builder.build_block(block, i == 0)?;
  }
  for (id, vreg, op, slot) in std::mem::take(&mut builder.method_args) {
    builder.optimize_method_argument(id, vreg, op, slot);
  }

  let mut ints = builder.ints;
  ints.finish_build()?;

  if log::log_enabled!(log::Level::Trace) {
    for interval in ints.vars.iter() {
      trace!("  {} {:?}", interval, interval.spill.state());
    }
    for fixed in &ints.fixed {
      if fixed.ranges.len() > 1 {
        trace!("  {:?} {:?}", fixed.reg, fixed.ranges);
      }
    }
  }
  debug!(
    "build_intervals: {:?} has {} intervals",
    trace_ix,
    ints.num_vars()
  );
  Ok(ints)
}
