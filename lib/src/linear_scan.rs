/* -*- Mode: Rust; tab-width: 8; indent-tabs-mode: nil; rust-indent-offset: 2 -*-
 * vim: set ts=8 sts=2 et sw=2 tw=80:
*/

//! Implementation of the linear scan allocator algorithm, one trace at a
//! time.
//!
//! This tries to follow the implementation as suggested by:
//!   Optimized Interval Splitting in a Linear Scan Register Allocator,
//!     by Wimmer et al., 2005
//! adapted to traces: every trace is allocated on its own, and the values
//! crossing trace boundaries are connected afterwards by the resolver.

use log::{debug, info, log_enabled, trace, Level};

use crate::analysis::{run_analysis, AnalysisInfo};
use crate::checker;
use crate::data_structures::{
  IntId, Location, Map, OpId, RealReg, RealRegUniverse, RegClass, SpillSlot,
  StackSlot, TraceIx, TypedIxVec, VirtualReg,
};
use crate::inst_stream;
use crate::interface::{
  AllocStats, Function, Options, RegAllocError, RegAllocResult, RegEnv,
  TraceBuilderResult,
};
use crate::intervals::{first_intersection, RegisterPriority, TraceIntervals};
use crate::lifetime::build_intervals;
use crate::resolve;
use crate::ssi::{incoming_hints, SsiInfo};

//=============================================================================
// Per compilation unit state.

/// Everything allocation accumulates over the traces of one compilation
/// unit.
pub(crate) struct AllocContext {
  /// The stack slot of every value that has one, shared by all traces.
  pub spill_map: Map<VirtualReg, StackSlot>,
  pub num_spill_slots: u32,
  /// The interval tables of the traces allocated so far.
  pub traces: TypedIxVec<TraceIx, Option<TraceIntervals>>,
  pub stats: AllocStats,
}

impl AllocContext {
  pub(crate) fn new(num_traces: u32) -> Self {
    Self {
      spill_map: Map::default(),
      num_spill_slots: 0,
      traces: TypedIxVec::from_vec((0..num_traces).map(|_| None).collect()),
      stats: AllocStats::default(),
    }
  }

  /// A slot nobody else uses.
  pub fn new_spill_slot(&mut self) -> StackSlot {
    let slot = SpillSlot::new(self.num_spill_slots);
    self.num_spill_slots += 1;
    StackSlot::Spill(slot)
  }

  /// The slot of `vreg`, allocated on first request.
  fn spill_slot_for(&mut self, vreg: VirtualReg) -> StackSlot {
    if let Some(slot) = self.spill_map.get(&vreg) {
      return *slot;
    }
    let slot = self.new_spill_slot();
    self.spill_map.insert(vreg, slot);
    slot
  }
}

//=============================================================================
// A mapping from real reg to some T, for the allocatable registers of one
// class.

#[derive(Clone)]
struct RegisterMapping<T> {
  offset: usize,
  regs: Vec<(RealReg, T)>,
  reg_class: RegClass,
}

impl<T: Copy> RegisterMapping<T> {
  fn with_default(
    reg_class: RegClass, reg_universe: &RealRegUniverse, initial_value: T,
  ) -> Self {
    let mut regs = Vec::new();
    let mut offset = 0;
    // Collect all the registers for the current class.
    if let Some(ref info) = reg_universe.allocable_by_class[reg_class as usize]
    {
      debug_assert!(info.first <= info.last);
      offset = info.first;
      for reg in &reg_universe.regs[info.first..=info.last] {
        debug_assert!(regs.len() == reg.0.get_index() - offset);
        regs.push((reg.0, initial_value));
      }
    };
    Self { offset, regs, reg_class }
  }

  fn iter(&self) -> std::slice::Iter<(RealReg, T)> {
    self.regs.iter()
  }

  fn contains(&self, rreg: RealReg) -> bool {
    rreg.get_class() == self.reg_class
      && rreg.get_index() >= self.offset
      && rreg.get_index() < self.offset + self.regs.len()
  }

  fn is_empty(&self) -> bool {
    self.regs.is_empty()
  }
}

impl<T> std::ops::Index<RealReg> for RegisterMapping<T> {
  type Output = T;
  fn index(&self, rreg: RealReg) -> &Self::Output {
    debug_assert!(
      rreg.get_class() == self.reg_class,
      "trying to index a reg from the wrong class"
    );
    &self.regs[rreg.get_index() - self.offset].1
  }
}

impl<T> std::ops::IndexMut<RealReg> for RegisterMapping<T> {
  fn index_mut(&mut self, rreg: RealReg) -> &mut Self::Output {
    debug_assert!(
      rreg.get_class() == self.reg_class,
      "trying to index a reg from the wrong class"
    );
    &mut self.regs[rreg.get_index() - self.offset].1
  }
}

//=============================================================================
// State management.

struct State<'a> {
  info: &'a AnalysisInfo,
  rru: &'a RealRegUniverse,
  ctx: &'a mut AllocContext,
  ints: TraceIntervals,

  /// Intervals that are starting after the current interval's start
  /// position, in reverse start order.
  unhandled: Vec<IntId>,

  /// Intervals with a register, covering the current position.
  active: Vec<IntId>,

  /// Intervals with a register, in a lifetime hole at the current position.
  inactive: Vec<IntId>,
}

impl<'a> State<'a> {
  fn new(
    info: &'a AnalysisInfo, rru: &'a RealRegUniverse,
    ctx: &'a mut AllocContext, ints: TraceIntervals,
  ) -> Result<Self, RegAllocError> {
    for fixed in &ints.fixed {
      if fixed.ranges.is_empty() {
        return Err(RegAllocError::Bailout(format!(
          "fixed interval of {:?} has no range",
          fixed.reg
        )));
      }
    }
    for interval in ints.vars.iter() {
      if interval.ranges.is_empty() {
        return Err(RegAllocError::Internal(format!(
          "{:?} has no range",
          interval.vreg
        )));
      }
    }

    // Trick! Keep unhandled in reverse sorted order, so we can just pop
    // unhandled ids instead of shifting the first element.
    let mut unhandled: Vec<IntId> =
      ints.vars.iter().map(|interval| interval.id).collect();
    unhandled.sort_by_key(|id| std::cmp::Reverse((ints.var(*id).start(), *id)));

    Ok(Self {
      info,
      rru,
      ctx,
      ints,
      unhandled,
      active: Vec::new(),
      inactive: Vec::new(),
    })
  }

  fn next_unhandled(&mut self) -> Option<IntId> {
    self.unhandled.pop()
  }

  fn insert_unhandled(&mut self, id: IntId) {
    let key = (self.ints.var(id).start(), id);
    let ints = &self.ints;
    // Maintain reversed start order by inverting the operands in the
    // comparison.
    let pos = self
      .unhandled
      .binary_search_by(|other| key.cmp(&(ints.var(*other).start(), *other)));
    let pos = match pos {
      Ok(index) => index,
      Err(index) => index,
    };
    self.unhandled.insert(pos, id);
  }

  fn split(&mut self, id: IntId, pos: OpId) -> Result<IntId, RegAllocError> {
    let child = self.ints.split(id, pos)?;
    self.ctx.stats.num_splits += 1;
    debug!("split {:?} at {:?}: {}", id, pos, self.ints.var(child));
    Ok(child)
  }

  /// Gives `id` its memory location: the constant it rematerializes, or the
  /// stack slot of its value.
  fn assign_spill_slot(&mut self, id: IntId) -> Result<(), RegAllocError> {
    let vreg = self.ints.var(id).vreg;
    let root = self.ints.root_of(id);

    let location = if let Some(value) = self.ints.var(root).materialized {
      self.ctx.stats.num_materialized += 1;
      Location::Const(value)
    } else {
      let slot = match self.ints.var(root).spill_slot {
        Some(slot) => slot,
        None => self.ctx.spill_slot_for(vreg),
      };
      let root_interval = self.ints.var_mut(root);
      root_interval.spill_slot = Some(slot);
      root_interval.spill.mark_spilled()?;
      self.ctx.stats.num_spilled += 1;
      Location::Stack(slot)
    };

    debug!("{:?} ({:?}) goes to {}", id, vreg, location);
    self.ints.var_mut(id).location = location;
    Ok(())
  }
}

/// Transitions intervals from active/inactive into active/inactive/handled.
#[inline(never)]
fn update_state(state: &mut State, pos: OpId) {
  let ints = &state.ints;

  let mut next_active = Vec::new();
  let mut next_inactive = Vec::new();

  for &id in state.active.iter().chain(state.inactive.iter()) {
    let interval = ints.var(id);
    if interval.end() <= pos {
      // It's expired, forget about it.
    } else if interval.covers(pos) {
      next_active.push(id);
    } else {
      next_inactive.push(id);
    }
  }

  state.active = next_active;
  state.inactive = next_inactive;

  trace!("state active: {:?}", state.active);
  trace!("state inactive: {:?}", state.inactive);
}

//=============================================================================
// Splitting helpers.

/// The best position in `[min, max]` to split at: the latest one, moved up
/// to a block boundary when one lies in between.
fn find_optimal_split_pos(info: &AnalysisInfo, min: OpId, max: OpId) -> OpId {
  if min == max {
    return max;
  }
  let min_block = info.numbering.block_of_op(min.minus(1));
  let max_block = info.numbering.block_of_op(max.minus(1));
  if min_block == max_block {
    return max;
  }
  let block_begin = info.numbering.block_first_op(max_block);
  if block_begin > min {
    block_begin
  } else {
    max
  }
}

/// Moves a split position to where moves can be inserted: a gap, or the
/// beginning of a block.
fn move_split_to_gap(info: &AnalysisInfo, pos: OpId) -> OpId {
  if info.numbering.is_block_begin(pos) {
    return pos;
  }
  let gap = pos.gap_before();
  // The gap between two blocks has no room for moves.
  if gap.plus(1) < info.numbering.max_op()
    && info.numbering.is_block_begin(gap.plus(1))
  {
    gap.plus(1)
  } else {
    gap
  }
}

/// Splits `id` somewhere in `[min, max]`, so that the child is loaded before
/// the use at `max`.  The child goes back to the unhandled list.
#[inline(never)]
fn split_before_usage(
  state: &mut State, id: IntId, min: OpId, max: OpId,
) -> Result<(), RegAllocError> {
  let interval = state.ints.var(id);
  let optimal = find_optimal_split_pos(state.info, min, max);

  if optimal >= interval.end()
    && interval.next_usage(RegisterPriority::MustHaveRegister, min)
      == OpId::MAX
  {
    // The split position would be right at the end: nothing to do.
    trace!("split_before_usage: {:?} needs no split", id);
    return Ok(());
  }

  let optimal = move_split_to_gap(state.info, optimal);
  if optimal <= interval.start() {
    return Err(RegAllocError::Internal(format!(
      "split position {:?} not after the start of {}",
      optimal, interval
    )));
  }

  let child = state.split(id, optimal)?;
  state.insert_unhandled(child);
  Ok(())
}

/// Splits `id` where a partially free register stops being free.
fn split_when_partial_register_available(
  state: &mut State, id: IntId, available_until: OpId,
) -> Result<(), RegAllocError> {
  let interval = state.ints.var(id);
  let min = interval
    .previous_usage(RegisterPriority::ShouldHaveRegister, available_until)
    .map_or(interval.start().plus(1), |prev| {
      std::cmp::max(prev, interval.start().plus(1))
    });
  split_before_usage(state, id, min, available_until)
}

/// Spills `id` from the current position on, keeping a child for its next
/// register use.
#[inline(never)]
fn split_and_spill_interval(
  state: &mut State, id: IntId, pos: OpId,
) -> Result<(), RegAllocError> {
  debug!("split_and_spill_interval: {:?} at {:?}", id, pos);

  // The part with the next register use has to be allocated again.
  let min = pos.plus(1);
  let next_must = state
    .ints
    .var(id)
    .next_usage(RegisterPriority::MustHaveRegister, min);
  let max = std::cmp::min(next_must, state.ints.var(id).end());
  if min <= max {
    split_before_usage(state, id, min, max)?;
  }

  // The rest is split after its last use and spilled.
  let interval = state.ints.var(id);
  if interval.end() <= pos {
    return Ok(());
  }
  let mut prev =
    interval.previous_usage(RegisterPriority::ShouldHaveRegister, pos);
  if prev == Some(pos) {
    prev = interval.previous_usage(RegisterPriority::MustHaveRegister, pos);
  }
  let min = match prev {
    Some(prev) => std::cmp::max(prev.plus(1), interval.start()),
    None => interval.start(),
  };

  if min == interval.start() {
    // The whole interval is never used in a register.
    state.assign_spill_slot(id)
  } else {
    let optimal = find_optimal_split_pos(state.info, min, pos);
    let optimal = move_split_to_gap(state.info, optimal);
    let spilled = state.split(id, optimal)?;
    state.assign_spill_slot(spilled)
  }
}

/// An interval that starts in memory stays there until its first use that
/// wants a register.
fn split_stack_interval(
  state: &mut State, id: IntId, pos: OpId,
) -> Result<(), RegAllocError> {
  let interval = state.ints.var(id);
  let min = pos.plus(1);
  let max = std::cmp::min(
    interval.first_usage(RegisterPriority::ShouldHaveRegister),
    interval.end(),
  );
  if min > max {
    return Ok(());
  }
  split_before_usage(state, id, min, max)
}

//=============================================================================
// Register selection.

#[inline(never)]
fn try_allocate_free_reg(
  state: &mut State, cur_id: IntId,
) -> Result<bool, RegAllocError> {
  let cur = state.ints.var(cur_id);
  let reg_class = cur.vreg.get_class();
  let pos = cur.start();

  let mut free_until =
    RegisterMapping::with_default(reg_class, state.rru, OpId::MAX);
  if free_until.is_empty() {
    return Err(RegAllocError::OutOfRegisters(reg_class));
  }

  // Fixed registers are blocked where the instructions use them.
  for (reg, until) in free_until.regs.iter_mut() {
    let fixed = state.ints.fixed(*reg);
    if fixed.ranges.iter().any(|r| r.contains(pos)) {
      *until = OpId::MIN;
    } else if let Some(at) = first_intersection(&fixed.ranges, &cur.ranges) {
      *until = std::cmp::min(*until, at);
    }
  }

  for &id in &state.active {
    if let Some(reg) = state.ints.var(id).location.reg() {
      if free_until.contains(reg) {
        free_until[reg] = OpId::MIN;
      }
    }
  }

  for &id in &state.inactive {
    let interval = state.ints.var(id);
    if let Some(reg) = interval.location.reg() {
      if !free_until.contains(reg) {
        continue;
      }
      if let Some(at) = first_intersection(&interval.ranges, &cur.ranges) {
        free_until[reg] = std::cmp::min(free_until[reg], at);
      }
    }
  }

  let hint = state.ints.hint_reg(cur_id).filter(|r| free_until.contains(*r));
  let reg_needed_until = pos.plus(1);
  let interval_end = cur.end();

  let mut min_full: Option<RealReg> = None;
  let mut max_partial: Option<RealReg> = None;
  for &(reg, until) in free_until.iter() {
    if until >= interval_end {
      match min_full {
        None => min_full = Some(reg),
        Some(best) => {
          if Some(reg) == hint
            || (until < free_until[best] && Some(best) != hint)
          {
            min_full = Some(reg);
          }
        }
      }
    } else if until > reg_needed_until {
      match max_partial {
        None => max_partial = Some(reg),
        Some(best) => {
          if Some(reg) == hint
            || (until > free_until[best] && Some(best) != hint)
          {
            max_partial = Some(reg);
          }
        }
      }
    }
  }

  let reg = match min_full.or(max_partial) {
    Some(reg) => reg,
    None => {
      debug!("try_allocate_free_reg: all registers taken");
      return Ok(false);
    }
  };
  let until = free_until[reg];

  debug!(
    "try_allocate_free_reg: {:?} <- {:?} (free until {:?}, hint {:?})",
    cur_id, reg, until, hint
  );
  state.ints.var_mut(cur_id).location = Location::Reg(reg);

  if until < interval_end {
    split_when_partial_register_available(state, cur_id, until)?;
  }
  Ok(true)
}

#[inline(never)]
fn allocate_blocked_reg(
  state: &mut State, cur_id: IntId,
) -> Result<(), RegAllocError> {
  let cur = state.ints.var(cur_id);
  let reg_class = cur.vreg.get_class();
  let pos = cur.start();
  let interval_end = cur.end();
  let first_must = cur.first_usage(RegisterPriority::MustHaveRegister);
  let first_should = cur.first_usage(RegisterPriority::ShouldHaveRegister);
  let reg_needed_until = std::cmp::min(first_must, pos.plus(1));

  let mut chosen = None;
  for &pass in &[
    RegisterPriority::ShouldHaveRegister,
    RegisterPriority::MustHaveRegister,
  ] {
    let cur = state.ints.var(cur_id);
    let mut use_pos =
      RegisterMapping::with_default(reg_class, state.rru, OpId::MAX);
    let mut block_pos = use_pos.clone();

    for (reg, at) in use_pos.regs.iter_mut() {
      let fixed = state.ints.fixed(*reg);
      if fixed.ranges.iter().any(|r| r.contains(pos)) {
        *at = OpId::MIN;
        block_pos[*reg] = OpId::MIN;
      } else if let Some(x) = first_intersection(&fixed.ranges, &cur.ranges) {
        *at = std::cmp::min(*at, x);
        block_pos[*reg] = std::cmp::min(block_pos[*reg], x);
      }
    }

    for &id in &state.active {
      let interval = state.ints.var(id);
      if let Some(reg) = interval.location.reg() {
        if use_pos.contains(reg) {
          let next = std::cmp::min(
            interval.next_usage(pass, pos),
            interval.end(),
          );
          use_pos[reg] = std::cmp::min(use_pos[reg], next);
        }
      }
    }

    for &id in &state.inactive {
      let interval = state.ints.var(id);
      if let Some(reg) = interval.location.reg() {
        if !use_pos.contains(reg) {
          continue;
        }
        if first_intersection(&interval.ranges, &cur.ranges).is_some() {
          let next = std::cmp::min(
            interval.next_usage(pass, pos),
            interval.end(),
          );
          use_pos[reg] = std::cmp::min(use_pos[reg], next);
        }
      }
    }

    // Find the register with the furthest next use.
    let mut best: Option<(RealReg, OpId)> = None;
    for &(reg, at) in use_pos.iter() {
      trace!("allocate_blocked_reg: {:?} has next use at {:?}", reg, at);
      if at > reg_needed_until && best.map_or(true, |(_, b)| at > b) {
        best = Some((reg, at));
      }
    }

    match best {
      Some((reg, at)) if at > first_should => {
        chosen = Some((reg, block_pos[reg]));
        break;
      }
      _ => {
        if first_must <= pos.plus(1) {
          if pass == RegisterPriority::ShouldHaveRegister {
            continue;
          }
          debug!("allocate_blocked_reg: {:?} can't be spilled", cur_id);
          return Err(RegAllocError::OutOfRegisters(reg_class));
        }
        // The current interval is the one with the furthest use: spill it
        // until it needs a register.
        debug!("allocate_blocked_reg: spilling current {:?}", cur_id);
        return split_and_spill_interval(state, cur_id, pos);
      }
    }
  }

  let (reg, block_pos) = match chosen {
    Some(chosen) => chosen,
    None => return Err(RegAllocError::OutOfRegisters(reg_class)),
  };

  debug!("allocate_blocked_reg: {:?} takes over {:?}", cur_id, reg);
  state.ints.var_mut(cur_id).location = Location::Reg(reg);

  // A fixed use of the register comes before the end.
  if block_pos < interval_end {
    split_when_partial_register_available(state, cur_id, block_pos)?;
  }

  // Kick out everything else holding the register.
  let evicted_active: Vec<IntId> = state
    .active
    .iter()
    .cloned()
    .filter(|id| state.ints.var(*id).location == Location::Reg(reg))
    .collect();
  state.active.retain(|id| !evicted_active.contains(id));
  for id in evicted_active {
    split_and_spill_interval(state, id, pos)?;
  }

  let cur_ranges = state.ints.var(cur_id).ranges.clone();
  let evicted_inactive: Vec<IntId> = state
    .inactive
    .iter()
    .cloned()
    .filter(|id| {
      let interval = state.ints.var(*id);
      interval.location == Location::Reg(reg)
        && first_intersection(&interval.ranges, &cur_ranges).is_some()
    })
    .collect();
  state.inactive.retain(|id| !evicted_inactive.contains(id));
  for id in evicted_inactive {
    // The current position sits in a lifetime hole: the rest of the
    // interval starts afresh at its next range.
    match state.ints.var(id).next_range_start_after(pos) {
      Some(next) => {
        let child = state.split(id, next)?;
        state.insert_unhandled(child);
      }
      None => {
        return Err(RegAllocError::Internal(format!(
          "inactive {:?} has no range after {:?}",
          id, pos
        )))
      }
    }
  }

  Ok(())
}

//=============================================================================
// The walk over one trace.

#[inline(never)]
fn walk_trace(
  info: &AnalysisInfo, rru: &RealRegUniverse, ctx: &mut AllocContext,
  ints: TraceIntervals,
) -> Result<TraceIntervals, RegAllocError> {
  let mut state = State::new(info, rru, ctx, ints)?;

  #[cfg(debug_assertions)]
  let mut prev_start = None;

  while let Some(cur_id) = state.next_unhandled() {
    let pos = state.ints.var(cur_id).start();
    trace!("main loop: allocating {}", state.ints.var(cur_id));

    #[cfg(debug_assertions)]
    {
      if let Some(prev) = prev_start {
        debug_assert!(prev <= pos, "main loop must make progress");
      }
      prev_start = Some(pos);
    }

    update_state(&mut state, pos);

    if let Location::Stack(_) = state.ints.var(cur_id).location {
      // Already in memory: stays there until it needs a register.
      split_stack_interval(&mut state, cur_id, pos)?;
      continue;
    }

    if !try_allocate_free_reg(&mut state, cur_id)? {
      allocate_blocked_reg(&mut state, cur_id)?;
    }
    if state.ints.var(cur_id).location.reg().is_some() {
      state.active.push(cur_id);
    }
  }

  if log_enabled!(Level::Debug) {
    debug!("allocation results for {:?}:", state.ints.trace);
    for interval in state.ints.vars.iter() {
      debug!("  {}", interval);
    }
  }

  Ok(state.ints)
}

//=============================================================================
// Allocator top level.

/// Builds the intervals of every trace, without allocating anything.
#[inline(never)]
pub(crate) fn compute_intervals<F: Function>(
  func: &F, traces: &TraceBuilderResult, env: &RegEnv, opts: &Options,
) -> Result<TypedIxVec<TraceIx, TraceIntervals>, RegAllocError> {
  let info = run_analysis(func, traces, &env.rru)?;
  let ssi = SsiInfo::create(&info);
  let mut spill_map = Map::default();
  let no_hints = Map::default();
  let mut result = TypedIxVec::new();
  for (trace_ix, _) in traces.traces().iter_ix() {
    result.push(build_intervals(
      func,
      trace_ix,
      traces,
      &info,
      &ssi,
      env,
      opts,
      &no_hints,
      &mut spill_map,
    )?);
  }
  Ok(result)
}

// Allocator top level.  Allocation can fail if there are insufficient
// registers to even generate spill/reload code, or if the function appears to
// have any undefined VirtualReg/RealReg uses.
#[inline(never)]
pub(crate) fn run<F: Function>(
  func: &F, traces: &TraceBuilderResult, env: &RegEnv, opts: &Options,
) -> Result<RegAllocResult<F>, RegAllocError> {
  let info = run_analysis(func, traces, &env.rru)?;
  let ssi = SsiInfo::create(&info);
  let mut ctx = AllocContext::new(traces.len());

  for (trace_ix, trace) in traces.traces().iter_ix() {
    info!("allocating {:?}: {:?}", trace_ix, trace.blocks);

    let hints = incoming_hints(trace_ix, &ssi, traces, &info, &ctx.traces);
    let ints = build_intervals(
      func,
      trace_ix,
      traces,
      &info,
      &ssi,
      env,
      opts,
      &hints,
      &mut ctx.spill_map,
    )?;

    let snapshot =
      if opts.run_checker { Some(checker::snapshot(&ints)) } else { None };

    let ints = walk_trace(&info, &env.rru, &mut ctx, ints)?;

    if let Some(snapshot) = snapshot {
      checker::check_trace(&ints, &snapshot, &env.rru)
        .map_err(RegAllocError::RegChecker)?;
    }

    ctx.traces[trace_ix] = Some(ints);
  }

  let mut intervals = TypedIxVec::new();
  for (trace_ix, ints) in ctx.traces.iter_ix() {
    match ints {
      Some(ints) => {
        intervals.push(ints.clone());
      }
      None => {
        return Err(RegAllocError::Internal(format!(
          "{:?} was not allocated",
          trace_ix
        )))
      }
    }
  }

  let moves =
    resolve::resolve(func, traces, &info, &ssi, env, &intervals, &mut ctx)?;

  info!(
    "run: {} spill slots, stats {:?}",
    ctx.num_spill_slots, ctx.stats
  );

  inst_stream::emit(func, traces, &info, env, intervals, moves, ctx)
}
