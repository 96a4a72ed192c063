/* -*- Mode: Rust; tab-width: 8; indent-tabs-mode: nil; rust-indent-offset: 2 -*-
 * vim: set ts=8 sts=2 et sw=2 tw=80:
*/

//! Data-flow resolution: the moves connecting the parts of split intervals,
//! the spill stores at definitions, and the moves on control-flow edges
//! between the locations each side of the edge chose.

use log::{debug, trace};

use std::fmt;

use crate::analysis::AnalysisInfo;
use crate::data_structures::{
  BlockIx, Location, OpId, RealReg, StackSlot, TraceIx, TypedIxVec,
  VirtualReg,
};
use crate::interface::{
  Function, OperandMode, RegAllocError, RegEnv, TraceBuilderResult,
};
use crate::intervals::TraceIntervals;
use crate::linear_scan::AllocContext;
use crate::spill_state::SpillState;
use crate::ssi::SsiInfo;

//=============================================================================
// Instructions to insert.

#[derive(Clone, Debug, PartialEq)]
pub enum InstToInsert {
  Spill { to_slot: StackSlot, from_reg: RealReg, for_vreg: VirtualReg },
  Reload { to_reg: RealReg, from_slot: StackSlot, for_vreg: VirtualReg },
  Move { to_reg: RealReg, from_reg: RealReg, for_vreg: VirtualReg },
  Materialize { to: Location, value: i64, for_vreg: VirtualReg },
}

impl InstToInsert {
  pub fn construct<F: Function>(&self, f: &F) -> F::Inst {
    match self {
      &InstToInsert::Spill { to_slot, from_reg, for_vreg } => {
        f.gen_spill(to_slot, from_reg, for_vreg)
      }
      &InstToInsert::Reload { to_reg, from_slot, for_vreg } => {
        f.gen_reload(to_reg, from_slot, for_vreg)
      }
      &InstToInsert::Move { to_reg, from_reg, for_vreg } => {
        f.gen_move(to_reg, from_reg, for_vreg)
      }
      &InstToInsert::Materialize { to, value, for_vreg } => {
        f.gen_materialize(to, value, for_vreg)
      }
    }
  }
}

/// Inserted instructions sharing a gap run in this order.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MovePhase {
  BlockStartEdges,
  StoresAtDef,
  SplitMoves,
  BlockEndEdges,
}

/// An instruction to insert in the gap `at`, that is right before the
/// instruction numbered `at + 1`.
#[derive(Clone, Debug)]
pub struct InstAndPoint {
  pub at: OpId,
  pub phase: MovePhase,
  pub inst: InstToInsert,
}

impl InstAndPoint {
  fn new(at: OpId, phase: MovePhase, inst: InstToInsert) -> Self {
    debug_assert!(!at.is_inst());
    Self { at, phase, inst }
  }
}

pub type InstsAndPoints = Vec<InstAndPoint>;

//=============================================================================
// Parallel moves.

#[derive(Copy, Clone, PartialEq, Debug)]
enum MoveOperand {
  Reg(RealReg),
  Stack(StackSlot),
  Const(i64),
}

impl MoveOperand {
  fn from_location(loc: Location) -> Option<Self> {
    match loc {
      Location::Reg(reg) => Some(MoveOperand::Reg(reg)),
      Location::Stack(slot) => Some(MoveOperand::Stack(slot)),
      Location::Const(value) => Some(MoveOperand::Const(value)),
      Location::None => None,
    }
  }

  fn aliases(&self, other: &Self) -> bool {
    match (self, other) {
      (MoveOperand::Const(_), _) | (_, MoveOperand::Const(_)) => false,
      _ => self == other,
    }
  }
}

struct MoveOp {
  from: MoveOperand,
  to: MoveOperand,
  vreg: VirtualReg,
  cycle_begin: Option<usize>,
  cycle_end: Option<usize>,
}

impl fmt::Debug for MoveOp {
  fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
    write!(fmt, "{:?}: {:?} -> {:?}", self.vreg, self.from, self.to)?;
    if let Some(ref begin) = self.cycle_begin {
      write!(fmt, ", start of cycle #{}", begin)?;
    }
    if let Some(ref end) = self.cycle_end {
      write!(fmt, ", end of cycle #{}", end)?;
    }
    Ok(())
  }
}

impl MoveOp {
  fn new(from: MoveOperand, to: MoveOperand, vreg: VirtualReg) -> Self {
    Self { from, to, vreg, cycle_begin: None, cycle_end: None }
  }

  fn gen_inst(&self) -> Result<InstToInsert, RegAllocError> {
    let for_vreg = self.vreg;
    Ok(match (self.from, self.to) {
      (MoveOperand::Reg(from_reg), MoveOperand::Reg(to_reg)) => {
        InstToInsert::Move { to_reg, from_reg, for_vreg }
      }
      (MoveOperand::Reg(from_reg), MoveOperand::Stack(to_slot)) => {
        InstToInsert::Spill { to_slot, from_reg, for_vreg }
      }
      (MoveOperand::Stack(from_slot), MoveOperand::Reg(to_reg)) => {
        InstToInsert::Reload { to_reg, from_slot, for_vreg }
      }
      (MoveOperand::Const(value), MoveOperand::Reg(reg)) => {
        InstToInsert::Materialize { to: Location::Reg(reg), value, for_vreg }
      }
      (MoveOperand::Const(value), MoveOperand::Stack(slot)) => {
        InstToInsert::Materialize { to: Location::Stack(slot), value, for_vreg }
      }
      (from, to) => {
        return Err(RegAllocError::Internal(format!(
          "can't move {:?} from {:?} to {:?}",
          for_vreg, from, to
        )))
      }
    })
  }
}

fn find_blocking_move<'a>(
  pending: &'a mut Vec<MoveOp>, last: &MoveOp,
) -> Option<(usize, &'a mut MoveOp)> {
  for (i, other) in pending.iter_mut().enumerate() {
    if other.from.aliases(&last.to) {
      return Some((i, other));
    }
  }
  None
}

fn find_cycled_move<'a>(
  stack: &'a mut Vec<MoveOp>, from: &mut usize, last: &MoveOp,
) -> Option<&'a mut MoveOp> {
  for i in *from..stack.len() {
    *from += 1;
    let other = &stack[i];
    if other.from.aliases(&last.to) {
      return Some(&mut stack[i]);
    }
  }
  None
}

/// Given a pending list of moves, returns a list of moves ordered in a correct
/// way, i.e., no move clobbers another one.
#[inline(never)]
fn schedule_moves(mut pending: Vec<MoveOp>) -> Vec<MoveOp> {
  let mut ordered_moves = Vec::new();
  let mut cur_cycles = 0;

  trace!("pending moves: {:?}", pending);

  while let Some(pm) = pending.pop() {
    debug_assert!(
      pm.from != pm.to,
      "spurious moves should not have been inserted"
    );

    let mut stack = vec![pm];

    while let Some(last) = stack.last() {
      match find_blocking_move(&mut pending, last) {
        Some((blocking_idx, blocking)) => {
          trace!("found blocker: {:?}", blocking);
          let mut stack_cur = 0;
          let mut has_cycles = false;
          while let Some(cycled) =
            find_cycled_move(&mut stack, &mut stack_cur, blocking)
          {
            trace!("found cycle: {:?}", cycled);
            debug_assert!(cycled.cycle_end.is_none());
            cycled.cycle_end = Some(cur_cycles);
            has_cycles = true;
          }

          if has_cycles {
            debug_assert!(blocking.cycle_begin.is_none());
            blocking.cycle_begin = Some(cur_cycles);
            cur_cycles += 1;
          }

          let blocking = pending.remove(blocking_idx);
          stack.push(blocking);
        }
        None => {
          // There's no blocking move! We can push this in the ordered list
          // of moves.
          if let Some(last) = stack.pop() {
            ordered_moves.push(last);
          }
        }
      }
    }

    cur_cycles = 0;
  }

  ordered_moves
}

/// Turns scheduled moves into instructions.  A cycle is broken by saving the
/// register its first move overwrites into a fresh spill slot.
#[inline(never)]
fn emit_moves(
  ordered_moves: Vec<MoveOp>, ctx: &mut AllocContext,
) -> Result<Vec<InstToInsert>, RegAllocError> {
  let mut cycle_slot = None;
  let mut in_cycle = false;

  let mut insts = Vec::new();

  for mov in ordered_moves {
    if mov.cycle_end.is_some() {
      debug_assert!(in_cycle);

      // There is some pattern:
      //   (A -> B)
      //   (B -> A)
      // This case handles (A -> B), which we reach last. We emit a move from
      // the saved value of B, to A.
      match (mov.to, cycle_slot) {
        (MoveOperand::Reg(to_reg), Some(from_slot)) => {
          trace!("finishing cycle: {:?} -> {:?}", from_slot, to_reg);
          insts.push(InstToInsert::Reload {
            to_reg,
            from_slot,
            for_vreg: mov.vreg,
          });
        }
        _ => {
          return Err(RegAllocError::Internal(format!(
            "move cycle ending in {:?}",
            mov
          )))
        }
      }

      in_cycle = false;
      ctx.stats.num_moves += 1;
      continue;
    }

    if mov.cycle_begin.is_some() {
      debug_assert!(!in_cycle);

      // There is some pattern:
      //   (A -> B)
      //   (B -> A)
      // This case handles (B -> A), which we reach first. We save A, then
      // allow the original move to continue.
      let slot = match cycle_slot {
        Some(slot) => slot,
        None => {
          let slot = ctx.new_spill_slot();
          cycle_slot = Some(slot);
          slot
        }
      };

      match mov.to {
        MoveOperand::Reg(from_reg) => {
          trace!("starting cycle: {:?} -> {:?}", from_reg, slot);
          insts.push(InstToInsert::Spill {
            to_slot: slot,
            from_reg,
            for_vreg: mov.vreg,
          });
        }
        _ => {
          return Err(RegAllocError::Internal(format!(
            "move cycle going through {:?}",
            mov
          )))
        }
      }

      in_cycle = true;
    }

    // A normal move which is not part of a cycle.
    let inst = mov.gen_inst()?;
    match inst {
      InstToInsert::Spill { .. } => ctx.stats.num_spills += 1,
      InstToInsert::Reload { .. } => ctx.stats.num_reloads += 1,
      InstToInsert::Move { .. } | InstToInsert::Materialize { .. } => {
        ctx.stats.num_moves += 1
      }
    }
    insts.push(inst);
  }

  Ok(insts)
}

//=============================================================================
// Resolution.

struct Resolver<'a, F: Function> {
  func: &'a F,
  traces: &'a TraceBuilderResult,
  info: &'a AnalysisInfo,
  ssi: &'a SsiInfo,
  env: &'a RegEnv,
  intervals: &'a TypedIxVec<TraceIx, TraceIntervals>,
  ctx: &'a mut AllocContext,
  result: InstsAndPoints,
}

impl<'a, F: Function> Resolver<'a, F> {
  /// Turns one move between two locations of `vreg` into a pending move,
  /// unless it is useless.  `needs_store` tells whether a store into the
  /// value's slot is required.
  fn add_move(
    &mut self, pending: &mut Vec<MoveOp>, vreg: VirtualReg, from: Location,
    to: Location, needs_store: bool,
  ) -> Result<(), RegAllocError> {
    if from == to {
      return Ok(());
    }
    let (from_op, to_op) =
      match (MoveOperand::from_location(from), MoveOperand::from_location(to))
      {
        (Some(from_op), Some(to_op)) => (from_op, to_op),
        _ => {
          return Err(RegAllocError::Internal(format!(
            "{:?} has no location for a move from {} to {}",
            vreg, from, to
          )))
        }
      };

    match (from_op, to_op) {
      // A rematerialized value is reissued where it is used.
      (_, MoveOperand::Const(_)) => Ok(()),
      (MoveOperand::Reg(_), MoveOperand::Stack(_)) if !needs_store => {
        trace!("{:?}: store to {} elided", vreg, to);
        self.ctx.stats.num_elided_stores += 1;
        Ok(())
      }
      (MoveOperand::Stack(_), MoveOperand::Stack(_)) => {
        Err(RegAllocError::Internal(format!(
          "{:?} moves between stack slots {} and {}",
          vreg, from, to
        )))
      }
      (MoveOperand::Const(value), MoveOperand::Stack(_))
        if !(self.env.can_store_constant_to_stack)(value) =>
      {
        Err(RegAllocError::Bailout(format!(
          "constant {} of {:?} can't be stored to {}",
          value, vreg, to
        )))
      }
      (from_op, to_op) => {
        pending.push(MoveOp::new(from_op, to_op, vreg));
        Ok(())
      }
    }
  }

  fn push_moves(
    &mut self, pending: Vec<MoveOp>, at: OpId, phase: MovePhase,
  ) -> Result<(), RegAllocError> {
    if pending.is_empty() {
      return Ok(());
    }
    let ordered = schedule_moves(pending);
    for inst in emit_moves(ordered, self.ctx)? {
      debug!("at {:?} ({:?}): {:?}", at, phase, inst);
      self.result.push(InstAndPoint::new(at, phase, inst));
    }
    Ok(())
  }

  /// Moves between the parts of split intervals, inside blocks.
  #[inline(never)]
  fn split_moves(&mut self, trace: TraceIx) -> Result<(), RegAllocError> {
    let intervals = self.intervals;
    let ints = &intervals[trace];
    let numbering = &self.info.numbering;

    let mut by_gap: Vec<(OpId, Vec<MoveOp>)> = Vec::new();

    let mut roots: Vec<_> = ints.roots().collect();
    roots.sort();
    for root in roots {
      let root_interval = ints.var(root);
      for &child in &root_interval.split_children {
        let child_interval = ints.var(child);
        let start = child_interval.start();
        // Block boundaries are the business of the edge moves.
        if numbering.is_block_begin(start) {
          continue;
        }
        let before = start.minus(1);
        let source =
          match ints.family(root).find(|id| ints.var(*id).covers(before)) {
          Some(source) => source,
          // A lifetime hole: nothing flows in.
          None => continue,
        };
        let from = ints.var(source).location;
        let to = child_interval.location;
        let needs_store = root_interval.spill.needs_store_at(start);
        let gap = start.gap_before();

        let idx = match by_gap.iter().position(|(at, _)| *at == gap) {
          Some(idx) => idx,
          None => {
            by_gap.push((gap, Vec::new()));
            by_gap.len() - 1
          }
        };
        let mut pending = std::mem::replace(&mut by_gap[idx].1, Vec::new());
        self.add_move(&mut pending, root_interval.vreg, from, to, needs_store)?;
        by_gap[idx].1 = pending;
      }
    }

    by_gap.sort_by_key(|(at, _)| *at);
    for (at, pending) in by_gap {
      self.push_moves(pending, at, MovePhase::SplitMoves)?;
    }
    Ok(())
  }

  /// The single store of values spilled after one definition.
  #[inline(never)]
  fn stores_at_definition(
    &mut self, trace: TraceIx,
  ) -> Result<(), RegAllocError> {
    let intervals = self.intervals;
    let ints = &intervals[trace];
    let numbering = &self.info.numbering;

    let mut roots: Vec<_> = ints.roots().collect();
    roots.sort();
    for root in roots {
      let root_interval = ints.var(root);
      if root_interval.spill.state() != SpillState::StoreAtDefinition {
        continue;
      }
      let (def_pos, slot) =
        match (root_interval.spill.def_pos(), root_interval.spill_slot) {
          (Some(def_pos), Some(slot)) => (def_pos, slot),
          _ => {
            return Err(RegAllocError::Internal(format!(
              "{:?} is spilled without a definition or a slot",
              root_interval.vreg
            )))
          }
        };
      let vreg = root_interval.vreg;
      let from_reg =
        match ints.location_at(vreg, def_pos, OperandMode::Def).reg() {
          Some(reg) => reg,
          // Defined right into memory.
          None => continue,
        };
      let block = numbering.block_of_op(def_pos);
      if numbering.block_last_op(block) == def_pos {
        return Err(RegAllocError::Bailout(format!(
          "{:?} is defined by the last instruction of {:?}",
          vreg, block
        )));
      }
      let inst = InstToInsert::Spill { to_slot: slot, from_reg, for_vreg: vreg };
      debug!("store at definition of {:?}: {:?}", vreg, inst);
      self.ctx.stats.num_spills += 1;
      self.result.push(InstAndPoint::new(
        def_pos.plus(1),
        MovePhase::StoresAtDef,
        inst,
      ));
    }
    Ok(())
  }

  /// Moves on the edge from `pred` to `succ`, for all the values flowing
  /// into `succ`.
  #[inline(never)]
  fn edge_moves(
    &mut self, pred: BlockIx, succ: BlockIx,
  ) -> Result<(), RegAllocError> {
    let intervals = self.intervals;
    let numbering = &self.info.numbering;
    let pred_ints = &intervals[self.traces.trace_of(pred)];
    let succ_ints = &intervals[self.traces.trace_of(succ)];
    let pred_end = numbering.block_last_op(pred);
    let succ_begin = numbering.block_first_op(succ);

    let mut pending = Vec::new();
    for &vreg in self.ssi.incoming(succ) {
      let from = pred_ints.location_at(vreg, pred_end, OperandMode::Use);
      let to = succ_ints.location_at(vreg, succ_begin, OperandMode::Def);
      let needs_store = match pred_ints.root_of_vreg(vreg) {
        Some(root) => pred_ints.var(root).spill.needs_store_at(pred_end),
        None => true,
      };
      self.add_move(&mut pending, vreg, from, to, needs_store)?;
    }

    // Without critical edges, one of the two ends has a single neighbour.
    let (at, phase) = if self.info.cfg_info.succ_map[pred].len() == 1 {
      (pred_end.minus(1), MovePhase::BlockEndEdges)
    } else {
      (succ_begin.plus(1), MovePhase::BlockStartEdges)
    };
    trace!("edge {:?} -> {:?}: {} moves at {:?}", pred, succ, pending.len(), at);
    self.push_moves(pending, at, phase)
  }
}

/// Computes every instruction the allocation needs inserted.
#[inline(never)]
pub(crate) fn resolve<F: Function>(
  func: &F, traces: &TraceBuilderResult, info: &AnalysisInfo, ssi: &SsiInfo,
  env: &RegEnv, intervals: &TypedIxVec<TraceIx, TraceIntervals>,
  ctx: &mut AllocContext,
) -> Result<InstsAndPoints, RegAllocError> {
  debug!("resolve: begin");
  let mut resolver = Resolver {
    func,
    traces,
    info,
    ssi,
    env,
    intervals,
    ctx,
    result: Vec::new(),
  };

  for (trace, _) in traces.traces().iter_ix() {
    resolver.split_moves(trace)?;
    resolver.stores_at_definition(trace)?;
  }

  for block in resolver.func.blocks() {
    let succs = resolver.info.cfg_info.succ_map[block].clone();
    for succ in succs {
      resolver.edge_moves(block, succ)?;
    }
  }

  debug!("resolve: {} instructions to insert", resolver.result.len());
  Ok(resolver.result)
}

#[cfg(test)]
fn reg(index: u8) -> RealReg {
  RealReg::new(crate::data_structures::RegClass::I64, index)
}

#[cfg(test)]
fn vreg(index: u32) -> VirtualReg {
  VirtualReg::new(crate::data_structures::RegClass::I64, index)
}

#[test]
fn schedule_swap() {
  let r = |i| MoveOperand::Reg(reg(i));
  let pending = vec![MoveOp::new(r(0), r(1), vreg(0)), MoveOp::new(r(1), r(0), vreg(1))];
  let ordered = schedule_moves(pending);
  assert_eq!(ordered.len(), 2);
  assert_eq!(ordered.iter().filter(|m| m.cycle_begin.is_some()).count(), 1);
  assert_eq!(ordered.iter().filter(|m| m.cycle_end.is_some()).count(), 1);
  // The move closing the cycle comes last.
  assert!(ordered[1].cycle_end.is_some());
}

#[test]
fn schedule_chain() {
  let r = |i| MoveOperand::Reg(reg(i));
  // r1 -> r2 must happen before r0 -> r1.
  let pending = vec![MoveOp::new(r(1), r(2), vreg(1)), MoveOp::new(r(0), r(1), vreg(0))];
  let ordered = schedule_moves(pending);
  assert_eq!(ordered[0].from, r(1));
  assert_eq!(ordered[1].from, r(0));
  assert!(ordered.iter().all(|m| m.cycle_begin.is_none()));
}

#[test]
fn emit_swap_through_a_slot() {
  let mut ctx = AllocContext::new(0);
  let r = |i| MoveOperand::Reg(reg(i));
  let pending = vec![MoveOp::new(r(0), r(1), vreg(0)), MoveOp::new(r(1), r(0), vreg(1))];
  let insts = emit_moves(schedule_moves(pending), &mut ctx).unwrap();
  assert_eq!(insts.len(), 3);
  match (&insts[0], &insts[2]) {
    (
      InstToInsert::Spill { to_slot: saved, .. },
      InstToInsert::Reload { from_slot: restored, .. },
    ) => assert_eq!(saved, restored),
    other => panic!("unexpected {:?}", other),
  }
  assert_eq!(ctx.num_spill_slots, 1);
}

#[test]
fn constant_moves() {
  let c = MoveOp::new(MoveOperand::Const(7), MoveOperand::Reg(reg(0)), vreg(0));
  assert_eq!(
    c.gen_inst().unwrap(),
    InstToInsert::Materialize {
      to: Location::Reg(reg(0)),
      value: 7,
      for_vreg: vreg(0)
    }
  );
  let slot = StackSlot::Spill(crate::data_structures::SpillSlot::new(0));
  let bad = MoveOp::new(MoveOperand::Stack(slot), MoveOperand::Stack(slot), vreg(0));
  assert!(bad.gen_inst().is_err());
}
