/* -*- Mode: Rust; tab-width: 8; indent-tabs-mode: nil; rust-indent-offset: 2 -*-
 * vim: set ts=8 sts=2 et sw=2 tw=80:
*/

//! Final code: the original instructions with their operands mapped to
//! locations, interleaved with the instructions the resolver asked for.

use log::{debug, trace};
use smallvec::SmallVec;

use crate::analysis::AnalysisInfo;
use crate::data_structures::{
  InstIx, Location, Map, OpId, RealReg, Set, StackSlot, TraceIx, TypedIxVec,
};
use crate::interface::{
  Function, Operand, OperandMode, RegAllocError, RegAllocResult, RegEnv,
  TraceBuilderResult, Value,
};
use crate::intervals::TraceIntervals;
use crate::linear_scan::AllocContext;
use crate::resolve::{InstAndPoint, InstToInsert, InstsAndPoints};

fn map_operand(
  ints: &TraceIntervals, op: OpId, operand: &Operand,
) -> Result<Location, RegAllocError> {
  Ok(match operand.value {
    Value::Virtual(vreg) => {
      let location = ints.location_at(vreg, op, operand.mode);
      if location.is_none() {
        return Err(RegAllocError::Internal(format!(
          "{:?} has no location at {:?} ({:?})",
          vreg, op, operand.mode
        )));
      }
      location
    }
    Value::Real(reg) => Location::Reg(reg),
    Value::Incoming(slot) => Location::Stack(StackSlot::Incoming(slot)),
    Value::Const(value) => Location::Const(value),
  })
}

fn written_reg(inst: &InstToInsert) -> Option<RealReg> {
  match inst {
    InstToInsert::Spill { .. } => None,
    InstToInsert::Reload { to_reg, .. } => Some(*to_reg),
    InstToInsert::Move { to_reg, .. } => Some(*to_reg),
    InstToInsert::Materialize { to, .. } => to.reg(),
  }
}

#[inline(never)]
pub(crate) fn emit<F: Function>(
  func: &F, traces: &TraceBuilderResult, info: &AnalysisInfo, env: &RegEnv,
  intervals: TypedIxVec<TraceIx, TraceIntervals>, mut moves: InstsAndPoints,
  ctx: AllocContext,
) -> Result<RegAllocResult<F>, RegAllocError> {
  let numbering = &info.numbering;

  // Group the inserted instructions by the instruction they precede, keeping
  // the phase order inside every gap.
  moves.sort_by_key(|mov| (mov.at, mov.phase));
  let mut before: Map<InstIx, Vec<InstAndPoint>> = Map::default();
  for mov in moves {
    let iix = numbering.inst_of_op(mov.at.plus(1));
    before.entry(iix).or_default().push(mov);
  }

  let mut insns: Vec<F::Inst> = Vec::new();
  let mut orig_insn_map: TypedIxVec<InstIx, Option<InstIx>> =
    TypedIxVec::new();
  let mut target_map = TypedIxVec::new();
  let mut clobbered_registers: Set<RealReg> = Set::default();
  let mut num_removed_moves = 0;

  for block in func.blocks() {
    target_map.push(InstIx::new(insns.len() as u32));
    let ints = &intervals[traces.trace_of(block)];

    for iix in func.block_insns(block) {
      if let Some(inserted) = before.remove(&iix) {
        for mov in inserted {
          trace!("  inserting {:?}", mov.inst);
          if let Some(reg) = written_reg(&mov.inst) {
            clobbered_registers.insert(reg);
          }
          insns.push(mov.inst.construct(func));
          orig_insn_map.push(None);
        }
      }

      let insn = func.get_insn(iix);
      let op = numbering.op_of_inst(iix);
      let operands = func.get_operands(insn);
      let mut locations: SmallVec<[Location; 4]> = SmallVec::new();
      for operand in &operands {
        locations.push(map_operand(ints, op, operand)?);
      }

      if let Some((dst, src)) = func.is_move(insn) {
        let find = |value: Value, mode: OperandMode| {
          operands
            .iter()
            .position(|o| o.value == value && o.mode == mode)
            .map(|i| locations[i])
        };
        let dst_loc = find(dst, OperandMode::Def);
        let src_loc = match src {
          Value::Const(value) => Some(Location::Const(value)),
          _ => find(src, OperandMode::Use),
        };
        if dst_loc.is_some() && dst_loc == src_loc {
          trace!("  removing identity move at {:?}", iix);
          num_removed_moves += 1;
          continue;
        }
      }

      for (operand, location) in operands.iter().zip(locations.iter()) {
        if operand.mode == OperandMode::Def || operand.mode == OperandMode::Temp
        {
          if let Some(reg) = location.reg() {
            clobbered_registers.insert(reg);
          }
        }
      }
      if func.destroys_caller_saved(insn) {
        for &reg in &env.rru.caller_saved {
          clobbered_registers.insert(reg);
        }
      }

      let mut new_insn = insn.clone();
      func.map_operands(&mut new_insn, &locations);
      insns.push(new_insn);
      orig_insn_map.push(Some(iix));
    }
  }

  if !before.is_empty() {
    return Err(RegAllocError::Internal(format!(
      "{} groups of inserted instructions were not placed",
      before.len()
    )));
  }

  let mut spill_states = Vec::new();
  for (trace, ints) in intervals.iter_ix() {
    let mut roots: Vec<_> = ints.roots().map(|id| ints.var(id)).collect();
    roots.sort_by_key(|interval| interval.vreg);
    for interval in roots {
      spill_states.push((trace, interval.vreg, interval.spill.state()));
    }
  }

  debug!(
    "emit: {} instructions, {} identity moves removed",
    insns.len(),
    num_removed_moves
  );

  Ok(RegAllocResult {
    insns,
    target_map,
    orig_insn_map,
    clobbered_registers,
    num_spill_slots: ctx.num_spill_slots,
    intervals,
    spill_states,
    stats: ctx.stats,
  })
}
