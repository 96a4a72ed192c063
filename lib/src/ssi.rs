/* -*- Mode: Rust; tab-width: 8; indent-tabs-mode: nil; rust-indent-offset: 2 -*-
 * vim: set ts=8 sts=2 et sw=2 tw=80:
*/

//! Static single information at block boundaries.
//!
//! Every value live into a block is treated as defined by the block's label,
//! and every value live out of a block as used (alive) by its terminator.
//! This cuts all lifetimes at block boundaries, so each trace can be
//! allocated on its own; the resolver then connects the locations on every
//! edge.

use log::debug;

use crate::analysis::AnalysisInfo;
use crate::data_structures::{
  BlockIx, Map, RealReg, Set, TraceIx, TypedIxVec, VirtualReg,
};
use crate::interface::{OperandMode, TraceBuilderResult};
use crate::intervals::TraceIntervals;

pub struct SsiInfo {
  incoming: TypedIxVec<BlockIx, Vec<VirtualReg>>,
  outgoing: TypedIxVec<BlockIx, Vec<VirtualReg>>,
}

impl SsiInfo {
  #[inline(never)]
  pub fn create(info: &AnalysisInfo) -> Self {
    let sorted = |set: &Set<VirtualReg>| {
      let mut vregs: Vec<VirtualReg> = set.iter().cloned().collect();
      vregs.sort();
      vregs
    };
    let incoming =
      TypedIxVec::from_vec(info.liveins.iter().map(sorted).collect());
    let outgoing =
      TypedIxVec::from_vec(info.liveouts.iter().map(sorted).collect());
    SsiInfo { incoming, outgoing }
  }

  /// The values the label of `block` defines.
  pub fn incoming(&self, block: BlockIx) -> &[VirtualReg] {
    &self.incoming[block]
  }

  /// The values the terminator of `block` keeps alive.
  pub fn outgoing(&self, block: BlockIx) -> &[VirtualReg] {
    &self.outgoing[block]
  }
}

/// Registers the incoming values of `trace`'s head held at the end of
/// predecessors that sit in already allocated traces.  The first
/// predecessor providing a register wins.
pub fn incoming_hints(
  trace: TraceIx, ssi: &SsiInfo, traces: &TraceBuilderResult,
  info: &AnalysisInfo, allocated: &TypedIxVec<TraceIx, Option<TraceIntervals>>,
) -> Map<VirtualReg, RealReg> {
  let head = traces.trace(trace).head();
  let mut hints = Map::default();

  for &pred in &info.cfg_info.pred_map[head] {
    let pred_ints = match &allocated[traces.trace_of(pred)] {
      Some(ints) => ints,
      None => continue,
    };
    let pred_end = info.numbering.block_last_op(pred);
    for &vreg in ssi.incoming(head) {
      if hints.contains_key(&vreg) {
        continue;
      }
      if let Some(reg) =
        pred_ints.location_at(vreg, pred_end, OperandMode::Use).reg()
      {
        hints.insert(vreg, reg);
      }
    }
  }

  debug!("incoming hints for {:?}: {:?}", trace, hints);
  hints
}
