/* -*- Mode: Rust; tab-width: 8; indent-tabs-mode: nil; rust-indent-offset: 2 -*-
 * vim: set ts=8 sts=2 et sw=2 tw=80:
*/

//! Analyses shared by every trace: CFG, operation numbering, liveness, and
//! the structural checks on the input.

use log::{debug, trace};

use std::collections::VecDeque;
use std::fmt;

use crate::data_structures::{
  BlockIx, InstIx, Map, OpId, RealReg, RealRegUniverse, Set, TraceIx,
  TypedIxVec, VirtualReg,
};
use crate::interface::{Function, OperandMode, TraceBuilderResult, Value};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AnalysisError {
  /// A critical edge from "from" to "to" has been found, and should have been
  /// removed by the caller in the first place.
  CriticalEdge { from: BlockIx, to: BlockIx },

  /// Some values are read in the entry block (or after it) without any
  /// definition reaching them.
  EntryLiveinValues(Vec<VirtualReg>),

  /// A non-existing real register has been seen in the code.
  NonExistingRealReg(RealReg),

  /// At least one block is dead.
  UnreachableBlocks,

  /// The first instruction of this block isn't a label.
  MissingLabel(BlockIx),

  /// A block needs at least a label and a terminator.
  BlockTooShort(BlockIx),

  /// The label of this block has operands; its live-in values are implicit.
  LabelWithOperands(BlockIx),

  /// A real register is read in this block before being written in it.
  LiveInRealReg { block: BlockIx, reg: RealReg },

  /// The trace partition is malformed.
  InvalidTraces(String),

  /// The register universe is malformed.
  InvalidUniverse(String),
}

impl fmt::Display for AnalysisError {
  fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
    match self {
      AnalysisError::CriticalEdge { from, to } => {
        write!(fmt, "critical edge detected, from {:?} to {:?}", from, to)
      }
      AnalysisError::EntryLiveinValues(vregs) => {
        write!(fmt, "entry block has live-in values: {:?}", vregs)
      }
      AnalysisError::NonExistingRealReg(reg) => write!(
        fmt,
        "instructions mention real register {:?}, which isn't defined in the register universe",
        reg
      ),
      AnalysisError::UnreachableBlocks => {
        write!(fmt, "at least one block is unreachable")
      }
      AnalysisError::MissingLabel(block) => {
        write!(fmt, "{:?} doesn't start with a label", block)
      }
      AnalysisError::BlockTooShort(block) => {
        write!(fmt, "{:?} has fewer than two instructions", block)
      }
      AnalysisError::LabelWithOperands(block) => {
        write!(fmt, "the label of {:?} has operands", block)
      }
      AnalysisError::LiveInRealReg { block, reg } => write!(
        fmt,
        "real register {:?} is read in {:?} before being written",
        reg, block
      ),
      AnalysisError::InvalidTraces(msg) => write!(fmt, "invalid traces: {}", msg),
      AnalysisError::InvalidUniverse(msg) => {
        write!(fmt, "invalid register universe: {}", msg)
      }
    }
  }
}

//=============================================================================
// Control-flow analysis results for a Func: predecessors, successors and a
// postorder.

pub struct CFGInfo {
  // All these TypedIxVecs contain one element per Block in the Func.

  // Predecessor and successor maps, without duplicates.
  pub pred_map: TypedIxVec<BlockIx, Vec<BlockIx>>,
  pub succ_map: TypedIxVec<BlockIx, Vec<BlockIx>>,

  // Iterating forwards through this vector enumerates the reachable blocks in
  // postorder.
  pub post_ord: Vec<BlockIx>,
}

impl CFGInfo {
  #[inline(never)]
  pub fn create<F: Function>(func: &F) -> Result<Self, AnalysisError> {
    let num_blocks = func.blocks().len() as u32;

    // === BEGIN compute successor and predecessor maps ===
    //
    let mut succ_map = TypedIxVec::<BlockIx, Vec<BlockIx>>::new();
    for block in func.blocks() {
      let mut succs = Vec::new();
      for succ in func.block_succs(block) {
        if !succs.contains(&succ) {
          succs.push(succ);
        }
      }
      succ_map.push(succs);
    }

    let mut pred_map =
      TypedIxVec::<BlockIx, Vec<BlockIx>>::from_elem(Vec::new(), num_blocks);
    for (src, succs) in succ_map.iter_ix() {
      for dst in succs {
        pred_map[*dst].push(src);
      }
    }
    //
    // === END compute successor and predecessor maps ===

    // === BEGIN check that critical edges have been split ===
    //
    for (src, succs) in succ_map.iter_ix() {
      if succs.len() < 2 {
        continue;
      }
      for dst in succs {
        if pred_map[*dst].len() >= 2 {
          return Err(AnalysisError::CriticalEdge { from: src, to: *dst });
        }
      }
    }
    //
    // === END check that critical edges have been split ===

    // === BEGIN compute postorder ===
    //
    let mut post_ord = Vec::<BlockIx>::new();
    let mut visited =
      TypedIxVec::<BlockIx, bool>::from_elem(false, num_blocks);

    // Explicit stack of (block, index of the next successor to visit).
    let entry = func.entry_block();
    let mut stack = vec![(entry, 0usize)];
    visited[entry] = true;
    while let Some((block, next)) = stack.pop() {
      if next < succ_map[block].len() {
        stack.push((block, next + 1));
        let succ = succ_map[block][next];
        if !visited[succ] {
          visited[succ] = true;
          stack.push((succ, 0));
        }
      } else {
        post_ord.push(block);
      }
    }

    if post_ord.len() != num_blocks as usize {
      return Err(AnalysisError::UnreachableBlocks);
    }
    //
    // === END compute postorder ===

    Ok(CFGInfo { pred_map, succ_map, post_ord })
  }
}

//=============================================================================
// Operation numbering.
//
// Traces are numbered in allocation order, the blocks of a trace in trace
// order, and instructions get 0, 2, 4, ...  This happens once per
// compilation unit: nothing later reorders the instructions.

pub struct Numbering {
  /// The instructions in allocation order: op id `2 * n` is `order[n]`.
  order: Vec<InstIx>,
  /// The block of `order[n]`.
  block_of: Vec<BlockIx>,
  op_of_inst: TypedIxVec<InstIx, OpId>,
  block_first: TypedIxVec<BlockIx, OpId>,
  block_last: TypedIxVec<BlockIx, OpId>,
  trace_first: TypedIxVec<TraceIx, OpId>,
  trace_last: TypedIxVec<TraceIx, OpId>,
}

impl Numbering {
  #[inline(never)]
  pub fn create<F: Function>(func: &F, traces: &TraceBuilderResult) -> Self {
    let num_insns = func.insns().len() as u32;
    let num_blocks = func.blocks().len() as u32;

    let mut order = Vec::with_capacity(num_insns as usize);
    let mut block_of = Vec::with_capacity(num_insns as usize);
    let mut op_of_inst = TypedIxVec::from_elem(OpId::MIN, num_insns);
    let mut block_first = TypedIxVec::from_elem(OpId::MIN, num_blocks);
    let mut block_last = TypedIxVec::from_elem(OpId::MIN, num_blocks);
    let mut trace_first = TypedIxVec::new();
    let mut trace_last = TypedIxVec::new();

    for trace in traces.traces().iter() {
      trace_first.push(OpId::for_inst_number(order.len()));
      for &block in &trace.blocks {
        block_first[block] = OpId::for_inst_number(order.len());
        for iix in func.block_insns(block) {
          op_of_inst[iix] = OpId::for_inst_number(order.len());
          order.push(iix);
          block_of.push(block);
        }
        block_last[block] = OpId::for_inst_number(order.len() - 1);
      }
      trace_last.push(OpId::for_inst_number(order.len() - 1));
    }

    Numbering {
      order,
      block_of,
      op_of_inst,
      block_first,
      block_last,
      trace_first,
      trace_last,
    }
  }

  pub fn op_of_inst(&self, iix: InstIx) -> OpId {
    self.op_of_inst[iix]
  }

  /// The instruction at an even op id.
  pub fn inst_of_op(&self, op: OpId) -> InstIx {
    self.order[op.inst_number()]
  }

  /// The block holding the instruction at `op`, or at the instruction right
  /// before `op` when it is odd.
  pub fn block_of_op(&self, op: OpId) -> BlockIx {
    self.block_of[(op.get() >> 1) as usize]
  }

  pub fn block_first_op(&self, block: BlockIx) -> OpId {
    self.block_first[block]
  }

  pub fn block_last_op(&self, block: BlockIx) -> OpId {
    self.block_last[block]
  }

  pub fn is_block_begin(&self, op: OpId) -> bool {
    op.is_inst() && self.block_first_op(self.block_of_op(op)) == op
  }

  pub fn trace_first_op(&self, trace: TraceIx) -> OpId {
    self.trace_first[trace]
  }

  pub fn trace_last_op(&self, trace: TraceIx) -> OpId {
    self.trace_last[trace]
  }

  /// One past the last op id in use.
  pub fn max_op(&self) -> OpId {
    OpId::for_inst_number(self.order.len())
  }
}

//=============================================================================
// Structural checks.

fn check_structure<F: Function>(
  func: &F, rru: &RealRegUniverse,
) -> Result<(), AnalysisError> {
  rru.check_is_sane().map_err(AnalysisError::InvalidUniverse)?;

  for block in func.blocks() {
    let insns = func.block_insns(block);
    if insns.len() < 2 {
      return Err(AnalysisError::BlockTooShort(block));
    }
    let label = func.get_insn(insns.first());
    if !func.is_label(label) {
      return Err(AnalysisError::MissingLabel(block));
    }
    if !func.get_operands(label).is_empty() {
      return Err(AnalysisError::LabelWithOperands(block));
    }

    // Real registers carry nothing across blocks: every read must follow a
    // write in the same block.
    let mut written = Set::<RealReg>::default();
    for iix in insns {
      let operands = func.get_operands(func.get_insn(iix));
      for operand in &operands {
        if let Value::Real(reg) = operand.value {
          match rru.regs.get(reg.get_index()) {
            Some((universe_reg, _)) if *universe_reg == reg => {}
            _ => return Err(AnalysisError::NonExistingRealReg(reg)),
          }
        }
      }
      for operand in &operands {
        if let Value::Real(reg) = operand.value {
          match operand.mode {
            OperandMode::Use | OperandMode::Alive | OperandMode::State => {
              if !written.contains(&reg) {
                return Err(AnalysisError::LiveInRealReg { block, reg });
              }
            }
            OperandMode::Def | OperandMode::Temp => {}
          }
        }
      }
      for operand in &operands {
        if let (Value::Real(reg), OperandMode::Def) =
          (operand.value, operand.mode)
        {
          written.insert(reg);
        }
      }
    }
  }

  Ok(())
}

//=============================================================================
// Liveness of virtual registers.

// Upward-exposed reads and writes of one block.
fn calc_def_and_use<F: Function>(
  func: &F, block: BlockIx,
) -> (Set<VirtualReg>, Set<VirtualReg>) {
  let mut defs = Set::default();
  let mut uses = Set::default();
  for iix in func.block_insns(block) {
    let operands = func.get_operands(func.get_insn(iix));
    // Reads of an instruction happen before its writes.
    for operand in &operands {
      if let Value::Virtual(vreg) = operand.value {
        match operand.mode {
          OperandMode::Use | OperandMode::Alive | OperandMode::State => {
            if !defs.contains(&vreg) {
              uses.insert(vreg);
            }
          }
          OperandMode::Def | OperandMode::Temp => {}
        }
      }
    }
    for operand in &operands {
      if let (Value::Virtual(vreg), OperandMode::Def) =
        (operand.value, operand.mode)
      {
        defs.insert(vreg);
      }
    }
  }
  (defs, uses)
}

#[inline(never)]
fn calc_livein_and_liveout<F: Function>(
  func: &F, cfg_info: &CFGInfo,
) -> (TypedIxVec<BlockIx, Set<VirtualReg>>, TypedIxVec<BlockIx, Set<VirtualReg>>)
{
  debug!("calc_livein_and_liveout: begin");
  let num_blocks = func.blocks().len() as u32;

  let mut def_sets = TypedIxVec::<BlockIx, Set<VirtualReg>>::new();
  let mut use_sets = TypedIxVec::<BlockIx, Set<VirtualReg>>::new();
  for block in func.blocks() {
    let (defs, uses) = calc_def_and_use(func, block);
    def_sets.push(defs);
    use_sets.push(uses);
  }

  let mut liveins =
    TypedIxVec::<BlockIx, Set<VirtualReg>>::from_elem(Set::default(), num_blocks);
  let mut liveouts = liveins.clone();

  // Postorder visits successors before their predecessors, which is the
  // right direction for a backward problem.
  let mut work_queue: VecDeque<BlockIx> =
    cfg_info.post_ord.iter().cloned().collect();
  let mut in_queue = TypedIxVec::<BlockIx, bool>::from_elem(true, num_blocks);
  let mut num_evals = 0;

  while let Some(block) = work_queue.pop_front() {
    in_queue[block] = false;
    num_evals += 1;

    let mut liveout = Set::default();
    for succ in &cfg_info.succ_map[block] {
      liveout.extend(liveins[*succ].iter().cloned());
    }

    let mut livein: Set<VirtualReg> = liveout
      .iter()
      .filter(|vreg| !def_sets[block].contains(vreg))
      .cloned()
      .collect();
    livein.extend(use_sets[block].iter().cloned());

    liveouts[block] = liveout;
    if livein != liveins[block] {
      liveins[block] = livein;
      for pred in &cfg_info.pred_map[block] {
        if !in_queue[*pred] {
          in_queue[*pred] = true;
          work_queue.push_back(*pred);
        }
      }
    }
  }

  debug!("calc_livein_and_liveout: end, {} evaluations", num_evals);
  (liveins, liveouts)
}

// How many instructions of the whole function write each virtual register.
fn count_definitions<F: Function>(func: &F) -> Map<VirtualReg, u32> {
  let mut num_defs = Map::default();
  for insn in func.insns() {
    for operand in &func.get_operands(insn) {
      if let (Value::Virtual(vreg), OperandMode::Def) =
        (operand.value, operand.mode)
      {
        *num_defs.entry(vreg).or_insert(0) += 1;
      }
    }
  }
  num_defs
}

//=============================================================================
// Top level.

pub struct AnalysisInfo {
  pub cfg_info: CFGInfo,
  pub numbering: Numbering,
  pub liveins: TypedIxVec<BlockIx, Set<VirtualReg>>,
  pub liveouts: TypedIxVec<BlockIx, Set<VirtualReg>>,
  /// Explicit definitions per virtual register; labels don't count.
  pub num_defs: Map<VirtualReg, u32>,
}

impl AnalysisInfo {
  pub fn num_defs(&self, vreg: VirtualReg) -> u32 {
    self.num_defs.get(&vreg).cloned().unwrap_or(0)
  }
}

#[inline(never)]
pub fn run_analysis<F: Function>(
  func: &F, traces: &TraceBuilderResult, rru: &RealRegUniverse,
) -> Result<AnalysisInfo, AnalysisError> {
  check_structure(func, rru)?;

  let cfg_info = CFGInfo::create(func)?;
  let numbering = Numbering::create(func, traces);
  let (liveins, liveouts) = calc_livein_and_liveout(func, &cfg_info);

  let entry = func.entry_block();
  if !liveins[entry].is_empty() {
    let mut vregs: Vec<VirtualReg> = liveins[entry].iter().cloned().collect();
    vregs.sort();
    return Err(AnalysisError::EntryLiveinValues(vregs));
  }

  for (block, livein) in liveins.iter_ix() {
    trace!("{:?}: live-in {:?}", block, livein);
  }

  let num_defs = count_definitions(func);

  Ok(AnalysisInfo { cfg_info, numbering, liveins, liveouts, num_defs })
}
