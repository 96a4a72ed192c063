/* -*- Mode: Rust; tab-width: 8; indent-tabs-mode: nil; rust-indent-offset: 2 -*-
 * vim: set ts=8 sts=2 et sw=2 tw=80:
*/

//! This is the top level interface for the trace register allocator.

use log::{debug, info};
#[cfg(feature = "enable-serde")]
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use std::env;
use std::fmt;

use crate::analysis::AnalysisError;
use crate::checker::CheckerErrors;
use crate::intervals::TraceIntervals;
use crate::linear_scan;
use crate::spill_state::SpillState;

// Stuff that is defined by the library

// Sets and maps of things.  The interface needs some way to speak about them,
// so let's use the library-provided versions.

pub use crate::data_structures::Map;
pub use crate::data_structures::Set;

// Register classes, registers, the universe of real registers.

pub use crate::data_structures::RealReg;
pub use crate::data_structures::RealRegUniverse;
pub use crate::data_structures::RegClass;
pub use crate::data_structures::RegClassInfo;
pub use crate::data_structures::VirtualReg;
pub use crate::data_structures::NUM_REG_CLASSES;

// Stack slots and the locations the allocator hands back.

pub use crate::data_structures::Location;
pub use crate::data_structures::SpillSlot;
pub use crate::data_structures::StackSlot;

// TypedIxVector, so that the interface can speak about vectors of blocks,
// instructions and traces.

pub use crate::data_structures::TypedIxVec;
pub use crate::data_structures::{
  BlockIx, InstIx, IntId, MyRange, OpId, TraceIx,
};

//=============================================================================
// Operands

/// The value an operand refers to.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Value {
  Virtual(VirtualReg),
  /// A physical register fixed by the instruction itself.
  Real(RealReg),
  /// An argument passed on the stack by the caller.
  Incoming(u32),
  Const(i64),
}

impl Value {
  pub fn as_virtual(&self) -> Option<VirtualReg> {
    match self {
      Value::Virtual(vreg) => Some(*vreg),
      _ => None,
    }
  }
  pub fn as_real(&self) -> Option<RealReg> {
    match self {
      Value::Real(reg) => Some(*reg),
      _ => None,
    }
  }
}

/// How an instruction accesses an operand.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum OperandMode {
  /// Written by the instruction.
  Def,
  /// Scratch space, clobbered by the instruction.
  Temp,
  /// Must stay valid over the whole instruction, but isn't read by it.
  Alive,
  /// Read by the instruction.
  Use,
  /// Debug or deoptimization state: kept available, possibly in memory.
  State,
}

#[derive(Copy, Clone, PartialEq, Eq, Hash, Default)]
pub struct OperandFlags(u8);

impl OperandFlags {
  pub const NONE: OperandFlags = OperandFlags(0);
  /// The output of this instruction should reuse the location of the input
  /// flagged the same way.
  pub const HINT: OperandFlags = OperandFlags(1);
  /// Outgoing call argument: no register needed.
  pub const CALL_ARG: OperandFlags = OperandFlags(2);
  /// A stack location is acceptable for this operand.
  pub const STACK: OperandFlags = OperandFlags(4);
  /// A register is mandatory for this operand.
  pub const REG: OperandFlags = OperandFlags(8);

  pub fn contains(self, other: OperandFlags) -> bool {
    self.0 & other.0 == other.0
  }
}

impl std::ops::BitOr for OperandFlags {
  type Output = OperandFlags;
  fn bitor(self, rhs: OperandFlags) -> OperandFlags {
    OperandFlags(self.0 | rhs.0)
  }
}

impl fmt::Debug for OperandFlags {
  fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
    let mut names = Vec::new();
    for (flag, name) in &[
      (OperandFlags::HINT, "hint"),
      (OperandFlags::CALL_ARG, "call-arg"),
      (OperandFlags::STACK, "stack"),
      (OperandFlags::REG, "reg"),
    ] {
      if self.contains(*flag) {
        names.push(*name);
      }
    }
    write!(fmt, "[{}]", names.join(","))
  }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Operand {
  pub value: Value,
  pub mode: OperandMode,
  pub flags: OperandFlags,
}

impl Operand {
  pub fn new(value: Value, mode: OperandMode, flags: OperandFlags) -> Self {
    Self { value, mode, flags }
  }
  pub fn def(value: Value) -> Self {
    Self::new(value, OperandMode::Def, OperandFlags::NONE)
  }
  pub fn temp(value: Value) -> Self {
    Self::new(value, OperandMode::Temp, OperandFlags::NONE)
  }
  pub fn alive(value: Value) -> Self {
    Self::new(value, OperandMode::Alive, OperandFlags::NONE)
  }
  pub fn use_(value: Value) -> Self {
    Self::new(value, OperandMode::Use, OperandFlags::NONE)
  }
  pub fn state(value: Value) -> Self {
    Self::new(value, OperandMode::State, OperandFlags::NONE)
  }
  pub fn with_flags(mut self, flags: OperandFlags) -> Self {
    self.flags = self.flags | flags;
    self
  }
}

//=============================================================================
// The client's view of a function.

/// A trait defined by the regalloc client to provide access to its
/// machine-instruction / CFG representation.
///
/// Every block starts with a label instruction and ends with a terminator;
/// the instructions of a block are contiguous in `insns`.
pub trait Function {
  /// Regalloc is parameterized on F: Function and so can use the projected
  /// type F::Inst.
  type Inst: Clone;

  // -------------
  // CFG traversal
  // -------------

  /// Allow access to the underlying vector of instructions.
  fn insns(&self) -> &[Self::Inst];

  /// Get an instruction by index.
  fn get_insn(&self, iix: InstIx) -> &Self::Inst {
    &self.insns()[iix.get() as usize]
  }

  /// Allow iteration over basic blocks (in instruction order).
  fn blocks(&self) -> MyRange<BlockIx>;

  /// Get the index of the entry block.
  fn entry_block(&self) -> BlockIx;

  /// Provide the range of instruction indices contained in each block.
  fn block_insns(&self, block: BlockIx) -> MyRange<InstIx>;

  /// Get CFG successors for a given block.
  fn block_succs(&self, block: BlockIx) -> Vec<BlockIx>;

  // --------------------------
  // Instruction register slots
  // --------------------------

  /// All the operands of an instruction, in a stable order: the locations
  /// handed to `map_operands` follow the same order.
  fn get_operands(&self, insn: &Self::Inst) -> SmallVec<[Operand; 4]>;

  /// Is this the label opening a block?
  fn is_label(&self, insn: &Self::Inst) -> bool;

  /// Allow the regalloc to query whether this is a move, returning the
  /// destination and the source.
  fn is_move(&self, insn: &Self::Inst) -> Option<(Value, Value)>;

  /// Does this instruction overwrite every caller-saved register?
  fn destroys_caller_saved(&self, insn: &Self::Inst) -> bool;

  /// Install the final location of each operand, one location per operand
  /// returned by `get_operands`.
  fn map_operands(&self, insn: &mut Self::Inst, locations: &[Location]);

  // --------------------
  // Code generation hooks
  // --------------------

  /// Generate a spill instruction for insertion into the instruction
  /// sequence.
  fn gen_spill(
    &self, to_slot: StackSlot, from_reg: RealReg, for_vreg: VirtualReg,
  ) -> Self::Inst;

  /// Generate a reload instruction for insertion into the instruction
  /// sequence.
  fn gen_reload(
    &self, to_reg: RealReg, from_slot: StackSlot, for_vreg: VirtualReg,
  ) -> Self::Inst;

  /// Generate a register-to-register move for insertion into the instruction
  /// sequence.
  fn gen_move(
    &self, to_reg: RealReg, from_reg: RealReg, for_vreg: VirtualReg,
  ) -> Self::Inst;

  /// Generate a constant load into a register or a stack slot.
  fn gen_materialize(
    &self, to: Location, value: i64, for_vreg: VirtualReg,
  ) -> Self::Inst;
}

//=============================================================================
// Traces

/// An allocation unit: blocks that form a single-entry path.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Trace {
  pub blocks: Vec<BlockIx>,
}

impl Trace {
  pub fn head(&self) -> BlockIx {
    self.blocks[0]
  }
}

/// A validated partition of a function's blocks into traces, in allocation
/// order.
#[derive(Clone, Debug)]
pub struct TraceBuilderResult {
  traces: TypedIxVec<TraceIx, Trace>,
  block_to_trace: TypedIxVec<BlockIx, TraceIx>,
}

impl TraceBuilderResult {
  pub fn new<F: Function>(
    func: &F, traces: Vec<Vec<BlockIx>>,
  ) -> Result<Self, AnalysisError> {
    let num_blocks = func.blocks().len() as u32;

    let mut preds: TypedIxVec<BlockIx, Vec<BlockIx>> =
      TypedIxVec::from_elem(Vec::new(), num_blocks);
    for block in func.blocks() {
      for succ in func.block_succs(block) {
        if succ.get() >= num_blocks {
          return Err(AnalysisError::InvalidTraces(format!(
            "{:?} has an out-of-range successor {:?}",
            block, succ
          )));
        }
        if !preds[succ].contains(&block) {
          preds[succ].push(block);
        }
      }
    }

    let mut owner: TypedIxVec<BlockIx, Option<TraceIx>> =
      TypedIxVec::from_elem(None, num_blocks);
    let mut result = TypedIxVec::new();

    for blocks in traces {
      if blocks.is_empty() {
        return Err(AnalysisError::InvalidTraces("empty trace".into()));
      }
      let trace_ix = TraceIx::new(result.len());
      for (i, &block) in blocks.iter().enumerate() {
        if block.get() >= num_blocks {
          return Err(AnalysisError::InvalidTraces(format!(
            "{:?} doesn't exist",
            block
          )));
        }
        if let Some(other) = owner[block] {
          return Err(AnalysisError::InvalidTraces(format!(
            "{:?} is in both {:?} and {:?}",
            block, other, trace_ix
          )));
        }
        owner[block] = Some(trace_ix);
        if i > 0 && preds[block] != [blocks[i - 1]] {
          return Err(AnalysisError::InvalidTraces(format!(
            "{:?} in {:?} must have {:?} as its only predecessor",
            block,
            trace_ix,
            blocks[i - 1]
          )));
        }
      }
      result.push(Trace { blocks });
    }

    match result.elems().first() {
      Some(trace) if trace.head() == func.entry_block() => {}
      _ => {
        return Err(AnalysisError::InvalidTraces(
          "the first trace must start at the entry block".into(),
        ))
      }
    }

    let mut block_to_trace = TypedIxVec::new();
    for block in func.blocks() {
      match owner[block] {
        Some(trace) => {
          block_to_trace.push(trace);
        }
        None => {
          return Err(AnalysisError::InvalidTraces(format!(
            "{:?} isn't in any trace",
            block
          )))
        }
      }
    }

    Ok(Self { traces: result, block_to_trace })
  }

  pub fn traces(&self) -> &TypedIxVec<TraceIx, Trace> {
    &self.traces
  }

  pub fn trace(&self, trace: TraceIx) -> &Trace {
    &self.traces[trace]
  }

  pub fn trace_of(&self, block: BlockIx) -> TraceIx {
    self.block_to_trace[block]
  }

  pub fn len(&self) -> u32 {
    self.traces.len()
  }
}

//=============================================================================
// Target description and options

/// The read-only target description.
#[derive(Clone, Debug)]
pub struct RegEnv {
  pub rru: RealRegUniverse,

  /// Can this constant be stored directly to a stack slot?
  pub can_store_constant_to_stack: fn(i64) -> bool,
}

impl RegEnv {
  pub fn new(rru: RealRegUniverse) -> Self {
    Self { rru, can_store_constant_to_stack: |_| true }
  }
}

#[derive(Clone, Copy, Debug)]
pub struct Options {
  /// Validate every trace's allocation before emitting code.
  pub run_checker: bool,

  /// Rematerialize every constant, even if the target can't store it to the
  /// stack or a use would accept it in memory.
  pub never_spill_constants: bool,
}

impl Default for Options {
  fn default() -> Self {
    Self { run_checker: cfg!(debug_assertions), never_spill_constants: false }
  }
}

impl Options {
  /// Defaults, overridden by `TRACERA_CHECKER` and
  /// `TRACERA_NEVER_SPILL_CONSTANTS` when they are set.
  pub fn from_env() -> Self {
    let mut opts = Self::default();
    if let Some(flag) = env_flag("TRACERA_CHECKER") {
      opts.run_checker = flag;
    }
    if let Some(flag) = env_flag("TRACERA_NEVER_SPILL_CONSTANTS") {
      opts.never_spill_constants = flag;
    }
    opts
  }
}

fn env_flag(name: &str) -> Option<bool> {
  match env::var(name) {
    Ok(s) => match s.as_str() {
      "0" | "false" | "no" | "off" => Some(false),
      _ => Some(true),
    },
    Err(_) => None,
  }
}

//=============================================================================
// Results

/// An error from the register allocator.  All of them abort the compilation
/// unit; the caller is expected to fall back to a simpler code path.
#[derive(Clone, Debug)]
pub enum RegAllocError {
  /// The input is malformed.
  Analysis(AnalysisError),

  /// Some instruction needs more registers of this class than there are.
  OutOfRegisters(RegClass),

  /// A requirement of the allocation strategy doesn't hold for this unit.
  Bailout(String),

  /// An allocator invariant was broken.
  Internal(String),

  /// The post-allocation checker found an error.
  RegChecker(CheckerErrors),
}

impl fmt::Display for RegAllocError {
  fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
    match self {
      RegAllocError::Analysis(err) => write!(fmt, "analysis error: {}", err),
      RegAllocError::OutOfRegisters(rc) => {
        write!(fmt, "out of {:?} registers", rc)
      }
      RegAllocError::Bailout(msg) => write!(fmt, "bailout: {}", msg),
      RegAllocError::Internal(msg) => write!(fmt, "internal error: {}", msg),
      RegAllocError::RegChecker(errors) => {
        write!(fmt, "checker error: {}", errors)
      }
    }
  }
}

impl std::error::Error for RegAllocError {}

impl From<AnalysisError> for RegAllocError {
  fn from(err: AnalysisError) -> Self {
    RegAllocError::Analysis(err)
  }
}

/// Counters for one compilation unit.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub struct AllocStats {
  pub num_splits: u32,
  pub num_spilled: u32,
  pub num_materialized: u32,
  pub num_moves: u32,
  pub num_spills: u32,
  pub num_reloads: u32,
  pub num_elided_stores: u32,
}

/// The result of register allocation.  Note that allocation can fail!
pub struct RegAllocResult<F: Function> {
  /// A new sequence of instructions with all operands mapped to locations,
  /// and spills/reloads/moves possibly inserted (and identity moves
  /// removed).
  pub insns: Vec<F::Inst>,

  /// Basic-block start indices for the new instruction list, indexed by the
  /// original basic block indices.
  pub target_map: TypedIxVec<BlockIx, InstIx>,

  /// For each new instruction, the original instruction it comes from, if
  /// any.
  pub orig_insn_map: TypedIxVec<InstIx, Option<InstIx>>,

  /// Real registers that were written.
  pub clobbered_registers: Set<RealReg>,

  /// How many spill slots were used?
  pub num_spill_slots: u32,

  /// The finalized interval tables, one per trace.
  pub intervals: TypedIxVec<TraceIx, TraceIntervals>,

  /// The spill state of every value, per trace.
  pub spill_states: Vec<(TraceIx, VirtualReg, SpillState)>,

  pub stats: AllocStats,
}

/// Allocate registers for a function's code, trace by trace.
///
/// The traces are allocated in the order given by `traces`; a trace only
/// reads location hints from the traces allocated before it.
#[inline(never)]
pub fn allocate_registers<F: Function>(
  func: &F, traces: &TraceBuilderResult, env: &RegEnv, opts: &Options,
) -> Result<RegAllocResult<F>, RegAllocError> {
  info!("allocate_registers: {} traces", traces.len());
  debug!("options: {:?}", opts);
  let result = linear_scan::run(func, traces, env, opts);
  if let Err(err) = &result {
    info!("allocate_registers: failed with {}", err);
  }
  result
}

/// Builds the interval table of every trace, without allocating anything.
/// The tables are what allocation starts from; building them twice gives
/// the same result.
pub fn compute_intervals<F: Function>(
  func: &F, traces: &TraceBuilderResult, env: &RegEnv, opts: &Options,
) -> Result<TypedIxVec<TraceIx, TraceIntervals>, RegAllocError> {
  linear_scan::compute_intervals(func, traces, env, opts)
}
