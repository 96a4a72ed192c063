/* -*- Mode: Rust; tab-width: 8; indent-tabs-mode: nil; rust-indent-offset: 2 -*-
 * vim: set ts=8 sts=2 et sw=2 tw=80:
*/

/// As part of this set of test cases, we define a mini LIR and implement the
/// `Function` trait for it so that we can use the allocator's public
/// interface.
use arbitrary::Arbitrary;
use smallvec::SmallVec;
use trace_regalloc::{
  allocate_registers, BlockIx, InstIx, Location, Map, MyRange, Operand,
  OperandFlags, OperandMode, Options, RealReg, RealRegUniverse, RegAllocError,
  RegAllocResult, RegClass, RegClassInfo, RegEnv, StackSlot,
  TraceBuilderResult, TypedIxVec, Value, VirtualReg, NUM_REG_CLASSES,
};

use std::fmt;

//=============================================================================
// Operands and instructions.  Destinations are on the left.

/// An instruction operand: a register, a stack slot, or an immediate.  Stack
/// spill slots only show up once the allocator has run; incoming argument
/// slots can be read before.
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub enum Opnd {
  V(VirtualReg),
  R(RealReg),
  S(StackSlot),
  C(i64),
}

impl fmt::Debug for Opnd {
  fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
    match self {
      Opnd::V(vreg) => vreg.fmt(fmt),
      Opnd::R(reg) => reg.fmt(fmt),
      Opnd::S(slot) => slot.fmt(fmt),
      Opnd::C(value) => write!(fmt, "${}", value),
    }
  }
}

impl Opnd {
  fn to_value(self) -> Option<Value> {
    match self {
      Opnd::V(vreg) => Some(Value::Virtual(vreg)),
      Opnd::R(reg) => Some(Value::Real(reg)),
      Opnd::S(StackSlot::Incoming(n)) => Some(Value::Incoming(n)),
      Opnd::S(StackSlot::Spill(_)) => None,
      Opnd::C(value) => Some(Value::Const(value)),
    }
  }

  fn from_location(location: Location) -> Option<Opnd> {
    match location {
      Location::Reg(reg) => Some(Opnd::R(reg)),
      Location::Stack(slot) => Some(Opnd::S(slot)),
      Location::Const(value) => Some(Opnd::C(value)),
      Location::None => None,
    }
  }
}

#[derive(Copy, Clone, PartialEq, Eq, Arbitrary)]
pub enum BinOp {
  Add,
  Sub,
  Mul,
  And,
  Or,
  Xor,
  CmpEQ,
  CmpLT,
  CmpGT,
}

impl fmt::Debug for BinOp {
  fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
    write!(
      fmt,
      "{}",
      match self {
        BinOp::Add => "add",
        BinOp::Sub => "sub",
        BinOp::Mul => "mul",
        BinOp::And => "and",
        BinOp::Or => "or",
        BinOp::Xor => "xor",
        BinOp::CmpEQ => "cmpeq",
        BinOp::CmpLT => "cmplt",
        BinOp::CmpGT => "cmpgt",
      }
    )
  }
}

impl BinOp {
  pub fn calc(self, lhs: i64, rhs: i64) -> i64 {
    match self {
      BinOp::Add => lhs.wrapping_add(rhs),
      BinOp::Sub => lhs.wrapping_sub(rhs),
      BinOp::Mul => lhs.wrapping_mul(rhs),
      BinOp::And => lhs & rhs,
      BinOp::Or => lhs | rhs,
      BinOp::Xor => lhs ^ rhs,
      BinOp::CmpEQ => (lhs == rhs) as i64,
      BinOp::CmpLT => (lhs < rhs) as i64,
      BinOp::CmpGT => (lhs > rhs) as i64,
    }
  }
}

#[derive(Clone)]
pub enum Inst {
  /// Opens every block.
  Label,
  Imm { dst: Opnd, imm: i64 },
  Copy { dst: Opnd, src: Opnd },
  BinOp { op: BinOp, dst: Opnd, lhs: Opnd, rhs: Opnd },
  /// Computes a hash of its arguments; overwrites every caller-saved
  /// register.
  Call { dst: Option<Opnd>, args: Vec<Opnd> },
  /// Keeps values available for inspection.
  Safepoint { state: Vec<Opnd> },
  Print { src: Opnd },
  Goto { target: BlockIx },
  CondBr { cond: Opnd, taken: BlockIx, not_taken: BlockIx },
  Ret { src: Opnd },

  // Instructions only the allocator inserts.
  Spill { dst: StackSlot, src: RealReg },
  Reload { dst: RealReg, src: StackSlot },
  Move { dst: RealReg, src: RealReg },
  Materialize { dst: Opnd, imm: i64 },
}

pub fn i_imm(dst: Opnd, imm: i64) -> Inst {
  Inst::Imm { dst, imm }
}
pub fn i_copy(dst: Opnd, src: Opnd) -> Inst {
  Inst::Copy { dst, src }
}
pub fn i_binop(op: BinOp, dst: Opnd, lhs: Opnd, rhs: Opnd) -> Inst {
  Inst::BinOp { op, dst, lhs, rhs }
}
pub fn i_add(dst: Opnd, lhs: Opnd, rhs: Opnd) -> Inst {
  i_binop(BinOp::Add, dst, lhs, rhs)
}
pub fn i_sub(dst: Opnd, lhs: Opnd, rhs: Opnd) -> Inst {
  i_binop(BinOp::Sub, dst, lhs, rhs)
}
pub fn i_mul(dst: Opnd, lhs: Opnd, rhs: Opnd) -> Inst {
  i_binop(BinOp::Mul, dst, lhs, rhs)
}
pub fn i_cmp_gt(dst: Opnd, lhs: Opnd, rhs: Opnd) -> Inst {
  i_binop(BinOp::CmpGT, dst, lhs, rhs)
}
pub fn i_call(dst: Option<Opnd>, args: Vec<Opnd>) -> Inst {
  Inst::Call { dst, args }
}
pub fn i_safepoint(state: Vec<Opnd>) -> Inst {
  Inst::Safepoint { state }
}
pub fn i_print(src: Opnd) -> Inst {
  Inst::Print { src }
}

impl fmt::Debug for Inst {
  fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
    match self {
      Inst::Label => write!(fmt, "label"),
      Inst::Imm { dst, imm } => write!(fmt, "imm     {:?}, {}", dst, imm),
      Inst::Copy { dst, src } => write!(fmt, "copy    {:?}, {:?}", dst, src),
      Inst::BinOp { op, dst, lhs, rhs } => {
        write!(fmt, "{:<7?} {:?}, {:?}, {:?}", op, dst, lhs, rhs)
      }
      Inst::Call { dst, args } => match dst {
        Some(dst) => write!(fmt, "call    {:?}, {:?}", dst, args),
        None => write!(fmt, "call    {:?}", args),
      },
      Inst::Safepoint { state } => write!(fmt, "safept  {:?}", state),
      Inst::Print { src } => write!(fmt, "print   {:?}", src),
      Inst::Goto { target } => write!(fmt, "goto    {:?}", target),
      Inst::CondBr { cond, taken, not_taken } => {
        write!(fmt, "if      {:?} then {:?} else {:?}", cond, taken, not_taken)
      }
      Inst::Ret { src } => write!(fmt, "ret     {:?}", src),
      Inst::Spill { dst, src } => write!(fmt, "SPILL   {:?}, {:?}", dst, src),
      Inst::Reload { dst, src } => write!(fmt, "RELOAD  {:?}, {:?}", dst, src),
      Inst::Move { dst, src } => write!(fmt, "MOVE    {:?}, {:?}", dst, src),
      Inst::Materialize { dst, imm } => {
        write!(fmt, "MAT     {:?}, {}", dst, imm)
      }
    }
  }
}

impl Inst {
  /// Visits every operand slot, in a stable order, with its mode and flags.
  fn visit_operands<F: FnMut(&mut Opnd, OperandMode, OperandFlags)>(
    &mut self, mut f: F,
  ) {
    let hint = OperandFlags::HINT;
    let stack = OperandFlags::STACK;
    match self {
      Inst::Imm { dst, .. } => f(dst, OperandMode::Def, stack),
      Inst::Copy { dst, src } => {
        f(src, OperandMode::Use, hint | stack);
        f(dst, OperandMode::Def, hint);
      }
      Inst::BinOp { dst, lhs, rhs, .. } => {
        f(lhs, OperandMode::Use, hint);
        f(rhs, OperandMode::Use, stack);
        f(dst, OperandMode::Def, hint);
      }
      Inst::Call { dst, args } => {
        for arg in args.iter_mut() {
          f(arg, OperandMode::Use, OperandFlags::CALL_ARG);
        }
        if let Some(dst) = dst {
          f(dst, OperandMode::Def, stack);
        }
      }
      Inst::Safepoint { state } => {
        for value in state.iter_mut() {
          f(value, OperandMode::State, OperandFlags::NONE);
        }
      }
      Inst::Print { src } | Inst::Ret { src } => {
        f(src, OperandMode::Use, stack)
      }
      Inst::CondBr { cond, .. } => f(cond, OperandMode::Use, OperandFlags::NONE),
      Inst::Label
      | Inst::Goto { .. }
      | Inst::Spill { .. }
      | Inst::Reload { .. }
      | Inst::Move { .. }
      | Inst::Materialize { .. } => {}
    }
  }

  pub fn targets(&self) -> Vec<BlockIx> {
    match self {
      Inst::Goto { target } => vec![*target],
      Inst::CondBr { taken, not_taken, .. } => vec![*taken, *not_taken],
      _ => vec![],
    }
  }

  pub fn is_terminator(&self) -> bool {
    matches!(self, Inst::Goto { .. } | Inst::CondBr { .. } | Inst::Ret { .. })
  }
}

//=============================================================================
// Definition of Block and Func, and printing thereof.

#[derive(Clone, Debug)]
pub struct Block {
  pub name: String,
  pub start: InstIx,
  pub len: u32,
}

#[derive(Clone)]
pub struct Func {
  pub name: String,
  pub num_virtual_regs: u32,
  /// How many incoming argument slots the function reads.
  pub num_args: u32,
  pub insns: TypedIxVec<InstIx, Inst>,
  /// In order of increasing `Block::start`; block 0 is the entry.
  pub blocks: TypedIxVec<BlockIx, Block>,
}

impl fmt::Debug for Func {
  fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
    writeln!(fmt, "func {} ({} args) {{", self.name, self.num_args)?;
    for (bix, block) in self.blocks.iter_ix() {
      writeln!(fmt, "  {:?}:{}", bix, block.name)?;
      for i in block.start.get()..block.start.get() + block.len {
        let iix = InstIx::new(i);
        writeln!(fmt, "      {:<4?} {:?}", iix, self.insns[iix])?;
      }
    }
    write!(fmt, "}}")
  }
}

impl Func {
  /// The allocated version of this function.
  pub fn update_from_alloc(&self, result: &RegAllocResult<Func>) -> Func {
    let insns = TypedIxVec::from_vec(result.insns.clone());
    let num_blocks = self.blocks.len();
    let mut blocks = TypedIxVec::new();
    for (bix, block) in self.blocks.iter_ix() {
      let start = result.target_map[bix];
      let end = if bix.get() + 1 < num_blocks {
        result.target_map[bix.plus(1)].get()
      } else {
        insns.len()
      };
      blocks.push(Block {
        name: block.name.clone(),
        start,
        len: end - start.get(),
      });
    }
    Func {
      name: self.name.clone(),
      num_virtual_regs: self.num_virtual_regs,
      num_args: self.num_args,
      insns,
      blocks,
    }
  }

  /// Blocks in reverse postorder, from the entry.
  pub fn reverse_postorder(&self) -> Vec<BlockIx> {
    let num_blocks = self.blocks.len() as usize;
    let mut visited = vec![false; num_blocks];
    let mut post = Vec::new();
    let entry = BlockIx::new(0);
    let mut stack = vec![(entry, 0)];
    visited[0] = true;
    while let Some((block, next)) = stack.pop() {
      let succs = self.succs(block);
      if next < succs.len() {
        stack.push((block, next + 1));
        let succ = succs[next];
        if !visited[succ.get() as usize] {
          visited[succ.get() as usize] = true;
          stack.push((succ, 0));
        }
      } else {
        post.push(block);
      }
    }
    post.reverse();
    post
  }

  fn succs(&self, block: BlockIx) -> Vec<BlockIx> {
    let b = &self.blocks[block];
    let last = b.start.plus(b.len - 1);
    self.insns[last].targets()
  }

  fn preds(&self) -> TypedIxVec<BlockIx, Vec<BlockIx>> {
    let mut preds = TypedIxVec::from_elem(Vec::new(), self.blocks.len());
    for (bix, _) in self.blocks.iter_ix() {
      for succ in self.succs(bix) {
        if !preds[succ].contains(&bix) {
          preds[succ].push(bix);
        }
      }
    }
    preds
  }
}

//=============================================================================
// Trace partitions.

/// Greedy traces: starting from every block not yet taken, in reverse
/// postorder, keep appending the first successor that has the current block
/// as its only predecessor.
pub fn linear_traces(func: &Func) -> Vec<Vec<BlockIx>> {
  let preds = func.preds();
  let mut taken = vec![false; func.blocks.len() as usize];
  let mut traces = Vec::new();
  for block in func.reverse_postorder() {
    if taken[block.get() as usize] {
      continue;
    }
    taken[block.get() as usize] = true;
    let mut trace = vec![block];
    let mut cur = block;
    while let Some(next) = func.succs(cur).into_iter().find(|succ| {
      !taken[succ.get() as usize] && preds[*succ] == [cur]
    }) {
      taken[next.get() as usize] = true;
      trace.push(next);
      cur = next;
    }
    traces.push(trace);
  }
  traces
}

/// Every block is a trace of its own.
pub fn block_traces(func: &Func) -> Vec<Vec<BlockIx>> {
  func.reverse_postorder().into_iter().map(|block| vec![block]).collect()
}

//=============================================================================
// The interpreter

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunResult {
  pub num_steps: usize,
  pub ret_value: i64,
  pub stdout: Vec<i64>,
}

struct IState<'a> {
  func: &'a Func,
  rru: &'a RealRegUniverse,
  nia: InstIx, // Program counter ("next instruction address")
  vregs: Map<VirtualReg, i64>,
  rregs: Vec<Option<i64>>,
  slots: Map<StackSlot, i64>,
  num_steps: usize,
  stdout: Vec<i64>,
}

impl<'a> IState<'a> {
  fn get(&self, opnd: Opnd) -> Result<i64, String> {
    let value = match opnd {
      Opnd::V(vreg) => self.vregs.get(&vreg).cloned(),
      Opnd::R(reg) => self.rregs.get(reg.get_index()).cloned().flatten(),
      Opnd::S(slot) => self.slots.get(&slot).cloned(),
      Opnd::C(value) => Some(value),
    };
    value.ok_or_else(|| {
      format!("read of undefined {:?} at {:?}", opnd, self.nia.minus(1))
    })
  }

  fn set(&mut self, opnd: Opnd, value: i64) -> Result<(), String> {
    match opnd {
      Opnd::V(vreg) => {
        self.vregs.insert(vreg, value);
      }
      Opnd::R(reg) => match self.rregs.get_mut(reg.get_index()) {
        Some(slot) => *slot = Some(value),
        None => return Err(format!("invalid register {:?}", reg)),
      },
      Opnd::S(slot) => {
        self.slots.insert(slot, value);
      }
      Opnd::C(_) => return Err(format!("write to constant {:?}", opnd)),
    }
    Ok(())
  }

  fn jump(&mut self, target: BlockIx) {
    self.nia = self.func.blocks[target].start;
  }

  /// Moves the interpreter one step forward; returns the result once the
  /// function returns.
  fn step(&mut self) -> Result<Option<i64>, String> {
    let iix = self.nia;
    self.nia = iix.plus(1);
    self.num_steps += 1;

    let func = self.func;
    let insn = match func.insns.get(iix) {
      Some(insn) => insn,
      None => return Err(format!("fell off the end at {:?}", iix)),
    };
    match insn {
      Inst::Label => {}
      Inst::Imm { dst, imm } | Inst::Materialize { dst, imm } => {
        self.set(*dst, *imm)?
      }
      Inst::Copy { dst, src } => {
        let value = self.get(*src)?;
        self.set(*dst, value)?;
      }
      Inst::BinOp { op, dst, lhs, rhs } => {
        let value = op.calc(self.get(*lhs)?, self.get(*rhs)?);
        self.set(*dst, value)?;
      }
      Inst::Call { dst, args } => {
        let mut hash = 17i64;
        for arg in args {
          hash = hash.wrapping_mul(31).wrapping_add(self.get(*arg)?);
        }
        // The callee is free to overwrite these.
        for (i, reg) in self.rru.caller_saved.iter().enumerate() {
          self.rregs[reg.get_index()] =
            Some(0x0bad_0000 + (self.num_steps * 64 + i) as i64);
        }
        if let Some(dst) = dst {
          self.set(*dst, hash)?;
        }
      }
      Inst::Safepoint { state } => {
        for value in state {
          self.get(*value)?;
        }
      }
      Inst::Print { src } => {
        let value = self.get(*src)?;
        self.stdout.push(value);
      }
      Inst::Goto { target } => self.jump(*target),
      Inst::CondBr { cond, taken, not_taken } => {
        let target = if self.get(*cond)? != 0 { *taken } else { *not_taken };
        self.jump(target);
      }
      Inst::Ret { src } => return Ok(Some(self.get(*src)?)),
      Inst::Spill { dst, src } => {
        let value = self.get(Opnd::R(*src))?;
        self.set(Opnd::S(*dst), value)?;
      }
      Inst::Reload { dst, src } => {
        let value = self.get(Opnd::S(*src))?;
        self.set(Opnd::R(*dst), value)?;
      }
      Inst::Move { dst, src } => {
        let value = self.get(Opnd::R(*src))?;
        self.set(Opnd::R(*dst), value)?;
      }
    }
    Ok(None)
  }
}

pub const DEFAULT_MAX_STEPS: usize = 100_000;

/// Runs `func` with the given incoming arguments.  Works on virtual and on
/// allocated code alike; reading anything never written is an error.
pub fn run_func(
  func: &Func, args: &[i64], rru: &RealRegUniverse, max_steps: usize,
) -> Result<RunResult, String> {
  let mut state = IState {
    func,
    rru,
    nia: func.blocks[BlockIx::new(0)].start,
    vregs: Map::default(),
    rregs: vec![None; rru.regs.len()],
    slots: Map::default(),
    num_steps: 0,
    stdout: Vec::new(),
  };
  for (n, arg) in args.iter().enumerate() {
    state.slots.insert(StackSlot::Incoming(n as u32), *arg);
  }

  loop {
    if state.num_steps >= max_steps {
      return Err(format!("{}: no result after {} steps", func.name, max_steps));
    }
    if let Some(ret_value) = state.step()? {
      return Ok(RunResult {
        num_steps: state.num_steps,
        ret_value,
        stdout: state.stdout,
      });
    }
  }
}

//=============================================================================
// The "blockifier".  This is just to make it easier to write test cases, by
// allowing direct use of if-then-else, while-do and repeat-until.  It is
// otherwise entirely unrelated to the register allocator proper.

pub enum Stmt {
  Vanilla { insn: Inst },
  IfThenElse { cond: Opnd, stmts_t: Vec<Stmt>, stmts_e: Vec<Stmt> },
  RepeatUntil { stmts: Vec<Stmt>, cond: Opnd },
  WhileDo { cond: Opnd, stmts: Vec<Stmt> },
}

pub fn s_if_then_else(
  cond: Opnd, stmts_t: Vec<Stmt>, stmts_e: Vec<Stmt>,
) -> Stmt {
  Stmt::IfThenElse { cond, stmts_t, stmts_e }
}
pub fn s_if_then(cond: Opnd, stmts_t: Vec<Stmt>) -> Stmt {
  Stmt::IfThenElse { cond, stmts_t, stmts_e: vec![] }
}
pub fn s_repeat_until(stmts: Vec<Stmt>, cond: Opnd) -> Stmt {
  Stmt::RepeatUntil { stmts, cond }
}
pub fn s_while_do(cond: Opnd, stmts: Vec<Stmt>) -> Stmt {
  Stmt::WhileDo { cond, stmts }
}
pub fn s(insn: Inst) -> Stmt {
  Stmt::Vanilla { insn }
}

pub struct Blockifier {
  name: String,
  blocks: Vec<Vec<Inst>>,
  num_virtual_regs: u32,
  num_args: u32,
}

impl Blockifier {
  pub fn new(name: &str) -> Self {
    Self { name: name.to_string(), blocks: vec![], num_virtual_regs: 0, num_args: 0 }
  }

  // Get a new VirtualReg name
  pub fn new_virtual_reg(&mut self, rc: RegClass) -> Opnd {
    let v = VirtualReg::new(rc, self.num_virtual_regs);
    self.num_virtual_regs += 1;
    Opnd::V(v)
  }

  pub fn new_vreg(&mut self) -> Opnd {
    self.new_virtual_reg(RegClass::I64)
  }

  /// The next incoming argument slot.
  pub fn new_arg(&mut self) -> Opnd {
    let slot = StackSlot::Incoming(self.num_args);
    self.num_args += 1;
    Opnd::S(slot)
  }

  fn new_block(&mut self) -> usize {
    self.blocks.push(vec![Inst::Label]);
    self.blocks.len() - 1
  }

  fn target(n: usize) -> BlockIx {
    BlockIx::new(n as u32)
  }

  // Recursive worker function, which flattens out the control flow,
  // producing a set of blocks.  Every block gets a label; no edge is
  // critical.
  fn blockify(&mut self, stmts: Vec<Stmt>) -> (usize, usize) {
    let entry = self.new_block();
    let mut curr = entry;
    for stmt in stmts {
      match stmt {
        Stmt::Vanilla { insn } => {
          self.blocks[curr].push(insn);
        }
        Stmt::IfThenElse { cond, stmts_t, stmts_e } => {
          let (t_ent, t_exit) = self.blockify(stmts_t);
          let (e_ent, e_exit) = self.blockify(stmts_e);
          let cont = self.new_block();
          self.blocks[t_exit].push(Inst::Goto { target: Self::target(cont) });
          self.blocks[e_exit].push(Inst::Goto { target: Self::target(cont) });
          self.blocks[curr].push(Inst::CondBr {
            cond,
            taken: Self::target(t_ent),
            not_taken: Self::target(e_ent),
          });
          curr = cont;
        }
        Stmt::RepeatUntil { stmts, cond } => {
          let (s_ent, s_exit) = self.blockify(stmts);
          self.blocks[curr].push(Inst::Goto { target: Self::target(s_ent) });
          let latch = self.new_block();
          self.blocks[latch].push(Inst::Goto { target: Self::target(s_ent) });
          let cont = self.new_block();
          self.blocks[s_exit].push(Inst::CondBr {
            cond,
            taken: Self::target(cont),
            not_taken: Self::target(latch),
          });
          curr = cont;
        }
        Stmt::WhileDo { cond, stmts } => {
          let cond_block = self.new_block();
          self.blocks[curr].push(Inst::Goto { target: Self::target(cond_block) });
          let (s_ent, s_exit) = self.blockify(stmts);
          self.blocks[s_exit].push(Inst::Goto { target: Self::target(cond_block) });
          let cont = self.new_block();
          self.blocks[cond_block].push(Inst::CondBr {
            cond,
            taken: Self::target(s_ent),
            not_taken: Self::target(cont),
          });
          curr = cont;
        }
      }
    }
    (entry, curr)
  }

  /// Converts the given statements, followed by a return of `ret`, into a
  /// Func.
  pub fn finish(mut self, stmts: Vec<Stmt>, ret: Opnd) -> Func {
    let (entry, exit) = self.blockify(stmts);
    debug_assert_eq!(entry, 0);
    self.blocks[exit].push(Inst::Ret { src: ret });

    let mut insns = TypedIxVec::new();
    let mut blocks = TypedIxVec::new();
    for (n, block_insns) in self.blocks.into_iter().enumerate() {
      let start = InstIx::new(insns.len());
      let len = block_insns.len() as u32;
      for insn in block_insns {
        insns.push(insn);
      }
      blocks.push(Block { name: format!("L{}", n), start, len });
    }

    Func {
      name: self.name,
      num_virtual_regs: self.num_virtual_regs,
      num_args: self.num_args,
      insns,
      blocks,
    }
  }
}

// --------------------------------------------------
// Implementation of `Function` trait for test cases.

impl trace_regalloc::Function for Func {
  type Inst = Inst;

  fn insns(&self) -> &[Inst] {
    self.insns.elems()
  }

  fn entry_block(&self) -> BlockIx {
    BlockIx::new(0)
  }

  fn blocks(&self) -> MyRange<BlockIx> {
    BlockIx::new(0).dotdot(BlockIx::new(self.blocks.len()))
  }

  /// Provide the range of instruction indices contained in each block.
  fn block_insns(&self, block: BlockIx) -> MyRange<InstIx> {
    let b = &self.blocks[block];
    b.start.dotdot(b.start.plus(b.len))
  }

  /// Get CFG successors: indexed by block, provide a list of successor blocks.
  fn block_succs(&self, block: BlockIx) -> Vec<BlockIx> {
    self.succs(block)
  }

  fn get_operands(&self, insn: &Inst) -> SmallVec<[Operand; 4]> {
    let mut operands = SmallVec::new();
    insn.clone().visit_operands(|opnd, mode, flags| {
      if let Some(value) = opnd.to_value() {
        operands.push(Operand::new(value, mode, flags));
      }
    });
    operands
  }

  fn is_label(&self, insn: &Inst) -> bool {
    matches!(insn, Inst::Label)
  }

  fn is_move(&self, insn: &Inst) -> Option<(Value, Value)> {
    match insn {
      Inst::Copy { dst, src } => Some((dst.to_value()?, src.to_value()?)),
      Inst::Imm { dst, imm } => Some((dst.to_value()?, Value::Const(*imm))),
      _ => None,
    }
  }

  fn destroys_caller_saved(&self, insn: &Inst) -> bool {
    matches!(insn, Inst::Call { .. })
  }

  fn map_operands(&self, insn: &mut Inst, locations: &[Location]) {
    let mut next = locations.iter();
    insn.visit_operands(|opnd, _, _| {
      if opnd.to_value().is_none() {
        return;
      }
      if let Some(mapped) = next.next().and_then(|l| Opnd::from_location(*l))
      {
        *opnd = mapped;
      }
    });
  }

  fn gen_spill(
    &self, to_slot: StackSlot, from_reg: RealReg, _for_vreg: VirtualReg,
  ) -> Inst {
    Inst::Spill { dst: to_slot, src: from_reg }
  }

  fn gen_reload(
    &self, to_reg: RealReg, from_slot: StackSlot, _for_vreg: VirtualReg,
  ) -> Inst {
    Inst::Reload { dst: to_reg, src: from_slot }
  }

  fn gen_move(
    &self, to_reg: RealReg, from_reg: RealReg, _for_vreg: VirtualReg,
  ) -> Inst {
    Inst::Move { dst: to_reg, src: from_reg }
  }

  fn gen_materialize(
    &self, to: Location, value: i64, _for_vreg: VirtualReg,
  ) -> Inst {
    match Opnd::from_location(to) {
      Some(dst) => Inst::Materialize { dst, imm: value },
      None => panic!("materializing {} into no location", value),
    }
  }
}

//=============================================================================
// Differential checking: the allocated function must compute what the
// original one does.

#[derive(Debug)]
pub enum CompareError {
  Alloc(RegAllocError),
  /// The allocated function failed to run.
  Run(String),
  Mismatch { before: RunResult, after: RunResult },
}

impl fmt::Display for CompareError {
  fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
    match self {
      CompareError::Alloc(err) => write!(fmt, "allocation failed: {}", err),
      CompareError::Run(msg) => write!(fmt, "allocated code failed: {}", msg),
      CompareError::Mismatch { before, after } => write!(
        fmt,
        "results differ: {:?} before allocation, {:?} after",
        before, after
      ),
    }
  }
}

pub struct Allocated {
  pub func: Func,
  pub result: RegAllocResult<Func>,
  pub run: RunResult,
}

/// Allocates `func` over `traces`, runs both versions with `args` and
/// compares return values and printed output.  `before` is the result of
/// running the original.
pub fn allocate_and_compare(
  func: &Func, traces: Vec<Vec<BlockIx>>, env: &RegEnv, opts: &Options,
  args: &[i64], before: &RunResult,
) -> Result<Allocated, CompareError> {
  let traces = TraceBuilderResult::new(func, traces)
    .map_err(|err| CompareError::Alloc(err.into()))?;
  let result = allocate_registers(func, &traces, env, opts)
    .map_err(CompareError::Alloc)?;
  let allocated = func.update_from_alloc(&result);

  // Allocated code may take more steps, because of the inserted moves.
  let max_steps = 4 * before.num_steps + DEFAULT_MAX_STEPS;
  let after = run_func(&allocated, args, &env.rru, max_steps)
    .map_err(CompareError::Run)?;
  if after.ret_value != before.ret_value || after.stdout != before.stdout {
    return Err(CompareError::Mismatch { before: before.clone(), after });
  }
  Ok(Allocated { func: allocated, result, run: after })
}

// Create a universe for testing, with `num_i64` I64 class regs and `num_f64`
// F64 class regs.  The first half of each class is caller-saved.

pub fn make_universe(num_i64: usize, num_f64: usize) -> RealRegUniverse {
  let total_regs = num_i64 + num_f64;
  if total_regs >= 256 {
    panic!("make_universe: too many regs, cannot represent");
  }

  let mut regs = Vec::<(RealReg, String)>::new();
  let mut allocable_by_class = [None; NUM_REG_CLASSES];
  let mut caller_saved = Vec::new();
  let mut index = 0u8;

  for &(rc, count, prefix) in
    &[(RegClass::I64, num_i64, "r"), (RegClass::F64, num_f64, "f")]
  {
    if count == 0 {
      continue;
    }
    let first = index as usize;
    for i in 0..count {
      let reg = RealReg::new(rc, index);
      regs.push((reg, format!("{}{}", prefix, i)));
      if i < count / 2 {
        caller_saved.push(reg);
      }
      index += 1;
    }
    let last = index as usize - 1;
    allocable_by_class[rc.rc_to_usize()] = Some(RegClassInfo { first, last });
  }

  let allocable = regs.len();
  RealRegUniverse { regs, allocable, allocable_by_class, caller_saved }
}
