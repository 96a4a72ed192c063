/* -*- Mode: Rust; tab-width: 8; indent-tabs-mode: nil; rust-indent-offset: 2 -*-
 * vim: set ts=8 sts=2 et sw=2 tw=80:
*/

//! Generates random, well-formed functions for fuzzing.
//!
//! Control flow comes from the blockifier, so every generated function has
//! labels on all blocks and no critical edge.  Values are only read where a
//! definition reaches them on every path, and every loop is counted.

use arbitrary::{Arbitrary, Result, Unstructured};
use rustc_hash::FxHashSet;
use trace_regalloc::{RealReg, RegClass};

use crate::test_framework::{self as ir, *};

pub const NUM_REAL_REGS_PER_RC: usize = 4;

const MAX_DEPTH: u32 = 3;
const MAX_STMTS: u32 = 80;
const MAX_VIRTUAL_REGS: u32 = 48;
const MAX_ARGS: u8 = 3;
const MAX_TRIPS: u8 = 4;

struct FuzzingEnv {
  bif: Blockifier,
  num_virtual_regs: u32,
  num_stmts: u32,
  /// Values defined on every path reaching the current point.
  visible: Vec<(Opnd, RegClass)>,
  /// Loop counters, which are never redefined.
  protected: FxHashSet<Opnd>,
}

impl FuzzingEnv {
  fn reg_class(u: &mut Unstructured) -> Result<RegClass> {
    Ok(if u8::arbitrary(u)? % 4 == 0 { RegClass::F64 } else { RegClass::I64 })
  }

  fn imm(u: &mut Unstructured) -> Result<i64> {
    Ok(if bool::arbitrary(u)? {
      i64::from(i8::arbitrary(u)?)
    } else {
      i64::arbitrary(u)?
    })
  }

  fn new_vreg(&mut self, rc: RegClass) -> Opnd {
    self.num_virtual_regs += 1;
    let vreg = self.bif.new_virtual_reg(rc);
    self.visible.push((vreg, rc));
    vreg
  }

  fn candidates(&self, rc: RegClass) -> Vec<Opnd> {
    self
      .visible
      .iter()
      .filter(|(_, vrc)| *vrc == rc)
      .map(|(v, _)| *v)
      .collect()
  }

  fn get_vreg(&self, rc: RegClass, u: &mut Unstructured) -> Result<Option<Opnd>> {
    let regs = self.candidates(rc);
    if regs.is_empty() {
      return Ok(None);
    }
    Ok(Some(regs[usize::arbitrary(u)? % regs.len()]))
  }

  /// A readable operand: a visible value, or a constant.
  fn value(&self, rc: RegClass, u: &mut Unstructured) -> Result<Opnd> {
    if u8::arbitrary(u)? % 4 != 0 {
      if let Some(vreg) = self.get_vreg(rc, u)? {
        return Ok(vreg);
      }
    }
    Ok(Opnd::C(Self::imm(u)?))
  }

  /// A destination: a fresh value, or a visible one being redefined.
  fn def_reg(&mut self, rc: RegClass, u: &mut Unstructured) -> Result<Opnd> {
    let regs: Vec<Opnd> = self
      .candidates(rc)
      .into_iter()
      .filter(|v| !self.protected.contains(v))
      .collect();
    let fresh = regs.is_empty()
      || (self.num_virtual_regs < MAX_VIRTUAL_REGS && bool::arbitrary(u)?);
    Ok(if fresh {
      self.new_vreg(rc)
    } else {
      regs[usize::arbitrary(u)? % regs.len()]
    })
  }

  fn inst(&mut self, u: &mut Unstructured, out: &mut Vec<Stmt>) -> Result<()> {
    const NUM_VARIANTS: u8 = 7;

    let rc = Self::reg_class(u)?;
    let inst = match u8::arbitrary(u)? % NUM_VARIANTS {
      0 => {
        let imm = Self::imm(u)?;
        Inst::Imm { dst: self.def_reg(rc, u)?, imm }
      }
      1 => {
        let src = self.value(rc, u)?;
        Inst::Copy { dst: self.def_reg(rc, u)?, src }
      }
      2 => {
        let op = ir::BinOp::arbitrary(u)?;
        let lhs = self.value(rc, u)?;
        let rhs = self.value(rc, u)?;
        Inst::BinOp { op, dst: self.def_reg(rc, u)?, lhs, rhs }
      }
      3 => {
        let num_args = u8::arbitrary(u)? % 4;
        let mut args = Vec::new();
        for _ in 0..num_args {
          let rc = Self::reg_class(u)?;
          args.push(self.value(rc, u)?);
        }
        let dst = if bool::arbitrary(u)? {
          Some(self.def_reg(RegClass::I64, u)?)
        } else {
          None
        };
        Inst::Call { dst, args }
      }
      4 => Inst::Print { src: self.value(rc, u)? },
      5 => {
        let num_state = u8::arbitrary(u)? % 4;
        let mut state = Vec::new();
        for _ in 0..num_state {
          if let Some(vreg) = self.get_vreg(rc, u)? {
            state.push(vreg);
          }
        }
        Inst::Safepoint { state }
      }
      6 => {
        // A round trip through a fixed register, in adjacent instructions.
        let src = match self.get_vreg(RegClass::I64, u)? {
          Some(src) => src,
          None => return Ok(()),
        };
        let index = (u8::arbitrary(u)? as usize % NUM_REAL_REGS_PER_RC) as u8;
        let reg = Opnd::R(RealReg::new(RegClass::I64, index));
        out.push(s(Inst::Copy { dst: reg, src }));
        Inst::Copy { dst: self.def_reg(RegClass::I64, u)?, src: reg }
      }
      x => {
        debug_assert!(x < NUM_VARIANTS, "update NUM_VARIANTS above");
        unreachable!()
      }
    };
    out.push(s(inst));
    Ok(())
  }

  fn stmt(
    &mut self, u: &mut Unstructured, depth: u32, out: &mut Vec<Stmt>,
  ) -> Result<()> {
    if depth >= MAX_DEPTH || u8::arbitrary(u)? % 4 != 0 {
      return self.inst(u, out);
    }

    match u8::arbitrary(u)? % 3 {
      0 => {
        let cond = self.value(RegClass::I64, u)?;
        let num_visible = self.visible.len();
        let stmts_t = self.stmts(u, depth + 1)?;
        self.visible.truncate(num_visible);
        let stmts_e = self.stmts(u, depth + 1)?;
        self.visible.truncate(num_visible);
        out.push(s_if_then_else(cond, stmts_t, stmts_e));
      }
      1 => {
        // counter = 0; repeat { ...; counter += 1; done = counter > trips }
        let trips = i64::from(u8::arbitrary(u)? % MAX_TRIPS);
        let counter = self.new_vreg(RegClass::I64);
        out.push(s(i_imm(counter, 0)));
        self.protected.insert(counter);
        let mut body = self.stmts(u, depth + 1)?;
        self.protected.remove(&counter);
        let done = self.new_vreg(RegClass::I64);
        body.push(s(i_add(counter, counter, Opnd::C(1))));
        body.push(s(i_cmp_gt(done, counter, Opnd::C(trips))));
        out.push(s_repeat_until(body, done));
      }
      _ => {
        // counter = trips; while counter > 0 { ...; counter -= 1 }
        let trips = i64::from(u8::arbitrary(u)? % MAX_TRIPS);
        let counter = self.new_vreg(RegClass::I64);
        let cont = self.new_vreg(RegClass::I64);
        out.push(s(i_imm(counter, trips)));
        out.push(s(i_cmp_gt(cont, counter, Opnd::C(0))));
        let num_visible = self.visible.len();
        self.protected.insert(counter);
        self.protected.insert(cont);
        let mut body = self.stmts(u, depth + 1)?;
        self.protected.remove(&counter);
        self.protected.remove(&cont);
        self.visible.truncate(num_visible);
        body.push(s(i_sub(counter, counter, Opnd::C(1))));
        body.push(s(i_cmp_gt(cont, counter, Opnd::C(0))));
        out.push(s_while_do(cont, body));
      }
    }
    Ok(())
  }

  fn stmts(&mut self, u: &mut Unstructured, depth: u32) -> Result<Vec<Stmt>> {
    let mut out = Vec::new();
    let num_stmts = 1 + u8::arbitrary(u)? % 8;
    for _ in 0..num_stmts {
      if self.num_stmts >= MAX_STMTS {
        break;
      }
      self.num_stmts += 1;
      self.stmt(u, depth, &mut out)?;
    }
    Ok(out)
  }
}

impl<'a> Arbitrary<'a> for Func {
  fn arbitrary(u: &mut Unstructured<'a>) -> Result<Func> {
    let mut env = FuzzingEnv {
      bif: Blockifier::new("funk"),
      num_virtual_regs: 0,
      num_stmts: 0,
      visible: Vec::new(),
      protected: FxHashSet::default(),
    };

    // Arguments are copied out of their slots first, possibly over a value
    // defined in between.
    let mut stmts = Vec::new();
    for _ in 0..u8::arbitrary(u)? % (MAX_ARGS + 1) {
      let arg = env.bif.new_arg();
      let vreg = env.def_reg(RegClass::I64, u)?;
      stmts.push(s(i_copy(vreg, arg)));
      if bool::arbitrary(u)? {
        env.inst(u, &mut stmts)?;
      }
    }

    stmts.extend(env.stmts(u, 0)?);
    let ret = env.value(RegClass::I64, u)?;
    Ok(env.bif.finish(stmts, ret))
  }
}
