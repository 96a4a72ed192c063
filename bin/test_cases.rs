/* -*- Mode: Rust; tab-width: 8; indent-tabs-mode: nil; rust-indent-offset: 2 -*-
 * vim: set ts=8 sts=2 et sw=2 tw=80:
*/

/// Test cases.  The list of them is right at the bottom, function |find_func|.
/// Add new ones there.
use trace_regalloc::{RealReg, RegClass};

use crate::test_framework::*;

/// One block: a copied constant, two prints, an add and a return.
fn test_straight_line() -> Func {
  let mut bif = Blockifier::new("straight_line");
  let v0 = bif.new_vreg();
  let v1 = bif.new_vreg();
  let stmts = vec![
    s(i_copy(v0, Opnd::C(7))),
    s(i_print(Opnd::C(1))),
    s(i_print(Opnd::C(2))),
    s(i_add(v1, v0, Opnd::C(1))),
  ];
  bif.finish(stmts, v1)
}

fn test_sum_loop() -> Func {
  let mut bif = Blockifier::new("sum_loop");
  let i = bif.new_vreg();
  let sum = bif.new_vreg();
  let done = bif.new_vreg();
  let stmts = vec![
    s(i_imm(i, 0)),
    s(i_imm(sum, 0)),
    s_repeat_until(
      vec![
        s(i_add(sum, sum, i)),
        s(i_add(i, i, Opnd::C(1))),
        s(i_cmp_gt(done, i, Opnd::C(10))),
      ],
      done,
    ),
    s(i_print(sum)),
  ];
  bif.finish(stmts, sum)
}

/// Two nested repeat loops, with the outer counter live over the inner loop.
fn test_nested_loops() -> Func {
  let mut bif = Blockifier::new("nested_loops");
  let i = bif.new_vreg();
  let j = bif.new_vreg();
  let sum = bif.new_vreg();
  let tmp = bif.new_vreg();
  let done = bif.new_vreg();
  let stmts = vec![
    s(i_imm(sum, 0)),
    s(i_imm(i, 0)),
    s_repeat_until(
      vec![
        s(i_imm(j, 0)),
        s_repeat_until(
          vec![
            s(i_mul(tmp, i, j)),
            s(i_add(sum, sum, tmp)),
            s(i_add(j, j, Opnd::C(1))),
            s(i_cmp_gt(done, j, Opnd::C(6))),
          ],
          done,
        ),
        s(i_add(sum, sum, i)),
        s(i_add(i, i, Opnd::C(1))),
        s(i_cmp_gt(done, i, Opnd::C(6))),
      ],
      done,
    ),
    s(i_print(sum)),
  ];
  bif.finish(stmts, sum)
}

/// Values defined before a diamond and read on both arms and after it.
fn test_diamond() -> Func {
  let mut bif = Blockifier::new("diamond");
  let a = bif.new_vreg();
  let b = bif.new_vreg();
  let c = bif.new_vreg();
  let cond = bif.new_vreg();
  let r = bif.new_vreg();
  let stmts = vec![
    s(i_imm(a, 5)),
    s(i_imm(b, 9)),
    s(i_cmp_gt(cond, b, a)),
    s_if_then_else(
      cond,
      vec![s(i_sub(c, b, a)), s(i_print(c))],
      vec![s(i_add(c, a, b))],
    ),
    s(i_mul(r, c, a)),
    s(i_add(r, r, b)),
    s(i_print(r)),
  ];
  bif.finish(stmts, r)
}

/// More simultaneously live values than registers, over a loop.
fn test_pressure() -> Func {
  let mut bif = Blockifier::new("pressure");
  let num_values = 10;
  let vals: Vec<Opnd> = (0..num_values).map(|_| bif.new_vreg()).collect();
  let i = bif.new_vreg();
  let sum = bif.new_vreg();
  let done = bif.new_vreg();

  let mut stmts = Vec::new();
  for (n, v) in vals.iter().enumerate() {
    stmts.push(s(i_imm(*v, 3 * n as i64 + 1)));
  }
  stmts.push(s(i_imm(i, 0)));
  stmts.push(s(i_imm(sum, 0)));
  let mut body = Vec::new();
  for v in &vals {
    body.push(s(i_add(sum, sum, *v)));
    body.push(s(i_add(*v, *v, i)));
  }
  body.push(s(i_add(i, i, Opnd::C(1))));
  body.push(s(i_cmp_gt(done, i, Opnd::C(4))));
  stmts.push(s_repeat_until(body, done));
  for v in &vals {
    stmts.push(s(i_print(*v)));
  }
  bif.finish(stmts, sum)
}

/// Values live across calls, which destroy the caller-saved registers.
fn test_calls() -> Func {
  let mut bif = Blockifier::new("calls");
  let a = bif.new_vreg();
  let b = bif.new_vreg();
  let c = bif.new_vreg();
  let d = bif.new_vreg();
  let r = bif.new_vreg();
  let stmts = vec![
    s(i_imm(a, 11)),
    s(i_imm(b, 22)),
    s(i_add(c, a, b)),
    s(i_call(Some(d), vec![a, c])),
    s(i_add(r, d, b)),
    s(i_call(None, vec![r])),
    s(i_add(r, r, a)),
    s(i_add(r, r, c)),
    s(i_print(r)),
  ];
  bif.finish(stmts, r)
}

/// Incoming stack arguments, one of which is only read late.
fn test_stack_args() -> Func {
  let mut bif = Blockifier::new("stack_args");
  let arg0 = bif.new_arg();
  let arg1 = bif.new_arg();
  let x = bif.new_vreg();
  let y = bif.new_vreg();
  let i = bif.new_vreg();
  let acc = bif.new_vreg();
  let done = bif.new_vreg();
  let stmts = vec![
    s(i_copy(x, arg0)),
    s(i_copy(y, arg1)),
    s(i_imm(i, 0)),
    s(i_imm(acc, 1)),
    s_repeat_until(
      vec![
        s(i_mul(acc, acc, x)),
        s(i_add(i, i, Opnd::C(1))),
        s(i_cmp_gt(done, i, Opnd::C(3))),
      ],
      done,
    ),
    s(i_add(acc, acc, y)),
    s(i_print(acc)),
  ];
  bif.finish(stmts, acc)
}

/// Constants read by memory-tolerant and by register-only instructions.
fn test_constants() -> Func {
  let mut bif = Blockifier::new("constants");
  let k1 = bif.new_vreg();
  let k2 = bif.new_vreg();
  let k3 = bif.new_vreg();
  let k4 = bif.new_vreg();
  let x = bif.new_vreg();
  let stmts = vec![
    s(i_imm(k1, 100)),
    s(i_imm(k2, 7)),
    s(i_imm(k3, -3)),
    s(i_imm(k4, 5)),
    s(i_print(k1)),
    s(i_print(k1)),
    s(i_add(x, k2, k1)),
    s(i_call(None, vec![k3, k4])),
    s(i_mul(x, x, k2)),
    s(i_add(x, x, k3)),
    s(i_add(x, k4, x)),
    s(i_print(k1)),
  ];
  bif.finish(stmts, x)
}

/// Constants only read by register operands and call arguments, live over a
/// loop and a call.
fn test_rematerialize() -> Func {
  let mut bif = Blockifier::new("rematerialize");
  let k1 = bif.new_vreg();
  let k2 = bif.new_vreg();
  let k3 = bif.new_vreg();
  let i = bif.new_vreg();
  let sum = bif.new_vreg();
  let t = bif.new_vreg();
  let done = bif.new_vreg();
  let stmts = vec![
    s(i_imm(k1, 11)),
    s(i_imm(k2, -4)),
    s(i_imm(k3, 7)),
    s(i_imm(i, 0)),
    s(i_imm(sum, 0)),
    s_repeat_until(
      vec![
        s(i_add(t, k1, i)),
        s(i_add(sum, t, sum)),
        s(i_mul(t, k2, sum)),
        s(i_call(None, vec![k3, t])),
        s(i_add(sum, k3, t)),
        s(i_add(i, i, Opnd::C(1))),
        s(i_cmp_gt(done, i, Opnd::C(3))),
      ],
      done,
    ),
    s(i_print(sum)),
  ];
  bif.finish(stmts, sum)
}

/// An argument copy that redefines a value, which is redefined again in a
/// loop.
fn test_arg_redefined() -> Func {
  let mut bif = Blockifier::new("arg_redefined");
  let arg0 = bif.new_arg();
  let x = bif.new_vreg();
  let i = bif.new_vreg();
  let done = bif.new_vreg();
  let stmts = vec![
    s(i_imm(x, 1)),
    s(i_print(x)),
    s(i_copy(x, arg0)),
    s(i_print(x)),
    s(i_imm(i, 0)),
    s_repeat_until(
      vec![
        s(i_add(x, x, i)),
        s(i_add(i, i, Opnd::C(1))),
        s(i_cmp_gt(done, i, Opnd::C(3))),
      ],
      done,
    ),
    s(i_print(x)),
  ];
  bif.finish(stmts, x)
}

/// Values passing through a fixed register.
fn test_fixed_regs() -> Func {
  let mut bif = Blockifier::new("fixed_regs");
  let r0 = Opnd::R(RealReg::new(RegClass::I64, 0));
  let a = bif.new_vreg();
  let b = bif.new_vreg();
  let c = bif.new_vreg();
  let stmts = vec![
    s(i_imm(a, 40)),
    s(i_copy(r0, a)),
    s(i_copy(b, r0)),
    s(i_add(c, a, b)),
    s(i_copy(r0, Opnd::C(2))),
    s(i_copy(b, r0)),
    s(i_add(c, c, b)),
  ];
  bif.finish(stmts, c)
}

/// Loop-carried values kept available at a safepoint.
fn test_safepoints() -> Func {
  let mut bif = Blockifier::new("safepoints");
  let i = bif.new_vreg();
  let a = bif.new_vreg();
  let b = bif.new_vreg();
  let done = bif.new_vreg();
  let stmts = vec![
    s(i_imm(i, 0)),
    s(i_imm(a, 1)),
    s(i_imm(b, 1)),
    s_repeat_until(
      vec![
        s(i_add(b, b, a)),
        s(i_safepoint(vec![a, b, i])),
        s(i_sub(a, b, a)),
        s(i_add(i, i, Opnd::C(1))),
        s(i_cmp_gt(done, i, Opnd::C(8))),
      ],
      done,
    ),
    s(i_print(a)),
  ];
  bif.finish(stmts, b)
}

fn test_while_loop() -> Func {
  let mut bif = Blockifier::new("while_loop");
  let n = bif.new_vreg();
  let cont = bif.new_vreg();
  let acc = bif.new_vreg();
  let stmts = vec![
    s(i_imm(n, 9)),
    s(i_imm(acc, 0)),
    s(i_cmp_gt(cont, n, Opnd::C(0))),
    s_while_do(
      cont,
      vec![
        s_if_then(n, vec![s(i_add(acc, acc, n)), s(i_print(acc))]),
        s(i_sub(n, n, Opnd::C(1))),
        s(i_cmp_gt(cont, n, Opnd::C(0))),
      ],
    ),
  ];
  bif.finish(stmts, acc)
}

/// Values of both register classes, live together.
fn test_two_classes() -> Func {
  let mut bif = Blockifier::new("two_classes");
  let i = bif.new_vreg();
  let x = bif.new_virtual_reg(RegClass::F64);
  let y = bif.new_virtual_reg(RegClass::F64);
  let done = bif.new_vreg();
  let r = bif.new_vreg();
  let stmts = vec![
    s(i_imm(i, 0)),
    s(i_imm(x, 3)),
    s(i_imm(y, 1)),
    s_repeat_until(
      vec![
        s(i_mul(y, y, x)),
        s(i_add(x, x, Opnd::C(1))),
        s(i_add(i, i, Opnd::C(1))),
        s(i_cmp_gt(done, i, Opnd::C(4))),
      ],
      done,
    ),
    s(i_add(r, i, y)),
  ];
  bif.finish(stmts, r)
}

/// The incoming arguments the test cases are run with.
pub fn test_args(func: &Func) -> Vec<i64> {
  (0..func.num_args as i64).map(|n| 3 * n + 2).collect()
}

// This is the list of available tests.  This function returns either the
// requested Func, or if not found, a list of the available ones.
pub fn find_func(name: &str) -> Result<Func, Vec<String>> {
  let all_funcs = all_funcs();
  let all_names = all_funcs.iter().map(|func| func.name.clone()).collect();
  match all_funcs.into_iter().find(|func| func.name == name) {
    Some(func) => Ok(func),
    None => Err(all_names),
  }
}

pub fn all_funcs() -> Vec<Func> {
  vec![
    test_straight_line(),
    test_sum_loop(),
    test_nested_loops(),
    test_diamond(),
    test_pressure(),
    test_calls(),
    test_stack_args(),
    test_constants(),
    test_rematerialize(),
    test_arg_redefined(),
    test_fixed_regs(),
    test_safepoints(),
    test_while_loop(),
    test_two_classes(),
  ]
}
