/* -*- Mode: Rust; tab-width: 8; indent-tabs-mode: nil; rust-indent-offset: 2 -*-
 * vim: set ts=8 sts=2 et sw=2 tw=80:
*/

//! Checker: verifies the interval table of one trace after allocation.
//!
//! The walker is trusted to make no decision the table can't show, so the
//! checks are all about the table:
//!
//!   - every interval (split children included) got a location;
//!   - two intervals sharing a register never overlap, and an interval never
//!     overlaps the fixed interval of its register;
//!   - the parts of a split value cover exactly the lifetime it had before
//!     allocation;
//!   - every use that must be in a register is in one.

use log::{debug, info};

use std::fmt;

use crate::data_structures::{
  IntId, Location, Map, OpId, RealReg, RealRegUniverse, TraceIx, VirtualReg,
};
use crate::intervals::{first_intersection, LiveRange, RegisterPriority, TraceIntervals};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CheckerError {
  MissingLocation {
    vreg: VirtualReg,
    id: IntId,
  },
  Overlap {
    reg: RealReg,
    first: VirtualReg,
    second: VirtualReg,
    at: OpId,
  },
  FixedOverlap {
    reg: RealReg,
    vreg: VirtualReg,
    at: OpId,
  },
  CoverageMismatch {
    vreg: VirtualReg,
    before: Vec<LiveRange>,
    after: Vec<LiveRange>,
  },
  MustUseNotInRegister {
    vreg: VirtualReg,
    at: OpId,
    location: Location,
  },
}

impl fmt::Display for CheckerError {
  fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
    match self {
      CheckerError::MissingLocation { vreg, id } => {
        write!(fmt, "{:?} ({:?}) has no location", vreg, id)
      }
      CheckerError::Overlap { reg, first, second, at } => write!(
        fmt,
        "{:?} and {:?} both hold {:?} at {:?}",
        first, second, reg, at
      ),
      CheckerError::FixedOverlap { reg, vreg, at } => {
        write!(fmt, "{:?} holds the fixed register {:?} at {:?}", vreg, reg, at)
      }
      CheckerError::CoverageMismatch { vreg, before, after } => write!(
        fmt,
        "{:?} was live over {:?} and is now covered by {:?}",
        vreg, before, after
      ),
      CheckerError::MustUseNotInRegister { vreg, at, location } => write!(
        fmt,
        "{:?} must be in a register at {:?} but lives in {}",
        vreg, at, location
      ),
    }
  }
}

/// A list of errors detected by the checker.
#[derive(Clone, Debug)]
pub struct CheckerErrors {
  pub trace: TraceIx,
  pub errors: Vec<CheckerError>,
}

impl fmt::Display for CheckerErrors {
  fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
    write!(fmt, "{} error(s) in {:?}", self.errors.len(), self.trace)?;
    for err in &self.errors {
      write!(fmt, "; {}", err)?;
    }
    Ok(())
  }
}

/// The lifetimes of the values of a trace before allocation.
pub struct Snapshot {
  lifetimes: Map<VirtualReg, Vec<LiveRange>>,
}

pub fn snapshot(ints: &TraceIntervals) -> Snapshot {
  let mut lifetimes = Map::default();
  for root in ints.roots() {
    let interval = ints.var(root);
    lifetimes.insert(interval.vreg, merged(interval.ranges.clone()));
  }
  Snapshot { lifetimes }
}

/// Sorts `ranges` and joins the ones that touch.
fn merged(mut ranges: Vec<LiveRange>) -> Vec<LiveRange> {
  ranges.sort_by_key(|r| r.from);
  let mut result: Vec<LiveRange> = Vec::with_capacity(ranges.len());
  for range in ranges {
    match result.last_mut() {
      Some(last) if last.to >= range.from => {
        last.to = std::cmp::max(last.to, range.to);
      }
      _ => result.push(range),
    }
  }
  result
}

#[inline(never)]
pub fn check_trace(
  ints: &TraceIntervals, snapshot: &Snapshot, rru: &RealRegUniverse,
) -> Result<(), CheckerErrors> {
  info!("checker: {:?}", ints.trace);
  let mut errors = Vec::new();

  let mut by_reg: Map<RealReg, Vec<IntId>> = Map::default();
  for interval in ints.vars.iter() {
    match interval.location {
      Location::None => errors.push(CheckerError::MissingLocation {
        vreg: interval.vreg,
        id: interval.id,
      }),
      Location::Reg(reg) => by_reg.entry(reg).or_default().push(interval.id),
      Location::Stack(_) | Location::Const(_) => {}
    }

    for use_pos in &interval.uses {
      if use_pos.priority == RegisterPriority::MustHaveRegister
        && interval.location.reg().is_none()
      {
        errors.push(CheckerError::MustUseNotInRegister {
          vreg: interval.vreg,
          at: use_pos.pos,
          location: interval.location,
        });
      }
    }
  }

  let mut regs: Vec<_> = by_reg.keys().cloned().collect();
  regs.sort();
  for reg in regs {
    let holders = &by_reg[&reg];
    if rru.is_allocable(reg) {
      for &id in holders {
        let interval = ints.var(id);
        if let Some(at) = interval.intersects_with(&ints.fixed(reg).ranges) {
          errors.push(CheckerError::FixedOverlap {
            reg,
            vreg: interval.vreg,
            at,
          });
        }
      }
    }
    for (i, &first) in holders.iter().enumerate() {
      for &second in &holders[i + 1..] {
        let (a, b) = (ints.var(first), ints.var(second));
        if let Some(at) = first_intersection(&a.ranges, &b.ranges) {
          errors.push(CheckerError::Overlap {
            reg,
            first: a.vreg,
            second: b.vreg,
            at,
          });
        }
      }
    }
  }

  let mut roots: Vec<_> = ints.roots().collect();
  roots.sort();
  for root in roots {
    let vreg = ints.var(root).vreg;
    let after = merged(
      ints
        .family(root)
        .flat_map(|id| ints.var(id).ranges.iter().cloned())
        .collect(),
    );
    let before = snapshot.lifetimes.get(&vreg).cloned().unwrap_or_default();
    if before != after {
      errors.push(CheckerError::CoverageMismatch { vreg, before, after });
    }
  }

  if errors.is_empty() {
    debug!("checker: {:?} is fine", ints.trace);
    Ok(())
  } else {
    Err(CheckerErrors { trace: ints.trace, errors })
  }
}

#[cfg(test)]
mod test_utils {
  use super::*;
  use crate::data_structures::RegClass;

  pub fn universe() -> RealRegUniverse {
    let mut allocable_by_class = [None; crate::data_structures::NUM_REG_CLASSES];
    allocable_by_class[RegClass::I64.rc_to_usize()] =
      Some(crate::data_structures::RegClassInfo { first: 0, last: 1 });
    RealRegUniverse {
      regs: vec![
        (RealReg::new(RegClass::I64, 0), "r0".to_string()),
        (RealReg::new(RegClass::I64, 1), "r1".to_string()),
      ],
      allocable: 2,
      allocable_by_class,
      caller_saved: vec![],
    }
  }

  pub fn op(n: i32) -> OpId {
    OpId::new(n)
  }
}

#[test]
fn accepts_split_allocation() {
  use crate::data_structures::RegClass;
  use test_utils::*;
  let rru = universe();
  let mut ints = TraceIntervals::new(TraceIx::new(0), &rru);
  let v = VirtualReg::new(RegClass::I64, 0);
  let id = ints.get_or_create(v);
  let must = RegisterPriority::MustHaveRegister;
  ints.add_var_use(id, op(0), op(10), op(10), must).unwrap();
  ints.add_var_def(id, op(2), must).unwrap();
  ints.finish_build().unwrap();
  let snap = snapshot(&ints);

  let child = ints.split(id, op(5)).unwrap();
  ints.var_mut(id).location = Location::Reg(RealReg::new(RegClass::I64, 0));
  ints.var_mut(child).location = Location::Reg(RealReg::new(RegClass::I64, 1));
  assert!(check_trace(&ints, &snap, &rru).is_ok());
}

#[test]
fn rejects_shared_register() {
  use crate::data_structures::RegClass;
  use test_utils::*;
  let rru = universe();
  let mut ints = TraceIntervals::new(TraceIx::new(0), &rru);
  let none = RegisterPriority::None;
  let r0 = Location::Reg(RealReg::new(RegClass::I64, 0));
  let v0 = ints.get_or_create(VirtualReg::new(RegClass::I64, 0));
  let v1 = ints.get_or_create(VirtualReg::new(RegClass::I64, 1));
  ints.add_var_use(v0, op(0), op(8), op(8), none).unwrap();
  ints.add_var_def(v0, op(0), none).unwrap();
  ints.add_var_use(v1, op(0), op(6), op(6), none).unwrap();
  ints.add_var_def(v1, op(4), none).unwrap();
  ints.finish_build().unwrap();
  let snap = snapshot(&ints);
  ints.var_mut(v0).location = r0;
  ints.var_mut(v1).location = r0;

  let errors = check_trace(&ints, &snap, &rru).unwrap_err().errors;
  assert_eq!(errors.len(), 1);
  match &errors[0] {
    CheckerError::Overlap { at, .. } => assert_eq!(*at, op(4)),
    other => panic!("unexpected {:?}", other),
  }
}

#[test]
fn rejects_must_use_in_memory() {
  use crate::data_structures::{RegClass, SpillSlot, StackSlot};
  use test_utils::*;
  let rru = universe();
  let mut ints = TraceIntervals::new(TraceIx::new(0), &rru);
  let v = VirtualReg::new(RegClass::I64, 0);
  let id = ints.get_or_create(v);
  let must = RegisterPriority::MustHaveRegister;
  ints.add_var_use(id, op(0), op(6), op(6), must).unwrap();
  ints.add_var_def(id, op(2), RegisterPriority::None).unwrap();
  ints.finish_build().unwrap();
  let snap = snapshot(&ints);
  let slot = StackSlot::Spill(SpillSlot::new(0));
  ints.var_mut(id).location = Location::Stack(slot);

  let errors = check_trace(&ints, &snap, &rru).unwrap_err().errors;
  assert_eq!(
    errors,
    vec![CheckerError::MustUseNotInRegister {
      vreg: v,
      at: op(6),
      location: Location::Stack(slot)
    }]
  );
}

#[test]
fn rejects_missing_location() {
  use crate::data_structures::RegClass;
  use test_utils::*;
  let rru = universe();
  let mut ints = TraceIntervals::new(TraceIx::new(0), &rru);
  let id = ints.get_or_create(VirtualReg::new(RegClass::I64, 3));
  ints.add_var_def(id, op(0), RegisterPriority::None).unwrap();
  ints.finish_build().unwrap();
  let snap = snapshot(&ints);
  let errors = check_trace(&ints, &snap, &rru).unwrap_err();
  assert!(matches!(
    errors.errors[0],
    CheckerError::MissingLocation { .. }
  ));
}
