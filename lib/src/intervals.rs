/* -*- Mode: Rust; tab-width: 8; indent-tabs-mode: nil; rust-indent-offset: 2 -*-
 * vim: set ts=8 sts=2 et sw=2 tw=80:
*/

//! The interval model of one trace.
//!
//! Intervals live in a per-trace arena and refer to each other by `IntId`:
//! split children point at their split parent (the root of the family), the
//! root keeps the list of its children sorted by start, and hints name
//! another interval of the same trace or a fixed register.

#[cfg(feature = "enable-serde")]
use serde::{Deserialize, Serialize};

use std::fmt;

use crate::data_structures::{
  IntId, Location, Map, OpId, RealReg, RealRegUniverse, StackSlot, TraceIx,
  TypedIxVec, VirtualReg,
};
use crate::interface::{OperandMode, RegAllocError};
use crate::spill_state::SpillTracker;

//=============================================================================
// Ranges and use positions

/// The half-open range `[from, to)` of op ids.
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub struct LiveRange {
  pub from: OpId,
  pub to: OpId,
}

impl LiveRange {
  pub fn new(from: OpId, to: OpId) -> Self {
    debug_assert!(from < to);
    Self { from, to }
  }
  pub fn contains(&self, op: OpId) -> bool {
    self.from <= op && op < self.to
  }
}

impl fmt::Debug for LiveRange {
  fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
    write!(fmt, "[{}, {})", self.from.get(), self.to.get())
  }
}

/// How badly a use wants a register.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub enum RegisterPriority {
  /// Memory is fine.
  None,
  /// A register is preferred, but the use also accepts a stack slot.
  ShouldHaveRegister,
  /// The use needs a register.
  MustHaveRegister,
}

#[derive(Copy, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub struct UsePosition {
  pub pos: OpId,
  pub priority: RegisterPriority,
}

impl fmt::Debug for UsePosition {
  fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
    let p = match self.priority {
      RegisterPriority::None => "n",
      RegisterPriority::ShouldHaveRegister => "s",
      RegisterPriority::MustHaveRegister => "m",
    };
    write!(fmt, "{}:{}", self.pos.get(), p)
  }
}

/// The first position both range lists cover, if any.
pub fn first_intersection(a: &[LiveRange], b: &[LiveRange]) -> Option<OpId> {
  let (mut i, mut j) = (0, 0);
  while i < a.len() && j < b.len() {
    let (ra, rb) = (a[i], b[j]);
    if ra.to <= rb.from {
      i += 1;
    } else if rb.to <= ra.from {
      j += 1;
    } else {
      return Some(std::cmp::max(ra.from, rb.from));
    }
  }
  None
}

fn covers(ranges: &[LiveRange], op: OpId) -> bool {
  ranges.iter().any(|r| r.contains(op))
}

// Build-time helpers.  While building, range and use vectors are kept in
// descending order: the last element is the earliest one.

fn add_range(
  ranges: &mut Vec<LiveRange>, from: OpId, to: OpId,
) -> Result<(), RegAllocError> {
  let n = ranges.len();
  if n > 0 && ranges[n - 1].from <= to {
    let first = &mut ranges[n - 1];
    first.from = std::cmp::min(first.from, from);
    first.to = std::cmp::max(first.to, to);
    if n > 1 && ranges[n - 1].to > ranges[n - 2].from {
      return Err(RegAllocError::Internal(format!(
        "range [{:?}, {:?}) overlaps {:?}",
        from,
        to,
        ranges[n - 2]
      )));
    }
    return Ok(());
  }
  ranges.push(LiveRange::new(from, to));
  Ok(())
}

fn add_def(
  ranges: &mut Vec<LiveRange>, def_pos: OpId,
) -> Result<(), RegAllocError> {
  match ranges.last_mut() {
    Some(first) if first.from <= def_pos && def_pos < first.to => {
      // The value is not live before its definition.
      first.from = def_pos;
      Ok(())
    }
    Some(first) if first.to <= def_pos => Err(RegAllocError::Internal(
      format!(
        "definition at {:?} after the range {:?}; ranges must be built in \
         reverse order",
        def_pos, first
      ),
    )),
    _ => {
      // Dead definition: keep a minimal range so the value gets a location.
      ranges.push(LiveRange::new(def_pos, def_pos.plus(1)));
      Ok(())
    }
  }
}

//=============================================================================
// Intervals

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub enum Hint {
  Fixed(RealReg),
  Interval(IntId),
}

/// The occupancy of one physical register.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub struct FixedInterval {
  pub reg: RealReg,
  pub ranges: Vec<LiveRange>,
}

/// One abstract value, or a part of it after splitting.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub struct TraceInterval {
  pub id: IntId,
  pub vreg: VirtualReg,
  pub ranges: Vec<LiveRange>,
  pub uses: Vec<UsePosition>,
  pub location: Location,

  /// The root of the split family; `None` for the root itself.
  pub split_parent: Option<IntId>,
  /// On the root only: every split child, sorted by start.
  pub split_children: Vec<IntId>,

  pub hint: Option<Hint>,

  // The following are only meaningful on the root.
  pub spill: SpillTracker,
  pub spill_slot: Option<StackSlot>,
  /// The constant every definition of this value loads, when rematerializing
  /// it is allowed.
  pub materialized: Option<i64>,
  num_materialization_values: u32,
  /// Defined without any later use.
  pub dead: bool,
}

impl TraceInterval {
  fn new(id: IntId, vreg: VirtualReg) -> Self {
    Self {
      id,
      vreg,
      ranges: Vec::new(),
      uses: Vec::new(),
      location: Location::None,
      split_parent: None,
      split_children: Vec::new(),
      hint: None,
      spill: SpillTracker::new(),
      spill_slot: None,
      materialized: None,
      num_materialization_values: 0,
      dead: false,
    }
  }

  pub fn start(&self) -> OpId {
    self.ranges[0].from
  }

  pub fn end(&self) -> OpId {
    self.ranges[self.ranges.len() - 1].to
  }

  pub fn root(&self) -> IntId {
    self.split_parent.unwrap_or(self.id)
  }

  pub fn is_split_child(&self) -> bool {
    self.split_parent.is_some()
  }

  pub fn covers(&self, op: OpId) -> bool {
    covers(&self.ranges, op)
  }

  pub fn intersects_with(&self, ranges: &[LiveRange]) -> Option<OpId> {
    first_intersection(&self.ranges, ranges)
  }

  /// Like `covers`, but for a read: a range ending exactly at `op` still
  /// provides the value there.
  fn covers_for_mode(&self, op: OpId, mode: OperandMode) -> bool {
    match mode {
      OperandMode::Use => {
        self.ranges.iter().any(|r| r.from < op && op <= r.to) || self.covers(op)
      }
      OperandMode::Def
      | OperandMode::Temp
      | OperandMode::Alive
      | OperandMode::State => self.covers(op),
    }
  }

  /// The first use at or after `from` with at least `min` priority.
  pub fn next_usage(&self, min: RegisterPriority, from: OpId) -> OpId {
    self
      .uses
      .iter()
      .find(|u| u.pos >= from && u.priority >= min)
      .map(|u| u.pos)
      .unwrap_or(OpId::MAX)
  }

  pub fn first_usage(&self, min: RegisterPriority) -> OpId {
    self.next_usage(min, OpId::MIN)
  }

  /// The last use at or before `pos` with at least `min` priority.
  pub fn previous_usage(
    &self, min: RegisterPriority, pos: OpId,
  ) -> Option<OpId> {
    self
      .uses
      .iter()
      .rev()
      .find(|u| u.pos <= pos && u.priority >= min)
      .map(|u| u.pos)
  }

  /// The start of the first range beginning after `pos`.
  pub fn next_range_start_after(&self, pos: OpId) -> Option<OpId> {
    self.ranges.iter().map(|r| r.from).find(|from| *from > pos)
  }

  pub fn has_uses_with(&self, priority: RegisterPriority) -> bool {
    self.uses.iter().any(|u| u.priority == priority)
  }

  /// Records the constant a definition loads (`None` for any other
  /// definition).  A value defined twice is never rematerialized.
  pub fn add_materialization_value(&mut self, value: Option<i64>) {
    self.materialized =
      if self.num_materialization_values == 0 { value } else { None };
    self.num_materialization_values += 1;
  }

  fn add_use(&mut self, pos: OpId, priority: RegisterPriority) {
    if let Some(last) = self.uses.last_mut() {
      if last.pos == pos {
        last.priority = std::cmp::max(last.priority, priority);
        return;
      }
      debug_assert!(pos < last.pos);
    }
    self.uses.push(UsePosition { pos, priority });
  }
}

impl fmt::Display for TraceInterval {
  fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
    write!(fmt, "{:?} {:?}", self.id, self.vreg)?;
    if let Some(parent) = self.split_parent {
      write!(fmt, " (child of {:?})", parent)?;
    }
    write!(fmt, " {} {:?} uses {:?}", self.location, self.ranges, self.uses)?;
    if let Some(hint) = self.hint {
      write!(fmt, " hint {:?}", hint)?;
    }
    if let Some(value) = self.materialized {
      write!(fmt, " remat ${}", value)?;
    }
    if self.dead {
      write!(fmt, " dead")?;
    }
    Ok(())
  }
}

//=============================================================================
// The interval table of one trace

#[derive(Clone, Debug)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub struct TraceIntervals {
  pub trace: TraceIx,
  /// One per register of the universe, indexed by `RealReg::get_index`.
  pub fixed: Vec<FixedInterval>,
  pub vars: TypedIxVec<IntId, TraceInterval>,
  by_vreg: Map<VirtualReg, IntId>,
}

impl TraceIntervals {
  pub fn new(trace: TraceIx, rru: &RealRegUniverse) -> Self {
    let fixed = rru
      .regs
      .iter()
      .map(|(reg, _)| FixedInterval { reg: *reg, ranges: Vec::new() })
      .collect();
    Self { trace, fixed, vars: TypedIxVec::new(), by_vreg: Map::default() }
  }

  pub fn num_vars(&self) -> u32 {
    self.vars.len()
  }

  pub fn var(&self, id: IntId) -> &TraceInterval {
    &self.vars[id]
  }

  pub fn var_mut(&mut self, id: IntId) -> &mut TraceInterval {
    &mut self.vars[id]
  }

  pub fn fixed(&self, reg: RealReg) -> &FixedInterval {
    &self.fixed[reg.get_index()]
  }

  /// The root interval of `vreg`, if the trace mentions it.
  pub fn root_of_vreg(&self, vreg: VirtualReg) -> Option<IntId> {
    self.by_vreg.get(&vreg).cloned()
  }

  pub fn root_of(&self, id: IntId) -> IntId {
    self.vars[id].root()
  }

  pub fn root(&self, id: IntId) -> &TraceInterval {
    &self.vars[self.root_of(id)]
  }

  pub fn root_mut(&mut self, id: IntId) -> &mut TraceInterval {
    let root = self.root_of(id);
    &mut self.vars[root]
  }

  /// The root followed by its split children, in start order.
  pub fn family(&self, id: IntId) -> impl Iterator<Item = IntId> + '_ {
    let root = self.root_of(id);
    std::iter::once(root)
      .chain(self.vars[root].split_children.iter().cloned())
  }

  pub fn roots(&self) -> impl Iterator<Item = IntId> + '_ {
    self.by_vreg.values().cloned()
  }

  /// The part of `vreg` that holds it at `op`, for an access of the given
  /// mode.
  pub fn child_at(
    &self, vreg: VirtualReg, op: OpId, mode: OperandMode,
  ) -> Option<IntId> {
    let root = self.root_of_vreg(vreg)?;
    self.family(root).find(|id| self.vars[*id].covers_for_mode(op, mode))
  }

  pub fn location_at(
    &self, vreg: VirtualReg, op: OpId, mode: OperandMode,
  ) -> Location {
    match self.child_at(vreg, op, mode) {
      Some(id) => self.vars[id].location,
      None => Location::None,
    }
  }

  /// The register the hint of `id` points to, if any.
  pub fn hint_reg(&self, id: IntId) -> Option<RealReg> {
    let interval = &self.vars[id];
    match interval.hint? {
      Hint::Fixed(reg) => Some(reg),
      Hint::Interval(hinted) => {
        let hinted_vreg = self.vars[hinted].vreg;
        let at_start =
          self.child_at(hinted_vreg, interval.start(), OperandMode::Use);
        at_start
          .and_then(|member| self.vars[member].location.reg())
          .or_else(|| self.vars[hinted].location.reg())
      }
    }
  }

  //---------------------------------------------------------------------------
  // Building

  pub fn get_or_create(&mut self, vreg: VirtualReg) -> IntId {
    if let Some(id) = self.by_vreg.get(&vreg) {
      return *id;
    }
    let id = IntId::new(self.vars.len());
    self.vars.push(TraceInterval::new(id, vreg));
    self.by_vreg.insert(vreg, id);
    id
  }

  /// Adds `[from, to)` and a use at `use_pos`.  Calls have to come in
  /// non-increasing position order.
  pub fn add_var_use(
    &mut self, id: IntId, from: OpId, to: OpId, use_pos: OpId,
    priority: RegisterPriority,
  ) -> Result<(), RegAllocError> {
    let interval = &mut self.vars[id];
    add_range(&mut interval.ranges, from, to)?;
    interval.add_use(use_pos, priority);
    Ok(())
  }

  pub fn add_var_def(
    &mut self, id: IntId, def_pos: OpId, priority: RegisterPriority,
  ) -> Result<(), RegAllocError> {
    let interval = &mut self.vars[id];
    add_def(&mut interval.ranges, def_pos)?;
    interval.add_use(def_pos, priority);
    Ok(())
  }

  pub fn add_var_temp(
    &mut self, id: IntId, pos: OpId, priority: RegisterPriority,
  ) -> Result<(), RegAllocError> {
    self.add_var_use(id, pos, pos.plus(1), pos, priority)
  }

  pub fn add_fixed_range(
    &mut self, reg: RealReg, from: OpId, to: OpId,
  ) -> Result<(), RegAllocError> {
    add_range(&mut self.fixed[reg.get_index()].ranges, from, to)
  }

  pub fn add_fixed_def(
    &mut self, reg: RealReg, def_pos: OpId,
  ) -> Result<(), RegAllocError> {
    add_def(&mut self.fixed[reg.get_index()].ranges, def_pos)
  }

  /// Ends the reverse build: puts everything in ascending order and gives
  /// every fixed interval the `[-1, 0)` sentinel range.
  pub fn finish_build(&mut self) -> Result<(), RegAllocError> {
    for interval in self.vars.iter_mut() {
      interval.ranges.reverse();
      interval.uses.reverse();
      interval.spill.finish_build()?;
    }
    for fixed in self.fixed.iter_mut() {
      fixed.ranges.reverse();
      fixed.ranges.insert(0, LiveRange::new(OpId::MIN, OpId::new(0)));
    }
    Ok(())
  }

  //---------------------------------------------------------------------------
  // Splitting

  /// Splits `id` at `pos`: the part starting at `pos` becomes a new split
  /// child, which is returned.
  pub fn split(
    &mut self, id: IntId, pos: OpId,
  ) -> Result<IntId, RegAllocError> {
    let child_id = IntId::new(self.vars.len());
    let parent = &mut self.vars[id];
    if pos <= parent.start() || pos >= parent.end() {
      return Err(RegAllocError::Internal(format!(
        "splitting {} at {:?} leaves an empty part",
        parent, pos
      )));
    }

    let mut tail = Vec::new();
    let mut i = 0;
    while i < parent.ranges.len() && parent.ranges[i].to <= pos {
      i += 1;
    }
    if i < parent.ranges.len() {
      let straddling = parent.ranges[i];
      if straddling.from < pos {
        parent.ranges[i].to = pos;
        tail.push(LiveRange::new(pos, straddling.to));
        i += 1;
      }
      tail.extend(parent.ranges.drain(i..));
    }

    let first_tail_use = parent
      .uses
      .iter()
      .position(|u| u.pos >= pos)
      .unwrap_or(parent.uses.len());
    let tail_uses = parent.uses.split_off(first_tail_use);

    let root = parent.root();
    let mut child = TraceInterval::new(child_id, parent.vreg);
    child.ranges = tail;
    child.uses = tail_uses;
    child.split_parent = Some(root);
    child.hint = Some(Hint::Interval(id));
    let child_start = child.start();
    self.vars.push(child);

    let vars = &self.vars;
    let insert_at = vars[root]
      .split_children
      .iter()
      .position(|c| vars[*c].start() > child_start)
      .unwrap_or(vars[root].split_children.len());
    self.vars[root].split_children.insert(insert_at, child_id);
    Ok(child_id)
  }
}

#[cfg(test)]
fn test_intervals() -> TraceIntervals {
  use crate::data_structures::RegClass;
  let rru = RealRegUniverse {
    regs: vec![(RealReg::new(RegClass::I64, 0), "r0".to_string())],
    allocable: 1,
    allocable_by_class: [None; crate::data_structures::NUM_REG_CLASSES],
    caller_saved: vec![],
  };
  TraceIntervals::new(TraceIx::new(0), &rru)
}

#[test]
fn build_in_reverse() {
  use crate::data_structures::RegClass;
  let mut ints = test_intervals();
  let v = VirtualReg::new(RegClass::I64, 0);
  let id = ints.get_or_create(v);
  let op = OpId::new;
  let must = RegisterPriority::MustHaveRegister;

  // Block [0, 10): use at 8, def at 2.
  ints.add_var_use(id, op(0), op(8), op(8), must).unwrap();
  ints.add_var_def(id, op(2), must).unwrap();
  // An earlier dead definition.
  ints.add_var_def(id, op(0), RegisterPriority::None).unwrap();
  ints.finish_build().unwrap();

  let interval = ints.var(id);
  assert_eq!(
    interval.ranges,
    vec![LiveRange::new(op(0), op(1)), LiveRange::new(op(2), op(8))]
  );
  assert_eq!(interval.uses.len(), 3);
  assert_eq!(interval.first_usage(must), op(2));
  assert_eq!(interval.next_usage(must, op(3)), op(8));
  assert_eq!(interval.previous_usage(must, op(7)), Some(op(2)));
  assert_eq!(interval.next_usage(must, op(9)), OpId::MAX);
  assert!(!interval.covers(op(1)));
  assert_eq!(interval.next_range_start_after(op(1)), Some(op(2)));

  let fixed = ints.fixed(RealReg::new(RegClass::I64, 0));
  assert_eq!(fixed.ranges, vec![LiveRange::new(OpId::MIN, op(0))]);
}

#[test]
fn split_keeps_coverage() {
  use crate::data_structures::RegClass;
  let mut ints = test_intervals();
  let v = VirtualReg::new(RegClass::I64, 0);
  let id = ints.get_or_create(v);
  let op = OpId::new;
  let must = RegisterPriority::MustHaveRegister;
  ints.add_var_use(id, op(0), op(20), op(20), must).unwrap();
  ints.add_var_use(id, op(0), op(10), op(10), must).unwrap();
  ints.add_var_def(id, op(4), must).unwrap();
  ints.finish_build().unwrap();

  let child = ints.split(id, op(9)).unwrap();
  let grandchild = ints.split(child, op(15)).unwrap();
  assert_eq!(ints.var(id).ranges, vec![LiveRange::new(op(4), op(9))]);
  assert_eq!(ints.var(child).ranges, vec![LiveRange::new(op(9), op(15))]);
  assert_eq!(
    ints.var(grandchild).ranges,
    vec![LiveRange::new(op(15), op(20))]
  );
  assert_eq!(ints.var(id).split_children, vec![child, grandchild]);
  assert_eq!(ints.var(grandchild).split_parent, Some(id));
  assert_eq!(ints.var(grandchild).hint, Some(Hint::Interval(child)));
  assert_eq!(ints.var(child).uses.len(), 1);

  assert_eq!(ints.child_at(v, op(9), OperandMode::Use), Some(id));
  assert_eq!(ints.child_at(v, op(9), OperandMode::Def), Some(child));
  assert_eq!(ints.child_at(v, op(20), OperandMode::Use), Some(grandchild));
  assert_eq!(ints.child_at(v, op(2), OperandMode::Def), None);

  assert!(ints.split(grandchild, op(15)).is_err());
  assert!(ints.split(grandchild, op(20)).is_err());
}

#[test]
fn intersections() {
  let op = OpId::new;
  let a = vec![LiveRange::new(op(0), op(4)), LiveRange::new(op(10), op(14))];
  let b = vec![LiveRange::new(op(4), op(8)), LiveRange::new(op(12), op(20))];
  let c = vec![LiveRange::new(op(4), op(10))];
  assert_eq!(first_intersection(&a, &b), Some(op(12)));
  assert_eq!(first_intersection(&a, &c), None);
  assert_eq!(first_intersection(&b, &c), Some(op(4)));
}

#[test]
fn materialization_values() {
  use crate::data_structures::RegClass;
  let mut ints = test_intervals();
  let id = ints.get_or_create(VirtualReg::new(RegClass::I64, 3));
  ints.var_mut(id).add_materialization_value(Some(42));
  assert_eq!(ints.var(id).materialized, Some(42));
  ints.var_mut(id).add_materialization_value(Some(42));
  assert_eq!(ints.var(id).materialized, None);
}
