/* -*- Mode: Rust; tab-width: 8; indent-tabs-mode: nil; rust-indent-offset: 2 -*-
 * vim: set ts=8 sts=2 et sw=2 tw=80:
*/

//! Data structures for the whole crate.

use rustc_hash::{FxHashMap, FxHashSet};
#[cfg(feature = "enable-serde")]
use serde::{Deserialize, Serialize};

use std::fmt;
use std::marker::PhantomData;
use std::ops::{Index, IndexMut};
use std::slice::{Iter, IterMut};

//=============================================================================
// Maps and sets

pub type Map<K, V> = FxHashMap<K, V>;
pub type Set<T> = FxHashSet<T>;

//=============================================================================
// Iteration boilerplate for entities, until `trait Step` is stable:
//
//   for ent in first_ent.dotdot(end_plus1_ent) {
//   }

pub trait PlusOne {
  fn plus_one(&self) -> Self;
}

#[derive(Clone, Copy, PartialEq, Eq)]
pub struct MyRange<T> {
  first: T,
  last_plus1: T,
}

impl<T: Copy + PartialOrd + PlusOne + TypedIx> MyRange<T> {
  pub fn new(first: T, last_plus1: T) -> Self {
    debug_assert!(first <= last_plus1);
    Self { first, last_plus1 }
  }
  pub fn first(&self) -> T {
    debug_assert!(self.len() > 0);
    self.first
  }
  pub fn last(&self) -> T {
    debug_assert!(self.len() > 0);
    T::new(self.last_plus1.get() - 1)
  }
  pub fn last_plus1(&self) -> T {
    self.last_plus1
  }
  pub fn len(&self) -> usize {
    (self.last_plus1.get() - self.first.get()) as usize
  }
  pub fn contains(&self, item: T) -> bool {
    self.first <= item && item < self.last_plus1
  }
}

impl<T: Copy + PartialOrd + PlusOne> IntoIterator for MyRange<T> {
  type Item = T;
  type IntoIter = MyIterator<T>;
  fn into_iter(self) -> Self::IntoIter {
    MyIterator { range: self, next: self.first }
  }
}

pub struct MyIterator<T> {
  range: MyRange<T>,
  next: T,
}
impl<T: Copy + PartialOrd + PlusOne> Iterator for MyIterator<T> {
  type Item = T;
  fn next(&mut self) -> Option<Self::Item> {
    if self.next >= self.range.last_plus1 {
      None
    } else {
      let res = Some(self.next);
      self.next = self.next.plus_one();
      res
    }
  }
}

impl<T: fmt::Debug> fmt::Debug for MyRange<T> {
  fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
    write!(fmt, "[{:?}, {:?})", self.first, self.last_plus1)
  }
}

//=============================================================================
// Vectors where both the index and element types can be specified (and at
// most 2^32-1 elems can be stored).

pub trait TypedIx: Copy {
  fn new(n: u32) -> Self;
  fn get(self) -> u32;
}

#[derive(Clone, PartialEq)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub struct TypedIxVec<TyIx, Ty> {
  vek: Vec<Ty>,
  ty_ix: PhantomData<TyIx>,
}

impl<TyIx: TypedIx, Ty> TypedIxVec<TyIx, Ty> {
  pub fn new() -> Self {
    Self { vek: Vec::new(), ty_ix: PhantomData::<TyIx> }
  }
  pub fn from_vec(vek: Vec<Ty>) -> Self {
    Self { vek, ty_ix: PhantomData::<TyIx> }
  }
  pub fn iter(&self) -> Iter<Ty> {
    self.vek.iter()
  }
  pub fn iter_mut(&mut self) -> IterMut<Ty> {
    self.vek.iter_mut()
  }
  /// Iterates over (index, element) pairs.
  pub fn iter_ix(&self) -> impl Iterator<Item = (TyIx, &Ty)> {
    self.vek.iter().enumerate().map(|(i, t)| (TyIx::new(i as u32), t))
  }
  pub fn len(&self) -> u32 {
    self.vek.len() as u32
  }
  pub fn is_empty(&self) -> bool {
    self.vek.is_empty()
  }
  pub fn push(&mut self, item: Ty) -> TyIx {
    let ix = TyIx::new(self.vek.len() as u32);
    self.vek.push(item);
    ix
  }
  pub fn get(&self, ix: TyIx) -> Option<&Ty> {
    self.vek.get(ix.get() as usize)
  }
  pub fn elems(&self) -> &[Ty] {
    &self.vek
  }
}

impl<TyIx: TypedIx, Ty: Clone> TypedIxVec<TyIx, Ty> {
  pub fn from_elem(value: Ty, len: u32) -> Self {
    Self::from_vec(vec![value; len as usize])
  }
}

impl<TyIx: TypedIx, Ty> Index<TyIx> for TypedIxVec<TyIx, Ty> {
  type Output = Ty;
  fn index(&self, ix: TyIx) -> &Ty {
    &self.vek[ix.get() as usize]
  }
}

impl<TyIx: TypedIx, Ty> IndexMut<TyIx> for TypedIxVec<TyIx, Ty> {
  fn index_mut(&mut self, ix: TyIx) -> &mut Ty {
    &mut self.vek[ix.get() as usize]
  }
}

impl<TyIx, Ty: fmt::Debug> fmt::Debug for TypedIxVec<TyIx, Ty> {
  fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
    self.vek.fmt(fmt)
  }
}

//=============================================================================

macro_rules! generate_boilerplate {
  ($TypeIx:ident, $PrintingPrefix:expr) => {
    #[derive(Copy, Clone, Hash, PartialEq, Eq, PartialOrd, Ord)]
    #[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
    pub struct $TypeIx(u32);

    impl $TypeIx {
      pub fn new(n: u32) -> Self {
        $TypeIx(n)
      }
      pub fn get(self) -> u32 {
        self.0
      }
      pub fn plus(self, delta: u32) -> Self {
        $TypeIx(self.0 + delta)
      }
      pub fn minus(self, delta: u32) -> Self {
        $TypeIx(self.0 - delta)
      }
      pub fn dotdot(&self, last_plus1: Self) -> MyRange<Self> {
        MyRange::new(*self, last_plus1)
      }
    }
    impl TypedIx for $TypeIx {
      fn new(n: u32) -> Self {
        $TypeIx(n)
      }
      fn get(self) -> u32 {
        self.0
      }
    }
    impl PlusOne for $TypeIx {
      fn plus_one(&self) -> Self {
        self.plus(1)
      }
    }
    impl fmt::Debug for $TypeIx {
      fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, "{}{}", $PrintingPrefix, self.0)
      }
    }
  };
}

generate_boilerplate!(InstIx, "i");
generate_boilerplate!(BlockIx, "b");
generate_boilerplate!(TraceIx, "t");
generate_boilerplate!(IntId, "int");

//=============================================================================
// Operation ids.
//
// Instructions are numbered 0, 2, 4, ... in allocation order. Odd ids sit
// between two instructions; they are where split moves go. The fixed
// intervals start at the sentinel -1.

#[derive(Copy, Clone, Hash, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub struct OpId(i32);

impl OpId {
  pub const MIN: OpId = OpId(-1);
  pub const MAX: OpId = OpId(i32::MAX);

  pub fn new(id: i32) -> Self {
    OpId(id)
  }
  pub fn get(self) -> i32 {
    self.0
  }
  /// The id of the n-th instruction in allocation order.
  pub fn for_inst_number(n: usize) -> Self {
    OpId((n * 2) as i32)
  }
  /// Index into the allocation-order instruction list; only for even ids.
  pub fn inst_number(self) -> usize {
    debug_assert!(self.is_inst());
    (self.0 / 2) as usize
  }
  pub fn is_inst(self) -> bool {
    self.0 >= 0 && self.0 & 1 == 0
  }
  pub fn plus(self, delta: i32) -> Self {
    OpId(self.0 + delta)
  }
  pub fn minus(self, delta: i32) -> Self {
    OpId(self.0 - delta)
  }
  /// The odd position right before this one, or this one when already odd.
  pub fn gap_before(self) -> Self {
    OpId((self.0 - 1) | 1)
  }
  /// The even position (instruction) at or right after this one.
  pub fn inst_at_or_after(self) -> Self {
    OpId((self.0 + 1) & !1)
  }
}

impl fmt::Debug for OpId {
  fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
    if *self == OpId::MAX {
      write!(fmt, "#max")
    } else {
      write!(fmt, "#{}", self.0)
    }
  }
}

//=============================================================================
// Register classes, real and virtual registers.

#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub enum RegClass {
  I32 = 0,
  F32 = 1,
  I64 = 2,
  F64 = 3,
  V128 = 4,
}

pub const NUM_REG_CLASSES: usize = 5;

impl RegClass {
  pub fn rc_to_usize(self) -> usize {
    self as usize
  }
  pub fn short_name(self) -> &'static str {
    match self {
      RegClass::I32 => "I",
      RegClass::F32 => "F",
      RegClass::I64 => "J",
      RegClass::F64 => "D",
      RegClass::V128 => "V",
    }
  }
}

/// A physical register. `index` is its position in the `RealRegUniverse`.
#[derive(Copy, Clone, Hash, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub struct RealReg {
  class: RegClass,
  index: u8,
}

impl RealReg {
  pub fn new(class: RegClass, index: u8) -> Self {
    Self { class, index }
  }
  pub fn get_class(self) -> RegClass {
    self.class
  }
  pub fn get_index(self) -> usize {
    self.index as usize
  }
}

impl fmt::Debug for RealReg {
  fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
    write!(fmt, "%r{}{}", self.index, self.class.short_name())
  }
}

/// An abstract value of the LIR.
#[derive(Copy, Clone, Hash, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub struct VirtualReg {
  class: RegClass,
  index: u32,
}

impl VirtualReg {
  pub fn new(class: RegClass, index: u32) -> Self {
    Self { class, index }
  }
  pub fn get_class(self) -> RegClass {
    self.class
  }
  pub fn get_index(self) -> usize {
    self.index as usize
  }
}

impl fmt::Debug for VirtualReg {
  fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
    write!(fmt, "%v{}{}", self.index, self.class.short_name())
  }
}

//=============================================================================
// The real register universe: all the physical registers the client knows
// about, of which a prefix is available to the allocator.

#[derive(Clone, Copy, Debug)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub struct RegClassInfo {
  pub first: usize,
  pub last: usize,
}

#[derive(Clone, Debug)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub struct RealRegUniverse {
  /// The registers themselves, indexed by `RealReg::get_index`.
  pub regs: Vec<(RealReg, String)>,

  /// The first `allocable` registers of `regs` are available to the
  /// allocator; the rest may appear in instructions but are never assigned.
  pub allocable: usize,

  /// Per class, the contiguous range of allocatable registers in `regs`.
  pub allocable_by_class: [Option<RegClassInfo>; NUM_REG_CLASSES],

  /// Registers a call is free to overwrite.
  pub caller_saved: Vec<RealReg>,
}

impl RealRegUniverse {
  /// Checks the invariants the allocator relies upon.
  pub fn check_is_sane(&self) -> Result<(), String> {
    if self.allocable > self.regs.len() {
      return Err("more allocable registers than registers".into());
    }
    for (i, (reg, _name)) in self.regs.iter().enumerate() {
      if reg.get_index() != i {
        return Err(format!("{:?} is at index {}", reg, i));
      }
    }
    for rc in 0..NUM_REG_CLASSES {
      if let Some(info) = &self.allocable_by_class[rc] {
        if info.first > info.last || info.last >= self.allocable {
          return Err(format!("bad allocable range for class {}", rc));
        }
        for (reg, _) in &self.regs[info.first..=info.last] {
          if reg.get_class().rc_to_usize() != rc {
            return Err(format!("{:?} is in the wrong class range", reg));
          }
        }
      }
    }
    for reg in &self.caller_saved {
      if reg.get_index() >= self.regs.len() {
        return Err(format!("caller-saved {:?} is not in the universe", reg));
      }
    }
    Ok(())
  }

  pub fn is_allocable(&self, reg: RealReg) -> bool {
    reg.get_index() < self.allocable
  }

  pub fn is_caller_saved(&self, reg: RealReg) -> bool {
    self.caller_saved.contains(&reg)
  }

  /// The allocatable registers of one class, in universe order.
  pub fn allocable_regs(&self, rc: RegClass) -> &[(RealReg, String)] {
    match &self.allocable_by_class[rc.rc_to_usize()] {
      Some(info) => &self.regs[info.first..=info.last],
      None => &[],
    }
  }

  pub fn name(&self, reg: RealReg) -> &str {
    &self.regs[reg.get_index()].1
  }
}

//=============================================================================
// Stack slots and locations.

/// A slot in the allocator-managed spill area.
#[derive(Copy, Clone, Hash, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub struct SpillSlot(u32);

impl SpillSlot {
  pub fn new(n: u32) -> Self {
    SpillSlot(n)
  }
  pub fn get(self) -> u32 {
    self.0
  }
  pub fn inc(self, delta: u32) -> Self {
    SpillSlot(self.0 + delta)
  }
}

impl fmt::Debug for SpillSlot {
  fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
    write!(fmt, "S{}", self.0)
  }
}

/// Any stack location a value can live in.
#[derive(Copy, Clone, Hash, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub enum StackSlot {
  Spill(SpillSlot),
  /// An argument slot in the caller's frame.
  Incoming(u32),
}

impl fmt::Debug for StackSlot {
  fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
    match self {
      StackSlot::Spill(slot) => slot.fmt(fmt),
      StackSlot::Incoming(n) => write!(fmt, "A{}", n),
    }
  }
}

/// Where a value lives over some part of its lifetime.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub enum Location {
  None,
  Reg(RealReg),
  Stack(StackSlot),
  /// A constant that is re-issued wherever the value is needed.
  Const(i64),
}

impl Location {
  pub fn reg(&self) -> Option<RealReg> {
    match self {
      Location::Reg(reg) => Some(*reg),
      _ => None,
    }
  }
  pub fn stack(&self) -> Option<StackSlot> {
    match self {
      Location::Stack(slot) => Some(*slot),
      _ => None,
    }
  }
  pub fn is_none(&self) -> bool {
    matches!(self, Location::None)
  }
  pub fn is_memory(&self) -> bool {
    matches!(self, Location::Stack(_) | Location::Const(_))
  }
}

impl fmt::Display for Location {
  fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
    match self {
      Location::None => write!(fmt, "none"),
      Location::Reg(reg) => write!(fmt, "{:?}", reg),
      Location::Stack(slot) => write!(fmt, "{:?}", slot),
      Location::Const(value) => write!(fmt, "${}", value),
    }
  }
}

#[test]
fn op_id_gaps() {
  assert_eq!(OpId::new(8).gap_before(), OpId::new(7));
  assert_eq!(OpId::new(7).gap_before(), OpId::new(7));
  assert_eq!(OpId::new(7).inst_at_or_after(), OpId::new(8));
  assert_eq!(OpId::new(8).inst_at_or_after(), OpId::new(8));
  assert_eq!(OpId::for_inst_number(3), OpId::new(6));
  assert_eq!(OpId::new(6).inst_number(), 3);
  assert!(!OpId::MIN.is_inst());
}

#[test]
fn block_ranges() {
  let range = InstIx::new(3).dotdot(InstIx::new(6));
  assert_eq!(range.len(), 3);
  assert_eq!(range.first(), InstIx::new(3));
  assert_eq!(range.last(), InstIx::new(5));
  assert!(range.contains(InstIx::new(4)));
  assert!(!range.contains(InstIx::new(6)));
  let all: Vec<_> = range.into_iter().collect();
  assert_eq!(all, vec![InstIx::new(3), InstIx::new(4), InstIx::new(5)]);
}
