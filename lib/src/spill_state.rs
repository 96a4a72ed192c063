/* -*- Mode: Rust; tab-width: 8; indent-tabs-mode: nil; rust-indent-offset: 2 -*-
 * vim: set ts=8 sts=2 et sw=2 tw=80:
*/

//! Tracking of where a spilled value has to be stored to its slot.
//!
//! Every split parent carries a small state machine.  While building the
//! intervals (in reverse order) it learns whether the value has a single
//! definition; if so, a spilled value only needs one store, right after that
//! definition, and every other store into its slot can be elided.

use log::trace;
#[cfg(feature = "enable-serde")]
use serde::{Deserialize, Serialize};

use crate::data_structures::OpId;
use crate::interface::RegAllocError;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub enum SpillState {
  /// No definition seen yet.
  NoDefinitionFound,
  /// A single (logical) definition is known; nothing was spilled so far.
  NoSpillStore,
  /// Spilled: one store right after the definition, all others elided.
  StoreAtDefinition,
  /// The value lives in memory from its definition on.
  StartInMemory,
  /// Several definitions: every spill move stores.
  NoOptimization,
}

impl SpillState {
  /// The transitions the tracker is allowed to take.
  pub fn can_move_to(self, next: SpillState) -> bool {
    use SpillState::*;
    match (self, next) {
      (NoDefinitionFound, NoSpillStore)
      | (NoDefinitionFound, StartInMemory)
      | (NoSpillStore, NoOptimization)
      | (NoSpillStore, StartInMemory)
      | (NoSpillStore, StoreAtDefinition) => true,
      _ => false,
    }
  }
}

/// Two definitions this close are the two halves of one logical definition.
const TWO_OPERAND_WINDOW: i32 = 2;

#[derive(Clone, Debug)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub struct SpillTracker {
  state: SpillState,
  def_pos: Option<OpId>,
}

impl SpillTracker {
  pub fn new() -> Self {
    Self { state: SpillState::NoDefinitionFound, def_pos: None }
  }

  pub fn state(&self) -> SpillState {
    self.state
  }

  pub fn def_pos(&self) -> Option<OpId> {
    self.def_pos
  }

  fn move_to(&mut self, next: SpillState) -> Result<(), RegAllocError> {
    if !self.state.can_move_to(next) {
      return Err(RegAllocError::Bailout(format!(
        "unexpected spill state transition {:?} -> {:?}",
        self.state, next
      )));
    }
    trace!("spill state {:?} -> {:?}", self.state, next);
    self.state = next;
    Ok(())
  }

  /// Records a definition at `pos`.  Definitions arrive in reverse program
  /// order.  A label only stamps the position: a later-seen definition
  /// still takes over.
  pub fn record_definition(
    &mut self, pos: OpId, is_label: bool,
  ) -> Result<(), RegAllocError> {
    match self.state {
      SpillState::NoDefinitionFound => {
        self.def_pos = Some(pos);
        if !is_label {
          self.move_to(SpillState::NoSpillStore)?;
        }
        Ok(())
      }
      SpillState::NoSpillStore => {
        let def_pos = match self.def_pos {
          Some(def_pos) => def_pos,
          None => {
            return Err(RegAllocError::Internal(
              "NoSpillStore without a definition position".into(),
            ))
          }
        };
        if pos > def_pos {
          return Err(RegAllocError::Internal(format!(
            "definitions must be seen in reverse order: {:?} after {:?}",
            pos, def_pos
          )));
        }
        if pos < def_pos.minus(TWO_OPERAND_WINDOW) {
          self.move_to(SpillState::NoOptimization)?;
        }
        Ok(())
      }
      SpillState::NoOptimization => Ok(()),
      state => Err(RegAllocError::Bailout(format!(
        "definition at {:?} in spill state {:?}",
        pos, state
      ))),
    }
  }

  /// The value is resident in memory from its definition on.
  pub fn mark_start_in_memory(&mut self) -> Result<(), RegAllocError> {
    self.move_to(SpillState::StartInMemory)
  }

  /// After the reverse walk: a value only defined by a label still has a
  /// single definition.
  pub fn finish_build(&mut self) -> Result<(), RegAllocError> {
    if self.state == SpillState::NoDefinitionFound && self.def_pos.is_some() {
      self.move_to(SpillState::NoSpillStore)?;
    }
    Ok(())
  }

  /// Some part of the value got a stack slot.
  pub fn mark_spilled(&mut self) -> Result<(), RegAllocError> {
    match self.state {
      SpillState::NoSpillStore => {
        self.move_to(SpillState::StoreAtDefinition)
      }
      SpillState::StoreAtDefinition
      | SpillState::NoOptimization
      | SpillState::StartInMemory => Ok(()),
      SpillState::NoDefinitionFound => Err(RegAllocError::Internal(
        "spilling a value without a definition".into(),
      )),
    }
  }

  /// Does a spill move at `pos` have to store the value to its slot?
  pub fn needs_store_at(&self, pos: OpId) -> bool {
    match (self.state, self.def_pos) {
      (SpillState::StartInMemory, _) => false,
      (SpillState::StoreAtDefinition, Some(def_pos)) => pos <= def_pos,
      _ => true,
    }
  }
}

#[test]
fn two_operand_definitions() {
  let mut tracker = SpillTracker::new();
  assert!(tracker.record_definition(OpId::new(10), false).is_ok());
  assert_eq!(tracker.state(), SpillState::NoSpillStore);
  assert!(tracker.record_definition(OpId::new(9), false).is_ok());
  assert_eq!(tracker.state(), SpillState::NoSpillStore);
  assert_eq!(tracker.def_pos(), Some(OpId::new(10)));
  assert!(tracker.record_definition(OpId::new(4), false).is_ok());
  assert_eq!(tracker.state(), SpillState::NoOptimization);
  assert!(tracker.record_definition(OpId::new(2), false).is_ok());
  assert_eq!(tracker.state(), SpillState::NoOptimization);
}

#[test]
fn label_definitions_are_deferred() {
  let mut tracker = SpillTracker::new();
  assert!(tracker.record_definition(OpId::new(6), true).is_ok());
  assert_eq!(tracker.state(), SpillState::NoDefinitionFound);
  assert!(tracker.finish_build().is_ok());
  assert_eq!(tracker.state(), SpillState::NoSpillStore);
  assert_eq!(tracker.def_pos(), Some(OpId::new(6)));

  let mut untouched = SpillTracker::new();
  assert!(untouched.finish_build().is_ok());
  assert_eq!(untouched.state(), SpillState::NoDefinitionFound);
}

#[test]
fn definitions_out_of_order() {
  let mut tracker = SpillTracker::new();
  assert!(tracker.record_definition(OpId::new(4), false).is_ok());
  match tracker.record_definition(OpId::new(8), false) {
    Err(RegAllocError::Internal(_)) => {}
    other => panic!("unexpected {:?}", other),
  }
}

#[test]
fn store_at_definition() {
  let mut tracker = SpillTracker::new();
  assert!(tracker.record_definition(OpId::new(4), false).is_ok());
  assert!(tracker.needs_store_at(OpId::new(11)));
  assert!(tracker.mark_spilled().is_ok());
  assert_eq!(tracker.state(), SpillState::StoreAtDefinition);
  assert!(tracker.needs_store_at(OpId::new(4)));
  assert!(!tracker.needs_store_at(OpId::new(11)));
  assert!(tracker.mark_spilled().is_ok());

  // A definition can't show up once allocation started.
  match tracker.record_definition(OpId::new(2), false) {
    Err(RegAllocError::Bailout(_)) => {}
    other => panic!("unexpected {:?}", other),
  }
}

#[test]
fn start_in_memory() {
  let mut tracker = SpillTracker::new();
  assert!(tracker.record_definition(OpId::new(2), false).is_ok());
  assert!(tracker.mark_start_in_memory().is_ok());
  assert!(!tracker.needs_store_at(OpId::new(7)));
  assert!(tracker.mark_spilled().is_ok());
  assert_eq!(tracker.state(), SpillState::StartInMemory);
  // The lattice never goes back.
  assert!(tracker.mark_start_in_memory().is_err());
  assert!(!SpillState::NoOptimization.can_move_to(SpillState::NoSpillStore));
  assert!(!SpillState::StartInMemory.can_move_to(SpillState::NoSpillStore));
}

#[test]
fn spilling_without_definition() {
  let mut tracker = SpillTracker::new();
  assert!(tracker.mark_spilled().is_err());
}
