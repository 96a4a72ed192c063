/* -*- Mode: Rust; tab-width: 8; indent-tabs-mode: nil; rust-indent-offset: 2 -*-
 * vim: set ts=8 sts=2 et sw=2 tw=80:
*/

//! Main file / top-level module for the trace register allocator library.
//!
//! The blocks of a function are partitioned into traces by the client; every
//! trace is then allocated on its own with a linear scan, and the locations
//! chosen by neighbouring traces are connected with moves on the control-flow
//! edges between them.

// Make the analysis module public for fuzzing.
#[cfg(feature = "fuzzing")]
pub mod analysis;
#[cfg(not(feature = "fuzzing"))]
mod analysis;

mod checker;
mod data_structures;
mod inst_stream;
mod interface;
mod intervals;
mod lifetime;
mod linear_scan;
mod resolve;
mod spill_state;
mod ssi;

pub use crate::interface::*;

pub use crate::analysis::AnalysisError;
pub use crate::checker::{CheckerError, CheckerErrors};
pub use crate::intervals::{
  FixedInterval, Hint, LiveRange, RegisterPriority, TraceInterval,
  TraceIntervals, UsePosition,
};
pub use crate::spill_state::SpillState;
