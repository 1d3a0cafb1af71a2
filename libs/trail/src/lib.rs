//! # replan-trail
//!
//! Trailed (reversible) memory for backtracking search.
//!
//! ## Design Principles
//!
//! - Every mutable search-time value lives in a cell owned by an
//!   [`Environment`] and is addressed by a `Copy` handle, never by pointer
//! - Each cell carries the index of the world that last wrote it; writing
//!   from a deeper world records the prior value on a trail before
//!   overwriting, writing again in the same world overwrites in place
//! - Popping a world replays its trail in reverse chronological order, so
//!   every cell comes back to the exact value it held when the world was
//!   entered
//!
//! Two environments never share cells: handles are tagged with the id of
//! the environment that created them and misuse is caught in debug builds.

mod env;

pub use env::{BoolCell, Environment, IntCell, VecCell};
