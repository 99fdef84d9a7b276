//! Command implementations for the Softlabel CLI.

pub mod eval;
pub mod matrix;
pub mod train;
pub mod weights;
