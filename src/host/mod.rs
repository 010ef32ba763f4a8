//! Host-facing command contract, router and stdio bridge for the editing surface.

pub mod channel;
pub mod contract;
pub mod stdio;
