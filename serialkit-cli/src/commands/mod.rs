//! Command implementations.
//!
//! Each subcommand group is implemented in its own module for clean separation.

pub(crate) mod io;
pub(crate) mod monitor;
pub(crate) mod ports;
