//! jabls CLI library: argument parsing and command handlers.

pub mod cli;
