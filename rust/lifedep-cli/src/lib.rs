//! Lifedep CLI library.
//!
//! Shared functionality for the `lifedep` binary.

pub use lifedep_checker::colors;

pub mod commands;
pub mod config;
