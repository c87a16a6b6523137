//! Command line interface module
//!
//! This module provides argument parsing (with environment fallbacks) and the
//! runner that executes one blob command against a registry.

pub mod args;
pub mod runner;

pub use args::{Args, Command};
pub use runner::{EXIT_ABSENT, EXIT_OK, Runner};
