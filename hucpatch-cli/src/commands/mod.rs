//! CLI command implementations.

pub mod catalog;
pub mod config;
pub mod grid;
pub mod reconcile;
pub mod run;
