//! Test orchestration core.
//!
//! Collects test files into task trees, interprets their run modes, and in
//! watch mode maps file changes through the module graph to the test files
//! that need a rerun.

pub mod collect;
pub mod config;
pub mod env;
pub mod graph;
pub mod normalize;
pub mod orchestrator;
pub mod pool;
pub mod project;
pub mod sequencer;
pub mod state;
pub mod store;
pub mod task;
pub mod watch;

pub use orchestrator::{CancelReason, Orchestrator, RunSummary};
