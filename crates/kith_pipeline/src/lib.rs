//! Aggregation and derivation pipeline: identity resolution over oracle
//! merge decisions, relationship fan-out, graph building, and the
//! orchestrator tying extraction to the derived artifacts.

pub mod aggregate;
pub mod graph;
pub mod orchestrator;
pub mod relations;

pub use orchestrator::{Pipeline, StageReport};
