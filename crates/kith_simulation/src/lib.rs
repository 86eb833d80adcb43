//! Batch and live simulations over frozen profile and relation snapshots.

pub mod engine;

pub use engine::SimulationEngine;
