//! SQLite persistence for scenarios, extracted entities, canonical
//! profiles, derived artifacts, and simulation sessions.

pub mod sqlite;

pub use sqlite::{
    GeneratedSimulation, LiveSession, ResolvedProfileWrite, SqliteStore, StoredInteraction,
    StoredRelation,
};
