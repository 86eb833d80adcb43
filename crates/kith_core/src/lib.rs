pub mod config;
pub mod error;
pub mod graph;
pub mod profile;
pub mod scenario;
pub mod simulation;
pub mod validation;

pub use config::{KithConfig, LlmConfig, StoreConfig};
pub use error::{KithError, Result};
pub use graph::{GraphEdge, GraphNode, SocialGraph};
pub use profile::{
    ActorEntry, GlobalActorsSnapshot, GroupProfile, GroupTraitSet, IndividualProfile,
    IndividualTraitSet, SELF_NAME,
};
pub use scenario::{
    ActorKind, ExtractedActor, ExtractedGroupTraits, ExtractedIndividualTraits,
    ExtractedInteraction, ExtractedRelation, Scenario, ScenarioExtraction, SummaryKind,
};
pub use simulation::{Turn, TurnKind, MAX_BATCH_TURNS, MAX_LIVE_TURNS};
pub use validation::Language;
