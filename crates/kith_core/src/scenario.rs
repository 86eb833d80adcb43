use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::profile::{GroupTraitSet, IndividualTraitSet};

/// A submitted first-person account of a social situation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    pub id: i64,
    pub user_id: String,
    pub text: String,
    pub submitted_at: DateTime<Utc>,
    /// Incremented on each revision. A scenario may be revised once; at 2 the
    /// text is frozen.
    pub submission_count: i64,
}

pub const MAX_SUBMISSIONS: i64 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActorKind {
    Individual,
    Group,
}

impl std::fmt::Display for ActorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActorKind::Individual => write!(f, "individual"),
            ActorKind::Group => write!(f, "group"),
        }
    }
}

impl std::str::FromStr for ActorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "individual" => Ok(ActorKind::Individual),
            "group" => Ok(ActorKind::Group),
            other => Err(format!("unknown actor kind: {other}")),
        }
    }
}

// ============================================================================
// Validated extraction output
// ============================================================================
//
// All cross-references below use the oracle-assigned ref ids ("A1", "B2").
// By the time these types are built, every reference has been checked, so
// the store can persist an extraction in a single pass.

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedActor {
    /// "A1", "A2", ... scoped to one extraction.
    pub ref_id: String,
    pub name_or_alias: String,
    pub kind: ActorKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedIndividualTraits {
    pub actor_ref_id: String,
    pub traits: IndividualTraitSet,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedGroupTraits {
    pub actor_ref_id: String,
    pub traits: GroupTraitSet,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedInteraction {
    /// "B1", "B2", ... scoped to one extraction.
    pub behavior_id: String,
    pub actor_ref_id: String,
    pub description: String,
    #[serde(default)]
    pub env: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedRelation {
    pub source_behavior_id: String,
    pub target_behavior_id: String,
    pub relation_description: String,
    /// Actor ref ids involved in this relation. May hold fewer than two
    /// entries after unresolvable refs were dropped; pairwise expansion
    /// then yields nothing for it.
    pub participants: Vec<String>,
    #[serde(default)]
    pub relationship_status: Option<String>,
}

/// Everything one oracle call pulled out of a scenario.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScenarioExtraction {
    pub actors: Vec<ExtractedActor>,
    pub individual_traits: Vec<ExtractedIndividualTraits>,
    pub group_traits: Vec<ExtractedGroupTraits>,
    pub interactions: Vec<ExtractedInteraction>,
    pub relations: Vec<ExtractedRelation>,
}

impl ScenarioExtraction {
    pub fn is_empty(&self) -> bool {
        self.actors.is_empty() && self.interactions.is_empty()
    }
}

// ============================================================================
// Scenario summaries
// ============================================================================

/// The five derived summary angles persisted per scenario.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SummaryKind {
    Actors,
    Dynamics,
    Needs,
    SkillsResources,
    AnalysisPrediction,
}

impl SummaryKind {
    pub const ALL: [SummaryKind; 5] = [
        SummaryKind::Actors,
        SummaryKind::Dynamics,
        SummaryKind::Needs,
        SummaryKind::SkillsResources,
        SummaryKind::AnalysisPrediction,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SummaryKind::Actors => "actors",
            SummaryKind::Dynamics => "dynamics",
            SummaryKind::Needs => "needs",
            SummaryKind::SkillsResources => "skills_resources",
            SummaryKind::AnalysisPrediction => "analysis_prediction",
        }
    }
}

impl std::str::FromStr for SummaryKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "actors" => Ok(SummaryKind::Actors),
            "dynamics" => Ok(SummaryKind::Dynamics),
            "needs" => Ok(SummaryKind::Needs),
            "skills_resources" => Ok(SummaryKind::SkillsResources),
            "analysis_prediction" => Ok(SummaryKind::AnalysisPrediction),
            other => Err(format!("unknown summary kind: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_actor_kind_round_trip() {
        for kind in [ActorKind::Individual, ActorKind::Group] {
            let parsed: ActorKind = kind.to_string().parse().unwrap();
            assert_eq!(parsed, kind);
        }
    }

    #[test]
    fn test_summary_kind_names_are_stable() {
        // These strings key database rows, so they must not drift.
        let names: Vec<&str> = SummaryKind::ALL.iter().map(|k| k.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "actors",
                "dynamics",
                "needs",
                "skills_resources",
                "analysis_prediction"
            ]
        );
        for kind in SummaryKind::ALL {
            assert_eq!(kind.as_str().parse::<SummaryKind>().unwrap(), kind);
        }
    }

    #[test]
    fn test_extraction_empty_means_no_actors_and_no_interactions() {
        let mut ex = ScenarioExtraction::default();
        assert!(ex.is_empty());
        ex.interactions.push(ExtractedInteraction {
            behavior_id: "B1".into(),
            actor_ref_id: "A1".into(),
            description: "waves".into(),
            env: None,
        });
        assert!(!ex.is_empty());
    }
}
