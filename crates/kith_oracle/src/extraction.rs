//! Scenario extraction: one LLM call turning a free-text scenario into
//! actors, trait observations, interactions, and relations.
//!
//! The oracle's output is parsed into untrusted `Raw*` records first and
//! only promoted to `kith_core` types after cross-reference validation.
//! Dangling references are dropped and logged, never coerced.

use crate::client::{CompletionParams, LlmClient};
use crate::parse::{lenient_json, require_nonempty};
use kith_core::profile::{GroupTraitSet, IndividualTraitSet, SELF_NAME};
use kith_core::scenario::{
    ActorKind, ExtractedActor, ExtractedGroupTraits, ExtractedIndividualTraits,
    ExtractedInteraction, ExtractedRelation, ScenarioExtraction,
};
use kith_core::validation::Language;
use kith_core::{KithError, Result};
use serde::Deserialize;
use std::collections::HashMap;

const EXTRACTION_SYSTEM_PROMPT: &str = r#"You are an information extraction module. The user will give you a first-person account of a social situation. Extract the social entities it describes into strict JSON with exactly these keys:

{
  "actors": [{"actor_ref_id": "A1", "name_or_alias": "...", "kind": "individual" | "group"}],
  "individual_traits": [{"actor_ref_id": "A1", "<field>": "..."}],
  "group_traits": [{"actor_ref_id": "A2", "<field>": "..."}],
  "interactions": [{"behavior_id": "B1", "actor_ref_id": "A1", "description": "...", "env": "..."}],
  "relations": [{"source_behavior_id": "B1", "target_behavior_id": "B2", "relation_description": "...", "participants": ["A1", "A2"], "relationship_status": "..."}]
}

Rules:
1. Assign actor_ref_id values A1, A2, ... in order of first mention; behavior_id values B1, B2, ... likewise.
2. The narrator is always an individual actor named exactly "Me". Never emit a second actor named "Me".
3. individual_traits fields (include only those the text supports): cognitive_pattern, affect_pattern, action_pattern, personality, beliefs_values, priorities, life_style, identity, capabilities, family, marriage_intimate_relationship, education, occupation_job_industry, social_economic_status, social_network, biological_characteristics.
4. group_traits fields: group_type, domain, size, mission_vision_value, goal_strategy, objectives_plan, governance, organizational_structure, operation_system, organizational_politics, influence, leadership, culture, performance, challenge, funding_resources_budget.
5. individual_traits entries may only reference individual actors, group_traits entries only group actors.
6. Every interaction references the actor performing it. Every relation links two behaviors, lists every participating actor_ref_id, and states the relationship status between the participants if the text reveals one (e.g. "friends", "colleagues", "estranged siblings").
7. Only extract what is stated or clearly implied. Do not invent. Omit fields you have no evidence for.
8. Return only the JSON object, no commentary."#;

// ============================================================================
// Untrusted records
// ============================================================================

#[derive(Debug, Default, Deserialize)]
struct RawExtraction {
    #[serde(default)]
    actors: Vec<RawActor>,
    #[serde(default)]
    individual_traits: Vec<RawIndividualTraits>,
    #[serde(default)]
    group_traits: Vec<RawGroupTraits>,
    #[serde(default)]
    interactions: Vec<RawInteraction>,
    #[serde(default)]
    relations: Vec<RawRelation>,
}

#[derive(Debug, Deserialize)]
struct RawActor {
    #[serde(default)]
    actor_ref_id: String,
    #[serde(default)]
    name_or_alias: String,
    #[serde(default)]
    kind: String,
}

#[derive(Debug, Deserialize)]
struct RawIndividualTraits {
    #[serde(default)]
    actor_ref_id: String,
    #[serde(flatten)]
    traits: IndividualTraitSet,
}

#[derive(Debug, Deserialize)]
struct RawGroupTraits {
    #[serde(default)]
    actor_ref_id: String,
    #[serde(flatten)]
    traits: GroupTraitSet,
}

#[derive(Debug, Deserialize)]
struct RawInteraction {
    #[serde(default)]
    behavior_id: String,
    #[serde(default)]
    actor_ref_id: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    env: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawRelation {
    #[serde(default)]
    source_behavior_id: String,
    #[serde(default)]
    target_behavior_id: String,
    #[serde(default)]
    relation_description: String,
    #[serde(default)]
    participants: Vec<String>,
    #[serde(default)]
    relationship_status: Option<String>,
}

// ============================================================================
// Public entry point
// ============================================================================

/// Run the extraction oracle over a scenario and validate its output.
pub async fn extract_scenario(
    client: &dyn LlmClient,
    text: &str,
    language: Language,
) -> Result<ScenarioExtraction> {
    let language_note = match language {
        Language::En => "Write all extracted free-text values in English.",
        Language::ZhHans => "Write all extracted free-text values in Simplified Chinese.",
    };
    let system = format!("{EXTRACTION_SYSTEM_PROMPT}\n\n{language_note}");

    let response = client
        .complete(&system, text, CompletionParams::json())
        .await
        .map_err(KithError::Storage)?;

    require_nonempty(&response, "extraction")?;
    let raw: RawExtraction = lenient_json(&response)?;
    let extraction = validate(raw)?;

    if extraction.is_empty() {
        return Err(KithError::ExtractionEmpty);
    }
    Ok(extraction)
}

// ============================================================================
// Validation
// ============================================================================

fn validate(raw: RawExtraction) -> Result<ScenarioExtraction> {
    let mut actors: Vec<ExtractedActor> = Vec::new();
    let mut kinds: HashMap<String, ActorKind> = HashMap::new();
    let mut seen_self = false;

    for actor in raw.actors {
        let name = actor.name_or_alias.trim().to_string();
        let ref_id = actor.actor_ref_id.trim().to_string();
        if name.is_empty() || ref_id.is_empty() {
            tracing::warn!("dropping actor with missing name or ref id");
            continue;
        }
        let kind: ActorKind = match actor.kind.parse() {
            Ok(kind) => kind,
            Err(e) => {
                tracing::warn!("dropping actor {ref_id}: {e}");
                continue;
            }
        };
        if name == SELF_NAME {
            if seen_self {
                return Err(KithError::OracleMalformed(
                    "extraction produced more than one \"Me\" actor".to_string(),
                ));
            }
            if kind != ActorKind::Individual {
                return Err(KithError::OracleMalformed(
                    "extraction marked \"Me\" as a group".to_string(),
                ));
            }
            seen_self = true;
        }
        if kinds.contains_key(&ref_id) {
            tracing::warn!("dropping actor with duplicate ref id {ref_id}");
            continue;
        }
        kinds.insert(ref_id.clone(), kind);
        actors.push(ExtractedActor {
            ref_id,
            name_or_alias: name,
            kind,
        });
    }

    let individual_traits = raw
        .individual_traits
        .into_iter()
        .filter(|t| match kinds.get(t.actor_ref_id.trim()) {
            Some(ActorKind::Individual) => true,
            Some(ActorKind::Group) => {
                tracing::warn!(
                    "dropping individual traits for group actor {}",
                    t.actor_ref_id
                );
                false
            }
            None => {
                tracing::warn!("dropping individual traits for unknown actor {}", t.actor_ref_id);
                false
            }
        })
        .map(|t| ExtractedIndividualTraits {
            actor_ref_id: t.actor_ref_id.trim().to_string(),
            traits: t.traits,
        })
        .collect();

    let group_traits = raw
        .group_traits
        .into_iter()
        .filter(|t| match kinds.get(t.actor_ref_id.trim()) {
            Some(ActorKind::Group) => true,
            Some(ActorKind::Individual) => {
                tracing::warn!(
                    "dropping group traits for individual actor {}",
                    t.actor_ref_id
                );
                false
            }
            None => {
                tracing::warn!("dropping group traits for unknown actor {}", t.actor_ref_id);
                false
            }
        })
        .map(|t| ExtractedGroupTraits {
            actor_ref_id: t.actor_ref_id.trim().to_string(),
            traits: t.traits,
        })
        .collect();

    let mut behavior_ids: HashMap<String, ()> = HashMap::new();
    let mut interactions: Vec<ExtractedInteraction> = Vec::new();
    for interaction in raw.interactions {
        let behavior_id = interaction.behavior_id.trim().to_string();
        let actor_ref_id = interaction.actor_ref_id.trim().to_string();
        if behavior_id.is_empty() || interaction.description.trim().is_empty() {
            tracing::warn!("dropping interaction with missing id or description");
            continue;
        }
        if !kinds.contains_key(&actor_ref_id) {
            tracing::warn!("dropping interaction {behavior_id}: unknown actor {actor_ref_id}");
            continue;
        }
        if behavior_ids.insert(behavior_id.clone(), ()).is_some() {
            tracing::warn!("dropping interaction with duplicate behavior id {behavior_id}");
            continue;
        }
        interactions.push(ExtractedInteraction {
            behavior_id,
            actor_ref_id,
            description: interaction.description.trim().to_string(),
            env: interaction.env.filter(|e| !e.trim().is_empty()),
        });
    }

    let relations = raw
        .relations
        .into_iter()
        .filter_map(|r| {
            let source = r.source_behavior_id.trim().to_string();
            let target = r.target_behavior_id.trim().to_string();
            if !behavior_ids.contains_key(&source) || !behavior_ids.contains_key(&target) {
                tracing::warn!("dropping relation with unknown behavior ({source} -> {target})");
                return None;
            }
            // Unresolvable participants are dropped one by one; a relation
            // left with fewer than two is kept and simply expands to nothing.
            let participants: Vec<String> = r
                .participants
                .into_iter()
                .map(|p| p.trim().to_string())
                .filter(|p| {
                    let known = kinds.contains_key(p);
                    if !known {
                        tracing::warn!("dropping unknown relation participant {p}");
                    }
                    known
                })
                .collect();
            Some(ExtractedRelation {
                source_behavior_id: source,
                target_behavior_id: target,
                relation_description: r.relation_description.trim().to_string(),
                participants,
                relationship_status: r.relationship_status.filter(|s| !s.trim().is_empty()),
            })
        })
        .collect();

    Ok(ScenarioExtraction {
        actors,
        individual_traits,
        group_traits,
        interactions,
        relations,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::mock::MockProvider;

    fn raw_from(json: &str) -> RawExtraction {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_validate_drops_dangling_references() {
        let raw = raw_from(
            r#"{
                "actors": [
                    {"actor_ref_id": "A1", "name_or_alias": "Me", "kind": "individual"},
                    {"actor_ref_id": "A2", "name_or_alias": "Acme", "kind": "group"}
                ],
                "individual_traits": [
                    {"actor_ref_id": "A1", "personality": "calm"},
                    {"actor_ref_id": "A2", "personality": "n/a"},
                    {"actor_ref_id": "A9", "personality": "ghost"}
                ],
                "group_traits": [
                    {"actor_ref_id": "A2", "group_type": "company"}
                ],
                "interactions": [
                    {"behavior_id": "B1", "actor_ref_id": "A1", "description": "asked for a raise"},
                    {"behavior_id": "B2", "actor_ref_id": "A7", "description": "ghost behavior"}
                ],
                "relations": [
                    {"source_behavior_id": "B1", "target_behavior_id": "B1",
                     "relation_description": "self loop", "participants": ["A1", "A2", "A9"]},
                    {"source_behavior_id": "B1", "target_behavior_id": "B2",
                     "relation_description": "dangling", "participants": ["A1"]}
                ]
            }"#,
        );
        let out = validate(raw).unwrap();
        assert_eq!(out.actors.len(), 2);
        // A2 is a group, A9 unknown: only A1's individual traits survive.
        assert_eq!(out.individual_traits.len(), 1);
        assert_eq!(out.group_traits.len(), 1);
        assert_eq!(out.interactions.len(), 1);
        assert_eq!(out.relations.len(), 1);
        assert_eq!(out.relations[0].participants, vec!["A1", "A2"]);
    }

    #[test]
    fn test_second_me_is_malformed() {
        let raw = raw_from(
            r#"{"actors": [
                {"actor_ref_id": "A1", "name_or_alias": "Me", "kind": "individual"},
                {"actor_ref_id": "A2", "name_or_alias": "Me", "kind": "individual"}
            ]}"#,
        );
        assert!(matches!(
            validate(raw).unwrap_err(),
            KithError::OracleMalformed(_)
        ));
    }

    #[test]
    fn test_group_me_is_malformed() {
        let raw = raw_from(
            r#"{"actors": [
                {"actor_ref_id": "A1", "name_or_alias": "Me", "kind": "group"}
            ]}"#,
        );
        assert!(matches!(
            validate(raw).unwrap_err(),
            KithError::OracleMalformed(_)
        ));
    }

    #[test]
    fn test_relation_kept_with_single_participant() {
        let raw = raw_from(
            r#"{
                "actors": [{"actor_ref_id": "A1", "name_or_alias": "Me", "kind": "individual"}],
                "interactions": [
                    {"behavior_id": "B1", "actor_ref_id": "A1", "description": "waited alone"}
                ],
                "relations": [
                    {"source_behavior_id": "B1", "target_behavior_id": "B1",
                     "relation_description": "solo", "participants": ["A1", "A8"]}
                ]
            }"#,
        );
        let out = validate(raw).unwrap();
        assert_eq!(out.relations.len(), 1);
        assert_eq!(out.relations[0].participants, vec!["A1"]);
    }

    #[tokio::test]
    async fn test_extract_scenario_end_to_end() {
        let provider = MockProvider::new();
        provider.push(
            r#"```json
            {
                "actors": [
                    {"actor_ref_id": "A1", "name_or_alias": "Me", "kind": "individual"},
                    {"actor_ref_id": "A2", "name_or_alias": "John", "kind": "individual"}
                ],
                "interactions": [
                    {"behavior_id": "B1", "actor_ref_id": "A2", "description": "offered help", "env": "office"}
                ],
                "relations": []
            }
            ```"#,
        );
        let out = extract_scenario(&provider, "a long account...", Language::En)
            .await
            .unwrap();
        assert_eq!(out.actors.len(), 2);
        assert_eq!(out.interactions[0].env.as_deref(), Some("office"));
    }

    #[tokio::test]
    async fn test_extract_scenario_empty_output() {
        let provider = MockProvider::new();
        provider.push(r#"{"actors": [], "interactions": []}"#);
        let err = extract_scenario(&provider, "text", Language::En)
            .await
            .unwrap_err();
        assert!(matches!(err, KithError::ExtractionEmpty));
    }

    #[tokio::test]
    async fn test_extract_scenario_blank_response() {
        let provider = MockProvider::new();
        provider.push("   ");
        let err = extract_scenario(&provider, "text", Language::En)
            .await
            .unwrap_err();
        assert!(matches!(err, KithError::OracleEmpty(_)));
    }
}
