//! Derived-text oracles: the five per-scenario summary angles, the global
//! actor categorizer, and the relationship-pair summarizer.

use crate::client::{CompletionParams, LlmClient};
use crate::parse::{lenient_json, require_nonempty};
use crate::retrieval::SemanticRetrieval;
use kith_core::profile::{ActorEntry, GlobalActorsSnapshot};
use kith_core::scenario::SummaryKind;
use kith_core::{KithError, Result};
use serde::Deserialize;
use std::collections::HashMap;

/// Returned instead of calling the oracle when a stage has nothing to
/// summarize.
pub const NO_INFORMATION: &str = "No information available.";

/// Flattened source material for the per-scenario summary stages.
#[derive(Debug, Default, Clone)]
pub struct SummaryInputs {
    pub scenario_text: String,
    /// One line per trait row, individuals and groups alike.
    pub trait_lines: Vec<String>,
    pub interaction_lines: Vec<String>,
    pub relation_lines: Vec<String>,
}

impl SummaryInputs {
    /// The material a given summary angle looks at.
    fn material(&self, kind: SummaryKind) -> Vec<&str> {
        let mut lines: Vec<&str> = Vec::new();
        match kind {
            SummaryKind::Actors => {
                lines.extend(self.trait_lines.iter().map(String::as_str));
            }
            SummaryKind::Dynamics => {
                lines.extend(self.interaction_lines.iter().map(String::as_str));
                lines.extend(self.relation_lines.iter().map(String::as_str));
            }
            SummaryKind::Needs | SummaryKind::SkillsResources => {
                lines.extend(self.trait_lines.iter().map(String::as_str));
                lines.extend(self.relation_lines.iter().map(String::as_str));
            }
            SummaryKind::AnalysisPrediction => {}
        }
        lines
    }
}

fn stage_instruction(kind: SummaryKind) -> &'static str {
    match kind {
        SummaryKind::Actors => {
            "Summarize who is involved in this situation: each actor, what kind of \
             person or group they are, and what stands out about them."
        }
        SummaryKind::Dynamics => {
            "Summarize the social dynamics: who did what to whom, how the behaviors \
             relate, and what the relationship statuses suggest."
        }
        SummaryKind::Needs => {
            "Summarize the needs, motivations, and desires the participants appear to \
             have in this situation."
        }
        SummaryKind::SkillsResources => {
            "Summarize the skills and resources the participants bring or lack in this \
             situation."
        }
        SummaryKind::AnalysisPrediction => {
            "Analyze the situation and predict how it is likely to develop, grounded in \
             the key points and any prior context provided."
        }
    }
}

/// Produce one summary angle for a scenario. Empty source material
/// short-circuits without an oracle call.
pub async fn scenario_summary(
    client: &dyn LlmClient,
    retrieval: &dyn SemanticRetrieval,
    user_id: &str,
    kind: SummaryKind,
    inputs: &SummaryInputs,
) -> Result<String> {
    if kind == SummaryKind::AnalysisPrediction {
        return analysis_prediction(client, retrieval, user_id, inputs).await;
    }

    let material = inputs.material(kind);
    if material.is_empty() {
        return Ok(NO_INFORMATION.to_string());
    }
    let material = material.join("\n");

    let context = retrieve_context(retrieval, user_id, &material).await;
    let user = match context {
        Some(context) => format!("Prior context:\n{context}\n\nExtracted material:\n{material}"),
        None => format!("Extracted material:\n{material}"),
    };

    let response = client
        .complete(stage_instruction(kind), &user, CompletionParams::default())
        .await
        .map_err(KithError::Storage)?;
    require_nonempty(&response, kind.as_str())?;
    Ok(response.trim().to_string())
}

/// The analysis/prediction angle condenses the scenario first, then asks for
/// analysis over the key points plus retrieved context.
async fn analysis_prediction(
    client: &dyn LlmClient,
    retrieval: &dyn SemanticRetrieval,
    user_id: &str,
    inputs: &SummaryInputs,
) -> Result<String> {
    let key_points = client
        .complete(
            "Condense the following account into short bullet points of the key facts. \
             Return only the bullet points.",
            &inputs.scenario_text,
            CompletionParams::default(),
        )
        .await
        .map_err(KithError::Storage)?;
    require_nonempty(&key_points, "analysis_prediction key points")?;

    let context = retrieve_context(retrieval, user_id, &key_points).await;
    let user = match context {
        Some(context) => format!("Prior context:\n{context}\n\nKey points:\n{key_points}"),
        None => format!("Key points:\n{key_points}"),
    };

    let response = client
        .complete(
            stage_instruction(SummaryKind::AnalysisPrediction),
            &user,
            CompletionParams::default(),
        )
        .await
        .map_err(KithError::Storage)?;
    require_nonempty(&response, SummaryKind::AnalysisPrediction.as_str())?;
    Ok(response.trim().to_string())
}

/// Retrieval is best-effort context; failures are logged and ignored.
async fn retrieve_context(
    retrieval: &dyn SemanticRetrieval,
    user_id: &str,
    query: &str,
) -> Option<String> {
    match retrieval.retrieve(user_id, query).await {
        Ok(snippets) if !snippets.is_empty() => Some(snippets.join("\n")),
        Ok(_) => None,
        Err(e) => {
            tracing::warn!("context retrieval failed (non-fatal): {e}");
            None
        }
    }
}

// ============================================================================
// Global snapshot categorizer
// ============================================================================

const CATEGORIZE_PROMPT: &str = r#"You receive flattened profiles of everyone a user knows. Sort them into three buckets and return strict JSON:

{"Self": [{"canonical_name": "...", "traits": "..."}],
 "People": [{"canonical_name": "...", "traits": "..."}],
 "Group": [{"canonical_name": "...", "traits": "..."}]}

Rules:
1. "Self" holds only the user's own profile, canonical name "Me". At most one entry.
2. "People" holds every other individual, "Group" every group profile.
3. Keep canonical names exactly as given; traits is a single descriptive string.
4. Return only the JSON object."#;

#[derive(Debug, Default, Deserialize)]
struct RawSnapshot {
    #[serde(rename = "Self", default)]
    selves: Vec<ActorEntry>,
    #[serde(rename = "People", default)]
    people: Vec<ActorEntry>,
    #[serde(rename = "Group", default)]
    groups: Vec<ActorEntry>,
}

/// Build the categorized global snapshot from flattened profile lines.
/// An empty profile set yields an empty snapshot without an oracle call.
pub async fn categorize_actors(
    client: &dyn LlmClient,
    individual_lines: &[String],
    group_lines: &[String],
) -> Result<GlobalActorsSnapshot> {
    if individual_lines.is_empty() && group_lines.is_empty() {
        return Ok(GlobalActorsSnapshot::default());
    }

    let user = format!(
        "Individual profiles:\n{}\n\nGroup profiles:\n{}",
        individual_lines.join("\n"),
        group_lines.join("\n"),
    );
    let response = client
        .complete(CATEGORIZE_PROMPT, &user, CompletionParams::json())
        .await
        .map_err(KithError::Storage)?;
    require_nonempty(&response, "global snapshot")?;
    let raw: RawSnapshot = lenient_json(&response)?;

    let mut snapshot = GlobalActorsSnapshot {
        selves: raw.selves,
        people: raw.people,
        groups: raw.groups,
    };
    // The self bucket is single-occupancy; anything extra the oracle put
    // there belongs with the rest of the people.
    while snapshot.selves.len() > 1 {
        let extra = snapshot.selves.pop().unwrap();
        snapshot.people.push(extra);
    }
    Ok(snapshot)
}

// ============================================================================
// Relationship-pair summarizer
// ============================================================================

const PAIR_SUMMARY_PROMPT: &str = r#"You receive pairs of actors together with every relationship status observed between them. For each pair, write one sentence summarizing the relationship. Return strict JSON:

{"summaries": [{"a": "...", "b": "...", "summary": "..."}]}

Keep the names exactly as given. Return only the JSON object."#;

#[derive(Debug, Deserialize)]
struct PairSummaryResponse {
    #[serde(default)]
    summaries: Vec<PairSummaryEntry>,
}

#[derive(Debug, Deserialize)]
struct PairSummaryEntry {
    #[serde(default)]
    a: String,
    #[serde(default)]
    b: String,
    #[serde(default)]
    summary: String,
}

/// Summarize each (a, b) pair's statuses in one oracle call. The result map
/// is keyed by the sorted pair; pairs the oracle skipped are simply absent,
/// the graph builder substitutes its fallback text.
pub async fn summarize_pairs(
    client: &dyn LlmClient,
    pairs: &HashMap<(String, String), Vec<String>>,
) -> Result<HashMap<(String, String), String>> {
    if pairs.is_empty() {
        return Ok(HashMap::new());
    }

    let mut lines: Vec<String> = pairs
        .iter()
        .map(|((a, b), statuses)| format!("{a} / {b}: {}", statuses.join("; ")))
        .collect();
    lines.sort();

    let response = client
        .complete(PAIR_SUMMARY_PROMPT, &lines.join("\n"), CompletionParams::json())
        .await
        .map_err(KithError::Storage)?;
    require_nonempty(&response, "pair summary")?;
    let parsed: PairSummaryResponse = lenient_json(&response)?;

    let mut out = HashMap::new();
    for entry in parsed.summaries {
        if entry.summary.trim().is_empty() {
            continue;
        }
        let (a, b) = sort_pair(entry.a, entry.b);
        out.insert((a, b), entry.summary.trim().to_string());
    }
    Ok(out)
}

/// Unordered pairs are keyed in sorted order everywhere.
pub fn sort_pair(a: String, b: String) -> (String, String) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::mock::MockProvider;
    use crate::retrieval::NoRetrieval;

    #[tokio::test]
    async fn test_empty_material_short_circuits() {
        let provider = MockProvider::new();
        let inputs = SummaryInputs::default();
        let summary = scenario_summary(&provider, &NoRetrieval, "u1", SummaryKind::Actors, &inputs)
            .await
            .unwrap();
        assert_eq!(summary, NO_INFORMATION);
        assert!(provider.calls().is_empty());
    }

    #[tokio::test]
    async fn test_dynamics_summary_includes_relations() {
        let provider = MockProvider::new();
        provider.push("They are circling a promotion.");
        let inputs = SummaryInputs {
            scenario_text: "...".into(),
            interaction_lines: vec!["B1 John: offered help".into()],
            relation_lines: vec!["B1 -> B2: rivalry [colleagues]".into()],
            ..Default::default()
        };
        let summary =
            scenario_summary(&provider, &NoRetrieval, "u1", SummaryKind::Dynamics, &inputs)
                .await
                .unwrap();
        assert_eq!(summary, "They are circling a promotion.");
        let call = &provider.calls()[0];
        assert!(call.user.contains("offered help"));
        assert!(call.user.contains("rivalry"));
    }

    #[tokio::test]
    async fn test_analysis_prediction_makes_two_calls() {
        let provider = MockProvider::new();
        provider.push("- key point one\n- key point two");
        provider.push("Things will escalate.");
        let inputs = SummaryInputs {
            scenario_text: "a long account".into(),
            ..Default::default()
        };
        let summary = scenario_summary(
            &provider,
            &NoRetrieval,
            "u1",
            SummaryKind::AnalysisPrediction,
            &inputs,
        )
        .await
        .unwrap();
        assert_eq!(summary, "Things will escalate.");
        assert_eq!(provider.calls().len(), 2);
        assert!(provider.calls()[1].user.contains("key point one"));
    }

    #[tokio::test]
    async fn test_categorize_forces_single_self() {
        let provider = MockProvider::new();
        provider.push(
            r#"{"Self": [
                {"canonical_name": "Me", "traits": "calm"},
                {"canonical_name": "John", "traits": "misplaced"}
            ], "People": [], "Group": []}"#,
        );
        let snap = categorize_actors(&provider, &["Me: calm".into()], &[])
            .await
            .unwrap();
        assert_eq!(snap.selves.len(), 1);
        assert_eq!(snap.selves[0].canonical_name, "Me");
        assert_eq!(snap.people.len(), 1);
    }

    #[tokio::test]
    async fn test_categorize_empty_input_skips_call() {
        let provider = MockProvider::new();
        let snap = categorize_actors(&provider, &[], &[]).await.unwrap();
        assert!(snap.canonical_names().is_empty());
        assert!(provider.calls().is_empty());
    }

    #[tokio::test]
    async fn test_pair_summaries_keyed_sorted() {
        let provider = MockProvider::new();
        provider.push(
            r#"{"summaries": [{"a": "John", "b": "Alice", "summary": "Old colleagues."}]}"#,
        );
        let mut pairs = HashMap::new();
        pairs.insert(
            ("Alice".to_string(), "John".to_string()),
            vec!["colleagues".to_string()],
        );
        let out = summarize_pairs(&provider, &pairs).await.unwrap();
        assert_eq!(
            out.get(&("Alice".to_string(), "John".to_string())).unwrap(),
            "Old colleagues."
        );
    }
}
