//! Simulation oracles: one-shot transcript generation and the next-turns
//! call for live sessions. Both work over frozen profile and relation
//! snapshots supplied by the engine.

use crate::client::{CompletionParams, LlmClient};
use crate::parse::{lenient_json, require_nonempty};
use kith_core::simulation::{Turn, TurnKind};
use kith_core::{KithError, Result};
use serde::Deserialize;

const BATCH_PROMPT: &str = r#"You simulate how a social scenario would play out between the given actors. You receive each actor's profile, the known relationships between them, and a scenario description.

Write a plausible transcript as strict JSON:

{"turns": [{"actor": "<actor name>", "kind": "speech" | "thought" | "feeling" | "action", "content": "..."}]}

Rules:
1. Only use the listed actors, with their names exactly as given.
2. Stay consistent with the profiles and relationships.
3. Return only the JSON object."#;

const LIVE_PROMPT: &str = r#"You simulate a live social scenario between the given actors. You receive each actor's profile, the known relationships, the scenario description, the transcript so far, and which actor the user plays.

Continue the transcript with the other actors' responses to the user's latest turn, as strict JSON:

{"turns": [{"actor": "<actor name>", "kind": "speech" | "thought" | "feeling" | "action", "content": "..."}]}

Rules:
1. Never produce turns for the user's actor.
2. Only use the listed actors, with their names exactly as given.
3. Stay consistent with the profiles, relationships, and transcript so far.
4. Return only the JSON object."#;

#[derive(Debug, Deserialize)]
struct TranscriptResponse {
    #[serde(default)]
    turns: Vec<RawTurn>,
}

#[derive(Debug, Deserialize)]
struct RawTurn {
    #[serde(default)]
    actor: String,
    #[serde(default)]
    kind: String,
    #[serde(default)]
    content: String,
}

fn validate_turns(raw: Vec<RawTurn>) -> Vec<Turn> {
    raw.into_iter()
        .filter_map(|t| {
            let kind = match t.kind.as_str() {
                "speech" => TurnKind::Speech,
                "thought" => TurnKind::Thought,
                "feeling" => TurnKind::Feeling,
                "action" => TurnKind::Action,
                other => {
                    tracing::warn!("dropping turn with unknown kind {other:?}");
                    return None;
                }
            };
            if t.actor.trim().is_empty() || t.content.trim().is_empty() {
                tracing::warn!("dropping turn with empty actor or content");
                return None;
            }
            Some(Turn {
                actor: t.actor.trim().to_string(),
                kind,
                content: t.content.trim().to_string(),
            })
        })
        .collect()
}

fn setup_block(scenario_text: &str, profile_lines: &[String], relation_lines: &[String]) -> String {
    format!(
        "Actor profiles:\n{}\n\nRelationships:\n{}\n\nScenario:\n{}",
        profile_lines.join("\n"),
        if relation_lines.is_empty() {
            "(none known)".to_string()
        } else {
            relation_lines.join("\n")
        },
        scenario_text,
    )
}

fn transcript_block(history: &[Turn]) -> String {
    history
        .iter()
        .map(|t| {
            let kind = serde_json::to_string(&t.kind).unwrap_or_default();
            format!("{} [{}]: {}", t.actor, kind.trim_matches('"'), t.content)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// One-shot transcript for a batch simulation. The engine applies the turn
/// cap; this returns every valid turn the oracle produced.
pub async fn generate_transcript(
    client: &dyn LlmClient,
    scenario_text: &str,
    profile_lines: &[String],
    relation_lines: &[String],
) -> Result<Vec<Turn>> {
    let user = setup_block(scenario_text, profile_lines, relation_lines);
    let response = client
        .complete(BATCH_PROMPT, &user, CompletionParams::json())
        .await
        .map_err(KithError::Storage)?;
    require_nonempty(&response, "batch simulation")?;
    let parsed: TranscriptResponse = lenient_json(&response)?;
    Ok(validate_turns(parsed.turns))
}

/// Next oracle turns for a live session, given the full history including
/// the user's latest turn.
pub async fn next_turns(
    client: &dyn LlmClient,
    scenario_text: &str,
    profile_lines: &[String],
    relation_lines: &[String],
    user_actor: &str,
    history: &[Turn],
) -> Result<Vec<Turn>> {
    let user = format!(
        "{}\n\nThe user plays: {}\n\nTranscript so far:\n{}",
        setup_block(scenario_text, profile_lines, relation_lines),
        user_actor,
        transcript_block(history),
    );
    let response = client
        .complete(LIVE_PROMPT, &user, CompletionParams::json())
        .await
        .map_err(KithError::Storage)?;
    require_nonempty(&response, "live simulation")?;
    let parsed: TranscriptResponse = lenient_json(&response)?;
    // The user's actor never gets oracle-authored turns.
    Ok(validate_turns(parsed.turns)
        .into_iter()
        .filter(|t| t.actor != user_actor)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::mock::MockProvider;

    #[tokio::test]
    async fn test_generate_transcript_filters_invalid_turns() {
        let provider = MockProvider::new();
        provider.push(
            r#"{"turns": [
                {"actor": "John", "kind": "speech", "content": "Morning."},
                {"actor": "John", "kind": "telepathy", "content": "???"},
                {"actor": "", "kind": "speech", "content": "nameless"},
                {"actor": "Me", "kind": "thought", "content": "Here we go."}
            ]}"#,
        );
        let turns = generate_transcript(&provider, "scenario", &["Me".into(), "John".into()], &[])
            .await
            .unwrap();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].kind, TurnKind::Speech);
        assert_eq!(turns[1].kind, TurnKind::Thought);
    }

    #[tokio::test]
    async fn test_next_turns_never_speaks_for_the_user() {
        let provider = MockProvider::new();
        provider.push(
            r#"{"turns": [
                {"actor": "Me", "kind": "speech", "content": "impersonated"},
                {"actor": "John", "kind": "speech", "content": "Fair point."}
            ]}"#,
        );
        let history = vec![Turn::speech("Me", "What do you think?")];
        let turns = next_turns(&provider, "scenario", &[], &[], "Me", &history)
            .await
            .unwrap();
        assert_eq!(turns.len(), 1);
        assert_eq!(turns[0].actor, "John");
        assert!(provider.calls()[0].user.contains("What do you think?"));
    }
}
