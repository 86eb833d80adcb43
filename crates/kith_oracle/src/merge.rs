//! Identity-resolution oracle: given existing canonical profiles and the
//! latest scenario's trait observations, the model decides which
//! observations belong to which profile and emits an `updates` array. The
//! aggregator in `kith_pipeline` enforces the merge contract on top of
//! whatever comes back here.

use crate::client::{CompletionParams, LlmClient};
use crate::parse::{lenient_json, require_nonempty};
use kith_core::profile::{GroupProfile, GroupTraitSet, IndividualProfile, IndividualTraitSet};
use kith_core::{KithError, Result};
use serde::Deserialize;
use serde_json::json;

const INDIVIDUAL_MERGE_PROMPT: &str = r#"You maintain canonical profiles of people in a user's life. You receive the existing profiles (with numeric ids, canonical names, and known aliases) and a batch of new observations keyed by the name each person was mentioned as.

Decide, for every observed person, whether they are one of the existing profiles (nicknames, shortened names, and descriptions of the same person count as a match) or someone new. Return strict JSON:

{"updates": [{
  "individual_profile_id": <existing id or null for a new person>,
  "old_canonical_name": "<existing canonical name, or the observed name for a new person>",
  "new_canonical_name": "<the best canonical name going forward>",
  "aliases": ["every name this person has been called"],
  "<trait field>": "<merged description>", ...
}]}

Rules:
1. Emit exactly one update per distinct real person observed.
2. The narrator's own profile is canonically named "Me" and must keep that name.
3. Trait fields: include a field only when the new observations add or change something; carry the merged text, not a diff. Allowed fields: cognitive_pattern, affect_pattern, action_pattern, personality, beliefs_values, priorities, life_style, identity, capabilities, family, marriage_intimate_relationship, education, occupation_job_industry, social_economic_status, social_network, biological_characteristics.
4. When a genuinely new person would share a canonical name with an existing different person, qualify the new name (e.g. "John (coworker)").
5. Return only the JSON object."#;

const GROUP_MERGE_PROMPT: &str = r#"You maintain canonical profiles of groups and organizations in a user's life. You receive the existing group profiles (with numeric ids, canonical names, and known aliases) and a batch of new observations keyed by the name each group was mentioned as.

Decide, for every observed group, whether it is one of the existing profiles (abbreviations and informal names of the same group count as a match) or a new one. Return strict JSON:

{"updates": [{
  "group_profile_id": <existing id or null for a new group>,
  "old_canonical_name": "<existing canonical name, or the observed name for a new group>",
  "new_canonical_name": "<the best canonical name going forward>",
  "aliases": ["every name this group has been called"],
  "<trait field>": "<merged description>", ...
}]}

Rules:
1. Emit exactly one update per distinct real group observed.
2. Trait fields: include a field only when the new observations add or change something; carry the merged text. Allowed fields: group_type, domain, size, mission_vision_value, goal_strategy, objectives_plan, governance, organizational_structure, operation_system, organizational_politics, influence, leadership, culture, performance, challenge, funding_resources_budget.
3. When a genuinely new group would share a canonical name with an existing different group, qualify the new name.
4. Return only the JSON object."#;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct IndividualUpdate {
    #[serde(default)]
    pub individual_profile_id: Option<i64>,
    #[serde(default)]
    pub old_canonical_name: Option<String>,
    #[serde(default)]
    pub new_canonical_name: Option<String>,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(flatten)]
    pub traits: IndividualTraitSet,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GroupUpdate {
    #[serde(default)]
    pub group_profile_id: Option<i64>,
    #[serde(default)]
    pub old_canonical_name: Option<String>,
    #[serde(default)]
    pub new_canonical_name: Option<String>,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(flatten)]
    pub traits: GroupTraitSet,
}

#[derive(Debug, Deserialize)]
struct IndividualMergeResponse {
    #[serde(default)]
    updates: Vec<IndividualUpdate>,
}

#[derive(Debug, Deserialize)]
struct GroupMergeResponse {
    #[serde(default)]
    updates: Vec<GroupUpdate>,
}

/// Ask the oracle to reconcile new individual observations against existing
/// profiles. No observations means no call and no updates.
pub async fn merge_individuals(
    client: &dyn LlmClient,
    existing: &[IndividualProfile],
    observed: &[(String, IndividualTraitSet)],
) -> Result<Vec<IndividualUpdate>> {
    if observed.is_empty() {
        return Ok(Vec::new());
    }

    let existing_json: Vec<_> = existing
        .iter()
        .map(|p| {
            json!({
                "individual_profile_id": p.id,
                "canonical_name": p.canonical_name,
                "aliases": p.aliases,
                "traits": p.traits,
            })
        })
        .collect();
    let observed_json: Vec<_> = observed
        .iter()
        .map(|(name, traits)| json!({ "observed_as": name, "traits": traits }))
        .collect();
    let user = format!(
        "Existing profiles:\n{}\n\nNew observations:\n{}",
        serde_json::to_string_pretty(&existing_json).unwrap_or_default(),
        serde_json::to_string_pretty(&observed_json).unwrap_or_default(),
    );

    let response = client
        .complete(INDIVIDUAL_MERGE_PROMPT, &user, CompletionParams::json())
        .await
        .map_err(KithError::Storage)?;
    require_nonempty(&response, "individual merge")?;
    let parsed: IndividualMergeResponse = lenient_json(&response)?;
    Ok(parsed.updates)
}

/// Group twin of [`merge_individuals`].
pub async fn merge_groups(
    client: &dyn LlmClient,
    existing: &[GroupProfile],
    observed: &[(String, GroupTraitSet)],
) -> Result<Vec<GroupUpdate>> {
    if observed.is_empty() {
        return Ok(Vec::new());
    }

    let existing_json: Vec<_> = existing
        .iter()
        .map(|p| {
            json!({
                "group_profile_id": p.id,
                "canonical_name": p.canonical_name,
                "aliases": p.aliases,
                "traits": p.traits,
            })
        })
        .collect();
    let observed_json: Vec<_> = observed
        .iter()
        .map(|(name, traits)| json!({ "observed_as": name, "traits": traits }))
        .collect();
    let user = format!(
        "Existing profiles:\n{}\n\nNew observations:\n{}",
        serde_json::to_string_pretty(&existing_json).unwrap_or_default(),
        serde_json::to_string_pretty(&observed_json).unwrap_or_default(),
    );

    let response = client
        .complete(GROUP_MERGE_PROMPT, &user, CompletionParams::json())
        .await
        .map_err(KithError::Storage)?;
    require_nonempty(&response, "group merge")?;
    let parsed: GroupMergeResponse = lenient_json(&response)?;
    Ok(parsed.updates)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::mock::MockProvider;

    #[tokio::test]
    async fn test_no_observations_skips_the_call() {
        let provider = MockProvider::new();
        let updates = merge_individuals(&provider, &[], &[]).await.unwrap();
        assert!(updates.is_empty());
        assert!(provider.calls().is_empty());
    }

    #[tokio::test]
    async fn test_parses_update_with_flattened_traits() {
        let provider = MockProvider::new();
        provider.push(
            r#"{"updates": [{
                "individual_profile_id": 3,
                "old_canonical_name": "John",
                "new_canonical_name": "John",
                "aliases": ["John", "Johnny"],
                "occupation_job_industry": "carpenter"
            }]}"#,
        );
        let observed = vec![("Johnny".to_string(), IndividualTraitSet::default())];
        let updates = merge_individuals(&provider, &[], &observed).await.unwrap();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].individual_profile_id, Some(3));
        assert_eq!(
            updates[0].traits.occupation_job_industry.as_deref(),
            Some("carpenter")
        );
    }

    #[tokio::test]
    async fn test_malformed_merge_response() {
        let provider = MockProvider::new();
        provider.push("sorry, I can't");
        let observed = vec![("Acme".to_string(), GroupTraitSet::default())];
        let err = merge_groups(&provider, &[], &observed).await.unwrap_err();
        assert!(matches!(err, KithError::OracleMalformed(_)));
    }
}
