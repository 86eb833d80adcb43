//! Profile aggregation: turn the merge oracle's decisions into resolved
//! profile writes that honor the merge contract, then apply them in one
//! transaction per kind.
//!
//! The planning step is pure so the contract can be tested without a
//! database or an oracle.

use kith_core::profile::{
    normalize_aliases, GroupTraitSet, IndividualTraitSet, SELF_NAME,
};
use kith_oracle::merge::{self, GroupUpdate, IndividualUpdate};
use kith_oracle::LlmClient;
use kith_store::{ResolvedProfileWrite, SqliteStore};
use std::collections::HashMap;

/// Trait sets that support non-null field overwrite.
pub trait MergeTraits: Clone + Default {
    fn apply(&mut self, incoming: &Self);
}

impl MergeTraits for IndividualTraitSet {
    fn apply(&mut self, incoming: &Self) {
        self.merge_from(incoming);
    }
}

impl MergeTraits for GroupTraitSet {
    fn apply(&mut self, incoming: &Self) {
        self.merge_from(incoming);
    }
}

/// Kind-agnostic view of a stored profile.
#[derive(Debug, Clone)]
pub struct ExistingProfile<T> {
    pub id: i64,
    pub canonical_name: String,
    pub aliases: Vec<String>,
    pub traits: T,
}

/// Kind-agnostic view of one oracle merge decision.
#[derive(Debug, Clone)]
pub struct MergeDecision<T> {
    pub profile_id: Option<i64>,
    pub old_canonical_name: Option<String>,
    pub new_canonical_name: Option<String>,
    pub aliases: Vec<String>,
    pub traits: T,
}

fn non_empty(s: Option<String>) -> Option<String> {
    s.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

/// Resolve oracle decisions into profile writes.
///
/// Enforced here, whatever the oracle said:
/// - decisions with an unresolvable id become creates; decisions with no
///   usable canonical name are skipped;
/// - the canonical name can be replaced but never emptied;
/// - the alias set is the union of the old aliases, both names, and the
///   incoming aliases, and always contains the final canonical name;
/// - with `pin_self`, the self profile keeps canonical name and alias set
///   exactly `{"Me"}`, and a second decision claiming the name is
///   redirected onto it;
/// - canonical names stay unique per kind: colliding names get a numeric
///   qualifier.
pub fn plan_profile_writes<T: MergeTraits>(
    existing: &[ExistingProfile<T>],
    decisions: Vec<MergeDecision<T>>,
    pin_self: bool,
) -> Vec<ResolvedProfileWrite<T>> {
    let by_id: HashMap<i64, &ExistingProfile<T>> =
        existing.iter().map(|p| (p.id, p)).collect();
    let self_id = pin_self
        .then(|| {
            existing
                .iter()
                .find(|p| p.canonical_name == SELF_NAME)
                .map(|p| p.id)
        })
        .flatten();

    let mut planned: Vec<ResolvedProfileWrite<T>> = Vec::new();

    for decision in decisions {
        let old_name = non_empty(decision.old_canonical_name);
        let new_name = non_empty(decision.new_canonical_name);

        let mut target = decision.profile_id.and_then(|id| by_id.get(&id).copied());
        let mut final_name = match (&target, new_name.clone().or_else(|| old_name.clone())) {
            (Some(profile), name) => name.unwrap_or_else(|| profile.canonical_name.clone()),
            (None, Some(name)) => name,
            (None, None) => {
                tracing::warn!("skipping merge decision with no usable canonical name");
                continue;
            }
        };

        let is_self = pin_self
            && (final_name == SELF_NAME
                || old_name.as_deref() == Some(SELF_NAME)
                || target.map(|p| p.canonical_name == SELF_NAME).unwrap_or(false));
        if is_self {
            final_name = SELF_NAME.to_string();
            // Only one self profile: redirect onto it if it already exists.
            if let Some(id) = self_id {
                target = by_id.get(&id).copied();
            }
        }

        let target_id = target.map(|p| p.id);

        // Uniqueness among existing profiles and earlier planned writes.
        if !is_self {
            let taken = |name: &str| {
                existing
                    .iter()
                    .any(|p| p.canonical_name == name && Some(p.id) != target_id)
                    || planned.iter().any(|w| {
                        w.canonical_name == name
                            && (w.id.is_none() || w.id != target_id)
                    })
            };
            if taken(&final_name) {
                let base = final_name.clone();
                let mut n = 2;
                while taken(&final_name) {
                    final_name = format!("{base} ({n})");
                    n += 1;
                }
            }
        }

        let mut traits = target.map(|p| p.traits.clone()).unwrap_or_default();
        traits.apply(&decision.traits);

        let aliases = if is_self {
            vec![SELF_NAME.to_string()]
        } else {
            let mut pool = target.map(|p| p.aliases.clone()).unwrap_or_default();
            pool.extend(old_name.clone());
            pool.extend(new_name.clone());
            pool.extend(decision.aliases);
            normalize_aliases(&final_name, pool)
        };

        // A later decision hitting the same profile folds into the earlier
        // write instead of producing a second row update.
        if target_id.is_some() {
            if let Some(prior) = planned.iter_mut().find(|w| w.id == target_id) {
                prior.canonical_name = final_name.clone();
                prior.traits.apply(&decision.traits);
                if is_self {
                    prior.aliases = vec![SELF_NAME.to_string()];
                } else {
                    let mut pool = prior.aliases.clone();
                    pool.extend(aliases);
                    prior.aliases = normalize_aliases(&final_name, pool);
                }
                continue;
            }
        }

        planned.push(ResolvedProfileWrite {
            id: target_id,
            canonical_name: final_name,
            aliases,
            traits,
        });
    }

    planned
}

fn individual_decision(update: IndividualUpdate) -> MergeDecision<IndividualTraitSet> {
    MergeDecision {
        profile_id: update.individual_profile_id,
        old_canonical_name: update.old_canonical_name,
        new_canonical_name: update.new_canonical_name,
        aliases: update.aliases,
        traits: update.traits,
    }
}

fn group_decision(update: GroupUpdate) -> MergeDecision<GroupTraitSet> {
    MergeDecision {
        profile_id: update.group_profile_id,
        old_canonical_name: update.old_canonical_name,
        new_canonical_name: update.new_canonical_name,
        aliases: update.aliases,
        traits: update.traits,
    }
}

/// Merge one scenario's individual trait observations into the user's
/// profiles. Oracle failure means no writes at all.
pub async fn aggregate_individuals(
    store: &SqliteStore,
    client: &dyn LlmClient,
    user_id: &str,
    scenario_id: i64,
) -> kith_core::Result<usize> {
    let (observed, _) = store.trait_observations(scenario_id).await?;
    if observed.is_empty() {
        return Ok(0);
    }
    let existing = store.individual_profiles(user_id).await?;
    let updates = merge::merge_individuals(client, &existing, &observed).await?;

    let views: Vec<ExistingProfile<IndividualTraitSet>> = existing
        .into_iter()
        .map(|p| ExistingProfile {
            id: p.id,
            canonical_name: p.canonical_name,
            aliases: p.aliases,
            traits: p.traits,
        })
        .collect();
    let decisions = updates.into_iter().map(individual_decision).collect();
    let writes = plan_profile_writes(&views, decisions, true);
    store.apply_individual_merge(user_id, &writes).await?;
    tracing::info!(user_id, count = writes.len(), "applied individual merge");
    Ok(writes.len())
}

/// Group twin of [`aggregate_individuals`]. Ids are resolved against the
/// group profile table only.
pub async fn aggregate_groups(
    store: &SqliteStore,
    client: &dyn LlmClient,
    user_id: &str,
    scenario_id: i64,
) -> kith_core::Result<usize> {
    let (_, observed) = store.trait_observations(scenario_id).await?;
    if observed.is_empty() {
        return Ok(0);
    }
    let existing = store.group_profiles(user_id).await?;
    let updates = merge::merge_groups(client, &existing, &observed).await?;

    let views: Vec<ExistingProfile<GroupTraitSet>> = existing
        .into_iter()
        .map(|p| ExistingProfile {
            id: p.id,
            canonical_name: p.canonical_name,
            aliases: p.aliases,
            traits: p.traits,
        })
        .collect();
    let decisions = updates.into_iter().map(group_decision).collect();
    let writes = plan_profile_writes(&views, decisions, false);
    store.apply_group_merge(user_id, &writes).await?;
    tracing::info!(user_id, count = writes.len(), "applied group merge");
    Ok(writes.len())
}
