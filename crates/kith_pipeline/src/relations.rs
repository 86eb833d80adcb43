//! Relationship aggregation: resolve mention names to canonical identities
//! and fan relation statuses out over every unordered participant pair.

use kith_core::profile::{GroupProfile, IndividualProfile};
use kith_store::StoredRelation;
use std::collections::HashMap;

/// Split a combined mention like `"John (Johnny, J)"` into candidate names,
/// primary name first.
pub fn split_combined_name(name: &str) -> Vec<String> {
    let trimmed = name.trim();
    if let Some(open) = trimmed.find('(') {
        if trimmed.ends_with(')') && open > 0 {
            let mut candidates = vec![trimmed[..open].trim().to_string()];
            let inner = &trimmed[open + 1..trimmed.len() - 1];
            candidates.extend(
                inner
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty()),
            );
            candidates.retain(|c| !c.is_empty());
            if !candidates.is_empty() {
                return candidates;
            }
        }
    }
    vec![trimmed.to_string()]
}

/// Resolve a mention name to a canonical identity. Individual aliases win
/// over group aliases; matching is exact. A mention nothing matches stays a
/// provisional identity under its primary candidate name.
pub fn resolve_canonical(
    name: &str,
    individuals: &[IndividualProfile],
    groups: &[GroupProfile],
) -> String {
    let candidates = split_combined_name(name);
    for candidate in &candidates {
        for profile in individuals {
            if profile.aliases.iter().any(|a| a == candidate) {
                return profile.canonical_name.clone();
            }
        }
    }
    for candidate in &candidates {
        for profile in groups {
            if profile.aliases.iter().any(|a| a == candidate) {
                return profile.canonical_name.clone();
            }
        }
    }
    candidates.into_iter().next().unwrap_or_default()
}

/// Every unordered pair from a participant set, deduplicated and keyed in
/// sorted order.
pub fn expand_pairs(participants: &[String]) -> Vec<(String, String)> {
    let mut distinct: Vec<&String> = participants.iter().collect();
    distinct.sort();
    distinct.dedup();

    let mut pairs = Vec::new();
    for i in 0..distinct.len() {
        for j in (i + 1)..distinct.len() {
            pairs.push((distinct[i].clone(), distinct[j].clone()));
        }
    }
    pairs
}

/// Collect every observed relationship status per canonical pair. Relations
/// without a status or with fewer than two distinct resolved participants
/// contribute nothing.
pub fn aggregate_statuses(
    relations: &[StoredRelation],
    individuals: &[IndividualProfile],
    groups: &[GroupProfile],
) -> HashMap<(String, String), Vec<String>> {
    let mut out: HashMap<(String, String), Vec<String>> = HashMap::new();
    for relation in relations {
        let status = match &relation.relationship_status {
            Some(s) if !s.trim().is_empty() => s.trim().to_string(),
            _ => continue,
        };
        let resolved: Vec<String> = relation
            .participants
            .iter()
            .map(|p| resolve_canonical(p, individuals, groups))
            .filter(|p| !p.is_empty())
            .collect();
        for pair in expand_pairs(&resolved) {
            out.entry(pair).or_default().push(status.clone());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use kith_core::profile::IndividualTraitSet;

    fn profile(id: i64, canonical: &str, aliases: &[&str]) -> IndividualProfile {
        IndividualProfile {
            id,
            user_id: "u1".into(),
            canonical_name: canonical.into(),
            aliases: aliases.iter().map(|a| a.to_string()).collect(),
            traits: IndividualTraitSet::default(),
            last_updated: Utc::now(),
        }
    }

    fn relation(status: Option<&str>, participants: &[&str]) -> StoredRelation {
        StoredRelation {
            relation_description: "r".into(),
            relationship_status: status.map(str::to_string),
            participants: participants.iter().map(|p| p.to_string()).collect(),
        }
    }

    #[test]
    fn test_split_combined_name() {
        assert_eq!(
            split_combined_name("John (Johnny, J)"),
            vec!["John", "Johnny", "J"]
        );
        assert_eq!(split_combined_name("John"), vec!["John"]);
        assert_eq!(split_combined_name("  John  "), vec!["John"]);
    }

    #[test]
    fn test_resolve_prefers_individuals_and_falls_back_raw() {
        let individuals = vec![profile(1, "John", &["John", "Johnny"])];
        let groups: Vec<GroupProfile> = vec![];
        assert_eq!(resolve_canonical("Johnny", &individuals, &groups), "John");
        assert_eq!(
            resolve_canonical("Stranger (Mystery Man)", &individuals, &groups),
            "Stranger"
        );
    }

    #[test]
    fn test_three_participants_fan_out_to_three_pairs() {
        let rels = vec![relation(Some("teammates"), &["A", "B", "C"])];
        let out = aggregate_statuses(&rels, &[], &[]);
        assert_eq!(out.len(), 3);
        for pair in [("A", "B"), ("A", "C"), ("B", "C")] {
            let key = (pair.0.to_string(), pair.1.to_string());
            assert_eq!(out.get(&key).unwrap(), &vec!["teammates".to_string()]);
        }
    }

    #[test]
    fn test_statusless_and_single_participant_relations_are_ignored() {
        let rels = vec![
            relation(None, &["A", "B"]),
            relation(Some("  "), &["A", "B"]),
            relation(Some("friends"), &["A"]),
            relation(Some("friends"), &["A", "A"]),
        ];
        assert!(aggregate_statuses(&rels, &[], &[]).is_empty());
    }

    #[test]
    fn test_aliases_collapse_to_one_pair() {
        let individuals = vec![
            profile(1, "John", &["John", "Johnny"]),
            profile(2, "Me", &["Me"]),
        ];
        let rels = vec![
            relation(Some("friends"), &["Me", "Johnny"]),
            relation(Some("coworkers"), &["John", "Me"]),
        ];
        let out = aggregate_statuses(&rels, &individuals, &[]);
        assert_eq!(out.len(), 1);
        let statuses = out.get(&("John".to_string(), "Me".to_string())).unwrap();
        assert_eq!(statuses, &vec!["friends".to_string(), "coworkers".to_string()]);
    }
}
