use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Canonical name reserved for the submitting user's own profile.
pub const SELF_NAME: &str = "Me";

/// Defines a set of optional free-text trait fields together with the
/// helpers every trait set needs: non-null merge, key/value flattening,
/// emptiness check.
macro_rules! trait_set {
    ($(#[$meta:meta])* $name:ident { $($field:ident),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
        #[serde(default)]
        pub struct $name {
            $(
                #[serde(skip_serializing_if = "Option::is_none")]
                pub $field: Option<String>,
            )+
        }

        impl $name {
            /// Overwrite each field with the incoming value when that value
            /// is present; absent incoming fields never erase stored text.
            pub fn merge_from(&mut self, incoming: &Self) {
                $(
                    if let Some(v) = &incoming.$field {
                        self.$field = Some(v.clone());
                    }
                )+
            }

            /// Field name / value pairs for populated fields, in declaration
            /// order. Used to flatten profiles into prompt text.
            pub fn entries(&self) -> Vec<(&'static str, &str)> {
                let mut out = Vec::new();
                $(
                    if let Some(v) = &self.$field {
                        out.push((stringify!($field), v.as_str()));
                    }
                )+
                out
            }

            pub fn is_empty(&self) -> bool {
                self.entries().is_empty()
            }
        }
    };
}

trait_set! {
    /// Observed traits of a single person.
    IndividualTraitSet {
        cognitive_pattern,
        affect_pattern,
        action_pattern,
        personality,
        beliefs_values,
        priorities,
        life_style,
        identity,
        capabilities,
        family,
        marriage_intimate_relationship,
        education,
        occupation_job_industry,
        social_economic_status,
        social_network,
        biological_characteristics,
    }
}

trait_set! {
    /// Observed traits of an organization or collective.
    GroupTraitSet {
        group_type,
        domain,
        size,
        mission_vision_value,
        goal_strategy,
        objectives_plan,
        governance,
        organizational_structure,
        operation_system,
        organizational_politics,
        influence,
        leadership,
        culture,
        performance,
        challenge,
        funding_resources_budget,
    }
}

/// Flatten a named trait set into one prompt line, e.g.
/// `"John: occupation_job_industry: carpenter; family: two kids"`.
pub fn flatten_entries(name: &str, entries: &[(&'static str, &str)]) -> String {
    if entries.is_empty() {
        return name.to_string();
    }
    let body: Vec<String> = entries.iter().map(|(k, v)| format!("{k}: {v}")).collect();
    format!("{name}: {}", body.join("; "))
}

// ============================================================================
// Aggregated profiles
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndividualProfile {
    pub id: i64,
    pub user_id: String,
    pub canonical_name: String,
    /// Sorted, deduplicated, always contains `canonical_name`.
    pub aliases: Vec<String>,
    pub traits: IndividualTraitSet,
    pub last_updated: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupProfile {
    pub id: i64,
    pub user_id: String,
    pub canonical_name: String,
    pub aliases: Vec<String>,
    pub traits: GroupTraitSet,
    pub last_updated: DateTime<Utc>,
}

impl IndividualProfile {
    pub fn is_self(&self) -> bool {
        self.canonical_name == SELF_NAME
    }
}

/// Normalize an alias list: trim, drop empties, ensure the canonical name is
/// present, dedupe, sort.
pub fn normalize_aliases(canonical_name: &str, aliases: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut out: Vec<String> = aliases
        .into_iter()
        .map(|a| a.trim().to_string())
        .filter(|a| !a.is_empty())
        .collect();
    out.push(canonical_name.to_string());
    out.sort();
    out.dedup();
    out
}

// ============================================================================
// Global snapshot
// ============================================================================

/// One categorized actor in the global snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActorEntry {
    pub canonical_name: String,
    /// Flattened trait description, ready for prompt assembly.
    pub traits: String,
}

/// The per-user categorized view of every known actor. Rebuilt wholesale
/// after each aggregation pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GlobalActorsSnapshot {
    #[serde(rename = "Self", default)]
    pub selves: Vec<ActorEntry>,
    #[serde(rename = "People", default)]
    pub people: Vec<ActorEntry>,
    #[serde(rename = "Group", default)]
    pub groups: Vec<ActorEntry>,
}

impl GlobalActorsSnapshot {
    /// Every canonical name across the three buckets, in bucket order.
    pub fn canonical_names(&self) -> Vec<&str> {
        self.selves
            .iter()
            .chain(&self.people)
            .chain(&self.groups)
            .map(|e| e.canonical_name.as_str())
            .collect()
    }

    /// Remove an actor from every bucket, matching case-insensitively.
    pub fn remove_actor(&mut self, name: &str) {
        let target = name.to_lowercase();
        for bucket in [&mut self.selves, &mut self.people, &mut self.groups] {
            bucket.retain(|e| e.canonical_name.to_lowercase() != target);
        }
    }
}
