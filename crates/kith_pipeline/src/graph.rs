//! Social graph construction from the global snapshot and the aggregated
//! pair statuses.

use kith_core::graph::{GraphEdge, SocialGraph};
use kith_core::profile::GlobalActorsSnapshot;
use kith_oracle::summaries::summarize_pairs;
use kith_oracle::LlmClient;
use std::collections::{HashMap, HashSet};

/// Build the graph: one edge per aggregated pair whose endpoints are both
/// in the snapshot, one node per name appearing in a retained pair. Pairs
/// touching anything outside the snapshot are dropped, and a snapshot actor
/// with no retained relationship gets no node, so an empty relation map
/// yields an empty graph. Never an error.
pub async fn build_graph(
    client: &dyn LlmClient,
    snapshot: &GlobalActorsSnapshot,
    pair_statuses: &HashMap<(String, String), Vec<String>>,
) -> SocialGraph {
    let allowed: HashSet<&str> = snapshot.canonical_names().into_iter().collect();
    if allowed.is_empty() {
        return SocialGraph::default();
    }

    let retained: HashMap<(String, String), Vec<String>> = pair_statuses
        .iter()
        .filter(|((a, b), _)| allowed.contains(a.as_str()) && allowed.contains(b.as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    // Summaries are best-effort; a failed call leaves every retained pair
    // on the fallback text.
    let summaries = if retained.is_empty() {
        HashMap::new()
    } else {
        match summarize_pairs(client, &retained).await {
            Ok(summaries) => summaries,
            Err(e) => {
                tracing::warn!("pair summarization failed, using fallback text: {e}");
                HashMap::new()
            }
        }
    };

    let mut names: Vec<&str> = retained
        .keys()
        .flat_map(|(a, b)| [a.as_str(), b.as_str()])
        .collect();
    names.sort_unstable();
    names.dedup();
    let nodes: Vec<_> = names.into_iter().map(SocialGraph::node).collect();

    let mut edges: Vec<GraphEdge> = retained
        .keys()
        .map(|(a, b)| GraphEdge {
            source: a.clone(),
            target: b.clone(),
            summary: summaries
                .get(&(a.clone(), b.clone()))
                .cloned()
                .unwrap_or_else(|| SocialGraph::fallback_summary(a, b)),
        })
        .collect();
    edges.sort_by(|a, b| (&a.source, &a.target).cmp(&(&b.source, &b.target)));

    SocialGraph { nodes, edges }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kith_core::profile::ActorEntry;
    use kith_oracle::MockProvider;

    fn snapshot(names: &[&str]) -> GlobalActorsSnapshot {
        GlobalActorsSnapshot {
            people: names
                .iter()
                .map(|n| ActorEntry {
                    canonical_name: n.to_string(),
                    traits: String::new(),
                })
                .collect(),
            ..Default::default()
        }
    }

    fn pair(a: &str, b: &str, status: &str) -> ((String, String), Vec<String>) {
        ((a.to_string(), b.to_string()), vec![status.to_string()])
    }

    #[tokio::test]
    async fn test_empty_snapshot_yields_empty_graph() {
        let provider = MockProvider::new();
        let graph = build_graph(&provider, &GlobalActorsSnapshot::default(), &HashMap::new()).await;
        assert!(graph.nodes.is_empty());
        assert!(graph.edges.is_empty());
        assert!(provider.calls().is_empty());
    }

    #[tokio::test]
    async fn test_pairs_outside_snapshot_are_excluded() {
        let provider = MockProvider::new();
        provider.push(r#"{"summaries": [{"a": "Alice", "b": "Bob", "summary": "Close friends."}]}"#);
        let statuses: HashMap<_, _> = vec![
            pair("Alice", "Bob", "friends"),
            pair("Alice", "Zed", "strangers"),
        ]
        .into_iter()
        .collect();

        let graph = build_graph(&provider, &snapshot(&["Alice", "Bob"]), &statuses).await;
        assert_eq!(graph.nodes.len(), 2);
        assert_eq!(graph.edges.len(), 1);
        assert_eq!(graph.edges[0].summary, "Close friends.");
    }

    #[tokio::test]
    async fn test_actor_without_a_retained_pair_gets_no_node() {
        let provider = MockProvider::new();
        provider.push(r#"{"summaries": [{"a": "Alice", "b": "Bob", "summary": "Close friends."}]}"#);
        let statuses: HashMap<_, _> = vec![pair("Alice", "Bob", "friends")].into_iter().collect();

        let graph = build_graph(&provider, &snapshot(&["Alice", "Bob", "Carol"]), &statuses).await;
        let ids: Vec<&str> = graph.nodes.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["Alice", "Bob"]);
        assert_eq!(graph.edges.len(), 1);
    }

    #[tokio::test]
    async fn test_empty_relation_map_yields_empty_graph() {
        let provider = MockProvider::new();
        let graph = build_graph(&provider, &snapshot(&["Alice"]), &HashMap::new()).await;
        assert!(graph.nodes.is_empty());
        assert!(graph.edges.is_empty());
        assert!(provider.calls().is_empty());
    }

    #[tokio::test]
    async fn test_missing_summary_uses_deterministic_fallback() {
        let provider = MockProvider::new();
        provider.push(r#"{"summaries": []}"#);
        let statuses: HashMap<_, _> = vec![pair("Alice", "Bob", "friends")].into_iter().collect();

        let graph = build_graph(&provider, &snapshot(&["Alice", "Bob"]), &statuses).await;
        assert_eq!(
            graph.edges[0].summary,
            "Relationship between Alice and Bob not summarized."
        );
    }

    #[tokio::test]
    async fn test_oracle_failure_degrades_to_fallback() {
        let provider = MockProvider::new();
        provider.push_error("upstream down");
        let statuses: HashMap<_, _> = vec![pair("Alice", "Bob", "friends")].into_iter().collect();

        let graph = build_graph(&provider, &snapshot(&["Alice", "Bob"]), &statuses).await;
        assert_eq!(graph.edges.len(), 1);
        assert!(graph.edges[0].summary.contains("not summarized"));
    }
}
