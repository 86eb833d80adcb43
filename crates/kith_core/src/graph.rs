use serde::{Deserialize, Serialize};

/// Node id and label are both the canonical name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: String,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphEdge {
    pub source: String,
    pub target: String,
    pub summary: String,
}

/// The cached per-user social graph, rebuilt wholesale after aggregation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SocialGraph {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
}

impl SocialGraph {
    pub fn node(name: &str) -> GraphNode {
        GraphNode {
            id: name.to_string(),
            label: name.to_string(),
        }
    }

    /// Text used for an edge whose pair summary never arrived.
    pub fn fallback_summary(a: &str, b: &str) -> String {
        format!("Relationship between {a} and {b} not summarized.")
    }

    /// Drop a node and every edge touching it, matching case-insensitively.
    /// Returns true if anything was removed.
    pub fn remove_actor(&mut self, name: &str) -> bool {
        let target = name.to_lowercase();
        let before = self.nodes.len() + self.edges.len();
        self.nodes.retain(|n| n.id.to_lowercase() != target);
        self.edges.retain(|e| {
            e.source.to_lowercase() != target && e.target.to_lowercase() != target
        });
        before != self.nodes.len() + self.edges.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> SocialGraph {
        SocialGraph {
            nodes: vec![
                SocialGraph::node("Me"),
                SocialGraph::node("John"),
                SocialGraph::node("Acme"),
            ],
            edges: vec![
                GraphEdge {
                    source: "John".into(),
                    target: "Me".into(),
                    summary: "old friends".into(),
                },
                GraphEdge {
                    source: "Acme".into(),
                    target: "Me".into(),
                    summary: "employer".into(),
                },
            ],
        }
    }

    #[test]
    fn test_remove_actor_strips_node_and_touching_edges() {
        let mut g = sample();
        assert!(g.remove_actor("john"));
        assert_eq!(g.nodes.len(), 2);
        assert_eq!(g.edges.len(), 1);
        assert_eq!(g.edges[0].source, "Acme");
    }

    #[test]
    fn test_remove_unknown_actor_is_a_noop() {
        let mut g = sample();
        assert!(!g.remove_actor("Nobody"));
        assert_eq!(g.nodes.len(), 3);
        assert_eq!(g.edges.len(), 2);
    }

    #[test]
    fn test_fallback_summary_text() {
        assert_eq!(
            SocialGraph::fallback_summary("Alice", "Bob"),
            "Relationship between Alice and Bob not summarized."
        );
    }
}
