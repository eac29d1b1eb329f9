use std::collections::BTreeMap;
use std::collections::HashMap;

use serde::Serialize;

use crate::relationship::Relationship;

/// Secondary view over relationship assignments. A plain label map plus
/// an inverse holder map; the inverse map makes exclusivity enforcement
/// O(1) without any graph traversal.
#[derive(Debug, Default)]
pub struct SocialGraph {
    labels: BTreeMap<String, Relationship>,
    exclusive_holders: HashMap<Relationship, String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GraphSnapshot {
    pub total_users: usize,
    pub relationships: BTreeMap<String, Relationship>,
    pub edges: Vec<(String, Relationship)>,
}

impl SocialGraph {
    pub fn new() -> Self {
        SocialGraph::default()
    }

    /// Assign a label; an exclusive label is revoked from its previous
    /// holder first, so at most one user ever holds it. The displaced
    /// holder, if any, is returned so the caller can demote their
    /// stored record too.
    pub fn assign(&mut self, user_id: &str, label: Relationship) -> Option<String> {
        let mut displaced = None;
        if label.is_exclusive() {
            if let Some(previous) = self.exclusive_holders.insert(label, user_id.to_string()) {
                if previous != user_id {
                    tracing::info!(
                        label = %label,
                        from = %previous,
                        to = %user_id,
                        "exclusive relationship reassigned"
                    );
                    self.labels.insert(previous.clone(), Relationship::Stranger);
                    displaced = Some(previous);
                }
            }
        }

        // Releasing an exclusive label the user held before
        if let Some(old) = self.labels.get(user_id) {
            if old.is_exclusive() && *old != label {
                self.exclusive_holders.remove(old);
            }
        }

        self.labels.insert(user_id.to_string(), label);
        displaced
    }

    pub fn label_of(&self, user_id: &str) -> Option<Relationship> {
        self.labels.get(user_id).copied()
    }

    pub fn holder_of(&self, label: Relationship) -> Option<&str> {
        self.exclusive_holders.get(&label).map(|s| s.as_str())
    }

    /// Other users sharing `user_id`'s label, in stable iteration order.
    pub fn similar_users(&self, user_id: &str, max_results: usize) -> Vec<String> {
        let Some(label) = self.labels.get(user_id) else {
            return Vec::new();
        };

        self.labels
            .iter()
            .filter(|(id, l)| id.as_str() != user_id && *l == label)
            .map(|(id, _)| id.clone())
            .take(max_results)
            .collect()
    }

    pub fn snapshot(&self) -> GraphSnapshot {
        GraphSnapshot {
            total_users: self.labels.len(),
            relationships: self.labels.clone(),
            edges: self
                .labels
                .iter()
                .map(|(id, label)| (id.clone(), *label))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exclusive_label_single_holder() {
        let mut graph = SocialGraph::new();
        assert_eq!(graph.assign("alice", Relationship::Love), None);
        assert_eq!(graph.holder_of(Relationship::Love), Some("alice"));

        let displaced = graph.assign("bob", Relationship::Love);
        assert_eq!(displaced.as_deref(), Some("alice"));
        assert_eq!(graph.holder_of(Relationship::Love), Some("bob"));
        assert_eq!(graph.label_of("bob"), Some(Relationship::Love));
        // Alice no longer holds it
        assert_ne!(graph.label_of("alice"), Some(Relationship::Love));
    }

    #[test]
    fn test_non_exclusive_label_shared() {
        let mut graph = SocialGraph::new();
        graph.assign("alice", Relationship::Friend);
        graph.assign("bob", Relationship::Friend);

        assert_eq!(graph.label_of("alice"), Some(Relationship::Friend));
        assert_eq!(graph.label_of("bob"), Some(Relationship::Friend));
    }

    #[test]
    fn test_moving_off_exclusive_releases_it() {
        let mut graph = SocialGraph::new();
        graph.assign("alice", Relationship::Family);
        graph.assign("alice", Relationship::Friend);

        assert_eq!(graph.holder_of(Relationship::Family), None);
        graph.assign("bob", Relationship::Family);
        assert_eq!(graph.holder_of(Relationship::Family), Some("bob"));
    }

    #[test]
    fn test_similar_users_truncated() {
        let mut graph = SocialGraph::new();
        for id in ["a", "b", "c", "d", "e"] {
            graph.assign(id, Relationship::Friend);
        }

        let similar = graph.similar_users("a", 3);
        assert_eq!(similar.len(), 3);
        assert!(!similar.contains(&"a".to_string()));
    }

    #[test]
    fn test_similar_users_unknown_user() {
        let graph = SocialGraph::new();
        assert!(graph.similar_users("ghost", 3).is_empty());
    }

    #[test]
    fn test_snapshot() {
        let mut graph = SocialGraph::new();
        graph.assign("alice", Relationship::Close);
        graph.assign("bob", Relationship::Love);

        let snapshot = graph.snapshot();
        assert_eq!(snapshot.total_users, 2);
        assert_eq!(snapshot.relationships["bob"], Relationship::Love);
        assert_eq!(snapshot.edges.len(), 2);
    }
}
