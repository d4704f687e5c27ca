//! Reconciliation of a server record set with the local one.

use crate::idea::{Idea, next_local_id};
use std::collections::HashSet;

/// Outcome of merging a server record set with the local record set.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Merge {
    /// Server records followed by local-only records.
    pub merged: Vec<Idea>,
    /// Local records whose id the server did not return, in local order.
    pub missing_on_server: Vec<Idea>,
}

impl Merge {
    /// Next local id after this merge, or `None` when the merged set is empty
    /// (the caller keeps its current counter in that case).
    pub fn next_local_id(&self) -> Option<u128> {
        if self.merged.is_empty() {
            None
        } else {
            Some(next_local_id(&self.merged))
        }
    }
}

/// Merge `server` with `local`.
///
/// The result is `server ∪ {l ∈ local : l.id ∉ ids(server)}`. The server copy
/// wins whenever both sides hold the same id; a local record with no server
/// counterpart is kept and reported in `missing_on_server` so it can be pushed.
pub fn merge_ideas(server: Vec<Idea>, local: &[Idea]) -> Merge {
    let mut seen: HashSet<String> = server.iter().map(|idea| idea.id.clone()).collect();

    let missing_on_server: Vec<Idea> = local
        .iter()
        .filter(|idea| seen.insert(idea.id.clone()))
        .cloned()
        .collect();

    let mut merged = server;
    merged.extend(missing_on_server.iter().cloned());

    Merge {
        merged,
        missing_on_server,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::idea::IdeaDraft;

    fn idea(id: &str, name: &str) -> Idea {
        IdeaDraft {
            name: name.to_string(),
            ..Default::default()
        }
        .into_idea(id)
    }

    fn ids(ideas: &[Idea]) -> Vec<&str> {
        ideas.iter().map(|i| i.id.as_str()).collect()
    }

    #[test]
    fn test_merge_server_wins_on_collision() {
        let server = vec![idea("1", "server")];
        let local = vec![idea("1", "local")];

        let merge = merge_ideas(server, &local);
        assert_eq!(merge.merged.len(), 1);
        assert_eq!(merge.merged[0].name, "server");
        assert!(merge.missing_on_server.is_empty());
    }

    #[test]
    fn test_merge_keeps_local_only_records() {
        let server = vec![idea("100", "remote")];
        let local = vec![idea("1", "offline")];

        let merge = merge_ideas(server, &local);
        assert_eq!(ids(&merge.merged), vec!["100", "1"]);
        assert_eq!(ids(&merge.missing_on_server), vec!["1"]);
        assert_eq!(merge.next_local_id(), Some(101));
    }

    #[test]
    fn test_merge_empty_both_sides() {
        let merge = merge_ideas(Vec::new(), &[]);
        assert!(merge.merged.is_empty());
        assert_eq!(merge.next_local_id(), None);
    }

    #[test]
    fn test_merge_drops_duplicate_local_ids() {
        let local = vec![idea("5", "first"), idea("5", "second")];
        let merge = merge_ideas(Vec::new(), &local);
        assert_eq!(merge.merged.len(), 1);
        assert_eq!(merge.merged[0].name, "first");
    }

    #[test]
    fn test_merge_equals_union_definition() {
        let server = vec![idea("a", "s"), idea("2", "s")];
        let local = vec![idea("2", "l"), idea("3", "l"), idea("a", "l"), idea("b", "l")];

        let merge = merge_ideas(server.clone(), &local);

        let server_ids: HashSet<&str> = server.iter().map(|i| i.id.as_str()).collect();
        let mut expected = server.clone();
        expected.extend(
            local
                .iter()
                .filter(|l| !server_ids.contains(l.id.as_str()))
                .cloned(),
        );
        assert_eq!(merge.merged, expected);
        assert_eq!(merge.next_local_id(), Some(4));
    }
}
