//! Connected-components grouping of accepted matches.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use vintner_core::RecordId;

use crate::prepare::PreparedRecord;
use crate::similarity::MatchResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Resolution {
    AutoMerge,
    ManualReview,
}

/// Records connected by above-threshold matches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DuplicateGroup {
    /// The record that survives a merge: earliest `created_at`, ties by id.
    pub primary: RecordId,
    /// All members, primary first, then by `created_at` and id.
    pub members: Vec<RecordId>,
    /// Mean similarity over the matches that formed the group.
    pub average_similarity: f64,
    pub matches: Vec<MatchResult>,
    pub resolution: Resolution,
}

impl DuplicateGroup {
    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Members other than the primary.
    pub fn duplicates(&self) -> &[RecordId] {
        self.members.get(1..).unwrap_or_default()
    }
}

/// Union matched pairs and return every component with at least `min_size`
/// members, sorted by primary id. Every group starts as `ManualReview`.
pub fn build_groups(
    prepared: &[PreparedRecord<'_>],
    matches: Vec<(usize, usize, MatchResult)>,
    min_size: usize,
) -> Vec<DuplicateGroup> {
    let mut dsu = DisjointSet::new(prepared.len());
    for (left, right, _) in &matches {
        dsu.union(*left, *right);
    }

    let mut components: BTreeMap<usize, (Vec<usize>, Vec<MatchResult>)> = BTreeMap::new();
    for (left, _, result) in matches {
        let root = dsu.find(left);
        components.entry(root).or_default().1.push(result);
    }
    for idx in 0..prepared.len() {
        let root = dsu.find(idx);
        if let Some((members, _)) = components.get_mut(&root) {
            members.push(idx);
        }
    }

    let mut groups: Vec<DuplicateGroup> = components
        .into_values()
        .filter(|(members, _)| members.len() >= min_size.max(2))
        .map(|(mut members, matches)| {
            members.sort_by(|&a, &b| {
                let (a, b) = (prepared[a].record, prepared[b].record);
                a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id))
            });
            let members: Vec<RecordId> = members
                .into_iter()
                .map(|idx| prepared[idx].record.id.clone())
                .collect();
            let average_similarity = if matches.is_empty() {
                0.0
            } else {
                matches.iter().map(|m| m.similarity).sum::<f64>() / matches.len() as f64
            };
            DuplicateGroup {
                primary: members[0].clone(),
                members,
                average_similarity,
                matches,
                resolution: Resolution::ManualReview,
            }
        })
        .collect();

    groups.sort_by(|a, b| a.primary.cmp(&b.primary));
    groups
}

struct DisjointSet {
    parent: Vec<usize>,
    rank: Vec<u8>,
}

impl DisjointSet {
    fn new(size: usize) -> Self {
        Self {
            parent: (0..size).collect(),
            rank: vec![0; size],
        }
    }

    fn find(&mut self, x: usize) -> usize {
        let mut root = x;
        while self.parent[root] != root {
            root = self.parent[root];
        }
        let mut node = x;
        while self.parent[node] != root {
            let next = self.parent[node];
            self.parent[node] = root;
            node = next;
        }
        root
    }

    fn union(&mut self, left: usize, right: usize) {
        let left_root = self.find(left);
        let right_root = self.find(right);
        if left_root == right_root {
            return;
        }

        match self.rank[left_root].cmp(&self.rank[right_root]) {
            std::cmp::Ordering::Less => self.parent[left_root] = right_root,
            std::cmp::Ordering::Greater => self.parent[right_root] = left_root,
            std::cmp::Ordering::Equal => {
                self.parent[right_root] = left_root;
                self.rank[left_root] += 1;
            }
        }
    }
}
