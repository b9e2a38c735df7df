//! Merging overlapping identity sets.
//!
//! Different integrations often learn about the same person through
//! different identifiers: a forge reports `gitlab.com/username:octo`, a user
//! record ties it to `email:octo@example.com`, and a second notification only
//! knows the email. [`merge_and_deduplicate`] groups every set that is
//! connected through a chain of shared identifiers and folds each group into
//! one set.

use std::collections::HashMap;

use super::{NamespaceAndKind, Set};

/// Groups sets that share identifiers, transitively, and merges each group.
///
/// Two inputs end up in the same output set iff there is a chain of inputs
/// between them in which neighbours share at least one `(key, value)` pair.
/// Each output is the pointwise merge of its members in input order, so on
/// conflicting values for the same key the later input wins. Outputs are
/// ordered by the position of their first member.
pub fn merge_and_deduplicate(sets: &[Set]) -> Vec<Set> {
    group_indices(sets)
        .iter()
        .map(|members| merge_group(sets, members))
        .collect()
}

/// Merges `sets[i]` for each `i` in `members`, in that order. Indices past
/// the end of `sets` are ignored.
pub fn merge_group(sets: &[Set], members: &[usize]) -> Set {
    let merged = Set::new();
    for set in members.iter().filter_map(|&index| sets.get(index)) {
        merged.merge(set);
    }
    merged
}

/// Partitions input positions into groups connected by shared identifiers.
///
/// Groups are ordered by their first member and list members in ascending
/// order. Every index in `0..sets.len()` appears exactly once.
pub fn group_indices(sets: &[Set]) -> Vec<Vec<usize>> {
    let snapshots: Vec<_> = sets.iter().map(Set::snapshot).collect();
    let mut forest = DisjointSets::new(snapshots.len());

    let mut first_owner: HashMap<(&NamespaceAndKind, &str), usize> = HashMap::new();
    for (index, entries) in snapshots.iter().enumerate() {
        for (key, value) in entries {
            match first_owner.get(&(key, value.as_str())) {
                Some(&owner) => forest.union(owner, index),
                None => {
                    first_owner.insert((key, value.as_str()), index);
                }
            }
        }
    }

    let mut group_of_root: HashMap<usize, usize> = HashMap::new();
    let mut groups: Vec<Vec<usize>> = Vec::new();
    for index in 0..snapshots.len() {
        let root = forest.find(index);
        let group = *group_of_root.entry(root).or_insert_with(|| {
            groups.push(Vec::new());
            groups.len() - 1
        });
        groups[group].push(index);
    }

    groups
}

/// Union-find over indices with path halving and union by size.
struct DisjointSets {
    parent: Vec<usize>,
    size: Vec<usize>,
}

impl DisjointSets {
    fn new(n: usize) -> Self {
        DisjointSets {
            parent: (0..n).collect(),
            size: vec![1; n],
        }
    }

    fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    fn union(&mut self, a: usize, b: usize) {
        let (mut ra, mut rb) = (self.find(a), self.find(b));
        if ra == rb {
            return;
        }
        if self.size[ra] < self.size[rb] {
            std::mem::swap(&mut ra, &mut rb);
        }
        self.parent[rb] = ra;
        self.size[ra] += self.size[rb];
    }
}
