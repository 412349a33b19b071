//! Union-find over raw event indices.
//!
//! Merge decisions arrive pairwise from three tiers (rule, embedding,
//! adjudication); the disjoint-set structure makes the resulting
//! clustering transitive without any group bookkeeping at decision sites.

/// Disjoint-set forest with path compression and union by size.
pub struct Clusters {
    parent: Vec<usize>,
    size: Vec<usize>,
}

impl Clusters {
    pub fn new(len: usize) -> Self {
        Self {
            parent: (0..len).collect(),
            size: vec![1; len],
        }
    }

    pub fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    /// Merge the sets containing `a` and `b`. Returns false if they were
    /// already in the same set.
    pub fn union(&mut self, a: usize, b: usize) -> bool {
        let (mut ra, mut rb) = (self.find(a), self.find(b));
        if ra == rb {
            return false;
        }
        if self.size[ra] < self.size[rb] {
            std::mem::swap(&mut ra, &mut rb);
        }
        self.parent[rb] = ra;
        self.size[ra] += self.size[rb];
        true
    }

    pub fn same_set(&mut self, a: usize, b: usize) -> bool {
        self.find(a) == self.find(b)
    }

    /// Member indices grouped by cluster, in ascending order both within
    /// groups and across groups (keyed by each group's smallest member).
    pub fn groups(&mut self) -> Vec<Vec<usize>> {
        let len = self.parent.len();
        let mut by_root: std::collections::BTreeMap<usize, Vec<usize>> = Default::default();
        for i in 0..len {
            let root = self.find(i);
            by_root.entry(root).or_default().push(i);
        }
        let mut groups: Vec<Vec<usize>> = by_root.into_values().collect();
        groups.sort_by_key(|g| g[0]);
        groups
    }
}
