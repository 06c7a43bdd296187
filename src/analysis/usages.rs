//! Usage sets shared between merged values.
//!
//! When two values meet at a control-flow join, any consumer of either one must be
//! visible through both: after the join they are indistinguishable, so a later consumer
//! taints every value it could have come from. [`UsageTable`] models this as a
//! union-find over usage keys where each equivalence class owns one set of consuming
//! instructions.

use std::collections::BTreeSet;

use crate::ir::InsnId;

/// Handle of a value's usage class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UsageKey(usize);

/// Union-find over usage keys, one consumer set per class.
#[derive(Debug, Default, Clone)]
pub struct UsageTable {
    parent: Vec<usize>,
    sets: Vec<BTreeSet<InsnId>>,
}

impl UsageTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates a new singleton class with no usages.
    pub fn fresh(&mut self) -> UsageKey {
        let key = self.parent.len();
        self.parent.push(key);
        self.sets.push(BTreeSet::new());
        UsageKey(key)
    }

    /// Representative of the class containing `key`.
    #[must_use]
    pub fn find(&self, key: UsageKey) -> UsageKey {
        let mut current = key.0;
        while self.parent[current] != current {
            current = self.parent[current];
        }
        UsageKey(current)
    }

    fn find_compress(&mut self, key: UsageKey) -> usize {
        let root = self.find(key).0;
        let mut current = key.0;
        while self.parent[current] != root {
            let next = self.parent[current];
            self.parent[current] = root;
            current = next;
        }
        root
    }

    /// Records `insn` as a consumer of every value in the class of `key`.
    pub fn record(&mut self, key: UsageKey, insn: InsnId) {
        let root = self.find_compress(key);
        self.sets[root].insert(insn);
    }

    /// Joins the classes of `a` and `b`; afterwards both see the union of their usages.
    pub fn union(&mut self, a: UsageKey, b: UsageKey) {
        let ra = self.find_compress(a);
        let rb = self.find_compress(b);
        if ra == rb {
            return;
        }
        let (big, small) = if self.sets[ra].len() >= self.sets[rb].len() {
            (ra, rb)
        } else {
            (rb, ra)
        };
        let moved = std::mem::take(&mut self.sets[small]);
        self.sets[big].extend(moved);
        self.parent[small] = big;
    }

    /// Consumers recorded for the class of `key`.
    #[must_use]
    pub fn usages(&self, key: UsageKey) -> &BTreeSet<InsnId> {
        &self.sets[self.find(key).0]
    }

    /// Whether `a` and `b` belong to the same class.
    #[must_use]
    pub fn same_class(&self, a: UsageKey, b: UsageKey) -> bool {
        self.find(a) == self.find(b)
    }
}
