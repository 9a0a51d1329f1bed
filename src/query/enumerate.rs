//! Level-by-level enumeration of connected alias subsets.
//!
//! Mirrors the dynamic-programming shape of a bottom-up join optimizer:
//! every connected subset appears exactly once, at its level, with one valid
//! binary decomposition into previously-enumerated halves.

use std::collections::{BTreeMap, HashSet};

use ecow::EcoString;
use tracing::warn;

use crate::query::join_graph::JoinGraph;
use crate::query::{Diagnostic, DiagnosticKind, subset_key};

/// One enumerated subset. `left` and `right` are both empty exactly for
/// singletons; otherwise they partition `subset` into two previously
/// enumerated halves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subplan {
    pub level: usize,
    pub subset: Vec<EcoString>,
    pub left: Vec<EcoString>,
    pub right: Vec<EcoString>,
}

impl Subplan {
    pub fn key(&self) -> String {
        subset_key(&self.subset)
    }

    pub fn is_singleton(&self) -> bool {
        self.left.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct Enumeration {
    /// Subplans in strict level order, lexicographic within a level.
    pub plans: Vec<Subplan>,
    /// Number of subsets accepted at each level.
    pub level_counts: BTreeMap<usize, usize>,
    pub diagnostics: Vec<Diagnostic>,
}

/// Enumerate every connected subset of `aliases` up to `max_level`, with one
/// deterministic decomposition per subset.
pub fn subsets_enumerate(
    graph: &JoinGraph,
    aliases: &[EcoString],
    max_level: usize,
) -> Enumeration {
    let mut sorted: Vec<EcoString> = aliases.to_vec();
    sorted.sort();
    sorted.dedup();
    let count = sorted.len();
    let top_level = max_level.min(count);

    let mut enumeration = Enumeration::default();
    let mut dp_table: HashSet<String> = HashSet::new();

    // Level 1: every singleton is trivially connected.
    if top_level >= 1 {
        for alias in &sorted {
            dp_table.insert(alias.to_string());
            enumeration.plans.push(Subplan {
                level: 1,
                subset: vec![alias.clone()],
                left: Vec::new(),
                right: Vec::new(),
            });
        }
        enumeration.level_counts.insert(1, count);
    }

    for level in 2..=top_level {
        let mut added = 0;
        for combination in Combinations::new(count, level) {
            let subset: Vec<EcoString> = combination.iter().map(|&i| sorted[i].clone()).collect();
            let key = subset_key(&subset);
            if dp_table.contains(&key) {
                continue;
            }
            if !graph.connected(&subset) {
                continue;
            }

            match decomposition_find(graph, &dp_table, &subset) {
                Some((left, right)) => {
                    dp_table.insert(key);
                    enumeration.plans.push(Subplan {
                        level,
                        subset,
                        left,
                        right,
                    });
                    added += 1;
                }
                None => {
                    warn!(subset = key, "connected subset has no valid decomposition");
                    enumeration.diagnostics.push(Diagnostic::new(
                        DiagnosticKind::Internal,
                        format!("connected subset has no valid decomposition: {key}"),
                    ));
                }
            }
        }
        enumeration.level_counts.insert(level, added);
    }

    enumeration
}

/// First valid split of `subset` under the fixed iteration order: smallest
/// left size first, lexicographic combinations within a size. Searching left
/// sizes past the midpoint only revisits mirrored splits.
fn decomposition_find(
    graph: &JoinGraph,
    dp_table: &HashSet<String>,
    subset: &[EcoString],
) -> Option<(Vec<EcoString>, Vec<EcoString>)> {
    let size = subset.len();
    for left_size in 1..=size / 2 {
        for combination in Combinations::new(size, left_size) {
            let left: Vec<EcoString> = combination.iter().map(|&i| subset[i].clone()).collect();
            let right: Vec<EcoString> = subset
                .iter()
                .enumerate()
                .filter(|(i, _)| !combination.contains(i))
                .map(|(_, alias)| alias.clone())
                .collect();

            if !dp_table.contains(&subset_key(&left)) || !dp_table.contains(&subset_key(&right)) {
                continue;
            }
            if graph.can_join(&left, &right) {
                return Some((left, right));
            }
        }
    }
    None
}

/// Ascending-lexicographic k-combinations of `0..n`, the standard odometer.
#[derive(Debug)]
struct Combinations {
    n: usize,
    k: usize,
    indices: Vec<usize>,
    exhausted: bool,
}

impl Combinations {
    fn new(n: usize, k: usize) -> Combinations {
        Combinations {
            n,
            k,
            indices: (0..k).collect(),
            exhausted: k == 0 || k > n,
        }
    }
}

impl Iterator for Combinations {
    type Item = Vec<usize>;

    fn next(&mut self) -> Option<Vec<usize>> {
        if self.exhausted {
            return None;
        }
        let current = self.indices.clone();

        let mut i = self.k;
        loop {
            if i == 0 {
                self.exhausted = true;
                break;
            }
            i -= 1;
            if self.indices[i] < self.n - self.k + i {
                self.indices[i] += 1;
                for j in i + 1..self.k {
                    self.indices[j] = self.indices[j - 1] + 1;
                }
                break;
            }
        }

        Some(current)
    }
}
