//! Join graph with equivalence classes and column-aware transitive closure.
//!
//! Edges are keyed by the sorted alias pair; each edge carries the list of
//! column-pair predicates between the two relations. Equivalence classes
//! group transitively-equal `alias.column` references and back the
//! connectivity queries used by the enumerator.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::LazyLock;

use ecow::EcoString;
use regex::Regex;

use crate::query::{Deparse, KEY_SEP};

/// Rounds of closure iteration before giving up on pathological inputs.
pub const CLOSURE_MAX_ROUNDS: usize = 10;

/// `alias.col = <value>`, with the value running to the next AND/OR or the
/// end of the predicate.
static CONSTANT_EQ_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)([A-Za-z_]\w*)\.([A-Za-z_]\w*)\s*=\s*(.+?)(?:\s+(?:AND|OR)|$)")
        .expect("constant equality pattern is valid")
});

/// `alias.col IN (<values>)`; only single-value lists constrain the column.
static CONSTANT_IN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)([A-Za-z_]\w*)\.([A-Za-z_]\w*)\s+IN\s*\(([^)]*)\)")
        .expect("constant IN pattern is valid")
});

/// One column-pair predicate on an edge, stored with `t1 < t2`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinDetail {
    pub t1: EcoString,
    pub t1_col: EcoString,
    pub t2: EcoString,
    pub t2_col: EcoString,
    /// True when extracted verbatim from the query, false when derived.
    pub original: bool,
}

impl Deparse for JoinDetail {
    fn deparse<'b>(&self, buf: &'b mut String) -> &'b mut String {
        buf.push_str(&self.t1);
        buf.push('.');
        buf.push_str(&self.t1_col);
        buf.push_str(" = ");
        buf.push_str(&self.t2);
        buf.push('.');
        buf.push_str(&self.t2_col);
        buf
    }
}

impl JoinDetail {
    pub fn render(&self) -> String {
        let mut buf = String::new();
        self.deparse(&mut buf);
        buf
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClosureStats {
    pub added: usize,
    pub capped: bool,
}

#[derive(Debug, Default)]
pub struct JoinGraph {
    edges: BTreeSet<String>,
    details: BTreeMap<String, Vec<JoinDetail>>,
    equivalence_classes: Vec<BTreeSet<String>>,
}

impl JoinGraph {
    pub fn new() -> JoinGraph {
        JoinGraph::default()
    }

    /// Canonical key for the undirected edge between two aliases.
    pub fn edge_key(t1: &str, t2: &str) -> String {
        if t1 <= t2 {
            format!("{t1}{KEY_SEP}{t2}")
        } else {
            format!("{t2}{KEY_SEP}{t1}")
        }
    }

    /// Add a join predicate between two aliases. The detail is stored with
    /// the aliases in ascending order; a duplicate column pair on the same
    /// edge is not stored twice. Returns true when a new detail was added.
    pub fn join_add(
        &mut self,
        t1: &str,
        t1_col: &str,
        t2: &str,
        t2_col: &str,
        original: bool,
    ) -> bool {
        if t1 == t2 {
            return false;
        }
        let key = Self::edge_key(t1, t2);
        self.edges.insert(key.clone());

        let (a, a_col, b, b_col) = if t1 <= t2 {
            (t1, t1_col, t2, t2_col)
        } else {
            (t2, t2_col, t1, t1_col)
        };

        let list = self.details.entry(key).or_default();
        for detail in list.iter_mut() {
            if detail.t1_col == a_col && detail.t2_col == b_col {
                if original && !detail.original {
                    detail.original = true;
                }
                return false;
            }
        }
        list.push(JoinDetail {
            t1: EcoString::from(a),
            t1_col: EcoString::from(a_col),
            t2: EcoString::from(b),
            t2_col: EcoString::from(b_col),
            original,
        });
        true
    }

    /// Join details on the edge between two aliases, empty when none exist.
    pub fn details(&self, t1: &str, t2: &str) -> &[JoinDetail] {
        self.details
            .get(&Self::edge_key(t1, t2))
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn equivalence_classes(&self) -> &[BTreeSet<String>] {
        &self.equivalence_classes
    }

    /// Derive joins implied by two relations constraining the same column to
    /// the same single constant, e.g. `t1.kind = 'x'` with `t2.kind = 'x'`.
    /// Returns the number of derived join predicates added.
    pub fn constant_equality_derive(&mut self, selections: &[(EcoString, String)]) -> usize {
        let mut groups: BTreeMap<(EcoString, String), BTreeSet<EcoString>> = BTreeMap::new();

        for (_alias, text) in selections {
            if let Some((alias, column, value)) = constant_value_extract(text) {
                groups.entry((column, value)).or_default().insert(alias);
            }
        }

        let mut added = 0;
        for ((column, _value), aliases) in &groups {
            if aliases.len() < 2 {
                continue;
            }
            let aliases: Vec<&EcoString> = aliases.iter().collect();
            for i in 0..aliases.len() {
                for j in i + 1..aliases.len() {
                    if self.join_add(aliases[i], column, aliases[j], column, false) {
                        added += 1;
                    }
                }
            }
        }
        added
    }

    /// Column-aware transitive closure: two details imply a third only when
    /// they share a relation and agree on the column on that shared relation.
    /// `A.x = B.y` with `B.y = C.z` yields `A.x = C.z`; `B.z = C.w` with a
    /// different column on B yields nothing.
    pub fn transitive_closure_compute(&mut self) -> ClosureStats {
        let mut added = 0;
        let mut capped = false;

        for round in 0..CLOSURE_MAX_ROUNDS {
            let mut found_new = false;
            let snapshot: Vec<(String, Vec<JoinDetail>)> = self
                .details
                .iter()
                .map(|(key, list)| (key.clone(), list.clone()))
                .collect();

            for (key1, details1) in &snapshot {
                for (key2, details2) in &snapshot {
                    if key1 == key2 {
                        continue;
                    }
                    for d1 in details1 {
                        for d2 in details2 {
                            let Some((t1, c1, t2, c2)) = transitive_candidate(d1, d2) else {
                                continue;
                            };
                            if t1 != t2 && self.join_add(t1, c1, t2, c2, false) {
                                found_new = true;
                                added += 1;
                            }
                        }
                    }
                }
            }

            if !found_new {
                break;
            }
            if round + 1 == CLOSURE_MAX_ROUNDS {
                capped = true;
            }
        }

        ClosureStats { added, capped }
    }

    /// Build equivalence classes over `alias.column` references with a
    /// union-find pass across all stored details.
    pub fn equivalence_classes_build(&mut self) -> usize {
        let mut forest = UnionFind::default();

        for list in self.details.values() {
            for detail in list {
                let tc1 = format!("{}.{}", detail.t1, detail.t1_col);
                let tc2 = format!("{}.{}", detail.t2, detail.t2_col);
                forest.union(&tc1, &tc2);
            }
        }

        let mut groups: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for member in forest.members() {
            let root = forest.find(&member);
            groups.entry(root).or_default().insert(member);
        }

        self.equivalence_classes = groups.into_values().collect();
        self.equivalence_classes.len()
    }

    /// True if some equivalence class contains a column from each alias.
    pub fn are_ec_connected(&self, t1: &str, t2: &str) -> bool {
        let p1 = format!("{t1}.");
        let p2 = format!("{t2}.");
        self.equivalence_classes.iter().any(|ec| {
            ec.iter().any(|c| c.starts_with(&p1)) && ec.iter().any(|c| c.starts_with(&p2))
        })
    }

    fn aliases_linked(&self, t1: &str, t2: &str) -> bool {
        self.are_ec_connected(t1, t2) || self.edges.contains(&Self::edge_key(t1, t2))
    }

    /// BFS connectivity over the subset, treating two aliases as neighbors
    /// when they share an equivalence class or an explicit edge. Empty and
    /// singleton subsets are connected by definition.
    pub fn connected(&self, subset: &[EcoString]) -> bool {
        if subset.len() <= 1 {
            return true;
        }

        let mut visited: BTreeSet<&EcoString> = BTreeSet::new();
        let mut queue: VecDeque<&EcoString> = VecDeque::new();
        visited.insert(&subset[0]);
        queue.push_back(&subset[0]);

        while let Some(current) = queue.pop_front() {
            for other in subset {
                if !visited.contains(other) && self.aliases_linked(current, other) {
                    visited.insert(other);
                    queue.push_back(other);
                }
            }
        }

        visited.len() == subset.len()
    }

    /// True if some alias in `left` is linked with some alias in `right`.
    pub fn can_join(&self, left: &[EcoString], right: &[EcoString]) -> bool {
        left.iter()
            .any(|l| right.iter().any(|r| self.aliases_linked(l, r)))
    }
}

/// Try the four orientations in which two details can share a relation with
/// a matching column.
fn transitive_candidate<'a>(
    d1: &'a JoinDetail,
    d2: &'a JoinDetail,
) -> Option<(&'a str, &'a str, &'a str, &'a str)> {
    if d1.t2 == d2.t1 && d1.t2_col == d2.t1_col {
        return Some((d1.t1.as_str(), d1.t1_col.as_str(), d2.t2.as_str(), d2.t2_col.as_str()));
    }
    if d1.t2 == d2.t2 && d1.t2_col == d2.t2_col {
        return Some((d1.t1.as_str(), d1.t1_col.as_str(), d2.t1.as_str(), d2.t1_col.as_str()));
    }
    if d1.t1 == d2.t1 && d1.t1_col == d2.t1_col {
        return Some((d1.t2.as_str(), d1.t2_col.as_str(), d2.t2.as_str(), d2.t2_col.as_str()));
    }
    if d1.t1 == d2.t2 && d1.t1_col == d2.t2_col {
        return Some((d1.t2.as_str(), d1.t2_col.as_str(), d2.t1.as_str(), d2.t1_col.as_str()));
    }
    None
}

/// Extract the single constant value a selection predicate pins a column to,
/// if any. Handles `alias.col = <literal>` and `alias.col IN (<literal>)`
/// with exactly one element.
pub fn constant_value_extract(predicate: &str) -> Option<(EcoString, EcoString, String)> {
    if let Some(captures) = CONSTANT_EQ_RE.captures(predicate) {
        let value = literal_normalize(&captures[3]);
        return Some((
            EcoString::from(&captures[1]),
            EcoString::from(&captures[2]),
            value,
        ));
    }

    if let Some(captures) = CONSTANT_IN_RE.captures(predicate) {
        let values: Vec<&str> = captures[3].split(',').map(str::trim).collect();
        if let [single] = values.as_slice() {
            return Some((
                EcoString::from(&captures[1]),
                EcoString::from(&captures[2]),
                literal_normalize(single),
            ));
        }
    }

    None
}

/// Normalize a literal: drop a trailing `::type` cast, outer quotes, and
/// surrounding whitespace.
pub fn literal_normalize(raw: &str) -> String {
    let mut value = raw.trim();

    if let Some(pos) = value.rfind("::") {
        let suffix = &value[pos + 2..];
        if !suffix.is_empty() && suffix.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_') {
            value = &value[..pos];
        }
    }
    value = value.trim();

    if value.len() >= 2 {
        let bytes = value.as_bytes();
        if (bytes[0] == b'\'' && bytes[value.len() - 1] == b'\'')
            || (bytes[0] == b'"' && bytes[value.len() - 1] == b'"')
        {
            value = &value[1..value.len() - 1];
        }
    }

    value.trim().to_owned()
}

#[derive(Debug, Default)]
struct UnionFind {
    parent: HashMap<String, String>,
    rank: HashMap<String, u32>,
}

impl UnionFind {
    fn insert(&mut self, x: &str) {
        if !self.parent.contains_key(x) {
            self.parent.insert(x.to_owned(), x.to_owned());
            self.rank.insert(x.to_owned(), 0);
        }
    }

    fn find(&mut self, x: &str) -> String {
        self.insert(x);

        let mut root = x.to_owned();
        while self.parent[&root] != root {
            root = self.parent[&root].clone();
        }

        // Path compression
        let mut current = x.to_owned();
        while self.parent[&current] != root {
            let next = self.parent[&current].clone();
            self.parent.insert(current, root.clone());
            current = next;
        }

        root
    }

    fn union(&mut self, x: &str, y: &str) {
        let root_x = self.find(x);
        let root_y = self.find(y);
        if root_x == root_y {
            return;
        }

        let rank_x = self.rank[&root_x];
        let rank_y = self.rank[&root_y];
        if rank_x < rank_y {
            self.parent.insert(root_x, root_y);
        } else if rank_x > rank_y {
            self.parent.insert(root_y, root_x);
        } else {
            self.parent.insert(root_y, root_x.clone());
            self.rank.insert(root_x, rank_x + 1);
        }
    }

    fn members(&self) -> Vec<String> {
        self.parent.keys().cloned().collect()
    }
}
