//! SQL reconstruction for enumerated subsets.
//!
//! Builds a `SELECT * FROM … JOIN … ON …` tree for each subplan, preferring
//! join edges that appeared in the original query over derived ones, and
//! gathers every remaining applicable predicate into the WHERE clause.

use ecow::EcoString;
use iddqd::IdHashMap;
use tracing::warn;

use crate::query::Deparse;
use crate::query::analyze::{AnalyzedQuery, RelationRef};
use crate::query::classify::PredicateClassifier;
use crate::query::enumerate::Subplan;
use crate::query::join_graph::JoinGraph;

const WHERE_SEP: &str = "\n  AND ";

pub struct SubqueryGenerator<'a> {
    relations: &'a IdHashMap<RelationRef>,
    classifier: &'a PredicateClassifier,
    graph: &'a JoinGraph,
}

impl<'a> SubqueryGenerator<'a> {
    pub fn new(query: &'a AnalyzedQuery) -> SubqueryGenerator<'a> {
        SubqueryGenerator {
            relations: &query.relations,
            classifier: &query.classifier,
            graph: &query.join_graph,
        }
    }

    /// Emit the SQL text for one subplan. Output is byte-identical across
    /// runs for identical inputs.
    pub fn subquery_generate(&self, plan: &Subplan) -> String {
        match plan.subset.as_slice() {
            [alias] => self.singleton_generate(alias),
            _ => self.join_generate(plan),
        }
    }

    fn singleton_generate(&self, alias: &EcoString) -> String {
        let mut buf = String::from("SELECT * FROM ");
        self.relation_render(alias, &mut buf);

        let predicates = self.classifier.predicates_for(std::slice::from_ref(alias));
        let mut conjuncts = predicates.selections;
        conjuncts.extend(predicates.complex);

        where_clause_append(&mut buf, &conjuncts);
        buf.push(';');
        buf
    }

    fn join_generate(&self, plan: &Subplan) -> String {
        let mut buf = String::from("SELECT * FROM ");
        self.relation_render(&plan.subset[0], &mut buf);

        let mut added: Vec<EcoString> = vec![plan.subset[0].clone()];
        let mut remaining: Vec<EcoString> = plan.subset[1..].to_vec();
        let mut used: Vec<String> = Vec::new();

        while !remaining.is_empty() {
            let Some((alias, predicate)) = self.next_join_choose(&added, &remaining) else {
                // Should not arise for enumerable subsets
                warn!(subset = plan.key(), "no joinable relation found, tree incomplete");
                break;
            };

            buf.push_str("\nJOIN ");
            self.relation_render(&alias, &mut buf);
            if let Some(text) = predicate {
                buf.push_str(" ON ");
                buf.push_str(&text);
                used.push(text);
            }

            remaining.retain(|r| *r != alias);
            added.push(alias);
        }

        let predicates = self.classifier.predicates_for(&plan.subset);
        let mut conjuncts = predicates.selections;
        conjuncts.extend(predicates.complex);
        conjuncts.extend(self.leftover_joins(&plan.subset, &used));

        where_clause_append(&mut buf, &conjuncts);
        buf.push(';');
        buf
    }

    /// Next relation to graft onto the join tree. Scans `remaining` in order
    /// and returns the first candidate reachable through an original edge;
    /// only when no candidate has one does the first derived edge win.
    fn next_join_choose(
        &self,
        added: &[EcoString],
        remaining: &[EcoString],
    ) -> Option<(EcoString, Option<String>)> {
        let mut fallback: Option<(EcoString, String)> = None;

        for candidate in remaining {
            let mut details = Vec::new();
            for alias in added {
                details.extend(self.graph.details(alias, candidate));
            }
            details.sort_by_key(|d| (!d.original, d.render()));

            let Some(first) = details.first() else {
                continue;
            };
            if first.original {
                return Some((candidate.clone(), Some(first.render())));
            }
            if fallback.is_none() {
                fallback = Some((candidate.clone(), first.render()));
            }
        }

        fallback.map(|(alias, predicate)| (alias, Some(predicate)))
    }

    /// Original join predicates between subset members that the JOIN tree
    /// did not consume; they belong in the WHERE clause.
    fn leftover_joins(&self, subset: &[EcoString], used: &[String]) -> Vec<String> {
        let mut leftovers = Vec::new();
        for i in 0..subset.len() {
            for j in i + 1..subset.len() {
                for detail in self.graph.details(&subset[i], &subset[j]) {
                    if !detail.original {
                        continue;
                    }
                    let text = detail.render();
                    if !used.contains(&text) && !leftovers.contains(&text) {
                        leftovers.push(text);
                    }
                }
            }
        }
        leftovers
    }

    fn relation_render(&self, alias: &EcoString, buf: &mut String) {
        match self.relations.get(alias.as_str()) {
            Some(relation) => {
                relation.deparse(buf);
            }
            None => buf.push_str(alias),
        }
    }
}

fn where_clause_append(buf: &mut String, conjuncts: &[String]) {
    if conjuncts.is_empty() {
        return;
    }
    buf.push_str("\nWHERE ");
    let mut sep = "";
    for conjunct in conjuncts {
        buf.push_str(sep);
        buf.push_str(conjunct);
        sep = WHERE_SEP;
    }
}
