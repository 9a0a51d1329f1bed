//! Query analysis front end.
//!
//! Extracts the base relations (with aliases) and the raw join edges from an
//! inner-join query, then assembles the per-query predicate classifier and
//! join graph. All state built here is owned by the returned [`AnalyzedQuery`]
//! and discarded with it.

use std::sync::LazyLock;

use ecow::EcoString;
use error_set::error_set;
use iddqd::{IdHashItem, IdHashMap, id_upcast};
use regex::Regex;
use tracing::{debug, warn};

use crate::query::classify::{
    JoinCondition, PredicateClassifier, join_condition_match, where_conjuncts_split,
};
use crate::query::join_graph::JoinGraph;
use crate::query::{Deparse, Diagnostic, DiagnosticKind};

error_set! {
    AnalyzeError = {
        #[display("No FROM clause found")]
        NoFromClause,
        #[display("No relations found in query")]
        NoRelations,
    };
}

/// FROM list, up to the next clause keyword or end of statement.
static FROM_CLAUSE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bFROM\b(.*?)(?:\bWHERE\b|\bGROUP BY\b|\bORDER BY\b|\bLIMIT\b|;|$)")
        .expect("from clause pattern is valid")
});

static JOIN_KEYWORD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bJOIN\b").expect("join keyword pattern is valid"));

static ON_KEYWORD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bON\b").expect("on keyword pattern is valid"));

static WHITESPACE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("whitespace pattern is valid"));

/// A base relation as referenced in the query. When no alias was written,
/// the alias equals the base-table name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationRef {
    pub alias: EcoString,
    pub base: EcoString,
}

impl IdHashItem for RelationRef {
    type Key<'a> = &'a str;

    fn key(&self) -> Self::Key<'_> {
        self.alias.as_str()
    }

    id_upcast!();
}

impl Deparse for RelationRef {
    fn deparse<'b>(&self, buf: &'b mut String) -> &'b mut String {
        buf.push_str(&self.base);
        if self.alias != self.base {
            buf.push(' ');
            buf.push_str(&self.alias);
        }
        buf
    }
}

/// Everything extracted from one query, ready for enumeration.
#[derive(Debug)]
pub struct AnalyzedQuery {
    /// Relations keyed by alias.
    pub relations: IdHashMap<RelationRef>,
    /// Aliases in first-seen order.
    pub aliases: Vec<EcoString>,
    pub classifier: PredicateClassifier,
    pub join_graph: JoinGraph,
    pub diagnostics: Vec<Diagnostic>,
}

/// Analyze a raw SQL text into relations, classified predicates, and the
/// join graph with its equivalence classes and closure already computed.
pub fn query_analyze(sql: &str) -> Result<AnalyzedQuery, AnalyzeError> {
    let normalized = whitespace_normalize(sql);
    let mut diagnostics = Vec::new();

    let from_clause = FROM_CLAUSE_RE
        .captures(&normalized)
        .map(|c| c[1].trim().to_owned())
        .ok_or(AnalyzeError::NoFromClause)?;

    // A whitespace-bounded JOIN keyword selects the explicit-JOIN path.
    let mut on_conditions = Vec::new();
    let fragments = if JOIN_KEYWORD_RE.is_match(&from_clause) {
        explicit_from_parse(&from_clause, &mut on_conditions, &mut diagnostics)
    } else {
        from_clause.split(',').map(str::to_owned).collect()
    };

    let mut relations: IdHashMap<RelationRef> = IdHashMap::new();
    let mut aliases = Vec::new();
    for fragment in &fragments {
        let Some(relation) = relation_parse(fragment, &mut diagnostics) else {
            continue;
        };
        if relations.get(relation.alias.as_str()).is_none() {
            aliases.push(relation.alias.clone());
            relations.insert_overwrite(relation);
        }
    }
    if aliases.is_empty() {
        return Err(AnalyzeError::NoRelations);
    }

    let mut classifier = PredicateClassifier::from_query(&normalized);

    let mut join_graph = JoinGraph::new();
    for condition in classifier.join_conditions().iter().chain(&on_conditions) {
        join_graph.join_add(
            &condition.left_alias,
            &condition.left_column,
            &condition.right_alias,
            &condition.right_column,
            true,
        );
    }

    let selections = classifier.selection_predicates();
    let derived = join_graph.constant_equality_derive(&selections);
    if derived > 0 {
        debug!(derived, "constant-equality joins derived");
    }

    let closure = join_graph.transitive_closure_compute();
    if closure.capped {
        warn!("transitive closure stopped at the iteration cap");
        diagnostics.push(Diagnostic::new(
            DiagnosticKind::ClosureFuel,
            "transitive closure stopped at the iteration cap",
        ));
    }

    join_graph.equivalence_classes_build();

    diagnostics.extend(classifier.diagnostics_take());

    Ok(AnalyzedQuery {
        relations,
        aliases,
        classifier,
        join_graph,
        diagnostics,
    })
}

pub fn whitespace_normalize(sql: &str) -> String {
    WHITESPACE_RE.replace_all(sql.trim(), " ").into_owned()
}

/// Split an explicit-JOIN FROM clause into relation fragments, collecting
/// the equality conditions found in ON clauses.
fn explicit_from_parse(
    from_clause: &str,
    on_conditions: &mut Vec<JoinCondition>,
    diagnostics: &mut Vec<Diagnostic>,
) -> Vec<String> {
    let mut fragments = Vec::new();

    for (index, segment) in JOIN_KEYWORD_RE.split(from_clause).enumerate() {
        let (relation_part, on_part) = match ON_KEYWORD_RE.find(segment) {
            Some(m) => (&segment[..m.start()], Some(&segment[m.end()..])),
            None => (segment, None),
        };

        // The segment before the first JOIN may still be a comma list.
        if index == 0 {
            fragments.extend(relation_part.split(',').map(str::to_owned));
        } else {
            fragments.push(relation_part.to_owned());
        }

        let Some(on_text) = on_part else { continue };
        let (conjuncts, _balanced) = where_conjuncts_split(on_text);
        for conjunct in conjuncts {
            let stripped = parens_strip(&conjunct);
            match join_condition_match(stripped) {
                Some(condition) => on_conditions.push(condition),
                None => {
                    warn!(condition = stripped, "unsupported ON condition ignored");
                    diagnostics.push(Diagnostic::new(
                        DiagnosticKind::UnsupportedConstruct,
                        format!("unsupported ON condition ignored: {stripped}"),
                    ));
                }
            }
        }
    }

    fragments
}

/// Parse one FROM fragment of the shape `table [AS] alias`, ignoring join
/// modifier keywords left over from splitting on JOIN.
fn relation_parse(fragment: &str, diagnostics: &mut Vec<Diagnostic>) -> Option<RelationRef> {
    let mut unsupported = false;
    let tokens: Vec<&str> = fragment
        .split_whitespace()
        .filter(|token| match token.to_ascii_uppercase().as_str() {
            "INNER" | "CROSS" => false,
            "LEFT" | "RIGHT" | "FULL" | "OUTER" | "SEMI" | "ANTI" => {
                unsupported = true;
                false
            }
            _ => true,
        })
        .collect();

    if unsupported {
        diagnostics.push(Diagnostic::new(
            DiagnosticKind::UnsupportedConstruct,
            format!("non-inner join treated as inner: {}", fragment.trim()),
        ));
    }

    match tokens.as_slice() {
        [base] => Some(RelationRef {
            alias: EcoString::from(*base),
            base: EcoString::from(*base),
        }),
        [base, alias] => Some(RelationRef {
            alias: EcoString::from(*alias),
            base: EcoString::from(*base),
        }),
        [base, maybe_as, alias] if maybe_as.eq_ignore_ascii_case("AS") => Some(RelationRef {
            alias: EcoString::from(*alias),
            base: EcoString::from(*base),
        }),
        _ => None,
    }
}

fn parens_strip(text: &str) -> &str {
    let trimmed = text.trim();
    let stripped = trimmed
        .strip_prefix('(')
        .and_then(|t| t.strip_suffix(')'))
        .map(str::trim);
    stripped.unwrap_or(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_comma_from_relations_and_aliases() {
        let analyzed = query_analyze("SELECT * FROM title t1, movie_info mi WHERE t1.id = mi.movie_id").unwrap();

        assert_eq!(analyzed.aliases, ["t1", "mi"]);
        let t1 = analyzed.relations.get("t1").unwrap();
        assert_eq!(t1.base, "title");
        let mi = analyzed.relations.get("mi").unwrap();
        assert_eq!(mi.base, "movie_info");
    }

    #[test]
    fn test_alias_defaults_to_base_name() {
        let analyzed = query_analyze("SELECT * FROM A, B WHERE A.x = B.y").unwrap();
        assert_eq!(analyzed.aliases, ["A", "B"]);
        assert_eq!(analyzed.relations.get("A").unwrap().base, "A");
    }

    #[test]
    fn test_as_keyword_alias() {
        let analyzed = query_analyze("SELECT * FROM title AS t WHERE t.id = 1").unwrap();
        assert_eq!(analyzed.aliases, ["t"]);
        assert_eq!(analyzed.relations.get("t").unwrap().base, "title");
    }

    #[test]
    fn test_explicit_join_path_extracts_on_conditions() {
        let analyzed = query_analyze(
            "SELECT * FROM title t JOIN movie_info mi ON t.id = mi.movie_id JOIN info_type it ON mi.info_type_id = it.id",
        )
        .unwrap();

        assert_eq!(analyzed.aliases, ["t", "mi", "it"]);
        assert_eq!(analyzed.join_graph.details("t", "mi").len(), 1);
        assert_eq!(analyzed.join_graph.details("mi", "it").len(), 1);
    }

    #[test]
    fn test_explicit_join_honors_where_joins_too() {
        let analyzed = query_analyze(
            "SELECT * FROM a JOIN b ON a.x = b.y WHERE b.z = c.w AND a.f = 1",
        );
        // c never appears in FROM; the where join still lands in the graph
        let analyzed = analyzed.unwrap();
        assert_eq!(analyzed.join_graph.details("b", "c").len(), 1);
    }

    #[test]
    fn test_multi_condition_on_clause() {
        let analyzed = query_analyze(
            "SELECT * FROM a JOIN b ON a.x = b.y AND a.z = b.w",
        )
        .unwrap();
        assert_eq!(analyzed.join_graph.details("a", "b").len(), 2);
    }

    #[test]
    fn test_outer_join_reported_and_treated_as_inner() {
        let analyzed =
            query_analyze("SELECT * FROM a LEFT JOIN b ON a.x = b.y").unwrap();
        assert_eq!(analyzed.aliases, ["a", "b"]);
        assert_eq!(analyzed.join_graph.details("a", "b").len(), 1);
        assert!(
            analyzed
                .diagnostics
                .iter()
                .any(|d| d.kind == DiagnosticKind::UnsupportedConstruct)
        );
    }

    #[test]
    fn test_missing_from_clause() {
        assert!(matches!(
            query_analyze("SELECT 1"),
            Err(AnalyzeError::NoFromClause)
        ));
    }

    #[test]
    fn test_empty_from_clause() {
        assert!(matches!(
            query_analyze("SELECT * FROM WHERE x = 1"),
            Err(AnalyzeError::NoRelations)
        ));
    }

    #[test]
    fn test_duplicate_alias_kept_once() {
        let analyzed = query_analyze("SELECT * FROM t, t WHERE t.x = 1").unwrap();
        assert_eq!(analyzed.aliases, ["t"]);
    }

    #[test]
    fn test_constant_equality_produces_derived_edge() {
        let analyzed =
            query_analyze("SELECT * FROM X, Y WHERE X.k = 'p' AND Y.k = 'p'").unwrap();

        let details = analyzed.join_graph.details("X", "Y");
        assert_eq!(details.len(), 1);
        assert!(!details[0].original);
        assert!(analyzed.join_graph.connected(&analyzed.aliases));
    }

    #[test]
    fn test_closure_runs_during_analysis() {
        let analyzed =
            query_analyze("SELECT * FROM C, D, E WHERE C.a = D.b AND D.b = E.c").unwrap();
        assert_eq!(analyzed.join_graph.details("C", "E").len(), 1);
    }

    #[test]
    fn test_whitespace_normalize_collapses_runs() {
        assert_eq!(
            whitespace_normalize("SELECT *\n  FROM\tt\n WHERE t.x = 1"),
            "SELECT * FROM t WHERE t.x = 1"
        );
    }

    #[test]
    fn test_relation_render() {
        let mut buf = String::new();
        RelationRef {
            alias: EcoString::from("t1"),
            base: EcoString::from("title"),
        }
        .deparse(&mut buf);
        assert_eq!(buf, "title t1");

        let mut buf = String::new();
        RelationRef {
            alias: EcoString::from("title"),
            base: EcoString::from("title"),
        }
        .deparse(&mut buf);
        assert_eq!(buf, "title");
    }
}
