//! WHERE-clause predicate classification.
//!
//! Splits a WHERE clause into its top-level conjuncts and sorts each into one
//! of three buckets: single-relation selections, two-relation equality joins,
//! and everything else (complex). Join predicates are additionally kept in a
//! structured form for the join graph.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use ecow::EcoString;
use regex::Regex;
use tracing::warn;

use crate::query::{Diagnostic, DiagnosticKind};

/// `alias.column` token, with the alias capture used for classification.
static COLUMN_TOKEN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b([A-Za-z_][A-Za-z0-9_]*)\.([A-Za-z_][A-Za-z0-9_]*)\b")
        .expect("column token pattern is valid")
});

/// A whole predicate of the shape `a1.c1 = a2.c2` (also accepting `==`).
static JOIN_PREDICATE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^([A-Za-z_][A-Za-z0-9_]*)\.([A-Za-z_][A-Za-z0-9_]*)\s*==?\s*([A-Za-z_][A-Za-z0-9_]*)\.([A-Za-z_][A-Za-z0-9_]*)$",
    )
    .expect("join predicate pattern is valid")
});

/// WHERE clause body, up to the next clause keyword or end of statement.
static WHERE_CLAUSE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bWHERE\b(.*?)(?:\bGROUP BY\b|\bORDER BY\b|\bLIMIT\b|;|$)")
        .expect("where clause pattern is valid")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PredicateKind {
    Selection,
    Join,
    Complex,
}

/// One classified WHERE conjunct.
#[derive(Debug, Clone)]
pub struct Predicate {
    pub text: String,
    pub aliases: BTreeSet<EcoString>,
    pub kind: PredicateKind,
}

/// Equality join conjunct between two distinct aliases, as written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinCondition {
    pub left_alias: EcoString,
    pub left_column: EcoString,
    pub right_alias: EcoString,
    pub right_column: EcoString,
}

impl JoinCondition {
    /// Render with the aliases in ascending order, so the same predicate
    /// always produces the same text regardless of the written orientation.
    pub fn canonical_text(&self) -> String {
        if self.left_alias <= self.right_alias {
            format!(
                "{}.{} = {}.{}",
                self.left_alias, self.left_column, self.right_alias, self.right_column
            )
        } else {
            format!(
                "{}.{} = {}.{}",
                self.right_alias, self.right_column, self.left_alias, self.left_column
            )
        }
    }
}

/// Predicates applicable to one subset of aliases.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PredicateSet {
    pub selections: Vec<String>,
    pub joins: Vec<String>,
    pub complex: Vec<String>,
}

#[derive(Debug, Default)]
pub struct PredicateClassifier {
    predicates: Vec<Predicate>,
    join_conditions: Vec<JoinCondition>,
    or_candidates: Vec<String>,
    diagnostics: Vec<Diagnostic>,
}

impl PredicateClassifier {
    /// Classify the WHERE clause of a complete query text. A query without a
    /// WHERE clause yields an empty classifier.
    pub fn from_query(sql: &str) -> PredicateClassifier {
        let mut classifier = PredicateClassifier::default();

        let Some(captures) = WHERE_CLAUSE_RE.captures(sql) else {
            return classifier;
        };
        let clause = &captures[1];

        let (conjuncts, balanced) = where_conjuncts_split(clause);
        if !balanced {
            warn!("unbalanced quotes or parens in WHERE clause, keeping partial split");
            classifier.diagnostics.push(Diagnostic::new(
                DiagnosticKind::PredicateShape,
                "unbalanced quotes or parens in WHERE clause",
            ));
        }

        for conjunct in conjuncts {
            classifier.predicate_add(&conjunct);
        }
        classifier
    }

    pub fn predicate_add(&mut self, text: &str) {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return;
        }

        // Alias and keyword scanning happens on a copy with string literal
        // contents blanked out, so 'a.b' inside a literal is never a column.
        let blanked = string_literals_blank(trimmed);
        let aliases = predicate_aliases_extract(&blanked);

        if top_level_or_contains(&blanked) {
            warn!(predicate = trimmed, "top-level OR kept as complex predicate");
            self.diagnostics.push(Diagnostic::new(
                DiagnosticKind::UnsupportedConstruct,
                format!("top-level OR kept as complex predicate: {trimmed}"),
            ));
            self.complex_add(trimmed, &blanked, aliases);
            return;
        }

        if let Some(condition) = join_condition_match(trimmed) {
            if aliases.len() == 2 {
                self.predicates.push(Predicate {
                    text: condition.canonical_text(),
                    aliases,
                    kind: PredicateKind::Join,
                });
                self.join_conditions.push(condition);
                return;
            }
        }

        if aliases.len() == 1 {
            self.predicates.push(Predicate {
                text: trimmed.to_owned(),
                aliases,
                kind: PredicateKind::Selection,
            });
            return;
        }

        if aliases.len() >= 2 {
            self.diagnostics.push(Diagnostic::new(
                DiagnosticKind::UnsupportedConstruct,
                format!("multi-relation predicate kept as complex: {trimmed}"),
            ));
        }
        self.complex_add(trimmed, &blanked, aliases);
    }

    fn complex_add(&mut self, text: &str, blanked: &str, aliases: BTreeSet<EcoString>) {
        if aliases.len() > 1
            && text.starts_with('(')
            && blanked.to_ascii_uppercase().contains(" OR ")
        {
            self.or_candidates.push(text.to_owned());
        }
        self.predicates.push(Predicate {
            text: text.to_owned(),
            aliases,
            kind: PredicateKind::Complex,
        });
    }

    /// Predicates applicable to `subset`: every predicate whose referenced
    /// aliases all lie inside the subset, bucketed by kind.
    pub fn predicates_for(&self, subset: &[EcoString]) -> PredicateSet {
        let mut set = PredicateSet::default();
        for predicate in &self.predicates {
            if !predicate.aliases.iter().all(|a| subset.contains(a)) {
                continue;
            }
            match predicate.kind {
                PredicateKind::Selection => set.selections.push(predicate.text.clone()),
                PredicateKind::Join => set.joins.push(predicate.text.clone()),
                PredicateKind::Complex => set.complex.push(predicate.text.clone()),
            }
        }
        set
    }

    /// Join predicates with one endpoint in `left` and the other in `right`.
    pub fn join_predicates_between(&self, left: &[EcoString], right: &[EcoString]) -> Vec<String> {
        self.predicates
            .iter()
            .filter(|p| p.kind == PredicateKind::Join)
            .filter(|p| {
                let spans = |a: &[EcoString], b: &[EcoString]| {
                    let mut iter = p.aliases.iter();
                    match (iter.next(), iter.next()) {
                        (Some(x), Some(y)) => a.contains(x) && b.contains(y),
                        _ => false,
                    }
                };
                spans(left, right) || spans(right, left)
            })
            .map(|p| p.text.clone())
            .collect()
    }

    pub fn join_conditions(&self) -> &[JoinCondition] {
        &self.join_conditions
    }

    /// (alias, predicate text) for every single-relation selection, used by
    /// constant-equality inference.
    pub fn selection_predicates(&self) -> Vec<(EcoString, String)> {
        self.predicates
            .iter()
            .filter(|p| p.kind == PredicateKind::Selection)
            .filter_map(|p| {
                p.aliases
                    .first()
                    .map(|alias| (alias.clone(), p.text.clone()))
            })
            .collect()
    }

    /// Parenthesized multi-relation OR predicates, recorded for the external
    /// union-expansion collaborator.
    pub fn or_candidates(&self) -> &[String] {
        &self.or_candidates
    }

    pub fn diagnostics_take(&mut self) -> Vec<Diagnostic> {
        std::mem::take(&mut self.diagnostics)
    }
}

/// Match a predicate of the exact shape `a1.c1 = a2.c2` with distinct aliases.
pub fn join_condition_match(text: &str) -> Option<JoinCondition> {
    let captures = JOIN_PREDICATE_RE.captures(text.trim())?;
    let left_alias = EcoString::from(&captures[1]);
    let right_alias = EcoString::from(&captures[3]);
    if left_alias == right_alias {
        return None;
    }
    Some(JoinCondition {
        left_alias,
        left_column: EcoString::from(&captures[2]),
        right_alias,
        right_column: EcoString::from(&captures[4]),
    })
}

/// Aliases referenced by a predicate, from its `alias.column` tokens.
pub fn predicate_aliases_extract(blanked: &str) -> BTreeSet<EcoString> {
    COLUMN_TOKEN_RE
        .captures_iter(blanked)
        .map(|c| EcoString::from(&c[1]))
        .collect()
}

/// Split a WHERE clause at its top-level `AND` boundaries.
///
/// Respects paren nesting, single and double quoted literals with backslash
/// escapes, and the `AND` belonging to a top-level `BETWEEN`. Returns the
/// conjuncts plus whether quotes and parens were balanced; on unbalanced
/// input the split so far is still returned.
pub fn where_conjuncts_split(clause: &str) -> (Vec<String>, bool) {
    let bytes = clause.as_bytes();
    let mut conjuncts = Vec::new();
    let mut depth: i32 = 0;
    let mut in_single = false;
    let mut in_double = false;
    let mut pending_between = 0usize;
    let mut start = 0usize;
    let mut i = 0usize;

    while i < bytes.len() {
        let b = bytes[i];
        if in_single {
            match b {
                b'\\' => i += 1,
                b'\'' => in_single = false,
                _ => {}
            }
        } else if in_double {
            match b {
                b'\\' => i += 1,
                b'"' => in_double = false,
                _ => {}
            }
        } else {
            match b {
                b'\'' => in_single = true,
                b'"' => in_double = true,
                b'(' => depth += 1,
                b')' => depth -= 1,
                _ if depth == 0 => {
                    if keyword_at(bytes, i, b"BETWEEN") {
                        pending_between += 1;
                        i += b"BETWEEN".len();
                        continue;
                    }
                    if keyword_at(bytes, i, b"AND") {
                        if pending_between > 0 {
                            pending_between -= 1;
                        } else {
                            let conjunct = clause[start..i].trim();
                            if !conjunct.is_empty() {
                                conjuncts.push(conjunct.to_owned());
                            }
                            start = i + b"AND".len();
                        }
                        i += b"AND".len();
                        continue;
                    }
                }
                _ => {}
            }
        }
        i += 1;
    }

    let tail = clause[start.min(clause.len())..].trim();
    if !tail.is_empty() {
        conjuncts.push(tail.to_owned());
    }

    let balanced = depth == 0 && !in_single && !in_double;
    (conjuncts, balanced)
}

/// True if the predicate contains an `OR` outside all parens and strings.
/// Callers pass the literal-blanked text, so quote state needs no tracking.
pub fn top_level_or_contains(blanked: &str) -> bool {
    let bytes = blanked.as_bytes();
    let mut depth: i32 = 0;
    let mut i = 0usize;
    while i < bytes.len() {
        match bytes[i] {
            b'(' => depth += 1,
            b')' => depth -= 1,
            _ if depth == 0 && keyword_at(bytes, i, b"OR") => return true,
            _ => {}
        }
        i += 1;
    }
    false
}

/// Replace the contents of quoted string literals with spaces, preserving
/// the quote characters themselves.
pub fn string_literals_blank(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_single = false;
    let mut in_double = false;
    let mut escaped = false;

    for c in text.chars() {
        if in_single || in_double {
            if escaped {
                escaped = false;
                out.push(' ');
            } else if c == '\\' {
                escaped = true;
                out.push(' ');
            } else if in_single && c == '\'' {
                in_single = false;
                out.push('\'');
            } else if in_double && c == '"' {
                in_double = false;
                out.push('"');
            } else {
                out.push(' ');
            }
        } else if c == '\'' {
            in_single = true;
            out.push('\'');
        } else if c == '"' {
            in_double = true;
            out.push('"');
        } else {
            out.push(c);
        }
    }
    out
}

/// Case-insensitive whole-word match of `keyword` at byte offset `i`.
fn keyword_at(bytes: &[u8], i: usize, keyword: &[u8]) -> bool {
    if i + keyword.len() > bytes.len() {
        return false;
    }
    if !bytes[i..i + keyword.len()].eq_ignore_ascii_case(keyword) {
        return false;
    }
    let before_ok = i == 0 || !is_ident_byte(bytes[i - 1]);
    let after = i + keyword.len();
    let after_ok = after == bytes.len() || !is_ident_byte(bytes[after]);
    before_ok && after_ok
}

fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}
