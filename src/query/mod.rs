pub mod analyze;
pub mod classify;
pub mod enumerate;
pub mod generate;
pub mod join_graph;

use ecow::EcoString;
use strum_macros::AsRefStr;

/// Separator used in canonical edge keys and subset keys.
pub const KEY_SEP: &str = "|||";

/// Canonical key for a subset of aliases. Callers pass the aliases already
/// sorted; singleton keys are the alias itself.
pub fn subset_key(aliases: &[EcoString]) -> String {
    let mut key = String::new();
    let mut sep = "";
    for alias in aliases {
        key.push_str(sep);
        key.push_str(alias);
        sep = KEY_SEP;
    }
    key
}

pub trait Deparse {
    fn deparse<'b>(&self, buf: &'b mut String) -> &'b mut String;
}

/// Non-fatal condition observed while processing a query.
///
/// The pipeline never fails on these; each is collected per query and also
/// logged, leaving the abort/continue decision to the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum DiagnosticKind {
    /// Unbalanced quotes or parens in the WHERE clause; partial result.
    PredicateShape,
    /// Predicate kept verbatim but excluded from join and EC inference.
    UnsupportedConstruct,
    /// Transitive closure hit its iteration cap before reaching a fixpoint.
    ClosureFuel,
    /// A connected subset had no valid decomposition.
    Internal,
}

#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub message: String,
}

impl Diagnostic {
    pub fn new(kind: DiagnosticKind, message: impl Into<String>) -> Diagnostic {
        Diagnostic {
            kind,
            message: message.into(),
        }
    }
}
