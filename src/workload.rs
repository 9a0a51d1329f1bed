//! Workload input and output helpers.
//!
//! Reads SQL workload files (one query per line, or semicolon-separated
//! multi-line queries) and defines the CSV row shape written per enumerated
//! subset.

use std::fs;
use std::path::Path;
use std::sync::LazyLock;

use ecow::EcoString;
use error_set::error_set;
use regex::Regex;
use serde::Serialize;

error_set! {
    WorkloadError = {
        IoError(std::io::Error),
    };
}

/// `SELECT …` up to a semicolon or end of input, ignoring leading junk.
static SELECT_SPAN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)SELECT\s.*?(?:;|$)").expect("select span pattern is valid"));

/// `SELECT …;` spans for semicolon-separated workloads.
static SELECT_TERMINATED_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)(SELECT\s.*?);").expect("terminated select pattern is valid")
});

/// One output row per enumerated subset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutputRow {
    pub query_id: usize,
    pub subset: String,
    pub query: String,
}

/// Read queries from a workload file. Returns (line number, query text)
/// pairs; line numbers are 1-based.
pub fn queries_read(
    path: &Path,
    semicolon_separated: bool,
) -> Result<Vec<(usize, String)>, WorkloadError> {
    let content = fs::read_to_string(path)?;
    let queries = if semicolon_separated {
        queries_extract_semicolon(&content)
    } else {
        queries_extract_lines(&content)
    };
    Ok(queries)
}

/// One query per line: each line is scanned for a `SELECT …` span.
pub fn queries_extract_lines(content: &str) -> Vec<(usize, String)> {
    content
        .lines()
        .enumerate()
        .filter_map(|(index, line)| query_extract(line).map(|query| (index + 1, query)))
        .collect()
}

/// Semicolon-separated queries, possibly spanning lines. The line number is
/// that of each query's first line.
pub fn queries_extract_semicolon(content: &str) -> Vec<(usize, String)> {
    SELECT_TERMINATED_RE
        .captures_iter(content)
        .map(|captures| {
            let matched = captures.get(1).expect("pattern has one group");
            let line = content[..matched.start()].matches('\n').count() + 1;
            let mut query = matched.as_str().trim().to_owned();
            query.push(';');
            (line, query)
        })
        .collect()
}

/// Pull the `SELECT … ;` span out of a text, re-appending the terminating
/// semicolon when the source omitted it.
pub fn query_extract(text: &str) -> Option<String> {
    let matched = SELECT_SPAN_RE.find(text)?;
    let mut query = matched.as_str().trim_end_matches(';').trim().to_owned();
    if query.is_empty() {
        return None;
    }
    query.push(';');
    Some(query)
}

/// Format a subset as `{a, b, c}`. Callers pass the aliases sorted.
pub fn subset_format(aliases: &[EcoString]) -> String {
    let mut out = String::from("{");
    let mut sep = "";
    for alias in aliases {
        out.push_str(sep);
        out.push_str(alias);
        sep = ", ";
    }
    out.push('}');
    out
}
