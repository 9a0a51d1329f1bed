use std::error::Error;
use std::process::exit;

use joinenum_lib::query::analyze::{AnalyzeError, query_analyze, whitespace_normalize};
use joinenum_lib::query::enumerate::subsets_enumerate;
use joinenum_lib::query::generate::SubqueryGenerator;
use joinenum_lib::query::{Diagnostic, DiagnosticKind};
use joinenum_lib::settings::Settings;
use joinenum_lib::tracing_utils::CompactFormatter;
use joinenum_lib::workload::{OutputRow, queries_read, subset_format};

use tracing::{Level, debug, error, info, warn};

fn main() -> Result<(), Box<dyn Error>> {
    let settings = Settings::from_args();

    let level = if settings.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .event_format(CompactFormatter)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let queries = queries_read(&settings.input_file, settings.semicolon_separated)?;
    if queries.is_empty() {
        warn!("no queries found in {}", settings.input_file.display());
        return Ok(());
    }

    let mut writer = csv::Writer::from_path(&settings.output)?;

    let mut processed = 0usize;
    let mut failed = 0usize;
    for (index, (line, sql)) in queries.iter().enumerate() {
        let query_id = index + 1;
        match query_process(sql, query_id, settings.max_level) {
            Ok((rows, diagnostics)) => {
                for row in &rows {
                    writer.serialize(row)?;
                }
                processed += 1;
                debug!(query_id, subsets = rows.len(), "query processed");

                for diagnostic in &diagnostics {
                    debug!(query_id, kind = diagnostic.kind.as_ref(), "{}", diagnostic.message);
                }
                let internal = diagnostics
                    .iter()
                    .any(|d| d.kind == DiagnosticKind::Internal);
                if internal && settings.stop_on_error {
                    writer.flush()?;
                    error!(line, query_id, "stopping at first internal enumeration anomaly");
                    exit(1);
                }
            }
            Err(e) => {
                error!(line, query_id, "query skipped: {e}");
                failed += 1;
                if settings.stop_on_error {
                    writer.flush()?;
                    error!("stopping at first error");
                    exit(1);
                }
            }
        }
    }
    writer.flush()?;

    info!(
        "completed {processed}/{} queries ({failed} failed), output written to {}",
        queries.len(),
        settings.output.display()
    );
    Ok(())
}

/// Run the full pipeline on one query and produce its CSV rows plus the
/// diagnostics collected by the analyzer and the enumerator; the caller
/// decides whether an anomaly aborts the run. Singleton subsets are
/// enumerated but not emitted; only true sub-queries feed the downstream
/// cardinality experiments.
fn query_process(
    sql: &str,
    query_id: usize,
    max_level: usize,
) -> Result<(Vec<OutputRow>, Vec<Diagnostic>), AnalyzeError> {
    let analyzed = query_analyze(sql)?;

    let mut enumeration = subsets_enumerate(&analyzed.join_graph, &analyzed.aliases, max_level);
    let generator = SubqueryGenerator::new(&analyzed);

    let rows = enumeration
        .plans
        .iter()
        .filter(|plan| plan.level > 1)
        .map(|plan| OutputRow {
            query_id,
            subset: subset_format(&plan.subset),
            query: whitespace_normalize(&generator.subquery_generate(plan)),
        })
        .collect();

    let mut diagnostics = analyzed.diagnostics;
    diagnostics.append(&mut enumeration.diagnostics);
    Ok((rows, diagnostics))
}
