use std::path::PathBuf;

use clap::Parser;

/// Hard ceiling on enumeration depth, regardless of `--max-level`.
pub const MAX_LEVEL_CEILING: usize = 20;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Enumerate connected join subsets of SQL queries and emit one sub-query per subset"
)]
pub struct Settings {
    /// Input SQL workload file
    pub input_file: PathBuf,

    /// Output CSV file
    #[arg(short, long, default_value = "output.csv")]
    pub output: PathBuf,

    /// Queries are semicolon-separated (may span lines) instead of one per line
    #[arg(long)]
    pub semicolon_separated: bool,

    /// Stop processing at the first failing query
    #[arg(long)]
    pub stop_on_error: bool,

    /// Verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Maximum enumeration level
    #[arg(long, default_value_t = MAX_LEVEL_CEILING)]
    pub max_level: usize,
}

impl Settings {
    pub fn from_args() -> Settings {
        let mut settings = Settings::parse();
        settings.max_level = settings.max_level.min(MAX_LEVEL_CEILING);
        settings
    }
}
