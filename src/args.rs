use std::path::PathBuf;

use clap::{ArgGroup, Parser};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(group(
    ArgGroup::new("targets")
        .required(true)
        .args(["domain", "input", "list_plugins"])
))]
pub struct Args {
    /// Target apex domain to enumerate
    #[arg(short, long)]
    pub domain: Option<String>,

    /// File with one target domain per line
    #[arg(short, long)]
    pub input: Option<PathBuf>,

    /// List the built-in sources and exit
    #[arg(long)]
    pub list_plugins: bool,

    /// Only run these sources (comma-separated names)
    #[arg(long, value_delimiter = ',', conflicts_with = "exclude_plugins")]
    pub use_plugins: Option<Vec<String>>,

    /// Skip these sources (comma-separated names)
    #[arg(long, value_delimiter = ',')]
    pub exclude_plugins: Option<Vec<String>>,

    /// Output file; %d expands to the target domain
    /// (.txt, .csv, .json, .html, .burp, .gnmap)
    #[arg(short, long)]
    pub output: Option<String>,

    /// Overwrite the output file if it already exists
    #[arg(long)]
    pub overwrite: bool,

    /// Per-source task timeout in seconds
    #[arg(short, long, default_value = "15")]
    pub timeout: u64,

    /// Overall timeout for one target in seconds
    #[arg(long)]
    pub global_timeout: Option<u64>,

    /// Attempt budget for API sources
    #[arg(long, default_value = "3")]
    pub api_retries: usize,

    /// Hard cap on subdomains kept per target (0 disables)
    #[arg(long, default_value = "25000")]
    pub max_subdomains: usize,

    /// Skip TLS certificate verification
    #[arg(long)]
    pub insecure: bool,

    /// Directory for cached per-target results
    #[arg(long)]
    pub cache_dir: Option<PathBuf>,

    /// Ignore cached results for this run
    #[arg(long)]
    pub no_cache: bool,

    /// Disable the live per-source progress display
    #[arg(long)]
    pub no_progress: bool,

    /// Only print warnings and errors
    #[arg(short, long)]
    pub silent: bool,

    /// Verbose diagnostic logging
    #[arg(long)]
    pub debug: bool,
}
