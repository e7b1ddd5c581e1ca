//! Command-line arguments

use std::path::PathBuf;

use clap::Parser;

/// Run a class-file program on the Corten VM
#[derive(Debug, Clone, Parser)]
#[command(name = "corten-vm", version, about)]
pub struct Cli {
    /// Directories searched for application classes, separated like PATH
    #[arg(long, visible_alias = "cp", default_value = ".")]
    pub classpath: String,

    /// JSON file with VM settings; flags given here override it
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Heap limit in bytes, accepts k/m/g suffixes
    #[arg(long, value_name = "SIZE", value_parser = parse_size)]
    pub max_heap: Option<usize>,

    /// Width of references stored in objects
    #[arg(long, value_name = "BITS", value_parser = ["32", "64"])]
    pub address_size: Option<String>,

    /// Store multi-byte fields most significant byte first
    #[arg(long)]
    pub big_endian: bool,

    /// Print collector statistics when the program ends
    #[arg(long)]
    pub gc_stats: bool,

    /// Raise log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Class whose `main(String[])` runs, dotted or slashed
    pub main_class: String,

    /// Arguments handed to `main`
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub args: Vec<String>,
}

impl Cli {
    /// Directories of the class path.
    pub fn classpath_entries(&self) -> Vec<PathBuf> {
        std::env::split_paths(&self.classpath)
            .filter(|entry| !entry.as_os_str().is_empty())
            .collect()
    }

    /// Log filter for the requested verbosity.
    pub fn log_level(&self) -> &'static str {
        match self.verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    }
}

/// Parses `4096`, `512k`, `64m` or `1g` into bytes.
pub fn parse_size(text: &str) -> Result<usize, String> {
    let text = text.trim();
    let (digits, scale) = match text.chars().last().map(|c| c.to_ascii_lowercase()) {
        Some('k') => (&text[..text.len() - 1], 1usize << 10),
        Some('m') => (&text[..text.len() - 1], 1 << 20),
        Some('g') => (&text[..text.len() - 1], 1 << 30),
        _ => (text, 1),
    };
    let count: usize = digits
        .parse()
        .map_err(|_| format!("invalid size '{}'", text))?;
    count
        .checked_mul(scale)
        .ok_or_else(|| format!("size '{}' is too large", text))
}
