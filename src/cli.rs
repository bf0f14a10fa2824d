use std::path::PathBuf;

use clap::Parser;

use depgraph_checkr::analyzer::ManagerKind;

#[derive(Parser, Debug)]
#[command(
    name = "depgraph-checkr",
    about = "Resolve project dependency graphs and check declared licenses",
    version
)]
pub struct Cli {
    /// Repository root to analyze
    #[arg(default_value = ".")]
    pub path: PathBuf,

    /// Config file [default: ./.depgraph-checkr/config.toml, fallback ~/.config/depgraph-checkr/config.toml]
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Report format
    #[arg(long, default_value = "terminal", value_name = "FORMAT")]
    pub report: ReportFormat,

    /// Also write the JSON result to FILE (gzip-compressed if it ends in .gz)
    #[arg(long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Exclude a package manager (repeatable)
    #[arg(long = "exclude-manager", value_name = "MANAGER")]
    pub exclude_manager: Vec<ManagerArg>,

    /// Maximum number of definition files resolved in parallel [default: from config]
    #[arg(short, long, value_name = "N", value_parser = clap::value_parser!(u16).range(1..))]
    pub jobs: Option<u16>,

    /// Fetch missing declared licenses from package registries
    #[arg(long)]
    pub online: bool,

    /// Scan each project directory for SPDX license tags
    #[arg(long)]
    pub scan: bool,

    /// Evaluate stored scan results (JSON list, optionally .gz)
    #[arg(long, value_name = "FILE")]
    pub scan_results: Option<PathBuf>,

    /// Show all packages (not just violations)
    #[arg(short, long)]
    pub verbose: bool,

    /// Only print summary line
    #[arg(short, long)]
    pub quiet: bool,

    /// Log resolution details to stderr
    #[arg(long)]
    pub debug: bool,
}

#[derive(Debug, Clone, clap::ValueEnum)]
pub enum ReportFormat {
    Terminal,
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq, clap::ValueEnum)]
pub enum ManagerArg {
    Cargo,
    Npm,
}

impl From<&ManagerArg> for ManagerKind {
    fn from(arg: &ManagerArg) -> Self {
        match arg {
            ManagerArg::Cargo => ManagerKind::Cargo,
            ManagerArg::Npm => ManagerKind::Npm,
        }
    }
}
