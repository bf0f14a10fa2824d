//! `depgraph-checkr`: resolve dependency graphs through native package managers,
//! normalize them, and check declared licenses against policy.
//!
//! # Flow
//! 1. Parse CLI arguments ([`cli`]).
//! 2. Load config ([`config::load_config`]).
//! 3. Discover definition files for the enabled managers ([`detector`]).
//! 4. Resolve every definition file in parallel ([`analyzer::resolve_all`]).
//! 5. Optionally enrich missing licenses from registries (`--online`, [`registry`]).
//! 6. Optionally scan project sources or load stored scan results ([`scanner`]).
//! 7. Evaluate policy ([`policy::LicensePolicy`]) and render the report ([`report`]).
//! 8. Exit `0` (clean) or `1` (failed resolutions or `Error` violations).

mod cli;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use tracing_subscriber::EnvFilter;

use cli::{Cli, ReportFormat};
use depgraph_checkr::analyzer::{self, AnalyzerContext, ManagerKind, PackageManager};
use depgraph_checkr::config::load_config;
use depgraph_checkr::detector::find_definition_files;
use depgraph_checkr::policy::{LicensePolicy, PolicyEvaluator, Severity};
use depgraph_checkr::process::LiveToolRunner;
use depgraph_checkr::report::json::RunReport;
use depgraph_checkr::scanner::{scan_projects, ScanResult, SpdxTagScanner};
use depgraph_checkr::{registry, report, storage};

fn init_logging(debug: bool) {
    let default = if debug { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.debug);

    let path = cli
        .path
        .canonicalize()
        .with_context(|| format!("cannot access {}", cli.path.display()))?;

    let config = load_config(&path, cli.config.as_deref())?;

    let excluded: Vec<ManagerKind> = cli.exclude_manager.iter().map(Into::into).collect();
    let ctx = AnalyzerContext::new(&path, Arc::new(LiveToolRunner));
    let managers: Vec<Arc<dyn PackageManager>> = config
        .analyzer
        .enabled_managers
        .iter()
        .filter(|kind| !excluded.contains(*kind))
        .map(|kind| kind.create(ctx.clone()))
        .collect();

    let jobs = find_definition_files(&path, &managers);
    if jobs.is_empty() {
        eprintln!("No supported definition files found in {}", path.display());
        std::process::exit(1);
    }

    for manager in &managers {
        analyzer::log_tool_diagnostics(manager.as_ref());
    }

    if !cli.quiet {
        for (manager, file) in &jobs {
            eprintln!(
                "  {} {} {}",
                "→".cyan(),
                manager.kind(),
                ctx.relative_path(file).display()
            );
        }
    }

    let concurrency = cli
        .jobs
        .map(usize::from)
        .unwrap_or(config.analyzer.concurrency);
    let mut result = analyzer::resolve_all(jobs, concurrency).await;

    if cli.online {
        let updated = registry::enrich(&mut result, cli.quiet).await?;
        tracing::info!("Enriched {} packages from registries", updated);
    }

    let mut scan_results: Vec<ScanResult> = Vec::new();
    if let Some(file) = &cli.scan_results {
        let (store, name) = storage::for_file(file)?;
        scan_results.extend(storage::read_json::<Vec<ScanResult>>(store.as_ref(), &name)?);
    }
    if cli.scan {
        let scanner = SpdxTagScanner::new()?;
        scan_results.extend(scan_projects(&scanner, &path, &result));
    }

    let policy = LicensePolicy::new(config.classifications, config.policy);
    let violations = policy.evaluate(&result, &scan_results);

    let run = RunReport {
        analyzer_result: result,
        scan_results,
        violations,
    };

    match cli.report {
        ReportFormat::Terminal => report::terminal::render(
            &run.analyzer_result,
            &run.violations,
            &path,
            cli.verbose,
            cli.quiet,
        )?,
        ReportFormat::Json => println!("{}", report::json::render(&run)?),
    }

    if let Some(file) = &cli.output {
        let (store, name) = storage::for_file(file)?;
        storage::write_json(store.as_ref(), &name, &run)?;
        tracing::info!("Wrote result to {}", file.display());
    }

    let failed = !run.analyzer_result.issues.is_empty()
        || run.violations.iter().any(|v| v.severity == Severity::Error);
    if failed {
        std::process::exit(1);
    }

    Ok(())
}
