use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::Level;
use tracing_subscriber::EnvFilter;

use graph_backfill::prelude::*;
use graph_backfill::report::EXIT_FATAL;

/// Creates a default graph for every user whose documents predate graphs and
/// moves those documents into it.
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Cli {
    /// Required confirmation that existing documents should be migrated.
    #[clap(long)]
    migrate_existing_documents: bool,
    /// Only report what would be migrated.
    #[clap(long)]
    dry_run: bool,
    /// Limit the run to these users (repeatable).
    #[clap(long = "user", value_name = "UUID")]
    users: Vec<UserId>,
    /// Roll back users whose transaction would reassign no documents.
    #[clap(long)]
    skip_empty_graphs: bool,
    /// Check graph counts and memberships of migrated users afterwards.
    #[clap(long)]
    verify: bool,
    /// Write the run report as JSON.
    #[clap(long, value_name = "PATH")]
    report: Option<PathBuf>,
    #[clap(short, long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    setup_logging(&cli.log_level);

    if !cli.migrate_existing_documents {
        tracing::error!(
            "refusing to run without --migrate-existing-documents; add --dry-run to preview"
        );
        return ExitCode::from(EXIT_FATAL);
    }

    match run(&cli).await {
        Ok(report) => ExitCode::from(report.exit_code()),
        Err(err) => {
            tracing::error!(error = %format!("{:#}", err), "backfill aborted");
            ExitCode::from(EXIT_FATAL)
        }
    }
}

async fn run(cli: &Cli) -> Result<BackfillReport> {
    let policy = if cli.skip_empty_graphs {
        EmptyGraphPolicy::Skip
    } else {
        EmptyGraphPolicy::Keep
    };
    let config = BackfillConfig::from_env()
        .context("failed to load configuration")?
        .with_empty_graph_policy(policy);
    let filter = UserFilter::only(cli.users.iter().copied());

    let pool = connect(&config)
        .await
        .context("failed to connect to postgres")?;
    let pool = Arc::new(pool);
    let config = Arc::new(config);

    let report = if cli.dry_run {
        let coordinator = BackfillCoordinator::read_only(Arc::clone(&pool), Arc::clone(&config));
        let report = coordinator.plan(&filter).await?;
        tracing::info!(
            users = report.scanned,
            documents = report.planned_documents(),
            "dry run complete, nothing was written"
        );
        report
    } else {
        config.require_graph_store()?;
        let graph_store = Arc::new(ZepGraphClient::from_config(&config.graph_store)?);
        let coordinator =
            BackfillCoordinator::new(Arc::clone(&pool), Arc::clone(&config), graph_store);

        let lock = RunLock::acquire(&config).await?;
        let outcome = run_and_verify(&coordinator, &filter, cli.verify).await;
        if let Err(err) = lock.release().await {
            tracing::warn!(error = %err, "failed to release run lock");
        }
        outcome?
    };

    if let Some(path) = &cli.report {
        write_report(path, &report)?;
    }
    pool.close().await;
    Ok(report)
}

async fn run_and_verify(
    coordinator: &BackfillCoordinator,
    filter: &UserFilter,
    verify: bool,
) -> Result<BackfillReport> {
    let mut report = coordinator.run(filter).await?;
    if verify && report.aborted.is_none() {
        report.violations = coordinator.verify(&report).await?;
        tracing::info!(violations = report.violations.len(), "verification finished");
    }
    Ok(report)
}

fn write_report(path: &Path, report: &BackfillReport) -> Result<()> {
    let json = serde_json::to_vec_pretty(report).context("failed to serialize report")?;
    std::fs::write(path, json)
        .with_context(|| format!("failed to write report to {}", path.display()))?;
    tracing::info!(path = %path.display(), "wrote backfill report");
    Ok(())
}

fn setup_logging(log_level: &Option<String>) {
    let log_level = match log_level
        .as_deref()
        .unwrap_or("info")
        .to_lowercase()
        .as_str()
    {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("sqlx=warn,{}", log_level)));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
