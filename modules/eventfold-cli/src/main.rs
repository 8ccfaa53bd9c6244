use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use tracing::info;
use tracing_subscriber::EnvFilter;

use eventfold_canon::{HierarchyStore, IntegrityVerifier, Merger, VerifyOptions};
use eventfold_common::Config;

#[derive(Parser)]
#[command(name = "eventfold", about = "Canonical event consolidation and integrity checks")]
struct Cli {
    /// Raise log verbosity to debug.
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args)]
struct ScopeArgs {
    /// Single country to process.
    #[arg(long, conflicts_with = "all")]
    country: Option<String>,

    /// Process every configured country (EVENTFOLD_COUNTRIES).
    #[arg(long)]
    all: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Fold validated child events into their masters.
    Consolidate {
        #[command(flatten)]
        scope: ScopeArgs,

        /// Compute statistics without writing anything.
        #[arg(long)]
        dry_run: bool,
    },
    /// Run the read-only integrity checks. Exits non-zero on violations.
    Verify {
        #[command(flatten)]
        scope: ScopeArgs,

        /// Check every mention's doc references, not just the recent window.
        #[arg(long)]
        full_scan: bool,

        /// Max offending rows reported per check.
        #[arg(long)]
        sample_size: Option<i64>,

        /// Emit the report as JSON instead of text.
        #[arg(long)]
        json: bool,
    },
    /// Apply the embedded schema migrations.
    Migrate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive(format!("eventfold_canon={level}").parse()?)
                .add_directive(format!("eventfold_cli={level}").parse()?),
        )
        .init();

    let config = Config::from_env();

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await?;
    let store = HierarchyStore::new(pool.clone());

    match cli.command {
        Command::Migrate => {
            store.migrate().await?;
            info!("Migrations applied");
        }
        Command::Consolidate { scope, dry_run } => {
            let countries = consolidation_scope(&scope, &config)?;
            let merger = Merger::new(store);
            let summary = merger.consolidate(&countries, dry_run).await;
            println!("{summary}");
            if !summary.all_succeeded() {
                std::process::exit(1);
            }
        }
        Command::Verify {
            scope,
            full_scan,
            sample_size,
            json,
        } => {
            let countries = verify_scope(&scope, &config);
            let verifier = IntegrityVerifier::new(pool);
            let options = VerifyOptions {
                countries,
                sample_size: sample_size.unwrap_or(config.verify_sample_size),
                full_scan,
            };
            let report = verifier.run(&options).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("{report}");
            }
            if !report.passed() {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

/// Consolidation mutates, so the scope must be explicit: one country, or
/// --all for the configured list.
fn consolidation_scope(scope: &ScopeArgs, config: &Config) -> Result<Vec<String>> {
    if let Some(country) = &scope.country {
        return Ok(vec![country.trim().to_lowercase()]);
    }
    if !scope.all {
        anyhow::bail!("no country scope: pass --country <slug> or --all");
    }
    if config.countries.is_empty() {
        anyhow::bail!("--all requires EVENTFOLD_COUNTRIES to be set");
    }
    Ok(config.countries.clone())
}

/// Verification is read-only; an empty scope means every country in the
/// database.
fn verify_scope(scope: &ScopeArgs, config: &Config) -> Vec<String> {
    if let Some(country) = &scope.country {
        vec![country.trim().to_lowercase()]
    } else if scope.all {
        Vec::new()
    } else {
        config.countries.clone()
    }
}
