use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use repovault::{BackupEngine, Config, RepoStatus, RunReport};

#[derive(Parser)]
#[command(name = "repovault")]
#[command(about = "Bitbucket repository backup and migration engine")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (defaults to XDG config location)
    #[arg(short, long)]
    config: Option<std::path::PathBuf>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Back up all selected repositories to local archives
    Backup,

    /// Back up and migrate repositories into the destination account
    Migrate,

    /// List repositories that would be processed, after filtering
    List {
        /// Show filtered-out repositories and the rule that removed them
        #[arg(long)]
        show_filtered: bool,
    },

    /// Verify credentials against the configured accounts
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose)?;
    info!("Starting RepoVault v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config(cli.config)?;

    match cli.command {
        Commands::Backup => cmd_run(config, false).await,
        Commands::Migrate => cmd_run(config, true).await,
        Commands::List { show_filtered } => cmd_list(config, show_filtered).await,
        Commands::Check => cmd_check(config).await,
    }
}

/// Initialize logging based on verbosity level
fn init_logging(verbose: bool) -> Result<()> {
    let filter = if verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    Ok(())
}

/// Load configuration from the specified path or the default location
fn load_config(config_path: Option<std::path::PathBuf>) -> Result<Config> {
    let path = match config_path {
        Some(path) => path,
        None => Config::default_config_path()?,
    };
    let mut config =
        Config::load(&path).with_context(|| format!("Failed to load config: {:?}", path))?;
    config.expand_paths()?;
    Ok(config)
}

/// Run the backup pipeline, optionally in migration mode
async fn cmd_run(config: Config, migrate: bool) -> Result<()> {
    config.validate(migrate)?;

    let engine = BackupEngine::new(config, migrate)?;

    // Graceful stop: finish in-flight repositories, dispatch no new ones
    let cancel = engine.cancel_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            println!("\n🛑 Stop requested - finishing in-flight repositories...");
            cancel.cancel();
        }
    });

    if migrate {
        println!("🚚 Running backup + migration");
    } else {
        println!("💾 Running backup");
    }

    let report = engine.run().await?;
    print_report(&report);

    if report.is_success() {
        Ok(())
    } else {
        anyhow::bail!("{} repositories failed", report.count(RepoStatus::Failed));
    }
}

fn print_report(report: &RunReport) {
    println!("\n🎉 Run Complete!");
    println!("   📊 Repositories discovered: {}", report.discovered());
    println!("   ✅ Successful: {}", report.count(RepoStatus::Success));
    println!("   ⚠️  Partial: {}", report.count(RepoStatus::Partial));
    println!("   ❌ Failed: {}", report.count(RepoStatus::Failed));
    println!("   ⏭️  Skipped: {}", report.count(RepoStatus::Skipped));
    println!("   🚮 Filtered: {}", report.count(RepoStatus::Filtered));
    println!(
        "   💿 Archived: {:.1} MB",
        report.total_archive_bytes() as f64 / (1024.0 * 1024.0)
    );

    let partials: Vec<_> = report
        .outcomes
        .iter()
        .filter(|o| o.status == RepoStatus::Partial)
        .collect();
    if !partials.is_empty() {
        println!("\n⚠️  Partial backups (some metadata categories failed):");
        for outcome in partials {
            println!(
                "   {} - failed: {}",
                outcome.full_name,
                outcome.failed_categories.join(", ")
            );
        }
    }

    if !report.workspace_failures.is_empty() {
        println!("\n⚠️  Workspaces that could not be listed:");
        for (workspace, error) in &report.workspace_failures {
            println!("   {} - {}", workspace, error);
        }
    }

    let failures: Vec<_> = report
        .outcomes
        .iter()
        .filter(|o| o.status == RepoStatus::Failed)
        .collect();
    if !failures.is_empty() {
        println!("\n🔍 Failed repositories:");
        for outcome in failures {
            println!(
                "   ❌ {}: {}",
                outcome.full_name,
                outcome.error.as_deref().unwrap_or("unknown error")
            );
        }
    }
}

/// List repositories after filtering, without doing any work
async fn cmd_list(config: Config, show_filtered: bool) -> Result<()> {
    config.validate(false)?;
    let engine = BackupEngine::new(config, false)?;

    println!("🔍 Discovering repositories...");
    let outcome = engine.discover().await?;

    println!("Repositories ({}):", outcome.selected.len());
    for (workspace, repo) in &outcome.selected {
        println!("  📁 {} ({})", repo.full_name, workspace.slug);
    }

    if show_filtered && !outcome.filtered.is_empty() {
        println!("\nFiltered out ({}):", outcome.filtered.len());
        for filtered in &outcome.filtered {
            println!("  🚮 {} - {}", filtered.full_name, filtered.reason);
        }
    }

    for (workspace, error) in &outcome.workspace_failures {
        println!("  ⚠️  Workspace {} could not be listed: {}", workspace, error);
    }

    Ok(())
}

/// Verify credentials for the configured accounts
async fn cmd_check(config: Config) -> Result<()> {
    let migrate = config.destination.is_some();
    config.validate(migrate)?;
    let engine = BackupEngine::new(config, migrate)?;

    println!("🔑 Checking credentials...");
    match engine.check_credentials().await {
        Ok(identities) => {
            for (account, user) in identities {
                println!("   ✅ {}: authenticated as {}", account, user);
            }
            Ok(())
        }
        Err(e) => {
            println!("   ❌ Credential check failed: {}", e);
            Err(e)
        }
    }
}
