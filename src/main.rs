use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};

use locator_heal::config::{load_config, AppConfig};
use locator_heal::dom::{DomQueryEvaluator, EvidenceCollector, XPathEvaluator};
use locator_heal::failure::FailureReport;
use locator_heal::llm::registry::ProviderRegistry;
use locator_heal::locator::file::split_label_list;
use locator_heal::locator::LocatorFile;
use locator_heal::page::SnapshotPage;
use locator_heal::resolve::{FailureEvidence, Resolver};
use locator_heal::{init_tracing, FailureHandler, HealResult, Oracles};

#[derive(Parser)]
#[command(name = "locator-heal")]
#[command(about = "Find and repair the UI locator behind a failed browser test")]
#[command(version)]
struct Cli {
    /// Config file (default: searched next to the binary, in the working dir, then the user config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Verbose output (-v for info, -vv for debug)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Quiet mode (only errors)
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Full pipeline on a saved failure report and DOM snapshot
    Run {
        #[arg(long)]
        report: PathBuf,
        #[arg(long)]
        dom: PathBuf,
        /// Overrides the report's test title
        #[arg(long)]
        title: Option<String>,
        /// Page URL recorded in the DOM artifact
        #[arg(long)]
        url: Option<String>,
    },
    /// Print the locator file responsible for a failure
    Resolve {
        /// Rendered error text
        #[arg(long)]
        error: PathBuf,
        #[arg(long)]
        title: String,
        /// Artifacts directory holding field-labels.md
        #[arg(long, default_value = ".")]
        artifacts: PathBuf,
    },
    /// Check every locator of a file against a DOM snapshot
    Validate {
        #[arg(long)]
        locators: PathBuf,
        #[arg(long)]
        dom: PathBuf,
    },
    /// Write label-matched UI evidence for a DOM snapshot
    Evidence {
        #[arg(long)]
        dom: PathBuf,
        /// Comma-separated field labels
        #[arg(long)]
        labels: String,
        #[arg(long)]
        out: PathBuf,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let directive = if cli.quiet {
        "error"
    } else {
        match cli.verbose {
            0 => "warn",
            1 => "info",
            _ => "debug",
        }
    };
    init_tracing(directive);

    // Load .env file if present (ignore error if not found)
    let _ = dotenvy::dotenv();

    match dispatch(cli.command, cli.config.as_deref()).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn dispatch(command: Command, config_path: Option<&Path>) -> HealResult<ExitCode> {
    match command {
        Command::Run { report, dom, title, url } => {
            let config = load_config(config_path)?;
            let handler = FailureHandler::from_config(config).await?;
            let mut report = FailureReport::load(&report).await?;
            if let Some(title) = title {
                report.title = title;
            }
            let mut page = SnapshotPage::new(tokio::fs::read_to_string(&dom).await?);
            if let Some(url) = url {
                page = page.with_url(url);
            }

            let outcome = handler.handle(&page, &report).await?;
            println!("Artifacts: {}", outcome.artifacts_dir.display());
            match (&outcome.resolution.resolved, &outcome.healing) {
                (Some(resolved), Some(healing)) => {
                    println!("✓ Healed {} ({})", resolved.file.display(), resolved.strategy.as_str());
                    println!("  Rounds: {}", healing.attempts);
                    println!("  Changed: {}", healing.changed.join(", "));
                    Ok(ExitCode::SUCCESS)
                }
                _ => {
                    println!("✗ Locator file unresolved; healing skipped");
                    Ok(ExitCode::from(2))
                }
            }
        }

        Command::Resolve { error, title, artifacts } => {
            let config = load_config(config_path).unwrap_or_else(|e| {
                tracing::warn!(error = %e, "config unavailable, using defaults");
                AppConfig::default()
            });
            let registry = ProviderRegistry::from_config(&config.llm);
            let extract = match Oracles::from_registry(&registry, Duration::from_secs(config.healing.oracle_timeout_secs)) {
                Ok(oracles) => Some(oracles.extract),
                Err(e) => {
                    tracing::info!(error = %e, "no oracle configured; extraction strategy skipped");
                    None
                }
            };
            let resolver = Resolver::from_config(&config.resolution, extract);
            let evidence = FailureEvidence {
                error_text: tokio::fs::read_to_string(&error).await?,
                test_title: title,
                artifacts_dir: artifacts,
            };
            let resolution = resolver.resolve(&evidence).await;
            for attempt in &resolution.attempts {
                let mark = if attempt.hit { "hit" } else { "miss" };
                println!("  {:<14} {}", attempt.strategy.as_str(), mark);
            }
            match resolution.resolved {
                Some(resolved) => {
                    match resolved.key {
                        Some(key) => println!("{} (key: {key})", resolved.file.display()),
                        None => println!("{}", resolved.file.display()),
                    }
                    Ok(ExitCode::SUCCESS)
                }
                None => {
                    println!("unresolved");
                    Ok(ExitCode::FAILURE)
                }
            }
        }

        Command::Validate { locators, dom } => {
            let file = LocatorFile::load(&locators).await?;
            let markup = tokio::fs::read_to_string(&dom).await?;
            let definitions = file.definitions();
            let expressions: Vec<_> = definitions.iter().map(|d| d.expression.clone()).collect();
            let evaluator: Arc<dyn DomQueryEvaluator> = Arc::new(XPathEvaluator::new());
            let verdicts = tokio::task::spawn_blocking(move || evaluator.evaluate_all(&markup, &expressions))
                .await
                .map_err(|e| locator_heal::HealError::Page(format!("validation task failed: {e}")))?;

            let mut invalid = 0;
            for (def, ok) in definitions.iter().zip(&verdicts) {
                if !ok {
                    invalid += 1;
                }
                println!("{} {:<24} {}", if *ok { "✓" } else { "✗" }, def.key, def.expression);
            }
            println!("{} valid, {} invalid", verdicts.len() - invalid, invalid);
            Ok(if invalid == 0 { ExitCode::SUCCESS } else { ExitCode::FAILURE })
        }

        Command::Evidence { dom, labels, out } => {
            let prefix = load_config(config_path)
                .map(|c| c.healing.prefix_match_labels)
                .unwrap_or_else(|_| AppConfig::default().healing.prefix_match_labels);
            let markup = tokio::fs::read_to_string(&dom).await?;
            let evidence = EvidenceCollector::new(&prefix)
                .collect_to_file(&markup, &split_label_list(&labels), &out)
                .await?;
            println!("{} matches across {} labels → {}", evidence.match_count(), evidence.labels.len(), out.display());
            Ok(ExitCode::SUCCESS)
        }
    }
}
