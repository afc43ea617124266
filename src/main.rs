use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use popeye::artifact::ArtifactManager;
use popeye::config::PopeyeConfig;
use popeye::consensus::{ConsensusRunner, ReviewerSpec};
use popeye::pipeline::{Orchestrator, PipelineState};
use popeye::provider::{CommandExecutor, CommandProvider, ProviderKey, ReasoningProvider};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "popeye")]
#[command(version, about = "Governance-driven pipeline orchestrator")]
struct Cli {
    #[arg(short, long, global = true)]
    verbose: bool,

    #[arg(long, global = true)]
    project_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Drive the pipeline from its current phase to DONE or STUCK
    Run {
        /// Override the recovery-iteration budget
        #[arg(long)]
        max_recovery: Option<u32>,
        /// Guidance prepended to the intake planning prompt
        #[arg(long)]
        guidance: Option<String>,
    },
    /// Show the current phase, gate results, and artifact inventory
    Status,
    /// Re-hash every stored artifact and report integrity drift
    Verify,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "popeye=debug" } else { "popeye=info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .init();

    let project_dir = match cli.project_dir {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to resolve current directory")?,
    };

    match cli.command {
        Commands::Run {
            max_recovery,
            guidance,
        } => run_pipeline(project_dir, max_recovery, guidance).await,
        Commands::Status => show_status(&project_dir),
        Commands::Verify => verify_artifacts(&project_dir),
    }
}

async fn run_pipeline(
    project_dir: PathBuf,
    max_recovery: Option<u32>,
    guidance: Option<String>,
) -> Result<()> {
    let mut config = PopeyeConfig::load(&project_dir)?;
    if let Some(max) = max_recovery {
        config.pipeline.max_recovery_iterations = max;
    }

    let provider_timeout = Duration::from_secs(config.provider.timeout_secs);
    let make_provider = |key: ProviderKey| -> Arc<dyn ReasoningProvider> {
        Arc::new(CommandProvider::new(
            key,
            &config.provider.command,
            config.provider.args.clone(),
            provider_timeout,
        ))
    };

    let reviewers = config
        .consensus
        .reviewers
        .iter()
        .map(|r| {
            (
                ReviewerSpec {
                    reviewer_id: r.id.clone(),
                    temperature: r.temperature,
                    system_prompt: None,
                },
                make_provider(ProviderKey::new(&r.provider, &r.model)),
            )
        })
        .collect();
    let mut consensus = ConsensusRunner::new(reviewers)
        .with_timeout(Duration::from_secs(config.consensus.timeout_secs));
    if config.consensus.arbitration {
        consensus =
            consensus.with_arbitrator(make_provider(ProviderKey::new("arbitrator", "default")));
    }

    let planner = make_provider(ProviderKey::new("planner", "default"));
    let executor = Arc::new(CommandExecutor::new(
        &config.provider.command,
        provider_timeout,
    ));

    let mut orchestrator =
        Orchestrator::new(project_dir, config, consensus, planner, executor)?.with_progress(
            Box::new(|phase, message| {
                println!(
                    "  {} {}",
                    console::style(format!("[{phase}]")).cyan(),
                    message
                );
            }),
        );
    if let Some(guidance) = guidance {
        orchestrator = orchestrator.with_session_guidance(&guidance);
    }

    let result = orchestrator.run().await?;
    println!();
    if result.success {
        println!(
            "{} pipeline reached DONE with {} artifacts ({} recovery iterations)",
            console::style("✓").green(),
            result.artifacts.len(),
            result.recovery_iterations,
        );
    } else {
        println!(
            "{} pipeline halted at {} after {} recovery iterations",
            console::style("✗").red(),
            result.final_phase,
            result.recovery_iterations,
        );
        if let Some(error) = result.error {
            println!("  {error}");
        }
        std::process::exit(1);
    }
    Ok(())
}

fn show_status(project_dir: &PathBuf) -> Result<()> {
    let Some(state) = PipelineState::load(project_dir) else {
        println!("No pipeline state found; run `popeye run` to start at INTAKE.");
        return Ok(());
    };

    println!("Phase: {}", console::style(state.pipeline_phase).cyan());
    println!(
        "Recovery: {}/{}",
        state.recovery_count, state.max_recovery_iterations
    );
    if let Some(failed) = state.failed_phase {
        println!("Failed phase: {}", console::style(failed).red());
    }
    println!("Artifacts: {}", state.artifacts.len());
    println!(
        "Pending change requests: {}",
        state.pending_change_requests.len()
    );
    if let Some(cr) = state.first_proposed_cr() {
        println!(
            "  next re-consent: {} -> {}",
            cr.change_type, cr.target_phase
        );
    }
    for (phase, result) in &state.gate_results {
        let mark = if result.pass {
            console::style("pass").green()
        } else {
            console::style("fail").red()
        };
        let score = result
            .score
            .map(|s| format!(" score={s:.2}"))
            .unwrap_or_default();
        println!("  {phase}: {mark}{score}");
    }
    Ok(())
}

fn verify_artifacts(project_dir: &PathBuf) -> Result<()> {
    let manager = ArtifactManager::new(project_dir);
    let entries = manager.list_artifacts(None)?;
    if entries.is_empty() {
        println!("No artifacts recorded.");
        return Ok(());
    }

    let mut drifted = 0usize;
    for entry in &entries {
        if !manager.verify_artifact(entry)? {
            drifted += 1;
            println!(
                "{} {} ({})",
                console::style("drift").red(),
                entry.path,
                entry.id
            );
        }
    }
    if drifted == 0 {
        println!(
            "{} all {} artifacts verified",
            console::style("✓").green(),
            entries.len()
        );
    } else {
        println!("{drifted} of {} artifacts failed verification", entries.len());
        std::process::exit(1);
    }
    Ok(())
}
