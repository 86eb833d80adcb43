use anyhow::bail;
use clap::{Parser, Subcommand};
use kith_core::simulation::TurnKind;
use kith_core::KithConfig;
use kith_oracle::{LlmClient, MockProvider, NoRetrieval, OpenAiClient};
use kith_pipeline::{Pipeline, StageReport};
use kith_simulation::SimulationEngine;
use kith_store::SqliteStore;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "kith", author, version, about, long_about = None)]
struct Cli {
    /// Path to the config file
    #[arg(short, long, default_value = "kith.toml")]
    config: PathBuf,

    /// User the command operates on
    #[arg(short, long, default_value = "default", env = "KITH_USER")]
    user: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Submit a scenario from a text file and run every derived stage
    Submit { file: PathBuf },
    /// Revise a scenario's text (allowed once) and re-run derivation
    Revise { id: i64, file: PathBuf },
    /// Delete a scenario and everything scoped to it
    Delete { id: i64 },
    /// Re-run the derived stages for an existing scenario
    Derive { id: i64 },
    /// Print the stored summaries for a scenario
    Summaries { id: i64 },
    /// Print the global actors snapshot
    Snapshot,
    /// Print the cached social graph
    Graph,
    /// Remove an actor from profiles, snapshot, and graph
    Remove { name: String },
    /// Generate a one-shot simulation transcript
    Simulate {
        file: PathBuf,
        /// Comma-separated actor names, at least two
        #[arg(long, value_delimiter = ',')]
        actors: Vec<String>,
    },
    /// Play a live simulation at the terminal
    Live {
        file: PathBuf,
        /// Comma-separated actor names, at least two
        #[arg(long, value_delimiter = ',')]
        actors: Vec<String>,
        /// Which actor the user plays
        #[arg(long, default_value = "Me")]
        play_as: String,
    },
}

fn build_client(config: &KithConfig) -> anyhow::Result<Arc<dyn LlmClient>> {
    match config.llm.provider.as_str() {
        "openai" => Ok(Arc::new(OpenAiClient::new(
            &config.llm.model,
            config.llm.base_url.as_deref(),
            config.llm.request_timeout_secs,
        )?)),
        "mock" => Ok(Arc::new(MockProvider::new())),
        other => bail!("unknown llm provider: {other}"),
    }
}

fn print_report(report: &StageReport) {
    for stage in &report.completed {
        println!("  ok   {stage}");
    }
    for (stage, error) in &report.failures {
        println!("  FAIL {stage}: {error}");
    }
}

fn kind_tag(kind: &TurnKind) -> &'static str {
    match kind {
        TurnKind::Speech => "speech",
        TurnKind::Thought => "thought",
        TurnKind::Feeling => "feeling",
        TurnKind::Action => "action",
        TurnKind::Error => "error",
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    let config = KithConfig::load_or_default(&cli.config);
    let store = SqliteStore::new(&config.store.db_path).await?;
    let llm = build_client(&config)?;
    let pipeline = Pipeline::new(
        store.clone(),
        llm.clone(),
        Arc::new(NoRetrieval),
        config.language,
    );
    let user = cli.user.as_str();

    match cli.command {
        Command::Submit { file } => {
            let text = std::fs::read_to_string(&file)?;
            let scenario = pipeline.submit_scenario(user, &text).await?;
            println!("scenario {} submitted", scenario.id);
            let report = pipeline.run_derivations(scenario.id).await?;
            print_report(&report);
        }
        Command::Revise { id, file } => {
            let text = std::fs::read_to_string(&file)?;
            pipeline.revise_scenario(id, user, &text).await?;
            println!("scenario {id} revised");
            let report = pipeline.run_derivations(id).await?;
            print_report(&report);
        }
        Command::Delete { id } => {
            pipeline.delete_scenario(id, user).await?;
            println!("scenario {id} deleted");
        }
        Command::Derive { id } => {
            let report = pipeline.run_derivations(id).await?;
            print_report(&report);
        }
        Command::Summaries { id } => {
            for (kind, content) in store.summaries(id).await? {
                println!("== {} ==\n{content}\n", kind.as_str());
            }
        }
        Command::Snapshot => {
            let snapshot = store.global_snapshot(user).await?.unwrap_or_default();
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
        }
        Command::Graph => {
            let graph = store.graph(user).await?.unwrap_or_default();
            println!("{}", serde_json::to_string_pretty(&graph)?);
        }
        Command::Remove { name } => {
            pipeline.remove_actor(user, &name).await?;
            println!("{name} removed");
        }
        Command::Simulate { file, actors } => {
            let text = std::fs::read_to_string(&file)?;
            let engine = SimulationEngine::new(store.clone(), llm.clone());
            let sim = engine.run_batch(user, &actors, &text).await?;
            info!(simulation_id = sim.id, turns = sim.transcript.len(), "simulation generated");
            for turn in &sim.transcript {
                println!("{} [{}]: {}", turn.actor, kind_tag(&turn.kind), turn.content);
            }
        }
        Command::Live { file, actors, play_as } => {
            let text = std::fs::read_to_string(&file)?;
            let engine = SimulationEngine::new(store.clone(), llm.clone());
            let session = engine.start_session(user, &actors, &text).await?;
            run_live_loop(&engine, user, session.session_id, &play_as).await?;
        }
    }

    Ok(())
}

async fn run_live_loop(
    engine: &SimulationEngine,
    user: &str,
    session_id: Uuid,
    play_as: &str,
) -> anyhow::Result<()> {
    println!("Live session {session_id}. You play {play_as}. Type 'quit' to exit.");
    print!("{play_as}> ");
    io::stdout().flush()?;

    let stdin = io::stdin();
    let mut input = String::new();
    let mut seen = 0usize;

    loop {
        input.clear();
        if stdin.read_line(&mut input)? == 0 {
            break;
        }
        let trimmed = input.trim();
        if trimmed == "quit" || trimmed == "exit" {
            break;
        }
        if trimmed.is_empty() {
            print!("{play_as}> ");
            io::stdout().flush()?;
            continue;
        }

        match engine.take_turn(user, session_id, play_as, trimmed).await {
            Ok(session) => {
                // Skip the user's own echoed turn.
                for turn in session.transcript.iter().skip(seen + 1) {
                    println!("{} [{}]: {}", turn.actor, kind_tag(&turn.kind), turn.content);
                }
                seen = session.transcript.len();
            }
            Err(kith_core::KithError::MaxTurnsReached(n)) => {
                println!("Session reached the {n}-turn limit.");
                break;
            }
            Err(e) => {
                println!("[error]: {e}");
            }
        }

        print!("{play_as}> ");
        io::stdout().flush()?;
    }

    Ok(())
}
