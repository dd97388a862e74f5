//! Switchboard - multi-agent orchestration
//!
//! Main entry point for the CLI application.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use switchboard::agent::{default_registry, Swarm, SwarmSettings};
use switchboard::llm::AnthropicClient;
use switchboard::tools::{connect_all, ProviderRegistry};
use switchboard::{Config, Repl, Session};

/// Switchboard - route requests through cooperating agents
#[derive(Parser, Debug)]
#[command(name = "switchboard")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Model used by every agent
    #[arg(long, short = 'm')]
    model: Option<String>,

    /// Agent that receives the first message
    #[arg(long, short = 'a')]
    agent: Option<String>,

    /// Single prompt mode (non-interactive)
    #[arg(long, short = 'p')]
    prompt: Option<String>,

    /// Wait for whole responses instead of streaming
    #[arg(long)]
    no_stream: bool,

    /// JSON file with an `mcpServers` roster
    #[arg(long, short = 's')]
    servers: Option<PathBuf>,

    /// Upper bound on inference calls per message
    #[arg(long)]
    max_turns: Option<usize>,

    /// Enable debug logging
    #[arg(long, short = 'd')]
    debug: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Build configuration
    let mut config = Config::load();

    let filter = if args.debug {
        "switchboard=debug".to_string()
    } else {
        config.logging.filter.clone()
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Some(path) = &args.servers {
        let count = config.load_servers_file(path)?;
        tracing::info!(path = %path.display(), count, "Loaded server roster");
    }

    // Apply CLI overrides
    if let Some(model) = &args.model {
        config.anthropic.model = model.clone();
    }
    if let Some(max_turns) = args.max_turns {
        config.swarm.max_turns = max_turns;
    }
    let start_agent = args
        .agent
        .clone()
        .unwrap_or_else(|| config.swarm.default_agent.clone());

    let client = Arc::new(AnthropicClient::from_config(&config.anthropic)?);
    let agents = Arc::new(default_registry(&config.anthropic.model));
    let providers = Arc::new(ProviderRegistry::new());

    let servers = connect_all(&config, &agents, &providers).await;
    for server in servers.iter().filter(|s| !s.is_ok()) {
        eprintln!(
            "Warning: server '{}' unavailable: {}",
            server.name,
            server.error.as_deref().unwrap_or("unknown error")
        );
    }

    for (agent, target) in agents.dangling_handoffs() {
        tracing::warn!(agent = %agent, target = %target, "Handoff target is not registered");
    }

    if !agents.contains(&start_agent) {
        anyhow::bail!(
            "Unknown agent '{}'. Available: {}",
            start_agent,
            agents.names().join(", ")
        );
    }

    let swarm = Swarm::new(
        agents,
        Arc::clone(&providers),
        client.clone(),
        SwarmSettings::from_config(&config),
    );
    let mut session = Session::new(swarm, config, start_agent)
        .with_servers(servers)
        .with_catalog(client)
        .with_stream(!args.no_stream);

    let outcome = match args.prompt {
        // Single prompt mode
        Some(prompt) => session.ask(&prompt).await,
        // Interactive REPL mode
        None => Repl::new(session).run().await,
    };

    providers.close_all().await;
    outcome?;
    Ok(())
}
