//! Interactive REPL for Switchboard
//!
//! Provides the main user interaction loop.

use std::io::{self, BufRead, Write};
use std::sync::Arc;

use futures::StreamExt;

use crate::agent::{Conversation, Swarm, SwarmEvent};
use crate::cli::commands::{handle_command, CommandResult};
use crate::core::{Config, Result};
use crate::llm::AnthropicClient;
use crate::tools::ServerStatus;

/// State shared by the REPL and single-prompt mode
pub struct Session {
    /// Orchestration engine
    pub swarm: Swarm,
    /// History and active agent
    pub conversation: Conversation,
    /// Loaded configuration, updated by `set`
    pub config: Config,
    /// Outcome of connecting each configured server
    pub servers: Vec<ServerStatus>,
    /// Client used to list models, when the backend is Anthropic's
    pub catalog: Option<Arc<AnthropicClient>>,
    /// Model used for every agent, when set
    pub model_override: Option<String>,
    /// Print responses as they arrive
    pub stream: bool,
}

impl Session {
    /// Create a session starting at `agent_name`
    pub fn new(swarm: Swarm, config: Config, agent_name: impl Into<String>) -> Self {
        Self {
            swarm,
            conversation: Conversation::new(agent_name),
            config,
            servers: Vec::new(),
            catalog: None,
            model_override: None,
            stream: true,
        }
    }

    /// Attach the server report from startup
    pub fn with_servers(mut self, servers: Vec<ServerStatus>) -> Self {
        self.servers = servers;
        self
    }

    /// Attach a client for model listing
    pub fn with_catalog(mut self, catalog: Arc<AnthropicClient>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    /// Set streaming output on or off
    pub fn with_stream(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    /// Send one user message and print the reply
    ///
    /// A failed run is recorded as an apology from the agent. Without
    /// credentials the notice is shown and the history is not touched.
    pub async fn ask(&mut self, input: &str) -> Result<()> {
        let degraded = !self.swarm.has_credentials();
        let mut request = self.conversation.request(input);
        if let Some(model) = &self.model_override {
            request = request.model(model.clone());
        }

        if !self.stream {
            let response = self.swarm.respond(request).await;
            let speaker = response.agent_name.clone();
            if let Some(text) = response.last_text() {
                println!("\n[{}]\n{}\n", speaker, text);
            }
            if !degraded {
                self.conversation.apply(response);
            }
            return Ok(());
        }

        let mut stdout = io::stdout();
        let mut events = self.swarm.respond_stream(request);
        let mut speaking: Option<String> = None;

        while let Some(event) = events.next().await {
            match event? {
                SwarmEvent::TextDelta { agent, text } => {
                    if speaking.as_deref() != Some(agent.as_str()) {
                        print!("\n[{}]\n", agent);
                        speaking = Some(agent);
                    }
                    print!("{}", text);
                    stdout.flush()?;
                }
                SwarmEvent::ToolUse { call, .. } => {
                    println!("\n  -> {}", call.name);
                    speaking = None;
                }
                SwarmEvent::Handoff { from, to } => {
                    println!("  {} handed off to {}", from, to);
                }
                SwarmEvent::Done(response) if degraded => {
                    if let Some(text) = response.last_text() {
                        println!("\n{}\n", text);
                    }
                }
                SwarmEvent::Done(response) => {
                    self.conversation.apply(response);
                    println!("\n");
                }
                _ => {}
            }
        }
        Ok(())
    }
}

/// Interactive REPL (Read-Eval-Print Loop)
pub struct Repl {
    session: Session,
}

impl Repl {
    /// Create a REPL over a prepared session
    pub fn new(session: Session) -> Self {
        Self { session }
    }

    /// Run the REPL
    pub async fn run(&mut self) -> Result<()> {
        self.print_banner();

        let stdin = io::stdin();
        let mut stdout = io::stdout();

        loop {
            print!("{}> ", self.session.conversation.agent_name());
            stdout.flush()?;

            // Read input
            let mut input = String::new();
            match stdin.lock().read_line(&mut input) {
                Ok(0) => {
                    // EOF (Ctrl+D)
                    println!("\nGoodbye!");
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    eprintln!("Error reading input: {}", e);
                    continue;
                }
            }

            let input = input.trim();
            if input.is_empty() {
                continue;
            }

            match handle_command(input, &mut self.session).await {
                Ok(CommandResult::Exit) => {
                    println!("\nGoodbye!");
                    break;
                }
                Ok(CommandResult::Clear) => {
                    println!("Conversation cleared.\n");
                }
                Ok(CommandResult::Handled(output)) => {
                    println!("{}\n", output);
                }
                Ok(CommandResult::None) => {}
                Ok(CommandResult::Continue(input)) => {
                    if let Err(e) = self.session.ask(&input).await {
                        eprintln!("\nError: {}\n", e);
                    }
                }
                Err(e) => {
                    eprintln!("Command error: {}\n", e);
                }
            }
        }

        Ok(())
    }

    /// Print the startup banner
    fn print_banner(&self) {
        let session = &self.session;
        let connected = session.servers.iter().filter(|s| s.is_ok()).count();

        println!("\nSwitchboard {}", env!("CARGO_PKG_VERSION"));
        println!("Model:    {}", session.config.anthropic.model);
        println!("Agent:    {}", session.conversation.agent_name());
        println!("Servers:  {}/{} connected", connected, session.servers.len());
        if !session.swarm.has_credentials() {
            println!("API key:  not set (use `set key <key>`)");
        }
        println!();
        println!("Commands: help, agents, tools, servers, status, clear, exit");
        println!("-----------------------------------------------------------");
    }
}
