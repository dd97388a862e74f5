//! CLI commands
//!
//! Special commands that can be executed in the REPL. A leading `/` is
//! optional. Words that could begin an ordinary request only count as
//! commands when they are used the way a command is.

use serde_json::Value;

use crate::cli::repl::Session;
use crate::core::{Result, ToolName};

/// Result of parsing a command
#[derive(Debug, Clone, PartialEq)]
pub enum CommandResult {
    /// Continue processing as normal input
    Continue(String),
    /// Command was handled, show output
    Handled(String),
    /// Exit the REPL
    Exit,
    /// Clear history
    Clear,
    /// No output needed
    None,
}

/// Parse and handle special commands
pub async fn handle_command(input: &str, session: &mut Session) -> Result<CommandResult> {
    let input = input.trim();
    let slashed = input.starts_with('/');
    let body = input.trim_start_matches('/');
    let parts: Vec<&str> = body.splitn(2, ' ').collect();
    let cmd = parts[0].to_lowercase();
    let args = parts.get(1).map(|s| s.trim()).unwrap_or("");

    let result = match (cmd.as_str(), args.is_empty()) {
        ("exit" | "quit" | "q", true) => CommandResult::Exit,

        ("clear" | "reset", true) => {
            session.conversation.clear();
            CommandResult::Clear
        }

        ("help" | "?", true) => CommandResult::Handled(help_text()),

        ("status", true) => CommandResult::Handled(status(session)),

        ("agents", true) => CommandResult::Handled(agents(session)),

        ("tools", _) if slashed || args.is_empty() || session.swarm.agents().contains(args) => {
            CommandResult::Handled(tools(session, args))
        }

        ("servers", true) => CommandResult::Handled(servers(session)),

        ("models", true) => CommandResult::Handled(models(session).await),

        ("save", true) => {
            let path = session.config.save()?;
            CommandResult::Handled(format!("Configuration saved to {}", path.display()))
        }

        ("set", _) => match handle_set_command(args, session) {
            Some(result) => result,
            None if slashed || args.is_empty() || leads_with(args, &["key", "model", "agent", "stream"]) => {
                CommandResult::Handled(set_usage())
            }
            None => CommandResult::Continue(input.to_string()),
        },

        ("context", _) => match handle_context_command(args, session) {
            Some(result) => result,
            None if slashed
                || args.is_empty()
                || leads_with(args, &["set", "get", "remove", "list", "clear"]) =>
            {
                CommandResult::Handled(context_usage())
            }
            None => CommandResult::Continue(input.to_string()),
        },

        _ if slashed => CommandResult::Handled(format!(
            "Unknown command: {}. Type 'help' for available commands.",
            cmd
        )),

        // Not a command, treat as normal input
        _ => CommandResult::Continue(input.to_string()),
    };

    Ok(result)
}

/// Handle 'set' subcommands; `None` when the subcommand is not recognised
fn handle_set_command(args: &str, session: &mut Session) -> Option<CommandResult> {
    let parts: Vec<&str> = args.splitn(2, ' ').collect();
    let key = parts[0].to_lowercase();
    let value = parts.get(1).map(|s| s.trim()).unwrap_or("");

    let output = match key.as_str() {
        "key" => {
            if value.is_empty() {
                return Some(CommandResult::Handled("Usage: set key <api-key>".to_string()));
            }
            session.swarm.set_api_key(value);
            session.config.anthropic.api_key = value.to_string();
            "API key updated. Use `save` to keep it.".to_string()
        }

        "model" => {
            if value.is_empty() {
                return Some(CommandResult::Handled(format!(
                    "Current model: {}",
                    current_model(session)
                )));
            }
            session.model_override = Some(value.to_string());
            format!("Model set to: {}", value)
        }

        "agent" => {
            if value.is_empty() {
                return Some(CommandResult::Handled(format!(
                    "Current agent: {}",
                    session.conversation.agent_name()
                )));
            }
            if !session.swarm.agents().contains(value) {
                return Some(CommandResult::Handled(format!("Unknown agent: {}", value)));
            }
            session.conversation.set_agent(value);
            format!("Next message goes to: {}", value)
        }

        "stream" => {
            let enabled = matches!(value.to_lowercase().as_str(), "on" | "true" | "1" | "yes");
            session.stream = enabled;
            format!("Streaming: {}", if enabled { "ON" } else { "OFF" })
        }

        _ => return None,
    };

    Some(CommandResult::Handled(output))
}

/// Handle 'context' subcommands; `None` when the subcommand is not recognised
fn handle_context_command(args: &str, session: &mut Session) -> Option<CommandResult> {
    let parts: Vec<&str> = args.splitn(3, ' ').collect();
    let sub = parts[0].to_lowercase();
    let key = parts.get(1).copied().unwrap_or("");
    let value = parts.get(2).map(|s| s.trim()).unwrap_or("");
    let conversation = &mut session.conversation;

    let output = match (sub.as_str(), key.is_empty()) {
        ("set", false) if !value.is_empty() => {
            conversation.set_context(key, value);
            format!("{} = {}", key, render(&conversation.context()[key]))
        }
        ("get", false) => match conversation.context().get(key) {
            Some(value) => format!("{} = {}", key, render(value)),
            None => format!("{} is not set", key),
        },
        ("remove", false) => match conversation.remove_context(key) {
            Some(_) => format!("Removed {}", key),
            None => format!("{} is not set", key),
        },
        ("list", true) => {
            if conversation.context().is_empty() {
                "No context variables set.".to_string()
            } else {
                conversation
                    .context()
                    .iter()
                    .map(|(k, v)| format!("  {} = {}", k, render(v)))
                    .collect::<Vec<_>>()
                    .join("\n")
            }
        }
        ("clear", true) => {
            conversation.clear_context();
            "Context cleared.".to_string()
        }
        _ => return None,
    };

    Some(CommandResult::Handled(output))
}

/// Whether the first word of `args` is one of `words`
fn leads_with(args: &str, words: &[&str]) -> bool {
    let first = args.split_whitespace().next().unwrap_or("").to_lowercase();
    words.contains(&first.as_str())
}

fn render(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn current_model(session: &Session) -> String {
    session
        .model_override
        .clone()
        .unwrap_or_else(|| session.config.anthropic.model.clone())
}

fn status(session: &Session) -> String {
    let connected = session.servers.iter().filter(|s| s.is_ok()).count();
    format!(
        "Switchboard Status:\n\
         -----------------------------\n\
         Agent:      {}\n\
         Model:      {}\n\
         API key:    {}\n\
         Streaming:  {}\n\
         Servers:    {}/{} connected\n\
         History:    {} messages\n\
         Max turns:  {}",
        session.conversation.agent_name(),
        current_model(session),
        if session.swarm.has_credentials() {
            "set"
        } else {
            "not set"
        },
        if session.stream { "on" } else { "off" },
        connected,
        session.servers.len(),
        session.conversation.len(),
        session.swarm.settings().max_turns,
    )
}

fn agents(session: &Session) -> String {
    let registry = session.swarm.agents();
    let mut output = String::from("Agents:");
    for name in registry.names() {
        let marker = if name == session.conversation.agent_name() {
            "*"
        } else {
            " "
        };
        if let Ok(agent) = registry.get_by_name(&name) {
            output.push_str(&format!(
                "\n {} {} ({} tools, hands off to: {})",
                marker,
                name,
                agent.tools().len(),
                match agent.handoff_targets() {
                    targets if targets.is_empty() => "nobody".to_string(),
                    targets => targets.join(", "),
                }
            ));
        }
    }
    output
}

fn tools(session: &Session, agent: &str) -> String {
    let name = if agent.is_empty() {
        session.conversation.agent_name()
    } else {
        agent
    };

    let agent = match session.swarm.agents().get_by_name(name) {
        Ok(agent) => agent,
        Err(e) => return e.to_string(),
    };

    let external: Vec<String> = agent
        .tools()
        .iter()
        .filter(|t| !ToolName::parse(&t.name).is_some_and(|n| n.is_handoff()))
        .map(|t| format!("  - {}: {}", t.name, t.description))
        .collect();

    if external.is_empty() {
        format!("{} has no external tools.", name)
    } else {
        format!("Tools for {}:\n{}", name, external.join("\n"))
    }
}

fn servers(session: &Session) -> String {
    if session.servers.is_empty() {
        return "No servers configured.".to_string();
    }

    let mut output = String::from("Servers:");
    for server in &session.servers {
        match &server.error {
            None => output.push_str(&format!(
                "\n  [ok]     {} ({} tools)",
                server.name, server.tool_count
            )),
            Some(e) => output.push_str(&format!("\n  [failed] {}: {}", server.name, e)),
        }
    }
    output
}

async fn models(session: &Session) -> String {
    let current = current_model(session);
    let Some(catalog) = &session.catalog else {
        return format!("Current model: {}", current);
    };

    match catalog.list_models().await {
        Ok(models) => format!(
            "Available models:\n{}\n\nCurrent: {}",
            models
                .iter()
                .map(|m| format!("  - {}", m))
                .collect::<Vec<_>>()
                .join("\n"),
            current
        ),
        Err(e) => format!("Could not list models: {}\nCurrent: {}", e, current),
    }
}

fn set_usage() -> String {
    "Usage: set <key|model|agent|stream> <value>\n\
     Examples:\n\
       set key sk-ant-...\n\
       set model claude-3-5-sonnet-20240620\n\
       set agent money_agent\n\
       set stream off"
        .to_string()
}

fn context_usage() -> String {
    "Usage: context <set|get|remove|list|clear> [key] [value]\n\
     Examples:\n\
       context set company Acme\n\
       context get company\n\
       context list"
        .to_string()
}

/// Generate help text
fn help_text() -> String {
    r#"Switchboard Commands:
---------------------------------------------
  help, ?          Show this help message
  exit, quit, q    Exit Switchboard
  clear, reset     Clear conversation history
  status           Show current configuration
  agents           List agents and their handoffs
  tools [agent]    List an agent's external tools
  servers          Show tool server connections
  models           List available models
  save             Write the configuration file

  set key <key>          Set the Anthropic API key
  set model <model>      Use a model for every agent
  set agent <name>       Send the next message to an agent
  set stream <on|off>    Stream responses as they arrive

  context set <key> <value>   Set a context variable
  context get <key>           Show a context variable
  context remove <key>        Remove a context variable
  context list                List context variables
  context clear               Remove all context variables

Keyboard Shortcuts:
  Ctrl+D           Exit Switchboard
---------------------------------------------"#
        .to_string()
}
