//! Built-in agent roster
//!
//! A planner that triages requests and five specialists that hand back to
//! it when a request falls outside their area.

use crate::agent::definition::Agent;
use crate::agent::registry::AgentRegistry;

pub const PLANNER_AGENT: &str = "planner_agent";
pub const MONEY_AGENT: &str = "money_agent";
pub const PRODUCT_ANALYTICS_AGENT: &str = "product_analytics_agent";
pub const EXTERNAL_SEARCH_AGENT: &str = "external_search_agent";
pub const INTERNAL_SEARCH_AGENT: &str = "internal_search_agent";
pub const COMMUNICATION_AGENT: &str = "communication_agent";

const PLANNER_INSTRUCTIONS: &str = "You are to triage a user's request, and call a tool to transfer to the right intent.
Once you are ready to transfer to the right intent, call the tool to transfer to the right intent.
You don't need to know specifics, just the topic of the request.
When you need more information to triage the request to an agent, ask a direct question without explaining why you're asking it.
Do not share your thought process with the user! Do not make unreasonable assumptions on behalf of the user.";

const MONEY_INSTRUCTIONS: &str = "You are a banking and accounting agent.
You are to help the user with their banking and accounting needs. This includes checking balances, looking up recent transactions, and monitoring accounts.
You should be extremely concise in your responses, ideally giving 1-3 main points that the CEO should know.";

const PRODUCT_ANALYTICS_INSTRUCTIONS: &str = "You are a product analytics agent.
You are to help the user with their product analytics needs. This includes looking up product analytics data, event tracking, retention, and other product analytics metrics.";

const EXTERNAL_SEARCH_INSTRUCTIONS: &str = "You are an external search agent.
You are to help the user with their external search needs. This includes looking up information on the web.";

const INTERNAL_SEARCH_INSTRUCTIONS: &str = "You are an internal search agent.
You are to help the user with their internal search needs. This includes looking up internal documents, files, notes such as Google Drive, Notion, Slack, etc.";

const COMMUNICATION_INSTRUCTIONS: &str = "You are a communication agent.
You are to help the user with their communication needs. This includes sending emails, Slack messages, and other communication needs.
If the request is not related to communication, transfer to the planner agent.";

/// Specialists as `(name, instructions, planner's transfer description, topic)`
const SPECIALISTS: [(&str, &str, &str, &str); 5] = [
    (
        MONEY_AGENT,
        MONEY_INSTRUCTIONS,
        "Transfer to the banking and accounting agent",
        "money",
    ),
    (
        PRODUCT_ANALYTICS_AGENT,
        PRODUCT_ANALYTICS_INSTRUCTIONS,
        "Transfer to the product analytics agent",
        "product analytics",
    ),
    (
        EXTERNAL_SEARCH_AGENT,
        EXTERNAL_SEARCH_INSTRUCTIONS,
        "Transfer to the external search agent for web, YouTube or external tool search",
        "external search",
    ),
    (
        INTERNAL_SEARCH_AGENT,
        INTERNAL_SEARCH_INSTRUCTIONS,
        "Transfer to the internal search agent for internal documents, files, notes such as Google Drive, Notion, Slack, etc.",
        "internal search",
    ),
    (
        COMMUNICATION_AGENT,
        COMMUNICATION_INSTRUCTIONS,
        "Transfer to the communication agent for Slack, email, calendar, and other communication needs",
        "communication",
    ),
];

/// Render context variables as a trailing prompt section
fn with_context(base: &str, context: &crate::core::ContextVariables) -> String {
    if context.is_empty() {
        return base.to_string();
    }

    let mut prompt = format!("{}\n\nKnown context:", base);
    for (key, value) in context {
        match value.as_str() {
            Some(text) => prompt.push_str(&format!("\n- {}: {}", key, text)),
            None => prompt.push_str(&format!("\n- {}: {}", key, value)),
        }
    }
    prompt
}

/// Registry holding the planner and every specialist, all on `model`
pub fn default_registry(model: &str) -> AgentRegistry {
    let registry = AgentRegistry::new();

    let mut planner = Agent::builder(PLANNER_AGENT)
        .model(model)
        .instructions_fn(|ctx, _| with_context(PLANNER_INSTRUCTIONS, ctx));
    for (name, _, transfer, _) in SPECIALISTS {
        planner = planner.handoff(name, transfer);
    }
    registry.register(planner.build());

    for (name, instructions, _, topic) in SPECIALISTS {
        registry.register(
            Agent::builder(name)
                .model(model)
                .instructions_fn(move |ctx, _| with_context(instructions, ctx))
                .handoff(
                    PLANNER_AGENT,
                    format!(
                        "Transfer to the planner agent because this request is not related to {}",
                        topic
                    ),
                )
                .build(),
        );
    }

    registry
}
