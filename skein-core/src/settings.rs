//! Centralized tunables (spec §9.3): the constants scattered through the
//! Core Agent and Memory Agent sections of the spec, gathered into one
//! struct and made environment-overridable, matching this codebase's habit
//! of lifting magic numbers to the config layer rather than hardcoding them
//! deep in business logic.

use std::time::Duration;

use tracing::warn;

/// Tunables for the Core Agent's step loop and the Memory Agent's tick loop.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AgentSettings {
    /// Hard action budget per user-turn step (spec §4.G).
    pub max_actions: usize,
    /// Retries allowed on an illegal or unparsable model transition (spec §4.G).
    pub action_max_retries: u32,
    /// Run the todo-list generator every Nth Memory Agent tick.
    pub todo_list_update_interval: u64,
    /// Run the conversation-state generator every Nth Memory Agent tick.
    pub conversation_state_update_interval: u64,
    /// Run the conversation-compression generator every Nth Memory Agent tick.
    pub conversation_compression_update_interval: u64,
    /// Memory Agent tick period (spec §4.H).
    pub memory_tick_period: Duration,
    /// Tool Gateway Client per-call timeout for `search_tools` (spec §5).
    pub gateway_search_timeout: Duration,
    /// Tool Gateway Client per-call timeout for `execute_tool` (spec §5).
    pub gateway_execute_timeout: Duration,
}

impl Default for AgentSettings {
    fn default() -> Self {
        AgentSettings {
            max_actions: 10,
            action_max_retries: 3,
            todo_list_update_interval: 1,
            conversation_state_update_interval: 1,
            conversation_compression_update_interval: 5,
            memory_tick_period: Duration::from_secs(5),
            gateway_search_timeout: Duration::from_secs(30),
            gateway_execute_timeout: Duration::from_secs(60),
        }
    }
}

impl AgentSettings {
    /// Starts from [`Default`] and overrides any field with a matching,
    /// parseable environment variable. A present-but-unparseable value is
    /// logged and ignored rather than failing startup.
    pub fn from_env() -> Self {
        let mut settings = AgentSettings::default();
        settings.max_actions = env_usize("MAX_ACTIONS", settings.max_actions);
        settings.action_max_retries = env_u32("ACTION_MAX_RETRIES", settings.action_max_retries);
        settings.todo_list_update_interval =
            env_u64("TODO_LIST_UPDATE_INTERVAL", settings.todo_list_update_interval);
        settings.conversation_state_update_interval = env_u64(
            "CONVERSATION_STATE_UPDATE_INTERVAL",
            settings.conversation_state_update_interval,
        );
        settings.conversation_compression_update_interval = env_u64(
            "CONVERSATION_COMPRESSION_UPDATE_INTERVAL",
            settings.conversation_compression_update_interval,
        );
        settings.memory_tick_period =
            env_secs("MEMORY_TICK_SECONDS", settings.memory_tick_period);
        settings.gateway_search_timeout =
            env_secs("GATEWAY_SEARCH_TIMEOUT_SECONDS", settings.gateway_search_timeout);
        settings.gateway_execute_timeout =
            env_secs("GATEWAY_EXECUTE_TIMEOUT_SECONDS", settings.gateway_execute_timeout);
        settings
    }
}

fn env_usize(key: &str, default: usize) -> usize {
    parse_env(key, default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    parse_env(key, default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    parse_env(key, default)
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            warn!(key, raw, "ignoring unparseable setting override");
            default
        }),
        Err(_) => default,
    }
}

fn env_secs(key: &str, default: Duration) -> Duration {
    match std::env::var(key) {
        Ok(raw) => match raw.parse::<u64>() {
            Ok(secs) => Duration::from_secs(secs),
            Err(_) => {
                warn!(key, raw, "ignoring unparseable setting override");
                default
            }
        },
        Err(_) => default,
    }
}
