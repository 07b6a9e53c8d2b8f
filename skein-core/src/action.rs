//! The Action Model: typed action records and the transition-label enum.
//!
//! Plain data only — `ActionKind` and `Action` carry no behavior beyond
//! structural equality and serialization. Every other component reads and
//! writes these types; none of them own interpretation of the fields.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The closed set of action/transition labels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActionKind {
    #[serde(rename = "USER_INPUT")]
    UserInput,
    #[serde(rename = "PROCESS_USER_INPUT")]
    ProcessUserInput,
    #[serde(rename = "AGENT_PLANNING")]
    AgentPlanning,
    #[serde(rename = "AGENT_TOOL_SEARCH")]
    AgentToolSearch,
    #[serde(rename = "PROCESS_AGENT_TOOL_SEARCH_RESULT")]
    ProcessAgentToolSearchResult,
    #[serde(rename = "AGENT_TOOL_EXECUTION")]
    AgentToolExecution,
    #[serde(rename = "PROCESS_AGENT_TOOL_EXECUTION_RESULT")]
    ProcessAgentToolExecutionResult,
    #[serde(rename = "AGENT_RESPONSE")]
    AgentResponse,
    #[serde(rename = "AWAIT_USER_INPUT")]
    AwaitUserInput,
    #[serde(rename = "STEP_SUMMARY")]
    StepSummary,
    #[serde(rename = "UPDATE_TODO_LIST")]
    UpdateTodoList,
    #[serde(rename = "UPDATE_CONVERSATION_STATE")]
    UpdateConversationState,
    #[serde(rename = "UPDATE_CONVERSATION_COMPRESSION")]
    UpdateConversationCompression,
    #[serde(rename = "UPDATE_BRANCH_BACKTRACK_SUMMARY")]
    UpdateBranchBacktrackSummary,
    #[serde(rename = "DEFAULT")]
    Default,
}

impl ActionKind {
    /// The exact upper-snake-case text used in model JSON, prompt file names
    /// (lower-cased), and the context rendering format.
    pub fn as_upper_snake(&self) -> &'static str {
        match self {
            ActionKind::UserInput => "USER_INPUT",
            ActionKind::ProcessUserInput => "PROCESS_USER_INPUT",
            ActionKind::AgentPlanning => "AGENT_PLANNING",
            ActionKind::AgentToolSearch => "AGENT_TOOL_SEARCH",
            ActionKind::ProcessAgentToolSearchResult => "PROCESS_AGENT_TOOL_SEARCH_RESULT",
            ActionKind::AgentToolExecution => "AGENT_TOOL_EXECUTION",
            ActionKind::ProcessAgentToolExecutionResult => "PROCESS_AGENT_TOOL_EXECUTION_RESULT",
            ActionKind::AgentResponse => "AGENT_RESPONSE",
            ActionKind::AwaitUserInput => "AWAIT_USER_INPUT",
            ActionKind::StepSummary => "STEP_SUMMARY",
            ActionKind::UpdateTodoList => "UPDATE_TODO_LIST",
            ActionKind::UpdateConversationState => "UPDATE_CONVERSATION_STATE",
            ActionKind::UpdateConversationCompression => "UPDATE_CONVERSATION_COMPRESSION",
            ActionKind::UpdateBranchBacktrackSummary => "UPDATE_BRANCH_BACKTRACK_SUMMARY",
            ActionKind::Default => "DEFAULT",
        }
    }

    /// Parses the upper-snake-case text a model response or prompt file name
    /// uses. Returns `None` for anything not in the closed set (callers turn
    /// that into `UnknownActionKind`).
    pub fn parse_upper_snake(s: &str) -> Option<Self> {
        Some(match s {
            "USER_INPUT" => ActionKind::UserInput,
            "PROCESS_USER_INPUT" => ActionKind::ProcessUserInput,
            "AGENT_PLANNING" => ActionKind::AgentPlanning,
            "AGENT_TOOL_SEARCH" => ActionKind::AgentToolSearch,
            "PROCESS_AGENT_TOOL_SEARCH_RESULT" => ActionKind::ProcessAgentToolSearchResult,
            "AGENT_TOOL_EXECUTION" => ActionKind::AgentToolExecution,
            "PROCESS_AGENT_TOOL_EXECUTION_RESULT" => ActionKind::ProcessAgentToolExecutionResult,
            "AGENT_RESPONSE" => ActionKind::AgentResponse,
            "AWAIT_USER_INPUT" => ActionKind::AwaitUserInput,
            "STEP_SUMMARY" => ActionKind::StepSummary,
            "UPDATE_TODO_LIST" => ActionKind::UpdateTodoList,
            "UPDATE_CONVERSATION_STATE" => ActionKind::UpdateConversationState,
            "UPDATE_CONVERSATION_COMPRESSION" => ActionKind::UpdateConversationCompression,
            "UPDATE_BRANCH_BACKTRACK_SUMMARY" => ActionKind::UpdateBranchBacktrackSummary,
            "DEFAULT" => ActionKind::Default,
            _ => return None,
        })
    }

    /// True for the four `UPDATE_*` memory-generation kinds the Memory Agent emits.
    pub fn is_update_kind(&self) -> bool {
        matches!(
            self,
            ActionKind::UpdateTodoList
                | ActionKind::UpdateConversationState
                | ActionKind::UpdateConversationCompression
                | ActionKind::UpdateBranchBacktrackSummary
        )
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_upper_snake())
    }
}

/// A mapping type used for `tool_args`, `metadata`, and `action_parameters`.
/// `BTreeMap` keeps serialized output key-ordered, which matters for the
/// byte-stable context rendering format (§6).
pub type Params = BTreeMap<String, Value>;

/// An immutable-by-convention recorded event.
///
/// Invariants (enforced by `DagMemory::add_action`, never by `Action` itself):
/// when `kind == AGENT_TOOL_SEARCH`, `tool_search_query` is set and
/// `tool_result == Some(content)`; when `kind == AGENT_TOOL_EXECUTION`,
/// `tool_name`/`tool_args` are set and `tool_result == Some(content)`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Action {
    /// Monotonically assigned sequence id: the string of the insertion count
    /// at the time this action was appended ("0", "1", "2", ...).
    pub id: String,
    pub kind: ActionKind,
    pub timestamp: DateTime<Utc>,
    /// The model output or tool result.
    pub content: String,
    pub tool_name: Option<String>,
    pub tool_args: Option<Params>,
    pub tool_result: Option<String>,
    pub metadata: Params,
    /// Parameter mapping echoed from the model's proposal for the *next*
    /// action; not interpreted by the Action Model itself.
    pub action_parameters: Option<Params>,
    pub tool_search_query: Option<String>,
}

impl Action {
    /// Builds a new Action with empty optional fields, `id` and `timestamp`
    /// supplied by the caller (normally `DagMemory::add_action`).
    pub fn new(id: String, kind: ActionKind, timestamp: DateTime<Utc>, content: String) -> Self {
        Action {
            id,
            kind,
            timestamp,
            content,
            tool_name: None,
            tool_args: None,
            tool_result: None,
            metadata: Params::new(),
            action_parameters: None,
            tool_search_query: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upper_snake_round_trips_for_every_kind() {
        let kinds = [
            ActionKind::UserInput,
            ActionKind::ProcessUserInput,
            ActionKind::AgentPlanning,
            ActionKind::AgentToolSearch,
            ActionKind::ProcessAgentToolSearchResult,
            ActionKind::AgentToolExecution,
            ActionKind::ProcessAgentToolExecutionResult,
            ActionKind::AgentResponse,
            ActionKind::AwaitUserInput,
            ActionKind::StepSummary,
            ActionKind::UpdateTodoList,
            ActionKind::UpdateConversationState,
            ActionKind::UpdateConversationCompression,
            ActionKind::UpdateBranchBacktrackSummary,
            ActionKind::Default,
        ];
        for k in kinds {
            let s = k.as_upper_snake();
            assert_eq!(ActionKind::parse_upper_snake(s), Some(k));
            assert_eq!(k.to_string(), s);
        }
    }

    #[test]
    fn parse_upper_snake_rejects_unknown() {
        assert_eq!(ActionKind::parse_upper_snake("NOT_A_KIND"), None);
    }

    #[test]
    fn serde_json_uses_upper_snake_strings() {
        let v = serde_json::to_value(ActionKind::AgentToolSearch).unwrap();
        assert_eq!(v, serde_json::json!("AGENT_TOOL_SEARCH"));
        let k: ActionKind = serde_json::from_value(serde_json::json!("AGENT_RESPONSE")).unwrap();
        assert_eq!(k, ActionKind::AgentResponse);
    }

    #[test]
    fn update_kinds_are_flagged() {
        assert!(ActionKind::UpdateTodoList.is_update_kind());
        assert!(!ActionKind::AgentResponse.is_update_kind());
    }
}
