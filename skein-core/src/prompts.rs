//! The Prompt Store (spec §4.B): maps an `ActionKind` to its prompt text.
//!
//! Default text is embedded at compile time from `skein-core/prompts/*.txt`
//! (canonical source), one file per action kind plus a `bash_execute_tool_description.txt`
//! preamble — the same embed-with-directory-override shape `loom::prompts::load`
//! uses for its YAML prompt files. An optional `PROMPTS_DIR` environment
//! variable points at a directory of same-named files that override any
//! subset of the embedded defaults; a file missing from that directory falls
//! back to the embedded text rather than erroring.

use std::path::{Path, PathBuf};

use crate::action::ActionKind;
use crate::error::PromptError;

macro_rules! embed_prompt {
    ($name:literal) => {
        include_str!(concat!("../prompts/", $name))
    };
}

const PREAMBLE: &str = embed_prompt!("bash_execute_tool_description.txt");
const PROCESS_USER_INPUT: &str = embed_prompt!("process_user_input.txt");
const AGENT_PLANNING: &str = embed_prompt!("agent_planning.txt");
const PROCESS_TOOL_SEARCH_RESULT: &str = embed_prompt!("process_tool_search_result.txt");
const PROCESS_TOOL_EXECUTION_RESULT: &str = embed_prompt!("process_tool_execution_result.txt");
const AGENT_RESPONSE: &str = embed_prompt!("agent_response.txt");
const STEP_SUMMARY: &str = embed_prompt!("step_summary.txt");
const UPDATE_TODO_LIST: &str = embed_prompt!("update_todo_list.txt");
const UPDATE_CONVERSATION_STATE: &str = embed_prompt!("update_conversation_state.txt");
const UPDATE_CONVERSATION_COMPRESSION: &str = embed_prompt!("update_conversation_compression.txt");
const UPDATE_BRANCH_BACKTRACK_SUMMARY: &str = embed_prompt!("update_branch_backtrack_summary.txt");

/// File name (under `PROMPTS_DIR`, and the embedded default's source name)
/// for a given kind, or `None` for kinds with no prompt (e.g. `USER_INPUT`,
/// the two deterministic tool-dispatch kinds, `AWAIT_USER_INPUT`, `DEFAULT`).
fn file_name_for(kind: ActionKind) -> Option<&'static str> {
    Some(match kind {
        ActionKind::ProcessUserInput => "process_user_input.txt",
        ActionKind::AgentPlanning => "agent_planning.txt",
        ActionKind::ProcessAgentToolSearchResult => "process_tool_search_result.txt",
        ActionKind::ProcessAgentToolExecutionResult => "process_tool_execution_result.txt",
        ActionKind::AgentResponse => "agent_response.txt",
        ActionKind::StepSummary => "step_summary.txt",
        ActionKind::UpdateTodoList => "update_todo_list.txt",
        ActionKind::UpdateConversationState => "update_conversation_state.txt",
        ActionKind::UpdateConversationCompression => "update_conversation_compression.txt",
        ActionKind::UpdateBranchBacktrackSummary => "update_branch_backtrack_summary.txt",
        _ => return None,
    })
}

fn embedded_for(kind: ActionKind) -> Option<&'static str> {
    Some(match kind {
        ActionKind::ProcessUserInput => PROCESS_USER_INPUT,
        ActionKind::AgentPlanning => AGENT_PLANNING,
        ActionKind::ProcessAgentToolSearchResult => PROCESS_TOOL_SEARCH_RESULT,
        ActionKind::ProcessAgentToolExecutionResult => PROCESS_TOOL_EXECUTION_RESULT,
        ActionKind::AgentResponse => AGENT_RESPONSE,
        ActionKind::StepSummary => STEP_SUMMARY,
        ActionKind::UpdateTodoList => UPDATE_TODO_LIST,
        ActionKind::UpdateConversationState => UPDATE_CONVERSATION_STATE,
        ActionKind::UpdateConversationCompression => UPDATE_CONVERSATION_COMPRESSION,
        ActionKind::UpdateBranchBacktrackSummary => UPDATE_BRANCH_BACKTRACK_SUMMARY,
        _ => return None,
    })
}

/// Stateless, side-effect-free (aside from reading `PROMPTS_DIR` on first use)
/// mapping from action kind to prompt text (spec §4.B).
#[derive(Clone, Debug, Default)]
pub struct PromptStore {
    override_dir: Option<PathBuf>,
}

impl PromptStore {
    /// Uses `PROMPTS_DIR` from the environment, if set, as the override directory.
    pub fn new() -> Self {
        PromptStore {
            override_dir: std::env::var("PROMPTS_DIR").ok().map(PathBuf::from),
        }
    }

    pub fn with_override_dir(dir: impl Into<PathBuf>) -> Self {
        PromptStore {
            override_dir: Some(dir.into()),
        }
    }

    /// The preamble concatenated in front of every prompt the Core Agent uses.
    pub fn tool_description_preamble(&self) -> String {
        self.read_override("bash_execute_tool_description.txt")
            .unwrap_or_else(|| PREAMBLE.to_string())
    }

    fn read_override(&self, file_name: &str) -> Option<String> {
        let dir = self.override_dir.as_ref()?;
        std::fs::read_to_string(Path::join(dir, file_name)).ok()
    }

    /// Returns the prompt text for `kind`. Errors `NoPromptForKind` only for
    /// a kind that was never given a default — a programmer error, not a
    /// runtime condition (spec §4.B).
    pub fn prompt_for(&self, kind: ActionKind) -> Result<String, PromptError> {
        let file_name = file_name_for(kind).ok_or(PromptError::NoPromptForKind(kind))?;
        if let Some(text) = self.read_override(file_name) {
            return Ok(text);
        }
        Ok(embedded_for(kind)
            .expect("file_name_for and embedded_for must agree on which kinds have prompts")
            .to_string())
    }

    /// `prompt_for(kind)` with the tool-description preamble concatenated in
    /// front, as the Core Agent always uses it (spec §4.B).
    pub fn prompt_with_preamble(&self, kind: ActionKind) -> Result<String, PromptError> {
        let body = self.prompt_for(kind)?;
        Ok(format!("{}\n\n{}", self.tool_description_preamble(), body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_kind_returns_embedded_default() {
        let store = PromptStore::default();
        let text = store.prompt_for(ActionKind::AgentResponse).unwrap();
        assert!(text.contains("response"));
    }

    #[test]
    fn unknown_kind_errors() {
        let store = PromptStore::default();
        let err = store.prompt_for(ActionKind::UserInput).unwrap_err();
        assert!(matches!(err, PromptError::NoPromptForKind(ActionKind::UserInput)));
    }

    #[test]
    fn override_dir_wins_for_present_file_and_falls_back_for_missing() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(
            tmp.path().join("agent_response.txt"),
            "Overridden response prompt.",
        )
        .unwrap();
        let store = PromptStore::with_override_dir(tmp.path());
        assert_eq!(
            store.prompt_for(ActionKind::AgentResponse).unwrap(),
            "Overridden response prompt."
        );
        // step_summary.txt was not written to the override dir: falls back to embedded.
        assert_eq!(
            store.prompt_for(ActionKind::StepSummary).unwrap(),
            STEP_SUMMARY
        );
    }

    #[test]
    fn preamble_is_concatenated_in_front() {
        let store = PromptStore::default();
        let combined = store.prompt_with_preamble(ActionKind::AgentPlanning).unwrap();
        assert!(combined.starts_with(&store.tool_description_preamble()));
    }
}
