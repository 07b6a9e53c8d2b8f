//! Error taxonomy (§7). Each concern gets its own small `thiserror` enum
//! rather than one catch-all type, matching this codebase's established
//! per-module error style.

use thiserror::Error;

use crate::action::ActionKind;

/// Errors from [`crate::parser::parse_response`].
///
/// Locally caught by the Core Agent: it counts toward the retry budget
/// rather than aborting the step.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParserError {
    #[error("invalid JSON in model response: {0}")]
    InvalidJson(String),
    #[error("missing required field: {0}")]
    MissingField(&'static str),
    #[error("unknown action kind: {0}")]
    UnknownActionKind(String),
}

/// Errors from [`crate::prompts::PromptStore`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PromptError {
    #[error("no prompt defined for action kind: {0}")]
    NoPromptForKind(ActionKind),
}

/// Errors from [`crate::gateway::GatewayClient`].
#[derive(Error, Debug, Clone)]
pub enum GatewayError {
    #[error("gateway unavailable: {0}")]
    Unavailable(String),
    #[error("gateway rejected request: {body}")]
    Rejected { body: String },
}

/// Errors from a [`crate::llm::ModelProvider`].
#[derive(Error, Debug, Clone)]
pub enum ModelError {
    #[error("model unavailable: {0}")]
    Unavailable(String),
    #[error("model rejected API key")]
    InvalidKey,
}

/// Errors from [`crate::dag::DagMemory`] operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DagError {
    #[error("node has no memory (it is a step-boundary node): {0}")]
    NoMemoryOnStepNode(String),
    #[error("node not found: {0}")]
    NodeNotFound(String),
    #[error("backtrack requires non-empty notes")]
    EmptyBacktrackNotes,
    #[error("no path from {from} to {to}: unreachable")]
    Unreachable { from: String, to: String },
    #[error("cycle detected while walking from {0}")]
    CycleDetected(String),
}

/// Errors from the Core Agent's action handlers (§4.G).
#[derive(Error, Debug, Clone)]
pub enum CoreAgentError {
    #[error("model proposed transition outside the allowed set after {retries} retries: {kind}")]
    PolicyViolation { kind: ActionKind, retries: u32 },
    #[error("tool call missing required parameters for {kind}: {missing}")]
    InvalidAction { kind: ActionKind, missing: &'static str },
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error(transparent)]
    Dag(#[from] DagError),
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error(transparent)]
    Prompt(#[from] PromptError),
}

/// Errors confined to the Memory Agent (§4.H): logged, never fatal to the core loop.
#[derive(Error, Debug, Clone)]
pub enum MemoryAgentError {
    #[error(transparent)]
    Dag(#[from] DagError),
    #[error(transparent)]
    Parser(#[from] ParserError),
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error("conversation-state generation did not produce a JSON mapping after {retries} retries")]
    MemoryFormatError { retries: u32 },
}
