//! The Memory Agent (spec §4.H): a concurrent worker that refreshes derived
//! per-node memories at independent cadences while the Core Agent's step
//! loop keeps running.
//!
//! Design-note improvement (SPEC_FULL §4.H, adopted): the original
//! fire-and-forget `asyncio.create_task` per tick is replaced by a
//! `DashMap`-backed single-flight guard keyed by `(node_id, field)`, so a
//! slow generation never stacks a second in-flight update for the same
//! node/field — a skipped tick is logged at debug level, not silently
//! dropped.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashSet;
use tracing::{debug, warn};

use crate::action::ActionKind;
use crate::dag::{DagMemory, MemoryField};
use crate::error::MemoryAgentError;
use crate::llm::ModelProvider;
use crate::parser::parse_response;
use crate::prompts::PromptStore;
use crate::settings::AgentSettings;

/// Background generator of derived memories. Cheap to clone; every field is
/// a shared handle (spec §5).
#[derive(Clone)]
pub struct MemoryAgent {
    dag: DagMemory,
    model: Arc<dyn ModelProvider>,
    prompts: PromptStore,
    settings: AgentSettings,
    /// Single-flight guard: a `(node_id, field)` pair present here has a
    /// generation currently in flight.
    in_flight: Arc<DashSet<(String, MemoryField)>>,
}

impl MemoryAgent {
    pub fn new(
        dag: DagMemory,
        model: Arc<dyn ModelProvider>,
        prompts: PromptStore,
        settings: AgentSettings,
    ) -> Self {
        MemoryAgent {
            dag,
            model,
            prompts,
            settings,
            in_flight: Arc::new(DashSet::new()),
        }
    }

    /// Runs the tick loop until `is_running` is flipped to `false` (spec
    /// §4.H lifetime: tied to the Core Agent's shutdown flag).
    pub async fn run(&self, is_running: Arc<AtomicBool>) {
        let mut tick: u64 = 0;
        let mut interval = tokio::time::interval(self.settings.memory_tick_period);
        // The first tick fires immediately; skip it so tick counting starts at 1.
        interval.tick().await;
        while is_running.load(Ordering::SeqCst) {
            interval.tick().await;
            tick += 1;
            self.run_tick(tick).await;
        }
    }

    /// One tick: reads HEAD/step-count, and launches (single-flighted) the
    /// generators whose interval divides the current step count. Uses the
    /// raw step count (no flooring to 1): at `step_count == 0`, before any
    /// `STEP_SUMMARY` node exists, `0 % interval == 0` for every interval, so
    /// every generator fires on the very first tick — matching the original
    /// `agent.py`'s raw-modulo tick logic exactly, divisor is always the
    /// (non-zero) configured interval, never the step count, so there's no
    /// division by zero to guard against.
    async fn run_tick(&self, tick: u64) {
        let node_id = match self.dag.current_node_id() {
            Some(id) => id,
            None => return,
        };
        let step_count = self.dag.get_step_count() as u64;
        debug!(tick, node_id, step_count, "memory agent tick");

        if step_count % self.settings.todo_list_update_interval == 0 {
            self.spawn_update(node_id.clone(), MemoryField::Todo);
        }
        if step_count % self.settings.conversation_state_update_interval == 0 {
            self.spawn_update(node_id.clone(), MemoryField::ConversationState);
        }
        if step_count % self.settings.conversation_compression_update_interval == 0 {
            self.spawn_update(node_id, MemoryField::ConversationCompression);
        }
    }

    /// Single-flights a generation for `(node_id, field)`: if one is already
    /// in flight, the tick is skipped and logged at debug, not queued.
    fn spawn_update(&self, node_id: String, field: MemoryField) {
        let key = (node_id.clone(), field);
        if !self.in_flight.insert(key.clone()) {
            debug!(node_id, ?field, "skipping tick: update already in flight");
            return;
        }

        let agent = self.clone();
        tokio::spawn(async move {
            if let Err(err) = agent.generate_and_apply(&node_id, field).await {
                warn!(node_id, ?field, error = %err, "memory generation failed");
            }
            agent.in_flight.remove(&key);
        });
    }

    /// Calls the model with the field's prompt, parses the response, and
    /// writes it to the DAG. Conversation-state generation additionally
    /// requires the response to deserialize as a JSON mapping, retrying up
    /// to 3 times before raising `MemoryFormatError` (spec §4.H). Failures
    /// here are always caught by the caller and logged, never propagated to
    /// the core loop.
    async fn generate_and_apply(&self, node_id: &str, field: MemoryField) -> Result<(), MemoryAgentError> {
        let kind = match field {
            MemoryField::Todo => ActionKind::UpdateTodoList,
            MemoryField::ConversationState => ActionKind::UpdateConversationState,
            MemoryField::ConversationCompression => ActionKind::UpdateConversationCompression,
            MemoryField::BranchBacktrackSummary => ActionKind::UpdateBranchBacktrackSummary,
        };
        let system_prompt = self.prompts.prompt_with_preamble(kind).ok();
        let context = self
            .dag
            .get_context_between_nodes(node_id, &self.dag.root_node_id().unwrap_or_else(|| node_id.to_string()))
            .unwrap_or_default();

        if field == MemoryField::ConversationState {
            for attempt in 0..=self.settings.action_max_retries {
                let raw = self.model.generate(&context, system_prompt.as_deref()).await?;
                let parsed = parse_response(&raw, kind)?;
                match serde_json::from_str::<serde_json::Value>(&parsed.response) {
                    Ok(serde_json::Value::Object(_)) => {
                        self.dag.set_conversation_state(node_id, parsed.response)?;
                        return Ok(());
                    }
                    _ => {
                        debug!(attempt, "conversation state response was not a JSON mapping, retrying");
                    }
                }
            }
            return Err(MemoryAgentError::MemoryFormatError {
                retries: self.settings.action_max_retries,
            });
        }

        let raw = self.model.generate(&context, system_prompt.as_deref()).await?;
        let parsed = parse_response(&raw, kind)?;
        match field {
            MemoryField::Todo => self.dag.set_todo_list(node_id, parsed.response)?,
            MemoryField::ConversationCompression => {
                self.dag.set_conversation_compression(node_id, parsed.response)?
            }
            MemoryField::BranchBacktrackSummary => {
                self.dag.set_branch_backtrack_summary(node_id, parsed.response)?
            }
            MemoryField::ConversationState => unreachable!("handled above"),
        }
        Ok(())
    }
}
