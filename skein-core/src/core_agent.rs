//! The Core Agent — the Action State Machine (spec §4.G).
//!
//! Drives one bounded step loop per user utterance: render context, run the
//! handler for the current action kind (a model call for most kinds, a
//! deterministic gateway call for the two tool-dispatch kinds), validate the
//! proposed transition, append the result, repeat up to `MAX_ACTIONS`, then
//! close the step with a STEP_SUMMARY node.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::Value;
use tracing::info;

use crate::action::{ActionKind, Params};
use crate::dag::{ActionDraft, DagMemory};
use crate::error::CoreAgentError;
use crate::gateway::GatewayClient;
use crate::llm::ModelProvider;
use crate::parser::parse_response;
use crate::prompts::PromptStore;
use crate::settings::AgentSettings;

/// The allowed next kinds for a model-driven state, per the transition table
/// (spec §4.G). `None` marks a state with no table row: either terminal
/// (`AWAIT_USER_INPUT`) or deterministic/not model-driven.
fn allowed_next(kind: ActionKind) -> Option<&'static [ActionKind]> {
    use ActionKind::*;
    Some(match kind {
        ProcessUserInput => &[AgentPlanning, AgentToolSearch, AgentToolExecution, AgentResponse],
        AgentPlanning => &[AgentToolSearch, AgentResponse],
        ProcessAgentToolSearchResult => &[AgentPlanning, AgentToolExecution, AgentResponse],
        ProcessAgentToolExecutionResult => &[AgentPlanning, AgentResponse, AgentToolExecution],
        AgentResponse => &[ProcessUserInput, AwaitUserInput],
        AwaitUserInput => &[],
        _ => return None,
    })
}

/// The result of running the handler for one loop iteration: the text to
/// record, the kind the model (or the deterministic dispatch) proposes next,
/// any parameters it proposed for that next action, and the tool-call
/// metadata (if any) to attach to the appended Action.
struct StepOutcome {
    text: String,
    next_kind: ActionKind,
    next_params: Option<Params>,
    tool_name: Option<String>,
    tool_args: Option<Params>,
    tool_search_query: Option<String>,
}

impl StepOutcome {
    fn model(text: String, next_kind: ActionKind, next_params: Option<Params>) -> Self {
        StepOutcome {
            text,
            next_kind,
            next_params,
            tool_name: None,
            tool_args: None,
            tool_search_query: None,
        }
    }
}

/// Drives the bounded action loop over a shared [`DagMemory`], a pluggable
/// [`ModelProvider`], and a [`GatewayClient`]. Cheap to clone: every field is
/// itself a shared handle, so the Memory Agent and Core Agent can run over
/// the same DAG concurrently (spec §5).
#[derive(Clone)]
pub struct CoreAgent {
    dag: DagMemory,
    model: Arc<dyn ModelProvider>,
    gateway: Arc<GatewayClient>,
    prompts: PromptStore,
    settings: AgentSettings,
    is_running: Arc<AtomicBool>,
}

impl CoreAgent {
    pub fn new(
        dag: DagMemory,
        model: Arc<dyn ModelProvider>,
        gateway: Arc<GatewayClient>,
        prompts: PromptStore,
        settings: AgentSettings,
    ) -> Self {
        CoreAgent {
            dag,
            model,
            gateway,
            prompts,
            settings,
            is_running: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn dag(&self) -> &DagMemory {
        &self.dag
    }

    /// Shared flag the Memory Agent polls to know when to stop (spec §4.H).
    pub fn is_running_flag(&self) -> Arc<AtomicBool> {
        self.is_running.clone()
    }

    /// Flips the shared running flag to false. Idempotent.
    pub fn shutdown(&self) {
        self.is_running.store(false, Ordering::SeqCst);
    }

    /// Runs one full step for `user_input`: appends `USER_INPUT`, loops the
    /// action state machine up to `MAX_ACTIONS`, and closes with a
    /// `STEP_SUMMARY` node regardless of whether the loop reached
    /// `AWAIT_USER_INPUT` or exhausted its budget (spec §4.G step 4,
    /// scenario 5).
    /// Returns the text of the last `AGENT_RESPONSE` action appended during
    /// the step, if any (there is none if the loop exhausted its budget
    /// without ever reaching one) — convenient for a console shell that just
    /// wants to print the agent's reply.
    pub async fn run_step(&self, user_input: &str) -> Result<Option<String>, CoreAgentError> {
        self.dag.add_action(user_input, ActionKind::UserInput, ActionDraft::default(), None);

        let mut current_kind = ActionKind::ProcessUserInput;
        let mut params: Option<Params> = None;
        let mut action_count = 0usize;
        let mut last_response: Option<String> = None;

        while action_count < self.settings.max_actions {
            let context = self.dag.get_current_context();
            let outcome = self.run_action(user_input, &context, current_kind, params.clone()).await?;

            let mut draft = ActionDraft {
                tool_name: outcome.tool_name.clone(),
                tool_args: outcome.tool_args.clone(),
                tool_search_query: outcome.tool_search_query.clone(),
                ..Default::default()
            };
            if let Some(p) = &outcome.next_params {
                draft.action_parameters = Some(p.clone());
            }
            if current_kind == ActionKind::AgentResponse {
                last_response = Some(outcome.text.clone());
            }
            // The edge is labeled with the kind that just produced the
            // result, not the kind being transitioned to (resolved Open
            // Question (a) — see DESIGN.md for the worked trace).
            self.dag.add_action(outcome.text, current_kind, draft, None);

            info!(kind = %current_kind, next_kind = %outcome.next_kind, action_count, "action transition");

            current_kind = outcome.next_kind;
            params = outcome.next_params;
            action_count += 1;

            if current_kind == ActionKind::AwaitUserInput {
                break;
            }
        }

        self.append_step_summary().await;
        Ok(last_response)
    }

    /// Dispatches the handler for `kind`: a model call with retry/validation
    /// discipline for the five model-driven kinds, or a deterministic
    /// gateway call for the two tool-dispatch kinds.
    async fn run_action(
        &self,
        user_input: &str,
        context: &str,
        kind: ActionKind,
        params: Option<Params>,
    ) -> Result<StepOutcome, CoreAgentError> {
        match kind {
            ActionKind::ProcessUserInput
            | ActionKind::AgentPlanning
            | ActionKind::ProcessAgentToolSearchResult
            | ActionKind::ProcessAgentToolExecutionResult
            | ActionKind::AgentResponse => self.run_model_handler(user_input, context, kind).await,
            ActionKind::AgentToolSearch => self.run_tool_search(params).await,
            ActionKind::AgentToolExecution => self.run_tool_execution(params).await,
            other => unreachable!("run_action dispatched for non-loop kind {other}"),
        }
    }

    /// Calls the model up to `ACTION_MAX_RETRIES + 1` times on the same
    /// context/prompt until it produces a parseable response proposing a
    /// transition that is legal from `kind` (spec §4.G retry discipline,
    /// scenario 4). A parse failure counts toward the same retry budget as
    /// an illegal transition (spec §7).
    async fn run_model_handler(
        &self,
        user_input: &str,
        context: &str,
        kind: ActionKind,
    ) -> Result<StepOutcome, CoreAgentError> {
        let system_prompt = self.prompts.prompt_with_preamble(kind)?;
        let rendered_context = format!("User input: {}\n\n{}", user_input, context);

        for attempt in 0..=self.settings.action_max_retries {
            let raw = self.model.generate(&rendered_context, Some(&system_prompt)).await?;
            match parse_response(&raw, kind) {
                Ok(parsed) => {
                    let valid = match allowed_next(kind) {
                        Some(allowed) => allowed.contains(&parsed.next_action),
                        None => true,
                    };
                    if valid {
                        return Ok(StepOutcome::model(
                            parsed.response,
                            parsed.next_action,
                            parsed.next_action_parameters,
                        ));
                    }
                    info!(kind = %kind, attempt, proposed = %parsed.next_action, "illegal transition, retrying");
                }
                Err(err) => {
                    info!(kind = %kind, attempt, error = %err, "unparsable model response, retrying");
                }
            }
        }

        Err(CoreAgentError::PolicyViolation {
            kind,
            retries: self.settings.action_max_retries,
        })
    }

    /// `AGENT_TOOL_SEARCH`: deterministic, no model call. Requires
    /// `{tool_search_query}` in `params`; forces the next kind to
    /// `PROCESS_AGENT_TOOL_SEARCH_RESULT` (spec §4.G).
    ///
    /// Gateway failures do not abort the step (spec §7): they are folded into
    /// the action's text as a sentinel string so the model sees the failure
    /// on the next turn and may choose to respond anyway. Only a missing
    /// parameter is fatal to the step (`InvalidAction`).
    async fn run_tool_search(&self, params: Option<Params>) -> Result<StepOutcome, CoreAgentError> {
        let query = params
            .as_ref()
            .and_then(|p| p.get("tool_search_query"))
            .and_then(Value::as_str)
            .ok_or(CoreAgentError::InvalidAction {
                kind: ActionKind::AgentToolSearch,
                missing: "tool_search_query",
            })?
            .to_string();

        // Redundant with the gateway client's own auto-create-on-first-use
        // guarantee (spec §4.D), but harmless: the client single-flights
        // session creation, so this is a no-op wait once a session exists
        // (Open Question (c), see DESIGN.md).
        let result = match self.gateway.create_session().await {
            Ok(_) => match self.gateway.search_tools(&query).await {
                Ok(text) => text,
                Err(err) => gateway_sentinel(&err),
            },
            Err(err) => gateway_sentinel(&err),
        };
        Ok(StepOutcome {
            text: result,
            next_kind: ActionKind::ProcessAgentToolSearchResult,
            next_params: None,
            tool_name: None,
            tool_args: None,
            tool_search_query: Some(query),
        })
    }

    /// `AGENT_TOOL_EXECUTION`: deterministic, no model call. Requires
    /// `{tool_name, tool_args}` in `params`; forces the next kind to
    /// `PROCESS_AGENT_TOOL_EXECUTION_RESULT` (spec §4.G).
    async fn run_tool_execution(
        &self,
        params: Option<Params>,
    ) -> Result<StepOutcome, CoreAgentError> {
        let params = params.ok_or(CoreAgentError::InvalidAction {
            kind: ActionKind::AgentToolExecution,
            missing: "tool_name",
        })?;
        let tool_name = params
            .get("tool_name")
            .and_then(Value::as_str)
            .ok_or(CoreAgentError::InvalidAction {
                kind: ActionKind::AgentToolExecution,
                missing: "tool_name",
            })?
            .to_string();
        let tool_args: Params = match params.get("tool_args") {
            Some(Value::Object(map)) => map.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            _ => {
                return Err(CoreAgentError::InvalidAction {
                    kind: ActionKind::AgentToolExecution,
                    missing: "tool_args",
                })
            }
        };

        let result = match self.gateway.create_session().await {
            Ok(_) => {
                match self
                    .gateway
                    .execute_tool(&tool_name, Value::Object(tool_args.clone().into_iter().collect()))
                    .await
                {
                    Ok(text) => text,
                    Err(err) => gateway_sentinel(&err),
                }
            }
            Err(err) => gateway_sentinel(&err),
        };
        Ok(StepOutcome {
            text: result,
            next_kind: ActionKind::ProcessAgentToolExecutionResult,
            next_params: None,
            tool_name: Some(tool_name),
            tool_args: Some(tool_args),
            tool_search_query: None,
        })
    }

    /// Closes the step with a `STEP_SUMMARY` node (a step-boundary node with
    /// no memory). Best-effort: a malformed summary response still gets
    /// recorded verbatim rather than failing the whole step over a
    /// non-critical final action.
    async fn append_step_summary(&self) {
        let context = self.dag.get_current_context();
        let system_prompt = match self.prompts.prompt_with_preamble(ActionKind::StepSummary) {
            Ok(p) => p,
            Err(_) => return,
        };
        let text = match self.model.generate(&context, Some(&system_prompt)).await {
            Ok(raw) => match parse_response(&raw, ActionKind::StepSummary) {
                Ok(parsed) => parsed.response,
                Err(_) => raw,
            },
            Err(err) => format!("step summary unavailable: {err}"),
        };
        self.dag.add_action(text, ActionKind::StepSummary, ActionDraft::default(), None);
    }
}

/// Folds a gateway failure into the tool-result sentinel text the model
/// sees on its next turn (spec §7: `"No gateway session - call
/// create_session first"`-style strings rather than a fatal step abort).
fn gateway_sentinel(err: &crate::error::GatewayError) -> String {
    use crate::error::GatewayError;
    match err {
        GatewayError::Unavailable(msg) => {
            format!("No gateway session - call create_session first ({msg})")
        }
        GatewayError::Rejected { body } => format!("Gateway rejected request: {body}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockProvider;

    fn gateway_stub() -> Arc<GatewayClient> {
        // No network call happens unless a test drives a tool-search/execute
        // scenario; the base URL is unreachable by construction.
        Arc::new(GatewayClient::with_base_url("http://127.0.0.1:1"))
    }

    #[tokio::test]
    async fn pure_response_scenario_produces_four_nodes_and_terminates() {
        let model = Arc::new(MockProvider::scripted([
            r#"{"response":"Hi there","next_action":"AGENT_RESPONSE"}"#,
            r#"{"response":"Hi there"}"#,
            r#"{"response":"User greeted; agent replied."}"#,
        ]));
        let agent = CoreAgent::new(
            DagMemory::new(),
            model,
            gateway_stub(),
            PromptStore::default(),
            AgentSettings::default(),
        );
        agent.run_step("hello").await.unwrap();

        let dag = agent.dag();
        assert_eq!(dag.get_step_count(), 1);
        let path = dag.get_actions_for_step(&dag.current_node_id().unwrap()).unwrap();
        let kinds: Vec<ActionKind> = path.iter().map(|a| a.kind).collect();
        assert_eq!(
            kinds,
            vec![
                ActionKind::UserInput,
                ActionKind::ProcessUserInput,
                ActionKind::AgentResponse,
                ActionKind::StepSummary,
            ]
        );
    }

    #[tokio::test]
    async fn illegal_transition_exhausts_retries_and_raises_policy_violation() {
        // AGENT_PLANNING only allows AGENT_TOOL_SEARCH/AGENT_RESPONSE; every
        // scripted reply proposes PROCESS_USER_INPUT, which is illegal.
        let model = Arc::new(MockProvider::scripted([
            r#"{"response":"ok","next_action":"AGENT_PLANNING"}"#, // PROCESS_USER_INPUT handler: legal, advances to AGENT_PLANNING
            r#"{"response":"ok","next_action":"PROCESS_USER_INPUT"}"#,
            r#"{"response":"ok","next_action":"PROCESS_USER_INPUT"}"#,
            r#"{"response":"ok","next_action":"PROCESS_USER_INPUT"}"#,
            r#"{"response":"ok","next_action":"PROCESS_USER_INPUT"}"#,
        ]));
        let agent = CoreAgent::new(
            DagMemory::new(),
            model,
            gateway_stub(),
            PromptStore::default(),
            AgentSettings::default(),
        );
        let err = agent.run_step("hello").await.unwrap_err();
        assert!(matches!(
            err,
            CoreAgentError::PolicyViolation {
                kind: ActionKind::AgentPlanning,
                retries: 3
            }
        ));
    }

    /// A tiny always-on HTTP stub serving `/sessions/create` and
    /// `/mcp/search` forever, for tests that need the deterministic
    /// tool-dispatch kinds to actually round-trip through a gateway.
    fn spawn_persistent_gateway_stub() -> Arc<GatewayClient> {
        use std::io::{Read, Write};
        use std::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        std::thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(mut stream) = stream else { continue };
                let mut buf = [0u8; 4096];
                let n = stream.read(&mut buf).unwrap_or(0);
                let request = String::from_utf8_lossy(&buf[..n]);
                let body = if request.contains("/sessions/create") {
                    r#"{"session_id":"s1"}"#
                } else {
                    r#"{"result":[{"name":"calc"}]}"#
                };
                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    body.len(),
                    body
                );
                let _ = stream.write_all(response.as_bytes());
            }
        });
        Arc::new(GatewayClient::with_base_url(format!("http://{}", addr)))
    }

    #[tokio::test]
    async fn budget_cap_breaks_loop_without_await_and_still_appends_step_summary() {
        // Cycles PROCESS_USER_INPUT -> AGENT_PLANNING -> (deterministic)
        // AGENT_TOOL_SEARCH -> PROCESS_AGENT_TOOL_SEARCH_RESULT -> AGENT_PLANNING
        // indefinitely: AGENT_RESPONSE is never reached, so AWAIT_USER_INPUT
        // never fires and the loop can only end by exhausting the budget.
        let plan_to_search = r#"{"response":"searching","next_action":"AGENT_TOOL_SEARCH","next_action_parameters":{"tool_search_query":"calc"}}"#;
        let to_plan = r#"{"response":"ok","next_action":"AGENT_PLANNING"}"#;
        let script = vec![
            to_plan.to_string(),         // PROCESS_USER_INPUT -> AGENT_PLANNING
            plan_to_search.to_string(),  // AGENT_PLANNING -> AGENT_TOOL_SEARCH
            to_plan.to_string(),         // PROCESS_AGENT_TOOL_SEARCH_RESULT -> AGENT_PLANNING
            plan_to_search.to_string(),
            to_plan.to_string(),
            plan_to_search.to_string(),
            to_plan.to_string(),
        ];
        let model = Arc::new(MockProvider::scripted(script));
        let settings = AgentSettings {
            max_actions: 10,
            ..AgentSettings::default()
        };
        let agent = CoreAgent::new(
            DagMemory::new(),
            model,
            spawn_persistent_gateway_stub(),
            PromptStore::default(),
            settings,
        );
        agent.run_step("hello").await.unwrap();

        let dag = agent.dag();
        let step = dag.current_node_id().unwrap();
        let actions = dag.get_actions_for_step(&step).unwrap();
        // USER_INPUT + 10 budgeted actions + STEP_SUMMARY == 12, and no
        // AWAIT_USER_INPUT node appears among them.
        assert_eq!(actions.len(), 12);
        assert!(!actions.iter().any(|a| a.kind == ActionKind::AwaitUserInput));
        assert_eq!(actions.last().unwrap().kind, ActionKind::StepSummary);
    }

    #[tokio::test]
    async fn gateway_failure_becomes_sentinel_text_instead_of_aborting_step() {
        // Gateway base URL is unreachable by construction (gateway_stub), so
        // create_session fails; the step must still continue all the way to
        // AWAIT_USER_INPUT rather than returning Err (spec §7).
        let model = Arc::new(MockProvider::scripted([
            r#"{"response":"let's search","next_action":"AGENT_TOOL_SEARCH","next_action_parameters":{"tool_search_query":"calc"}}"#,
            r#"{"response":"no luck, answering directly","next_action":"AGENT_RESPONSE"}"#,
            r#"{"response":"no luck, answering directly"}"#,
            r#"{"response":"step done"}"#,
        ]));
        let agent = CoreAgent::new(
            DagMemory::new(),
            model,
            gateway_stub(),
            PromptStore::default(),
            AgentSettings::default(),
        );
        let reply = agent.run_step("find a calculator").await.unwrap();
        assert_eq!(reply.as_deref(), Some("no luck, answering directly"));

        let dag = agent.dag();
        let step = dag.current_node_id().unwrap();
        let actions = dag.get_actions_for_step(&step).unwrap();
        let search_action = actions
            .iter()
            .find(|a| a.kind == ActionKind::AgentToolSearch)
            .unwrap();
        assert!(search_action.content.contains("No gateway session"));
    }

    #[tokio::test]
    async fn shutdown_flips_shared_running_flag() {
        let agent = CoreAgent::new(
            DagMemory::new(),
            Arc::new(MockProvider::fixed(r#"{"response":"ok"}"#)),
            gateway_stub(),
            PromptStore::default(),
            AgentSettings::default(),
        );
        let flag = agent.is_running_flag();
        assert!(flag.load(Ordering::SeqCst));
        agent.shutdown();
        assert!(!flag.load(Ordering::SeqCst));
    }
}
