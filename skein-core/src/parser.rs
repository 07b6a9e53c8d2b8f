//! The Response Parser (spec §4.F): strips fenced-code markers from a raw
//! model response, decodes the JSON payload, and validates its shape against
//! the action kind that produced it.

use serde_json::Value;

use crate::action::ActionKind;
use crate::error::ParserError;

/// The parsed, validated result of a model response.
#[derive(Clone, Debug, PartialEq)]
pub struct ParsedResponse {
    pub response: String,
    pub next_action: ActionKind,
    pub next_action_parameters: Option<crate::action::Params>,
}

/// Strips a leading fenced-code marker (```json or plain ```) and a trailing
/// ``` fence, then trims surrounding whitespace. Text that isn't fenced is
/// returned unchanged (after trimming).
fn strip_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let without_leading = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```JSON"))
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    let without_leading = without_leading.trim_start_matches(['\n', '\r']);
    without_leading.strip_suffix("```").unwrap_or(without_leading).trim()
}

/// Parses `raw` (the model's text output) produced while handling `kind`.
///
/// Shape rules (spec §4.F):
/// - `AGENT_RESPONSE` → `(response, AWAIT_USER_INPUT, None)`, ignoring any `next_action`.
/// - `UPDATE_*` / `STEP_SUMMARY` → `(response, kind, None)` (no transition).
/// - otherwise: `next_action` is required and must be a known `ActionKind`;
///   if it is `AGENT_TOOL_SEARCH`, `next_action_parameters` must be a JSON object.
pub fn parse_response(raw: &str, kind: ActionKind) -> Result<ParsedResponse, ParserError> {
    let stripped = strip_fence(raw);
    let value: Value =
        serde_json::from_str(stripped).map_err(|e| ParserError::InvalidJson(e.to_string()))?;

    let response = value
        .get("response")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or(ParserError::MissingField("response"))?
        .to_string();

    if kind == ActionKind::AgentResponse {
        return Ok(ParsedResponse {
            response,
            next_action: ActionKind::AwaitUserInput,
            next_action_parameters: None,
        });
    }

    if kind.is_update_kind() || kind == ActionKind::StepSummary {
        return Ok(ParsedResponse {
            response,
            next_action: kind,
            next_action_parameters: None,
        });
    }

    let next_action_raw = value
        .get("next_action")
        .and_then(Value::as_str)
        .ok_or(ParserError::MissingField("next_action"))?;
    let next_action = ActionKind::parse_upper_snake(next_action_raw)
        .ok_or_else(|| ParserError::UnknownActionKind(next_action_raw.to_string()))?;

    let next_action_parameters = match value.get("next_action_parameters") {
        Some(Value::Object(map)) => Some(
            map.iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect::<crate::action::Params>(),
        ),
        Some(_) if next_action == ActionKind::AgentToolSearch => {
            return Err(ParserError::MissingField("next_action_parameters"))
        }
        _ => {
            if next_action == ActionKind::AgentToolSearch {
                return Err(ParserError::MissingField("next_action_parameters"));
            }
            None
        }
    };

    Ok(ParsedResponse {
        response,
        next_action,
        next_action_parameters,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn agent_response_ignores_next_action_and_forces_await() {
        let raw = r#"{"response":"Hi there","next_action":"AGENT_PLANNING"}"#;
        let parsed = parse_response(raw, ActionKind::AgentResponse).unwrap();
        assert_eq!(parsed.response, "Hi there");
        assert_eq!(parsed.next_action, ActionKind::AwaitUserInput);
    }

    #[test]
    fn update_kind_returns_same_kind_with_no_transition() {
        let raw = r#"{"response":"- buy milk"}"#;
        let parsed = parse_response(raw, ActionKind::UpdateTodoList).unwrap();
        assert_eq!(parsed.next_action, ActionKind::UpdateTodoList);
        assert!(parsed.next_action_parameters.is_none());
    }

    #[test]
    fn process_user_input_requires_next_action() {
        let raw = r#"{"response":"ok"}"#;
        let err = parse_response(raw, ActionKind::ProcessUserInput).unwrap_err();
        assert_eq!(err, ParserError::MissingField("next_action"));
    }

    #[test]
    fn unknown_next_action_kind_is_rejected() {
        let raw = r#"{"response":"ok","next_action":"FLY_TO_THE_MOON"}"#;
        let err = parse_response(raw, ActionKind::ProcessUserInput).unwrap_err();
        assert_eq!(err, ParserError::UnknownActionKind("FLY_TO_THE_MOON".to_string()));
    }

    #[test]
    fn tool_search_requires_parameters_mapping() {
        let raw = r#"{"response":"ok","next_action":"AGENT_TOOL_SEARCH"}"#;
        let err = parse_response(raw, ActionKind::ProcessUserInput).unwrap_err();
        assert_eq!(err, ParserError::MissingField("next_action_parameters"));
    }

    #[test]
    fn tool_search_with_parameters_parses() {
        let raw = json!({
            "response": "searching",
            "next_action": "AGENT_TOOL_SEARCH",
            "next_action_parameters": {"tool_search_query": "calculator"},
        })
        .to_string();
        let parsed = parse_response(&raw, ActionKind::ProcessUserInput).unwrap();
        assert_eq!(parsed.next_action, ActionKind::AgentToolSearch);
        let params = parsed.next_action_parameters.unwrap();
        assert_eq!(params.get("tool_search_query").unwrap(), "calculator");
    }

    #[test]
    fn fenced_json_block_parses_identically_to_unfenced() {
        let unfenced = r#"{"response":"Hi there"}"#;
        let fenced = "```json\n{\"response\":\"Hi there\"}\n```";
        let bare_fenced = "```\n{\"response\":\"Hi there\"}\n```";
        let a = parse_response(unfenced, ActionKind::AgentResponse).unwrap();
        let b = parse_response(fenced, ActionKind::AgentResponse).unwrap();
        let c = parse_response(bare_fenced, ActionKind::AgentResponse).unwrap();
        assert_eq!(a, b);
        assert_eq!(a, c);
    }

    #[test]
    fn missing_response_field_errors() {
        let raw = r#"{"next_action":"AGENT_RESPONSE"}"#;
        let err = parse_response(raw, ActionKind::AgentResponse).unwrap_err();
        assert_eq!(err, ParserError::MissingField("response"));
    }

    #[test]
    fn invalid_json_errors() {
        let err = parse_response("not json at all", ActionKind::AgentResponse).unwrap_err();
        assert!(matches!(err, ParserError::InvalidJson(_)));
    }
}
