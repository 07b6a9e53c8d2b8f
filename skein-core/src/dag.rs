//! The DAG Memory: an append-only action graph with derived per-node memories
//! and context rendering (spec §4.E).
//!
//! `DagMemory` is a cheap, `Clone`-able handle onto an `Arc<Mutex<Inner>>`
//! carrying the graph topology; each non-step node additionally owns an
//! `Arc<NodeMemory>` with its own lock so that a memory-field update never
//! has to take the whole-graph lock to append a history entry. Mutating
//! topology operations (`add_action`, `update_node`, `set_current_node`,
//! `backtrack`) serialize through the single `Inner` mutex, which is also
//! what makes context reads observe a consistent snapshot: a traversal holds
//! the same lock for its whole walk, so no edge it visits can be rewritten
//! mid-render.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::action::{Action, ActionKind, Params};
use crate::error::DagError;

/// Which derived field a [`NodeMemoryEntry`] just updated.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryField {
    Todo,
    ConversationState,
    BranchBacktrackSummary,
    ConversationCompression,
}

/// One append-only history record: which field changed, when, and the
/// **current** value of all four derived fields (the previous entry's other
/// three fields are copied forward so the latest entry is always a complete
/// snapshot).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NodeMemoryEntry {
    pub updated_field: MemoryField,
    pub timestamp: DateTime<Utc>,
    pub todo: Option<String>,
    pub conversation_state: Option<String>,
    pub branch_backtrack_summary: Option<String>,
    pub conversation_compression: Option<String>,
}

impl NodeMemoryEntry {
    fn seed(now: DateTime<Utc>) -> Self {
        NodeMemoryEntry {
            updated_field: MemoryField::Todo,
            timestamp: now,
            todo: None,
            conversation_state: None,
            branch_backtrack_summary: None,
            conversation_compression: None,
        }
    }
}

/// The append-only per-node memory history. Wrapped in its own `Mutex` (see
/// module docs) so memory writes don't contend with topology writes.
#[derive(Debug, Default)]
pub struct NodeMemory {
    entries: Mutex<Vec<NodeMemoryEntry>>,
}

impl NodeMemory {
    fn new(seed: NodeMemoryEntry) -> Self {
        NodeMemory {
            entries: Mutex::new(vec![seed]),
        }
    }

    fn latest(&self) -> NodeMemoryEntry {
        let guard = self.entries.lock().expect("node memory mutex poisoned");
        guard.last().cloned().expect("NodeMemory is never empty")
    }

    fn push(&self, entry: NodeMemoryEntry) {
        self.entries.lock().expect("node memory mutex poisoned").push(entry);
    }

    fn len(&self) -> usize {
        self.entries.lock().expect("node memory mutex poisoned").len()
    }

    fn all(&self) -> Vec<NodeMemoryEntry> {
        self.entries.lock().expect("node memory mutex poisoned").clone()
    }
}

/// A graph node owning exactly one [`Action`].
#[derive(Clone, Debug)]
pub struct ActionNode {
    pub node_id: String,
    pub parent_id: Option<String>,
    pub children_ids: Vec<String>,
    pub step_boundary: bool,
    pub step_summary: Option<String>,
    pub action: Action,
    /// `None` on step-boundary nodes (spec §3/§4.E).
    pub memory: Option<Arc<NodeMemory>>,
}

/// Optional extra fields accepted by [`DagMemory::add_action`] beyond
/// `content`/`kind`/`parent_id`, matching the free-form parts of [`Action`].
#[derive(Clone, Debug, Default)]
pub struct ActionDraft {
    pub tool_name: Option<String>,
    pub tool_args: Option<Params>,
    pub tool_result: Option<String>,
    pub metadata: Params,
    pub action_parameters: Option<Params>,
    pub tool_search_query: Option<String>,
    /// Seeds the new node's first `NodeMemoryEntry` instead of all-null
    /// fields; ignored for `STEP_SUMMARY` actions (which get no memory).
    pub seed_memory: Option<NodeMemoryEntry>,
}

struct Inner {
    nodes: HashMap<String, ActionNode>,
    root_node_id: Option<String>,
    current_node_id: Option<String>,
}

impl Inner {
    fn new() -> Self {
        Inner {
            nodes: HashMap::new(),
            root_node_id: None,
            current_node_id: None,
        }
    }
}

/// A cheap, shareable handle onto the action graph. Clones share the same
/// underlying state (`Arc`), which is how the Core Agent and Memory Agent
/// observe the same DAG concurrently (spec §5).
#[derive(Clone)]
pub struct DagMemory {
    inner: Arc<Mutex<Inner>>,
}

impl Default for DagMemory {
    fn default() -> Self {
        Self::new()
    }
}

impl DagMemory {
    pub fn new() -> Self {
        DagMemory {
            inner: Arc::new(Mutex::new(Inner::new())),
        }
    }

    /// Appends a new action under `parent_id` (defaulting to HEAD), moves
    /// HEAD to it, and returns the new node id. `node_id == action.id`: both
    /// are the insertion count at append time, so ids stay a gap-free
    /// increasing sequence as nodes are never removed.
    pub fn add_action(
        &self,
        content: impl Into<String>,
        kind: ActionKind,
        draft: ActionDraft,
        parent_id: Option<String>,
    ) -> String {
        let mut inner = self.inner.lock().expect("dag mutex poisoned");
        let id = inner.nodes.len().to_string();
        let now = Utc::now();
        let content = content.into();

        let mut action = Action::new(id.clone(), kind, now, content.clone());
        action.tool_name = draft.tool_name;
        action.tool_args = draft.tool_args;
        action.tool_result = draft.tool_result;
        action.metadata = draft.metadata;
        action.action_parameters = draft.action_parameters;
        action.tool_search_query = draft.tool_search_query;

        // Invariants from spec §3: the tool-result for a search/execution
        // action is always the action's own content.
        if matches!(kind, ActionKind::AgentToolSearch | ActionKind::AgentToolExecution) {
            action.tool_result = Some(content.clone());
        }

        let parent = parent_id.or_else(|| inner.current_node_id.clone());
        let step_boundary = kind == ActionKind::StepSummary;
        let memory = if step_boundary {
            None
        } else {
            let seed = draft.seed_memory.unwrap_or_else(|| NodeMemoryEntry::seed(now));
            Some(Arc::new(NodeMemory::new(seed)))
        };

        let node = ActionNode {
            node_id: id.clone(),
            parent_id: parent.clone(),
            children_ids: Vec::new(),
            step_boundary,
            step_summary: if step_boundary { Some(content) } else { None },
            action,
            memory,
        };

        inner.nodes.insert(id.clone(), node);
        if let Some(parent_id) = parent.as_ref() {
            if let Some(parent_node) = inner.nodes.get_mut(parent_id) {
                parent_node.children_ids.push(id.clone());
            }
        }
        if inner.root_node_id.is_none() {
            inner.root_node_id = Some(id.clone());
        }
        inner.current_node_id = Some(id.clone());
        id
    }

    /// Overwrites a node's `Action`; if `memory` is given, appends it to the
    /// node's history. Errors `NoMemoryOnStepNode` if `memory` is given for a
    /// step-boundary node.
    pub fn update_node(
        &self,
        node_id: &str,
        action: Action,
        memory: Option<NodeMemoryEntry>,
    ) -> Result<(), DagError> {
        let mut inner = self.inner.lock().expect("dag mutex poisoned");
        let node = inner
            .nodes
            .get_mut(node_id)
            .ok_or_else(|| DagError::NodeNotFound(node_id.to_string()))?;
        if let Some(entry) = memory {
            let mem = node
                .memory
                .clone()
                .ok_or_else(|| DagError::NoMemoryOnStepNode(node_id.to_string()))?;
            mem.push(entry);
        }
        node.action = action;
        Ok(())
    }

    fn set_memory_field(
        &self,
        node_id: &str,
        field: MemoryField,
        value: String,
    ) -> Result<(), DagError> {
        let inner = self.inner.lock().expect("dag mutex poisoned");
        let node = inner
            .nodes
            .get(node_id)
            .ok_or_else(|| DagError::NodeNotFound(node_id.to_string()))?;
        let mem = node
            .memory
            .as_ref()
            .ok_or_else(|| DagError::NoMemoryOnStepNode(node_id.to_string()))?
            .clone();
        drop(inner);

        let prev = mem.latest();
        let now = Utc::now();
        let entry = match field {
            MemoryField::Todo => NodeMemoryEntry {
                updated_field: field,
                timestamp: now,
                todo: Some(value),
                conversation_state: prev.conversation_state,
                branch_backtrack_summary: prev.branch_backtrack_summary,
                conversation_compression: prev.conversation_compression,
            },
            MemoryField::BranchBacktrackSummary => NodeMemoryEntry {
                updated_field: field,
                timestamp: now,
                todo: prev.todo,
                conversation_state: prev.conversation_state,
                branch_backtrack_summary: Some(value),
                conversation_compression: prev.conversation_compression,
            },
            MemoryField::ConversationCompression => NodeMemoryEntry {
                updated_field: field,
                timestamp: now,
                todo: prev.todo,
                conversation_state: prev.conversation_state,
                branch_backtrack_summary: prev.branch_backtrack_summary,
                conversation_compression: Some(value),
            },
            // Open Question (b), resolved per SPEC_FULL §4.H: reproduced
            // faithfully from the original `memory.py` rather than silently
            // fixed. `set_conversation_state` does NOT carry
            // `conversation_compression` forward — every other setter does.
            MemoryField::ConversationState => NodeMemoryEntry {
                updated_field: field,
                timestamp: now,
                todo: prev.todo,
                conversation_state: Some(value),
                branch_backtrack_summary: prev.branch_backtrack_summary,
                conversation_compression: None,
            },
        };
        mem.push(entry);
        Ok(())
    }

    pub fn set_todo_list(&self, node_id: &str, value: impl Into<String>) -> Result<(), DagError> {
        self.set_memory_field(node_id, MemoryField::Todo, value.into())
    }

    pub fn set_conversation_state(
        &self,
        node_id: &str,
        value: impl Into<String>,
    ) -> Result<(), DagError> {
        self.set_memory_field(node_id, MemoryField::ConversationState, value.into())
    }

    pub fn set_conversation_compression(
        &self,
        node_id: &str,
        value: impl Into<String>,
    ) -> Result<(), DagError> {
        self.set_memory_field(node_id, MemoryField::ConversationCompression, value.into())
    }

    pub fn set_branch_backtrack_summary(
        &self,
        node_id: &str,
        value: impl Into<String>,
    ) -> Result<(), DagError> {
        self.set_memory_field(node_id, MemoryField::BranchBacktrackSummary, value.into())
    }

    fn head_or(&self, node_id: Option<&str>) -> Option<String> {
        match node_id {
            Some(id) => Some(id.to_string()),
            None => self.inner.lock().expect("dag mutex poisoned").current_node_id.clone(),
        }
    }

    fn memory_field(&self, node_id: Option<&str>, field: MemoryField) -> Option<String> {
        let id = self.head_or(node_id)?;
        let inner = self.inner.lock().expect("dag mutex poisoned");
        let mem = inner.nodes.get(&id)?.memory.clone()?;
        drop(inner);
        let latest = mem.latest();
        match field {
            MemoryField::Todo => latest.todo,
            MemoryField::ConversationState => latest.conversation_state,
            MemoryField::BranchBacktrackSummary => latest.branch_backtrack_summary,
            MemoryField::ConversationCompression => latest.conversation_compression,
        }
    }

    pub fn get_todo_list(&self, node_id: Option<&str>) -> Option<String> {
        self.memory_field(node_id, MemoryField::Todo)
    }

    pub fn get_conversation_state(&self, node_id: Option<&str>) -> Option<String> {
        self.memory_field(node_id, MemoryField::ConversationState)
    }

    pub fn get_branch_backtrack_summary(&self, node_id: Option<&str>) -> Option<String> {
        self.memory_field(node_id, MemoryField::BranchBacktrackSummary)
    }

    pub fn get_conversation_compression(&self, node_id: Option<&str>) -> Option<String> {
        self.memory_field(node_id, MemoryField::ConversationCompression)
    }

    /// The latest complete `NodeMemoryEntry` snapshot for `node_id` (default
    /// HEAD), or `None` if the node has no memory or it was never set.
    pub fn get_current_node_memory(&self, node_id: Option<&str>) -> Option<NodeMemoryEntry> {
        let id = self.head_or(node_id)?;
        let inner = self.inner.lock().expect("dag mutex poisoned");
        let mem = inner.nodes.get(&id)?.memory.clone()?;
        drop(inner);
        Some(mem.latest())
    }

    /// Full history, oldest first. Exposed for tests pinning history length.
    pub fn get_node_memory_history(&self, node_id: &str) -> Option<Vec<NodeMemoryEntry>> {
        let inner = self.inner.lock().expect("dag mutex poisoned");
        let mem = inner.nodes.get(node_id)?.memory.clone()?;
        drop(inner);
        Some(mem.all())
    }

    pub fn node_memory_len(&self, node_id: &str) -> Option<usize> {
        let inner = self.inner.lock().expect("dag mutex poisoned");
        let mem = inner.nodes.get(node_id)?.memory.clone()?;
        drop(inner);
        Some(mem.len())
    }

    pub fn get_node_by_id(&self, node_id: &str) -> Option<ActionNode> {
        self.inner.lock().expect("dag mutex poisoned").nodes.get(node_id).cloned()
    }

    pub fn root_node_id(&self) -> Option<String> {
        self.inner.lock().expect("dag mutex poisoned").root_node_id.clone()
    }

    pub fn current_node_id(&self) -> Option<String> {
        self.inner.lock().expect("dag mutex poisoned").current_node_id.clone()
    }

    /// The ancestor chain starting at `node_id` and ending at the root,
    /// inclusive of both ends. Each id appears at most once.
    pub fn get_path_to_root(&self, node_id: &str) -> Result<Vec<String>, DagError> {
        let inner = self.inner.lock().expect("dag mutex poisoned");
        let mut path = Vec::new();
        let mut visited = std::collections::HashSet::new();
        let mut cur = node_id.to_string();
        loop {
            if !visited.insert(cur.clone()) {
                return Err(DagError::CycleDetected(node_id.to_string()));
            }
            let node = inner
                .nodes
                .get(&cur)
                .ok_or_else(|| DagError::NodeNotFound(cur.clone()))?;
            path.push(cur.clone());
            match &node.parent_id {
                Some(parent) => cur = parent.clone(),
                None => break,
            }
        }
        Ok(path)
    }

    pub fn get_all_branch_node_ids(&self) -> Vec<String> {
        let inner = self.inner.lock().expect("dag mutex poisoned");
        let mut ids: Vec<String> = inner
            .nodes
            .values()
            .filter(|n| n.children_ids.len() >= 2)
            .map(|n| n.node_id.clone())
            .collect();
        ids.sort_by_key(|id| id.parse::<u64>().unwrap_or(u64::MAX));
        ids
    }

    pub fn get_all_leaf_node_ids(&self) -> Vec<String> {
        let inner = self.inner.lock().expect("dag mutex poisoned");
        let mut ids: Vec<String> = inner
            .nodes
            .values()
            .filter(|n| n.children_ids.is_empty())
            .map(|n| n.node_id.clone())
            .collect();
        ids.sort_by_key(|id| id.parse::<u64>().unwrap_or(u64::MAX));
        ids
    }

    pub fn get_step_nodes(&self) -> Vec<String> {
        let inner = self.inner.lock().expect("dag mutex poisoned");
        let mut ids: Vec<String> = inner
            .nodes
            .values()
            .filter(|n| n.step_boundary)
            .map(|n| n.node_id.clone())
            .collect();
        ids.sort_by_key(|id| id.parse::<u64>().unwrap_or(u64::MAX));
        ids
    }

    /// Walks backward from `step_id` through parents until the root,
    /// returning the actions in forward (root-first) order, inclusive of
    /// `step_id`'s own action.
    pub fn get_actions_for_step(&self, step_id: &str) -> Result<Vec<Action>, DagError> {
        let path = self.get_path_to_root(step_id)?;
        let inner = self.inner.lock().expect("dag mutex poisoned");
        let mut actions: Vec<Action> = path
            .iter()
            .map(|id| inner.nodes[id].action.clone())
            .collect();
        actions.reverse();
        Ok(actions)
    }

    pub fn set_current_node(&self, node_id: &str) -> Result<(), DagError> {
        let mut inner = self.inner.lock().expect("dag mutex poisoned");
        if !inner.nodes.contains_key(node_id) {
            return Err(DagError::NodeNotFound(node_id.to_string()));
        }
        inner.current_node_id = Some(node_id.to_string());
        Ok(())
    }

    /// Requires non-empty `notes`; writes `metadata["notes"]` on the target
    /// node's action and moves HEAD to it.
    pub fn backtrack(&self, node_id: &str, notes: &str) -> Result<(), DagError> {
        if notes.trim().is_empty() {
            return Err(DagError::EmptyBacktrackNotes);
        }
        let mut inner = self.inner.lock().expect("dag mutex poisoned");
        let node = inner
            .nodes
            .get_mut(node_id)
            .ok_or_else(|| DagError::NodeNotFound(node_id.to_string()))?;
        node.action
            .metadata
            .insert("notes".to_string(), Value::String(notes.to_string()));
        inner.current_node_id = Some(node_id.to_string());
        Ok(())
    }

    /// Walks parents from `start` until `end` (inclusive of both), rejecting
    /// cycles and unreachability, and renders the path root(`end`)→`start`.
    pub fn get_context_between_nodes(&self, start: &str, end: &str) -> Result<String, DagError> {
        let inner = self.inner.lock().expect("dag mutex poisoned");
        let mut chain = Vec::new();
        let mut visited = std::collections::HashSet::new();
        let mut cur = start.to_string();
        loop {
            if !visited.insert(cur.clone()) {
                return Err(DagError::CycleDetected(start.to_string()));
            }
            let node = inner
                .nodes
                .get(&cur)
                .ok_or_else(|| DagError::NodeNotFound(cur.clone()))?;
            chain.push(node.clone());
            if cur == end {
                break;
            }
            match &node.parent_id {
                Some(parent) => cur = parent.clone(),
                None => {
                    return Err(DagError::Unreachable {
                        from: start.to_string(),
                        to: end.to_string(),
                    })
                }
            }
        }
        drop(inner);
        chain.reverse();
        Ok(render_blocks(&chain))
    }

    pub fn get_current_context(&self) -> String {
        let (head, root) = {
            let inner = self.inner.lock().expect("dag mutex poisoned");
            (inner.current_node_id.clone(), inner.root_node_id.clone())
        };
        match (head, root) {
            (Some(h), Some(r)) => self.get_context_between_nodes(&h, &r).unwrap_or_default(),
            _ => String::new(),
        }
    }

    /// Alias kept for callers that think of "the context" as simply current.
    pub fn get_context(&self) -> String {
        self.get_current_context()
    }

    /// The window of the most recent `max` ancestors of HEAD (HEAD included),
    /// oldest first, same rendering as [`Self::get_context_between_nodes`].
    pub fn get_recent_context(&self, max: usize) -> String {
        let head = match self.current_node_id() {
            Some(h) => h,
            None => return String::new(),
        };
        let inner = self.inner.lock().expect("dag mutex poisoned");
        let mut chain = Vec::new();
        let mut cur = Some(head);
        while let Some(id) = cur {
            let node = match inner.nodes.get(&id) {
                Some(n) => n,
                None => break,
            };
            chain.push(node.clone());
            if chain.len() >= max {
                break;
            }
            cur = node.parent_id.clone();
        }
        drop(inner);
        chain.reverse();
        render_blocks(&chain)
    }

    /// The numeric id of the HEAD action (i.e. the conversation's action count so far).
    pub fn get_conversation_length(&self) -> usize {
        let head = match self.current_node_id() {
            Some(h) => h,
            None => return 0,
        };
        head.parse().unwrap_or(0)
    }

    /// Counts ancestors of HEAD, matching the original's `len(path) - 1`
    /// (`get_path_to_root` here is inclusive of HEAD itself, so one is
    /// subtracted to land on the same ancestor-count semantics).
    pub fn get_branch_length(&self) -> usize {
        match self.current_node_id() {
            Some(h) => self
                .get_path_to_root(&h)
                .map(|p| p.len().saturating_sub(1))
                .unwrap_or(0),
            None => 0,
        }
    }

    pub fn get_step_count(&self) -> usize {
        self.get_step_nodes().len()
    }

    /// Resets the graph to its initial empty state (nodes, root, HEAD).
    pub fn clear(&self) {
        let mut inner = self.inner.lock().expect("dag mutex poisoned");
        inner.nodes.clear();
        inner.root_node_id = None;
        inner.current_node_id = None;
    }
}

/// Renders a chain of nodes (already in root-first order) per the stable
/// context-rendering format of spec §6: one block per node, blocks
/// separated by a single newline.
fn render_blocks(chain: &[ActionNode]) -> String {
    chain
        .iter()
        .map(|n| render_block(&n.action))
        .collect::<Vec<_>>()
        .join("\n")
}

fn render_block(action: &Action) -> String {
    let time = action.timestamp.format("%H:%M:%S");
    let kind = action.kind.as_upper_snake();
    let json = serde_json::to_string_pretty(action).unwrap_or_default();
    format!("[{}] {}: \n {}", time, kind, json)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dag_with_linear_chain() -> DagMemory {
        let dag = DagMemory::new();
        dag.add_action("hello", ActionKind::UserInput, ActionDraft::default(), None);
        dag.add_action(
            "processing",
            ActionKind::ProcessUserInput,
            ActionDraft::default(),
            None,
        );
        dag.add_action("hi there", ActionKind::AgentResponse, ActionDraft::default(), None);
        dag
    }

    #[test]
    fn action_ids_are_gap_free_increasing_sequence() {
        let dag = dag_with_linear_chain();
        let root = dag.root_node_id().unwrap();
        assert_eq!(root, "0");
        let ids: Vec<String> = (0..3).map(|i| i.to_string()).collect();
        for id in &ids {
            assert!(dag.get_node_by_id(id).is_some());
        }
    }

    #[test]
    fn dag_has_exactly_one_root() {
        let dag = dag_with_linear_chain();
        assert_eq!(dag.root_node_id(), Some("0".to_string()));
        // Re-adding never changes the root.
        dag.add_action("more", ActionKind::AwaitUserInput, ActionDraft::default(), None);
        assert_eq!(dag.root_node_id(), Some("0".to_string()));
    }

    #[test]
    fn path_to_root_terminates_and_has_no_duplicates() {
        let dag = dag_with_linear_chain();
        let head = dag.current_node_id().unwrap();
        let path = dag.get_path_to_root(&head).unwrap();
        assert_eq!(path.last(), Some(&"0".to_string()));
        let unique: std::collections::HashSet<_> = path.iter().collect();
        assert_eq!(unique.len(), path.len());
    }

    #[test]
    fn tool_search_round_trip_sets_result_and_query() {
        let dag = DagMemory::new();
        let draft = ActionDraft {
            tool_search_query: Some("calculator".to_string()),
            ..Default::default()
        };
        let id = dag.add_action("[]", ActionKind::AgentToolSearch, draft, None);
        let node = dag.get_node_by_id(&id).unwrap();
        assert_eq!(node.action.tool_search_query.as_deref(), Some("calculator"));
        assert_eq!(node.action.tool_result.as_deref(), Some("[]"));
    }

    #[test]
    fn set_todo_list_is_idempotent_and_grows_history_by_one_each_call() {
        let dag = DagMemory::new();
        let id = dag.add_action("hi", ActionKind::UserInput, ActionDraft::default(), None);
        dag.set_todo_list(&id, "buy milk").unwrap();
        dag.set_todo_list(&id, "buy milk").unwrap();
        assert_eq!(dag.get_todo_list(Some(&id)), Some("buy milk".to_string()));
        // seed entry + two explicit sets = 3; "increases history length by
        // exactly 2" per spec §8 is relative to the state before the two calls.
        assert_eq!(dag.node_memory_len(&id), Some(3));
    }

    #[test]
    fn set_on_step_boundary_node_errors() {
        let dag = DagMemory::new();
        let id = dag.add_action("summary", ActionKind::StepSummary, ActionDraft::default(), None);
        let err = dag.set_todo_list(&id, "x").unwrap_err();
        assert!(matches!(err, DagError::NoMemoryOnStepNode(_)));
    }

    #[test]
    fn conversation_state_drops_compression_matches_original_behavior() {
        let dag = DagMemory::new();
        let id = dag.add_action("hi", ActionKind::UserInput, ActionDraft::default(), None);
        dag.set_conversation_compression(&id, "compressed so far").unwrap();
        dag.set_conversation_state(&id, "{\"turn\": 1}").unwrap();
        // Reproduced bug from the original implementation (SPEC_FULL §4.H,
        // Open Question (b)): conversation_compression is dropped, not carried forward.
        assert_eq!(dag.get_conversation_compression(Some(&id)), None);
        assert_eq!(
            dag.get_conversation_state(Some(&id)),
            Some("{\"turn\": 1}".to_string())
        );
    }

    #[test]
    fn branch_node_ids_populated_after_backtrack_and_sibling_add() {
        let dag = DagMemory::new();
        dag.add_action("hi", ActionKind::UserInput, ActionDraft::default(), None);
        let process = dag.add_action(
            "processing",
            ActionKind::ProcessUserInput,
            ActionDraft::default(),
            None,
        );
        dag.add_action(
            "search a",
            ActionKind::AgentToolSearch,
            ActionDraft {
                tool_search_query: Some("a".to_string()),
                ..Default::default()
            },
            None,
        );
        dag.backtrack(&process, "try another path").unwrap();
        dag.add_action(
            "search b",
            ActionKind::AgentToolSearch,
            ActionDraft {
                tool_search_query: Some("b".to_string()),
                ..Default::default()
            },
            None,
        );
        assert!(dag.get_all_branch_node_ids().contains(&process));
    }

    #[test]
    fn get_context_between_nodes_rejects_unreachable() {
        let dag = DagMemory::new();
        let root = dag.add_action("root", ActionKind::UserInput, ActionDraft::default(), None);
        let branch_a = dag.add_action(
            "branch a",
            ActionKind::AgentResponse,
            ActionDraft::default(),
            Some(root.clone()),
        );
        let branch_b = dag.add_action(
            "branch b",
            ActionKind::AgentResponse,
            ActionDraft::default(),
            Some(root.clone()),
        );
        let err = dag.get_context_between_nodes(&branch_b, &branch_a).unwrap_err();
        assert!(matches!(err, DagError::Unreachable { .. }));
    }

    #[test]
    fn current_context_renders_root_first() {
        let dag = dag_with_linear_chain();
        let ctx = dag.get_current_context();
        let idx0 = ctx.find("USER_INPUT").unwrap();
        let idx1 = ctx.find("PROCESS_USER_INPUT").unwrap();
        let idx2 = ctx.find("AGENT_RESPONSE").unwrap();
        assert!(idx0 < idx1 && idx1 < idx2);
    }

    #[test]
    fn recent_context_windows_to_max_ancestors() {
        let dag = dag_with_linear_chain();
        let ctx = dag.get_recent_context(2);
        assert!(!ctx.contains("USER_INPUT:"));
        assert!(ctx.contains("PROCESS_USER_INPUT"));
        assert!(ctx.contains("AGENT_RESPONSE"));
    }

    #[test]
    fn step_count_and_branch_length_report_correctly() {
        let dag = dag_with_linear_chain();
        assert_eq!(dag.get_step_count(), 0);
        dag.add_action("step", ActionKind::StepSummary, ActionDraft::default(), None);
        assert_eq!(dag.get_step_count(), 1);
        // 4-node path to root (step, hi there, processing, hello) inclusive
        // of HEAD itself; get_branch_length counts ancestors only, so 3.
        assert_eq!(dag.get_branch_length(), 3);
    }

    #[test]
    fn actions_for_step_walks_back_to_root_in_forward_order() {
        let dag = dag_with_linear_chain();
        let step = dag.add_action("step", ActionKind::StepSummary, ActionDraft::default(), None);
        let actions = dag.get_actions_for_step(&step).unwrap();
        assert_eq!(actions.len(), 4);
        assert_eq!(actions[0].kind, ActionKind::UserInput);
        assert_eq!(actions[3].kind, ActionKind::StepSummary);
    }
}
