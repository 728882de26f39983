//! Pipeline data model: nodes, edges, the pipeline itself and per-run state.
//!
//! A [`Pipeline`] is authored elsewhere and handed to the executor as an
//! immutable value. Everything that changes while it executes lives in a
//! [`Run`], which is created fresh for every execution and discarded after.

use crate::error::{FlowError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::time::Duration;

/// Supported chat backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    /// OpenAI chat completions and every compatible relay.
    OpenAi,
    /// Anthropic messages API.
    Claude,
    /// Google Gemini `generateContent` API.
    Gemini,
}

impl Provider {
    /// All providers, in declaration order.
    pub const ALL: [Provider; 3] = [Provider::OpenAi, Provider::Claude, Provider::Gemini];

    /// Wire name used in payloads and configuration files.
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::OpenAi => "openai",
            Provider::Claude => "claude",
            Provider::Gemini => "gemini",
        }
    }

    /// Parse a wire name. Returns `None` for anything outside the closed set.
    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.as_str() == name)
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse reasoning-intensity knob.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Effort {
    Low,
    #[default]
    Medium,
    High,
    Max,
}

impl Effort {
    pub const ALL: [Effort; 4] = [Effort::Low, Effort::Medium, Effort::High, Effort::Max];

    pub fn as_str(&self) -> &'static str {
        match self {
            Effort::Low => "low",
            Effort::Medium => "medium",
            Effort::High => "high",
            Effort::Max => "max",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|e| e.as_str() == name)
    }

    /// Extended-reasoning token budget, for backends that support one.
    pub fn thinking_budget(&self) -> Option<u32> {
        match self {
            Effort::High => Some(5_000),
            Effort::Max => Some(10_000),
            Effort::Low | Effort::Medium => None,
        }
    }
}

fn default_temperature() -> f64 {
    0.7
}

fn default_max_tokens() -> u32 {
    4096
}

/// One configured model invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    /// Unique id within the pipeline.
    pub id: String,
    /// Human-readable name used in context headers. Falls back to `id`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub provider: Provider,
    pub model: String,
    #[serde(default)]
    pub system_prompt: String,
    /// User prompt with `{{namespace.key}}` placeholders.
    #[serde(default, alias = "prompt")]
    pub prompt_template: String,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default)]
    pub effort: Effort,
    /// Run the prompt-optimization pre-pass before the main call.
    #[serde(default)]
    pub optimize_prompt: bool,
}

impl Node {
    pub fn new(
        id: impl Into<String>,
        provider: Provider,
        model: impl Into<String>,
        prompt_template: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            label: None,
            provider,
            model: model.into(),
            system_prompt: String::new(),
            prompt_template: prompt_template.into(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            effort: Effort::default(),
            optimize_prompt: false,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system_prompt = system.into();
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_effort(mut self, effort: Effort) -> Self {
        self.effort = effort;
        self
    }

    pub fn with_optimize_prompt(mut self, enabled: bool) -> Self {
        self.optimize_prompt = enabled;
        self
    }

    /// Label if set, id otherwise.
    pub fn display_name(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.id)
    }
}

/// Directed dependency: `target`'s prompt may consume `source`'s output.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Edge {
    pub source: String,
    pub target: String,
}

impl Edge {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
        }
    }
}

/// Node set, edge set and the global facts visible to every node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Pipeline {
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub edges: Vec<Edge>,
    /// L3 context, exposed to templates as `{{global.key}}`.
    #[serde(default)]
    pub globals: BTreeMap<String, String>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node (builder style).
    pub fn node(mut self, node: Node) -> Self {
        self.nodes.push(node);
        self
    }

    /// Add an edge `source -> target` (builder style).
    pub fn edge(mut self, source: impl Into<String>, target: impl Into<String>) -> Self {
        self.edges.push(Edge::new(source, target));
        self
    }

    /// Add a global fact (builder style).
    pub fn global(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.globals.insert(key.into(), value.into());
        self
    }

    /// Look up a node by id.
    pub fn get(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Ids of the nodes feeding `id`, in edge declaration order, without repeats.
    pub fn parents_of(&self, id: &str) -> Vec<&str> {
        let mut seen = HashSet::new();
        self.edges
            .iter()
            .filter(|e| e.target == id)
            .map(|e| e.source.as_str())
            .filter(|s| seen.insert(*s))
            .collect()
    }

    /// Check structural invariants: non-empty unique ids and no dangling edges.
    ///
    /// Every problem found is reported at once. Acyclicity is checked
    /// separately by [`detect_cycles`](crate::graph::detect_cycles).
    pub fn validate(&self) -> Result<()> {
        let mut problems = Vec::new();
        let mut ids = HashSet::new();

        for node in &self.nodes {
            if node.id.trim().is_empty() {
                problems.push("node with empty id".to_string());
            } else if !ids.insert(node.id.as_str()) {
                problems.push(format!("duplicate node id '{}'", node.id));
            }
        }

        for edge in &self.edges {
            for endpoint in [&edge.source, &edge.target] {
                if !ids.contains(endpoint.as_str()) {
                    problems.push(format!(
                        "edge {} -> {} references unknown node '{}'",
                        edge.source, edge.target, endpoint
                    ));
                }
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(FlowError::InvalidPipeline(problems.join("; ")))
        }
    }

    /// Parse a pipeline definition from JSON.
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Parse a pipeline definition from YAML.
    #[cfg(feature = "yaml")]
    pub fn from_yaml(text: &str) -> Result<Self> {
        serde_yaml::from_str(text).map_err(|e| FlowError::InvalidConfig(e.to_string()))
    }
}

/// Execution status of a node within a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    #[default]
    Idle,
    Running,
    Success,
    Error,
    /// Finished without usable output, or skipped because an upstream failed.
    Warning,
    /// Stopped by cancellation; partial output is kept.
    Cancelled,
}

impl NodeStatus {
    /// Whether the node has finished, one way or another.
    pub fn is_settled(&self) -> bool {
        !matches!(self, NodeStatus::Idle | NodeStatus::Running)
    }
}

/// Transient per-node fields populated while a run executes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeState {
    pub status: NodeStatus,
    pub output: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub thinking: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub token_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency: Option<Duration>,
}

impl NodeState {
    pub(crate) fn failed(message: impl Into<String>) -> Self {
        Self {
            status: NodeStatus::Error,
            error: Some(message.into()),
            ..Self::default()
        }
    }
}

/// Ephemeral state of one pipeline execution.
///
/// Outputs are write-once: each node records its final output exactly once,
/// after which later layers only read it.
#[derive(Debug, Clone, Default)]
pub struct Run {
    outputs: HashMap<String, String>,
    states: BTreeMap<String, NodeState>,
}

impl Run {
    /// A fresh run with every node of `pipeline` idle.
    pub fn new(pipeline: &Pipeline) -> Self {
        Self {
            outputs: HashMap::new(),
            states: pipeline
                .nodes
                .iter()
                .map(|n| (n.id.clone(), NodeState::default()))
                .collect(),
        }
    }

    /// Record a node's final output. Fails if one was already recorded.
    pub fn record_output(&mut self, id: &str, output: impl Into<String>) -> Result<()> {
        if self.outputs.contains_key(id) {
            return Err(FlowError::Other(format!(
                "output for node '{}' already recorded",
                id
            )));
        }
        self.outputs.insert(id.to_string(), output.into());
        Ok(())
    }

    /// Final output of a node, if it recorded one.
    pub fn output(&self, id: &str) -> Option<&str> {
        self.outputs.get(id).map(|s| s.as_str())
    }

    pub fn outputs(&self) -> &HashMap<String, String> {
        &self.outputs
    }

    pub fn state(&self, id: &str) -> Option<&NodeState> {
        self.states.get(id)
    }

    pub fn states(&self) -> &BTreeMap<String, NodeState> {
        &self.states
    }

    pub fn status(&self, id: &str) -> NodeStatus {
        self.states.get(id).map(|s| s.status).unwrap_or_default()
    }

    pub(crate) fn set_state(&mut self, id: &str, state: NodeState) {
        self.states.insert(id.to_string(), state);
    }

    pub(crate) fn set_status(&mut self, id: &str, status: NodeStatus) {
        self.states.entry(id.to_string()).or_default().status = status;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: &str) -> Node {
        Node::new(id, Provider::OpenAi, "gpt-4o", "Say hi")
    }

    #[test]
    fn test_provider_wire_names() {
        assert_eq!(Provider::parse("openai"), Some(Provider::OpenAi));
        assert_eq!(Provider::parse("claude"), Some(Provider::Claude));
        assert_eq!(Provider::parse("gemini"), Some(Provider::Gemini));
        assert_eq!(Provider::parse("ollama"), None);
        assert_eq!(serde_json::to_string(&Provider::OpenAi).unwrap(), "\"openai\"");
    }

    #[test]
    fn test_effort_budgets() {
        assert_eq!(Effort::Low.thinking_budget(), None);
        assert_eq!(Effort::Medium.thinking_budget(), None);
        assert_eq!(Effort::High.thinking_budget(), Some(5_000));
        assert_eq!(Effort::Max.thinking_budget(), Some(10_000));
    }

    #[test]
    fn test_validate_accepts_well_formed() {
        let p = Pipeline::new().node(node("a")).node(node("b")).edge("a", "b");
        assert!(p.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_duplicates_and_dangling() {
        let p = Pipeline::new()
            .node(node("a"))
            .node(node("a"))
            .edge("a", "ghost");
        let err = p.validate().unwrap_err().to_string();
        assert!(err.contains("duplicate node id 'a'"));
        assert!(err.contains("unknown node 'ghost'"));
    }

    #[test]
    fn test_parents_in_declaration_order() {
        let p = Pipeline::new()
            .node(node("a"))
            .node(node("b"))
            .node(node("c"))
            .edge("b", "c")
            .edge("a", "c")
            .edge("b", "c");
        assert_eq!(p.parents_of("c"), vec!["b", "a"]);
        assert!(p.parents_of("a").is_empty());
    }

    #[test]
    fn test_pipeline_from_json_defaults() {
        let p = Pipeline::from_json(
            r#"{
                "nodes": [
                    {"id": "a", "provider": "claude", "model": "claude-sonnet-4", "prompt": "Hi"}
                ],
                "globals": {"tone": "formal"}
            }"#,
        )
        .unwrap();
        let a = p.get("a").unwrap();
        assert_eq!(a.provider, Provider::Claude);
        assert_eq!(a.prompt_template, "Hi");
        assert_eq!(a.temperature, 0.7);
        assert_eq!(a.max_tokens, 4096);
        assert_eq!(a.effort, Effort::Medium);
        assert!(p.edges.is_empty());
        assert_eq!(p.globals["tone"], "formal");
    }

    #[test]
    fn test_run_outputs_are_write_once() {
        let p = Pipeline::new().node(node("a"));
        let mut run = Run::new(&p);
        assert_eq!(run.status("a"), NodeStatus::Idle);
        run.record_output("a", "first").unwrap();
        assert!(run.record_output("a", "second").is_err());
        assert_eq!(run.output("a"), Some("first"));
    }
}
