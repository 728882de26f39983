//! Layered execution of a [`Pipeline`].
//!
//! ```text
//! validate ─► detect_cycles ─► topological_layers
//!                                   │
//!        ┌──────────── for each layer ────────────┐
//!        │ snapshot parent outputs from the Run    │
//!        │ scheduler: ≤ K node-tasks in flight     │
//!        │   credential ─► context ─► gateway      │
//!        │ barrier, then record outputs in the Run │
//!        └─────────────────────────────────────────┘
//! ```
//!
//! Parent outputs are copied into each task before its layer starts and
//! results are written after the layer settles, so the output map needs no
//! lock.

use crate::config::ParentFailurePolicy;
use crate::error::{FlowError, Result};
use crate::events::Event;
use crate::exec_ctx::ExecCtx;
use crate::gateway::{ChatRequest, Gateway, StreamStatus};
use crate::graph::{detect_cycles, topological_layers};
use crate::memory::{estimate_tokens, MemoryContext, ParentOutput};
use crate::prompt::render_template;
use crate::scheduler::{execute_layer_with_concurrency, TaskOutcome};
use crate::types::{Node, NodeState, NodeStatus, Pipeline, Run};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Caller-supplied values, exposed to templates as `{{user.key}}`.
pub type RunInputs = HashMap<String, String>;

pub const CYCLE_MESSAGE: &str = "Cycle detected: node is part of a dependency cycle";
pub const BLOCKED_MESSAGE: &str = "blocked by failed upstream";

fn upstream_failed(state: Option<&NodeState>) -> bool {
    match state {
        Some(s) => {
            s.status == NodeStatus::Error
                || (s.status == NodeStatus::Warning && s.error.as_deref() == Some(BLOCKED_MESSAGE))
        }
        None => false,
    }
}

/// Runs pipelines against the transport and credentials of an [`ExecCtx`].
///
/// Each run works under its own child of the context's cancellation token:
/// [`cancel`](Self::cancel) stops the runs in progress and leaves the
/// executor usable, while cancelling the context token stops it for good.
#[derive(Debug)]
pub struct PipelineExecutor {
    ctx: ExecCtx,
    gateway: Gateway,
    /// Parent of the tokens of runs started since the last `cancel`.
    runs: Mutex<CancellationToken>,
}

impl PipelineExecutor {
    pub fn new(ctx: ExecCtx) -> Self {
        let gateway = Gateway::from_ctx(&ctx);
        let runs = Mutex::new(ctx.cancel.child_token());
        Self { ctx, gateway, runs }
    }

    fn runs(&self) -> MutexGuard<'_, CancellationToken> {
        self.runs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn ctx(&self) -> &ExecCtx {
        &self.ctx
    }

    pub fn gateway(&self) -> &Gateway {
        &self.gateway
    }

    /// Stop every run in progress: in-flight node streams end `cancelled` and
    /// later layers do not start. Runs started afterwards are unaffected.
    pub fn cancel(&self) {
        let mut runs = self.runs();
        runs.cancel();
        *runs = self.ctx.cancel.child_token();
    }

    /// Execute `pipeline` once.
    ///
    /// Structural problems and cycles fail before anything is sent. Per-node
    /// failures are recorded in the returned [`Run`] and never abort the run.
    pub async fn run(&self, pipeline: &Pipeline, inputs: &RunInputs) -> Result<Run> {
        pipeline.validate()?;
        let cancel = self.runs().child_token();
        let mut run = Run::new(pipeline);

        let cyclic = detect_cycles(&pipeline.nodes, &pipeline.edges);
        if !cyclic.is_empty() {
            let nodes: Vec<String> = cyclic.into_iter().collect();
            for id in &nodes {
                run.set_state(id, NodeState::failed(CYCLE_MESSAGE));
            }
            warn!(?nodes, "pipeline rejected: dependency cycle");
            return Err(FlowError::Cycle {
                nodes,
                run: Box::new(run),
            });
        }

        let layers = topological_layers(&pipeline.nodes, &pipeline.edges);
        info!(
            nodes = pipeline.nodes.len(),
            layers = layers.len(),
            limit = self.ctx.config.concurrency_limit,
            "pipeline run started"
        );
        self.ctx.emit(Event::RunStart {
            nodes: pipeline.nodes.len(),
            layers: layers.len(),
        });

        for (index, layer) in layers.iter().enumerate() {
            if cancel.is_cancelled() {
                break;
            }
            self.run_layer(index, layer, pipeline, inputs, &cancel, &mut run).await?;
        }

        let cancelled = cancel.is_cancelled();
        info!(cancelled, "pipeline run finished");
        self.ctx.emit(Event::RunEnd { cancelled });
        Ok(run)
    }

    async fn run_layer(
        &self,
        index: usize,
        layer: &[String],
        pipeline: &Pipeline,
        inputs: &RunInputs,
        cancel: &CancellationToken,
        run: &mut Run,
    ) -> Result<()> {
        debug!(layer = index, size = layer.len(), "layer started");
        self.ctx.emit(Event::LayerStart {
            index,
            nodes: layer.to_vec(),
        });

        let mut scheduled: Vec<(&Node, Vec<ParentOutput>)> = Vec::with_capacity(layer.len());
        for id in layer {
            let Some(node) = pipeline.get(id) else {
                continue;
            };
            let parent_ids = pipeline.parents_of(id);

            if self.ctx.config.parent_failure == ParentFailurePolicy::Block
                && parent_ids.iter().any(|p| upstream_failed(run.state(p)))
            {
                debug!(node = %id, "skipping node: upstream failed");
                run.set_state(
                    id,
                    NodeState {
                        status: NodeStatus::Warning,
                        error: Some(BLOCKED_MESSAGE.to_string()),
                        ..NodeState::default()
                    },
                );
                self.ctx.emit(Event::NodeEnd {
                    node: id.clone(),
                    status: NodeStatus::Warning,
                });
                continue;
            }

            let parents = parent_ids
                .iter()
                .map(|p| {
                    let label = pipeline.get(p).map(|n| n.display_name()).unwrap_or(*p);
                    ParentOutput::new(*p, label, run.output(p).unwrap_or_default())
                })
                .collect();
            run.set_status(id, NodeStatus::Running);
            scheduled.push((node, parents));
        }

        let nodes: Vec<&Node> = scheduled.iter().map(|(n, _)| *n).collect();
        let tasks: Vec<_> = scheduled
            .into_iter()
            .map(|(node, parents)| move || self.run_node(node, parents, &pipeline.globals, inputs, cancel))
            .collect();
        let outcomes = execute_layer_with_concurrency(tasks, self.ctx.config.concurrency_limit).await;

        for (node, outcome) in nodes.into_iter().zip(outcomes) {
            let state = match outcome {
                TaskOutcome::Completed(state) => state,
                TaskOutcome::Failed(e) => NodeState::failed(e.to_string()),
                TaskOutcome::Panicked(msg) => NodeState::failed(format!("node task panicked: {}", msg)),
            };

            match state.status {
                NodeStatus::Error => {
                    warn!(node = %node.id, error = state.error.as_deref().unwrap_or(""), "node failed");
                }
                status => {
                    debug!(node = %node.id, ?status, tokens = state.token_count, "node settled");
                    run.record_output(&node.id, state.output.clone())?;
                }
            }

            self.ctx.emit(Event::NodeEnd {
                node: node.id.clone(),
                status: state.status,
            });
            run.set_state(&node.id, state);
        }

        self.ctx.emit(Event::LayerEnd { index });
        Ok(())
    }

    async fn run_node(
        &self,
        node: &Node,
        parents: Vec<ParentOutput>,
        globals: &BTreeMap<String, String>,
        inputs: &RunInputs,
        cancel: &CancellationToken,
    ) -> Result<NodeState> {
        if cancel.is_cancelled() {
            return Ok(NodeState {
                status: NodeStatus::Cancelled,
                ..NodeState::default()
            });
        }
        let started = Instant::now();
        self.ctx.emit(Event::NodeStart {
            node: node.id.clone(),
        });

        let api_key = self
            .ctx
            .credentials
            .secret(node.provider)
            .await
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| FlowError::MissingCredential(node.provider.to_string()))?;
        let endpoint = self.ctx.credentials.endpoint(node.provider).await;

        let memory = MemoryContext::build(&parents, globals, self.ctx.config.summary_max_chars);
        let vars = memory.template_vars(node, &parents, inputs);
        let rendered = render_template(&node.prompt_template, &vars);
        let user_prompt = memory.compose(&rendered, &node.prompt_template);
        debug!(
            node = %node.id,
            provider = %node.provider,
            model = %node.model,
            parents = parents.len(),
            context_tokens = estimate_tokens(&memory.l2),
            prompt_tokens = estimate_tokens(&user_prompt),
            "dispatching node"
        );

        let request = ChatRequest {
            provider: node.provider,
            model: node.model.clone(),
            api_key,
            endpoint,
            system_prompt: node.system_prompt.clone(),
            user_prompt,
            temperature: node.temperature,
            max_tokens: node.max_tokens,
            effort: node.effort,
            optimize_prompt: node.optimize_prompt,
        };
        request.validate()?;

        let outcome = self
            .gateway
            .stream_chat_under(&node.id, &request, cancel, |chunk| {
                self.ctx.emit(Event::Chunk {
                    node: node.id.clone(),
                    chunk: chunk.clone(),
                })
            })
            .await;

        if let Some(optimized) = &outcome.optimized_prompt {
            self.ctx.emit(Event::PromptOptimized {
                node: node.id.clone(),
                original_chars: request.user_prompt.chars().count(),
                optimized_chars: optimized.chars().count(),
            });
        }

        let status = match outcome.status {
            StreamStatus::Completed if outcome.text.trim().is_empty() => NodeStatus::Warning,
            StreamStatus::Completed => NodeStatus::Success,
            StreamStatus::Cancelled => NodeStatus::Cancelled,
            StreamStatus::Failed => NodeStatus::Error,
        };

        Ok(NodeState {
            status,
            token_count: estimate_tokens(&outcome.text),
            output: outcome.text,
            thinking: outcome.thinking,
            error: outcome.error,
            latency: Some(started.elapsed()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::credentials::StaticCredentials;
    use crate::events::FnEventHandler;
    use crate::transport::{MockResponse, MockTransport};
    use crate::types::Provider;
    use serde_json::{json, Value};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    fn node(id: &str, template: &str) -> Node {
        Node::new(id, Provider::OpenAi, id, template)
    }

    fn prompt_of(body: &Value) -> String {
        body["messages"]
            .as_array()
            .and_then(|m| m.last())
            .and_then(|m| m["content"].as_str())
            .unwrap_or_default()
            .to_string()
    }

    fn sse_text(text: &str) -> MockResponse {
        MockResponse::sse(&[json!({"choices": [{"delta": {"content": text}}]})])
    }

    /// Every node answers `out:<model>`; node ids double as model names.
    fn echo_transport() -> Arc<MockTransport> {
        Arc::new(MockTransport::new(|req| {
            let model = req.body.as_ref().and_then(|b| b["model"].as_str()).unwrap_or_default();
            Ok(sse_text(&format!("out:{}", model)))
        }))
    }

    fn executor(transport: Arc<MockTransport>, config: EngineConfig) -> PipelineExecutor {
        let ctx = ExecCtx::builder()
            .transport(transport)
            .credentials(Arc::new(
                StaticCredentials::new()
                    .with_secret(Provider::OpenAi, "sk-test")
                    .with_secret(Provider::Claude, "sk-ant"),
            ))
            .config(config)
            .build()
            .unwrap();
        PipelineExecutor::new(ctx)
    }

    fn diamond() -> Pipeline {
        Pipeline::new()
            .node(node("a", "Start with {{user.topic}}"))
            .node(node("b", "Expand: {{prev.a}}"))
            .node(node("c", "Critique: {{prev.a}}"))
            .node(node("d", "Merge {{prev.b}} and {{prev.c}}"))
            .edge("a", "b")
            .edge("a", "c")
            .edge("b", "d")
            .edge("c", "d")
    }

    fn inputs() -> RunInputs {
        let mut inputs = RunInputs::new();
        inputs.insert("topic".into(), "otters".into());
        inputs
    }

    #[tokio::test]
    async fn test_diamond_runs_in_layers() {
        let transport = echo_transport();
        let exec = executor(transport.clone(), EngineConfig::default());
        let run = exec.run(&diamond(), &inputs()).await.unwrap();

        for id in ["a", "b", "c", "d"] {
            assert_eq!(run.status(id), NodeStatus::Success, "node {}", id);
            assert_eq!(run.output(id), Some(format!("out:{}", id).as_str()));
        }

        let sent = transport.requests();
        assert_eq!(sent.len(), 4);
        let prompts: Vec<String> = sent.iter().map(|r| prompt_of(r.body.as_ref().unwrap())).collect();
        assert_eq!(prompts[0], "Start with otters");
        assert_eq!(prompts[3], "Merge out:b and out:c");

        let state = run.state("d").unwrap();
        assert!(state.latency.is_some());
        assert_eq!(state.token_count, 2);
    }

    #[tokio::test]
    async fn test_untemplated_context_is_prepended() {
        let transport = echo_transport();
        let exec = executor(transport.clone(), EngineConfig::default());
        let pipeline = Pipeline::new()
            .node(node("a", "Draft"))
            .node(node("b", "Polish it").with_label("Polisher"))
            .edge("a", "b")
            .global("audience", "children");

        exec.run(&pipeline, &RunInputs::new()).await.unwrap();
        let prompt = prompt_of(transport.requests()[1].body.as_ref().unwrap());
        assert_eq!(
            prompt,
            "## Global Facts\n1. audience: children\n\n## Upstream Context\n### [1] a\nout:a\n\n## Task\nPolish it"
        );
    }

    #[tokio::test]
    async fn test_cycle_rejected_before_sending() {
        let transport = echo_transport();
        let exec = executor(transport.clone(), EngineConfig::default());
        let pipeline = Pipeline::new()
            .node(node("root", "x"))
            .node(node("p", "x"))
            .node(node("q", "x"))
            .edge("root", "p")
            .edge("p", "q")
            .edge("q", "p");

        match exec.run(&pipeline, &RunInputs::new()).await {
            Err(FlowError::Cycle { nodes, run }) => {
                assert_eq!(nodes, vec!["p", "q"]);
                assert_eq!(run.status("p"), NodeStatus::Error);
                assert_eq!(run.state("q").unwrap().error.as_deref(), Some(CYCLE_MESSAGE));
                assert_eq!(run.status("root"), NodeStatus::Idle);
            }
            other => panic!("expected cycle, got {:?}", other.map(|_| ())),
        }
        assert!(transport.requests().is_empty());
    }

    #[tokio::test]
    async fn test_dangling_edge_is_invalid() {
        let exec = executor(echo_transport(), EngineConfig::default());
        let pipeline = Pipeline::new().node(node("a", "x")).edge("a", "ghost");
        let err = exec.run(&pipeline, &RunInputs::new()).await.unwrap_err();
        assert!(matches!(err, FlowError::InvalidPipeline(_)));
    }

    #[tokio::test]
    async fn test_missing_credential_isolated() {
        let transport = echo_transport();
        let exec = executor(transport.clone(), EngineConfig::default());
        let pipeline = Pipeline::new()
            .node(Node::new("g", Provider::Gemini, "gemini-2.0-flash", "x"))
            .node(node("ok", "x"))
            .node(node("child", "after [{{prev.g}}]"))
            .edge("g", "child");

        let run = exec.run(&pipeline, &RunInputs::new()).await.unwrap();
        assert_eq!(run.status("g"), NodeStatus::Error);
        assert!(run.state("g").unwrap().error.as_deref().unwrap().contains("gemini"));
        assert_eq!(run.output("g"), None);
        assert_eq!(run.status("ok"), NodeStatus::Success);
        // errored parent contributes an empty slot
        assert_eq!(run.status("child"), NodeStatus::Success);
        let last = transport.requests().pop().unwrap();
        assert_eq!(prompt_of(last.body.as_ref().unwrap()), "after []");
    }

    #[tokio::test]
    async fn test_block_policy_skips_dependents() {
        let transport = Arc::new(MockTransport::new(|req| {
            let model = req.body.as_ref().and_then(|b| b["model"].as_str()).unwrap_or_default();
            if model == "bad" {
                Ok(MockResponse::status(500, "upstream exploded"))
            } else {
                Ok(sse_text("fine"))
            }
        }));
        let config = EngineConfig::default().with_parent_failure(ParentFailurePolicy::Block);
        let exec = executor(transport.clone(), config);
        let pipeline = Pipeline::new()
            .node(node("bad", "x"))
            .node(node("mid", "x"))
            .node(node("leaf", "x"))
            .node(node("other", "x"))
            .edge("bad", "mid")
            .edge("mid", "leaf");

        let run = exec.run(&pipeline, &RunInputs::new()).await.unwrap();
        assert_eq!(run.status("bad"), NodeStatus::Error);
        assert!(run.state("bad").unwrap().error.as_deref().unwrap().contains("HTTP 500"));
        assert_eq!(run.status("mid"), NodeStatus::Warning);
        assert_eq!(run.state("leaf").unwrap().error.as_deref(), Some(BLOCKED_MESSAGE));
        assert_eq!(run.status("other"), NodeStatus::Success);
        assert_eq!(transport.requests().len(), 2);
    }

    #[tokio::test]
    async fn test_empty_output_is_warning() {
        let transport = Arc::new(MockTransport::fixed(MockResponse::sse(&[])));
        let exec = executor(transport, EngineConfig::default());
        let run = exec
            .run(&Pipeline::new().node(node("quiet", "x")), &RunInputs::new())
            .await
            .unwrap();
        assert_eq!(run.status("quiet"), NodeStatus::Warning);
        assert_eq!(run.output("quiet"), Some(""));
        assert_eq!(run.state("quiet").unwrap().error, None);
    }

    #[tokio::test]
    async fn test_claude_thinking_recorded() {
        let transport = Arc::new(MockTransport::fixed(MockResponse::sse(&[
            json!({"type": "content_block_delta", "delta": {"type": "thinking_delta", "thinking": "hmm"}}),
            json!({"type": "content_block_delta", "delta": {"type": "text_delta", "text": "done"}}),
        ])));
        let exec = executor(transport.clone(), EngineConfig::default());
        let pipeline = Pipeline::new().node(
            Node::new("deep", Provider::Claude, "claude-sonnet", "think").with_effort(crate::types::Effort::High),
        );
        let run = exec.run(&pipeline, &RunInputs::new()).await.unwrap();
        let state = run.state("deep").unwrap();
        assert_eq!(state.output, "done");
        assert_eq!(state.thinking, "hmm");

        let sent = &transport.requests()[0];
        assert_eq!(sent.url, "https://api.anthropic.com/v1/messages");
        assert_eq!(sent.body.as_ref().unwrap()["thinking"]["budget_tokens"], 5000);
    }

    #[tokio::test]
    async fn test_concurrency_limit_bounds_layer() {
        let transport = Arc::new(
            MockTransport::fixed(sse_text("x")).with_delay(Duration::from_millis(40)),
        );
        let exec = executor(transport, EngineConfig::default().with_concurrency_limit(2));
        let mut pipeline = Pipeline::new();
        for i in 0..4 {
            pipeline = pipeline.node(node(&format!("n{}", i), "x"));
        }

        let started = Instant::now();
        let run = exec.run(&pipeline, &RunInputs::new()).await.unwrap();
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(80), "elapsed {:?}", elapsed);
        assert!(run.states().values().all(|s| s.status == NodeStatus::Success));
    }

    #[tokio::test]
    async fn test_cancel_keeps_partial_and_stops_later_layers() {
        let transport = Arc::new(MockTransport::new(|_| {
            Ok(MockResponse::chunks(
                200,
                ["data: {\"choices\":[{\"delta\":{\"content\":\"half\"}}]}\n\n"],
            )
            .then_hang())
        }));
        let exec = Arc::new(executor(transport.clone(), EngineConfig::default()));
        let pipeline = Pipeline::new()
            .node(node("slow", "x"))
            .node(node("next", "x"))
            .edge("slow", "next");

        let canceller = exec.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            canceller.cancel();
        });

        let run = exec.run(&pipeline, &RunInputs::new()).await.unwrap();
        assert_eq!(run.status("slow"), NodeStatus::Cancelled);
        assert_eq!(run.state("slow").unwrap().output, "half");
        assert_eq!(run.status("next"), NodeStatus::Idle);
        assert_eq!(transport.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_event_sequence() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let ctx = ExecCtx::builder()
            .transport(echo_transport())
            .credentials(Arc::new(StaticCredentials::new().with_secret(Provider::OpenAi, "k")))
            .event_handler(Arc::new(FnEventHandler(move |e: Event| {
                let tag = match e {
                    Event::RunStart { layers, .. } => format!("run:{}", layers),
                    Event::LayerStart { index, .. } => format!("layer:{}", index),
                    Event::NodeStart { node } => format!("start:{}", node),
                    Event::Chunk { chunk, .. } if chunk.is_done() => "done".to_string(),
                    Event::Chunk { chunk, .. } => format!("chunk:{}", chunk.content),
                    Event::NodeEnd { node, status } => format!("end:{}:{:?}", node, status),
                    Event::LayerEnd { index } => format!("/layer:{}", index),
                    Event::RunEnd { cancelled } => format!("/run:{}", cancelled),
                    Event::PromptOptimized { .. } => "optimized".to_string(),
                };
                sink.lock().unwrap().push(tag);
            })))
            .build()
            .unwrap();
        let exec = PipelineExecutor::new(ctx);
        let pipeline = Pipeline::new()
            .node(node("a", "x"))
            .node(node("b", "y"))
            .edge("a", "b");
        exec.run(&pipeline, &RunInputs::new()).await.unwrap();

        let events = events.lock().unwrap();
        assert_eq!(
            *events,
            vec![
                "run:2", "layer:0", "start:a", "chunk:out:a", "done", "end:a:Success", "/layer:0",
                "layer:1", "start:b", "chunk:out:b", "done", "end:b:Success", "/layer:1", "/run:false",
            ]
        );
    }

    #[tokio::test]
    async fn test_out_of_bounds_node_fails_without_sending() {
        let transport = echo_transport();
        let exec = executor(transport.clone(), EngineConfig::default());
        let pipeline = Pipeline::new()
            .node(
                Node::new("hot", Provider::OpenAi, "", "x")
                    .with_temperature(9.0)
                    .with_max_tokens(0),
            )
            .node(node("big", &"a".repeat(200 * 1024)))
            .node(node("fine", "x"));

        let run = exec.run(&pipeline, &RunInputs::new()).await.unwrap();
        for id in ["hot", "big"] {
            let state = run.state(id).unwrap();
            assert_eq!(state.status, NodeStatus::Error, "node {}", id);
            assert!(state.error.as_deref().unwrap().starts_with("Invalid request (400)"));
            assert_eq!(run.output(id), None);
        }
        assert!(run.state("big").unwrap().error.as_deref().unwrap().contains("userPrompt"));
        assert_eq!(run.status("fine"), NodeStatus::Success);

        let sent = transport.requests();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].body.as_ref().unwrap()["model"], "fine");
    }

    #[tokio::test]
    async fn test_diamond_siblings_overlap_and_join_waits() {
        let log: Arc<Mutex<Vec<(String, Instant)>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = log.clone();
        let transport = Arc::new(
            MockTransport::new(|req| {
                let model = req.body.as_ref().and_then(|b| b["model"].as_str()).unwrap_or_default();
                Ok(sse_text(&format!("out:{}", model)))
            })
            .with_delay(Duration::from_millis(40)),
        );
        let ctx = ExecCtx::builder()
            .transport(transport)
            .credentials(Arc::new(StaticCredentials::new().with_secret(Provider::OpenAi, "k")))
            .config(EngineConfig::default().with_concurrency_limit(2))
            .event_handler(Arc::new(FnEventHandler(move |e: Event| {
                let tag = match e {
                    Event::NodeStart { node } => format!("start:{}", node),
                    Event::Chunk { node, chunk } if chunk.is_done() => format!("done:{}", node),
                    Event::NodeEnd { node, .. } => format!("end:{}", node),
                    _ => return,
                };
                sink.lock().unwrap().push((tag, Instant::now()));
            })))
            .build()
            .unwrap();
        let run = PipelineExecutor::new(ctx).run(&diamond(), &inputs()).await.unwrap();
        assert!(run.states().values().all(|s| s.status == NodeStatus::Success));

        let log = log.lock().unwrap();
        let at = |tag: &str| {
            log.iter()
                .position(|(t, _)| t == tag)
                .map(|i| (i, log[i].1))
                .unwrap_or_else(|| panic!("missing event {}", tag))
        };

        // siblings: each starts before the other finishes streaming
        assert!(at("start:c").0 < at("done:b").0);
        assert!(at("start:b").0 < at("done:c").0);
        assert!(at("start:c").1 < at("done:b").1);

        // join: starts only once both siblings have settled
        let start_d = at("start:d");
        for parent in ["end:b", "end:c"] {
            let end = at(parent);
            assert!(end.0 < start_d.0, "{} after start:d", parent);
            assert!(end.1 <= start_d.1);
        }
    }

    #[tokio::test]
    async fn test_cancel_only_stops_current_run() {
        let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = calls.clone();
        let transport = Arc::new(MockTransport::new(move |_| {
            if counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst) == 0 {
                Ok(MockResponse::chunks(200, Vec::<String>::new()).then_hang())
            } else {
                Ok(sse_text("again"))
            }
        }));
        let exec = Arc::new(executor(transport, EngineConfig::default()));
        let pipeline = Pipeline::new().node(node("only", "x"));

        let canceller = exec.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });
        let first = exec.run(&pipeline, &RunInputs::new()).await.unwrap();
        assert_eq!(first.status("only"), NodeStatus::Cancelled);

        let second = exec.run(&pipeline, &RunInputs::new()).await.unwrap();
        assert_eq!(second.status("only"), NodeStatus::Success);
        assert_eq!(second.output("only"), Some("again"));
        assert!(!exec.ctx().is_cancelled());
    }
}
