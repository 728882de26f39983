//! # LLM Flow
//!
//! Execution engine for directed acyclic pipelines of LLM calls.
//!
//! A [`Pipeline`] is a set of [`Node`]s (one model invocation each) joined by
//! dependency edges. The [`PipelineExecutor`] rejects cycles, groups the nodes
//! into topological layers and runs each layer with bounded concurrency.
//! Every node sees its parents' outputs through a layered context and streams
//! its answer from OpenAI, Claude, Gemini or an OpenAI-compatible relay.
//!
//! ## Core Concepts
//!
//! - **[`Pipeline`] / [`Run`]**: the immutable graph and the per-execution
//!   outputs and node states.
//! - **[`ExecCtx`]**: transport, credential store, engine configuration,
//!   cancellation and an optional [`EventHandler`].
//! - **[`Gateway`]**: validates a chat payload, optionally rewrites the prompt,
//!   and streams normalized [`StreamChunk`]s from one provider call.
//! - **[`Transport`]**: the HTTP seam. [`ReqwestTransport`] in production,
//!   [`MockTransport`] in tests.
//!
//! ## Quick Start
//!
//! ```no_run
//! use llm_flow::{ExecCtx, Node, Pipeline, PipelineExecutor, Provider, RunInputs, StaticCredentials};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let ctx = ExecCtx::builder()
//!         .credentials(Arc::new(StaticCredentials::from_env()))
//!         .build()?;
//!
//!     let pipeline = Pipeline::new()
//!         .node(Node::new("facts", Provider::OpenAi, "gpt-4o-mini", "List facts about {{user.topic}}"))
//!         .node(Node::new("poem", Provider::Claude, "claude-sonnet-4-5", "Write a poem from: {{prev.facts}}"))
//!         .edge("facts", "poem");
//!
//!     let mut inputs = RunInputs::new();
//!     inputs.insert("topic".into(), "otters".into());
//!
//!     let run = PipelineExecutor::new(ctx).run(&pipeline, &inputs).await?;
//!     println!("{}", run.output("poem").unwrap_or_default());
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod config;
pub mod correlate;
pub mod credentials;
pub mod error;
pub mod events;
pub mod exec_ctx;
pub mod executor;
pub mod gateway;
pub mod graph;
pub mod memory;
pub mod models;
pub mod prompt;
pub mod scheduler;
pub mod stream;
pub mod transport;
pub mod types;

pub use backend::{AdapterConfig, Dialect};
pub use config::{EngineConfig, ParentFailurePolicy};
pub use correlate::Correlator;
pub use credentials::{CredentialStore, StaticCredentials};
pub use error::{FlowError, Result};
pub use events::{Event, EventHandler, FnEventHandler};
pub use exec_ctx::{ExecCtx, ExecCtxBuilder};
pub use executor::{PipelineExecutor, RunInputs};
pub use gateway::{validate_chat_payload, ChatRequest, Gateway, StreamOutcome, StreamSlots, StreamStatus};
pub use graph::{detect_cycles, topological_layers};
pub use memory::{MemoryContext, ParentOutput};
pub use models::{list_models, ModelListing};
pub use scheduler::{execute_layer_with_concurrency, TaskOutcome};
pub use stream::{normalize_stream, ChunkKind, StreamChunk, StreamEnd};
pub use transport::{HttpResponse, MockResponse, MockTransport, ReqwestTransport, Transport};
pub use types::{Edge, Effort, Node, NodeState, NodeStatus, Pipeline, Provider, Run};
