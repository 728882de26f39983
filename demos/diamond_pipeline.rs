use llm_flow::{
    Event, ExecCtx, FnEventHandler, Node, NodeStatus, Pipeline, PipelineExecutor, Provider, RunInputs,
    StaticCredentials, StreamChunk,
};
use std::io::Write;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("llm_flow=info")))
        .init();

    let model = std::env::var("OPENAI_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string());

    let pipeline = Pipeline::new()
        .node(Node::new("brief", Provider::OpenAi, &model, "Write a two-line brief about {{user.topic}}.").with_label("Brief"))
        .node(
            Node::new("pros", Provider::OpenAi, &model, "List three strengths of this idea:\n{{prev.brief}}")
                .with_label("Strengths"),
        )
        .node(
            Node::new("cons", Provider::OpenAi, &model, "List three risks of this idea:\n{{prev.brief}}")
                .with_label("Risks"),
        )
        .node(
            Node::new("verdict", Provider::OpenAi, &model, "Give a one-paragraph verdict for a {{global.audience}}.")
                .with_label("Verdict"),
        )
        .edge("brief", "pros")
        .edge("brief", "cons")
        .edge("pros", "verdict")
        .edge("cons", "verdict")
        .global("audience", "skeptical investor");

    let handler = FnEventHandler(|event: Event| match event {
        Event::LayerStart { index, nodes } => println!("\n--- layer {} : {} ---", index, nodes.join(", ")),
        Event::Chunk { node, chunk: StreamChunk { kind: llm_flow::ChunkKind::Text, content } } if node == "verdict" => {
            print!("{}", content);
            let _ = std::io::stdout().flush();
        }
        Event::NodeEnd { node, status } => println!("[{}] {:?}", node, status),
        _ => {}
    });

    let ctx = ExecCtx::builder()
        .credentials(Arc::new(StaticCredentials::from_env()))
        .event_handler(Arc::new(handler))
        .build()?;

    let mut inputs = RunInputs::new();
    inputs.insert("topic".into(), "a subscription service for houseplant care".into());

    let run = PipelineExecutor::new(ctx).run(&pipeline, &inputs).await?;

    println!("\n\n=== Summary ===");
    for (id, state) in run.states() {
        match state.status {
            NodeStatus::Success => println!("{:<8} ok   {:>5} tokens  {:?}", id, state.token_count, state.latency),
            status => println!("{:<8} {:?}: {}", id, status, state.error.as_deref().unwrap_or("-")),
        }
    }

    Ok(())
}
