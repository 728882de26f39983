use llm_flow::{validate_chat_payload, ChunkKind, Gateway, ReqwestTransport, StreamStatus};
use serde_json::json;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("llm_flow=debug")))
        .init();

    let api_key = std::env::var("ANTHROPIC_API_KEY")?;
    let payload = json!({
        "provider": "claude",
        "model": "claude-sonnet-4-5",
        "apiKey": api_key,
        "endpoint": std::env::var("ANTHROPIC_BASE_URL").ok(),
        "systemPrompt": "You are a patient physics tutor.",
        "userPrompt": "Why is the sky blue? Two paragraphs.",
        "effort": "high",
        "optimizePrompt": true
    });

    let request = validate_chat_payload(&serde_json::to_vec(&payload)?)?;
    let gateway = Gateway::new(Arc::new(ReqwestTransport::with_timeout(Duration::from_secs(120))?));

    let outcome = gateway
        .stream_chat("demo", &request, |chunk| match chunk.kind {
            ChunkKind::Thinking => eprint!("{}", chunk.content),
            ChunkKind::Text => {
                print!("{}", chunk.content);
                let _ = std::io::stdout().flush();
            }
            ChunkKind::Error => eprintln!("\n[error] {}", chunk.content),
            ChunkKind::Done => println!(),
        })
        .await;

    if let Some(prompt) = &outcome.optimized_prompt {
        println!("\n(prompt rewritten to {} chars)", prompt.chars().count());
    }
    match outcome.status {
        StreamStatus::Completed => println!("completed, {} chars", outcome.text.chars().count()),
        status => println!("{:?}: {}", status, outcome.error.unwrap_or_default()),
    }
    Ok(())
}
