use std::io::Write;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use clap::Args;
use devmate_config::{Config, ServerConfig};
use devmate_core::relay::{self, StreamOutcome};
use devmate_core::request::ChatRequestBody;
use devmate_core::{ChatResponse, ChatSession, ChatStats, ErrorBody, HistoryStore, ModelId};
use tokio_util::sync::CancellationToken;

#[derive(Args, Debug)]
pub struct ChatArgs {
    /// The prompt to send
    pub prompt: String,

    /// System message
    #[arg(short, long)]
    pub system: Option<String>,

    /// Model to use (gpt-4o, gpt-4o-mini)
    #[arg(short, long)]
    pub model: Option<String>,

    /// Wait for the whole reply instead of streaming it
    #[arg(long)]
    pub no_stream: bool,

    /// Server base URL (defaults to the configured host and port)
    #[arg(long)]
    pub server: Option<String>,

    /// Append to an existing session instead of starting a new one
    #[arg(long)]
    pub session: Option<String>,
}

enum Reply {
    Done(String, ChatStats),
    Cancelled,
}

pub async fn run(config: &Config, args: &ChatArgs, store: &dyn HistoryStore) -> Result<()> {
    let model = args.model.as_deref().map(str::parse::<ModelId>).transpose()?;

    let mut session = match &args.session {
        Some(id) => Some(store.get(id).with_context(|| format!("no saved session '{id}'"))?),
        None => None,
    };

    let base = args
        .server
        .clone()
        .unwrap_or_else(|| server_url(&config.server));
    let body = ChatRequestBody {
        prompt: args.prompt.clone(),
        system: args.system.clone(),
        model,
        stream: Some(!args.no_stream),
    };

    let cancel = CancellationToken::new();
    let ctrl_c = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        })
    };

    let reply = send(&base, &body, &cancel).await;
    ctrl_c.abort();

    let (content, stats) = match reply? {
        Reply::Done(content, stats) => (content, stats),
        Reply::Cancelled => {
            eprintln!("Request cancelled");
            return Ok(());
        }
    };
    eprintln!("({} ms, ~{} tokens)", stats.latency_ms, stats.approximate_tokens);

    let session = session.get_or_insert_with(|| {
        ChatSession::new(
            store.generate_id(),
            &args.prompt,
            model.unwrap_or_default(),
            args.system.clone().filter(|s| !s.is_empty()),
        )
    });
    session.record_exchange(&args.prompt, &content);
    store.save(session);
    tracing::debug!(id = %session.id, "Session saved");
    eprintln!("Session: {}", session.id);

    Ok(())
}

async fn send(base: &str, body: &ChatRequestBody, cancel: &CancellationToken) -> Result<Reply> {
    let started = Instant::now();
    let url = format!("{}/chat", base.trim_end_matches('/'));
    let request = reqwest::Client::new().post(&url).json(body).send();

    let resp = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Ok(Reply::Cancelled),
        resp = request => resp.with_context(|| format!("failed to reach {url}"))?,
    };

    let status = resp.status();
    if !status.is_success() {
        let text = resp.text().await.unwrap_or_default();
        let err = serde_json::from_str::<ErrorBody>(&text).unwrap_or_else(|_| ErrorBody {
            error: status.to_string(),
            message: text,
        });
        bail!("{}: {}", err.error, err.message);
    }

    if body.stream == Some(false) {
        let reply: ChatResponse = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(Reply::Cancelled),
            reply = resp.json() => reply.context("invalid chat response")?,
        };
        println!("{}", reply.content);
        return Ok(Reply::Done(reply.content.clone(), reply.stats()));
    }

    let mut printed = 0;
    let outcome = relay::consume(resp.bytes_stream(), started, cancel, |text| {
        print!("{}", &text[printed..]);
        let _ = std::io::stdout().flush();
        printed = text.len();
    })
    .await?;
    println!();

    match outcome {
        StreamOutcome::Completed { content, stats } => Ok(Reply::Done(content, stats)),
        StreamOutcome::Cancelled { .. } => Ok(Reply::Cancelled),
        StreamOutcome::Interrupted { partial } => {
            bail!(
                "stream ended before the reply was complete ({} chars received)",
                partial.chars().count()
            )
        }
    }
}

/// A wildcard bind address is reached through loopback.
fn server_url(server: &ServerConfig) -> String {
    let host = match server.host.as_str() {
        "0.0.0.0" | "::" | "" => "127.0.0.1",
        other => other,
    };
    format!("http://{host}:{}", server.port)
}
