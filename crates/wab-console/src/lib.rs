//! Console adapter.
//!
//! Implements the `wab-core` TransportPort over stdin/stdout: each stdin line
//! becomes one inbound envelope attributed to the first configured owner, and
//! outbound sends are printed. Useful for local operation and for exercising
//! the router without a live messaging session.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;

use wab_core::{
    domain::Jid,
    messaging::{port::TransportPort, types::MessageEnvelope},
    router::Router,
    Result,
};

#[derive(Clone, Default)]
pub struct ConsoleTransport;

impl ConsoleTransport {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl TransportPort for ConsoleTransport {
    async fn send_text(&self, to: &Jid, text: &str) -> Result<()> {
        println!("[-> {to}]\n{text}");
        Ok(())
    }
}

/// Read stdin until EOF or cancellation, dispatching each non-empty line as
/// a message from `sender`. Lines are handled concurrently; the router's
/// fault boundary keeps one bad line from affecting the next.
pub async fn run_stdin_loop(
    sender: Jid,
    router: Arc<Router>,
    transport: Arc<ConsoleTransport>,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let stdin = BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();

    loop {
        let line = tokio::select! {
            _ = shutdown.cancelled() => break,
            line = lines.next_line() => line?,
        };
        let Some(line) = line else {
            break; // EOF
        };
        if line.trim().is_empty() {
            continue;
        }

        let envelope = MessageEnvelope::text(sender.clone(), line);
        let router = Arc::clone(&router);
        let transport = Arc::clone(&transport);
        tokio::spawn(async move {
            router.handle(transport.as_ref(), &envelope).await;
        });
    }

    Ok(())
}
