//! Privileged execution gate.
//!
//! The shell and eval triggers are an owner-only debug surface. The owner
//! check happens before the payload is even looked at, and every outcome —
//! success, captured error, timeout — flows back through a single reply
//! path so the caller always receives exactly one result message.
//!
//! This is deliberately dangerous for the owner; it is not a sandbox for
//! untrusted input.

use std::{process::Stdio, sync::Arc};

use serde_json::json;
use tokio::{
    io::{AsyncRead, AsyncReadExt},
    process::{Child, Command as ShellCommand},
};
use tokio_util::sync::CancellationToken;

use crate::{
    config::Config,
    errors::Error,
    eval::{self, Scope, Value},
    formatting::{format_result, format_stderr, truncate_chars},
    logging::Logger,
    messaging::{port::TransportPort, types::MessageEnvelope},
    Result,
};

/// What the privileged trigger asked for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExecMode {
    /// `$ ` — run the payload as a shell command.
    Shell,
    /// `=> ` — evaluate the payload as a single expression and report it.
    EvalReturn,
    /// `> ` — run the payload as a statement program.
    EvalStatement,
}

struct ShellOutput {
    stdout: String,
    stderr: String,
}

pub struct ExecGate {
    cfg: Arc<Config>,
    logger: Arc<Logger>,
    shutdown: CancellationToken,
}

impl ExecGate {
    pub fn new(cfg: Arc<Config>, logger: Arc<Logger>, shutdown: CancellationToken) -> Self {
        Self {
            cfg,
            logger,
            shutdown,
        }
    }

    /// Entry point for all privileged triggers. Fails closed: the owner
    /// check runs before the payload is inspected.
    pub async fn handle(
        &self,
        transport: &dyn TransportPort,
        envelope: &MessageEnvelope,
        mode: ExecMode,
        payload: &str,
    ) -> Result<()> {
        let requester = envelope.requester();
        if !self.cfg.is_owner(requester) {
            self.logger.info_meta(
                "Unauthorized privileged request",
                json!({ "sender": requester.as_str() }),
            );
            return transport
                .send_text(&envelope.sender, &self.cfg.messages.unauthorized)
                .await;
        }

        match mode {
            ExecMode::Shell => self.run_shell(transport, envelope, payload).await,
            ExecMode::EvalReturn => self.run_eval(transport, envelope, payload, true).await,
            ExecMode::EvalStatement => self.run_eval(transport, envelope, payload, false).await,
        }
    }

    async fn run_shell(
        &self,
        transport: &dyn TransportPort,
        envelope: &MessageEnvelope,
        payload: &str,
    ) -> Result<()> {
        let to = &envelope.sender;
        transport
            .send_text(to, &self.cfg.messages.processing)
            .await?;
        self.logger.info(&format!("Executing command: {payload}"));

        match self.spawn_shell(payload).await {
            Ok(output) => {
                let limit = self.cfg.reply_safe_limit;
                let mut replied = false;
                if !output.stdout.is_empty() {
                    transport
                        .send_text(to, &format_result(&output.stdout, limit))
                        .await?;
                    replied = true;
                }
                if !output.stderr.is_empty() {
                    transport
                        .send_text(to, &format_stderr(&output.stderr, limit))
                        .await?;
                    replied = true;
                }
                if !replied {
                    transport
                        .send_text(to, &self.cfg.messages.no_output)
                        .await?;
                }
                Ok(())
            }
            Err(e) => {
                self.logger.error_meta(
                    "Error executing command",
                    json!({ "command": payload, "error": e.to_string() }),
                );
                transport
                    .send_text(to, &format!("❌ Execution failed:\n\n{e}"))
                    .await
            }
        }
    }

    async fn spawn_shell(&self, payload: &str) -> Result<ShellOutput> {
        let mut child = ShellCommand::new("sh")
            .arg("-c")
            .arg(payload)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let cap = self.cfg.shell_output_limit;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Exec("stdout was not captured".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::Exec("stderr was not captured".to_string()))?;

        // Drain both pipes concurrently so a full pipe cannot deadlock the
        // child; reads stop at the cap.
        let out_task = tokio::spawn(read_capped(stdout, cap));
        let err_task = tokio::spawn(read_capped(stderr, cap));

        let waited = tokio::select! {
            _ = self.shutdown.cancelled() => {
                kill_child(&mut child).await;
                return Err(Error::Exec("cancelled by shutdown".to_string()));
            }
            res = tokio::time::timeout(self.cfg.shell_timeout, child.wait()) => res,
        };

        match waited {
            Err(_elapsed) => {
                kill_child(&mut child).await;
                return Err(Error::Exec(format!(
                    "timed out after {}s",
                    self.cfg.shell_timeout.as_secs()
                )));
            }
            // Exit status is not part of the report; a non-zero exit still
            // delivers whatever stdout/stderr said.
            Ok(status) => {
                status?;
            }
        }

        let (stdout, out_over) = join_read(out_task).await?;
        let (stderr, err_over) = join_read(err_task).await?;
        if out_over || err_over {
            return Err(Error::Exec(format!("output exceeded {cap} bytes")));
        }

        Ok(ShellOutput {
            stdout: String::from_utf8_lossy(&stdout).trim().to_string(),
            stderr: String::from_utf8_lossy(&stderr).trim().to_string(),
        })
    }

    async fn run_eval(
        &self,
        transport: &dyn TransportPort,
        envelope: &MessageEnvelope,
        payload: &str,
        return_result: bool,
    ) -> Result<()> {
        let to = &envelope.sender;
        let limit = self.cfg.reply_safe_limit;

        // Syntax check before anything executes.
        enum Parsed {
            Expr(eval::Expr),
            Program(Vec<eval::Stmt>),
        }
        let parsed = if return_result {
            eval::check_expression(payload).map(Parsed::Expr)
        } else {
            eval::check_program(payload).map(Parsed::Program)
        };
        let parsed = match parsed {
            Ok(p) => p,
            Err(err) => {
                let body = format!("❌ Syntax Error:\n```{err}```");
                return transport.send_text(to, &format_result(&body, limit)).await;
            }
        };

        let (preview, _) = truncate_chars(payload, 100);
        self.logger.info(&format!("Evaluating code: {preview}"));

        let mut scope = context_scope(envelope, &self.cfg);
        let result = match &parsed {
            Parsed::Expr(e) => eval::eval_expr(e, &scope),
            Parsed::Program(p) => eval::run_program(p, &mut scope),
        };

        // Runtime faults become the formatted result, never a router fault.
        let formatted = match result {
            Ok(v) => v.to_string(),
            Err(e) => {
                self.logger.error_meta(
                    "Error evaluating code",
                    json!({ "error": e.to_string() }),
                );
                format!("Error: {e}")
            }
        };
        transport
            .send_text(to, &format_result(&formatted, limit))
            .await
    }
}

/// The bounded scope an eval payload sees: message context and configuration
/// snapshots, nothing ambient.
fn context_scope(envelope: &MessageEnvelope, cfg: &Config) -> Scope {
    let mut scope = Scope::new();
    scope.set(
        "sender",
        Value::Str(envelope.requester().as_str().to_string()),
    );
    scope.set(
        "message",
        Value::Str(envelope.body().unwrap_or_default().to_string()),
    );
    scope.set("kind", Value::Str(envelope.kind().to_string()));
    scope.set("prefix", Value::Str(cfg.prefix.clone()));
    scope.set("bot", Value::Str(cfg.bot_name.clone()));
    scope.set(
        "owners",
        Value::List(
            cfg.owners
                .iter()
                .map(|j| Value::Str(j.as_str().to_string()))
                .collect(),
        ),
    );
    scope
}

async fn read_capped<R: AsyncRead + Unpin>(mut reader: R, cap: usize) -> Result<(Vec<u8>, bool)> {
    let mut buf = Vec::new();
    (&mut reader).take(cap as u64 + 1).read_to_end(&mut buf).await?;
    let overflow = buf.len() > cap;
    buf.truncate(cap);
    if overflow {
        // Keep draining past the cap, discarding, so the child can finish
        // instead of blocking on a full pipe and masquerading as a timeout.
        let mut sink = [0u8; 8192];
        loop {
            match reader.read(&mut sink).await {
                Ok(0) | Err(_) => break,
                Ok(_) => {}
            }
        }
    }
    Ok((buf, overflow))
}

async fn join_read(
    task: tokio::task::JoinHandle<Result<(Vec<u8>, bool)>>,
) -> Result<(Vec<u8>, bool)> {
    task.await
        .map_err(|e| Error::Exec(format!("output reader failed: {e}")))?
}

async fn kill_child(child: &mut Child) {
    // kill() also reaps; best-effort, the child may have exited already.
    let _ = child.kill().await;
}
