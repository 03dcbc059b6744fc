//! Inbound message routing.
//!
//! One dispatch per envelope. Privileged triggers are checked before the
//! command prefix so an owner payload like `$ !ls` is shell input, not a
//! command. Ordinary chatter is recorded in the audit stream but never
//! answered; envelopes with no extractable body are dropped silently.

use std::sync::Arc;

use serde_json::json;

use crate::{
    config::Config,
    gate::{ExecGate, ExecMode},
    logging::Logger,
    messaging::{port::TransportPort, types::MessageEnvelope},
    registry::{CommandRegistry, InvocationContext},
    Result,
};

/// The privileged trigger prefixes, longest-match first so `=> ` is never
/// mistaken for `> `.
const TRIGGERS: [(&str, ExecMode); 3] = [
    ("$ ", ExecMode::Shell),
    ("=> ", ExecMode::EvalReturn),
    ("> ", ExecMode::EvalStatement),
];

pub struct Router {
    cfg: Arc<Config>,
    logger: Arc<Logger>,
    registry: Arc<CommandRegistry>,
    gate: ExecGate,
}

impl Router {
    pub fn new(
        cfg: Arc<Config>,
        logger: Arc<Logger>,
        registry: Arc<CommandRegistry>,
        gate: ExecGate,
    ) -> Self {
        Self {
            cfg,
            logger,
            registry,
            gate,
        }
    }

    /// Outer fault boundary: any error escaping dispatch is logged and
    /// answered with the generic failure notice. The router itself never
    /// returns an error to its caller; a poisoned message must not take the
    /// message loop down.
    pub async fn handle(&self, transport: &dyn TransportPort, envelope: &MessageEnvelope) {
        if let Err(e) = self.dispatch(transport, envelope).await {
            self.logger.error_meta(
                "Error handling message",
                json!({
                    "sender": envelope.requester().as_str(),
                    "error": e.to_string(),
                }),
            );
            let _ = transport
                .send_text(&envelope.sender, &self.cfg.messages.error)
                .await;
        }
    }

    async fn dispatch(&self, transport: &dyn TransportPort, envelope: &MessageEnvelope) -> Result<()> {
        let Some(body) = envelope.body() else {
            return Ok(());
        };

        for (trigger, mode) in TRIGGERS {
            if let Some(payload) = body.strip_prefix(trigger) {
                return self.gate.handle(transport, envelope, mode, payload).await;
            }
        }

        if let Some(rest) = body.strip_prefix(self.cfg.prefix.as_str()) {
            let mut parts = rest.splitn(2, char::is_whitespace);
            let name = parts.next().unwrap_or_default();
            let args = parts.next().unwrap_or_default();
            if !name.is_empty() {
                return self.dispatch_command(transport, envelope, name, args).await;
            }
        }

        // Ordinary chatter: observed, never answered.
        self.logger.info_meta(
            "Message received",
            json!({
                "sender": envelope.requester().as_str(),
                "kind": envelope.kind(),
                "content": body,
            }),
        );
        Ok(())
    }

    async fn dispatch_command(
        &self,
        transport: &dyn TransportPort,
        envelope: &MessageEnvelope,
        name: &str,
        args: &str,
    ) -> Result<()> {
        // Resolve lookup and execution against one snapshot, so `help`
        // enumerates exactly the set the command itself came from.
        let commands = self.registry.snapshot();
        let Some(command) = commands.get(&name.to_lowercase()) else {
            let who = envelope.requester();
            self.logger.terminal(&format!(
                "❓ {who}: Unknown command {}{name}",
                self.cfg.prefix
            ));
            self.logger
                .info(&format!("Unknown command {name} requested by {who}"));
            return transport
                .send_text(
                    &envelope.sender,
                    &format!(
                        "Unknown command: {name}. Type {}help to see available commands.",
                        self.cfg.prefix
                    ),
                )
                .await;
        };

        // Executed commands are the one per-message event shown on the
        // operator terminal.
        let who = envelope.requester();
        self.logger
            .terminal(&format!("🔹 {who}: {}{}", self.cfg.prefix, command.name));

        let ctx = InvocationContext {
            sender: envelope.sender.clone(),
            content: envelope.body().unwrap_or_default().to_string(),
            kind: envelope.kind(),
            cfg: Arc::clone(&self.cfg),
        };
        command
            .execute(transport, envelope, args, &ctx, &commands)
            .await?;

        if self.cfg.command_logging {
            self.logger
                .info(&format!("Command {} executed by {who}", command.name));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        domain::Jid, messaging::testutil::RecordingTransport, registry::CommandRegistry, testutil,
    };
    use std::{fs, path::PathBuf, time::Duration};
    use tokio_util::sync::CancellationToken;

    fn tmp_dir(prefix: &str) -> PathBuf {
        let ts = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or(Duration::from_secs(0))
            .as_nanos();
        let pid = std::process::id();
        let dir = PathBuf::from(format!("/tmp/{prefix}-{pid}-{ts}"));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn router_with_logger(prefix: &str, units: &[(&str, &str)], logger: Arc<Logger>) -> Router {
        let dir = tmp_dir(prefix);
        for (file, contents) in units {
            fs::write(dir.join(file), contents).unwrap();
        }
        let cfg = Arc::new(testutil::test_config());
        let registry = Arc::new(CommandRegistry::new(dir, Arc::clone(&logger)).unwrap());
        registry.load().unwrap();
        let gate = ExecGate::new(
            Arc::clone(&cfg),
            Arc::clone(&logger),
            CancellationToken::new(),
        );
        Router::new(cfg, logger, registry, gate)
    }

    fn router_with_units(prefix: &str, units: &[(&str, &str)]) -> Router {
        router_with_logger(prefix, units, Arc::new(Logger::new(vec![])))
    }

    fn echo_unit() -> (&'static str, &'static str) {
        (
            "echo.json",
            r#"{"name": "echo", "description": "Repeat the text you send", "kind": "echo"}"#,
        )
    }

    fn from_owner(body: &str) -> MessageEnvelope {
        MessageEnvelope::text(Jid::new(testutil::OWNER), body)
    }

    fn from_stranger(body: &str) -> MessageEnvelope {
        MessageEnvelope::text(Jid::new("999@s.whatsapp.net"), body)
    }

    #[tokio::test]
    async fn prefixed_command_is_dispatched() {
        let router = router_with_units("wab-rt-echo", &[echo_unit()]);
        let transport = RecordingTransport::default();

        router
            .handle(&transport, &from_stranger("!echo hello there"))
            .await;

        assert_eq!(transport.texts(), vec!["hello there".to_string()]);
    }

    #[tokio::test]
    async fn command_names_are_case_insensitive() {
        let router = router_with_units("wab-rt-case", &[echo_unit()]);
        let transport = RecordingTransport::default();

        router.handle(&transport, &from_stranger("!EcHo hi")).await;

        assert_eq!(transport.texts(), vec!["hi".to_string()]);
    }

    #[tokio::test]
    async fn executed_commands_appear_in_the_terminal_feed() {
        use crate::logging::{LogLevel, LogSink};

        // File stand-ins for the terminal and audit sinks.
        let dir = tmp_dir("wab-rt-term");
        let logger = Arc::new(Logger::new(vec![
            LogSink::file(dir.join("term.log"), LogLevel::Info)
                .with_predicate(|e| e.level == LogLevel::Terminal || e.level >= LogLevel::Warn),
            LogSink::file(dir.join("app.log"), LogLevel::Info),
        ]));
        let router = router_with_logger("wab-rt-term-cmds", &[echo_unit()], logger);
        let transport = RecordingTransport::default();

        router.handle(&transport, &from_stranger("!echo hi")).await;

        assert_eq!(transport.texts(), vec!["hi".to_string()]);
        let term = fs::read_to_string(dir.join("term.log")).unwrap();
        assert!(term.contains("🔹 999@s.whatsapp.net: !echo"));
        let app = fs::read_to_string(dir.join("app.log")).unwrap();
        assert!(app.contains("Command echo executed by 999@s.whatsapp.net"));
    }

    #[tokio::test]
    async fn unknown_command_gets_the_not_found_notice() {
        let router = router_with_units("wab-rt-unknown", &[echo_unit()]);
        let transport = RecordingTransport::default();

        router.handle(&transport, &from_stranger("!frobnicate")).await;

        assert_eq!(
            transport.texts(),
            vec!["Unknown command: frobnicate. Type !help to see available commands.".to_string()]
        );
    }

    #[tokio::test]
    async fn plain_chatter_is_ignored() {
        let router = router_with_units("wab-rt-plain", &[echo_unit()]);
        let transport = RecordingTransport::default();

        router.handle(&transport, &from_stranger("hello bot")).await;
        router.handle(&transport, &from_stranger("!")).await;
        router
            .handle(
                &transport,
                &MessageEnvelope {
                    sender: Jid::new("999@s.whatsapp.net"),
                    participant: None,
                    content: crate::messaging::types::MessageContent::Other,
                },
            )
            .await;

        assert!(transport.texts().is_empty());
    }

    #[tokio::test]
    async fn eval_return_trigger_wins_over_statement_trigger() {
        let router = router_with_units("wab-rt-trig", &[]);
        let transport = RecordingTransport::default();

        // `=> ` must not lex as `=` followed by a `> ` statement.
        router.handle(&transport, &from_owner("=> 2 + 2")).await;

        assert_eq!(transport.texts(), vec!["📋 Result:\n\n4".to_string()]);
    }

    #[tokio::test]
    async fn shell_trigger_beats_command_prefix() {
        let router = router_with_units("wab-rt-shell", &[echo_unit()]);
        let transport = RecordingTransport::default();

        // The payload itself starts with the command prefix; it must still be
        // treated as shell input.
        router
            .handle(&transport, &from_owner("$ printf '!echo hijacked'"))
            .await;

        let texts = transport.texts();
        assert_eq!(texts.len(), 2);
        assert_eq!(texts[1], "📋 Result:\n\n!echo hijacked");
    }

    #[tokio::test]
    async fn non_owner_trigger_is_denied_without_execution() {
        let router = router_with_units("wab-rt-deny", &[]);
        let transport = RecordingTransport::default();

        let marker = format!(
            "/tmp/wab-deny-marker-{}-{}",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or(Duration::from_secs(0))
                .as_nanos()
        );
        router
            .handle(&transport, &from_stranger(&format!("$ touch {marker}")))
            .await;

        assert_eq!(
            transport.texts(),
            vec!["⚠️ Only the bot owner can use this command".to_string()]
        );
        // Denial means denied: the payload never ran.
        assert!(!std::path::Path::new(&marker).exists());
    }

    #[tokio::test]
    async fn statement_trigger_runs_programs() {
        let router = router_with_units("wab-rt-stmt", &[]);
        let transport = RecordingTransport::default();

        router
            .handle(&transport, &from_owner("> let n = 6; n * 7"))
            .await;

        assert_eq!(transport.texts(), vec!["📋 Result:\n\n42".to_string()]);
    }
}
