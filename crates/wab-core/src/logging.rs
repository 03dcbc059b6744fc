//! Multi-target log fan-out.
//!
//! Every [`LogEvent`] is offered to every configured [`LogSink`]; a sink
//! accepts the event iff its level threshold is met and its optional
//! predicate passes. The `terminal` level is a synthetic severity between
//! `info` and `warn` used to mark operator-facing status lines without
//! polluting the audit files' level semantics.

use std::{
    fs::OpenOptions,
    io::Write,
    path::{Path, PathBuf},
};

use chrono::Utc;
use serde_json::Value;

use crate::Result;

/// Ordered severities: `debug < info < terminal < warn < error`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Terminal,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Terminal => "terminal",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "debug" => Some(LogLevel::Debug),
            "info" => Some(LogLevel::Info),
            "terminal" => Some(LogLevel::Terminal),
            "warn" => Some(LogLevel::Warn),
            "error" => Some(LogLevel::Error),
            _ => None,
        }
    }
}

/// Immutable once constructed; fanned out to sinks, never mutated.
#[derive(Clone, Debug)]
pub struct LogEvent {
    pub level: LogLevel,
    pub message: String,
    /// Structured metadata; must be a JSON object when present.
    pub meta: Option<Value>,
    pub timestamp: String,
}

impl LogEvent {
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
            meta: None,
            timestamp: Utc::now().to_rfc3339(),
        }
    }

    pub fn with_meta(level: LogLevel, message: impl Into<String>, meta: Value) -> Self {
        Self {
            meta: Some(meta),
            ..Self::new(level, message)
        }
    }
}

type Predicate = Box<dyn Fn(&LogEvent) -> bool + Send + Sync>;

enum SinkTarget {
    File(PathBuf),
    Stdout,
}

/// One log destination with its own threshold and optional extra filter.
pub struct LogSink {
    target: SinkTarget,
    min_level: LogLevel,
    predicate: Option<Predicate>,
}

impl LogSink {
    pub fn file(path: impl Into<PathBuf>, min_level: LogLevel) -> Self {
        Self {
            target: SinkTarget::File(path.into()),
            min_level,
            predicate: None,
        }
    }

    pub fn stdout(min_level: LogLevel) -> Self {
        Self {
            target: SinkTarget::Stdout,
            min_level,
            predicate: None,
        }
    }

    pub fn with_predicate(
        mut self,
        predicate: impl Fn(&LogEvent) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.predicate = Some(Box::new(predicate));
        self
    }

    fn accepts(&self, event: &LogEvent) -> bool {
        if event.level < self.min_level {
            return false;
        }
        match &self.predicate {
            Some(p) => p(event),
            None => true,
        }
    }

    fn write(&self, event: &LogEvent) -> Result<()> {
        match &self.target {
            SinkTarget::File(path) => {
                let mut file = OpenOptions::new().create(true).append(true).open(path)?;
                let line = serde_json::to_string(&json_line(event))?;
                writeln!(file, "{line}")?;
                Ok(())
            }
            SinkTarget::Stdout => {
                // Short local time + message only; the audit detail lives in files.
                let ts = chrono::Local::now().format("%H:%M:%S");
                println!("{ts} {}", event.message);
                Ok(())
            }
        }
    }
}

fn json_line(event: &LogEvent) -> Value {
    let mut obj = serde_json::Map::new();
    obj.insert("time".to_string(), Value::String(event.timestamp.clone()));
    obj.insert(
        "level".to_string(),
        Value::String(event.level.as_str().to_string()),
    );
    obj.insert("msg".to_string(), Value::String(event.message.clone()));
    if let Some(Value::Object(meta)) = &event.meta {
        for (k, v) in meta {
            obj.insert(k.clone(), v.clone());
        }
    }
    Value::Object(obj)
}

/// Fan-out over a fixed set of sinks, configured once at process start.
pub struct Logger {
    sinks: Vec<LogSink>,
}

impl Logger {
    pub fn new(sinks: Vec<LogSink>) -> Self {
        Self { sinks }
    }

    /// The standard four-sink set: full stream to `app.log`, errors to
    /// `error.log`, everything to `debug.log`, and a nearly-silent stdout
    /// sink that shows only terminal-tagged lines and warn+.
    pub fn standard(logs_dir: &Path, app_level: LogLevel) -> Self {
        Self::new(vec![
            LogSink::file(logs_dir.join("app.log"), app_level),
            LogSink::file(logs_dir.join("error.log"), LogLevel::Error),
            LogSink::file(logs_dir.join("debug.log"), LogLevel::Debug),
            LogSink::stdout(LogLevel::Info).with_predicate(|e| {
                e.level == LogLevel::Terminal || e.level >= LogLevel::Warn
            }),
        ])
    }

    /// Offer `event` to every sink. Writes are best-effort: a broken sink
    /// must not take the router down with it.
    pub fn emit(&self, event: LogEvent) {
        for sink in &self.sinks {
            if sink.accepts(&event) {
                let _ = sink.write(&event);
            }
        }
    }

    pub fn debug(&self, message: &str) {
        self.emit(LogEvent::new(LogLevel::Debug, message));
    }

    pub fn info(&self, message: &str) {
        self.emit(LogEvent::new(LogLevel::Info, message));
    }

    /// Operator-facing status line; shows on stdout, still recorded in the
    /// file sinks whose threshold admits it.
    pub fn terminal(&self, message: &str) {
        self.emit(LogEvent::new(LogLevel::Terminal, message));
    }

    pub fn warn(&self, message: &str) {
        self.emit(LogEvent::new(LogLevel::Warn, message));
    }

    pub fn error(&self, message: &str) {
        self.emit(LogEvent::new(LogLevel::Error, message));
    }

    pub fn info_meta(&self, message: &str, meta: Value) {
        self.emit(LogEvent::with_meta(LogLevel::Info, message, meta));
    }

    pub fn error_meta(&self, message: &str, meta: Value) {
        self.emit(LogEvent::with_meta(LogLevel::Error, message, meta));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    fn tmp_dir(prefix: &str) -> PathBuf {
        let ts = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or(Duration::from_secs(0))
            .as_nanos();
        let pid = std::process::id();
        let dir = PathBuf::from(format!("/tmp/{prefix}-{pid}-{ts}"));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn level_ordering_places_terminal_between_info_and_warn() {
        assert!(LogLevel::Debug < LogLevel::Info);
        assert!(LogLevel::Info < LogLevel::Terminal);
        assert!(LogLevel::Terminal < LogLevel::Warn);
        assert!(LogLevel::Warn < LogLevel::Error);
    }

    #[test]
    fn fan_out_respects_per_sink_thresholds() {
        let dir = tmp_dir("wab-log");
        let logger = Logger::new(vec![
            LogSink::file(dir.join("app.log"), LogLevel::Info),
            LogSink::file(dir.join("error.log"), LogLevel::Error),
        ]);

        logger.debug("noise");
        logger.info("hello");
        logger.error("boom");

        let app = std::fs::read_to_string(dir.join("app.log")).unwrap();
        let err = std::fs::read_to_string(dir.join("error.log")).unwrap();
        assert!(app.contains("hello"));
        assert!(app.contains("boom"));
        assert!(!app.contains("noise"));
        assert!(err.contains("boom"));
        assert!(!err.contains("hello"));
    }

    #[test]
    fn predicate_keeps_sink_nearly_silent() {
        let dir = tmp_dir("wab-log-pred");
        // File stand-in for the stdout sink so the test can read it back.
        let logger = Logger::new(vec![LogSink::file(dir.join("term.log"), LogLevel::Info)
            .with_predicate(|e| e.level == LogLevel::Terminal || e.level >= LogLevel::Warn)]);

        logger.info("audit only");
        logger.terminal("status line");
        logger.warn("warning");

        let term = std::fs::read_to_string(dir.join("term.log")).unwrap();
        assert!(!term.contains("audit only"));
        assert!(term.contains("status line"));
        assert!(term.contains("warning"));
    }

    #[test]
    fn file_lines_are_json_with_flattened_meta() {
        let dir = tmp_dir("wab-log-json");
        let logger = Logger::new(vec![LogSink::file(dir.join("app.log"), LogLevel::Debug)]);
        logger.info_meta("Message received", json!({"sender": "x@s.whatsapp.net"}));

        let line = std::fs::read_to_string(dir.join("app.log")).unwrap();
        let v: Value = serde_json::from_str(line.trim()).unwrap();
        assert_eq!(v["msg"], "Message received");
        assert_eq!(v["level"], "info");
        assert_eq!(v["sender"], "x@s.whatsapp.net");
        assert!(v["time"].as_str().is_some());
    }
}
