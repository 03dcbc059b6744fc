//! Hot-reloadable command registry.
//!
//! Command units are JSON files in the configured directory, one command per
//! file. A reload builds a complete replacement map and publishes it with a
//! single swap, so a concurrent dispatch sees either the old or the new set
//! in full, never a partial one.

use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    sync::{Arc, RwLock},
};

use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use serde::Deserialize;
use serde_json::json;

use crate::{
    config::Config,
    domain::Jid,
    errors::Error,
    logging::Logger,
    messaging::{port::TransportPort, types::MessageEnvelope},
    Result,
};

/// File extension of a loadable command unit.
pub const UNIT_EXT: &str = "json";

/// Per-dispatch invocation context; constructed fresh per message.
#[derive(Clone, Debug)]
pub struct InvocationContext {
    pub sender: Jid,
    pub content: String,
    pub kind: &'static str,
    pub cfg: Arc<Config>,
}

/// Built-in behaviors a command unit can select.
#[derive(Clone, Debug, PartialEq)]
enum Behavior {
    /// Repeat the argument string back to the sender.
    Echo,
    /// Enumerate the currently loaded commands.
    Help,
    /// Send a fixed reply (used for `ping`-style commands).
    Reply(String),
}

#[derive(Clone, Debug)]
pub struct Command {
    pub name: String,
    pub description: String,
    behavior: Behavior,
}

impl Command {
    pub async fn execute(
        &self,
        transport: &dyn TransportPort,
        _envelope: &MessageEnvelope,
        args: &str,
        ctx: &InvocationContext,
        commands: &CommandMap,
    ) -> Result<()> {
        match &self.behavior {
            Behavior::Echo => {
                let text = args.trim();
                if text.is_empty() {
                    transport
                        .send_text(&ctx.sender, "Please provide text to echo!")
                        .await
                } else {
                    transport.send_text(&ctx.sender, text).await
                }
            }
            Behavior::Reply(text) => transport.send_text(&ctx.sender, text).await,
            Behavior::Help => {
                let mut names: Vec<&String> = commands.keys().collect();
                names.sort();

                let mut help = String::from("Available commands:\n");
                for name in names {
                    if let Some(cmd) = commands.get(name) {
                        help.push_str(&format!(
                            "{}{} - {}\n",
                            ctx.cfg.prefix, cmd.name, cmd.description
                        ));
                    }
                }
                transport.send_text(&ctx.sender, &help).await
            }
        }
    }
}

pub type CommandMap = HashMap<String, Command>;

#[derive(Debug, Deserialize)]
struct CommandUnit {
    name: Option<String>,
    description: Option<String>,
    kind: Option<String>,
    reply: Option<String>,
}

pub struct CommandRegistry {
    dir: PathBuf,
    logger: Arc<Logger>,
    commands: RwLock<Arc<CommandMap>>,
}

impl CommandRegistry {
    pub fn new(dir: impl Into<PathBuf>, logger: Arc<Logger>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            logger,
            commands: RwLock::new(Arc::new(CommandMap::new())),
        })
    }

    /// Scan the command directory and atomically replace the mapping.
    ///
    /// A single bad unit is skipped and logged; only a failure to read the
    /// directory itself is an error. Returns the count loaded.
    pub fn load(&self) -> Result<usize> {
        let mut next = CommandMap::new();

        let mut paths: Vec<PathBuf> = fs::read_dir(&self.dir)?
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| p.extension().and_then(|e| e.to_str()) == Some(UNIT_EXT))
            .collect();
        paths.sort();

        for path in paths {
            let file = path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            match load_unit(&path) {
                Ok(Some(cmd)) => {
                    self.logger.info(&format!("Loaded command: {}", cmd.name));
                    next.insert(cmd.name.to_lowercase(), cmd);
                }
                Ok(None) => {
                    self.logger.info(&format!(
                        "Command file {file} is missing required properties, skipped"
                    ));
                }
                Err(e) => {
                    self.logger.emit(crate::logging::LogEvent::with_meta(
                        crate::logging::LogLevel::Error,
                        format!("Error loading command file {file}"),
                        json!({ "error": e.to_string() }),
                    ));
                }
            }
        }

        let count = next.len();
        {
            let mut guard = self.commands.write().unwrap_or_else(|e| e.into_inner());
            *guard = Arc::new(next);
        }
        self.logger.terminal(&format!("📚 Loaded {count} commands"));
        Ok(count)
    }

    /// Cheap atomic snapshot of the current mapping; stays valid across
    /// concurrent reloads.
    pub fn snapshot(&self) -> Arc<CommandMap> {
        self.commands
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Case-insensitive lookup. Absence is routine, not a fault.
    pub fn get(&self, name: &str) -> Option<Command> {
        self.snapshot().get(&name.to_lowercase()).cloned()
    }

    /// Watch the command directory; any unit add/change/remove triggers a
    /// full reload. The returned guard must be kept alive.
    pub fn watch(self: &Arc<Self>) -> Result<RegistryWatcher> {
        let registry = Arc::clone(self);
        let mut watcher = notify::recommended_watcher(
            move |res: std::result::Result<notify::Event, notify::Error>| {
                let Ok(event) = res else {
                    return;
                };
                let relevant = event
                    .paths
                    .iter()
                    .any(|p| p.extension().and_then(|e| e.to_str()) == Some(UNIT_EXT));
                if !relevant {
                    return;
                }

                registry
                    .logger
                    .terminal("🔄 Command file changed, reloading commands...");
                if let Err(e) = registry.load() {
                    registry.logger.error(&format!("Command reload failed: {e}"));
                }
            },
        )
        .map_err(|e| Error::Watch(e.to_string()))?;

        watcher
            .watch(&self.dir, RecursiveMode::NonRecursive)
            .map_err(|e| Error::Watch(e.to_string()))?;

        Ok(RegistryWatcher { _watcher: watcher })
    }
}

/// Keeps the filesystem watcher alive; dropping it stops reloads.
pub struct RegistryWatcher {
    _watcher: RecommendedWatcher,
}

fn load_unit(path: &Path) -> Result<Option<Command>> {
    let raw = fs::read_to_string(path)?;
    let unit: CommandUnit = serde_json::from_str(&raw)?;

    let (Some(name), Some(kind)) = (unit.name, unit.kind) else {
        return Ok(None);
    };
    if name.trim().is_empty() {
        return Ok(None);
    }

    let behavior = match kind.as_str() {
        "echo" => Behavior::Echo,
        "help" => Behavior::Help,
        "reply" => match unit.reply {
            Some(text) => Behavior::Reply(text),
            None => return Ok(None),
        },
        other => {
            return Err(Error::Config(format!("unknown command kind `{other}`")));
        }
    };

    Ok(Some(Command {
        name: name.trim().to_string(),
        description: unit.description.unwrap_or_default(),
        behavior,
    }))
}
