use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{domain::Jid, errors::Error, logging::LogLevel, Result};

/// User-visible notice strings.
///
/// English defaults; deployments can override the important ones via env.
#[derive(Clone, Debug)]
pub struct Messages {
    pub unauthorized: String,
    pub processing: String,
    pub no_output: String,
    pub error: String,
}

impl Default for Messages {
    fn default() -> Self {
        Self {
            unauthorized: "⚠️ Only the bot owner can use this command".to_string(),
            processing: "⏳ Executing command...".to_string(),
            no_output: "✅ Command executed successfully (no output)".to_string(),
            error: "Sorry, something went wrong while processing your request.".to_string(),
        }
    }
}

/// Typed configuration, loaded once at startup. Immutable thereafter;
/// changing the owner set requires a restart.
#[derive(Clone, Debug)]
pub struct Config {
    // Identity
    pub bot_name: String,
    pub bot_version: String,

    // Commands
    pub prefix: String,
    pub owners: Vec<Jid>,

    // Paths
    pub sessions_dir: PathBuf,
    pub logs_dir: PathBuf,
    pub commands_dir: PathBuf,

    // Privileged execution bounds
    pub shell_timeout: Duration,
    pub shell_output_limit: usize,

    /// Formatted replies longer than this are truncated with a marker.
    pub reply_safe_limit: usize,

    // Logging
    pub log_level: LogLevel,
    pub verbose_log_max_bytes: u64,
    pub verbose_check_interval: Duration,

    // Feature toggles
    pub command_logging: bool,

    pub messages: Messages,
}

impl Config {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));

        let owners = parse_owner_jids(env_str("WAB_OWNERS"));
        if owners.is_empty() {
            return Err(Error::Config(
                "WAB_OWNERS environment variable is required".to_string(),
            ));
        }

        let bot_name = env_str("WAB_BOT_NAME").unwrap_or_else(|| "wab".to_string());
        let bot_version = env!("CARGO_PKG_VERSION").to_string();

        let prefix = env_str("WAB_PREFIX").unwrap_or_else(|| "!".to_string());
        if prefix.trim().is_empty() {
            return Err(Error::Config("WAB_PREFIX must not be blank".to_string()));
        }

        let sessions_dir = env_path("WAB_SESSIONS_DIR").unwrap_or_else(|| PathBuf::from("sessions"));
        let logs_dir = env_path("WAB_LOGS_DIR").unwrap_or_else(|| PathBuf::from("logs"));
        let commands_dir = env_path("WAB_COMMANDS_DIR").unwrap_or_else(|| PathBuf::from("commands"));

        // Directories must exist before anything else runs; failure here is fatal.
        fs::create_dir_all(&sessions_dir)?;
        fs::create_dir_all(&logs_dir)?;
        fs::create_dir_all(logs_dir.join("baileys"))?;
        fs::create_dir_all(&commands_dir)?;

        let shell_timeout = Duration::from_millis(env_u64("WAB_SHELL_TIMEOUT_MS").unwrap_or(30_000));
        let shell_output_limit = env_usize("WAB_SHELL_OUTPUT_LIMIT").unwrap_or(64 * 1024);
        let reply_safe_limit = env_usize("WAB_REPLY_SAFE_LIMIT").unwrap_or(4000);

        let log_level = env_str("WAB_LOG_LEVEL")
            .and_then(|s| LogLevel::parse(&s))
            .unwrap_or(LogLevel::Info);
        let verbose_log_max_bytes =
            env_u64("WAB_VERBOSE_LOG_MAX_BYTES").unwrap_or(10 * 1024 * 1024);
        let verbose_check_interval =
            Duration::from_secs(env_u64("WAB_VERBOSE_CHECK_INTERVAL_SECS").unwrap_or(3600));

        let command_logging = env_bool("WAB_COMMAND_LOGGING").unwrap_or(true);

        let mut messages = Messages::default();
        if let Some(s) = env_str("WAB_MSG_UNAUTHORIZED").and_then(non_empty) {
            messages.unauthorized = s;
        }
        if let Some(s) = env_str("WAB_MSG_ERROR").and_then(non_empty) {
            messages.error = s;
        }

        Ok(Self {
            bot_name,
            bot_version,
            prefix,
            owners,
            sessions_dir,
            logs_dir,
            commands_dir,
            shell_timeout,
            shell_output_limit,
            reply_safe_limit,
            log_level,
            verbose_log_max_bytes,
            verbose_check_interval,
            command_logging,
            messages,
        })
    }

    pub fn is_owner(&self, jid: &Jid) -> bool {
        self.owners.contains(jid)
    }
}

/// Bare numbers become full user jids; anything with `@` is taken as-is.
pub fn normalize_owner(raw: &str) -> Jid {
    let raw = raw.trim();
    if raw.contains('@') {
        Jid::new(raw)
    } else {
        Jid::new(format!("{raw}@s.whatsapp.net"))
    }
}

fn parse_owner_jids(v: Option<String>) -> Vec<Jid> {
    v.unwrap_or_default()
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(normalize_owner)
        .collect()
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim();
        if key.is_empty() {
            continue;
        }
        if env::var_os(key).is_some() {
            continue; // do not override existing env
        }

        let mut val = v.trim().to_string();
        // Strip optional surrounding quotes.
        if val.len() >= 2
            && ((val.starts_with('"') && val.ends_with('"'))
                || (val.starts_with('\'') && val.ends_with('\'')))
        {
            val = val[1..val.len() - 1].to_string();
        }

        env::set_var(key, val);
    }
}

fn env_str(key: &str) -> Option<String> {
    env::var(key).ok()
}

fn env_bool(key: &str) -> Option<bool> {
    env_str(key).map(|s| {
        matches!(
            s.trim().to_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        )
    })
}

fn env_u64(key: &str) -> Option<u64> {
    env_str(key).and_then(|s| s.trim().parse::<u64>().ok())
}

fn env_usize(key: &str) -> Option<usize> {
    env_str(key).and_then(|s| s.trim().parse::<usize>().ok())
}

fn env_path(key: &str) -> Option<PathBuf> {
    env::var_os(key).map(PathBuf::from)
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}
