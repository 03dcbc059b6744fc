//! Shared test fixtures.

use std::{path::PathBuf, time::Duration};

use crate::{
    config::{Config, Messages},
    domain::Jid,
    logging::LogLevel,
};

pub(crate) const OWNER: &str = "111@s.whatsapp.net";

pub(crate) fn test_config() -> Config {
    Config {
        bot_name: "wab".to_string(),
        bot_version: "0.1.0".to_string(),
        prefix: "!".to_string(),
        owners: vec![Jid::new(OWNER)],
        sessions_dir: PathBuf::from("/tmp"),
        logs_dir: PathBuf::from("/tmp"),
        commands_dir: PathBuf::from("/tmp"),
        shell_timeout: Duration::from_secs(5),
        shell_output_limit: 64 * 1024,
        reply_safe_limit: 4000,
        log_level: LogLevel::Info,
        verbose_log_max_bytes: 10 * 1024 * 1024,
        verbose_check_interval: Duration::from_secs(3600),
        command_logging: true,
        messages: Messages::default(),
    }
}
