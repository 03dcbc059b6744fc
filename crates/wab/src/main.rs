use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use wab_core::{
    config::Config,
    gate::ExecGate,
    intercept::{NoiseFilter, RotatingLogFile, StdConsole},
    logging::Logger,
    registry::CommandRegistry,
    router::Router,
};

#[tokio::main]
async fn main() -> Result<(), wab_core::Error> {
    let cfg = Arc::new(Config::load()?);
    let logger = Arc::new(Logger::standard(&cfg.logs_dir, cfg.log_level));

    // Library noise goes to the rotating verbose channel instead of stdout.
    let verbose = RotatingLogFile::open(
        cfg.logs_dir.join("baileys/verbose.log"),
        cfg.verbose_log_max_bytes,
    )?;
    let console = Arc::new(NoiseFilter::install(Box::new(StdConsole), verbose));

    let registry = Arc::new(CommandRegistry::new(
        cfg.commands_dir.clone(),
        Arc::clone(&logger),
    )?);
    registry.load()?;
    let _watcher = registry.watch()?;

    let shutdown = CancellationToken::new();
    let gate = ExecGate::new(Arc::clone(&cfg), Arc::clone(&logger), shutdown.clone());
    let router = Arc::new(Router::new(
        Arc::clone(&cfg),
        Arc::clone(&logger),
        Arc::clone(&registry),
        gate,
    ));

    let owner = cfg.owners[0].clone();
    logger.terminal(&format!(
        "🤖 {} v{} is ready! Owner: {}",
        cfg.bot_name, cfg.bot_version, owner
    ));

    // Periodic rotation check, in addition to the size check on each write.
    {
        let console = Arc::clone(&console);
        let logger = Arc::clone(&logger);
        let interval = cfg.verbose_check_interval;
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // the first tick fires immediately
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = console.check_rotation() {
                            logger.warn(&format!("Verbose log rotation failed: {e}"));
                        }
                    }
                }
            }
        });
    }

    let transport = Arc::new(wab_console::ConsoleTransport::new());
    let loop_result = tokio::select! {
        res = wab_console::run_stdin_loop(
            owner,
            Arc::clone(&router),
            transport,
            shutdown.clone(),
        ) => res,
        _ = tokio::signal::ctrl_c() => Ok(()),
    };

    logger.terminal("👋 Shutting down...");
    shutdown.cancel();
    if let Err(e) = console.restore() {
        logger.warn(&format!("Console restore failed: {e}"));
    }
    drop(_watcher);

    loop_result.map_err(|e| wab_core::Error::External(format!("console loop failed: {e}")))
}
