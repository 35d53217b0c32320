mod config;
mod logging;
mod pools;
mod queue;
mod server;
mod shutdown;
mod utils;
mod wire;

use std::process;
use std::sync::Arc;

use config::{AppConfig, ConfigSource};
use logging::{LogLevel, Logger, LoggerConfig, ScopedLogger};
use serde_json::json;
use server::context::ServerContext;
use server::SignalServer;
use shutdown::ShutdownHooks;
use utils::runtime::ensure_posix_or_exit;
use utils::startup_banner::print_startup_banner;

fn main() {
    ensure_posix_or_exit();

    let (app_config, config_source) = load_config_or_exit();
    print_startup_banner(&app_config, &config_source);

    let log_level =
        LogLevel::from_config_value(&app_config.logging.level).unwrap_or_else(|| {
            eprintln!(
                "invalid logging.level '{}'. Allowed values: error, warn, info, debug, verbose",
                app_config.logging.level
            );
            process::exit(2);
        });
    let logger = Arc::new(Logger::new(LoggerConfig {
        min_level: log_level,
        human_friendly: app_config.logging.human_friendly,
    }));

    let context = Arc::new(ServerContext::new(
        app_config.queue.capacity,
        Arc::clone(&logger),
    ));
    let server =
        SignalServer::from_app_config(&app_config, Arc::clone(&context)).unwrap_or_else(|error| {
            eprintln!("server startup error: {error}");
            process::exit(2);
        });
    let bound_addr = server.local_addr().unwrap_or_else(|error| {
        eprintln!("server startup error: failed to read local address: {error}");
        process::exit(2);
    });
    ScopedLogger::new(&logger, "main::server").event(
        LogLevel::Info,
        &format!(
            "{} v{} listening",
            env!("CARGO_PKG_NAME"),
            env!("CARGO_PKG_VERSION")
        ),
        json!({
            "bind_address": bound_addr.to_string(),
            "workers": app_config.pool.workers,
            "queue_capacity": app_config.queue.capacity,
            "config_source": config_source.to_string(),
        }),
    );

    let shutdown_log = ScopedLogger::new(&logger, "main::shutdown");
    let shutdown_hooks = ShutdownHooks::install(context.quit_handle()).unwrap_or_else(|error| {
        eprintln!("failed to install shutdown hooks: {error}");
        process::exit(2);
    });
    shutdown_log.info("Shutdown hooks installed for SIGINT/SIGTERM");

    let report = server.run();
    drop(shutdown_hooks);

    if report.worker_panics > 0 {
        shutdown_log.error(&format!(
            "Shutdown completed with {} panicked worker(s)",
            report.worker_panics
        ));
        process::exit(1);
    }
    shutdown_log.event(
        LogLevel::Info,
        "TCP server stopped and shutdown completed",
        json!({
            "forced_closed": report.forced_closed,
            "undelivered": report.undelivered,
            "queue_capacity": context.queue.capacity(),
        }),
    );
}

fn load_config_or_exit() -> (AppConfig, ConfigSource) {
    match AppConfig::load_with_discovery(std::env::args().skip(1)) {
        Ok(loaded) => loaded,
        Err(error) => {
            eprintln!("configuration error: {error}");
            process::exit(2);
        }
    }
}
