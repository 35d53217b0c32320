use std::fmt::{self, Write as _};
use std::io::{self, Write};
use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use serde_json::Value;

/// Context used by the accept loop.
pub const DISPATCHER_CONTEXT: &str = "server::dispatcher";

#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Verbose,
}

impl LogLevel {
    pub fn from_config_value(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "error" => Some(Self::Error),
            "warn" | "warning" => Some(Self::Warn),
            "info" => Some(Self::Info),
            "debug" => Some(Self::Debug),
            "verbose" | "trace" => Some(Self::Verbose),
            _ => None,
        }
    }

    fn label(self) -> &'static str {
        match self {
            Self::Error => "ERROR",
            Self::Warn => "WARN",
            Self::Info => "INFO",
            Self::Debug => "DEBUG",
            Self::Verbose => "VERBOSE",
        }
    }

    /// ANSI foreground colour code for the level tag.
    fn ansi_color(self) -> u8 {
        match self {
            Self::Error => 31,
            Self::Warn => 33,
            Self::Info => 32,
            Self::Debug => 36,
            Self::Verbose => 35,
        }
    }
}

#[derive(Clone, Debug)]
pub struct LoggerConfig {
    pub min_level: LogLevel,
    pub human_friendly: bool,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            min_level: LogLevel::Info,
            human_friendly: false,
        }
    }
}

pub trait LogSink: Send + Sync {
    fn write_line(&self, line: &str);
}

struct StdoutSink;

impl LogSink for StdoutSink {
    fn write_line(&self, line: &str) {
        let _ = writeln!(io::stdout().lock(), "{line}");
    }
}

/// Process-wide line logger. Components log through a [`ScopedLogger`] carrying their context.
pub struct Logger {
    config: LoggerConfig,
    sink: Arc<dyn LogSink>,
}

impl Logger {
    pub fn new(config: LoggerConfig) -> Self {
        Self::with_sink(config, Arc::new(StdoutSink))
    }

    pub fn with_sink(config: LoggerConfig, sink: Arc<dyn LogSink>) -> Self {
        Self { config, sink }
    }

    pub fn enabled(&self, level: LogLevel) -> bool {
        level <= self.config.min_level
    }

    pub fn log(&self, level: LogLevel, context: &str, message: &str, payload: Option<&Value>) {
        if self.enabled(level) {
            self.sink
                .write_line(&self.render(level, context, message, payload));
        }
    }

    /// `<timestamp> [LEVEL] [context] message payload=<json>`
    fn render(
        &self,
        level: LogLevel,
        context: &str,
        message: &str,
        payload: Option<&Value>,
    ) -> String {
        let mut line = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        if self.config.human_friendly {
            let _ = write!(line, " [\x1b[{}m{}\x1b[0m]", level.ansi_color(), level.label());
        } else {
            let _ = write!(line, " [{}]", level.label());
        }
        if !context.is_empty() {
            let _ = write!(line, " [{context}]");
        }
        let _ = write!(line, " {message}");
        if let Some(payload) = payload {
            let _ = write!(line, " payload={payload}");
        }
        line
    }
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// A logger bound to one component: the dispatcher, a worker slot, or a startup phase.
#[derive(Clone, Debug)]
pub struct ScopedLogger {
    logger: Arc<Logger>,
    context: String,
}

impl ScopedLogger {
    pub fn new(logger: &Arc<Logger>, context: impl Into<String>) -> Self {
        Self {
            logger: Arc::clone(logger),
            context: context.into(),
        }
    }

    pub fn dispatcher(logger: &Arc<Logger>) -> Self {
        Self::new(logger, DISPATCHER_CONTEXT)
    }

    pub fn worker(logger: &Arc<Logger>, worker_id: usize) -> Self {
        Self::new(logger, format!("pools::worker::{worker_id}"))
    }

    pub fn enabled(&self, level: LogLevel) -> bool {
        self.logger.enabled(level)
    }

    pub fn event(&self, level: LogLevel, message: &str, payload: Value) {
        self.logger.log(level, &self.context, message, Some(&payload));
    }

    pub fn error(&self, message: &str) {
        self.logger.log(LogLevel::Error, &self.context, message, None);
    }

    pub fn warn(&self, message: &str) {
        self.logger.log(LogLevel::Warn, &self.context, message, None);
    }

    pub fn info(&self, message: &str) {
        self.logger.log(LogLevel::Info, &self.context, message, None);
    }

    pub fn debug(&self, message: &str) {
        self.logger.log(LogLevel::Debug, &self.context, message, None);
    }

    pub fn verbose(&self, message: &str) {
        self.logger.log(LogLevel::Verbose, &self.context, message, None);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::{Arc, Mutex};

    use serde_json::json;

    use super::{LogLevel, LogSink, Logger, LoggerConfig, ScopedLogger};

    #[derive(Default)]
    pub(crate) struct MemorySink {
        pub(crate) lines: Mutex<Vec<String>>,
    }

    impl MemorySink {
        pub(crate) fn contains(&self, needle: &str) -> bool {
            self.lines
                .lock()
                .expect("memory sink mutex poisoned")
                .iter()
                .any(|line| line.contains(needle))
        }
    }

    impl LogSink for MemorySink {
        fn write_line(&self, line: &str) {
            self.lines
                .lock()
                .expect("memory sink mutex poisoned")
                .push(line.to_owned());
        }
    }

    struct NullSink;

    impl LogSink for NullSink {
        fn write_line(&self, _line: &str) {}
    }

    /// Logger for tests where output is noise.
    pub(crate) fn silent_logger() -> Logger {
        Logger::with_sink(LoggerConfig::default(), Arc::new(NullSink))
    }

    pub(crate) fn memory_logger(min_level: LogLevel) -> (Logger, Arc<MemorySink>) {
        let sink = Arc::new(MemorySink::default());
        let logger = Logger::with_sink(
            LoggerConfig {
                min_level,
                human_friendly: false,
            },
            sink.clone(),
        );
        (logger, sink)
    }

    #[test]
    fn parses_config_levels_case_insensitively() {
        assert_eq!(LogLevel::from_config_value("DEBUG"), Some(LogLevel::Debug));
        assert_eq!(LogLevel::from_config_value(" warn "), Some(LogLevel::Warn));
        assert_eq!(LogLevel::from_config_value("verbose"), Some(LogLevel::Verbose));
        assert_eq!(LogLevel::from_config_value("loud"), None);
    }

    #[test]
    fn info_threshold_excludes_debug_logs() {
        let (logger, sink) = memory_logger(LogLevel::Info);
        let log = ScopedLogger::dispatcher(&Arc::new(logger));

        log.info("info message");
        log.debug("debug message");

        let lines = sink.lines.lock().expect("memory sink mutex poisoned");
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains("[INFO] [server::dispatcher] info message"));
        assert!(!log.enabled(LogLevel::Debug));
    }

    #[test]
    fn worker_scope_carries_slot_id_and_payload() {
        let (logger, sink) = memory_logger(LogLevel::Debug);
        let log = ScopedLogger::worker(&Arc::new(logger), 2);

        log.event(
            LogLevel::Info,
            "writer session ended",
            json!({"accepted": 1, "queue_len": 50}),
        );

        let lines = sink.lines.lock().expect("memory sink mutex poisoned");
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains("[pools::worker::2] writer session ended"));
        assert!(lines[0].ends_with("payload={\"accepted\":1,\"queue_len\":50}"));
        assert!(lines[0].starts_with("20"));
    }

    #[test]
    fn empty_context_is_omitted() {
        let (logger, sink) = memory_logger(LogLevel::Info);

        logger.log(LogLevel::Warn, "", "no context", None);

        let lines = sink.lines.lock().expect("memory sink mutex poisoned");
        assert!(lines[0].contains("[WARN] no context"));
    }

    #[test]
    fn human_friendly_mode_colours_the_level() {
        let sink = Arc::new(MemorySink::default());
        let logger = Arc::new(Logger::with_sink(
            LoggerConfig {
                min_level: LogLevel::Warn,
                human_friendly: true,
            },
            sink.clone(),
        ));
        let log = ScopedLogger::new(&logger, "main");

        log.warn("coloured");
        log.error("also coloured");
        log.info("filtered");

        let lines = sink.lines.lock().expect("memory sink mutex poisoned");
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("[\x1b[33mWARN\x1b[0m]"));
        assert!(lines[1].contains("[\x1b[31mERROR\x1b[0m]"));
    }
}
