//! core::logging::logger
//!
//! The `tracing` backed [`Logger`].
//!
//! # Dispatch
//!
//! Each `Logger` owns a private [`tracing::Dispatch`] and emits through
//! [`tracing::dispatcher::with_default`]. No global subscriber is installed,
//! so every build owns its sink and tests capture output with
//! [`MemorySink`].
//!
//! # Settings
//!
//! [`LogSettings::from_config`] reads:
//! - `LOG_FORMAT`: `json` or `console`
//! - `LOG_LEVEL`: `debug`, `info`, `warn` or `error`
//! - `LOG_SAMPLING_RATE`: when positive, the first N entries of a message
//!   in each one second tick are written and after that only every
//!   `LOG_SAMPLE_EVERY`-th (default 50)
//!
//! Sampling counts in a fixed table of counters per level, indexed by a
//! hash of the message. Messages sharing a slot share a count.

use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::io;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::Dispatch;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::prelude::*;

use super::{BackgroundLog, ContextLog, Field, Level, Log, LogContext, RequestLog};
use crate::core::config::{keys, ConfigStore};

const DEFAULT_SAMPLE_EVERY: u64 = 50;
const DEFAULT_SAMPLE_TICK: Duration = Duration::from_secs(1);
const COUNTERS_PER_LEVEL: usize = 4096;

/// Errors from building a logger.
#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("unknown log format: '{0}'")]
    UnknownFormat(String),

    #[error("unknown log level: '{0}'")]
    UnknownLevel(String),
}

/// Entry encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Console,
}

/// Sampling of repeated messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sampling {
    /// Entries per message written before sampling starts.
    pub initial: u64,
    /// After the initial burst, write every Nth entry.
    pub every: u64,
    /// Window after which a message's count starts over.
    pub tick: Duration,
}

/// Logger settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSettings {
    pub format: LogFormat,
    pub level: Level,
    pub sampling: Option<Sampling>,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            format: LogFormat::Console,
            level: Level::Debug,
            sampling: None,
        }
    }
}

impl LogSettings {
    /// Read settings from the configuration store.
    pub fn from_config(store: &ConfigStore) -> Result<Self, LoggingError> {
        let format = store.get_string(keys::LOG_FORMAT.as_str()).to_ascii_lowercase();
        let format = match format.as_str() {
            "json" => LogFormat::Json,
            "console" => LogFormat::Console,
            _ => return Err(LoggingError::UnknownFormat(format)),
        };

        let level_name = store.get_string(keys::LOG_LEVEL.as_str());
        let level = Level::parse(&level_name)
            .ok_or_else(|| LoggingError::UnknownLevel(level_name.to_ascii_lowercase()))?;

        let rate = store.get_int(keys::LOG_SAMPLING_RATE.as_str());
        let sampling = (rate > 0).then(|| {
            let every = store.get_int(keys::LOG_SAMPLE_EVERY.as_str());
            Sampling {
                initial: rate as u64,
                every: if every > 0 {
                    every as u64
                } else {
                    DEFAULT_SAMPLE_EVERY
                },
                tick: DEFAULT_SAMPLE_TICK,
            }
        });

        Ok(Self {
            format,
            level,
            sampling,
        })
    }
}

#[derive(Debug, Clone, Copy)]
struct Counter {
    since: Instant,
    count: u64,
}

/// Per-tick message counters shared by a logger and its children.
#[derive(Debug)]
struct Sampler {
    policy: Sampling,
    counters: Mutex<Vec<Counter>>,
}

impl Sampler {
    fn new(policy: Sampling) -> Self {
        let unused = Counter {
            since: Instant::now(),
            count: 0,
        };
        Self {
            policy,
            counters: Mutex::new(vec![unused; 4 * COUNTERS_PER_LEVEL]),
        }
    }

    fn slot(level: Level, message: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        message.hash(&mut hasher);
        let level = level as usize;
        level * COUNTERS_PER_LEVEL + (hasher.finish() as usize) % COUNTERS_PER_LEVEL
    }

    fn admit(&self, level: Level, message: &str) -> bool {
        let now = Instant::now();
        let mut counters = self.counters.lock().unwrap_or_else(|e| e.into_inner());
        let counter = &mut counters[Self::slot(level, message)];
        if counter.count == 0 || now.duration_since(counter.since) >= self.policy.tick {
            counter.since = now;
            counter.count = 0;
        }
        counter.count += 1;
        let n = counter.count;
        n <= self.policy.initial || (n - self.policy.initial) % self.policy.every == 0
    }

    #[cfg(test)]
    fn slots_in_use(&self) -> usize {
        let counters = self.counters.lock().unwrap_or_else(|e| e.into_inner());
        counters.iter().filter(|c| c.count > 0).count()
    }
}

/// Concrete logger implementing every logging capability.
#[derive(Clone)]
pub struct Logger {
    dispatch: Dispatch,
    name: Arc<str>,
    sampler: Option<Arc<Sampler>>,
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger")
            .field("name", &self.name)
            .field("sampled", &self.sampler.is_some())
            .finish()
    }
}

impl Logger {
    /// Build a logger writing to `writer`.
    pub fn new<W>(settings: &LogSettings, writer: W) -> Self
    where
        W: for<'a> MakeWriter<'a> + Send + Sync + 'static,
    {
        let writer = BoxMakeWriter::new(writer);
        let filter = LevelFilter::from_level(match settings.level {
            Level::Debug => tracing::Level::DEBUG,
            Level::Info => tracing::Level::INFO,
            Level::Warn => tracing::Level::WARN,
            Level::Error => tracing::Level::ERROR,
        });

        let dispatch = match settings.format {
            LogFormat::Json => Dispatch::new(
                tracing_subscriber::registry().with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(writer)
                        .with_target(false)
                        .with_filter(filter),
                ),
            ),
            LogFormat::Console => Dispatch::new(
                tracing_subscriber::registry().with(
                    tracing_subscriber::fmt::layer()
                        .with_writer(writer)
                        .with_ansi(false)
                        .with_target(false)
                        .with_filter(filter),
                ),
            ),
        };

        Self {
            dispatch,
            name: Arc::from(""),
            sampler: settings.sampling.map(|policy| Arc::new(Sampler::new(policy))),
        }
    }

    /// Build a logger from configuration, writing to stderr.
    pub fn from_config(store: &ConfigStore) -> Result<Self, LoggingError> {
        Ok(Self::new(&LogSettings::from_config(store)?, io::stderr))
    }

    /// A logger that discards everything.
    pub fn disabled() -> Self {
        Self {
            dispatch: Dispatch::none(),
            name: Arc::from(""),
            sampler: None,
        }
    }

    /// A named logger below this one; names nest with dots.
    pub fn named(&self, name: &str) -> Self {
        let name = if self.name.is_empty() {
            name.to_string()
        } else {
            format!("{}.{}", self.name, name)
        };
        Self {
            dispatch: self.dispatch.clone(),
            name: Arc::from(name),
            sampler: self.sampler.clone(),
        }
    }

    /// This logger's dotted name; empty for the root.
    pub fn name(&self) -> &str {
        &self.name
    }

    fn emit(
        &self,
        level: Level,
        message: &str,
        request_id: Option<&str>,
        fields: &[Field<'_>],
        error: Option<&dyn fmt::Display>,
    ) {
        if let Some(sampler) = &self.sampler {
            if !sampler.admit(level, message) {
                return;
            }
        }

        let logger = (!self.name.is_empty()).then_some(&*self.name);
        let error = error.map(|e| format!("{:#}", e));
        let fields = (!fields.is_empty()).then(|| {
            fields
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect::<Vec<_>>()
                .join(" ")
        });

        tracing::dispatcher::with_default(&self.dispatch, || {
            macro_rules! event {
                ($lvl:expr) => {
                    tracing::event!(
                        $lvl,
                        logger = logger,
                        request_id = request_id,
                        error = error.as_deref(),
                        fields = fields.as_deref(),
                        "{}",
                        message
                    )
                };
            }
            match level {
                Level::Debug => event!(tracing::Level::DEBUG),
                Level::Info => event!(tracing::Level::INFO),
                Level::Warn => event!(tracing::Level::WARN),
                Level::Error => event!(tracing::Level::ERROR),
            }
        });
    }
}

impl Log for Logger {
    fn log(
        &self,
        level: Level,
        message: &str,
        fields: &[Field<'_>],
        error: Option<&dyn fmt::Display>,
    ) {
        self.emit(level, message, None, fields, error);
    }
}

impl ContextLog for Logger {
    fn log_ctx(
        &self,
        ctx: &LogContext,
        level: Level,
        message: &str,
        fields: &[Field<'_>],
        error: Option<&dyn fmt::Display>,
    ) {
        self.emit(level, message, ctx.request_id(), fields, error);
    }
}

impl BackgroundLog for Logger {
    fn child_log(&self, name: &str) -> Arc<dyn BackgroundLog> {
        Arc::new(self.named(name))
    }
}

impl RequestLog for Logger {
    fn for_context(&self, ctx: LogContext) -> Arc<dyn Log> {
        Arc::new(ContextBound {
            logger: self.clone(),
            ctx,
        })
    }
}

/// A logger with a fixed context.
struct ContextBound {
    logger: Logger,
    ctx: LogContext,
}

impl Log for ContextBound {
    fn log(
        &self,
        level: Level,
        message: &str,
        fields: &[Field<'_>],
        error: Option<&dyn fmt::Display>,
    ) {
        self.logger.log_ctx(&self.ctx, level, message, fields, error);
    }
}

/// In-memory sink for capturing log output.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything written so far.
    pub fn contents(&self) -> String {
        let buffer = self.buffer.lock().unwrap_or_else(|e| e.into_inner());
        String::from_utf8_lossy(&buffer).into_owned()
    }
}

impl io::Write for MemorySink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for MemorySink {
    type Writer = MemorySink;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(format: LogFormat, level: Level) -> LogSettings {
        LogSettings {
            format,
            level,
            ..LogSettings::default()
        }
    }

    #[test]
    fn settings_read_from_config() {
        let store = ConfigStore::with_env(Vec::<(String, String)>::new());
        store.set("LOG_FORMAT", "JSON");
        store.set("LOG_LEVEL", "Warn");
        let settings = LogSettings::from_config(&store).unwrap();
        assert_eq!(settings.format, LogFormat::Json);
        assert_eq!(settings.level, Level::Warn);
        assert_eq!(settings.sampling, None);
    }

    #[test]
    fn unknown_format_and_level_are_errors() {
        let store = ConfigStore::with_env(Vec::<(String, String)>::new());
        store.set("LOG_FORMAT", "xml");
        store.set("LOG_LEVEL", "info");
        assert!(matches!(
            LogSettings::from_config(&store),
            Err(LoggingError::UnknownFormat(f)) if f == "xml"
        ));

        store.set("LOG_FORMAT", "console");
        store.set("LOG_LEVEL", "verbose");
        let err = LogSettings::from_config(&store).unwrap_err();
        assert_eq!(err.to_string(), "unknown log level: 'verbose'");
    }

    #[test]
    fn sampling_defaults_to_every_fifty() {
        let store = ConfigStore::with_env(Vec::<(String, String)>::new());
        store.set("LOG_FORMAT", "console");
        store.set("LOG_LEVEL", "info");
        store.set("LOG_SAMPLING_RATE", 3i64);
        let settings = LogSettings::from_config(&store).unwrap();
        assert_eq!(
            settings.sampling,
            Some(Sampling {
                initial: 3,
                every: 50,
                tick: Duration::from_secs(1),
            })
        );
    }

    #[test]
    fn level_filter_drops_lower_entries() {
        let sink = MemorySink::new();
        let logger = Logger::new(&settings(LogFormat::Console, Level::Warn), sink.clone());
        logger.info("quiet");
        logger.warn("loud");
        let out = sink.contents();
        assert!(!out.contains("quiet"));
        assert!(out.contains("loud"));
    }

    #[test]
    fn json_entries_carry_name_error_and_request_id() {
        let sink = MemorySink::new();
        let logger = Logger::new(&settings(LogFormat::Json, Level::Debug), sink.clone())
            .named("startup");
        let err = anyhow::anyhow!("boom");
        logger.err_ctx(&LogContext::with_request_id("abc"), &err, "failed");
        let out = sink.contents();
        assert!(out.contains("\"logger\":\"startup\""));
        assert!(out.contains("\"request_id\":\"abc\""));
        assert!(out.contains("\"error\":\"boom\""));
        assert!(out.contains("failed"));
    }

    #[test]
    fn structured_fields_are_rendered() {
        let sink = MemorySink::new();
        let logger = Logger::new(&LogSettings::default(), sink.clone());
        logger.infow("bound", &[("addr", &"127.0.0.1:80"), ("attempt", &2)]);
        let out = sink.contents();
        assert!(out.contains("addr=127.0.0.1:80 attempt=2"));
    }

    #[test]
    fn child_names_nest_with_dots() {
        let sink = MemorySink::new();
        let logger = Logger::new(&settings(LogFormat::Json, Level::Debug), sink.clone())
            .named("background");
        logger.child_log("worker").child_log("poll").info("tick");
        assert!(sink.contents().contains("\"logger\":\"background.worker.poll\""));
    }

    #[test]
    fn sampling_keeps_initial_then_every_nth() {
        let sink = MemorySink::new();
        let mut s = LogSettings::default();
        s.sampling = Some(Sampling {
            initial: 2,
            every: 3,
            tick: Duration::from_secs(3600),
        });
        let logger = Logger::new(&s, sink.clone());
        for _ in 0..8 {
            logger.info("repeated");
        }
        // kept: 1, 2, 5, 8
        assert_eq!(sink.contents().matches("repeated").count(), 4);
    }

    #[test]
    fn sampling_counts_start_over_each_tick() {
        let sink = MemorySink::new();
        let mut s = LogSettings::default();
        s.sampling = Some(Sampling {
            initial: 1,
            every: 50,
            tick: Duration::from_millis(20),
        });
        let logger = Logger::new(&s, sink.clone());
        logger.info("tick");
        logger.info("tick");
        assert_eq!(sink.contents().matches("tick").count(), 1);

        std::thread::sleep(Duration::from_millis(50));
        logger.info("tick");
        assert_eq!(sink.contents().matches("tick").count(), 2);
    }

    #[test]
    fn sampler_table_does_not_grow_with_distinct_messages() {
        let sampler = Sampler::new(Sampling {
            initial: 1,
            every: 50,
            tick: Duration::from_secs(1),
        });
        for i in 0..10_000 {
            sampler.admit(Level::Info, &format!("request {i}"));
        }
        assert!(sampler.slots_in_use() <= COUNTERS_PER_LEVEL);
        assert_eq!(
            sampler.counters.lock().unwrap().len(),
            4 * COUNTERS_PER_LEVEL
        );
    }

    #[test]
    fn entries_carry_no_source_location() {
        let store = ConfigStore::with_env(Vec::<(String, String)>::new());
        store.set("LOG_FORMAT", "console");
        store.set("LOG_LEVEL", "info");
        store.set("DEV_MODE", true);
        let sink = MemorySink::new();
        let logger = Logger::new(&LogSettings::from_config(&store).unwrap(), sink.clone());
        logger.info("where am i");
        let out = sink.contents();
        assert!(out.contains("where am i"));
        assert!(!out.contains("logger.rs"));
    }

    #[test]
    fn disabled_logger_writes_nothing() {
        let logger = Logger::disabled();
        logger.error("nobody hears this");
        assert_eq!(logger.name(), "");
    }
}
