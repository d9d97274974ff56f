//! core::logging
//!
//! Logging capabilities consumed by commands, services and the builder.
//!
//! # Capabilities
//!
//! The capabilities are traits so the dependency graph can hand out
//! `Arc<dyn ...>` handles without exposing the backend:
//!
//! - [`Log`] - leveled, formatted (`*f`) and structured (`*w`) methods plus
//!   `err*` methods that attach an error
//! - [`ContextLog`] - the same methods bound to a [`LogContext`]
//! - [`StartupLog`] - startup and shutdown activity
//! - [`BackgroundLog`] - background work, with named child logs
//! - [`RequestLog`] - request scoped logging
//!
//! Every capability is implemented by [`Logger`], a thin wrapper over a
//! private `tracing` dispatcher. See [`logger`] for settings and sinks.
//!
//! # Example
//!
//! ```
//! use deploy_runner::core::logging::{Log, Logger, LogSettings, MemorySink};
//!
//! let sink = MemorySink::new();
//! let logger = Logger::new(&LogSettings::default(), sink.clone()).named("startup");
//! logger.infof(format_args!("listening on {}", "127.0.0.1:8080"));
//! assert!(sink.contents().contains("listening on 127.0.0.1:8080"));
//! ```

pub mod logger;

pub use logger::{LogFormat, LogSettings, Logger, LoggingError, MemorySink};

use std::fmt;
use std::sync::Arc;

use crate::core::component::Component;
use crate::core::config::env;
use crate::core::graph::Providers;

/// Log severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Level {
    Debug,
    Info,
    Warn,
    Error,
}

impl Level {
    /// Parse a level name, case-insensitively.
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "debug" => Some(Level::Debug),
            "info" => Some(Level::Info),
            "warn" => Some(Level::Warn),
            "error" => Some(Level::Error),
            _ => None,
        }
    }

    /// Lower-case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Debug => "debug",
            Level::Info => "info",
            Level::Warn => "warn",
            Level::Error => "error",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A structured key/value pair attached to an entry.
pub type Field<'a> = (&'a str, &'a dyn fmt::Display);

/// Request scope carried into context-bound log calls.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogContext {
    request_id: Option<String>,
}

impl LogContext {
    /// An empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// A context with a freshly generated request id.
    pub fn generate() -> Self {
        Self::with_request_id(uuid::Uuid::new_v4().to_string())
    }

    /// A context with the given request id.
    pub fn with_request_id(id: impl Into<String>) -> Self {
        Self {
            request_id: Some(id.into()),
        }
    }

    /// The request id, if any.
    pub fn request_id(&self) -> Option<&str> {
        self.request_id.as_deref()
    }
}

/// Leveled logging.
///
/// Implementors supply [`Log::log`]; every other method forwards to it.
pub trait Log: Send + Sync {
    /// Write one entry.
    fn log(
        &self,
        level: Level,
        message: &str,
        fields: &[Field<'_>],
        error: Option<&dyn fmt::Display>,
    );

    fn debug(&self, message: &str) {
        self.log(Level::Debug, message, &[], None);
    }

    fn debugf(&self, args: fmt::Arguments<'_>) {
        self.log(Level::Debug, &args.to_string(), &[], None);
    }

    fn debugw(&self, message: &str, fields: &[Field<'_>]) {
        self.log(Level::Debug, message, fields, None);
    }

    fn info(&self, message: &str) {
        self.log(Level::Info, message, &[], None);
    }

    fn infof(&self, args: fmt::Arguments<'_>) {
        self.log(Level::Info, &args.to_string(), &[], None);
    }

    fn infow(&self, message: &str, fields: &[Field<'_>]) {
        self.log(Level::Info, message, fields, None);
    }

    fn warn(&self, message: &str) {
        self.log(Level::Warn, message, &[], None);
    }

    fn warnf(&self, args: fmt::Arguments<'_>) {
        self.log(Level::Warn, &args.to_string(), &[], None);
    }

    fn warnw(&self, message: &str, fields: &[Field<'_>]) {
        self.log(Level::Warn, message, fields, None);
    }

    fn error(&self, message: &str) {
        self.log(Level::Error, message, &[], None);
    }

    fn errorf(&self, args: fmt::Arguments<'_>) {
        self.log(Level::Error, &args.to_string(), &[], None);
    }

    fn errorw(&self, message: &str, fields: &[Field<'_>]) {
        self.log(Level::Error, message, fields, None);
    }

    /// Log an error at error level with a message.
    fn err(&self, err: &dyn fmt::Display, message: &str) {
        self.log(Level::Error, message, &[], Some(err));
    }

    fn errf(&self, err: &dyn fmt::Display, args: fmt::Arguments<'_>) {
        self.log(Level::Error, &args.to_string(), &[], Some(err));
    }

    fn errw(&self, err: &dyn fmt::Display, message: &str, fields: &[Field<'_>]) {
        self.log(Level::Error, message, fields, Some(err));
    }
}

/// Logging bound to an explicit [`LogContext`].
pub trait ContextLog: Send + Sync {
    /// Write one entry carrying the context's fields.
    fn log_ctx(
        &self,
        ctx: &LogContext,
        level: Level,
        message: &str,
        fields: &[Field<'_>],
        error: Option<&dyn fmt::Display>,
    );

    fn debug_ctx(&self, ctx: &LogContext, message: &str) {
        self.log_ctx(ctx, Level::Debug, message, &[], None);
    }

    fn debugf_ctx(&self, ctx: &LogContext, args: fmt::Arguments<'_>) {
        self.log_ctx(ctx, Level::Debug, &args.to_string(), &[], None);
    }

    fn debugw_ctx(&self, ctx: &LogContext, message: &str, fields: &[Field<'_>]) {
        self.log_ctx(ctx, Level::Debug, message, fields, None);
    }

    fn info_ctx(&self, ctx: &LogContext, message: &str) {
        self.log_ctx(ctx, Level::Info, message, &[], None);
    }

    fn infof_ctx(&self, ctx: &LogContext, args: fmt::Arguments<'_>) {
        self.log_ctx(ctx, Level::Info, &args.to_string(), &[], None);
    }

    fn infow_ctx(&self, ctx: &LogContext, message: &str, fields: &[Field<'_>]) {
        self.log_ctx(ctx, Level::Info, message, fields, None);
    }

    fn warn_ctx(&self, ctx: &LogContext, message: &str) {
        self.log_ctx(ctx, Level::Warn, message, &[], None);
    }

    fn warnf_ctx(&self, ctx: &LogContext, args: fmt::Arguments<'_>) {
        self.log_ctx(ctx, Level::Warn, &args.to_string(), &[], None);
    }

    fn warnw_ctx(&self, ctx: &LogContext, message: &str, fields: &[Field<'_>]) {
        self.log_ctx(ctx, Level::Warn, message, fields, None);
    }

    fn error_ctx(&self, ctx: &LogContext, message: &str) {
        self.log_ctx(ctx, Level::Error, message, &[], None);
    }

    fn errorf_ctx(&self, ctx: &LogContext, args: fmt::Arguments<'_>) {
        self.log_ctx(ctx, Level::Error, &args.to_string(), &[], None);
    }

    fn errorw_ctx(&self, ctx: &LogContext, message: &str, fields: &[Field<'_>]) {
        self.log_ctx(ctx, Level::Error, message, fields, None);
    }

    fn err_ctx(&self, ctx: &LogContext, err: &dyn fmt::Display, message: &str) {
        self.log_ctx(ctx, Level::Error, message, &[], Some(err));
    }

    fn errf_ctx(&self, ctx: &LogContext, err: &dyn fmt::Display, args: fmt::Arguments<'_>) {
        self.log_ctx(ctx, Level::Error, &args.to_string(), &[], Some(err));
    }

    fn errw_ctx(
        &self,
        ctx: &LogContext,
        err: &dyn fmt::Display,
        message: &str,
        fields: &[Field<'_>],
    ) {
        self.log_ctx(ctx, Level::Error, message, fields, Some(err));
    }
}

/// Log for startup and shutdown activity.
pub trait StartupLog: Log + ContextLog {}

impl<T: Log + ContextLog + ?Sized> StartupLog for T {}

/// Log for background tasks not tied to a request.
pub trait BackgroundLog: Log + ContextLog {
    /// A named child log; names nest with dots (`parent.child`).
    fn child_log(&self, name: &str) -> Arc<dyn BackgroundLog>;
}

/// Log for request handling, where a context is always present.
pub trait RequestLog: ContextLog {
    /// A log bound to `ctx` so callers need not pass it on every call.
    fn for_context(&self, ctx: LogContext) -> Arc<dyn Log>;
}

fn background_log(root: Arc<Logger>) -> anyhow::Result<Arc<dyn BackgroundLog>> {
    Ok(Arc::new(root.named("background")))
}

fn request_log(root: Arc<Logger>) -> anyhow::Result<Arc<dyn RequestLog>> {
    Ok(Arc::new(root.named("request")))
}

/// The `logging` component: background and request logs built from the
/// root [`Logger`], plus the variables that configure it.
pub fn component() -> Component {
    Component::new(
        "logging",
        vec![
            env::LOG_FORMAT,
            env::LOG_LEVEL,
            env::LOG_SAMPLE_EVERY,
            env::LOG_SAMPLE_INITIAL,
            env::LOG_SAMPLING_RATE,
        ],
        Providers::new()
            .provide(background_log)
            .provide(request_log),
    )
}
