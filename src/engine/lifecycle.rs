//! engine::lifecycle
//!
//! Ordered start/stop hooks for long-running services.
//!
//! # Ordering
//!
//! - Start hooks run sequentially in registration order. The first failure
//!   aborts startup; hooks that already started are stopped again in
//!   reverse before the error is returned.
//! - Stop hooks run sequentially in reverse registration order. Every hook
//!   runs even when an earlier one fails; failures are collected.
//!
//! Every hook runs under the deadline of the [`HookContext`] it is given. A
//! start hook still running at the deadline fails startup like any other
//! error, and the rollback gets a fresh stop budget. A stop hook still
//! running at the deadline is recorded as failed and the remaining hooks
//! still run.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use thiserror::Error;
use tokio::time::{timeout_at, Instant};

use super::service::Service;
use crate::core::logging::Log;

/// Default deadline for starting every service.
pub const DEFAULT_START_TIMEOUT: Duration = Duration::from_secs(30);

/// Default deadline for stopping every service.
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(30);

/// Deadlines applied to the start and stop phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LifecycleTimeouts {
    pub start: Duration,
    pub stop: Duration,
}

impl Default for LifecycleTimeouts {
    fn default() -> Self {
        Self {
            start: DEFAULT_START_TIMEOUT,
            stop: DEFAULT_STOP_TIMEOUT,
        }
    }
}

/// Errors from running hooks.
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("start hook '{hook}' failed: {cause:#}")]
    Start { hook: String, cause: anyhow::Error },

    #[error("{count} stop hook(s) failed: {summary}")]
    Stop { count: usize, summary: String },

    #[error("{phase} timed out after {after:?}")]
    Timeout { phase: &'static str, after: Duration },
}

/// Context handed to every hook.
#[derive(Debug, Clone, Copy)]
pub struct HookContext {
    deadline: Instant,
    budget: Duration,
}

impl HookContext {
    /// A context whose deadline is `timeout` from now.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            deadline: Instant::now() + timeout,
            budget: timeout,
        }
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// The timeout this context was created with.
    pub fn budget(&self) -> Duration {
        self.budget
    }

    /// Time left before the deadline; zero once it has passed.
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }
}

/// Future returned by a hook.
pub type HookFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;

/// A start or stop callback.
pub type HookFn = Box<dyn Fn(HookContext) -> HookFuture + Send + Sync>;

/// A named start/stop pair.
pub struct Hook {
    name: String,
    on_start: HookFn,
    on_stop: HookFn,
}

impl Hook {
    pub fn new(name: impl Into<String>, on_start: HookFn, on_stop: HookFn) -> Self {
        Self {
            name: name.into(),
            on_start,
            on_stop,
        }
    }

    /// A hook starting and stopping `service`.
    pub fn for_service(service: Arc<dyn Service>) -> Self {
        let starting = service.clone();
        let stopping = service.clone();
        Self::new(
            service.name(),
            Box::new(move |ctx: HookContext| -> HookFuture {
                let service = starting.clone();
                Box::pin(async move { service.start(&ctx).await })
            }),
            Box::new(move |ctx: HookContext| -> HookFuture {
                let service = stopping.clone();
                Box::pin(async move { service.stop(&ctx).await })
            }),
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hook").field("name", &self.name).finish()
    }
}

/// Registry of hooks for one application instance.
pub struct Lifecycle {
    hooks: Mutex<Vec<Arc<Hook>>>,
    rollback_timeout: Duration,
    log: Arc<dyn Log>,
}

impl fmt::Debug for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lifecycle")
            .field("hooks", &self.snapshot())
            .finish()
    }
}

impl Lifecycle {
    pub fn new(log: Arc<dyn Log>) -> Self {
        Self {
            hooks: Mutex::new(Vec::new()),
            rollback_timeout: DEFAULT_STOP_TIMEOUT,
            log,
        }
    }

    /// Budget for stopping the hooks that started before a failed start.
    pub fn with_rollback_timeout(mut self, timeout: Duration) -> Self {
        self.rollback_timeout = timeout;
        self
    }

    /// Register a hook after every existing one.
    pub fn append(&self, hook: Hook) {
        self.hooks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(Arc::new(hook));
    }

    pub fn len(&self) -> usize {
        self.hooks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn snapshot(&self) -> Vec<Arc<Hook>> {
        self.hooks.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Run start hooks in order, rolling back on the first failure.
    pub async fn start(&self, ctx: &HookContext) -> Result<(), LifecycleError> {
        let hooks = self.snapshot();
        for (index, hook) in hooks.iter().enumerate() {
            self.log.debugf(format_args!("START\t{}", hook.name));
            let failure = match timeout_at(ctx.deadline(), (hook.on_start)(*ctx)).await {
                Ok(Ok(())) => continue,
                Ok(Err(cause)) => LifecycleError::Start {
                    hook: hook.name.clone(),
                    cause,
                },
                Err(_) => LifecycleError::Timeout {
                    phase: "start",
                    after: ctx.budget(),
                },
            };
            self.log.errw(&failure, "start hook failed", &[("hook", &hook.name)]);
            self.rollback(&hooks[..index]).await;
            return Err(failure);
        }
        Ok(())
    }

    async fn rollback(&self, started: &[Arc<Hook>]) {
        let ctx = HookContext::with_timeout(self.rollback_timeout);
        for hook in started.iter().rev() {
            self.log.debugf(format_args!("ROLLBACK\t{}", hook.name));
            if let Err(e) = run_stop(hook, &ctx).await {
                self.log.errw(&e, "rollback stop hook failed", &[("hook", &hook.name)]);
            }
        }
    }

    /// Run every stop hook in reverse order, collecting failures.
    pub async fn stop(&self, ctx: &HookContext) -> Result<(), LifecycleError> {
        let mut failures = Vec::new();
        for hook in self.snapshot().iter().rev() {
            self.log.debugf(format_args!("STOP\t{}", hook.name));
            if let Err(e) = run_stop(hook, ctx).await {
                self.log.errw(&e, "stop hook failed", &[("hook", &hook.name)]);
                failures.push(format!("{}: {:#}", hook.name, e));
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(LifecycleError::Stop {
                count: failures.len(),
                summary: failures.join("; "),
            })
        }
    }
}

async fn run_stop(hook: &Hook, ctx: &HookContext) -> anyhow::Result<()> {
    match timeout_at(ctx.deadline(), (hook.on_stop)(*ctx)).await {
        Ok(result) => result,
        Err(_) => Err(LifecycleError::Timeout {
            phase: "stop",
            after: ctx.budget(),
        }
        .into()),
    }
}
