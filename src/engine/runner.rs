//! engine::runner
//!
//! Executable units returned by a builder.
//!
//! # Runners
//!
//! - [`ActionRunner`] calls one [`ActionAdapter`] with the raw arguments and
//!   returns its result untouched.
//! - [`ServiceRunner`] starts the application, waits for a termination
//!   signal and stops it again.
//!
//! # Service Runner States
//!
//! ```text
//! NotStarted -> Starting -> Running -> Stopping -> Stopped
//!                   |                      |
//!                   +------> Failed <------+
//! ```
//!
//! Start and stop each get their own [`HookContext`] deadline. A start still
//! running at its deadline is a failure, but the controller keeps the stop
//! budget to unwind what it started; a start that completes in that window
//! is stopped again. Failures are logged in full through the startup log;
//! the caller only sees a generic [`RunnerError`]. A service runner runs at
//! most once.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use thiserror::Error;
use tokio::time::{timeout, timeout_at};

use super::app::AppController;
use super::lifecycle::{HookContext, LifecycleError, LifecycleTimeouts};
use crate::core::logging::StartupLog;

/// Errors surfaced by [`ServiceRunner::run`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RunnerError {
    #[error("unable to start app")]
    Start,

    #[error("unable to stop app")]
    Stop,

    #[error("runner has already been run")]
    AlreadyRun,
}

/// Something a command runs with its raw arguments.
#[async_trait]
pub trait Runner: Send + Sync {
    async fn run(&self, args: &[String]) -> anyhow::Result<()>;
}

/// A one-shot action behind an action command.
#[async_trait]
pub trait ActionAdapter: Send + Sync {
    async fn execute(&self, args: &[String]) -> anyhow::Result<()>;
}

/// Runs an [`ActionAdapter`] once.
pub struct ActionRunner {
    adapter: Arc<dyn ActionAdapter>,
}

impl ActionRunner {
    pub fn new(adapter: Arc<dyn ActionAdapter>) -> Self {
        Self { adapter }
    }
}

#[async_trait]
impl Runner for ActionRunner {
    async fn run(&self, args: &[String]) -> anyhow::Result<()> {
        self.adapter.execute(args).await
    }
}

/// Service runner state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerState {
    NotStarted,
    Starting,
    Running,
    Stopping,
    Stopped,
    Failed,
}

/// Drives an [`AppController`] through start, wait and stop.
pub struct ServiceRunner {
    app: Arc<dyn AppController>,
    log: Arc<dyn StartupLog>,
    timeouts: LifecycleTimeouts,
    state: Mutex<RunnerState>,
}

impl ServiceRunner {
    pub fn new(
        app: Arc<dyn AppController>,
        log: Arc<dyn StartupLog>,
        timeouts: LifecycleTimeouts,
    ) -> Self {
        Self {
            app,
            log,
            timeouts,
            state: Mutex::new(RunnerState::NotStarted),
        }
    }

    pub fn state(&self) -> RunnerState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, state: RunnerState) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = state;
    }

    fn begin(&self) -> Result<(), RunnerError> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if *state != RunnerState::NotStarted {
            return Err(RunnerError::AlreadyRun);
        }
        *state = RunnerState::Starting;
        Ok(())
    }

    async fn start(&self) -> anyhow::Result<()> {
        let ctx = HookContext::with_timeout(self.timeouts.start);
        let timed_out = LifecycleError::Timeout {
            phase: "start",
            after: ctx.budget(),
        };

        let mut start = self.app.start(&ctx);
        if let Ok(result) = timeout_at(ctx.deadline(), &mut start).await {
            return result;
        }
        match timeout(self.timeouts.stop, &mut start).await {
            Ok(Err(e)) => Err(e),
            Ok(Ok(())) => {
                if let Err(e) = self.stop().await {
                    self.log.err(&e, "Error stopping app after late start");
                }
                Err(timed_out.into())
            }
            Err(_) => Err(timed_out.into()),
        }
    }

    async fn stop(&self) -> anyhow::Result<()> {
        let ctx = HookContext::with_timeout(self.timeouts.stop);
        match timeout_at(ctx.deadline(), self.app.stop(&ctx)).await {
            Ok(result) => result,
            Err(_) => Err(LifecycleError::Timeout {
                phase: "stop",
                after: ctx.budget(),
            }
            .into()),
        }
    }
}

#[async_trait]
impl Runner for ServiceRunner {
    async fn run(&self, _args: &[String]) -> anyhow::Result<()> {
        self.begin()?;

        if let Err(e) = self.start().await {
            self.log.err(&e, "Error starting app");
            self.set_state(RunnerState::Failed);
            return Err(RunnerError::Start.into());
        }
        self.set_state(RunnerState::Running);
        self.log.info("Application started");

        self.app.wait_for_signal().await;

        self.set_state(RunnerState::Stopping);
        self.log.info("Stopping application");
        if let Err(e) = self.stop().await {
            self.log.err(&e, "Error stopping app");
            self.set_state(RunnerState::Failed);
            return Err(RunnerError::Stop.into());
        }
        self.set_state(RunnerState::Stopped);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::logging::{LogSettings, Logger, MemorySink};
    use crate::engine::app::{App, Shutdowner};
    use crate::engine::lifecycle::{Hook, HookFuture, Lifecycle};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    /// Scripted controller recording every call.
    #[derive(Default)]
    struct MockController {
        calls: Mutex<Vec<&'static str>>,
        start_error: Option<&'static str>,
        stop_error: Option<&'static str>,
        start_delay: Option<Duration>,
        stop_delay: Option<Duration>,
    }

    impl MockController {
        fn calls(&self) -> Vec<&'static str> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl AppController for MockController {
        async fn start(&self, _ctx: &HookContext) -> anyhow::Result<()> {
            self.calls.lock().unwrap().push("start");
            if let Some(delay) = self.start_delay {
                tokio::time::sleep(delay).await;
            }
            match self.start_error {
                Some(message) => anyhow::bail!(message),
                None => Ok(()),
            }
        }

        async fn wait_for_signal(&self) {
            self.calls.lock().unwrap().push("wait");
        }

        async fn stop(&self, _ctx: &HookContext) -> anyhow::Result<()> {
            self.calls.lock().unwrap().push("stop");
            if let Some(delay) = self.stop_delay {
                tokio::time::sleep(delay).await;
            }
            match self.stop_error {
                Some(message) => anyhow::bail!(message),
                None => Ok(()),
            }
        }
    }

    fn runner(controller: Arc<MockController>, sink: &MemorySink) -> ServiceRunner {
        ServiceRunner::new(
            controller,
            Arc::new(Logger::new(&LogSettings::default(), sink.clone()).named("startup")),
            LifecycleTimeouts::default(),
        )
    }

    #[tokio::test]
    async fn starts_waits_then_stops() {
        let controller = Arc::new(MockController::default());
        let sink = MemorySink::new();
        let runner = runner(controller.clone(), &sink);

        runner.run(&[]).await.unwrap();
        assert_eq!(controller.calls(), vec!["start", "wait", "stop"]);
        assert_eq!(runner.state(), RunnerState::Stopped);
    }

    #[tokio::test]
    async fn start_failure_is_generic_and_skips_wait_and_stop() {
        let controller = Arc::new(MockController {
            start_error: Some("port 80 in use"),
            ..MockController::default()
        });
        let sink = MemorySink::new();
        let runner = runner(controller.clone(), &sink);

        let err = runner.run(&[]).await.unwrap_err();
        assert_eq!(err.downcast_ref::<RunnerError>(), Some(&RunnerError::Start));
        assert_eq!(err.to_string(), "unable to start app");
        assert_eq!(controller.calls(), vec!["start"]);
        assert_eq!(runner.state(), RunnerState::Failed);
        assert!(sink.contents().contains("port 80 in use"));
    }

    type Events = Arc<Mutex<Vec<String>>>;

    /// A hook recording its calls, sleeping `start_for`/`stop_for` first.
    fn slow_hook(name: &'static str, events: &Events, start_for: u64, stop_for: u64) -> Hook {
        let on_start = events.clone();
        let on_stop = events.clone();
        Hook::new(
            name,
            Box::new(move |_: HookContext| -> HookFuture {
                let events = on_start.clone();
                Box::pin(async move {
                    if start_for > 0 {
                        tokio::time::sleep(Duration::from_secs(start_for)).await;
                    }
                    events.lock().unwrap().push(format!("start:{name}"));
                    Ok(())
                })
            }),
            Box::new(move |_: HookContext| -> HookFuture {
                let events = on_stop.clone();
                Box::pin(async move {
                    if stop_for > 0 {
                        tokio::time::sleep(Duration::from_secs(stop_for)).await;
                    }
                    events.lock().unwrap().push(format!("stop:{name}"));
                    Ok(())
                })
            }),
        )
    }

    /// A runner over a real [`App`] that is asked to shut down up front.
    fn app_runner(hooks: Vec<Hook>, sink: &MemorySink) -> ServiceRunner {
        let lifecycle = Lifecycle::new(Arc::new(Logger::disabled()));
        for hook in hooks {
            lifecycle.append(hook);
        }
        let shutdowner = Arc::new(Shutdowner::new());
        shutdowner.shutdown();
        ServiceRunner::new(
            Arc::new(App::new(Arc::new(lifecycle), shutdowner)),
            Arc::new(Logger::new(&LogSettings::default(), sink.clone()).named("startup")),
            LifecycleTimeouts::default(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn start_past_deadline_stops_started_hooks() {
        let events = Events::default();
        let sink = MemorySink::new();
        let runner = app_runner(
            vec![slow_hook("a", &events, 0, 0), slow_hook("b", &events, 60, 0)],
            &sink,
        );

        let err = runner.run(&[]).await.unwrap_err();
        assert_eq!(err.to_string(), "unable to start app");
        assert_eq!(runner.state(), RunnerState::Failed);
        assert_eq!(*events.lock().unwrap(), vec!["start:a", "stop:a"]);
        assert!(sink.contents().contains("start timed out after 30s"));
    }

    #[tokio::test(start_paused = true)]
    async fn immediate_signal_still_stops_with_own_budget() {
        let events = Events::default();
        let sink = MemorySink::new();
        let runner = app_runner(vec![slow_hook("a", &events, 29, 29)], &sink);

        runner.run(&[]).await.unwrap();
        assert_eq!(*events.lock().unwrap(), vec!["start:a", "stop:a"]);
        assert_eq!(runner.state(), RunnerState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_past_deadline_fails() {
        let events = Events::default();
        let sink = MemorySink::new();
        let runner = app_runner(
            vec![slow_hook("a", &events, 0, 0), slow_hook("b", &events, 0, 45)],
            &sink,
        );

        let err = runner.run(&[]).await.unwrap_err();
        assert_eq!(err.downcast_ref::<RunnerError>(), Some(&RunnerError::Stop));
        assert_eq!(*events.lock().unwrap(), vec!["start:a", "start:b", "stop:a"]);
        assert!(sink.contents().contains("b: stop timed out after 30s"));
    }

    #[tokio::test(start_paused = true)]
    async fn late_start_is_stopped_and_reported() {
        let controller = Arc::new(MockController {
            start_delay: Some(Duration::from_secs(31)),
            ..MockController::default()
        });
        let sink = MemorySink::new();
        let runner = runner(controller.clone(), &sink);

        let err = runner.run(&[]).await.unwrap_err();
        assert_eq!(err.to_string(), "unable to start app");
        assert_eq!(controller.calls(), vec!["start", "stop"]);
        assert!(sink.contents().contains("start timed out after 30s"));
    }

    #[tokio::test(start_paused = true)]
    async fn hung_controller_is_abandoned_after_both_budgets() {
        let controller = Arc::new(MockController {
            start_delay: Some(Duration::from_secs(600)),
            ..MockController::default()
        });
        let sink = MemorySink::new();
        let runner = runner(controller.clone(), &sink);

        let started = tokio::time::Instant::now();
        let err = runner.run(&[]).await.unwrap_err();
        assert_eq!(err.downcast_ref::<RunnerError>(), Some(&RunnerError::Start));
        assert_eq!(started.elapsed(), Duration::from_secs(60));
        assert_eq!(controller.calls(), vec!["start"]);
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_stop_is_cut_off_at_its_deadline() {
        let controller = Arc::new(MockController {
            stop_delay: Some(Duration::from_secs(45)),
            ..MockController::default()
        });
        let sink = MemorySink::new();
        let runner = runner(controller, &sink);

        let err = runner.run(&[]).await.unwrap_err();
        assert_eq!(err.downcast_ref::<RunnerError>(), Some(&RunnerError::Stop));
        assert!(sink.contents().contains("stop timed out after 30s"));
    }

    #[tokio::test]
    async fn stop_failure_is_generic() {
        let controller = Arc::new(MockController {
            stop_error: Some("listener stuck"),
            ..MockController::default()
        });
        let sink = MemorySink::new();
        let runner = runner(controller, &sink);

        let err = runner.run(&[]).await.unwrap_err();
        assert_eq!(err.to_string(), "unable to stop app");
        assert_eq!(runner.state(), RunnerState::Failed);
        assert!(sink.contents().contains("listener stuck"));
    }

    #[tokio::test]
    async fn service_runner_is_not_reentrant() {
        let controller = Arc::new(MockController::default());
        let sink = MemorySink::new();
        let runner = runner(controller.clone(), &sink);

        runner.run(&[]).await.unwrap();
        let err = runner.run(&[]).await.unwrap_err();
        assert_eq!(err.downcast_ref::<RunnerError>(), Some(&RunnerError::AlreadyRun));
        assert_eq!(controller.calls().len(), 3);
    }

    struct Recorder {
        seen: Mutex<Vec<String>>,
        calls: AtomicUsize,
        fail: AtomicBool,
    }

    #[async_trait]
    impl ActionAdapter for Recorder {
        async fn execute(&self, args: &[String]) -> anyhow::Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().unwrap().extend(args.iter().cloned());
            if self.fail.load(Ordering::SeqCst) {
                anyhow::bail!("deploy target unreachable");
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn action_runner_passes_args_and_returns_error_verbatim() {
        let adapter = Arc::new(Recorder {
            seen: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
            fail: AtomicBool::new(false),
        });
        let runner = ActionRunner::new(adapter.clone());

        runner
            .run(&["plan".to_string(), "prod".to_string()])
            .await
            .unwrap();
        assert_eq!(*adapter.seen.lock().unwrap(), vec!["plan", "prod"]);

        adapter.fail.store(true, Ordering::SeqCst);
        let err = runner.run(&[]).await.unwrap_err();
        assert_eq!(err.to_string(), "deploy target unreachable");
        assert_eq!(adapter.calls.load(Ordering::SeqCst), 2);
    }
}
