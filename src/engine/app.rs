//! engine::app
//!
//! The application controller driven by the service runner.
//!
//! [`App`] starts and stops the [`Lifecycle`] and waits for termination:
//! SIGINT, SIGTERM (unix) or an in-process [`Shutdowner::shutdown`].

use std::future::Future;
use std::io;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;

use super::lifecycle::{HookContext, Lifecycle};

/// Start, wait and stop an assembled application.
///
/// `start` and `stop` return once `ctx`'s deadline has passed.
#[async_trait]
pub trait AppController: Send + Sync {
    async fn start(&self, ctx: &HookContext) -> anyhow::Result<()>;

    /// Block until the process is asked to terminate.
    async fn wait_for_signal(&self);

    async fn stop(&self, ctx: &HookContext) -> anyhow::Result<()>;
}

/// Lets any dependency request a graceful shutdown.
#[derive(Debug)]
pub struct Shutdowner {
    tx: watch::Sender<bool>,
}

impl Default for Shutdowner {
    fn default() -> Self {
        Self::new()
    }
}

impl Shutdowner {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx }
    }

    /// Request shutdown. Idempotent.
    pub fn shutdown(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_shutdown(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once shutdown has been requested, immediately if it already was.
    pub async fn requested(&self) {
        let mut rx = self.tx.subscribe();
        while !*rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

/// The default controller over a lifecycle.
#[derive(Debug)]
pub struct App {
    lifecycle: Arc<Lifecycle>,
    shutdowner: Arc<Shutdowner>,
}

impl App {
    pub fn new(lifecycle: Arc<Lifecycle>, shutdowner: Arc<Shutdowner>) -> Self {
        Self {
            lifecycle,
            shutdowner,
        }
    }
}

#[async_trait]
impl AppController for App {
    async fn start(&self, ctx: &HookContext) -> anyhow::Result<()> {
        Ok(self.lifecycle.start(ctx).await?)
    }

    async fn wait_for_signal(&self) {
        tokio::select! {
            _ = interrupt() => {}
            _ = terminate() => {}
            _ = self.shutdowner.requested() => {}
        }
    }

    async fn stop(&self, ctx: &HookContext) -> anyhow::Result<()> {
        Ok(self.lifecycle.stop(ctx).await?)
    }
}

async fn interrupt() {
    delivered(tokio::signal::ctrl_c()).await
}

/// Resolves when `signal` fires; never if its handler failed to install.
async fn delivered<F>(signal: F)
where
    F: Future<Output = io::Result<()>>,
{
    if signal.await.is_err() {
        std::future::pending::<()>().await
    }
}

#[cfg(unix)]
async fn terminate() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut stream) => {
            stream.recv().await;
        }
        Err(_) => std::future::pending::<()>().await,
    }
}

#[cfg(not(unix))]
async fn terminate() {
    std::future::pending::<()>().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::logging::Logger;
    use std::time::Duration;

    #[tokio::test]
    async fn shutdown_before_wait_returns_immediately() {
        let shutdowner = Arc::new(Shutdowner::new());
        let app = App::new(
            Arc::new(Lifecycle::new(Arc::new(Logger::disabled()))),
            shutdowner.clone(),
        );

        shutdowner.shutdown();
        assert!(shutdowner.is_shutdown());
        tokio::time::timeout(Duration::from_secs(1), app.wait_for_signal())
            .await
            .expect("wait_for_signal should return after shutdown");
    }

    #[tokio::test]
    async fn shutdown_wakes_a_waiting_app() {
        let shutdowner = Arc::new(Shutdowner::new());
        let app = Arc::new(App::new(
            Arc::new(Lifecycle::new(Arc::new(Logger::disabled()))),
            shutdowner.clone(),
        ));

        let waiting = tokio::spawn({
            let app = app.clone();
            async move { app.wait_for_signal().await }
        });
        tokio::task::yield_now().await;
        assert!(!waiting.is_finished());

        shutdowner.shutdown();
        tokio::time::timeout(Duration::from_secs(1), waiting)
            .await
            .expect("waiting task should finish")
            .expect("waiting task should not panic");
    }

    #[tokio::test(start_paused = true)]
    async fn failed_signal_handler_never_resolves() {
        let failed = std::future::ready(Err(io::Error::other("no signal driver")));
        let waited = tokio::time::timeout(Duration::from_secs(3600), delivered(failed)).await;
        assert!(waited.is_err());

        let fired = std::future::ready(Ok(()));
        tokio::time::timeout(Duration::from_secs(1), delivered(fired))
            .await
            .expect("a delivered signal resolves");
    }
}
