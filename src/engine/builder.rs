//! engine::builder
//!
//! Assembles the dependency graph for a runnable command.
//!
//! # Build
//!
//! [`Builder::build_runner`]:
//! 1. Builds the root [`Logger`] from configuration
//! 2. Assembles the graph from the default providers (configuration
//!    store, loggers, lifecycle, controller) and the command's merged
//!    providers
//! 3. Runs every config [`Validator`], failing in aggregate
//! 4. For service commands, registers a lifecycle hook per enabled service
//! 5. Resolves the runner
//!
//! # Validate
//!
//! [`Builder::validate`] assembles the same graph with a silent logger,
//! checks that everything `build_runner` would resolve has a provider and
//! no cycle, then constructs the validators and the runner's inputs (and
//! the services, for service commands). Validators are not run and no hook
//! is registered. Service commands additionally need at least one
//! registered service.

use std::sync::Arc;

use thiserror::Error;

use super::app::{App, AppController, Shutdowner};
use super::lifecycle::{Lifecycle, LifecycleTimeouts};
use super::runner::{ActionAdapter, ActionRunner, Runner, ServiceRunner};
use super::service::{register_services, Service};
use super::validator::{validate_config, ValidationError, Validator};
use crate::core::config::ConfigStore;
use crate::core::graph::{Container, GraphError, Group, Invoke, Providers, Slot};
use crate::core::logging::{Log, LogSettings, Logger, LoggingError, MemorySink, StartupLog};

/// Errors from building or validating a command's graph.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("unable to initialize logging: {0}")]
    Logging(#[from] LoggingError),

    #[error("unable to initialize app: {0}")]
    App(#[from] GraphError),

    #[error("unable to initialize app: {0}")]
    Validation(#[from] ValidationError),

    #[error("no services have been registered, you must register at least one Service implementation")]
    NoServices,
}

/// Builds runners for a command and validates its wiring.
pub trait Builder: Send + Sync {
    fn build_runner(
        &self,
        store: &Arc<ConfigStore>,
        providers: &[Providers],
    ) -> Result<Box<dyn Runner>, BuildError>;

    fn validate(&self, store: &Arc<ConfigStore>, providers: &[Providers]) -> Result<(), BuildError>;
}

/// Which runner a builder produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Action,
    Service,
}

/// The graph-backed [`Builder`].
#[derive(Debug, Clone)]
pub struct GraphBuilder {
    mode: RunMode,
    timeouts: LifecycleTimeouts,
    sink: Option<MemorySink>,
}

fn requirements_of<Args, F: Invoke<Args>>(_: &F) -> Vec<Slot> {
    F::requirements()
}

impl GraphBuilder {
    pub fn for_action() -> Self {
        Self {
            mode: RunMode::Action,
            timeouts: LifecycleTimeouts::default(),
            sink: None,
        }
    }

    pub fn for_service() -> Self {
        Self {
            mode: RunMode::Service,
            ..Self::for_action()
        }
    }

    /// Override the start/stop deadlines.
    pub fn with_timeouts(mut self, timeouts: LifecycleTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Write logs to `sink` instead of stderr.
    pub fn with_log_sink(mut self, sink: MemorySink) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn mode(&self) -> RunMode {
        self.mode
    }

    fn logger(&self, store: &ConfigStore) -> Result<Logger, LoggingError> {
        match &self.sink {
            Some(sink) => Ok(Logger::new(&LogSettings::from_config(store)?, sink.clone())),
            None => Logger::from_config(store),
        }
    }

    fn default_providers(&self, store: &Arc<ConfigStore>, logger: Logger) -> Providers {
        let lifecycle = Arc::new(
            Lifecycle::new(Arc::new(logger.named("lifecycle")))
                .with_rollback_timeout(self.timeouts.stop),
        );
        let shutdowner = Arc::new(Shutdowner::new());
        let app: Arc<dyn AppController> = Arc::new(App::new(lifecycle.clone(), shutdowner.clone()));
        let startup: Arc<dyn StartupLog> = Arc::new(logger.named("startup"));

        Providers::new()
            .supply(store.clone())
            .supply(Arc::new(logger))
            .supply(startup)
            .supply(app)
            .supply(lifecycle)
            .supply(shutdowner)
            .supply(Arc::new(self.timeouts))
    }

    fn container(
        &self,
        store: &Arc<ConfigStore>,
        logger: Logger,
        providers: &[Providers],
        graph_log: Option<Arc<dyn Log>>,
    ) -> Result<Container, GraphError> {
        let mut all = Vec::with_capacity(providers.len() + 1);
        all.push(self.default_providers(store, logger));
        all.extend(providers.iter().cloned());
        Container::new(&all, graph_log)
    }

    /// Everything a build resolves, for static verification.
    fn roots(&self) -> Vec<Slot> {
        let mut roots = requirements_of(&validate_config);
        match self.mode {
            RunMode::Action => roots.push(Slot::of::<Arc<dyn ActionAdapter>>()),
            RunMode::Service => {
                roots.extend(requirements_of(&register_services));
                roots.push(Slot::of::<Arc<dyn AppController>>());
                roots.push(Slot::of::<Arc<dyn StartupLog>>());
            }
        }
        roots
    }
}

impl Builder for GraphBuilder {
    fn build_runner(
        &self,
        store: &Arc<ConfigStore>,
        providers: &[Providers],
    ) -> Result<Box<dyn Runner>, BuildError> {
        let logger = self.logger(store)?;
        let graph_log: Arc<dyn Log> = Arc::new(logger.named("graph"));
        let container = self.container(store, logger, providers, Some(graph_log))?;

        container.verify(&self.roots())?;
        container.call(validate_config)??;

        match self.mode {
            RunMode::Action => {
                let adapter: Arc<dyn ActionAdapter> = container.resolve()?;
                Ok(Box::new(ActionRunner::new(adapter)))
            }
            RunMode::Service => {
                container.call(register_services)?;
                Ok(Box::new(ServiceRunner::new(
                    container.resolve()?,
                    container.resolve()?,
                    self.timeouts,
                )))
            }
        }
    }

    fn validate(&self, store: &Arc<ConfigStore>, providers: &[Providers]) -> Result<(), BuildError> {
        let container = self.container(store, Logger::disabled(), providers, None)?;
        container.verify(&self.roots())?;
        container.resolve::<Group<dyn Validator>>()?;

        match self.mode {
            RunMode::Action => {
                container.resolve::<Arc<dyn ActionAdapter>>()?;
            }
            RunMode::Service => {
                if container.group_len::<dyn Service>() == 0 {
                    return Err(BuildError::NoServices);
                }
                container.resolve::<Group<dyn Service>>()?;
                container.resolve::<Arc<dyn AppController>>()?;
                container.resolve::<Arc<dyn StartupLog>>()?;
            }
        }
        Ok(())
    }
}
