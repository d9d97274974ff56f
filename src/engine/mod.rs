//! engine
//!
//! Turns a command's merged providers into something that runs.
//!
//! # Architecture
//!
//! ```text
//! Builder -> Container -> validate_config -> [register_services] -> Runner
//! ```
//!
//! - [`builder`] assembles the graph and produces a [`Runner`], or only
//!   checks the wiring
//! - [`runner`] holds the action and service runners
//! - [`lifecycle`] orders service start/stop hooks
//! - [`app`] is the controller a service runner drives
//! - [`service`] and [`validator`] define the grouped capabilities
//!
//! # Invariants
//!
//! - Validation never constructs a dependency or registers a hook
//! - Every validator runs before a build fails on validation
//! - Lifecycle failures reach the caller only as generic runner errors;
//!   details go to the startup log

pub mod app;
pub mod builder;
pub mod lifecycle;
pub mod runner;
pub mod service;
pub mod validator;

pub use app::{App, AppController, Shutdowner};
pub use builder::{BuildError, Builder, GraphBuilder, RunMode};
pub use lifecycle::{Hook, HookContext, Lifecycle, LifecycleError, LifecycleTimeouts};
pub use runner::{ActionAdapter, ActionRunner, Runner, RunnerError, RunnerState, ServiceRunner};
pub use service::{register_services, Service};
pub use validator::{validate_config, ValidationError, Validator};
