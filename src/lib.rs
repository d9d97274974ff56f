//! deploy-runner - Compose CLI commands from components and run them
//!
//! A process is a tree of commands. Containers group commands; leaves are
//! either one-shot actions or long-running services. Each leaf runs a
//! dependency graph assembled from the components attached along its
//! ancestry.
//!
//! # Architecture
//!
//! The codebase follows a layered architecture:
//!
//! - [`cli`] - Command tree, flag and environment binding, help output
//! - [`engine`] - Builders, runners and the service lifecycle
//! - [`core`] - Configuration store, logging, components and the
//!   dependency graph
//! - [`services`] - The `services` component run by `deploy-runner serve`
//!
//! # Invariants
//!
//! 1. A container never builds a graph; a leaf always does
//! 2. Validation checks wiring without constructing anything
//! 3. Start and stop each run under their own deadline
//! 4. Lifecycle failures reach the caller only as generic errors

pub mod cli;
pub mod core;
pub mod engine;
pub mod services;
