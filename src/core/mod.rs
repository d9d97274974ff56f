//! core
//!
//! Building blocks shared by every command.
//!
//! # Modules
//!
//! - [`config`] - Layered key-value configuration store
//! - [`logging`] - Leveled logging capabilities on `tracing`
//! - [`graph`] - Dependency graph: providers, groups, lazy resolution
//! - [`component`] - Named bundles of providers and environment variables
//!
//! # Design Principles
//!
//! - Dependencies are declared by constructor signatures and checked
//!   before anything is built
//! - Configuration is read only through the store

pub mod component;
pub mod config;
pub mod graph;
pub mod logging;
