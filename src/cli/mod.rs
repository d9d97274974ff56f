//! cli
//!
//! Command-line interface layer.
//!
//! # Responsibilities
//!
//! - Hold the command tree and turn it into a clap command
//! - Bind flags and environment variables to the configuration store
//! - Hand runnable commands to their [`Builder`](crate::engine::Builder)
//!
//! The layer is thin: every dependency a command needs comes from the
//! components merged along its ancestry, and the engine builds and runs it.

pub mod command;
pub mod commands;
pub mod help;

pub use command::{CommandError, CommandTree, Entrypoint, FlagKind, Invocation, NodeId};
pub use help::{HelpContext, HelpWriter, TemplateHelpWriter};

use std::sync::Arc;

use anyhow::Result;

use crate::core::config::ConfigStore;

/// Run the CLI application.
///
/// This is the main entry point called from `main.rs`.
pub async fn run() -> Result<()> {
    let store = Arc::new(ConfigStore::new());
    store.load_defaults()?;

    let (tree, root) = commands::build()?;
    let entrypoint = Arc::new(tree).entrypoint(root, store);
    entrypoint.execute(std::env::args_os()).await
}
