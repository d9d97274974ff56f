//! cli::commands
//!
//! The `deploy-runner` process topology.
//!
//! ```text
//! deploy-runner            container; logging component, --log-level, --log-format
//! ├── serve                service; services component
//! ├── version              action
//! └── check                action
//! ```

mod check;
mod version;

use crate::cli::command::{CommandError, CommandTree, NodeId};
use crate::cli::help;
use crate::core::config::keys;
use crate::core::logging;
use crate::services;

/// Build the tree; returns it with the root node.
pub fn build() -> Result<(CommandTree, NodeId), CommandError> {
    let mut tree = CommandTree::new();

    let root = tree.container(
        "deploy-runner",
        "Run deployment actions and services",
        "deploy-runner composes its commands from components that bring their \
         own providers and environment variables.",
        help::template(),
    );
    tree.add_component(root, logging::component());
    tree.string_flag(
        root,
        keys::LOG_LEVEL,
        "log-level",
        "Minimum log level (debug, info, warn, error)",
    );
    tree.string_flag(root, keys::LOG_FORMAT, "log-format", "Log format (json, console)");

    let serve = tree.service(
        "serve",
        "Run the deploy runner services until interrupted",
        "",
        help::template(),
    );
    tree.add_component(serve, services::component());

    let version = tree.action("version", "Print the version", "", version::providers(), vec![]);
    let check = tree.action(
        "check",
        "Validate the wiring of every command",
        "",
        check::providers(),
        vec![],
    );

    tree.add_command(root, &[serve, version, check])?;
    Ok((tree, root))
}
