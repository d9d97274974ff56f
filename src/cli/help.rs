//! cli::help
//!
//! Help rendering with the merged environment variables.
//!
//! Every node carries a [`HelpWriter`]. When a command is invoked with
//! `-h`/`--help`, or a container is invoked without a subcommand, the writer
//! receives the command's text, clap's usage block and the environment
//! variables merged for that node.

use std::io;
use std::sync::Arc;

use crate::core::config::EnvVar;

/// What a help writer knows about the command being described.
#[derive(Debug, Clone)]
pub struct HelpContext<'a> {
    pub short: &'a str,
    pub long: &'a str,
    /// The command builds and runs a graph.
    pub runnable: bool,
    pub has_subcommands: bool,
    /// Usage line and option/subcommand listing rendered by clap.
    pub usage: String,
}

/// Renders help for one command.
pub trait HelpWriter: Send + Sync {
    fn write(&self, out: &mut dyn io::Write, cmd: &HelpContext<'_>, env_vars: &[EnvVar])
        -> io::Result<()>;
}

/// The default layout:
///
/// ```text
/// <long or short description>
///
/// <usage and options>
///
/// Environment Variables:
/// NAME: description
/// ```
#[derive(Debug, Default, Clone, Copy)]
pub struct TemplateHelpWriter;

impl HelpWriter for TemplateHelpWriter {
    fn write(
        &self,
        out: &mut dyn io::Write,
        cmd: &HelpContext<'_>,
        env_vars: &[EnvVar],
    ) -> io::Result<()> {
        let text = if cmd.long.is_empty() { cmd.short } else { cmd.long };
        let text = text.trim_end();
        if !text.is_empty() {
            write!(out, "{}\n\n", text)?;
        }

        if cmd.runnable || cmd.has_subcommands {
            write!(out, "{}", cmd.usage.trim_end())?;
        }

        write!(out, "\n\nEnvironment Variables: ")?;
        for var in env_vars {
            write!(out, "\n{}: {}", var.name, var.description)?;
        }
        writeln!(out)
    }
}

/// Shared handle to the default writer.
pub fn template() -> Arc<dyn HelpWriter> {
    Arc::new(TemplateHelpWriter)
}
