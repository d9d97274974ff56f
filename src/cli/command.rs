//! cli::command
//!
//! The command tree and its clap entry point.
//!
//! # Tree
//!
//! A [`CommandTree`] is an arena of nodes addressed by [`NodeId`]. A node is
//! either a container, which only groups children, or a runnable leaf backed
//! by a [`Builder`]. Children are owned by their parent's child list; the
//! parent link is an index used only to walk the ancestry.
//!
//! The tree is mutated while the process topology is defined and frozen in
//! an `Arc` afterwards. [`CommandTree::entrypoint`] turns the frozen tree
//! into an [`Entrypoint`]; [`CommandTree::validate`] checks wiring.
//!
//! # Merges
//!
//! Invoking a node merges contributions from the node and its ancestors:
//!
//! - Components, keyed by name. The walk goes from the node up to the root
//!   and later writes overwrite earlier ones, so on a name collision the
//!   most distant ancestor wins.
//! - Flag bindings, keyed by flag name, with the same rule.
//! - Environment variables: those of the merged components plus the node's
//!   own [`CommandTree::bind_env`] entries. Ancestors' own entries are not
//!   included. Deduplicated by variable name and sorted by it.
//!
//! # Invocation
//!
//! Before a leaf runs, every merged flag is bound to its configuration key
//! and every merged environment variable to its key. The builder then
//! assembles the graph and the runner gets the trailing arguments.

use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::ffi::OsString;
use std::fmt;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use clap::parser::ValueSource;
use clap::{Arg, ArgAction, ArgMatches};
use thiserror::Error;

use super::help::{self, HelpContext, HelpWriter};
use crate::core::component::Component;
use crate::core::config::{keys, parse_duration, ConfigError, ConfigStore, EnvVar, FlagValue, Key};
use crate::core::graph::Providers;
use crate::engine::{BuildError, Builder, GraphBuilder};

const HELP: &str = "help";
const ARGS: &str = "args";
const USAGE_TEMPLATE: &str = "{usage-heading} {usage}\n\n{all-args}";

/// Errors from binding or validating a command.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("bad flag binding flag {flag} not found")]
    FlagNotFound { flag: String },

    #[error("unable to bind flag {flag} to config key {key}: {error}")]
    BindFlag {
        flag: String,
        key: Key,
        error: ConfigError,
    },

    #[error("unable to bind env var {name} to config key {key}: {error}")]
    BindEnv {
        name: String,
        key: Key,
        error: ConfigError,
    },

    #[error("'{command}' is not a container and cannot have subcommands")]
    NotAContainer { command: String },

    #[error("'{command}' is already attached to '{parent}'")]
    AlreadyAttached { command: String, parent: String },

    #[error("'{command}' cannot be attached below itself")]
    Cycle { command: String },

    #[error(transparent)]
    Build(#[from] BuildError),

    #[error("validation of '{command}' failed: {error}")]
    Validation { command: String, error: BuildError },
}

/// Index of a node in its [`CommandTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

/// Value type of a declared flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlagKind {
    Int,
    String,
    Bool,
    Duration,
}

#[derive(Debug, Clone)]
struct FlagSpec {
    name: &'static str,
    kind: FlagKind,
    usage: &'static str,
}

impl FlagSpec {
    fn arg(&self, persistent: bool) -> Arg {
        let arg = Arg::new(self.name)
            .long(self.name)
            .help(self.usage)
            .global(persistent);
        match self.kind {
            FlagKind::Int => arg
                .action(ArgAction::Set)
                .value_parser(clap::value_parser!(i64))
                .default_value("0"),
            FlagKind::String => arg.action(ArgAction::Set),
            FlagKind::Bool => arg.action(ArgAction::SetTrue),
            FlagKind::Duration => arg
                .action(ArgAction::Set)
                .value_parser(duration_arg)
                .default_value("1s"),
        }
    }
}

fn duration_arg(raw: &str) -> Result<Duration, String> {
    parse_duration(raw).ok_or_else(|| format!("invalid duration '{}'", raw))
}

enum NodeKind {
    Container,
    Runnable(Arc<dyn Builder>),
}

struct CommandNode {
    name: &'static str,
    short: &'static str,
    long: &'static str,
    kind: NodeKind,
    help: Arc<dyn HelpWriter>,
    children: Vec<NodeId>,
    parent: Option<NodeId>,
    flags: Vec<FlagSpec>,
    flag_bindings: BTreeMap<&'static str, Key>,
    extra_env: Vec<EnvVar>,
    components: Vec<Component>,
    providers: Option<Providers>,
}

/// Arena of command nodes.
#[derive(Default)]
pub struct CommandTree {
    nodes: Vec<CommandNode>,
}

impl fmt::Debug for CommandTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.nodes.iter().map(|n| n.name))
            .finish()
    }
}

impl CommandTree {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(
        &mut self,
        name: &'static str,
        short: &'static str,
        long: &'static str,
        kind: NodeKind,
        help: Arc<dyn HelpWriter>,
    ) -> NodeId {
        self.nodes.push(CommandNode {
            name,
            short,
            long,
            kind,
            help,
            children: Vec::new(),
            parent: None,
            flags: Vec::new(),
            flag_bindings: BTreeMap::new(),
            extra_env: Vec::new(),
            components: Vec::new(),
            providers: None,
        });
        NodeId(self.nodes.len() - 1)
    }

    /// A node that only groups subcommands.
    pub fn container(
        &mut self,
        name: &'static str,
        short: &'static str,
        long: &'static str,
        help: Arc<dyn HelpWriter>,
    ) -> NodeId {
        self.push(name, short, long, NodeKind::Container, help)
    }

    /// A one-shot command; `adapter` must provide an `ActionAdapter`.
    pub fn action(
        &mut self,
        name: &'static str,
        short: &'static str,
        long: &'static str,
        adapter: Providers,
        env_vars: Vec<EnvVar>,
    ) -> NodeId {
        let id = self.leaf(
            name,
            short,
            long,
            Arc::new(GraphBuilder::for_action()),
            help::template(),
        );
        let node = self.node_mut(id);
        node.providers = Some(adapter);
        node.extra_env = env_vars;
        id
    }

    /// A long-running command driven by the services of its components.
    pub fn service(
        &mut self,
        name: &'static str,
        short: &'static str,
        long: &'static str,
        help: Arc<dyn HelpWriter>,
    ) -> NodeId {
        self.leaf(name, short, long, Arc::new(GraphBuilder::for_service()), help)
    }

    /// A runnable node with a caller-supplied builder.
    pub fn leaf(
        &mut self,
        name: &'static str,
        short: &'static str,
        long: &'static str,
        builder: Arc<dyn Builder>,
        help: Arc<dyn HelpWriter>,
    ) -> NodeId {
        self.push(name, short, long, NodeKind::Runnable(builder), help)
    }

    fn node(&self, id: NodeId) -> &CommandNode {
        &self.nodes[id.0]
    }

    fn node_mut(&mut self, id: NodeId) -> &mut CommandNode {
        &mut self.nodes[id.0]
    }

    /// Extra providers for a node, added after its components' providers.
    pub fn provide(&mut self, id: NodeId, providers: Providers) {
        let node = self.node_mut(id);
        node.providers = Some(match node.providers.take() {
            Some(existing) => existing.extend(&providers),
            None => providers,
        });
    }

    pub fn add_component(&mut self, id: NodeId, component: Component) {
        self.node_mut(id).components.push(component);
    }

    /// Attach children to a container and point them back at it.
    ///
    /// A node has at most one parent. Nothing is attached unless every
    /// child is detached and not an ancestor of `parent`.
    pub fn add_command(&mut self, parent: NodeId, children: &[NodeId]) -> Result<(), CommandError> {
        if !self.is_container(parent) {
            return Err(CommandError::NotAContainer {
                command: self.name(parent).to_string(),
            });
        }
        let ancestry = self.ancestry(parent);
        for (i, &child) in children.iter().enumerate() {
            let attached_to = if children[..i].contains(&child) {
                Some(parent)
            } else {
                self.parent(child)
            };
            if let Some(existing) = attached_to {
                return Err(CommandError::AlreadyAttached {
                    command: self.name(child).to_string(),
                    parent: self.name(existing).to_string(),
                });
            }
            if ancestry.contains(&child) {
                return Err(CommandError::Cycle {
                    command: self.name(child).to_string(),
                });
            }
        }
        for &child in children {
            self.set_parent(child, parent);
            self.node_mut(parent).children.push(child);
        }
        Ok(())
    }

    /// Set the upward link only.
    pub fn set_parent(&mut self, child: NodeId, parent: NodeId) {
        self.node_mut(child).parent = Some(parent);
    }

    fn flag(&mut self, id: NodeId, key: Key, name: &'static str, usage: &'static str, kind: FlagKind) {
        let node = self.node_mut(id);
        node.flags.push(FlagSpec { name, kind, usage });
        node.flag_bindings.insert(name, key);
    }

    /// Declare `--name` (default 0) bound to `key`.
    pub fn int_flag(&mut self, id: NodeId, key: Key, name: &'static str, usage: &'static str) {
        self.flag(id, key, name, usage, FlagKind::Int);
    }

    /// Declare `--name` (default empty) bound to `key`.
    pub fn string_flag(&mut self, id: NodeId, key: Key, name: &'static str, usage: &'static str) {
        self.flag(id, key, name, usage, FlagKind::String);
    }

    /// Declare the switch `--name` bound to `key`.
    pub fn bool_flag(&mut self, id: NodeId, key: Key, name: &'static str, usage: &'static str) {
        self.flag(id, key, name, usage, FlagKind::Bool);
    }

    /// Declare `--name` (default `1s`) bound to `key`.
    pub fn duration_flag(&mut self, id: NodeId, key: Key, name: &'static str, usage: &'static str) {
        self.flag(id, key, name, usage, FlagKind::Duration);
    }

    /// Bind an already declared flag, possibly an ancestor's, to another key.
    pub fn bind_flag(&mut self, id: NodeId, name: &'static str, key: Key) {
        self.node_mut(id).flag_bindings.insert(name, key);
    }

    pub fn bind_env(&mut self, id: NodeId, var: EnvVar) {
        self.node_mut(id).extra_env.push(var);
    }

    pub fn name(&self, id: NodeId) -> &'static str {
        self.node(id).name
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).parent
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.node(id).children
    }

    pub fn is_container(&self, id: NodeId) -> bool {
        matches!(self.node(id).kind, NodeKind::Container)
    }

    pub fn child_named(&self, id: NodeId, name: &str) -> Option<NodeId> {
        self.children(id)
            .iter()
            .copied()
            .find(|&child| self.name(child) == name)
    }

    /// The node followed by its ancestors up to the root.
    pub fn ancestry(&self, id: NodeId) -> Vec<NodeId> {
        let mut chain = vec![id];
        let mut current = self.parent(id);
        while let Some(parent) = current {
            if chain.len() > self.nodes.len() {
                break;
            }
            chain.push(parent);
            current = self.parent(parent);
        }
        chain
    }

    /// Space-separated command names from the root.
    pub fn path(&self, id: NodeId) -> String {
        let mut names: Vec<&str> = self.ancestry(id).iter().map(|&n| self.name(n)).collect();
        names.reverse();
        names.join(" ")
    }

    /// Runnable nodes at or below `id`, depth first.
    pub fn leaves(&self, id: NodeId) -> Vec<NodeId> {
        if !self.is_container(id) {
            return vec![id];
        }
        self.children(id)
            .iter()
            .flat_map(|&child| self.leaves(child))
            .collect()
    }

    /// Components reaching `id`, root-most level first.
    pub fn merged_components(&self, id: NodeId) -> Vec<Component> {
        let mut merged: HashMap<&str, ((usize, usize), &Component)> = HashMap::new();
        for (depth, level) in self.ancestry(id).into_iter().enumerate() {
            for (index, component) in self.node(level).components.iter().enumerate() {
                merged.insert(component.name(), ((depth, index), component));
            }
        }

        let mut ordered: Vec<_> = merged.into_values().collect();
        ordered.sort_by_key(|&((depth, index), _)| (Reverse(depth), index));
        ordered.into_iter().map(|(_, c)| c.clone()).collect()
    }

    pub fn merged_flag_bindings(&self, id: NodeId) -> BTreeMap<&'static str, Key> {
        let mut merged = BTreeMap::new();
        for level in self.ancestry(id) {
            for (&flag, &key) in &self.node(level).flag_bindings {
                merged.insert(flag, key);
            }
        }
        merged
    }

    /// Environment variables of the merged components and the node itself,
    /// sorted by name.
    pub fn merged_env_vars(&self, id: NodeId) -> Vec<EnvVar> {
        let mut merged: BTreeMap<&'static str, EnvVar> = BTreeMap::new();
        for component in self.merged_components(id) {
            for var in component.env_vars() {
                merged.insert(var.name, *var);
            }
        }
        for var in &self.node(id).extra_env {
            merged.insert(var.name, *var);
        }
        merged.into_values().collect()
    }

    /// Provider bundles for a build: merged components, then the node's own.
    pub fn merged_providers(&self, id: NodeId) -> Vec<Providers> {
        let mut providers: Vec<Providers> = self
            .merged_components(id)
            .iter()
            .map(|c| c.providers().clone())
            .collect();
        if let Some(own) = &self.node(id).providers {
            providers.push(own.clone());
        }
        providers
    }

    /// Flags present on the command built for `id`: its own and those of
    /// container ancestors.
    fn available_flags(&self, id: NodeId) -> HashSet<&'static str> {
        let mut flags: HashSet<&'static str> = self.node(id).flags.iter().map(|f| f.name).collect();
        for &ancestor in self.ancestry(id).iter().skip(1) {
            if self.is_container(ancestor) {
                flags.extend(self.node(ancestor).flags.iter().map(|f| f.name));
            }
        }
        flags
    }

    fn build_providers(self: &Arc<Self>, id: NodeId) -> Vec<Providers> {
        let mut providers = self.merged_providers(id);
        providers.push(Providers::new().supply(Arc::new(Invocation {
            tree: Arc::clone(self),
            node: id,
        })));
        providers
    }

    /// Check that a node would build, without running anything.
    ///
    /// Containers validate every leaf below them.
    pub fn validate(self: &Arc<Self>, id: NodeId, store: &Arc<ConfigStore>) -> Result<(), CommandError> {
        let builder = match &self.node(id).kind {
            NodeKind::Container => return self.validate_all(id, store),
            NodeKind::Runnable(builder) => builder,
        };

        store.set(keys::LOG_LEVEL.as_str(), "info");
        store.set(keys::LOG_FORMAT.as_str(), "console");

        builder
            .validate(store, &self.build_providers(id))
            .map_err(|error| CommandError::Validation {
                command: self.path(id),
                error,
            })
    }

    /// Validate every leaf at or below `id`, stopping at the first failure.
    pub fn validate_all(self: &Arc<Self>, id: NodeId, store: &Arc<ConfigStore>) -> Result<(), CommandError> {
        for leaf in self.leaves(id) {
            self.validate(leaf, store)?;
        }
        Ok(())
    }

    /// Freeze the subtree at `root` into a runnable clap entry point.
    pub fn entrypoint(self: &Arc<Self>, root: NodeId, store: Arc<ConfigStore>) -> Entrypoint {
        let mut plans = HashMap::new();
        self.plan(root, &mut plans);

        let command = self.clap_command(root, &HashSet::new()).arg(
            Arg::new(HELP)
                .short('h')
                .long(HELP)
                .action(ArgAction::SetTrue)
                .global(true)
                .help("Print help"),
        );

        Entrypoint {
            tree: Arc::clone(self),
            root,
            store,
            command,
            plans,
        }
    }

    fn plan(self: &Arc<Self>, id: NodeId, plans: &mut HashMap<NodeId, NodePlan>) {
        let runnable = !self.is_container(id);
        plans.insert(
            id,
            NodePlan {
                env_vars: self.merged_env_vars(id),
                flag_bindings: if runnable {
                    self.merged_flag_bindings(id)
                } else {
                    BTreeMap::new()
                },
                available_flags: self.available_flags(id),
                providers: if runnable {
                    self.build_providers(id)
                } else {
                    Vec::new()
                },
            },
        );
        for &child in self.children(id) {
            self.plan(child, plans);
        }
    }

    fn clap_command(&self, id: NodeId, inherited: &HashSet<&'static str>) -> clap::Command {
        let node = self.node(id);
        let persistent = self.is_container(id);

        let mut cmd = clap::Command::new(node.name)
            .about(node.short)
            .disable_help_flag(true)
            .disable_help_subcommand(true)
            .help_template(USAGE_TEMPLATE);

        // Ancestors' persistent flags already reach this command.
        let mut declared = inherited.clone();
        for flag in &node.flags {
            if declared.insert(flag.name) {
                cmd = cmd.arg(flag.arg(persistent));
            }
        }

        match node.kind {
            NodeKind::Container => {
                for &child in &node.children {
                    cmd = cmd.subcommand(self.clap_command(child, &declared));
                }
            }
            NodeKind::Runnable(_) => {
                cmd = cmd.arg(
                    Arg::new(ARGS)
                        .value_name("ARGS")
                        .num_args(0..)
                        .action(ArgAction::Append),
                );
            }
        }
        cmd
    }
}

/// The command being run, available to every provider of a build.
pub struct Invocation {
    tree: Arc<CommandTree>,
    node: NodeId,
}

impl Invocation {
    pub fn tree(&self) -> &Arc<CommandTree> {
        &self.tree
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    /// The root of the tree the command belongs to.
    pub fn root(&self) -> NodeId {
        self.tree.ancestry(self.node).last().copied().unwrap_or(self.node)
    }
}

struct NodePlan {
    env_vars: Vec<EnvVar>,
    flag_bindings: BTreeMap<&'static str, Key>,
    available_flags: HashSet<&'static str>,
    providers: Vec<Providers>,
}

/// A frozen tree bound to a configuration store.
pub struct Entrypoint {
    tree: Arc<CommandTree>,
    root: NodeId,
    store: Arc<ConfigStore>,
    command: clap::Command,
    plans: HashMap<NodeId, NodePlan>,
}

impl Entrypoint {
    pub fn store(&self) -> &Arc<ConfigStore> {
        &self.store
    }

    /// The clap command the tree was turned into.
    pub fn command(&self) -> &clap::Command {
        &self.command
    }

    /// Parse `args` (program name first) and run the selected command; help
    /// goes to stderr.
    pub async fn execute<I, T>(&self, args: I) -> anyhow::Result<()>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        self.execute_with(args, &mut io::stderr()).await
    }

    /// Like [`Entrypoint::execute`], writing help to `help_out`.
    pub async fn execute_with<I, T>(&self, args: I, help_out: &mut dyn io::Write) -> anyhow::Result<()>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        let mut cmd = self.command.clone();
        let matches = cmd.try_get_matches_from_mut(args)?;

        let mut node = self.root;
        let mut path = Vec::new();
        let mut current = &matches;
        while let Some((name, sub)) = current.subcommand() {
            node = self
                .tree
                .child_named(node, name)
                .ok_or_else(|| anyhow!("unknown command '{}'", name))?;
            path.push(name.to_string());
            current = sub;
        }

        let plan = self
            .plans
            .get(&node)
            .ok_or_else(|| anyhow!("command '{}' is not part of this entry point", self.tree.path(node)))?;

        let builder = match &self.tree.node(node).kind {
            NodeKind::Runnable(builder) if !current.get_flag(HELP) => builder,
            _ => return self.write_help(&mut cmd, &path, node, plan, help_out),
        };

        self.bind(plan, current)?;
        let runner = builder
            .build_runner(&self.store, &plan.providers)
            .map_err(CommandError::from)?;

        let args: Vec<String> = current
            .get_many::<String>(ARGS)
            .map(|values| values.cloned().collect())
            .unwrap_or_default();
        runner.run(&args).await
    }

    fn bind(&self, plan: &NodePlan, matches: &ArgMatches) -> Result<(), CommandError> {
        for (&flag, &key) in &plan.flag_bindings {
            if !plan.available_flags.contains(flag) {
                return Err(CommandError::FlagNotFound {
                    flag: flag.to_string(),
                });
            }
            let raw = matches
                .try_get_raw(flag)
                .map_err(|_| CommandError::FlagNotFound {
                    flag: flag.to_string(),
                })?
                .and_then(|mut values| values.next())
                .map(|value| value.to_string_lossy().into_owned())
                .unwrap_or_default();
            let changed = matches.value_source(flag) == Some(ValueSource::CommandLine);

            self.store
                .bind_flag(key.as_str(), FlagValue { raw, changed })
                .map_err(|error| CommandError::BindFlag {
                    flag: flag.to_string(),
                    key,
                    error,
                })?;
        }

        for var in &plan.env_vars {
            self.store
                .bind_env(var.key.as_str(), var.name)
                .map_err(|error| CommandError::BindEnv {
                    name: var.name.to_string(),
                    key: var.key,
                    error,
                })?;
        }
        Ok(())
    }

    fn write_help(
        &self,
        cmd: &mut clap::Command,
        path: &[String],
        node: NodeId,
        plan: &NodePlan,
        out: &mut dyn io::Write,
    ) -> anyhow::Result<()> {
        cmd.build();
        let mut target = cmd;
        for name in path {
            target = target
                .find_subcommand_mut(name)
                .ok_or_else(|| anyhow!("unknown command '{}'", name))?;
        }

        let described = self.tree.node(node);
        let context = HelpContext {
            short: described.short,
            long: described.long,
            runnable: !self.tree.is_container(node),
            has_subcommands: !described.children.is_empty(),
            usage: target.render_help().to_string(),
        };
        described.help.write(out, &context, &plan.env_vars)?;
        Ok(())
    }
}
