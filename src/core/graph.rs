//! core::graph
//!
//! Typed dependency graph.
//!
//! # Architecture
//!
//! The graph is an arena of provider registrations keyed by the capability
//! they produce:
//! - A constructor is a plain function whose parameters are its
//!   dependencies (`Arc<T>` for a single value, [`Group<T>`] for a named
//!   multi-value slot) and which returns `anyhow::Result<Arc<T>>`
//! - [`Providers`] collects registrations in order
//! - [`Container`] indexes them, constructs values lazily on first request
//!   and memoises them
//!
//! Because parameter lists are known statically, [`Container::verify`] can
//! prove a set of roots satisfiable (every provider present, no cycles)
//! without calling a single constructor.
//!
//! # Invariants
//!
//! - At most one single provider per type
//! - Each provider runs at most once per container
//! - Group members resolve in registration order
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use deploy_runner::core::graph::{Container, Providers};
//!
//! struct Port(u16);
//! struct Url(String);
//!
//! fn url(port: Arc<Port>) -> anyhow::Result<Arc<Url>> {
//!     Ok(Arc::new(Url(format!("http://localhost:{}", port.0))))
//! }
//!
//! let providers = Providers::new().supply(Arc::new(Port(8080))).provide(url);
//! let container = Container::new(&[providers], None).unwrap();
//! let url: Arc<Url> = container.resolve().unwrap();
//! assert_eq!(url.0, "http://localhost:8080");
//! ```

use std::any::{type_name, Any, TypeId};
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use thiserror::Error;

use super::logging::Log;

/// Errors from assembling or resolving the graph.
#[derive(Debug, Error)]
pub enum GraphError {
    #[error("cannot provide {type_name}: already provided")]
    AlreadyProvided { type_name: &'static str },

    #[error("missing type: {type_name} (required by {required_by})")]
    Missing {
        type_name: &'static str,
        required_by: &'static str,
    },

    #[error("cycle detected in dependency graph: {path}")]
    Cycle { path: String },

    #[error("constructor for {type_name} failed: {cause:#}")]
    Constructor {
        type_name: &'static str,
        cause: anyhow::Error,
    },

    #[error("internal type mismatch for {type_name}")]
    Downcast { type_name: &'static str },
}

/// A requirement or product of a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot {
    type_id: TypeId,
    type_name: &'static str,
    group: Option<&'static str>,
}

impl Slot {
    /// The slot a resolvable parameter type occupies.
    pub fn of<R: Resolve>() -> Slot {
        R::slot()
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Group name for multi-value slots.
    pub fn group(&self) -> Option<&'static str> {
        self.group
    }

    fn single<T: ?Sized + 'static>() -> Slot {
        Slot {
            type_id: TypeId::of::<Arc<T>>(),
            type_name: type_name::<T>(),
            group: None,
        }
    }

    fn grouped<T: ?Sized + Grouped>() -> Slot {
        Slot {
            group: Some(T::GROUP),
            ..Slot::single::<T>()
        }
    }
}

/// Names the multi-value slot a capability is collected into.
pub trait Grouped: Send + Sync + 'static {
    const GROUP: &'static str;
}

/// Every value registered into `T`'s group, in registration order.
pub struct Group<T: ?Sized>(Vec<Arc<T>>);

impl<T: ?Sized> Group<T> {
    pub fn into_vec(self) -> Vec<Arc<T>> {
        self.0
    }
}

impl<T: ?Sized> Deref for Group<T> {
    type Target = [Arc<T>];

    fn deref(&self) -> &[Arc<T>] {
        &self.0
    }
}

impl<T: ?Sized> Clone for Group<T> {
    fn clone(&self) -> Self {
        Group(self.0.clone())
    }
}

/// A type the container can produce as a constructor or invoke argument.
pub trait Resolve: Sized + 'static {
    fn slot() -> Slot;
    fn resolve(container: &Container) -> Result<Self, GraphError>;
}

impl<T: ?Sized + Send + Sync + 'static> Resolve for Arc<T> {
    fn slot() -> Slot {
        Slot::single::<T>()
    }

    fn resolve(container: &Container) -> Result<Self, GraphError> {
        container.single::<T>()
    }
}

impl<T: ?Sized + Grouped> Resolve for Group<T> {
    fn slot() -> Slot {
        Slot::grouped::<T>()
    }

    fn resolve(container: &Container) -> Result<Self, GraphError> {
        container.group::<T>()
    }
}

/// A provider function producing `Arc<Self::Output>` from resolvable
/// arguments.
pub trait Constructor<Args>: Send + Sync + 'static {
    type Output: ?Sized + Send + Sync + 'static;

    fn requirements() -> Vec<Slot>;
    fn construct(&self, container: &Container) -> Result<Arc<Self::Output>, GraphError>;
}

/// A function run once against the container with resolved arguments.
pub trait Invoke<Args> {
    type Output;

    fn requirements() -> Vec<Slot>;
    fn invoke(self, container: &Container) -> Result<Self::Output, GraphError>;
}

macro_rules! impl_callables {
    ($($arg:ident),*) => {
        impl<Func, T, $($arg,)*> Constructor<($($arg,)*)> for Func
        where
            Func: Fn($($arg),*) -> anyhow::Result<Arc<T>> + Send + Sync + 'static,
            T: ?Sized + Send + Sync + 'static,
            $($arg: Resolve,)*
        {
            type Output = T;

            fn requirements() -> Vec<Slot> {
                vec![$($arg::slot()),*]
            }

            #[allow(non_snake_case, unused_variables)]
            fn construct(&self, container: &Container) -> Result<Arc<T>, GraphError> {
                $(let $arg = $arg::resolve(container)?;)*
                (self)($($arg),*).map_err(|cause| GraphError::Constructor {
                    type_name: type_name::<T>(),
                    cause,
                })
            }
        }

        impl<Func, R, $($arg,)*> Invoke<($($arg,)*)> for Func
        where
            Func: FnOnce($($arg),*) -> R,
            $($arg: Resolve,)*
        {
            type Output = R;

            fn requirements() -> Vec<Slot> {
                vec![$($arg::slot()),*]
            }

            #[allow(non_snake_case, unused_variables)]
            fn invoke(self, container: &Container) -> Result<R, GraphError> {
                $(let $arg = $arg::resolve(container)?;)*
                Ok(self($($arg),*))
            }
        }
    };
}

impl_callables!();
impl_callables!(A1);
impl_callables!(A1, A2);
impl_callables!(A1, A2, A3);
impl_callables!(A1, A2, A3, A4);
impl_callables!(A1, A2, A3, A4, A5);
impl_callables!(A1, A2, A3, A4, A5, A6);

type Instance = Box<dyn Any + Send + Sync>;
type BuildFn = dyn Fn(&Container) -> Result<Instance, GraphError> + Send + Sync;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProviderKind {
    Provide,
    Supply,
}

struct ProviderEntry {
    output: Slot,
    requires: Vec<Slot>,
    kind: ProviderKind,
    build: Box<BuildFn>,
}

/// An ordered bundle of provider registrations.
#[derive(Clone, Default)]
pub struct Providers {
    entries: Vec<Arc<ProviderEntry>>,
}

impl fmt::Debug for Providers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.entries.iter().map(|e| e.output.type_name))
            .finish()
    }
}

impl Providers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a constructor for a single value.
    pub fn provide<Args, C>(self, ctor: C) -> Self
    where
        C: Constructor<Args>,
    {
        let output = Slot::single::<C::Output>();
        self.push_constructor(output, ctor)
    }

    /// Register a constructor contributing to a group.
    pub fn provide_group<Args, C>(self, ctor: C) -> Self
    where
        C: Constructor<Args>,
        C::Output: Grouped,
    {
        let output = Slot::grouped::<C::Output>();
        self.push_constructor(output, ctor)
    }

    /// Register an already-built value.
    pub fn supply<T: ?Sized + Send + Sync + 'static>(self, value: Arc<T>) -> Self {
        self.push_value(Slot::single::<T>(), value)
    }

    /// Register an already-built value into a group.
    pub fn supply_group<T: ?Sized + Grouped>(self, value: Arc<T>) -> Self {
        self.push_value(Slot::grouped::<T>(), value)
    }

    /// Append every registration of `other`.
    pub fn extend(mut self, other: &Providers) -> Self {
        self.entries.extend(other.entries.iter().cloned());
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn push_constructor<Args, C: Constructor<Args>>(mut self, output: Slot, ctor: C) -> Self {
        self.entries.push(Arc::new(ProviderEntry {
            output,
            requires: C::requirements(),
            kind: ProviderKind::Provide,
            build: Box::new(move |container: &Container| {
                ctor.construct(container)
                    .map(|value| Box::new(value) as Instance)
            }),
        }));
        self
    }

    fn push_value<T: ?Sized + Send + Sync + 'static>(mut self, output: Slot, value: Arc<T>) -> Self {
        self.entries.push(Arc::new(ProviderEntry {
            output,
            requires: Vec::new(),
            kind: ProviderKind::Supply,
            build: Box::new(move |_: &Container| Ok(Box::new(value.clone()) as Instance)),
        }));
        self
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    Visiting,
    Done,
}

/// An assembled graph.
///
/// Not shareable across threads; a container lives for one build.
pub struct Container {
    entries: Vec<Arc<ProviderEntry>>,
    singles: HashMap<TypeId, usize>,
    groups: HashMap<TypeId, Vec<usize>>,
    cache: RefCell<Vec<Option<Instance>>>,
    resolving: RefCell<Vec<usize>>,
    log: Option<Arc<dyn Log>>,
}

impl Container {
    /// Index every registration of `providers`, in order.
    pub fn new(providers: &[Providers], log: Option<Arc<dyn Log>>) -> Result<Self, GraphError> {
        let entries: Vec<Arc<ProviderEntry>> = providers
            .iter()
            .flat_map(|p| p.entries.iter().cloned())
            .collect();

        let mut singles = HashMap::new();
        let mut groups: HashMap<TypeId, Vec<usize>> = HashMap::new();
        for (index, entry) in entries.iter().enumerate() {
            match entry.output.group {
                Some(_) => groups.entry(entry.output.type_id).or_default().push(index),
                None => {
                    if singles.insert(entry.output.type_id, index).is_some() {
                        return Err(GraphError::AlreadyProvided {
                            type_name: entry.output.type_name,
                        });
                    }
                }
            }

            if let Some(log) = &log {
                let verb = match entry.kind {
                    ProviderKind::Provide => "PROVIDE",
                    ProviderKind::Supply => "SUPPLY",
                };
                match entry.output.group {
                    Some(group) => log.debugf(format_args!(
                        "{}\t{}[group = \"{}\"]",
                        verb, entry.output.type_name, group
                    )),
                    None => log.debugf(format_args!("{}\t{}", verb, entry.output.type_name)),
                }
            }
        }

        Ok(Self {
            cache: RefCell::new((0..entries.len()).map(|_| None).collect()),
            entries,
            singles,
            groups,
            resolving: RefCell::new(Vec::new()),
            log,
        })
    }

    /// Resolve a value (`Arc<T>`) or a group (`Group<T>`).
    pub fn resolve<R: Resolve>(&self) -> Result<R, GraphError> {
        R::resolve(self)
    }

    /// Run `f` with its arguments resolved from the graph.
    pub fn call<Args, F: Invoke<Args>>(&self, f: F) -> Result<F::Output, GraphError> {
        if let Some(log) = &self.log {
            log.debugf(format_args!("INVOKE\t{}", type_name::<F>()));
        }
        f.invoke(self)
    }

    /// Number of registrations in `T`'s group.
    pub fn group_len<T: ?Sized + Grouped>(&self) -> usize {
        self.groups
            .get(&TypeId::of::<Arc<T>>())
            .map_or(0, Vec::len)
    }

    /// Check that `roots` can be resolved without constructing anything.
    ///
    /// Fails with [`GraphError::Missing`] for an absent single provider and
    /// [`GraphError::Cycle`] for a dependency cycle. Empty groups are valid.
    pub fn verify(&self, roots: &[Slot]) -> Result<(), GraphError> {
        let mut marks = vec![Mark::Unvisited; self.entries.len()];
        let mut stack = Vec::new();
        for root in roots {
            self.verify_slot(root, "invoke", &mut marks, &mut stack)?;
        }
        Ok(())
    }

    fn verify_slot(
        &self,
        slot: &Slot,
        required_by: &'static str,
        marks: &mut [Mark],
        stack: &mut Vec<usize>,
    ) -> Result<(), GraphError> {
        let indices = match slot.group {
            Some(_) => self.groups.get(&slot.type_id).cloned().unwrap_or_default(),
            None => {
                let index = self
                    .singles
                    .get(&slot.type_id)
                    .ok_or(GraphError::Missing {
                        type_name: slot.type_name,
                        required_by,
                    })?;
                vec![*index]
            }
        };

        for index in indices {
            match marks[index] {
                Mark::Done => continue,
                Mark::Visiting => {
                    let start = stack.iter().position(|&i| i == index).unwrap_or(0);
                    return Err(GraphError::Cycle {
                        path: self.cycle_path(&stack[start..], index),
                    });
                }
                Mark::Unvisited => {}
            }

            marks[index] = Mark::Visiting;
            stack.push(index);
            let entry = &self.entries[index];
            for requirement in &entry.requires {
                self.verify_slot(requirement, entry.output.type_name, marks, stack)?;
            }
            stack.pop();
            marks[index] = Mark::Done;
        }
        Ok(())
    }

    fn single<T: ?Sized + Send + Sync + 'static>(&self) -> Result<Arc<T>, GraphError> {
        match self.singles.get(&TypeId::of::<Arc<T>>()) {
            Some(&index) => self.instance::<T>(index),
            None => Err(GraphError::Missing {
                type_name: type_name::<T>(),
                required_by: self.current_requirer(),
            }),
        }
    }

    fn group<T: ?Sized + Grouped>(&self) -> Result<Group<T>, GraphError> {
        let indices = self
            .groups
            .get(&TypeId::of::<Arc<T>>())
            .cloned()
            .unwrap_or_default();
        indices
            .into_iter()
            .map(|index| self.instance::<T>(index))
            .collect::<Result<Vec<_>, _>>()
            .map(Group)
    }

    fn instance<T: ?Sized + Send + Sync + 'static>(&self, index: usize) -> Result<Arc<T>, GraphError> {
        let type_name = self.entries[index].output.type_name;
        if let Some(value) = &self.cache.borrow()[index] {
            return downcast::<T>(value, type_name);
        }

        if let Some(start) = self.resolving.borrow().iter().position(|&i| i == index) {
            let stack = self.resolving.borrow();
            return Err(GraphError::Cycle {
                path: self.cycle_path(&stack[start..], index),
            });
        }

        self.resolving.borrow_mut().push(index);
        let built = (self.entries[index].build)(self);
        self.resolving.borrow_mut().pop();

        let value = built?;
        let instance = downcast::<T>(&value, type_name)?;
        self.cache.borrow_mut()[index] = Some(value);
        Ok(instance)
    }

    fn current_requirer(&self) -> &'static str {
        self.resolving
            .borrow()
            .last()
            .map_or("invoke", |&i| self.entries[i].output.type_name)
    }

    fn cycle_path(&self, chain: &[usize], repeated: usize) -> String {
        chain
            .iter()
            .chain(std::iter::once(&repeated))
            .map(|&i| self.entries[i].output.type_name)
            .collect::<Vec<_>>()
            .join(" -> ")
    }
}

fn downcast<T: ?Sized + Send + Sync + 'static>(
    value: &Instance,
    type_name: &'static str,
) -> Result<Arc<T>, GraphError> {
    (**value)
        .downcast_ref::<Arc<T>>()
        .cloned()
        .ok_or(GraphError::Downcast { type_name })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Config(&'static str);
    struct Database(String);
    struct Api {
        db: Arc<Database>,
    }

    trait Plugin: Send + Sync {
        fn name(&self) -> &str;
    }

    impl Grouped for dyn Plugin {
        const GROUP: &'static str = "plugins";
    }

    struct Named(&'static str);

    impl Plugin for Named {
        fn name(&self) -> &str {
            self.0
        }
    }

    fn database(config: Arc<Config>) -> anyhow::Result<Arc<Database>> {
        Ok(Arc::new(Database(format!("db:{}", config.0))))
    }

    fn api(db: Arc<Database>) -> anyhow::Result<Arc<Api>> {
        Ok(Arc::new(Api { db }))
    }

    #[test]
    fn resolves_transitive_dependencies() {
        let providers = Providers::new()
            .provide(api)
            .provide(database)
            .supply(Arc::new(Config("prod")));
        let container = Container::new(&[providers], None).unwrap();
        let api: Arc<Api> = container.resolve().unwrap();
        assert_eq!(api.db.0, "db:prod");
    }

    #[test]
    fn constructors_run_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let providers = Providers::new()
            .supply(Arc::new(Config("x")))
            .provide(move |config: Arc<Config>| -> anyhow::Result<Arc<Database>> {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(Arc::new(Database(config.0.to_string())))
            })
            .provide(api);
        let container = Container::new(&[providers], None).unwrap();

        let first: Arc<Database> = container.resolve().unwrap();
        let api: Arc<Api> = container.resolve().unwrap();
        assert!(Arc::ptr_eq(&first, &api.db));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn constructors_are_lazy() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let providers = Providers::new().provide(move || -> anyhow::Result<Arc<Config>> {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(Config("lazy")))
        });
        let _container = Container::new(&[providers], None).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn groups_keep_registration_order() {
        let first = Providers::new()
            .provide_group(|| -> anyhow::Result<Arc<dyn Plugin>> { Ok(Arc::new(Named("a"))) });
        let second = Providers::new()
            .supply_group::<dyn Plugin>(Arc::new(Named("b")))
            .provide_group(|| -> anyhow::Result<Arc<dyn Plugin>> { Ok(Arc::new(Named("c"))) });
        let container = Container::new(&[first, second], None).unwrap();

        let plugins: Group<dyn Plugin> = container.resolve().unwrap();
        let names: Vec<_> = plugins.iter().map(|p| p.name().to_string()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
        assert_eq!(container.group_len::<dyn Plugin>(), 3);
    }

    #[test]
    fn empty_group_resolves_empty() {
        let container = Container::new(&[], None).unwrap();
        let plugins: Group<dyn Plugin> = container.resolve().unwrap();
        assert!(plugins.is_empty());
        assert_eq!(container.group_len::<dyn Plugin>(), 0);
    }

    #[test]
    fn duplicate_single_providers_are_rejected() {
        let providers = Providers::new()
            .supply(Arc::new(Config("a")))
            .supply(Arc::new(Config("b")));
        let err = Container::new(&[providers], None).err().unwrap();
        assert!(matches!(err, GraphError::AlreadyProvided { .. }));
    }

    #[test]
    fn missing_dependency_names_requirer() {
        let providers = Providers::new().provide(database);
        let container = Container::new(&[providers], None).unwrap();
        let err = container.resolve::<Arc<Database>>().err().unwrap();
        match err {
            GraphError::Missing {
                type_name,
                required_by,
            } => {
                assert!(type_name.ends_with("Config"));
                assert!(required_by.ends_with("Database"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn constructor_errors_are_wrapped() {
        let providers = Providers::new()
            .provide(|| -> anyhow::Result<Arc<Config>> { anyhow::bail!("no config") });
        let container = Container::new(&[providers], None).unwrap();
        let err = container.resolve::<Arc<Config>>().err().unwrap();
        assert!(matches!(err, GraphError::Constructor { .. }));
        assert!(err.to_string().contains("no config"));
    }

    struct Left;
    struct Right;

    fn left(_: Arc<Right>) -> anyhow::Result<Arc<Left>> {
        Ok(Arc::new(Left))
    }

    fn right(_: Arc<Left>) -> anyhow::Result<Arc<Right>> {
        Ok(Arc::new(Right))
    }

    #[test]
    fn cycles_are_detected_at_resolve_and_verify() {
        let providers = Providers::new().provide(left).provide(right);
        let container = Container::new(&[providers], None).unwrap();

        let err = container.resolve::<Arc<Left>>().err().unwrap();
        assert!(matches!(err, GraphError::Cycle { .. }));

        let err = container.verify(&[Slot::of::<Arc<Left>>()]).unwrap_err();
        match err {
            GraphError::Cycle { path } => assert_eq!(path.matches(" -> ").count(), 2),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn verify_constructs_nothing() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let providers = Providers::new()
            .provide(move || -> anyhow::Result<Arc<Config>> {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(Arc::new(Config("x")))
            })
            .provide(database)
            .provide(api);
        let container = Container::new(&[providers], None).unwrap();

        container
            .verify(&[Slot::of::<Arc<Api>>(), Slot::of::<Group<dyn Plugin>>()])
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn verify_reports_missing_providers() {
        let providers = Providers::new().provide(api);
        let container = Container::new(&[providers], None).unwrap();
        let err = container.verify(&[Slot::of::<Arc<Api>>()]).unwrap_err();
        assert!(matches!(err, GraphError::Missing { .. }));
    }

    #[test]
    fn call_resolves_arguments() {
        let providers = Providers::new()
            .supply(Arc::new(Config("cfg")))
            .provide(database);
        let container = Container::new(&[providers], None).unwrap();
        let name = container
            .call(|db: Arc<Database>, config: Arc<Config>| format!("{}/{}", db.0, config.0))
            .unwrap();
        assert_eq!(name, "db:cfg/cfg");
    }

    #[test]
    fn extend_appends_in_order() {
        let base = Providers::new().supply(Arc::new(Config("a")));
        let merged = Providers::new().provide(database).extend(&base);
        assert_eq!(merged.len(), 2);
        assert!(!merged.is_empty());
    }
}
