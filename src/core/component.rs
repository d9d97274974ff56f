//! core::component
//!
//! Named bundles of dependency providers.
//!
//! A [`Component`] groups the providers of a capability together with the
//! environment variables those providers read. Command nodes attach
//! components; the name is the merge identity, so two components with the
//! same name are interchangeable and one replaces the other wholesale.

use std::fmt;
use std::sync::Arc;

use super::config::EnvVar;
use super::graph::Providers;

/// A named set of providers plus the environment variables they need.
///
/// Cloning is cheap; clones share the same providers.
#[derive(Clone)]
pub struct Component {
    inner: Arc<ComponentInner>,
}

struct ComponentInner {
    name: String,
    env_vars: Vec<EnvVar>,
    providers: Providers,
}

impl Component {
    /// Create a component.
    pub fn new(name: impl Into<String>, env_vars: Vec<EnvVar>, providers: Providers) -> Self {
        Self {
            inner: Arc::new(ComponentInner {
                name: name.into(),
                env_vars,
                providers,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn env_vars(&self) -> &[EnvVar] {
        &self.inner.env_vars
    }

    pub fn providers(&self) -> &Providers {
        &self.inner.providers
    }

    /// Whether both handles point at the same component instance.
    pub fn ptr_eq(&self, other: &Component) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Component")
            .field("name", &self.inner.name)
            .field("env_vars", &self.inner.env_vars)
            .field("providers", &self.inner.providers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::env;

    #[test]
    fn clones_share_identity() {
        let a = Component::new("db", vec![env::LISTEN_ADDRESS], Providers::new());
        let b = a.clone();
        let c = Component::new("db", vec![], Providers::new());
        assert!(a.ptr_eq(&b));
        assert!(!a.ptr_eq(&c));
        assert_eq!(b.name(), "db");
        assert_eq!(b.env_vars().len(), 1);
    }
}
