//! engine::service
//!
//! The [`Service`] capability and its registration with the lifecycle.
//!
//! Services are collected into the `services` group. A service command
//! registers one start/stop hook per enabled service, in group order.

use std::sync::Arc;

use async_trait::async_trait;

use super::lifecycle::{Hook, HookContext, Lifecycle};
use crate::core::graph::{Group, Grouped};

/// A long-running part of the process: a listener, a refresh loop, ...
#[async_trait]
pub trait Service: Send + Sync {
    async fn start(&self, ctx: &HookContext) -> anyhow::Result<()>;

    async fn stop(&self, ctx: &HookContext) -> anyhow::Result<()>;

    /// Disabled services stay in the group but get no hooks.
    fn disabled(&self) -> bool {
        false
    }

    /// Name used for hook logging.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

impl Grouped for dyn Service {
    const GROUP: &'static str = "services";
}

/// Append a hook for every enabled service; returns how many were added.
pub fn register_services(services: Group<dyn Service>, lifecycle: Arc<Lifecycle>) -> usize {
    let mut registered = 0;
    for service in services.into_vec() {
        if service.disabled() {
            continue;
        }
        lifecycle.append(Hook::for_service(service));
        registered += 1;
    }
    registered
}
