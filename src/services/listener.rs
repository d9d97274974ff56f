//! services::listener
//!
//! A TCP listener owned by the service lifecycle.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use anyhow::Context as _;
use async_trait::async_trait;
use tokio::net::TcpListener;

use crate::core::logging::BackgroundLog;
use crate::engine::{HookContext, Service, Validator};

/// Binds its address on start and releases it on stop.
pub struct Listener {
    address: String,
    log: Arc<dyn BackgroundLog>,
    bound: Mutex<Option<TcpListener>>,
}

impl Listener {
    pub fn new(address: impl Into<String>, log: Arc<dyn BackgroundLog>) -> Self {
        Self {
            address: address.into(),
            log,
            bound: Mutex::new(None),
        }
    }

    /// The bound address while started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.bound
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .and_then(|listener| listener.local_addr().ok())
    }
}

#[async_trait]
impl Service for Listener {
    async fn start(&self, _ctx: &HookContext) -> anyhow::Result<()> {
        let listener = match TcpListener::bind(&self.address).await {
            Ok(listener) => listener,
            Err(e) => {
                self.log.err(&e, "Unable to initialize listener");
                return Err(e).with_context(|| format!("failed to bind {}", self.address));
            }
        };

        let local = listener.local_addr()?;
        self.log.infof(format_args!("Listening on {}", local));
        *self.bound.lock().unwrap_or_else(|e| e.into_inner()) = Some(listener);
        Ok(())
    }

    async fn stop(&self, _ctx: &HookContext) -> anyhow::Result<()> {
        let released = self.bound.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(listener) = released {
            let local = listener.local_addr()?;
            drop(listener);
            self.log.infof(format_args!("Released {}", local));
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "listener"
    }
}

/// Requires the listen address to be a socket address.
pub struct AddressValidator {
    address: String,
}

impl AddressValidator {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
        }
    }
}

impl Validator for AddressValidator {
    fn validate(&self) -> anyhow::Result<()> {
        self.address
            .parse::<SocketAddr>()
            .map(|_| ())
            .with_context(|| format!("LISTEN_ADDRESS '{}' is not a socket address", self.address))
    }
}
