//! services
//!
//! The `services` component run by `deploy-runner serve`.
//!
//! It registers a TCP [`Listener`] into the service group and an
//! [`AddressValidator`] into the config validators, both reading
//! `LISTEN_ADDRESS`.

pub mod listener;

pub use listener::{AddressValidator, Listener};

use std::sync::Arc;

use crate::core::component::Component;
use crate::core::config::{env, keys, ConfigStore};
use crate::core::graph::Providers;
use crate::core::logging::BackgroundLog;
use crate::engine::{Service, Validator};

fn listener(
    store: Arc<ConfigStore>,
    log: Arc<dyn BackgroundLog>,
) -> anyhow::Result<Arc<dyn Service>> {
    let address = store.get_string(keys::LISTEN_ADDRESS.as_str());
    Ok(Arc::new(Listener::new(address, log.child_log("listener"))))
}

fn address_validator(store: Arc<ConfigStore>) -> anyhow::Result<Arc<dyn Validator>> {
    Ok(Arc::new(AddressValidator::new(
        store.get_string(keys::LISTEN_ADDRESS.as_str()),
    )))
}

pub fn component() -> Component {
    Component::new(
        "services",
        vec![env::LISTEN_ADDRESS],
        Providers::new()
            .provide_group(listener)
            .provide_group(address_validator),
    )
}
