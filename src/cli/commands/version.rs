//! version command - Print the crate version

use std::sync::Arc;

use async_trait::async_trait;

use crate::core::graph::Providers;
use crate::engine::ActionAdapter;

pub(super) const VERSION: &str = env!("CARGO_PKG_VERSION");

struct Version;

#[async_trait]
impl ActionAdapter for Version {
    async fn execute(&self, _args: &[String]) -> anyhow::Result<()> {
        println!("deploy-runner {}", VERSION);
        Ok(())
    }
}

pub(super) fn providers() -> Providers {
    Providers::new().provide(|| -> anyhow::Result<Arc<dyn ActionAdapter>> { Ok(Arc::new(Version)) })
}
