//! check command - Validate the wiring of every other command
//!
//! Each runnable command of the tree is validated the way
//! [`CommandTree::validate`](crate::cli::CommandTree::validate) does it: the
//! graph is checked, its validators and runner inputs are constructed, and
//! nothing is started.

use std::sync::Arc;

use async_trait::async_trait;

use crate::cli::command::Invocation;
use crate::core::config::ConfigStore;
use crate::core::graph::Providers;
use crate::engine::ActionAdapter;

struct Check {
    invocation: Arc<Invocation>,
    store: Arc<ConfigStore>,
}

#[async_trait]
impl ActionAdapter for Check {
    async fn execute(&self, _args: &[String]) -> anyhow::Result<()> {
        let tree = self.invocation.tree();
        let leaves: Vec<_> = tree
            .leaves(self.invocation.root())
            .into_iter()
            .filter(|&leaf| leaf != self.invocation.node())
            .collect();

        let mut failed = 0;
        for &leaf in &leaves {
            match tree.validate(leaf, &self.store) {
                Ok(()) => println!("ok    {}", tree.path(leaf)),
                Err(e) => {
                    failed += 1;
                    println!("FAIL  {}: {}", tree.path(leaf), e);
                }
            }
        }

        if failed > 0 {
            anyhow::bail!("{} of {} commands failed validation", failed, leaves.len());
        }
        Ok(())
    }
}

pub(super) fn providers() -> Providers {
    Providers::new().provide(
        |invocation: Arc<Invocation>, store: Arc<ConfigStore>| -> anyhow::Result<Arc<dyn ActionAdapter>> {
            Ok(Arc::new(Check { invocation, store }))
        },
    )
}
