//! engine::validator
//!
//! Configuration validators.
//!
//! Any dependency may register a [`Validator`] into the `configValidators`
//! group. Building a runner runs every validator once; failures are logged
//! individually and reported together.

use std::sync::Arc;

use thiserror::Error;

use crate::core::graph::{Group, Grouped};
use crate::core::logging::StartupLog;

/// Checks configuration without side effects.
pub trait Validator: Send + Sync {
    fn validate(&self) -> anyhow::Result<()>;
}

impl Grouped for dyn Validator {
    const GROUP: &'static str = "configValidators";
}

/// Aggregate failure of the validation pass.
#[derive(Debug, Error)]
#[error("one or more config validators failed to validate ({failed} of {total})")]
pub struct ValidationError {
    pub failed: usize,
    pub total: usize,
}

/// Run every validator, logging each failure.
pub fn validate_config(
    validators: Group<dyn Validator>,
    log: Arc<dyn StartupLog>,
) -> Result<(), ValidationError> {
    let mut failed = 0;
    for validator in validators.iter() {
        if let Err(e) = validator.validate() {
            failed += 1;
            log.err(&e, "Config validator failed to validate");
        }
    }

    if failed > 0 {
        return Err(ValidationError {
            failed,
            total: validators.len(),
        });
    }
    Ok(())
}
