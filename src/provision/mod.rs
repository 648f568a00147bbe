//! Handing synthesized templates to a provisioning engine.
//!
//! The engine owns scheduling, diffing and waiting. A failed apply is
//! reported with the stage it stopped at, and whatever was created before
//! the failure is left in place.

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::graph::Stage;
use crate::site::SiteStack;
use crate::template::Template;

mod memory;
pub use memory::*;

#[cfg(feature = "aws")]
mod cloudformation;
#[cfg(feature = "aws")]
pub use cloudformation::*;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StackStatus {
    InProgress { stage: Stage },
    Stable,
    Failed { stage: Stage, reason: String },
}

impl StackStatus {
    pub fn stage(&self) -> Stage {
        match self {
            StackStatus::InProgress { stage } | StackStatus::Failed { stage, .. } => *stage,
            StackStatus::Stable => Stage::Stable,
        }
    }
}

/// A certificate that never left pending validation timed out, anything else
/// was refused. Only the engine's reason tells the two apart.
pub fn certificate_error<D: Into<String>, R: Into<String>>(domain: D, reason: R) -> Error {
    let reason = reason.into();
    let lower = reason.to_ascii_lowercase();
    if ["timed out", "timeout", "time out", "exceeded"].iter().any(|m| lower.contains(m)) {
        Error::CertificateValidationTimeout(domain.into())
    } else {
        Error::CertificateValidationFailed { domain: domain.into(), reason }
    }
}

#[async_trait]
pub trait Provisioner: Send + Sync {
    /// creates the stack, or updates it in place if it already exists.
    /// Returns the stack outputs once it is stable.
    async fn apply(&self, stack_name: &str, template: &Template) -> Result<BTreeMap<String, String>>;

    /// deletes every resource the stack owns, including bucket contents.
    async fn teardown(&self, stack_name: &str) -> Result<()>;

    /// `None` if the stack does not exist.
    async fn status(&self, stack_name: &str) -> Result<Option<StackStatus>>;
}

/// Applies each site in order. Sites share nothing, so the first failure
/// stops the run without touching the sites already applied.
pub async fn apply_all(provisioner: &dyn Provisioner, sites: &[SiteStack]) -> Result<Vec<BTreeMap<String, String>>> {
    let mut out = Vec::with_capacity(sites.len());
    for site in sites {
        tracing::info!(stack = site.name(), "applying stack");
        let outputs = provisioner.apply(site.name(), &site.template).await?;
        for (key, value) in &outputs {
            tracing::info!(stack = site.name(), %key, %value, "stack output");
        }
        out.push(outputs);
    }
    Ok(out)
}
