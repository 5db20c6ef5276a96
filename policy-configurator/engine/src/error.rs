use policy_configurator_core::{IpBlock, IpNet, PodId, PodLabel, PolicyId};
use std::{fmt, time::Duration};
use thiserror::Error;

/// Errors raised while wiring renderers into the configurator.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("a different renderer is already registered for label {label}")]
    AlreadyRegistered { label: PodLabel },

    #[error("a default renderer is already registered")]
    DefaultAlreadyRegistered,

    #[error("no renderer matches the pod's labels and no default renderer is registered")]
    NoDefaultRenderer,
}

/// Invalid policy input. The offending input is excluded from the generated rules.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("policy {policy}: exception {except} is not a subnet of {block}")]
    InvalidIpBlock {
        policy: PolicyId,
        block: IpBlock,
        except: IpNet,
    },

    #[error("policy {policy}: peer pod {peer} has no known address")]
    UnresolvedPeer { policy: PolicyId, peer: PodId },
}

#[derive(Debug, Error)]
pub enum BackendError {
    #[error(transparent)]
    Failed(anyhow::Error),

    #[error("commit timed out after {0:?}")]
    Timeout(Duration),
}

#[derive(Debug, Error)]
pub enum TxnError {
    #[error("transaction is already closed")]
    Closed,

    #[error("failed to commit policy configuration: {0}")]
    Backend(BackendErrors),
}

/// Describes what a transaction applied.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CommitSummary {
    /// The pods applied by each renderer.
    pub applied: Vec<Applied>,

    /// Policy input that was excluded from the generated rules.
    pub invalid: Vec<InvalidInput>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Applied {
    pub renderer: String,
    pub pods: Vec<PodId>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InvalidInput {
    pub pod: PodId,
    pub error: ValidationError,
}

#[derive(Debug)]
pub struct BackendFailure {
    pub renderer: String,
    pub pods: Vec<PodId>,
    pub error: BackendError,
}

/// Reports a partially-failed commit.
///
/// Renderers listed in `committed` have applied their new state. Only the pods of `failed`
/// renderers and `unroutable` pods need to be configured again.
#[derive(Debug)]
pub struct BackendErrors {
    pub failed: Vec<BackendFailure>,

    /// Pods for which no renderer could be found.
    pub unroutable: Vec<PodId>,

    pub committed: CommitSummary,
}

// === impl BackendErrors ===

impl BackendErrors {
    /// Returns every pod that was not applied.
    pub fn failed_pods(&self) -> impl Iterator<Item = &PodId> {
        self.failed
            .iter()
            .flat_map(|f| f.pods.iter())
            .chain(self.unroutable.iter())
    }
}

impl fmt::Display for BackendErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut sep = "";
        for failure in &self.failed {
            write!(f, "{}renderer {} failed", sep, failure.renderer)?;
            write_pods(f, &failure.pods)?;
            write!(f, ": {}", failure.error)?;
            sep = "; ";
        }
        if !self.unroutable.is_empty() {
            write!(f, "{}no renderer for pods", sep)?;
            write_pods(f, &self.unroutable)?;
        }
        Ok(())
    }
}

fn write_pods(f: &mut fmt::Formatter<'_>, pods: &[PodId]) -> fmt::Result {
    f.write_str(" [")?;
    for (i, pod) in pods.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{}", pod)?;
    }
    f.write_str("]")
}
