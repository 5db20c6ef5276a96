use anyhow::{anyhow, Error, Result};
use std::{fmt, net::IpAddr, str::FromStr};

/// Identifies a pod across all namespaces.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PodId {
    pub namespace: String,
    pub name: String,
}

/// A single pod label. Renderers are bound to pods by label.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PodLabel {
    pub key: String,
    pub value: String,
}

/// Looks up the current state of pods known to the cluster.
///
/// Implementations are expected to be backed by a local cache; lookups must not block on I/O.
pub trait PodLookup: Send + Sync {
    /// Returns the labels carried by the pod, or an empty list for an unknown pod.
    fn labels(&self, pod: &PodId) -> Vec<PodLabel>;

    /// Returns the pod's current addresses, or `None` if the pod cannot be resolved.
    fn addresses(&self, pod: &PodId) -> Option<Vec<IpAddr>>;
}

// === impl PodId ===

impl PodId {
    pub fn new(namespace: impl ToString, name: impl ToString) -> Self {
        Self {
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }
}

impl fmt::Display for PodId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

impl FromStr for PodId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.split_once('/') {
            Some((ns, name)) if !ns.is_empty() && !name.is_empty() && !name.contains('/') => {
                Ok(Self::new(ns, name))
            }
            _ => Err(anyhow!("invalid pod reference: {:?}", s)),
        }
    }
}

// === impl PodLabel ===

impl PodLabel {
    pub fn new(key: impl ToString, value: impl ToString) -> Self {
        Self {
            key: key.to_string(),
            value: value.to_string(),
        }
    }
}

impl fmt::Display for PodLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.key, self.value)
    }
}
