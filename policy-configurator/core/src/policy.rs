//! Resolved network policies.
//!
//! Policies reach the configurator fully expanded: namespaces and label selectors have already been
//! evaluated into pod identities, named ports translated into numbers and network addresses parsed.
//! Traffic matched by a policy is allowed. Traffic not matched by any policy from a non-empty set of
//! policies assigned to a pod is denied.

use crate::PodId;
use anyhow::{anyhow, Error, Result};
use ipnet::IpNet;
use std::{fmt, str::FromStr};

/// Uniquely identifies a policy across all namespaces.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PolicyId {
    pub namespace: String,
    pub name: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Policy {
    pub id: PolicyId,

    /// Selects the traffic directions that the policy relates to.
    pub policy_type: PolicyType,

    /// Predicates that each select a subset of the traffic to be allowed.
    pub matches: Vec<Match>,
}

/// Selects the traffic directions that a policy relates to.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum PolicyType {
    Ingress,
    Egress,
    All,
}

/// The direction of traffic, from the pod's point of view.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MatchType {
    Ingress,
    Egress,
}

/// A predicate selecting a subset of the traffic.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Match {
    pub match_type: MatchType,

    /// Sources (ingress) or destinations (egress).
    ///
    /// If both `pods` and `ip_blocks` are empty, the match applies to all peers. Otherwise the
    /// traffic must match at least one item from either list.
    pub pods: Vec<PodId>,
    pub ip_blocks: Vec<IpBlock>,

    /// Destination ports. If empty, the match is not restricted by protocol or port.
    pub ports: Vec<Port>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Protocol {
    Tcp,
    Udp,
}

/// A TCP or UDP port. A `number` of zero matches all ports of the protocol.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Port {
    pub protocol: Protocol,
    pub number: u16,
}

/// A network with optional exceptions.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct IpBlock {
    pub net: IpNet,
    pub except: Vec<IpNet>,
}

// === impl PolicyId ===

impl PolicyId {
    pub fn new(namespace: impl ToString, name: impl ToString) -> Self {
        Self {
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }
}

impl fmt::Display for PolicyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

impl FromStr for PolicyId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.split_once('/') {
            Some((ns, name)) if !ns.is_empty() && !name.is_empty() && !name.contains('/') => {
                Ok(Self::new(ns, name))
            }
            _ => Err(anyhow!("invalid policy reference: {:?}", s)),
        }
    }
}

// === impl Policy ===

impl Policy {
    /// Returns the matches that apply to traffic in the given direction.
    ///
    /// Returns `None` if the policy does not relate to the direction at all.
    pub fn matches_for(&self, direction: MatchType) -> Option<impl Iterator<Item = &Match>> {
        if !self.policy_type.applies_to(direction) {
            return None;
        }
        Some(
            self.matches
                .iter()
                .filter(move |m| m.match_type == direction),
        )
    }
}

impl fmt::Display for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Policy {} <Type:{}, Matches:[", self.id, self.policy_type)?;
        write_list(f, &self.matches)?;
        f.write_str("]>")
    }
}

// === impl PolicyType ===

impl PolicyType {
    pub fn applies_to(self, direction: MatchType) -> bool {
        matches!(
            (self, direction),
            (Self::All, _)
                | (Self::Ingress, MatchType::Ingress)
                | (Self::Egress, MatchType::Egress)
        )
    }
}

impl fmt::Display for PolicyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ingress => "INGRESS".fmt(f),
            Self::Egress => "EGRESS".fmt(f),
            Self::All => "ALL".fmt(f),
        }
    }
}

// === impl MatchType ===

impl fmt::Display for MatchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ingress => "INGRESS".fmt(f),
            Self::Egress => "EGRESS".fmt(f),
        }
    }
}

// === impl Match ===

impl Match {
    /// Indicates whether the match applies to all peers.
    pub fn selects_all_peers(&self) -> bool {
        self.pods.is_empty() && self.ip_blocks.is_empty()
    }
}

impl fmt::Display for Match {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<Type:{}, Pods:[", self.match_type)?;
        write_list(f, &self.pods)?;
        f.write_str("], Blocks:[")?;
        write_list(f, &self.ip_blocks)?;
        f.write_str("], Ports:[")?;
        write_list(f, &self.ports)?;
        f.write_str("]>")
    }
}

// === impl Protocol ===

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp => "TCP".fmt(f),
            Self::Udp => "UDP".fmt(f),
        }
    }
}

// === impl Port ===

impl Port {
    pub fn tcp(number: u16) -> Self {
        Self {
            protocol: Protocol::Tcp,
            number,
        }
    }

    pub fn udp(number: u16) -> Self {
        Self {
            protocol: Protocol::Udp,
            number,
        }
    }
}

impl fmt::Display for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.number {
            0 => write!(f, "{}:ANY", self.protocol),
            n => write!(f, "{}:{}", self.protocol, n),
        }
    }
}

// === impl IpBlock ===

impl IpBlock {
    /// Returns the first exception that is not a subnet of the block's network.
    pub fn invalid_except(&self) -> Option<&IpNet> {
        self.except.iter().find(|except| !self.net.contains(*except))
    }
}

impl From<IpNet> for IpBlock {
    fn from(net: IpNet) -> Self {
        Self {
            net,
            except: vec![],
        }
    }
}

impl fmt::Display for IpBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<Net:{}, Except:[", self.net)?;
        write_list(f, &self.except)?;
        f.write_str("]>")
    }
}

fn write_list<T: fmt::Display>(f: &mut fmt::Formatter<'_>, items: &[T]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        item.fmt(f)?;
    }
    Ok(())
}
