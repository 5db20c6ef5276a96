use crate::{MatchType, Protocol};
use ipnet::IpNet;
use std::{fmt, num::NonZeroU16};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Action {
    Allow,
    Deny,
}

/// A single filtering decision.
///
/// Unset fields are wildcards: a rule without a protocol applies to all protocols, a rule without a
/// port applies to every port of its protocol and a rule without a peer applies to every peer.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Rule {
    pub action: Action,
    pub direction: MatchType,
    pub protocol: Option<Protocol>,
    pub port: Option<NonZeroU16>,

    /// The source (ingress) or destination (egress) network.
    pub peer: Option<IpNet>,
}

/// An ordered list of rules for a single pod and direction. The first matching rule wins.
///
/// An empty list leaves traffic unrestricted. Otherwise the list is terminated by a default-deny
/// rule.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Rules(Vec<Rule>);

// === impl Action ===

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Allow => "allow".fmt(f),
            Self::Deny => "deny".fmt(f),
        }
    }
}

// === impl Rule ===

impl Rule {
    pub fn allow(
        direction: MatchType,
        protocol: Option<Protocol>,
        port: Option<NonZeroU16>,
        peer: Option<IpNet>,
    ) -> Self {
        Self {
            action: Action::Allow,
            direction,
            protocol,
            port,
            peer,
        }
    }

    pub fn default_deny(direction: MatchType) -> Self {
        Self {
            action: Action::Deny,
            direction,
            protocol: None,
            port: None,
            peer: None,
        }
    }

    pub fn is_default_deny(&self) -> bool {
        self.action == Action::Deny
            && self.protocol.is_none()
            && self.port.is_none()
            && self.peer.is_none()
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_default_deny() {
            return "deny any".fmt(f);
        }

        write!(f, "{} ", self.action)?;
        match (self.protocol, self.port) {
            (None, _) => f.write_str("ANY")?,
            (Some(proto), None) => write!(f, "{}:ANY", proto)?,
            (Some(proto), Some(port)) => write!(f, "{}:{}", proto, port)?,
        }
        match self.peer {
            Some(net) => write!(f, " {}", net),
            None => f.write_str(" any-peer"),
        }
    }
}

// === impl Rules ===

impl Rules {
    /// Returns a rule list that does not restrict traffic.
    pub fn unrestricted() -> Self {
        Self::default()
    }

    pub fn is_unrestricted(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Rule> {
        self.0.iter()
    }

    /// Returns the allow rules, excluding the default-deny terminator.
    pub fn allowed(&self) -> impl Iterator<Item = &Rule> {
        self.0.iter().filter(|r| r.action == Action::Allow)
    }

    pub fn as_slice(&self) -> &[Rule] {
        &self.0
    }
}

impl From<Vec<Rule>> for Rules {
    fn from(rules: Vec<Rule>) -> Self {
        Self(rules)
    }
}

impl<'a> IntoIterator for &'a Rules {
    type Item = &'a Rule;
    type IntoIter = std::slice::Iter<'a, Rule>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl fmt::Display for Rules {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_unrestricted() {
            return "[unrestricted]".fmt(f);
        }

        f.write_str("[")?;
        for (i, rule) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            rule.fmt(f)?;
        }
        f.write_str("]")
    }
}
