//! The desired-state file.
//!
//! The file describes the renderers to register, the pods known to the cluster and the resolved
//! policies assigned to each pod:
//!
//! ```json
//! {
//!   "renderers": [{ "name": "kernel" }, { "name": "vpp", "label": { "key": "stack", "value": "vpp" } }],
//!   "pods": [{ "namespace": "default", "name": "web", "labels": { "app": "web" }, "ips": ["10.1.1.2"] }],
//!   "policies": [{
//!     "namespace": "default",
//!     "name": "allow-http",
//!     "type": "ingress",
//!     "matches": [{ "type": "ingress", "ports": [{ "protocol": "TCP", "port": 80 }] }]
//!   }],
//!   "assignments": [{ "pod": "default/web", "policies": ["default/allow-http"] }]
//! }
//! ```

use anyhow::{bail, Context, Result};
use ipnet::IpNet;
use policy_configurator_core as model;
use serde::Deserialize;
use std::{
    collections::{BTreeMap, HashMap},
    net::IpAddr,
    path::Path,
};

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct DesiredState {
    #[serde(default)]
    pub renderers: Vec<Renderer>,

    #[serde(default)]
    pub pods: Vec<Pod>,

    #[serde(default)]
    pub policies: Vec<Policy>,

    #[serde(default)]
    pub assignments: Vec<Assignment>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Renderer {
    pub name: String,

    /// Pods carrying this label are rendered by this renderer. The renderer without a label is the
    /// default renderer.
    pub label: Option<Label>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Label {
    pub key: String,
    pub value: String,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Pod {
    pub namespace: String,
    pub name: String,

    #[serde(default)]
    pub labels: BTreeMap<String, String>,

    #[serde(default)]
    pub ips: Vec<IpAddr>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Policy {
    pub namespace: String,
    pub name: String,

    #[serde(rename = "type")]
    pub policy_type: PolicyType,

    #[serde(default)]
    pub matches: Vec<Match>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyType {
    Ingress,
    Egress,
    All,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Match {
    #[serde(rename = "type")]
    pub match_type: MatchType,

    /// Peer pods, as `namespace/name`.
    #[serde(default)]
    pub pods: Vec<String>,

    #[serde(default)]
    pub ip_blocks: Vec<IpBlock>,

    #[serde(default)]
    pub ports: Vec<Port>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchType {
    Ingress,
    Egress,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct IpBlock {
    pub cidr: IpNet,

    #[serde(default)]
    pub except: Vec<IpNet>,
}

#[derive(Copy, Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Port {
    pub protocol: Protocol,

    /// Zero or unset matches all ports.
    #[serde(default)]
    pub port: u16,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Protocol {
    Tcp,
    Udp,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Assignment {
    /// The pod, as `namespace/name`.
    pub pod: String,

    /// The policies assigned to the pod, as `namespace/name`.
    #[serde(default)]
    pub policies: Vec<String>,
}

/// Serves pod lookups from the desired-state file.
#[derive(Clone, Debug, Default)]
pub struct PodTable(HashMap<model::PodId, (Vec<model::PodLabel>, Vec<IpAddr>)>);

// === impl DesiredState ===

impl DesiredState {
    pub fn load(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path)
            .with_context(|| format!("failed to open {}", path.display()))?;
        serde_json::from_reader(std::io::BufReader::new(file))
            .with_context(|| format!("failed to parse {}", path.display()))
    }

    pub fn pod_table(&self) -> PodTable {
        PodTable(
            self.pods
                .iter()
                .map(|pod| {
                    let labels = pod
                        .labels
                        .iter()
                        .map(|(k, v)| model::PodLabel::new(k, v))
                        .collect();
                    (
                        model::PodId::new(&pod.namespace, &pod.name),
                        (labels, pod.ips.clone()),
                    )
                })
                .collect(),
        )
    }

    /// Resolves each assignment's policy references.
    pub fn assignments(&self) -> Result<Vec<(model::PodId, Vec<model::Policy>)>> {
        let mut policies = HashMap::with_capacity(self.policies.len());
        for policy in &self.policies {
            let policy = model::Policy::try_from(policy)?;
            if policies.contains_key(&policy.id) {
                bail!("policy {} is defined more than once", policy.id);
            }
            policies.insert(policy.id.clone(), policy);
        }

        self.assignments
            .iter()
            .map(|assignment| {
                let pod = assignment.pod.parse::<model::PodId>()?;
                let assigned = assignment
                    .policies
                    .iter()
                    .map(|id| {
                        let id = id.parse::<model::PolicyId>()?;
                        match policies.get(&id) {
                            Some(policy) => Ok(policy.clone()),
                            None => bail!("pod {} is assigned unknown policy {}", pod, id),
                        }
                    })
                    .collect::<Result<Vec<_>>>()?;
                Ok((pod, assigned))
            })
            .collect()
    }
}

// === impl PodTable ===

impl model::PodLookup for PodTable {
    fn labels(&self, pod: &model::PodId) -> Vec<model::PodLabel> {
        self.0
            .get(pod)
            .map(|(labels, _)| labels.clone())
            .unwrap_or_default()
    }

    fn addresses(&self, pod: &model::PodId) -> Option<Vec<IpAddr>> {
        self.0.get(pod).map(|(_, ips)| ips.clone())
    }
}

// === conversions ===

impl TryFrom<&Policy> for model::Policy {
    type Error = anyhow::Error;

    fn try_from(policy: &Policy) -> Result<Self> {
        let id = model::PolicyId::new(&policy.namespace, &policy.name);
        let matches = policy
            .matches
            .iter()
            .map(model::Match::try_from)
            .collect::<Result<Vec<_>>>()
            .with_context(|| format!("invalid policy {}", id))?;
        Ok(model::Policy {
            id,
            policy_type: match policy.policy_type {
                PolicyType::Ingress => model::PolicyType::Ingress,
                PolicyType::Egress => model::PolicyType::Egress,
                PolicyType::All => model::PolicyType::All,
            },
            matches,
        })
    }
}

impl TryFrom<&Match> for model::Match {
    type Error = anyhow::Error;

    fn try_from(m: &Match) -> Result<Self> {
        Ok(model::Match {
            match_type: match m.match_type {
                MatchType::Ingress => model::MatchType::Ingress,
                MatchType::Egress => model::MatchType::Egress,
            },
            pods: m
                .pods
                .iter()
                .map(|pod| pod.parse::<model::PodId>())
                .collect::<Result<_>>()?,
            ip_blocks: m
                .ip_blocks
                .iter()
                .map(|block| model::IpBlock {
                    net: block.cidr,
                    except: block.except.clone(),
                })
                .collect(),
            ports: m.ports.iter().map(|&port| port.into()).collect(),
        })
    }
}

impl From<Port> for model::Port {
    fn from(Port { protocol, port }: Port) -> Self {
        let protocol = match protocol {
            Protocol::Tcp => model::Protocol::Tcp,
            Protocol::Udp => model::Protocol::Udp,
        };
        model::Port {
            protocol,
            number: port,
        }
    }
}

impl From<Label> for model::PodLabel {
    fn from(Label { key, value }: Label) -> Self {
        model::PodLabel { key, value }
    }
}
