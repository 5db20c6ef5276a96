//! Translates a pod's policies into ingress and egress rules.
//!
//! For each direction, every applicable match is expanded into `(protocol, peer, port)` triples.
//! Triples are deduplicated across all matches and sorted by a canonical key, so the same set of
//! policies always produces the same rules regardless of their order or duplication. Each triple
//! becomes one allow rule and the list is terminated by a default-deny rule.

use crate::{cidr, ValidationError};
use policy_configurator_core::{
    IpNet, Match, MatchType, PodId, PodLookup, Policy, Protocol, Rule, Rules,
};
use std::{collections::BTreeSet, num::NonZeroU16};

/// The rules generated for a single pod.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GeneratedRules {
    pub ingress: Rules,
    pub egress: Rules,

    /// Invalid input excluded from the rules.
    pub errors: Vec<ValidationError>,
}

/// A canonical rule key.
///
/// Fields are ordered to sort by protocol, then by the peer network's textual form, then by port.
/// Wildcards (`None`) sort first.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
struct Triple {
    protocol: Option<Protocol>,
    peer: Option<(String, IpNet)>,
    port: Option<NonZeroU16>,
}

/// The peers selected by a match.
enum Peers {
    Any,
    Nets(BTreeSet<IpNet>),
}

/// Generates the rules for `pod` from the set of policies assigned to it.
///
/// Peer pods are resolved to their addresses via `lookup`. Invalid input is excluded from the rules
/// and reported in [`GeneratedRules::errors`]; it never causes generation to fail.
pub fn generate(pod: &PodId, policies: &[Policy], lookup: &dyn PodLookup) -> GeneratedRules {
    let mut errors = Vec::new();
    let ingress = generate_direction(MatchType::Ingress, policies, lookup, &mut errors);
    let egress = generate_direction(MatchType::Egress, policies, lookup, &mut errors);
    tracing::trace!(%pod, %ingress, %egress, "Generated rules");
    GeneratedRules {
        ingress,
        egress,
        errors,
    }
}

fn generate_direction(
    direction: MatchType,
    policies: &[Policy],
    lookup: &dyn PodLookup,
    errors: &mut Vec<ValidationError>,
) -> Rules {
    let mut applicable = false;
    let mut triples = BTreeSet::new();
    for policy in policies {
        let Some(matches) = policy.matches_for(direction) else {
            continue;
        };
        applicable = true;
        for m in matches {
            expand(policy, m, lookup, &mut triples, errors);
        }
    }

    // Traffic is unrestricted unless some policy applies to the direction.
    if !applicable {
        return Rules::unrestricted();
    }

    triples
        .into_iter()
        .map(|t| Rule::allow(direction, t.protocol, t.port, t.peer.map(|(_, net)| net)))
        .chain(Some(Rule::default_deny(direction)))
        .collect::<Vec<_>>()
        .into()
}

fn expand(
    policy: &Policy,
    m: &Match,
    lookup: &dyn PodLookup,
    triples: &mut BTreeSet<Triple>,
    errors: &mut Vec<ValidationError>,
) {
    let peers = match resolve_peers(policy, m, lookup, errors) {
        Some(peers) => peers,
        None => return,
    };

    let peers = match peers {
        Peers::Any => vec![None],
        Peers::Nets(nets) => nets
            .into_iter()
            .map(|net| Some((net.to_string(), net)))
            .collect(),
    };

    let ports = if m.ports.is_empty() {
        vec![(None, None)]
    } else {
        m.ports
            .iter()
            .map(|port| (Some(port.protocol), NonZeroU16::new(port.number)))
            .collect()
    };

    for peer in &peers {
        for &(protocol, port) in &ports {
            triples.insert(Triple {
                protocol,
                peer: peer.clone(),
                port,
            });
        }
    }
}

/// Resolves the peers selected by a match.
///
/// Returns `None` if the match is invalid and must be excluded altogether. Whether a match selects
/// all peers is decided by the declared peers, so peers that fail to resolve never widen a match.
fn resolve_peers(
    policy: &Policy,
    m: &Match,
    lookup: &dyn PodLookup,
    errors: &mut Vec<ValidationError>,
) -> Option<Peers> {
    if m.selects_all_peers() {
        return Some(Peers::Any);
    }

    for block in &m.ip_blocks {
        if let Some(except) = block.invalid_except() {
            report(
                errors,
                ValidationError::InvalidIpBlock {
                    policy: policy.id.clone(),
                    block: block.clone(),
                    except: *except,
                },
            );
            return None;
        }
    }

    let mut nets = BTreeSet::new();
    for peer in &m.pods {
        match lookup.addresses(peer) {
            Some(addrs) if !addrs.is_empty() => nets.extend(addrs.into_iter().map(IpNet::from)),
            _ => report(
                errors,
                ValidationError::UnresolvedPeer {
                    policy: policy.id.clone(),
                    peer: peer.clone(),
                },
            ),
        }
    }
    for block in &m.ip_blocks {
        nets.extend(cidr::subtract(block.net, &block.except));
    }

    Some(Peers::Nets(nets))
}

fn report(errors: &mut Vec<ValidationError>, error: ValidationError) {
    if !errors.contains(&error) {
        errors.push(error);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use maplit::hashmap;
    use policy_configurator_core::{IpBlock, PodLabel, PolicyId, PolicyType, Port};
    use std::{collections::HashMap, net::IpAddr};

    #[derive(Default)]
    struct Pods(HashMap<PodId, Vec<IpAddr>>);

    impl PodLookup for Pods {
        fn labels(&self, _: &PodId) -> Vec<PodLabel> {
            vec![]
        }

        fn addresses(&self, pod: &PodId) -> Option<Vec<IpAddr>> {
            self.0.get(pod).cloned()
        }
    }

    fn web() -> PodId {
        PodId::new("default", "web")
    }

    fn mk_policy(name: &str, policy_type: PolicyType, matches: Vec<Match>) -> Policy {
        Policy {
            id: PolicyId::new("default", name),
            policy_type,
            matches,
        }
    }

    fn mk_match(match_type: MatchType, blocks: &[&str], ports: Vec<Port>) -> Match {
        Match {
            match_type,
            pods: vec![],
            ip_blocks: blocks
                .iter()
                .map(|b| IpBlock::from(b.parse::<IpNet>().unwrap()))
                .collect(),
            ports,
        }
    }

    fn allow(direction: MatchType, proto: Protocol, port: u16, peer: Option<&str>) -> Rule {
        Rule::allow(
            direction,
            Some(proto),
            NonZeroU16::new(port),
            peer.map(|p| p.parse().unwrap()),
        )
    }

    #[test]
    fn no_policies_are_unrestricted() {
        let rules = generate(&web(), &[], &Pods::default());
        assert!(rules.ingress.is_unrestricted());
        assert!(rules.egress.is_unrestricted());
        assert!(rules.errors.is_empty());
    }

    #[test]
    fn ingress_port() {
        let policy = mk_policy(
            "allow-http",
            PolicyType::Ingress,
            vec![mk_match(MatchType::Ingress, &[], vec![Port::tcp(80)])],
        );
        let rules = generate(&web(), &[policy], &Pods::default());
        assert_eq!(
            rules.ingress,
            vec![
                allow(MatchType::Ingress, Protocol::Tcp, 80, None),
                Rule::default_deny(MatchType::Ingress),
            ]
            .into()
        );
        assert_eq!(rules.ingress.to_string(), "[allow TCP:80 any-peer, deny any]");
        assert!(rules.egress.is_unrestricted());
    }

    #[test]
    fn policy_without_matches_denies_all() {
        let policy = mk_policy("deny-egress", PolicyType::Egress, vec![]);
        let rules = generate(&web(), &[policy], &Pods::default());
        assert!(rules.ingress.is_unrestricted());
        assert_eq!(
            rules.egress,
            vec![Rule::default_deny(MatchType::Egress)].into()
        );
    }

    #[test]
    fn matches_for_other_direction_deny_all() {
        // The policy applies to both directions but only allows ingress traffic.
        let policy = mk_policy(
            "ingress-only",
            PolicyType::All,
            vec![mk_match(MatchType::Ingress, &[], vec![])],
        );
        let rules = generate(&web(), &[policy], &Pods::default());
        assert_eq!(
            rules.ingress,
            vec![
                Rule::allow(MatchType::Ingress, None, None, None),
                Rule::default_deny(MatchType::Ingress),
            ]
            .into()
        );
        assert_eq!(
            rules.egress,
            vec![Rule::default_deny(MatchType::Egress)].into()
        );
    }

    #[test]
    fn duplicate_triples_are_merged() {
        let mk = |name| {
            mk_policy(
                name,
                PolicyType::Ingress,
                vec![mk_match(
                    MatchType::Ingress,
                    &["10.0.0.0/24"],
                    vec![Port::tcp(443)],
                )],
            )
        };
        let rules = generate(&web(), &[mk("a"), mk("b")], &Pods::default());
        assert_eq!(
            rules.ingress,
            vec![
                allow(MatchType::Ingress, Protocol::Tcp, 443, Some("10.0.0.0/24")),
                Rule::default_deny(MatchType::Ingress),
            ]
            .into()
        );
    }

    #[test]
    fn deterministic() {
        let a = mk_policy(
            "a",
            PolicyType::All,
            vec![
                mk_match(
                    MatchType::Ingress,
                    &["10.0.0.0/24", "192.168.0.0/16"],
                    vec![Port::udp(53), Port::tcp(53)],
                ),
                mk_match(MatchType::Egress, &["172.16.0.0/12"], vec![]),
            ],
        );
        let b = mk_policy(
            "b",
            PolicyType::Ingress,
            vec![mk_match(
                MatchType::Ingress,
                &["9.0.0.0/8"],
                vec![Port::tcp(0), Port::tcp(8080)],
            )],
        );
        let c = mk_policy("c", PolicyType::Egress, vec![]);

        let pods = Pods::default();
        let expected = generate(&web(), &[a.clone(), b.clone(), c.clone()], &pods);
        for policies in [
            vec![c.clone(), b.clone(), a.clone()],
            vec![b.clone(), a.clone(), c.clone(), a.clone()],
            vec![a.clone(), c.clone(), b.clone(), b.clone(), c.clone()],
        ] {
            assert_eq!(generate(&web(), &policies, &pods), expected);
        }

        // Rules are ordered by protocol, then by the peer's textual form, then by port.
        assert_eq!(
            expected.ingress,
            vec![
                allow(MatchType::Ingress, Protocol::Tcp, 53, Some("10.0.0.0/24")),
                allow(MatchType::Ingress, Protocol::Tcp, 53, Some("192.168.0.0/16")),
                allow(MatchType::Ingress, Protocol::Tcp, 0, Some("9.0.0.0/8")),
                allow(MatchType::Ingress, Protocol::Tcp, 8080, Some("9.0.0.0/8")),
                allow(MatchType::Ingress, Protocol::Udp, 53, Some("10.0.0.0/24")),
                allow(MatchType::Ingress, Protocol::Udp, 53, Some("192.168.0.0/16")),
                Rule::default_deny(MatchType::Ingress),
            ]
            .into()
        );
        assert_eq!(
            expected.egress,
            vec![
                Rule::allow(
                    MatchType::Egress,
                    None,
                    None,
                    Some("172.16.0.0/12".parse().unwrap())
                ),
                Rule::default_deny(MatchType::Egress),
            ]
            .into()
        );
    }

    #[test]
    fn allow_rules_equal_distinct_triples() {
        let policies = vec![
            mk_policy(
                "a",
                PolicyType::Ingress,
                vec![
                    mk_match(
                        MatchType::Ingress,
                        &["10.0.0.0/24", "10.0.1.0/24"],
                        vec![Port::tcp(80), Port::tcp(443)],
                    ),
                    mk_match(MatchType::Ingress, &["10.0.1.0/24"], vec![Port::tcp(80)]),
                ],
            ),
            mk_policy(
                "b",
                PolicyType::Ingress,
                vec![mk_match(
                    MatchType::Ingress,
                    &["10.0.0.0/24"],
                    vec![Port::tcp(443), Port::udp(443)],
                )],
            ),
        ];
        let rules = generate(&web(), &policies, &Pods::default());
        // {10.0.0.0/24, 10.0.1.0/24} x {TCP:80, TCP:443} plus 10.0.0.0/24 UDP:443.
        assert_eq!(rules.ingress.allowed().count(), 5);
        assert_eq!(rules.ingress.len(), 6);
    }

    #[test]
    fn explicit_peer_allowed_despite_exception() {
        let client = PodId::new("default", "client");
        let pods = Pods(hashmap! {
            client.clone() => vec!["10.0.0.5".parse().unwrap()],
        });
        let policy = mk_policy(
            "a",
            PolicyType::Ingress,
            vec![
                Match {
                    match_type: MatchType::Ingress,
                    pods: vec![client],
                    ip_blocks: vec![],
                    ports: vec![],
                },
                Match {
                    match_type: MatchType::Ingress,
                    pods: vec![],
                    ip_blocks: vec![IpBlock {
                        net: "10.0.0.0/29".parse().unwrap(),
                        except: vec!["10.0.0.4/30".parse().unwrap()],
                    }],
                    ports: vec![],
                },
            ],
        );
        let rules = generate(&web(), &[policy], &pods);
        assert_eq!(
            rules.ingress.to_string(),
            "[allow ANY 10.0.0.0/30, allow ANY 10.0.0.5/32, deny any]"
        );
        assert!(rules.errors.is_empty());
    }

    #[test]
    fn peers_and_blocks_are_combined() {
        let client = PodId::new("default", "client");
        let pods = Pods(hashmap! {
            client.clone() => vec!["10.1.1.2".parse().unwrap(), "fd00::2".parse().unwrap()],
        });
        let policy = mk_policy(
            "a",
            PolicyType::Egress,
            vec![Match {
                match_type: MatchType::Egress,
                pods: vec![client],
                ip_blocks: vec![IpBlock::from("10.2.0.0/16".parse::<IpNet>().unwrap())],
                ports: vec![Port::udp(53)],
            }],
        );
        let rules = generate(&web(), &[policy], &pods);
        assert_eq!(
            rules.egress.to_string(),
            "[allow UDP:53 10.1.1.2/32, allow UDP:53 10.2.0.0/16, allow UDP:53 fd00::2/128, deny any]"
        );
    }

    #[test]
    fn invalid_ip_block_excludes_match() {
        let policy = mk_policy(
            "bad",
            PolicyType::Ingress,
            vec![
                Match {
                    match_type: MatchType::Ingress,
                    pods: vec![],
                    ip_blocks: vec![IpBlock {
                        net: "10.0.0.0/24".parse().unwrap(),
                        except: vec!["10.1.0.0/24".parse().unwrap()],
                    }],
                    ports: vec![],
                },
                mk_match(MatchType::Ingress, &["192.168.0.0/24"], vec![Port::tcp(22)]),
            ],
        );
        let rules = generate(&web(), &[policy.clone(), policy], &Pods::default());
        assert_eq!(
            rules.ingress.to_string(),
            "[allow TCP:22 192.168.0.0/24, deny any]"
        );
        assert_eq!(
            rules.errors,
            vec![ValidationError::InvalidIpBlock {
                policy: PolicyId::new("default", "bad"),
                block: IpBlock {
                    net: "10.0.0.0/24".parse().unwrap(),
                    except: vec!["10.1.0.0/24".parse().unwrap()],
                },
                except: "10.1.0.0/24".parse().unwrap(),
            }]
        );
    }

    #[test]
    fn unresolved_peer_does_not_widen_match() {
        let policy = mk_policy(
            "a",
            PolicyType::Ingress,
            vec![Match {
                match_type: MatchType::Ingress,
                pods: vec![PodId::new("default", "gone")],
                ip_blocks: vec![],
                ports: vec![Port::tcp(80)],
            }],
        );
        let rules = generate(&web(), &[policy], &Pods::default());
        assert_eq!(
            rules.ingress,
            vec![Rule::default_deny(MatchType::Ingress)].into()
        );
        assert_eq!(
            rules.errors,
            vec![ValidationError::UnresolvedPeer {
                policy: PolicyId::new("default", "a"),
                peer: PodId::new("default", "gone"),
            }]
        );
    }
}
