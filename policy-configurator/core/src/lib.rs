#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod pod;
pub mod policy;
pub mod renderer;
pub mod rule;

pub use self::{
    pod::{PodId, PodLabel, PodLookup},
    policy::{IpBlock, Match, MatchType, Policy, PolicyId, PolicyType, Port, Protocol},
    renderer::{PolicyRenderer, RendererTxn},
    rule::{Action, Rule, Rules},
};
pub use ipnet::{IpNet, Ipv4Net, Ipv6Net};
