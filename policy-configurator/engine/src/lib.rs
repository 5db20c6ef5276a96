//! Policy Configurator
//!
//! For a given pod, the configurator translates a set of policies into ingress and egress lists of
//! rules and applies them through the renderer registered for the pod's network stack:
//!
//! ```text
//! [ Txn ] -> [ Policy ] -> generate -> [ Rules ] -> [ Registry ] -> [ RendererTxn ]
//! ```
//!
//! Rule lists are as short as possible and the same set of policies always results in the same list
//! of rules, so renderers may share rendered rules between pods.
//!
//! Renderers are selected per pod by label. A transaction opens one renderer transaction per
//! renderer it touches; renderer transactions are committed concurrently and independently, so a
//! failing renderer does not prevent the others from applying their configuration.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod cidr;
mod configurator;
mod error;
pub mod generator;
pub mod memory;
mod metrics;
mod registry;
mod txn;


pub use self::{
    configurator::{Config, PolicyConfigurator},
    error::{
        Applied, BackendError, BackendErrors, BackendFailure, CommitSummary, InvalidInput,
        RegistryError, TxnError, ValidationError,
    },
    generator::{generate, GeneratedRules},
    metrics::ConfiguratorMetrics,
    registry::{Registry, SharedRenderer},
    txn::Txn,
};
