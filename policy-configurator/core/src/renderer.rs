use crate::{PodId, Rules};
use anyhow::Result;

/// Programs a network stack's dataplane from generated rules.
///
/// A renderer may serve many pods. Identical rule lists are structurally equal (and hash equally),
/// so a renderer may share rendered state between pods whose rules are the same.
pub trait PolicyRenderer: Send + Sync {
    /// Identifies the renderer in logs, metrics and errors.
    fn name(&self) -> &str;

    /// Starts a new transaction.
    ///
    /// If `resync` is set, the pods configured in the transaction are the complete desired state
    /// and any pod not mentioned must be removed. Otherwise, pods not mentioned are left unchanged.
    fn new_txn(&self, resync: bool) -> Box<dyn RendererTxn>;
}

/// A renderer transaction. Configuration has no effect until the transaction is committed.
#[async_trait::async_trait]
pub trait RendererTxn: Send {
    /// Stages the rules for a pod, replacing any rules previously rendered for it.
    fn configure(&mut self, pod: PodId, ingress: Rules, egress: Rules);

    /// Applies the staged configuration.
    async fn commit(self: Box<Self>) -> Result<()>;
}
