use crate::{CommitSummary, PolicyConfigurator, TxnError};
use policy_configurator_core::{PodId, Policy};
use std::collections::BTreeMap;

/// A policy configuration transaction.
///
/// Pods' policies are staged with [`Txn::configure`] and applied by [`Txn::commit`]. A transaction
/// may be committed only once.
#[derive(Debug)]
pub struct Txn {
    configurator: PolicyConfigurator,
    resync: bool,
    state: State,
    pods: BTreeMap<PodId, Vec<Policy>>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum State {
    Open,
    Committed,
    Failed,
}

// === impl Txn ===

impl Txn {
    pub(crate) fn new(configurator: PolicyConfigurator, resync: bool) -> Self {
        Self {
            configurator,
            resync,
            state: State::Open,
            pods: BTreeMap::new(),
        }
    }

    /// Sets the policies for a pod, replacing any policies previously staged for it.
    ///
    /// The order of policies is not significant.
    pub fn configure(
        &mut self,
        pod: PodId,
        policies: impl IntoIterator<Item = Policy>,
    ) -> Result<&mut Self, TxnError> {
        if self.state != State::Open {
            return Err(TxnError::Closed);
        }
        self.pods.insert(pod, policies.into_iter().collect());
        Ok(self)
    }

    /// Applies the staged configuration.
    ///
    /// Fails with [`TxnError::Backend`] if any renderer fails to commit or a pod cannot be routed
    /// to a renderer. Renderers that committed successfully keep their new configuration.
    pub async fn commit(&mut self) -> Result<CommitSummary, TxnError> {
        if self.state != State::Open {
            return Err(TxnError::Closed);
        }

        // The transaction is closed even if the commit is abandoned before it completes.
        self.state = State::Failed;
        let pods = std::mem::take(&mut self.pods);
        let summary = self.configurator.commit(self.resync, pods).await?;
        self.state = State::Committed;
        Ok(summary)
    }

    pub fn is_resync(&self) -> bool {
        self.resync
    }

    /// Indicates whether the transaction has been committed successfully.
    pub fn is_committed(&self) -> bool {
        self.state == State::Committed
    }

    /// Indicates whether the transaction can still be configured and committed.
    pub fn is_open(&self) -> bool {
        self.state == State::Open
    }
}
