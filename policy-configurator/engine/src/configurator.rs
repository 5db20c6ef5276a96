use crate::{
    generator,
    registry::{same_renderer, SharedRenderer},
    Applied, BackendError, BackendErrors, BackendFailure, CommitSummary, ConfiguratorMetrics,
    InvalidInput, Registry, RegistryError, Txn, TxnError,
};
use futures::future;
use parking_lot::RwLock;
use policy_configurator_core::{MatchType, PodId, PodLabel, PodLookup, Policy, Rules};
use std::{collections::BTreeMap, sync::Arc, time::Duration};
use tokio::time;
use tracing::{debug, error, info, warn};

#[derive(Clone, Debug)]
pub struct Config {
    /// Bounds the time each renderer may take to commit a transaction.
    pub commit_timeout: Duration,
}

/// Translates pods' policies into rules and applies them through the registered renderers.
///
/// The configurator is a cheaply-cloneable handle; clones share the same renderer registry.
#[derive(Clone)]
pub struct PolicyConfigurator {
    registry: Arc<RwLock<Registry>>,
    pods: Arc<dyn PodLookup>,
    config: Config,
    metrics: ConfiguratorMetrics,
}

/// The rules for all pods rendered by a single renderer.
struct Batch {
    renderer: SharedRenderer,
    pods: Vec<(PodId, Rules, Rules)>,
}

// === impl Config ===

impl Default for Config {
    fn default() -> Self {
        Self {
            commit_timeout: Duration::from_secs(10),
        }
    }
}

// === impl PolicyConfigurator ===

impl PolicyConfigurator {
    pub fn new(pods: Arc<dyn PodLookup>, config: Config, metrics: ConfiguratorMetrics) -> Self {
        Self {
            registry: Default::default(),
            pods,
            config,
            metrics,
        }
    }

    /// Registers the renderer for pods carrying `label`. These pods are expected to be attached to
    /// a separate network stack.
    pub fn register_renderer(
        &self,
        label: PodLabel,
        renderer: SharedRenderer,
    ) -> Result<(), RegistryError> {
        self.registry.write().register(label, renderer)
    }

    /// Registers the renderer for pods not matched by any other registered renderer.
    pub fn register_default_renderer(&self, renderer: SharedRenderer) -> Result<(), RegistryError> {
        self.registry.write().register_default(renderer)
    }

    /// Starts a new transaction. Nothing is applied until the transaction is committed.
    ///
    /// If `resync` is set, the transaction's pods replace the entire configuration held by the
    /// renderers. Otherwise, pods not configured in the transaction are left unchanged.
    pub fn new_txn(&self, resync: bool) -> Txn {
        Txn::new(self.clone(), resync)
    }

    #[tracing::instrument(skip(self, pods), fields(pods = pods.len()))]
    pub(crate) async fn commit(
        &self,
        resync: bool,
        pods: BTreeMap<PodId, Vec<Policy>>,
    ) -> Result<CommitSummary, TxnError> {
        let (batches, unroutable, invalid) = self.prepare(resync, pods);

        // Renderers are independent of each other, so they are committed concurrently and a
        // failure in one does not prevent the others from applying their configuration.
        let timeout = self.config.commit_timeout;
        let results = future::join_all(batches.into_iter().map(|Batch { renderer, pods }| {
            let mut txn = renderer.new_txn(resync);
            let ids = pods.iter().map(|(pod, _, _)| pod.clone()).collect::<Vec<_>>();
            for (pod, ingress, egress) in pods {
                txn.configure(pod, ingress, egress);
            }
            async move {
                let res = match time::timeout(timeout, txn.commit()).await {
                    Ok(Ok(())) => Ok(()),
                    Ok(Err(error)) => Err(BackendError::Failed(error)),
                    Err(_) => Err(BackendError::Timeout(timeout)),
                };
                (renderer.name().to_string(), ids, res)
            }
        }))
        .await;

        let mut committed = CommitSummary {
            applied: vec![],
            invalid,
        };
        let mut failed = vec![];
        for (renderer, pods, res) in results {
            self.metrics.backend_commit(&renderer, res.as_ref().map(|_| ()));
            match res {
                Ok(()) => {
                    debug!(%renderer, pods = pods.len(), "Renderer committed");
                    committed.applied.push(Applied { renderer, pods });
                }
                Err(error) => {
                    error!(%renderer, pods = pods.len(), %error, "Renderer failed to commit");
                    failed.push(BackendFailure {
                        renderer,
                        pods,
                        error,
                    });
                }
            }
        }

        let ok = failed.is_empty() && unroutable.is_empty();
        self.metrics.commit(ok);
        if !ok {
            return Err(TxnError::Backend(BackendErrors {
                failed,
                unroutable,
                committed,
            }));
        }

        info!(renderers = committed.applied.len(), "Committed policy configuration");
        Ok(committed)
    }

    /// Routes each pod to its renderer and generates its rules.
    ///
    /// All rules are generated before any renderer transaction is started.
    fn prepare(
        &self,
        resync: bool,
        pods: BTreeMap<PodId, Vec<Policy>>,
    ) -> (Vec<Batch>, Vec<PodId>, Vec<InvalidInput>) {
        // Routing works from a snapshot so that the lock is not held while rules are generated.
        let registry = self.registry.read().clone();

        // A resync must reach every renderer so that each discards the pods it no longer owns.
        let mut batches = if resync {
            registry
                .renderers()
                .into_iter()
                .map(|renderer| Batch {
                    renderer,
                    pods: vec![],
                })
                .collect()
        } else {
            Vec::<Batch>::new()
        };

        let mut unroutable = vec![];
        let mut invalid = vec![];
        for (pod, policies) in pods {
            let renderer = match registry.resolve(&self.pods.labels(&pod)) {
                Ok(renderer) => renderer,
                Err(error) => {
                    warn!(%pod, %error, "Pod cannot be rendered");
                    unroutable.push(pod);
                    continue;
                }
            };

            let generated = generator::generate(&pod, &policies, &*self.pods);
            for error in generated.errors {
                warn!(%pod, %error, "Excluding invalid policy input");
                self.metrics.validation_error();
                invalid.push(InvalidInput {
                    pod: pod.clone(),
                    error,
                });
            }
            self.metrics
                .generated(MatchType::Ingress, generated.ingress.len());
            self.metrics
                .generated(MatchType::Egress, generated.egress.len());
            debug!(
                %pod,
                renderer = %renderer.name(),
                policies = policies.len(),
                ingress = generated.ingress.len(),
                egress = generated.egress.len(),
                "Generated rules"
            );

            let idx = match batches
                .iter()
                .position(|b| same_renderer(&b.renderer, renderer))
            {
                Some(idx) => idx,
                None => {
                    batches.push(Batch {
                        renderer: renderer.clone(),
                        pods: vec![],
                    });
                    batches.len() - 1
                }
            };
            batches[idx]
                .pods
                .push((pod, generated.ingress, generated.egress));
        }

        (batches, unroutable, invalid)
    }
}

impl std::fmt::Debug for PolicyConfigurator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolicyConfigurator")
            .field("registry", &*self.registry.read())
            .field("config", &self.config)
            .finish()
    }
}
