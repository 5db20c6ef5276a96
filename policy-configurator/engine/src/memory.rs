//! An in-process renderer.
//!
//! The memory renderer holds the most recently committed rules for each pod. It does not program a
//! dataplane; it is used for dry runs and as the reference implementation of the renderer
//! transaction semantics. Identical rule lists are interned so that pods with the same policies
//! share a single copy of their rules.

use ahash::AHashSet as HashSet;
use anyhow::Result;
use parking_lot::RwLock;
use policy_configurator_core::{PodId, PolicyRenderer, RendererTxn, Rules};
use std::{collections::BTreeMap, sync::Arc};

#[derive(Debug)]
pub struct MemoryRenderer {
    name: String,
    state: Arc<RwLock<State>>,
}

/// The rules applied to a pod.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PodRules {
    pub ingress: Arc<Rules>,
    pub egress: Arc<Rules>,
}

#[derive(Debug, Default)]
struct State {
    pods: BTreeMap<PodId, PodRules>,
    interned: HashSet<Arc<Rules>>,
    commits: usize,
}

struct MemoryTxn {
    name: String,
    resync: bool,
    state: Arc<RwLock<State>>,
    pods: Vec<(PodId, Rules, Rules)>,
}

// === impl MemoryRenderer ===

impl MemoryRenderer {
    pub fn new(name: impl ToString) -> Self {
        Self {
            name: name.to_string(),
            state: Default::default(),
        }
    }

    /// Returns the rules applied to a pod.
    pub fn get(&self, pod: &PodId) -> Option<PodRules> {
        self.state.read().pods.get(pod).cloned()
    }

    /// Returns the rules applied to every pod.
    pub fn pods(&self) -> BTreeMap<PodId, PodRules> {
        self.state.read().pods.clone()
    }

    /// Returns the number of distinct rule lists held by the renderer.
    pub fn distinct_rules(&self) -> usize {
        self.state.read().interned.len()
    }

    /// Returns the number of committed transactions.
    pub fn commits(&self) -> usize {
        self.state.read().commits
    }
}

impl PolicyRenderer for MemoryRenderer {
    fn name(&self) -> &str {
        &self.name
    }

    fn new_txn(&self, resync: bool) -> Box<dyn RendererTxn> {
        Box::new(MemoryTxn {
            name: self.name.clone(),
            resync,
            state: self.state.clone(),
            pods: vec![],
        })
    }
}

// === impl MemoryTxn ===

#[async_trait::async_trait]
impl RendererTxn for MemoryTxn {
    fn configure(&mut self, pod: PodId, ingress: Rules, egress: Rules) {
        self.pods.push((pod, ingress, egress));
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let Self {
            name,
            resync,
            state,
            pods,
        } = *self;

        let mut state = state.write();
        if resync {
            state.pods.clear();
        }
        let configured = pods.len();
        for (pod, ingress, egress) in pods {
            let rules = PodRules {
                ingress: state.intern(ingress),
                egress: state.intern(egress),
            };
            state.pods.insert(pod, rules);
        }
        state.release_unused();
        state.commits += 1;

        tracing::debug!(
            renderer = %name,
            resync,
            configured,
            pods = state.pods.len(),
            distinct = state.interned.len(),
            "Committed rules"
        );
        Ok(())
    }
}

// === impl State ===

impl State {
    fn intern(&mut self, rules: Rules) -> Arc<Rules> {
        if let Some(rules) = self.interned.get(&rules) {
            return rules.clone();
        }
        let rules = Arc::new(rules);
        self.interned.insert(rules.clone());
        rules
    }

    /// Drops interned rules that are no longer referenced by any pod.
    fn release_unused(&mut self) {
        self.interned.retain(|rules| Arc::strong_count(rules) > 1);
    }
}
