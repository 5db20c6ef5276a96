use policy_configurator_core::MatchType;
use prometheus_client::{
    encoding::{EncodeLabelSet, EncodeLabelValue},
    metrics::{counter::Counter, family::Family},
    registry::Registry,
};

#[derive(Clone, Debug, Default)]
pub struct ConfiguratorMetrics {
    commits: Family<CommitLabels, Counter>,
    backend_commits: Family<BackendLabels, Counter>,
    generated_rules: Family<DirectionLabels, Counter>,
    validation_errors: Counter,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct CommitLabels {
    result: CommitResult,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct BackendLabels {
    renderer: String,
    result: CommitResult,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct DirectionLabels {
    direction: Direction,
}

#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq, EncodeLabelValue)]
enum CommitResult {
    Ok,
    Error,
    Timeout,
}

#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq, EncodeLabelValue)]
enum Direction {
    Ingress,
    Egress,
}

// === impl ConfiguratorMetrics ===

impl ConfiguratorMetrics {
    pub fn register(prom: &mut Registry) -> Self {
        let metrics = Self::default();
        prom.register(
            "commits",
            "Count of committed policy transactions",
            metrics.commits.clone(),
        );
        prom.register(
            "backend_commits",
            "Count of renderer transactions committed",
            metrics.backend_commits.clone(),
        );
        prom.register(
            "generated_rules",
            "Count of rules generated for pods",
            metrics.generated_rules.clone(),
        );
        prom.register(
            "validation_errors",
            "Count of invalid policy inputs excluded from generated rules",
            metrics.validation_errors.clone(),
        );
        metrics
    }

    pub(crate) fn commit(&self, ok: bool) {
        let result = if ok {
            CommitResult::Ok
        } else {
            CommitResult::Error
        };
        self.commits.get_or_create(&CommitLabels { result }).inc();
    }

    pub(crate) fn backend_commit(&self, renderer: &str, result: Result<(), &crate::BackendError>) {
        let result = match result {
            Ok(()) => CommitResult::Ok,
            Err(crate::BackendError::Timeout(_)) => CommitResult::Timeout,
            Err(crate::BackendError::Failed(_)) => CommitResult::Error,
        };
        self.backend_commits
            .get_or_create(&BackendLabels {
                renderer: renderer.to_string(),
                result,
            })
            .inc();
    }

    pub(crate) fn generated(&self, direction: MatchType, rules: usize) {
        let direction = match direction {
            MatchType::Ingress => Direction::Ingress,
            MatchType::Egress => Direction::Egress,
        };
        self.generated_rules
            .get_or_create(&DirectionLabels { direction })
            .inc_by(rules as u64);
    }

    pub(crate) fn validation_error(&self) {
        self.validation_errors.inc();
    }
}
