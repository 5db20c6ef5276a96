use crate::{
    core::{PodId, Policy, PolicyRenderer},
    engine::{
        memory::MemoryRenderer, CommitSummary, Config, ConfiguratorMetrics, PolicyConfigurator,
        TxnError,
    },
    state::{self, DesiredState},
};
use anyhow::{bail, Result};
use clap::Parser;
use prometheus_client::registry::Registry;
use std::{path::PathBuf, sync::Arc, time::Duration};
use tracing::{error, info, warn};

#[derive(Debug, Parser)]
#[clap(
    name = "policy-configurator",
    about = "Renders pods' network policies into filtering rules"
)]
pub struct Args {
    #[clap(
        long,
        default_value = "policy_configurator=info,warn",
        env = "POLICY_CONFIGURATOR_LOG"
    )]
    log_level: kubert::LogFilter,

    #[clap(long, default_value = "plain")]
    log_format: kubert::LogFormat,

    /// A JSON file describing renderers, pods, policies and policy assignments.
    #[clap(long)]
    state: PathBuf,

    /// Bounds the time each renderer may take to commit.
    #[clap(long, default_value = "10000")]
    commit_timeout_ms: u64,

    /// Prints the configurator's metrics after committing.
    #[clap(long)]
    print_metrics: bool,
}

impl Args {
    #[inline]
    pub async fn parse_and_run() -> Result<()> {
        Self::parse().run().await
    }

    pub async fn run(self) -> Result<()> {
        let Self {
            log_level,
            log_format,
            state,
            commit_timeout_ms,
            print_metrics,
        } = self;

        log_format.try_init(log_level)?;

        let state = DesiredState::load(&state)?;
        let assignments = state.assignments()?;

        let mut prom = <Registry>::default();
        let metrics =
            ConfiguratorMetrics::register(prom.sub_registry_with_prefix("policy_configurator"));
        let configurator = PolicyConfigurator::new(
            Arc::new(state.pod_table()),
            Config {
                commit_timeout: Duration::from_millis(commit_timeout_ms),
            },
            metrics,
        );

        let renderers = register_renderers(&configurator, &state.renderers)?;

        // The desired state is complete, so it is applied as a resync.
        let result = resync(&configurator, assignments).await;

        match &result {
            Ok(summary) => {
                for invalid in &summary.invalid {
                    warn!(pod = %invalid.pod, error = %invalid.error, "Invalid policy input");
                }
                info!(renderers = summary.applied.len(), "Applied policies");
            }
            Err(TxnError::Backend(errors)) => {
                for pod in errors.failed_pods() {
                    error!(%pod, "Failed to apply policies");
                }
            }
            Err(error) => error!(%error, "Failed to commit"),
        }

        for renderer in &renderers {
            for (pod, rules) in renderer.pods() {
                println!("{} {} ingress {}", renderer.name(), pod, rules.ingress);
                println!("{} {} egress {}", renderer.name(), pod, rules.egress);
            }
        }

        if print_metrics {
            let mut buf = String::new();
            prometheus_client::encoding::text::encode(&mut buf, &prom)?;
            print!("{}", buf);
        }

        result?;
        Ok(())
    }
}

/// Registers an in-memory renderer for each configured renderer.
///
/// Exactly one renderer must be configured without a label, to serve pods not matched by any
/// other renderer.
fn register_renderers(
    configurator: &PolicyConfigurator,
    configured: &[state::Renderer],
) -> Result<Vec<Arc<MemoryRenderer>>> {
    let mut renderers = Vec::with_capacity(configured.len());
    for renderer in configured {
        let memory = Arc::new(MemoryRenderer::new(&renderer.name));
        match renderer.label.clone() {
            Some(label) => configurator.register_renderer(label.into(), memory.clone())?,
            None => configurator.register_default_renderer(memory.clone())?,
        }
        renderers.push(memory);
    }
    if renderers.is_empty() {
        bail!("no renderers configured");
    }
    if configured.iter().all(|r| r.label.is_some()) {
        bail!("no default renderer configured");
    }
    Ok(renderers)
}

async fn resync(
    configurator: &PolicyConfigurator,
    assignments: Vec<(PodId, Vec<Policy>)>,
) -> Result<CommitSummary, TxnError> {
    let mut txn = configurator.new_txn(true);
    for (pod, policies) in assignments {
        txn.configure(pod, policies)?;
    }
    txn.commit().await
}
