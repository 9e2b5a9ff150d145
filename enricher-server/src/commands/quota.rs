//! Operator view of and manual control over stage intake.

use std::{collections::BTreeMap, fmt, sync::Arc};

use anyhow::Context;
use enricher_core::{
    queue::{QueueDepth, StageQueue},
    quota::{ControlOutcome, EnablementRegister, QueueBinding, QuotaCommand, QuotaController},
};
use enricher_model::StageName;

/// One line of `enricherd quota status`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageQuotaStatus {
    pub stage: StageName,
    pub binding: QueueBinding,
    pub depth: Option<QueueDepth>,
}

impl fmt::Display for StageQuotaStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:<6} {:<9} {:<10}",
            self.stage.as_str(),
            self.binding.state,
            self.binding.phase
        )?;
        match self.depth {
            Some(depth) => write!(
                f,
                " ready={} in_flight={} delayed={}",
                depth.ready, depth.in_flight, depth.delayed
            ),
            None => f.write_str(" depth=-"),
        }
    }
}

/// Binding and queue depth for `stage`, or for every stage.
pub async fn quota_status(
    register: &dyn EnablementRegister,
    queues: &BTreeMap<StageName, Arc<dyn StageQueue>>,
    stage: Option<StageName>,
) -> anyhow::Result<Vec<StageQuotaStatus>> {
    let stages: Vec<StageName> = match stage {
        Some(stage) => vec![stage],
        None => StageName::all().to_vec(),
    };
    let mut report = Vec::with_capacity(stages.len());
    for stage in stages {
        let binding = register
            .binding(stage)
            .await
            .with_context(|| format!("failed to read binding for {stage}"))?;
        let depth = match queues.get(&stage) {
            Some(queue) => Some(
                queue
                    .depth()
                    .await
                    .with_context(|| format!("failed to read depth of {stage}"))?,
            ),
            None => None,
        };
        report.push(StageQuotaStatus {
            stage,
            binding,
            depth,
        });
    }
    Ok(report)
}

/// Apply `command` synchronously through a controller bound to `register`.
pub async fn apply_quota_command(
    register: Arc<dyn EnablementRegister>,
    command: QuotaCommand,
) -> anyhow::Result<ControlOutcome> {
    QuotaController::new(register)
        .apply(command)
        .await
        .with_context(|| format!("quota command {command:?} failed"))
}
