use std::{fmt, sync::Arc};

use async_trait::async_trait;
use enricher_model::StageName;
use serde::{Deserialize, Serialize};
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::{
    EnablementRegister, EnablementState, QueueBinding, QuotaPhase,
    escalation_event,
};
use crate::{
    error::{EnricherError, Result},
    router::EventPublisher,
};

/// Instruction for the quota controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum QuotaCommand {
    Disable { stage: StageName },
    /// `force` also recovers a stage stuck in `Escalated`.
    Enable { stage: StageName, force: bool },
}

impl QuotaCommand {
    pub fn stage(&self) -> StageName {
        match self {
            QuotaCommand::Disable { stage }
            | QuotaCommand::Enable { stage, .. } => *stage,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlOutcome {
    Applied(QueueBinding),
    /// The binding was already in the requested state.
    Unchanged(QueueBinding),
    /// Scheduled enable refused because the stage is escalated.
    Skipped(QueueBinding),
}

impl ControlOutcome {
    pub fn binding(&self) -> QueueBinding {
        match self {
            ControlOutcome::Applied(binding)
            | ControlOutcome::Unchanged(binding)
            | ControlOutcome::Skipped(binding) => *binding,
        }
    }
}

/// Asynchronous entry point to the controller.
#[async_trait]
pub trait QuotaControl: Send + Sync {
    /// Fire-and-forget submission. An error means the command was not
    /// delivered; it says nothing about whether it will take effect.
    async fn submit(&self, command: QuotaCommand) -> Result<()>;
}

/// Applies quota commands to the enablement register. Every command is
/// idempotent, so redundant submissions from racing workers are harmless.
pub struct QuotaController {
    register: Arc<dyn EnablementRegister>,
    publisher: Option<Arc<dyn EventPublisher>>,
}

impl fmt::Debug for QuotaController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QuotaController")
            .field("escalates", &self.publisher.is_some())
            .finish()
    }
}

impl QuotaController {
    pub fn new(register: Arc<dyn EnablementRegister>) -> Self {
        Self {
            register,
            publisher: None,
        }
    }

    /// Publish an escalation when a queued disable cannot be applied.
    pub fn with_escalation(mut self, publisher: Arc<dyn EventPublisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    pub async fn apply(&self, command: QuotaCommand) -> Result<ControlOutcome> {
        let stage = command.stage();
        let current = self.register.binding(stage).await?;
        match command {
            QuotaCommand::Disable { .. } => {
                if current.state == EnablementState::Disabled
                    && current.phase != QuotaPhase::Draining
                {
                    return Ok(ControlOutcome::Unchanged(current));
                }
                // An escalated stage stays escalated until a forced enable.
                let phase = if current.phase == QuotaPhase::Escalated {
                    QuotaPhase::Escalated
                } else {
                    QuotaPhase::Paused
                };
                let binding = self
                    .register
                    .set_binding(stage, EnablementState::Disabled, phase)
                    .await?;
                info!(stage = %stage, phase = %binding.phase, "intake disabled");
                Ok(ControlOutcome::Applied(binding))
            }
            QuotaCommand::Enable { force, .. } => {
                if current.phase == QuotaPhase::Escalated && !force {
                    warn!(
                        stage = %stage,
                        "stage is escalated; enable requires manual recovery"
                    );
                    return Ok(ControlOutcome::Skipped(current));
                }
                if current.state == EnablementState::Enabled
                    && current.phase == QuotaPhase::Flowing
                {
                    return Ok(ControlOutcome::Unchanged(current));
                }
                let binding = self
                    .register
                    .set_binding(
                        stage,
                        EnablementState::Enabled,
                        QuotaPhase::Flowing,
                    )
                    .await?;
                info!(stage = %stage, forced = force, "intake enabled");
                Ok(ControlOutcome::Applied(binding))
            }
        }
    }

    async fn handle(&self, command: QuotaCommand) {
        let stage = command.stage();
        match self.apply(command).await {
            Ok(outcome) => {
                tracing::debug!(stage = %stage, ?outcome, "quota command applied");
            }
            Err(err) => {
                error!(stage = %stage, error = %err, ?command, "quota command failed");
                if matches!(command, QuotaCommand::Disable { .. }) {
                    self.escalate(stage).await;
                }
            }
        }
    }

    async fn escalate(&self, stage: StageName) {
        if let Err(err) = self.register.mark_escalated(stage).await {
            warn!(stage = %stage, error = %err, "could not record escalation");
        }
        if let Some(publisher) = &self.publisher
            && let Err(err) = publisher.publish(&escalation_event(stage)).await
        {
            error!(stage = %stage, error = %err, "escalation publish failed");
        }
    }

    /// Run the controller as a single actor task. Commands are applied one
    /// at a time in arrival order.
    pub fn spawn(
        self,
        capacity: usize,
        shutdown: CancellationToken,
    ) -> (QuotaHandle, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<QuotaCommand>(capacity.max(1));
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        info!("quota controller shutting down");
                        break;
                    }
                    command = rx.recv() => {
                        let Some(command) = command else { break };
                        self.handle(command).await;
                    }
                }
            }
        });
        (QuotaHandle { tx }, handle)
    }
}

/// Cloneable sender side of a spawned [`QuotaController`].
#[derive(Clone, Debug)]
pub struct QuotaHandle {
    tx: mpsc::Sender<QuotaCommand>,
}

#[async_trait]
impl QuotaControl for QuotaHandle {
    async fn submit(&self, command: QuotaCommand) -> Result<()> {
        self.tx.send(command).await.map_err(|err| {
            EnricherError::ChannelClosed(format!(
                "quota controller unavailable: {err}"
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quota::InMemoryEnablementRegister;

    const VT: StageName = StageName::Reputation;

    fn controller() -> (Arc<InMemoryEnablementRegister>, QuotaController) {
        let register = Arc::new(InMemoryEnablementRegister::new());
        (register.clone(), QuotaController::new(register))
    }

    #[tokio::test]
    async fn disable_is_idempotent() {
        let (register, controller) = controller();
        let first = controller
            .apply(QuotaCommand::Disable { stage: VT })
            .await
            .unwrap();
        let second = controller
            .apply(QuotaCommand::Disable { stage: VT })
            .await
            .unwrap();
        assert!(matches!(first, ControlOutcome::Applied(_)));
        assert!(matches!(second, ControlOutcome::Unchanged(_)));
        let binding = register.binding(VT).await.unwrap();
        assert_eq!(binding.state, EnablementState::Disabled);
        assert_eq!(binding.phase, QuotaPhase::Paused);
    }

    #[tokio::test]
    async fn scheduled_enable_skips_escalated_stage() {
        let (register, controller) = controller();
        register.mark_escalated(VT).await.unwrap();

        let outcome = controller
            .apply(QuotaCommand::Enable {
                stage: VT,
                force: false,
            })
            .await
            .unwrap();
        assert!(matches!(outcome, ControlOutcome::Skipped(_)));

        let outcome = controller
            .apply(QuotaCommand::Enable {
                stage: VT,
                force: true,
            })
            .await
            .unwrap();
        assert!(matches!(outcome, ControlOutcome::Applied(_)));
        assert_eq!(
            register.binding(VT).await.unwrap().phase,
            QuotaPhase::Flowing
        );
    }

    #[tokio::test]
    async fn spawned_actor_applies_submitted_commands() {
        let (register, controller) = controller();
        let shutdown = CancellationToken::new();
        let (handle, task) = controller.spawn(4, shutdown.clone());

        handle
            .submit(QuotaCommand::Disable { stage: VT })
            .await
            .unwrap();
        for _ in 0..50 {
            if !register.binding(VT).await.unwrap().is_enabled() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(!register.binding(VT).await.unwrap().is_enabled());

        shutdown.cancel();
        task.await.unwrap();
        let closed = handle.submit(QuotaCommand::Disable { stage: VT }).await;
        assert!(matches!(closed, Err(EnricherError::ChannelClosed(_))));
    }
}
