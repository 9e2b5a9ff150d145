use std::{fmt, sync::Arc};

use enricher_model::StageName;
use tracing::{error, info, warn};

use super::{
    EnablementRegister, QuotaCommand, QuotaControl, QuotaPhase,
    escalation_event,
};
use crate::{config::QuotaSettings, router::EventPublisher};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackpressureOutcome {
    /// Send the in-flight message (and the rest of the batch) back with the
    /// requeue delay. `initiated_drain` is set for the one worker that
    /// asked the controller to disable intake.
    Requeue { initiated_drain: bool },
    /// Disabling intake failed and a human has been alerted. Nothing is
    /// written or requeued; messages return after their visibility timeout.
    Escalated,
}

/// Worker-side half of the quota protocol.
pub struct BackpressureProtocol {
    register: Arc<dyn EnablementRegister>,
    control: Arc<dyn QuotaControl>,
    publisher: Arc<dyn EventPublisher>,
    settings: QuotaSettings,
}

impl fmt::Debug for BackpressureProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackpressureProtocol")
            .field("settings", &self.settings)
            .finish()
    }
}

impl BackpressureProtocol {
    pub fn new(
        register: Arc<dyn EnablementRegister>,
        control: Arc<dyn QuotaControl>,
        publisher: Arc<dyn EventPublisher>,
        settings: QuotaSettings,
    ) -> Self {
        Self {
            register,
            control,
            publisher,
            settings,
        }
    }

    pub fn settings(&self) -> &QuotaSettings {
        &self.settings
    }

    /// React to a quota rejection from `stage`'s provider.
    pub async fn on_rate_limited(
        &self,
        stage: StageName,
    ) -> BackpressureOutcome {
        let binding = match self.register.binding(stage).await {
            Ok(binding) => binding,
            Err(err) => {
                error!(stage = %stage, error = %err, "enablement register unreachable");
                return self.escalate(stage).await;
            }
        };
        match (binding.is_enabled(), binding.phase) {
            (true, QuotaPhase::Flowing) => {}
            (true, QuotaPhase::Draining) => {
                return self.reassert_disable(stage).await;
            }
            _ => {
                info!(
                    stage = %stage,
                    state = %binding.state,
                    phase = %binding.phase,
                    "intake already stopping; requeueing"
                );
                return BackpressureOutcome::Requeue {
                    initiated_drain: false,
                };
            }
        }

        match self.register.try_begin_drain(stage).await {
            Ok(true) => {}
            Ok(false) => {
                info!(stage = %stage, "lost drain race");
                return self.reassert_disable(stage).await;
            }
            Err(err) => {
                error!(stage = %stage, error = %err, "drain transition failed");
                return self.escalate(stage).await;
            }
        }

        if let Err(err) =
            self.control.submit(QuotaCommand::Disable { stage }).await
        {
            error!(stage = %stage, error = %err, "failed to disable intake");
            return self.escalate(stage).await;
        }

        info!(
            stage = %stage,
            wait_secs = self.settings.drain_wait_secs,
            "disable requested; waiting for intake to stop"
        );
        tokio::time::sleep(self.settings.drain_wait()).await;
        BackpressureOutcome::Requeue {
            initiated_drain: true,
        }
    }

    /// Intake is still enabled while another worker owns the drain. That
    /// worker may have died before its disable landed, so ask again; the
    /// controller treats a repeated disable as a no-op.
    async fn reassert_disable(&self, stage: StageName) -> BackpressureOutcome {
        if let Err(err) =
            self.control.submit(QuotaCommand::Disable { stage }).await
        {
            error!(stage = %stage, error = %err, "failed to disable intake");
            return self.escalate(stage).await;
        }
        info!(stage = %stage, "intake draining; disable reasserted, requeueing");
        BackpressureOutcome::Requeue {
            initiated_drain: false,
        }
    }

    async fn escalate(&self, stage: StageName) -> BackpressureOutcome {
        if let Err(err) = self.register.mark_escalated(stage).await {
            warn!(stage = %stage, error = %err, "could not record escalation");
        }
        match self.publisher.publish(&escalation_event(stage)).await {
            Ok(report) if report.delivered > 0 => {
                warn!(stage = %stage, "quota escalation sent");
            }
            Ok(_) => {
                error!(stage = %stage, "quota escalation matched no channel");
            }
            Err(err) => {
                error!(stage = %stage, error = %err, "quota escalation failed");
            }
        }
        BackpressureOutcome::Escalated
    }
}
