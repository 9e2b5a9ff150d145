use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use enricher_model::StageName;
use tokio::sync::Mutex;

use super::{EnablementState, QueueBinding, QuotaPhase};
use crate::error::Result;

/// External enablement register.
///
/// Stages without an entry are `Enabled`/`Flowing`. Only the controller
/// flips the enablement flag; workers may move the phase through
/// [`try_begin_drain`](Self::try_begin_drain) and
/// [`mark_escalated`](Self::mark_escalated).
#[async_trait]
pub trait EnablementRegister: Send + Sync {
    async fn binding(&self, stage: StageName) -> Result<QueueBinding>;

    /// Compare-and-set `Enabled`/`Flowing` to `Enabled`/`Draining`.
    ///
    /// Returns `true` for exactly one caller per drain cycle.
    async fn try_begin_drain(&self, stage: StageName) -> Result<bool>;

    async fn set_binding(
        &self,
        stage: StageName,
        state: EnablementState,
        phase: QuotaPhase,
    ) -> Result<QueueBinding>;

    /// Record that disabling intake failed. Leaves the flag untouched.
    async fn mark_escalated(&self, stage: StageName) -> Result<QueueBinding>;

    async fn is_enabled(&self, stage: StageName) -> Result<bool> {
        Ok(self.binding(stage).await?.is_enabled())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryEnablementRegister {
    bindings: Mutex<HashMap<StageName, QueueBinding>>,
}

impl InMemoryEnablementRegister {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EnablementRegister for InMemoryEnablementRegister {
    async fn binding(&self, stage: StageName) -> Result<QueueBinding> {
        Ok(self
            .bindings
            .lock()
            .await
            .get(&stage)
            .copied()
            .unwrap_or_default())
    }

    async fn try_begin_drain(&self, stage: StageName) -> Result<bool> {
        let mut bindings = self.bindings.lock().await;
        let binding = bindings.entry(stage).or_default();
        if binding.state != EnablementState::Enabled
            || binding.phase != QuotaPhase::Flowing
        {
            return Ok(false);
        }
        binding.phase = QuotaPhase::Draining;
        binding.updated_at = Utc::now();
        Ok(true)
    }

    async fn set_binding(
        &self,
        stage: StageName,
        state: EnablementState,
        phase: QuotaPhase,
    ) -> Result<QueueBinding> {
        let binding = QueueBinding {
            state,
            phase,
            updated_at: Utc::now(),
        };
        self.bindings.lock().await.insert(stage, binding);
        Ok(binding)
    }

    async fn mark_escalated(&self, stage: StageName) -> Result<QueueBinding> {
        let mut bindings = self.bindings.lock().await;
        let binding = bindings.entry(stage).or_default();
        binding.phase = QuotaPhase::Escalated;
        binding.updated_at = Utc::now();
        Ok(*binding)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[tokio::test]
    async fn unknown_stage_is_flowing() {
        let register = InMemoryEnablementRegister::new();
        let binding = register.binding(StageName::Reputation).await.unwrap();
        assert_eq!(binding.state, EnablementState::Enabled);
        assert_eq!(binding.phase, QuotaPhase::Flowing);
    }

    #[tokio::test]
    async fn only_one_drain_wins() {
        let register = Arc::new(InMemoryEnablementRegister::new());
        let attempts: Vec<_> = (0..8)
            .map(|_| {
                let register = register.clone();
                tokio::spawn(async move {
                    register.try_begin_drain(StageName::Reputation).await
                })
            })
            .collect();

        let mut winners = 0;
        for attempt in attempts {
            if attempt.await.unwrap().unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
        let binding = register.binding(StageName::Reputation).await.unwrap();
        assert_eq!(binding.phase, QuotaPhase::Draining);
        assert!(binding.is_enabled());
    }

    #[tokio::test]
    async fn drain_is_refused_while_disabled() {
        let register = InMemoryEnablementRegister::new();
        register
            .set_binding(
                StageName::Reputation,
                EnablementState::Disabled,
                QuotaPhase::Paused,
            )
            .await
            .unwrap();
        assert!(!register.try_begin_drain(StageName::Reputation).await.unwrap());
    }
}
