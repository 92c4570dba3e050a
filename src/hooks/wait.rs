//! Cancellation-aware paced sleeps (C3, Wait Manager half).

use crate::errors::RuntimeError;
use std::collections::HashMap;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// The fixed vocabulary of pacing points the orchestrator waits on.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum WaitKind {
    AfterNodeUpgrade,
    AfterPrimaryStepdown,
    BetweenShards,
    AfterFcvUpgrade,
    AfterBalancerStop,
    BeforePrimaryUpgrade,
    BetweenPhases,
    HealthCheckInterval,
}

pub struct WaitManager {
    durations: HashMap<WaitKind, Duration>,
}

impl WaitManager {
    pub fn new() -> Self {
        use WaitKind::*;
        let mut durations = HashMap::new();
        durations.insert(AfterNodeUpgrade, Duration::from_secs(2));
        durations.insert(AfterPrimaryStepdown, Duration::from_secs(5));
        durations.insert(BetweenShards, Duration::from_secs(2));
        durations.insert(AfterFcvUpgrade, Duration::from_secs(1));
        durations.insert(AfterBalancerStop, Duration::from_secs(1));
        durations.insert(BeforePrimaryUpgrade, Duration::from_secs(1));
        durations.insert(BetweenPhases, Duration::from_secs(1));
        durations.insert(HealthCheckInterval, Duration::from_secs(1));
        Self { durations }
    }

    pub fn set(&mut self, kind: WaitKind, duration: Duration) {
        self.durations.insert(kind, duration);
    }

    pub fn duration_for(&self, kind: WaitKind) -> Duration {
        self.durations.get(&kind).copied().unwrap_or_default()
    }

    /// Sleep for the configured duration for `kind`, or return immediately
    /// with a cancellation error if `token` fires first. A zero duration
    /// skips the wait entirely.
    pub async fn wait(&self, token: &CancellationToken, kind: WaitKind) -> Result<(), RuntimeError> {
        let duration = self.duration_for(kind);
        if duration.is_zero() {
            return Ok(());
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => Ok(()),
            _ = token.cancelled() => Err(RuntimeError::Other(anyhow::anyhow!("wait cancelled"))),
        }
    }
}

impl Default for WaitManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn zero_duration_skips_the_wait() {
        let mut manager = WaitManager::new();
        manager.set(WaitKind::AfterNodeUpgrade, Duration::ZERO);
        let token = CancellationToken::new();
        let start = std::time::Instant::now();
        manager.wait(&token, WaitKind::AfterNodeUpgrade).await.unwrap();
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[tokio::test]
    async fn cancellation_returns_immediately() {
        let mut manager = WaitManager::new();
        manager.set(WaitKind::BetweenPhases, Duration::from_secs(30));
        let token = CancellationToken::new();
        token.cancel();
        let result = manager.wait(&token, WaitKind::BetweenPhases).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn uncancelled_wait_completes_after_duration() {
        let mut manager = WaitManager::new();
        manager.set(WaitKind::HealthCheckInterval, Duration::from_millis(10));
        let token = CancellationToken::new();
        manager.wait(&token, WaitKind::HealthCheckInterval).await.unwrap();
    }
}
