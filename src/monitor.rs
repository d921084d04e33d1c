use crate::config::ProbeConfig;
use crate::model::{Endpoint, NewEndpoint};
use crate::probe::{ProbeError, Prober};
use crate::registry::{CheckTarget, RegistryError};
use crate::store::MonitorStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, Instant, MissedTickBehavior};

/// Drives probes. Holds a live handle on the store, so adding or removing
/// endpoints never restarts the periodic timer.
#[derive(Clone)]
pub struct Scheduler {
    store: MonitorStore,
    prober: Arc<Prober>,
    period: Duration,
    initial_delay: Duration,
}

impl Scheduler {
    pub fn new(store: MonitorStore, prober: Arc<Prober>, timing: &ProbeConfig) -> Self {
        Self {
            store,
            prober,
            period: timing.period(),
            initial_delay: timing.initial_delay(),
        }
    }

    pub fn store(&self) -> &MonitorStore {
        &self.store
    }

    /// Registers an endpoint and queues its first check after the settle delay.
    pub async fn add_endpoint(&self, input: NewEndpoint) -> Result<Endpoint, RegistryError> {
        let endpoint = self.store.add(input).await?;
        self.schedule_first_check(endpoint.id.clone());
        Ok(endpoint)
    }

    pub async fn remove_endpoint(&self, id: &str) -> Result<Endpoint, RegistryError> {
        // in-flight checks find nothing to update and drop their result
        self.store.remove(id).await
    }

    pub async fn pause_endpoint(&self, id: &str) -> Result<Endpoint, RegistryError> {
        self.store.pause(id).await
    }

    /// Back to UNKNOWN, which earns a fresh first check.
    pub async fn resume_endpoint(&self, id: &str) -> Result<Endpoint, RegistryError> {
        let endpoint = self.store.resume(id).await?;
        self.schedule_first_check(endpoint.id.clone());
        Ok(endpoint)
    }

    /// Manual "check now". Refused for unknown or paused endpoints.
    pub async fn check_now(&self, id: &str) -> Result<JoinHandle<Option<Endpoint>>, RegistryError> {
        let target = self.store.check_target(id).await?;
        Ok(self.spawn_check(target))
    }

    /// One round: every non-paused endpoint gets its own task. Nothing here
    /// waits for a previous round.
    pub async fn tick(&self) -> Vec<JoinHandle<Option<Endpoint>>> {
        let targets = self.store.schedulable().await;
        tracing::debug!("Tick: checking {} monitors", targets.len());
        targets.into_iter().map(|t| self.spawn_check(t)).collect()
    }

    pub fn schedule_first_check(&self, id: String) -> JoinHandle<Option<Endpoint>> {
        let this = self.clone();
        tokio::spawn(async move {
            sleep(this.initial_delay).await;
            match this.store.check_target(&id).await {
                Ok(target) => this.check(target).await,
                Err(e) => {
                    tracing::debug!("Skipping first check: {}", e);
                    None
                }
            }
        })
    }

    fn spawn_check(&self, target: CheckTarget) -> JoinHandle<Option<Endpoint>> {
        let this = self.clone();
        tokio::spawn(async move { this.check(target).await })
    }

    /// Probe, then apply. A result whose endpoint vanished or got paused in
    /// the meantime is dropped.
    ///
    /// Overlapping checks of one endpoint are not serialized: whichever
    /// completes last wins, even if it was issued first.
    async fn check(&self, target: CheckTarget) -> Option<Endpoint> {
        let result = self.prober.check(&target.url, target.method).await;
        if let Some(ProbeError::Timeout { timeout_ms }) = &result.failure {
            tracing::warn!("{} ({}) timed out after {}ms", target.name, target.url, timeout_ms);
        }
        let applied = self.store.apply_check(&target, &result).await;
        if applied.is_none() {
            tracing::warn!(
                "Discarding result for {} ({}): monitor removed or paused",
                target.name,
                target.url
            );
        }
        applied
    }

    /// Runs until `shutdown` fires or its sender goes away.
    pub async fn run(self, mut shutdown: watch::Receiver<()>) {
        tracing::info!(
            "Starting monitoring engine (period {:?}, timeout {:?})",
            self.period,
            self.prober.timeout()
        );

        for id in self.store.unknown_ids().await {
            if let Ok(target) = self.store.check_target(&id).await {
                self.spawn_check(target);
            }
        }

        let mut timer = interval_at(Instant::now() + self.period, self.period);
        // a slow round must not queue up a burst of ticks behind it
        timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = timer.tick() => {
                    self.tick().await;
                }
                _ = shutdown.changed() => {
                    tracing::info!("Monitoring engine stopped");
                    break;
                }
            }
        }
    }
}
