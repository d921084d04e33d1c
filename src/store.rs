use crate::activity::ActivityLog;
use crate::model::{Endpoint, LogEntry, LogOutcome, NewEndpoint, Stats};
use crate::probe::CheckResult;
use crate::registry::{CheckTarget, Registry, RegistryError};
use chrono::Local;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};

/// Change notifications, serialized to JSON for the event stream.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StoreEvent {
    Endpoint { endpoint: Endpoint },
    Removed { id: String },
    Log { entry: LogEntry },
}

#[derive(Debug, Default)]
struct State {
    registry: Registry,
    log: ActivityLog,
}

/// Owns the registry and the activity log. Every mutation goes through here
/// under one lock, so a check's status, history and log line land together.
/// Events are published while the lock is held, so subscribers see them in
/// the same order as the state changed.
#[derive(Clone)]
pub struct MonitorStore {
    state: Arc<RwLock<State>>,
    events: broadcast::Sender<String>,
    operator_log: bool,
}

impl Default for MonitorStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MonitorStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(100);
        Self {
            state: Arc::new(RwLock::new(State::default())),
            events,
            operator_log: false,
        }
    }

    /// Also write `info` entries for add/remove/pause/resume. Off by default:
    /// the activity log normally holds check results only.
    pub fn with_operator_log(mut self, enabled: bool) -> Self {
        self.operator_log = enabled;
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.events.subscribe()
    }

    pub async fn add(&self, input: NewEndpoint) -> Result<Endpoint, RegistryError> {
        let mut state = self.state.write().await;
        let endpoint = state.registry.add(input)?.clone();
        tracing::info!("Monitor added: {} ({})", endpoint.name, endpoint.url);
        self.publish(StoreEvent::Endpoint { endpoint: endpoint.clone() });
        self.note(
            &mut state,
            &endpoint.name,
            format!("monitor add {}", endpoint.url),
            format!("Registered {} {} every {}s", endpoint.method, endpoint.url, endpoint.interval),
        );
        Ok(endpoint)
    }

    pub async fn remove(&self, id: &str) -> Result<Endpoint, RegistryError> {
        let mut state = self.state.write().await;
        let endpoint = state
            .registry
            .remove(id)
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;
        tracing::info!("Monitor removed: {} ({})", endpoint.name, endpoint.url);
        self.publish(StoreEvent::Removed { id: endpoint.id.clone() });
        self.note(
            &mut state,
            &endpoint.name,
            format!("monitor rm {}", endpoint.url),
            "Monitoring stopped".to_string(),
        );
        Ok(endpoint)
    }

    pub async fn pause(&self, id: &str) -> Result<Endpoint, RegistryError> {
        let mut state = self.state.write().await;
        let endpoint = state.registry.pause(id)?.clone();
        tracing::info!("Monitor paused: {}", endpoint.name);
        self.publish(StoreEvent::Endpoint { endpoint: endpoint.clone() });
        self.note(
            &mut state,
            &endpoint.name,
            format!("monitor pause {}", endpoint.url),
            "Checks paused".to_string(),
        );
        Ok(endpoint)
    }

    pub async fn resume(&self, id: &str) -> Result<Endpoint, RegistryError> {
        let mut state = self.state.write().await;
        let endpoint = state.registry.resume(id)?.clone();
        tracing::info!("Monitor resumed: {}", endpoint.name);
        self.publish(StoreEvent::Endpoint { endpoint: endpoint.clone() });
        self.note(
            &mut state,
            &endpoint.name,
            format!("monitor resume {}", endpoint.url),
            "Checks resumed".to_string(),
        );
        Ok(endpoint)
    }

    fn note(&self, state: &mut State, monitor_name: &str, command: String, output: String) {
        if !self.operator_log {
            return;
        }
        let entry = state
            .log
            .record(monitor_name, command, output, LogOutcome::Info, Local::now());
        self.publish(StoreEvent::Log { entry });
    }

    /// Records a finished check: status, latency, history sample and one log
    /// line, all in one write. Results for removed or paused endpoints are
    /// dropped without touching anything.
    pub async fn apply_check(
        &self,
        target: &CheckTarget,
        result: &CheckResult,
    ) -> Option<Endpoint> {
        let mut state = self.state.write().await;
        let now = Local::now();
        let endpoint = state.registry.apply_result(&target.id, result, now)?.clone();
        let outcome = if result.is_up() { LogOutcome::Success } else { LogOutcome::Error };
        let entry = state.log.record(
            &endpoint.name,
            target.method.render_command(&target.url),
            result.detail.clone(),
            outcome,
            now,
        );
        tracing::debug!(
            "{} -> {} ({}ms, {} samples)",
            endpoint.name,
            endpoint.status,
            endpoint.latency,
            endpoint.history.len()
        );
        self.publish(StoreEvent::Endpoint { endpoint: endpoint.clone() });
        self.publish(StoreEvent::Log { entry });
        Some(endpoint)
    }

    pub async fn get(&self, id: &str) -> Option<Endpoint> {
        self.state.read().await.registry.get(id).cloned()
    }

    pub async fn check_target(&self, id: &str) -> Result<CheckTarget, RegistryError> {
        self.state.read().await.registry.check_target(id)
    }

    pub async fn schedulable(&self) -> Vec<CheckTarget> {
        self.state.read().await.registry.schedulable()
    }

    pub async fn unknown_ids(&self) -> Vec<String> {
        self.state.read().await.registry.unknown_ids()
    }

    pub async fn logs(&self) -> Vec<LogEntry> {
        self.state.read().await.log.snapshot()
    }

    pub async fn stats(&self) -> Stats {
        self.state.read().await.registry.stats()
    }

    /// Endpoints, stats and log read under one lock.
    pub async fn overview(&self) -> (Vec<Endpoint>, Stats, Vec<LogEntry>) {
        let state = self.state.read().await;
        (state.registry.snapshot(), state.registry.stats(), state.log.snapshot())
    }

    fn publish(&self, event: StoreEvent) {
        match serde_json::to_string(&event) {
            // no subscribers is fine
            Ok(json) => {
                let _ = self.events.send(json);
            }
            Err(e) => tracing::error!("Failed to serialize store event: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{HttpMethod, Status, HISTORY_CAPACITY, LOG_CAPACITY};
    use crate::probe::ProbeError;

    fn up(latency: u64) -> CheckResult {
        CheckResult {
            status: Status::Up,
            latency,
            detail: format!("HTTP/1.1 200 OK (opaque response) - Time: {}ms", latency),
            failure: None,
        }
    }

    fn timeout() -> CheckResult {
        CheckResult {
            status: Status::Down,
            latency: 0,
            detail: "curl: (28) Operation timed out after 5000 ms connecting to x".into(),
            failure: Some(ProbeError::Timeout { timeout_ms: 5000 }),
        }
    }

    #[tokio::test]
    async fn check_writes_endpoint_and_log_together() {
        let store = MonitorStore::new();
        let e = store.add(NewEndpoint::new("A", "example.com")).await.unwrap();
        let target = store.check_target(&e.id).await.unwrap();

        let updated = store.apply_check(&target, &up(42)).await.unwrap();
        assert_eq!(updated.status, Status::Up);

        let (endpoints, stats, logs) = store.overview().await;
        assert_eq!(endpoints[0].latency, 42);
        assert_eq!(stats.up, 1);
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].command, "curl -X GET https://example.com");
        assert_eq!(logs[0].status, LogOutcome::Success);
    }

    #[tokio::test]
    async fn failed_check_logs_error() {
        let store = MonitorStore::new();
        let e = store
            .add(NewEndpoint {
                method: Some(HttpMethod::Head),
                ..NewEndpoint::new("A", "a.example")
            })
            .await
            .unwrap();
        let target = store.check_target(&e.id).await.unwrap();
        store.apply_check(&target, &timeout()).await.unwrap();

        let last = store.logs().await.pop().unwrap();
        assert_eq!(last.status, LogOutcome::Error);
        assert_eq!(last.command, "curl -I https://a.example");
        assert!(last.output.contains("timed out"));
    }

    #[tokio::test]
    async fn result_for_removed_endpoint_is_dropped() {
        let store = MonitorStore::new();
        let e = store.add(NewEndpoint::new("A", "a.example")).await.unwrap();
        let target = store.check_target(&e.id).await.unwrap();
        store.remove(&e.id).await.unwrap();
        let log_len = store.logs().await.len();

        assert!(store.apply_check(&target, &up(5)).await.is_none());
        assert!(store.get(&e.id).await.is_none());
        assert_eq!(store.logs().await.len(), log_len);
    }

    #[tokio::test]
    async fn log_entry_keeps_name_after_delete() {
        let store = MonitorStore::new();
        let e = store.add(NewEndpoint::new("Old Name", "a.example")).await.unwrap();
        let target = store.check_target(&e.id).await.unwrap();
        store.apply_check(&target, &up(3)).await;
        store.remove(&e.id).await.unwrap();
        assert!(store.logs().await.iter().all(|l| l.monitor_name == "Old Name"));
    }

    #[tokio::test]
    async fn bounds_hold_under_many_checks() {
        let store = MonitorStore::new();
        let a = store.add(NewEndpoint::new("A", "a.example")).await.unwrap();
        let b = store.add(NewEndpoint::new("B", "b.example")).await.unwrap();
        let ta = store.check_target(&a.id).await.unwrap();
        let tb = store.check_target(&b.id).await.unwrap();
        for i in 0..80 {
            store.apply_check(&ta, &up(i + 1)).await;
            store.apply_check(&tb, &timeout()).await;
        }
        assert_eq!(store.logs().await.len(), LOG_CAPACITY);
        for e in store.overview().await.0 {
            assert_eq!(e.history.len(), HISTORY_CAPACITY);
        }
    }

    #[tokio::test]
    async fn publishes_events() {
        let store = MonitorStore::new();
        let mut rx = store.subscribe();
        let e = store.add(NewEndpoint::new("A", "a.example")).await.unwrap();

        let first: serde_json::Value = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(first["type"], "endpoint");
        assert_eq!(first["endpoint"]["id"], e.id.as_str());
        assert_eq!(first["endpoint"]["status"], "UNKNOWN");

        let target = store.check_target(&e.id).await.unwrap();
        store.apply_check(&target, &up(9)).await;
        let second: serde_json::Value = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(second["type"], "endpoint");
        assert_eq!(second["endpoint"]["latency"], 9);
        let third: serde_json::Value = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(third["type"], "log");
        assert_eq!(third["entry"]["status"], "success");
    }

    #[tokio::test]
    async fn operator_actions_stay_out_of_the_log_by_default() {
        let store = MonitorStore::new();
        let e = store.add(NewEndpoint::new("A", "a.example")).await.unwrap();
        store.pause(&e.id).await.unwrap();
        store.resume(&e.id).await.unwrap();
        store.remove(&e.id).await.unwrap();
        assert!(store.logs().await.is_empty());
    }

    #[tokio::test]
    async fn operator_log_can_be_enabled() {
        let store = MonitorStore::new().with_operator_log(true);
        let mut rx = store.subscribe();
        let e = store.add(NewEndpoint::new("A", "a.example")).await.unwrap();
        store.remove(&e.id).await.unwrap();

        let logs = store.logs().await;
        let commands: Vec<_> = logs.iter().map(|l| l.command.as_str()).collect();
        assert_eq!(commands, vec!["monitor add https://a.example", "monitor rm https://a.example"]);
        assert!(logs.iter().all(|l| l.status == LogOutcome::Info));

        let kinds: Vec<String> = std::iter::from_fn(|| rx.try_recv().ok())
            .map(|json| {
                let v: serde_json::Value = serde_json::from_str(&json).unwrap();
                v["type"].as_str().unwrap().to_string()
            })
            .collect();
        assert_eq!(kinds, vec!["endpoint", "log", "removed", "log"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn events_arrive_in_lock_order_across_threads() {
        for _ in 0..100 {
            let store = MonitorStore::new();
            let e = store.add(NewEndpoint::new("A", "a.example")).await.unwrap();
            let target = store.check_target(&e.id).await.unwrap();
            let mut rx = store.subscribe();

            let handles: Vec<_> = (1..=16)
                .map(|i| {
                    let store = store.clone();
                    let target = target.clone();
                    tokio::spawn(async move { store.apply_check(&target, &up(i)).await })
                })
                .collect();
            for h in handles {
                h.await.unwrap();
            }

            let mut last_latency = None;
            let mut log_ids = Vec::new();
            while let Ok(json) = rx.try_recv() {
                let v: serde_json::Value = serde_json::from_str(&json).unwrap();
                match v["type"].as_str() {
                    Some("endpoint") => last_latency = v["endpoint"]["latency"].as_u64(),
                    Some("log") => log_ids.push(v["entry"]["id"].as_str().unwrap().to_string()),
                    _ => {}
                }
            }

            let (endpoints, _, logs) = store.overview().await;
            assert_eq!(last_latency, Some(endpoints[0].latency));
            let stored_ids: Vec<String> = logs.iter().map(|l| l.id.clone()).collect();
            assert_eq!(log_ids, stored_ids);
        }
    }

    #[tokio::test]
    async fn reads_are_idempotent() {
        let store = MonitorStore::new();
        let e = store.add(NewEndpoint::new("A", "a.example")).await.unwrap();
        let target = store.check_target(&e.id).await.unwrap();
        store.apply_check(&target, &up(7)).await;

        assert_eq!(store.overview().await.0, store.overview().await.0);
        assert_eq!(store.logs().await, store.logs().await);
        assert_eq!(store.stats().await, store.stats().await);
    }
}
