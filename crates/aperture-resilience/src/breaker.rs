use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use serde::Serialize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub const fn as_str(self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

#[derive(Clone, Debug)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    pub success_threshold: u32,
    pub half_open_timeout: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            half_open_timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug)]
struct BreakerEntry {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    last_failure_at: Option<Instant>,
    state_changed_at: Instant,
}

impl BreakerEntry {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            last_failure_at: None,
            state_changed_at: Instant::now(),
        }
    }

    fn transition(&mut self, next: CircuitState) {
        self.state = next;
        self.failure_count = 0;
        self.success_count = 0;
        self.state_changed_at = Instant::now();
    }
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakerSnapshot {
    pub service: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    pub seconds_since_change: u64,
}

/// Per-service circuit breakers. Every mutation is serialized under the
/// service's own mutex; distinct services never contend.
pub struct BreakerTable {
    entries: RwLock<HashMap<String, Arc<Mutex<BreakerEntry>>>>,
    config: BreakerConfig,
}

impl BreakerTable {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            config,
        }
    }

    fn entry(&self, service: &str) -> Arc<Mutex<BreakerEntry>> {
        if let Some(entry) = self.entries.read().get(service) {
            return entry.clone();
        }
        self.entries
            .write()
            .entry(service.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(BreakerEntry::new())))
            .clone()
    }

    /// Whether a call to `service` may go out right now. An Open breaker
    /// whose timeout has elapsed moves to HalfOpen and admits the probe.
    pub fn admit(&self, service: &str) -> bool {
        let entry = self.entry(service);
        let mut guard = entry.lock();
        match guard.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                if guard.state_changed_at.elapsed() >= self.config.half_open_timeout {
                    guard.transition(CircuitState::HalfOpen);
                    tracing::info!(target: "aperture::resilience", service, "breaker half-open");
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn on_success(&self, service: &str) {
        let entry = self.entry(service);
        let mut guard = entry.lock();
        match guard.state {
            CircuitState::Closed => {
                guard.failure_count = 0;
            }
            CircuitState::HalfOpen => {
                guard.success_count += 1;
                if guard.success_count >= self.config.success_threshold {
                    guard.transition(CircuitState::Closed);
                    tracing::info!(target: "aperture::resilience", service, "breaker closed");
                }
            }
            CircuitState::Open => {}
        }
    }

    pub fn on_failure(&self, service: &str) {
        let entry = self.entry(service);
        let mut guard = entry.lock();
        guard.last_failure_at = Some(Instant::now());
        match guard.state {
            CircuitState::Closed => {
                guard.failure_count += 1;
                if guard.failure_count >= self.config.failure_threshold {
                    guard.transition(CircuitState::Open);
                    tracing::warn!(target: "aperture::resilience", service, "breaker opened");
                }
            }
            CircuitState::HalfOpen => {
                guard.transition(CircuitState::Open);
                tracing::warn!(target: "aperture::resilience", service, "breaker re-opened");
            }
            CircuitState::Open => {
                guard.failure_count += 1;
            }
        }
    }

    /// Unknown services report Closed without allocating an entry.
    pub fn state(&self, service: &str) -> CircuitState {
        match self.entries.read().get(service) {
            Some(entry) => entry.lock().state,
            None => CircuitState::Closed,
        }
    }

    pub fn reset(&self, service: &str) {
        let entry = self.entry(service);
        let mut guard = entry.lock();
        guard.transition(CircuitState::Closed);
        guard.last_failure_at = None;
    }

    pub fn snapshot(&self) -> Vec<BreakerSnapshot> {
        let entries = self.entries.read();
        let mut out: Vec<BreakerSnapshot> = entries
            .iter()
            .map(|(service, entry)| {
                let guard = entry.lock();
                BreakerSnapshot {
                    service: service.clone(),
                    state: guard.state,
                    failure_count: guard.failure_count,
                    success_count: guard.success_count,
                    seconds_since_change: guard.state_changed_at.elapsed().as_secs(),
                }
            })
            .collect();
        out.sort_by(|a, b| a.service.cmp(&b.service));
        out
    }
}
