//! Health check registry
//!
//! Long-running components register a named probe; callers pull a
//! consolidated report instead of poking each component. Fatal-but-
//! survivable conditions (no audio device, no capture source) surface
//! here rather than as raised errors.

use std::sync::Arc;

use dashmap::DashMap;
use once_cell::sync::Lazy;

/// Outcome of a single health probe
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthStatus {
    Healthy,
    /// Degraded but operating; the message names the concern
    Warning(String),
    /// Not operating; the message names the failure
    Unhealthy(String),
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        matches!(self, Self::Healthy)
    }
}

type Probe = Arc<dyn Fn() -> HealthStatus + Send + Sync>;

/// Named registry of health probes
pub struct HealthCheckRegistry {
    probes: DashMap<String, Probe>,
}

/// One named result inside a [`HealthReport`]
#[derive(Debug, Clone)]
pub struct HealthEntry {
    pub name: String,
    pub status: HealthStatus,
}

/// Consolidated probe results
#[derive(Debug, Clone)]
pub struct HealthReport {
    pub entries: Vec<HealthEntry>,
}

impl HealthReport {
    /// True when every probe reported healthy
    pub fn all_healthy(&self) -> bool {
        self.entries.iter().all(|e| e.status.is_healthy())
    }

    /// Names of probes reporting unhealthy
    pub fn unhealthy(&self) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|e| matches!(e.status, HealthStatus::Unhealthy(_)))
            .map(|e| e.name.as_str())
            .collect()
    }
}

impl HealthCheckRegistry {
    pub fn new() -> Self {
        Self {
            probes: DashMap::new(),
        }
    }

    /// Register (or replace) the probe for `name`
    pub fn register(
        &self,
        name: impl Into<String>,
        probe: impl Fn() -> HealthStatus + Send + Sync + 'static,
    ) {
        self.probes.insert(name.into(), Arc::new(probe));
    }

    pub fn unregister(&self, name: &str) {
        self.probes.remove(name);
    }

    /// Run a single probe by name
    pub fn run(&self, name: &str) -> Option<HealthStatus> {
        self.probes.get(name).map(|p| p())
    }

    /// Run every registered probe, sorted by name for stable output
    pub fn run_all(&self) -> HealthReport {
        let mut entries: Vec<HealthEntry> = self
            .probes
            .iter()
            .map(|entry| HealthEntry {
                name: entry.key().clone(),
                status: entry.value()(),
            })
            .collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        HealthReport { entries }
    }
}

impl Default for HealthCheckRegistry {
    fn default() -> Self {
        Self::new()
    }
}

static REGISTRY: Lazy<HealthCheckRegistry> = Lazy::new(HealthCheckRegistry::new);

/// Process-wide health registry
pub fn health_registry() -> &'static HealthCheckRegistry {
    &REGISTRY
}
