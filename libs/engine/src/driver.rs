//! Deployment driver interface, registry, and test drivers.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use thiserror::Error;
use tracing::info;

use verge_eventlog::EventLog;
use verge_lang::{Cluster, ParamValue};

use crate::error::EngineError;

/// Error from a driver call. Wrapped with the action kind and component
/// key by the executor.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct DriverError(String);

impl DriverError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// A pluggable deployment back-end for one component code kind.
///
/// Drivers are best-effort idempotent: a duplicate `create` for an
/// artifact that already exists must not fail. Calls are the only
/// operations in a revision permitted to block for long; the executor
/// bounds them with a per-action deadline and a cancellation signal.
/// Implementations must be safe to call concurrently per cluster.
#[async_trait]
pub trait DeployDriver: Send + Sync {
    async fn create(
        &self,
        cluster: &Cluster,
        component_key: &str,
        params: &ParamValue,
        log: &EventLog,
    ) -> Result<(), DriverError>;

    async fn update(
        &self,
        cluster: &Cluster,
        component_key: &str,
        params: &ParamValue,
        log: &EventLog,
    ) -> Result<(), DriverError>;

    async fn destroy(
        &self,
        cluster: &Cluster,
        component_key: &str,
        params: &ParamValue,
        log: &EventLog,
    ) -> Result<(), DriverError>;
}

/// Looks up deployment drivers by component code kind.
#[derive(Default)]
pub struct DriverRegistry {
    drivers: BTreeMap<String, Arc<dyn DeployDriver>>,
}

impl DriverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, kind: impl Into<String>, driver: Arc<dyn DeployDriver>) {
        self.drivers.insert(kind.into(), driver);
    }

    pub fn get(&self, kind: &str) -> Result<Arc<dyn DeployDriver>, EngineError> {
        self.drivers
            .get(kind)
            .cloned()
            .ok_or_else(|| EngineError::DriverNotRegistered {
                kind: kind.to_string(),
            })
    }
}

/// Driver that only logs. Used for dry runs.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopDriver;

#[async_trait]
impl DeployDriver for NoopDriver {
    async fn create(
        &self,
        cluster: &Cluster,
        component_key: &str,
        _params: &ParamValue,
        log: &EventLog,
    ) -> Result<(), DriverError> {
        info!(cluster = cluster.name(), component_key, "[NOOP] create");
        log.scope()
            .field("cluster", cluster.name())
            .field("componentKey", component_key)
            .info("noop create");
        Ok(())
    }

    async fn update(
        &self,
        cluster: &Cluster,
        component_key: &str,
        _params: &ParamValue,
        log: &EventLog,
    ) -> Result<(), DriverError> {
        info!(cluster = cluster.name(), component_key, "[NOOP] update");
        log.scope()
            .field("cluster", cluster.name())
            .field("componentKey", component_key)
            .info("noop update");
        Ok(())
    }

    async fn destroy(
        &self,
        cluster: &Cluster,
        component_key: &str,
        _params: &ParamValue,
        log: &EventLog,
    ) -> Result<(), DriverError> {
        info!(cluster = cluster.name(), component_key, "[NOOP] destroy");
        log.scope()
            .field("cluster", cluster.name())
            .field("componentKey", component_key)
            .info("noop destroy");
        Ok(())
    }
}

/// One recorded mock driver call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverCall {
    pub op: &'static str,
    pub cluster: String,
    pub component_key: String,
}

/// Recording driver for tests, with optional failure injection.
#[derive(Debug, Default)]
pub struct MockDriver {
    calls: Mutex<Vec<DriverCall>>,
    fail_on: Option<String>,
}

impl MockDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every call whose component key contains `fragment`.
    pub fn failing_on(fragment: impl Into<String>) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            fail_on: Some(fragment.into()),
        }
    }

    pub fn calls(&self) -> Vec<DriverCall> {
        self.guard().clone()
    }

    fn guard(&self) -> MutexGuard<'_, Vec<DriverCall>> {
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn invoke(
        &self,
        op: &'static str,
        cluster: &Cluster,
        component_key: &str,
    ) -> Result<(), DriverError> {
        self.guard().push(DriverCall {
            op,
            cluster: cluster.name().to_string(),
            component_key: component_key.to_string(),
        });
        if let Some(fragment) = &self.fail_on {
            if component_key.contains(fragment.as_str()) {
                return Err(DriverError::new(format!(
                    "injected {op} failure for '{component_key}'"
                )));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl DeployDriver for MockDriver {
    async fn create(
        &self,
        cluster: &Cluster,
        component_key: &str,
        _params: &ParamValue,
        _log: &EventLog,
    ) -> Result<(), DriverError> {
        self.invoke("create", cluster, component_key)
    }

    async fn update(
        &self,
        cluster: &Cluster,
        component_key: &str,
        _params: &ParamValue,
        _log: &EventLog,
    ) -> Result<(), DriverError> {
        self.invoke("update", cluster, component_key)
    }

    async fn destroy(
        &self,
        cluster: &Cluster,
        component_key: &str,
        _params: &ParamValue,
        _log: &EventLog,
    ) -> Result<(), DriverError> {
        self.invoke("destroy", cluster, component_key)
    }
}
