//! HostBuilder - wiring a runtime host together
//!
//! Duplicate service names are refused on registration. Everything else is
//! checked by `build`: expected services must be registered and the loop
//! intervals must be non-zero.

use std::sync::Arc;

use super::config::RuntimeConfig;
use super::registry::{RegistryError, ServiceRegistry};
use super::runtime::RuntimeHost;
use super::scheduler::Scheduler;
use crate::impls::{DirectExecutor, MonitoredExecutor};
use crate::ports::{
    DiagnosticsSink, Finalizer, RestartTrigger, ServiceExecutor, ServiceMonitor, WorkerService,
};

/// Builds a [`RuntimeHost`].
///
/// ```ignore
/// let host = HostBuilder::new()
///     .with_config(RuntimeConfig::from_env()?)
///     .register_service(Arc::new(worker))?
///     .expect_services(&["orders"])
///     .add_finalizer(queues.clone())
///     .build()?;
/// let exit = host.run().await;
/// ```
pub struct HostBuilder {
    registry: ServiceRegistry,
    expected_services: Option<Vec<String>>,
    config: RuntimeConfig,
    monitor: Option<Arc<dyn ServiceMonitor>>,
    diagnostics: Vec<Arc<dyn DiagnosticsSink>>,
    finalizers: Vec<Arc<dyn Finalizer>>,
    triggers: Vec<Arc<dyn RestartTrigger>>,
}

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("Missing services: {0:?}. These services were expected but not registered.")]
    MissingServices(Vec<String>),

    #[error("No services registered")]
    NoServices,

    #[error("Invalid configuration: {0} must not be zero")]
    ZeroInterval(&'static str),
}

impl HostBuilder {
    pub fn new() -> Self {
        Self {
            registry: ServiceRegistry::new(),
            expected_services: None,
            config: RuntimeConfig::default(),
            monitor: None,
            diagnostics: Vec::new(),
            finalizers: Vec::new(),
            triggers: Vec::new(),
        }
    }

    /// Services are scheduled in registration order.
    pub fn register_service(mut self, service: Arc<dyn WorkerService>) -> Result<Self, RegistryError> {
        self.registry.register(service)?;
        Ok(self)
    }

    pub fn expect_services(mut self, names: &[&str]) -> Self {
        self.expected_services = Some(names.iter().map(|name| name.to_string()).collect());
        self
    }

    pub fn with_config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_monitor(mut self, monitor: Arc<dyn ServiceMonitor>) -> Self {
        self.monitor = Some(monitor);
        self
    }

    pub fn with_diagnostics(mut self, sink: Arc<dyn DiagnosticsSink>) -> Self {
        self.diagnostics.push(sink);
        self
    }

    pub fn add_finalizer(mut self, finalizer: Arc<dyn Finalizer>) -> Self {
        self.finalizers.push(finalizer);
        self
    }

    pub fn add_restart_trigger(mut self, trigger: Arc<dyn RestartTrigger>) -> Self {
        self.triggers.push(trigger);
        self
    }

    pub fn build(self) -> Result<RuntimeHost, BuildError> {
        if self.registry.is_empty() {
            return Err(BuildError::NoServices);
        }
        if self.config.idle_wait.is_zero() {
            return Err(BuildError::ZeroInterval("idle_wait"));
        }
        if self.config.restart_poll_interval.is_zero() {
            return Err(BuildError::ZeroInterval("restart_poll_interval"));
        }
        if let Some(expected) = &self.expected_services {
            let registered = self.registry.registered_names();
            let missing: Vec<String> = expected
                .iter()
                .filter(|name| !registered.contains(name))
                .cloned()
                .collect();
            if !missing.is_empty() {
                return Err(BuildError::MissingServices(missing));
            }
        }

        let executor: Arc<dyn ServiceExecutor> = match self.monitor {
            Some(monitor) => Arc::new(MonitoredExecutor::new(monitor)),
            None => Arc::new(DirectExecutor),
        };
        let scheduler = Scheduler::new(
            self.registry.into_services(),
            executor,
            self.config.scheduler_settings(),
        );
        Ok(RuntimeHost::new(
            scheduler,
            self.config.restart_poll_interval,
            self.diagnostics,
            self.finalizers,
            self.triggers,
        ))
    }
}

impl Default for HostBuilder {
    fn default() -> Self {
        Self::new()
    }
}
