//! ServiceRegistry - the worker services a host schedules, in registration order.

use std::sync::Arc;

use crate::ports::WorkerService;

/// Registered services, keyed by their unique name.
///
/// Registration order is the order the scheduler rotates in.
#[derive(Default)]
pub struct ServiceRegistry {
    services: Vec<Arc<dyn WorkerService>>,
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Service '{0}' is already registered")]
    AlreadyRegistered(String),
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, service: Arc<dyn WorkerService>) -> Result<(), RegistryError> {
        if self.get(service.name()).is_some() {
            return Err(RegistryError::AlreadyRegistered(service.name().to_string()));
        }
        self.services.push(service);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn WorkerService>> {
        self.services.iter().find(|s| s.name() == name).cloned()
    }

    pub fn registered_names(&self) -> Vec<String> {
        self.services.iter().map(|s| s.name().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    pub(crate) fn into_services(self) -> Vec<Arc<dyn WorkerService>> {
        self.services
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::domain::{ServiceError, ServiceFeedback};
    use async_trait::async_trait;

    /// Service that always reports the same feedback.
    pub(crate) struct Constant(pub &'static str, pub ServiceFeedback);

    #[async_trait]
    impl WorkerService for Constant {
        fn name(&self) -> &str {
            self.0
        }

        async fn run(&self) -> Result<ServiceFeedback, ServiceError> {
            Ok(self.1)
        }
    }

    #[test]
    fn test_register_and_get() {
        let mut registry = ServiceRegistry::new();
        registry
            .register(Arc::new(Constant("billing", ServiceFeedback::Skipped)))
            .unwrap();

        assert!(registry.get("billing").is_some());
        assert!(registry.get("reports").is_none());
    }

    #[test]
    fn test_double_registration() {
        let mut registry = ServiceRegistry::new();
        registry
            .register(Arc::new(Constant("billing", ServiceFeedback::Skipped)))
            .unwrap();
        let result = registry.register(Arc::new(Constant("billing", ServiceFeedback::DontCare)));
        assert!(matches!(result, Err(RegistryError::AlreadyRegistered(name)) if name == "billing"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_registration_order_is_kept() {
        let mut registry = ServiceRegistry::new();
        for name in ["c", "a", "b"] {
            registry
                .register(Arc::new(Constant(name, ServiceFeedback::Skipped)))
                .unwrap();
        }
        assert_eq!(registry.registered_names(), vec!["c", "a", "b"]);
    }
}
