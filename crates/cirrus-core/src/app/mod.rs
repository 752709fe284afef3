//! App - the runtime host layer
//!
//! # Components
//! - **HostBuilder**: wiring and start-up validation
//! - **ServiceRegistry**: the services a host schedules
//! - **Scheduler**: adaptive round-robin over the services
//! - **RuntimeHost**: scheduler lifetime, restart triggers, cleanup
//! - **RuntimeConfig**: environment configuration

pub mod builder;
pub mod config;
pub mod registry;
pub mod runtime;
pub mod scheduler;

pub use self::builder::{BuildError, HostBuilder};
pub use self::config::{ConfigError, RuntimeConfig};
pub use self::registry::{RegistryError, ServiceRegistry};
pub use self::runtime::RuntimeHost;
pub use self::scheduler::{Scheduler, SchedulerError, SchedulerHandle, SchedulerSettings};
