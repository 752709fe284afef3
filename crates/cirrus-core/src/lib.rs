//! cirrus-core
//!
//! Core building blocks for the Cirrus cloud-worker runtime.
//!
//! # Modules
//! - **domain**: errors, queue frames, blob identity, persisted messages, lifecycle signals
//! - **ports**: abstractions over the platform (queue/blob transports, serializer, clock, ...)
//! - **retry**: retry policies for transient, slow-instantiation, corruption and contention failures
//! - **storage**: logical blob and queue storage providers
//! - **app**: scheduler, runtime host, builder, configuration
//! - **worker**: ready-made worker services
//! - **impls**: in-memory transports and other port implementations
//! - **observability**: tracing setup and execution statistics

pub mod app;
pub mod domain;
pub mod impls;
pub mod observability;
pub mod ports;
pub mod retry;
pub mod storage;
pub mod worker;
