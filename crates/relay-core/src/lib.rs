//! Publish pipeline, reliability checks, and storage port definitions for
//! the local message relay.
//!
//! This crate defines the "ports" (storage traits) that the infrastructure
//! layer implements, plus every piece of logic that needs no I/O: subject
//! matching, access rules, budgets, rate limiting, circuit breakers,
//! backpressure, in-process subscriptions, and ephemeral signals. It depends
//! only on `relay-types` -- never on `relay-infra` or any database/IO crate.

pub mod access;
pub mod budget;
pub mod relay;
pub mod reliability;
pub mod repository;
pub mod signal;
pub mod subject;
pub mod subscription;

pub use relay::RelayCore;
