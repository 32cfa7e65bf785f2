//! Shared domain types for the local message relay.
//!
//! This crate contains the types exchanged between the relay core, its
//! storage adapters, and callers: envelopes, endpoints, index records,
//! access rules, signals, dead letters, reliability configuration, and the
//! publish result shape.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror, base64.

pub mod access;
pub mod config;
pub mod dead_letter;
pub mod endpoint;
pub mod envelope;
pub mod error;
pub mod message;
pub mod publish;
pub mod signal;
