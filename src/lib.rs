//! Secrets Manager Library
//!
//! Core of the secrets-manager controller: the `SecretDefinition` resource,
//! the Vault backend, the state synchronizer and the queue-based controller
//! driving it. The `secrets-manager` binary wires these together.

pub mod backend;
pub mod codec;
pub mod config;
pub mod constants;
pub mod controller;
pub mod crd;
pub mod kubernetes;
pub mod observability;
pub mod secrets_manager;
pub mod server;
