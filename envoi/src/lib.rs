//! Configuration and maintenance for the envoi bulk dispatcher
//!
//! The engine lives in `envoi-dispatch` and its durable state in
//! `envoi-store`. This crate wires them together from a RON configuration
//! file and provides the `envoictl` maintenance tool.

pub mod controller;
pub mod maintenance;

pub use controller::{CONFIG_ENV, Envoi, find_config_file};
pub use maintenance::{DEFAULT_RETENTION_DAYS, prune_sessions};
