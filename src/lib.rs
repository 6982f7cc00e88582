//! ScriptFrame generation backend
//!
//! This library provides the core of the scriptframe-gen service: an
//! orchestrator for long-running remote generation jobs (submit, poll,
//! normalize the result) and a registry of pluggable storage, speech and
//! image-generation providers selected through configuration.

pub mod app_state;
pub mod config;
pub mod models;
pub mod paths;
pub mod routes;
pub mod services;
