//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Shared primitives and utilities for the notification layer."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Shared primitives for the R-EMS notification crates.
//! This crate exposes configuration loading and tracing initialisation
//! consumed by the envelope layer and the processes embedding it.

pub mod config;
pub mod logging;

pub use config::{LeftoverPolicy, LoadedNotifyConfig, LoggingConfig, NotifyConfig};
pub use logging::{init_tracing, LogFormat};
