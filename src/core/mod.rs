// src/core/mod.rs

/// Error types for configuration loading and scan preconditions.
pub mod error;

/// Data structures shared by the orchestrator, the rule engine and the HTTP layer,
/// such as `CheckSpec`, `Snapshot` and `Finding`.
pub mod models;

/// Compiles the rule table and grades snapshots into findings.
pub mod rules;

/// The concurrent scan orchestrator and the network probe it drives.
pub mod scanner;

/// Ties target resolution, scanning and rule evaluation into one call.
pub mod service;

/// Works out which host to scan.
pub mod target;
