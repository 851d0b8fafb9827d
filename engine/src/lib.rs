//! nlsql Engine Library
//!
//! This library provides the core of the nlsql assistant: sessions,
//! intention analysis, context enrichment and planning.
//! It is used by both the main binary and integration tests.

/// Configuration management module
pub mod config;

/// Database persistence module
pub mod db;

/// Session store and per-session turn locks
pub mod session;

/// Classifier, retriever and knowledge-graph abstraction layer
pub mod capability;

/// Conductor orchestration module
pub mod conductor;

/// Message bus for turn and session events
pub mod message_bus;

/// Telemetry and Observability
pub mod telemetry;

/// CLI interface module
pub mod cli;

/// Command handlers module
pub mod handlers;
