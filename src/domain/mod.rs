// Market structures shared across the pipeline
pub mod market;

// The evolving knowledge base
pub mod playbook;

// Daily plan artifact
pub mod plan;

// Execution record artifact
pub mod trade_log;

// Weekly reflection artifact
pub mod reflection;

// Port interfaces
pub mod ports;

// Domain-specific error types
pub mod errors;
