// The four ACE roles
pub mod curator;
pub mod executor;
pub mod generator;
pub mod reflector;

// Deterministic price replay
pub mod simulator;

// Defensive JSON extraction for model output
pub mod robust_json;

// Notification rendering
pub mod summaries;

// Top-level workflows
pub mod daily_cycle;
pub mod weekly_cycle;
