//! External integrations: scan engine client, persistence, resilience

pub mod credit;
pub mod handoff;
pub mod resilience;
pub mod scan_engine;
