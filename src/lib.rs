//! Job lifecycle and settlement engine for a freight-forwarding back office.

pub mod config;
pub mod error;
pub mod telemetry;
pub mod workflows;
