//! Infrastructure: backend collaborator stand-in and telemetry bootstrap.

pub mod memory;
pub mod telemetry;
