//! Application layer: port traits and orchestration services.
//!
//! Services do I/O only through the port traits in [`ports`]; they never
//! talk to a concrete backend directly.

pub mod ports;
pub mod services;
