//! Domain layer - Core records and port definitions
//!
//! This module defines the agent's records and the traits (ports) that
//! back-end adapters implement, following hexagonal architecture principles.

pub mod model;
pub mod ports;

pub use model::*;
pub use ports::*;
