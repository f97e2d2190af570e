//! API Module
//!
//! REST surface of the USL service.

pub mod rest;
pub mod server;

pub use rest::*;
pub use server::*;
