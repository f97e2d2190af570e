//! USL service, its REST surface and its collaborator adapters

pub mod api;
pub mod backends;
pub mod service;

pub use service::{RegistrationToken, UslDependencies, UslService};
