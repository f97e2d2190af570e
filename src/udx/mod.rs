//! UDX federation: resource provisioning and device registration

pub mod provisioning;
pub mod registration;

pub use provisioning::{ProvisionUdxRequest, UdxProvisioner, UdxResources};
pub use registration::{HandshakeState, RegistrationHandshake};
