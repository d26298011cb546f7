//! Broker session: the authenticated publish channel above the network link

mod mqtt;
pub mod traits;

pub use mqtt::{MqttSession, MqttSettings};
pub use traits::{SessionClient, SessionParams};
