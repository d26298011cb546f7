pub mod host;
pub mod traits;

pub use host::HostLink;
pub use traits::{Credentials, NetworkLink};
