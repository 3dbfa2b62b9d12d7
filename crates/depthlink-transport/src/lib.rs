//! TCP transport for depthlink streams.
//!
//! This is the lowest layer of depthlink. It knows about endpoint candidates,
//! outbound connects with a timeout, inbound bind/accept, and the
//! [`TcpConnection`] stream type everything else reads from and writes to.

pub mod endpoint;
pub mod error;
pub mod stream;
pub mod tcp;

pub use endpoint::{default_candidates, Endpoint, DEFAULT_HOSTS, DEFAULT_PORT};
pub use error::{Result, TransportError};
pub use stream::{KeepaliveConfig, TcpConnection};
pub use tcp::TcpTransport;
