//! Socket transport endpoints for pub/sub topics.
//!
//! A topic endpoint either binds and serves many peers or connects to one.
//! Bound endpoints run a background accept loop and either fan messages out
//! round-robin over a peer pool (point-to-point) or hand readable peers to a
//! callback (broker).
//!
//! # Crate Structure
//!
//! - [`transport`]: URI resolution, TCP bind/connect, epoll readiness
//! - [`frame`]: length-prefixed and line framing, capped at 128 KiB
//! - [`endpoint`]: the topic endpoint, peer pool and offset control

/// Re-export transport types.
pub mod transport {
    pub use pubsock_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use pubsock_frame::*;
}

/// Re-export endpoint types.
pub mod endpoint {
    pub use pubsock_endpoint::*;
}

pub use pubsock_endpoint::{Endpoint, EndpointConfig, EndpointError, Mode, Role};
