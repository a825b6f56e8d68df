//! Topic endpoints for pubsock.
//!
//! An [`Endpoint`] is one side of a topic connection. A bind-role endpoint
//! listens, and once [`Endpoint::run`] is called a background thread accepts
//! peers:
//! - point-to-point mode pools them, and [`Endpoint::write`] /
//!   [`Endpoint::read_msg`] visit the pool round-robin, evicting peers that
//!   fail
//! - broker mode watches them for readiness and hands each readable peer to
//!   a [`ReadinessHandler`]
//!
//! A connect-role endpoint owns a single outbound connection used to send
//! frames and offset control messages.
//!
//! ```no_run
//! use pubsock_endpoint::{Endpoint, WriteOutcome};
//!
//! let mut endpoint = Endpoint::builder("orders", "tcp://*:7100").bind()?;
//! endpoint.run()?;
//! match endpoint.write(b"hello")? {
//!     WriteOutcome::Delivered { peer, bytes } => println!("{bytes} bytes to {peer}"),
//!     WriteOutcome::NoConsumers => println!("nobody listening"),
//! }
//! endpoint.shutdown()?;
//! # Ok::<(), pubsock_endpoint::EndpointError>(())
//! ```

mod acceptor;
pub mod config;
pub mod control;
mod endpoint;
pub mod error;
pub mod peer;
pub mod pool;

pub use acceptor::{Disposition, ReadinessHandler};
pub use config::{EndpointConfig, Mode, Role};
pub use control::{decode_offset, encode_offset, OFFSET_MESSAGE_SIZE};
pub use endpoint::{
    Endpoint, EndpointBuilder, LoopState, Message, ReadOutcome, WriteOutcome,
};
pub use error::{EndpointError, Result};
pub use peer::{Peer, PeerId};
pub use pool::{PeerPool, Removal};
