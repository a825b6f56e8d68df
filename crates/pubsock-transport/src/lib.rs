//! Socket transport primitives for pubsock.
//!
//! This is the lowest layer of the workspace:
//! - URI to host/port resolution ([`Resolver`], [`UriResolver`])
//! - TCP listener/connector lifecycle ([`tcp`])
//! - epoll readiness notification with a wake descriptor ([`Poller`], [`Waker`])
//!
//! Everything above (framing, peer pools, endpoints) builds on the plain
//! `std::net` types returned from here.

#[cfg(not(target_os = "linux"))]
compile_error!("pubsock-transport relies on epoll and currently supports Linux only");

pub mod error;
pub mod poll;
pub mod resolve;
pub mod tcp;

pub use error::{Result, TransportError};
pub use poll::{Events, Poller, Token, Waker};
pub use resolve::{Resolver, UriResolver, WILDCARD_HOST};
pub use tcp::{BindOptions, DEFAULT_BACKLOG};
