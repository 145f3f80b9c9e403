//! DNS-over-HTTPS forwarding transport: accepts raw DNS wire-format queries over
//! a framed TCP stream, forwards them to a configured DoH resolver, enforces an
//! optional on-device blocklist policy, tracks working resolver addresses, and
//! returns well-formed DNS responses (real or synthesized) to the caller.

#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod acceptor;
pub mod auth;
pub mod blocklist;
pub mod dialer;
pub mod error;
pub mod hangover;
pub mod https_client;
pub mod ip_map;
pub mod listener;
pub mod transport;

pub use auth::ClientAuthProvider;
pub use blocklist::BlocklistOracle;
pub use dialer::SplitRetryDial;
pub use error::Status;
pub use ip_map::Resolver;
pub use listener::{Listener, Summary, Token};
pub use transport::{Transport, TransportError};
