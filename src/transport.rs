//! Component A: authenticated HTTP request/response against a peer, with retry/backoff
//! (spec.md §4.A).

pub mod client;
pub mod connection;

pub use client::Transport;
pub use connection::{Connection, DiskConnection, NetworkConnection};

/// The wire endpoints named in spec.md §6, relative to a peer's base URL.
pub mod api_urls {
    pub const NONCE: &str = "nonces";
    pub const CERTIFICATE: &str = "certificates";
    pub const SYNCSESSION: &str = "syncsessions";
    pub const TRANSFERSESSION: &str = "transfersessions";
    pub const BUFFER: &str = "buffers";
}
