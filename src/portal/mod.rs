//! Reverse Portal Protocol: TLS+Mux transport between an internal Portal
//! Server and external Portal Clients, with token auth, per-token CIDR
//! ACLs, and per-mapping accounting (spec §4.5, §4.6).

mod auth;
mod client;
mod header;
mod server;

pub use auth::{Authenticator, TokenConfig};
pub use client::PortalClient;
pub use header::StreamHeader;
pub use server::{MappingState, PortalServer};
