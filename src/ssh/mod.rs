//! SSH Chain: one authenticated hop per link, dialed through the previous
//! one, exposing a single tunneled vantage point at the tail (spec §4.1,
//! §4.2).

mod algos;
mod chain;
mod handler;
mod hop;
mod known_hosts;
mod port_forward;

pub use chain::Chain;
pub use hop::HopClient;
pub use known_hosts::{AcceptAllHostKeys, HostKeyVerifier, StaticHostKeyVerifier};
pub use port_forward::{ForwardRule, PortForwarder};
