//! MikroTik RouterOS API client.
//!
//! Speaks the binary API on TCP 8728 and exposes the layer-7 protocol and
//! firewall filter menus as a [`sitewall_reconcile::ControlPlaneClient`].

pub mod client;
pub mod connection;
pub mod protocol;

pub use client::RouterOsClient;
pub use connection::{Connection, Response, TcpConnection};
pub use protocol::ProtocolError;
