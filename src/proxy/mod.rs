//! WebSocket-to-TCP tunneling.
//!
//! This module provides the proxy core:
//! - [`TunnelClient`] - binds a local TCP listener and bridges each accepted
//!   connection to a remote WebSocket endpoint
//! - `ws_stream` - adapts a WebSocket connection to the duplex byte-stream
//!   contract of a TCP socket
//! - `bridge` - splices two duplex streams until either side closes
//! - [`Gateway`] - the server-side listener for a session identifier

mod bridge;
mod gateway;
mod tunnel;
mod ws_stream;

pub use bridge::BridgeSummary;
pub use gateway::Gateway;
pub use tunnel::{HeaderProvider, ListenAddr, TunnelClient, TunnelEvent, TunnelHandle};
