//! Request identity helpers.

use std::net::SocketAddr;

/// Store key for the connecting client.
///
/// IPv6 addresses contain colons, which collide with the `:`-delimited
/// record key schema, so they are replaced with underscores.
pub fn client_key(addr: &SocketAddr) -> String {
    addr.ip().to_string().replace(':', "_")
}
