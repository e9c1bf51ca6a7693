mod allocator;

pub use allocator::PortAllocator;

use std::net::{SocketAddr, TcpListener};
use std::time::Duration;

/// A port is free when it binds on both loopback and the wildcard address.
///
/// On macOS binding 127.0.0.1 can succeed while 0.0.0.0 is taken, so both
/// are checked.
pub fn is_port_available(port: u16) -> bool {
    TcpListener::bind(("127.0.0.1", port)).is_ok() && TcpListener::bind(("0.0.0.0", port)).is_ok()
}

/// True if something accepts TCP connections on `localhost:<port>`.
pub async fn is_port_listening(port: u16, timeout: Duration) -> bool {
    for addr in [
        SocketAddr::from(([127, 0, 0, 1], port)),
        SocketAddr::from((std::net::Ipv6Addr::LOCALHOST, port)),
    ] {
        if let Ok(Ok(_)) = tokio::time::timeout(timeout, tokio::net::TcpStream::connect(addr)).await
        {
            return true;
        }
    }
    false
}
