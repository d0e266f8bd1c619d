use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, TcpListener};

use thiserror::Error;

#[derive(Debug, Error)]
#[error("failed to bind an ephemeral port on {host}: {source}")]
pub struct AllocationError {
    pub host: IpAddr,
    #[source]
    pub source: io::Error,
}

/// Hands out OS-assigned loopback ports.
///
/// The port is released before it is returned, so another process may claim
/// it before the engine binds. Treat the result as a hint.
#[derive(Debug, Clone, Copy)]
pub struct PortAllocator {
    host: IpAddr,
}

impl Default for PortAllocator {
    fn default() -> Self {
        Self::new(IpAddr::V4(Ipv4Addr::LOCALHOST))
    }
}

impl PortAllocator {
    #[must_use]
    pub fn new(host: IpAddr) -> Self {
        Self { host }
    }

    pub fn host(&self) -> IpAddr {
        self.host
    }

    pub fn allocate(&self) -> Result<u16, AllocationError> {
        let error = |source| AllocationError {
            host: self.host,
            source,
        };
        let listener = TcpListener::bind(SocketAddr::new(self.host, 0)).map_err(error)?;
        let port = listener.local_addr().map_err(error)?.port();
        drop(listener);

        tracing::debug!(host = %self.host, port, "allocated engine port");
        Ok(port)
    }
}

#[cfg(test)]
mod tests {
    use std::net::{IpAddr, Ipv4Addr, TcpListener};

    use super::PortAllocator;

    #[test]
    fn allocated_port_is_nonzero_and_bindable() {
        let port = PortAllocator::default()
            .allocate()
            .expect("loopback port should allocate");
        assert_ne!(port, 0);

        let listener = TcpListener::bind(("127.0.0.1", port));
        assert!(listener.is_ok(), "released port should be bindable again");
    }

    #[test]
    fn unbindable_host_reports_allocation_error() {
        // TEST-NET-1 is never assigned to a local interface.
        let allocator = PortAllocator::new(IpAddr::V4(Ipv4Addr::new(192, 0, 2, 1)));
        let error = allocator.allocate().expect_err("bind should fail");
        assert_eq!(error.host, allocator.host());
    }
}
