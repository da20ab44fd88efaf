//! Loopback TCP port allocation (§10.5).

use async_trait::async_trait;
use tokio::net::TcpListener;

use crate::error::Error;

#[async_trait]
pub trait PortAllocator: Send + Sync {
    async fn allocate_local_port(&self) -> Result<u16, Error>;
}

pub struct LoopbackPortAllocator;

#[async_trait]
impl PortAllocator for LoopbackPortAllocator {
    /// Binds `127.0.0.1:0`, reads back the assigned port, then drops the
    /// listener. Another process could grab the port before the caller binds
    /// it again; that race is accepted (§9 open questions) and surfaced as a
    /// downstream bind failure if it happens.
    async fn allocate_local_port(&self) -> Result<u16, Error> {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|e| Error::PortAllocate(e.to_string()))?;
        let port = listener
            .local_addr()
            .map_err(|e| Error::PortAllocate(e.to_string()))?
            .port();
        Ok(port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn allocates_a_usable_port() {
        let allocator = LoopbackPortAllocator;
        let port = allocator.allocate_local_port().await.unwrap();
        assert!(port > 0);
        // The port should be free again immediately after allocation.
        let bound = TcpListener::bind(("127.0.0.1", port)).await;
        assert!(bound.is_ok());
    }
}
