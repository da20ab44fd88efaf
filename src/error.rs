use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("could not load cluster configuration: {0}")]
    ConfigLoad(String),

    #[error("could not resolve target: {0}")]
    Resolve(String),

    #[error("could not allocate a local port: {0}")]
    PortAllocate(String),

    #[error("could not build the credential transport: {0}")]
    TransportBuild(String),

    #[error("could not bind the port forwarder: {0}")]
    ForwarderBind(String),

    #[error("lost connection to the pod")]
    ConnectionLost,

    #[error("could not bind the reverse proxy to any candidate address: {0}")]
    ProxyBind(String),

    #[error("reverse proxy shutdown did not complete cleanly: {0}")]
    ProxyShutdown(String),

    #[error("cancelled")]
    Cancelled,

    #[error("could not open the browser: {0}")]
    BrowserOpen(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// True for `Cancelled` and for any wrapping error whose chain bottoms out in it.
    pub fn is_cancelled(&self) -> bool {
        match self {
            Error::Cancelled => true,
            Error::Other(e) => e.chain().any(|c| c.to_string() == Error::Cancelled.to_string()),
            _ => false,
        }
    }

    /// True when the reconnect loop (§4.4.3) should retry rather than give up.
    pub fn is_connection_lost(&self) -> bool {
        matches!(self, Error::ConnectionLost)
    }
}
