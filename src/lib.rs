//! `kauthproxy`: a developer-facing authentication proxy that bridges a
//! Kubernetes port-forward tunnel with credential injection, so a local
//! browser can reach an in-cluster HTTP(S) endpoint whose auth is bound to a
//! credential plugin (OIDC, cloud-vendor exec plugins).

pub mod backoff;
pub mod browser;
pub mod cli;
pub mod error;
pub mod forwarder;
pub mod gate;
pub mod port_alloc;
pub mod proxy;
pub mod resolver;
pub mod supervisor;
pub mod target;
pub mod transport;

pub use error::Error;
pub use supervisor::Supervisor;
pub use target::TargetSpec;
