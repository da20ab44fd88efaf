//! SPDY/WebSocket-multiplexed TCP tunnel to a pod (§4.2).

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::api::Portforwarder;
use kube::{
    Api,
    Client,
};
use tokio::io::AsyncReadExt;
use tokio::net::TcpListener;
use tokio::sync::oneshot;

use crate::error::Error;
use crate::target::ResolvedTarget;

#[async_trait]
pub trait PortForwarder: Send + Sync {
    /// Blocks until the tunnel is torn down. Returns `Ok(())` both for a
    /// caller-requested stop and for a clean remote disconnect — the caller
    /// tells the two apart by checking whether its own cancellation fired
    /// (§4.4.2 SubA).
    async fn run(
        &self, transit_port: u16, target: &ResolvedTarget, ready: oneshot::Sender<()>,
        stop: oneshot::Receiver<()>,
    ) -> Result<(), Error>;
}

/// Forwards one pod's container port through a loopback listener, dialing a
/// fresh `portforward` subresource stream per accepted local connection.
pub struct KubePortForwarder {
    client: Client,
}

impl KubePortForwarder {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PortForwarder for KubePortForwarder {
    async fn run(
        &self, transit_port: u16, target: &ResolvedTarget, ready: oneshot::Sender<()>,
        mut stop: oneshot::Receiver<()>,
    ) -> Result<(), Error> {
        let listener = TcpListener::bind(("127.0.0.1", transit_port))
            .await
            .map_err(|e| Error::ForwarderBind(format!("could not bind 127.0.0.1:{transit_port}: {e}")))?;

        let pod_api: Api<Pod> = Api::namespaced(self.client.clone(), &target.namespace);
        let container_port = target.container_port as u16;

        // Probe the tunnel once up front so `ready` only fires after the
        // upgrade has actually succeeded, not merely after the local bind.
        let mut probe = open_tunnel(&pod_api, &target.pod_name, container_port).await?;
        let mut probe_stream = probe
            .take_stream(container_port)
            .ok_or_else(|| Error::ForwarderBind("apiserver did not return a stream".into()))?;

        let (lost_tx, mut lost_rx) = oneshot::channel::<()>();
        tokio::spawn(async move {
            let mut buf = [0u8; 1];
            let _ = probe_stream.read(&mut buf).await;
            let _ = lost_tx.send(());
        });

        let _ = ready.send(());
        tracing::info!(transit_port, pod = %target.pod_name, "forwarder ready");

        loop {
            tokio::select! {
                _ = &mut stop => {
                    tracing::debug!("forwarder stopping on caller request");
                    return Ok(());
                }
                _ = &mut lost_rx => {
                    tracing::debug!("forwarder tunnel closed by remote");
                    return Ok(());
                }
                accepted = listener.accept() => {
                    match accepted {
                        Ok((socket, _addr)) => {
                            let pod_api = pod_api.clone();
                            let pod_name = target.pod_name.clone();
                            tokio::spawn(async move {
                                if let Err(e) =
                                    forward_connection(pod_api, pod_name, container_port, socket).await
                                {
                                    tracing::warn!(error = %e, "connection to pod failed");
                                }
                            });
                        }
                        Err(e) => tracing::warn!(error = %e, "accept failed"),
                    }
                }
            }
        }
    }
}

async fn open_tunnel(
    pod_api: &Api<Pod>, pod_name: &str, container_port: u16,
) -> Result<Portforwarder, Error> {
    pod_api
        .portforward(pod_name, &[container_port])
        .await
        .map_err(|e| Error::ForwarderBind(format!("could not open a tunnel to {pod_name}: {e}")))
}

async fn forward_connection(
    pod_api: Api<Pod>, pod_name: String, container_port: u16, mut socket: tokio::net::TcpStream,
) -> Result<(), Error> {
    let mut tunnel = open_tunnel(&pod_api, &pod_name, container_port).await?;
    let mut upstream = tunnel
        .take_stream(container_port)
        .ok_or_else(|| Error::ForwarderBind("apiserver did not return a stream".into()))?;
    tokio::io::copy_bidirectional(&mut socket, &mut upstream)
        .await
        .map_err(Error::Io)?;
    Ok(())
}
