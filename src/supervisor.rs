//! The proxy supervisor (§4.4) — composes resolver, forwarder and reverse
//! proxy into one externally observed "proxy is up" lifecycle, with
//! exponential-backoff reconnection and an at-most-once browser open.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::backoff::Backoff;
use crate::browser::BrowserOpener;
use crate::error::Error;
use crate::forwarder::PortForwarder;
use crate::gate::OpenBrowserGate;
use crate::port_alloc::PortAllocator;
use crate::proxy::ReverseProxy;
use crate::resolver::Resolver;
use crate::target::{
    HostTarget,
    ResolvedTarget,
    TargetSpec,
};
use crate::transport::Upstream;

/// Builds the credential-bearing transport handed to the reverse proxy.
/// Injected rather than constructed inline so tests can substitute a fake
/// that never touches the network (§9 dependency wiring).
#[async_trait]
pub trait TransportFactory: Send + Sync {
    async fn new_transport(&self) -> Result<Upstream, Error>;
}

pub struct Supervisor {
    resolver: Arc<dyn Resolver>,
    forwarder: Arc<dyn PortForwarder>,
    reverse_proxy: Arc<dyn ReverseProxy>,
    port_allocator: Arc<dyn PortAllocator>,
    browser: Arc<dyn BrowserOpener>,
    transport_factory: Arc<dyn TransportFactory>,
}

/// How one iteration of the reconnect loop ended.
enum IterationOutcome {
    ConnectionLost(Error),
    Cancelled,
    Fatal(Error),
}

impl Supervisor {
    pub fn new(
        resolver: Arc<dyn Resolver>, forwarder: Arc<dyn PortForwarder>,
        reverse_proxy: Arc<dyn ReverseProxy>, port_allocator: Arc<dyn PortAllocator>,
        browser: Arc<dyn BrowserOpener>, transport_factory: Arc<dyn TransportFactory>,
    ) -> Self {
        Self { resolver, forwarder, reverse_proxy, port_allocator, browser, transport_factory }
    }

    /// Runs the proxy until `cancel` fires or a fatal error occurs. Never
    /// returns a success value (§4.4, P5) — every path produces an `Error`
    /// that either wraps the cancellation sentinel or a fatal failure.
    pub async fn run(&self, cancel: CancellationToken, spec: TargetSpec) -> Error {
        match self.run_inner(cancel, spec, Backoff::new()).await {
            Ok(never) => match never {},
            Err(e) => e,
        }
    }

    /// Same as [`Supervisor::run`] with an explicit backoff policy, so tests
    /// can pin `randomization` at `0.0` for deterministic timing.
    #[cfg(test)]
    pub(crate) async fn run_with_backoff(
        &self, cancel: CancellationToken, spec: TargetSpec, backoff: Backoff,
    ) -> Error {
        match self.run_inner(cancel, spec, backoff).await {
            Ok(never) => match never {},
            Err(e) => e,
        }
    }

    async fn run_inner(
        &self, cancel: CancellationToken, spec: TargetSpec, mut backoff: Backoff,
    ) -> Result<std::convert::Infallible, Error> {
        let resolved = self.resolve(&spec).await?;
        let transit_port = self.port_allocator.allocate_local_port().await?;
        let transport = self.transport_factory.new_transport().await?;
        let gate = OpenBrowserGate::new();

        loop {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            match self
                .run_iteration(&cancel, transit_port, &resolved, &spec, transport.clone(), &gate)
                .await
            {
                IterationOutcome::ConnectionLost(e) => {
                    debug_assert!(e.is_connection_lost());
                    let delay = backoff.next_delay();
                    tracing::warn!(delay_ms = delay.as_millis() as u64, "retrying: {e}");
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = cancel.cancelled() => return Err(Error::Cancelled),
                    }
                }
                IterationOutcome::Cancelled => return Err(Error::Cancelled),
                IterationOutcome::Fatal(e) => return Err(e),
            }
        }
    }

    async fn resolve(&self, spec: &TargetSpec) -> Result<ResolvedTarget, Error> {
        match spec.host_target() {
            HostTarget::Service(name) => self.resolver.find_pod_by_service(spec.namespace(), &name).await,
            HostTarget::Pod(name) => self.resolver.find_pod_by_name(spec.namespace(), &name).await,
        }
    }

    /// Runs the four (effectively five, SubD folds its spawned shutdown
    /// watcher into one task) concurrent subtasks of §4.4.2 and classifies
    /// the outcome once the forwarder or the proxy finishes.
    async fn run_iteration(
        &self, outer: &CancellationToken, transit_port: u16, resolved: &ResolvedTarget,
        spec: &TargetSpec, transport: Upstream, gate: &OpenBrowserGate,
    ) -> IterationOutcome {
        let inner = outer.child_token();

        let (ready_tx, ready_rx) = oneshot::channel::<()>();
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let (proxy_ready_tx, proxy_ready_rx) = oneshot::channel::<crate::proxy::ProxyInstance>();

        // SubA — forwarder.
        let forwarder = self.forwarder.clone();
        let resolved_a = resolved.clone();
        let mut sub_a = tokio::spawn(async move {
            forwarder.run(transit_port, &resolved_a, ready_tx, stop_rx).await
        });

        // SubB — stop-on-cancel.
        let inner_b = inner.clone();
        let mut sub_b = tokio::spawn(async move {
            inner_b.cancelled().await;
            let _ = stop_tx.send(());
        });

        // SubC — proxy, started only once the forwarder is ready.
        let reverse_proxy = self.reverse_proxy.clone();
        let bind_addresses = spec.bind_addresses().to_vec();
        let scheme = spec.scheme().to_string();
        let inner_c = inner.clone();
        let mut sub_c = tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = inner_c.cancelled() => Err(Error::Cancelled),
                res = ready_rx => {
                    if res.is_err() {
                        return Err(Error::Cancelled);
                    }
                    reverse_proxy
                        .run(transport, &bind_addresses, scheme, "localhost".to_string(), transit_port, proxy_ready_tx)
                        .await
                }
            }
        });

        // SubD — browser-open, then shutdown-on-cancel once the proxy is up.
        let browser = self.browser.clone();
        let skip_open_browser = spec.skip_open_browser();
        let gate = gate.clone();
        let inner_d = inner.clone();
        let mut sub_d = tokio::spawn(async move {
            let instance = match proxy_ready_rx.await {
                Ok(instance) => instance,
                Err(_) => return,
            };
            let url = instance.url().to_string();
            if skip_open_browser {
                eprintln!("Please open {url} in the browser");
            } else {
                gate.fire(|| async {
                    if let Err(e) = browser.open(&url).await {
                        tracing::warn!(error = %e, "failed to open browser");
                    }
                })
                .await;
            }
            inner_d.cancelled().await;
            // A fresh (never-cancelled) token drives the drain (§9): the
            // proxy's own shutdown token is independent of `inner`.
            if let Err(e) = instance.shutdown().await {
                tracing::warn!(error = %e, "proxy shutdown error");
            }
        });

        let (a_result, c_result) = tokio::select! {
            res = &mut sub_a => {
                inner.cancel();
                (res, sub_c.await)
            }
            res = &mut sub_c => {
                inner.cancel();
                (sub_a.await, res)
            }
        };
        inner.cancel();
        let _ = sub_b.await;
        let _ = sub_d.await;

        let a = flatten(a_result);
        let c = flatten(c_result);
        classify(outer.is_cancelled(), a, c)
    }
}

fn flatten(result: Result<Result<(), Error>, tokio::task::JoinError>) -> Result<(), Error> {
    match result {
        Ok(inner) => inner,
        Err(e) => Err(Error::Other(anyhow::anyhow!("subtask panicked: {e}"))),
    }
}

fn classify(outer_cancelled: bool, a: Result<(), Error>, c: Result<(), Error>) -> IterationOutcome {
    if outer_cancelled {
        return IterationOutcome::Cancelled;
    }
    if let Err(e) = a {
        if !e.is_cancelled() {
            return IterationOutcome::Fatal(e);
        }
    }
    if let Err(e) = c {
        if !e.is_cancelled() {
            return IterationOutcome::Fatal(e);
        }
    }
    IterationOutcome::ConnectionLost(Error::ConnectionLost)
}
